//! Usage report downloads (CSV, JSON, XLSX)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use reqwest::{Client, Url, header};
use tracing::info;

use crate::source::check_status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
    #[value(alias = "excel")]
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn accept(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ExportRequest {
    pub fn url(&self, endpoint: &Url) -> Result<Url> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                bail!("export range starts after it ends: {from} > {to}");
            }
        }
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", self.format.as_str());
            if let Some(from) = self.from {
                query.append_pair("from", &from.to_string());
            }
            if let Some(to) = self.to {
                query.append_pair("to", &to.to_string());
            }
        }
        Ok(url)
    }

    /// `usage-report[-FROM][_TO].EXT`
    pub fn default_file_name(&self) -> PathBuf {
        let mut name = String::from("usage-report");
        if let Some(from) = self.from {
            name.push_str(&format!("-{from}"));
        }
        if let Some(to) = self.to {
            name.push_str(&format!("_{to}"));
        }
        PathBuf::from(format!("{name}.{}", self.format.as_str()))
    }
}

/// Download a report and write the body verbatim to `output`. Returns the byte count.
pub async fn download_report(
    client: &Client,
    endpoint: &Url,
    token: Option<&str>,
    request: &ExportRequest,
    output: &Path,
) -> Result<usize> {
    let url = request.url(endpoint)?;
    let mut builder = client
        .get(url.clone())
        .header(header::ACCEPT, request.format.accept());
    if let Some(token) = token {
        builder = builder.bearer_auth(token);
    }

    let response = builder
        .send()
        .await
        .context("failed to send export request")?;
    let body = check_status(response)
        .context("export request returned error status")?
        .bytes()
        .await
        .context("failed to read export body")?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create export directory: {}", parent.display())
            })?;
        }
    }
    std::fs::write(output, &body)
        .with_context(|| format!("failed to write export file: {}", output.display()))?;

    info!(url = %url, bytes = body.len(), path = %output.display(), "report exported");
    Ok(body.len())
}
