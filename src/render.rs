//! Terminal rendering of activity events

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::event::ActivityEvent;

/// Server timestamp in the configured zone; unparseable values are shown as sent.
pub fn format_timestamp(raw: &str, zone: Tz) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => at
            .with_timezone(&Utc)
            .with_timezone(&zone)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

pub fn event_line(event: &ActivityEvent, zone: Tz) -> String {
    let severity = event
        .severity
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<8}  {:<16}  {}",
        format_timestamp(&event.timestamp, zone),
        severity,
        event.kind,
        event.title
    );
    if let Some(project) = event.project_name.as_deref().or(event.project_id.as_deref()) {
        line.push_str(&format!("  project={project}"));
    }
    if let Some(user) = event.user_email.as_deref().or(event.user_id.as_deref()) {
        line.push_str(&format!("  user={user}"));
    }
    if let Some(cost) = event.cost {
        line.push_str(&format!("  cost=${cost:.2}"));
    }
    if let Some(tokens) = event.tokens {
        line.push_str(&format!("  tokens={tokens}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sample_event;

    #[test]
    fn test_timestamp_in_zone() {
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        assert_eq!(
            format_timestamp("2026-10-17T09:00:00Z", tokyo),
            "2026-10-17 18:00:00 JST"
        );
    }

    #[test]
    fn test_unparseable_timestamp_kept() {
        assert_eq!(format_timestamp("yesterday", Tz::UTC), "yesterday");
    }

    #[test]
    fn test_event_line_includes_optional_fields() {
        let mut event = sample_event("a", "Spend spike on gpt-4o");
        event.project_name = Some("search".to_string());
        let line = event_line(&event, Tz::UTC);
        assert!(line.starts_with("2026-10-17 09:00:00 UTC  high"));
        assert!(line.contains("Spend spike on gpt-4o"));
        assert!(line.contains("project=search"));
        assert!(line.contains("cost=$1.25"));
        assert!(line.contains("tokens=2048"));
        assert!(!line.contains("user="));
    }
}
