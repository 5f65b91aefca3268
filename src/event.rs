//! Activity events and the bounded feed list that holds them

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default number of events kept in the feed
pub const DEFAULT_FEED_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// A single occurrence shown in the live feed (cost spike, error, budget warning, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub tokens: Option<i64>,
}

/// Most-recent-first list of events, unique by id and capped at `limit`
#[derive(Debug, Clone)]
pub struct EventFeed {
    events: VecDeque<ActivityEvent>,
    limit: usize,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_LIMIT)
    }
}

impl EventFeed {
    pub fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.iter().any(|event| event.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.events.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.events.iter().map(|event| event.id.as_str()).collect()
    }

    pub fn to_vec(&self) -> Vec<ActivityEvent> {
        self.events.iter().cloned().collect()
    }

    /// Install a fresh snapshot, discarding whatever was held.
    pub fn replace(&mut self, snapshot: Vec<ActivityEvent>) {
        self.events.clear();
        self.merge_batch(snapshot);
    }

    /// Merge a batch in front of the held events.
    ///
    /// Ids are de-duplicated with the incoming copy winning; an id keeps the
    /// position of its first appearance in `batch ++ held`. Returns the events
    /// whose ids were not held before, in feed order.
    pub fn merge_batch(&mut self, batch: Vec<ActivityEvent>) -> Vec<ActivityEvent> {
        let before: HashSet<String> = self.events.iter().map(|e| e.id.clone()).collect();
        let mut merged: Vec<ActivityEvent> = Vec::with_capacity(batch.len() + self.events.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for event in batch {
            match index.get(&event.id) {
                Some(&slot) => merged[slot] = event,
                None => {
                    index.insert(event.id.clone(), merged.len());
                    merged.push(event);
                }
            }
        }
        for event in self.events.drain(..) {
            if !index.contains_key(&event.id) {
                index.insert(event.id.clone(), merged.len());
                merged.push(event);
            }
        }

        merged.truncate(self.limit);
        let added = merged
            .iter()
            .filter(|e| !before.contains(&e.id))
            .cloned()
            .collect();
        self.events = merged.into();
        added
    }

    /// Put a single event at the front. Returns `false` for a duplicate id,
    /// which leaves the feed untouched.
    pub fn prepend(&mut self, event: ActivityEvent) -> bool {
        if self.contains(&event.id) {
            return false;
        }
        self.events.push_front(event);
        self.events.truncate(self.limit);
        true
    }
}

#[cfg(test)]
pub(crate) fn sample_event(id: &str, title: &str) -> ActivityEvent {
    ActivityEvent {
        id: id.to_string(),
        kind: "cost_spike".to_string(),
        severity: Some(Severity::High),
        title: title.to_string(),
        message: None,
        user_id: None,
        user_email: None,
        project_id: None,
        project_name: None,
        timestamp: "2026-10-17T09:00:00Z".to_string(),
        cost: Some(1.25),
        tokens: Some(2048),
    }
}
