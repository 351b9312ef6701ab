//! Bounded, TTL'd record of routed events.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_core::EventMessage;
use tokio::time::Instant;

/// History limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of events retained; the oldest is evicted first.
    pub max_size: usize,
    /// Age after which an entry is dropped. `None` keeps entries until evicted.
    #[serde(with = "optional_secs")]
    pub ttl: Option<Duration>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Some(Duration::from_secs(3600)),
        }
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ttl) => serializer.serialize_some(&ttl.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

/// Selects events from the history. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Only events of this type.
    pub event_type: Option<String>,
    /// Only events in this namespace.
    pub namespace: Option<String>,
    /// Only events stamped at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// At most this many of the most recent matches.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    /// Match only `event_type`.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Match only `namespace`.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Match only events at or after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Return at most `limit` events.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &EventMessage) -> bool {
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            if event.namespace() != Some(namespace.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp.is_none_or(|ts| ts < since) {
                return false;
            }
        }
        true
    }
}

pub(crate) struct EventHistory {
    config: HistoryConfig,
    entries: Mutex<VecDeque<(Instant, EventMessage)>>,
}

impl EventHistory {
    pub(crate) fn new(config: HistoryConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_size.min(1024))),
            config,
        }
    }

    pub(crate) fn record(&self, event: &EventMessage) {
        if self.config.max_size == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.prune_expired(&mut entries, now);
        entries.push_back((now, event.clone()));
        while entries.len() > self.config.max_size {
            let _ = entries.pop_front();
        }
    }

    /// Matching events, oldest first. Returns owned copies.
    pub(crate) fn snapshot(&self, filter: &HistoryFilter) -> Vec<EventMessage> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let mut matched: Vec<EventMessage> = entries
            .iter()
            .filter(|(at, _)| !self.is_expired(*at, now))
            .map(|(_, event)| event)
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        drop(entries);

        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                let _ = matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    fn is_expired(&self, at: Instant, now: Instant) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| now.saturating_duration_since(at) > ttl)
    }

    fn prune_expired(&self, entries: &mut VecDeque<(Instant, EventMessage)>, now: Instant) {
        while entries
            .front()
            .is_some_and(|(at, _)| self.is_expired(*at, now))
        {
            let _ = entries.pop_front();
        }
    }
}
