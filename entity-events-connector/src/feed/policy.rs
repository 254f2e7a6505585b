use crate::{endpoint::Credentials, error::FeedError, events::InboundMessage};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

pub type FilterPredicate = Arc<dyn Fn(&Value, &InboundMessage) -> bool + Send + Sync>;

/// One selective-update filter entry.
#[derive(Clone)]
pub enum FilterRule {
    /// Passes when `data[key]` exists and equals the value.
    Equals(Value),
    /// Passes when the predicate returns `true` for `(data, message)`.
    Predicate(FilterPredicate),
}

impl FilterRule {
    pub fn equals(value: impl Into<Value>) -> Self {
        FilterRule::Equals(value.into())
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Value, &InboundMessage) -> bool + Send + Sync + 'static,
    {
        FilterRule::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, key: &str, data: &Value, message: &InboundMessage) -> bool {
        match self {
            FilterRule::Equals(expected) => data.get(key) == Some(expected),
            FilterRule::Predicate(predicate) => predicate(data, message),
        }
    }
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRule::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            FilterRule::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Accumulate-then-flush settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    pub enabled: bool,
    /// Flush as soon as this many updates are buffered.
    pub size: usize,
    /// Flush this long after the first buffered update, whatever the count.
    pub timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            size: 10,
            timeout: Duration::from_millis(1000),
        }
    }
}

/// How an [`UpdateFeed`](super::UpdateFeed) refines the raw subscription.
///
/// Filtering runs first; a rejected update never reaches batching or throttling.
/// Batching and throttling are exclusive, see [`validate`](UpdatePolicy::validate).
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    pub event_types: Vec<String>,
    /// Start as soon as the feed is attached.
    pub enabled: bool,
    /// Subscribe through the connection. When `false` the feed only polls.
    pub use_websocket: bool,
    /// Drive `connect()` from the feed when the connection is not up.
    pub auto_connect: bool,
    pub credentials: Credentials,
    pub selective_updates: bool,
    pub update_filters: Vec<(String, FilterRule)>,
    /// Debounce window. Zero delivers every update immediately.
    pub throttle: Duration,
    pub batch: BatchPolicy,
    /// Polling period used while the connection is not available.
    pub interval: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            event_types: Vec::new(),
            enabled: true,
            use_websocket: true,
            auto_connect: false,
            credentials: Credentials::default(),
            selective_updates: false,
            update_filters: Vec::new(),
            throttle: Duration::ZERO,
            batch: BatchPolicy::default(),
            interval: Duration::from_millis(5000),
        }
    }
}

impl UpdatePolicy {
    pub fn for_events<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A feed that never touches the connection and just polls every `interval`.
    pub fn polling(interval: Duration) -> Self {
        Self {
            use_websocket: false,
            interval,
            ..Self::default()
        }
    }

    pub fn throttle(mut self, window: Duration) -> Self {
        self.throttle = window;
        self
    }

    pub fn batch(mut self, size: usize, timeout: Duration) -> Self {
        self.batch = BatchPolicy {
            enabled: true,
            size,
            timeout,
        };
        self
    }

    /// Adds a filter entry and turns selective updates on.
    pub fn filter(mut self, key: impl Into<String>, rule: FilterRule) -> Self {
        self.selective_updates = true;
        self.update_filters.push((key.into(), rule));
        self
    }

    pub fn auto_connect(mut self, credentials: Credentials) -> Self {
        self.auto_connect = true;
        self.credentials = credentials;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Rejects combinations the feed cannot honour unambiguously.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.batch.enabled && !self.throttle.is_zero() {
            return Err(FeedError::ConflictingPolicies);
        }
        if self.batch.enabled && self.batch.size == 0 {
            return Err(FeedError::ZeroBatchSize);
        }
        if self.use_websocket && self.event_types.is_empty() {
            return Err(FeedError::NoEventTypes);
        }
        if self.interval.is_zero() {
            return Err(FeedError::ZeroInterval);
        }
        Ok(())
    }

    /// Selective-update check: every filter entry must pass.
    pub fn accepts(&self, data: &Value, message: &InboundMessage) -> bool {
        !self.selective_updates
            || self
                .update_filters
                .iter()
                .all(|(key, rule)| rule.matches(key, data, message))
    }
}
