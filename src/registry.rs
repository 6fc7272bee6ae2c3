//! Topic pattern registry
//!
//! Maps subscribed topic patterns to a bounded list of callbacks. The registry
//! is the source of truth for which patterns must be re-subscribed after a
//! reconnect, and dispatches every inbound message.
//!
//! Matching is deliberately simple: a pattern without wildcards matches only
//! the identical topic; a pattern containing `+` or `#` is reduced to the text
//! before its last `/` and matches any topic starting with that prefix. Only
//! the first matching pattern, in subscription order, receives a message.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Default maximum number of distinct patterns
pub const DEFAULT_MAX_PATTERNS: usize = 20;
/// Default maximum callbacks per pattern
pub const DEFAULT_CALLBACKS_PER_PATTERN: usize = 3;

/// Inbound message handler, called with `(topic, payload)`
pub type TopicCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Topic pattern limit of {0} reached")]
    PatternLimit(usize),

    #[error("Callback limit of {limit} reached for '{pattern}'")]
    CallbackLimit { pattern: String, limit: usize },

    #[error("No subscription for '{0}'")]
    UnknownPattern(String),
}

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('+') || pattern.contains('#')
}

/// Literal prefix a wildcard pattern is matched by
pub fn reduced_prefix(pattern: &str) -> &str {
    match pattern.rfind('/') {
        Some(index) => &pattern[..index],
        None => "",
    }
}

pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    if has_wildcard(pattern) {
        topic.starts_with(reduced_prefix(pattern))
    } else {
        pattern == topic
    }
}

struct TopicEntry {
    pattern: String,
    callbacks: Vec<TopicCallback>,
}

pub struct TopicRegistry {
    entries: Vec<TopicEntry>,
    max_patterns: usize,
    callbacks_per_pattern: usize,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_PATTERNS, DEFAULT_CALLBACKS_PER_PATTERN)
    }

    pub fn with_limits(max_patterns: usize, callbacks_per_pattern: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_patterns,
            callbacks_per_pattern,
        }
    }

    /// Append `callback` to `pattern`, creating the entry if needed
    pub fn register(&mut self, pattern: &str, callback: TopicCallback) -> Result<(), RegistryError> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            if entry.callbacks.len() >= self.callbacks_per_pattern {
                warn!(pattern, limit = self.callbacks_per_pattern, "Callback limit reached");
                return Err(RegistryError::CallbackLimit {
                    pattern: pattern.to_string(),
                    limit: self.callbacks_per_pattern,
                });
            }
            entry.callbacks.push(callback);
            return Ok(());
        }

        if self.entries.len() >= self.max_patterns {
            warn!(pattern, limit = self.max_patterns, "Topic pattern limit reached");
            return Err(RegistryError::PatternLimit(self.max_patterns));
        }
        self.entries.push(TopicEntry {
            pattern: pattern.to_string(),
            callbacks: vec![callback],
        });
        Ok(())
    }

    /// Remove `pattern` and all of its callbacks
    pub fn unregister(&mut self, pattern: &str) -> Result<(), RegistryError> {
        match self.entries.iter().position(|e| e.pattern == pattern) {
            Some(index) => {
                self.entries.remove(index);
                Ok(())
            }
            None => Err(RegistryError::UnknownPattern(pattern.to_string())),
        }
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.iter().any(|e| e.pattern == pattern)
    }

    /// Whether any registered pattern would receive `topic`
    pub fn has_callback(&self, topic: &str) -> bool {
        self.first_match(topic).is_some()
    }

    pub fn callback_count(&self, pattern: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.pattern == pattern)
            .map_or(0, |e| e.callbacks.len())
    }

    /// Registered patterns in subscription order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn first_match(&self, topic: &str) -> Option<&TopicEntry> {
        self.entries
            .iter()
            .find(|e| pattern_matches(&e.pattern, topic))
    }

    /// Call every callback of the first pattern matching `topic`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn trigger(&self, topic: &str, payload: &str) -> usize {
        match self.first_match(topic) {
            Some(entry) => {
                debug!(topic, pattern = %entry.pattern, "Dispatching message");
                for callback in &entry.callbacks {
                    callback(topic, payload);
                }
                entry.callbacks.len()
            }
            None => {
                debug!(topic, "No callback for topic");
                0
            }
        }
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .field("max_patterns", &self.max_patterns)
            .field("callbacks_per_pattern", &self.callbacks_per_pattern)
            .finish()
    }
}
