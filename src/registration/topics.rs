//! Topic layout of the function/variable protocol and device id validation

use thiserror::Error;

/// Default topic prefix
pub const DEFAULT_PREFIX: &str = "HY/Post";

/// Normalize a topic prefix: no leading, trailing, or doubled separators
pub fn canonicalize_prefix(prefix: &str) -> String {
    prefix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}

/// Topics used by one device under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    prefix: String,
    device_id: String,
}

impl TopicLayout {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        Self {
            prefix: canonicalize_prefix(prefix),
            device_id: device_id.to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}/Function/{device}/#`
    pub fn function_topic(&self) -> String {
        format!("{}/Function/{}/#", self.prefix, self.device_id)
    }

    /// `{prefix}/Variable/{device}/#`
    pub fn variable_topic(&self) -> String {
        format!("{}/Variable/{}/#", self.prefix, self.device_id)
    }

    /// `{prefix}/Register/{device}`
    pub fn register_topic(&self) -> String {
        format!("{}/Register/{}", self.prefix, self.device_id)
    }

    /// `{prefix}/Function/Result/{device}/{function}/{call}`
    pub fn function_result_topic(&self, function: &str, call_id: &str) -> String {
        format!(
            "{}/Function/Result/{}/{}/{}",
            self.prefix, self.device_id, function, call_id
        )
    }

    /// `{prefix}/Variable/Result/{device}/{variable}/{call}`
    pub fn variable_result_topic(&self, variable: &str, call_id: &str) -> String {
        format!(
            "{}/Variable/Result/{}/{}/{}",
            self.prefix, self.device_id, variable, call_id
        )
    }
}

/// Last topic segment: the caller's request id
pub fn call_id(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Second-to-last topic segment: the function or variable name
pub fn topic_key(topic: &str) -> Option<&str> {
    let mut segments = topic.rsplit('/');
    segments.next()?;
    segments.next()
}
