//! Cloud function/variable registration
//!
//! - [`topics`] - topic layout and device id validation
//! - [`variables`] - watch-backed variables the cloud can read
//! - [`protocol`] - the [`RegistrationProtocol`] layered over the session

use thiserror::Error;

use crate::session::SessionError;

pub mod protocol;
pub mod topics;
pub mod variables;

pub use protocol::{
    FunctionCallback, InvocationResult, RegistrationMessage, RegistrationProtocol,
    RegistrationSettings, DEFAULT_MAX_FUNCTIONS,
};
pub use topics::{validate_device_id, TopicLayout, ValidationError, DEFAULT_PREFIX};
pub use variables::{IntoBinding, Variable, VariableBinding, VariableKind};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Function limit of {0} reached")]
    FunctionLimit(usize),

    #[error("Invalid function or variable name: '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to encode registration payload")]
    Encode(#[from] serde_json::Error),
}
