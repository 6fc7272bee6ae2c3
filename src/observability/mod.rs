//! Structured logging setup and span macros

pub mod logging;

pub use logging::{
    init_default_logging, init_device_logging, init_logging, level_from_number, LogFormat,
};

// Span macros for structured logging
pub use logging::{link_span, mqtt_span};
