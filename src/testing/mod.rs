//! Testing utilities and mock implementations
//!
//! Mock transports, radio drivers, broker clients, certificate stores, and
//! peripherals for exercising the stack without hardware or a live broker.

pub mod mocks;

pub use mocks::*;
