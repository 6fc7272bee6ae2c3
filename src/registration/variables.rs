//! Cloud-readable device variables
//!
//! Application code owns a [`Variable`] and updates it freely; the protocol
//! holds a [`VariableBinding`] (a `watch` receiver) and always reads the
//! latest value when a read request arrives.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

/// A value the cloud service can read by name
#[derive(Debug)]
pub struct Variable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Variable<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Apply `f` to the current value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    fn reader(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Wire type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Int,
    Long,
    Text,
    Double,
}

/// Protocol-side view of a registered variable
#[derive(Debug, Clone)]
pub enum VariableBinding {
    Int(watch::Receiver<i32>),
    Long(watch::Receiver<i64>),
    Text(watch::Receiver<String>),
    Double(watch::Receiver<f64>),
}

impl VariableBinding {
    pub fn kind(&self) -> VariableKind {
        match self {
            VariableBinding::Int(_) => VariableKind::Int,
            VariableBinding::Long(_) => VariableKind::Long,
            VariableBinding::Text(_) => VariableKind::Text,
            VariableBinding::Double(_) => VariableKind::Double,
        }
    }

    /// Current value as JSON
    pub fn to_json(&self) -> Value {
        match self {
            VariableBinding::Int(rx) => Value::from(*rx.borrow()),
            VariableBinding::Long(rx) => Value::from(*rx.borrow()),
            VariableBinding::Text(rx) => Value::from(rx.borrow().clone()),
            VariableBinding::Double(rx) => Value::from(*rx.borrow()),
        }
    }
}

/// Variable types the protocol can expose
pub trait IntoBinding {
    fn binding(&self) -> VariableBinding;
}

impl IntoBinding for Variable<i32> {
    fn binding(&self) -> VariableBinding {
        VariableBinding::Int(self.reader())
    }
}

impl IntoBinding for Variable<i64> {
    fn binding(&self) -> VariableBinding {
        VariableBinding::Long(self.reader())
    }
}

impl IntoBinding for Variable<String> {
    fn binding(&self) -> VariableBinding {
        VariableBinding::Text(self.reader())
    }
}

impl IntoBinding for Variable<f64> {
    fn binding(&self) -> VariableBinding {
        VariableBinding::Double(self.reader())
    }
}
