//! The settlement target seam.
//!
//! A vault or recipient service that performs the actual value transfer once
//! an operation reaches consensus. The registry invokes it at most once per
//! operation and records a failure instead of rolling back consensus.

use triad_types::Operation;

pub trait SettlementTarget {
    /// Transfer `operation.amount` to `operation.target`.
    ///
    /// An `Err` carries a human-readable reason.
    fn settle(&mut self, operation: &Operation) -> std::result::Result<(), String>;
}

impl<T: SettlementTarget + ?Sized> SettlementTarget for Box<T> {
    fn settle(&mut self, operation: &Operation) -> std::result::Result<(), String> {
        (**self).settle(operation)
    }
}

/// Target that records every call. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Default)]
pub struct RecordingTarget {
    pub settled: Vec<triad_types::OperationId>,
    /// When set, every call fails with this reason (after being recorded).
    pub fail_with: Option<String>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            settled: Vec::new(),
            fail_with: Some(reason.to_string()),
        }
    }

    pub fn calls_for(&self, id: &triad_types::OperationId) -> usize {
        self.settled.iter().filter(|s| *s == id).count()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl SettlementTarget for RecordingTarget {
    fn settle(&mut self, operation: &Operation) -> std::result::Result<(), String> {
        self.settled.push(operation.id);
        match &self.fail_with {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}
