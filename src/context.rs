//! Execution context classification.
//!
//! Every dispatch starts by asking where the caller is running:
//!
//! - **InDurableUnit**: a replay-safe workflow body. Only deterministic work
//!   may run here; I/O, random ids and wall-clock reads go through a
//!   retryable unit.
//! - **InRetryableUnit**: an activity body. Free to do I/O, but must not
//!   start another retryable unit.
//! - **Neither**: a plain program outside the substrate.
//!
//! The answer is never stored. Callers either thread an explicit value in
//! ([`FixedClassifier`]) or ask the substrate at call time
//! ([`SubstrateClassifier`]).

use crate::substrate::OrchestrationSubstrate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where the current call site is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    InDurableUnit,
    InRetryableUnit,
    Neither,
}

impl ExecutionContext {
    /// Whether the caller runs under the substrate at all.
    pub fn is_within_substrate(&self) -> bool {
        !matches!(self, Self::Neither)
    }
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InDurableUnit => write!(f, "durable_unit"),
            Self::InRetryableUnit => write!(f, "retryable_unit"),
            Self::Neither => write!(f, "neither"),
        }
    }
}

/// Answers "where am I running?".
///
/// Implementations must be pure and consistent for the duration of one
/// logical execution: a durable unit never observes itself as a retryable
/// unit or vice versa.
pub trait ExecutionContextClassifier: Send + Sync {
    fn classify(&self) -> ExecutionContext;
}

/// Classifier that always returns the value it was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClassifier(pub ExecutionContext);

impl FixedClassifier {
    pub fn durable() -> Self {
        Self(ExecutionContext::InDurableUnit)
    }

    pub fn retryable() -> Self {
        Self(ExecutionContext::InRetryableUnit)
    }

    pub fn outside() -> Self {
        Self(ExecutionContext::Neither)
    }
}

impl ExecutionContextClassifier for FixedClassifier {
    fn classify(&self) -> ExecutionContext {
        self.0
    }
}

/// Classifier backed by the substrate's own notion of the current context.
#[derive(Clone)]
pub struct SubstrateClassifier {
    substrate: Arc<dyn OrchestrationSubstrate>,
}

impl SubstrateClassifier {
    pub fn new(substrate: Arc<dyn OrchestrationSubstrate>) -> Self {
        Self { substrate }
    }
}

impl ExecutionContextClassifier for SubstrateClassifier {
    fn classify(&self) -> ExecutionContext {
        self.substrate.current_execution_context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::LocalSubstrate;

    #[test]
    fn test_fixed_classifier() {
        assert_eq!(
            FixedClassifier::durable().classify(),
            ExecutionContext::InDurableUnit
        );
        assert_eq!(
            FixedClassifier::retryable().classify(),
            ExecutionContext::InRetryableUnit
        );
        assert_eq!(FixedClassifier::outside().classify(), ExecutionContext::Neither);
        assert!(!ExecutionContext::Neither.is_within_substrate());
    }

    #[test]
    fn test_substrate_classifier_delegates() {
        let substrate = Arc::new(LocalSubstrate::new(ExecutionContext::InRetryableUnit));
        let classifier = SubstrateClassifier::new(substrate);
        assert_eq!(classifier.classify(), ExecutionContext::InRetryableUnit);
        // Consistent across repeated calls
        assert_eq!(classifier.classify(), classifier.classify());
    }
}
