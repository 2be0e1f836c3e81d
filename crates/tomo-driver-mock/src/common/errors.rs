//! Fault injection for mock collaborators.
//!
//! The simulated storage sink and frame encoder consult an [`ErrorConfig`]
//! before each operation so tests can make a run fail at a chosen frame.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tomo_core::error::{FaultKind, InjectedFault};

/// Fault injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every later call
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Fail exactly the call with this zero-based index
    FailOnce {
        operation: &'static str,
        index: u32,
    },
    /// Time out on every call
    Timeout { operation: &'static str },
    /// Lose the link on the first call of any operation; never recovers
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Create error config with uniform random failures and an optional seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check if an operation should fail and return the injected fault.
    pub fn check_operation(
        &self,
        component: &str,
        operation: &'static str,
    ) -> Result<(), InjectedFault> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(InjectedFault::new(
                component,
                FaultKind::Communication,
                "Communication lost",
            ));
        }

        let call_index = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            let index = *count;
            *count += 1;
            index
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && call_index >= *count => {
                    return Err(InjectedFault::new(
                        component,
                        FaultKind::Hardware,
                        format!("Injected failure after {} operations", count),
                    ));
                }
                ErrorScenario::FailOnce {
                    operation: op,
                    index,
                } if *op == operation && call_index == *index => {
                    return Err(InjectedFault::new(
                        component,
                        FaultKind::Hardware,
                        format!("Injected failure on call {} of '{}'", index, operation),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(InjectedFault::new(
                        component,
                        FaultKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(InjectedFault::new(
                        component,
                        FaultKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(InjectedFault::new(
                component,
                FaultKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Number of times an operation has been checked.
    pub fn calls(&self, operation: &'static str) -> u32 {
        self.state
            .lock()
            .operation_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Reset error state (clear counters, faults)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
