//! Failure handling around the store: a circuit breaker that trips on
//! storage failures, and the conflict-retry used by get-or-create.

use std::time::Duration;

use failsafe::backoff::{self, EqualJittered};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{CircuitBreaker, Config, StateMachine};
use log::warn;

use crate::error::{Error, Result};
use crate::store::StoreTx;

type CircuitBreakerType = StateMachine<ConsecutiveFailures<EqualJittered>, ()>;

/// Open-state backoff grows up to this multiple of the initial backoff.
const MAX_BACKOFF_FACTOR: u32 = 6;

#[derive(Clone)]
pub struct StoreGuard {
    circuit_breaker: CircuitBreakerType,
}

impl StoreGuard {
    pub fn new(consecutive_failures: u32, backoff: Duration) -> Self {
        let backoff = backoff::equal_jittered(backoff, backoff * MAX_BACKOFF_FACTOR);
        let policy = failure_policy::consecutive_failures(consecutive_failures, backoff);
        Self {
            circuit_breaker: Config::new().failure_policy(policy).build(),
        }
    }

    /// Runs `f` through the circuit breaker. Only [`Error::Storage`] counts as
    /// a failure; validation and lookup errors pass through untouched.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        match self.circuit_breaker.call_with(|e: &Error| e.is_storage(), f) {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                warn!("storage circuit open, rejecting call");
                Err(Error::Storage("storage circuit open".to_string()))
            }
        }
    }

    pub fn is_call_permitted(&self) -> bool {
        self.circuit_breaker.is_call_permitted()
    }
}

/// Attempts `create`; if a uniqueness constraint rejects it because another
/// writer got there first, looks the row up once more and reuses it.
///
/// Returns the row and whether this call created it. A deadlock is not
/// retried here: the transaction it belongs to is already gone.
pub fn create_or_reuse<T, C, L>(
    tx: &mut dyn StoreTx,
    what: &str,
    create: C,
    lookup: L,
) -> Result<(T, bool)>
where
    C: FnOnce(&mut dyn StoreTx) -> Result<T>,
    L: FnOnce(&mut dyn StoreTx) -> Result<Option<T>>,
{
    match create(tx) {
        Ok(row) => Ok((row, true)),
        Err(Error::Conflict(reason)) => {
            warn!("conflict creating {what} ({reason}), retrying as lookup");
            match lookup(tx)? {
                Some(row) => Ok((row, false)),
                None => Err(Error::Conflict(format!("{what} still unresolved after retry"))),
            }
        }
        Err(e) => Err(e),
    }
}
