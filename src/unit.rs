//! Execution of a single processing unit
//!
//! Shared by the batch runner and the streaming transform: races the
//! processor against the per-unit timeout, turns panics into unit errors and
//! records the outcome in the run's tracker.

use crate::common::UnitError;
use crate::stats::StatsTracker;
use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;

/// Run one unit to its settled outcome
///
/// When the timeout fires first the processor future is dropped, which
/// cancels it and frees its concurrency slot. `len` is added to the byte
/// counter only for successful units.
pub(crate) async fn run_unit<Fut, T, E>(
    index: usize,
    len: usize,
    work: Fut,
    timeout: Duration,
    stats: &StatsTracker,
) -> Result<T, UnitError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, AssertUnwindSafe(work).catch_unwind()).await
    {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(UnitError::failed(index, e.to_string())),
        Ok(Err(panic)) => Err(UnitError::panicked(index, panic_message(panic.as_ref()))),
        Err(_) => Err(UnitError::timed_out(index, timeout)),
    };

    let elapsed = started.elapsed();
    match &outcome {
        Ok(_) => stats.record_success(len, elapsed),
        Err(e) => {
            log::warn!("{}", e);
            stats.record_failure(elapsed);
        }
    }

    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("processor panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("processor panicked: {s}")
    } else {
        "processor panicked".to_string()
    }
}
