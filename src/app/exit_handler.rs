//! Exit code logic for the omnifetch process.
//!
//! Single responsibility: map batch counts to the process exit outcome.

use omnifetch_core::BatchResult;

use crate::ProcessExit;

/// Determines the process exit outcome from succeeded and failed target counts.
///
/// Targets skipped by `--stop-on-error` count as not succeeded.
pub(crate) fn determine_exit_outcome(succeeded: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

pub(crate) fn exit_outcome_for_batch(result: &BatchResult) -> ProcessExit {
    determine_exit_outcome(result.succeeded, result.failed + result.skipped)
}
