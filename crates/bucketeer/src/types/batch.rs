//! Per-key outcomes of fan-out operations.

use std::time::Instant;

use crate::{Error, Result, TRACING_TARGET_BATCH};

/// Outcome of one key inside a batch operation.
#[derive(Debug)]
pub struct KeyOutcome {
    /// Source key as returned by the listing.
    pub key: String,
    /// Destination key, or local path for downloads.
    pub target: String,
    /// Failure for this key, `None` on success.
    pub error: Option<Error>,
}

impl KeyOutcome {
    pub(crate) fn new(key: String, target: String, result: Result<()>) -> Self {
        Self {
            key,
            target,
            error: result.err(),
        }
    }

    /// Returns whether the key was processed successfully.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of a batch operation.
///
/// A failing key never aborts the rest of the batch and nothing is rolled
/// back; outcomes are kept in listing order.
#[derive(Debug, Default)]
#[must_use = "batch reports may contain per-key failures"]
pub struct BatchReport {
    outcomes: Vec<KeyOutcome>,
}

impl BatchReport {
    pub(crate) fn new(outcomes: Vec<KeyOutcome>) -> Self {
        Self { outcomes }
    }

    /// Builds the report of a finished batch and logs its summary.
    pub(crate) fn finish(
        operation: &'static str,
        prefix: &str,
        outcomes: Vec<KeyOutcome>,
        started: Instant,
    ) -> Self {
        let report = Self::new(outcomes);
        for failure in report.failures() {
            if let Some(error) = &failure.error {
                tracing::warn!(
                    target: TRACING_TARGET_BATCH,
                    operation,
                    key = %failure.key,
                    target_key = %failure.target,
                    error = %error,
                    "Key failed"
                );
            }
        }

        tracing::info!(
            target: TRACING_TARGET_BATCH,
            operation,
            prefix,
            total = report.len(),
            failed = report.failed_count(),
            elapsed_ms = started.elapsed().as_millis(),
            "Batch finished"
        );
        report
    }

    /// Number of keys the batch touched.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns whether the listing matched no keys.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of keys that failed.
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    /// Returns whether every key succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(KeyOutcome::is_ok)
    }

    /// All outcomes in listing order.
    pub fn outcomes(&self) -> &[KeyOutcome] {
        &self.outcomes
    }

    /// Targets of the keys that succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.target.as_str())
    }

    /// Outcomes of the keys that failed.
    pub fn failures(&self) -> impl Iterator<Item = &KeyOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// Converts the report into the list of targets, or a
    /// [`Error::PartialFailure`] if any key failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        let failed = self.failed_count();
        if failed > 0 {
            return Err(Error::PartialFailure {
                failed,
                total: self.outcomes.len(),
            });
        }

        Ok(self.outcomes.into_iter().map(|o| o.target).collect())
    }
}

impl IntoIterator for BatchReport {
    type IntoIter = std::vec::IntoIter<KeyOutcome>;
    type Item = KeyOutcome;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
