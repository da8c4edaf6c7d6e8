use ulid::Ulid;

use crate::lifecycle::ReservationStatus;
use crate::limits::MAX_BULK_SIZE;

use super::{Engine, EngineError};

/// Per-item outcome of a bulk transition.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<Ulid>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug)]
pub struct BulkFailure {
    pub id: Ulid,
    pub error: EngineError,
}

impl BulkReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

impl Engine {
    /// Best-effort batch: each id is transitioned on its own under its own
    /// resource lock. A failure is recorded and the batch moves on; nothing
    /// already applied is rolled back.
    pub async fn bulk_transition(
        &self,
        ids: &[Ulid],
        to: ReservationStatus,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<BulkReport, EngineError> {
        if ids.len() > MAX_BULK_SIZE {
            return Err(EngineError::LimitExceeded("bulk batch too large"));
        }

        let mut report = BulkReport::default();
        for &id in ids {
            match self
                .transition_reservation(id, to, reason.clone(), actor.clone())
                .await
            {
                Ok(_) => report.succeeded.push(id),
                Err(error) => {
                    tracing::debug!("bulk {to}: {id} failed: {error}");
                    report.failed.push(BulkFailure { id, error });
                }
            }
        }
        metrics::counter!(crate::observability::BULK_ITEMS_TOTAL, "outcome" => "succeeded")
            .increment(report.succeeded.len() as u64);
        metrics::counter!(crate::observability::BULK_ITEMS_TOTAL, "outcome" => "failed")
            .increment(report.failed.len() as u64);
        Ok(report)
    }
}
