use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the WAL as a snapshot of current state: one registration per
    /// resource, then every reservation, refund and complaint with its full
    /// timeline.
    ///
    /// Holds the compaction gate exclusively, so no mutation can append an
    /// event the snapshot has not seen before the file is swapped.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::new();

        let mut resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(resources.len());
        for rs in resources.drain(..) {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| g.id);
        for guard in &guards {
            events.push(Event::ResourceRegistered {
                id: guard.id,
                kind: guard.kind,
                capacity: guard.capacity,
                name: guard.name.clone(),
            });
        }
        for guard in &guards {
            events.extend(guard.reservations.iter().cloned().map(Event::ReservationRestored));
        }

        let refunds: Vec<_> = self.refunds.iter().map(|e| e.value().clone()).collect();
        for shared in refunds {
            events.push(Event::RefundRestored(shared.lock().await.clone()));
        }
        let complaints: Vec<_> = self.complaints.iter().map(|e| e.value().clone()).collect();
        for shared in complaints {
            events.push(Event::ComplaintRestored(shared.lock().await.clone()));
        }

        let written = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {written} events");
        Ok(written)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
