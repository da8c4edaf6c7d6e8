use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::lifecycle::{Lifecycle, RefundStatus, ReservationStatus};
use crate::limits::*;
use crate::model::*;
use crate::notify::Topic;

use super::conflict::{now_ms, validate_opt_text, validate_text};
use super::{apply_to_refund, Engine, EngineError, SharedRefund};

/// Build the refund record a `RefundRequested` (or compaction snapshot) event describes.
pub(super) fn refund_from_event(event: &Event) -> Option<RefundRequest> {
    match event {
        Event::RefundRequested {
            id,
            reservation_id,
            amount,
            actor,
            at,
            ..
        } => Some(RefundRequest {
            id: *id,
            reservation_id: *reservation_id,
            requested_amount: *amount,
            approved_amount: None,
            status: RefundStatus::Requested,
            admin_notes: None,
            transaction_ref: None,
            created_at: *at,
            timeline: vec![TimelineEntry::new(*at, "requested", actor.clone(), None)],
        }),
        Event::RefundRestored(refund) => Some(refund.clone()),
        _ => None,
    }
}

impl Engine {
    /// Open the single refund request a reservation may carry.
    pub async fn request_refund(
        &self,
        id: Ulid,
        reservation_id: Ulid,
        amount: u64,
        actor: Option<String>,
    ) -> Result<RefundRequest, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        if amount == 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if self.refunds.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // The reservation's resource lock serializes refund requests for it.
        let (resource_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let reservation = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if reservation.status == ReservationStatus::Cancelled {
            return Err(EngineError::NotRefundable(reservation_id));
        }
        if amount > reservation.amount {
            return Err(EngineError::AmountExceeded {
                amount,
                limit: reservation.amount,
            });
        }
        if self.refund_by_reservation.contains_key(&reservation_id) {
            return Err(EngineError::RefundExists(reservation_id));
        }

        let event = Event::RefundRequested {
            id,
            reservation_id,
            resource_id,
            amount,
            actor,
            at: now_ms(),
        };
        let refund = refund_from_event(&event).ok_or(EngineError::NotFound(id))?;
        let shared = Arc::new(Mutex::new(refund.clone()));
        let refund_guard = shared
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::AlreadyExists(id))?;
        match self.refunds.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }

        if let Err(e) = self.wal_append(&event).await {
            self.refunds.remove(&id);
            return Err(e);
        }
        self.refund_by_reservation.insert(reservation_id, id);
        self.apply_to_resource(&mut guard, &event);
        drop(refund_guard);
        self.notify.send(Topic::Resource(resource_id), &event);
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
            "entity" => RefundStatus::ENTITY, "outcome" => "requested")
        .increment(1);
        Ok(refund)
    }

    /// Approve up to the requested amount.
    pub async fn approve_refund(
        &self,
        id: Ulid,
        approved_amount: u64,
        notes: Option<String>,
        actor: Option<String>,
    ) -> Result<RefundRequest, EngineError> {
        validate_opt_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        self.transition_refund(id, RefundStatus::Approved, actor, |refund| {
            if approved_amount == 0 {
                return Err(EngineError::InvalidAmount(approved_amount));
            }
            if approved_amount > refund.requested_amount {
                return Err(EngineError::AmountExceeded {
                    amount: approved_amount,
                    limit: refund.requested_amount,
                });
            }
            Ok((Some(approved_amount), None, notes))
        })
        .await
    }

    pub async fn reject_refund(
        &self,
        id: Ulid,
        notes: Option<String>,
        actor: Option<String>,
    ) -> Result<RefundRequest, EngineError> {
        validate_opt_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        self.transition_refund(id, RefundStatus::Rejected, actor, |_| Ok((None, None, notes)))
            .await
    }

    /// Mark an approved refund as settled. No funds move here; the payment
    /// collaborator's transaction reference is recorded as-is.
    pub async fn complete_refund(
        &self,
        id: Ulid,
        transaction_ref: String,
        actor: Option<String>,
    ) -> Result<RefundRequest, EngineError> {
        validate_text(&transaction_ref, MAX_TRANSACTION_REF_LEN, "transaction ref too long")?;
        self.transition_refund(id, RefundStatus::Completed, actor, |_| {
            if transaction_ref.trim().is_empty() {
                return Err(EngineError::TransactionRefRequired);
            }
            Ok((None, Some(transaction_ref), None))
        })
        .await
    }

    /// Shared path: lock, check the status table, run the target-specific
    /// check, then persist. `check` yields (approved_amount, transaction_ref, notes).
    async fn transition_refund<F>(
        &self,
        id: Ulid,
        to: RefundStatus,
        actor: Option<String>,
        check: F,
    ) -> Result<RefundRequest, EngineError>
    where
        F: FnOnce(&RefundRequest) -> Result<(Option<u64>, Option<String>, Option<String>), EngineError>,
    {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let shared: SharedRefund = self
            .refunds
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let mut refund = shared.lock().await;
        refund.status.check_transition(to)?;
        let (approved_amount, transaction_ref, notes) = check(&*refund)?;

        let event = Event::RefundTransitioned {
            id,
            to,
            approved_amount,
            transaction_ref,
            notes,
            actor,
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_refund(&mut refund, &event);
        if let Some(resource_id) = self.resource_for_reservation(&refund.reservation_id) {
            self.notify.send(Topic::Resource(resource_id), &event);
        }
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
            "entity" => RefundStatus::ENTITY, "outcome" => "applied")
        .increment(1);
        tracing::debug!("refund {id} -> {to}");
        Ok(refund.clone())
    }
}
