use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::lifecycle::{Lifecycle, PaymentStatus, ReservationStatus};
use crate::limits::*;
use crate::model::*;
use crate::notify::Topic;

use super::availability::peak_usage;
use super::conflict::*;
use super::{Engine, EngineError};

impl Engine {
    /// Catalog sync: make a resource known to the scheduler.
    pub async fn register_resource(
        &self,
        id: Ulid,
        kind: ResourceKind,
        capacity: u32,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        validate_opt_text(name.as_deref(), MAX_NAME_LEN, "resource name too long")?;
        validate_capacity(kind, capacity)?;

        // Publish the resource locked: nobody can reserve on it until the
        // registration itself is durable.
        let rs = Arc::new(RwLock::new(ResourceState::new(id, kind, name.clone(), capacity)));
        let guard = rs
            .clone()
            .try_write_owned()
            .map_err(|_| EngineError::AlreadyExists(id))?;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(rs);
            }
        }

        let event = Event::ResourceRegistered { id, kind, capacity, name };
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }
        drop(guard);
        self.notify.send(Topic::Resource(id), &event);
        Ok(())
    }

    /// Catalog sync: change capacity or name. Capacity may not drop below what
    /// is already committed at any instant.
    pub async fn update_resource(
        &self,
        id: Ulid,
        capacity: u32,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(name.as_deref(), MAX_NAME_LEN, "resource name too long")?;
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        validate_capacity(guard.kind, capacity)?;

        let everything = Span::new(MIN_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS);
        let peak = peak_usage(&guard, &everything);
        if capacity < peak {
            return Err(EngineError::CapacityBelowUsage { capacity, peak });
        }

        let event = Event::ResourceUpdated { id, capacity, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Check-and-commit a new reservation. Availability is computed and the
    /// reservation persisted under the resource's write lock, so two requests
    /// racing for the last unit cannot both succeed.
    pub async fn reserve(
        &self,
        id: Ulid,
        resource_id: Ulid,
        window: Span,
        quantity: u32,
        customer: CustomerInfo,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_window(&window)?;
        if window.duration_ms() > MAX_WINDOW_DURATION_MS {
            return Err(EngineError::LimitExceeded("reservation window too wide"));
        }
        validate_text(&customer.customer_ref, MAX_CUSTOMER_REF_LEN, "customer ref too long")?;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        if self.reservation_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        validate_quantity(&guard, quantity)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        if let Err(e) = check_available(&guard, &window, quantity) {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "unavailable")
                .increment(1);
            return Err(e);
        }

        // Claim the id globally; another resource may be racing with the same id.
        match self.reservation_to_resource.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
            }
        }

        let code = match self.claim_code(id, window.start) {
            Ok(code) => code,
            Err(e) => {
                self.reservation_to_resource.remove(&id);
                return Err(e);
            }
        };

        let status = if self.policy.auto_confirm {
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Pending
        };
        let event = Event::ReservationCreated {
            id,
            code: code.clone(),
            resource_id,
            window,
            quantity,
            status,
            customer_ref: customer.customer_ref,
            amount: customer.amount,
            actor,
            at: now_ms(),
        };
        if let Err(e) = self.persist_and_apply(resource_id, &mut guard, &event).await {
            self.reservation_to_resource.remove(&id);
            self.codes.remove(&code);
            return Err(e);
        }
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "created").increment(1);
        tracing::debug!("reservation {code} ({id}) on {resource_id}: {quantity} unit(s) as {status}");

        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Draw a reference code seeded with the booked date that has never been issued.
    fn claim_code(&self, id: Ulid, start: Ms) -> Result<String, EngineError> {
        let date = chrono::DateTime::from_timestamp_millis(start)
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "00000000".into());
        for _ in 0..MAX_CODE_ATTEMPTS {
            // Last six characters of a fresh ULID are pure randomness.
            let suffix = Ulid::new().to_string().split_off(20);
            let code = format!("R{date}-{suffix}");
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(id);
                return Ok(code);
            }
        }
        Err(EngineError::LimitExceeded("no unused reservation code found"))
    }

    /// Move a reservation along its status graph. Cancelling requires a reason
    /// and releases the reserved quantity.
    pub async fn transition_reservation(
        &self,
        id: Ulid,
        to: ReservationStatus,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .status;

        if let Err(e) = current.check_transition(to) {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
                "entity" => ReservationStatus::ENTITY, "outcome" => "rejected")
            .increment(1);
            return Err(e);
        }
        let reason = reason.filter(|r| !r.trim().is_empty());
        if to == ReservationStatus::Cancelled && reason.is_none() {
            return Err(EngineError::ReasonRequired);
        }

        let event = Event::ReservationTransitioned {
            id,
            resource_id,
            to,
            reason,
            actor,
            at: now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
            "entity" => ReservationStatus::ENTITY, "outcome" => "applied")
        .increment(1);
        tracing::debug!("reservation {id}: {current} -> {to}");

        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn confirm(&self, id: Ulid, actor: Option<String>) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Confirmed, None, actor)
            .await
    }

    pub async fn complete(&self, id: Ulid, actor: Option<String>) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Completed, None, actor)
            .await
    }

    pub async fn cancel(
        &self,
        id: Ulid,
        reason: impl Into<String>,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Cancelled, Some(reason.into()), actor)
            .await
    }

    /// Record the payment collaborator's verdict. A failed payment leaves the
    /// reservation status alone.
    pub async fn update_payment(
        &self,
        id: Ulid,
        to: PaymentStatus,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .payment_status;
        current.check_transition(to)?;

        let event = Event::PaymentUpdated {
            id,
            resource_id,
            to,
            actor,
            at: now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
            "entity" => PaymentStatus::ENTITY, "outcome" => "applied")
        .increment(1);

        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }
}
