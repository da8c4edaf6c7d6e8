mod availability;
mod bulk;
mod compaction;
mod complaints;
mod conflict;
mod error;
mod mutations;
mod queries;
mod refunds;
#[cfg(test)]
mod tests;

pub use availability::{available_quantity, free_windows, peak_usage};
pub use bulk::{BulkFailure, BulkReport};
pub(crate) use conflict::now_ms;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::lifecycle::{PaymentStatus, ReservationStatus};
use crate::model::*;
use crate::notify::{NotifyHub, Topic};
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedRefund = Arc<Mutex<RefundRequest>>;
pub type SharedComplaint = Arc<Mutex<Complaint>>;

/// Scheduling policy supplied by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// New reservations start `Confirmed` instead of `Pending`.
    pub auto_confirm: bool,
}

// ── Group-commit WAL channel ─────────────────────────────

type AppendBatch = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// pays for a single fsync and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: AppendBatch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before compaction/inspection sees the file.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: AppendBatch) {
    let (events, responders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
    let flush_start = std::time::Instant::now();
    // All or nothing: a failed batch is cut back off the log before anyone hears about it.
    let result = wal.append_batch(&events);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", events.len());
    }
    for tx in responders {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: ReservationPolicy,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Issued reservation codes → reservation id.
    pub(super) codes: DashMap<String, Ulid>,
    pub(super) refunds: DashMap<Ulid, SharedRefund>,
    /// Reservation id → its single refund request.
    pub(super) refund_by_reservation: DashMap<Ulid, Ulid>,
    pub(super) complaints: DashMap<Ulid, SharedComplaint>,
    /// Mutations hold this shared; compaction holds it exclusively.
    pub(super) compaction_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, policy: ReservationPolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            policy,
            reservation_to_resource: DashMap::new(),
            codes: DashMap::new(),
            refunds: DashMap::new(),
            refund_by_reservation: DashMap::new(),
            complaints: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // We're the sole owner of every lock here, so try_* always succeeds.
        // Never use blocking_*: this may run inside an async context.
        let replayed = events.len();
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {replayed} events: {} resources, {} reservations, {} refunds, {} complaints",
            engine.state.len(),
            engine.reservation_to_resource.len(),
            engine.refunds.len(),
            engine.complaints.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceRegistered { id, kind, capacity, name } => {
                let rs = ResourceState::new(*id, *kind, name.clone(), *capacity);
                self.state.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::RefundRequested { .. } | Event::RefundRestored(_) => {
                self.replay_on_resource(event);
                self.insert_refund(event);
            }
            Event::RefundTransitioned { id, .. } => {
                if let Some(refund) = self.refunds.get(id).map(|e| e.value().clone())
                    && let Ok(mut guard) = refund.try_lock()
                {
                    apply_to_refund(&mut guard, event);
                }
            }
            Event::ComplaintOpened { .. } | Event::ComplaintRestored(_) => self.insert_complaint(event),
            Event::ComplaintTransitioned { id, .. } | Event::ComplaintAssigned { id, .. } => {
                if let Some(complaint) = self.complaints.get(id).map(|e| e.value().clone())
                    && let Ok(mut guard) = complaint.try_lock()
                {
                    apply_to_complaint(&mut guard, event);
                }
            }
            _ => self.replay_on_resource(event),
        }
    }

    fn replay_on_resource(&self, event: &Event) {
        let Some(resource_id) = event_resource_id(event) else { return };
        let Some(rs) = self.get_resource(&resource_id) else {
            tracing::warn!("replay: event for unknown resource {resource_id} skipped");
            return;
        };
        if let Ok(mut guard) = rs.try_write() {
            self.apply_to_resource(&mut guard, event);
        }
    }

    /// Apply an event directly to a ResourceState (caller holds the lock).
    pub(super) fn apply_to_resource(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceUpdated { capacity, name, .. } => {
                rs.capacity = *capacity;
                rs.name = name.clone();
            }
            Event::ReservationCreated {
                id,
                code,
                resource_id,
                window,
                quantity,
                status,
                customer_ref,
                amount,
                actor,
                at,
            } => {
                let mut timeline = vec![TimelineEntry::new(*at, "created", actor.clone(), None)];
                if *status == ReservationStatus::Confirmed {
                    timeline.push(TimelineEntry::new(
                        *at,
                        ReservationStatus::Confirmed.to_string(),
                        actor.clone(),
                        Some("auto-confirmed".into()),
                    ));
                }
                rs.insert_reservation(Reservation {
                    id: *id,
                    code: code.clone(),
                    resource_id: *resource_id,
                    window: *window,
                    quantity: *quantity,
                    status: *status,
                    payment_status: PaymentStatus::Pending,
                    customer_ref: customer_ref.clone(),
                    amount: *amount,
                    created_at: *at,
                    timeline,
                });
                self.reservation_to_resource.insert(*id, *resource_id);
                self.codes.insert(code.clone(), *id);
            }
            Event::ReservationTransitioned { id, to, reason, actor, at, .. } => {
                if let Some(r) = rs.reservation_mut(id) {
                    r.status = *to;
                    r.timeline
                        .push(TimelineEntry::new(*at, to.to_string(), actor.clone(), reason.clone()));
                }
            }
            Event::PaymentUpdated { id, to, actor, at, .. } => {
                if let Some(r) = rs.reservation_mut(id) {
                    r.payment_status = *to;
                    r.timeline
                        .push(TimelineEntry::new(*at, format!("payment_{to}"), actor.clone(), None));
                }
            }
            Event::RefundRequested {
                id,
                reservation_id,
                amount,
                actor,
                at,
                ..
            } => {
                if let Some(r) = rs.reservation_mut(reservation_id) {
                    r.timeline.push(TimelineEntry::new(
                        *at,
                        "refund_requested",
                        actor.clone(),
                        Some(format!("refund {id} for {amount}")),
                    ));
                }
            }
            Event::ReservationRestored(reservation) => {
                self.reservation_to_resource
                    .insert(reservation.id, reservation.resource_id);
                self.codes.insert(reservation.code.clone(), reservation.id);
                rs.insert_reservation(reservation.clone());
            }
            // Handled at the engine level, not per resource.
            Event::ResourceRegistered { .. }
            | Event::RefundTransitioned { .. }
            | Event::RefundRestored(_)
            | Event::ComplaintOpened { .. }
            | Event::ComplaintTransitioned { .. }
            | Event::ComplaintAssigned { .. }
            | Event::ComplaintRestored(_) => {}
        }
    }

    /// Replay-time creation of refund records.
    fn insert_refund(&self, event: &Event) {
        if let Some(refund) = refunds::refund_from_event(event) {
            self.refund_by_reservation.insert(refund.reservation_id, refund.id);
            self.refunds.insert(refund.id, Arc::new(Mutex::new(refund)));
        }
    }

    /// Replay-time creation of complaint records.
    fn insert_complaint(&self, event: &Event) {
        if let Some(complaint) = complaints::complaint_from_event(event) {
            self.complaints.insert(complaint.id, Arc::new(Mutex::new(complaint)));
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_resource
            .get(reservation_id)
            .map(|e| *e.value())
    }

    pub fn policy(&self) -> ReservationPolicy {
        self.policy
    }

    /// WAL-append + apply + notify, with the resource's write lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_resource(rs, event);
        self.notify.send(Topic::Resource(resource_id), event);
        Ok(())
    }

    /// Lookup reservation → resource, get resource, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .resource_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}

pub(super) fn apply_to_refund(refund: &mut RefundRequest, event: &Event) {
    if let Event::RefundTransitioned {
        to,
        approved_amount,
        transaction_ref,
        notes,
        actor,
        at,
        ..
    } = event
    {
        refund.status = *to;
        if approved_amount.is_some() {
            refund.approved_amount = *approved_amount;
        }
        if transaction_ref.is_some() {
            refund.transaction_ref = transaction_ref.clone();
        }
        if notes.is_some() {
            refund.admin_notes = notes.clone();
        }
        refund
            .timeline
            .push(TimelineEntry::new(*at, to.to_string(), actor.clone(), notes.clone()));
    }
}

pub(super) fn apply_to_complaint(complaint: &mut Complaint, event: &Event) {
    match event {
        Event::ComplaintTransitioned { to, detail, actor, at, .. } => {
            complaint.status = *to;
            complaint
                .timeline
                .push(TimelineEntry::new(*at, to.to_string(), actor.clone(), detail.clone()));
        }
        Event::ComplaintAssigned { assignee, actor, at, .. } => {
            complaint.assigned_to = Some(assignee.clone());
            complaint.timeline.push(TimelineEntry::new(
                *at,
                "assigned",
                actor.clone(),
                Some(assignee.clone()),
            ));
        }
        _ => {}
    }
}

/// Extract the resource id from an event that lives on a resource.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceUpdated { id, .. } => Some(*id),
        Event::ReservationCreated { resource_id, .. }
        | Event::ReservationTransitioned { resource_id, .. }
        | Event::PaymentUpdated { resource_id, .. }
        | Event::RefundRequested { resource_id, .. } => Some(*resource_id),
        Event::ReservationRestored(r) => Some(r.resource_id),
        Event::ResourceRegistered { .. }
        | Event::RefundTransitioned { .. }
        | Event::RefundRestored(_)
        | Event::ComplaintOpened { .. }
        | Event::ComplaintTransitioned { .. }
        | Event::ComplaintAssigned { .. }
        | Event::ComplaintRestored(_) => None,
    }
}
