use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::lifecycle::{ComplaintStatus, Lifecycle};
use crate::limits::*;
use crate::model::*;
use crate::notify::Topic;

use super::conflict::{now_ms, validate_opt_text, validate_text};
use super::{apply_to_complaint, Engine, EngineError, SharedComplaint};

pub(super) fn complaint_from_event(event: &Event) -> Option<Complaint> {
    match event {
        Event::ComplaintOpened {
            id,
            subject_ref,
            priority,
            detail,
            actor,
            at,
        } => Some(Complaint {
            id: *id,
            subject_ref: subject_ref.clone(),
            status: ComplaintStatus::Pending,
            assigned_to: None,
            priority: *priority,
            created_at: *at,
            timeline: vec![TimelineEntry::new(*at, "opened", actor.clone(), detail.clone())],
        }),
        Event::ComplaintRestored(complaint) => Some(complaint.clone()),
        _ => None,
    }
}

impl Engine {
    pub async fn open_complaint(
        &self,
        id: Ulid,
        subject_ref: String,
        priority: Priority,
        detail: Option<String>,
        actor: Option<String>,
    ) -> Result<Complaint, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_text(&subject_ref, MAX_SUBJECT_REF_LEN, "subject ref too long")?;
        validate_opt_text(detail.as_deref(), MAX_NOTES_LEN, "detail too long")?;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;

        let event = Event::ComplaintOpened {
            id,
            subject_ref,
            priority,
            detail,
            actor,
            at: now_ms(),
        };
        let complaint = complaint_from_event(&event).ok_or(EngineError::NotFound(id))?;
        let shared = Arc::new(Mutex::new(complaint.clone()));
        let guard = shared
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::AlreadyExists(id))?;
        match self.complaints.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.complaints.remove(&id);
            return Err(e);
        }
        drop(guard);
        self.notify.send(Topic::Complaints, &event);
        Ok(complaint)
    }

    /// Move a complaint along its status graph, recording actor and detail.
    pub async fn transition_complaint(
        &self,
        id: Ulid,
        to: ComplaintStatus,
        detail: Option<String>,
        actor: Option<String>,
    ) -> Result<Complaint, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_opt_text(detail.as_deref(), MAX_NOTES_LEN, "detail too long")?;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let shared = self.shared_complaint(&id)?;
        let mut complaint = shared.lock().await;
        if let Err(e) = complaint.status.check_transition(to) {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
                "entity" => ComplaintStatus::ENTITY, "outcome" => "rejected")
            .increment(1);
            return Err(e);
        }

        let event = Event::ComplaintTransitioned {
            id,
            to,
            detail,
            actor,
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_complaint(&mut complaint, &event);
        self.notify.send(Topic::Complaints, &event);
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL,
            "entity" => ComplaintStatus::ENTITY, "outcome" => "applied")
        .increment(1);
        if to == ComplaintStatus::Escalated {
            tracing::warn!("complaint {id} escalated (priority {})", complaint.priority.label());
        }
        Ok(complaint.clone())
    }

    pub async fn escalate_complaint(
        &self,
        id: Ulid,
        detail: Option<String>,
        actor: Option<String>,
    ) -> Result<Complaint, EngineError> {
        self.transition_complaint(id, ComplaintStatus::Escalated, detail, actor)
            .await
    }

    /// Hand a complaint to someone. Status is unchanged; closed complaints
    /// cannot be reassigned.
    pub async fn assign_complaint(
        &self,
        id: Ulid,
        assignee: String,
        actor: Option<String>,
    ) -> Result<Complaint, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_text(&assignee, MAX_ACTOR_LEN, "assignee too long")?;
        validate_opt_text(actor.as_deref(), MAX_ACTOR_LEN, "actor too long")?;
        let shared = self.shared_complaint(&id)?;
        let mut complaint = shared.lock().await;
        if complaint.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                entity: ComplaintStatus::ENTITY,
                from: complaint.status.label(),
                to: "assigned",
            });
        }

        let event = Event::ComplaintAssigned {
            id,
            assignee,
            actor,
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_complaint(&mut complaint, &event);
        self.notify.send(Topic::Complaints, &event);
        Ok(complaint.clone())
    }

    fn shared_complaint(&self, id: &Ulid) -> Result<SharedComplaint, EngineError> {
        self.complaints
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }
}
