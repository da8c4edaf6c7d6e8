//! Status workflows. Each enum owns a static adjacency table; a transition is
//! legal only if the target appears in the current status' successor list.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

pub trait Lifecycle: Copy + Eq + fmt::Debug + Sized + 'static {
    /// Entity name used in `InvalidTransition` errors.
    const ENTITY: &'static str;
    const ALL: &'static [Self];

    fn successors(self) -> &'static [Self];
    fn label(self) -> &'static str;

    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    fn check_transition(self, next: Self) -> Result<(), EngineError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.label(),
                to: next.label(),
            })
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.label().eq_ignore_ascii_case(s))
    }
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Pending and Confirmed reservations hold capacity; nothing else does.
    pub fn holds_capacity(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

impl Lifecycle for ReservationStatus {
    const ENTITY: &'static str = "reservation";
    const ALL: &'static [Self] = &[
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ];

    fn successors(self) -> &'static [Self] {
        use ReservationStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    fn label(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

// ── Payment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl Lifecycle for PaymentStatus {
    const ENTITY: &'static str = "payment";
    const ALL: &'static [Self] = &[PaymentStatus::Pending, PaymentStatus::Paid, PaymentStatus::Failed];

    fn successors(self) -> &'static [Self] {
        match self {
            PaymentStatus::Pending => &[PaymentStatus::Paid, PaymentStatus::Failed],
            PaymentStatus::Paid | PaymentStatus::Failed => &[],
        }
    }

    fn label(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

// ── Refund ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundStatus {
    Requested,
    Approved,
    Rejected,
    Completed,
}

impl Lifecycle for RefundStatus {
    const ENTITY: &'static str = "refund";
    const ALL: &'static [Self] = &[
        RefundStatus::Requested,
        RefundStatus::Approved,
        RefundStatus::Rejected,
        RefundStatus::Completed,
    ];

    fn successors(self) -> &'static [Self] {
        use RefundStatus::*;
        match self {
            Requested => &[Approved, Rejected],
            Approved => &[Completed],
            Rejected | Completed => &[],
        }
    }

    fn label(self) -> &'static str {
        match self {
            RefundStatus::Requested => "requested",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Completed => "completed",
        }
    }
}

// ── Complaint ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Escalated,
    Resolved,
    Closed,
}

impl Lifecycle for ComplaintStatus {
    const ENTITY: &'static str = "complaint";
    const ALL: &'static [Self] = &[
        ComplaintStatus::Pending,
        ComplaintStatus::InProgress,
        ComplaintStatus::Escalated,
        ComplaintStatus::Resolved,
        ComplaintStatus::Closed,
    ];

    fn successors(self) -> &'static [Self] {
        use ComplaintStatus::*;
        match self {
            Pending => &[InProgress, Escalated],
            InProgress => &[Resolved, Closed, Escalated],
            Escalated => &[InProgress, Resolved, Closed],
            Resolved | Closed => &[],
        }
    }

    fn label(self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Escalated => "escalated",
            ComplaintStatus::Resolved => "resolved",
            ComplaintStatus::Closed => "closed",
        }
    }
}

macro_rules! display_by_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_by_label!(ReservationStatus, PaymentStatus, RefundStatus, ComplaintStatus);
