use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::{ComplaintStatus, PaymentStatus, RefundStatus, ReservationStatus};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `other`, if non-empty.
    pub fn clamp_to(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A studio time slot. Capacity is always 1.
    Slot,
    /// Unit-counted rental equipment.
    Equipment,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Slot => "slot",
            ResourceKind::Equipment => "equipment",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slot" | "studio" => Some(ResourceKind::Slot),
            "equipment" => Some(ResourceKind::Equipment),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// One line of an entity's history. Timelines are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: Ms,
    pub event: String,
    pub actor: Option<String>,
    pub detail: Option<String>,
}

impl TimelineEntry {
    pub fn new(at: Ms, event: impl Into<String>, actor: Option<String>, detail: Option<String>) -> Self {
        Self {
            at,
            event: event.into(),
            actor,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Human-presentable reference, e.g. `R20261015-4KQ2ZD`.
    pub code: String,
    pub resource_id: Ulid,
    pub window: Span,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub customer_ref: String,
    /// Price in minor currency units. Bounds refund requests.
    pub amount: u64,
    pub created_at: Ms,
    pub timeline: Vec<TimelineEntry>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.holds_capacity()
    }

    /// Derived, never stored: the window has ended but the reservation never
    /// reached a terminal status. Only equipment rentals can be overdue.
    pub fn is_overdue(&self, kind: ResourceKind, now: Ms) -> bool {
        kind == ResourceKind::Equipment
            && self.window.end < now
            && !matches!(self.status, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }
}

/// Caller-supplied details for a new reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerInfo {
    pub customer_ref: String,
    pub amount: u64,
}

impl CustomerInfo {
    pub fn new(customer_ref: impl Into<String>, amount: u64) -> Self {
        Self {
            customer_ref: customer_ref.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub requested_amount: u64,
    pub approved_amount: Option<u64>,
    pub status: RefundStatus,
    pub admin_notes: Option<String>,
    /// Opaque reference from the payment collaborator, set on completion.
    pub transaction_ref: Option<String>,
    pub created_at: Ms,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: Ulid,
    pub subject_ref: String,
    pub status: ComplaintStatus,
    pub assigned_to: Option<String>,
    pub priority: Priority,
    pub created_at: Ms,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub name: Option<String>,
    /// Max concurrently-active quantity.
    pub capacity: u32,
    /// Every reservation ever made on this resource, sorted by `window.start`.
    /// Cancelled and completed ones stay for history.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(id: Ulid, kind: ResourceKind, name: Option<String>, capacity: u32) -> Self {
        Self {
            id,
            kind,
            name,
            capacity,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by window.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.window.start <= reservation.window.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose window overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.window.end > query.start)
    }

    /// Overlapping reservations that still hold capacity.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.is_active())
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        kind: ResourceKind,
        capacity: u32,
        name: Option<String>,
    },
    ResourceUpdated {
        id: Ulid,
        capacity: u32,
        name: Option<String>,
    },
    ReservationCreated {
        id: Ulid,
        code: String,
        resource_id: Ulid,
        window: Span,
        quantity: u32,
        status: ReservationStatus,
        customer_ref: String,
        amount: u64,
        actor: Option<String>,
        at: Ms,
    },
    ReservationTransitioned {
        id: Ulid,
        resource_id: Ulid,
        to: ReservationStatus,
        reason: Option<String>,
        actor: Option<String>,
        at: Ms,
    },
    PaymentUpdated {
        id: Ulid,
        resource_id: Ulid,
        to: PaymentStatus,
        actor: Option<String>,
        at: Ms,
    },
    RefundRequested {
        id: Ulid,
        reservation_id: Ulid,
        resource_id: Ulid,
        amount: u64,
        actor: Option<String>,
        at: Ms,
    },
    RefundTransitioned {
        id: Ulid,
        to: RefundStatus,
        approved_amount: Option<u64>,
        transaction_ref: Option<String>,
        notes: Option<String>,
        actor: Option<String>,
        at: Ms,
    },
    ComplaintOpened {
        id: Ulid,
        subject_ref: String,
        priority: Priority,
        detail: Option<String>,
        actor: Option<String>,
        at: Ms,
    },
    ComplaintTransitioned {
        id: Ulid,
        to: ComplaintStatus,
        detail: Option<String>,
        actor: Option<String>,
        at: Ms,
    },
    ComplaintAssigned {
        id: Ulid,
        assignee: String,
        actor: Option<String>,
        at: Ms,
    },
    /// Compaction output: a reservation with its full history.
    ReservationRestored(Reservation),
    RefundRestored(RefundRequest),
    ComplaintRestored(Complaint),
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub name: Option<String>,
    pub capacity: u32,
}

/// A reservation as seen by readers, with the derived overdue flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub reservation: Reservation,
    pub kind: ResourceKind,
    pub overdue: bool,
}

/// A maximal sub-window over which free capacity is constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeWindow {
    pub span: Span,
    pub free: u32,
}
