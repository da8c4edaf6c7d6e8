use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{available_quantity, free_windows};
use super::conflict::{now_ms, validate_window};
use super::{Engine, EngineError};

impl Engine {
    pub async fn resource_info(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ResourceInfo {
            id: guard.id,
            kind: guard.kind,
            name: guard.name.clone(),
            capacity: guard.capacity,
        })
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for rs in shared {
            let guard = rs.read().await;
            out.push(ResourceInfo {
                id: guard.id,
                kind: guard.kind,
                name: guard.name.clone(),
                capacity: guard.capacity,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Units of `resource_id` still free for the whole of `window`.
    pub async fn available_quantity(&self, resource_id: Ulid, window: Span) -> Result<u32, EngineError> {
        validate_window(&window)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(available_quantity(&guard, &window))
    }

    /// Free capacity over `range`, split where it changes.
    pub async fn availability(&self, resource_id: Ulid, range: Span) -> Result<Vec<FreeWindow>, EngineError> {
        validate_window(&range)?;
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &range))
    }

    pub async fn reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        let resource_id = self
            .resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let reservation = guard.reservation(&id).ok_or(EngineError::NotFound(id))?;
        let now = now_ms();
        Ok(ReservationInfo {
            overdue: reservation.is_overdue(guard.kind, now),
            kind: guard.kind,
            reservation: reservation.clone(),
        })
    }

    pub async fn reservation_by_code(&self, code: &str) -> Result<ReservationInfo, EngineError> {
        let id = self
            .codes
            .get(code)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))?;
        self.reservation(id).await
    }

    /// Every reservation on a resource, in window order, including history.
    pub async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<ReservationInfo>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let now = now_ms();
        Ok(guard
            .reservations
            .iter()
            .map(|r| ReservationInfo {
                overdue: r.is_overdue(guard.kind, now),
                kind: guard.kind,
                reservation: r.clone(),
            })
            .collect())
    }

    /// Equipment reservations past their end that never reached a terminal status.
    pub async fn overdue_reservations(&self, now: Ms) -> Vec<ReservationInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut overdue = Vec::new();
        for rs in shared {
            let guard = rs.read().await;
            if guard.kind != ResourceKind::Equipment {
                continue;
            }
            overdue.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.is_overdue(guard.kind, now))
                    .map(|r| ReservationInfo {
                        overdue: true,
                        kind: guard.kind,
                        reservation: r.clone(),
                    }),
            );
        }
        overdue.sort_by_key(|info| (info.reservation.window.end, info.reservation.id));
        overdue
    }

    pub async fn refund(&self, id: Ulid) -> Result<RefundRequest, EngineError> {
        let shared = self
            .refunds
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let refund = shared.lock().await;
        Ok(refund.clone())
    }

    pub async fn refund_for_reservation(&self, reservation_id: Ulid) -> Result<RefundRequest, EngineError> {
        let id = self
            .refund_by_reservation
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(reservation_id))?;
        self.refund(id).await
    }

    pub async fn complaint(&self, id: Ulid) -> Result<Complaint, EngineError> {
        let shared = self
            .complaints
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let complaint = shared.lock().await;
        Ok(complaint.clone())
    }
}
