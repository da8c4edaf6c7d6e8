use crate::limits::*;
use crate::model::*;

use super::availability::available_quantity;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidWindow {
            start: window.start,
            end: window.end,
        });
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_quantity(rs: &ResourceState, quantity: u32) -> Result<(), EngineError> {
    let max = match rs.kind {
        ResourceKind::Slot => 1,
        ResourceKind::Equipment => rs.capacity,
    };
    if quantity == 0 || quantity > max {
        return Err(EngineError::InvalidQuantity {
            requested: quantity,
            capacity: rs.capacity,
        });
    }
    Ok(())
}

pub(crate) fn validate_capacity(kind: ResourceKind, capacity: u32) -> Result<(), EngineError> {
    match kind {
        ResourceKind::Slot if capacity != 1 => Err(EngineError::InvalidCapacity(capacity)),
        _ if capacity == 0 => Err(EngineError::InvalidCapacity(capacity)),
        _ if capacity > MAX_CAPACITY => Err(EngineError::LimitExceeded("capacity too large")),
        _ => Ok(()),
    }
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_opt_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    value.map_or(Ok(()), |v| validate_text(v, max, what))
}

/// Admission check. Caller must hold the resource's write lock so the answer
/// is still true when the reservation is committed.
pub(crate) fn check_available(rs: &ResourceState, window: &Span, quantity: u32) -> Result<(), EngineError> {
    let available = available_quantity(rs, window);
    if available < quantity {
        return Err(EngineError::ResourceUnavailable {
            resource_id: rs.id,
            requested: quantity,
            available,
        });
    }
    Ok(())
}
