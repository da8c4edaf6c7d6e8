use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    CodeNotFound(String),
    AlreadyExists(Ulid),
    /// Window end is not after its start.
    InvalidWindow {
        start: i64,
        end: i64,
    },
    InvalidQuantity {
        requested: u32,
        capacity: u32,
    },
    InvalidCapacity(u32),
    /// Not enough free capacity at commit time.
    ResourceUnavailable {
        resource_id: Ulid,
        requested: u32,
        available: u32,
    },
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    ReasonRequired,
    TransactionRefRequired,
    AmountExceeded {
        amount: u64,
        limit: u64,
    },
    InvalidAmount(u64),
    RefundExists(Ulid),
    /// Cancelled reservations cannot carry a refund request.
    NotRefundable(Ulid),
    CapacityBelowUsage {
        capacity: u32,
        peak: u32,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable kind, used in bulk reports and SQLSTATE mapping.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::CodeNotFound(_) => "NotFound",
            EngineError::AlreadyExists(_) => "AlreadyExists",
            EngineError::InvalidWindow { .. } => "InvalidWindow",
            EngineError::InvalidQuantity { .. } => "InvalidQuantity",
            EngineError::InvalidCapacity(_) => "InvalidCapacity",
            EngineError::ResourceUnavailable { .. } => "ResourceUnavailable",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::ReasonRequired => "ReasonRequired",
            EngineError::TransactionRefRequired => "TransactionRefRequired",
            EngineError::AmountExceeded { .. } => "AmountExceeded",
            EngineError::InvalidAmount(_) => "InvalidAmount",
            EngineError::RefundExists(_) => "RefundExists",
            EngineError::NotRefundable(_) => "NotRefundable",
            EngineError::CapacityBelowUsage { .. } => "CapacityBelowUsage",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::WalError(_) => "WalError",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::CodeNotFound(code) => write!(f, "no reservation with code {code}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidWindow { start, end } => {
                write!(f, "invalid window [{start}, {end}): end must be after start")
            }
            EngineError::InvalidQuantity { requested, capacity } => {
                write!(f, "invalid quantity {requested} for resource of capacity {capacity}")
            }
            EngineError::InvalidCapacity(cap) => write!(f, "invalid capacity: {cap}"),
            EngineError::ResourceUnavailable {
                resource_id,
                requested,
                available,
            } => write!(
                f,
                "resource {resource_id} unavailable: requested {requested}, available {available}"
            ),
            EngineError::InvalidTransition { entity, from, to } => {
                write!(f, "invalid {entity} transition: {from} -> {to}")
            }
            EngineError::ReasonRequired => write!(f, "cancellation requires a reason"),
            EngineError::TransactionRefRequired => {
                write!(f, "refund completion requires a transaction reference")
            }
            EngineError::AmountExceeded { amount, limit } => {
                write!(f, "amount {amount} exceeds limit {limit}")
            }
            EngineError::InvalidAmount(amount) => write!(f, "invalid amount: {amount}"),
            EngineError::RefundExists(id) => write!(f, "reservation {id} already has a refund request"),
            EngineError::NotRefundable(id) => write!(f, "reservation {id} is cancelled and cannot be refunded"),
            EngineError::CapacityBelowUsage { capacity, peak } => {
                write!(f, "capacity {capacity} is below committed peak usage {peak}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
