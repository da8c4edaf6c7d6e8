//! Hard caps applied at the engine boundary. Anything past these is rejected
//! with `EngineError::LimitExceeded` before touching state or the WAL.

use crate::model::Ms;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 50_000;
pub const MAX_CAPACITY: u32 = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_REF_LEN: usize = 256;
pub const MAX_SUBJECT_REF_LEN: usize = 256;
pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_TRANSACTION_REF_LEN: usize = 256;

/// Bulk transitions larger than this are refused outright.
pub const MAX_BULK_SIZE: usize = 1_000;

/// Attempts at drawing an unused reservation code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 16;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not exceed one year.
pub const MAX_WINDOW_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Availability queries may not exceed two years.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 24 * 3_600_000;
