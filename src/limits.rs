/// Longest accepted owner reference on a new reservation.
pub const MAX_USER_IDENTIFICATION_LEN: usize = 256;

/// Widest window accepted by a reservations-between query.
pub const MAX_BETWEEN_WINDOW_DAYS: i64 = 366;

/// Parsed instants must fall inside these calendar years.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;

/// Pending WAL commands before `put` callers start waiting on the writer.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
