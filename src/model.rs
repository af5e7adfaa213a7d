use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// UTC instant. The only time type stored or compared.
pub type Timestamp = DateTime<Utc>;

/// Closed window `[starts, ends]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub starts: Timestamp,
    pub ends: Timestamp,
}

impl Window {
    /// No ordering check here: `ends >= starts` is a checker concern, not a type invariant.
    pub fn new(starts: Timestamp, ends: Timestamp) -> Self {
        Self { starts, ends }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.starts.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.ends.date_naive()
    }

    /// Calendar days between the start and end dates.
    pub fn stay_days(&self) -> i64 {
        (self.end_date() - self.start_date()).num_days()
    }
}

/// A booked time slot. Never physically removed; cancellation flips `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_identification: Option<String>,
    pub starts: Timestamp,
    pub ends: Timestamp,
    pub active: bool,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl Reservation {
    pub fn new(id: Ulid, user_identification: Option<String>, window: Window, now: Timestamp) -> Self {
        Self {
            id,
            user_identification,
            starts: window.starts,
            ends: window.ends,
            active: true,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn window(&self) -> Window {
        Window::new(self.starts, self.ends)
    }

    /// Move the reservation to a new window. Identity, owner and state are untouched.
    pub fn reschedule(&mut self, window: Window, now: Timestamp) {
        self.starts = window.starts;
        self.ends = window.ends;
        self.modified_at = now;
    }

    /// Soft-delete. Returns `false` (and changes nothing) if already cancelled.
    pub fn cancel(&mut self, now: Timestamp) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.modified_at = now;
        true
    }
}

/// The single process-wide booking policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Time of day every reservation starts at.
    pub day_window_start: NaiveTime,
    /// Time of day every reservation ends at.
    pub day_window_end: NaiveTime,
    /// Stays of this many days or more are rejected.
    pub max_stay_days: i64,
    /// End dates this many days or more ahead of today are rejected.
    pub max_advance_days: i64,
}

impl BookingPolicy {
    /// Replace requested times of day with the configured day-window bounds.
    pub fn normalize(&self, requested: &Window) -> Window {
        Window::new(
            requested.start_date().and_time(self.day_window_start).and_utc(),
            requested.end_date().and_time(self.day_window_end).and_utc(),
        )
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Upsert of the full reservation record, keyed by id.
    Put { reservation: Reservation },
}

impl Event {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            Event::Put { reservation } => reservation.id,
        }
    }
}

// ── Validation outcomes ──────────────────────────────────────────

/// Why a window cannot be booked. Returned as data, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    EndBeforeStart,
    StartInPast,
    StartIsToday,
    MaximumEndReservationDays(i64),
    MaximumReservationDays(i64),
    DatesAreUnavailable,
    ReservationIsUnavailable,
    InternalProblem,
}

impl Problem {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Problem::EndBeforeStart => "end_before_start",
            Problem::StartInPast => "start_in_past",
            Problem::StartIsToday => "start_is_today",
            Problem::MaximumEndReservationDays(_) => "maximum_end_reservation_days",
            Problem::MaximumReservationDays(_) => "maximum_reservation_days",
            Problem::DatesAreUnavailable => "dates_are_unavailable",
            Problem::ReservationIsUnavailable => "reservation_is_unavailable",
            Problem::InternalProblem => "internal_problem",
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Problem::EndBeforeStart => write!(f, "End date is greater than start date"),
            Problem::StartInPast => write!(f, "Start date is on the past"),
            Problem::StartIsToday => write!(f, "Today is not possible to start"),
            Problem::MaximumEndReservationDays(days) => {
                write!(f, "Can't be reserved more than {days} days in advance.")
            }
            Problem::MaximumReservationDays(days) => {
                write!(f, "The stay can't be longer than {days} days")
            }
            Problem::DatesAreUnavailable => write!(f, "Dates are unavailable"),
            Problem::ReservationIsUnavailable => write!(f, "Reservation is unavailable"),
            Problem::InternalProblem => write!(f, "Internal problem"),
        }
    }
}

/// Accept/reject verdict for a requested window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityDecision {
    pub is_available: bool,
    /// Normalized to the policy day window once a policy was loaded;
    /// otherwise the requested window echoed back.
    pub window: Window,
    /// Detection order, no duplicates.
    pub errors: Vec<Problem>,
}

/// Create (no `reservation_id`) or edit (with one) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub user_identification: Option<String>,
    pub starts: Timestamp,
    pub ends: Timestamp,
    pub reservation_id: Option<Ulid>,
}

/// Result of a create/edit. Carries the attempted window even on rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub id: Option<Ulid>,
    pub window: Window,
    pub errors: Vec<Problem>,
}

impl Placement {
    pub fn accepted(id: Ulid, window: Window) -> Self {
        Self {
            id: Some(id),
            window,
            errors: Vec::new(),
        }
    }

    pub fn rejected(window: Window, errors: Vec<Problem>) -> Self {
        Self {
            id: None,
            window,
            errors,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.id.is_some() && self.errors.is_empty()
    }
}

/// Successful cancel outcomes. An unknown id is an error, not a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    Cancelled,
    AlreadyCancelled,
}
