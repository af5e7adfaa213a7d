use ulid::Ulid;

use crate::limits::MAX_BETWEEN_WINDOW_DAYS;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        Ok(self.reservations.get(id).await?)
    }

    /// Reservations with `starts` or `ends` inside `[starts, ends]`, in the
    /// given state, deduplicated.
    pub async fn reservations_between(
        &self,
        starts: Timestamp,
        ends: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        if (ends - starts).num_days() > MAX_BETWEEN_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("reservation query window too wide"));
        }
        self.merge_overlapping(starts, ends, active).await
    }

    pub async fn configuration(&self) -> Result<Option<BookingPolicy>, EngineError> {
        Ok(self.configuration.configuration().await?)
    }
}
