use tracing::{error, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;

use super::{Engine, EngineError};

fn record(outcome: &'static str) {
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    /// Create (no `reservation_id`) or move an active reservation to a new
    /// window. Never fails: every problem comes back in `Placement::errors`
    /// together with the attempted window.
    pub async fn place_reservation(&self, request: PlacementRequest) -> Placement {
        let PlacementRequest {
            user_identification,
            starts,
            ends,
            reservation_id,
        } = request;

        let decision = self.check_availability(starts, ends, reservation_id).await;
        if !decision.is_available {
            record("rejected");
            return Placement::rejected(decision.window, decision.errors);
        }
        let window = decision.window;
        let now = self.now();

        let (reservation, outcome) = match reservation_id {
            None => (
                Reservation::new(Ulid::new(), user_identification, window, now),
                "created",
            ),
            Some(id) => match self.reservations.get(id).await {
                Ok(Some(mut existing)) if existing.active => {
                    existing.reschedule(window, now);
                    (existing, "updated")
                }
                Ok(_) => {
                    record("rejected");
                    return Placement::rejected(window, vec![Problem::ReservationIsUnavailable]);
                }
                Err(e) => {
                    error!("loading reservation {id} for edit: {e}");
                    record("failed");
                    return Placement::rejected(window, vec![Problem::InternalProblem]);
                }
            },
        };

        if let Err(e) = self.reservations.put(&reservation).await {
            error!("persisting reservation {}: {e}", reservation.id);
            record("failed");
            return Placement::rejected(window, vec![Problem::InternalProblem]);
        }

        info!(
            "reservation {} {outcome}: {} .. {}",
            reservation.id, window.starts, window.ends
        );
        record(outcome);
        Placement::accepted(reservation.id, window)
    }

    /// Soft-delete. Cancelling a cancelled reservation succeeds without a write.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Cancellation, EngineError> {
        let mut reservation = self
            .reservations
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;

        if !reservation.cancel(self.now()) {
            return Ok(Cancellation::AlreadyCancelled);
        }
        self.reservations.put(&reservation).await?;

        info!("reservation {id} cancelled");
        record("cancelled");
        Ok(Cancellation::Cancelled)
    }
}
