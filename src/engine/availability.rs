use chrono::NaiveDate;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::AVAILABILITY_CHECKS_TOTAL;

use super::{Engine, EngineError};

// ── Pure rules ───────────────────────────────────────────────────

/// Checks that need nothing but the requested dates and today.
pub(super) fn input_problems(requested: &Window, today: NaiveDate) -> Vec<Problem> {
    let mut problems = Vec::new();
    let start = requested.start_date();
    if requested.end_date() < start {
        problems.push(Problem::EndBeforeStart);
    }
    if start < today {
        problems.push(Problem::StartInPast);
    }
    if start == today {
        problems.push(Problem::StartIsToday);
    }
    problems
}

/// Advance and stay limits. Both are on calendar days and reject at the limit.
pub(super) fn policy_problems(window: &Window, policy: &BookingPolicy, today: NaiveDate) -> Vec<Problem> {
    let mut problems = Vec::new();
    let days_to_end = (window.end_date() - today).num_days();
    if days_to_end > 0 && days_to_end >= policy.max_advance_days {
        problems.push(Problem::MaximumEndReservationDays(policy.max_advance_days));
    }
    if window.stay_days() >= policy.max_stay_days {
        problems.push(Problem::MaximumReservationDays(policy.max_stay_days));
    }
    problems
}

/// Keep the first occurrence of each problem, in order.
pub(super) fn dedup(problems: Vec<Problem>) -> Vec<Problem> {
    let mut unique: Vec<Problem> = Vec::with_capacity(problems.len());
    for p in problems {
        if !unique.contains(&p) {
            unique.push(p);
        }
    }
    unique
}

fn decide(window: Window, problems: Vec<Problem>) -> AvailabilityDecision {
    let errors = dedup(problems);
    let is_available = errors.is_empty();
    let outcome = if is_available { "available" } else { "unavailable" };
    metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "outcome" => outcome).increment(1);
    debug!(
        "availability {} .. {}: {outcome} {:?}",
        window.starts,
        window.ends,
        errors.iter().map(Problem::kind).collect::<Vec<_>>()
    );
    AvailabilityDecision {
        is_available,
        window,
        errors,
    }
}

// ── Checker ──────────────────────────────────────────────────────

impl Engine {
    /// Decide whether `[starts, ends]` can be booked. `exclude` is the
    /// reservation being edited, whose own window never counts as a clash.
    ///
    /// Input problems short-circuit: neither the policy nor the store is
    /// consulted. Every other failure is reported in `errors`.
    pub async fn check_availability(
        &self,
        starts: Timestamp,
        ends: Timestamp,
        exclude: Option<Ulid>,
    ) -> AvailabilityDecision {
        let requested = Window::new(starts, ends);
        let today = self.today();

        let mut problems = input_problems(&requested, today);
        if !problems.is_empty() {
            return decide(requested, problems);
        }

        let policy = match self.configuration.configuration().await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                warn!("no booking policy configured");
                return decide(requested, vec![Problem::InternalProblem]);
            }
            Err(e) => {
                error!("loading booking policy: {e}");
                return decide(requested, vec![Problem::InternalProblem]);
            }
        };

        let window = policy.normalize(&requested);
        problems.extend(policy_problems(&window, &policy, today));

        // Overlap is judged on the instants as requested, not the normalized ones.
        match self.collides(&requested, exclude).await {
            Ok(true) => problems.push(Problem::DatesAreUnavailable),
            Ok(false) => {}
            Err(e) => {
                error!("overlap lookup for {} .. {}: {e}", requested.starts, requested.ends);
                problems.push(Problem::InternalProblem);
            }
        }

        decide(window, problems)
    }

    async fn collides(&self, window: &Window, exclude: Option<Ulid>) -> Result<bool, EngineError> {
        let found = self
            .merge_overlapping(window.starts, window.ends, true)
            .await?;
        Ok(found.iter().any(|r| Some(r.id) != exclude))
    }
}
