use std::collections::HashSet;

use tracing::warn;

use crate::model::{Reservation, Timestamp};
use crate::observability::OVERLAP_QUERY_FAILURES_TOTAL;
use crate::store::StoreError;

use super::{Engine, EngineError, OverlapMode};

/// Union of two result sets, deduplicated by id. The first occurrence wins.
pub fn merge_unique(first: Vec<Reservation>, second: Vec<Reservation>) -> Vec<Reservation> {
    let mut seen = HashSet::with_capacity(first.len() + second.len());
    first
        .into_iter()
        .chain(second)
        .filter(|r| seen.insert(r.id))
        .collect()
}

impl Engine {
    /// Reservations whose `starts` or `ends` falls in `[lo, hi]`.
    ///
    /// Both index queries run concurrently and are both awaited before the
    /// merge. What a failed query means depends on `overlap_mode`.
    pub(super) async fn merge_overlapping(
        &self,
        lo: Timestamp,
        hi: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        let (by_start, by_end) = tokio::join!(
            self.reservations.starts_between(lo, hi, active),
            self.reservations.ends_between(lo, hi, active),
        );
        let by_start = self.settle("starts", by_start)?;
        let by_end = self.settle("ends", by_end)?;
        Ok(merge_unique(by_start, by_end))
    }

    fn settle(
        &self,
        index: &'static str,
        result: Result<Vec<Reservation>, StoreError>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let e = match result {
            Ok(found) => return Ok(found),
            Err(e) => e,
        };
        metrics::counter!(OVERLAP_QUERY_FAILURES_TOTAL, "index" => index).increment(1);
        match self.overlap_mode {
            OverlapMode::Strict => Err(EngineError::Store(e)),
            OverlapMode::Lenient => {
                warn!("{index} range query failed, continuing without it: {e}");
                Ok(Vec::new())
            }
        }
    }
}
