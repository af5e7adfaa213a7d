use std::io;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::{Event, Reservation, Timestamp};
use crate::wal::Wal;

use super::{OrderedIndex, ReservationStore, StoreError};

#[derive(Default)]
struct Indexes {
    by_start: OrderedIndex,
    by_end: OrderedIndex,
}

#[derive(Clone, Copy)]
enum IndexKey {
    Starts,
    Ends,
}

impl IndexKey {
    fn of(self, r: &Reservation) -> Timestamp {
        match self {
            IndexKey::Starts => r.starts,
            IndexKey::Ends => r.ends,
        }
    }
}

/// Records plus indexes. Only the WAL writer task mutates it, so in-memory
/// order always matches log order.
#[derive(Default)]
struct StoreState {
    records: DashMap<Ulid, Reservation>,
    indexes: RwLock<Indexes>,
}

impl StoreState {
    fn apply(&self, event: &Event) {
        match event {
            Event::Put { reservation } => {
                let mut idx = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(previous) = self.records.insert(reservation.id, reservation.clone()) {
                    idx.by_start.remove(previous.starts, previous.id, previous.active);
                    idx.by_end.remove(previous.ends, previous.id, previous.active);
                }
                idx.by_start.insert(reservation.starts, reservation.id, reservation.active);
                idx.by_end.insert(reservation.ends, reservation.id, reservation.active);
            }
        }
    }

    /// One `Put` per live record: enough to rebuild the current state.
    fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .records
            .iter()
            .map(|e| Event::Put {
                reservation: e.value().clone(),
            })
            .collect();
        events.sort_by_key(Event::reservation_id);
        events
    }

    fn range(&self, key: IndexKey, lo: Timestamp, hi: Timestamp, active: bool) -> Vec<Reservation> {
        let ids: Vec<Ulid> = {
            let idx = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
            let index = match key {
                IndexKey::Starts => &idx.by_start,
                IndexKey::Ends => &idx.by_end,
            };
            index.range(lo, hi, active).collect()
        };
        // A put may land between the index read and the record read; re-check.
        ids.into_iter()
            .filter_map(|id| self.records.get(&id).map(|r| r.value().clone()))
            .filter(|r| {
                let at = key.of(r);
                r.active == active && lo <= at && at <= hi
            })
            .collect()
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the WAL. Drains every append already queued, fsyncs once, applies
/// the batch to memory in log order, then answers every caller.
async fn wal_writer_loop(mut wal: Wal, state: Arc<StoreState>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, &state, other);
                continue;
            }
        };
        let mut batch: Pending = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &state, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, &state, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, state: &StoreState, batch: Pending) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (event, tx) in batch {
        let reply = match &result {
            Ok(()) => {
                state.apply(&event);
                Ok(())
            }
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn flush_batch(wal: &mut Wal, batch: &Pending) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a half-written batch does not
    // prefix the next one.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, state: &StoreState, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let events = state.snapshot();
            let kept = events.len();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file())
                .map(|()| kept);
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, state, vec![(event, response)]),
    }
}

/// Durable reservation store: in-memory records and indexes rebuilt from an
/// append-only log on open.
pub struct WalReservationStore {
    state: Arc<StoreState>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalReservationStore {
    /// Replay the log at `path` and start its writer task. Needs a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let state = Arc::new(StoreState::default());
        for event in &events {
            state.apply(event);
        }
        tracing::info!(
            "reservation store {}: replayed {} events, {} reservations",
            path.display(),
            events.len(),
            state.records.len()
        );

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, state.clone(), wal_rx));
        Ok(Self { state, wal_tx })
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(make(tx))
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))
    }

    /// Rewrite the log with one record per reservation. Returns the number kept.
    pub async fn compact_wal(&self) -> Result<usize, StoreError> {
        self.request(|response| WalCommand::Compact { response })
            .await?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalReservationStore {
    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.records.get(&id).map(|r| r.value().clone()))
    }

    async fn starts_between(
        &self,
        lo: Timestamp,
        hi: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.range(IndexKey::Starts, lo, hi, active))
    }

    async fn ends_between(
        &self,
        lo: Timestamp,
        hi: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.range(IndexKey::Ends, lo, hi, active))
    }

    async fn put(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let event = Event::Put {
            reservation: reservation.clone(),
        };
        self.request(|response| WalCommand::Append { event, response })
            .await?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }
}
