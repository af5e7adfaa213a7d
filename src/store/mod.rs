//! Collaborator contracts consumed by the engine, plus the adapters the
//! server wires in: a WAL-backed reservation store and file/static policy
//! providers.

mod index;
mod policy;
mod wal_store;

pub use index::OrderedIndex;
pub use policy::{FileConfigurationProvider, StaticConfigurationProvider};
pub use wal_store::WalReservationStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{BookingPolicy, Reservation, Timestamp};

#[derive(Debug)]
pub enum StoreError {
    /// The log writer is gone or rejected the append.
    Wal(String),
    Io(std::io::Error),
    /// A stored document could not be decoded.
    Decode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Reservation records addressed by id and by two instant-range indexes.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Reservations with the given `active` flag whose `starts` lies in
    /// `[lo, hi]`, ascending by `starts`.
    async fn starts_between(
        &self,
        lo: Timestamp,
        hi: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Same as `starts_between`, keyed and ordered by `ends`.
    async fn ends_between(
        &self,
        lo: Timestamp,
        hi: Timestamp,
        active: bool,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Upsert by id.
    async fn put(&self, reservation: &Reservation) -> Result<(), StoreError>;
}

/// Source of the single active booking policy.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    async fn configuration(&self) -> Result<Option<BookingPolicy>, StoreError>;
}
