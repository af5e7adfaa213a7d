mod availability;
mod error;
mod lifecycle;
mod overlap;
mod queries;

pub use error::EngineError;
pub use overlap::merge_unique;

use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use mockable::{Clock, DefaultClock};

use crate::config::{ServerConfig, CONFIGURATION_COMPONENT, RESERVATION_COMPONENT};
use crate::model::Timestamp;
use crate::store::{ConfigurationProvider, FileConfigurationProvider, ReservationStore, WalReservationStore};

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// What to do when one of the two overlap range queries fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlapMode {
    /// The failed query contributes nothing; the check goes on with what arrived.
    #[default]
    Lenient,
    /// The failure surfaces, and availability checks report an internal problem.
    Strict,
}

/// Availability decisions and reservation lifecycle over the store and
/// policy collaborators. Holds no reservation state of its own.
pub struct Engine {
    pub(super) reservations: Arc<dyn ReservationStore>,
    pub(super) configuration: Arc<dyn ConfigurationProvider>,
    pub(super) clock: SharedClock,
    pub(super) overlap_mode: OverlapMode,
}

impl Engine {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        configuration: Arc<dyn ConfigurationProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            reservations,
            configuration,
            clock,
            overlap_mode: OverlapMode::default(),
        }
    }

    pub fn with_overlap_mode(mut self, mode: OverlapMode) -> Self {
        self.overlap_mode = mode;
        self
    }

    /// Wire the durable store and the policy file named by `config.stores`.
    /// Returns the store too so the caller can run its compactor.
    pub fn open(config: &ServerConfig) -> io::Result<(Self, Arc<WalReservationStore>)> {
        let wal_path = config.store_path(RESERVATION_COMPONENT)?;
        let policy_path = config.store_path(CONFIGURATION_COMPONENT)?;
        let store = Arc::new(WalReservationStore::open(&wal_path)?);
        let engine = Self::new(
            store.clone(),
            Arc::new(FileConfigurationProvider::new(policy_path)),
            Arc::new(DefaultClock),
        )
        .with_overlap_mode(config.overlap_mode);
        Ok((engine, store))
    }

    pub fn overlap_mode(&self) -> OverlapMode {
        self.overlap_mode
    }

    pub(super) fn now(&self) -> Timestamp {
        self.clock.utc()
    }

    /// Calendar date in UTC that "today" checks are anchored to.
    pub(super) fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}
