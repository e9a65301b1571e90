//! # State Cache
//!
//! Latest observed value for every (device, parameter) pair. There are two
//! write paths:
//!
//! - [`StateCache::update`] stores values read by the poll scheduler. These
//!   are the source of truth.
//! - [`StateCache::apply_optimistic`] stores the value a command just wrote,
//!   ahead of the next poll which reconciles it.
//!
//! Both drop values older than the stored reading, so overlapping retries
//! that answer out of order never move a reading back in time.

use crate::device::{Decoded, DeviceRegistry, Parameter, Value};
use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    Polled,
    /// Written by a command, not yet confirmed by a poll.
    Optimistic,
}

/// An observed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub address: u8,
    pub parameter: Parameter,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub source: ReadingSource,
}

/// Result of a cache query.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Fresh(Reading),
    /// Known, but older than the maximum age.
    Stale(Reading),
    NotFound,
}

impl ReadResult {
    /// The reading regardless of age.
    pub fn reading(&self) -> Option<&Reading> {
        match self {
            ReadResult::Fresh(r) | ReadResult::Stale(r) => Some(r),
            ReadResult::NotFound => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, ReadResult::Fresh(_))
    }
}

/// A meaningful change of a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub address: u8,
    pub parameter: Parameter,
    pub previous: Option<Value>,
    pub current: Value,
    pub valid: bool,
    pub source: ReadingSource,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Stored,
    /// Older than the stored reading, discarded.
    Outdated,
}

pub struct StateCache {
    registry: Arc<DeviceRegistry>,
    readings: RwLock<HashMap<(u8, Parameter), Reading>>,
    max_age: Duration,
    changes: broadcast::Sender<StateChange>,
}

impl StateCache {
    /// Creates a cache whose readings turn stale after `max_age`.
    pub fn new(registry: Arc<DeviceRegistry>, max_age: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            registry,
            readings: RwLock::new(HashMap::new()),
            max_age,
            changes,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Stores a polled value.
    pub fn update(
        &self,
        address: u8,
        parameter: Parameter,
        decoded: Decoded,
        timestamp: DateTime<Utc>,
    ) -> Result<UpdateOutcome, RegistryError> {
        self.registry.lookup_parameter(address, parameter)?;
        Ok(self.store(Reading {
            address,
            parameter,
            value: decoded.value,
            timestamp,
            valid: decoded.valid,
            source: ReadingSource::Polled,
        }))
    }

    /// Stores the value a command was acknowledged for.
    ///
    /// Parameters outside the device's capability set are not cached and
    /// return `Ok(None)`.
    pub fn apply_optimistic(
        &self,
        address: u8,
        parameter: Parameter,
        value: Value,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<UpdateOutcome>, RegistryError> {
        let device = self.registry.lookup(address)?;
        if !device.supports(parameter) {
            return Ok(None);
        }
        Ok(Some(self.store(Reading {
            address,
            parameter,
            value,
            timestamp,
            valid: true,
            source: ReadingSource::Optimistic,
        })))
    }

    fn store(&self, reading: Reading) -> UpdateOutcome {
        let key = (reading.address, reading.parameter);
        let change = {
            let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
            let previous = readings.get(&key);
            if previous.is_some_and(|p| reading.timestamp < p.timestamp) {
                log::trace!(
                    "Dropping outdated {} for device {}",
                    reading.parameter,
                    reading.address
                );
                return UpdateOutcome::Outdated;
            }

            let epsilon = reading.parameter.spec().epsilon;
            let change = match previous {
                None => true,
                Some(p) => p.valid != reading.valid || p.value.differs(&reading.value, epsilon),
            }
            .then(|| StateChange {
                address: reading.address,
                parameter: reading.parameter,
                previous: previous.map(|p| p.value),
                current: reading.value,
                valid: reading.valid,
                source: reading.source,
                timestamp: reading.timestamp,
            });
            readings.insert(key, reading);
            change
        };

        if let Some(change) = change {
            // No subscribers is fine.
            let _ = self.changes.send(change);
        }
        UpdateOutcome::Stored
    }

    pub fn read(&self, address: u8, parameter: Parameter) -> ReadResult {
        self.read_at(address, parameter, Utc::now())
    }

    /// Queries the cache as of `now`.
    pub fn read_at(&self, address: u8, parameter: Parameter, now: DateTime<Utc>) -> ReadResult {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        match readings.get(&(address, parameter)) {
            None => ReadResult::NotFound,
            Some(reading) if self.is_stale(reading, now) => ReadResult::Stale(reading.clone()),
            Some(reading) => ReadResult::Fresh(reading.clone()),
        }
    }

    pub fn is_stale(&self, reading: &Reading, now: DateTime<Utc>) -> bool {
        // Readings from the future (clock steps) count as fresh.
        (now - reading.timestamp)
            .to_std()
            .map_or(false, |age| age > self.max_age)
    }

    /// Receiver of change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Drops all readings of a device.
    pub fn purge(&self, address: u8) -> usize {
        let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
        let before = readings.len();
        readings.retain(|(a, _), _| *a != address);
        before - readings.len()
    }

    /// All readings of one device, ordered by parameter.
    pub fn readings_for(&self, address: u8) -> Vec<Reading> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Reading> = readings
            .values()
            .filter(|r| r.address == address)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.parameter);
        out
    }

    pub fn len(&self) -> usize {
        self.readings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
