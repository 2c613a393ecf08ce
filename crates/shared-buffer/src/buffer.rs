//! Shared Buffer Implementation
//!
//! One mutex guards the queue, the consumer slots and the drain flag. Each
//! slot owns a permit count and a condition variable: an insert releases one
//! permit per consumer, a consume acquires one. Permits only decide whether a
//! consumer may stop waiting. What it actually reads is decided by scanning
//! the delivery bitmask of each entry, because the same record is counted
//! once per consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sensor_protocol::SensorRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::BufferError;

/// Identifier a consumer registers under
pub type ConsumerId = u32;

/// Default number of consumer slots (statistics + persistence)
pub const DEFAULT_MAX_CONSUMERS: usize = 2;

/// Hard upper bound on slots; the delivery set is a `u64` bitmask
pub const MAX_CONSUMER_SLOTS: usize = 64;

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of consumers that may register
    pub max_consumers: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_consumers: DEFAULT_MAX_CONSUMERS,
        }
    }
}

/// A queued record and the consumers that already read it
#[derive(Debug)]
struct Entry {
    record: SensorRecord,
    delivered: u64,
}

#[derive(Debug)]
struct Slot {
    id: ConsumerId,
    permits: usize,
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    slots: Vec<Slot>,
    draining: bool,
    /// Set by the first insert or consume; registrations are fixed afterwards
    sealed: bool,
    total_inserted: u64,
}

impl State {
    fn slot_index(&self, id: ConsumerId) -> Result<usize, BufferError> {
        self.slots
            .iter()
            .position(|slot| slot.id == id)
            .ok_or(BufferError::UnknownConsumer(id))
    }

    /// Delivery mask of an entry every registered consumer has read
    fn complete_mask(&self) -> u64 {
        match self.slots.len() {
            MAX_CONSUMER_SLOTS => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }
}

/// FIFO buffer shared by one producer and a fixed set of consumers
pub struct SharedBuffer {
    state: Mutex<State>,
    signals: Box<[Condvar]>,
}

impl SharedBuffer {
    /// Create a buffer with the given number of consumer slots
    pub fn new(config: BufferConfig) -> Result<Self, BufferError> {
        if config.max_consumers == 0 || config.max_consumers > MAX_CONSUMER_SLOTS {
            return Err(BufferError::InvalidConfig(format!(
                "max_consumers must be within 1..={}, got {}",
                MAX_CONSUMER_SLOTS, config.max_consumers
            )));
        }

        let signals: Vec<Condvar> = (0..config.max_consumers).map(|_| Condvar::new()).collect();
        Ok(Self {
            state: Mutex::new(State {
                slots: Vec::with_capacity(config.max_consumers),
                ..State::default()
            }),
            signals: signals.into_boxed_slice(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BufferError> {
        self.state
            .lock()
            .map_err(|e| BufferError::Poisoned(e.to_string()))
    }

    /// Lock for bookkeeping that stays valid after a consumer panicked
    fn lock_or_recover(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a consumer; must happen before the buffer is used
    pub fn register_consumer(&self, id: ConsumerId) -> Result<(), BufferError> {
        let mut state = self.lock()?;

        if state.draining || state.sealed {
            return Err(BufferError::RegistrationClosed);
        }
        if state.slots.iter().any(|slot| slot.id == id) {
            return Err(BufferError::DuplicateConsumer(id));
        }
        if state.slots.len() == self.signals.len() {
            return Err(BufferError::ConsumerTableFull {
                capacity: self.signals.len(),
            });
        }

        state.slots.push(Slot { id, permits: 0 });
        info!("Registered buffer consumer {} (slot {})", id, state.slots.len() - 1);
        Ok(())
    }

    /// Append a record at the tail and wake every consumer
    pub fn insert(&self, record: SensorRecord) -> Result<(), BufferError> {
        let mut state = self.lock()?;
        state.sealed = true;

        if state.slots.is_empty() {
            debug!("No consumers registered, dropping record from sensor {}", record.sensor_id);
            return Ok(());
        }

        state.entries.push_back(Entry {
            record,
            delivered: 0,
        });
        state.total_inserted += 1;
        for slot in state.slots.iter_mut() {
            slot.permits += 1;
        }
        let registered = state.slots.len();
        trace!("Inserted record, {} queued", state.entries.len());
        drop(state);

        for signal in &self.signals[..registered] {
            signal.notify_all();
        }
        Ok(())
    }

    /// Block until a record is available for `id` or the buffer drains.
    ///
    /// `Ok(None)` means nothing unseen was queued when the consumer woke; call
    /// again. `Err(EndOfStream)` is final.
    pub fn consume(&self, id: ConsumerId) -> Result<Option<SensorRecord>, BufferError> {
        self.consume_until(id, None)
    }

    /// Like [`consume`](Self::consume) but gives up after `timeout` with `Ok(None)`.
    /// A timeout too large to represent as a deadline waits without limit.
    pub fn consume_timeout(
        &self,
        id: ConsumerId,
        timeout: Duration,
    ) -> Result<Option<SensorRecord>, BufferError> {
        self.consume_until(id, Instant::now().checked_add(timeout))
    }

    /// Non-blocking consume
    pub fn try_consume(&self, id: ConsumerId) -> Result<Option<SensorRecord>, BufferError> {
        self.consume_timeout(id, Duration::ZERO)
    }

    fn consume_until(
        &self,
        id: ConsumerId,
        deadline: Option<Instant>,
    ) -> Result<Option<SensorRecord>, BufferError> {
        let mut state = self.lock()?;
        let index = state.slot_index(id)?;
        state.sealed = true;
        let signal = &self.signals[index];

        // Single wait per call; the drain flag is re-checked under the lock
        // after every wake-up.
        while state.slots[index].permits == 0 && !state.draining {
            state = match deadline {
                None => signal
                    .wait(state)
                    .map_err(|e| BufferError::Poisoned(e.to_string()))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    signal
                        .wait_timeout(state, deadline - now)
                        .map_err(|e| BufferError::Poisoned(e.to_string()))?
                        .0
                }
            };
        }

        let state = &mut *state;
        let slot = &mut state.slots[index];
        slot.permits = slot.permits.saturating_sub(1);

        let bit = 1u64 << index;
        let draining = state.draining;
        let record = match state.entries.iter_mut().find(|e| e.delivered & bit == 0) {
            Some(entry) => {
                entry.delivered |= bit;
                entry.record
            }
            None if draining => return Err(BufferError::EndOfStream),
            None => return Ok(None),
        };

        let complete = state.complete_mask();
        while state
            .entries
            .front()
            .is_some_and(|entry| entry.delivered == complete)
        {
            state.entries.pop_front();
        }

        Ok(Some(record))
    }

    /// Enter draining mode and wake every consumer; idempotent
    pub fn begin_drain(&self) {
        let mut state = self.lock_or_recover();
        if !state.draining {
            state.draining = true;
            info!("Shared buffer draining with {} records queued", state.entries.len());
        }
        let registered = state.slots.len();
        drop(state);

        for signal in &self.signals[..registered] {
            signal.notify_all();
        }
    }

    /// Number of queued entries (read by at least one consumer or not)
    pub fn len(&self) -> usize {
        self.lock_or_recover().entries.len()
    }

    /// Check if no entries are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `begin_drain` has been called
    pub fn is_draining(&self) -> bool {
        self.lock_or_recover().draining
    }

    /// Number of registered consumers
    pub fn consumer_count(&self) -> usize {
        self.lock_or_recover().slots.len()
    }

    /// Maximum number of consumers
    pub fn capacity(&self) -> usize {
        self.signals.len()
    }

    /// Records queued that `id` has not read yet
    pub fn pending(&self, id: ConsumerId) -> Result<usize, BufferError> {
        let state = self.lock()?;
        let bit = 1u64 << state.slot_index(id)?;
        Ok(state.entries.iter().filter(|e| e.delivered & bit == 0).count())
    }

    /// Records accepted since creation
    pub fn total_inserted(&self) -> u64 {
        self.lock_or_recover().total_inserted
    }
}

impl Default for SharedBuffer {
    fn default() -> Self {
        let signals: Vec<Condvar> = (0..DEFAULT_MAX_CONSUMERS).map(|_| Condvar::new()).collect();
        Self {
            state: Mutex::new(State::default()),
            signals: signals.into_boxed_slice(),
        }
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .field("consumers", &self.consumer_count())
            .field("capacity", &self.capacity())
            .field("draining", &self.is_draining())
            .finish()
    }
}
