//! Per-device exclusive guards.
//!
//! A bridge cannot tell two interleaved learn or emit conversations apart, so
//! every learn session and every send batch holds the device's guard for its
//! whole exchange.  Learning takes the guard with [`DeviceGuards::try_acquire`]
//! and fails fast when it is held; sending waits for it with
//! [`DeviceGuards::acquire`].
//!
//! Each slot also remembers the state of the most recent learn session on
//! that device so callers can observe it after the session ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use allone_core::Identifier;
use tokio::sync::OwnedMutexGuard;

use crate::application::learn::LearnState;

#[derive(Debug)]
struct DeviceSlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    learn_state: Mutex<LearnState>,
}

impl DeviceSlot {
    fn new() -> Self {
        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            learn_state: Mutex::new(LearnState::Idle),
        }
    }

    fn learn_state(&self) -> LearnState {
        *self.learn_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_learn_state(&self, state: LearnState) {
        *self.learn_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Guards keyed by hardware identifier, created on first use.
#[derive(Debug, Default)]
pub struct DeviceGuards {
    slots: Mutex<HashMap<Identifier, Arc<DeviceSlot>>>,
}

impl DeviceGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the guard for `identifier` if nobody holds it.
    pub fn try_acquire(&self, identifier: Identifier) -> Option<DeviceLease> {
        let slot = self.slot(identifier);
        let guard = Arc::clone(&slot.lock).try_lock_owned().ok()?;
        Some(DeviceLease { slot, _guard: guard })
    }

    /// Waits until the guard for `identifier` is free, then takes it.
    pub async fn acquire(&self, identifier: Identifier) -> DeviceLease {
        let slot = self.slot(identifier);
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        DeviceLease { slot, _guard: guard }
    }

    /// State of the most recent learn session on `identifier`.
    pub fn learn_state(&self, identifier: Identifier) -> LearnState {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identifier)
            .map(|slot| slot.learn_state())
            .unwrap_or(LearnState::Idle)
    }

    fn slot(&self, identifier: Identifier) -> Arc<DeviceSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(identifier)
                .or_insert_with(|| Arc::new(DeviceSlot::new())),
        )
    }
}

/// Exclusive hold on one device.  Released on drop.
///
/// A lease dropped while its session is still `Entered` (the caller abandoned
/// the wait) puts the device back to `Idle`.
#[derive(Debug)]
pub struct DeviceLease {
    slot: Arc<DeviceSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceLease {
    pub fn learn_state(&self) -> LearnState {
        self.slot.learn_state()
    }

    pub fn set_learn_state(&self, state: LearnState) {
        self.slot.set_learn_state(state);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if self.slot.learn_state() == LearnState::Entered {
            self.slot.set_learn_state(LearnState::Idle);
        }
    }
}
