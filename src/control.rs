//! Shared actuator control state and the hysteresis policy that drives it in
//! auto mode.
//!
//! `ControlState` is the single piece of mutable state touched by two tasks:
//! the bridge loop (auto transitions) and the RPC dispatcher (manual
//! overrides). Both hold the write lock for their entire read-decide-write
//! sequence so an auto decision can never race a concurrent override.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::line::SensorReading;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedControl = Arc<RwLock<ControlState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub hose_on: bool,
    pub auto_enabled: bool,
}

/// A command destined for the actuator, written to the serial link as a fixed
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoseCommand {
    On,
    Off,
}

impl HoseCommand {
    /// The exact byte sequence the firmware expects, newline included.
    pub fn token(self) -> &'static [u8] {
        match self {
            HoseCommand::On => b"HOSE_ON\n",
            HoseCommand::Off => b"HOSE_OFF\n",
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, HoseCommand::On)
    }
}

/// Hysteresis band. Validated at startup: `dry_on_level > wet_off_level`.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Hose turns ON when off and the level reaches this (drier = higher).
    pub dry_on_level: i64,
    /// Hose turns OFF when on and the level drops to this.
    pub wet_off_level: i64,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ControlState {
    /// Hose starts off; the auto flag comes from config (default enabled).
    pub fn new(auto_enabled: bool) -> Self {
        Self {
            hose_on: false,
            auto_enabled,
        }
    }

    /// Manual hose position. Leaves the auto flag alone; the dispatcher
    /// pairs this with `set_auto(false)` for override semantics.
    pub fn set_hose(&mut self, on: bool) {
        self.hose_on = on;
    }

    /// Flip auto mode. Never touches the hose position.
    pub fn set_auto(&mut self, enabled: bool) {
        self.auto_enabled = enabled;
    }

    /// Hose transition taken by the hysteresis path. Caller has already
    /// verified `auto_enabled` under the same lock.
    pub fn auto_transition(&mut self, on: bool) {
        self.hose_on = on;
    }
}

pub fn shared(auto_enabled: bool) -> SharedControl {
    Arc::new(RwLock::new(ControlState::new(auto_enabled)))
}

// ---------------------------------------------------------------------------
// Hysteresis policy
// ---------------------------------------------------------------------------

/// Decide whether a new reading warrants a hose transition.
///
/// Pure function of the current state and reading. Returns `None` when auto
/// mode is off or the level sits inside the hysteresis band. Once the caller
/// applies the returned command, re-evaluating the same reading yields `None`.
pub fn decide(
    state: &ControlState,
    reading: &SensorReading,
    thresholds: Thresholds,
) -> Option<HoseCommand> {
    if !state.auto_enabled {
        return None;
    }
    if !state.hose_on && reading.level >= thresholds.dry_on_level {
        Some(HoseCommand::On)
    } else if state.hose_on && reading.level <= thresholds.wet_off_level {
        Some(HoseCommand::Off)
    } else {
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
