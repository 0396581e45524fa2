//! Host-side view of the coprocessor's status, safety switch and arming
//! register.
//!
//! Everything here is pure bookkeeping: the driver performs the register
//! writes these types ask for.

use embassy_time::{Duration, Instant};

use crate::registers::{ArmingFlags, StatusFlags};
use crate::state::{ActuatorArmed, SafetyState};

/// Safety state is republished at this rate even without a change.
pub const SAFETY_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

// ── Status flags ──────────────────────────────────────────────────────────────

/// What the driver has to write back after a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncAction {
    None,
    /// First contact: acknowledge with ARM_SYNC.
    Handshake,
    /// The coprocessor dropped SAFETY_OFF without ARM_SYNC, i.e. it reset
    /// underneath us. Put SAFETY_OFF and ARM_SYNC back in one modify.
    RestoreSafetyOff,
}

impl SyncAction {
    /// Bits to set in the status flags register.
    pub fn set_bits(self) -> StatusFlags {
        match self {
            SyncAction::None => StatusFlags::empty(),
            SyncAction::Handshake => StatusFlags::ARM_SYNC,
            SyncAction::RestoreSafetyOff => StatusFlags::SAFETY_OFF.union(StatusFlags::ARM_SYNC),
        }
    }
}

pub struct StatusSync {
    flags: StatusFlags,
}

impl StatusSync {
    pub fn new() -> Self {
        Self { flags: StatusFlags::empty() }
    }

    /// Cached flags as of the last poll.
    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    /// Fold a freshly read status word into the cache.
    pub fn handle(&mut self, fresh: StatusFlags) -> SyncAction {
        if self.flags.contains(StatusFlags::SAFETY_OFF)
            && !fresh.contains(StatusFlags::SAFETY_OFF)
            && !fresh.contains(StatusFlags::ARM_SYNC)
        {
            // Everything else in `fresh` is stale until the next poll.
            self.flags = StatusFlags::SAFETY_OFF;
            SyncAction::RestoreSafetyOff
        } else if !self.flags.contains(StatusFlags::ARM_SYNC) {
            self.flags = fresh;
            SyncAction::Handshake
        } else {
            self.flags = fresh;
            SyncAction::None
        }
    }
}

impl Default for StatusSync {
    fn default() -> Self {
        Self::new()
    }
}

// ── Safety switch ─────────────────────────────────────────────────────────────

pub struct SafetyMonitor {
    state: SafetyState,
}

impl SafetyMonitor {
    pub fn new() -> Self {
        Self { state: SafetyState::default() }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// Returns the state to publish, if any: immediately when `off`
    /// flips, otherwise once per [`SAFETY_PUBLISH_INTERVAL`].
    pub fn update(&mut self, now: Instant, off: bool) -> Option<SafetyState> {
        let due = match self.state.timestamp {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= SAFETY_PUBLISH_INTERVAL,
        };
        if !due && self.state.off == off {
            return None;
        }
        self.state = SafetyState { available: true, off, timestamp: Some(now) };
        Some(self.state)
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ── Arming register ───────────────────────────────────────────────────────────

/// Composes the arming register from the vehicle's arming state and keeps
/// track of what was last written, so an unchanged command is never resent.
///
/// A composed pair stays pending until the driver reports it written; the
/// lockdown latch only moves with a successful write.
pub struct ArmingSync {
    last_set: ArmingFlags,
    last_clear: ArmingFlags,
    lockdown_override: bool,
    pending: Option<(ArmingFlags, ArmingFlags)>,
}

impl ArmingSync {
    pub fn new() -> Self {
        Self {
            last_set: ArmingFlags::empty(),
            last_clear: ArmingFlags::empty(),
            lockdown_override: false,
            pending: None,
        }
    }

    pub fn lockdown_override(&self) -> bool {
        self.lockdown_override
    }

    pub fn set_lockdown_override(&mut self, enabled: bool) {
        self.lockdown_override = enabled;
    }

    /// (set, clear) pair for `armed` against the current lockdown latch.
    pub fn compose(&self, armed: &ActuatorArmed) -> (ArmingFlags, ArmingFlags) {
        let mut set = ArmingFlags::empty();
        let mut clear = ArmingFlags::empty();

        if armed.armed || armed.in_esc_calibration_mode {
            set |= ArmingFlags::FMU_ARMED;
        } else {
            clear |= ArmingFlags::FMU_ARMED;
        }

        if armed.prearmed {
            set |= ArmingFlags::FMU_PREARMED;
        } else {
            clear |= ArmingFlags::FMU_PREARMED;
        }

        let lockdown = armed.lockdown || armed.manual_lockdown;
        if lockdown && !self.lockdown_override {
            set |= ArmingFlags::LOCKDOWN;
        } else if !lockdown && self.lockdown_override {
            clear |= ArmingFlags::LOCKDOWN;
        }

        if armed.force_failsafe {
            set |= ArmingFlags::FORCE_FAILSAFE;
        } else {
            clear |= ArmingFlags::FORCE_FAILSAFE;
        }

        if armed.ready_to_arm {
            set |= ArmingFlags::IO_ARM_OK;
        } else {
            clear |= ArmingFlags::IO_ARM_OK;
        }

        (set, clear)
    }

    /// Take a new arming state. The newest state replaces anything still
    /// pending; a pair equal to the last one written needs no write.
    pub fn update(&mut self, armed: &ActuatorArmed) {
        let (set, clear) = self.compose(armed);
        self.pending = self.is_pending(set, clear).then_some((set, clear));
    }

    /// Pair still waiting for a successful write.
    pub fn pending(&self) -> Option<(ArmingFlags, ArmingFlags)> {
        self.pending
    }

    /// True if `(set, clear)` differs from the last pair written.
    pub fn is_pending(&self, set: ArmingFlags, clear: ArmingFlags) -> bool {
        set != self.last_set || clear != self.last_clear
    }

    pub fn mark_written(&mut self, set: ArmingFlags, clear: ArmingFlags) {
        self.last_set = set;
        self.last_clear = clear;
        if set.contains(ArmingFlags::LOCKDOWN) {
            self.lockdown_override = true;
        } else if clear.contains(ArmingFlags::LOCKDOWN) {
            self.lockdown_override = false;
        }
        if self.pending == Some((set, clear)) {
            self.pending = None;
        }
    }
}

impl Default for ArmingSync {
    fn default() -> Self {
        Self::new()
    }
}
