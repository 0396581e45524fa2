//! Seams to the rest of the vehicle.
//!
//! The driver never owns a timer, a message bus or parameter storage. It
//! reaches all of them through these traits, so the firmware wires them to
//! embassy primitives and tests wire them to a simulated clock.

use core::future::Future;

use embassy_time::{Duration, Instant};

use crate::drivers::outputs::PwmTables;
use crate::registers::MAX_ACTUATORS;
use crate::state::{ActuatorArmed, ConfigSnapshot, IoStatus, RcFrame, RestartReason, SafetyState, VehicleCommand};

pub trait Clock {
    fn now(&self) -> Instant;

    /// Yield for `duration`.
    fn delay(&mut self, duration: Duration) -> impl Future<Output = ()>;
}

/// Per-channel limits, trims and failsafe/disarmed values held by the
/// mixer. The driver pushes the failsafe and disarmed columns to the
/// coprocessor; the mixer applies the limits and trims to its outputs.
pub trait MixerTables {
    fn tables(&self) -> PwmTables;

    fn set_tables(&mut self, tables: &PwmTables);
}

pub trait IoHost: Clock + MixerTables {
    // ── Mixer ────────────────────────────────────────────────────────────

    /// Copy pending actuator outputs into `outputs`, returning how many
    /// channels are valid. `None` when nothing new arrived.
    fn take_outputs(&mut self, outputs: &mut [u16; MAX_ACTUATORS]) -> Option<usize>;

    /// Resolve when new outputs are pending or at `deadline`, whichever is
    /// first.
    fn wait_outputs(&mut self, deadline: Instant) -> impl Future<Output = ()>;

    // ── Arming feed ──────────────────────────────────────────────────────

    /// Latest arming state if it changed since the last call.
    fn poll_armed(&mut self) -> Option<ActuatorArmed>;

    /// Wait for the next arming update until `deadline`.
    fn wait_armed(&mut self, deadline: Instant) -> impl Future<Output = Option<ActuatorArmed>>;

    // ── Parameters ───────────────────────────────────────────────────────

    /// True once per parameter change.
    fn poll_params(&mut self) -> bool;

    fn config(&self) -> ConfigSnapshot;

    /// Persistent restart reason, if stored.
    fn restart_reason(&self) -> Option<RestartReason>;

    /// Best effort; returns false if it could not be stored.
    fn set_restart_reason(&mut self, reason: RestartReason) -> bool;

    // ── Commands ─────────────────────────────────────────────────────────

    fn poll_command(&mut self) -> Option<VehicleCommand>;

    fn send_command(&mut self, command: VehicleCommand);

    // ── Publications ─────────────────────────────────────────────────────

    fn publish_safety(&mut self, safety: &SafetyState);

    fn publish_rc(&mut self, frame: &RcFrame);

    fn publish_status(&mut self, status: &IoStatus);
}
