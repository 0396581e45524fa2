//! Data exchanged with the driver's collaborators.
//!
//! Everything but the status report is `Copy`, so it can travel through
//! embassy channels and signals without allocation.
use embassy_time::Instant;
use heapless::Vec;

use crate::registers::{Alarms, ArmingFlags, StatusFlags, MAX_ACTUATORS, RC_INPUT_MAX_CHANNELS};

// ── Inputs from the vehicle ───────────────────────────────────────────────────

/// Arming state as decided by the vehicle's commander.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActuatorArmed {
    pub armed: bool,
    pub prearmed: bool,
    pub ready_to_arm: bool,
    pub lockdown: bool,
    pub manual_lockdown: bool,
    pub force_failsafe: bool,
    pub in_esc_calibration_mode: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VehicleCommand {
    /// Ask the commander to terminate the flight.
    FlightTermination,
    /// Ask the commander to arm. `in_air_restore` marks requests sent while
    /// recovering from an in-air restart.
    Arm { in_air_restore: bool },
    /// Start receiver pairing. `receiver` 0 selects DSM; `mode` picks the
    /// DSM variant (0 DSM2, 1 DSMX, otherwise DSMX8).
    StartRxPair { receiver: u8, mode: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RestartReason {
    PowerOn,
    InFlight,
    /// Not yet known; set at the start of every init.
    Volatile,
}

// ── Runtime parameters ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RcChannelConfig {
    pub enabled: bool,
    pub reversed: bool,
}

impl Default for RcChannelConfig {
    fn default() -> Self {
        Self { enabled: true, reversed: false }
    }
}

/// RSSI taken from a receiver channel. `channel` is 1-based, 0 disables it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RssiPwmMapping {
    pub channel: u8,
    pub min: i32,
    pub max: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SbusOutput {
    Disabled,
    Sbus1,
    Sbus2,
}

impl SbusOutput {
    pub fn from_param(value: i32) -> Self {
        match value {
            1 => SbusOutput::Sbus1,
            2 => SbusOutput::Sbus2,
            _ => SbusOutput::Disabled,
        }
    }
}

/// Parameters the driver pushes to the coprocessor while disarmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub rc_channels: [RcChannelConfig; RC_INPUT_MAX_CHANNELS],
    pub rssi_pwm: RssiPwmMapping,
    /// `None` when the board has no SBUS output parameter.
    pub sbus_output: Option<SbusOutput>,
    /// Thermal control parameter; negative disables heater control.
    /// `None` when the board has no heater.
    pub thermal_control: Option<i32>,
    /// Flight-termination circuit breaker engaged (termination disabled).
    pub cb_flight_termination: bool,
    /// IO safety circuit breaker engaged (safety switch bypassed).
    pub cb_io_safety: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            rc_channels: [RcChannelConfig::default(); RC_INPUT_MAX_CHANNELS],
            rssi_pwm: RssiPwmMapping::default(),
            sbus_output: None,
            thermal_control: None,
            cb_flight_termination: true,
            cb_io_safety: false,
        }
    }
}

// ── Publications ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SafetyState {
    pub available: bool,
    pub off: bool,
    pub timestamp: Option<Instant>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputSource {
    #[default]
    Unknown,
    Ppm,
    Spektrum,
    Sbus,
    St24,
}

impl InputSource {
    /// Active protocol as reported in the status flags, first match wins.
    pub fn from_status(flags: StatusFlags) -> Self {
        if flags.contains(StatusFlags::RC_PPM) {
            InputSource::Ppm
        } else if flags.contains(StatusFlags::RC_DSM) {
            InputSource::Spektrum
        } else if flags.contains(StatusFlags::RC_SBUS) {
            InputSource::Sbus
        } else if flags.contains(StatusFlags::RC_ST24) {
            InputSource::St24
        } else {
            InputSource::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RcFrame {
    pub timestamp: Instant,
    /// Last frame with channels and neither lost nor failsafe.
    pub last_signal: Option<Instant>,
    pub values: [u16; RC_INPUT_MAX_CHANNELS],
    pub channel_count: usize,
    /// 0..=100
    pub rssi: u8,
    pub lost: bool,
    pub failsafe: bool,
    pub ppm_frame_length: u16,
    pub frame_count: u16,
    pub lost_frame_count: u16,
    pub input_source: InputSource,
}

/// Coprocessor health report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoStatus {
    pub timestamp: Instant,
    pub flags: StatusFlags,
    pub alarms: Alarms,
    pub arming: ArmingFlags,
    pub free_memory: u16,
    pub servo_rail_mv: u16,
    pub rssi_mv: u16,
    pub servos: Vec<u16, MAX_ACTUATORS>,
    pub raw_inputs: Vec<u16, RC_INPUT_MAX_CHANNELS>,
}
