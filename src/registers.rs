//! Coprocessor register map.
//!
//! Every register is a 16-bit word addressed by `page * 256 + offset`.
//! Raw bit layouts live here only; the rest of the crate works with the
//! named flag sets below.

use bitflags::bitflags;

/// Protocol revision this driver speaks.
pub const PROTOCOL_VERSION: u16 = 4;

/// Receiver channel capacity of the coprocessor.
pub const RC_INPUT_MAX_CHANNELS: usize = 18;
/// Largest actuator count the coprocessor may advertise.
pub const MAX_ACTUATORS: usize = 16;

/// Register width on the wire.
pub const WORD_SIZE: usize = 2;

// ── Addressing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterAddress {
    pub page: u8,
    pub offset: u8,
}

impl RegisterAddress {
    pub const fn new(page: u8, offset: u8) -> Self {
        Self { page, offset }
    }

    /// Linear register index used by the link.
    pub const fn linear(self) -> u16 {
        (self.page as u16) << 8 | self.offset as u16
    }

    /// Same page, `n` registers further on.
    pub const fn add(self, n: u8) -> Self {
        Self { page: self.page, offset: self.offset.wrapping_add(n) }
    }
}

// ── Pages ─────────────────────────────────────────────────────────────────────

/// Static configuration, read-only.
pub const PAGE_CONFIG: u8 = 0;
/// Dynamic status, read-only apart from the flags handshake.
pub const PAGE_STATUS: u8 = 1;
/// Current servo outputs in microseconds.
pub const PAGE_SERVOS: u8 = 3;
/// Raw receiver input as the coprocessor decoded it.
pub const PAGE_RAW_RC_INPUT: u8 = 4;
/// Rate group of each PWM output.
pub const PAGE_PWM_INFO: u8 = 7;
/// Setup and arming, read/write.
pub const PAGE_SETUP: u8 = 50;
/// Per-input RC configuration, one stride per input.
pub const PAGE_RC_CONFIG: u8 = 53;
/// PWM outputs written directly, bypassing the coprocessor mixer.
pub const PAGE_DIRECT_PWM: u8 = 54;
/// Failsafe outputs; zero disables the output in failsafe.
pub const PAGE_FAILSAFE_PWM: u8 = 55;
/// Outputs while disarmed; zero disables the output.
pub const PAGE_DISARMED_PWM: u8 = 109;

// ── Config page ───────────────────────────────────────────────────────────────

pub const CONFIG_PROTOCOL_VERSION: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 0);
pub const CONFIG_HARDWARE_VERSION: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 1);
pub const CONFIG_BOOTLOADER_VERSION: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 2);
/// Maximum packet size in bytes, including the two framing bytes.
pub const CONFIG_MAX_TRANSFER: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 3);
pub const CONFIG_CONTROL_COUNT: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 4);
pub const CONFIG_ACTUATOR_COUNT: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 5);
pub const CONFIG_RC_INPUT_COUNT: RegisterAddress = RegisterAddress::new(PAGE_CONFIG, 6);
/// Registers from the protocol version up to the RC input count.
pub const CONFIG_BLOCK_LEN: usize = 7;

// ── Status page ───────────────────────────────────────────────────────────────

pub const STATUS_FREEMEM: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 0);
pub const STATUS_CPULOAD: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 1);
pub const STATUS_FLAGS: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 2);
pub const STATUS_ALARMS: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 3);
/// Battery voltage in mV.
pub const STATUS_VBATT: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 4);
/// Battery current, raw ADC.
pub const STATUS_IBATT: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 5);
/// Servo rail voltage in mV.
pub const STATUS_VSERVO: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 6);
/// Analog RSSI input voltage in mV.
pub const STATUS_VRSSI: RegisterAddress = RegisterAddress::new(PAGE_STATUS, 7);
/// Flags through RSSI voltage, read as one block.
pub const STATUS_BLOCK_LEN: usize = 6;

bitflags! {
    /// Coprocessor status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u16 {
        const OUTPUTS_ARMED   = 1 << 0;
        const RC_OK           = 1 << 1;
        const RC_PPM          = 1 << 2;
        const RC_DSM          = 1 << 3;
        const RC_SBUS         = 1 << 4;
        const FMU_OK          = 1 << 5;
        const RAW_PWM         = 1 << 6;
        const ARM_SYNC        = 1 << 7;
        const INIT_OK         = 1 << 8;
        const FAILSAFE        = 1 << 9;
        const SAFETY_OFF      = 1 << 10;
        const FMU_INITIALIZED = 1 << 11;
        const RC_ST24         = 1 << 12;
        const RC_SUMD         = 1 << 13;
    }
}

bitflags! {
    /// Coprocessor alarms. Writing a set bit clears that alarm.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Alarms: u16 {
        const VBATT_LOW     = 1 << 0;
        const TEMPERATURE   = 1 << 1;
        const SERVO_CURRENT = 1 << 2;
        const ACC_CURRENT   = 1 << 3;
        const FMU_LOST      = 1 << 4;
        const RC_LOST       = 1 << 5;
        const PWM_ERROR     = 1 << 6;
        const VSERVO_FAULT  = 1 << 7;
    }
}

// ── Raw RC input page ─────────────────────────────────────────────────────────

pub const RAW_RC_COUNT: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 0);
pub const RAW_RC_FLAGS: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 1);
pub const RAW_RC_NRSSI: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 2);
/// PPM frame length in microseconds.
pub const RAW_RC_DATA: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 3);
pub const RAW_RC_FRAME_COUNT: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 4);
pub const RAW_RC_LOST_FRAME_COUNT: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 5);
pub const RAW_RC_BASE: RegisterAddress = RegisterAddress::new(PAGE_RAW_RC_INPUT, 6);
/// Header registers in front of the channel values.
pub const RAW_RC_PROLOG: usize = 6;
/// Channels fetched together with the header.
pub const RAW_RC_FIRST_CHANNELS: usize = 9;

bitflags! {
    /// Per-frame receiver flags on the raw RC page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RawRcFlags: u16 {
        const FRAME_DROP = 1 << 0;
        const FAILSAFE   = 1 << 1;
        const DSM11      = 1 << 2;
        const MAPPING_OK = 1 << 3;
        const RC_OK      = 1 << 4;
    }
}

// ── PWM info page ─────────────────────────────────────────────────────────────

pub const PWM_INFO_RATE_MAP: RegisterAddress = RegisterAddress::new(PAGE_PWM_INFO, 0);

// ── Setup page ────────────────────────────────────────────────────────────────

pub const SETUP_FEATURES: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 0);
pub const SETUP_ARMING: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 1);
/// Bitmask of output groups running at the alternate rate.
pub const SETUP_PWM_RATES: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 2);
pub const SETUP_PWM_DEFAULTRATE: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 3);
pub const SETUP_PWM_ALTRATE: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 4);
pub const SETUP_DSM: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 7);
pub const SETUP_SET_DEBUG: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 9);
pub const SETUP_REBOOT_BL: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 10);
/// Firmware CRC, two registers, low word first.
pub const SETUP_CRC: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 11);
pub const SETUP_FORCE_SAFETY_OFF: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 12);
pub const SETUP_FORCE_SAFETY_ON: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 14);
/// SBUS1 output frame rate in Hz.
pub const SETUP_SBUS_RATE: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 16);
pub const SETUP_THERMAL: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 20);
pub const SETUP_ENABLE_FLIGHTTERMINATION: RegisterAddress = RegisterAddress::new(PAGE_SETUP, 21);

pub const REBOOT_BL_MAGIC: u16 = 14662;
pub const FORCE_SAFETY_MAGIC: u16 = 22027;

pub const THERMAL_IGNORE: u16 = 0xFFFF;
pub const THERMAL_OFF: u16 = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureFlags: u16 {
        const SBUS1_OUT = 1 << 0;
        const SBUS2_OUT = 1 << 1;
        /// RSSI from a PWM input.
        const PWM_RSSI  = 1 << 2;
        /// RSSI from the analog input.
        const ADC_RSSI  = 1 << 3;
    }
}

bitflags! {
    /// Setup/arming register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArmingFlags: u16 {
        const IO_ARM_OK            = 1 << 0;
        const FMU_ARMED            = 1 << 1;
        const FMU_PREARMED         = 1 << 2;
        const FAILSAFE_CUSTOM      = 1 << 3;
        const INAIR_RESTART_OK     = 1 << 4;
        const ALWAYS_PWM_ENABLE    = 1 << 5;
        const RC_HANDLING_DISABLED = 1 << 6;
        const LOCKDOWN             = 1 << 7;
        const FORCE_FAILSAFE       = 1 << 8;
        const TERMINATION_FAILSAFE = 1 << 9;
        const OVERRIDE_IMMEDIATE   = 1 << 10;
    }
}

// ── DSM bind sub-commands (written to SETUP_DSM) ──────────────────────────────

pub const DSM_BIND_POWER_DOWN: u16 = 0;
pub const DSM_BIND_POWER_UP: u16 = 1;
pub const DSM_BIND_SET_RX_OUT: u16 = 2;
pub const DSM_BIND_SEND_PULSES: u16 = 3;
pub const DSM_BIND_REINIT_UART: u16 = 4;

pub const DSM2_BIND_PULSES: u8 = 3;
pub const DSMX_BIND_PULSES: u8 = 7;
pub const DSMX8_BIND_PULSES: u8 = 9;

// ── RC config page ────────────────────────────────────────────────────────────

pub const RC_CONFIG_MIN: u8 = 0;
pub const RC_CONFIG_CENTER: u8 = 1;
pub const RC_CONFIG_MAX: u8 = 2;
pub const RC_CONFIG_DEADZONE: u8 = 3;
pub const RC_CONFIG_ASSIGNMENT: u8 = 4;
pub const RC_CONFIG_OPTIONS: u8 = 5;
pub const RC_CONFIG_STRIDE: usize = 6;

/// Input not routed to any control function.
pub const RC_ASSIGNMENT_NONE: u16 = 0xFF;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RcConfigOptions: u16 {
        const ENABLED = 1 << 0;
        const REVERSE = 1 << 1;
    }
}

// ── PWM limits (µs) ───────────────────────────────────────────────────────────

pub const PWM_LOWEST_MIN: u16 = 90;
pub const PWM_HIGHEST_MIN: u16 = 1600;
pub const PWM_LOWEST_MAX: u16 = 200;
pub const PWM_HIGHEST_MAX: u16 = 2150;
pub const PWM_DEFAULT_MIN: u16 = 1000;
pub const PWM_DEFAULT_MAX: u16 = 2000;
pub const PWM_MOTOR_OFF: u16 = 900;
