//! Operations invoked by the rest of the vehicle. Each one is a handful of
//! register transactions; none of them retry.
//!
//! Callers outside the scheduler go through
//! [`ControlHandle`](crate::tasks::io_task::ControlHandle), which takes the
//! same lock the scheduler holds while cycling.

use embassy_time::Duration;
use heapless::Vec;

use crate::drivers::outputs::PwmTables;
use crate::drivers::px4io::Px4Io;
use crate::drivers::transport::Link;
use crate::error::{Error, Result};
use crate::host::{Clock, MixerTables};
use crate::log::{log_info, log_warn};
use crate::registers::*;
use crate::state::SbusOutput;

const BIND_POWER_DOWN_TIME: Duration = Duration::from_millis(500);
const BIND_POWER_UP_TIME: Duration = Duration::from_millis(72);
const BIND_PULSE_TIME: Duration = Duration::from_millis(50);

impl<L: Link> Px4Io<L> {
    fn modify_arming(&mut self, clear: ArmingFlags, set: ArmingFlags) -> Result<()> {
        self.io.modify(SETUP_ARMING, clear.bits(), set.bits())
    }

    fn modify_features(&mut self, clear: FeatureFlags, set: FeatureFlags) -> Result<()> {
        self.io.modify(SETUP_FEATURES, clear.bits(), set.bits())
    }

    // ── Arming ────────────────────────────────────────────────────────────

    pub fn arm(&mut self) -> Result<()> {
        self.modify_arming(ArmingFlags::empty(), ArmingFlags::FMU_ARMED)
    }

    pub fn disarm(&mut self) -> Result<()> {
        self.modify_arming(ArmingFlags::FMU_ARMED, ArmingFlags::empty())
    }

    pub fn set_arm_ok(&mut self) -> Result<()> {
        self.modify_arming(ArmingFlags::empty(), ArmingFlags::IO_ARM_OK)
    }

    pub fn clear_arm_ok(&mut self) -> Result<()> {
        self.modify_arming(ArmingFlags::IO_ARM_OK, ArmingFlags::empty())
    }

    pub fn set_lockdown_override(&mut self, enabled: bool) {
        self.arming.set_lockdown_override(enabled);
    }

    pub fn lockdown_override(&self) -> bool {
        self.arming.lockdown_override()
    }

    pub fn set_force_failsafe(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.modify_arming(ArmingFlags::empty(), ArmingFlags::FORCE_FAILSAFE)
        } else {
            self.modify_arming(ArmingFlags::FORCE_FAILSAFE, ArmingFlags::empty())
        }
    }

    pub fn set_termination_failsafe(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.modify_arming(ArmingFlags::empty(), ArmingFlags::TERMINATION_FAILSAFE)
        } else {
            self.modify_arming(ArmingFlags::TERMINATION_FAILSAFE, ArmingFlags::empty())
        }
    }

    /// Allow or forbid resuming an armed state after an FMU restart.
    pub fn set_inair_restart(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.modify_arming(ArmingFlags::empty(), ArmingFlags::INAIR_RESTART_OK)
        } else {
            self.modify_arming(ArmingFlags::INAIR_RESTART_OK, ArmingFlags::empty())
        }
    }

    pub fn disable_rc_handling(&mut self) -> Result<()> {
        self.rc_handling_disabled = true;
        self.modify_arming(ArmingFlags::empty(), ArmingFlags::RC_HANDLING_DISABLED)
    }

    // ── Safety ────────────────────────────────────────────────────────────

    pub fn force_safety_off(&mut self) -> Result<()> {
        self.io.write_one(SETUP_FORCE_SAFETY_OFF, FORCE_SAFETY_MAGIC)
    }

    pub fn force_safety_on(&mut self) -> Result<()> {
        self.io.write_one(SETUP_FORCE_SAFETY_ON, FORCE_SAFETY_MAGIC)
    }

    // ── PWM rates ─────────────────────────────────────────────────────────

    pub fn default_rate(&mut self) -> Result<u16> {
        self.io.read_one(SETUP_PWM_DEFAULTRATE)
    }

    pub fn set_alt_rate(&mut self, hz: u16) -> Result<()> {
        self.io.write_one(SETUP_PWM_ALTRATE, hz)
    }

    pub fn alt_rate(&mut self) -> Result<u16> {
        self.io.read_one(SETUP_PWM_ALTRATE)
    }

    /// Select which rate groups run at the alternate rate. The coprocessor
    /// flags an impossible selection with PWM_ERROR.
    pub fn set_rate_groups(&mut self, mask: u16) -> Result<()> {
        self.io.write_one(STATUS_ALARMS, Alarms::PWM_ERROR.bits())?;
        self.io.write_one(SETUP_PWM_RATES, mask)?;

        let alarms = Alarms::from_bits_retain(self.io.read_one(STATUS_ALARMS)?);
        if alarms.contains(Alarms::PWM_ERROR) {
            let _ = self.io.write_one(STATUS_ALARMS, Alarms::PWM_ERROR.bits());
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    pub fn rate_groups(&mut self) -> Result<u16> {
        self.io.read_one(SETUP_PWM_RATES)
    }

    /// Bitmask of the channels sharing a rate group with `group`.
    pub fn rate_group(&mut self, group: usize) -> Result<u16> {
        if group >= self.max_actuators {
            return Err(Error::InvalidArgument);
        }
        self.io.read_one(PWM_INFO_RATE_MAP.add(group as u8))
    }

    // ── PWM tables ────────────────────────────────────────────────────────
    //
    // The mixer owns these tables. Failsafe and disarmed values are also
    // pushed to the coprocessor; limits and trims only concern the mixer.

    fn update_tables<M: MixerTables>(
        &self,
        mixer: &mut M,
        f: impl FnOnce(&mut PwmTables, usize) -> Result<()>,
    ) -> Result<PwmTables> {
        let mut tables = mixer.tables();
        f(&mut tables, self.max_actuators)?;
        mixer.set_tables(&tables);
        Ok(tables)
    }

    fn column<T: Copy>(&self, table: &[T; MAX_ACTUATORS]) -> Vec<T, MAX_ACTUATORS> {
        table[..self.max_actuators].iter().copied().collect()
    }

    pub fn set_failsafe_pwm<M: MixerTables>(&mut self, mixer: &mut M, values: &[u16]) -> Result<()> {
        let tables = self.update_tables(mixer, |t, n| t.set_failsafe(values, n))?;
        let n = self.max_actuators;
        self.io.write_block(RegisterAddress::new(PAGE_FAILSAFE_PWM, 0), &tables.failsafe[..n])
    }

    /// Failsafe values as the coprocessor holds them.
    pub fn failsafe_pwm(&mut self) -> Result<Vec<u16, MAX_ACTUATORS>> {
        let mut buf = [0u16; MAX_ACTUATORS];
        let n = self.max_actuators;
        self.io.read_block(RegisterAddress::new(PAGE_FAILSAFE_PWM, 0), &mut buf[..n])?;
        Ok(buf[..n].iter().copied().collect())
    }

    pub fn set_disarmed_pwm<M: MixerTables>(&mut self, mixer: &mut M, values: &[u16]) -> Result<()> {
        let tables = self.update_tables(mixer, |t, n| t.set_disarmed(values, n))?;
        let n = self.max_actuators;
        self.io.write_block(RegisterAddress::new(PAGE_DISARMED_PWM, 0), &tables.disarmed[..n])
    }

    pub fn disarmed_pwm<M: MixerTables>(&self, mixer: &M) -> Vec<u16, MAX_ACTUATORS> {
        self.column(&mixer.tables().disarmed)
    }

    pub fn set_min_pwm<M: MixerTables>(&self, mixer: &mut M, values: &[u16]) -> Result<()> {
        self.update_tables(mixer, |t, n| t.set_min(values, n)).map(|_| ())
    }

    pub fn min_pwm<M: MixerTables>(&self, mixer: &M) -> Vec<u16, MAX_ACTUATORS> {
        self.column(&mixer.tables().min)
    }

    pub fn set_max_pwm<M: MixerTables>(&self, mixer: &mut M, values: &[u16]) -> Result<()> {
        self.update_tables(mixer, |t, n| t.set_max(values, n)).map(|_| ())
    }

    pub fn max_pwm<M: MixerTables>(&self, mixer: &M) -> Vec<u16, MAX_ACTUATORS> {
        self.column(&mixer.tables().max)
    }

    pub fn set_trim_pwm<M: MixerTables>(&self, mixer: &mut M, values: &[i16]) -> Result<()> {
        self.update_tables(mixer, |t, n| t.set_trim(values, n)).map(|_| ())
    }

    pub fn trim_pwm<M: MixerTables>(&self, mixer: &M) -> Vec<i16, MAX_ACTUATORS> {
        self.column(&mixer.tables().trim)
    }

    pub fn channel_count(&self) -> usize {
        self.max_actuators
    }

    // ── Direct outputs ────────────────────────────────────────────────────

    /// Drive one output directly. 0 turns it off.
    pub fn set_servo(&mut self, channel: usize, value: u16) -> Result<()> {
        if channel >= self.max_actuators {
            return Err(Error::InvalidArgument);
        }
        if value != 0 && !(PWM_LOWEST_MIN..=PWM_HIGHEST_MAX).contains(&value) {
            return Err(Error::InvalidArgument);
        }
        self.io.write_one(RegisterAddress::new(PAGE_DIRECT_PWM, channel as u8), value)
    }

    /// Output currently driven on `channel`.
    pub fn servo(&mut self, channel: usize) -> Result<u16> {
        if channel >= self.max_actuators {
            return Err(Error::InvalidArgument);
        }
        self.io.read_one(RegisterAddress::new(PAGE_SERVOS, channel as u8))
    }

    /// Reset every direct output to the coprocessor's disarmed value, as a
    /// starting point for output tests.
    pub fn reset_servos_to_disarmed(&mut self) -> Result<()> {
        let mut buf = [0u16; MAX_ACTUATORS];
        let n = self.max_actuators;
        self.io.read_block(RegisterAddress::new(PAGE_DISARMED_PWM, 0), &mut buf[..n])?;
        self.io.write_block(RegisterAddress::new(PAGE_DIRECT_PWM, 0), &buf[..n])
    }

    // ── Receiver ──────────────────────────────────────────────────────────

    /// Put a DSM receiver into bind mode. `pulses` selects the protocol:
    /// 3 DSM2, 7 DSMX, 9 DSMX8.
    pub async fn start_bind<C: Clock>(&mut self, clock: &mut C, pulses: u8) -> Result<()> {
        if !matches!(pulses, DSM2_BIND_PULSES | DSMX_BIND_PULSES | DSMX8_BIND_PULSES) {
            return Err(Error::InvalidArgument);
        }
        if self.status.flags().contains(StatusFlags::SAFETY_OFF) {
            log_warn!("bind rejected, safety is off");
            return Err(Error::SafetyOff);
        }

        log_info!("binding DSM receiver, {} pulses", pulses);
        self.io.write_one(SETUP_DSM, DSM_BIND_POWER_DOWN)?;
        clock.delay(BIND_POWER_DOWN_TIME).await;
        self.io.write_one(SETUP_DSM, DSM_BIND_SET_RX_OUT)?;
        self.io.write_one(SETUP_DSM, DSM_BIND_POWER_UP)?;
        clock.delay(BIND_POWER_UP_TIME).await;
        self.io.write_one(SETUP_DSM, DSM_BIND_SEND_PULSES | u16::from(pulses) << 4)?;
        clock.delay(BIND_PULSE_TIME).await;
        self.io.write_one(SETUP_DSM, DSM_BIND_REINIT_UART)
    }

    /// Power the receiver back up, ending a bind.
    pub fn stop_bind(&mut self) -> Result<()> {
        self.io.write_one(SETUP_DSM, DSM_BIND_POWER_UP)
    }

    pub fn set_rssi_analog(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.modify_features(FeatureFlags::empty(), FeatureFlags::ADC_RSSI)
        } else {
            self.modify_features(FeatureFlags::ADC_RSSI, FeatureFlags::empty())
        }
    }

    pub fn set_rssi_pwm(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.modify_features(FeatureFlags::empty(), FeatureFlags::PWM_RSSI)
        } else {
            self.modify_features(FeatureFlags::PWM_RSSI, FeatureFlags::empty())
        }
    }

    // ── SBUS output ───────────────────────────────────────────────────────

    pub fn set_sbus_rate(&mut self, hz: u16) -> Result<()> {
        self.io.write_one(SETUP_SBUS_RATE, hz)
    }

    pub fn set_sbus_output(&mut self, output: SbusOutput) -> Result<()> {
        match output {
            SbusOutput::Sbus1 => self.modify_features(FeatureFlags::empty(), FeatureFlags::SBUS1_OUT),
            SbusOutput::Sbus2 => self.modify_features(FeatureFlags::empty(), FeatureFlags::SBUS2_OUT),
            SbusOutput::Disabled => {
                self.modify_features(FeatureFlags::SBUS1_OUT | FeatureFlags::SBUS2_OUT, FeatureFlags::empty())
            }
        }
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    pub fn set_debug(&mut self, level: u16) -> Result<()> {
        self.io.write_one(SETUP_SET_DEBUG, level)
    }

    /// Reboot the coprocessor into its bootloader. The coprocessor resets
    /// before answering, so a failed write is not an error.
    pub fn reboot_bootloader(&mut self) -> Result<()> {
        if self.status.flags().contains(StatusFlags::SAFETY_OFF) {
            return Err(Error::SafetyOff);
        }
        let _ = self.io.write_one(SETUP_REBOOT_BL, REBOOT_BL_MAGIC);
        Ok(())
    }

    /// Compare the coprocessor's firmware CRC with `expected`.
    pub fn check_crc(&mut self, expected: u32) -> Result<()> {
        let mut words = [0u16; 2];
        self.io.read(SETUP_CRC, &mut words)?;
        let found = u32::from(words[0]) | u32::from(words[1]) << 16;
        if found != expected {
            log_warn!("firmware CRC mismatch: {} != {}", found, expected);
            return Err(Error::CrcMismatch { expected, found });
        }
        Ok(())
    }
}
