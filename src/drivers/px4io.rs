//! The coprocessor driver: start-up, in-air restart recovery and the
//! periodic cycle. Caller-facing operations live in `control.rs`.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::drivers::outputs::{OutputCache, FULL_REFRESH_WINDOW};
use crate::drivers::rc_input::{RcDecoder, RAW_RC_REGS};
use crate::drivers::status::{ArmingSync, SafetyMonitor, StatusSync, SyncAction};
use crate::drivers::transport::{Link, RegisterTransport};
use crate::error::{Error, RecoveryStage, Result};
use crate::host::{Clock, IoHost, MixerTables};
use crate::log::{log_debug, log_error, log_info, log_warn};
use crate::registers::*;
use crate::state::{ActuatorArmed, ConfigSnapshot, IoStatus, RestartReason, SafetyState, VehicleCommand};

// ── Timing ────────────────────────────────────────────────────────────────────

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const STATUS_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

const PROBE_WINDOW: Duration = Duration::from_millis(700);
const PROBE_RETRY: Duration = Duration::from_millis(2);

const ARMING_FEED_TIMEOUT: Duration = Duration::from_secs(3);
const RECOVERY_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const RECOVERY_RESEND_INTERVAL: Duration = Duration::from_millis(50);

// ── Config sanity bounds ──────────────────────────────────────────────────────

/// Framing bytes counted in the advertised max transfer.
const TRANSFER_OVERHEAD: u16 = 2;
const TRANSFER_LIMIT_RANGE: core::ops::RangeInclusive<usize> = 16..=255;
const ACTUATOR_COUNT_RANGE: core::ops::RangeInclusive<usize> = 1..=MAX_ACTUATORS;
const RC_INPUT_COUNT_RANGE: core::ops::RangeInclusive<usize> = 1..=255;

// RC config defaults (µs)
const RC_DEFAULT_MIN: u16 = 1000;
const RC_DEFAULT_CENTER: u16 = 1500;
const RC_DEFAULT_MAX: u16 = 2000;

/// Per-instance driver options.
#[derive(Clone, Copy, Debug)]
pub struct Px4IoConfig {
    /// Leave RC decoding to someone else; the coprocessor ignores its
    /// receiver input.
    pub rc_handling_disabled: bool,
    pub poll_interval: Duration,
    pub full_refresh_window: Duration,
    pub status_publish_interval: Duration,
}

impl Default for Px4IoConfig {
    fn default() -> Self {
        Self {
            rc_handling_disabled: false,
            poll_interval: POLL_INTERVAL,
            full_refresh_window: FULL_REFRESH_WINDOW,
            status_publish_interval: STATUS_PUBLISH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    Uninitialized,
    Running,
    Stopped,
}

pub struct Px4Io<L: Link> {
    pub(super) io: RegisterTransport<L>,
    config: Px4IoConfig,
    state: DriverState,

    hardware_version: u16,
    bootloader_version: u16,
    max_controls: u16,
    pub(super) max_actuators: usize,
    max_rc_input: usize,
    pub(super) rc_handling_disabled: bool,

    pub(super) status: StatusSync,
    safety: SafetyMonitor,
    pub(super) arming: ArmingSync,
    alarms: Alarms,
    setup_arming: ArmingFlags,
    last_poll: Option<Instant>,
    last_status_publish: Option<Instant>,

    rc: RcDecoder,
    raw_rc: Vec<u16, RC_INPUT_MAX_CHANNELS>,

    outputs: OutputCache,

    armed: ActuatorArmed,
    params: ConfigSnapshot,
    param_update_force: bool,
    thermal_control: Option<i32>,
}

impl<L: Link> Px4Io<L> {
    pub fn new(link: L, config: Px4IoConfig) -> Self {
        Self {
            io: RegisterTransport::new(link),
            config,
            state: DriverState::Uninitialized,
            hardware_version: 0,
            bootloader_version: 0,
            max_controls: 0,
            max_actuators: 0,
            max_rc_input: 0,
            rc_handling_disabled: config.rc_handling_disabled,
            status: StatusSync::new(),
            safety: SafetyMonitor::new(),
            arming: ArmingSync::new(),
            alarms: Alarms::empty(),
            setup_arming: ArmingFlags::empty(),
            last_poll: None,
            last_status_publish: None,
            rc: RcDecoder::new(),
            raw_rc: Vec::new(),
            outputs: OutputCache::new(config.full_refresh_window),
            armed: ActuatorArmed::default(),
            params: ConfigSnapshot::default(),
            param_update_force: false,
            thermal_control: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn hardware_version(&self) -> u16 {
        self.hardware_version
    }

    pub fn bootloader_version(&self) -> u16 {
        self.bootloader_version
    }

    pub fn max_controls(&self) -> u16 {
        self.max_controls
    }

    pub fn max_rc_inputs(&self) -> usize {
        self.max_rc_input
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn transfer_limit(&self) -> usize {
        self.io.transfer_limit()
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.status.flags()
    }

    pub fn alarms(&self) -> Alarms {
        self.alarms
    }

    pub fn safety(&self) -> SafetyState {
        self.safety.state()
    }

    pub fn armed(&self) -> ActuatorArmed {
        self.armed
    }

    pub fn link(&self) -> &L {
        self.io.link()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.io.link_mut()
    }

    // ── Start-up ──────────────────────────────────────────────────────────

    /// Bring the coprocessor link up. On success the driver is running and
    /// the next [`cycle`](Self::cycle) pushes configuration.
    ///
    /// # Errors
    ///
    /// `Link` if the coprocessor never answers, `ProtocolMismatch`,
    /// `ConfigOutOfRange` (the coprocessor is sent to its bootloader), or
    /// `RecoveryTimeout` when an in-air restart could not be resumed.
    pub async fn init<H: IoHost>(&mut self, host: &mut H) -> Result<()> {
        if host.restart_reason() != Some(RestartReason::PowerOn) {
            record_restart_reason(host, RestartReason::Volatile);
        }

        self.probe(host).await?;
        self.read_io_config()?;
        self.params = host.config();

        let arming = ArmingFlags::from_bits_retain(self.io.read_one(SETUP_ARMING)?);
        self.setup_arming = arming;

        if arming.contains(ArmingFlags::INAIR_RESTART_OK | ArmingFlags::FMU_ARMED) {
            // Status first, so safety and lockdown are known before re-arming.
            if let Err(e) = self.poll_status(host) {
                log_warn!("status poll before recovery failed: {:?}", e);
            }
            self.recover_in_air(host, arming).await?;
        } else {
            self.io.modify(
                SETUP_ARMING,
                (ArmingFlags::FMU_ARMED | ArmingFlags::INAIR_RESTART_OK | ArmingFlags::LOCKDOWN).bits(),
                0,
            )?;

            if self.rc_handling_disabled {
                self.disable_rc_handling()?;
            } else {
                self.upload_rc_config()?;
            }

            record_restart_reason(host, RestartReason::PowerOn);
            log_info!("coprocessor hw {} bl {}, cold boot", self.hardware_version, self.bootloader_version);
        }

        if self.params.cb_io_safety {
            if let Err(e) = self.io.write_one(SETUP_FORCE_SAFETY_OFF, FORCE_SAFETY_MAGIC) {
                log_warn!("force safety off failed: {:?}", e);
            }
        }

        self.push_tables(&*host);

        self.state = DriverState::Running;
        self.param_update_force = true;
        Ok(())
    }

    async fn probe<C: Clock>(&mut self, clock: &mut C) -> Result<()> {
        let start = clock.now();
        loop {
            clock.delay(PROBE_RETRY).await;
            match self.io.read_one(CONFIG_PROTOCOL_VERSION) {
                Ok(PROTOCOL_VERSION) => return Ok(()),
                Ok(found) => {
                    log_error!("protocol version {} does not match {}", found, PROTOCOL_VERSION);
                    return Err(Error::ProtocolMismatch { found });
                }
                Err(e) => {
                    if clock.now().saturating_duration_since(start) >= PROBE_WINDOW {
                        log_error!("coprocessor not responding: {:?}", e);
                        return Err(e);
                    }
                }
            }
        }
    }

    fn read_io_config(&mut self) -> Result<()> {
        let mut regs = [0u16; CONFIG_BLOCK_LEN];
        self.io.read(CONFIG_PROTOCOL_VERSION, &mut regs)?;
        let reg = |address: RegisterAddress| regs[usize::from(address.offset)];

        self.hardware_version = reg(CONFIG_HARDWARE_VERSION);
        self.bootloader_version = reg(CONFIG_BOOTLOADER_VERSION);
        self.max_controls = reg(CONFIG_CONTROL_COUNT);
        let transfer_limit = usize::from(reg(CONFIG_MAX_TRANSFER).saturating_sub(TRANSFER_OVERHEAD));
        let actuators = usize::from(reg(CONFIG_ACTUATOR_COUNT));
        let rc_inputs = usize::from(reg(CONFIG_RC_INPUT_COUNT));

        if !ACTUATOR_COUNT_RANGE.contains(&actuators)
            || !TRANSFER_LIMIT_RANGE.contains(&transfer_limit)
            || !RC_INPUT_COUNT_RANGE.contains(&rc_inputs)
        {
            log_error!(
                "config out of range: {} actuators, {} byte transfers, {} rc inputs",
                actuators,
                transfer_limit,
                rc_inputs
            );
            // Park the coprocessor in its bootloader so new firmware can be loaded.
            let _ = self.io.write_one(SETUP_FORCE_SAFETY_ON, FORCE_SAFETY_MAGIC);
            let _ = self.io.write_one(SETUP_REBOOT_BL, REBOOT_BL_MAGIC);
            return Err(Error::ConfigOutOfRange);
        }

        self.max_actuators = actuators;
        self.max_rc_input = rc_inputs.min(RC_INPUT_MAX_CHANNELS);
        self.io.set_transfer_limit(transfer_limit);
        Ok(())
    }

    /// The coprocessor kept the vehicle armed while we restarted. Get the
    /// commander back into the same state without touching the outputs.
    async fn recover_in_air<H: IoHost>(&mut self, host: &mut H, arming: ArmingFlags) -> Result<()> {
        log_warn!("coprocessor armed at start-up, recovering in-air restart");
        let entry = host.now();

        let mut armed = match host.wait_armed(entry + ARMING_FEED_TIMEOUT).await {
            Some(armed) => armed,
            None => {
                log_error!("no arming state within {} ms", ARMING_FEED_TIMEOUT.as_millis());
                return Err(Error::RecoveryTimeout(RecoveryStage::ArmingFeed));
            }
        };

        let deadline = entry + RECOVERY_COMMAND_TIMEOUT;

        if arming.contains(ArmingFlags::FORCE_FAILSAFE) {
            log_warn!("coprocessor in forced failsafe, requesting flight termination");
            await_feed(
                host,
                deadline,
                &mut armed,
                |a| a.force_failsafe,
                VehicleCommand::FlightTermination,
                RecoveryStage::FlightTermination,
            )
            .await?;
        }

        await_feed(
            host,
            deadline,
            &mut armed,
            |a| a.armed,
            VehicleCommand::Arm { in_air_restore: true },
            RecoveryStage::Arm,
        )
        .await?;

        self.armed = armed;
        record_restart_reason(host, RestartReason::InFlight);
        log_info!("in-air restart recovered");
        Ok(())
    }

    /// Write one stride block per RC input. Stops early, without failing,
    /// when the coprocessor drops INIT_OK.
    pub(super) fn upload_rc_config(&mut self) -> Result<()> {
        for input in 0..self.max_rc_input {
            let channel = self.params.rc_channels[input];
            let mut options = RcConfigOptions::empty();
            options.set(RcConfigOptions::ENABLED, channel.enabled);
            options.set(RcConfigOptions::REVERSE, channel.reversed);

            let mut block = [0u16; RC_CONFIG_STRIDE];
            block[usize::from(RC_CONFIG_MIN)] = RC_DEFAULT_MIN;
            block[usize::from(RC_CONFIG_CENTER)] = RC_DEFAULT_CENTER;
            block[usize::from(RC_CONFIG_MAX)] = RC_DEFAULT_MAX;
            block[usize::from(RC_CONFIG_DEADZONE)] = 0;
            block[usize::from(RC_CONFIG_ASSIGNMENT)] = RC_ASSIGNMENT_NONE;
            block[usize::from(RC_CONFIG_OPTIONS)] = options.bits();

            let offset = (input * RC_CONFIG_STRIDE) as u8;
            self.io.write(RegisterAddress::new(PAGE_RC_CONFIG, offset), &block)?;

            let flags = StatusFlags::from_bits_retain(self.io.read_one(STATUS_FLAGS)?);
            if !flags.contains(StatusFlags::INIT_OK) {
                log_warn!("RC{} config rejected", input + 1);
                break;
            }
        }
        Ok(())
    }

    /// The mixer's disarmed and failsafe values, best effort.
    fn push_tables<M: MixerTables>(&mut self, mixer: &M) {
        let tables = mixer.tables();
        let n = self.max_actuators;
        if let Err(e) = self.io.write_block(RegisterAddress::new(PAGE_DISARMED_PWM, 0), &tables.disarmed[..n]) {
            log_warn!("disarmed table push failed: {:?}", e);
        }
        if let Err(e) = self.io.write_block(RegisterAddress::new(PAGE_FAILSAFE_PWM, 0), &tables.failsafe[..n]) {
            log_warn!("failsafe table push failed: {:?}", e);
        }
    }

    /// Best-effort disarm; the driver stops cycling afterwards.
    pub fn stop(&mut self) {
        if self.state == DriverState::Running {
            if let Err(e) = self.io.modify(SETUP_ARMING, ArmingFlags::FMU_ARMED.bits(), 0) {
                log_warn!("disarm on stop failed: {:?}", e);
            }
        }
        self.state = DriverState::Stopped;
    }

    // ── Cycle ─────────────────────────────────────────────────────────────

    /// One scheduler pass: outputs, then status and RC, then arming, then
    /// configuration (disarmed only). Link errors are logged and retried
    /// on a later pass; an arming write keeps being retried until it lands.
    pub async fn cycle<H: IoHost>(&mut self, host: &mut H) {
        if self.state != DriverState::Running {
            return;
        }
        let now = host.now();

        let mut outputs = [0u16; MAX_ACTUATORS];
        if let Some(count) = host.take_outputs(&mut outputs) {
            let count = count.min(self.max_actuators);
            self.update_outputs(now, &outputs[..count]);
        }

        let poll_due = self
            .last_poll
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.poll_interval);
        if poll_due {
            self.last_poll = Some(now);
            if let Err(e) = self.poll_status(host) {
                log_warn!("status poll failed: {:?}", e);
            }
            if let Err(e) = self.poll_rc(host) {
                log_debug!("rc poll failed: {:?}", e);
            }
        }

        if let Some(armed) = host.poll_armed() {
            self.armed = armed;
            self.arming.update(&armed);
            self.push_tables(&*host);
        }
        self.apply_arming();

        if !self.armed.armed {
            if let Some(VehicleCommand::StartRxPair { receiver: 0, mode }) = host.poll_command() {
                let pulses = match mode {
                    0 => DSM2_BIND_PULSES,
                    1 => DSMX_BIND_PULSES,
                    _ => DSMX8_BIND_PULSES,
                };
                if let Err(e) = self.start_bind(host, pulses).await {
                    log_warn!("bind request failed: {:?}", e);
                }
            }

            let params_updated = host.poll_params();
            if params_updated || self.param_update_force {
                self.param_update_force = false;
                self.apply_params(host);
            }
        }
    }

    fn update_outputs(&mut self, now: Instant, outputs: &[u16]) {
        let plan = self.outputs.plan(now, outputs);
        for &(start, end) in plan.runs.iter() {
            let address = RegisterAddress::new(PAGE_DIRECT_PWM, start as u8);
            if let Err(e) = self.io.write_block(address, &outputs[start..end]) {
                log_debug!("output write failed: {:?}", e);
            }
        }
    }

    /// Write the pending arming pair, if any. A failed write stays pending
    /// for the next cycle.
    fn apply_arming(&mut self) {
        let Some((set, clear)) = self.arming.pending() else {
            return;
        };
        match self.io.modify(SETUP_ARMING, clear.bits(), set.bits()) {
            Ok(()) => self.arming.mark_written(set, clear),
            Err(e) => log_warn!("arming update failed: {:?}", e),
        }
    }

    fn apply_params<H: IoHost>(&mut self, host: &mut H) {
        self.params = host.config();

        if !self.rc_handling_disabled {
            if let Err(e) = self.upload_rc_config() {
                log_warn!("rc config upload failed: {:?}", e);
            }
        }

        if self.params.cb_io_safety {
            if let Err(e) = self.io.write_one(SETUP_FORCE_SAFETY_OFF, FORCE_SAFETY_MAGIC) {
                log_warn!("force safety off failed: {:?}", e);
            }
        }

        let termination = u16::from(!self.params.cb_flight_termination);
        if let Err(e) = self.io.write_one(SETUP_ENABLE_FLIGHTTERMINATION, termination) {
            log_warn!("flight termination setup failed: {:?}", e);
        }

        if let Some(thermal) = self.params.thermal_control {
            if self.thermal_control != Some(thermal) {
                let value = if thermal < 0 { THERMAL_IGNORE } else { THERMAL_OFF };
                match self.io.write_one(SETUP_THERMAL, value) {
                    Ok(()) => self.thermal_control = Some(thermal),
                    Err(e) => log_warn!("thermal setup failed: {:?}", e),
                }
            }
        }

        if let Some(sbus) = self.params.sbus_output {
            if let Err(e) = self.set_sbus_output(sbus) {
                log_warn!("sbus setup failed: {:?}", e);
            }
        }
    }

    // ── Status ────────────────────────────────────────────────────────────

    fn poll_status<H: IoHost>(&mut self, host: &mut H) -> Result<()> {
        let mut regs = [0u16; STATUS_BLOCK_LEN];
        self.io.read(STATUS_FLAGS, &mut regs)?;
        let reg = |address: RegisterAddress| regs[usize::from(address.offset - STATUS_FLAGS.offset)];

        let now = host.now();
        let fresh = StatusFlags::from_bits_retain(reg(STATUS_FLAGS));
        let alarms = Alarms::from_bits_retain(reg(STATUS_ALARMS));
        let servo_rail_mv = reg(STATUS_VSERVO);
        let rssi_mv = reg(STATUS_VRSSI);

        let previous = self.status.flags();
        self.handle_status(host, now, fresh);
        self.rc.analog_rssi_mut().update(rssi_mv);

        let arming = self
            .io
            .read_one(SETUP_ARMING)
            .map(ArmingFlags::from_bits_retain)
            .unwrap_or(self.setup_arming);

        let due = self
            .last_status_publish
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.status_publish_interval);
        if due || fresh != previous || alarms != self.alarms || arming != self.setup_arming {
            let report = self.status_report(now, fresh, alarms, arming, servo_rail_mv, rssi_mv);
            host.publish_status(&report);
            self.last_status_publish = Some(now);
        }

        self.alarms = alarms;
        self.setup_arming = arming;
        Ok(())
    }

    fn handle_status<H: IoHost>(&mut self, host: &mut H, now: Instant, fresh: StatusFlags) {
        let action = self.status.handle(fresh);
        if action == SyncAction::RestoreSafetyOff {
            log_warn!("coprocessor reset with safety off, restoring");
        }
        if action != SyncAction::None {
            if let Err(e) = self.io.modify(STATUS_FLAGS, 0, action.set_bits().bits()) {
                log_warn!("status sync write failed: {:?}", e);
            }
        }

        if let Some(safety) = self.safety.update(now, fresh.contains(StatusFlags::SAFETY_OFF)) {
            host.publish_safety(&safety);
        }
    }

    fn status_report(
        &mut self,
        now: Instant,
        flags: StatusFlags,
        alarms: Alarms,
        arming: ArmingFlags,
        servo_rail_mv: u16,
        rssi_mv: u16,
    ) -> IoStatus {
        let mut servos = Vec::new();
        let mut buf = [0u16; MAX_ACTUATORS];
        let n = self.max_actuators;
        if self.io.read_block(RegisterAddress::new(PAGE_SERVOS, 0), &mut buf[..n]).is_ok() {
            let _ = servos.extend_from_slice(&buf[..n]);
        }

        IoStatus {
            timestamp: now,
            flags,
            alarms,
            arming,
            free_memory: self.io.read_one(STATUS_FREEMEM).unwrap_or(0),
            servo_rail_mv,
            rssi_mv,
            servos,
            raw_inputs: self.raw_rc.clone(),
        }
    }

    // ── RC input ──────────────────────────────────────────────────────────

    fn poll_rc<H: IoHost>(&mut self, host: &mut H) -> Result<()> {
        let mut regs = [0u16; RAW_RC_REGS];
        let first = RAW_RC_PROLOG + RAW_RC_FIRST_CHANNELS;
        self.io.read_block(RAW_RC_COUNT, &mut regs[..first])?;

        let count = RcDecoder::channel_count(&regs);
        if count > RAW_RC_FIRST_CHANNELS {
            let rest = RAW_RC_BASE.add(RAW_RC_FIRST_CHANNELS as u8);
            self.io.read_block(rest, &mut regs[first..RAW_RC_PROLOG + count])?;
        }

        self.raw_rc.clear();
        let _ = self.raw_rc.extend_from_slice(&regs[RAW_RC_PROLOG..RAW_RC_PROLOG + count]);

        if let Some(frame) = self.rc.decode(host.now(), self.status.flags(), &regs, &self.params.rssi_pwm) {
            host.publish_rc(&frame);
        }
        Ok(())
    }
}

/// Resend `command` every [`RECOVERY_RESEND_INTERVAL`] until the arming
/// feed satisfies `done`, or fail at `deadline`.
async fn await_feed<H: IoHost>(
    host: &mut H,
    deadline: Instant,
    armed: &mut ActuatorArmed,
    done: impl Fn(&ActuatorArmed) -> bool,
    command: VehicleCommand,
    stage: RecoveryStage,
) -> Result<()> {
    host.send_command(command);
    loop {
        let tick = (host.now() + RECOVERY_RESEND_INTERVAL).min(deadline);
        while let Some(update) = host.wait_armed(tick).await {
            *armed = update;
            if done(armed) {
                return Ok(());
            }
        }
        if done(armed) {
            return Ok(());
        }
        if host.now() >= deadline {
            log_error!("in-air recovery timed out: {:?}", stage);
            return Err(Error::RecoveryTimeout(stage));
        }
        log_debug!("re-sending {:?}", command);
        host.send_command(command);
    }
}

fn record_restart_reason<H: IoHost>(host: &mut H, reason: RestartReason) {
    if host.restart_reason() != Some(reason) && !host.set_restart_reason(reason) {
        log_warn!("could not store restart reason {:?}", reason);
    }
}
