#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embassy_time::{Duration, Instant};

use px4io_driver_rust::registers::*;
use px4io_driver_rust::state::{
    ActuatorArmed, ConfigSnapshot, IoStatus, RcFrame, RestartReason, SafetyState, VehicleCommand,
};
use px4io_driver_rust::{Clock, IoHost, Link, LinkFault, MixerTables, Px4Io, Px4IoConfig, PwmTables};

// ── Simulated coprocessor ─────────────────────────────────────────────────────

/// Register space of a simulated coprocessor, with a log of every write.
#[derive(Default)]
pub struct RegisterFile {
    regs: HashMap<u16, u16>,
    pub writes: Vec<(RegisterAddress, Vec<u16>)>,
    pub reads: Vec<(RegisterAddress, usize)>,
    /// Every transaction times out while set.
    pub offline: bool,
    /// Status flags to report after an RC config block lands.
    pub rc_config_status: Option<StatusFlags>,
    /// Raise PWM_ERROR on any rate group selection.
    pub reject_rate_groups: bool,
}

impl RegisterFile {
    /// A healthy coprocessor: protocol 4, 8 outputs, 18 RC inputs.
    pub fn px4io_default() -> Self {
        let mut file = Self::default();
        file.set(CONFIG_PROTOCOL_VERSION, PROTOCOL_VERSION);
        file.set(CONFIG_HARDWARE_VERSION, 2);
        file.set(CONFIG_BOOTLOADER_VERSION, 3);
        file.set(CONFIG_MAX_TRANSFER, 64);
        file.set(CONFIG_CONTROL_COUNT, 8);
        file.set(CONFIG_ACTUATOR_COUNT, 8);
        file.set(CONFIG_RC_INPUT_COUNT, 18);
        file.set(STATUS_FLAGS, (StatusFlags::INIT_OK | StatusFlags::FMU_OK).bits());
        file
    }

    pub fn get(&self, address: RegisterAddress) -> u16 {
        self.regs.get(&address.linear()).copied().unwrap_or(0)
    }

    pub fn set(&mut self, address: RegisterAddress, value: u16) {
        self.regs.insert(address.linear(), value);
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }

    /// Writes whose first register is `address`.
    pub fn writes_to(&self, address: RegisterAddress) -> Vec<Vec<u16>> {
        self.writes.iter().filter(|(a, _)| *a == address).map(|(_, v)| v.clone()).collect()
    }

    pub fn writes_to_page(&self, page: u8) -> Vec<(RegisterAddress, Vec<u16>)> {
        self.writes.iter().filter(|(a, _)| a.page == page).cloned().collect()
    }
}

fn address_of(linear: u16) -> RegisterAddress {
    RegisterAddress::new((linear >> 8) as u8, linear as u8)
}

#[derive(Clone)]
pub struct MockLink(pub Rc<RefCell<RegisterFile>>);

impl Link for MockLink {
    fn write(&mut self, address: u16, values: &[u16]) -> Result<usize, LinkFault> {
        let mut file = self.0.borrow_mut();
        if file.offline {
            return Err(LinkFault::Timeout);
        }
        let start = address_of(address);
        file.writes.push((start, values.to_vec()));
        if start == STATUS_ALARMS {
            // Write-one-to-clear.
            let alarms = file.get(STATUS_ALARMS) & !values[0];
            file.set(STATUS_ALARMS, alarms);
            return Ok(values.len());
        }
        for (i, &value) in values.iter().enumerate() {
            file.set(start.add(i as u8), value);
        }
        if start == SETUP_PWM_RATES && file.reject_rate_groups {
            let alarms = file.get(STATUS_ALARMS) | Alarms::PWM_ERROR.bits();
            file.set(STATUS_ALARMS, alarms);
        }
        if start.page == PAGE_RC_CONFIG {
            if let Some(flags) = file.rc_config_status {
                file.set(STATUS_FLAGS, flags.bits());
            }
        }
        Ok(values.len())
    }

    fn read(&mut self, address: u16, values: &mut [u16]) -> Result<usize, LinkFault> {
        let mut file = self.0.borrow_mut();
        if file.offline {
            return Err(LinkFault::Timeout);
        }
        let start = address_of(address);
        file.reads.push((start, values.len()));
        for (i, value) in values.iter_mut().enumerate() {
            *value = file.get(start.add(i as u8));
        }
        Ok(values.len())
    }
}

// ── Simulated vehicle ─────────────────────────────────────────────────────────

/// How the simulated commander answers recovery requests.
#[derive(Clone, Copy, Default)]
pub struct Commander {
    pub answers_termination: bool,
    pub answers_arm: bool,
    pub latency: Duration,
}

pub struct MockHost {
    pub now: Instant,
    pub delays: Vec<Duration>,

    pub outputs: Option<([u16; MAX_ACTUATORS], usize)>,
    pub tables: PwmTables,
    /// Arming updates, released once the clock reaches their timestamp.
    pub armed_updates: VecDeque<(Instant, ActuatorArmed)>,
    pub commander: Commander,
    commander_state: ActuatorArmed,

    pub params_changed: bool,
    pub config: ConfigSnapshot,
    pub restart_reason: Option<RestartReason>,

    pub commands_in: VecDeque<VehicleCommand>,
    pub commands_out: Vec<(Instant, VehicleCommand)>,

    pub safety: Vec<SafetyState>,
    pub rc: Vec<RcFrame>,
    pub status: Vec<IoStatus>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            now: Instant::from_millis(1_000),
            delays: Vec::new(),
            outputs: None,
            tables: PwmTables::default(),
            armed_updates: VecDeque::new(),
            commander: Commander::default(),
            commander_state: ActuatorArmed::default(),
            params_changed: false,
            config: ConfigSnapshot::default(),
            restart_reason: None,
            commands_in: VecDeque::new(),
            commands_out: Vec::new(),
            safety: Vec::new(),
            rc: Vec::new(),
            status: Vec::new(),
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }

    pub fn push_armed(&mut self, at: Instant, armed: ActuatorArmed) {
        self.commander_state = armed;
        self.armed_updates.push_back((at, armed));
    }

    pub fn set_outputs(&mut self, values: &[u16]) {
        let mut outputs = [0u16; MAX_ACTUATORS];
        outputs[..values.len()].copy_from_slice(values);
        self.outputs = Some((outputs, values.len()));
    }

    fn release_armed(&mut self, deadline: Instant) -> Option<ActuatorArmed> {
        match self.armed_updates.front() {
            Some(&(at, _)) if at <= deadline => {
                if at > self.now {
                    self.now = at;
                }
                self.armed_updates.pop_front().map(|(_, armed)| armed)
            }
            _ => None,
        }
    }
}

impl Clock for MockHost {
    fn now(&self) -> Instant {
        self.now
    }

    async fn delay(&mut self, duration: Duration) {
        self.delays.push(duration);
        self.now += duration;
    }
}

impl MixerTables for MockHost {
    fn tables(&self) -> PwmTables {
        self.tables
    }

    fn set_tables(&mut self, tables: &PwmTables) {
        self.tables = *tables;
    }
}

impl IoHost for MockHost {
    fn take_outputs(&mut self, outputs: &mut [u16; MAX_ACTUATORS]) -> Option<usize> {
        let (values, count) = self.outputs.take()?;
        *outputs = values;
        Some(count)
    }

    async fn wait_outputs(&mut self, deadline: Instant) {
        if self.outputs.is_none() && deadline > self.now {
            self.now = deadline;
        }
    }

    fn poll_armed(&mut self) -> Option<ActuatorArmed> {
        let now = self.now;
        self.release_armed(now)
    }

    async fn wait_armed(&mut self, deadline: Instant) -> Option<ActuatorArmed> {
        let update = self.release_armed(deadline);
        if update.is_none() && deadline > self.now {
            self.now = deadline;
        }
        update
    }

    fn poll_params(&mut self) -> bool {
        std::mem::take(&mut self.params_changed)
    }

    fn config(&self) -> ConfigSnapshot {
        self.config
    }

    fn restart_reason(&self) -> Option<RestartReason> {
        self.restart_reason
    }

    fn set_restart_reason(&mut self, reason: RestartReason) -> bool {
        self.restart_reason = Some(reason);
        true
    }

    fn poll_command(&mut self) -> Option<VehicleCommand> {
        self.commands_in.pop_front()
    }

    fn send_command(&mut self, command: VehicleCommand) {
        self.commands_out.push((self.now, command));
        let at = self.now + self.commander.latency;
        let mut next = self.commander_state;
        match command {
            VehicleCommand::FlightTermination if self.commander.answers_termination => next.force_failsafe = true,
            VehicleCommand::Arm { .. } if self.commander.answers_arm => next.armed = true,
            _ => return,
        }
        self.push_armed(at, next);
    }

    fn publish_safety(&mut self, safety: &SafetyState) {
        self.safety.push(*safety);
    }

    fn publish_rc(&mut self, frame: &RcFrame) {
        self.rc.push(*frame);
    }

    fn publish_status(&mut self, status: &IoStatus) {
        self.status.push(status.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub fn setup(file: RegisterFile) -> (Px4Io<MockLink>, Rc<RefCell<RegisterFile>>, MockHost) {
    setup_with(file, Px4IoConfig::default())
}

pub fn setup_with(
    file: RegisterFile,
    config: Px4IoConfig,
) -> (Px4Io<MockLink>, Rc<RefCell<RegisterFile>>, MockHost) {
    let file = Rc::new(RefCell::new(file));
    let io = Px4Io::new(MockLink(file.clone()), config);
    (io, file, MockHost::new())
}

/// A driver that already went through a cold boot, with the write log
/// cleared.
pub fn running() -> (Px4Io<MockLink>, Rc<RefCell<RegisterFile>>, MockHost) {
    let (mut io, file, mut host) = setup(RegisterFile::px4io_default());
    embassy_futures::block_on(io.init(&mut host)).expect("cold boot");
    file.borrow_mut().clear_log();
    (io, file, host)
}
