//! `IoHost` over embassy primitives. The rest of the firmware feeds the
//! driver through the `*_IN` statics and listens on the `*_OUT` ones.

use core::cell::Cell;
use core::future::Future;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use px4io_driver_rust::registers::MAX_ACTUATORS;
use px4io_driver_rust::state::{ActuatorArmed, ConfigSnapshot, IoStatus, RcFrame, RestartReason, SafetyState, VehicleCommand};
use px4io_driver_rust::{Clock, IoHost, MixerTables, PwmTables};

/// Mixer output, channel values plus count. Latest wins.
pub static OUTPUTS_IN: Signal<CriticalSectionRawMutex, ([u16; MAX_ACTUATORS], usize)> = Signal::new();
pub static ARMED_IN: Signal<CriticalSectionRawMutex, ActuatorArmed> = Signal::new();
pub static PARAMS_IN: Signal<CriticalSectionRawMutex, ConfigSnapshot> = Signal::new();
pub static COMMANDS_IN: Channel<CriticalSectionRawMutex, VehicleCommand, 4> = Channel::new();

/// Limits, trims and failsafe/disarmed values, shared with the mixer.
pub static MIXER_TABLES: Mutex<CriticalSectionRawMutex, Cell<PwmTables>> = Mutex::new(Cell::new(PwmTables::new()));

pub static COMMANDS_OUT: Channel<CriticalSectionRawMutex, VehicleCommand, 4> = Channel::new();
pub static SAFETY_OUT: Signal<CriticalSectionRawMutex, SafetyState> = Signal::new();
pub static RC_OUT: Signal<CriticalSectionRawMutex, RcFrame> = Signal::new();
pub static STATUS_OUT: Signal<CriticalSectionRawMutex, IoStatus> = Signal::new();

pub struct FmuHost {
    pending_outputs: Option<([u16; MAX_ACTUATORS], usize)>,
    config: ConfigSnapshot,
    restart_reason: Option<RestartReason>,
}

impl FmuHost {
    pub fn new(config: ConfigSnapshot) -> Self {
        Self { pending_outputs: None, config, restart_reason: None }
    }
}

impl Clock for FmuHost {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn delay(&mut self, duration: Duration) -> impl Future<Output = ()> {
        Timer::after(duration)
    }
}

impl MixerTables for FmuHost {
    fn tables(&self) -> PwmTables {
        MIXER_TABLES.lock(|tables| tables.get())
    }

    fn set_tables(&mut self, tables: &PwmTables) {
        MIXER_TABLES.lock(|cell| cell.set(*tables));
    }
}

impl IoHost for FmuHost {
    fn take_outputs(&mut self, outputs: &mut [u16; MAX_ACTUATORS]) -> Option<usize> {
        let (values, count) = self.pending_outputs.take().or_else(|| OUTPUTS_IN.try_take())?;
        *outputs = values;
        Some(count)
    }

    async fn wait_outputs(&mut self, deadline: Instant) {
        if self.pending_outputs.is_some() {
            return;
        }
        // `wait` consumes the signal; park the value for `take_outputs`.
        if let Either::First(outputs) = select(OUTPUTS_IN.wait(), Timer::at(deadline)).await {
            self.pending_outputs = Some(outputs);
        }
    }

    fn poll_armed(&mut self) -> Option<ActuatorArmed> {
        ARMED_IN.try_take()
    }

    async fn wait_armed(&mut self, deadline: Instant) -> Option<ActuatorArmed> {
        match select(ARMED_IN.wait(), Timer::at(deadline)).await {
            Either::First(armed) => Some(armed),
            Either::Second(()) => None,
        }
    }

    fn poll_params(&mut self) -> bool {
        match PARAMS_IN.try_take() {
            Some(config) => {
                self.config = config;
                true
            }
            None => false,
        }
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
        COMMANDS_IN.try_receive().ok()
    }

    fn send_command(&mut self, command: VehicleCommand) {
        if COMMANDS_OUT.try_send(command).is_err() {
            defmt::warn!("command queue full, dropped {}", command);
        }
    }

    fn publish_safety(&mut self, safety: &SafetyState) {
        SAFETY_OUT.signal(*safety);
    }

    fn publish_rc(&mut self, frame: &RcFrame) {
        RC_OUT.signal(*frame);
    }

    fn publish_status(&mut self, status: &IoStatus) {
        STATUS_OUT.signal(status.clone());
    }
}
