use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;

use crate::drivers::px4io::Px4Io;
use crate::drivers::transport::Link;
use crate::error::Result;
use crate::host::{Clock, IoHost, MixerTables};

/// The driver behind the lock shared by the scheduler and control callers.
pub type SharedPx4Io<M, L> = Mutex<M, Px4Io<L>>;

/// Scheduler body. Wakes on new mixer outputs, or after the driver's poll
/// interval at the latest, and runs one cycle under the lock.
pub async fn io_loop<M: RawMutex, L: Link, H: IoHost>(io: &SharedPx4Io<M, L>, host: &mut H) -> ! {
    loop {
        step(io, host).await;
    }
}

/// A single wake-and-cycle of [`io_loop`].
pub async fn step<M: RawMutex, L: Link, H: IoHost>(io: &SharedPx4Io<M, L>, host: &mut H) {
    let interval = io.lock().await.poll_interval();
    let deadline = host.now() + interval;
    host.wait_outputs(deadline).await;
    io.lock().await.cycle(host).await;
}

/// Entry point for callers outside the scheduler. Every operation takes the
/// driver lock first, so it never interleaves with a cycle.
pub struct ControlHandle<'a, M: RawMutex, L: Link> {
    io: &'a SharedPx4Io<M, L>,
}

impl<'a, M: RawMutex, L: Link> ControlHandle<'a, M, L> {
    pub fn new(io: &'a SharedPx4Io<M, L>) -> Self {
        Self { io }
    }

    /// Run any driver operation under the lock.
    pub async fn with<R>(&self, f: impl FnOnce(&mut Px4Io<L>) -> R) -> R {
        let mut io = self.io.lock().await;
        f(&mut io)
    }

    pub async fn arm(&self) -> Result<()> {
        self.with(|io| io.arm()).await
    }

    pub async fn disarm(&self) -> Result<()> {
        self.with(|io| io.disarm()).await
    }

    pub async fn force_safety_off(&self) -> Result<()> {
        self.with(|io| io.force_safety_off()).await
    }

    pub async fn force_safety_on(&self) -> Result<()> {
        self.with(|io| io.force_safety_on()).await
    }

    pub async fn set_force_failsafe(&self, enabled: bool) -> Result<()> {
        self.with(|io| io.set_force_failsafe(enabled)).await
    }

    pub async fn set_failsafe_pwm<X: MixerTables>(&self, mixer: &mut X, values: &[u16]) -> Result<()> {
        self.with(|io| io.set_failsafe_pwm(mixer, values)).await
    }

    pub async fn set_disarmed_pwm<X: MixerTables>(&self, mixer: &mut X, values: &[u16]) -> Result<()> {
        self.with(|io| io.set_disarmed_pwm(mixer, values)).await
    }

    pub async fn check_crc(&self, expected: u32) -> Result<()> {
        self.with(|io| io.check_crc(expected)).await
    }

    pub async fn reboot_bootloader(&self) -> Result<()> {
        self.with(|io| io.reboot_bootloader()).await
    }

    pub async fn set_debug(&self, level: u16) -> Result<()> {
        self.with(|io| io.set_debug(level)).await
    }

    /// Bind holds the lock across its delays; the scheduler waits it out.
    pub async fn start_bind<C: Clock>(&self, clock: &mut C, pulses: u8) -> Result<()> {
        let mut io = self.io.lock().await;
        io.start_bind(clock, pulses).await
    }
}
