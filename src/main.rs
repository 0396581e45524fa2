#![no_std]
#![no_main]

mod board;
mod bridge;
mod uart_link;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use px4io_driver_rust::state::ConfigSnapshot;
use px4io_driver_rust::tasks::io_task::io_loop;
use px4io_driver_rust::{Px4Io, Px4IoConfig, SharedPx4Io};

use crate::board::Board;
use crate::bridge::FmuHost;
use crate::uart_link::UartLink;

type IoDriver = SharedPx4Io<CriticalSectionRawMutex, UartLink<'static>>;

static IO: StaticCell<IoDriver> = StaticCell::new();

#[embassy_executor::task]
async fn io_task(io: &'static IoDriver, mut host: FmuHost) {
    io_loop(io, &mut host).await;
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let Board { io_tx, io_rx, mut led } = match Board::init() {
        Ok(board) => board,
        Err(e) => defmt::panic!("board init failed: {}", e),
    };

    let mut px4io = Px4Io::new(UartLink::new(io_tx, io_rx), Px4IoConfig::default());
    let mut host = FmuHost::new(ConfigSnapshot::default());

    // Heartbeat: slow when the coprocessor is up, fast when it never came up.
    let blink = match px4io.init(&mut host).await {
        Ok(()) => {
            defmt::info!(
                "coprocessor up: hw {} bl {}, {} rc inputs",
                px4io.hardware_version(),
                px4io.bootloader_version(),
                px4io.max_rc_inputs()
            );
            let io = IO.init(Mutex::new(px4io));
            spawner.spawn(io_task(io, host)).unwrap();
            Duration::from_millis(500)
        }
        Err(e) => {
            // No outputs without a verified coprocessor.
            defmt::error!("coprocessor init failed: {}", e);
            Duration::from_millis(100)
        }
    };

    loop {
        led.toggle();
        Timer::after(blink).await;
    }
}
