use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::peripherals::{self, PC13, USART6};
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{self, UartRx, UartTx};
use embassy_stm32::{bind_interrupts, Config};

/// Serial link to the coprocessor.
const IO_BAUDRATE: u32 = 1_500_000;

bind_interrupts!(struct Irqs {
    USART6 => usart::InterruptHandler<peripherals::USART6>;
});

/// FMU peripherals this firmware uses.
pub struct Board {
    pub io_tx: UartTx<'static, USART6>,
    pub io_rx: UartRx<'static, USART6>,
    pub led: Output<'static, PC13>,
}

#[derive(Debug, defmt::Format)]
pub enum BoardError {
    /// Baud rate not reachable from the APB2 clock.
    IoUart,
}

impl Board {
    pub fn init() -> Result<Self, BoardError> {
        let p = embassy_stm32::init(clock_config());

        // USART6 on APB2 (84 MHz): TX=PC6, RX=PC7
        let mut uart_config = usart::Config::default();
        uart_config.baudrate = IO_BAUDRATE;
        let uart = usart::Uart::new(p.USART6, p.PC7, p.PC6, Irqs, NoDma, NoDma, uart_config)
            .map_err(|_| BoardError::IoUart)?;
        let (io_tx, io_rx) = uart.split();

        Ok(Self {
            io_tx,
            io_rx,
            led: Output::new(p.PC13, Level::High, Speed::Low),
        })
    }
}

/// 8 MHz crystal, PLL to a 168 MHz core. No USB, so PLLQ stays off.
fn clock_config() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse { freq: Hertz(8_000_000), mode: HseMode::Oscillator });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL168,
        divp: Some(PllPDiv::DIV2),
        divq: None,
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config
}
