use embassy_stm32::peripherals::USART6;
use embassy_stm32::usart::{UartRx, UartTx};
use embassy_time::{Duration, Instant};

use px4io_driver_rust::drivers::packet::{self, PKT_HEADER_LEN, PKT_MAX_LEN, PKT_MAX_REGS};
use px4io_driver_rust::{Link, LinkFault};

/// Reply budget per attempt. A full 32-register reply is ~0.5 ms at 1.5 Mbaud.
const REPLY_TIMEOUT: Duration = Duration::from_millis(10);
const RETRIES: usize = 3;

/// Register link over the coprocessor's serial port.
pub struct UartLink<'d> {
    tx: UartTx<'d, USART6>,
    rx: UartRx<'d, USART6>,
    buf: [u8; PKT_MAX_LEN],
}

impl<'d> UartLink<'d> {
    pub fn new(tx: UartTx<'d, USART6>, rx: UartRx<'d, USART6>) -> Self {
        Self { tx, rx, buf: [0; PKT_MAX_LEN] }
    }

    fn exchange(&mut self, len: usize, values: &mut [u16]) -> Result<usize, LinkFault> {
        // The reply lands in `buf`, keep the request for retries.
        let request = self.buf;
        let mut last = LinkFault::Timeout;
        for _ in 0..RETRIES {
            if self.tx.blocking_write(&request[..len]).is_err() {
                last = LinkFault::Timeout;
                continue;
            }
            match self.receive(values) {
                Ok(n) => return Ok(n),
                // The coprocessor refused the request; repeating won't help.
                Err(LinkFault::Rejected) => return Err(LinkFault::Rejected),
                Err(fault) => last = fault,
            }
        }
        Err(last)
    }

    fn receive(&mut self, values: &mut [u16]) -> Result<usize, LinkFault> {
        let deadline = Instant::now() + REPLY_TIMEOUT;
        self.read_exact(0, PKT_HEADER_LEN, deadline)?;
        let len = packet::packet_len(packet::reply_count(&self.buf));
        if len > PKT_MAX_LEN {
            return Err(LinkFault::Corrupt);
        }
        self.read_exact(PKT_HEADER_LEN, len, deadline)?;
        packet::decode_reply(&self.buf[..len], values)
    }

    fn read_exact(&mut self, from: usize, to: usize, deadline: Instant) -> Result<(), LinkFault> {
        let mut at = from;
        while at < to {
            match self.rx.nb_read() {
                Ok(byte) => {
                    self.buf[at] = byte;
                    at += 1;
                }
                Err(_) if Instant::now() >= deadline => return Err(LinkFault::Timeout),
                Err(_) => {}
            }
        }
        Ok(())
    }
}

impl Link for UartLink<'_> {
    fn write(&mut self, address: u16, values: &[u16]) -> Result<usize, LinkFault> {
        let len = packet::encode_write(&mut self.buf, address, values).ok_or(LinkFault::Rejected)?;
        self.exchange(len, &mut [])?;
        Ok(values.len())
    }

    fn read(&mut self, address: u16, values: &mut [u16]) -> Result<usize, LinkFault> {
        let count = values.len().min(PKT_MAX_REGS);
        let len = packet::encode_read(&mut self.buf, address, count).ok_or(LinkFault::Rejected)?;
        self.exchange(len, values)
    }
}
