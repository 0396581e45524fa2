use crate::error::{Error, LinkFault, Result};
use crate::registers::{RegisterAddress, WORD_SIZE};

/// Transfer limit assumed until the coprocessor's config page has been read.
pub const DEFAULT_TRANSFER_LIMIT: usize = 16;

/// Raw register access provided by whatever carries packets to the
/// coprocessor. Addresses are linear (`page * 256 + offset`).
///
/// Both calls return the number of registers actually moved.
pub trait Link {
    fn write(&mut self, address: u16, values: &[u16]) -> core::result::Result<usize, LinkFault>;
    fn read(&mut self, address: u16, values: &mut [u16]) -> core::result::Result<usize, LinkFault>;
}

/// Typed register operations over a [`Link`].
///
/// Enforces the transfer limit before the link is touched and treats any
/// short transfer as a link error. No retries.
pub struct RegisterTransport<L: Link> {
    link: L,
    transfer_limit: usize,
}

impl<L: Link> RegisterTransport<L> {
    pub fn new(link: L) -> Self {
        Self { link, transfer_limit: DEFAULT_TRANSFER_LIMIT }
    }

    /// Byte budget per transaction.
    pub fn transfer_limit(&self) -> usize {
        self.transfer_limit
    }

    pub fn set_transfer_limit(&mut self, bytes: usize) {
        self.transfer_limit = bytes;
    }

    /// Largest register count a single transaction may carry.
    pub fn max_registers(&self) -> usize {
        self.transfer_limit / WORD_SIZE
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn check_size(&self, count: usize) -> Result<()> {
        if count * WORD_SIZE > self.transfer_limit {
            return Err(Error::TooManyRegisters { count, limit: self.transfer_limit });
        }
        Ok(())
    }

    pub fn write(&mut self, address: RegisterAddress, values: &[u16]) -> Result<()> {
        self.check_size(values.len())?;
        if values.is_empty() {
            return Ok(());
        }
        let written = self.link.write(address.linear(), values)?;
        if written != values.len() {
            return Err(Error::Link(LinkFault::ShortTransfer));
        }
        Ok(())
    }

    pub fn read(&mut self, address: RegisterAddress, values: &mut [u16]) -> Result<()> {
        self.check_size(values.len())?;
        if values.is_empty() {
            return Ok(());
        }
        let read = self.link.read(address.linear(), values)?;
        if read != values.len() {
            return Err(Error::Link(LinkFault::ShortTransfer));
        }
        Ok(())
    }

    pub fn write_one(&mut self, address: RegisterAddress, value: u16) -> Result<()> {
        self.write(address, &[value])
    }

    pub fn read_one(&mut self, address: RegisterAddress) -> Result<u16> {
        let mut value = [0u16; 1];
        self.read(address, &mut value)?;
        Ok(value[0])
    }

    /// Read-modify-write: clear `clear_bits`, then set `set_bits`.
    pub fn modify(&mut self, address: RegisterAddress, clear_bits: u16, set_bits: u16) -> Result<()> {
        let value = self.read_one(address)?;
        self.write_one(address, (value & !clear_bits) | set_bits)
    }

    /// Write a table longer than one transaction allows, chunk by chunk.
    /// Stops at the first failing chunk.
    pub fn write_block(&mut self, address: RegisterAddress, values: &[u16]) -> Result<()> {
        let step = self.max_registers().max(1);
        for (i, chunk) in values.chunks(step).enumerate() {
            self.write(address.add((i * step) as u8), chunk)?;
        }
        Ok(())
    }

    /// Counterpart of [`write_block`](Self::write_block).
    pub fn read_block(&mut self, address: RegisterAddress, values: &mut [u16]) -> Result<()> {
        let step = self.max_registers().max(1);
        for (i, chunk) in values.chunks_mut(step).enumerate() {
            self.read(address.add((i * step) as u8), chunk)?;
        }
        Ok(())
    }
}
