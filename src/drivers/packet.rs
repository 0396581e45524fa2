//! Serial framing between the FMU and the coprocessor.
//!
//! `[count|code] [crc] [page] [offset] [regs...]`, registers little-endian.
//! The CRC covers the whole packet with the crc byte zeroed.

use crate::error::LinkFault;

pub const PKT_MAX_REGS: usize = 32;
pub const PKT_HEADER_LEN: usize = 4;
pub const PKT_MAX_LEN: usize = PKT_HEADER_LEN + PKT_MAX_REGS * 2;

const PKT_COUNT_MASK: u8 = 0x3F;
const PKT_CODE_MASK: u8 = 0xC0;

pub const PKT_CODE_READ: u8 = 0x00;
pub const PKT_CODE_WRITE: u8 = 0x40;
pub const PKT_CODE_SUCCESS: u8 = 0x00;
pub const PKT_CODE_CORRUPT: u8 = 0x40;
pub const PKT_CODE_ERROR: u8 = 0x80;

/// Bytes on the wire for a packet carrying `count` registers.
pub const fn packet_len(count: usize) -> usize {
    PKT_HEADER_LEN + count * 2
}

/// CRC-8, polynomial 0x07, initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn encode(buf: &mut [u8; PKT_MAX_LEN], code: u8, address: u16, regs: &[u16], count: usize) -> Option<usize> {
    if count > PKT_MAX_REGS {
        return None;
    }
    let len = packet_len(count);
    buf[0] = count as u8 | code;
    buf[1] = 0;
    buf[2] = (address >> 8) as u8;
    buf[3] = address as u8;
    for i in 0..count {
        let value = regs.get(i).copied().unwrap_or(0);
        buf[PKT_HEADER_LEN + i * 2..PKT_HEADER_LEN + i * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    buf[1] = crc8(&buf[..len]);
    Some(len)
}

/// Build a write request. Returns the packet length.
pub fn encode_write(buf: &mut [u8; PKT_MAX_LEN], address: u16, values: &[u16]) -> Option<usize> {
    encode(buf, PKT_CODE_WRITE, address, values, values.len())
}

/// Build a read request for `count` registers. Read requests are sent at
/// full size, register slots zeroed.
pub fn encode_read(buf: &mut [u8; PKT_MAX_LEN], address: u16, count: usize) -> Option<usize> {
    encode(buf, PKT_CODE_READ, address, &[], count)
}

/// Register count announced in a reply header, used to size the rest of
/// the receive.
pub fn reply_count(header: &[u8]) -> usize {
    usize::from(header[0] & PKT_COUNT_MASK)
}

/// Check a complete reply and copy its registers into `values`.
pub fn decode_reply(frame: &[u8], values: &mut [u16]) -> Result<usize, LinkFault> {
    if frame.len() < PKT_HEADER_LEN {
        return Err(LinkFault::ShortTransfer);
    }
    let count = reply_count(frame);
    let len = packet_len(count);
    if frame.len() < len {
        return Err(LinkFault::ShortTransfer);
    }

    let mut check = [0u8; PKT_MAX_LEN];
    check[..len].copy_from_slice(&frame[..len]);
    check[1] = 0;
    if crc8(&check[..len]) != frame[1] {
        return Err(LinkFault::Corrupt);
    }

    match frame[0] & PKT_CODE_MASK {
        PKT_CODE_SUCCESS => {}
        PKT_CODE_CORRUPT => return Err(LinkFault::Corrupt),
        _ => return Err(LinkFault::Rejected),
    }

    let n = count.min(values.len());
    for (i, value) in values[..n].iter_mut().enumerate() {
        let at = PKT_HEADER_LEN + i * 2;
        *value = u16::from_le_bytes([frame[at], frame[at + 1]]);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_check_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_write_request_layout() {
        let mut buf = [0u8; PKT_MAX_LEN];
        let len = encode_write(&mut buf, 50 << 8 | 1, &[0x0102]).unwrap();
        assert_eq!(len, 6);
        assert_eq!(buf[0], 1 | PKT_CODE_WRITE);
        assert_eq!(&buf[2..6], &[50, 1, 0x02, 0x01]);

        let mut zeroed = buf;
        zeroed[1] = 0;
        assert_eq!(crc8(&zeroed[..len]), buf[1]);
    }

    #[test]
    fn test_read_request_is_full_size() {
        let mut buf = [0xAAu8; PKT_MAX_LEN];
        let len = encode_read(&mut buf, 4 << 8, 15).unwrap();
        assert_eq!(len, packet_len(15));
        assert_eq!(reply_count(&buf), 15);
        assert!(buf[PKT_HEADER_LEN..len].iter().all(|&b| b == 0));
        assert!(encode_read(&mut buf, 0, PKT_MAX_REGS + 1).is_none());
    }

    #[test]
    fn test_decode_success_reply() {
        let mut frame = [0u8; PKT_MAX_LEN];
        frame[0] = 2 | PKT_CODE_SUCCESS;
        frame[2] = 1;
        frame[3] = 2;
        frame[4..8].copy_from_slice(&[0x00, 0x05, 0x34, 0x12]);
        frame[1] = crc8(&frame[..8]);

        let mut values = [0u16; 2];
        assert_eq!(decode_reply(&frame[..8], &mut values), Ok(2));
        assert_eq!(values, [0x0500, 0x1234]);
    }

    #[test]
    fn test_decode_rejects_bad_crc_and_error_code() {
        let mut frame = [0u8; 6];
        frame[0] = 1;
        frame[1] = crc8(&frame) ^ 0xFF;
        assert_eq!(decode_reply(&frame, &mut [0u16; 1]), Err(LinkFault::Corrupt));

        let mut frame = [0u8; 4];
        frame[0] = PKT_CODE_ERROR;
        frame[1] = crc8(&frame);
        assert_eq!(decode_reply(&frame, &mut [0u16; 1]), Err(LinkFault::Rejected));

        assert_eq!(decode_reply(&[3, 0, 0, 0], &mut [0u16; 3]), Err(LinkFault::ShortTransfer));
    }
}
