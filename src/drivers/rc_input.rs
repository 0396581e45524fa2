use embassy_time::Instant;

use crate::registers::{RawRcFlags, StatusFlags, RAW_RC_PROLOG, RC_INPUT_MAX_CHANNELS};
use crate::state::{InputSource, RcFrame, RssiPwmMapping};

/// Weight of each new analog RSSI sample.
const RSSI_FILTER_ALPHA: f32 = 0.01;
/// Filtered voltage above which the analog input is trusted for the session.
const RSSI_STABLE_VOLTS: f32 = 2.5;

// Offsets into the raw RC header
const COUNT: usize = 0;
const FLAGS: usize = 1;
const NRSSI: usize = 2;
const DATA: usize = 3;
const FRAME_COUNT: usize = 4;
const LOST_FRAME_COUNT: usize = 5;

/// Registers needed to decode a full frame: header plus every channel.
pub const RAW_RC_REGS: usize = RAW_RC_PROLOG + RC_INPUT_MAX_CHANNELS;

// ── Analog RSSI ───────────────────────────────────────────────────────────────

/// Analog RSSI input, smoothed with an exponential moving average seeded by
/// the first reading.
pub struct AnalogRssi {
    volts: Option<f32>,
    stable: bool,
}

impl AnalogRssi {
    pub fn new() -> Self {
        Self { volts: None, stable: false }
    }

    /// Feed a raw reading in millivolts.
    pub fn update(&mut self, millivolts: u16) {
        let sample = f32::from(millivolts) * 0.001;
        let volts = match self.volts {
            Some(prev) => prev + RSSI_FILTER_ALPHA * (sample - prev),
            None => sample,
        };
        self.volts = Some(volts);
        if volts > RSSI_STABLE_VOLTS {
            self.stable = true;
        }
    }

    pub fn volts(&self) -> Option<f32> {
        self.volts
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Signal strength 0..=100, once the input has been seen stable.
    pub fn percent(&self) -> Option<u8> {
        if !self.stable {
            return None;
        }
        let percent = ((self.volts? - 0.2) / 3.0) * 100.0;
        Some(percent.clamp(0.0, 100.0) as u8)
    }
}

impl Default for AnalogRssi {
    fn default() -> Self {
        Self::new()
    }
}

impl RssiPwmMapping {
    /// RSSI from the mapped channel, if the mapping is usable for this frame.
    pub fn rssi(&self, values: &[u16], channel_count: usize) -> Option<u8> {
        let channel = usize::from(self.channel);
        if channel == 0 || channel > channel_count.min(RC_INPUT_MAX_CHANNELS) || self.max == self.min {
            return None;
        }
        // Parameters span the whole i32 range.
        let (min, max) = (i64::from(self.min), i64::from(self.max));
        let value = i64::from(values[channel - 1]);
        let percent = ((value - min) * 100) / (max - min);
        Some(percent.clamp(0, 100) as u8)
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Turns the raw RC register block into an [`RcFrame`].
pub struct RcDecoder {
    analog: AnalogRssi,
    last_valid: Option<Instant>,
}

impl RcDecoder {
    pub fn new() -> Self {
        Self { analog: AnalogRssi::new(), last_valid: None }
    }

    pub fn analog_rssi(&self) -> &AnalogRssi {
        &self.analog
    }

    pub fn analog_rssi_mut(&mut self) -> &mut AnalogRssi {
        &mut self.analog
    }

    /// Last time a usable frame was seen.
    pub fn last_valid(&self) -> Option<Instant> {
        self.last_valid
    }

    /// Channels announced by a raw header, clamped to capacity.
    pub fn channel_count(header: &[u16]) -> usize {
        usize::from(header[COUNT]).min(RC_INPUT_MAX_CHANNELS)
    }

    /// Decode `regs` (header followed by channel values). Returns `None`
    /// when nothing identifies the receiver and no valid signal was ever
    /// seen this session.
    pub fn decode(
        &mut self,
        now: Instant,
        status: StatusFlags,
        regs: &[u16; RAW_RC_REGS],
        mapping: &RssiPwmMapping,
    ) -> Option<RcFrame> {
        let channel_count = Self::channel_count(regs);
        let raw_flags = RawRcFlags::from_bits_retain(regs[FLAGS]);

        let failsafe = raw_flags.contains(RawRcFlags::FAILSAFE);
        let lost = !raw_flags.contains(RawRcFlags::RC_OK);

        if channel_count > 0 && !lost && !failsafe {
            self.last_valid = Some(now);
        }

        let mut values = [0u16; RC_INPUT_MAX_CHANNELS];
        values[..channel_count].copy_from_slice(&regs[RAW_RC_PROLOG..RAW_RC_PROLOG + channel_count]);

        let rssi = mapping
            .rssi(&values, channel_count)
            .or_else(|| self.analog.percent())
            .unwrap_or(regs[NRSSI].min(100) as u8);

        let input_source = InputSource::from_status(status);
        if input_source == InputSource::Unknown && self.last_valid.is_none() {
            return None;
        }

        Some(RcFrame {
            timestamp: now,
            last_signal: self.last_valid,
            values,
            channel_count,
            rssi,
            lost,
            failsafe,
            ppm_frame_length: regs[DATA],
            frame_count: regs[FRAME_COUNT],
            lost_frame_count: regs[LOST_FRAME_COUNT],
            input_source,
        })
    }
}

impl Default for RcDecoder {
    fn default() -> Self {
        Self::new()
    }
}
