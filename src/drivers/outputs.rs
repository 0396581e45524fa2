use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::error::{Error, Result};
use crate::registers::{
    MAX_ACTUATORS, PWM_DEFAULT_MAX, PWM_DEFAULT_MIN, PWM_HIGHEST_MAX, PWM_HIGHEST_MIN, PWM_LOWEST_MAX,
    PWM_LOWEST_MIN, PWM_MOTOR_OFF,
};

/// All channels are rewritten at least this often.
pub const FULL_REFRESH_WINDOW: Duration = Duration::from_millis(500);

// ── Output cache ──────────────────────────────────────────────────────────────

/// Channels to put on the wire this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    /// Contiguous `start..end` ranges.
    pub runs: Vec<(usize, usize), MAX_ACTUATORS>,
    pub full_refresh: bool,
}

impl OutputPlan {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Last value written per direct-PWM channel, plus the time of the last
/// all-channel rewrite.
pub struct OutputCache {
    previous: [u16; MAX_ACTUATORS],
    last_full_refresh: Option<Instant>,
    window: Duration,
}

impl OutputCache {
    pub fn new(window: Duration) -> Self {
        Self { previous: [0; MAX_ACTUATORS], last_full_refresh: None, window }
    }

    pub fn previous(&self) -> &[u16; MAX_ACTUATORS] {
        &self.previous
    }

    /// Decide which of `outputs` to send and record them as sent.
    ///
    /// Writes are fire-and-forget: the cache is updated whether or not the
    /// link delivers, and the periodic full refresh repairs lost writes.
    pub fn plan(&mut self, now: Instant, outputs: &[u16]) -> OutputPlan {
        let outputs = &outputs[..outputs.len().min(MAX_ACTUATORS)];
        let full_refresh = match self.last_full_refresh {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        };

        let mut runs: Vec<(usize, usize), MAX_ACTUATORS> = Vec::new();
        let mut start: Option<usize> = None;
        for (i, &value) in outputs.iter().enumerate() {
            let dirty = full_refresh || value != self.previous[i];
            match (dirty, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    let _ = runs.push((s, i));
                    start = None;
                }
                _ => {}
            }
            self.previous[i] = value;
        }
        if let Some(s) = start {
            let _ = runs.push((s, outputs.len()));
        }

        if full_refresh {
            self.last_full_refresh = Some(now);
        }
        OutputPlan { runs, full_refresh }
    }
}

// ── PWM tables ────────────────────────────────────────────────────────────────

/// Per-channel PWM limits, trims and the failsafe/disarmed values pushed to
/// the coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmTables {
    pub min: [u16; MAX_ACTUATORS],
    pub max: [u16; MAX_ACTUATORS],
    pub trim: [i16; MAX_ACTUATORS],
    pub failsafe: [u16; MAX_ACTUATORS],
    pub disarmed: [u16; MAX_ACTUATORS],
}

impl Default for PwmTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `values` into `table`, clamping to `[low, high]`. Zero entries keep
/// the current value.
fn apply(table: &mut [u16], values: &[u16], channels: usize, low: u16, high: u16) -> Result<()> {
    if values.len() > channels {
        return Err(Error::TooManyChannels);
    }
    for (slot, &value) in table.iter_mut().zip(values) {
        if value != 0 {
            *slot = value.clamp(low, high);
        }
    }
    Ok(())
}

impl PwmTables {
    pub const fn new() -> Self {
        Self {
            min: [PWM_DEFAULT_MIN; MAX_ACTUATORS],
            max: [PWM_DEFAULT_MAX; MAX_ACTUATORS],
            trim: [0; MAX_ACTUATORS],
            failsafe: [0; MAX_ACTUATORS],
            disarmed: [PWM_MOTOR_OFF; MAX_ACTUATORS],
        }
    }

    pub fn set_failsafe(&mut self, values: &[u16], channels: usize) -> Result<()> {
        apply(&mut self.failsafe, values, channels, PWM_LOWEST_MIN, PWM_HIGHEST_MAX)
    }

    pub fn set_disarmed(&mut self, values: &[u16], channels: usize) -> Result<()> {
        apply(&mut self.disarmed, values, channels, PWM_LOWEST_MIN, PWM_HIGHEST_MAX)
    }

    pub fn set_min(&mut self, values: &[u16], channels: usize) -> Result<()> {
        apply(&mut self.min, values, channels, PWM_LOWEST_MIN, PWM_HIGHEST_MIN)
    }

    pub fn set_max(&mut self, values: &[u16], channels: usize) -> Result<()> {
        apply(&mut self.max, values, channels, PWM_LOWEST_MAX, PWM_HIGHEST_MAX)
    }

    pub fn set_trim(&mut self, values: &[i16], channels: usize) -> Result<()> {
        if values.len() > channels {
            return Err(Error::TooManyChannels);
        }
        self.trim[..values.len()].copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_first_plan_is_full() {
        let mut cache = OutputCache::new(FULL_REFRESH_WINDOW);
        let plan = cache.plan(at(0), &[1000; 8]);
        assert!(plan.full_refresh);
        assert_eq!(plan.runs.as_slice(), &[(0, 8)]);
    }

    #[test]
    fn test_unchanged_values_wait_for_window() {
        let mut cache = OutputCache::new(FULL_REFRESH_WINDOW);
        cache.plan(at(0), &[1000; 8]);

        for ms in (20..500).step_by(20) {
            assert!(cache.plan(at(ms), &[1000; 8]).is_empty(), "write at {} ms", ms);
        }

        let plan = cache.plan(at(500), &[1000; 8]);
        assert!(plan.full_refresh);
        assert_eq!(plan.runs.as_slice(), &[(0, 8)]);

        assert!(cache.plan(at(520), &[1000; 8]).is_empty());
    }

    #[test]
    fn test_deltas_coalesce_into_runs() {
        let mut cache = OutputCache::new(FULL_REFRESH_WINDOW);
        cache.plan(at(0), &[1000; 8]);

        let plan = cache.plan(at(20), &[1100, 1100, 1000, 1000, 1200, 1000, 1300, 1300]);
        assert!(!plan.full_refresh);
        assert_eq!(plan.runs.as_slice(), &[(0, 2), (4, 5), (6, 8)]);
        assert_eq!(cache.previous()[6], 1300);
    }

    #[test]
    fn test_table_clamps_and_skips_zero() {
        let mut tables = PwmTables::default();
        tables.set_min(&[0, 50, 1800], 8).unwrap();
        assert_eq!(&tables.min[..3], &[PWM_DEFAULT_MIN, PWM_LOWEST_MIN, PWM_HIGHEST_MIN]);

        tables.set_max(&[100, 2500], 8).unwrap();
        assert_eq!(&tables.max[..2], &[PWM_LOWEST_MAX, PWM_HIGHEST_MAX]);

        tables.set_failsafe(&[1500, 0, 3000], 8).unwrap();
        assert_eq!(&tables.failsafe[..3], &[1500, 0, PWM_HIGHEST_MAX]);
    }

    #[test]
    fn test_table_rejects_too_many_channels() {
        let mut tables = PwmTables::default();
        assert_eq!(tables.set_disarmed(&[1000; 9], 8), Err(Error::TooManyChannels));
        assert_eq!(tables.set_trim(&[10; 9], 8), Err(Error::TooManyChannels));
        assert_eq!(tables.disarmed[0], PWM_MOTOR_OFF);
    }
}
