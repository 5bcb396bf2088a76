//! Reading-to-flash-interval mapping and non-blocking LED timing
//!
//! Brighter readings map to shorter flash intervals through a linear
//! interpolation between two calibration points. Flash timing is
//! clock-compared on every loop iteration rather than slept, so no
//! output ever blocks the event loop.

use crate::types::Reading;
use std::time::{Duration, Instant};

/// Two-point linear calibration from sensor reading to flash interval.
///
/// Slope and intercept are computed in floating point; the reference
/// firmware's integer truncation is deliberately not reused.
#[derive(Debug, Clone, Copy)]
pub struct FlashCalibration {
    pub reading_lo: Reading,
    pub interval_lo_ms: u64,
    pub reading_hi: Reading,
    pub interval_hi_ms: u64,
}

impl Default for FlashCalibration {
    fn default() -> Self {
        Self {
            reading_lo: 24,
            interval_lo_ms: 2010,
            reading_hi: 1024,
            interval_hi_ms: 10,
        }
    }
}

impl FlashCalibration {
    /// Flash interval for a reading, in milliseconds, clamped non-negative
    pub fn interval_ms(&self, reading: Reading) -> u64 {
        let slope = (self.interval_hi_ms as f64 - self.interval_lo_ms as f64)
            / (f64::from(self.reading_hi) - f64::from(self.reading_lo));
        let intercept = self.interval_lo_ms as f64 - slope * f64::from(self.reading_lo);
        let ms = slope * f64::from(reading) + intercept;
        ms.max(0.0).round() as u64
    }

    pub fn interval(&self, reading: Reading) -> Duration {
        Duration::from_millis(self.interval_ms(reading))
    }
}

/// Visual output capability (external collaborator)
pub trait LedDriver {
    fn set_flash_interval(&mut self, channel: usize, interval_ms: u64);
    fn set_active(&mut self, channel: usize, active: bool);
}

/// Clock-compared flash state for a single output channel
#[derive(Debug, Clone)]
pub struct FlashTimer {
    interval: Duration,
    active: bool,
    level: bool,
    last_toggle: Instant,
}

impl FlashTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            interval: Duration::ZERO,
            active: false,
            level: false,
            last_toggle: now,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Activate or deactivate the channel. Deactivating drives the
    /// output low; returns the new level if it changed.
    pub fn set_active(&mut self, active: bool) -> Option<bool> {
        self.active = active;
        if !active && self.level {
            self.level = false;
            return Some(false);
        }
        None
    }

    pub fn level(&self) -> bool {
        self.level
    }

    /// Toggle the output if the interval elapsed; never blocks.
    /// Returns the new level on a toggle.
    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        if !self.active {
            return None;
        }
        if now.duration_since(self.last_toggle) >= self.interval {
            self.last_toggle = now;
            self.level = !self.level;
            return Some(self.level);
        }
        None
    }
}

/// A fixed bank of flash timers implementing [`LedDriver`].
///
/// Binaries hold one of these and log level transitions in place of
/// physical GPIO lines.
pub struct FlashBank {
    timers: Vec<FlashTimer>,
}

impl FlashBank {
    pub fn new(channels: usize, now: Instant) -> Self {
        Self {
            timers: vec![FlashTimer::new(now); channels],
        }
    }

    /// Tick every channel, returning `(channel, level)` for each toggle
    pub fn tick(&mut self, now: Instant) -> Vec<(usize, bool)> {
        let mut toggles = Vec::new();
        for (channel, timer) in self.timers.iter_mut().enumerate() {
            if let Some(level) = timer.tick(now) {
                toggles.push((channel, level));
            }
        }
        toggles
    }

    /// Drive every channel low and deactivate it
    pub fn all_off(&mut self) -> Vec<(usize, bool)> {
        let mut changes = Vec::new();
        for (channel, timer) in self.timers.iter_mut().enumerate() {
            if timer.set_active(false).is_some() {
                changes.push((channel, false));
            }
        }
        changes
    }
}

impl LedDriver for FlashBank {
    fn set_flash_interval(&mut self, channel: usize, interval_ms: u64) {
        if let Some(timer) = self.timers.get_mut(channel) {
            timer.set_interval(Duration::from_millis(interval_ms));
        }
    }

    fn set_active(&mut self, channel: usize, active: bool) {
        if let Some(timer) = self.timers.get_mut(channel) {
            timer.set_active(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_calibration_endpoints() {
        let cal = FlashCalibration::default();
        assert_eq!(cal.interval_ms(24), 2010);
        assert_eq!(cal.interval_ms(1024), 10);
    }

    #[test]
    fn test_calibration_midpoint() {
        let cal = FlashCalibration::default();
        // slope = -2.0, intercept = 2058
        assert_eq!(cal.interval_ms(524), 1010);
    }

    #[test]
    fn test_interval_clamped_non_negative() {
        let cal = FlashCalibration::default();
        // Readings past the high calibration point would go negative
        assert_eq!(cal.interval_ms(2000), 0);
    }

    #[test]
    fn test_flash_timer_toggles_on_interval() {
        let t0 = Instant::now();
        let mut timer = FlashTimer::new(t0);
        timer.set_interval(Duration::from_millis(100));
        timer.set_active(true);

        assert_eq!(timer.tick(t0 + Duration::from_millis(50)), None);
        assert_eq!(timer.tick(t0 + Duration::from_millis(100)), Some(true));
        // Next interval counts from the toggle instant
        assert_eq!(timer.tick(t0 + Duration::from_millis(150)), None);
        assert_eq!(timer.tick(t0 + Duration::from_millis(200)), Some(false));
    }

    #[test]
    fn test_inactive_timer_never_toggles() {
        let t0 = Instant::now();
        let mut timer = FlashTimer::new(t0);
        timer.set_interval(Duration::from_millis(10));
        assert_eq!(timer.tick(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_deactivation_drives_low() {
        let t0 = Instant::now();
        let mut timer = FlashTimer::new(t0);
        timer.set_interval(Duration::from_millis(10));
        timer.set_active(true);
        timer.tick(t0 + Duration::from_millis(10));
        assert!(timer.level());

        assert_eq!(timer.set_active(false), Some(false));
        assert!(!timer.level());
    }

    #[test]
    fn test_flash_bank_independent_channels() {
        let t0 = Instant::now();
        let mut bank = FlashBank::new(2, t0);
        bank.set_flash_interval(0, 100);
        bank.set_flash_interval(1, 300);
        bank.set_active(0, true);
        bank.set_active(1, true);

        let toggles = bank.tick(t0 + Duration::from_millis(100));
        assert_eq!(toggles, vec![(0, true)]);

        let toggles = bank.tick(t0 + Duration::from_millis(300));
        assert_eq!(toggles, vec![(0, false), (1, true)]);
    }

    #[test]
    fn test_out_of_range_channel_ignored() {
        let t0 = Instant::now();
        let mut bank = FlashBank::new(1, t0);
        bank.set_flash_interval(5, 100);
        bank.set_active(5, true);
        assert!(bank.tick(t0 + Duration::from_secs(1)).is_empty());
    }
}
