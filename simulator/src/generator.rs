use crate::errors::{Error, Result};
use crate::telemetry::Telemetry;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub const RESTING_MEAN_BPM: f64 = 72.0;
pub const RESTING_STD_DEV_BPM: f64 = 5.0;
pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 180.0;

/// Source of the reading timestamp.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Normally distributed heart rate, clamped to a physiological range on
/// output.
#[derive(Debug, Clone, Copy)]
pub struct HeartRateModel {
    distribution: Normal<f64>,
}

impl HeartRateModel {
    pub fn new(mean: f64, std_dev: f64) -> Result<Self> {
        if !mean.is_finite() {
            return Err(Error::Config(format!("Heart rate mean {} must be finite", mean)));
        }
        if !(std_dev > 0.0 && std_dev.is_finite()) {
            return Err(Error::Config(format!(
                "Heart rate standard deviation {} must be positive and finite",
                std_dev
            )));
        }

        Ok(Self {
            distribution: Normal::new(mean, std_dev)?,
        })
    }

    pub fn resting() -> Result<Self> {
        Self::new(RESTING_MEAN_BPM, RESTING_STD_DEV_BPM)
    }

    /// Raw draw, before clamping.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.distribution.sample(rng)
    }

    pub fn next_reading<C, R>(&self, clock: &C, rng: &mut R) -> Telemetry
    where
        C: Clock + ?Sized,
        R: Rng + ?Sized,
    {
        let bpm = clamp_bpm(self.sample(rng));
        Telemetry {
            timestamp: clock.now(),
            simulated_hr_bpm: round_bpm(bpm),
        }
    }
}

pub fn clamp_bpm(raw: f64) -> f64 {
    if raw.is_nan() {
        return MIN_BPM;
    }
    raw.clamp(MIN_BPM, MAX_BPM)
}

/// Rounds half away from zero. Input must already be clamped.
pub fn round_bpm(clamped: f64) -> u16 {
    clamped.round() as u16
}
