use crate::prelude::{now_epoch, AcqError, AcqResult, Capture, Trace};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Parameters of a generated test signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Samples per second.
    pub sample_rate: f64,
    /// Samples per emitted trace.
    pub block_len: usize,
    pub frequency: f64,
    pub amplitude: f64,
    /// Jitter added to the unit sine before scaling, at most `MAX_NOISE`.
    pub noise: f64,
    pub seed: u64,
    /// Fail every n-th capture step with a connectivity error.
    pub fail_every: Option<u64>,
}

pub const MAX_NOISE: f64 = 1.0e3;

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            network: "XX".into(),
            station: "SYN".into(),
            location: String::new(),
            channel: "HHZ".into(),
            sample_rate: 100.0,
            block_len: 100,
            frequency: 1.0,
            amplitude: 1000.0,
            noise: 0.05,
            seed: 0,
            fail_every: None,
        }
    }
}

impl SyntheticConfig {
    pub fn deltat(&self) -> f64 {
        1.0 / self.sample_rate
    }

    fn validate(&self) -> AcqResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(AcqError::Configuration(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.block_len == 0 {
            return Err(AcqError::Configuration("block length must be non-zero".into()));
        }
        if !(self.frequency.is_finite() && self.frequency >= 0.0) {
            return Err(AcqError::Configuration(format!(
                "frequency must be a non-negative number, got {}",
                self.frequency
            )));
        }
        if !self.amplitude.is_finite() {
            return Err(AcqError::Configuration(format!(
                "amplitude must be finite, got {}",
                self.amplitude
            )));
        }
        if !(self.noise.is_finite() && (0.0..=MAX_NOISE).contains(&self.noise)) {
            return Err(AcqError::Configuration(format!(
                "noise must be within 0..={}, got {}",
                MAX_NOISE, self.noise
            )));
        }
        if self.fail_every == Some(0) {
            return Err(AcqError::Configuration("fail_every must be non-zero".into()));
        }
        if self.station.is_empty() || self.channel.is_empty() {
            return Err(AcqError::Configuration(
                "station and channel must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Generates a contiguous noisy sine, one block per capture step.
///
/// Timing comes from the sample clock, not the wall clock; pace it with a
/// throttle in the retry policy to get real-time output.
pub struct SyntheticCapture {
    config: SyntheticConfig,
    rng: StdRng,
    next_sample: u64,
    epoch: f64,
    steps: u64,
}

impl SyntheticCapture {
    pub fn new(config: SyntheticConfig) -> AcqResult<Self> {
        config.validate()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_sample: 0,
            epoch: 0.0,
            steps: 0,
        })
    }

    fn sample_at(&mut self, index: u64) -> i32 {
        let t = index as f64 * self.config.deltat();
        let jitter = if self.config.noise > 0.0 {
            self.rng.gen_range(-self.config.noise..self.config.noise)
        } else {
            0.0
        };
        let value = ((2.0 * PI * self.config.frequency * t).sin() + jitter) * self.config.amplitude;
        value.round() as i32
    }
}

impl Capture for SyntheticCapture {
    fn acquisition_start(&mut self) -> AcqResult<()> {
        self.epoch = now_epoch();
        self.next_sample = 0;
        Ok(())
    }

    fn capture_step(&mut self) -> AcqResult<Vec<Trace>> {
        self.steps += 1;
        if let Some(every) = self.config.fail_every {
            if self.steps % every == 0 {
                return Err(AcqError::Connectivity(format!(
                    "scripted failure at step {}",
                    self.steps
                )));
            }
        }

        let first = self.next_sample;
        let samples = (first..first + self.config.block_len as u64)
            .map(|index| self.sample_at(index))
            .collect();
        self.next_sample += self.config.block_len as u64;

        Ok(vec![Trace::new(
            self.config.network.clone(),
            self.config.station.clone(),
            self.config.location.clone(),
            self.config.channel.clone(),
            self.epoch + first as f64 * self.config.deltat(),
            self.config.deltat(),
            samples,
        )])
    }

    fn acquisition_stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous_in_time() {
        let config = SyntheticConfig {
            sample_rate: 10.0,
            block_len: 5,
            ..Default::default()
        };
        let mut capture = SyntheticCapture::new(config).unwrap();
        capture.acquisition_start().unwrap();

        let first = capture.capture_step().unwrap().remove(0);
        let second = capture.capture_step().unwrap().remove(0);
        assert_eq!(first.samples.len(), 5);
        assert!((second.tmin - (first.tmax() + first.deltat)).abs() < 1e-9);
    }

    #[test]
    fn same_seed_repeats_the_waveform() {
        let config = SyntheticConfig {
            seed: 42,
            ..Default::default()
        };
        let mut a = SyntheticCapture::new(config.clone()).unwrap();
        let mut b = SyntheticCapture::new(config).unwrap();
        a.acquisition_start().unwrap();
        b.acquisition_start().unwrap();
        assert_eq!(
            a.capture_step().unwrap()[0].samples,
            b.capture_step().unwrap()[0].samples
        );
    }

    #[test]
    fn rejects_non_finite_signal_parameters() {
        let bad = [
            SyntheticConfig {
                noise: f64::INFINITY,
                ..Default::default()
            },
            SyntheticConfig {
                noise: 1.0e300,
                ..Default::default()
            },
            SyntheticConfig {
                amplitude: f64::NAN,
                ..Default::default()
            },
            SyntheticConfig {
                frequency: f64::INFINITY,
                ..Default::default()
            },
            SyntheticConfig {
                fail_every: Some(0),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                SyntheticCapture::new(config),
                Err(AcqError::Configuration(_))
            ));
        }
    }

    #[test]
    fn scripted_failures_hit_every_nth_step() {
        let config = SyntheticConfig {
            fail_every: Some(3),
            ..Default::default()
        };
        let mut capture = SyntheticCapture::new(config).unwrap();
        capture.acquisition_start().unwrap();
        assert!(capture.capture_step().is_ok());
        assert!(capture.capture_step().is_ok());
        assert!(matches!(
            capture.capture_step(),
            Err(AcqError::Connectivity(_))
        ));
        assert!(capture.capture_step().is_ok());
    }

    #[test]
    fn rejects_non_positive_sample_rate() {
        let config = SyntheticConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            SyntheticCapture::new(config),
            Err(AcqError::Configuration(_))
        ));
    }
}
