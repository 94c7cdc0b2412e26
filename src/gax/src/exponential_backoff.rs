// Copyright 2025 The Cumulus Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Truncated exponential backoff.
//!
//! The delay between attempts grows by a constant factor until it reaches a
//! ceiling. Used as a [BackoffPolicy] the delay is fully jittered: the loop
//! sleeps a uniformly random fraction of the computed delay, which spreads
//! out the retries of requests that failed together. Used as a
//! [PollingBackoffPolicy] the delay applies as is, polling cadence gains
//! nothing from randomization.
//!
//! [BackoffPolicy]: crate::backoff_policy::BackoffPolicy
//! [PollingBackoffPolicy]: crate::polling_backoff_policy::PollingBackoffPolicy

use std::time::Duration;

/// The error type for exponential backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the growth factor ({0}) must be at least 1.0")]
    GrowthTooSmall(f64),
    #[error("the initial delay must not be zero")]
    ZeroInitialDelay,
    #[error("the maximum delay ({maximum:?}) is below the initial delay ({initial:?})")]
    MaximumBelowInitial {
        maximum: Duration,
        initial: Duration,
    },
}

/// A builder for [ExponentialBackoff].
///
/// # Example
/// ```
/// # use cumulus_gax::exponential_backoff::{Error, ExponentialBackoffBuilder};
/// use std::time::Duration;
/// let policy = ExponentialBackoffBuilder::new()
///     .with_initial_delay(Duration::from_millis(250))
///     .with_maximum_delay(Duration::from_secs(30))
///     .with_scaling(2.0)
///     .build()?;
/// # Ok::<(), Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial: Duration,
    maximum: Duration,
    growth: f64,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters.
    pub fn new() -> Self {
        Self {
            initial: Duration::from_secs(1),
            maximum: Duration::from_secs(60),
            growth: 2.0,
        }
    }

    /// Change the delay before the first retry.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial = v.into();
        self
    }

    /// Change the ceiling on the delay.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum = v.into();
        self
    }

    /// Change the factor by which the delay grows after each attempt.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.growth = v.into();
        self
    }

    /// Validates the parameters and creates the policy.
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        if self.growth < 1.0 {
            return Err(Error::GrowthTooSmall(self.growth));
        }
        if self.initial.is_zero() {
            return Err(Error::ZeroInitialDelay);
        }
        if self.maximum < self.initial {
            return Err(Error::MaximumBelowInitial {
                maximum: self.maximum,
                initial: self.initial,
            });
        }
        Ok(ExponentialBackoff {
            initial: self.initial,
            maximum: self.maximum,
            growth: self.growth,
        })
    }

    /// Creates the policy, forcing out-of-range parameters into range.
    ///
    /// The maximum delay is forced between one second and one day, then the
    /// initial delay between one millisecond and the maximum delay, and the
    /// growth factor between `1.0` and `32.0`.
    pub fn clamp(self) -> ExponentialBackoff {
        let maximum = self
            .maximum
            .clamp(Duration::from_secs(1), Duration::from_secs(24 * 60 * 60));
        ExponentialBackoff {
            initial: self.initial.clamp(Duration::from_millis(1), maximum),
            maximum,
            growth: self.growth.clamp(1.0, 32.0),
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements truncated exponential backoff.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    maximum: Duration,
    growth: f64,
}

impl ExponentialBackoff {
    fn delay_for(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial.as_secs_f64() * self.growth.powi(exponent);
        // powi() overflows to infinity for large attempt counts; the
        // comparison sends those to the ceiling as well.
        if scaled < self.maximum.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.maximum
        }
    }

    fn jittered<R: rand::Rng>(&self, attempt_count: u32, rng: &mut R) -> Duration {
        self.delay_for(attempt_count).mul_f64(rng.random::<f64>())
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoffBuilder::new().clamp()
    }
}

impl crate::backoff_policy::BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, _loop_start: std::time::Instant, attempt_count: u32) -> Duration {
        self.jittered(attempt_count, &mut rand::rng())
    }
}

impl crate::polling_backoff_policy::PollingBackoffPolicy for ExponentialBackoff {
    fn wait_period(&self, _loop_start: std::time::Instant, attempt_count: u32) -> Duration {
        self.delay_for(attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff_policy::BackoffPolicy;
    use crate::mock_rng::MockRng;
    use crate::polling_backoff_policy::PollingBackoffPolicy;
    use test_case::test_case;

    fn quarter_second_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(250))
            .with_maximum_delay(Duration::from_secs(2))
            .with_scaling(2.0)
            .build()
            .expect("valid test parameters")
    }

    #[test]
    fn build_rejects_bad_parameters() {
        let b = ExponentialBackoffBuilder::new().with_scaling(0.25).build();
        assert!(matches!(b, Err(Error::GrowthTooSmall(_))), "{b:?}");

        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .build();
        assert!(matches!(b, Err(Error::ZeroInitialDelay)), "{b:?}");

        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(90))
            .with_maximum_delay(Duration::from_secs(30))
            .build();
        assert!(matches!(b, Err(Error::MaximumBelowInitial { .. })), "{b:?}");

        let b = ExponentialBackoffBuilder::default().build();
        assert!(b.is_ok(), "{b:?}");
    }

    #[test]
    fn clamp_forces_parameters_into_range() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .with_maximum_delay(Duration::ZERO)
            .with_scaling(0.25)
            .clamp();
        assert_eq!(b.initial, Duration::from_millis(1));
        assert_eq!(b.maximum, Duration::from_secs(1));
        assert_eq!(b.growth, 1.0);

        // The initial delay is capped by the already-clamped maximum.
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(5))
            .with_scaling(64.0)
            .clamp();
        assert_eq!(b.initial, Duration::from_secs(5));
        assert_eq!(b.maximum, Duration::from_secs(5));
        assert_eq!(b.growth, 32.0);
    }

    #[test_case(1, Duration::from_millis(250))]
    #[test_case(2, Duration::from_millis(500))]
    #[test_case(3, Duration::from_secs(1))]
    #[test_case(4, Duration::from_secs(2))]
    #[test_case(10, Duration::from_secs(2); "stays at the ceiling")]
    fn delay_doubles_up_to_the_ceiling(attempt: u32, want: Duration) {
        assert_eq!(quarter_second_policy().delay_for(attempt), want);
    }

    #[test]
    fn polling_wait_period_has_no_jitter() {
        let b = quarter_second_policy();
        let now = std::time::Instant::now();
        assert_eq!(b.wait_period(now, 2), Duration::from_millis(500));
        assert_eq!(b.wait_period(now, 2), Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_is_jittered() {
        let b = quarter_second_policy();
        let mut rng = MockRng::new(0);
        assert_eq!(b.jittered(4, &mut rng), Duration::ZERO);

        let mut rng = MockRng::new(u64::MAX);
        let high = b.jittered(4, &mut rng);
        assert!(high > Duration::from_millis(1900), "{high:?}");
        assert!(high <= Duration::from_secs(2), "{high:?}");
    }

    #[test]
    fn on_failure_stays_below_the_unjittered_delay() {
        let b = quarter_second_policy();
        let now = std::time::Instant::now();
        for attempt in 1..=6 {
            let d = b.on_failure(now, attempt);
            assert!(d <= b.delay_for(attempt), "{d:?} at attempt {attempt}");
        }
    }
}
