//! Timeouts, politeness delays and retry behaviour per external service.

use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How one external service is called.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePolicy {
    /// Per-call deadline.
    pub timeout_secs: f64,
    /// Minimum spacing between successive calls.
    pub min_interval_secs: f64,
    /// Total attempts for a failing call, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * backoff_secs`.
    pub backoff_secs: f64,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self::new(30.0, 0.0)
    }
}

impl ServicePolicy {
    pub fn new(timeout_secs: f64, min_interval_secs: f64) -> Self {
        Self {
            timeout_secs,
            min_interval_secs,
            max_attempts: 1,
            backoff_secs: 2.0,
        }
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        secs(self.min_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        secs(self.backoff_secs)
    }

    /// A throttle enforcing this policy's minimum interval.
    pub fn throttle(&self) -> Throttle {
        Throttle::new(self.min_interval())
    }

    /// Runs `op`, re-attempting failures until `max_attempts` is spent.
    ///
    /// A call that times out counts as one failed attempt; it is never
    /// extended in place.
    pub fn retry<T, E: Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts => {
                    let delay = self.backoff() * attempt;
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts,
                        error = %err,
                        "attempt failed, retrying in {:.1}s",
                        delay.as_secs_f64()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Enforces a minimum interval between calls to one service.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Blocks until the interval since the previous call has elapsed.
    pub fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

/// Built-in policy sets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Normal full-library pass.
    #[default]
    Standard,
    /// Longer timeouts and slower pacing for re-runs against flaky hosts.
    Patient,
}

/// Policies for the three external collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    pub catalog: ServicePolicy,
    pub lookup: ServicePolicy,
    pub remote: ServicePolicy,
}

impl Default for Policies {
    fn default() -> Self {
        Profile::Standard.policies()
    }
}

impl Profile {
    pub fn policies(self) -> Policies {
        match self {
            Profile::Standard => Policies {
                catalog: ServicePolicy::new(30.0, 0.1),
                lookup: ServicePolicy::new(10.0, 1.0),
                remote: ServicePolicy::new(30.0, 0.0),
            },
            Profile::Patient => Policies {
                catalog: ServicePolicy::new(30.0, 0.5),
                lookup: ServicePolicy::new(30.0, 2.0),
                remote: ServicePolicy::new(60.0, 0.0),
            },
        }
    }
}
