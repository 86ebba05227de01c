use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::state::MIN_PHILOSOPHERS;

pub const DEFAULT_PHILOSOPHERS: usize = 5;
pub const DEFAULT_DURATION_SECS: u64 = 30;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;
// think / eat は 1 〜 3 秒
pub const DEFAULT_PAUSE_MIN_SECS: f64 = 1.0;
pub const DEFAULT_PAUSE_MAX_SECS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: Duration,
    pub max: Duration,
}

impl Bounds {
    pub fn from_secs(min: f64, max: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(min) || !valid(max) {
            return Err(Error::Config(format!(
                "durations must be non-negative seconds, got {min}..{max}"
            )));
        }
        if min > max {
            return Err(Error::Config(format!(
                "minimum {min}s is larger than maximum {max}s"
            )));
        }
        Ok(Bounds {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        })
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            min: Duration::from_secs_f64(DEFAULT_PAUSE_MIN_SECS),
            max: Duration::from_secs_f64(DEFAULT_PAUSE_MAX_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DinnerConfig {
    pub philosophers: usize,
    pub duration: Duration,
    pub think: Bounds,
    pub eat: Bounds,
}

impl DinnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.philosophers < MIN_PHILOSOPHERS {
            return Err(Error::Ring(self.philosophers));
        }
        Ok(())
    }
}

impl Default for DinnerConfig {
    fn default() -> Self {
        DinnerConfig {
            philosophers: DEFAULT_PHILOSOPHERS,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            think: Bounds::default(),
            eat: Bounds::default(),
        }
    }
}

// コーディネータの待ち受けアドレス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
