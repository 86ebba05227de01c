use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Bounds;

// think / eat の長さを決めるタイマ
pub trait Pause {
    fn sample(&mut self) -> Duration;
}

// 常に同じ長さ
impl Pause for Duration {
    fn sample(&mut self) -> Duration {
        *self
    }
}

// [min, max) の一様分布
pub struct Uniform {
    min: f64,
    max: f64,
    rng: StdRng,
}

impl Uniform {
    pub fn new(bounds: Bounds) -> Self {
        Uniform::with_rng(bounds, StdRng::from_entropy())
    }

    pub fn seeded(bounds: Bounds, seed: u64) -> Self {
        Uniform::with_rng(bounds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(bounds: Bounds, rng: StdRng) -> Self {
        Uniform {
            min: bounds.min.as_secs_f64(),
            max: bounds.max.as_secs_f64(),
            rng,
        }
    }
}

impl Pause for Uniform {
    fn sample(&mut self) -> Duration {
        // 空の範囲は gen_range が panic する
        if self.min >= self.max {
            return Duration::from_secs_f64(self.min);
        }
        Duration::from_secs_f64(self.rng.gen_range(self.min..self.max))
    }
}

// 決められた長さを順番に繰り返す。テストで使う
pub struct Script {
    steps: Vec<Duration>,
    next: usize,
}

impl Script {
    pub fn new(steps: Vec<Duration>) -> Self {
        Script { steps, next: 0 }
    }
}

impl Pause for Script {
    fn sample(&mut self) -> Duration {
        if self.steps.is_empty() {
            return Duration::ZERO;
        }
        let d = self.steps[self.next];
        self.next = (self.next + 1) % self.steps.len();
        d
    }
}
