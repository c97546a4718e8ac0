use crate::sw_interface::SimTime;

/// Countdown timer over simulation ticks
///
/// Each timer owns its clock; the owner calls `step()` once per tick and
/// `query()` to find out whether `rate` ticks have passed since the last
/// reset. A locked timer ignores `reset` and `set`.
#[derive(Debug, Clone)]
pub struct Timer {
    rate: SimTime,
    now: SimTime,
    tick: SimTime,
    locked: bool,
}

impl Timer {
    pub fn new(rate: SimTime) -> Self {
        Self {
            rate,
            now: 0,
            tick: 0,
            locked: false,
        }
    }

    pub fn step(&mut self) {
        self.now += 1;
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn rate(&self) -> SimTime {
        self.rate
    }

    /// True once the interval has elapsed; restarts the countdown when it fires
    pub fn query(&mut self) -> bool {
        if self.remaining() <= 0 {
            self.reset();
            true
        } else {
            false
        }
    }

    /// True once the interval has elapsed, without touching the countdown
    pub fn peek(&self) -> bool {
        self.remaining() <= 0
    }

    pub fn remaining(&self) -> i64 {
        self.rate as i64 - (self.now - self.tick) as i64
    }

    pub fn reset(&mut self) {
        if !self.locked {
            self.tick = self.now;
        }
    }

    pub fn set(&mut self, rate: SimTime) {
        if !self.locked {
            self.rate = rate;
            self.reset();
        }
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}
