//! Time utilities for the simulation mirror

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Default host tick rate
pub const DEFAULT_TICKRATE: u32 = 64;
/// Default demo host frame rate
pub const DEFAULT_HOST_FPS: u32 = 144;

/// Fixed simulation step for a tick rate (in seconds)
pub fn tick_interval(tickrate: u32) -> f32 {
    1.0 / tickrate.max(1) as f32
}

/// Convert a duration in seconds to whole ticks (rounded to nearest)
pub fn seconds_to_ticks(seconds: f32, tickrate: u32) -> u64 {
    (seconds / tick_interval(tickrate)).round().max(0.0) as u64
}

/// Host global variables captured with every snapshot generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalVars {
    /// Server tick counter
    pub tickcount: u64,
    /// Seconds per tick
    pub tick_interval: f32,
    /// Simulation time (tickcount * tick_interval)
    pub curtime: f32,
    /// Wall-clock seconds since the host started
    pub realtime: f32,
    /// Duration of the last rendered frame
    pub frametime: f32,
}

impl GlobalVars {
    pub fn new(tickrate: u32) -> Self {
        Self {
            tickcount: 0,
            tick_interval: tick_interval(tickrate),
            curtime: 0.0,
            realtime: 0.0,
            frametime: 0.0,
        }
    }

    /// Ticks per second
    pub fn tickrate(&self) -> u32 {
        if self.tick_interval <= 0.0 {
            return 0;
        }
        (1.0 / self.tick_interval).round() as u32
    }
}

impl Default for GlobalVars {
    fn default() -> Self {
        Self::new(DEFAULT_TICKRATE)
    }
}

/// Accumulates rendered frame time into whole simulation ticks.
///
/// The host renders faster than it simulates, so several frames may share a
/// tick; the tick counter only moves once a full interval has elapsed.
#[derive(Debug, Clone)]
pub struct TickClock {
    globals: GlobalVars,
    accumulator: f32,
    started: Instant,
}

impl TickClock {
    pub fn new(tickrate: u32) -> Self {
        Self {
            globals: GlobalVars::new(tickrate),
            accumulator: 0.0,
            started: Instant::now(),
        }
    }

    /// Advance by one rendered frame of `frametime` seconds.
    /// Returns the number of ticks that elapsed.
    pub fn advance_frame(&mut self, frametime: f32) -> u64 {
        let interval = self.globals.tick_interval;
        self.accumulator += frametime.max(0.0);
        let mut elapsed = 0;
        while self.accumulator >= interval {
            self.accumulator -= interval;
            elapsed += 1;
        }
        self.globals.tickcount += elapsed;
        self.globals.curtime = self.globals.tickcount as f32 * interval;
        self.globals.frametime = frametime;
        self.globals.realtime = self.started.elapsed().as_secs_f32();
        elapsed
    }

    /// Force a whole tick forward (used by scripted hosts and tests)
    pub fn advance_tick(&mut self) {
        self.globals.tickcount += 1;
        self.globals.curtime = self.globals.tickcount as f32 * self.globals.tick_interval;
        self.globals.frametime = self.globals.tick_interval;
    }

    pub fn globals(&self) -> GlobalVars {
        self.globals
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICKRATE)
    }
}
