//! Demo host loop: renders frames at a fixed rate and walks the scheduler
//! through every stage of each frame

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::time::interval;
use tracing::{debug, info};

use crate::grenade::GrenadeKind;
use crate::scheduler::{CallbackId, FrameScheduler, FrameStage, MenuPath};
use crate::util::time::seconds_to_ticks;

use super::SceneHost;

/// Seconds between two demo throws by the local player
const THROW_PERIOD_SECONDS: f32 = 2.0;
/// Throw speed range (units per second)
const THROW_SPEED: std::ops::Range<f32> = 400.0..900.0;

/// Totals reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    pub frames: u64,
    pub ticks: u64,
    pub grenades_thrown: u64,
    pub callback_failures: u64,
}

/// Drives a `SceneHost` and its scheduler like a game client would
pub struct DemoDriver {
    host: Arc<SceneHost>,
    scheduler: Arc<FrameScheduler>,
    frametime: f32,
    frame_limit: Option<u64>,
    throw_period_ticks: u64,
    next_throw_tick: u64,
    rng: ChaCha8Rng,
    summary: DriverSummary,
}

impl DemoDriver {
    pub fn new(host: Arc<SceneHost>, scheduler: Arc<FrameScheduler>, host_fps: u32, seed: u64) -> Self {
        let tickrate = scheduler.store().globals().tickrate().max(1);
        let throw_period_ticks = seconds_to_ticks(THROW_PERIOD_SECONDS, tickrate).max(1);
        Self {
            host,
            scheduler,
            frametime: 1.0 / host_fps.max(1) as f32,
            frame_limit: None,
            throw_period_ticks,
            next_throw_tick: throw_period_ticks,
            rng: ChaCha8Rng::seed_from_u64(seed),
            summary: DriverSummary::default(),
        }
    }

    /// Stop after `limit` frames instead of waiting for shutdown
    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn summary(&self) -> DriverSummary {
        self.summary
    }

    /// Render one frame: simulate the elapsed ticks, maybe throw a grenade,
    /// then advance the scheduler through all seven stages
    pub fn step_frame(&mut self) {
        let ticks = self.host.advance_frame(self.frametime);
        self.summary.ticks += ticks;

        if self.host.tick() >= self.next_throw_tick {
            self.next_throw_tick = self.host.tick() + self.throw_period_ticks;
            self.throw_from_local_player();
        }

        for report in self.scheduler.run_frame() {
            if !report.is_clean() {
                self.summary.callback_failures += report.failures.len() as u64;
            }
        }
        self.summary.frames += 1;
    }

    /// Run until `shutdown` resolves or the frame limit is reached
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> DriverSummary {
        info!(
            fps = (1.0 / self.frametime).round() as u32,
            frame_limit = ?self.frame_limit,
            "Demo host started"
        );

        let mut frame_interval = interval(Duration::from_secs_f32(self.frametime));
        frame_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping demo host");
                    break;
                }
                _ = frame_interval.tick() => {}
            }

            self.step_frame();

            if self.frame_limit.is_some_and(|limit| self.summary.frames >= limit) {
                info!(frames = self.summary.frames, "Frame limit reached");
                break;
            }
        }

        info!(
            frames = self.summary.frames,
            ticks = self.summary.ticks,
            grenades = self.summary.grenades_thrown,
            callback_failures = self.summary.callback_failures,
            "Demo host stopped"
        );
        self.summary
    }

    fn throw_from_local_player(&mut self) {
        let snapshot = self.scheduler.store().snapshot();
        let Some(local) = snapshot.local_player() else {
            return;
        };

        let kind = GrenadeKind::ALL[self.rng.gen_range(0..GrenadeKind::ALL.len())];
        let yaw = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let pitch = self.rng.gen_range(0.1..0.8_f32);
        let speed = self.rng.gen_range(THROW_SPEED);
        let direction = Vec3::new(yaw.cos() * pitch.cos(), yaw.sin() * pitch.cos(), pitch.sin());

        let index = self
            .host
            .throw_grenade(kind, Some(local.index), local.eye_position, direction * speed);
        self.summary.grenades_thrown += 1;
        debug!(index = %index, kind = kind.label(), speed, "Demo throw");
    }
}

/// Log the local player's grenade forecast every rendered frame
pub fn install_prediction_logger(scheduler: &FrameScheduler) -> CallbackId {
    scheduler.register(
        FrameStage::RenderStart,
        MenuPath::new(["Scripts", "Grenade prediction"]),
        |ctx| {
            let Some(prediction) = ctx.predictor().predicted_grenade() else {
                return Ok(());
            };
            if prediction.is_live {
                let dump = serde_json::to_string(&prediction)?;
                debug!(tick = ctx.globals().tickcount, prediction = %dump, "Predicted grenade");
            }
            Ok(())
        },
    )
}
