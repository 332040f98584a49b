//! Frame-stage state machine: snapshot refresh and script callback dispatch

pub mod callbacks;
pub mod stage;

pub use callbacks::{CallbackId, CallbackRegistry, MenuPath, ScriptCallback};
pub use stage::FrameStage;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::entity::SnapshotStore;
use crate::grenade::GrenadePredictor;
use crate::host::HostSimulation;
use crate::trace::TraceEngine;
use crate::util::time::GlobalVars;

/// Scheduler errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Frame stage out of order: expected {expected}, received {received}")]
    OrderingViolation {
        expected: FrameStage,
        received: FrameStage,
    },
}

/// A callback that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackFailure {
    pub stage: FrameStage,
    pub path: MenuPath,
    pub id: CallbackId,
    pub message: String,
}

/// Outcome of one in-order stage advance
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: FrameStage,
    /// New snapshot generation, if this stage refreshed the snapshot
    pub refreshed: Option<u64>,
    /// Callbacks invoked, failed ones included
    pub invoked: usize,
    pub failures: Vec<CallbackFailure>,
}

impl StageReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Read-only view handed to every callback
pub struct ScriptContext<'a> {
    stage: FrameStage,
    store: &'a SnapshotStore,
    trace: &'a TraceEngine,
    predictor: &'a GrenadePredictor,
}

impl<'a> ScriptContext<'a> {
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn store(&self) -> &'a SnapshotStore {
        self.store
    }

    pub fn trace(&self) -> &'a TraceEngine {
        self.trace
    }

    pub fn predictor(&self) -> &'a GrenadePredictor {
        self.predictor
    }

    pub fn globals(&self) -> GlobalVars {
        self.store.globals()
    }
}

/// Follows the host through its frame stages.
///
/// Refreshes the snapshot (and pumps the grenade predictor) when network
/// state is fully applied, then runs the callbacks bound to each stage.
pub struct FrameScheduler {
    host: Arc<dyn HostSimulation>,
    store: Arc<SnapshotStore>,
    trace: Arc<TraceEngine>,
    predictor: Arc<GrenadePredictor>,
    callbacks: CallbackRegistry,
    current: Mutex<FrameStage>,
}

impl FrameScheduler {
    pub fn new(
        host: Arc<dyn HostSimulation>,
        store: Arc<SnapshotStore>,
        trace: Arc<TraceEngine>,
        predictor: Arc<GrenadePredictor>,
    ) -> Self {
        Self {
            host,
            store,
            trace,
            predictor,
            callbacks: CallbackRegistry::new(),
            current: Mutex::new(FrameStage::FrameStart),
        }
    }

    pub fn current_stage(&self) -> FrameStage {
        *self.current.lock()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn trace(&self) -> &Arc<TraceEngine> {
        &self.trace
    }

    pub fn predictor(&self) -> &Arc<GrenadePredictor> {
        &self.predictor
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn register<F>(&self, stage: FrameStage, path: MenuPath, callback: F) -> CallbackId
    where
        F: Fn(&ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(stage, path, callback)
    }

    pub fn unregister(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }

    /// Observe the host entering `stage`.
    ///
    /// Anything but the successor of the current stage is rejected without
    /// refreshing or running callbacks, and the scheduler resynchronizes to
    /// the received stage.
    pub fn advance(&self, stage: FrameStage) -> Result<StageReport, SchedulerError> {
        {
            let mut current = self.current.lock();
            let expected = current.next();
            *current = stage;
            if stage != expected {
                warn!(
                    expected = %expected,
                    received = %stage,
                    "Frame stage out of order, resynchronizing"
                );
                return Err(SchedulerError::OrderingViolation {
                    expected,
                    received: stage,
                });
            }
        }

        let refreshed = if stage.refreshes_snapshot() {
            let generation = self.store.refresh(self.host.capture());
            self.predictor.run();
            Some(generation)
        } else {
            None
        };

        let context = ScriptContext {
            stage,
            store: &self.store,
            trace: &self.trace,
            predictor: &self.predictor,
        };

        let registrations = self.callbacks.for_stage(stage);
        let mut failures = Vec::new();
        for registration in &registrations {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (registration.callback)(&context)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            error!(
                stage = %stage,
                path = %registration.path,
                id = %registration.id,
                error = %message,
                "Script callback failed"
            );
            failures.push(CallbackFailure {
                stage,
                path: registration.path.clone(),
                id: registration.id,
                message,
            });
        }

        if !registrations.is_empty() {
            debug!(
                stage = %stage,
                invoked = registrations.len(),
                failed = failures.len(),
                "Stage callbacks dispatched"
            );
        }

        Ok(StageReport {
            stage,
            refreshed,
            invoked: registrations.len(),
            failures,
        })
    }

    /// Advance through one whole frame, from the successor of the current
    /// stage back around to it
    pub fn run_frame(&self) -> Vec<StageReport> {
        let mut reports = Vec::with_capacity(FrameStage::ALL.len());
        for _ in 0..FrameStage::ALL.len() {
            let next = self.current_stage().next();
            match self.advance(next) {
                Ok(report) => reports.push(report),
                Err(err) => warn!(error = %err, "Frame advance rejected"),
            }
        }
        reports
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::grenade::PredictorSettings;
    use crate::host::{MemoryStore, SceneHost};
    use crate::trace::{StaticWeaponTable, DEFAULT_SMOKE_OPAQUE_DEPTH};
    use crate::world::WorldGeometry;

    fn scheduler() -> FrameScheduler {
        let world = WorldGeometry::empty();
        let host = Arc::new(SceneHost::new(world.clone(), 64));
        let store = Arc::new(SnapshotStore::new(host.clone()));
        let trace = Arc::new(TraceEngine::new(
            store.clone(),
            Arc::new(world),
            Arc::new(StaticWeaponTable::default()),
            DEFAULT_SMOKE_OPAQUE_DEPTH,
        ));
        let predictor = Arc::new(GrenadePredictor::new(
            store.clone(),
            trace.clone(),
            Arc::new(MemoryStore::with_defaults()),
            PredictorSettings::default(),
        ));
        FrameScheduler::new(host, store, trace, predictor)
    }

    #[test]
    fn refresh_happens_once_per_frame() {
        let scheduler = scheduler();
        let reports = scheduler.run_frame();
        assert_eq!(reports.len(), 7);
        let refreshed: Vec<_> = reports.iter().filter_map(|r| r.refreshed).collect();
        assert_eq!(refreshed, vec![1]);
        assert_eq!(scheduler.current_stage(), FrameStage::FrameStart);
    }

    #[test]
    fn out_of_order_advance_runs_nothing_and_resyncs() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        scheduler.register(FrameStage::RenderStart, MenuPath::new(["x"]), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = scheduler.advance(FrameStage::RenderStart).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::OrderingViolation {
                expected: FrameStage::NetUpdateStart,
                received: FrameStage::RenderStart,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.store().generation(), 0);

        // Resynchronized: RenderEnd is now the expected successor
        assert!(scheduler.advance(FrameStage::RenderEnd).is_ok());
    }

    #[test]
    fn failing_and_panicking_callbacks_do_not_stop_siblings() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let path = MenuPath::new(["Scripts", "test"]);

        scheduler.register(FrameStage::NetUpdateStart, path.clone(), |_| anyhow::bail!("boom"));
        scheduler.register(FrameStage::NetUpdateStart, path.clone(), |_| panic!("kaboom"));
        let seen = calls.clone();
        scheduler.register(FrameStage::NetUpdateStart, path, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = scheduler.advance(FrameStage::NetUpdateStart).unwrap();
        assert_eq!(report.invoked, 3);
        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].message, "boom");
        assert!(report.failures[1].message.contains("kaboom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
