//! Periodic maintenance of the measurement store
//!
//! One recurring timer drives every tick: prune readings older than the
//! configured maximum age and, when an archive file is configured, write a
//! snapshot. Both run side by side and the tick only completes once both are
//! done, so ticks never overlap.

use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::config::SchedulerConfig;
use crate::store::MeasurementStore;

/// Outcome of one tick, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub before: usize,
    pub removed: usize,
    pub after: usize,
    pub archived: Option<std::path::PathBuf>,
}

/// Handle to the running scheduler task
pub struct Scheduler {
    cancel: CancellationToken,
    stopped: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the timer task. The first tick fires one period from now.
    pub fn spawn(
        store: Arc<MeasurementStore>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let archiver = config.archive_file.clone().map(Archiver::new);
        let task = tokio::spawn(run(store, config, archiver, cancel.clone()));

        Scheduler {
            cancel,
            stopped: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the timer. Safe to call any number of times from any task.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Shutting down measurements ticker");
            self.cancel.cancel();
        }
    }

    /// Stop the timer and wait for an in-flight tick to finish
    pub async fn shutdown(&self) {
        self.stop();

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Measurements ticker task failed: error={}", e);
            }
            info!("Shut down measurements ticker");
        }
    }
}

async fn run(
    store: Arc<MeasurementStore>,
    config: SchedulerConfig,
    archiver: Option<Archiver>,
    cancel: CancellationToken,
) {
    let period = config.tick_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Measurements ticker started: interval={:?} max_age={:?} archive={}",
        config.tick_interval,
        config.max_age,
        archiver
            .as_ref()
            .map(|a| a.base_path().display().to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                run_tick(&store, config.max_age, archiver.as_ref()).await;
            }
        }
    }
}

/// Run one maintenance tick: archive (if configured) and prune concurrently.
pub async fn run_tick(
    store: &Arc<MeasurementStore>,
    max_age: Duration,
    archiver: Option<&Archiver>,
) -> TickReport {
    let before = store.len();
    info!("Cleaning old measurements: len={}", before);

    let archive_task = archiver.cloned().map(|archiver| {
        let store = Arc::clone(store);
        tokio::spawn(async move {
            let snapshot = store.all_snapshot();
            match archiver.write(&snapshot).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Failed to write archive file: error={}", e);
                    None
                }
            }
        })
    });

    let removed = store.prune_older_than(max_age);
    let after = store.len();
    info!(
        "Cleaned old measurements: removed_items={} len={}",
        removed, after
    );

    let archived = match archive_task {
        Some(task) => match task.await {
            Ok(path) => path,
            Err(e) => {
                error!("Archive task failed: error={}", e);
                None
            }
        },
        None => None,
    };

    TickReport {
        before,
        removed,
        after,
        archived,
    }
}
