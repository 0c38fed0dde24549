//! Render triggering and the render worker
//!
//! Ingestion asks for a render at most once per threshold. Requests go into a
//! depth-1 slot: while one request is pending, further requests are dropped.
//! A single worker drains the slot, snapshots the store and hands the
//! snapshot to a [`Renderer`]. After a successful render the worker can also
//! archive the same snapshot.

use log::{debug, error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::error::RenderError;
use crate::models::Reading;
use crate::store::{MeasurementStore, Snapshot};

/// Produces a visual artifact from a point-in-time set of readings
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, readings: &[Arc<Reading>]) -> Result<(), RenderError>;
}

/// Pending render request: when it was enqueued
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub requested_at: Instant,
}

/// Coalescing render trigger, owned by the ingestion endpoint
#[derive(Debug)]
pub struct RenderTrigger {
    threshold: Duration,
    last_triggered: Mutex<Instant>,
    slot: mpsc::Sender<RenderRequest>,
}

impl RenderTrigger {
    /// Create a trigger and the receiving end of its depth-1 slot.
    ///
    /// The clock starts now, so the first request is accepted once
    /// `threshold` has elapsed.
    pub fn new(threshold: Duration) -> (Self, mpsc::Receiver<RenderRequest>) {
        let (slot, requests) = mpsc::channel(1);
        let trigger = RenderTrigger {
            threshold,
            last_triggered: Mutex::new(Instant::now()),
            slot,
        };
        (trigger, requests)
    }

    /// Enqueue a render request if the threshold has elapsed since the last
    /// accepted one and no request is pending. Returns whether it was enqueued.
    ///
    /// The trigger time is updated at enqueue, not when the render completes.
    pub fn request(&self) -> bool {
        let mut last = match self.last_triggered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        if now.duration_since(*last) < self.threshold {
            return false;
        }

        match self.slot.try_send(RenderRequest { requested_at: now }) {
            Ok(()) => {
                *last = now;
                debug!("Render request enqueued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Render already scheduled, dropping request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn last_triggered(&self) -> Instant {
        match self.last_triggered.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Serve render requests until cancelled or until every trigger is dropped.
///
/// Renders run one at a time on the blocking pool; a render in progress is
/// allowed to finish before the worker exits. With an `archiver`, every
/// successful render is followed by an archive of the rendered snapshot.
pub async fn run_render_worker(
    store: Arc<MeasurementStore>,
    renderer: Arc<dyn Renderer>,
    archiver: Option<Archiver>,
    mut requests: mpsc::Receiver<RenderRequest>,
    cancel: CancellationToken,
) {
    info!("Starting render worker");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let snapshot = store.all_snapshot();
        if let Err(e) = render_snapshot(snapshot.clone(), &renderer).await {
            error!(
                "Failed to generate plot: error={} waited={:?}",
                e,
                request.requested_at.elapsed()
            );
            continue;
        }

        if let Some(archiver) = &archiver {
            if let Err(e) = archiver.write(&snapshot).await {
                error!("Failed to write archive file: error={}", e);
            }
        }
    }

    info!("Stopped render worker");
}

/// Render one store snapshot on the blocking pool
pub async fn render_snapshot(
    snapshot: Snapshot,
    renderer: &Arc<dyn Renderer>,
) -> Result<(), RenderError> {
    let count = snapshot.len();
    let renderer = Arc::clone(renderer);
    let started = Instant::now();

    info!("Plotting {} measurements", count);
    tokio::task::spawn_blocking(move || renderer.render(&snapshot))
        .await
        .map_err(RenderError::Join)??;
    info!(
        "Plotted {} measurements in {:?}",
        count,
        started.elapsed()
    );
    Ok(())
}

/// One point of a metric time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f32,
}

/// Per-metric time series keyed by device
#[derive(Debug, Default, Serialize)]
pub struct DeviceSeries {
    pub temperature: BTreeMap<String, Vec<SeriesPoint>>,
    pub humidity: BTreeMap<String, Vec<SeriesPoint>>,
    pub pressure: BTreeMap<String, Vec<SeriesPoint>>,
}

impl DeviceSeries {
    /// Group readings by device. Readings without a timestamp cannot be
    /// placed on a time axis and are skipped.
    pub fn from_readings(readings: &[Arc<Reading>]) -> Self {
        let mut series = DeviceSeries::default();

        for reading in readings {
            let Some(timestamp) = reading.timestamp else {
                continue;
            };
            let point = |value| SeriesPoint { timestamp, value };

            series
                .temperature
                .entry(reading.device_id.clone())
                .or_default()
                .push(point(reading.temperature));
            series
                .humidity
                .entry(reading.device_id.clone())
                .or_default()
                .push(point(reading.humidity));
            series
                .pressure
                .entry(reading.device_id.clone())
                .or_default()
                .push(point(reading.pressure));
        }

        for points in series
            .temperature
            .values_mut()
            .chain(series.humidity.values_mut())
            .chain(series.pressure.values_mut())
        {
            points.sort_by_key(|p| p.timestamp);
        }

        series
    }
}

#[derive(Serialize)]
struct SeriesDocument<'a> {
    #[serde(with = "time::serde::rfc3339")]
    generated: OffsetDateTime,
    #[serde(flatten)]
    series: &'a DeviceSeries,
}

/// Default renderer: writes the grouped series as a JSON document that a
/// chart page can load directly.
#[derive(Debug, Clone)]
pub struct SeriesRenderer {
    output: PathBuf,
}

impl SeriesRenderer {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        SeriesRenderer {
            output: output.into(),
        }
    }
}

impl Renderer for SeriesRenderer {
    fn render(&self, readings: &[Arc<Reading>]) -> Result<(), RenderError> {
        let series = DeviceSeries::from_readings(readings);
        let document = SeriesDocument {
            generated: OffsetDateTime::now_utc(),
            series: &series,
        };
        let json = serde_json::to_vec_pretty(&document).map_err(RenderError::Encode)?;

        // Write next to the target and rename so readers never see a torn file.
        let tmp = self.output.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|source| RenderError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.output).map_err(|source| RenderError::Write {
            path: self.output.clone(),
            source,
        })?;

        debug!("Wrote plot data to {}", self.output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use time::macros::datetime;

    struct CountingRenderer {
        renders: AtomicUsize,
    }

    impl Renderer for CountingRenderer {
        fn render(&self, _readings: &[Arc<Reading>]) -> Result<(), RenderError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reading(device: &str, minute: u8, temperature: f32) -> Arc<Reading> {
        Arc::new(Reading {
            device_id: device.to_string(),
            mac_address: String::new(),
            temperature,
            humidity: 40.0,
            pressure: 1000.0,
            battery_volts: 3.0,
            rssi: -60,
            timestamp: Some(datetime!(2024-05-01 12:00 UTC) + time::Duration::minutes(minute as i64)),
        })
    }

    #[tokio::test]
    async fn test_trigger_respects_threshold() {
        let (trigger, _requests) = RenderTrigger::new(Duration::from_secs(3600));
        assert!(!trigger.request());
    }

    #[tokio::test]
    async fn test_coalesces_pending_requests() {
        let (trigger, mut requests) = RenderTrigger::new(Duration::ZERO);

        assert!(trigger.request());
        let first = trigger.last_triggered();
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!trigger.request());

        assert_eq!(trigger.last_triggered(), first);
        assert!(requests.try_recv().is_ok());
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_renders_once_for_coalesced_requests() {
        let store = Arc::new(MeasurementStore::new());
        let counter = Arc::new(CountingRenderer {
            renders: AtomicUsize::new(0),
        });
        let renderer: Arc<dyn Renderer> = counter.clone();
        let (trigger, requests) = RenderTrigger::new(Duration::ZERO);

        assert!(trigger.request());
        assert!(!trigger.request());

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_render_worker(
            Arc::clone(&store),
            renderer,
            None,
            requests,
            cancel.clone(),
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.renders.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        worker.await.unwrap();
        assert_eq!(counter.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_exits_when_trigger_dropped() {
        let store = Arc::new(MeasurementStore::new());
        let renderer: Arc<dyn Renderer> = Arc::new(CountingRenderer {
            renders: AtomicUsize::new(0),
        });
        let (trigger, requests) = RenderTrigger::new(Duration::ZERO);
        drop(trigger);

        run_render_worker(store, renderer, None, requests, CancellationToken::new()).await;
    }

    struct FailingRenderer;

    impl Renderer for FailingRenderer {
        fn render(&self, _readings: &[Arc<Reading>]) -> Result<(), RenderError> {
            Err(RenderError::Write {
                path: PathBuf::from("unwritable"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    async fn render_once_with_archive(renderer: Arc<dyn Renderer>, dir: &std::path::Path) {
        let store = Arc::new(MeasurementStore::new());
        store.add((*reading("Kitchen", 0, 21.0)).clone());
        let archiver = Archiver::new(dir.join("measurements.json"));
        let (trigger, requests) = RenderTrigger::new(Duration::ZERO);
        assert!(trigger.request());
        // Dropping the trigger lets the worker exit once the slot is drained.
        drop(trigger);

        run_render_worker(
            store,
            renderer,
            Some(archiver),
            requests,
            CancellationToken::new(),
        )
        .await;
    }

    #[tokio::test]
    async fn test_successful_render_writes_archive() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(CountingRenderer {
            renders: AtomicUsize::new(0),
        });

        render_once_with_archive(counter.clone(), dir.path()).await;

        assert_eq!(counter.renders.load(Ordering::SeqCst), 1);
        let archives: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(archives.len(), 1);
        assert!(archives[0].starts_with("measurements_"));
    }

    #[tokio::test]
    async fn test_failed_render_skips_archive() {
        let dir = tempdir().unwrap();

        render_once_with_archive(Arc::new(FailingRenderer), dir.path()).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_series_grouped_by_device() {
        let readings = vec![
            reading("Kitchen", 2, 22.0),
            reading("Balcony", 0, 5.0),
            reading("Kitchen", 1, 21.0),
        ];

        let series = DeviceSeries::from_readings(&readings);

        assert_eq!(series.temperature.len(), 2);
        let kitchen: Vec<f32> = series.temperature["Kitchen"].iter().map(|p| p.value).collect();
        assert_eq!(kitchen, vec![21.0, 22.0]);
        assert_eq!(series.pressure["Balcony"].len(), 1);
    }

    #[test]
    fn test_series_renderer_writes_document() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("sensor_data.json");
        let renderer = SeriesRenderer::new(&output);

        renderer
            .render(&[reading("Kitchen", 0, 21.0), reading("Balcony", 0, 5.0)])
            .unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert!(doc.get("generated").is_some());
        assert_eq!(doc["temperature"]["Kitchen"][0]["value"], 21.0);
        assert_eq!(doc["humidity"]["Balcony"].as_array().unwrap().len(), 1);
    }
}
