//! Last-value aggregation on the transmitting side
//!
//! Between transmit ticks only the newest reading per device is kept. On each
//! tick the buffered readings are stamped with the tick time, so one batch is
//! one reporting round, and sent to the ingestion endpoint.

use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::IngestClient;
use crate::models::Reading;
use crate::utils::format_datetime;

#[derive(Debug, Default)]
pub struct LastValueAggregator {
    latest: Mutex<HashMap<String, Reading>>,
}

impl LastValueAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a reading, replacing any earlier one from the same sensor
    pub fn record(&self, reading: Reading) {
        let mut latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Received measures for {}", reading.device_id);
        latest.insert(reading.mac_address.clone(), reading);
    }

    pub fn len(&self) -> usize {
        match self.latest.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the buffered readings, leaving the buffer empty, with every
    /// timestamp set to `tick`.
    ///
    /// The buffer is emptied whether or not the batch is later delivered;
    /// readings recorded after this call go to the next batch.
    pub fn take_batch(&self, tick: OffsetDateTime) -> Vec<Reading> {
        let drained = {
            let mut latest = match self.latest.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *latest)
        };

        let mut batch: Vec<Reading> = drained
            .into_values()
            .map(|mut reading| {
                reading.timestamp = Some(tick);
                reading
            })
            .collect();
        batch.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        batch
    }
}

/// Transmit the aggregated batch on every tick until cancelled
pub async fn run_transmitter(
    aggregator: &LastValueAggregator,
    client: &IngestClient,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Transmitting to {} every {:?}", client.addr(), period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                transmit_once(aggregator, client).await;
            }
        }
    }

    info!("Stopped transmitter");
}

/// Take one batch and send it. Returns the number of readings in the batch.
pub async fn transmit_once(aggregator: &LastValueAggregator, client: &IngestClient) -> usize {
    let started = Instant::now();
    let tick = OffsetDateTime::now_utc();
    let batch = aggregator.take_batch(tick);

    if batch.is_empty() {
        debug!("Nothing to stream at {}", format_datetime(&tick));
        return 0;
    }

    info!("Streaming {} results", batch.len());
    match client.send_batch(&batch).await {
        Ok(ack) => info!(
            "Server responded: {:?} count={} duration={:?}",
            ack.message,
            batch.len(),
            started.elapsed()
        ),
        Err(e) => error!(
            "Failed to send measurements: error={} count={}",
            e,
            batch.len()
        ),
    }

    batch.len()
}
