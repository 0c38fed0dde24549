//! Adapter for an external sensor driver
//!
//! The driver decodes beacon payloads and writes one JSON object per
//! advertisement to our standard input. Each accepted sample becomes a
//! [`Reading`] in the last-value aggregator.

use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::aggregator::LastValueAggregator;
use crate::models::{Reading, SensorSample, Transport};

/// One decoded advertisement as emitted by the driver
#[derive(Debug, Clone, Deserialize)]
pub struct DriverEvent {
    #[serde(flatten)]
    pub sample: SensorSample,
    #[serde(flatten)]
    pub transport: Transport,
}

/// Resolves driver events to readings using the device aliases
#[derive(Debug, Clone)]
pub struct SampleResolver {
    aliases: HashMap<String, String>,
    strict: bool,
}

impl SampleResolver {
    pub fn new(aliases: HashMap<String, String>, strict: bool) -> Self {
        SampleResolver { aliases, strict }
    }

    /// Build a reading for the event, or `None` when strict matching is on and
    /// the MAC address has no alias.
    pub fn resolve(&self, event: &DriverEvent, received_at: OffsetDateTime) -> Option<Reading> {
        let mac = event.transport.mac_address.to_lowercase();
        let device = match self.aliases.get(&mac) {
            Some(alias) => alias.clone(),
            None if self.strict => {
                debug!("Ignoring tag with MAC: {}", mac);
                return None;
            }
            None if event.transport.local_name.is_empty() => mac.clone(),
            None => event.transport.local_name.clone(),
        };

        Some(Reading::from_sample(
            &event.sample,
            &event.transport,
            &device,
            received_at,
        ))
    }
}

/// Feed driver events from `input` into the aggregator until end of input or
/// cancellation. Returns the number of readings recorded.
pub async fn run_driver_input<R>(
    input: R,
    resolver: &SampleResolver,
    aggregator: &LastValueAggregator,
    cancel: CancellationToken,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut recorded = 0usize;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => {
                    info!("Sensor driver input closed");
                    break;
                }
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: DriverEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable driver event: error={} line={:?}", e, line);
                continue;
            }
        };

        if let Some(reading) = resolver.resolve(&event, OffsetDateTime::now_utc()) {
            aggregator.record(reading);
            recorded += 1;
        }
    }

    Ok(recorded)
}
