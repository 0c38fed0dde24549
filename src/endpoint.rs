//! Streaming ingestion endpoint
//!
//! Each accepted connection is served by its own task. Readings are appended
//! to the store one by one as they arrive; when the client finishes sending
//! (or the server shuts down) exactly one acknowledgement is written back.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::models::{Ack, Reading};
use crate::protocol::framed;
use crate::render::RenderTrigger;
use crate::store::MeasurementStore;
use crate::utils::format_optional;

pub struct IngestionEndpoint {
    listener: TcpListener,
    store: Arc<MeasurementStore>,
    trigger: Arc<RenderTrigger>,
    shutdown_timeout: Duration,
}

impl IngestionEndpoint {
    /// Bind the listening socket. Failure here is fatal for the server.
    pub async fn bind(
        addr: &str,
        store: Arc<MeasurementStore>,
        trigger: Arc<RenderTrigger>,
        shutdown_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(IngestionEndpoint {
            listener,
            store,
            trigger,
            shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled, then drain in-flight streams for at
    /// most the shutdown timeout.
    pub async fn serve(self, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Ingestion endpoint listening on {}", addr),
            Err(e) => warn!("Ingestion endpoint listening on unknown address: {}", e),
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let store = Arc::clone(&self.store);
                        let trigger = Arc::clone(&self.trigger);
                        let cancel = cancel.clone();
                        connections.spawn(async move {
                            match handle_stream(socket, &store, &trigger, &cancel).await {
                                Ok(count) => info!("Stream from {} done: received={}", peer, count),
                                Err(e) => error!("Stream from {} aborted: error={}", peer, e),
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: error={}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: error={}", e);
                    }
                }
            }
        }

        info!(
            "Stopping ingestion endpoint, draining {} connections",
            connections.len()
        );
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                "Connections still open after {:?}, aborting {}",
                self.shutdown_timeout,
                connections.len()
            );
            connections.shutdown().await;
        }
        info!("Stopped ingestion endpoint");
    }
}

/// Serve one ingestion stream. Returns the number of readings stored.
///
/// End of input and cancellation both end the stream normally with one
/// acknowledgement. Any receive or decode error aborts without one.
pub async fn handle_stream<S>(
    io: S,
    store: &MeasurementStore,
    trigger: &RenderTrigger,
    cancel: &CancellationToken,
) -> Result<usize, IngestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = framed(io);
    let mut received = 0usize;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(IngestError::Receive(e)),
            },
        };

        let reading: Reading = serde_json::from_str(&line)
            .map_err(|source| IngestError::Decode { received, source })?;

        info!(
            "Received measurement: device={} mac={} temperature={:.2} humidity={:.2} pressure={:.2} battery_volts={:.3} rssi={} timestamp={}",
            reading.device_id,
            reading.mac_address,
            reading.temperature,
            reading.humidity,
            reading.pressure,
            reading.battery_volts,
            reading.rssi,
            format_optional(reading.timestamp.as_ref()),
        );

        store.add(reading);
        received += 1;
        trigger.request();
    }

    let ack = serde_json::to_string(&Ack::ok()).map_err(IngestError::Encode)?;
    stream.send(ack).await.map_err(IngestError::Ack)?;
    SinkExt::<String>::close(&mut stream).await.map_err(IngestError::Ack)?;

    Ok(received)
}
