//! Transmitting side of the ingestion protocol

use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::net::TcpStream;
use url::Url;

use crate::error::{ConfigError, TransmitError};
use crate::models::{Ack, Reading};
use crate::protocol::framed;
use crate::utils::format_optional;

/// Sends batches of readings to an ingestion endpoint, one connection per batch
#[derive(Debug, Clone)]
pub struct IngestClient {
    addr: String,
}

impl IngestClient {
    pub fn new(addr: impl Into<String>) -> Self {
        IngestClient { addr: addr.into() }
    }

    /// Build a client from a `tcp://host:port` URL
    pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: "INGEST_URL",
            value: url.to_string(),
            reason: reason.to_string(),
        };

        if url.scheme() != "tcp" {
            return Err(invalid("scheme must be tcp"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        Ok(IngestClient::new(format!("{}:{}", host, port)))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send every reading over one stream, half-close, and wait for the
    /// server's acknowledgement.
    ///
    /// A failure to send one reading is logged and the rest of the batch is
    /// still attempted; only a missing acknowledgement fails the batch.
    pub async fn send_batch(&self, readings: &[Reading]) -> Result<Ack, TransmitError> {
        let socket = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransmitError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let mut stream = framed(socket);

        for reading in readings {
            let line = match serde_json::to_string(reading) {
                Ok(line) => line,
                Err(e) => {
                    warn!(
                        "Error encoding data: device={} mac={} error={}",
                        reading.device_id, reading.mac_address, e
                    );
                    continue;
                }
            };

            if let Err(e) = stream.send(line).await {
                warn!(
                    "Error sending data: device={} mac={} error={}",
                    reading.device_id, reading.mac_address, e
                );
                continue;
            }
            info!(
                "Sent data: device={} mac={} timestamp={}",
                reading.device_id,
                reading.mac_address,
                format_optional(reading.timestamp.as_ref())
            );
        }

        // Closing the sink shuts down our write half, which ends the server's input.
        SinkExt::<String>::close(&mut stream).await.map_err(TransmitError::Close)?;

        let reply = stream
            .next()
            .await
            .ok_or(TransmitError::MissingAck)?
            .map_err(TransmitError::Ack)?;
        serde_json::from_str(&reply).map_err(TransmitError::AckDecode)
    }
}
