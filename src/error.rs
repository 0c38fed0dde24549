//! Error types for the measurement pipeline.
//!
//! Store operations are infallible; everything that touches a file, a socket or
//! the environment reports one of the enums below.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} environment variable not set")]
    Missing { key: &'static str },

    #[error("invalid ingest url '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Failure to read the alias file. Individual malformed lines are not errors.
#[derive(Error, Debug)]
pub enum AliasError {
    #[error("failed to open alias file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read alias file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to write or load an archive snapshot.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to serialize measurements: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write archive '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse archive '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure while serving one ingestion stream. The stream is aborted without
/// an acknowledgement.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("stream receive error: {0}")]
    Receive(#[source] tokio_util::codec::LinesCodecError),

    #[error("undecodable reading after {received} messages: {source}")]
    Decode {
        received: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("send and close: {0}")]
    Ack(#[source] tokio_util::codec::LinesCodecError),

    #[error("failed to encode acknowledgement: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure on the transmitting side of a batch.
#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("receive ack: {0}")]
    Ack(#[source] tokio_util::codec::LinesCodecError),

    #[error("server closed the stream without an acknowledgement")]
    MissingAck,

    #[error("undecodable acknowledgement: {0}")]
    AckDecode(#[source] serde_json::Error),

    #[error("close send: {0}")]
    Close(#[source] tokio_util::codec::LinesCodecError),
}

/// Failure producing a rendered artifact.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to encode series: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render task failed: {0}")]
    Join(#[source] tokio::task::JoinError),
}
