use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One environmental measurement from one physical sensor.
///
/// This is the unit flowing through the whole pipeline: it is what the client
/// sends over the wire, what the server appends to the store, and what the
/// archive files contain. Field names on the wire and in archives are camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Human friendly device name (alias), or the advertised local name
    #[serde(rename = "device")]
    pub device_id: String,
    /// Physical identity, lowercase colon separated hex
    pub mac_address: String,
    pub temperature: f32,
    pub humidity: f32,
    /// Hectopascals
    pub pressure: f32,
    /// Volts
    pub battery_volts: f32,
    pub rssi: i32,
    /// Receipt time, or the batch time once normalized by the aggregator.
    /// A reading without a timestamp is always evicted by the next prune.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

/// Values decoded from one manufacturer payload by the external sensor driver
///
/// Units are the raw driver units: pressure in tenths of a hectopascal and
/// battery in millivolts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub battery_millivolts: f32,
    #[serde(default)]
    pub sequence: u32,
}

/// Radio metadata of the advertisement the sample came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transport {
    pub mac_address: String,
    pub rssi: i32,
    #[serde(default)]
    pub local_name: String,
}

impl Reading {
    /// Build a reading from a driver sample, normalizing pressure to
    /// hectopascals and battery to volts.
    pub fn from_sample(
        sample: &SensorSample,
        transport: &Transport,
        device_id: &str,
        received_at: OffsetDateTime,
    ) -> Self {
        Reading {
            device_id: device_id.to_string(),
            mac_address: transport.mac_address.to_lowercase(),
            temperature: sample.temperature,
            humidity: sample.humidity,
            pressure: sample.pressure / 10.0,
            battery_volts: sample.battery_millivolts / 1000.0,
            rssi: transport.rssi,
            timestamp: Some(received_at),
        }
    }
}

/// Acknowledgement sent once per ingestion stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn ok() -> Self {
        Ack {
            message: "OK".to_string(),
        }
    }
}
