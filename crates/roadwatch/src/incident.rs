//! Durable incident records.
//!
//! An incident is created once per escalation or hazard crossing and never
//! modified afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::GpsReading;

/// What kind of event an incident records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentKind {
    /// Manual SOS from the driver.
    #[serde(rename = "SOS")]
    Sos,
    /// Escalation caused by repeated drowsiness.
    Drowsiness,
    /// Escalation caused by a road hazard.
    Hazard,
    /// Pothole detected by the vibration sensors or the camera.
    Pothole,
    /// Collision.
    Accident,
    /// Anything else reported by an edge device.
    #[serde(untagged)]
    Other(String),
}

impl IncidentKind {
    /// Parse a stored or reported type name. Unknown names are kept verbatim.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "SOS" | "sos" => Self::Sos,
            "Drowsiness" | "drowsiness" => Self::Drowsiness,
            "Hazard" | "hazard" => Self::Hazard,
            "Pothole" | "pothole" => Self::Pothole,
            "Accident" | "accident" => Self::Accident,
            "" => Self::Other("Unknown".to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sos => write!(f, "SOS"),
            Self::Drowsiness => write!(f, "Drowsiness"),
            Self::Hazard => write!(f, "Hazard"),
            Self::Pothole => write!(f, "Pothole"),
            Self::Accident => write!(f, "Accident"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A durable record of an escalation or road event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    /// Identifier assigned by storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Incident type.
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    /// Latitude at creation time (0.0 when unknown).
    pub latitude: f64,
    /// Longitude at creation time (0.0 when unknown).
    pub longitude: f64,
    /// Detector confidence, 0-100.
    pub confidence: f64,
    /// Vibration magnitude, when applicable.
    pub vibration: f64,
    /// Obstacle distance in cm, -1 when not measured.
    pub distance: f64,
    /// Ambient temperature.
    pub temperature: f64,
    /// Ambient humidity.
    pub humidity: f64,
    /// Alcohol reading at the time.
    pub alcohol: f64,
    /// Cellular signal strength reported by the edge device.
    pub network_strength: f64,
    /// Edge device reported the cellular module as connected.
    pub gsm_connected: bool,
    /// Whether this incident was escalated to an external contact.
    pub escalated: bool,
    /// Outbound message, for escalations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    /// Create a non-escalated record at the given location.
    #[must_use]
    pub fn new(kind: IncidentKind, location: &GpsReading) -> Self {
        Self {
            id: None,
            kind,
            latitude: location.latitude,
            longitude: location.longitude,
            confidence: 0.0,
            vibration: 0.0,
            distance: -1.0,
            temperature: 0.0,
            humidity: 0.0,
            alcohol: 0.0,
            network_strength: 0.0,
            gsm_connected: false,
            escalated: false,
            message: None,
            created_at: Utc::now(),
        }
    }

    /// Create the record for an escalation carrying the outbound message.
    #[must_use]
    pub fn escalation(kind: IncidentKind, location: &GpsReading, message: String) -> Self {
        Self {
            confidence: 100.0,
            escalated: true,
            message: Some(message),
            ..Self::new(kind, location)
        }
    }

    /// Create a pothole record from a vibration spike.
    #[must_use]
    pub fn pothole(location: &GpsReading, vibration: f64) -> Self {
        Self {
            vibration,
            confidence: (vibration * 100.0).clamp(0.0, 100.0),
            ..Self::new(IncidentKind::Pothole, location)
        }
    }
}
