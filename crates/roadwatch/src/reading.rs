//! Core sensor reading types for roadwatch.
//!
//! Each edge sensor feeds one [`Channel`]. A reading is an ephemeral snapshot:
//! the next reading on the same channel replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest radar sweep angle in degrees.
pub const MAX_RADAR_ANGLE: u16 = 180;

/// One independent sensor data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// GPS module (position and speed).
    Gps,
    /// Dual accelerometers (left / right wheel vibration).
    Vibration,
    /// Ultrasonic / LiDAR sweep radar.
    Radar,
    /// Alcohol sensor.
    Alcohol,
    /// Camera-based drowsiness detector.
    Drowsiness,
}

impl Channel {
    /// All channels, in ingestion order.
    pub const ALL: [Channel; 5] = [
        Self::Gps,
        Self::Vibration,
        Self::Radar,
        Self::Alcohol,
        Self::Drowsiness,
    ];

    /// Name used for `sensor_logs.sensor_type`.
    #[must_use]
    pub fn log_name(self) -> &'static str {
        match self {
            Self::Gps => "GPS",
            Self::Vibration => "Vibration",
            Self::Radar => "Radar",
            Self::Alcohol => "Alcohol",
            Self::Drowsiness => "Drowsiness",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gps => write!(f, "gps"),
            Self::Vibration => write!(f, "vibration"),
            Self::Radar => write!(f, "radar"),
            Self::Alcohol => write!(f, "alcohol"),
            Self::Drowsiness => write!(f, "drowsiness"),
        }
    }
}

/// Latest GPS fix.
///
/// All-zero coordinates mean "no fix yet", never "at the origin".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Ground speed in km/h.
    pub speed: f64,
    /// Arrival time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl GpsReading {
    /// Create a reading stamped with the current time.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, speed: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed,
            timestamp: Utc::now(),
        }
    }

    /// Whether this reading carries a usable position.
    #[must_use]
    pub fn has_fix(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Map-style coordinate reference, when a fix is available.
    #[must_use]
    pub fn map_link(&self) -> Option<String> {
        self.has_fix().then(|| {
            format!(
                "https://maps.google.com/?q={},{}",
                self.latitude, self.longitude
            )
        })
    }
}

impl Default for GpsReading {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Normalised vibration from the left and right accelerometers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VibrationReading {
    /// Left sensor, 0.0-1.0.
    pub left: f64,
    /// Right sensor, 0.0-1.0.
    pub right: f64,
    /// Arrival time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl VibrationReading {
    /// Create a reading stamped with the current time.
    #[must_use]
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            timestamp: Utc::now(),
        }
    }

    /// The stronger of the two sides.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.left.max(self.right)
    }
}

impl Default for VibrationReading {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A single radar ping: one distance at one sweep angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadarReading {
    /// Sweep angle in degrees, 0-180.
    pub angle: u16,
    /// Distance in centimetres.
    pub distance: u32,
    /// Arrival time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl RadarReading {
    /// Build a validated ping.
    ///
    /// Returns `None` when the angle is outside 0-180 or the distance is
    /// negative or out of range.
    #[must_use]
    pub fn new(angle: i64, distance: i64) -> Option<Self> {
        let angle = u16::try_from(angle)
            .ok()
            .filter(|a| *a <= MAX_RADAR_ANGLE)?;
        let distance = u32::try_from(distance).ok()?;
        Some(Self {
            angle,
            distance,
            timestamp: Utc::now(),
        })
    }
}

impl Default for RadarReading {
    fn default() -> Self {
        Self {
            angle: 0,
            distance: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Alcohol concentration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlcoholLevel {
    /// 30 or below.
    #[default]
    Normal,
    /// Above 30, up to 70.
    Moderate,
    /// Above 70.
    High,
}

impl AlcoholLevel {
    /// Bucket a 0-100 sensor value.
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        if value > 70.0 {
            Self::High
        } else if value > 30.0 {
            Self::Moderate
        } else {
            Self::Normal
        }
    }
}

impl std::fmt::Display for AlcoholLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Moderate => write!(f, "Moderate"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Latest alcohol sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlcoholReading {
    /// Concentration, 0-100.
    pub value: f64,
    /// Bucketed level derived from `value`.
    pub level: AlcoholLevel,
    /// Arrival time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl AlcoholReading {
    /// Create a reading, deriving its level.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            value,
            level: AlcoholLevel::from_value(value),
            timestamp: Utc::now(),
        }
    }
}

impl Default for AlcoholReading {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Latest drowsiness detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrowsinessReading {
    /// Driver currently has eyes closed past the detector's threshold.
    pub is_drowsy: bool,
    /// Cumulative drowsiness events reported by the detector.
    pub events: u64,
    /// Arrival time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl DrowsinessReading {
    /// Create a reading stamped with the current time.
    #[must_use]
    pub fn new(is_drowsy: bool, events: u64) -> Self {
        Self {
            is_drowsy,
            events,
            timestamp: Utc::now(),
        }
    }
}

impl Default for DrowsinessReading {
    fn default() -> Self {
        Self::new(false, 0)
    }
}

/// A reading on any channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorReading {
    /// GPS fix.
    Gps(GpsReading),
    /// Vibration sample.
    Vibration(VibrationReading),
    /// Radar ping.
    Radar(RadarReading),
    /// Alcohol sample.
    Alcohol(AlcoholReading),
    /// Drowsiness state.
    Drowsiness(DrowsinessReading),
}

impl SensorReading {
    /// The channel this reading belongs to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Gps(_) => Channel::Gps,
            Self::Vibration(_) => Channel::Vibration,
            Self::Radar(_) => Channel::Radar,
            Self::Alcohol(_) => Channel::Alcohol,
            Self::Drowsiness(_) => Channel::Drowsiness,
        }
    }

    /// Arrival time of the reading.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Gps(r) => r.timestamp,
            Self::Vibration(r) => r.timestamp,
            Self::Radar(r) => r.timestamp,
            Self::Alcohol(r) => r.timestamp,
            Self::Drowsiness(r) => r.timestamp,
        }
    }
}
