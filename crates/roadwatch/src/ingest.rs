//! Lenient decoding of producer payloads.
//!
//! A garbled sensor sample must never crash ingestion, so nothing here
//! returns an error. Bodies that are not JSON decode as an empty payload,
//! numeric fields that cannot be read become `0.0`, and fields that must not
//! be guessed (radar angle, drowsiness state) come back as `None`.

use serde_json::Value;

use crate::incident::{IncidentKind, IncidentRecord};
use crate::reading::{
    AlcoholReading, DrowsinessReading, GpsReading, RadarReading, VibrationReading,
};

/// A decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(Value);

impl Payload {
    /// Decode a raw body. Anything that isn't JSON becomes an empty payload.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        Self(serde_json::from_slice(body).unwrap_or(Value::Null))
    }

    /// Wrap an already-decoded value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Read a float field, coercing anything unreadable to `0.0`.
    #[must_use]
    pub fn f64_or_zero(&self, name: &str) -> f64 {
        self.f64(name).unwrap_or(0.0)
    }

    /// Read a finite float field.
    #[must_use]
    pub fn f64(&self, name: &str) -> Option<f64> {
        let value = match self.field(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// Read an integer field. Fractional values are truncated toward zero.
    #[must_use]
    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.field(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(truncate))
            }
            _ => None,
        }
    }

    /// Read a boolean field. Accepts JSON booleans, 0/1 and "true"/"false".
    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.field(name)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Read a string field.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Decode a GPS fix.
    #[must_use]
    pub fn gps(&self) -> GpsReading {
        GpsReading::new(
            self.f64_or_zero("latitude"),
            self.f64_or_zero("longitude"),
            self.f64_or_zero("speed"),
        )
    }

    /// Decode a vibration sample.
    #[must_use]
    pub fn vibration(&self) -> VibrationReading {
        VibrationReading::new(self.f64_or_zero("left"), self.f64_or_zero("right"))
    }

    /// Decode a radar ping. `None` when the angle or distance is unusable.
    #[must_use]
    pub fn radar(&self) -> Option<RadarReading> {
        RadarReading::new(self.i64("angle")?, self.i64("distance")?)
    }

    /// Decode an alcohol sample.
    #[must_use]
    pub fn alcohol(&self) -> AlcoholReading {
        AlcoholReading::new(self.f64_or_zero("value"))
    }

    /// Decode a drowsiness update on top of the last known state.
    ///
    /// Missing or unreadable fields keep their previous value.
    #[must_use]
    pub fn drowsiness(&self, previous: &DrowsinessReading) -> DrowsinessReading {
        let is_drowsy = self.bool("isDrowsy").unwrap_or(previous.is_drowsy);
        let events = self
            .i64("events")
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(previous.events);
        DrowsinessReading::new(is_drowsy, events)
    }

    /// Decode a road event report from an edge device.
    #[must_use]
    pub fn road_event(&self) -> IncidentRecord {
        let kind = IncidentKind::parse(self.str("type").unwrap_or_default());
        let location = GpsReading::new(
            self.f64_or_zero("latitude"),
            self.f64_or_zero("longitude"),
            0.0,
        );
        IncidentRecord {
            confidence: self.f64_or_zero("confidence"),
            vibration: self.f64_or_zero("vibration"),
            distance: self.f64("distance").unwrap_or(-1.0),
            temperature: self.f64_or_zero("temperature"),
            humidity: self.f64_or_zero("humidity"),
            alcohol: self.f64_or_zero("alcohol"),
            network_strength: self.f64_or_zero("network_strength"),
            gsm_connected: self.bool("gsm_connected").unwrap_or(false),
            escalated: self.bool("sos_alert").unwrap_or(false),
            ..IncidentRecord::new(kind, &location)
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> Option<i64> {
    (value.is_finite() && value.abs() < 9.0e18).then(|| value.trunc() as i64)
}
