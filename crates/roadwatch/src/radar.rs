//! Radar History Buffer.
//!
//! Rebuilds a polar map of the sweep from single-angle pings. Each slot is an
//! independent atomic, so pings at different angles never contend. A slot
//! keeps the last distance seen at its angle until the process restarts.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::reading::{RadarReading, MAX_RADAR_ANGLE};

/// Number of slots in the map, one per degree from 0 to 180 inclusive.
pub const RADAR_SLOTS: usize = MAX_RADAR_ANGLE as usize + 1;

/// Lossy spatial cache of the latest distance per sweep angle.
#[derive(Debug)]
pub struct RadarHistory {
    slots: [AtomicU32; RADAR_SLOTS],
}

impl RadarHistory {
    /// Create an empty map (every slot at 0 cm).
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Store `distance` at `angle`.
    ///
    /// Returns `false` and leaves the map untouched when the angle is not an
    /// integer in 0-180 or the distance is negative or out of range.
    pub fn update(&self, angle: i64, distance: i64) -> bool {
        match RadarReading::new(angle, distance) {
            Some(ping) => {
                self.record(&ping);
                true
            }
            None => false,
        }
    }

    /// Store an already validated ping.
    pub fn record(&self, ping: &RadarReading) {
        if let Some(slot) = self.slots.get(usize::from(ping.angle)) {
            slot.store(ping.distance, Ordering::Relaxed);
        }
    }

    /// Distance last seen at `angle`, if the angle is in range.
    #[must_use]
    pub fn get(&self, angle: u16) -> Option<u32> {
        self.slots
            .get(usize::from(angle))
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Copy of the full map, index = angle in degrees.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect()
    }
}

impl Default for RadarHistory {
    fn default() -> Self {
        Self::new()
    }
}
