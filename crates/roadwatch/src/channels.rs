//! Channel State Store: the latest reading per sensor channel.
//!
//! Every channel is its own lock, so a slow writer on one channel never
//! holds up another. Writers on the same channel are serialised and the last
//! one wins. Readers always get a whole reading by value.

use tokio::sync::RwLock;

use crate::reading::{
    AlcoholReading, Channel, DrowsinessReading, GpsReading, RadarReading, SensorReading,
    VibrationReading,
};

/// A single latest-value slot.
#[derive(Debug, Default)]
struct Cell<T> {
    value: RwLock<T>,
}

impl<T: Copy> Cell<T> {
    async fn get(&self) -> T {
        *self.value.read().await
    }

    async fn replace(&self, value: T) -> T {
        let mut guard = self.value.write().await;
        std::mem::replace(&mut *guard, value)
    }

    /// Read-modify-write under the channel's write lock.
    async fn update(&self, f: impl FnOnce(&T) -> T) -> (T, T) {
        let mut guard = self.value.write().await;
        let next = f(&guard);
        let previous = std::mem::replace(&mut *guard, next);
        (previous, next)
    }
}

/// Holds the most recent committed reading for every channel.
///
/// Channels that have never been written hold a zero reading stamped with
/// the store's creation time.
#[derive(Debug, Default)]
pub struct ChannelStore {
    gps: Cell<GpsReading>,
    vibration: Cell<VibrationReading>,
    radar: Cell<RadarReading>,
    alcohol: Cell<AlcoholReading>,
    drowsiness: Cell<DrowsinessReading>,
}

impl ChannelStore {
    /// Create a store with every channel at its default reading.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a channel's value, returning the value it replaced.
    pub async fn write(&self, reading: SensorReading) -> SensorReading {
        match reading {
            SensorReading::Gps(r) => SensorReading::Gps(self.gps.replace(r).await),
            SensorReading::Vibration(r) => {
                SensorReading::Vibration(self.vibration.replace(r).await)
            }
            SensorReading::Radar(r) => SensorReading::Radar(self.radar.replace(r).await),
            SensorReading::Alcohol(r) => SensorReading::Alcohol(self.alcohol.replace(r).await),
            SensorReading::Drowsiness(r) => {
                SensorReading::Drowsiness(self.drowsiness.replace(r).await)
            }
        }
    }

    /// Read a channel's most recently committed value.
    pub async fn read(&self, channel: Channel) -> SensorReading {
        match channel {
            Channel::Gps => SensorReading::Gps(self.gps().await),
            Channel::Vibration => SensorReading::Vibration(self.vibration().await),
            Channel::Radar => SensorReading::Radar(self.radar().await),
            Channel::Alcohol => SensorReading::Alcohol(self.alcohol().await),
            Channel::Drowsiness => SensorReading::Drowsiness(self.drowsiness().await),
        }
    }

    /// Latest GPS fix.
    pub async fn gps(&self) -> GpsReading {
        self.gps.get().await
    }

    /// Latest vibration sample.
    pub async fn vibration(&self) -> VibrationReading {
        self.vibration.get().await
    }

    /// Latest radar ping.
    pub async fn radar(&self) -> RadarReading {
        self.radar.get().await
    }

    /// Latest alcohol sample.
    pub async fn alcohol(&self) -> AlcoholReading {
        self.alcohol.get().await
    }

    /// Latest drowsiness state.
    pub async fn drowsiness(&self) -> DrowsinessReading {
        self.drowsiness.get().await
    }

    /// Merge a drowsiness update into the current state atomically.
    ///
    /// `f` sees the last committed reading; returns `(previous, committed)`.
    pub async fn update_drowsiness(
        &self,
        f: impl FnOnce(&DrowsinessReading) -> DrowsinessReading,
    ) -> (DrowsinessReading, DrowsinessReading) {
        self.drowsiness.update(f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unwritten_channels_are_zero() {
        let store = ChannelStore::new();

        let gps = store.gps().await;
        assert_eq!(gps.latitude, 0.0);
        assert_eq!(gps.longitude, 0.0);
        assert!(!store.drowsiness().await.is_drowsy);
        assert_eq!(store.alcohol().await.value, 0.0);
    }

    #[tokio::test]
    async fn test_write_replaces_and_returns_previous() {
        let store = ChannelStore::new();

        let first = AlcoholReading::new(20.0);
        let second = AlcoholReading::new(80.0);
        store.write(SensorReading::Alcohol(first)).await;
        let previous = store.write(SensorReading::Alcohol(second)).await;

        assert_eq!(previous, SensorReading::Alcohol(first));
        assert_eq!(store.read(Channel::Alcohol).await, SensorReading::Alcohol(second));
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let store = ChannelStore::new();
        store
            .write(SensorReading::Gps(GpsReading::new(1.0, 2.0, 3.0)))
            .await;

        assert_eq!(store.vibration().await.magnitude(), 0.0);
        assert_eq!(store.read(Channel::Gps).await.channel(), Channel::Gps);
    }

    #[tokio::test]
    async fn test_update_drowsiness_sees_committed_value() {
        let store = ChannelStore::new();
        store
            .write(SensorReading::Drowsiness(DrowsinessReading::new(true, 4)))
            .await;

        let (previous, committed) = store
            .update_drowsiness(|prev| DrowsinessReading::new(prev.is_drowsy, prev.events + 1))
            .await;

        assert_eq!(previous.events, 4);
        assert_eq!(committed.events, 5);
        assert!(committed.is_drowsy);
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_a_complete_reading() {
        let store = Arc::new(ChannelStore::new());
        let mut tasks = Vec::new();
        for i in 0..32_i32 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let v = f64::from(i);
                store
                    .write(SensorReading::Gps(GpsReading::new(v, v, v)))
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let gps = store.gps().await;
        assert_eq!(gps.latitude, gps.longitude);
        assert_eq!(gps.longitude, gps.speed);
    }
}
