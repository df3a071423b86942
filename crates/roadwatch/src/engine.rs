//! Sensor fusion engine.
//!
//! Wires the data flow: a decoded payload is committed to the channel store,
//! fans out to the derived state (radar map, alert state machine, hazard
//! detection) and is handed to the persistence sidecar. HTTP handlers call
//! into [`Engine`] and stay thin.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::alert::{AlertEngine, AlertOutcome, AlertPolicy, AlertSnapshot};
use crate::channels::ChannelStore;
use crate::config::{Config, HazardConfig};
use crate::error::Result;
use crate::escalation::{EscalationOutcome, Escalator, Trigger};
use crate::incident::IncidentRecord;
use crate::ingest::Payload;
use crate::notify::Notifier;
use crate::radar::RadarHistory;
use crate::reading::{
    AlcoholReading, DrowsinessReading, GpsReading, RadarReading, SensorReading, VibrationReading,
};
use crate::sidecar::{LogEntry, Sidecar};
use crate::storage::{DrowsinessLog, SensorLog};

const EVENT_CAPACITY: usize = 64;

/// Something subscribers may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    /// The drowsiness counter crossed the next voice-alert threshold.
    VoiceAlert {
        /// Event count at the crossing.
        events: u64,
        /// When it fired.
        at: DateTime<Utc>,
    },
    /// A new critical-alert message was appended to the log.
    CriticalMessage {
        /// The message.
        text: String,
    },
    /// An escalation finished.
    Escalation {
        /// What caused it.
        trigger: Trigger,
        /// How it went.
        outcome: EscalationOutcome,
    },
    /// Vibration crossed the pothole threshold.
    Hazard {
        /// Vibration magnitude that crossed.
        vibration: f64,
        /// Where.
        latitude: f64,
        /// Where.
        longitude: f64,
    },
}

/// Reply for `GET /api/gsm-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GsmStatus {
    /// A notification command is configured.
    pub connected: bool,
    /// Human-readable state.
    pub status: String,
    /// Escalated incidents on record.
    pub alerts_sent: i64,
}

/// Drowsiness state plus recent history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrowsinessView {
    /// Latest committed reading.
    pub current: DrowsinessReading,
    /// Most recent history rows, newest first. Empty when the store is
    /// unavailable.
    pub history: Vec<DrowsinessLog>,
}

/// The live engine shared by all request handlers.
#[derive(Debug)]
pub struct Engine {
    channels: Arc<ChannelStore>,
    radar: RadarHistory,
    alerts: AlertEngine,
    drowsiness_gate: Mutex<()>,
    sidecar: Sidecar,
    escalator: Escalator,
    hazards: HazardConfig,
    history_limit: usize,
    events: broadcast::Sender<AlertEvent>,
}

impl Engine {
    /// Build an engine around an already running sidecar.
    #[must_use]
    pub fn new(config: &Config, sidecar: Sidecar, notifier: Arc<dyn Notifier>) -> Self {
        let channels = Arc::new(ChannelStore::new());
        let escalator = Escalator::new(
            Arc::clone(&channels),
            sidecar.clone(),
            notifier,
            config.notification_timeout(),
            config.alerts.escalation_threshold,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            channels,
            radar: RadarHistory::new(),
            alerts: AlertEngine::new(AlertPolicy::from(&config.alerts)),
            drowsiness_gate: Mutex::new(()),
            sidecar,
            escalator,
            hazards: config.hazards.clone(),
            history_limit: config.alerts.history_limit,
            events,
        }
    }

    /// Subscribe to alert events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    /// The persistence sidecar.
    #[must_use]
    pub fn sidecar(&self) -> &Sidecar {
        &self.sidecar
    }

    fn publish(&self, event: AlertEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn log_reading(&self, reading: &SensorReading) {
        if let Some(log) = SensorLog::from_reading(reading) {
            self.sidecar.append(LogEntry::Sensor(log));
        }
    }

    // === Ingestion ===

    /// Commit a GPS fix.
    pub async fn ingest_gps(&self, payload: &Payload) -> GpsReading {
        let reading = payload.gps();
        self.channels.write(SensorReading::Gps(reading)).await;
        debug!(lat = reading.latitude, lon = reading.longitude, "GPS updated");
        self.log_reading(&SensorReading::Gps(reading));
        reading
    }

    /// Commit a vibration sample and check for a pothole crossing.
    pub async fn ingest_vibration(&self, payload: &Payload) -> VibrationReading {
        let reading = payload.vibration();
        let previous = match self.channels.write(SensorReading::Vibration(reading)).await {
            SensorReading::Vibration(previous) => previous,
            _ => VibrationReading::default(),
        };
        debug!(left = reading.left, right = reading.right, "Vibration updated");

        let threshold = self.hazards.vibration_log_threshold;
        if reading.left >= threshold || reading.right >= threshold {
            self.log_reading(&SensorReading::Vibration(reading));
        }

        let pothole = self.hazards.pothole_vibration_threshold;
        if previous.magnitude() < pothole && reading.magnitude() >= pothole {
            let location = self.channels.gps().await;
            info!(vibration = reading.magnitude(), "Pothole detected");
            self.sidecar.append(LogEntry::Incident(IncidentRecord::pothole(
                &location,
                reading.magnitude(),
            )));
            self.publish(AlertEvent::Hazard {
                vibration: reading.magnitude(),
                latitude: location.latitude,
                longitude: location.longitude,
            });
        }

        reading
    }

    /// Commit a radar ping. Invalid pings are discarded and return `None`.
    pub async fn ingest_radar(&self, payload: &Payload) -> Option<RadarReading> {
        let Some(ping) = payload.radar() else {
            debug!("Discarded radar ping with invalid angle or distance");
            return None;
        };
        self.radar.record(&ping);
        self.channels.write(SensorReading::Radar(ping)).await;
        self.log_reading(&SensorReading::Radar(ping));
        Some(ping)
    }

    /// Commit an alcohol sample.
    pub async fn ingest_alcohol(&self, payload: &Payload) -> AlcoholReading {
        let reading = payload.alcohol();
        self.channels.write(SensorReading::Alcohol(reading)).await;
        debug!(value = reading.value, level = %reading.level, "Alcohol updated");
        self.log_reading(&SensorReading::Alcohol(reading));
        reading
    }

    /// Merge a drowsiness update and run it through the alert state machine.
    ///
    /// An auto-escalation, if due, runs on its own task.
    pub async fn ingest_drowsiness(&self, payload: &Payload) -> (DrowsinessReading, AlertOutcome) {
        // Commit and observe in the same order.
        let gate = self.drowsiness_gate.lock().await;
        let (_, reading) = self
            .channels
            .update_drowsiness(|previous| payload.drowsiness(previous))
            .await;
        debug!(
            is_drowsy = reading.is_drowsy,
            events = reading.events,
            "Drowsiness updated"
        );
        self.sidecar.append(LogEntry::Drowsiness(reading));

        let now = Utc::now();
        let outcome = self.alerts.observe(&reading, now).await;
        drop(gate);

        if outcome.voice_alert {
            self.publish(AlertEvent::VoiceAlert {
                events: reading.events,
                at: now,
            });
        }
        if let Some(text) = &outcome.message {
            self.publish(AlertEvent::CriticalMessage { text: text.clone() });
        }
        if outcome.escalate {
            info!(events = reading.events, "Scheduling drowsiness escalation");
            let escalator = self.escalator.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                let outcome = escalator.escalate(Trigger::Drowsiness, None).await;
                let _ = events.send(AlertEvent::Escalation {
                    trigger: Trigger::Drowsiness,
                    outcome,
                });
            });
        }

        (reading, outcome)
    }

    /// Run an escalation and wait for its outcome.
    pub async fn escalate(&self, trigger: Trigger, context: Option<&str>) -> EscalationOutcome {
        let outcome = self.escalator.escalate(trigger, context).await;
        self.publish(AlertEvent::Escalation {
            trigger,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Store a road event reported by an edge device.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn record_road_event(&self, payload: &Payload) -> Result<i64> {
        let record = payload.road_event();
        let kind = record.kind.clone();
        let id = self.sidecar.record_incident(record).await?;
        info!(id, %kind, "Road event recorded");
        Ok(id)
    }

    // === Reads ===

    /// Latest GPS fix.
    pub async fn gps(&self) -> GpsReading {
        self.channels.gps().await
    }

    /// Latest vibration sample.
    pub async fn vibration(&self) -> VibrationReading {
        self.channels.vibration().await
    }

    /// Latest radar ping.
    pub async fn radar(&self) -> RadarReading {
        self.channels.radar().await
    }

    /// Copy of the full radar map.
    #[must_use]
    pub fn radar_map(&self) -> Vec<u32> {
        self.radar.snapshot()
    }

    /// Latest alcohol sample.
    pub async fn alcohol(&self) -> AlcoholReading {
        self.channels.alcohol().await
    }

    /// Latest drowsiness state with recent history.
    ///
    /// History comes from the store; when that fails the current state is
    /// still returned.
    pub async fn drowsiness(&self) -> DrowsinessView {
        let current = self.channels.drowsiness().await;
        let limit = self.history_limit;
        let history = self
            .sidecar
            .query(move |s| s.recent_drowsiness_logs(limit))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Drowsiness history unavailable");
                Vec::new()
            });
        DrowsinessView { current, history }
    }

    /// Alert state as of now.
    pub async fn alerts(&self) -> AlertSnapshot {
        self.alerts.snapshot(Utc::now()).await
    }

    /// State of the notification channel.
    pub async fn gsm_status(&self) -> GsmStatus {
        let notifier = self.escalator.notifier();
        let connected = notifier.is_configured();
        let alerts_sent = self
            .sidecar
            .query(|s| s.count_escalations())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Escalation count unavailable");
                0
            });
        GsmStatus {
            connected,
            status: if connected {
                format!("Connected ({})", notifier.name())
            } else {
                "Not configured".to_string()
            },
            alerts_sent,
        }
    }

    /// Most recent incidents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn recent_incidents(&self, limit: usize) -> Result<Vec<IncidentRecord>> {
        self.sidecar.query(move |s| s.recent_incidents(limit)).await
    }

    /// Most recent sensor history rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn recent_sensor_logs(&self, limit: usize) -> Result<Vec<SensorLog>> {
        self.sidecar.query(move |s| s.recent_sensor_logs(limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentKind;
    use crate::notify::UnconfiguredNotifier;
    use crate::storage::Storage;
    use serde_json::json;
    use std::time::Duration;

    fn engine_with(config: &Config) -> Engine {
        let (sidecar, _worker) = Sidecar::spawn(Storage::open_in_memory().unwrap(), 256);
        Engine::new(config, sidecar, Arc::new(UnconfiguredNotifier))
    }

    fn engine() -> Engine {
        engine_with(&Config::default())
    }

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_value(value)
    }

    #[tokio::test]
    async fn test_voice_alert_event_fires_once() {
        let engine = engine();
        let mut events = engine.subscribe();

        for n in 0..=5 {
            engine
                .ingest_drowsiness(&payload(json!({"isDrowsy": false, "events": n})))
                .await;
        }

        let mut voice = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AlertEvent::VoiceAlert { events, .. } = event {
                voice.push(events);
            }
        }
        assert_eq!(voice, vec![5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drowsiness_keeps_alert_state_in_step() {
        let engine = Arc::new(engine());

        let tasks: Vec<_> = (1..=40_u64)
            .map(|n| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .ingest_drowsiness(&payload(json!({"isDrowsy": false, "events": n})))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let committed = engine.drowsiness().await.current.events;
        let snapshot = engine.alerts().await;
        assert_eq!(snapshot.cumulative_events, committed);
    }

    #[tokio::test]
    async fn test_drowsiness_keeps_last_known_and_logs_history() {
        let engine = engine();
        engine
            .ingest_drowsiness(&payload(json!({"isDrowsy": true, "events": 3})))
            .await;
        let (reading, _) = engine.ingest_drowsiness(&payload(json!({}))).await;

        assert!(reading.is_drowsy);
        assert_eq!(reading.events, 3);

        let view = engine.drowsiness().await;
        assert_eq!(view.current.events, 3);
        assert_eq!(view.history.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_escalation_records_incident() {
        let engine = engine();
        let mut events = engine.subscribe();

        let (_, outcome) = engine
            .ingest_drowsiness(&payload(json!({"isDrowsy": true, "events": 10})))
            .await;
        assert!(outcome.escalate);

        let escalation = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(AlertEvent::Escalation { trigger, outcome }) = events.recv().await {
                    return (trigger, outcome);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(escalation.0, Trigger::Drowsiness);
        assert!(!escalation.1.accepted);
        let incidents = engine.recent_incidents(10).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::Drowsiness);
    }

    #[tokio::test]
    async fn test_pothole_rising_edge_only() {
        let engine = engine();
        let mut events = engine.subscribe();

        for (left, right) in [(0.2, 0.1), (0.9, 0.3), (0.95, 0.9), (0.1, 0.1), (0.2, 0.85)] {
            engine
                .ingest_vibration(&payload(json!({"left": left, "right": right})))
                .await;
        }

        let incidents = engine.recent_incidents(10).await.unwrap();
        assert_eq!(incidents.len(), 2);
        assert!(incidents.iter().all(|i| i.kind == IncidentKind::Pothole));

        let mut hazards = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AlertEvent::Hazard { .. }) {
                hazards += 1;
            }
        }
        assert_eq!(hazards, 2);
    }

    #[tokio::test]
    async fn test_vibration_log_threshold() {
        let mut config = Config::default();
        config.hazards.vibration_log_threshold = 0.5;
        let engine = engine_with(&config);

        engine
            .ingest_vibration(&payload(json!({"left": 0.1, "right": 0.2})))
            .await;
        engine
            .ingest_vibration(&payload(json!({"left": 0.1, "right": 0.6})))
            .await;

        let logs = engine.recent_sensor_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].value_2, Some(0.6));
    }

    #[tokio::test]
    async fn test_radar_ingestion() {
        let engine = engine();
        assert!(engine
            .ingest_radar(&payload(json!({"angle": -1, "distance": 50})))
            .await
            .is_none());
        let ping = engine
            .ingest_radar(&payload(json!({"angle": 90, "distance": 120})))
            .await
            .unwrap();

        assert_eq!(ping.angle, 90);
        assert_eq!(engine.radar().await.distance, 120);
        let map = engine.radar_map();
        assert_eq!(map[90], 120);
        assert_eq!(map.iter().filter(|d| **d != 0).count(), 1);

        let logs = engine.recent_sensor_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].sensor_type, "Radar");
    }

    #[tokio::test]
    async fn test_manual_escalation_publishes_event() {
        let engine = engine();
        let mut events = engine.subscribe();

        let outcome = engine.escalate(Trigger::Manual, Some("help")).await;

        assert!(!outcome.accepted);
        assert!(outcome.incident_id.is_some());
        assert!(matches!(
            events.try_recv(),
            Ok(AlertEvent::Escalation {
                trigger: Trigger::Manual,
                ..
            })
        ));
        assert_eq!(engine.gsm_status().await.alerts_sent, 1);
    }

    #[tokio::test]
    async fn test_gsm_status_unconfigured() {
        let status = engine().gsm_status().await;
        assert!(!status.connected);
        assert_eq!(status.status, "Not configured");
        assert_eq!(status.alerts_sent, 0);
    }

    #[tokio::test]
    async fn test_reads_survive_unavailable_store() {
        let engine = Engine::new(
            &Config::default(),
            Sidecar::unavailable(),
            Arc::new(UnconfiguredNotifier),
        );
        engine
            .ingest_drowsiness(&payload(json!({"isDrowsy": true, "events": 1})))
            .await;

        let view = engine.drowsiness().await;
        assert!(view.current.is_drowsy);
        assert!(view.history.is_empty());
        assert!(engine.recent_incidents(5).await.is_err());
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_on_stalled_store() {
        let (sidecar, _worker) = Sidecar::spawn(Storage::open_in_memory().unwrap(), 256);
        let sidecar = sidecar.with_reply_timeout(Duration::from_millis(100));
        let engine = Engine::new(&Config::default(), sidecar.clone(), Arc::new(UnconfiguredNotifier));
        engine
            .ingest_drowsiness(&payload(json!({"isDrowsy": true, "events": 2})))
            .await;

        let stall = tokio::spawn({
            let sidecar = sidecar.with_reply_timeout(Duration::from_secs(10));
            async move {
                sidecar
                    .query(|_| {
                        std::thread::sleep(Duration::from_millis(1500));
                        Ok(())
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let view = engine.drowsiness().await;
        let gsm = engine.gsm_status().await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(view.current.events, 2);
        assert!(view.history.is_empty());
        assert_eq!(gsm.alerts_sent, 0);
        stall.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_road_event_recorded() {
        let engine = engine();
        let id = engine
            .record_road_event(&payload(json!({
                "type": "Accident",
                "latitude": 12.9,
                "longitude": 77.6,
                "sos_alert": true
            })))
            .await
            .unwrap();

        let incidents = engine.recent_incidents(50).await.unwrap();
        assert_eq!(incidents[0].id, Some(id));
        assert_eq!(incidents[0].kind, IncidentKind::Accident);
        assert!(incidents[0].escalated);
    }
}
