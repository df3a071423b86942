//! Alert Throttle State Machine.
//!
//! Turns the drowsiness detector's cumulative event counter into:
//!
//! - a voice-alert trigger every `voice_alert_interval` events,
//! - a recent alert rate over a trailing window, computed when it is read,
//! - a critical-alert log that never shows the same message twice in a row,
//! - eligibility for a drowsiness escalation once the counter is high enough.
//!
//! This is the only place that maps the counter to a [`Severity`]; every other
//! consumer sees the raw `isDrowsy` flag and counter.
//!
//! All counter state lives behind one mutex, so two concurrent readings can
//! never both observe the same stale threshold and fire twice.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AlertConfig;
use crate::reading::DrowsinessReading;

/// Assistant message below the locale threshold.
pub const DEFAULT_CRITICAL_MESSAGE: &str = "Wake up! Critical Alert! Driver Drowsiness Detected.";

/// Assistant message at or above the locale threshold.
pub const LOCALE_CRITICAL_MESSAGE: &str =
    "Neend aa rahi hai kya? Ya koi problem hai? Bas uth jao aur gaadi side mein lagao.";

/// Severity derived from a drowsiness reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Driver is awake.
    Clear,
    /// Driver is drowsy right now.
    Drowsy,
    /// Drowsy with enough events to switch to the locale-specific message.
    Critical,
    /// Enough events to be eligible for escalation.
    Emergency,
}

/// Thresholds that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Voice alert every this many events.
    pub voice_alert_interval: u64,
    /// Trailing window for the recent alert rate.
    pub window: Duration,
    /// Locale-specific assistant message from this many events.
    pub assistant_threshold: u64,
    /// Escalation eligible from this many events.
    pub escalation_threshold: u64,
    /// Request an escalation automatically when eligible.
    pub auto_escalate: bool,
    /// Critical-alert log capacity.
    pub log_capacity: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for AlertPolicy {
    fn from(config: &AlertConfig) -> Self {
        Self {
            voice_alert_interval: config.voice_alert_interval.max(1),
            window: Duration::from_secs(config.window_secs),
            assistant_threshold: config.assistant_threshold,
            escalation_threshold: config.escalation_threshold,
            auto_escalate: config.auto_escalate,
            log_capacity: config.log_capacity.max(1),
        }
    }
}

impl AlertPolicy {
    /// Map a reading to a severity.
    ///
    /// `Emergency` depends on the counter alone. The other levels require the
    /// driver to be drowsy right now.
    #[must_use]
    pub fn severity(&self, reading: &DrowsinessReading) -> Severity {
        if reading.events >= self.escalation_threshold {
            Severity::Emergency
        } else if reading.is_drowsy && reading.events >= self.assistant_threshold {
            Severity::Critical
        } else if reading.is_drowsy {
            Severity::Drowsy
        } else {
            Severity::Clear
        }
    }

    /// The assistant's spoken message for the given event count.
    #[must_use]
    pub fn assistant_message(&self, events: u64) -> &'static str {
        if events >= self.assistant_threshold {
            LOCALE_CRITICAL_MESSAGE
        } else {
            DEFAULT_CRITICAL_MESSAGE
        }
    }

    fn window_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

/// One entry of the critical-alert log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    /// Displayed text.
    pub text: String,
    /// BLAKE3 hash of `text`.
    pub fingerprint: String,
    /// When the entry was appended.
    pub at: DateTime<Utc>,
}

impl AlertMessage {
    fn new(text: String, at: DateTime<Utc>) -> Self {
        let fingerprint = fingerprint(&text);
        Self {
            text,
            fingerprint,
            at,
        }
    }
}

/// Fingerprint used to suppress consecutive duplicate messages.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// What a single drowsiness reading caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertOutcome {
    /// A voice alert fired on this reading.
    pub voice_alert: bool,
    /// An escalation should be requested for this reading.
    pub escalate: bool,
    /// Severity of the reading.
    pub severity: Severity,
    /// Critical-alert message appended to the log, if any.
    pub message: Option<String>,
    /// Recent alert rate right after this reading.
    pub recent_alert_rate: usize,
}

/// Point-in-time view of the alert state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSnapshot {
    /// Latest cumulative event count.
    pub cumulative_events: u64,
    /// Event count at which the last voice alert fired.
    pub last_voice_alert_threshold: u64,
    /// Time of the last voice alert.
    pub last_voice_alert_at: Option<DateTime<Utc>>,
    /// Severity of the latest reading.
    pub severity: Severity,
    /// Event increases within the trailing window, as of the snapshot time.
    pub recent_alert_rate: usize,
    /// Critical-alert log, oldest first.
    pub log: Vec<AlertMessage>,
}

#[derive(Debug)]
struct AlertState {
    cumulative_events: u64,
    last_voice_alert_threshold: u64,
    last_voice_alert_at: Option<DateTime<Utc>>,
    last_escalation: Option<u64>,
    severity: Severity,
    alert_timestamps: VecDeque<DateTime<Utc>>,
    log: VecDeque<AlertMessage>,
    last_fingerprint: Option<String>,
}

impl AlertState {
    fn new() -> Self {
        Self {
            cumulative_events: 0,
            last_voice_alert_threshold: 0,
            last_voice_alert_at: None,
            last_escalation: None,
            severity: Severity::Clear,
            alert_timestamps: VecDeque::new(),
            log: VecDeque::new(),
            last_fingerprint: None,
        }
    }

    fn recent(&self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        self.alert_timestamps
            .iter()
            .filter(|t| **t <= now && now - **t <= window)
            .count()
    }

    fn evict_before(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        while let Some(oldest) = self.alert_timestamps.front() {
            if now - *oldest > window {
                self.alert_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn append(&mut self, text: String, now: DateTime<Utc>, capacity: usize) -> bool {
        let message = AlertMessage::new(text, now);
        if self.last_fingerprint.as_deref() == Some(message.fingerprint.as_str()) {
            return false;
        }
        self.last_fingerprint = Some(message.fingerprint.clone());
        self.log.push_back(message);
        while self.log.len() > capacity {
            self.log.pop_front();
        }
        true
    }
}

/// The drowsiness alert engine.
#[derive(Debug)]
pub struct AlertEngine {
    policy: AlertPolicy,
    state: Mutex<AlertState>,
}

impl AlertEngine {
    /// Create an engine with the given policy.
    #[must_use]
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(AlertState::new()),
        }
    }

    /// The policy in effect.
    #[must_use]
    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Feed one drowsiness reading through the state machine.
    ///
    /// A voice alert fires when `events > 0` and `events` has reached the last
    /// alert threshold plus the interval. The threshold never decreases, so a
    /// detector that restarts its counter stays quiet until it passes the old
    /// threshold again.
    pub async fn observe(&self, reading: &DrowsinessReading, now: DateTime<Utc>) -> AlertOutcome {
        let window = self.policy.window_delta();
        let mut state = self.state.lock().await;
        let events = reading.events;

        if events > state.cumulative_events {
            state.alert_timestamps.push_back(now);
        }
        state.cumulative_events = events;
        state.evict_before(now, window);

        let voice_alert = events > 0
            && events >= state.last_voice_alert_threshold + self.policy.voice_alert_interval;
        if voice_alert {
            state.last_voice_alert_threshold = events;
            state.last_voice_alert_at = Some(now);
            info!(events, "Voice alert triggered");
        }

        let severity = self.policy.severity(reading);
        state.severity = severity;

        let message = if reading.is_drowsy {
            let text = format!(
                "CRITICAL ALERT: {} ({events} events)",
                self.policy.assistant_message(events)
            );
            if state.append(text.clone(), now, self.policy.log_capacity) {
                Some(text)
            } else {
                debug!("Suppressed duplicate critical alert");
                None
            }
        } else {
            None
        };

        let escalate = self.policy.auto_escalate
            && events >= self.policy.escalation_threshold
            && state
                .last_escalation
                .map_or(true, |last| events >= last + self.policy.voice_alert_interval);
        if escalate {
            state.last_escalation = Some(events);
        }

        AlertOutcome {
            voice_alert,
            escalate,
            severity,
            message,
            recent_alert_rate: state.recent(now, window),
        }
    }

    /// Append a critical-alert message unless it repeats the latest entry.
    ///
    /// Returns whether the message was appended.
    pub async fn append_critical(&self, text: impl Into<String>, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        state.append(text.into(), now, self.policy.log_capacity)
    }

    /// Event increases within the trailing window ending at `now`.
    pub async fn recent_alert_rate(&self, now: DateTime<Utc>) -> usize {
        let state = self.state.lock().await;
        state.recent(now, self.policy.window_delta())
    }

    /// Snapshot of the alert state as of `now`.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> AlertSnapshot {
        let state = self.state.lock().await;
        AlertSnapshot {
            cumulative_events: state.cumulative_events,
            last_voice_alert_threshold: state.last_voice_alert_threshold,
            last_voice_alert_at: state.last_voice_alert_at,
            severity: state.severity,
            recent_alert_rate: state.recent(now, self.policy.window_delta()),
            log: state.log.iter().cloned().collect(),
        }
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertPolicy::default())
    }
}
