//! SOS Escalation Orchestrator.
//!
//! An escalation reads the current location, composes the outbound message,
//! records the incident and only then tries the external notification. The
//! incident stays recorded whatever the notification does. A store that does
//! not answer within the sidecar's reply timeout is skipped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channels::ChannelStore;
use crate::error::Error;
use crate::incident::{IncidentKind, IncidentRecord};
use crate::notify::Notifier;
use crate::reading::GpsReading;
use crate::sidecar::Sidecar;

const MANUAL_TEMPLATE: &str =
    "CRITICAL ALERT: Driver triggered SOS! Immediate assistance required.";
const HAZARD_TEMPLATE: &str =
    "HAZARD ALERT: Dangerous road condition detected. Please check on the driver.";

/// What caused an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// The driver pressed SOS.
    #[default]
    Manual,
    /// Drowsiness events crossed the escalation threshold.
    Drowsiness,
    /// A road hazard was detected.
    Hazard,
}

impl Trigger {
    /// Parse a trigger name. Unknown names are treated as a manual SOS.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "drowsiness" | "drowsy" => Self::Drowsiness,
            "hazard" => Self::Hazard,
            _ => Self::Manual,
        }
    }

    /// Incident type recorded for this trigger.
    #[must_use]
    pub fn incident_kind(self) -> IncidentKind {
        match self {
            Self::Manual => IncidentKind::Sos,
            Self::Drowsiness => IncidentKind::Drowsiness,
            Self::Hazard => IncidentKind::Hazard,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Drowsiness => write!(f, "drowsiness"),
            Self::Hazard => write!(f, "hazard"),
        }
    }
}

/// Compose the outbound message for a trigger.
///
/// A non-blank context message replaces the manual and hazard templates.
/// The map link is appended only when the location is a real fix.
#[must_use]
pub fn compose_message(
    trigger: Trigger,
    context: Option<&str>,
    location: &GpsReading,
    drowsiness_threshold: u64,
) -> String {
    let context = context.map(str::trim).filter(|c| !c.is_empty());
    let mut message = match trigger {
        Trigger::Manual => context.unwrap_or(MANUAL_TEMPLATE).to_string(),
        Trigger::Hazard => context.unwrap_or(HAZARD_TEMPLATE).to_string(),
        Trigger::Drowsiness => format!(
            "URGENT: Driver is exceedingly drowsy ({drowsiness_threshold}+ events). \
             Risk of accident high. Please contact driver."
        ),
    };
    if let Some(link) = location.map_link() {
        message.push(' ');
        message.push_str(&link);
    }
    message
}

/// Result of one escalation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationOutcome {
    /// The external channel accepted the message.
    pub accepted: bool,
    /// Human-readable explanation.
    pub detail: String,
    /// Id of the recorded incident, when persistence succeeded.
    pub incident_id: Option<i64>,
    /// The message that was (or would have been) sent.
    pub message: String,
}

/// Runs escalations.
#[derive(Debug, Clone)]
pub struct Escalator {
    channels: Arc<ChannelStore>,
    sidecar: Sidecar,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    drowsiness_threshold: u64,
}

impl Escalator {
    /// Create an escalator.
    #[must_use]
    pub fn new(
        channels: Arc<ChannelStore>,
        sidecar: Sidecar,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
        drowsiness_threshold: u64,
    ) -> Self {
        Self {
            channels,
            sidecar,
            notifier,
            timeout,
            drowsiness_threshold,
        }
    }

    /// The notifier in use.
    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Escalate. Never fails: every problem ends up in the outcome.
    pub async fn escalate(&self, trigger: Trigger, context: Option<&str>) -> EscalationOutcome {
        let location = self.channels.gps().await;
        let message = compose_message(trigger, context, &location, self.drowsiness_threshold);

        let record =
            IncidentRecord::escalation(trigger.incident_kind(), &location, message.clone());
        let incident_id = match self.sidecar.record_incident(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%trigger, error = %e, "Escalation incident not confirmed, notifying anyway");
                None
            }
        };

        let sent = match tokio::time::timeout(self.timeout, self.notifier.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("notification via {}", self.notifier.name()),
            }),
        };

        let (accepted, detail) = match sent {
            Ok(()) => {
                info!(%trigger, ?incident_id, "Escalation sent");
                (true, format!("alert sent via {}", self.notifier.name()))
            }
            Err(e) => {
                warn!(%trigger, ?incident_id, error = %e, "Escalation notification failed");
                (false, e.to_string())
            }
        };

        EscalationOutcome {
            accepted,
            detail,
            incident_id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::notify::UnconfiguredNotifier;
    use crate::reading::SensorReading;
    use crate::storage::Storage;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn send(&self, message: &str) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.sent.lock().unwrap().push(message.to_string());
            if self.fail {
                Err(Error::notification("no signal"))
            } else {
                Ok(())
            }
        }
    }

    fn escalator(notifier: Arc<dyn Notifier>) -> (Escalator, Arc<ChannelStore>, Sidecar) {
        let channels = Arc::new(ChannelStore::new());
        let (sidecar, _worker) = Sidecar::spawn(Storage::open_in_memory().unwrap(), 16);
        let escalator = Escalator::new(
            Arc::clone(&channels),
            sidecar.clone(),
            notifier,
            Duration::from_millis(200),
            10,
        );
        (escalator, channels, sidecar)
    }

    #[test]
    fn test_trigger_parse() {
        assert_eq!(Trigger::parse("hazard"), Trigger::Hazard);
        assert_eq!(Trigger::parse("Drowsiness"), Trigger::Drowsiness);
        assert_eq!(Trigger::parse("anything"), Trigger::Manual);
        assert_eq!(Trigger::Manual.incident_kind(), IncidentKind::Sos);
    }

    #[test]
    fn test_compose_without_fix_has_no_link() {
        let message = compose_message(Trigger::Manual, None, &GpsReading::default(), 10);
        assert_eq!(message, MANUAL_TEMPLATE);
    }

    #[test]
    fn test_compose_with_fix_and_context() {
        let location = GpsReading::new(12.97, 77.59, 0.0);
        let message = compose_message(Trigger::Manual, Some("Flat tyre"), &location, 10);
        assert_eq!(message, "Flat tyre https://maps.google.com/?q=12.97,77.59");

        let message = compose_message(Trigger::Hazard, Some("  "), &location, 10);
        assert!(message.starts_with(HAZARD_TEMPLATE));
    }

    #[test]
    fn test_compose_drowsiness_mentions_threshold() {
        let message = compose_message(Trigger::Drowsiness, None, &GpsReading::default(), 10);
        assert!(message.contains("(10+ events)"));
    }

    #[tokio::test]
    async fn test_successful_escalation() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (escalator, channels, sidecar) = escalator(notifier.clone());
        channels
            .write(SensorReading::Gps(GpsReading::new(28.6, 77.2, 40.0)))
            .await;

        let outcome = escalator.escalate(Trigger::Manual, None).await;

        assert!(outcome.accepted);
        assert!(outcome.message.contains("q=28.6,77.2"));
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        let id = outcome.incident_id.unwrap();
        let stored = sidecar.query(move |s| s.incident(id)).await.unwrap().unwrap();
        assert!(stored.escalated);
        assert_eq!(stored.kind, IncidentKind::Sos);
    }

    #[tokio::test]
    async fn test_failed_notification_still_records_one_incident() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        let (escalator, _channels, sidecar) = escalator(notifier);

        let outcome = escalator.escalate(Trigger::Drowsiness, None).await;

        assert!(!outcome.accepted);
        assert!(outcome.detail.contains("no signal"));
        assert_eq!(sidecar.query(|s| s.count_incidents()).await.unwrap(), 1);
        assert_eq!(sidecar.query(|s| s.count_escalations()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_fix_records_zero_coordinates() {
        let (escalator, _channels, sidecar) = escalator(Arc::new(UnconfiguredNotifier));

        let outcome = escalator.escalate(Trigger::Manual, None).await;

        assert!(!outcome.accepted);
        assert!(!outcome.message.contains("maps.google.com"));
        let id = outcome.incident_id.unwrap();
        let stored = sidecar.query(move |s| s.incident(id)).await.unwrap().unwrap();
        assert_eq!(stored.latitude, 0.0);
        assert_eq!(stored.longitude, 0.0);
    }

    #[tokio::test]
    async fn test_slow_notifier_times_out() {
        let notifier = Arc::new(RecordingNotifier {
            delay: Some(Duration::from_secs(30)),
            ..RecordingNotifier::default()
        });
        let (escalator, _channels, sidecar) = escalator(notifier);

        let outcome = escalator.escalate(Trigger::Hazard, None).await;

        assert!(!outcome.accepted);
        assert!(outcome.detail.contains("timed out"));
        assert_eq!(sidecar.query(|s| s.count_incidents()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stalled_store_does_not_delay_notification() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (sidecar, _worker) = Sidecar::spawn(Storage::open_in_memory().unwrap(), 16);
        let sidecar = sidecar.with_reply_timeout(Duration::from_millis(100));
        let escalator = Escalator::new(
            Arc::new(ChannelStore::new()),
            sidecar.clone(),
            notifier.clone(),
            Duration::from_millis(200),
            10,
        );

        let stall = tokio::spawn({
            let sidecar = sidecar.clone().with_reply_timeout(Duration::from_secs(10));
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
        let outcome = escalator.escalate(Trigger::Manual, None).await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(outcome.accepted);
        assert_eq!(outcome.incident_id, None);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        stall.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_store_still_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let escalator = Escalator::new(
            Arc::new(ChannelStore::new()),
            Sidecar::unavailable(),
            notifier.clone(),
            Duration::from_secs(1),
            10,
        );

        let outcome = escalator.escalate(Trigger::Manual, None).await;

        assert!(outcome.accepted);
        assert_eq!(outcome.incident_id, None);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }
}
