//! Fixed-interval polling clients.
//!
//! Dashboards pull; the server never pushes. Each watched channel gets its
//! own loop at its own cadence, and only responses that differ from the
//! previous one are reported.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::Result;

/// A read route a dashboard polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollTarget {
    /// `GET /api/location`.
    Location,
    /// `GET /api/vibration`.
    Vibration,
    /// `GET /api/radar`.
    Radar,
    /// `GET /api/alcohol`.
    Alcohol,
    /// `GET /api/drowsiness`.
    Drowsiness,
}

impl PollTarget {
    /// Every target.
    pub const ALL: [PollTarget; 5] = [
        Self::Location,
        Self::Vibration,
        Self::Radar,
        Self::Alcohol,
        Self::Drowsiness,
    ];

    /// Route polled for this target.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Location => "/api/location",
            Self::Vibration => "/api/vibration",
            Self::Radar => "/api/radar",
            Self::Alcohol => "/api/alcohol",
            Self::Drowsiness => "/api/drowsiness",
        }
    }

    /// Configured cadence.
    #[must_use]
    pub fn interval(self, config: &WatchConfig) -> Duration {
        let ms = match self {
            Self::Location => config.location_ms,
            Self::Vibration => config.vibration_ms,
            Self::Radar => config.radar_ms,
            Self::Alcohol => config.alcohol_ms,
            Self::Drowsiness => config.drowsiness_ms,
        };
        Duration::from_millis(ms.max(1))
    }
}

impl std::fmt::Display for PollTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location => write!(f, "location"),
            Self::Vibration => write!(f, "vibration"),
            Self::Radar => write!(f, "radar"),
            Self::Alcohol => write!(f, "alcohol"),
            Self::Drowsiness => write!(f, "drowsiness"),
        }
    }
}

/// A changed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    /// Which route changed.
    pub target: PollTarget,
    /// The new response body.
    pub body: String,
    /// When it was fetched.
    pub at: DateTime<Utc>,
}

/// Cloneable stop switch for one polling loop.
#[derive(Debug, Clone)]
pub struct PollHandle {
    target: PollTarget,
    stop_signal: Arc<AtomicBool>,
}

impl PollHandle {
    /// Create a handle for `target`.
    #[must_use]
    pub fn new(target: PollTarget) -> Self {
        Self {
            target,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The polled target.
    #[must_use]
    pub fn target(&self) -> PollTarget {
        self.target
    }

    /// Ask the loop to stop at its next tick.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

/// The set of running polling loops.
#[derive(Debug, Default)]
pub struct PollManager {
    handles: Vec<PollHandle>,
}

impl PollManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a loop.
    pub fn add(&mut self, handle: PollHandle) {
        self.handles.push(handle);
    }

    /// Stop every loop.
    pub fn stop_all(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }

    /// Number of tracked loops.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Whether any loop has not been told to stop.
    #[must_use]
    pub fn any_running(&self) -> bool {
        self.handles.iter().any(|h| !h.should_stop())
    }
}

/// Remembers the hash of the last response.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<blake3::Hash>,
}

impl ChangeDetector {
    /// Returns `true` when `body` differs from the previous body.
    pub fn changed(&mut self, body: &str) -> bool {
        let hash = blake3::hash(body.as_bytes());
        if self.last == Some(hash) {
            false
        } else {
            self.last = Some(hash);
            true
        }
    }
}

/// Poll `fetch` every `every` until stopped or the receiver goes away.
///
/// Fetch failures are logged and the loop keeps going.
pub async fn run_poller<F, Fut>(
    handle: PollHandle,
    every: Duration,
    mut fetch: F,
    tx: mpsc::Sender<PollUpdate>,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let target = handle.target();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut detector = ChangeDetector::default();

    debug!(%target, ?every, "Poller started");
    loop {
        ticker.tick().await;
        if handle.should_stop() {
            break;
        }

        match fetch().await {
            Ok(body) => {
                if detector.changed(&body) {
                    let update = PollUpdate {
                        target,
                        body,
                        at: Utc::now(),
                    };
                    if tx.send(update).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => warn!(%target, error = %e, "Poll failed"),
        }
    }
    debug!(%target, "Poller stopped");
}

/// Fetches read routes from a running server.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    /// Create a source for the server at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the current body of `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server replies with an
    /// error status.
    pub async fn fetch(&self, target: PollTarget) -> Result<String> {
        let url = format!("{}{}", self.base_url, target.path());
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

/// Start one polling loop per target against `source`.
#[must_use]
pub fn spawn_all(
    targets: &[PollTarget],
    config: &WatchConfig,
    source: &HttpSource,
) -> (PollManager, mpsc::Receiver<PollUpdate>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel(64);
    let mut manager = PollManager::new();
    let mut tasks = Vec::with_capacity(targets.len());

    for &target in targets {
        let handle = PollHandle::new(target);
        manager.add(handle.clone());
        let source = source.clone();
        let tx = tx.clone();
        let every = target.interval(config);
        let fetch = move || {
            let source = source.clone();
            async move { source.fetch(target).await }
        };
        tasks.push(tokio::spawn(run_poller(handle, every, fetch, tx)));
    }

    (manager, rx, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn test_target_paths_and_cadences() {
        let config = WatchConfig::default();
        assert_eq!(PollTarget::Radar.path(), "/api/radar");
        assert_eq!(
            PollTarget::Radar.interval(&config),
            Duration::from_millis(100)
        );
        assert_eq!(
            PollTarget::Location.interval(&config),
            Duration::from_millis(2000)
        );
        assert_eq!(PollTarget::Drowsiness.to_string(), "drowsiness");
    }

    #[test]
    fn test_change_detector() {
        let mut detector = ChangeDetector::default();
        assert!(detector.changed("a"));
        assert!(!detector.changed("a"));
        assert!(detector.changed("b"));
        assert!(detector.changed("a"));
    }

    #[test]
    fn test_handle_clone_shares_signal() {
        let handle = PollHandle::new(PollTarget::Alcohol);
        let other = handle.clone();
        handle.stop();
        assert!(other.should_stop());
    }

    #[test]
    fn test_manager_stop_all() {
        let mut manager = PollManager::new();
        let radar = PollHandle::new(PollTarget::Radar);
        manager.add(radar.clone());
        manager.add(PollHandle::new(PollTarget::Vibration));
        assert_eq!(manager.count(), 2);
        assert!(manager.any_running());

        radar.stop();
        assert!(manager.any_running());
        manager.stop_all();
        assert!(!manager.any_running());
    }

    #[tokio::test]
    async fn test_poller_reports_only_changes() {
        let responses = Arc::new(Mutex::new(VecDeque::from(vec![
            Ok("a".to_string()),
            Ok("a".to_string()),
            Err(Error::internal("offline")),
            Ok("b".to_string()),
            Ok("b".to_string()),
        ])));
        let handle = PollHandle::new(PollTarget::Alcohol);
        let stopper = handle.clone();
        let (tx, mut rx) = mpsc::channel(8);

        let fetch = {
            let responses = Arc::clone(&responses);
            move || {
                let next = responses.lock().unwrap().pop_front();
                if next.is_none() {
                    stopper.stop();
                }
                async move { next.unwrap_or_else(|| Ok("b".to_string())) }
            }
        };
        run_poller(handle, Duration::from_millis(5), fetch, tx).await;

        let mut bodies = Vec::new();
        while let Ok(update) = rx.try_recv() {
            assert_eq!(update.target, PollTarget::Alcohol);
            bodies.push(update.body);
        }
        assert_eq!(bodies, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_poller_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut n = 0_u32;
        let fetch = move || {
            n += 1;
            let body = n.to_string();
            async move { Ok(body) }
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            run_poller(PollHandle::new(PollTarget::Radar), Duration::from_millis(1), fetch, tx),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_http_source_unreachable_server() {
        let source = HttpSource::new("http://127.0.0.1:9/");
        assert!(source.fetch(PollTarget::Location).await.is_err());
    }
}
