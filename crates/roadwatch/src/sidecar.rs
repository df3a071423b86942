//! Best-effort Persistence Sidecar.
//!
//! One blocking worker owns the [`Storage`] connection and drains a bounded
//! queue. Ingestion hands it log entries with [`Sidecar::append`], which never
//! waits: when the queue is full or the worker is gone the entry is dropped
//! and a warning is logged. Escalations use [`Sidecar::record_incident`],
//! which waits for the row id so the record exists before anything else
//! happens. Every wait on the worker is bounded by the reply timeout: a
//! stalled store turns into an error, never into a stalled caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::incident::IncidentRecord;
use crate::reading::DrowsinessReading;
use crate::storage::{SensorLog, Storage};

/// Something worth keeping in the history tables.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A `sensor_logs` row.
    Sensor(SensorLog),
    /// A `drowsiness_logs` row.
    Drowsiness(DrowsinessReading),
    /// An incident nobody waits on (e.g. a pothole crossing).
    Incident(IncidentRecord),
}

impl LogEntry {
    fn kind(&self) -> &'static str {
        match self {
            Self::Sensor(_) => "sensor log",
            Self::Drowsiness(_) => "drowsiness log",
            Self::Incident(_) => "incident",
        }
    }
}

/// Default bound on waiting for the worker.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type QueryFn = Box<dyn FnOnce(&Storage) + Send>;

enum Job {
    Append(LogEntry),
    RecordIncident(IncidentRecord, oneshot::Sender<Result<i64>>),
    Query(QueryFn),
    Prune(chrono::Duration),
}

/// Handle to the persistence worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Sidecar {
    tx: mpsc::Sender<Job>,
    dropped: Arc<AtomicU64>,
    reply_timeout: Duration,
}

impl Sidecar {
    /// Start the worker on the blocking pool.
    ///
    /// The worker exits once every handle has been dropped and the queue has
    /// drained.
    #[must_use]
    pub fn spawn(storage: Storage, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::task::spawn_blocking(move || run_worker(&storage, rx));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                reply_timeout: DEFAULT_REPLY_TIMEOUT,
            },
            worker,
        )
    }

    /// A sidecar with no store behind it.
    ///
    /// Appends are dropped and incident recording fails. Used when the
    /// database cannot be opened so that the live dashboard keeps running.
    #[must_use]
    pub fn unavailable() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Bound every wait on the worker by `timeout`.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Send `job` and wait for its reply, giving up after the reply timeout.
    ///
    /// A job that timed out may still run later.
    async fn request<T>(
        &self,
        operation: &str,
        job: Job,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        let exchange = async {
            self.tx
                .send(job)
                .await
                .map_err(|_| Error::persistence_unavailable("worker stopped"))?;
            rx.await
                .map_err(|_| Error::persistence_unavailable("worker dropped the request"))?
        };
        match tokio::time::timeout(self.reply_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.reply_timeout, "Persistence worker did not reply");
                Err(Error::Timeout {
                    operation: operation.to_string(),
                })
            }
        }
    }

    /// Queue an entry without waiting.
    pub fn append(&self, entry: LogEntry) {
        let kind = entry.kind();
        if let Err(e) = self.tx.try_send(Job::Append(entry)) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(kind, dropped = total, "Persistence queue full, dropping entry");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!(kind, dropped = total, "Persistence unavailable, dropping entry");
                }
            }
        }
    }

    /// Store an incident and wait for its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is gone, does not answer within the
    /// reply timeout, or the insert fails.
    pub async fn record_incident(&self, record: IncidentRecord) -> Result<i64> {
        let (reply, rx) = oneshot::channel();
        self.request("incident insert", Job::RecordIncident(record, reply), rx)
            .await
    }

    /// Run a read against the store on the worker thread.
    ///
    /// Queued behind earlier appends, so it observes everything appended
    /// before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is gone, does not answer within the
    /// reply timeout, or `f` fails.
    pub async fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: QueryFn = Box::new(move |storage| {
            let _ = reply.send(f(storage));
        });
        self.request("history query", Job::Query(job), rx).await
    }

    /// Entries dropped so far because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Periodically delete history older than `max_age`.
    ///
    /// Prunes once immediately, then every `every`. Stops when the worker
    /// goes away.
    #[must_use]
    pub fn spawn_pruner(&self, every: Duration, max_age: chrono::Duration) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if tx.send(Job::Prune(max_age)).await.is_err() {
                    debug!("Persistence worker gone, stopping pruner");
                    break;
                }
            }
        })
    }
}

fn run_worker(storage: &Storage, mut rx: mpsc::Receiver<Job>) {
    info!("Persistence worker started for {}", storage.path().display());

    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Append(entry) => {
                let kind = entry.kind();
                let result = match &entry {
                    LogEntry::Sensor(log) => storage.insert_sensor_log(log),
                    LogEntry::Drowsiness(reading) => storage.insert_drowsiness_log(reading),
                    LogEntry::Incident(record) => storage.insert_incident(record),
                };
                if let Err(e) = result {
                    warn!(kind, error = %e, "Failed to persist entry");
                }
            }
            Job::RecordIncident(record, reply) => {
                let result = storage.insert_incident(&record);
                if let Err(e) = &result {
                    warn!(kind = %record.kind, error = %e, "Failed to persist incident");
                }
                let _ = reply.send(result);
            }
            Job::Query(f) => f(storage),
            Job::Prune(max_age) => {
                if let Err(e) = storage.prune_older_than(max_age) {
                    warn!(error = %e, "Failed to prune history");
                }
            }
        }
    }

    info!("Persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentKind;
    use crate::reading::{AlcoholReading, GpsReading, SensorReading};

    fn spawn_in_memory(capacity: usize) -> (Sidecar, JoinHandle<()>) {
        Sidecar::spawn(Storage::open_in_memory().unwrap(), capacity)
    }

    #[tokio::test]
    async fn test_appends_are_visible_to_later_queries() {
        let (sidecar, _worker) = spawn_in_memory(16);

        let log = SensorLog::from_reading(&SensorReading::Alcohol(AlcoholReading::new(40.0)));
        sidecar.append(LogEntry::Sensor(log.unwrap()));
        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::new(true, 1)));
        sidecar.append(LogEntry::Incident(IncidentRecord::pothole(
            &GpsReading::default(),
            0.9,
        )));

        let stats = sidecar.query(|s| s.stats()).await.unwrap();
        assert_eq!(stats.sensor_logs, 1);
        assert_eq!(stats.drowsiness_logs, 1);
        assert_eq!(stats.incidents, 1);
        assert_eq!(sidecar.dropped(), 0);
    }

    #[tokio::test]
    async fn test_record_incident_returns_id() {
        let (sidecar, _worker) = spawn_in_memory(4);
        let record = IncidentRecord::escalation(
            IncidentKind::Sos,
            &GpsReading::default(),
            "help".to_string(),
        );

        let id = sidecar.record_incident(record).await.unwrap();
        let stored = sidecar.query(move |s| s.incident(id)).await.unwrap();
        assert_eq!(stored.unwrap().kind, IncidentKind::Sos);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sidecar = Sidecar {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };

        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::default()));
        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::default()));
        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::default()));

        assert_eq!(sidecar.dropped(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_sidecar() {
        let sidecar = Sidecar::unavailable();
        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::default()));
        assert_eq!(sidecar.dropped(), 1);

        let err = sidecar
            .record_incident(IncidentRecord::new(IncidentKind::Sos, &GpsReading::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceUnavailable(_)));
        assert!(sidecar.query(|s| s.count_incidents()).await.is_err());
    }

    #[tokio::test]
    async fn test_query_errors_are_returned() {
        let (sidecar, _worker) = spawn_in_memory(4);
        let result: Result<()> = sidecar
            .query(|_| Err(Error::internal("boom")))
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_stalled_worker_times_out() {
        let (sidecar, _worker) = spawn_in_memory(4);
        let sidecar = sidecar.with_reply_timeout(Duration::from_millis(100));
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
        let err = sidecar
            .record_incident(IncidentRecord::new(IncidentKind::Sos, &GpsReading::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(sidecar.query(|s| s.count_incidents()).await.is_err());
        assert!(started.elapsed() < Duration::from_millis(1000));

        stall.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_handles_drop() {
        let (sidecar, worker) = spawn_in_memory(4);
        sidecar.append(LogEntry::Drowsiness(DrowsinessReading::default()));
        drop(sidecar);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_pruner_runs_immediately() {
        let (sidecar, _worker) = spawn_in_memory(4);
        let mut stale = DrowsinessReading::new(false, 0);
        stale.timestamp = chrono::Utc::now() - chrono::Duration::days(2);
        sidecar.append(LogEntry::Drowsiness(stale));

        let pruner = sidecar.spawn_pruner(Duration::from_secs(3600), chrono::Duration::days(1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = sidecar.query(|s| s.stats()).await.unwrap();
        assert_eq!(stats.drowsiness_logs, 0);
        pruner.abort();
    }
}
