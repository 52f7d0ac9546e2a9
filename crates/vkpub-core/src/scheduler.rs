//! Time-ordered job queue.
//!
//! - One-shot jobs fire at a wall-clock trigger in the configured zone
//! - Recurring jobs re-enqueue themselves after every firing
//! - Fired work runs as its own task, so a slow job never delays the queue
//! - `shutdown()` stops the driver and drains in-flight work with a grace period
//!
//! Pending jobs live in memory only and are dropped on process exit.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::{
    sync::{Mutex, Notify},
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the driver sleeps before re-checking the clock.
const MAX_POLL: Duration = Duration::from_secs(30);

pub type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type WorkFactory = Arc<dyn Fn() -> Work + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

/// Read-only view of a queued job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingJob {
    pub id: JobId,
    pub trigger: DateTime<Tz>,
    pub label: String,
    /// Repeat interval of a recurring job.
    pub every: Option<Duration>,
}

enum JobKind {
    Once(Work),
    Every { interval: Duration, make: WorkFactory },
}

struct Entry {
    label: String,
    kind: JobKind,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tz: Tz,
    wake: Notify,
    cancel: CancellationToken,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    queue: BTreeMap<(DateTime<Utc>, JobId), Entry>,
    running: JoinSet<()>,
    driver: Option<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new(tz: Tz) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tz,
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.inner.tz
    }

    /// Current wall-clock time in the scheduler's zone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.inner.tz)
    }

    /// Enqueue `work` to run once at `trigger` (immediately if already due).
    pub async fn schedule_at<F>(&self, trigger: DateTime<Tz>, label: impl Into<String>, work: F) -> JobId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(
            trigger.with_timezone(&Utc),
            Entry {
                label: label.into(),
                kind: JobKind::Once(Box::pin(work)),
            },
        )
        .await
    }

    /// Run `make()` every `interval`, first firing one interval from now.
    pub async fn every<F, Fut>(&self, interval: Duration, label: impl Into<String>, make: F) -> JobId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let make: WorkFactory = Arc::new(move || Box::pin(make()) as Work);
        let first = Utc::now() + to_chrono(interval);
        self.enqueue(
            first,
            Entry {
                label: label.into(),
                kind: JobKind::Every { interval, make },
            },
        )
        .await
    }

    pub async fn pending(&self) -> Vec<PendingJob> {
        let st = self.inner.state.lock().await;
        st.queue
            .iter()
            .map(|((at, id), entry)| PendingJob {
                id: *id,
                trigger: at.with_timezone(&self.inner.tz),
                label: entry.label.clone(),
                every: match &entry.kind {
                    JobKind::Every { interval, .. } => Some(*interval),
                    JobKind::Once(_) => None,
                },
            })
            .collect()
    }

    /// Start the driver task if it is not running yet.
    pub async fn start(&self) {
        let mut st = self.inner.state.lock().await;
        if st.driver.is_some() {
            return;
        }
        let scheduler = self.clone();
        st.driver = Some(tokio::spawn(async move { scheduler.drive().await }));
        info!("scheduler started ({})", self.inner.tz);
    }

    /// Stop firing new jobs and wait up to `grace` for in-flight ones.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.cancel.cancel();

        let (driver, mut running, dropped) = {
            let mut st = self.inner.state.lock().await;
            let dropped = st.queue.len();
            st.queue.clear();
            (
                st.driver.take(),
                std::mem::take(&mut st.running),
                dropped,
            )
        };

        if let Some(handle) = driver {
            let _ = handle.await;
        }
        if dropped > 0 {
            warn!("scheduler shutting down with {dropped} pending jobs dropped");
        }

        let drained = tokio::time::timeout(grace, async {
            while let Some(res) = running.join_next().await {
                if let Err(e) = res {
                    error!("scheduled job failed during drain: {e}");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("scheduler drain timed out; aborting {} jobs", running.len());
            running.abort_all();
        }
    }

    async fn enqueue(&self, at: DateTime<Utc>, entry: Entry) -> JobId {
        let id = {
            let mut st = self.inner.state.lock().await;
            st.next_id += 1;
            let id = JobId(st.next_id);
            debug!("queued job {} '{}' at {}", id.0, entry.label, at);
            st.queue.insert((at, id), entry);
            id
        };
        self.inner.wake.notify_one();
        id
    }

    async fn drive(&self) {
        loop {
            let wait = {
                let st = self.inner.state.lock().await;
                st.queue
                    .keys()
                    .next()
                    .map(|(at, _)| (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                    .unwrap_or(MAX_POLL)
                    .min(MAX_POLL)
            };

            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = self.inner.wake.notified() => continue,
                _ = sleep(wait) => self.fire_due().await,
            }
        }
        debug!("scheduler driver stopped");
    }

    async fn fire_due(&self) {
        let now = Utc::now();
        let mut st = self.inner.state.lock().await;

        while let Some(res) = st.running.try_join_next() {
            if let Err(e) = res {
                error!("scheduled job panicked or was cancelled: {e}");
            }
        }

        let due: Vec<(DateTime<Utc>, JobId)> = st
            .queue
            .range(..=(now, JobId(u64::MAX)))
            .map(|(k, _)| *k)
            .collect();

        for key in due {
            let Some(entry) = st.queue.remove(&key) else {
                continue;
            };
            debug!("firing job {} '{}'", key.1 .0, entry.label);
            match entry.kind {
                JobKind::Once(work) => {
                    st.running.spawn(work);
                }
                JobKind::Every { interval, make } => {
                    st.running.spawn(make());
                    st.next_id += 1;
                    let next = (key.0 + to_chrono(interval), JobId(st.next_id));
                    st.queue.insert(
                        next,
                        Entry {
                            label: entry.label,
                            kind: JobKind::Every { interval, make },
                        },
                    );
                }
            }
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
