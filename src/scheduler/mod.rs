//! Background jobs: idle reaper, reminder sweep, database health check.
//!
//! Each job runs in its own tokio task on a fixed cadence and shares one
//! shutdown signal. A failing cycle is logged and skipped; the loop keeps
//! going.

mod jobs;
mod reaper;

pub use jobs::*;
pub use reaper::*;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::IdleTimeouts;
use crate::forms::ConversationEngine;
use crate::models::UserId;
use crate::transport::ChatTransport;

/// Reminder sweep cadence: hourly.
pub const NOTIFY_INTERVAL_SECS: u64 = 60 * 60;

/// Database health check cadence: every 10 minutes.
pub const HEALTHCHECK_INTERVAL_SECS: u64 = 10 * 60;

/// Everything the scheduled jobs need.
pub struct SchedulerContext {
    pub engine: Arc<ConversationEngine>,
    pub conn: Arc<Mutex<Connection>>,
    pub transport: Arc<dyn ChatTransport>,
    pub idle_timeouts: IdleTimeouts,
    pub reaper_interval: Duration,
    pub admin_id: Option<UserId>,
}

/// Handle for the running jobs.
///
/// `shutdown()` stops every loop after its current cycle. Dropping the
/// handle sends the same signal.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Signal shutdown and wait for every job to return.
    pub async fn join(mut self) {
        self.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Scheduled job ended abnormally");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the reaper, the hourly reminder sweep and the health check.
pub fn start_scheduler(ctx: SchedulerContext) -> SchedulerHandle {
    let (shutdown, rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(3);

    let reaper = Arc::new(IdleReaper::new(ctx.engine.clone(), ctx.idle_timeouts.clone()));
    tasks.push(spawn_periodic("idle_reaper", ctx.reaper_interval, rx.clone(), move || {
        let reaper = reaper.clone();
        async move {
            reaper.sweep(chrono::Utc::now().naive_utc()).await;
        }
    }));

    let conn = ctx.conn.clone();
    let transport = ctx.transport.clone();
    tasks.push(spawn_periodic(
        "reminder_sweep",
        Duration::from_secs(NOTIFY_INTERVAL_SECS),
        rx.clone(),
        move || {
            let conn = conn.clone();
            let transport = transport.clone();
            async move {
                let now = chrono::Utc::now().naive_utc();
                if let Err(e) = reminder_sweep(&conn, transport.as_ref(), now).await {
                    tracing::error!(error = %e, "Reminder sweep failed");
                }
            }
        },
    ));

    let conn = ctx.conn;
    let transport = ctx.transport;
    let admin_id = ctx.admin_id;
    tasks.push(spawn_periodic(
        "healthcheck",
        Duration::from_secs(HEALTHCHECK_INTERVAL_SECS),
        rx,
        move || {
            let conn = conn.clone();
            let transport = transport.clone();
            async move {
                database_healthcheck(&conn, transport.as_ref(), admin_id).await;
            }
        },
    ));

    tracing::info!(
        reaper_interval_secs = ctx.reaper_interval.as_secs(),
        "Scheduler started"
    );
    SchedulerHandle { shutdown, tasks }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; jobs wait one full period.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(job = name, "Scheduled job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cadences() {
        assert_eq!(NOTIFY_INTERVAL_SECS, 3600);
        assert_eq!(HEALTHCHECK_INTERVAL_SECS, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_runs_each_period_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let counter = runs.clone();
        let task = spawn_periodic("test", Duration::from_secs(10), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_sender_stops_job() {
        let (tx, rx) = watch::channel(false);
        let task = spawn_periodic("test", Duration::from_secs(10), rx, || async {});
        drop(tx);
        task.await.unwrap();
    }
}
