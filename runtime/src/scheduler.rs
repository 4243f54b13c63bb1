//! Periodic background jobs with graceful shutdown.
//!
//! The inventory worker runs a handful of jobs on fixed intervals: the
//! expired seat sweep, the consistency audit, the compensation worker and a
//! status report. Each implements [`PeriodicJob`]; the [`JobScheduler`]
//! spawns one task per job and stops them all on a broadcast signal.
//!
//! ## Usage
//!
//! ```ignore
//! let mut scheduler = JobScheduler::new(Duration::from_secs(10));
//! scheduler.register(Arc::new(FnJob::new("sweep", Duration::from_secs(60), move || {
//!     let seats = Arc::clone(&seats);
//!     async move { seats.sweep_expired().await.map(|_| ()).map_err(|e| e.to_string()) }
//! })));
//! scheduler.start();
//!
//! wait_for_signal().await;
//! scheduler.shutdown().await?;
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A job that runs on a fixed interval.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Job name for logging
    fn name(&self) -> &str;

    /// Time between runs. The first run happens immediately.
    fn interval(&self) -> Duration;

    /// Run once.
    ///
    /// # Errors
    ///
    /// A failed run is logged; the job keeps its schedule.
    async fn run(&self) -> Result<(), String>;
}

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Periodic job built from a closure.
pub struct FnJob {
    name: String,
    interval: Duration,
    run: JobFn,
}

impl FnJob {
    /// Create a job named `name` that calls `run` every `interval`.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            run: Arc::new(move || Box::pin(run())),
        }
    }
}

#[async_trait]
impl PeriodicJob for FnJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<(), String> {
        (self.run)().await
    }
}

/// Runs registered jobs until shutdown.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn PeriodicJob>>,
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
    grace: Duration,
}

impl JobScheduler {
    /// Create a scheduler that waits up to `grace` for jobs to stop.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            shutdown_tx,
            grace,
        }
    }

    /// Register a job. Takes effect on the next [`start`](Self::start).
    pub fn register(&mut self, job: Arc<dyn PeriodicJob>) {
        info!(job = job.name(), interval_secs = job.interval().as_secs(), "Registered job");
        self.jobs.push(job);
    }

    /// Receiver notified when shutdown starts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn one task per registered job.
    pub fn start(&mut self) {
        for job in self.jobs.drain(..) {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let name = job.name().to_string();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(job = job.name(), "Job stopping");
                            break;
                        }
                        _ = ticker.tick() => {
                            if let Err(e) = job.run().await {
                                warn!(job = job.name(), error = %e, "Job run failed");
                            }
                        }
                    }
                }
            });
            self.handles.push((name, handle));
        }
    }

    /// Signal every job to stop and wait for them.
    ///
    /// # Errors
    ///
    /// Returns the names of jobs that panicked or did not stop within the grace period.
    pub async fn shutdown(self) -> Result<(), Vec<String>> {
        info!(jobs = self.handles.len(), grace = ?self.grace, "Stopping background jobs");

        if self.shutdown_tx.send(()).is_err() {
            debug!("No jobs subscribed to shutdown");
        }

        let grace = self.grace;
        let waits = self.handles.into_iter().map(|(name, handle)| async move {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(job = %name, error = %e, "Job task failed");
                    Err(format!("{name}: {e}"))
                }
                Err(_) => {
                    error!(job = %name, "Job did not stop in time");
                    Err(format!("{name}: timeout after {grace:?}"))
                }
            }
        });

        let errors: Vec<String> = futures::future::join_all(waits)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            info!("All background jobs stopped");
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Received Ctrl+C");
    }
}
