//! Runs a set of jobs side by side.
//!
//! [`Runner::start`] spawns every enabled job plus one ticker task that calls
//! [`Job::tick`] on each of them once a minute. One stop signal ends them all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::job::{Job, JobResult};
use crate::websocket::client::{stopped, StopSignal};

/// Interval between job ticks
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Owner of the jobs of one process.
pub struct Runner {
    jobs: Vec<Arc<Job>>,
    running: Vec<(String, JoinHandle<JobResult<()>>)>,
    ticker: Option<JoinHandle<()>>,
    tick_interval: Duration,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            running: Vec::new(),
            ticker: None,
            tick_interval: TICK_INTERVAL,
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("jobs", &self.jobs)
            .field("running", &self.running.len())
            .finish()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Take ownership of a job; returns a shared handle to it.
    pub fn add(&mut self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        self.jobs.push(Arc::clone(&job));
        job
    }

    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    fn enabled(&self) -> Vec<Arc<Job>> {
        self.jobs
            .iter()
            .filter(|job| job.config().enabled)
            .cloned()
            .collect()
    }

    /// Spawn the enabled jobs and the ticker. Returns how many jobs started.
    pub fn start(&mut self, stop: StopSignal) -> usize {
        let enabled = self.enabled();
        for job in &enabled {
            tracing::info!(job = job.id(), market = %job.config().symbol, "Starting job");
            let handle = tokio::spawn(Arc::clone(job).run(stop.clone()));
            self.running.push((job.id().to_string(), handle));
        }
        tracing::info!(started = enabled.len(), loaded = self.jobs.len(), "Jobs started");

        let interval = self.tick_interval;
        self.ticker = Some(tokio::spawn(
            tick_loop(enabled.clone(), interval, stop).instrument(tracing::info_span!("ticker")),
        ));
        enabled.len()
    }

    /// Wait for every started job and the ticker to finish.
    ///
    /// Returns each job's outcome by job id. A job whose task panicked is
    /// logged and left out.
    pub async fn join(&mut self) -> Vec<(String, JobResult<()>)> {
        let mut results = Vec::with_capacity(self.running.len());
        for (id, handle) in self.running.drain(..) {
            match handle.await {
                Ok(result) => results.push((id, result)),
                Err(e) => tracing::error!(job = %id, error = %e, "Job task panicked"),
            }
        }

        if let Some(ticker) = self.ticker.take() {
            if let Err(e) = ticker.await {
                tracing::error!(error = %e, "Ticker task panicked");
            }
        }
        results
    }
}

async fn tick_loop(jobs: Vec<Arc<Job>>, period: Duration, mut stop: StopSignal) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                join_all(jobs.iter().map(|job| job.tick(now).instrument(job.span().clone()))).await;
            }
            _ = stopped(&mut stop) => break,
        }
    }
    tracing::debug!("Ticker stopped");
}
