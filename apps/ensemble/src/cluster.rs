//! # Cluster
//!
//! Distributed execution of member tasks.
//!
//! A [`Cluster`] owns a multi-thread tokio runtime. Member tasks are CPU and
//! file bound, so each one runs on the blocking pool; a semaphore caps how
//! many run at once. On a PBS node the cap follows the job's resources.
//!
//! [`render_pbs_script`] produces the job script `ensemble submit` writes,
//! which runs an analysis on a compute node.

use crate::config::ClusterConfig;
use crate::error::{AppError, AppResult};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// How long [`Cluster::close`] waits for stragglers.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A unit of work keyed by the member it computes.
pub type Task<T> = Box<dyn FnOnce() -> AppResult<T> + Send + 'static>;

/// Box a closure as a [`Task`].
pub fn task<T, F>(f: F) -> Task<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    Box::new(f)
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Where workers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduler {
    /// Threads on this machine.
    Local,
    /// Inside a PBS job; sized from the job's resources.
    Pbs,
}

impl Scheduler {
    pub const SUPPORTED: &'static [&'static str] = &["LOCAL", "PBS"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Pbs => "PBS",
        }
    }
}

impl FromStr for Scheduler {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOCAL" => Ok(Self::Local),
            "PBS" => Ok(Self::Pbs),
            other => Err(AppError::UnsupportedScheduler {
                name: other.to_string(),
                supported: Self::SUPPORTED.iter().map(|s| (*s).to_string()).collect(),
            }),
        }
    }
}

// =============================================================================
// CLUSTER
// =============================================================================

pub struct Cluster {
    runtime: tokio::runtime::Runtime,
    permits: Arc<Semaphore>,
    workers: usize,
    scheduler: Scheduler,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("scheduler", &self.scheduler)
            .field("workers", &self.workers)
            .finish()
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Number of concurrent member tasks.
pub fn worker_count(scheduler: Scheduler, config: &ClusterConfig) -> usize {
    if let Some(workers) = config.workers {
        return workers.max(1);
    }
    let count = match scheduler {
        Scheduler::Local => std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1),
        Scheduler::Pbs => std::env::var("NCPUS")
            .ok()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(config.processes.saturating_mul(config.scale) as usize),
    };
    count.max(1)
}

/// Build a cluster and log how to reach it.
pub fn setup_cluster(
    scheduler: Scheduler,
    config: &ClusterConfig,
    user: Option<&str>,
) -> AppResult<Cluster> {
    let workers = worker_count(scheduler, config);
    tracing::info!(
        scheduler = scheduler.as_str(),
        workers,
        "Initializing cluster"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.clamp(1, 4))
        .max_blocking_threads(workers)
        .thread_name("ensemble-worker")
        .enable_time()
        .build()
        .map_err(|e| AppError::Cluster(format!("failed to start worker pool: {e}")))?;

    let host = hostname();
    tracing::info!("Cluster running on {} with {} workers", host, workers);
    if scheduler == Scheduler::Pbs {
        let user = user.unwrap_or("$USER");
        tracing::info!(
            "If this is a remote PBS job, log in with SSH tunnelling first: \
             ssh -N -L 8888:{host}:8888 -L 8787:{host}:8787 {user}@{}",
            config.login_host
        );
    }

    Ok(Cluster {
        runtime,
        permits: Arc::new(Semaphore::new(workers)),
        workers,
        scheduler,
    })
}

impl Cluster {
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler
    }

    /// Run every task and return the results in submission order.
    ///
    /// All tasks run to completion; the first failure in submission order is
    /// returned. A panicking task becomes [`AppError::WorkerFailed`].
    pub fn compute<T: Send + 'static>(&self, tasks: Vec<(String, Task<T>)>) -> AppResult<Vec<T>> {
        let total = tasks.len();
        let keys: Vec<String> = tasks.iter().map(|(key, _)| key.clone()).collect();

        let outcomes = self.runtime.block_on(async {
            let mut set = JoinSet::new();
            for (index, (key, task)) in tasks.into_iter().enumerate() {
                let permits = Arc::clone(&self.permits);
                set.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return (index, Err(AppError::Cluster("worker pool closed".to_string())));
                    };
                    let started = Instant::now();
                    let outcome = match tokio::task::spawn_blocking(task).await {
                        Ok(result) => result,
                        Err(e) => Err(AppError::WorkerFailed {
                            member: key.clone(),
                            reason: e.to_string(),
                        }),
                    };
                    tracing::debug!(
                        member = %key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ok = outcome.is_ok(),
                        "task finished"
                    );
                    (index, outcome)
                });
            }

            let mut outcomes: Vec<Option<AppResult<T>>> = (0..total).map(|_| None).collect();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, outcome)) => outcomes[index] = Some(outcome),
                    Err(e) => tracing::error!("task supervisor failed: {e}"),
                }
            }
            outcomes
        });

        outcomes
            .into_iter()
            .zip(keys)
            .map(|(outcome, key)| {
                outcome.unwrap_or_else(|| {
                    Err(AppError::WorkerFailed {
                        member: key,
                        reason: "task did not report a result".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Stop the worker pool.
    pub fn close(self) {
        tracing::info!("Closing cluster...");
        self.permits.close();
        self.runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    }
}

// =============================================================================
// PBS JOB SCRIPT
// =============================================================================

/// A PBS job script that runs `command` with the configured resources.
pub fn render_pbs_script(config: &ClusterConfig, job_name: &str, command: &[String]) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/bash\n");
    let _ = writeln!(script, "#PBS -N {job_name}");
    let _ = writeln!(script, "#PBS -A {}", config.project);
    let _ = writeln!(script, "#PBS -q {}", config.queue);
    let _ = writeln!(script, "#PBS -l {}", config.resource_spec());
    let _ = writeln!(script, "#PBS -l walltime={}", config.walltime);
    script.push_str("#PBS -j oe\n\n");
    let _ = writeln!(script, "export TMPDIR=${{TMPDIR:-{}}}", config.local_directory);
    let _ = writeln!(script, "mkdir -p \"$TMPDIR\"\n");

    let quoted: Vec<String> = command.iter().map(|arg| shell_quote(arg)).collect();
    let _ = writeln!(script, "{}", quoted.join(" "));
    script
}

/// Single-quote an argument unless it is plainly safe.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

// =============================================================================
// TESTS
// =============================================================================
