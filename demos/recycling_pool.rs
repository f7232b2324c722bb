//! Runs a small pool of sleeping workers under full signal control.
//!
//! ```text
//! cargo run --example recycling_pool
//! ```
//!
//! While running, `kill -TERM <pid>` recycles the whole worker generation;
//! `kill -USR1 <pid>` reloads in place; `kill -INT <pid>` (or Ctrl-C) shuts
//! the pool down and exits.

use procwarden::{Pool, SignalHandler, Supervisor, SupervisorTarget, Worker, WorkerFactory, WorkerHandler, WorkerOptions};
use std::collections::HashMap;
use std::process::Command;
use std::sync::Arc;

struct SleepingWorker;

impl Worker for SleepingWorker {
    fn start(&mut self) -> i32 {
        Command::new("/bin/sleep")
            .arg("3600")
            .status()
            .map(|s| s.code().unwrap_or(0))
            .unwrap_or(1)
    }
}

struct SleepingFactory;

impl WorkerFactory for SleepingFactory {
    fn build(&self, _options: &WorkerOptions) -> Box<dyn Worker> {
        Box::new(SleepingWorker)
    }
}

fn main() -> procwarden::SupervisorResult<()> {
    tracing_subscriber::fmt::init();

    let handler = Arc::new(WorkerHandler::new("sleeping-worker", Arc::new(SleepingFactory)));
    let pool = Arc::new(Pool::new("recycling-pool", handler, 3, WorkerOptions::new()));
    let supervisor: Arc<dyn SupervisorTarget> = Arc::new(Supervisor::new(Arc::clone(&pool)));

    let mut mappings = HashMap::new();
    mappings.insert("TERM".to_string(), vec!["stop_gracefully".to_string()]);
    mappings.insert("USR1".to_string(), vec!["reload".to_string()]);
    mappings.insert("INT".to_string(), vec!["shutdown".to_string()]);

    tracing::info!(pid = std::process::id(), "pool running, send TERM/USR1/INT to control it");

    SignalHandler::start(mappings, supervisor)?;
    SignalHandler::join()?;

    pool.stop()?;
    Ok(())
}
