//! Worker — single-writer task that owns the multi-line gates and drives the
//! shared `LineProcessor`.
//!
//! Every mutation of the source cache and failure budget happens on this
//! task. Commands are handled strictly in arrival order, so lines from one
//! source reach matching in the order they were submitted.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::conf::MultilineConfig;
use crate::multiline::{gate_for, gate_key, MultiLineGate};
use crate::parser::{LineProcessor, ParsedLine};
use crate::pattern::ConfigSnapshot;

/// How often idle multi-line blocks are checked for expiry.
const GATE_TICK: Duration = Duration::from_millis(150);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("parser worker is no longer running")]
    Closed,
}

pub enum Command {
    Line { source: String, line: String },
    Reload(ConfigSnapshot),
    Sweep,
    /// Release every pending block, then acknowledge.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub queue_capacity: usize,
    pub sweep_interval: Duration,
    pub multiline: MultilineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            sweep_interval: Duration::from_secs(300),
            multiline: MultilineConfig::default(),
        }
    }
}

/// Cloneable sender side of the worker queue.
#[derive(Clone)]
pub struct ParserHandle {
    commands: mpsc::Sender<Command>,
}

impl ParserHandle {
    pub async fn submit_line(
        &self,
        source: impl Into<String>,
        line: impl Into<String>,
    ) -> Result<(), ServiceError> {
        self.send(Command::Line {
            source: source.into(),
            line: line.into(),
        })
        .await
    }

    pub async fn reload(&self, snapshot: ConfigSnapshot) -> Result<(), ServiceError> {
        self.send(Command::Reload(snapshot)).await
    }

    pub async fn sweep(&self) -> Result<(), ServiceError> {
        self.send(Command::Sweep).await
    }

    /// Resolves once every line submitted before it has been emitted.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx)).await?;
        rx.await.map_err(|_| ServiceError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::Closed)
    }
}

pub struct ParserService;

impl ParserService {
    /// Spawn the worker. Completed lines arrive on the returned receiver;
    /// the worker exits after every handle is dropped and its pending
    /// blocks are flushed, or once the receiver is dropped.
    pub fn spawn(
        processor: Arc<LineProcessor>,
        config: ServiceConfig,
    ) -> (ParserHandle, mpsc::Receiver<ParsedLine>, JoinHandle<()>) {
        let capacity = config.queue_capacity.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let worker = Worker {
            processor,
            multiline: config.multiline,
            gates: HashMap::new(),
            output: out_tx,
        };
        let task = tokio::spawn(worker.run(cmd_rx, config.sweep_interval));

        (ParserHandle { commands: cmd_tx }, out_rx, task)
    }
}

struct GateEntry {
    /// Source name of the first line that opened this gate.
    source: String,
    gate: Box<dyn MultiLineGate>,
}

struct Worker {
    processor: Arc<LineProcessor>,
    multiline: MultilineConfig,
    gates: HashMap<String, GateEntry>,
    output: mpsc::Sender<ParsedLine>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, sweep_every: Duration) {
        let mut gate_ticker = time::interval(GATE_TICK);
        gate_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sweep_every = sweep_every.max(Duration::from_millis(1));
        let mut sweep_ticker = time::interval_at(Instant::now() + sweep_every, sweep_every);
        sweep_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(sweep_secs = sweep_every.as_secs(), "Parser worker started");

        loop {
            let result = tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle(command).await,
                        None => {
                            let _ = self.flush_gates().await;
                            break;
                        }
                    }
                }
                _ = gate_ticker.tick() => self.expire_gates().await,
                _ = sweep_ticker.tick() => self.sweep().await,
            };

            if result.is_err() {
                debug!("Output receiver dropped, stopping parser worker");
                break;
            }
        }

        info!("Parser worker stopped");
    }

    async fn handle(&mut self, command: Command) -> Result<(), ServiceError> {
        match command {
            Command::Line { source, line } => {
                if let Some((source, logical)) = self.add_line(source, line) {
                    self.emit(&source, logical).await?;
                }
                Ok(())
            }
            Command::Reload(snapshot) => {
                // Gates hold block-start markers from the old snapshot.
                self.flush_gates().await?;
                self.gates.clear();
                self.processor.reload(snapshot);
                Ok(())
            }
            Command::Sweep => self.sweep().await,
            Command::Flush(ack) => {
                self.flush_gates().await?;
                let _ = ack.send(());
                Ok(())
            }
        }
    }

    fn add_line(&mut self, source: String, line: String) -> Option<(String, String)> {
        let key = gate_key(&source).to_string();
        let entry = self.gates.entry(key).or_insert_with(|| {
            let snapshot = self.processor.snapshot();
            GateEntry {
                gate: gate_for(&source, snapshot.groups(), &self.multiline),
                source,
            }
        });
        entry
            .gate
            .add(line)
            .map(|logical| (entry.source.clone(), logical))
    }

    async fn expire_gates(&mut self) -> Result<(), ServiceError> {
        let mut expired = Vec::new();
        for entry in self.gates.values_mut() {
            while let Some(pending) = entry.gate.check_timeout() {
                expired.push((entry.source.clone(), pending));
            }
        }
        for (source, logical) in expired {
            self.emit(&source, logical).await?;
        }
        Ok(())
    }

    async fn flush_gates(&mut self) -> Result<(), ServiceError> {
        let pending: Vec<(String, String)> = self
            .gates
            .values_mut()
            .filter_map(|entry| entry.gate.flush().map(|l| (entry.source.clone(), l)))
            .collect();
        for (source, logical) in pending {
            self.emit(&source, logical).await?;
        }
        Ok(())
    }

    /// Periodic amnesty: pending blocks go out first, then gates, cached
    /// orders and failure counters are all forgotten.
    async fn sweep(&mut self) -> Result<(), ServiceError> {
        self.flush_gates().await?;
        let gates = self.gates.len();
        self.gates.clear();
        self.processor.reset();
        debug!(gates, "Parser sweep complete");
        Ok(())
    }

    async fn emit(&self, source: &str, logical: String) -> Result<(), ServiceError> {
        // Let timers and other tasks run between logical lines.
        tokio::task::yield_now().await;
        let parsed = self.processor.process_line(source, &logical);
        self.output
            .send(parsed)
            .await
            .map_err(|_| ServiceError::Closed)
    }
}
