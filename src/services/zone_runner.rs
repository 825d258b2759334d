//! Async driver for one zone.
//!
//! Events arrive on an mpsc channel and are processed strictly in order by a
//! single task that owns the [`ZoneController`]. A watchdog interval injects
//! `Tick` events so stall detection and settle timeouts fire even when the
//! sensor feed goes quiet. Persistence happens on spawned tasks; the loop
//! never waits on storage except for the final snapshot at shutdown.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Config;
use crate::domain::ports::{ActuatorDispatcher, StateStore};
use crate::services::zone::{ManualCommand, ZoneController, ZoneEvent, ZoneStatus};

/// Runner tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How often the watchdog injects a `Tick`.
    pub watchdog_interval: Duration,
    /// Bounded event queue length.
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(60),
            channel_capacity: 100,
        }
    }
}

enum Request {
    Event(ZoneEvent),
    Manual(ManualCommand, oneshot::Sender<DomainResult<()>>),
    Status(oneshot::Sender<ZoneStatus>),
    Stop,
}

/// Cloneable handle for feeding and querying a running zone.
#[derive(Clone)]
pub struct ZoneHandle {
    zone_id: String,
    tx: mpsc::Sender<Request>,
}

impl ZoneHandle {
    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    fn unavailable(&self) -> DomainError {
        DomainError::ZoneUnavailable(self.zone_id.clone())
    }

    /// Queue an event. Waits only for queue space, not for processing.
    pub async fn send(&self, event: ZoneEvent) -> DomainResult<()> {
        self.tx
            .send(Request::Event(event))
            .await
            .map_err(|_| self.unavailable())
    }

    /// Run an operator command and wait for its result.
    pub async fn manual(&self, command: ManualCommand) -> DomainResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Manual(command, reply))
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Snapshot taken after every event queued before this call.
    pub async fn status(&self) -> DomainResult<ZoneStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Status(reply))
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Ask the loop to write a final snapshot and exit.
    pub async fn stop(&self) {
        let _ = self.tx.send(Request::Stop).await;
    }
}

pub struct ZoneRunner {
    zone: ZoneController,
    dispatcher: Arc<dyn ActuatorDispatcher>,
    store: Arc<dyn StateStore>,
    config: RunnerConfig,
    pending_writes: Vec<JoinHandle<()>>,
}

impl ZoneRunner {
    pub fn new(
        zone: ZoneController,
        dispatcher: Arc<dyn ActuatorDispatcher>,
        store: Arc<dyn StateStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            zone,
            dispatcher,
            store,
            config,
            pending_writes: Vec::new(),
        }
    }

    /// Build the zone from whatever the store holds for it.
    pub async fn load(
        config: &Config,
        dispatcher: Arc<dyn ActuatorDispatcher>,
        store: Arc<dyn StateStore>,
        runner_config: RunnerConfig,
    ) -> DomainResult<Self> {
        let persisted = store.load(&config.zone.id).await?;
        let zone = ZoneController::restore(config, persisted, Utc::now())?;
        Ok(Self::new(zone, dispatcher, store, runner_config))
    }

    /// Start the event loop. The join handle yields the controller back on stop.
    pub fn spawn(self) -> (ZoneHandle, JoinHandle<ZoneController>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = ZoneHandle {
            zone_id: self.zone.zone_id().to_string(),
            tx,
        };
        let task = tokio::spawn(self.run_loop(rx));
        (handle, task)
    }

    async fn run_loop(mut self, mut rx: mpsc::Receiver<Request>) -> ZoneController {
        tracing::info!(zone = %self.zone.zone_id(), "zone runner started");

        let mut watchdog = interval(self.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(Request::Event(event)) => self.process(event),
                    Some(Request::Manual(command, reply)) => {
                        let result = self.process_manual(command);
                        let _ = reply.send(result);
                    }
                    Some(Request::Status(reply)) => {
                        let _ = reply.send(self.zone.status());
                    }
                    Some(Request::Stop) | None => break,
                },
                _ = watchdog.tick() => self.process(ZoneEvent::Tick(Utc::now())),
            }
        }

        // Let in-flight snapshots land first so the final one is not overwritten.
        for write in self.pending_writes.drain(..) {
            let _ = write.await;
        }
        let state = self.zone.to_persisted(Utc::now());
        if let Err(err) = self.store.save(&state).await {
            tracing::error!(zone = %self.zone.zone_id(), error = %err, "final snapshot failed");
        }
        tracing::info!(zone = %self.zone.zone_id(), "zone runner stopped");
        self.zone
    }

    fn process(&mut self, event: ZoneEvent) {
        match self.zone.handle(event) {
            Ok(outcome) => {
                self.dispatcher.dispatch(self.zone.zone_id(), outcome.command);
                if outcome.snapshot_due {
                    self.persist_in_background();
                }
            }
            Err(err) => {
                tracing::warn!(zone = %self.zone.zone_id(), error = %err, "event rejected");
            }
        }
    }

    fn process_manual(&mut self, command: ManualCommand) -> DomainResult<()> {
        let outcome = self.zone.handle(ZoneEvent::Manual {
            at: Utc::now(),
            command,
        })?;
        self.dispatcher.dispatch(self.zone.zone_id(), outcome.command);
        if outcome.snapshot_due {
            self.persist_in_background();
        }
        Ok(())
    }

    fn persist_in_background(&mut self) {
        let state = self.zone.to_persisted(Utc::now());
        let store = Arc::clone(&self.store);
        self.pending_writes.retain(|write| !write.is_finished());
        self.pending_writes.push(tokio::spawn(async move {
            if let Err(err) = store.save(&state).await {
                tracing::warn!(zone = %state.zone_id, error = %err, "snapshot write failed");
            }
        }));
    }
}
