//! Action and event queues, background workers and the read lock
//!
//! ## Architecture
//!
//! ```text
//!  Mutating thread                 Action worker (long-lived)
//!        │  queue(Action)                 │
//!        │───────────────────────────────>│ stat / load tags / sync tags
//!        │                                │
//!        │            Event               │
//!        │<───────────────────────────────│
//!        │
//!        │  spawn_worker(..)           Ephemeral workers
//!        │───────────────────────────────> scans, full queries, save, load
//!        │      Event ... ThreadExited    │
//!        │<───────────────────────────────│
//! ```
//!
//! Workers never touch the store. Everything they produce travels back as an
//! [`Event`] and is applied by whoever owns the [`Database`](crate::Database).

mod action;
mod event;
mod read_lock;

pub use action::{Action, ActionKind};
pub use event::Event;
pub use read_lock::ReadLock;

use crate::error::{DbError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use soul_core::{FileIo, MetadataReader};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Handle given to a worker closure
#[derive(Clone)]
pub struct WorkerContext {
    events: Sender<Event>,
    exiting: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Push an event; false if the receiving side is gone
    pub fn send(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    /// Whether the database is shutting down
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }
}

/// Pushes `ThreadExited` when a worker ends, including by panic
struct ExitGuard {
    events: Sender<Event>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(Event::ThreadExited);
    }
}

/// Queues and workers of one database
pub struct Coordinator {
    actions: Option<Sender<Action>>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    exiting: Arc<AtomicBool>,
    pending_actions: Arc<AtomicUsize>,
    outstanding: Arc<AtomicUsize>,
    read_lock: ReadLock,
    action_worker: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Create the queues and start the action worker
    pub fn start(
        reader: Arc<dyn MetadataReader>,
        file_io: Arc<dyn FileIo>,
        pop_timeout: Duration,
    ) -> Result<Self> {
        let (actions_tx, actions_rx) = unbounded::<Action>();
        let (events_tx, events_rx) = unbounded::<Event>();
        let exiting = Arc::new(AtomicBool::new(false));
        let pending_actions = Arc::new(AtomicUsize::new(0));

        let ctx = WorkerContext {
            events: events_tx.clone(),
            exiting: Arc::clone(&exiting),
        };
        let pending = Arc::clone(&pending_actions);
        let action_worker = thread::Builder::new()
            .name("soul-db-actions".to_string())
            .spawn(move || {
                run_action_worker(&actions_rx, &ctx, &pending, &*reader, &*file_io, pop_timeout);
            })?;

        Ok(Self {
            actions: Some(actions_tx),
            events_tx,
            events_rx,
            exiting,
            pending_actions,
            outstanding: Arc::new(AtomicUsize::new(0)),
            read_lock: ReadLock::new(),
            action_worker: Some(action_worker),
            workers: Vec::new(),
        })
    }

    /// Queue an action for the serial worker
    pub fn queue(&self, action: Action) -> Result<()> {
        let Some(actions) = self.actions.as_ref().filter(|_| !self.is_exiting()) else {
            return Err(DbError::ShuttingDown);
        };
        trace!("Queueing {:?} for {}", action.kind, action.uri);
        self.pending_actions.fetch_add(1, Ordering::AcqRel);
        if actions.send(action).is_err() {
            self.pending_actions.fetch_sub(1, Ordering::AcqRel);
            return Err(DbError::ShuttingDown);
        }
        Ok(())
    }

    /// Start an ephemeral worker
    ///
    /// The worker counts as outstanding until its `ThreadExited` event has
    /// been handed to [`Coordinator::thread_exited`].
    pub fn spawn_worker<F>(&mut self, name: &str, work: F) -> Result<()>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        if self.is_exiting() {
            return Err(DbError::ShuttingDown);
        }
        let ctx = WorkerContext {
            events: self.events_tx.clone(),
            exiting: Arc::clone(&self.exiting),
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("soul-db-{}", name))
            .spawn(move || {
                let _guard = ExitGuard {
                    events: ctx.events.clone(),
                };
                work(&ctx);
            });

        match spawned {
            Ok(handle) => {
                debug!("Spawned {} worker", name);
                self.workers.retain(|h| !h.is_finished());
                self.workers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                error!("Failed to spawn {} worker: {}", name, e);
                Err(DbError::Spawn(e))
            }
        }
    }

    /// Sender for producers living outside the coordinator
    pub fn event_sender(&self) -> Sender<Event> {
        self.events_tx.clone()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.events_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of events waiting
    pub fn queued_events(&self) -> usize {
        self.events_rx.len()
    }

    /// Account for a `ThreadExited` event
    pub fn thread_exited(&self) {
        let result = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if result.is_err() {
            error!("Worker exit reported with no outstanding workers");
        }
    }

    /// Ephemeral workers that have not reported their exit
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Actions queued or executing
    pub fn pending_actions(&self) -> usize {
        self.pending_actions.load(Ordering::Acquire)
    }

    /// Whether anything is queued, executing or waiting to be applied
    pub fn is_busy(&self) -> bool {
        self.outstanding() > 0 || self.pending_actions() > 0 || !self.events_rx.is_empty()
    }

    pub fn read_lock(&self) -> &ReadLock {
        &self.read_lock
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Stop every worker
    ///
    /// Queued actions are dropped without being executed. Ephemeral workers
    /// see the exiting flag at their next check. Events left in the queue
    /// stay there for the owner to drain.
    pub fn shutdown(&mut self) {
        if self.exiting.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down database workers");
        self.actions = None;

        if let Some(handle) = self.action_worker.take() {
            if handle.join().is_err() {
                error!("Action worker panicked");
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Database worker panicked");
            }
        }
        self.pending_actions.store(0, Ordering::Release);
        debug!("Database workers stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_action_worker(
    actions: &Receiver<Action>,
    ctx: &WorkerContext,
    pending: &AtomicUsize,
    reader: &dyn MetadataReader,
    file_io: &dyn FileIo,
    pop_timeout: Duration,
) {
    debug!("Action worker started");

    loop {
        if ctx.is_exiting() {
            break;
        }

        match actions.recv_timeout(pop_timeout) {
            Ok(action) => {
                if ctx.is_exiting() {
                    break;
                }
                let event = execute(&action, reader, file_io);
                let delivered = ctx.send(event);
                pending.fetch_sub(1, Ordering::AcqRel);
                if !delivered {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Action worker exiting");
}

fn execute(action: &Action, reader: &dyn MetadataReader, file_io: &dyn FileIo) -> Event {
    let uri = action.uri.clone();
    match &action.kind {
        ActionKind::Stat { mountpoint } => {
            let result = file_io.stat(&uri);
            let mount_present = match (&result, mountpoint) {
                (Err(_), Some(mount)) if !mount.is_empty() => file_io.exists(mount),
                _ => true,
            };
            Event::Stat {
                uri,
                result,
                mount_present,
            }
        }
        ActionKind::LoadMetadata => {
            let stat = file_io.stat(&uri).ok();
            let result = reader.load(&uri);
            Event::MetadataLoaded { uri, stat, result }
        }
        ActionKind::SyncTags(fields) => {
            let result = reader.save(&uri, fields);
            Event::TagsSynced { uri, result }
        }
    }
}
