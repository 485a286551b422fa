//! Playback controller: state machine, control surface, and the execution loop.
//!
//! [`PlaybackController`] is a cheap, clonable handle. Producers on any thread enqueue locators
//! directly into the shared queue and post control requests as [`ControlCommand`]s.
//! [`ControllerWorker`] is the single execution context: it owns the pipeline lifecycle and the
//! resolver, applies commands, and advances the state machine one [`ControllerWorker::tick`] at a
//! time, either on its own thread ([`ControllerWorker::spawn`]) or driven by the caller.
//!
//! Failure policy: resolve, start and step failures are logged and the item is dropped. After
//! `max_consecutive_failures` failed starts in a row the loop waits `failure_backoff_ms` before
//! dequeuing again, so a queue full of dead stations cannot spin the CPU.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use jukebox_types::{ControllerStatus, PipelineState, PlaybackEndReason};

use crate::config::ControllerConfig;
use crate::error::{ControlError, QueueError};
use crate::pipeline::{PipelineLifecycle, StepResult};
use crate::queue::BoundedItemQueue;
use crate::resolve::ItemResolver;
use crate::sink::AudioSink;
use crate::source::MetadataHandler;
use crate::status::{ControllerStatusState, StatusRecorder};

/// Attempts the worker makes to clear the queue itself when the caller's clear timed out.
const RESET_CLEAR_ATTEMPTS: usize = 10;

/// Handler invoked once when the queue drains with nothing playing.
///
/// Runs on the controller's execution context. It may enqueue items, call `play`, or register a
/// new handler; the slot is empty while it runs.
pub trait EndOfQueueHandler: Send {
    fn on_drained(self: Box<Self>, controller: &PlaybackController);
}

impl<F> EndOfQueueHandler for F
where
    F: FnOnce(&PlaybackController) + Send,
{
    fn on_drained(self: Box<Self>, controller: &PlaybackController) {
        (*self)(controller)
    }
}

/// Requests delivered to the execution context.
pub enum ControlCommand {
    Play,
    /// Toggle between playing and paused.
    Pause,
    Skip,
    /// `cleared` is false when the caller could not clear the queue itself.
    StopAndClear { cleared: bool },
    RegisterEndOfQueue(Box<dyn EndOfQueueHandler>),
    ReleaseBuffers,
    Shutdown,
}

struct Shared {
    queue: BoundedItemQueue,
    state: AtomicU8,
    status: Arc<Mutex<ControllerStatusState>>,
}

/// Control surface shared by all producers.
#[derive(Clone)]
pub struct PlaybackController {
    shared: Arc<Shared>,
    cmd_tx: Sender<ControlCommand>,
}

impl PlaybackController {
    /// Create the controller handle and its (not yet running) execution context.
    pub fn new(
        config: ControllerConfig,
        resolver: ItemResolver,
        sink: Box<dyn AudioSink>,
        metadata: Arc<dyn MetadataHandler>,
    ) -> (Self, ControllerWorker) {
        let status = ControllerStatusState::shared();
        let shared = Arc::new(Shared {
            queue: BoundedItemQueue::new(
                config.queue_capacity,
                config.max_locator_len,
                config.lock_timeout(),
            ),
            state: AtomicU8::new(PipelineState::Stopped.as_u8()),
            status: status.clone(),
        });
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let controller = Self { shared, cmd_tx };

        let worker = ControllerWorker {
            controller: controller.clone(),
            cmd_rx,
            lifecycle: PipelineLifecycle::new(sink),
            resolver,
            metadata: Arc::new(StatusRecorder::new(status, metadata)),
            config,
            state: PipelineState::Stopped,
            resume_after_reset: false,
            end_handler: None,
            drain_epoch: 0,
            fired_drain: None,
            consecutive_failures: 0,
            backoff_until: None,
            shutdown: false,
        };
        (controller, worker)
    }

    /// Append a locator. `false` when the queue is full, contended, or the locator is invalid.
    pub fn enqueue(&self, item: &str) -> bool {
        self.shared.queue.enqueue(item)
    }

    pub fn try_enqueue(&self, item: &str) -> Result<(), QueueError> {
        self.shared.queue.try_enqueue(item)
    }

    /// Start (or resume) consuming the queue.
    pub fn play(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Play)
    }

    /// Toggle pause. The active pipeline is kept while paused.
    pub fn pause(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Pause)
    }

    /// Abandon the active item at the next tick and continue with the queue.
    pub fn skip(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Skip)
    }

    /// Empty the queue now, then tear down the active pipeline and drop the end-of-queue
    /// handler at the next tick.
    ///
    /// Items enqueued after this call returns survive the reset. Poll [`Self::current_state`]
    /// for completion.
    pub fn stop_and_clear(&self) -> Result<(), ControlError> {
        let cleared = self.shared.queue.clear_and_hold().is_ok();
        let sent = self.send(ControlCommand::StopAndClear { cleared });
        if sent.is_err() && cleared {
            self.shared.queue.release_hold();
        }
        sent
    }

    /// Install the handler for the next drain, replacing any unfired one.
    pub fn register_end_of_queue(
        &self,
        handler: impl EndOfQueueHandler + 'static,
    ) -> Result<(), ControlError> {
        self.send(ControlCommand::RegisterEndOfQueue(Box::new(handler)))
    }

    /// Drop pooled stream and decoder buffers (tearing down first when stopped).
    pub fn release_buffers(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::ReleaseBuffers)
    }

    /// Ask the execution context to tear down and exit.
    pub fn shutdown(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Shutdown)
    }

    pub fn current_state(&self) -> PipelineState {
        PipelineState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.current_state();
        let queued = self.queued();
        self.shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(state, queued)
    }

    fn send(&self, cmd: ControlCommand) -> Result<(), ControlError> {
        self.cmd_tx.send(cmd).map_err(|_| ControlError::WorkerGone)
    }
}

/// The execution context. Owns the active pipeline; nothing else touches it.
pub struct ControllerWorker {
    controller: PlaybackController,
    cmd_rx: Receiver<ControlCommand>,
    lifecycle: PipelineLifecycle,
    resolver: ItemResolver,
    metadata: Arc<dyn MetadataHandler>,
    config: ControllerConfig,
    state: PipelineState,
    resume_after_reset: bool,
    end_handler: Option<Box<dyn EndOfQueueHandler>>,
    /// Incremented every time the queue drains with nothing playing.
    drain_epoch: u64,
    fired_drain: Option<u64>,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    shutdown: bool,
}

impl ControllerWorker {
    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Run one loop iteration: apply pending commands, then act on the current state.
    ///
    /// Idle and paused states wait up to their configured interval for a command. Returns
    /// `false` once the worker has shut down.
    pub fn tick(&mut self) -> bool {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle(cmd);
        }

        if !self.shutdown {
            match self.state {
                PipelineState::Resetting => self.complete_reset(),
                PipelineState::Skipping => {
                    self.end_active(PlaybackEndReason::Skipped);
                    self.set_state(PipelineState::Playing);
                    self.start_next();
                }
                PipelineState::Playing => self.tick_playing(),
                PipelineState::Paused => self.wait_for_command(self.config.paused_wait()),
                PipelineState::Stopped => self.wait_for_command(self.config.idle_wait()),
            }
        }

        if self.shutdown {
            self.end_active(PlaybackEndReason::Stopped);
            self.set_state(PipelineState::Stopped);
            return false;
        }
        true
    }

    /// Tick until shutdown.
    pub fn run(mut self) {
        tracing::info!("controller loop started");
        while self.tick() {}
        tracing::info!("controller loop stopped");
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<ControllerThread> {
        let controller = self.controller.clone();
        let handle = thread::Builder::new()
            .name("jukebox-controller".to_string())
            .spawn(move || self.run())
            .context("spawn controller thread")?;
        Ok(ControllerThread {
            controller,
            handle: Some(handle),
        })
    }

    fn handle(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Play => match self.state {
                PipelineState::Stopped => self.set_state(PipelineState::Playing),
                PipelineState::Paused => {
                    self.lifecycle.set_paused(false);
                    self.set_state(PipelineState::Playing);
                }
                PipelineState::Resetting => self.resume_after_reset = true,
                PipelineState::Playing | PipelineState::Skipping => {}
            },
            ControlCommand::Pause => match self.state {
                PipelineState::Playing => {
                    self.lifecycle.set_paused(true);
                    self.set_state(PipelineState::Paused);
                }
                PipelineState::Paused => {
                    self.lifecycle.set_paused(false);
                    self.set_state(PipelineState::Playing);
                }
                other => tracing::debug!(state = ?other, "pause ignored"),
            },
            ControlCommand::Skip => match self.state {
                PipelineState::Playing => self.set_state(PipelineState::Skipping),
                PipelineState::Paused => {
                    self.lifecycle.set_paused(false);
                    self.set_state(PipelineState::Skipping);
                }
                other => tracing::debug!(state = ?other, "skip ignored"),
            },
            ControlCommand::StopAndClear { cleared } => {
                if !cleared {
                    self.clear_queue_for_reset();
                }
                if self.state == PipelineState::Paused {
                    self.lifecycle.set_paused(false);
                }
                if self.end_handler.take().is_some() {
                    tracing::debug!("end-of-queue handler cleared");
                }
                // Failures of the cleared queue must not hold back what comes next.
                self.consecutive_failures = 0;
                self.backoff_until = None;
                self.with_status(|s| s.consecutive_failures = 0);
                self.resume_after_reset = false;
                self.set_state(PipelineState::Resetting);
            }
            ControlCommand::RegisterEndOfQueue(handler) => {
                if self.end_handler.replace(handler).is_some() {
                    tracing::debug!("unfired end-of-queue handler replaced");
                }
            }
            ControlCommand::ReleaseBuffers => self.release_buffers(),
            ControlCommand::Shutdown => self.shutdown = true,
        }
    }

    fn tick_playing(&mut self) {
        if !self.lifecycle.is_active() {
            self.start_next();
            return;
        }

        match self.lifecycle.step() {
            StepResult::Continue => {}
            StepResult::Finished => {
                if let Some(item) = self.lifecycle.active_locator() {
                    tracing::info!(item = %item, "item finished");
                }
                self.lifecycle.finish();
                self.recycle();
                self.with_status(|s| s.ended(PlaybackEndReason::Eof));
                self.start_next();
            }
            StepResult::Error(e) => {
                let item = self
                    .lifecycle
                    .active_locator()
                    .map(|l| l.to_string())
                    .unwrap_or_default();
                tracing::warn!(item = %item, error = %e, "pipeline failed; advancing");
                self.end_active(PlaybackEndReason::Error);
                self.start_next();
            }
        }
    }

    /// Dequeue and start the next item, or handle the drain.
    fn start_next(&mut self) {
        if let Some(until) = self.backoff_until {
            let now = Instant::now();
            if now < until {
                self.wait_for_command((until - now).min(self.config.idle_wait()));
                return;
            }
            self.backoff_until = None;
        }

        match self.controller.shared.queue.try_dequeue() {
            Ok(Some(item)) => self.start_item(&item),
            Ok(None) => self.on_drained(),
            Err(e) => tracing::trace!(error = %e, "dequeue deferred"),
        }
    }

    fn start_item(&mut self, item: &str) {
        let started = self
            .resolver
            .resolve(item, self.metadata.clone())
            .and_then(|pipeline| self.lifecycle.start(pipeline));
        self.recycle();

        match started {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.with_status(|s| s.started(item));
                tracing::info!(item, "now playing");
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let failures = self.consecutive_failures;
                tracing::warn!(item, error = %e, failures, "item failed; advancing");
                self.with_status(|s| {
                    s.ended(PlaybackEndReason::Error);
                    s.consecutive_failures = failures;
                });

                let cap = self.config.max_consecutive_failures;
                if cap > 0 && failures % cap == 0 {
                    let backoff = self.config.failure_backoff();
                    tracing::warn!(
                        failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "too many failures in a row; backing off"
                    );
                    self.backoff_until = Some(Instant::now() + backoff);
                }
            }
        }
    }

    fn on_drained(&mut self) {
        self.set_state(PipelineState::Stopped);
        self.drain_epoch += 1;
        tracing::info!(drain = self.drain_epoch, "queue drained");
        if let Err(e) = self.fire_end_of_queue() {
            tracing::warn!(error = %e, "end-of-queue handler not run");
        }
    }

    fn fire_end_of_queue(&mut self) -> Result<(), ControlError> {
        let Some(handler) = self.end_handler.take() else {
            return Ok(());
        };
        if self.fired_drain == Some(self.drain_epoch) {
            return Err(ControlError::CallbackAlreadyFired {
                drain: self.drain_epoch,
            });
        }
        self.fired_drain = Some(self.drain_epoch);
        tracing::debug!(drain = self.drain_epoch, "end-of-queue handler fired");
        handler.on_drained(&self.controller);
        Ok(())
    }

    fn complete_reset(&mut self) {
        self.end_active(PlaybackEndReason::Stopped);
        self.controller.shared.queue.release_hold();
        let next = if std::mem::take(&mut self.resume_after_reset) {
            PipelineState::Playing
        } else {
            PipelineState::Stopped
        };
        tracing::info!(next = ?next, "reset complete");
        self.set_state(next);
    }

    fn clear_queue_for_reset(&mut self) {
        for _ in 0..RESET_CLEAR_ATTEMPTS {
            if self.controller.shared.queue.clear_and_hold().is_ok() {
                return;
            }
        }
        tracing::warn!("queue not cleared: lock contended");
    }

    fn release_buffers(&mut self) {
        if matches!(self.state, PipelineState::Stopped | PipelineState::Resetting) {
            self.end_active(PlaybackEndReason::Stopped);
        }
        let freed = self.resolver.free_buffers();
        tracing::info!(freed_bytes = freed, "pooled buffers released");
    }

    /// Tear down the active pipeline (if any) and record why it ended.
    fn end_active(&mut self, reason: PlaybackEndReason) {
        if self.lifecycle.is_active() {
            self.lifecycle.teardown();
            self.with_status(|s| s.ended(reason));
        }
        self.recycle();
    }

    fn recycle(&mut self) {
        let reclaimed = self.lifecycle.take_reclaimed();
        if !reclaimed.is_empty() {
            self.resolver.recycle(reclaimed);
        }
    }

    fn wait_for_command(&mut self, timeout: Duration) {
        match self.cmd_rx.recv_timeout(timeout) {
            Ok(cmd) => self.handle(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.shutdown = true,
        }
    }

    fn set_state(&mut self, next: PipelineState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
        self.controller
            .shared
            .state
            .store(next.as_u8(), Ordering::Release);
    }

    fn with_status(&self, f: impl FnOnce(&mut ControllerStatusState)) {
        let mut status = self
            .controller
            .shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }
}

/// A worker running on its own thread. Dropping it shuts the worker down and joins it.
pub struct ControllerThread {
    controller: PlaybackController,
    handle: Option<JoinHandle<()>>,
}

impl ControllerThread {
    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Stop the worker and wait for it to release the active pipeline.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.controller.shutdown();
            if handle.join().is_err() {
                tracing::error!("controller thread panicked");
            }
        }
    }
}

impl Drop for ControllerThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
