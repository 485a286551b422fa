//! Runtime wiring: builds the controller from config and runs the front-ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Sender;

use jukebox_player::decode::SymphoniaDecoders;
use jukebox_player::resolve::ItemResolver;
use jukebox_player::sink::{AudioSink, CpalSink, NullSink, device};
use jukebox_player::source::LogMetadata;
use jukebox_player::source::http::HttpStreamReader;
use jukebox_player::source::local::FsLocalReader;
use jukebox_player::{ControllerWorker, EndOfQueueHandler, PlaybackController, QueueError};
use jukebox_types::PipelineState;

use crate::config::JukeboxConfig;
use crate::console;

/// How long Ctrl-C waits for the reset to complete before exiting anyway.
const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("{name}");
    }
    Ok(())
}

/// Build the controller and its (not yet running) worker from config.
pub fn build(config: &JukeboxConfig, null_output: bool) -> (PlaybackController, ControllerWorker) {
    let resolver = ItemResolver::new(
        Arc::new(FsLocalReader::new(config.library.root.clone())),
        Arc::new(HttpStreamReader::new(config.network.reader_config())),
        Arc::new(SymphoniaDecoders),
        config.controller.read_ahead_bytes,
    );
    let sink: Box<dyn AudioSink> = if null_output {
        tracing::info!("null output: decoded audio is discarded");
        Box::new(NullSink::default())
    } else {
        Box::new(CpalSink::new(config.device.clone(), config.playback.clone()))
    };
    PlaybackController::new(
        config.controller.clone(),
        resolver,
        sink,
        Arc::new(LogMetadata),
    )
}

/// Play `items` in order and return once the queue drains for good.
///
/// Items beyond the queue capacity are fed in as the queue empties.
pub fn run_play(config: &JukeboxConfig, null_output: bool, items: Vec<String>) -> Result<()> {
    let (controller, worker) = build(config, null_output);
    let thread = worker.spawn()?;
    install_interrupt_handler(controller.clone());

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let mut feeder = PlaylistFeeder {
        pending: items.into(),
        done: done_tx,
    };
    let fed = feeder.feed(&controller);
    tracing::info!(queued = fed, pending = feeder.pending.len(), "playlist loaded");
    controller.register_end_of_queue(feeder)?;
    controller.play()?;

    let _ = done_rx.recv();
    let status = controller.status();
    tracing::info!(
        items_started = status.items_started,
        end_reason = ?status.end_reason,
        "playlist finished"
    );
    thread.shutdown();
    Ok(())
}

/// Enqueue `items`, then read control commands from stdin until `quit` or end of input.
pub fn run_console(config: &JukeboxConfig, null_output: bool, items: Vec<String>) -> Result<()> {
    let (controller, worker) = build(config, null_output);
    let thread = worker.spawn()?;
    install_interrupt_handler(controller.clone());

    for item in &items {
        if let Err(e) = controller.try_enqueue(item) {
            tracing::warn!(item = %item, error = %e, "not queued");
        }
    }
    if !items.is_empty() {
        controller.play()?;
    }

    let stdin = std::io::stdin();
    let result = console::run(&controller, stdin.lock(), std::io::stdout());
    let _ = controller.stop_and_clear();
    thread.shutdown();
    result
}

/// Ctrl-C: stop and clear, give teardown a moment, exit.
fn install_interrupt_handler(controller: PlaybackController) {
    let result = ctrlc::set_handler(move || {
        let _ = controller.stop_and_clear();
        let deadline = Instant::now() + INTERRUPT_GRACE;
        while controller.current_state() != PipelineState::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        std::process::exit(130);
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "Ctrl-C handler not installed");
    }
}

/// End-of-queue handler that tops the queue up from a pending list.
///
/// Re-registers itself after every refill; signals `done` when nothing was left to feed.
struct PlaylistFeeder {
    pending: VecDeque<String>,
    done: Sender<()>,
}

impl PlaylistFeeder {
    /// Move as many pending items into the queue as fit. Returns how many were queued.
    fn feed(&mut self, controller: &PlaybackController) -> usize {
        let mut fed = 0;
        while let Some(item) = self.pending.pop_front() {
            match controller.try_enqueue(&item) {
                Ok(()) => fed += 1,
                Err(QueueError::Full | QueueError::Timeout) => {
                    self.pending.push_front(item);
                    break;
                }
                Err(e) => tracing::warn!(item = %item, error = %e, "skipping item"),
            }
        }
        fed
    }
}

impl EndOfQueueHandler for PlaylistFeeder {
    fn on_drained(mut self: Box<Self>, controller: &PlaybackController) {
        if self.feed(controller) == 0 {
            let _ = self.done.send(());
            return;
        }
        let done = self.done.clone();
        if controller.register_end_of_queue(*self).is_err() || controller.play().is_err() {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_player::ControllerThread;

    fn null_controller(capacity: usize) -> (PlaybackController, ControllerThread) {
        let mut config = JukeboxConfig::default();
        config.controller.queue_capacity = capacity;
        config.controller.idle_wait_ms = 1;
        let (controller, worker) = build(&config, true);
        let thread = worker.spawn().unwrap();
        (controller, thread)
    }

    #[test]
    fn feeder_stops_at_capacity_and_keeps_the_rest() {
        let (controller, thread) = null_controller(2);
        let (done, _rx) = crossbeam_channel::bounded(1);
        let mut feeder = PlaylistFeeder {
            pending: ["/a.mp3", "", "/b.mp3", "/c.mp3"]
                .into_iter()
                .map(String::from)
                .collect(),
            done,
        };
        assert_eq!(feeder.feed(&controller), 2);
        assert_eq!(feeder.pending, VecDeque::from(vec!["/c.mp3".to_string()]));
        thread.shutdown();
    }

    #[test]
    fn playlist_of_missing_files_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, thread) = null_controller(2);
        let (done, rx) = crossbeam_channel::bounded(1);
        let pending = (0..5)
            .map(|i| dir.path().join(format!("missing{i}.wav")).display().to_string())
            .collect();
        controller
            .register_end_of_queue(PlaylistFeeder { pending, done })
            .unwrap();
        controller.play().unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let status = controller.status();
        assert_eq!(status.items_started, 0);
        assert_eq!(status.consecutive_failures, 5);
        thread.shutdown();
    }
}
