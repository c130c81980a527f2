//! # Match Dispatcher
//!
//! Runs matching off the caller's thread with debounced re-invocation.
//!
//! The caller owns all staleness state: every [`MatchDispatcher::schedule`]
//! bumps a generation counter, and a response is only handed back if its
//! generation is still the latest and matching is still enabled. Nothing is
//! ever signalled into a running computation; superseded results are simply
//! dropped when they arrive.
//!
//! A single long-lived worker thread receives requests over a channel and
//! waits out the debounce window before computing, so a burst of
//! [`schedule`](MatchDispatcher::schedule) calls costs one computation. If
//! the worker cannot be spawned, or dies, the dispatcher falls back to
//! running the same computation on the caller's thread from
//! [`poll`](MatchDispatcher::poll) / [`wait`](MatchDispatcher::wait).
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use segment_matcher::{Algorithm, MatchDispatcher, MatchEngine, MatchRequest};
//!
//! let mut dispatcher = MatchDispatcher::new(Arc::new(MatchEngine::new()));
//! dispatcher.schedule(MatchRequest::new(&[], 50.0, Algorithm::Standard)).unwrap();
//! let segments = dispatcher.wait(Duration::from_secs(5));
//! assert_eq!(segments, Some(vec![]));
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};
use crate::{Algorithm, MatchEngine, MatchedSegment, Track};

/// Quiet period after the last schedule before a computation starts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Longest an inline `wait` holds back a pending computation.
pub const DEFAULT_MAX_INLINE_WAIT: Duration = Duration::from_secs(1);

/// One unit of work crossing the worker boundary.
///
/// JSON form: `{"tracks": [...], "delta": 50.0, "algorithm": "standard"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub tracks: Vec<Track>,
    /// Matching distance in meters
    pub delta: f64,
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl MatchRequest {
    /// Copy the visible tracks, with only the data matching needs.
    pub fn new(tracks: &[Track], delta_meters: f64, algorithm: Algorithm) -> Self {
        Self {
            tracks: tracks
                .iter()
                .filter(|t| t.visible)
                .map(Track::matching_copy)
                .collect(),
            delta: delta_meters,
            algorithm,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Where scheduled work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the background worker thread
    Worker,
    /// On the caller's thread, from `poll` / `wait`
    Inline,
    /// Shut down; nothing runs
    Stopped,
}

enum Command {
    Run { generation: u64, request: MatchRequest },
    Shutdown,
}

struct Response {
    generation: u64,
    segments: Vec<MatchedSegment>,
}

struct Worker {
    commands: Sender<Command>,
    responses: Receiver<Response>,
    handle: Option<JoinHandle<()>>,
}

/// The latest scheduled request that has not produced a result yet.
struct Pending {
    generation: u64,
    request: MatchRequest,
    scheduled_at: Instant,
}

/// Debounced, cancel-on-resubmit front end for a [`MatchEngine`].
pub struct MatchDispatcher {
    engine: Arc<MatchEngine>,
    debounce: Duration,
    max_inline_wait: Duration,
    generation: u64,
    enabled: bool,
    mode: DispatchMode,
    worker: Option<Worker>,
    pending: Option<Pending>,
}

impl MatchDispatcher {
    /// Dispatcher with a background worker and the default debounce.
    pub fn new(engine: Arc<MatchEngine>) -> Self {
        Self::with_debounce(engine, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(engine: Arc<MatchEngine>, debounce: Duration) -> Self {
        let mut dispatcher = Self::inline_with_debounce(engine, debounce);
        match spawn_worker(Arc::clone(&dispatcher.engine), debounce) {
            Ok(worker) => {
                dispatcher.worker = Some(worker);
                dispatcher.mode = DispatchMode::Worker;
            }
            Err(e) => warn!("[Dispatcher] Worker unavailable, running inline: {}", e),
        }
        dispatcher
    }

    /// Dispatcher that never starts a thread.
    pub fn inline(engine: Arc<MatchEngine>) -> Self {
        Self::inline_with_debounce(engine, DEFAULT_DEBOUNCE)
    }

    fn inline_with_debounce(engine: Arc<MatchEngine>, debounce: Duration) -> Self {
        Self {
            engine,
            debounce,
            max_inline_wait: DEFAULT_MAX_INLINE_WAIT,
            generation: 0,
            enabled: true,
            mode: DispatchMode::Inline,
            worker: None,
            pending: None,
        }
    }

    /// Cap on how long an inline `wait` defers a pending computation.
    pub fn with_max_inline_wait(mut self, max_wait: Duration) -> Self {
        self.max_inline_wait = max_wait;
        self
    }

    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.engine
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Latest generation handed out by `schedule` or `cancel`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while a scheduled request has not yet produced its result.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Enable or disable matching. Disabling discards any pending or
    /// in-flight result.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.cancel();
        }
        self.enabled = enabled;
    }

    /// Supersede whatever is pending without scheduling anything new.
    pub fn cancel(&mut self) {
        self.generation += 1;
        if self.pending.take().is_some() {
            debug!("[Dispatcher] Cancelled pending request");
        }
    }

    /// Schedule a recomputation, superseding any pending one.
    ///
    /// Returns the generation the eventual result will carry. While
    /// matching is disabled the request is dropped.
    pub fn schedule(&mut self, request: MatchRequest) -> Result<u64> {
        if self.mode == DispatchMode::Stopped {
            return Err(MatchError::DispatchUnavailable);
        }

        self.generation += 1;
        let generation = self.generation;
        if !self.enabled {
            debug!("[Dispatcher] Matching disabled, dropping generation {}", generation);
            self.pending = None;
            return Ok(generation);
        }

        if self.mode == DispatchMode::Worker {
            let sent = match &self.worker {
                Some(worker) => worker
                    .commands
                    .send(Command::Run {
                        generation,
                        request: request.clone(),
                    })
                    .is_ok(),
                None => false,
            };
            if !sent {
                self.fall_back_to_inline();
            }
        }

        self.pending = Some(Pending {
            generation,
            request,
            scheduled_at: Instant::now(),
        });
        Ok(generation)
    }

    /// Non-blocking check for the current result.
    pub fn poll(&mut self) -> Option<Vec<MatchedSegment>> {
        if self.mode == DispatchMode::Worker {
            loop {
                let received = match &self.worker {
                    Some(worker) => worker.responses.try_recv(),
                    None => Err(TryRecvError::Disconnected),
                };
                match received {
                    Ok(response) => {
                        if let Some(segments) = self.accept(response) {
                            return Some(segments);
                        }
                    }
                    Err(TryRecvError::Empty) => return None,
                    Err(TryRecvError::Disconnected) => {
                        self.fall_back_to_inline();
                        break;
                    }
                }
            }
        }

        if self.mode == DispatchMode::Inline {
            let due = self
                .pending
                .as_ref()
                .is_some_and(|p| p.scheduled_at.elapsed() >= self.debounce);
            if due {
                return self.run_pending_inline();
            }
        }
        None
    }

    /// Block up to `timeout` for the current result.
    pub fn wait(&mut self, timeout: Duration) -> Option<Vec<MatchedSegment>> {
        let deadline = Instant::now() + timeout;

        if self.mode == DispatchMode::Worker {
            loop {
                self.pending.as_ref()?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                let received = match &self.worker {
                    Some(worker) => worker.responses.recv_timeout(remaining),
                    None => Err(RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(response) => {
                        if let Some(segments) = self.accept(response) {
                            return Some(segments);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => return None,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.fall_back_to_inline();
                        break;
                    }
                }
            }
        }

        if self.mode == DispatchMode::Inline {
            let pending = self.pending.as_ref()?;
            let now = Instant::now();
            let debounce_end = pending.scheduled_at + self.debounce;
            let forced = now + self.max_inline_wait.min(deadline.saturating_duration_since(now));
            let run_at = debounce_end.min(forced);
            if run_at > now {
                thread::sleep(run_at - now);
            }
            return self.run_pending_inline();
        }
        None
    }

    /// Run a request immediately on the caller's thread, skipping the
    /// debounce and the generation bookkeeping.
    pub fn run_blocking(&self, request: &MatchRequest) -> Result<Vec<MatchedSegment>> {
        if self.mode == DispatchMode::Stopped {
            return Err(MatchError::DispatchUnavailable);
        }
        guarded(|| run_request(&self.engine, request))
    }

    /// Stop the worker. Every later `schedule` or `run_blocking` fails
    /// with [`MatchError::DispatchUnavailable`].
    pub fn shutdown(&mut self) {
        self.stop_worker();
        self.pending = None;
        self.mode = DispatchMode::Stopped;
    }

    fn accept(&mut self, response: Response) -> Option<Vec<MatchedSegment>> {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|p| p.generation == response.generation);
        if !(current && self.enabled && response.generation == self.generation) {
            debug!(
                "[Dispatcher] Discarding stale result for generation {} (current {})",
                response.generation, self.generation
            );
            return None;
        }
        self.pending = None;
        Some(response.segments)
    }

    fn run_pending_inline(&mut self) -> Option<Vec<MatchedSegment>> {
        let pending = self.pending.take()?;
        if !self.enabled || pending.generation != self.generation {
            return None;
        }
        match guarded(|| run_request(&self.engine, &pending.request)) {
            Ok(segments) => Some(segments),
            Err(e) => {
                warn!("[Dispatcher] Inline matching failed: {}", e);
                Some(Vec::new())
            }
        }
    }

    /// The worker is gone; anything it held is rerun on the caller's thread.
    fn fall_back_to_inline(&mut self) {
        warn!("[Dispatcher] Worker disconnected, switching to inline matching");
        self.stop_worker();
        self.mode = DispatchMode::Inline;
    }

    /// End the worker thread but keep its channels, as a crash would.
    #[cfg(test)]
    fn kill_worker(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            let _ = worker.commands.send(Command::Shutdown);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Shutdown);
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("[Dispatcher] Worker thread panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for MatchDispatcher {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_request(engine: &MatchEngine, request: &MatchRequest) -> Vec<MatchedSegment> {
    engine.match_tracks(&request.tracks, request.delta, request.algorithm)
}

/// Run a computation, turning a panic into [`MatchError::WorkerFailed`].
fn guarded<F>(f: F) -> Result<Vec<MatchedSegment>>
where
    F: FnOnce() -> Vec<MatchedSegment>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        MatchError::WorkerFailed { message }
    })
}

fn spawn_worker(engine: Arc<MatchEngine>, debounce: Duration) -> std::io::Result<Worker> {
    let (command_tx, command_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();

    let handle = thread::Builder::new()
        .name("segment-matcher".to_string())
        .spawn(move || worker_loop(&engine, debounce, command_rx, response_tx))?;

    Ok(Worker {
        commands: command_tx,
        responses: response_rx,
        handle: Some(handle),
    })
}

fn worker_loop(
    engine: &MatchEngine,
    debounce: Duration,
    commands: Receiver<Command>,
    responses: Sender<Response>,
) {
    loop {
        let (mut generation, mut request) = match commands.recv() {
            Ok(Command::Run {
                generation,
                request,
            }) => (generation, request),
            Ok(Command::Shutdown) | Err(_) => return,
        };

        // Every new request restarts the quiet period
        loop {
            match commands.recv_timeout(debounce) {
                Ok(Command::Run {
                    generation: newer,
                    request: newer_request,
                }) => {
                    debug!("[Dispatcher] Generation {} superseded by {}", generation, newer);
                    generation = newer;
                    request = newer_request;
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        let start = Instant::now();
        let segments = match guarded(|| run_request(engine, &request)) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("[Dispatcher] Matching failed for generation {}: {}", generation, e);
                Vec::new()
            }
        };
        info!(
            "[Dispatcher] Generation {} finished with {} segments in {}ms",
            generation,
            segments.len(),
            start.elapsed().as_millis()
        );

        if responses
            .send(Response {
                generation,
                segments,
            })
            .is_err()
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, lng: f64) -> Track {
        let coords: Vec<(f64, f64, f64)> = (0..400)
            .map(|i| (46.5 + i as f64 * 0.00005, lng, 400.0))
            .collect();
        Track::from_coordinates(id, id, &coords)
    }

    fn pair_request(delta: f64) -> MatchRequest {
        MatchRequest::new(&[line("a", 6.6), line("b", 6.6002)], delta, Algorithm::Standard)
    }

    #[test]
    fn test_request_drops_invisible_and_color() {
        let mut hidden = line("hidden", 6.7);
        hidden.visible = false;
        let mut shown = line("shown", 6.6);
        shown.color = Some("#00ff00".to_string());

        let request = MatchRequest::new(&[hidden, shown], 50.0, Algorithm::Adaptive);
        assert_eq!(request.tracks.len(), 1);
        assert_eq!(request.tracks[0].id, "shown");
        assert_eq!(request.tracks[0].color, None);
    }

    #[test]
    fn test_request_json_contract() {
        let request = pair_request(50.0);
        let json = request.to_json().unwrap();
        assert!(json.contains("\"delta\":50.0"));
        assert!(json.contains("\"algorithm\":\"standard\""));
        assert!(json.contains("\"cumulativeDistanceKm\""));
        assert_eq!(MatchRequest::from_json(&json).unwrap(), request);

        assert!(matches!(
            MatchRequest::from_json("{\"tracks\": 3}"),
            Err(MatchError::Serialization(_))
        ));
    }

    #[test]
    fn test_algorithm_defaults_when_missing() {
        let request = MatchRequest::from_json("{\"tracks\": [], \"delta\": 25}").unwrap();
        assert_eq!(request.algorithm, Algorithm::Standard);
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result = guarded(|| panic!("boom"));
        match result {
            Err(MatchError::WorkerFailed { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_worker_round_trip() {
        let mut dispatcher = MatchDispatcher::with_debounce(
            Arc::new(MatchEngine::new()),
            Duration::from_millis(10),
        );
        assert_eq!(dispatcher.mode(), DispatchMode::Worker);

        let generation = dispatcher.schedule(pair_request(50.0)).unwrap();
        assert_eq!(generation, 1);
        let segments = dispatcher.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!dispatcher.is_pending());

        // Nothing outstanding any more
        assert!(dispatcher.wait(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_dead_worker_reruns_pending_inline() {
        let mut dispatcher = MatchDispatcher::with_debounce(
            Arc::new(MatchEngine::new()),
            Duration::from_millis(300),
        );
        let generation = dispatcher.schedule(pair_request(50.0)).unwrap();
        // Dies inside the debounce window, before computing anything
        dispatcher.kill_worker();

        let segments = dispatcher.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(dispatcher.mode(), DispatchMode::Inline);
        assert_eq!(segments.len(), 1);
        assert_eq!(dispatcher.generation(), generation);
        assert!(!dispatcher.is_pending());
    }

    #[test]
    fn test_schedule_after_worker_death_goes_inline() {
        let mut dispatcher = MatchDispatcher::with_debounce(
            Arc::new(MatchEngine::new()),
            Duration::from_millis(10),
        );
        dispatcher.kill_worker();
        assert_eq!(dispatcher.mode(), DispatchMode::Worker);

        dispatcher.schedule(pair_request(50.0)).unwrap();
        assert_eq!(dispatcher.mode(), DispatchMode::Inline);
        assert!(dispatcher.is_pending());
        assert_eq!(dispatcher.wait(Duration::from_secs(10)).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_inline_poll_respects_debounce() {
        let mut dispatcher = MatchDispatcher::inline(Arc::new(MatchEngine::new()));
        assert_eq!(dispatcher.mode(), DispatchMode::Inline);

        dispatcher.schedule(pair_request(50.0)).unwrap();
        assert!(dispatcher.poll().is_none());
        assert!(dispatcher.is_pending());

        thread::sleep(DEFAULT_DEBOUNCE + Duration::from_millis(20));
        let segments = dispatcher.poll().unwrap();
        assert_eq!(segments.len(), 1);
        assert!(dispatcher.poll().is_none());
    }

    #[test]
    fn test_inline_wait_forces_after_max_wait() {
        let mut dispatcher = MatchDispatcher::inline(Arc::new(MatchEngine::new()))
            .with_max_inline_wait(Duration::from_millis(10));

        dispatcher.schedule(MatchRequest::new(&[], 50.0, Algorithm::Standard)).unwrap();
        let start = Instant::now();
        assert_eq!(dispatcher.wait(Duration::from_secs(5)), Some(vec![]));
        // Well before the 150 ms debounce would have elapsed
        assert!(start.elapsed() < Duration::from_millis(120));
    }

    #[test]
    fn test_disable_discards_pending() {
        let mut dispatcher = MatchDispatcher::inline(Arc::new(MatchEngine::new()));
        dispatcher.schedule(pair_request(50.0)).unwrap();
        dispatcher.set_enabled(false);
        assert!(!dispatcher.is_pending());
        assert!(dispatcher.wait(Duration::from_millis(200)).is_none());

        // Scheduling while disabled is a no-op apart from the generation
        let generation = dispatcher.schedule(pair_request(50.0)).unwrap();
        assert_eq!(generation, dispatcher.generation());
        assert!(!dispatcher.is_pending());

        dispatcher.set_enabled(true);
        dispatcher.schedule(pair_request(50.0)).unwrap();
        assert_eq!(dispatcher.wait(Duration::from_secs(5)).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_shutdown_makes_dispatch_unavailable() {
        let mut dispatcher = MatchDispatcher::new(Arc::new(MatchEngine::new()));
        dispatcher.shutdown();
        assert_eq!(dispatcher.mode(), DispatchMode::Stopped);
        assert!(matches!(
            dispatcher.schedule(pair_request(50.0)),
            Err(MatchError::DispatchUnavailable)
        ));
        assert!(matches!(
            dispatcher.run_blocking(&pair_request(50.0)),
            Err(MatchError::DispatchUnavailable)
        ));
    }
}
