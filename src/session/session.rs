use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::SessionState;
use super::stats::{SessionOutcome, SessionStats, SessionStatus};
use crate::audio::{
    decode_chunk, encode_frame, normalize_frame, AudioFrame, AudioOutput, BufferId,
    CaptureDevice, EncodedChunk, PlaybackBuffer, PlaybackQueue, ScheduledBuffer,
};
use crate::error::{SessionError, SessionResult};
use crate::live::{LiveConnector, Outbound, RemoteEvent};

/// Receivers the driver loop multiplexes
#[derive(Default)]
struct Inbound {
    capture: Option<mpsc::Receiver<AudioFrame>>,
    events: Option<mpsc::Receiver<RemoteEvent>>,
    completions: Option<mpsc::UnboundedReceiver<BufferId>>,
}

/// One live voice-interview session
///
/// Mediates between the local capture device, the output device and a
/// remote conversational session. All handlers take `&mut self` and are
/// driven one event at a time by `run_until`, so the playback queue and
/// the scheduling cursor are plain fields.
pub struct LiveSession {
    config: SessionConfig,
    state: SessionState,

    capture: Box<dyn CaptureDevice>,
    capture_held: bool,

    output: Box<dyn AudioOutput>,
    output_held: bool,

    connector: Arc<dyn LiveConnector>,
    remote: Option<mpsc::Sender<Outbound>>,

    inbound: Inbound,

    /// Outbound chunks captured before the connection was ready
    pending: VecDeque<EncodedChunk>,

    playback: PlaybackQueue,
    next_playback_time: f64,

    stats: SessionStats,
    turn_text: String,
    transcript: Vec<String>,
    error: Option<SessionError>,

    status_tx: Option<watch::Sender<SessionStatus>>,
}

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        capture: Box<dyn CaptureDevice>,
        output: Box<dyn AudioOutput>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        info!(
            "Creating live session {} ({}; capture={}, output={}, remote={})",
            config.session_id,
            config.role,
            capture.name(),
            output.name(),
            connector.name()
        );

        Self {
            config,
            state: SessionState::Idle,
            capture,
            capture_held: false,
            output,
            output_held: false,
            connector,
            remote: None,
            inbound: Inbound::default(),
            pending: VecDeque::new(),
            playback: PlaybackQueue::new(),
            next_playback_time: 0.0,
            stats: SessionStats::default(),
            turn_text: String::new(),
            transcript: Vec::new(),
            error: None,
            status_tx: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    pub fn playback_queue(&self) -> &PlaybackQueue {
        &self.playback
    }

    /// Chunks waiting for the connection to come up
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Subscribe to status snapshots, published after every handled event
    pub fn watch_status(&mut self) -> watch::Receiver<SessionStatus> {
        match &self.status_tx {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(self.status());
                self.status_tx = Some(tx);
                rx
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.config.session_id.clone(),
            role: self.config.role.to_string(),
            state: self.state,
            stats: self.current_stats(),
            playback_queue_len: self.playback.len(),
            next_playback_time: self.next_playback_time,
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Acquire the microphone, open the output and connect to the remote
    /// session. Capture blocks arriving while the handshake is in flight are
    /// buffered up to `preconnect_buffer` and flushed once connected.
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(format!(
                "cannot start a session that is {}",
                self.state
            )));
        }

        info!("Starting live session: {}", self.config.session_id);

        let mut capture_rx = match self.capture.start().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Capture device unavailable: {}", e);
                self.fail(e.clone());
                return Err(e);
            }
        };
        self.capture_held = true;
        self.stats.started_at = Some(Utc::now());
        self.transition(SessionState::Connecting);

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.output.open(done_tx) {
            error!("Output device unavailable: {}", e);
            self.fail(e.clone());
            self.teardown();
            return Err(e);
        }
        self.output_held = true;
        self.inbound.completions = Some(done_rx);

        let live_config = self.config.live_config();
        let connector = Arc::clone(&self.connector);
        let mut connect = connector.connect(&live_config);
        let mut capture_open = true;

        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                frame = capture_rx.recv(), if capture_open => match frame {
                    Some(frame) => self.on_capture_frame(frame),
                    None => capture_open = false,
                },
            }
        };

        match result {
            Ok(connection) => {
                self.remote = Some(connection.outbound);
                self.inbound.events = Some(connection.events);
                self.inbound.capture = capture_open.then_some(capture_rx);
                self.transition(SessionState::Active);
                self.flush_pending();
                self.publish_status();
                info!("Live session {} active", self.config.session_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect live session: {}", e);
                self.fail(e.clone());
                self.teardown();
                Err(e)
            }
        }
    }

    /// Handle one captured block: encode it and send it without blocking
    pub fn on_capture_frame(&mut self, frame: AudioFrame) {
        self.stats.frames_captured += 1;

        match self.state {
            SessionState::Connecting => {
                if let Some(chunk) = self.encode(frame) {
                    self.buffer_pending(chunk);
                }
            }
            SessionState::Active => {
                if let Some(chunk) = self.encode(frame) {
                    self.send_chunk(chunk);
                }
            }
            SessionState::Idle | SessionState::Ended | SessionState::Failed => {
                self.stats.chunks_dropped += 1;
            }
        }

        self.publish_status();
    }

    /// Handle one message from the remote session
    pub fn on_remote_event(&mut self, event: RemoteEvent) {
        if self.state != SessionState::Active {
            debug!("Ignoring remote event while {}: {:?}", self.state, event);
            return;
        }

        match event {
            RemoteEvent::Audio { data, mime_type } => {
                self.stats.chunks_received += 1;
                match decode_chunk(&data, mime_type.as_deref(), self.config.output_sample_rate) {
                    Ok(buffer) => self.schedule_playback(buffer),
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        warn!("Dropping audio chunk: {}", e);
                    }
                }
            }
            RemoteEvent::Interrupted => self.interrupt(),
            RemoteEvent::Text(text) => self.turn_text.push_str(&text),
            RemoteEvent::TurnComplete => {
                self.stats.turns += 1;
                self.finish_turn();
            }
            RemoteEvent::Closed { reason } => {
                info!(
                    "Remote closed session {} ({})",
                    self.config.session_id,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.finish_turn();
                self.teardown();
                self.transition(SessionState::Ended);
            }
            RemoteEvent::Error(message) => {
                error!("Live session {} failed: {}", self.config.session_id, message);
                self.finish_turn();
                self.fail(SessionError::Connection(message));
                self.teardown();
            }
        }

        self.publish_status();
    }

    /// A buffer finished playing on its own
    pub fn on_playback_complete(&mut self, id: BufferId) {
        if self.playback.complete(id) {
            self.publish_status();
        } else {
            debug!("Ignoring completion of {} (already removed)", id);
        }
    }

    /// Tear everything down. Safe from any state and safe to repeat.
    pub fn stop(&mut self) -> SessionOutcome {
        if !self.state.is_terminal() {
            info!("Stopping live session: {}", self.config.session_id);
            self.finish_turn();
            self.teardown();
            self.transition(SessionState::Ended);
        } else {
            // Terminal already; still make sure nothing is held
            self.teardown();
        }

        self.outcome()
    }

    /// Drive the session until it ends or `shutdown` resolves, then stop it
    pub async fn run_until<F>(&mut self, shutdown: F) -> SessionOutcome
    where
        F: Future<Output = ()>,
    {
        let mut capture = self.inbound.capture.take();
        let mut events = self.inbound.events.take();
        let mut completions = self.inbound.completions.take();
        tokio::pin!(shutdown);

        while self.state == SessionState::Active {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested for session {}", self.config.session_id);
                    break;
                }
                frame = recv_or_pending(&mut capture) => match frame {
                    Some(frame) => self.on_capture_frame(frame),
                    None => {
                        info!("Capture stream ended");
                        capture = None;
                    }
                },
                event = recv_or_pending(&mut events) => match event {
                    Some(event) => self.on_remote_event(event),
                    None => {
                        events = None;
                        self.on_remote_event(RemoteEvent::Closed {
                            reason: Some("event stream ended".to_string()),
                        });
                    }
                },
                id = recv_unbounded_or_pending(&mut completions) => match id {
                    Some(id) => self.on_playback_complete(id),
                    None => completions = None,
                },
            }
        }

        self.stop()
    }

    fn encode(&mut self, frame: AudioFrame) -> Option<EncodedChunk> {
        match normalize_frame(frame, self.config.capture_sample_rate) {
            Ok(frame) => Some(encode_frame(&frame)),
            Err(e) => {
                self.stats.chunks_dropped += 1;
                warn!("Dropping capture block: {}", e);
                None
            }
        }
    }

    fn send_chunk(&mut self, chunk: EncodedChunk) {
        let Some(remote) = &self.remote else {
            self.stats.chunks_dropped += 1;
            return;
        };

        match remote.try_send(Outbound::Audio(chunk)) {
            Ok(()) => self.stats.chunks_sent += 1,
            Err(TrySendError::Full(_)) => {
                self.stats.chunks_dropped += 1;
                debug!("Transport queue full, dropping capture chunk");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.chunks_dropped += 1;
                debug!("Transport closed, dropping capture chunk");
            }
        }
    }

    fn buffer_pending(&mut self, chunk: EncodedChunk) {
        if self.config.preconnect_buffer == 0 {
            self.stats.chunks_dropped += 1;
            return;
        }
        if self.pending.len() >= self.config.preconnect_buffer {
            self.pending.pop_front();
            self.stats.chunks_dropped += 1;
        }
        self.pending.push_back(chunk);
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!("Flushing {} pre-connect chunks", self.pending.len());
        }
        while let Some(chunk) = self.pending.pop_front() {
            self.send_chunk(chunk);
        }
    }

    /// Schedule back-to-back: never before the output clock, never
    /// overlapping the previous chunk
    fn schedule_playback(&mut self, buffer: PlaybackBuffer) {
        let now = self.output.current_time();
        let start = self.next_playback_time.max(now);
        let duration = buffer.duration();
        let id = self.playback.next_id();

        if let Err(e) = self.output.schedule(id, &buffer, start) {
            warn!("Failed to schedule {}: {}", id, e);
            return;
        }

        self.playback.insert(ScheduledBuffer {
            id,
            start,
            duration,
        });
        self.next_playback_time = start + duration;
        self.stats.audio_scheduled_secs += duration;
        debug!("Scheduled {} at {:.3}s for {:.3}s", id, start, duration);
    }

    fn interrupt(&mut self) {
        let stopped = self.playback.drain();
        for buffer in &stopped {
            self.output.stop_buffer(buffer.id);
        }
        self.next_playback_time = self.output.current_time();
        self.stats.interruptions += 1;
        self.finish_turn();

        info!(
            "Interrupted: stopped {} buffers, playback resumes at {:.3}s",
            stopped.len(),
            self.next_playback_time
        );
    }

    fn finish_turn(&mut self) {
        let text = std::mem::take(&mut self.turn_text);
        let text = text.trim();
        if !text.is_empty() {
            self.transcript.push(text.to_string());
        }
    }

    /// Release every resource still held. Each step runs at most once.
    fn teardown(&mut self) {
        // (a) capture pipeline and microphone
        self.inbound.capture = None;
        if self.capture_held {
            self.capture.stop();
            self.capture_held = false;
        }
        self.pending.clear();

        // (b) in-flight playback
        for buffer in self.playback.drain() {
            if self.output_held {
                self.output.stop_buffer(buffer.id);
            }
        }

        // (c) remote session: request close, don't wait for it
        self.inbound.events = None;
        if let Some(remote) = self.remote.take() {
            if let Err(e) = remote.try_send(Outbound::Close) {
                debug!("Close request not queued ({}); dropping the sender closes the link", e);
            }
        }

        // (d) output context
        self.inbound.completions = None;
        if self.output_held {
            self.output.close();
            self.output_held = false;
        }

        if let Some(started) = self.stats.started_at {
            if self.stats.duration_secs == 0.0 {
                let elapsed = Utc::now().signed_duration_since(started);
                self.stats.duration_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            }
        }
    }

    fn fail(&mut self, error: SessionError) {
        self.error = Some(error);
        self.transition(SessionState::Failed);
        self.publish_status();
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Refusing session transition {} → {}", self.state, next);
            return;
        }
        debug!("Session {}: {} → {}", self.config.session_id, self.state, next);
        self.state = next;
        self.publish_status();
    }

    fn publish_status(&self) {
        if let Some(tx) = &self.status_tx {
            tx.send_replace(self.status());
        }
    }

    fn current_stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        if !self.state.is_terminal() {
            if let Some(started) = stats.started_at {
                let elapsed = Utc::now().signed_duration_since(started);
                stats.duration_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            }
        }
        stats
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            session_id: self.config.session_id.clone(),
            role: self.config.role.to_string(),
            state: self.state,
            stats: self.current_stats(),
            transcript: self.transcript.clone(),
            closing_remark: self.transcript.last().cloned(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() || self.capture_held || self.output_held {
            self.finish_turn();
            self.teardown();
            if !self.state.is_terminal() {
                self.state = SessionState::Ended;
            }
        }
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_unbounded_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
