// Test doubles for the session's collaborators
//
// Each fake shares a probe with the test so calls can be counted and
// driven from outside after the fake has been boxed into a session.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use interview_coach::audio::{
    AudioFrame, AudioOutput, BufferId, CaptureDevice, PlaybackBuffer,
};
use interview_coach::live::{LiveConfig, LiveConnection, LiveConnector, Outbound, RemoteEvent};
use interview_coach::{SessionError, SessionResult};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Capture
// ============================================================================

#[derive(Default)]
pub struct CaptureProbe {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub sender: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl CaptureProbe {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Sender feeding the running capture stream
    pub fn sender(&self) -> mpsc::Sender<AudioFrame> {
        self.sender
            .lock()
            .unwrap()
            .clone()
            .expect("capture has not been started")
    }
}

pub struct FakeCapture {
    probe: Arc<CaptureProbe>,
    deny: bool,
}

impl FakeCapture {
    pub fn new() -> (Self, Arc<CaptureProbe>) {
        let probe = Arc::new(CaptureProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
                deny: false,
            },
            probe,
        )
    }

    /// A microphone the user refused access to
    pub fn denied() -> (Self, Arc<CaptureProbe>) {
        let (mut capture, probe) = Self::new();
        capture.deny = true;
        (capture, probe)
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FakeCapture {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(SessionError::Device("permission denied".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.probe.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.sender.lock().unwrap().take();
    }

    fn is_capturing(&self) -> bool {
        self.probe.sender.lock().unwrap().is_some()
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct OutputProbe {
    pub clock: Mutex<f64>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub scheduled: Mutex<Vec<Scheduled>>,
    pub stopped: Mutex<Vec<BufferId>>,
    pub completions: Mutex<Option<mpsc::UnboundedSender<BufferId>>>,
}

impl OutputProbe {
    pub fn set_time(&self, secs: f64) {
        *self.clock.lock().unwrap() = secs;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.stopped.lock().unwrap().clone()
    }

    /// Report a buffer as finished, as the device would
    pub fn finish(&self, id: BufferId) {
        if let Some(tx) = self.completions.lock().unwrap().as_ref() {
            let _ = tx.send(id);
        }
    }
}

pub struct FakeOutput {
    probe: Arc<OutputProbe>,
    open: bool,
}

impl FakeOutput {
    pub fn new() -> (Self, Arc<OutputProbe>) {
        let probe = Arc::new(OutputProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
                open: false,
            },
            probe,
        )
    }
}

impl AudioOutput for FakeOutput {
    fn open(&mut self, completions: mpsc::UnboundedSender<BufferId>) -> SessionResult<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        *self.probe.completions.lock().unwrap() = Some(completions);
        self.open = true;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        *self.probe.clock.lock().unwrap()
    }

    fn schedule(
        &mut self,
        id: BufferId,
        buffer: &PlaybackBuffer,
        start_at: f64,
    ) -> SessionResult<()> {
        self.probe.scheduled.lock().unwrap().push(Scheduled {
            id,
            start: start_at,
            duration: buffer.duration(),
        });
        Ok(())
    }

    fn stop_buffer(&mut self, id: BufferId) {
        self.probe.stopped.lock().unwrap().push(id);
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.completions.lock().unwrap().take();
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Remote session
// ============================================================================

/// The test's end of an in-memory remote session
pub struct RemoteHandle {
    pub outbound: mpsc::Receiver<Outbound>,
    pub events: mpsc::Sender<RemoteEvent>,
}

pub struct ChannelConnector {
    calls: AtomicUsize,
    connection: Mutex<Option<LiveConnection>>,
    failure: Option<SessionError>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    last_config: Mutex<Option<LiveConfig>>,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, RemoteHandle) {
        let (out_tx, out_rx) = mpsc::channel(32);
        let (ev_tx, ev_rx) = mpsc::channel(64);
        let connector = Self {
            calls: AtomicUsize::new(0),
            connection: Mutex::new(Some(LiveConnection::new(out_tx, ev_rx))),
            failure: None,
            gate: Mutex::new(None),
            last_config: Mutex::new(None),
        };
        (
            Arc::new(connector),
            RemoteHandle {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }

    /// A connector whose handshake always fails
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            connection: Mutex::new(None),
            failure: Some(SessionError::Connection(message.to_string())),
            gate: Mutex::new(None),
            last_config: Mutex::new(None),
        })
    }

    /// A connector whose handshake completes only once the returned sender fires
    pub fn gated() -> (Arc<Self>, RemoteHandle, oneshot::Sender<()>) {
        let (connector, handle) = Self::new();
        let (gate_tx, gate_rx) = oneshot::channel();
        *connector.gate.lock().unwrap() = Some(gate_rx);
        (connector, handle, gate_tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<LiveConfig> {
        self.last_config.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LiveConnector for ChannelConnector {
    async fn connect(&self, config: &LiveConfig) -> SessionResult<LiveConnection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        self.connection
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SessionError::Connection("already connected".to_string()))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

// ============================================================================
// Audio helpers
// ============================================================================

/// A model audio chunk of `secs` seconds at `rate`
pub fn model_audio(secs: f64, rate: u32) -> RemoteEvent {
    let frames = (secs * rate as f64).round() as usize;
    let bytes: Vec<u8> = (0..frames)
        .flat_map(|i| (((i % 100) as i16) * 100).to_le_bytes())
        .collect();
    RemoteEvent::Audio {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type: Some(format!("audio/pcm;rate={}", rate)),
    }
}

/// A 16kHz mono capture block filled with `value`
pub fn capture_block(value: i16, samples: usize) -> AudioFrame {
    AudioFrame {
        samples: vec![value; samples],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}
