pub mod audio;
pub mod config;
pub mod error;
pub mod factory;
pub mod http;
pub mod live;
pub mod nats;
pub mod session;

pub use audio::{
    AudioFile, AudioFrame, AudioOutput, CaptureConfig, CaptureDevice, CaptureDeviceFactory,
    CaptureSource, ClockedOutput, FileCapture, PlaybackBuffer,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use factory::SessionFactory;
pub use http::{create_router, AppState};
pub use live::{GeminiLiveConnector, LiveConfig, LiveConnection, LiveConnector, RemoteEvent};
pub use nats::NatsRelayConnector;
pub use session::{JobRole, LiveSession, SessionConfig, SessionOutcome, SessionState, SessionStats};
