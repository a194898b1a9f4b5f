pub mod client;
pub mod messages;

pub use client::NatsRelayConnector;
pub use messages::{AudioFrameMessage, RelayEvent, RelaySetup, RelaySetupReply, RelaySubjects};
