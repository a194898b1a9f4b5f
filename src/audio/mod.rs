pub mod backend;
pub mod codec;
pub mod file;
pub mod output;
pub mod playback;
pub mod render;
pub mod resample;

#[cfg(feature = "device-io")]
pub mod device;

pub use backend::{
    AudioFrame, CaptureConfig, CaptureDevice, CaptureDeviceFactory, CaptureSource,
    CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use codec::{decode_chunk, encode_frame, normalize_frame, EncodedChunk, PlaybackBuffer};
pub use file::{AudioFile, FileCapture};
pub use output::{AudioOutput, ClockedOutput, Mixer};
pub use playback::{BufferId, PlaybackQueue, ScheduledBuffer};
pub use render::WavRenderer;
pub use resample::{resample_mono, BlockResampler, MonoResampler};

#[cfg(feature = "device-io")]
pub use device::{MicrophoneCapture, SpeakerOutput};
