//! Audio Engine Module
//!
//! Live side of the system:
//! - Audio buffers and decoding
//! - Output device abstraction and a software renderer
//! - Transport state machine and voice scheduling
//! - The [`Engine`] facade tying them to the layer store

pub mod automation;
pub mod buffer;
pub mod device;
pub mod io;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use automation::{AutomationEvent, GainParam};
pub use buffer::{AudioBuffer, ChannelLayout, DecodedAudio, DEFAULT_SAMPLE_RATE, MIN_DURATION_SECS};
pub use device::{AudioOutputDevice, DeviceError, NodeId, SoftwareDevice, SourceSchedule, DESTINATION};
pub use io::{
    checksum, checksum_file, decode_source, decode_wav_bytes, decode_wav_file,
    generate_stereo_test_tone, generate_test_tone, resolve_uri, source_ref_for_file,
};
pub use scheduler::{PlaybackReport, PlaybackScheduler, Voice, VoiceState};
pub use session::{Engine, LoadReport};
pub use transport::{Transport, TransportState};
