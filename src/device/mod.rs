//! Embedded side: microphone capture, sample ring and paced notifications.
//!
//! The capture producer runs on its own thread and the paced transmitter on
//! a tokio timer. They share only the [`SampleRing`].

pub mod capture;
pub mod driver;
pub mod ring_buffer;
pub mod session;
pub mod streamer;
pub mod transmitter;
pub mod transport;
pub mod wav_driver;

pub use capture::CaptureProducer;
pub use driver::{MicrophoneDriver, MockMicrophone, ToneMicrophone};
pub use ring_buffer::SampleRing;
pub use session::{Session, SessionState};
pub use streamer::DeviceStreamer;
pub use transmitter::{PacedTransmitter, TickOutcome};
pub use transport::{ChannelTransport, MockTransport, NotificationTransport};
pub use wav_driver::WavMicrophone;
