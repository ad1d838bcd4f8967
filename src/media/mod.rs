pub mod capture;
pub mod controller;

pub use capture::{CaptureDevice, CapturedTracks, MediaConstraints, MediaError, SyntheticCapture};
pub use controller::{LocalMediaSession, MediaKind, MediaSessionController, TrackSink};
