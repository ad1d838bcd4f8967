//! Capture device collaborator and failure classification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Why capture could not start
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Capture permission denied")]
    PermissionDenied,
    #[error("Capture device not found")]
    DeviceNotFound,
    #[error("Capture device busy")]
    DeviceBusy,
    #[error("Capture failed: {0}")]
    Other(String),
}

impl MediaError {
    /// Maps a platform error name or message to a typed reason
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["notallowed", "permission", "denied", "securityerror"]) {
            MediaError::PermissionDenied
        } else if has(&["notfound", "not found", "no device", "overconstrained", "enodev"]) {
            MediaError::DeviceNotFound
        } else if has(&["notreadable", "trackstart", "busy", "in use", "ebusy"]) {
            MediaError::DeviceBusy
        } else {
            MediaError::Other(raw.to_string())
        }
    }

    /// Text suitable for showing to the operator
    pub fn user_message(&self) -> &str {
        match self {
            MediaError::PermissionDenied => {
                "Camera/microphone access was denied. Allow access and try again."
            }
            MediaError::DeviceNotFound => "No camera or microphone was found.",
            MediaError::DeviceBusy => "Camera or microphone is in use by another application.",
            MediaError::Other(_) => "Could not start camera/microphone.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Tracks produced by one successful capture
#[derive(Clone, Default)]
pub struct CapturedTracks {
    pub audio: Option<Arc<TrackLocalStaticSample>>,
    pub video: Option<Arc<TrackLocalStaticSample>>,
}

/// Local audio/video source
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<CapturedTracks, MediaError>;
}

/// Device-less capture: Opus + VP8 sample tracks fed by the application
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    stream_id: String,
}

impl SyntheticCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new("ssc-local")
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn open(&self, constraints: &MediaConstraints) -> Result<CapturedTracks, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::DeviceNotFound);
        }

        let audio = constraints.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                "audio".to_owned(),
                self.stream_id.clone(),
            ))
        });
        let video = constraints.video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                "video".to_owned(),
                self.stream_id.clone(),
            ))
        });

        Ok(CapturedTracks { audio, video })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_platform_errors() {
        assert_eq!(
            MediaError::classify("NotAllowedError: Permission denied"),
            MediaError::PermissionDenied
        );
        assert_eq!(
            MediaError::classify("NotFoundError: Requested device not found"),
            MediaError::DeviceNotFound
        );
        assert_eq!(
            MediaError::classify("NotReadableError: Could not start video source"),
            MediaError::DeviceBusy
        );
        assert_eq!(
            MediaError::classify("something odd"),
            MediaError::Other("something odd".into())
        );
    }

    #[tokio::test]
    async fn test_synthetic_capture_honors_constraints() {
        let capture = SyntheticCapture::default();
        let tracks = capture
            .open(&MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert!(tracks.audio.is_some());
        assert!(tracks.video.is_none());

        let err = capture
            .open(&MediaConstraints {
                audio: false,
                video: false,
            })
            .await
            .err();
        assert_eq!(err, Some(MediaError::DeviceNotFound));
    }
}
