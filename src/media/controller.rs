use crate::error::Result;
use crate::media::capture::{CaptureDevice, CapturedTracks, MediaConstraints, MediaError};
use crate::utils::random_id;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Something local tracks can be attached to (the transport session)
#[async_trait]
pub trait TrackSink: Send + Sync {
    async fn attach_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>>;
    async fn detach_track(&self, sender: &Arc<RTCRtpSender>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One live capture: audio/video tracks, their senders once attached, mute flags
pub struct LocalMediaSession {
    id: String,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    senders: Vec<Arc<RTCRtpSender>>,
    audio_muted: bool,
    video_muted: bool,
}

impl LocalMediaSession {
    pub fn new(tracks: CapturedTracks) -> Self {
        Self {
            id: random_id(),
            audio: tracks.audio,
            video: tracks.video,
            senders: Vec::new(),
            audio_muted: false,
            video_muted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn is_attached(&self) -> bool {
        !self.senders.is_empty()
    }

    pub fn audio_muted(&self) -> bool {
        self.audio_muted
    }

    pub fn video_muted(&self) -> bool {
        self.video_muted
    }

    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = &self.audio {
            tracks.push(audio.clone());
        }
        if let Some(video) = &self.video {
            tracks.push(video.clone());
        }
        tracks
    }

    /// Feeds one sample; returns false when the kind is muted or absent
    pub async fn write_sample(&self, kind: MediaKind, sample: &Sample) -> Result<bool> {
        let (track, muted) = match kind {
            MediaKind::Audio => (&self.audio, self.audio_muted),
            MediaKind::Video => (&self.video, self.video_muted),
        };
        match track {
            Some(track) if !muted => {
                track.write_sample(sample).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl std::fmt::Debug for LocalMediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaSession")
            .field("id", &self.id)
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .field("senders", &self.senders.len())
            .field("audio_muted", &self.audio_muted)
            .field("video_muted", &self.video_muted)
            .finish()
    }
}

/// Owns at most one [`LocalMediaSession`] at a time
pub struct MediaSessionController {
    device: Arc<dyn CaptureDevice>,
    constraints: MediaConstraints,
    current: Option<LocalMediaSession>,
}

impl MediaSessionController {
    pub fn new(device: Arc<dyn CaptureDevice>, constraints: MediaConstraints) -> Self {
        Self {
            device,
            constraints,
            current: None,
        }
    }

    /// Applies to the next acquisition
    pub fn set_constraints(&mut self, constraints: MediaConstraints) {
        self.constraints = constraints;
    }

    pub fn current(&self) -> Option<&LocalMediaSession> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Detached capture future, so a caller can run it off the session task
    pub fn acquisition(
        &self,
    ) -> impl Future<Output = std::result::Result<LocalMediaSession, MediaError>> + Send + 'static
    {
        let device = self.device.clone();
        let constraints = self.constraints;
        async move {
            let tracks = device.open(&constraints).await?;
            Ok(LocalMediaSession::new(tracks))
        }
    }

    /// Keeps `session` unless one is already held; returns whether it was kept
    pub fn install(&mut self, session: LocalMediaSession) -> bool {
        if let Some(current) = &self.current {
            debug!(current = %current.id, dropped = %session.id, "Capture already held");
            return false;
        }
        info!(id = %session.id, audio = session.has_audio(), video = session.has_video(), "Local media acquired");
        self.current = Some(session);
        true
    }

    /// Acquire capture, reusing a held session
    pub async fn acquire(&mut self) -> std::result::Result<&LocalMediaSession, MediaError> {
        if self.current.is_none() {
            match self.acquisition().await {
                Ok(session) => {
                    self.install(session);
                }
                Err(e) => {
                    warn!(operation = "acquire", "Capture failed: {e}");
                    return Err(e);
                }
            }
        }
        self.current.as_ref().ok_or(MediaError::DeviceNotFound)
    }

    /// Adds every held track to the transport; no-op when already attached
    pub async fn attach(&mut self, sink: &dyn TrackSink) -> Result<()> {
        let Some(session) = self.current.as_mut() else {
            return Ok(());
        };
        if session.is_attached() {
            return Ok(());
        }
        for track in session.tracks() {
            let sender = sink.attach_track(track).await?;
            session.senders.push(sender);
        }
        info!(id = %session.id, tracks = session.senders.len(), "Local media attached");
        Ok(())
    }

    /// Detaches and drops the held session; false when nothing was held.
    ///
    /// Senders stay with the transport, emptied, so the next call can reuse them.
    pub async fn release(&mut self, sink: Option<&dyn TrackSink>) -> bool {
        let Some(session) = self.current.take() else {
            return false;
        };
        if let Some(sink) = sink {
            for sender in &session.senders {
                if let Err(e) = sink.detach_track(sender).await {
                    warn!(operation = "release", "Failed to detach track: {e}");
                }
            }
        }
        info!(id = %session.id, "Local media released");
        true
    }

    /// `None` when there is no capture
    pub fn toggle_audio_mute(&mut self) -> Option<bool> {
        let session = self.current.as_mut()?;
        session.audio_muted = !session.audio_muted;
        Some(session.audio_muted)
    }

    pub fn toggle_video_mute(&mut self) -> Option<bool> {
        let session = self.current.as_mut()?;
        session.video_muted = !session.video_muted;
        Some(session.video_muted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::capture::SyntheticCapture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingCapture(MediaError);

    #[async_trait]
    impl CaptureDevice for FailingCapture {
        async fn open(&self, _: &MediaConstraints) -> std::result::Result<CapturedTracks, MediaError> {
            Err(self.0.clone())
        }
    }

    struct CountingCapture(AtomicUsize);

    #[async_trait]
    impl CaptureDevice for CountingCapture {
        async fn open(&self, c: &MediaConstraints) -> std::result::Result<CapturedTracks, MediaError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            SyntheticCapture::default().open(c).await
        }
    }

    struct RecordingSink {
        pc: webrtc::peer_connection::RTCPeerConnection,
        attached: AtomicUsize,
        detached: AtomicUsize,
    }

    impl RecordingSink {
        async fn new() -> Self {
            let mut engine = webrtc::api::media_engine::MediaEngine::default();
            engine.register_default_codecs().unwrap();
            let api = webrtc::api::APIBuilder::new()
                .with_media_engine(engine)
                .build();
            let pc = api
                .new_peer_connection(Default::default())
                .await
                .unwrap();
            Self {
                pc,
                attached: AtomicUsize::new(0),
                detached: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TrackSink for RecordingSink {
        async fn attach_track(
            &self,
            track: Arc<dyn TrackLocal + Send + Sync>,
        ) -> Result<Arc<RTCRtpSender>> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(self.pc.add_track(track).await?)
        }

        async fn detach_track(&self, sender: &Arc<RTCRtpSender>) -> Result<()> {
            self.detached.fetch_add(1, Ordering::SeqCst);
            Ok(sender.replace_track(None).await?)
        }
    }

    fn controller(device: impl CaptureDevice + 'static) -> MediaSessionController {
        MediaSessionController::new(Arc::new(device), MediaConstraints::default())
    }

    #[tokio::test]
    async fn test_acquire_reuses_held_session() {
        let device = Arc::new(CountingCapture(AtomicUsize::new(0)));
        let mut media = MediaSessionController::new(device.clone(), MediaConstraints::default());
        let first = media.acquire().await.unwrap().id().to_string();
        let second = media.acquire().await.unwrap().id().to_string();
        assert_eq!(first, second);
        assert_eq!(device.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure_leaves_no_session() {
        let mut media = controller(FailingCapture(MediaError::DeviceBusy));
        assert_eq!(media.acquire().await.unwrap_err(), MediaError::DeviceBusy);
        assert!(!media.is_active());
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let mut media = controller(SyntheticCapture::default());
        media.acquire().await.unwrap();
        assert!(media.release(None).await);
        assert!(!media.release(None).await);
        assert!(!media.is_active());
    }

    #[tokio::test]
    async fn test_mute_toggles_need_capture() {
        let mut media = controller(SyntheticCapture::default());
        assert_eq!(media.toggle_audio_mute(), None);
        assert_eq!(media.toggle_video_mute(), None);

        media.acquire().await.unwrap();
        assert_eq!(media.toggle_audio_mute(), Some(true));
        assert_eq!(media.toggle_audio_mute(), Some(false));
        assert_eq!(media.toggle_video_mute(), Some(true));

        // flags live and die with the capture
        media.release(None).await;
        media.acquire().await.unwrap();
        let session = media.current().unwrap();
        assert!(!session.audio_muted());
        assert!(!session.video_muted());
    }

    #[tokio::test]
    async fn test_muted_kind_drops_samples() {
        let mut media = controller(SyntheticCapture::default());
        media.acquire().await.unwrap();
        media.toggle_audio_mute();
        let sample = Sample::default();
        let written = media
            .current()
            .unwrap()
            .write_sample(MediaKind::Audio, &sample)
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn test_install_keeps_first_session() {
        let mut media = controller(SyntheticCapture::default());
        let a = media.acquisition().await.unwrap();
        let b = media.acquisition().await.unwrap();
        let a_id = a.id().to_string();
        assert!(media.install(a));
        assert!(!media.install(b));
        assert_eq!(media.current().unwrap().id(), a_id);
    }

    #[tokio::test]
    async fn test_release_detaches_each_sender_once() {
        let sink = RecordingSink::new().await;
        let mut media = controller(SyntheticCapture::default());
        media.acquire().await.unwrap();
        media.attach(&sink).await.unwrap();
        media.attach(&sink).await.unwrap();
        assert_eq!(sink.attached.load(Ordering::SeqCst), 2);
        assert!(media.current().unwrap().is_attached());

        assert!(media.release(Some(&sink as &dyn TrackSink)).await);
        assert!(!media.release(Some(&sink as &dyn TrackSink)).await);
        assert_eq!(sink.detached.load(Ordering::SeqCst), 2);

        // the peer connection stays usable for the next capture
        media.acquire().await.unwrap();
        media.attach(&sink).await.unwrap();
        assert_eq!(sink.attached.load(Ordering::SeqCst), 4);
        sink.pc.close().await.unwrap();
    }
}
