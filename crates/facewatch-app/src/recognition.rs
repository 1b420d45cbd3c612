//! Live recognition: match every face in the camera feed against the
//! enrolled users.
//!
//! Mounting loads the models (once), builds an immutable [`FaceMatcher`]
//! from storage, leases the camera and starts a fixed-interval scan loop.
//! Roster changes are picked up through [`Reload`], which rebuilds the
//! matcher and restarts the loop on the same camera lease.

use crate::config::Config;
use crate::error::{RecognitionError, ReloadError};
use crate::events::Reload;
use async_trait::async_trait;
use facewatch_core::{BoundingBox, FaceApi, FaceMatcher, LabeledDescriptors};
use facewatch_hw::{CameraLease, CameraRequest, Frame, SharedCamera};
use facewatch_store::UserStore;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One labeled box drawn over the live feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub distance: f32,
}

impl FaceOverlay {
    pub fn is_unknown(&self) -> bool {
        self.label == facewatch_core::UNKNOWN_LABEL
    }
}

impl fmt::Display for FaceOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distance.is_finite() {
            write!(f, "{} ({:.2})", self.label, self.distance)
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Receives the overlays for each scanned frame.
///
/// Called once per decoded frame. An empty slice means no faces: clear
/// whatever was drawn for the previous frame.
pub trait OverlaySink: Send + Sync {
    fn render(&self, frame: &Frame, overlays: &[FaceOverlay]);
}

/// Build one labeled group per enrolled user from their stored images.
///
/// Images without a detectable face, or on which the detector fails, are
/// skipped. Users left with no descriptors are omitted.
pub async fn build_labeled_descriptors(
    api: &dyn FaceApi,
    users: &UserStore,
) -> Result<Vec<LabeledDescriptors>, RecognitionError> {
    let names = users.list_users().await?;
    let mut groups = Vec::with_capacity(names.len());
    let mut dropped = 0usize;

    for name in names {
        let mut descriptors = Vec::new();
        for stored in users.get_user_images(&name).await? {
            let image = match stored.image.decode_image() {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(user = %name, slot = stored.slot, error = %e, "undecodable image");
                    continue;
                }
            };
            match api.detect_single_face(&image).await {
                Ok(Some(detection)) => descriptors.push(detection.descriptor),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user = %name, slot = stored.slot, error = %e, "detection failed; image skipped");
                }
            }
        }

        if descriptors.is_empty() {
            tracing::debug!(user = %name, "no usable descriptors; user left out of matching");
            dropped += 1;
            continue;
        }
        groups.push(LabeledDescriptors::new(name, descriptors));
    }

    tracing::info!(users = groups.len(), dropped, "descriptor set built");
    Ok(groups)
}

/// Detect and label every face in one frame.
///
/// Returns `None` while the frame has no decoded pixels.
pub async fn scan_frame(
    api: &dyn FaceApi,
    matcher: &FaceMatcher,
    frame: &Frame,
) -> Result<Option<Vec<FaceOverlay>>, RecognitionError> {
    let Some(image) = frame.to_image() else {
        return Ok(None);
    };
    let overlays = api
        .detect_all_faces(&image)
        .await?
        .into_iter()
        .map(|detection| {
            let best = matcher.best_match(&detection.descriptor);
            FaceOverlay {
                bbox: detection.bbox,
                label: best.label,
                distance: best.distance,
            }
        })
        .collect();
    Ok(Some(overlays))
}

struct LiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<CameraLease>,
}

/// The live recognition screen.
pub struct RecognitionView {
    api: Arc<dyn FaceApi>,
    users: Arc<UserStore>,
    camera: SharedCamera,
    sink: Arc<dyn OverlaySink>,
    model_dir: PathBuf,
    request: CameraRequest,
    threshold: f32,
    interval: Duration,
    models_loaded: bool,
    matcher: Option<Arc<FaceMatcher>>,
    live: Option<LiveLoop>,
}

impl RecognitionView {
    pub fn new(
        api: Arc<dyn FaceApi>,
        users: Arc<UserStore>,
        camera: SharedCamera,
        sink: Arc<dyn OverlaySink>,
        config: &Config,
    ) -> Self {
        Self {
            api,
            users,
            camera,
            sink,
            model_dir: config.model_dir.clone(),
            request: config.camera_request(),
            threshold: config.match_threshold,
            interval: config.scan_interval(),
            models_loaded: false,
            matcher: None,
            live: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    /// The matcher of the current session, if mounted.
    pub fn matcher(&self) -> Option<&FaceMatcher> {
        self.matcher.as_deref()
    }

    /// Load models, build the matcher, lease the camera and start scanning.
    pub async fn mount(&mut self) -> Result<(), RecognitionError> {
        if self.live.is_some() {
            return Ok(());
        }
        if !self.models_loaded {
            self.api.load_models(&self.model_dir).await?;
            self.models_loaded = true;
        }

        let matcher = self.rebuild_matcher().await?;
        let lease = self.camera.acquire(&self.request).await?;
        self.start(lease, matcher);
        Ok(())
    }

    /// Stop scanning and give the camera back.
    pub async fn unmount(&mut self) {
        if let Some(lease) = self.stop().await {
            lease.release();
        }
        self.matcher = None;
    }

    async fn rebuild_matcher(&mut self) -> Result<Arc<FaceMatcher>, RecognitionError> {
        let groups = build_labeled_descriptors(self.api.as_ref(), &self.users).await?;
        let matcher = Arc::new(FaceMatcher::new(groups, self.threshold));
        self.matcher = Some(Arc::clone(&matcher));
        Ok(matcher)
    }

    fn start(&mut self, lease: CameraLease, matcher: Arc<FaceMatcher>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            lease,
            Arc::clone(&self.api),
            matcher,
            Arc::clone(&self.sink),
            self.interval,
            cancel.clone(),
        ));
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "live recognition started");
        self.live = Some(LiveLoop { cancel, handle });
    }

    /// Cancel the loop and recover its lease.
    async fn stop(&mut self) -> Option<CameraLease> {
        let live = self.live.take()?;
        live.cancel.cancel();
        match live.handle.await {
            Ok(lease) => {
                tracing::info!("live recognition stopped");
                Some(lease)
            }
            Err(e) => {
                // The lease was dropped with the task, releasing the camera.
                tracing::warn!(error = %e, "live recognition task ended abnormally");
                None
            }
        }
    }
}

#[async_trait]
impl Reload for RecognitionView {
    fn name(&self) -> &'static str {
        "recognition"
    }

    /// Rebuild the matcher; a running loop restarts with it on the same lease.
    /// An unmounted view has nothing to rebuild; the next mount reads storage.
    async fn reload(&mut self) -> Result<(), ReloadError> {
        if self.live.is_none() {
            return Ok(());
        }
        let lease = self.stop().await;
        let matcher = match self.rebuild_matcher().await {
            Ok(matcher) => matcher,
            Err(e) => {
                drop(lease);
                self.matcher = None;
                return Err(e.into());
            }
        };
        if let Some(lease) = lease {
            self.start(lease, matcher);
        }
        Ok(())
    }
}

impl Drop for RecognitionView {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
            live.handle.abort();
        }
    }
}

async fn run_loop(
    mut lease: CameraLease,
    api: Arc<dyn FaceApi>,
    matcher: Arc<FaceMatcher>,
    sink: Arc<dyn OverlaySink>,
    interval: Duration,
    cancel: CancellationToken,
) -> CameraLease {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            grabbed = lease.grab() => grabbed,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame grab failed");
                continue;
            }
        };

        match scan_frame(api.as_ref(), &matcher, &frame).await {
            Ok(Some(overlays)) => sink.render(&frame, &overlays),
            Ok(None) => {}
            Err(e) => tracing::warn!(seq = frame.sequence, error = %e, "recognition scan failed"),
        }
    }
    lease
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use facewatch_core::DataUrl;
    use facewatch_hw::MockCamera;
    use facewatch_store::MemoryStore;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<FaceOverlay>>>,
    }

    impl RecordingSink {
        fn rendered(&self) -> Vec<Vec<FaceOverlay>> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl OverlaySink for RecordingSink {
        fn render(&self, _frame: &Frame, overlays: &[FaceOverlay]) {
            self.frames.lock().unwrap().push(overlays.to_vec());
        }
    }

    async fn users_with(entries: &[(&str, [DataUrl; 3])]) -> Arc<UserStore> {
        let users = Arc::new(UserStore::new(Arc::new(MemoryStore::new())));
        for (name, images) in entries {
            users.save_user(name, images).await.unwrap();
        }
        users
    }

    fn alice_images() -> [DataUrl; 3] {
        [face_url(RED), face_url([250, 0, 0]), face_url([245, 5, 0])]
    }

    fn test_config() -> Config {
        Config {
            scan_interval_ms: 1,
            ..Config::default()
        }
    }

    async fn wait_for_render(sink: &RecordingSink) -> Vec<FaceOverlay> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(first) = sink.rendered().into_iter().next() {
                    return first;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_user_without_faces_is_left_out() {
        let users = users_with(&[
            ("Alice", alice_images()),
            ("Ghost", [blank_url(), blank_url(), blank_url()]),
        ])
        .await;
        let api = PixelFaceApi::default();

        let groups = build_labeled_descriptors(&api, &users).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label(), "Alice");
        assert_eq!(groups[0].descriptors().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_faces_keep_successful_descriptors() {
        let users = users_with(&[("Alice", [face_url(RED), blank_url(), face_url(RED)])]).await;
        let groups = build_labeled_descriptors(&PixelFaceApi::default(), &users)
            .await
            .unwrap();
        assert_eq!(groups[0].descriptors().len(), 2);
    }

    #[tokio::test]
    async fn test_detector_error_skips_only_that_image() {
        let users = users_with(&[
            ("Alice", [face_url(RED), face_url(FAILING_FACE), face_url(RED)]),
            ("Bob", [face_url(FAILING_FACE), face_url(FAILING_FACE), face_url(FAILING_FACE)]),
        ])
        .await;

        let groups = build_labeled_descriptors(&PixelFaceApi::default(), &users)
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label(), "Alice");
        assert_eq!(groups[0].descriptors().len(), 2);
    }

    #[tokio::test]
    async fn test_two_faces_alice_and_unknown() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let api = PixelFaceApi::default();
        let groups = build_labeled_descriptors(&api, &users).await.unwrap();
        let matcher = FaceMatcher::new(groups, 0.6);

        let frame = Frame::from_image(faces_image(&[RED, GREEN]), 0);
        let overlays = scan_frame(&api, &matcher, &frame).await.unwrap().unwrap();

        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[0].label, "Alice");
        assert!(overlays[0].to_string().starts_with("Alice ("));
        assert!(overlays[1].is_unknown());
        assert_eq!(overlays[1].bbox.x, 10.0);
    }

    #[tokio::test]
    async fn test_zero_faces_and_undecoded_frames() {
        let api = PixelFaceApi::default();
        let matcher = FaceMatcher::new(Vec::new(), 0.6);

        let blank = Frame::from_image(blank_image(), 0);
        assert_eq!(scan_frame(&api, &matcher, &blank).await.unwrap(), Some(Vec::new()));

        let empty = Frame::from_image(image::RgbImage::new(0, 0), 1);
        assert_eq!(scan_frame(&api, &matcher, &empty).await.unwrap(), None);
        assert_eq!(api.detections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_matcher_shared_across_concurrent_scans() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let api = Arc::new(PixelFaceApi::default());
        let groups = build_labeled_descriptors(api.as_ref(), &users).await.unwrap();
        let matcher = Arc::new(FaceMatcher::new(groups, 0.6));

        let scans = (0..8).map(|_| {
            let api = Arc::clone(&api);
            let matcher = Arc::clone(&matcher);
            tokio::spawn(async move {
                let frame = Frame::from_image(faces_image(&[RED]), 0);
                scan_frame(api.as_ref(), &matcher, &frame).await.unwrap().unwrap()
            })
        });
        for result in futures::future::join_all(scans).await {
            assert_eq!(result.unwrap()[0].label, "Alice");
        }
    }

    #[tokio::test]
    async fn test_mount_renders_and_unmount_releases_camera() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let api = Arc::new(PixelFaceApi::default());
        let mock = MockCamera::new(vec![faces_image(&[RED, GREEN])]);
        let camera = SharedCamera::new(Arc::new(mock.clone()));
        let sink = Arc::new(RecordingSink::default());

        let mut view =
            RecognitionView::new(api.clone(), users, camera.clone(), sink.clone(), &test_config());
        view.mount().await.unwrap();
        assert!(view.is_running());
        assert!(camera.is_held());
        assert_eq!(view.matcher().unwrap().labels().collect::<Vec<_>>(), vec!["Alice"]);

        let overlays = wait_for_render(&sink).await;
        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[0].label, "Alice");
        assert!(overlays[1].is_unknown());

        view.unmount().await;
        assert!(!view.is_running());
        assert!(!camera.is_held());
        assert_eq!(mock.active_streams(), 0);

        // Models load once per view.
        view.mount().await.unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_faces_leaving_frame_clear_overlays() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![
            faces_image(&[RED, GREEN]),
            blank_image(),
        ])));
        let sink = Arc::new(RecordingSink::default());

        let mut view = RecognitionView::new(
            Arc::new(PixelFaceApi::default()),
            users,
            camera,
            sink.clone(),
            &test_config(),
        );
        view.mount().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !sink.rendered().iter().any(Vec::is_empty) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        view.unmount().await;

        let counts: Vec<usize> = sink.rendered().iter().map(Vec::len).collect();
        assert_eq!(counts[0], 2);
        assert!(counts[1..].iter().all(|&n| n == 0));
    }

    #[tokio::test]
    async fn test_empty_roster_labels_everyone_unknown() {
        let users = users_with(&[]).await;
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![faces_image(&[RED])])));
        let sink = Arc::new(RecordingSink::default());

        let mut view = RecognitionView::new(
            Arc::new(PixelFaceApi::default()),
            users,
            camera,
            sink.clone(),
            &test_config(),
        );
        view.mount().await.unwrap();
        let overlays = wait_for_render(&sink).await;
        assert!(overlays[0].is_unknown());
        assert_eq!(overlays[0].to_string(), "unknown");
    }

    #[tokio::test]
    async fn test_mount_fails_when_camera_busy() {
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![blank_image()])));
        let _held = camera.acquire(&CameraRequest::default()).await.unwrap();

        let mut view = RecognitionView::new(
            Arc::new(PixelFaceApi::default()),
            users_with(&[]).await,
            camera,
            Arc::new(RecordingSink::default()),
            &test_config(),
        );
        let err = view.mount().await.unwrap_err();
        assert!(matches!(err, RecognitionError::Camera(_)));
        assert!(!view.is_running());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_user() {
        let users = users_with(&[]).await;
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![faces_image(&[RED])])));
        let mut view = RecognitionView::new(
            Arc::new(PixelFaceApi::default()),
            users.clone(),
            camera.clone(),
            Arc::new(RecordingSink::default()),
            &test_config(),
        );
        view.mount().await.unwrap();
        assert!(view.matcher().unwrap().is_empty());

        users.save_user("Alice", &alice_images()).await.unwrap();
        view.reload().await.unwrap();

        assert!(view.is_running());
        assert!(camera.is_held());
        assert_eq!(view.matcher().unwrap().labels().collect::<Vec<_>>(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_reload_unmounted_view_is_noop() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let api = Arc::new(PixelFaceApi::default());
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![blank_image()])));
        let mut view = RecognitionView::new(
            api.clone(),
            users,
            camera.clone(),
            Arc::new(RecordingSink::default()),
            &test_config(),
        );

        view.reload().await.unwrap();
        assert_eq!(api.detections.load(Ordering::SeqCst), 0);
        assert!(view.matcher().is_none());

        view.mount().await.unwrap();
        view.unmount().await;
        let after_unmount = api.detections.load(Ordering::SeqCst);
        view.reload().await.unwrap();
        assert_eq!(api.detections.load(Ordering::SeqCst), after_unmount);
        assert!(!view.is_running());
        assert!(!camera.is_held());
    }

    #[tokio::test]
    async fn test_reload_before_models_load() {
        let users = users_with(&[("Alice", alice_images())]).await;
        let mut view = RecognitionView::new(
            Arc::new(facewatch_core::OnnxFaceApi::new()),
            users,
            SharedCamera::new(Arc::new(MockCamera::default())),
            Arc::new(RecordingSink::default()),
            &test_config(),
        );
        assert!(view.reload().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_view_frees_camera() {
        let camera = SharedCamera::new(Arc::new(MockCamera::new(vec![blank_image()])));
        let mut view = RecognitionView::new(
            Arc::new(PixelFaceApi::default()),
            users_with(&[]).await,
            camera.clone(),
            Arc::new(RecordingSink::default()),
            &test_config(),
        );
        view.mount().await.unwrap();
        drop(view);

        tokio::time::timeout(Duration::from_secs(5), async {
            while camera.is_held() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_overlay_display() {
        let overlay = FaceOverlay {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
            label: "Alice".into(),
            distance: 0.2614,
        };
        assert_eq!(overlay.to_string(), "Alice (0.26)");
    }
}
