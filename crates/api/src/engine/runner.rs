//! The background job runner.
//!
//! A single long-lived Tokio task owns the job pipeline: model loading,
//! frame iteration, inference, and result persistence. Admission goes
//! through [`JobHandle::submit`], which reserves the one job slot before
//! handing the request to the worker over a single-slot channel, so a
//! second upload while a job is active is rejected instead of queued.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use mhr_core::error::CoreError;
use mhr_core::job::JobStatus;
use mhr_core::media::{file_stem, MediaKind};
use mhr_core::mhr::{PersonRecord, ProcessedFrame, ResultDocument, VideoManifest};
use mhr_core::progress::{EtaTracker, PERCENT_IMAGE_DECODED, PERCENT_IMAGE_INFERRED};
use mhr_pipeline::frames::{self, FrameStream, MediaError, VideoSource};
use mhr_pipeline::model::{
    InferenceError, InferenceOptions, ModelLoadError, ModelRegistry, ReconstructionModel,
};
use mhr_pipeline::store::{ResultStore, StoreError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

use super::state::JobState;

/// Status message published while the job slot waits for the model.
const LOADING_MESSAGE: &str = "Loading model...";

/// One accepted upload, ready for the worker.
#[derive(Debug)]
pub struct JobRequest {
    /// Where the raw upload was staged on disk.
    pub upload_path: PathBuf,
    /// Sanitized original filename (names the result document/directory).
    pub file_name: String,
    pub kind: MediaKind,
    pub frame_skip: u32,
}

/// Anything that terminates a job as failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to load model: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("unreadable media: {0}")]
    Media(#[from] MediaError),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("no person detected in the image")]
    NoPersonDetected,

    #[error("no frames produced any reconstruction")]
    NoFramesProcessed,

    #[error("failed to persist results: {0}")]
    Store(#[from] StoreError),
}

/// Submission/status surface handed to request handlers.
pub struct JobHandle {
    state: Arc<JobState>,
    tx: mpsc::Sender<JobRequest>,
}

impl JobHandle {
    /// Read-only snapshot of the in-flight job.
    pub fn status(&self) -> JobStatus {
        self.state.snapshot()
    }

    /// Single-flight admission: reserve the slot, then hand the request to
    /// the worker. Fails with `Conflict` while a job is loading or running.
    pub fn submit(&self, request: JobRequest) -> Result<(), CoreError> {
        self.state.begin(LOADING_MESSAGE)?;
        if self.tx.try_send(request).is_err() {
            // The slot was just reserved, so the channel can only be
            // unavailable if the worker itself is gone.
            self.state.fail("job worker is not running".to_string());
            return Err(CoreError::Internal("job worker is not running".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
impl JobHandle {
    /// Handle over a bare state with no worker behind it; read-side tests
    /// drive the state transitions directly.
    pub(crate) fn detached(state: Arc<JobState>) -> Arc<Self> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(Self { state, tx })
    }
}

/// Start the worker loop and return its handle.
pub fn spawn(
    config: Arc<ServerConfig>,
    store: Arc<ResultStore>,
    registry: ModelRegistry,
    cancel: CancellationToken,
) -> (Arc<JobHandle>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let state = Arc::new(JobState::new());
    let handle = Arc::new(JobHandle {
        state: Arc::clone(&state),
        tx,
    });
    let worker = tokio::spawn(worker_loop(state, config, store, registry, cancel, rx));
    (handle, worker)
}

/// The worker loop: one job at a time, all [`JobState`] mutations happen
/// here or in functions it calls.
async fn worker_loop(
    state: Arc<JobState>,
    config: Arc<ServerConfig>,
    store: Arc<ResultStore>,
    registry: ModelRegistry,
    cancel: CancellationToken,
    mut rx: mpsc::Receiver<JobRequest>,
) {
    // Estimator singleton: loaded lazily on first use, cached for every
    // later job. A failed load is never cached.
    let mut model_slot: Option<Arc<dyn ReconstructionModel>> = None;
    tracing::info!("Job worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job worker shutting down");
                break;
            }
            request = rx.recv() => {
                let Some(request) = request else { break };
                tracing::info!(
                    file = %request.file_name,
                    kind = ?request.kind,
                    frame_skip = request.frame_skip,
                    "Job started",
                );

                // Guaranteed cleanup: whatever happens inside the job,
                // including a panic, the slot is released right here.
                let outcome = AssertUnwindSafe(run_job(
                    &state, &config, &store, &registry, &mut model_slot, &request,
                ))
                .catch_unwind()
                .await;

                match outcome {
                    Ok(Ok(result_path)) => {
                        tracing::info!(result = %result_path.display(), "Job completed");
                        state.complete(&result_path);
                    }
                    Ok(Err(err)) => {
                        tracing::error!(error = %err, "Job failed");
                        state.fail(err.to_string());
                    }
                    Err(_) => {
                        tracing::error!("Job panicked");
                        state.fail("internal error while processing".to_string());
                    }
                }
            }
        }
    }
}

/// Drive one job from model load to persisted result.
async fn run_job(
    state: &JobState,
    config: &ServerConfig,
    store: &ResultStore,
    registry: &ModelRegistry,
    model_slot: &mut Option<Arc<dyn ReconstructionModel>>,
    request: &JobRequest,
) -> Result<PathBuf, JobError> {
    let model = match model_slot {
        Some(model) => Arc::clone(model),
        None => {
            state.set_message("Loading reconstruction model...");
            let model = registry.build(&config.model_config())?;
            *model_slot = Some(Arc::clone(&model));
            model
        }
    };
    state.mark_model_ready();

    let opts = config.inference_options();
    match request.kind {
        MediaKind::Image => run_image(state, store, &model, &opts, request).await,
        MediaKind::Video => {
            state.set_message("Analyzing video...");
            let mut source = VideoSource::open(&request.upload_path, request.frame_skip).await?;
            sweep_video(
                state,
                store,
                &model,
                &opts,
                file_stem(&request.file_name),
                &request.upload_path.display().to_string(),
                &mut source,
            )
            .await
        }
    }
}

/// Image mode: one frame, empty detection is a terminal failure.
async fn run_image(
    state: &JobState,
    store: &ResultStore,
    model: &Arc<dyn ReconstructionModel>,
    opts: &InferenceOptions,
    request: &JobRequest,
) -> Result<PathBuf, JobError> {
    state.set_message("Processing image...");
    let frame = frames::load_image(&request.upload_path).await?;
    state.set_progress(PERCENT_IMAGE_DECODED);

    let people = model.process(&frame, opts).await?;
    state.set_progress(PERCENT_IMAGE_INFERRED);

    if people.is_empty() {
        return Err(JobError::NoPersonDetected);
    }

    let document = ResultDocument::new(
        request.upload_path.display().to_string(),
        [frame.width(), frame.height()],
        assign_ids(people),
        Some(model.faces().clone()),
    );
    let path = store.save_single(file_stem(&request.file_name), &document).await?;
    Ok(path)
}

/// Video mode: sweep the planned frame indices, skipping frames that fail
/// to decode or infer. The shared topology is persisted with the first
/// successful frame; the manifest only after the full sweep.
pub(crate) async fn sweep_video<S: FrameStream>(
    state: &JobState,
    store: &ResultStore,
    model: &Arc<dyn ReconstructionModel>,
    opts: &InferenceOptions,
    video_name: &str,
    video_path: &str,
    source: &mut S,
) -> Result<PathBuf, JobError> {
    let info = source.info().clone();
    let planned = source.planned().len();
    state.begin_video(planned as u64);

    let dir = store.video_dir(video_name);
    let mut manifest = VideoManifest {
        video_path: video_path.to_string(),
        video_name: video_name.to_string(),
        fps: info.fps,
        total_frames: info.total_frames,
        width: info.width,
        height: info.height,
        frame_skip: info.frame_skip,
        processed_frames: Vec::new(),
    };

    let mut faces_saved = false;
    let mut eta = EtaTracker::default();
    let mut position: u64 = 0;

    while let Some(next) = source.next_frame().await {
        position += 1;

        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(position, error = %e, "Skipping undecodable frame");
                state.set_frame_progress(position, planned, None);
                continue;
            }
        };

        let started = Instant::now();
        let people = match model.process(&frame, opts).await {
            Ok(people) => people,
            Err(e) => {
                // One bad frame never fails a video job.
                tracing::warn!(frame = frame.index, error = %e, "Frame inference failed, skipping");
                state.set_frame_progress(position, planned, None);
                continue;
            }
        };
        eta.record(started.elapsed().as_secs_f64());

        let remaining = planned.saturating_sub(position as usize);
        state.set_frame_progress(position, planned, eta.remaining_label(remaining));

        if people.is_empty() {
            continue;
        }

        let num_people = people.len();
        let faces = if faces_saved {
            None
        } else {
            Some(model.faces().clone())
        };
        let document = ResultDocument::new(
            format!("frame_{}", frame.index),
            [info.width, info.height],
            assign_ids(people),
            faces,
        );
        let file = store.save_frame(&dir, frame.index, &document).await?;
        if !faces_saved {
            store.save_shared_faces(&dir, model.faces()).await?;
            faces_saved = true;
        }
        manifest.processed_frames.push(ProcessedFrame {
            frame_idx: frame.index,
            file,
            num_people,
        });
    }

    if manifest.processed_frames.is_empty() {
        // An empty result set is nothing the viewer can play; fail loudly
        // rather than present an empty manifest as success.
        return Err(JobError::NoFramesProcessed);
    }

    store.save_manifest(&dir, &manifest).await?;
    Ok(dir)
}

/// Number people by detection order within their frame.
fn assign_ids(mut people: Vec<PersonRecord>) -> Vec<PersonRecord> {
    for (id, person) in people.iter_mut().enumerate() {
        person.id = id;
    }
    people
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use image::RgbImage;
    use mhr_core::job::JobPhase;
    use mhr_core::mhr::{CameraParams, FaceArray, MeshData, PoseParams};
    use mhr_core::progress::planned_frame_indices;
    use mhr_pipeline::frames::{Frame, VideoInfo};
    use tokio::sync::Notify;

    use crate::config::ModelSettings;

    fn test_person() -> PersonRecord {
        PersonRecord {
            id: 99,
            bbox: Some(vec![0.0, 0.0, 50.0, 100.0]),
            focal_length: 500.0,
            camera: CameraParams {
                translation: Some(vec![0.0, 0.0, 2.0]),
            },
            mesh: MeshData {
                vertices: Some(vec![[0.0, 0.0, 0.0]]),
                keypoints_3d: None,
                keypoints_2d: None,
            },
            params: PoseParams::default(),
        }
    }

    #[derive(Default)]
    struct MockBehavior {
        fail_on: Vec<u64>,
        empty_on: Vec<u64>,
        always_empty: bool,
        gate: Option<Arc<Notify>>,
    }

    struct MockModel {
        faces: FaceArray,
        behavior: MockBehavior,
    }

    impl MockModel {
        fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                faces: vec![[0, 1, 2]],
                behavior,
            })
        }
    }

    #[async_trait]
    impl ReconstructionModel for MockModel {
        async fn process(
            &self,
            frame: &Frame,
            _opts: &InferenceOptions,
        ) -> Result<Vec<PersonRecord>, InferenceError> {
            if let Some(gate) = &self.behavior.gate {
                gate.notified().await;
            }
            if self.behavior.fail_on.contains(&frame.index) {
                return Err(InferenceError::Parse(format!("frame {}", frame.index)));
            }
            if self.behavior.always_empty || self.behavior.empty_on.contains(&frame.index) {
                return Ok(Vec::new());
            }
            Ok(vec![test_person()])
        }

        fn faces(&self) -> &FaceArray {
            &self.faces
        }
    }

    struct SyntheticFrames {
        info: VideoInfo,
        planned: Vec<u64>,
        cursor: usize,
        undecodable: Vec<u64>,
    }

    impl SyntheticFrames {
        fn new(total_frames: u64, frame_skip: u32, undecodable: Vec<u64>) -> Self {
            Self {
                info: VideoInfo {
                    fps: 30.0,
                    total_frames,
                    width: 8,
                    height: 6,
                    frame_skip,
                },
                planned: planned_frame_indices(total_frames, frame_skip),
                cursor: 0,
                undecodable,
            }
        }
    }

    #[async_trait]
    impl FrameStream for SyntheticFrames {
        fn info(&self) -> &VideoInfo {
            &self.info
        }

        fn planned(&self) -> &[u64] {
            &self.planned
        }

        async fn next_frame(&mut self) -> Option<Result<Frame, MediaError>> {
            let index = *self.planned.get(self.cursor)?;
            self.cursor += 1;
            if self.undecodable.contains(&index) {
                return Some(Err(MediaError::Unreadable(format!("frame {index}"))));
            }
            Some(Ok(Frame {
                index,
                image: RgbImage::new(self.info.width, self.info.height),
            }))
        }
    }

    fn test_config(output_dir: &Path) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            output_dir: output_dir.to_path_buf(),
            max_upload_bytes: 10 * 1024 * 1024,
            frame_cache_cap: 50,
            model: ModelSettings {
                backend: "mock".to_string(),
                checkpoint_dir: output_dir.to_path_buf(),
                inference_cmd: "unused".to_string(),
                confidence_threshold: 0.8,
                use_mask: false,
            },
        })
    }

    fn registry_with(model: Arc<MockModel>) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register("mock", move |_config| {
            Ok(Arc::clone(&model) as Arc<dyn ReconstructionModel>)
        });
        registry
    }

    fn write_test_png(path: &Path) {
        RgbImage::from_pixel(4, 4, image::Rgb([128, 64, 32]))
            .save(path)
            .unwrap();
    }

    async fn wait_until_settled(handle: &JobHandle) -> JobStatus {
        for _ in 0..500 {
            let status = handle.status();
            if matches!(status.phase, JobPhase::Completed | JobPhase::Failed) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not settle in time");
    }

    // -- sweep_video --

    #[tokio::test]
    async fn sweep_tolerates_bad_frames_and_dedups_faces() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let state = JobState::new();
        state.begin(LOADING_MESSAGE).unwrap();
        state.mark_model_ready();

        // Planned sweep over 10 frames with skip 1: [0, 2, 4, 6, 8].
        // Frame 2 fails inference, frame 4 detects nobody, frame 6 fails to
        // decode at all.
        let model = MockModel::new(MockBehavior {
            fail_on: vec![2],
            empty_on: vec![4],
            ..MockBehavior::default()
        });
        let mut source = SyntheticFrames::new(10, 1, vec![6]);

        let model_dyn: Arc<dyn ReconstructionModel> = model;
        let result_dir = sweep_video(
            &state,
            &store,
            &model_dyn,
            &InferenceOptions::default(),
            "clip",
            "output/uploads/clip.mp4",
            &mut source,
        )
        .await
        .unwrap();

        let manifest = store.load_manifest(&result_dir).await.unwrap().unwrap();
        let indices: Vec<u64> = manifest.processed_frames.iter().map(|f| f.frame_idx).collect();
        assert_eq!(indices, vec![0, 8]);
        assert!(manifest.processed_frames.len() <= source.planned().len());
        assert_eq!(manifest.frame_skip, 1);
        assert_eq!(manifest.total_frames, 10);

        // Topology: inline in the first successful frame, shared file once,
        // null afterwards.
        let first = store
            .load_frame(&result_dir, "frame_000000.mhr.json")
            .await
            .unwrap()
            .unwrap();
        assert!(first.faces.is_some());
        let later = store
            .load_frame(&result_dir, "frame_000008.mhr.json")
            .await
            .unwrap()
            .unwrap();
        assert!(later.faces.is_none());
        assert!(store.load_faces(&result_dir).await.unwrap().is_some());

        // Progress swept through to exactly 100 despite the skips.
        let status = state.snapshot();
        assert_eq!(status.progress, 100);
        assert_eq!(status.total_frames, 5);
    }

    #[tokio::test]
    async fn sweep_with_zero_successful_frames_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let state = JobState::new();
        state.begin(LOADING_MESSAGE).unwrap();
        state.mark_model_ready();

        let model = MockModel::new(MockBehavior {
            fail_on: vec![0, 1, 2],
            ..MockBehavior::default()
        });
        let mut source = SyntheticFrames::new(3, 0, Vec::new());

        let model_dyn: Arc<dyn ReconstructionModel> = model;
        let result = sweep_video(
            &state,
            &store,
            &model_dyn,
            &InferenceOptions::default(),
            "clip",
            "clip.mp4",
            &mut source,
        )
        .await;

        assert_matches!(result, Err(JobError::NoFramesProcessed));
        // No manifest is written for a failed sweep.
        let video_dir = store.video_dir("clip");
        assert!(store.load_manifest(&video_dir).await.unwrap().is_none());
    }

    // -- full engine --

    #[tokio::test]
    async fn image_job_completes_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(ResultStore::new(dir.path()));
        let registry = registry_with(MockModel::new(MockBehavior::default()));
        let cancel = CancellationToken::new();
        let (handle, _worker) = spawn(config, Arc::clone(&store), registry, cancel);

        let upload_path = dir.path().join("photo.png");
        write_test_png(&upload_path);
        handle
            .submit(JobRequest {
                upload_path,
                file_name: "photo.png".to_string(),
                kind: MediaKind::Image,
                frame_skip: 0,
            })
            .unwrap();

        let status = wait_until_settled(&handle).await;
        assert_eq!(status.phase, JobPhase::Completed);
        assert!(!status.running);
        assert_eq!(status.progress, 100);
        assert!(!status.is_video);

        let result_path = PathBuf::from(status.result_path.unwrap());
        let document = store.load_document(&result_path).await.unwrap();
        assert_eq!(document.num_people, 1);
        assert_eq!(document.people[0].id, 0);
        assert_eq!(document.image_size, [4, 4]);
        assert!(document.faces.is_some());
    }

    #[tokio::test]
    async fn image_with_no_person_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(ResultStore::new(dir.path()));
        let registry = registry_with(MockModel::new(MockBehavior {
            always_empty: true,
            ..MockBehavior::default()
        }));
        let (handle, _worker) = spawn(config, store, registry, CancellationToken::new());

        let upload_path = dir.path().join("photo.png");
        write_test_png(&upload_path);
        handle
            .submit(JobRequest {
                upload_path,
                file_name: "photo.png".to_string(),
                kind: MediaKind::Image,
                frame_skip: 0,
            })
            .unwrap();

        let status = wait_until_settled(&handle).await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert!(status.error.unwrap().contains("no person detected"));
        assert!(status.result_path.is_none());
    }

    #[tokio::test]
    async fn unreadable_image_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(ResultStore::new(dir.path()));
        let registry = registry_with(MockModel::new(MockBehavior::default()));
        let (handle, _worker) = spawn(config, store, registry, CancellationToken::new());

        let upload_path = dir.path().join("broken.png");
        std::fs::write(&upload_path, b"not a png").unwrap();
        handle
            .submit(JobRequest {
                upload_path,
                file_name: "broken.png".to_string(),
                kind: MediaKind::Image,
                frame_skip: 0,
            })
            .unwrap();

        let status = wait_until_settled(&handle).await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert!(status.error.unwrap().contains("unreadable media"));
    }

    #[tokio::test]
    async fn second_submit_is_rejected_while_first_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(ResultStore::new(dir.path()));
        let gate = Arc::new(Notify::new());
        let registry = registry_with(MockModel::new(MockBehavior {
            gate: Some(Arc::clone(&gate)),
            ..MockBehavior::default()
        }));
        let (handle, _worker) = spawn(config, store, registry, CancellationToken::new());

        let upload_path = dir.path().join("photo.png");
        write_test_png(&upload_path);
        handle
            .submit(JobRequest {
                upload_path: upload_path.clone(),
                file_name: "photo.png".to_string(),
                kind: MediaKind::Image,
                frame_skip: 0,
            })
            .unwrap();

        // The slot is reserved synchronously, so a back-to-back submit is
        // rejected deterministically.
        let second = handle.submit(JobRequest {
            upload_path,
            file_name: "photo.png".to_string(),
            kind: MediaKind::Image,
            frame_skip: 0,
        });
        assert_matches!(second, Err(CoreError::Conflict(_)));

        // The first job is unaffected and finishes once released.
        gate.notify_one();
        let status = wait_until_settled(&handle).await;
        assert_eq!(status.phase, JobPhase::Completed);
    }

    #[tokio::test]
    async fn failed_model_load_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(ResultStore::new(dir.path()));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut registry = ModelRegistry::new();
        registry.register("mock", move |_config| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ModelLoadError::CheckpointMissing("model.ckpt".to_string()))
        });
        let (handle, _worker) = spawn(config, store, registry, CancellationToken::new());

        let upload_path = dir.path().join("photo.png");
        write_test_png(&upload_path);

        for _ in 0..2 {
            handle
                .submit(JobRequest {
                    upload_path: upload_path.clone(),
                    file_name: "photo.png".to_string(),
                    kind: MediaKind::Image,
                    frame_skip: 0,
                })
                .unwrap();
            let status = wait_until_settled(&handle).await;
            assert_eq!(status.phase, JobPhase::Failed);
            assert!(status.error.unwrap().contains("failed to load model"));
        }

        // Both runs attempted a fresh load: a failed load must never be
        // cached as the estimator singleton.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
