#![allow(dead_code)]
//! Shared helpers for integration tests: a mock reconstruction backend, a
//! multipart body builder, and the same router construction the production
//! binary uses.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::RgbImage;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mhr_api::cache::FrameCache;
use mhr_api::config::{ModelSettings, ServerConfig};
use mhr_api::engine::{self, JobHandle};
use mhr_api::router::build_app_router;
use mhr_api::state::AppState;
use mhr_core::job::{JobPhase, JobStatus};
use mhr_core::mhr::{CameraParams, FaceArray, MeshData, PersonRecord, PoseParams};
use mhr_pipeline::frames::Frame;
use mhr_pipeline::model::{
    InferenceError, InferenceOptions, ModelRegistry, ReconstructionModel,
};
use mhr_pipeline::store::ResultStore;

pub const TEST_BOUNDARY: &str = "----mhrtestboundary";

/// Build a test `ServerConfig` rooted at a scratch output directory.
pub fn test_config(output_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        output_dir: output_dir.to_path_buf(),
        max_upload_bytes: 4096,
        frame_cache_cap: 50,
        model: ModelSettings {
            backend: "mock".to_string(),
            checkpoint_dir: output_dir.to_path_buf(),
            inference_cmd: "unused".to_string(),
            confidence_threshold: 0.8,
            use_mask: false,
        },
    }
}

/// A canned person record, the way the mock backend reports one detection.
pub fn test_person() -> PersonRecord {
    PersonRecord {
        id: 0,
        bbox: Some(vec![1.0, 2.0, 30.0, 40.0]),
        focal_length: 500.0,
        camera: CameraParams {
            translation: Some(vec![0.0, 0.0, 2.5]),
        },
        mesh: MeshData {
            vertices: Some(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            keypoints_3d: None,
            keypoints_2d: None,
        },
        params: PoseParams::default(),
    }
}

/// Mock reconstruction backend with a fixed detection count and an
/// optional gate the test releases to let inference proceed.
pub struct MockModel {
    faces: FaceArray,
    people_per_frame: usize,
    pub gate: Option<Arc<Notify>>,
}

impl MockModel {
    pub fn detecting(people_per_frame: usize) -> Arc<Self> {
        Arc::new(Self {
            faces: vec![[0, 1, 2]],
            people_per_frame,
            gate: None,
        })
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            faces: vec![[0, 1, 2]],
            people_per_frame: 1,
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl ReconstructionModel for MockModel {
    async fn process(
        &self,
        _frame: &Frame,
        _opts: &InferenceOptions,
    ) -> Result<Vec<PersonRecord>, InferenceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok((0..self.people_per_frame).map(|_| test_person()).collect())
    }

    fn faces(&self) -> &FaceArray {
        &self.faces
    }
}

/// Build the full application with a mock backend, mirroring `main.rs` so
/// tests exercise the production middleware stack.
pub fn build_test_app(
    output_dir: &Path,
    model: Arc<dyn ReconstructionModel>,
) -> (Router, Arc<JobHandle>) {
    let config = Arc::new(test_config(output_dir));
    let store = Arc::new(ResultStore::new(output_dir));

    let mut registry = ModelRegistry::new();
    registry.register("mock", move |_config| Ok(Arc::clone(&model)));

    let (jobs, _worker) = engine::spawn(
        Arc::clone(&config),
        Arc::clone(&store),
        registry,
        CancellationToken::new(),
    );

    let state = AppState {
        config: Arc::clone(&config),
        jobs: Arc::clone(&jobs),
        store,
        frame_cache: Arc::new(FrameCache::new(config.frame_cache_cap)),
    };
    (build_app_router(state, &config), jobs)
}

/// Encode a tiny valid PNG for image uploads.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(4, 4, image::Rgb([200, 100, 50]))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode test png");
    bytes
}

/// Build a multipart body from (name, filename, content) triples.
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{TEST_BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{TEST_BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart body to the upload endpoint.
pub async fn post_upload(app: Router, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={TEST_BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build upload request");
    app.oneshot(request).await.expect("send upload request")
}

/// GET a path on the app.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build GET request");
    app.oneshot(request).await.expect("send GET request")
}

/// Collect a response body into JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse body as JSON")
}

/// Poll the job handle until the job reaches a terminal phase.
pub async fn wait_until_settled(jobs: &JobHandle) -> JobStatus {
    for _ in 0..500 {
        let status = jobs.status();
        if matches!(status.phase, JobPhase::Completed | JobPhase::Failed) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not settle in time");
}
