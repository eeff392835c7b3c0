//! HTTP surface: video feed, status feed and health.

use crate::feed;
use crate::pipeline::PipelineStatus;
use crate::state::RecognitionState;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
pub struct AppState {
    pub frames: watch::Receiver<Option<Bytes>>,
    pub recognition: Arc<RecognitionState>,
    pub pipeline: Arc<PipelineStatus>,
    pub identities: usize,
    pub threshold: f32,
    pub status_interval: Duration,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    pub pipeline: &'static str,
    pub identities: usize,
    pub threshold: f32,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/detected_names_feed", get(detected_names_feed))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = Body::from_stream(feed::video_stream(state.frames.clone()));
    (
        [
            (header::CONTENT_TYPE, feed::VIDEO_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
}

async fn detected_names_feed(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = feed::status_stream(state.recognition.clone(), state.status_interval)
        .map(|payload| Ok(Event::default().data(payload)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
        pipeline: state.pipeline.get().as_str(),
        identities: state.identities,
        threshold: state.threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineOptions, PipelineState};
    use facefeed_core::{Catalog, Embedding, FaceBox, FaceGateway, GatewayError};
    use image::RgbImage;

    fn app_state(frames: watch::Receiver<Option<Bytes>>) -> Arc<AppState> {
        Arc::new(AppState {
            frames,
            recognition: Arc::new(RecognitionState::new()),
            pipeline: Arc::new(PipelineStatus::default()),
            identities: 3,
            threshold: 0.5,
            status_interval: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_video_feed_streams_multipart_until_stopped() {
        let (tx, rx) = watch::channel(Some(Bytes::from_static(b"JPEG")));
        let response = video_feed(State(app_state(rx))).await.into_response();

        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        drop(tx);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n");
    }

    #[tokio::test]
    async fn test_status_feed_emits_sse_json() {
        let (_tx, rx) = watch::channel(None);
        let state = app_state(rx);
        state.recognition.publish(["Alice"]);

        let response = detected_names_feed(State(state)).await.into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: [\"Alice\"]\n\n");
    }

    struct NoFaces;

    impl FaceGateway for NoFaces {
        fn detect_boxes(&self, _image: &RgbImage) -> Result<Vec<FaceBox>, GatewayError> {
            Ok(Vec::new())
        }

        fn embed(&self, _crop: &RgbImage) -> Result<Embedding, GatewayError> {
            Err(GatewayError::NoFace)
        }
    }

    #[tokio::test]
    async fn test_endpoints_stay_up_without_camera() {
        let recognition = Arc::new(RecognitionState::new());
        let status = Arc::new(PipelineStatus::default());
        let (pipeline, frames) = Pipeline::new(
            Arc::new(NoFaces),
            Arc::new(Catalog::new()),
            recognition.clone(),
            status.clone(),
            PipelineOptions::default(),
        )
        .unwrap();
        pipeline.stop();

        let state = Arc::new(AppState {
            frames,
            recognition,
            pipeline: status,
            identities: 0,
            threshold: 0.5,
            status_interval: Duration::from_millis(10),
        });

        let Json(report) = health(State(state.clone())).await;
        assert_eq!(report.pipeline, "stopped");

        let video = video_feed(State(state.clone())).await.into_response();
        let body = axum::body::to_bytes(video.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());

        let names = detected_names_feed(State(state)).await.into_response();
        let mut events = names.into_body().into_data_stream();
        let chunk = events.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: []\n\n");
    }

    #[tokio::test]
    async fn test_health_reports_pipeline_state() {
        let (_tx, rx) = watch::channel(None);
        let Json(health) = health(State(app_state(rx))).await;

        assert_eq!(health.pipeline, PipelineState::Idle.as_str());
        assert_eq!(health.identities, 3);
        assert_eq!(health.threshold, 0.5);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
