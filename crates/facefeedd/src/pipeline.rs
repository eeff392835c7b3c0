//! The frame loop: capture, detect, recognize in parallel, annotate, emit.
//!
//! Runs on a dedicated OS thread. Each admitted frame is downscaled for
//! detection, every valid face is embedded and matched on the worker pool,
//! and the loop waits for the whole frame before publishing the recognized
//! names and the annotated JPEG. A capture error stops the loop for good.

use crate::config::Config;
use crate::pool::{Latch, PoolError, WorkerPool};
use crate::state::RecognitionState;
use bytes::Bytes;
use facefeed_core::annotate::annotate;
use facefeed_core::{
    Catalog, FaceBox, FaceGateway, FirstMatch, GatewayError, Label, Matcher, RecognitionResult,
    DEFAULT_THRESHOLD,
};
use facefeed_hw::VideoSource;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Where the frame loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    Capturing,
    Detecting,
    Dispatching,
    Annotating,
    Emitting,
    /// Terminal. Entered when the video source fails.
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Detecting => "detecting",
            Self::Dispatching => "dispatching",
            Self::Annotating => "annotating",
            Self::Emitting => "emitting",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, read-mostly view of the pipeline state for the health endpoint.
#[derive(Default)]
pub struct PipelineStatus {
    state: Mutex<PipelineState>,
}

impl PipelineStatus {
    pub fn get(&self) -> PipelineState {
        *self.state.lock()
    }

    fn set(&self, next: PipelineState) {
        let mut state = self.state.lock();
        // Stopped is terminal.
        if *state != PipelineState::Stopped {
            *state = next;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Minimum spacing between processed frames.
    pub frame_interval: Duration,
    /// Resize factor applied before detection, in (0, 1].
    pub downscale: f32,
    /// Padding around each box, in detection-frame pixels.
    pub box_padding: u32,
    /// Per-frame deadline for face jobs; `None` waits for all of them.
    pub face_timeout: Option<Duration>,
    pub jpeg_quality: u8,
    pub threshold: f32,
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / 30.0),
            downscale: 0.25,
            box_padding: 20,
            face_timeout: None,
            jpeg_quality: 80,
            threshold: DEFAULT_THRESHOLD,
            workers: 4,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            downscale: config.downscale,
            box_padding: config.box_padding,
            face_timeout: config.face_timeout,
            jpeg_quality: config.jpeg_quality,
            threshold: config.threshold,
            workers: config.workers,
        }
    }
}

/// Admits a frame only if the target interval has passed since the last
/// admitted one.
pub struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// A face region cut from the detection frame.
pub struct FaceCrop {
    /// The unpadded detector box, in detection-frame pixels.
    pub face: FaceBox,
    pub image: RgbImage,
}

/// Resize `frame` by `factor`. Factors of 1 or more return a copy.
pub fn downscale(frame: &RgbImage, factor: f32) -> RgbImage {
    if factor >= 1.0 {
        return frame.clone();
    }
    let w = ((frame.width() as f32 * factor).round() as u32).max(1);
    let h = ((frame.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(frame, w, h, FilterType::Triangle)
}

/// Drop invalid boxes, pad the rest and cut them out of `frame`.
///
/// Output order follows `boxes`. Boxes whose padded region clamps to nothing
/// are dropped.
pub fn prepare_crops(frame: &RgbImage, boxes: &[FaceBox], padding: u32) -> Vec<FaceCrop> {
    boxes
        .iter()
        .filter_map(|face| {
            if !face.is_valid() {
                tracing::debug!(?face, "discarding invalid box");
                return None;
            }
            let Some((x, y, w, h)) = face.padded_region(padding, frame.width(), frame.height()) else {
                tracing::debug!(?face, "box lies outside the frame");
                return None;
            };
            Some(FaceCrop {
                face: *face,
                image: imageops::crop_imm(frame, x, y, w, h).to_image(),
            })
        })
        .collect()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(Bytes::from(buf))
}

pub struct Pipeline {
    gateway: Arc<dyn FaceGateway>,
    catalog: Arc<Catalog>,
    matcher: Arc<dyn Matcher>,
    state: Arc<RecognitionState>,
    status: Arc<PipelineStatus>,
    pool: WorkerPool,
    options: PipelineOptions,
    frames: watch::Sender<Option<Bytes>>,
}

impl Pipeline {
    /// Build a pipeline and the receiver side of its latest-frame channel.
    ///
    /// The channel closes when the pipeline stops.
    pub fn new(
        gateway: Arc<dyn FaceGateway>,
        catalog: Arc<Catalog>,
        state: Arc<RecognitionState>,
        status: Arc<PipelineStatus>,
        options: PipelineOptions,
    ) -> Result<(Self, watch::Receiver<Option<Bytes>>), PoolError> {
        let workers = options.workers.max(1);
        let pool = WorkerPool::new(workers, workers * 2)?;
        let (frames, rx) = watch::channel(None);
        let pipeline = Self {
            gateway,
            catalog,
            matcher: Arc::new(FirstMatch),
            state,
            status,
            pool,
            options,
            frames,
        };
        Ok((pipeline, rx))
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Run the loop on a named thread until the source fails.
    pub fn spawn<S>(self, source: S) -> std::io::Result<JoinHandle<()>>
    where
        S: VideoSource + 'static,
    {
        std::thread::Builder::new()
            .name("facefeed-pipeline".into())
            .spawn(move || self.run(source))
    }

    /// Stop without processing a frame, closing the frame channel.
    pub fn stop(self) {
        self.status.set(PipelineState::Stopped);
        tracing::info!(frames = 0, "pipeline stopped");
    }

    /// Blocking frame loop. Returns once the source fails.
    pub fn run<S: VideoSource>(self, mut source: S) {
        tracing::info!(
            identities = self.catalog.len(),
            workers = self.pool.size(),
            threshold = self.options.threshold,
            "pipeline started"
        );

        let mut gate = RateGate::new(self.options.frame_interval);
        let mut processed: u64 = 0;

        loop {
            self.status.set(PipelineState::Capturing);
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, stage = "capture", "capture failed, stopping pipeline");
                    break;
                }
            };

            if !gate.admit(frame.timestamp) {
                continue;
            }

            processed += 1;
            if let Some(jpeg) = self.process_frame(&frame.image) {
                self.frames.send_replace(Some(jpeg));
            }
            tracing::trace!(frame = processed, sequence = frame.sequence, "frame emitted");
        }

        self.status.set(PipelineState::Stopped);
        tracing::info!(frames = processed, "pipeline stopped");
    }

    /// Recognize, publish, annotate and encode one frame.
    ///
    /// Returns `None` only when JPEG encoding fails.
    pub fn process_frame(&self, frame: &RgbImage) -> Option<Bytes> {
        let annotated = self.render(frame);

        self.status.set(PipelineState::Emitting);
        match encode_jpeg(&annotated, self.options.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(error = %e, stage = "encode", "jpeg encoding failed, skipping frame");
                None
            }
        }
    }

    /// Recognize faces, publish their names and return the annotated frame.
    pub fn render(&self, frame: &RgbImage) -> RgbImage {
        let results = self.recognize(frame);

        self.state
            .publish(results.iter().filter_map(|r| r.label.name()).map(str::to_string));

        self.status.set(PipelineState::Annotating);
        annotate(frame, &results)
    }

    /// Face boxes and labels for `frame`, in full-resolution coordinates.
    ///
    /// Results keep detector order. Faces whose embedding or match failed are
    /// left out entirely.
    pub fn recognize(&self, frame: &RgbImage) -> Vec<RecognitionResult> {
        self.status.set(PipelineState::Detecting);
        let factor = self.options.downscale.min(1.0);
        let small = downscale(frame, factor);

        let boxes = match self.gateway.detect_boxes(&small) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(error = %e, stage = "detect", "face detection failed");
                return Vec::new();
            }
        };

        let crops = prepare_crops(&small, &boxes, self.options.box_padding);
        if crops.is_empty() {
            return Vec::new();
        }

        self.status.set(PipelineState::Dispatching);
        let labels = self.dispatch(&crops);

        let inverse = 1.0 / factor;
        crops
            .iter()
            .zip(labels)
            .filter_map(|(crop, label)| {
                Some(RecognitionResult {
                    face: crop.face.scaled(inverse),
                    label: label?,
                })
            })
            .collect()
    }

    /// Embed and match every crop on the pool, then wait for the frame.
    ///
    /// Slot `i` holds the label of `crops[i]`, or `None` if that job failed or
    /// missed the deadline. With a deadline, the frame never waits past it:
    /// faces that cannot be queued in time are dropped, and queued jobs that
    /// have not started by then are skipped.
    fn dispatch(&self, crops: &[FaceCrop]) -> Vec<Option<Label>> {
        let deadline = self.options.face_timeout.map(|timeout| Instant::now() + timeout);
        let slots: Arc<Mutex<Vec<Option<Label>>>> =
            Arc::new(Mutex::new((0..crops.len()).map(|_| None).collect()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let latch = Latch::new(crops.len());

        for (i, crop) in crops.iter().enumerate() {
            let guard = latch.guard();
            let gateway = self.gateway.clone();
            let catalog = self.catalog.clone();
            let matcher = self.matcher.clone();
            let slots = slots.clone();
            let cancelled = cancelled.clone();
            let image = crop.image.clone();
            let threshold = self.options.threshold;

            let job = move || {
                let _guard = guard;
                if cancelled.load(Ordering::Acquire) {
                    tracing::debug!(face = i, "frame moved on, skipping face");
                    return;
                }
                match gateway.embed(&image) {
                    Ok(embedding) => {
                        let label = matcher.match_label(&embedding, &catalog, threshold);
                        // Slots are taken once the frame moves on; late jobs write nowhere.
                        if let Some(slot) = slots.lock().get_mut(i) {
                            *slot = Some(label);
                        }
                    }
                    Err(GatewayError::NoFace) => {
                        tracing::debug!(face = i, "no face in crop");
                    }
                    Err(e) => {
                        tracing::warn!(face = i, error = %e, stage = "embed", "embedding failed");
                    }
                }
            };

            // A rejected job is dropped along with its guard.
            let submitted = match deadline {
                Some(deadline) => self.pool.submit_until(job, deadline),
                None => self.pool.submit(job),
            };
            if let Err(e) = submitted {
                tracing::warn!(face = i, error = %e, "could not dispatch face");
            }
        }

        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !latch.wait_timeout(remaining) {
                    cancelled.store(true, Ordering::Release);
                    tracing::warn!(
                        timeout_ms = self.options.face_timeout.map_or(0, |t| t.as_millis() as u64),
                        "face deadline expired, dropping unfinished faces"
                    );
                }
            }
            None => latch.wait(),
        }

        let labels = std::mem::take(&mut *slots.lock());
        labels
    }
}
