//! Subscriber-side streams: multipart JPEG frames and recognition snapshots.

use crate::state::RecognitionState;
use bytes::{BufMut, Bytes, BytesMut};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{IntervalStream, WatchStream};
use tokio_stream::{Stream, StreamExt};

pub const BOUNDARY: &str = "frame";
pub const VIDEO_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("status encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Latest annotated frames as multipart parts.
///
/// Starts with the current frame, if any, then yields each new one. Frames
/// published faster than the subscriber reads are skipped. The stream ends
/// when the pipeline stops.
pub fn video_stream(
    frames: watch::Receiver<Option<Bytes>>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    WatchStream::new(frames).filter_map(|frame| frame.map(|jpeg| Ok(multipart_part(&jpeg))))
}

/// JSON array of the currently recognized names.
pub fn status_payload(state: &RecognitionState) -> Result<String, FeedError> {
    Ok(serde_json::to_string(&state.snapshot())?)
}

/// A status payload every `period`, first one immediately.
pub fn status_stream(state: Arc<RecognitionState>, period: Duration) -> impl Stream<Item = String> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    IntervalStream::new(ticker).filter_map(move |_| match status_payload(&state) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode status snapshot");
            None
        }
    })
}
