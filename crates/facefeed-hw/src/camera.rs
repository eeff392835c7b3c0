//! Colour V4L2 capture.
//!
//! The camera is asked for YUYV at the requested size; drivers that insist on
//! MJPG or packed RGB are accepted too. Every buffer is converted to RGB
//! before it leaves this module.

use crate::frame::{self, Frame, FrameError};
use crate::VideoSource;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("{path}: {reason}")]
    Open { path: String, reason: String },
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation failed: {0}")]
    Format(String),
    #[error("stream: {0}")]
    Stream(#[from] std::io::Error),
    #[error("frame conversion failed: {0}")]
    Convert(#[from] FrameError),
    #[error("end of stream")]
    EndOfStream,
}

/// A V4L2 node that can capture video.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Buffer layouts the camera knows how to turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpg,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"RGB3" => Some(Self::Rgb3),
            _ => None,
        }
    }
}

/// An open camera with a running mmap stream.
pub struct Camera {
    // Drops before `_device`.
    stream: MmapStream<'static>,
    _device: Device,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open `path` (e.g. "/dev/video0") and start streaming at roughly
    /// `width` × `height`.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
        if !Path::new(path).exists() {
            return Err(CaptureError::NotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
            Some(16) => CaptureError::Busy(path.to_string()),
            _ => CaptureError::Open {
                path: path.to_string(),
                reason: e.to_string(),
            },
        })?;

        let caps = device.query_caps()?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE | Flags::STREAMING) {
            return Err(CaptureError::NotCapture(path.to_string()));
        }

        let format = negotiate(&device, width, height)?;
        let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
            CaptureError::Format(format!("{} offers {}, need YUYV, MJPG or RGB3", path, format.fourcc))
        })?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = format.width,
            height = format.height,
            format = ?pixel_format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            _device: device,
            path: path.to_string(),
            width: format.width,
            height: format.height,
            pixel_format,
        })
    }

    /// Block until the next buffer is dequeued and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());

        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Mjpg => frame::mjpg_to_rgb(&buf[..used])?,
            PixelFormat::Rgb3 => frame::rgb3_to_rgb(buf, self.width, self.height)?,
        };
        Ok(Frame::new(image, meta.sequence))
    }

    /// Every `/dev/video*` node that supports capture, sorted by path.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|p| {
                let path = p.to_string_lossy().into_owned();
                let caps = Device::with_path(&p).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

/// Request YUYV at `width` × `height` and return what the driver settled on.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<Format, CaptureError> {
    let mut wanted = device
        .format()
        .map_err(|e| CaptureError::Format(format!("reading current format: {e}")))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = width;
    wanted.height = height;

    device
        .set_format(&wanted)
        .map_err(|e| CaptureError::Format(format!("setting format: {e}")))
}

impl VideoSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        self.capture_frame()
    }
}
