//! Camera frame type and MJPEG stream splitting.
//!
//! The vehicle camera serves single JPEG stills and a multipart MJPEG stream.
//! Decoding and display are left to the consumer; this module only deals with
//! the bytes.

use std::fmt;
use std::str::FromStr;

use junior_types::JuniorError;
use tracing::warn;

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Partial frames larger than this are discarded.
const DEFAULT_MAX_BUFFER: usize = 2 * 1024 * 1024;

/// Still-image resolutions served by the camera firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// 320×240.
    #[default]
    Lo,
    /// 800×600.
    Hi,
}

impl Resolution {
    /// URL path of the still image for this resolution.
    pub fn path(self) -> &'static str {
        match self {
            Resolution::Lo => "/cam-lo.jpg",
            Resolution::Hi => "/cam-hi.jpg",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Lo => write!(f, "lo"),
            Resolution::Hi => write!(f, "hi"),
        }
    }
}

impl FromStr for Resolution {
    type Err = JuniorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lo" | "low" => Ok(Resolution::Lo),
            "hi" | "high" => Ok(Resolution::Hi),
            other => Err(JuniorError::Config(format!("unknown resolution '{other}'"))),
        }
    }
}

/// A JPEG-encoded frame as received from the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    pub jpeg: Vec<u8>,
}

impl CameraFrame {
    /// Wrap `jpeg`, checking that it at least starts like a JPEG.
    ///
    /// # Errors
    ///
    /// Returns [`JuniorError::Decode`] when the SOI marker is missing.
    pub fn from_jpeg(jpeg: Vec<u8>) -> Result<Self, JuniorError> {
        if !jpeg.starts_with(&JPEG_SOI) {
            return Err(JuniorError::Decode {
                field: "camera_frame".to_string(),
                details: format!("{} bytes without a JPEG start marker", jpeg.len()),
            });
        }
        Ok(Self { jpeg })
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Incremental splitter that pulls complete JPEG frames out of an MJPEG byte
/// stream, using the SOI/EOI markers as delimiters.
///
/// Multipart headers between frames are skipped.  Chunks may cut a frame or
/// a marker anywhere.
pub struct MjpegSplitter {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    /// Bytes currently held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed `chunk` and return every frame it completed, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<CameraFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, &JPEG_SOI, 0) else {
                // Keep a trailing 0xFF: it may be the first half of an SOI.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
                break;
            };
            let Some(end) = find_marker(&self.buf, &JPEG_EOI, start + JPEG_SOI.len()) else {
                self.buf.drain(..start);
                break;
            };
            let stop = end + JPEG_EOI.len();
            frames.push(CameraFrame {
                jpeg: self.buf[start..stop].to_vec(),
            });
            self.buf.drain(..stop);
        }

        if self.buf.len() > self.max_buffer {
            warn!(
                buffered = self.buf.len(),
                limit = self.max_buffer,
                "MJPEG frame exceeds buffer limit; dropping partial frame"
            );
            self.buf.clear();
        }

        frames
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = JPEG_SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&JPEG_EOI);
        v
    }

    #[test]
    fn resolution_paths_and_parsing() {
        assert_eq!(Resolution::Lo.path(), "/cam-lo.jpg");
        assert_eq!(Resolution::Hi.path(), "/cam-hi.jpg");
        assert_eq!("HI".parse::<Resolution>().unwrap(), Resolution::Hi);
        assert!("medium".parse::<Resolution>().is_err());
    }

    #[test]
    fn from_jpeg_requires_soi() {
        assert!(CameraFrame::from_jpeg(jpeg(b"abc")).is_ok());
        assert!(matches!(
            CameraFrame::from_jpeg(b"<html>".to_vec()),
            Err(JuniorError::Decode { .. })
        ));
    }

    #[test]
    fn splits_frames_between_multipart_headers() {
        let mut stream = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        stream.extend(jpeg(b"one"));
        stream.extend_from_slice(b"\r\n--frame\r\n\r\n");
        stream.extend(jpeg(b"two"));

        let mut splitter = MjpegSplitter::new();
        let frames = splitter.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].jpeg, jpeg(b"one"));
        assert_eq!(frames[1].jpeg, jpeg(b"two"));
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn frame_split_across_chunks_and_markers() {
        let data = jpeg(b"payload");
        let mut splitter = MjpegSplitter::new();
        // Cut inside the SOI and inside the EOI.
        assert!(splitter.push(&data[..1]).is_empty());
        assert!(splitter.push(&data[1..data.len() - 1]).is_empty());
        let frames = splitter.push(&data[data.len() - 1..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].jpeg, data);
    }

    #[test]
    fn eoi_before_soi_is_ignored() {
        let mut stream = JPEG_EOI.to_vec();
        stream.extend(jpeg(b"x"));
        let frames = MjpegSplitter::new().push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].jpeg, jpeg(b"x"));
    }

    #[test]
    fn oversized_partial_frame_is_dropped() {
        let mut splitter = MjpegSplitter::with_max_buffer(8);
        let mut partial = JPEG_SOI.to_vec();
        partial.extend_from_slice(&[0u8; 16]);
        assert!(splitter.push(&partial).is_empty());
        assert_eq!(splitter.buffered(), 0);
    }
}
