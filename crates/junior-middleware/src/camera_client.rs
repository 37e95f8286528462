//! HTTP client for the vehicle camera.
//!
//! Stills come from `/cam-lo.jpg` or `/cam-hi.jpg`, the live feed from the
//! multipart stream at `/cam.mjpeg`.  An optional frame-rate cap is enforced
//! with a `governor` limiter: still fetches wait for a permit, stream frames
//! over the cap are skipped.

use std::num::NonZeroU32;
use std::time::Duration;

use futures_util::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use junior_hal::{CameraFrame, MjpegSplitter, Resolution};
use junior_types::JuniorError;
use tracing::{debug, trace};

use crate::config::HttpConfig;

const TRANSPORT: &str = "camera";
const MJPEG_PATH: &str = "/cam.mjpeg";

pub struct HttpCamera {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpCamera {
    /// # Errors
    ///
    /// Returns [`JuniorError::Config`] when the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, JuniorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| JuniorError::Config(format!("camera client: {e}")))?;
        let limiter = config
            .camera_max_fps
            .and_then(NonZeroU32::new)
            .map(|fps| RateLimiter::direct(Quota::per_second(fps)));
        Ok(Self {
            client,
            base_url: config.camera_base_url(),
            timeout: Duration::from_millis(config.camera_timeout_ms),
            limiter,
        })
    }

    /// Fetch one still.
    ///
    /// # Errors
    ///
    /// [`JuniorError::Timeout`] past the camera timeout,
    /// [`JuniorError::Transport`] on other request failures and
    /// [`JuniorError::Decode`] when the body is not a JPEG.
    pub async fn fetch_frame(&self, resolution: Resolution) -> Result<CameraFrame, JuniorError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let url = format!("{}{}", self.base_url, resolution.path());
        trace!(%url, "fetching still");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.request_error(e))?;
        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        CameraFrame::from_jpeg(bytes.to_vec())
    }

    /// Read frames from the MJPEG stream until `max` have been collected.
    ///
    /// Each chunk must arrive within the camera timeout.  A stream that ends
    /// early returns whatever was collected.
    pub async fn mjpeg_frames(&self, max: usize) -> Result<Vec<CameraFrame>, JuniorError> {
        let url = format!("{}{}", self.base_url, MJPEG_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.request_error(e))?;

        let mut stream = response.bytes_stream();
        let mut splitter = MjpegSplitter::new();
        let mut frames = Vec::with_capacity(max);

        while frames.len() < max {
            let chunk = match tokio::time::timeout(self.timeout, stream.next()).await {
                Err(_) => return Err(self.timeout_error()),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(|e| self.request_error(e))?,
            };
            for frame in splitter.push(&chunk) {
                if frames.len() == max {
                    break;
                }
                if let Some(limiter) = &self.limiter
                    && limiter.check().is_err()
                {
                    trace!("frame over rate cap skipped");
                    continue;
                }
                frames.push(frame);
            }
        }
        debug!(frames = frames.len(), "mjpeg capture finished");
        Ok(frames)
    }

    fn timeout_error(&self) -> JuniorError {
        JuniorError::Timeout {
            transport: TRANSPORT.to_string(),
            after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn request_error(&self, e: reqwest::Error) -> JuniorError {
        if e.is_timeout() {
            self.timeout_error()
        } else {
            JuniorError::Transport {
                transport: TRANSPORT.to_string(),
                details: e.to_string(),
            }
        }
    }
}
