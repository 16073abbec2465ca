//! Contains logic for grabbing the screen in different environments.
//! [GenericScreenGrabber] abstracts over the platform backends and [ScreenshotTaker] turns a
//! grabbed frame into a PNG file inside the screenshots directory.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, instrument};

use crate::{
    error::RecorderError,
    utils::{dir::AppPaths, time::screenshot_file_name},
};

/// Intended to serve as a contract windows and linux systems must implement.
#[cfg_attr(test, automock)]
pub trait ScreenGrabber: Send {
    /// Grabs the whole primary screen.
    fn grab(&mut self) -> Result<RgbaImage>;
}

/// Serves as a cross-compatible ScreenGrabber implementation.
pub struct GenericScreenGrabber {
    inner: Box<dyn ScreenGrabber>,
}

impl GenericScreenGrabber {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsScreenGrabber;
                Ok(Self {
                    inner: Box::new(WindowsScreenGrabber::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11ScreenGrabber;
                Ok(Self {
                    inner: Box::new(X11ScreenGrabber::new()?),
                })
            }
            else {
                Err(anyhow!("No screen capture backend was compiled in. Enable the `x11` or `win` feature"))
            }
        }
    }
}

impl ScreenGrabber for GenericScreenGrabber {
    fn grab(&mut self) -> Result<RgbaImage> {
        self.inner.grab()
    }
}

/// Stand-in used when no backend could be created. Every capture fails with the original reason,
/// which keeps the host answering commands.
pub struct UnavailableScreenGrabber {
    reason: String,
}

impl UnavailableScreenGrabber {
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

impl ScreenGrabber for UnavailableScreenGrabber {
    fn grab(&mut self) -> Result<RgbaImage> {
        Err(anyhow!("{}", self.reason))
    }
}

/// The platform grabber, or an [UnavailableScreenGrabber] explaining why there is none.
pub fn default_grabber() -> Box<dyn ScreenGrabber> {
    match GenericScreenGrabber::new() {
        Ok(grabber) => Box::new(grabber),
        Err(e) => {
            tracing::warn!("Screen capture is unavailable: {e}");
            Box::new(UnavailableScreenGrabber::new(e.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedScreenshot {
    /// Path written into records, relative to the application directory.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Captures the screen and stores it as `screenshot_<timestamp>.png`.
pub struct ScreenshotTaker {
    grabber: Box<dyn ScreenGrabber>,
    paths: AppPaths,
}

impl ScreenshotTaker {
    pub fn new(grabber: Box<dyn ScreenGrabber>, paths: AppPaths) -> Self {
        Self { grabber, paths }
    }

    #[instrument(skip(self))]
    pub fn capture(&mut self, timestamp: DateTime<Utc>) -> Result<CapturedScreenshot, RecorderError> {
        let image = self.grabber.grab().map_err(|e| RecorderError::capture(format!("{e:#}")))?;
        let (width, height) = image.dimensions();

        let dir = self.paths.screenshots();
        std::fs::create_dir_all(&dir).map_err(RecorderError::capture)?;

        let file_name = screenshot_file_name(timestamp);
        let absolute_path = dir.join(&file_name);
        image
            .save_with_format(&absolute_path, ImageFormat::Png)
            .map_err(RecorderError::capture)?;
        debug!("Saved {width}x{height} screenshot to {absolute_path:?}");

        Ok(CapturedScreenshot {
            relative_path: self.paths.relative_screenshot(&file_name),
            absolute_path,
            width,
            height,
        })
    }
}
