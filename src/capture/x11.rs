use anyhow::{anyhow, Result};
use image::RgbaImage;
use tracing::instrument;
use xcb::{
    x::{self, Drawable, GetImage, ImageFormat},
    Connection,
};

use super::ScreenGrabber;

/// Converts a ZPixmap of a 24/32 bit visual (BGRX byte order) into RGBA pixels.
fn bgrx_to_rgba(data: &[u8], width: u32, height: u32) -> Result<RgbaImage> {
    let mut pixels = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(4) {
        pixels.extend_from_slice(&[chunk[2], chunk[1], chunk[0], 255]);
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("X server returned {} bytes for a {width}x{height} image", data.len()))
}

pub struct X11ScreenGrabber {
    connection: Connection,
    preferred_screen: i32,
}

impl X11ScreenGrabber {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = Connection::connect(None)?;
        Ok(Self {
            connection,
            preferred_screen,
        })
    }
}

impl ScreenGrabber for X11ScreenGrabber {
    #[instrument(skip(self))]
    fn grab(&mut self) -> Result<RgbaImage> {
        let setup = self.connection.get_setup();

        // Currently the application only supports 1 x11 screen.
        let screen = setup
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .ok_or_else(|| anyhow!("X screen {} doesn't exist", self.preferred_screen))?;
        let (width, height) = (screen.width_in_pixels(), screen.height_in_pixels());

        let reply = self.connection.wait_for_reply(self.connection.send_request(&GetImage {
            format: ImageFormat::ZPixmap,
            drawable: Drawable::Window(screen.root()),
            x: 0,
            y: 0,
            width,
            height,
            plane_mask: u32::MAX,
        }))?;

        if !matches!(reply.depth(), 24 | 32) {
            return Err(anyhow!("Unsupported X visual depth {}", reply.depth()));
        }
        bgrx_to_rgba(reply.data(), width.into(), height.into())
    }
}

#[cfg(test)]
mod tests {
    use super::bgrx_to_rgba;

    #[test]
    fn test_bgrx_conversion() {
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        let image = bgrx_to_rgba(&data, 2, 1).unwrap();
        assert_eq!(image.as_raw(), &vec![3, 2, 1, 255, 6, 5, 4, 255]);
        assert!(bgrx_to_rgba(&data, 3, 1).is_err());
    }
}
