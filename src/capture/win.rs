use std::{ffi::c_void, mem::size_of};

use anyhow::{anyhow, Result};
use image::RgbaImage;
use tracing::{error, instrument};
use windows::Win32::{
    Foundation::HWND,
    Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
        GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS,
        HBITMAP, HDC, HGDIOBJ, SRCCOPY,
    },
    UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN},
};

use super::ScreenGrabber;

#[tracing::instrument]
pub fn grab_primary_screen() -> Result<RgbaImage> {
    let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
    let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
    if width <= 0 || height <= 0 {
        return Err(anyhow!("Failed to get primary screen size"));
    }

    let screen_dc = unsafe { GetDC(HWND::default()) };
    if screen_dc.is_invalid() {
        return Err(anyhow!("Failed to get screen device context"));
    }
    let memory_dc = unsafe { CreateCompatibleDC(screen_dc) };
    let bitmap = unsafe { CreateCompatibleBitmap(screen_dc, width, height) };
    let previous = unsafe { SelectObject(memory_dc, HGDIOBJ(bitmap.0)) };

    let result = unsafe { copy_screen(screen_dc, memory_dc, bitmap, width, height) };

    unsafe {
        SelectObject(memory_dc, previous);
        let _ = DeleteObject(HGDIOBJ(bitmap.0));
        let _ = DeleteDC(memory_dc);
        ReleaseDC(HWND::default(), screen_dc);
    }
    result
}

unsafe fn copy_screen(
    screen_dc: HDC,
    memory_dc: HDC,
    bitmap: HBITMAP,
    width: i32,
    height: i32,
) -> Result<RgbaImage> {
    unsafe {
        BitBlt(memory_dc, 0, 0, width, height, screen_dc, 0, 0, SRCCOPY)
            .inspect_err(|e| error!("BitBlt failed {e:?}"))?;

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                // Negative height asks for a top-down bitmap.
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut buffer = vec![0u8; width as usize * height as usize * 4];
        let lines = GetDIBits(
            memory_dc,
            bitmap,
            0,
            height as u32,
            Some(buffer.as_mut_ptr() as *mut c_void),
            &mut info,
            DIB_RGB_COLORS,
        );
        if lines == 0 {
            return Err(anyhow!("GetDIBits copied no lines"));
        }

        for pixel in buffer.chunks_exact_mut(4) {
            pixel.swap(0, 2);
            pixel[3] = 255;
        }
        RgbaImage::from_raw(width as u32, height as u32, buffer)
            .ok_or_else(|| anyhow!("Screen buffer doesn't match {width}x{height}"))
    }
}

pub struct WindowsScreenGrabber {}

impl WindowsScreenGrabber {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsScreenGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenGrabber for WindowsScreenGrabber {
    #[instrument(skip(self))]
    fn grab(&mut self) -> Result<RgbaImage> {
        grab_primary_screen().inspect_err(|e| error!("Failed to grab screen {e:?}"))
    }
}
