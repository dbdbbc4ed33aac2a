// crates/vireo-engine/src/texture.rs
//
// Offscreen render target for hosts that composite from a texture registry
// (Flutter-style) instead of handing over a window surface. The scheduler
// uploads RGBA; swap publishes the staged pixels to the host-visible buffer
// and fires the host's frame-available callback with the registered id.

use std::sync::{Arc, Mutex};

use vireo_core::{Picture, PictureFormat, RenderParams, SurfaceError, VideoSurface};

pub type FrameAvailableFn = Box<dyn Fn(i64) + Send>;

pub struct TextureSurface {
    id:       i64,
    width:    u32,
    height:   u32,
    staged:   Vec<u8>,
    /// Front buffer the host reads between callbacks.
    pixels:   Arc<Mutex<Vec<u8>>>,
    on_frame: FrameAvailableFn,
}

impl TextureSurface {
    pub fn new(id: i64, width: u32, height: u32, on_frame: FrameAvailableFn) -> Self {
        let len = Picture::expected_len(PictureFormat::Rgba, width, height);
        Self {
            id,
            width,
            height,
            staged: vec![0; len],
            pixels: Arc::new(Mutex::new(vec![0; len])),
            on_frame,
        }
    }

    /// Shared handle the host keeps to read presented pixels.
    pub fn pixels(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.pixels)
    }
}

impl VideoSurface for TextureSurface {
    fn bind(&mut self) -> Result<(), SurfaceError> {
        Ok(()) // no GPU context to make current
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn preferred_format(&self) -> PictureFormat {
        PictureFormat::Rgba
    }

    fn upload(&mut self, picture: &Picture, _params: &RenderParams) -> Result<(), SurfaceError> {
        if picture.format != PictureFormat::Rgba {
            return Err(SurfaceError::Failed("texture surface wants RGBA".into()));
        }
        // The scheduler scales to the registered size before upload; a
        // mismatch means the registration went stale.
        if (picture.width, picture.height) != (self.width, self.height) {
            return Err(SurfaceError::Failed(format!(
                "picture {}x{} vs registered {}x{}",
                picture.width, picture.height, self.width, self.height
            )));
        }
        self.staged.copy_from_slice(&picture.data);
        Ok(())
    }

    fn swap(&mut self) -> Result<(), SurfaceError> {
        {
            let mut front = self
                .pixels
                .lock()
                .map_err(|_| SurfaceError::Failed("pixel buffer poisoned".into()))?;
            front.copy_from_slice(&self.staged);
        }
        (self.on_frame)(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rgba(width: u32, height: u32, fill: u8) -> Picture {
        Picture {
            format: PictureFormat::Rgba,
            width,
            height,
            data: vec![fill; Picture::expected_len(PictureFormat::Rgba, width, height)],
        }
    }

    #[test]
    fn swap_publishes_and_notifies() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        let mut surface =
            TextureSurface::new(7, 4, 4, Box::new(move |id| {
                assert_eq!(id, 7);
                fired2.fetch_add(1, Ordering::SeqCst);
            }));
        let pixels = surface.pixels();

        surface.upload(&rgba(4, 4, 0xAB), &RenderParams::default()).unwrap();
        // Upload alone must not publish.
        assert_eq!(pixels.lock().unwrap()[0], 0);
        surface.swap().unwrap();
        assert_eq!(pixels.lock().unwrap()[0], 0xAB);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut surface = TextureSurface::new(1, 8, 8, Box::new(|_| {}));
        let err = surface.upload(&rgba(4, 4, 1), &RenderParams::default());
        assert!(err.is_err());
    }
}
