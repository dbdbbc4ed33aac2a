// crates/vireo-core/src/surface.rs
//
// The render target capability and the pixel-format contract.
//
// The engine never talks to a GPU API directly: the host hands it a
// VideoSurface, and the render scheduler drives bind → upload → swap on its
// own thread. A surface implementation is expected to keep textures
// persistent and reallocate only when the uploaded picture changes size —
// the scheduler re-uploads the held picture every vsync while paused.
//
// Pictures cross the trait boundary packed (stride-free): each plane's rows
// are exactly `row_bytes` wide. The engine strips decoder stride padding
// before upload so surface implementations never see it.

use serde::Serialize;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    /// The GPU context is gone; the render loop must stop and report.
    #[error("context lost")]
    ContextLost,
    /// Anything else; the render scheduler drops the frame and retries.
    #[error("surface: {0}")]
    Failed(String),
}

// ── Modes ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitMode {
    /// Letterbox: whole video visible, aspect preserved.
    Contain,
    /// Fill: surface covered, aspect preserved, overflow cropped.
    Cover,
    /// Fill ignoring aspect.
    Stretch,
    /// 1:1 source pixels centred on the surface.
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterpolationMode {
    Auto,
    ForceOn,
    ForceOff,
}

/// Host-declared drawing area. When set it overrides the surface-reported
/// size for scale computation (the host may pre-scale the surface).
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width:    u32,
    pub height:   u32,
    /// Clockwise degrees; only 0/90/180/270 are meaningful.
    pub rotation: u32,
    pub fit:      FitMode,
}

// ── Colour ────────────────────────────────────────────────────────────────────

/// YUV→RGB matrix selector passed through to the surface's shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorMatrix {
    Bt601,
    Bt709,
    Bt2020,
}

impl ColorMatrix {
    /// SD content is BT.601, HD is BT.709 — the standard heuristic when the
    /// stream carries no colour metadata.
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        if width > 1024 || height > 576 {
            ColorMatrix::Bt709
        } else {
            ColorMatrix::Bt601
        }
    }
}

// ── Picture ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureFormat {
    /// Planar 4:2:0, packed as Y ++ U ++ V.
    Yuv420,
    /// Interleaved RGBA8888.
    Rgba,
}

/// One frame's pixels, packed per the module contract.
///
/// Yuv420 layout within `data`:
///   `[0 .. w*h]`                      — Y plane
///   `[w*h .. w*h + cw*ch]`            — U plane (cw = (w+1)/2, ch = (h+1)/2)
///   `[w*h + cw*ch .. w*h + 2*cw*ch]`  — V plane
#[derive(Debug, Clone)]
pub struct Picture {
    pub format: PictureFormat,
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl Picture {
    pub fn chroma_size(&self) -> (usize, usize) {
        (
            (self.width as usize + 1) / 2,
            (self.height as usize + 1) / 2,
        )
    }

    pub fn expected_len(format: PictureFormat, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match format {
            PictureFormat::Rgba => w * h * 4,
            PictureFormat::Yuv420 => {
                let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
                w * h + cw * ch * 2
            }
        }
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.width as usize * self.height as usize]
    }

    pub fn u_plane(&self) -> &[u8] {
        let y = self.width as usize * self.height as usize;
        let (cw, ch) = self.chroma_size();
        &self.data[y..y + cw * ch]
    }

    pub fn v_plane(&self) -> &[u8] {
        let y = self.width as usize * self.height as usize;
        let (cw, ch) = self.chroma_size();
        &self.data[y + cw * ch..y + cw * ch * 2]
    }
}

// ── Render parameters ─────────────────────────────────────────────────────────

/// Per-draw uniforms computed by the render scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams {
    /// Quad scale in normalised device coordinates; the viewport always
    /// covers the full surface.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Blend weight towards the next frame; 0.0 disables interpolation.
    pub alpha:   f32,
    pub matrix:  ColorMatrix,
    /// Passthrough for HDR streams; tone-mapping is the surface's business.
    pub hdr:     bool,
    pub rotation: u32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            alpha: 0.0,
            matrix: ColorMatrix::Bt709,
            hdr: false,
            rotation: 0,
        }
    }
}

/// Quad scale for a video of `video_w × video_h` displayed on a target of
/// `surface_w × surface_h`. Rotation of 90/270 swaps the video dimensions
/// before fitting. Surface pixels are authoritative — if the host pre-scales
/// the surface it also pre-scales what "Original" means.
pub fn fit_scale(
    fit: FitMode,
    surface_w: u32,
    surface_h: u32,
    video_w: u32,
    video_h: u32,
    rotation: u32,
) -> (f32, f32) {
    if surface_w == 0 || surface_h == 0 || video_w == 0 || video_h == 0 {
        return (1.0, 1.0);
    }
    let (vw, vh) = if rotation % 180 == 90 {
        (video_h as f32, video_w as f32)
    } else {
        (video_w as f32, video_h as f32)
    };
    let (sw, sh) = (surface_w as f32, surface_h as f32);
    let video_aspect = vw / vh;
    let surface_aspect = sw / sh;

    match fit {
        FitMode::Stretch => (1.0, 1.0),
        FitMode::Contain => {
            if video_aspect > surface_aspect {
                (1.0, surface_aspect / video_aspect)
            } else {
                (video_aspect / surface_aspect, 1.0)
            }
        }
        FitMode::Cover => {
            if video_aspect > surface_aspect {
                (video_aspect / surface_aspect, 1.0)
            } else {
                (1.0, surface_aspect / video_aspect)
            }
        }
        FitMode::Original => (vw / sw, vh / sh),
    }
}

// ── The capability ────────────────────────────────────────────────────────────

/// A render target the engine can own from one thread.
///
/// Call order per frame: `upload` then `swap`. `bind` is called once when the
/// render thread takes ownership (and again after foregrounding); `size` may
/// be called at any time from the render thread.
pub trait VideoSurface: Send {
    /// Make the surface's context current on the calling thread.
    fn bind(&mut self) -> Result<(), SurfaceError>;

    /// Current drawable size in surface pixels.
    fn size(&self) -> (u32, u32);

    /// Which picture format this surface wants uploaded.
    fn preferred_format(&self) -> PictureFormat {
        PictureFormat::Yuv420
    }

    /// Stage one picture with its draw parameters.
    fn upload(&mut self, picture: &Picture, params: &RenderParams) -> Result<(), SurfaceError>;

    /// Present the staged picture. The video clock is only advanced when this
    /// returns Ok.
    fn swap(&mut self) -> Result<(), SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn contain_letterboxes_wide_video() {
        // 16:9 video on a square surface: full width, reduced height.
        let (sx, sy) = fit_scale(FitMode::Contain, 1000, 1000, 1920, 1080, 0);
        assert!(close(sx, 1.0));
        assert!(close(sy, 1000.0 / 1000.0 * 1080.0 / 1920.0));
    }

    #[test]
    fn cover_crops_wide_video() {
        let (sx, sy) = fit_scale(FitMode::Cover, 1000, 1000, 1920, 1080, 0);
        assert!(sx > 1.0);
        assert!(close(sy, 1.0));
    }

    #[test]
    fn stretch_always_fills() {
        assert_eq!(fit_scale(FitMode::Stretch, 640, 480, 1920, 1080, 0), (1.0, 1.0));
    }

    #[test]
    fn original_maps_source_pixels() {
        let (sx, sy) = fit_scale(FitMode::Original, 1920, 1080, 960, 540, 0);
        assert!(close(sx, 0.5));
        assert!(close(sy, 0.5));
    }

    #[test]
    fn rotation_swaps_video_dimensions() {
        let upright = fit_scale(FitMode::Contain, 1080, 1920, 1920, 1080, 90);
        // Rotated 16:9 on a portrait surface fills it exactly.
        assert!(close(upright.0, 1.0));
        assert!(close(upright.1, 1.0));
    }

    #[test]
    fn degenerate_sizes_fall_back_to_identity() {
        assert_eq!(fit_scale(FitMode::Contain, 0, 0, 1920, 1080, 0), (1.0, 1.0));
        assert_eq!(fit_scale(FitMode::Cover, 100, 100, 0, 0, 0), (1.0, 1.0));
    }

    #[test]
    fn picture_plane_offsets() {
        let w = 4u32;
        let h = 4u32;
        let len = Picture::expected_len(PictureFormat::Yuv420, w, h);
        assert_eq!(len, 16 + 4 + 4);
        let pic = Picture { format: PictureFormat::Yuv420, width: w, height: h, data: vec![0; len] };
        assert_eq!(pic.y_plane().len(), 16);
        assert_eq!(pic.u_plane().len(), 4);
        assert_eq!(pic.v_plane().len(), 4);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        assert_eq!(Picture::expected_len(PictureFormat::Yuv420, 5, 5), 25 + 9 + 9);
    }

    #[test]
    fn matrix_heuristic() {
        assert_eq!(ColorMatrix::for_dimensions(720, 576), ColorMatrix::Bt601);
        assert_eq!(ColorMatrix::for_dimensions(1920, 1080), ColorMatrix::Bt709);
    }
}
