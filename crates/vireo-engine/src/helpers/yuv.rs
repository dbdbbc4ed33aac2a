// crates/vireo-engine/src/helpers/yuv.rs
//
// Decoder frame → packed Picture conversion. FFmpeg frames carry per-row
// stride padding; the surface contract wants packed planes, so every upload
// path strips stride here. The output buffer is caller-provided and reused
// across frames — reallocation only happens on size change.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::util::frame::video::Video as VideoFrame;
use vireo_core::{Picture, PictureFormat};

/// Copy one plane, stripping stride padding.
fn pack_plane(dst: &mut [u8], src: &[u8], stride: usize, row_bytes: usize, rows: usize) {
    for row in 0..rows {
        let s = row * stride;
        let d = row * row_bytes;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

/// Extract packed YUV420 planes from a frame already in `Pixel::YUV420P`.
/// `out` is resized only when the frame dimensions change.
pub fn pack_yuv420(frame: &VideoFrame, out: &mut Picture) {
    let w = frame.width();
    let h = frame.height();
    let expected = Picture::expected_len(PictureFormat::Yuv420, w, h);
    if out.width != w || out.height != h || out.data.len() != expected {
        out.format = PictureFormat::Yuv420;
        out.width = w;
        out.height = h;
        out.data = vec![0; expected];
    }

    let (wu, hu) = (w as usize, h as usize);
    let (cw, ch) = ((wu + 1) / 2, (hu + 1) / 2);

    let (y, rest) = out.data.split_at_mut(wu * hu);
    let (u, v) = rest.split_at_mut(cw * ch);
    pack_plane(y, frame.data(0), frame.stride(0), wu, hu);
    pack_plane(u, frame.data(1), frame.stride(1), cw, ch);
    pack_plane(v, frame.data(2), frame.stride(2), cw, ch);
}

/// Extract packed RGBA from a frame already in `Pixel::RGBA`.
pub fn pack_rgba(frame: &VideoFrame, out: &mut Picture) {
    let w = frame.width();
    let h = frame.height();
    let expected = Picture::expected_len(PictureFormat::Rgba, w, h);
    if out.width != w || out.height != h || out.data.len() != expected {
        out.format = PictureFormat::Rgba;
        out.width = w;
        out.height = h;
        out.data = vec![0; expected];
    }
    pack_plane(
        &mut out.data,
        frame.data(0),
        frame.stride(0),
        w as usize * 4,
        h as usize,
    );
}

/// Destripe an RGBA frame into a fresh Vec (one-shot paths: preview).
pub fn rgba_bytes(frame: &VideoFrame, w: u32, h: u32) -> Vec<u8> {
    let stride = frame.stride(0);
    let raw = frame.data(0);
    let row_bytes = w as usize * 4;
    (0..h as usize)
        .flat_map(|row| {
            let s = row * stride;
            &raw[s..s + row_bytes]
        })
        .copied()
        .collect()
}
