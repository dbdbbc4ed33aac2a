// crates/vireo-engine/src/preview.rs
//
// One-shot preview-frame extraction for scrub-bar thumbnails. Stateless and
// synchronous: open → backward-seek a second before the target (AVI/FLV need
// the margin to land on a real keyframe) → decode forward dropping pre-target
// frames → return the first frame at or past the target, scaled to the
// requested size. Never touches any engine state.

use std::path::{Path, PathBuf};

use anyhow::Result;
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use log::debug;
use vireo_core::PlayerError;

use crate::helpers::pts::{fps_or_default, tb_to_secs};
use crate::helpers::seek::seek_backward;
use crate::helpers::yuv::rgba_bytes;

/// Seek this far before the target so keyframe-only containers still land
/// in front of it.
const SEEK_MARGIN_SEC: f64 = 1.0;

/// Extract one RGBA8888 frame at `target_ms`, scaled to `width × height`.
/// The returned buffer is exactly `width * height * 4` bytes.
pub fn preview_frame(
    path: impl AsRef<Path>,
    target_ms: i64,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, PlayerError> {
    if width == 0 || height == 0 {
        return Err(PlayerError::Internal("preview size must be non-zero".into()));
    }
    extract(path.as_ref(), target_ms as f64 / 1000.0, width, height)
        .map_err(|e| PlayerError::DecodeFailed(format!("preview: {e}")))
}

/// Preview supplement: write the frame at `target_ms` to `dest` as an 8-bit
/// RGB PNG at the source resolution.
pub fn preview_to_png(
    path: impl AsRef<Path>,
    target_ms: i64,
    dest: impl Into<PathBuf>,
) -> Result<(), PlayerError> {
    let path = path.as_ref();
    let (w, h) = probe_size(path).map_err(|e| PlayerError::OpenFailed(format!("{e}")))?;
    let rgba = extract(path, target_ms as f64 / 1000.0, w, h)
        .map_err(|e| PlayerError::DecodeFailed(format!("preview: {e}")))?;
    write_png(&dest.into(), &rgba, w, h)
        .map_err(|e| PlayerError::Internal(format!("png write: {e}")))
}

fn probe_size(path: &Path) -> Result<(u32, u32)> {
    let ictx = input(path)?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow::anyhow!("no video stream"))?;
    let (w, h) = unsafe {
        let p = stream.parameters().as_ptr();
        ((*p).width as u32, (*p).height as u32)
    };
    Ok((w.max(2), h.max(2)))
}

fn extract(path: &Path, target_sec: f64, out_w: u32, out_h: u32) -> Result<Vec<u8>> {
    let mut ictx = input(path)?;

    let video_stream_idx = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow::anyhow!("no video stream"))?
        .index();

    let (tb, fps) = {
        let stream = ictx.stream(video_stream_idx).unwrap();
        (stream.time_base(), fps_or_default(stream.avg_frame_rate()))
    };
    let tb_secs = tb_to_secs(tb);

    seek_backward(&mut ictx, (target_sec - SEEK_MARGIN_SEC).max(0.0), "preview");

    // Second context for decoder construction (Parameters borrows from the
    // seeking context's stream).
    let ictx2 = input(path)?;
    let stream2 = ictx2
        .stream(video_stream_idx)
        .ok_or_else(|| anyhow::anyhow!("stream gone"))?;
    let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
    let mut decoder = decoder_ctx.decoder().video()?;

    let mut scaler: Option<SwsContext> = None;
    let mut frame_index: i64 = 0;

    // Most recent decoded frame, kept in case EOF arrives before the target
    // (a preview at the very tail of the file).
    let mut last_good: Option<ffmpeg::util::frame::video::Video> = None;

    for result in ictx.packets() {
        let Ok((stream, packet)) = result else { continue };
        if stream.index() != video_stream_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            // pts → best_effort → frame_index / fps.
            let pts_secs = decoded
                .pts()
                .or_else(|| decoded.timestamp())
                .map(|ts| ts as f64 * tb_secs)
                .unwrap_or_else(|| frame_index as f64 / fps);
            frame_index += 1;

            if scaler.is_none() {
                scaler = Some(SwsContext::get(
                    decoded.format(), decoded.width(), decoded.height(),
                    Pixel::RGBA, out_w, out_h,
                    Flags::BILINEAR,
                )?);
            }
            let sc = scaler.as_mut().unwrap();
            let mut out = ffmpeg::util::frame::video::Video::empty();
            sc.run(&decoded, &mut out)?;
            last_good = Some(out);

            if pts_secs < target_sec {
                continue; // pre-roll from the keyframe-aligned seek
            }
            debug!("preview hit at {pts_secs:.3}s (target {target_sec:.3}s)");
            return Ok(rgba_bytes(last_good.as_ref().unwrap(), out_w, out_h));
        }
    }

    // EOF before the target: the last frame we saw is the best answer.
    last_good
        .map(|f| rgba_bytes(&f, out_w, out_h))
        .ok_or_else(|| anyhow::anyhow!("no frame decoded at t={target_sec:.3}"))
}

fn write_png(dest: &Path, rgba: &[u8], w: u32, h: u32) -> Result<()> {
    use std::io::BufWriter;

    let file = std::fs::File::create(dest)?;
    let writer = &mut BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, w, h);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder.write_header()?;

    // Strip alpha: PNG thumbnails are opaque.
    let rgb: Vec<u8> = rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    png_writer.write_image_data(&rgb)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_rejected_without_touching_the_file() {
        let err = preview_frame("/nonexistent.mp4", 1000, 0, 180).unwrap_err();
        assert!(matches!(err, PlayerError::Internal(_)));
    }

    #[test]
    fn missing_file_reports_decode_failure() {
        let err = preview_frame("/nonexistent.mp4", 1000, 320, 180).unwrap_err();
        assert!(matches!(err, PlayerError::DecodeFailed(_)));
    }

    #[test]
    fn png_writer_produces_a_decodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("thumb.png");
        // 2x2 opaque red RGBA.
        let rgba = [255u8, 0, 0, 255].repeat(4);
        write_png(&dest, &rgba, 2, 2).unwrap();

        let decoder = png::Decoder::new(std::fs::File::open(&dest).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (2, 2));
        assert_eq!(&buf[..3], &[255, 0, 0]);
    }
}
