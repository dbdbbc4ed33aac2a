// crates/vireo-engine/src/helpers/seek.rs
//
// Backward container seek with soft-fail semantics. Every seek in the engine
// routes through here — the demuxer for user seeks, frame-step prev, and the
// preview extractor.
//
// Why backward (`..=seek_ts`): a forward seek lands on the keyframe AT OR
// AFTER the target. When the target falls mid-GOP that keyframe can be
// seconds away and every frame in between is simply absent from the decode
// stream. A backward seek lands on the keyframe BEFORE the target; the
// pre-roll is discarded by the caller's pts filter, so the first presented
// frame is exactly the requested one. AVI and FLV only index keyframes, so
// for them backward is the only seek that lands anywhere useful.
//
// Why soft-fail: avformat_seek_file returns errors on some freshly-opened
// contexts and on containers without random access. The demuxer then simply
// decodes from wherever it is and the pts filter still converges — slower,
// but correct.

use ffmpeg_the_third as ffmpeg;
use log::warn;

/// Seek `ictx` so that decoding resumes at or before `target_secs`.
///
/// Returns false on failure (already logged); the caller keeps decoding from
/// the current position and relies on pts filtering.
pub fn seek_backward(
    ictx: &mut ffmpeg::format::context::Input,
    target_secs: f64,
    label: &str,
) -> bool {
    if target_secs <= 0.0 {
        // The demuxer starts at position 0; seeking to 0 on a fresh context
        // fails on some platforms and buys nothing.
        return true;
    }

    let seek_ts = (target_secs * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
    match ictx.seek(seek_ts, ..=seek_ts) {
        Ok(()) => true,
        Err(e) => {
            warn!("[{label}] seek soft-fail at {target_secs:.3}s: {e} — decoding from current position");
            false
        }
    }
}
