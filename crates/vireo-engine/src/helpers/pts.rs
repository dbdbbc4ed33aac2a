// crates/vireo-engine/src/helpers/pts.rs
//
// Timestamp plumbing shared by the decoders, the preview extractor and the
// frame-step path. The fallback chain matters: broken containers (AVI, FLV)
// routinely ship frames whose pts is absent, and best_effort_timestamp is
// FFmpeg's own reconstruction from dts and frame ordering.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::util::rational::Rational;

/// Seconds per unit of `tb`.
pub fn tb_to_secs(tb: Rational) -> f64 {
    if tb.denominator() == 0 {
        return 0.0;
    }
    tb.numerator() as f64 / tb.denominator() as f64
}

/// Convert a seconds position into a stream-timebase timestamp.
pub fn secs_to_ts(secs: f64, tb: Rational) -> i64 {
    if tb.numerator() == 0 {
        return 0;
    }
    (secs * tb.denominator() as f64 / tb.numerator() as f64) as i64
}

/// Best-available pts of a decoded video frame, in seconds.
///
/// Chain: frame pts → best_effort_timestamp → None (the frame queue will
/// synthesise from its duration estimate).
pub fn video_frame_pts(frame: &ffmpeg::util::frame::video::Video, tb: Rational) -> Option<f64> {
    let unit = tb_to_secs(tb);
    frame
        .pts()
        .or_else(|| frame.timestamp())
        .map(|ts| ts as f64 * unit)
        .filter(|p| p.is_finite())
}

/// Best-available pts of a decoded audio frame, in seconds.
pub fn audio_frame_pts(frame: &ffmpeg::util::frame::audio::Audio, tb: Rational) -> Option<f64> {
    let unit = tb_to_secs(tb);
    frame
        .pts()
        .or_else(|| frame.timestamp())
        .map(|ts| ts as f64 * unit)
        .filter(|p| p.is_finite())
}

/// Frame-rate guess for index-based pts synthesis when a stream carries no
/// timestamps at all. 25 fps is the historical container default.
pub fn fps_or_default(rate: Rational) -> f64 {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        25.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_round_trip() {
        let tb = Rational::new(1, 90000);
        assert_eq!(secs_to_ts(2.5, tb), 225_000);
        assert!((tb_to_secs(tb) * 225_000.0 - 2.5).abs() < 1e-9);
    }

    #[test]
    fn zero_denominator_is_harmless() {
        assert_eq!(tb_to_secs(Rational::new(1, 0)), 0.0);
        assert_eq!(secs_to_ts(1.0, Rational::new(0, 1)), 0);
    }

    #[test]
    fn fps_guess_defaults_to_25() {
        assert_eq!(fps_or_default(Rational::new(0, 1)), 25.0);
        assert_eq!(fps_or_default(Rational::new(30, 1)), 30.0);
        assert!((fps_or_default(Rational::new(30000, 1001)) - 29.97).abs() < 0.01);
    }
}
