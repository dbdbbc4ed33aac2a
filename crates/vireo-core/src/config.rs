// crates/vireo-core/src/config.rs
//
// Engine tunables. Every threshold the pipeline consults lives here with its
// production default; hosts may deserialize a partial override from their own
// settings file. Times are in seconds unless the field name says otherwise.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // ── A/V sync ──────────────────────────────────────────────────────────────
    /// Base drop/hold threshold; the effective threshold per frame is
    /// `max(sync_threshold, frame_duration)`.
    pub sync_threshold: f64,
    /// A frame held longer than this is force-rendered (deadlock guard).
    pub max_frame_hold: f64,
    /// PTS jump larger than this within one epoch is garbage (AVI/FLV guard).
    pub max_video_gap: f64,
    /// Persistent lag beyond this triggers aggressive dropping.
    pub aggressive_drop_drift: f64,
    /// Lag beyond this triggers an immediate hard resync.
    pub hard_resync_drift: f64,
    /// Consecutive drops that trigger a hard resync.
    pub hard_resync_drop_limit: u32,
    /// During hard resync, frames older than `audio_clock - this` are purged.
    pub hard_resync_backlog: f64,

    // ── Queues ────────────────────────────────────────────────────────────────
    /// Frame ring capacity per stream.
    pub frame_queue_capacity: usize,
    /// Video frames kept ahead of the render stage; excess is dropped oldest-first.
    pub video_queue_render_cap: usize,
    /// Frames required in the queue before the first render after start/seek.
    pub jitter_warmup_frames: usize,

    // ── Clocks & watchdogs ────────────────────────────────────────────────────
    /// Audio clock considered stalled after this long without a sink write.
    pub audio_stall_timeout: f64,
    /// Video clock considered stalled after this long without a swap.
    pub video_stall_timeout: f64,
    /// Stall watchdog sampling interval.
    pub stall_check_interval: f64,
    /// Deadline for the first post-seek frame.
    pub seek_deadline: f64,
    /// A post-seek frame qualifies when `pts >= target - seek_tolerance`.
    pub seek_tolerance: f64,

    // ── Interpolation ─────────────────────────────────────────────────────────
    /// Gaps below this are not worth interpolating.
    pub interp_min_gap: f64,
    /// Gaps above this mean the stream is too slow to interpolate (1/15 fps).
    pub interp_max_gap: f64,
    /// Frames to wait after an auto-toggle before toggling again.
    pub interp_hysteresis_frames: u32,

    // ── Speed ─────────────────────────────────────────────────────────────────
    pub speed_min: f64,
    pub speed_max: f64,

    // ── Audio drift compensation ──────────────────────────────────────────────
    /// Nudge the resample ratio when |avg drift| is inside this window…
    pub drift_nudge_min: f64,
    pub drift_nudge_max: f64,
    /// …by this fraction.
    pub drift_nudge_ratio: f64,

    // ── Plumbing ──────────────────────────────────────────────────────────────
    /// Event channel capacity; overflow is dropped with a warning.
    pub event_channel_capacity: usize,
    /// Render loop pacing when no display-driven vsync is available.
    pub vsync_interval: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_threshold:           0.040,
            max_frame_hold:           0.500,
            max_video_gap:            1.000,
            aggressive_drop_drift:    0.150,
            hard_resync_drift:        0.800,
            hard_resync_drop_limit:   5,
            hard_resync_backlog:      0.050,
            frame_queue_capacity:     16,
            video_queue_render_cap:   3,
            jitter_warmup_frames:     2,
            audio_stall_timeout:      0.500,
            video_stall_timeout:      0.700,
            stall_check_interval:     0.500,
            seek_deadline:            1.000,
            seek_tolerance:           0.002,
            interp_min_gap:           0.008,
            interp_max_gap:           1.0 / 15.0,
            interp_hysteresis_frames: 60,
            speed_min:                0.5,
            speed_max:                3.0,
            drift_nudge_min:          0.040,
            drift_nudge_max:          0.100,
            drift_nudge_ratio:        0.002,
            event_channel_capacity:   256,
            vsync_interval:           0.016,
        }
    }
}

impl EngineConfig {
    /// Clamp a host-supplied speed into the engine's supported range.
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        speed.clamp(self.speed_min, self.speed_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let c = EngineConfig::default();
        assert_eq!(c.sync_threshold, 0.040);
        assert_eq!(c.frame_queue_capacity, 16);
        assert_eq!(c.video_queue_render_cap, 3);
        assert_eq!(c.seek_tolerance, 0.002);
        assert_eq!(c.hard_resync_drop_limit, 5);
        assert_eq!(c.seek_deadline, 1.0);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let c: EngineConfig =
            serde_json::from_str(r#"{ "sync_threshold": 0.08, "jitter_warmup_frames": 4 }"#)
                .unwrap();
        assert_eq!(c.sync_threshold, 0.08);
        assert_eq!(c.jitter_warmup_frames, 4);
        assert_eq!(c.max_frame_hold, 0.5);
        assert_eq!(c.event_channel_capacity, 256);
    }

    #[test]
    fn clamp_speed_applies_engine_bounds() {
        let c = EngineConfig::default();
        assert_eq!(c.clamp_speed(0.25), 0.5);
        assert_eq!(c.clamp_speed(10.0), 3.0);
        assert_eq!(c.clamp_speed(1.5), 1.5);
    }
}
