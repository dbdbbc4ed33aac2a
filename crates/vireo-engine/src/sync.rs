// crates/vireo-engine/src/sync.rs
//
// The A/V-sync core: master-clock selection and the per-frame drop/hold/render
// decision. Holds no clocks itself — callers pass in the readings, which keeps
// the policy pure enough to unit test.
//
// Master policy:
//   - no audio stream           → Video master, sync valid immediately
//   - audio stream              → Audio master, invalid until the first
//                                 successful sink write
//   - after seek                → Video master ("video-first") until the first
//                                 post-seek frame is presented, then back to
//                                 Audio if it is healthy. Breaks the AVI/FLV
//                                 chicken-and-egg where audio cannot anchor
//                                 before video shows a keyframe.
//
// Frame policy (late frames drop, early frames hold):
//   garbage pts                 → drop
//   drift < -max(40ms, dur)     → drop, count towards hard resync
//   drift > +max(40ms, dur)     → hold, force-render after 500 ms
//   otherwise                   → render

use std::time::Instant;

use parking_lot::Mutex;
use vireo_core::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Master {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// NaN pts, backward pts, or a > 1 s jump within one epoch.
    Garbage,
    /// Frame is behind the master clock beyond the threshold.
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Render { forced: bool },
    Hold,
    Drop(DropReason),
}

#[derive(Debug)]
struct SyncState {
    master:            Master,
    /// Video-first window after a seek: master pinned to Video.
    master_locked:     bool,
    valid:             bool,
    audio_healthy:     bool,
    recovering:        bool,
    consecutive_drops: u32,
    hold_since:        Option<Instant>,
    last_pts:          f64,
    last_drift:        f64,
}

pub struct SyncCore {
    has_audio:        bool,
    sync_threshold:   f64,
    max_frame_hold:   f64,
    max_video_gap:    f64,
    hard_drift:       f64,
    hard_drop_limit:  u32,
    state:            Mutex<SyncState>,
}

impl SyncCore {
    pub fn new(cfg: &EngineConfig, has_audio: bool) -> Self {
        Self {
            has_audio,
            sync_threshold:  cfg.sync_threshold,
            max_frame_hold:  cfg.max_frame_hold,
            max_video_gap:   cfg.max_video_gap,
            hard_drift:      cfg.hard_resync_drift,
            hard_drop_limit: cfg.hard_resync_drop_limit,
            state: Mutex::new(SyncState {
                master:            if has_audio { Master::Audio } else { Master::Video },
                master_locked:     false,
                valid:             !has_audio,
                audio_healthy:     false,
                recovering:        false,
                consecutive_drops: 0,
                hold_since:        None,
                last_pts:          f64::NAN,
                last_drift:        0.0,
            }),
        }
    }

    pub fn master(&self) -> Master {
        self.state.lock().master
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    pub fn last_drift(&self) -> f64 {
        self.state.lock().last_drift
    }

    /// Pick the authoritative reading from the two clocks.
    pub fn master_now(&self, audio_now: Option<f64>, video_now: Option<f64>) -> Option<f64> {
        match self.state.lock().master {
            Master::Audio => audio_now,
            Master::Video => video_now,
        }
    }

    /// Decide what to do with the frame at the head of the queue.
    pub fn classify(&self, pts: f64, frame_duration: f64, master_now: Option<f64>) -> Verdict {
        let mut s = self.state.lock();

        // Garbage guards first — these frames never touch a clock.
        if pts.is_nan() {
            return Verdict::Drop(DropReason::Garbage);
        }
        if !s.last_pts.is_nan() {
            if pts < s.last_pts - 0.001 {
                return Verdict::Drop(DropReason::Garbage);
            }
            if pts > s.last_pts + self.max_video_gap {
                // Container discontinuity: drop this frame but accept the
                // stream from here, otherwise every successor is garbage too.
                s.last_pts = pts;
                return Verdict::Drop(DropReason::Garbage);
            }
        }

        // No master reading yet (video-first after seek, or audio not
        // anchored): render and let the swap anchor the clock.
        let Some(master) = master_now else {
            return Verdict::Render { forced: false };
        };
        if !s.valid {
            return Verdict::Render { forced: false };
        }

        let threshold = self.sync_threshold.max(frame_duration);
        let drift = pts - master;
        s.last_drift = drift;

        if drift < -threshold {
            s.consecutive_drops += 1;
            if drift < -self.hard_drift || s.consecutive_drops >= self.hard_drop_limit {
                s.recovering = true;
            }
            return Verdict::Drop(DropReason::Late);
        }

        if drift > threshold {
            let since = *s.hold_since.get_or_insert_with(Instant::now);
            if since.elapsed().as_secs_f64() > self.max_frame_hold {
                s.hold_since = None;
                return Verdict::Render { forced: true };
            }
            return Verdict::Hold;
        }

        Verdict::Render { forced: false }
    }

    /// Bookkeeping after a successful swap. Returns true when this present
    /// ended the post-seek video-first window (audio master restored).
    pub fn on_frame_presented(&self, pts: f64) -> bool {
        let mut s = self.state.lock();
        s.last_pts = pts;
        s.consecutive_drops = 0;
        s.hold_since = None;
        s.recovering = false;
        if s.master_locked {
            s.master_locked = false;
            s.valid = true;
            if self.has_audio && s.audio_healthy {
                s.master = Master::Audio;
            }
            return true;
        }
        false
    }

    /// Seek entry: pin the master to Video and invalidate until the first
    /// post-seek frame lands.
    pub fn on_seek_start(&self) {
        let mut s = self.state.lock();
        s.master = Master::Video;
        s.master_locked = true;
        s.valid = false;
        s.last_pts = f64::NAN;
        s.consecutive_drops = 0;
        s.hold_since = None;
        s.recovering = false;
    }

    /// Called by the audio renderer immediately after a successful sink write.
    pub fn on_audio_write(&self) {
        let mut s = self.state.lock();
        s.audio_healthy = true;
        if s.master == Master::Audio {
            s.valid = true;
        }
    }

    /// The sink is undriveable: fall back to Video master permanently.
    pub fn on_audio_dead(&self) {
        let mut s = self.state.lock();
        s.audio_healthy = false;
        s.master = Master::Video;
        s.master_locked = false;
        s.valid = true;
    }

    /// Stall watchdog tripped: drop validity so the scheduler re-anchors.
    pub fn invalidate(&self) {
        self.state.lock().valid = false;
    }

    /// True while a hard resync is pending; the render loop purges the
    /// backlog and the next presented frame clears it.
    pub fn recovering(&self) -> bool {
        self.state.lock().recovering
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(has_audio: bool) -> SyncCore {
        SyncCore::new(&EngineConfig::default(), has_audio)
    }

    #[test]
    fn video_only_files_are_valid_immediately() {
        let s = core(false);
        assert_eq!(s.master(), Master::Video);
        assert!(s.is_valid());
    }

    #[test]
    fn audio_master_needs_a_sink_write() {
        let s = core(true);
        assert_eq!(s.master(), Master::Audio);
        assert!(!s.is_valid());
        s.on_audio_write();
        assert!(s.is_valid());
    }

    #[test]
    fn in_sync_frames_render() {
        let s = core(true);
        s.on_audio_write();
        assert_eq!(
            s.classify(10.000, 0.033, Some(10.010)),
            Verdict::Render { forced: false }
        );
    }

    #[test]
    fn late_frames_drop_early_frames_hold() {
        let s = core(true);
        s.on_audio_write();
        // 100 ms behind the master: drop.
        assert_eq!(s.classify(9.900, 0.033, Some(10.0)), Verdict::Drop(DropReason::Late));
        // 100 ms ahead: hold.
        assert_eq!(s.classify(10.100, 0.033, Some(10.0)), Verdict::Hold);
    }

    #[test]
    fn threshold_grows_with_frame_duration() {
        let s = core(true);
        s.on_audio_write();
        // 60 ms late but the stream runs at 10 fps (100 ms frames): render.
        assert_eq!(
            s.classify(9.940, 0.100, Some(10.0)),
            Verdict::Render { forced: false }
        );
    }

    #[test]
    fn garbage_pts_always_drops() {
        let s = core(true);
        s.on_audio_write();
        assert_eq!(s.classify(f64::NAN, 0.04, Some(1.0)), Verdict::Drop(DropReason::Garbage));
        s.on_frame_presented(5.0);
        // Backward jump.
        assert_eq!(s.classify(4.0, 0.04, Some(5.0)), Verdict::Drop(DropReason::Garbage));
        // Forward jump beyond 1 s drops once, then the stream is accepted.
        assert_eq!(s.classify(7.0, 0.04, Some(5.0)), Verdict::Drop(DropReason::Garbage));
        assert_ne!(s.classify(7.04, 0.04, Some(7.0)), Verdict::Drop(DropReason::Garbage));
    }

    #[test]
    fn five_consecutive_drops_trigger_recovery() {
        let s = core(true);
        s.on_audio_write();
        for i in 0..5 {
            let pts = 1.0 + i as f64 * 0.04;
            assert_eq!(s.classify(pts, 0.04, Some(pts + 0.2)), Verdict::Drop(DropReason::Late));
        }
        assert!(s.recovering());
        s.on_frame_presented(2.0);
        assert!(!s.recovering());
    }

    #[test]
    fn huge_drift_triggers_recovery_at_once() {
        let s = core(true);
        s.on_audio_write();
        assert_eq!(s.classify(1.0, 0.04, Some(2.0)), Verdict::Drop(DropReason::Late));
        assert!(s.recovering());
    }

    #[test]
    fn seek_forces_video_first_then_restores_audio() {
        let s = core(true);
        s.on_audio_write();
        s.on_seek_start();
        assert_eq!(s.master(), Master::Video);
        assert!(!s.is_valid());
        // First post-seek present restores the audio master.
        assert!(s.on_frame_presented(2.5));
        assert_eq!(s.master(), Master::Audio);
        assert!(s.is_valid());
    }

    #[test]
    fn dead_audio_pins_video_master() {
        let s = core(true);
        s.on_audio_write();
        s.on_audio_dead();
        assert_eq!(s.master(), Master::Video);
        assert!(s.is_valid());
        s.on_seek_start();
        s.on_frame_presented(1.0);
        // Audio unhealthy: master stays Video after the seek window too.
        assert_eq!(s.master(), Master::Video);
    }

    #[test]
    fn master_now_follows_selection() {
        let s = core(true);
        assert_eq!(s.master_now(Some(1.0), Some(2.0)), Some(1.0));
        s.on_audio_dead();
        assert_eq!(s.master_now(Some(1.0), Some(2.0)), Some(2.0));
    }

    #[test]
    fn invalid_sync_renders_unconditionally() {
        let s = core(true); // no audio write yet: invalid
        assert_eq!(
            s.classify(99.0, 0.04, Some(1.0)),
            Verdict::Render { forced: false }
        );
    }
}
