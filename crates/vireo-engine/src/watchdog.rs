// crates/vireo-engine/src/watchdog.rs
//
// Two supervisory timers.
//
// Stall watchdog: while Playing with a first frame on screen and no EOF, the
// master clock must keep advancing. Half a second of silence means the
// pipeline wedged somewhere below us — invalidate sync, latch CLOCK_STALL,
// quiesce.
//
// Seek watchdog: a seek that produces no presented frame within its deadline
// is abandoned with SEEK_FRAME_ASSERT_FAILED rather than left holding the
// gate closed forever.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::warn;
use vireo_core::{PlaybackMode, PlaybackState, PlayerError};

use crate::engine::Shared;
use crate::seek;

const STALL_POLL: Duration = Duration::from_millis(100);
const SEEK_POLL: Duration = Duration::from_millis(50);

/// Tracks whether a clock reading is still moving.
pub struct AdvanceTracker {
    last_value:   Option<f64>,
    last_advance: Instant,
}

impl AdvanceTracker {
    pub fn new() -> Self {
        Self {
            last_value:   None,
            last_advance: Instant::now(),
        }
    }

    /// Feed a reading; returns seconds since the value last moved forward.
    /// A None reading (clock not yet anchored) resets the timer — an idle
    /// clock is not a stalled clock.
    pub fn note(&mut self, reading: Option<f64>) -> f64 {
        match (reading, self.last_value) {
            (None, _) => {
                self.last_value = None;
                self.last_advance = Instant::now();
                0.0
            }
            (Some(v), None) => {
                self.last_value = Some(v);
                self.last_advance = Instant::now();
                0.0
            }
            (Some(v), Some(prev)) => {
                if v > prev + 0.001 {
                    self.last_value = Some(v);
                    self.last_advance = Instant::now();
                }
                self.last_advance.elapsed().as_secs_f64()
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_value = None;
        self.last_advance = Instant::now();
    }
}

pub(crate) fn spawn_stall(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-stall-wd".into())
        .spawn(move || {
            let mut tracker = AdvanceTracker::new();
            while !shared.shutdown.load(Ordering::SeqCst) {
                thread::sleep(STALL_POLL);

                // Backgrounding freezes the video clock by design. When that
                // clock is also the master (video-only file, or audio already
                // dead), the freeze is intentional and not a stall.
                let backgrounded_video_master = *shared.mode.lock()
                    == PlaybackMode::AudioOnly
                    && shared.sync.master() == crate::sync::Master::Video;

                let armed = shared.state() == PlaybackState::Playing
                    && shared.video.first_frame_rendered.load(Ordering::SeqCst)
                    && !shared.eof.load(Ordering::SeqCst)
                    && !backgrounded_video_master
                    && !shared.seek.lock().in_progress;
                if !armed {
                    tracker.reset();
                    continue;
                }

                let stalled_for = tracker.note(shared.master_now());
                if stalled_for > shared.cfg.stall_check_interval {
                    warn!("master clock stalled for {stalled_for:.3}s");
                    shared.sync.invalidate();
                    shared.latch_error(PlayerError::ClockStall);
                    tracker.reset();
                }
            }
        })
        .expect("spawn stall watchdog")
}

pub(crate) fn spawn_seek(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-seek-wd".into())
        .spawn(move || {
            while !shared.shutdown.load(Ordering::SeqCst) {
                thread::sleep(SEEK_POLL);

                // Before the gate opens nothing can present a frame; the
                // deadline starts counting once rendering is possible.
                if !shared.gate.open.load(Ordering::SeqCst) {
                    let mut s = shared.seek.lock();
                    if s.in_progress {
                        s.started_at = Some(Instant::now());
                    }
                    continue;
                }
                let overdue = {
                    let s = shared.seek.lock();
                    match (s.in_progress, s.started_at) {
                        (true, Some(at)) => {
                            at.elapsed().as_secs_f64() > shared.cfg.seek_deadline
                        }
                        _ => false,
                    }
                };
                if overdue {
                    seek::abandon(&shared);
                    shared.latch_error(PlayerError::SeekDeadlock);
                }
            }
        })
        .expect("spawn seek watchdog")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_clock_never_reports_stall() {
        let mut t = AdvanceTracker::new();
        for i in 0..10 {
            let stalled = t.note(Some(i as f64 * 0.1));
            assert!(stalled < 0.05, "advancing clock reported {stalled}");
        }
    }

    #[test]
    fn frozen_clock_accumulates_stall_time() {
        let mut t = AdvanceTracker::new();
        t.note(Some(1.0));
        thread::sleep(Duration::from_millis(60));
        let stalled = t.note(Some(1.0));
        assert!(stalled >= 0.05, "frozen clock reported only {stalled}");
    }

    #[test]
    fn unanchored_clock_is_idle_not_stalled() {
        let mut t = AdvanceTracker::new();
        t.note(Some(1.0));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(t.note(None), 0.0);
        // Re-anchoring starts fresh.
        assert!(t.note(Some(5.0)) < 0.05);
    }

    #[test]
    fn tiny_jitter_below_tolerance_counts_as_frozen() {
        let mut t = AdvanceTracker::new();
        t.note(Some(1.0));
        thread::sleep(Duration::from_millis(30));
        let stalled = t.note(Some(1.0005)); // under the 1 ms tolerance
        assert!(stalled >= 0.02);
    }
}
