// crates/vireo-engine/src/clock.rs
//
// A pts-anchored monotonic clock. Two instances exist per engine: the audio
// clock (anchored after every successful sink write) and the video clock
// (anchored after every successful surface swap). Nothing else may write
// either one.
//
// While active and unpaused:
//   now() = pts + (wall - last_updated) * speed - latency
//
// Every mutator re-anchors (pts, last_updated) to the current wall time so
// pause/resume and speed changes never produce an observable jump.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct ClockState {
    pts:          f64,
    last_updated: Instant,
    active:       bool,
    paused:       bool,
    speed:        f64,
    latency:      f64,
}

#[derive(Debug)]
pub struct Clock {
    state:     Mutex<ClockState>,
    speed_min: f64,
    speed_max: f64,
}

impl Clock {
    pub fn new(speed_min: f64, speed_max: f64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                pts:          f64::NAN,
                last_updated: Instant::now(),
                active:       false,
                paused:       false,
                speed:        1.0,
                latency:      0.0,
            }),
            speed_min,
            speed_max,
        }
    }

    /// Anchor the clock at `pts` (the single-writer call sites: post-swap,
    /// post-sink-write).
    pub fn set(&self, pts: f64) {
        let mut s = self.state.lock();
        s.pts = pts;
        s.last_updated = Instant::now();
        s.active = true;
    }

    /// Move the clock for a seek: keeps speed, drops the anchor. The clock
    /// stays inactive until the first post-seek `set` — in between, readers
    /// see None and the scheduler runs video-first.
    pub fn reset(&self, pts: f64) {
        let mut s = self.state.lock();
        s.pts = pts;
        s.last_updated = Instant::now();
        s.active = false;
        s.paused = false;
    }

    /// Current clock reading; None while inactive.
    pub fn now(&self) -> Option<f64> {
        let s = self.state.lock();
        if !s.active || s.pts.is_nan() {
            return None;
        }
        let pts = if s.paused {
            s.pts
        } else {
            s.pts + s.last_updated.elapsed().as_secs_f64() * s.speed
        };
        Some(pts - s.latency)
    }

    /// Capture-on-pause: freezes `now()` at its current value so resume
    /// continues seamlessly.
    pub fn pause(&self, pause: bool) {
        let mut s = self.state.lock();
        if pause == s.paused {
            return;
        }
        if pause && s.active {
            let elapsed = s.last_updated.elapsed().as_secs_f64() * s.speed;
            s.pts += elapsed;
        }
        s.last_updated = Instant::now();
        s.paused = pause;
    }

    /// Change playback rate without a jump: the accumulated time under the
    /// old speed is folded into pts first.
    pub fn set_speed(&self, speed: f64) {
        let speed = speed.clamp(self.speed_min, self.speed_max);
        let mut s = self.state.lock();
        if s.active && !s.paused {
            let elapsed = s.last_updated.elapsed().as_secs_f64() * s.speed;
            s.pts += elapsed;
            s.last_updated = Instant::now();
        }
        s.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn set_latency(&self, latency: f64) {
        self.state.lock().latency = latency;
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Wall seconds since the last anchoring `set`; None if never anchored.
    /// The watchdogs use this for stall detection.
    pub fn seconds_since_set(&self) -> Option<f64> {
        let s = self.state.lock();
        if !s.active {
            return None;
        }
        Some(s.last_updated.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn clock() -> Clock {
        Clock::new(0.5, 3.0)
    }

    #[test]
    fn inactive_until_first_set() {
        let c = clock();
        assert_eq!(c.now(), None);
        c.set(1.5);
        assert!(c.now().unwrap() >= 1.5);
    }

    #[test]
    fn advances_with_wall_time() {
        let c = clock();
        c.set(10.0);
        sleep(Duration::from_millis(60));
        let now = c.now().unwrap();
        assert!(now >= 10.05 && now < 10.5, "now = {now}");
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let c = clock();
        c.set(5.0);
        sleep(Duration::from_millis(30));
        c.pause(true);
        let frozen = c.now().unwrap();
        sleep(Duration::from_millis(60));
        let still = c.now().unwrap();
        assert!((still - frozen).abs() < 0.002, "paused clock moved: {frozen} -> {still}");

        c.pause(false);
        sleep(Duration::from_millis(30));
        let resumed = c.now().unwrap();
        // No jump: resumed reading is close to frozen + sleep, never frozen + pause gap.
        assert!(resumed > still && resumed < still + 0.2);
    }

    #[test]
    fn speed_change_has_no_jump() {
        let c = clock();
        c.set(0.0);
        sleep(Duration::from_millis(40));
        let before = c.now().unwrap();
        c.set_speed(2.0);
        let after = c.now().unwrap();
        assert!((after - before).abs() < 0.01, "jump on set_speed: {before} -> {after}");
        sleep(Duration::from_millis(50));
        // Roughly double rate from here on.
        assert!(c.now().unwrap() - after > 0.08);
    }

    #[test]
    fn speed_is_clamped_and_restorable() {
        let c = clock();
        c.set_speed(10.0);
        assert_eq!(c.speed(), 3.0);
        c.set_speed(0.1);
        assert_eq!(c.speed(), 0.5);
        c.set_speed(1.0);
        assert_eq!(c.speed(), 1.0);
    }

    #[test]
    fn reset_keeps_speed_but_deactivates() {
        let c = clock();
        c.set(4.0);
        c.set_speed(2.0);
        c.reset(9.0);
        assert_eq!(c.now(), None);
        assert_eq!(c.speed(), 2.0);
        c.set(9.0);
        assert!(c.now().unwrap() >= 9.0);
    }

    #[test]
    fn latency_biases_the_reading() {
        let c = clock();
        c.set(2.0);
        c.pause(true);
        let base = c.now().unwrap();
        c.set_latency(0.1);
        let biased = c.now().unwrap();
        assert!((base - biased - 0.1).abs() < 0.002);
    }

    #[test]
    fn monotone_within_epoch() {
        // P1: successive samples never regress beyond measurement tolerance.
        let c = clock();
        c.set(0.0);
        let mut last = c.now().unwrap();
        for i in 0..50 {
            if i == 20 {
                c.set_speed(1.5);
            }
            if i == 35 {
                c.pause(true);
                c.pause(false);
            }
            let now = c.now().unwrap();
            assert!(now >= last - 0.001, "regression at {i}: {last} -> {now}");
            last = now;
        }
    }
}
