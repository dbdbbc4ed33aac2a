// crates/vireo-engine/src/frame_queue.rs
//
// Ring of decoded frames between a decoder and its renderer. Push blocks on
// full — that blocking IS the decode-side backpressure. Each entry carries
// the pts (possibly synthesised) and the epoch serial under which it was
// decoded, so the consumer can discard stale in-flight work after a seek.
//
// Synthetic PTS: AVI and FLV routinely ship B-frames without timestamps.
// A missing pts becomes last_pts + estimated_frame_duration (first frame: 0),
// and the estimate is re-learned from every sane observed delta. Without
// this the scheduler would wait forever on a NaN frame.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// 25 fps until the stream teaches us otherwise.
const DEFAULT_FRAME_DURATION: f64 = 0.04;

#[derive(Debug)]
pub struct QueuedFrame<F> {
    pub frame:  F,
    pub pts:    f64,
    pub serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

struct Inner<F> {
    slots:          VecDeque<QueuedFrame<F>>,
    aborted:        bool,
    last_pts:       f64, // NAN until the first push of an epoch
    frame_duration: f64,
    synthetic_count: u64,
}

pub struct FrameQueue<F> {
    inner:    Mutex<Inner<F>>,
    cond:     Condvar,
    capacity: usize,
}

impl<F> FrameQueue<F> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots:           VecDeque::with_capacity(capacity),
                aborted:         false,
                last_pts:        f64::NAN,
                frame_duration:  DEFAULT_FRAME_DURATION,
                synthetic_count: 0,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Append one frame, blocking while the ring is full. A missing/NaN `pts`
    /// is synthesised; sane observed deltas update the duration estimate.
    pub fn push(&self, frame: F, pts: Option<f64>, serial: u64) -> Result<(), Aborted> {
        let mut q = self.inner.lock().unwrap();
        while q.slots.len() >= self.capacity && !q.aborted {
            q = self.cond.wait(q).unwrap();
        }
        if q.aborted {
            return Err(Aborted);
        }

        let pts = match pts.filter(|p| p.is_finite()) {
            Some(p) => p,
            None => {
                q.synthetic_count += 1;
                if q.last_pts.is_nan() {
                    0.0
                } else {
                    q.last_pts + q.frame_duration
                }
            }
        };

        if !q.last_pts.is_nan() && pts > q.last_pts {
            let delta = pts - q.last_pts;
            if delta > 0.0 && delta < 1.0 {
                q.frame_duration = delta;
            }
        }
        q.last_pts = pts;

        q.slots.push_back(QueuedFrame { frame, pts, serial });
        self.cond.notify_all();
        Ok(())
    }

    /// Borrow the front frame (and the one behind it) under the queue lock.
    /// Returns None when the queue is empty or aborted. The closure must not
    /// call back into the queue.
    pub fn with_front<R>(
        &self,
        f: impl FnOnce(&QueuedFrame<F>, Option<&QueuedFrame<F>>) -> R,
    ) -> Option<R> {
        let q = self.inner.lock().unwrap();
        if q.aborted || q.slots.is_empty() {
            return None;
        }
        Some(f(&q.slots[0], q.slots.get(1)))
    }

    /// Release the front frame and wake a blocked producer.
    pub fn advance(&self) {
        let mut q = self.inner.lock().unwrap();
        if q.slots.pop_front().is_some() {
            self.cond.notify_all();
        }
    }

    /// Remove the front frame without presentation bookkeeping (render-stage
    /// backpressure and hard resync).
    pub fn drop_oldest(&self) -> bool {
        let mut q = self.inner.lock().unwrap();
        let dropped = q.slots.pop_front().is_some();
        if dropped {
            self.cond.notify_all();
        }
        dropped
    }

    /// Blocking pop — used by consumers that own the frame afterwards
    /// (the audio renderer; the render scheduler peeks instead).
    pub fn pop(&self) -> Result<QueuedFrame<F>, Aborted> {
        let mut q = self.inner.lock().unwrap();
        loop {
            if q.aborted {
                return Err(Aborted);
            }
            if let Some(slot) = q.slots.pop_front() {
                self.cond.notify_all();
                return Ok(slot);
            }
            q = self.cond.wait(q).unwrap();
        }
    }

    /// Drop everything and reset the synthetic-PTS state for the next epoch.
    pub fn flush(&self) {
        let mut q = self.inner.lock().unwrap();
        q.slots.clear();
        q.last_pts = f64::NAN;
        self.cond.notify_all();
    }

    pub fn abort(&self) {
        let mut q = self.inner.lock().unwrap();
        q.aborted = true;
        self.cond.notify_all();
    }

    pub fn reset_abort(&self) {
        let mut q = self.inner.lock().unwrap();
        q.aborted = false;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().unwrap().slots.len() >= self.capacity
    }

    /// Learned inter-frame spacing; frame-step prev and the sync threshold use it.
    pub fn estimated_frame_duration(&self) -> f64 {
        self.inner.lock().unwrap().frame_duration
    }

    /// How many frames have needed a synthesised pts (diagnostics).
    pub fn synthetic_count(&self) -> u64 {
        self.inner.lock().unwrap().synthetic_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn synthetic_pts_first_frame_is_zero() {
        let q = FrameQueue::new(4);
        q.push((), None, 0).unwrap();
        assert_eq!(q.with_front(|f, _| f.pts).unwrap(), 0.0);
        assert_eq!(q.synthetic_count(), 1);
    }

    #[test]
    fn synthetic_pts_extends_from_last() {
        let q = FrameQueue::new(8);
        q.push((), Some(1.00), 0).unwrap();
        q.push((), Some(1.04), 0).unwrap(); // teaches 40 ms spacing
        q.push((), None, 0).unwrap();       // -> 1.08
        q.advance();
        q.advance();
        let pts = q.with_front(|f, _| f.pts).unwrap();
        assert!((pts - 1.08).abs() < 1e-9);
    }

    #[test]
    fn duration_estimate_ignores_insane_deltas() {
        let q = FrameQueue::new(8);
        q.push((), Some(0.0), 0).unwrap();
        q.push((), Some(5.0), 0).unwrap();  // 5 s jump: not a frame duration
        q.push((), None, 0).unwrap();       // synthesised from default 40 ms
        q.advance();
        q.advance();
        let pts = q.with_front(|f, _| f.pts).unwrap();
        assert!((pts - 5.04).abs() < 1e-9);
    }

    #[test]
    fn nan_pts_counts_as_missing() {
        let q = FrameQueue::new(4);
        q.push((), Some(f64::NAN), 0).unwrap();
        assert_eq!(q.with_front(|f, _| f.pts).unwrap(), 0.0);
    }

    #[test]
    fn flush_resets_last_pts() {
        let q = FrameQueue::new(4);
        q.push((), Some(9.0), 0).unwrap();
        q.flush();
        q.push((), None, 1).unwrap();
        assert_eq!(q.with_front(|f, _| f.pts).unwrap(), 0.0);
    }

    #[test]
    fn push_blocks_on_full_until_advance() {
        let q = Arc::new(FrameQueue::new(2));
        q.push(1, Some(0.0), 0).unwrap();
        q.push(2, Some(0.04), 0).unwrap();

        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || q2.push(3, Some(0.08), 0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 2); // still blocked
        q.advance();
        producer.join().unwrap().unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn abort_unblocks_full_push() {
        let q = Arc::new(FrameQueue::new(1));
        q.push((), Some(0.0), 0).unwrap();
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || q2.push((), Some(0.04), 0));
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert_eq!(producer.join().unwrap(), Err(Aborted));
    }

    #[test]
    fn serial_travels_with_the_frame() {
        let q = FrameQueue::new(4);
        q.push((), Some(0.0), 3).unwrap();
        q.push((), Some(0.04), 4).unwrap();
        assert_eq!(q.with_front(|f, next| (f.serial, next.unwrap().serial)).unwrap(), (3, 4));
    }

    #[test]
    fn presentation_order_is_non_decreasing_with_gaps() {
        // Every third pts missing: presented order must stay sorted (P9).
        let q = FrameQueue::new(64);
        let mut produced = Vec::new();
        for i in 0..30 {
            let pts = if i % 3 == 2 { None } else { Some(i as f64 * 0.04) };
            q.push((), pts, 0).unwrap();
        }
        while let Some(pts) = q.with_front(|f, _| f.pts) {
            produced.push(pts);
            q.advance();
        }
        for w in produced.windows(2) {
            assert!(w[1] >= w[0], "pts regressed: {w:?}");
        }
    }
}
