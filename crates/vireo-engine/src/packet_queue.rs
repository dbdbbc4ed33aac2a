// crates/vireo-engine/src/packet_queue.rs
//
// Thread-safe FIFO of compressed packets, one per stream. The demuxer pushes,
// exactly one decoder pops. Abort wakes every waiter with failure; reset_abort
// re-arms the queue after a seek. A byte counter is kept for diagnostics only
// — the queue has no capacity cap (the frame queue downstream provides the
// real backpressure).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Anything with a payload size. Lets the queue count bytes without knowing
/// about FFmpeg.
pub trait ByteSized {
    fn byte_size(&self) -> usize;
}

impl ByteSized for ffmpeg_the_third::Packet {
    fn byte_size(&self) -> usize {
        self.size()
    }
}

/// Why a pop returned without a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// abort() was called; the consumer should park until reset_abort.
    Aborted,
    /// The producer finished and the queue has drained (EOF).
    Finished,
    /// Non-blocking pop found nothing.
    Empty,
}

struct Inner<P> {
    packets:  VecDeque<P>,
    bytes:    usize,
    aborted:  bool,
    finished: bool,
}

pub struct PacketQueue<P> {
    inner: Mutex<Inner<P>>,
    cond:  Condvar,
}

impl<P: ByteSized> PacketQueue<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                packets:  VecDeque::new(),
                bytes:    0,
                aborted:  false,
                finished: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// FIFO append. Fails (dropping the packet) when the queue is aborted.
    pub fn push(&self, packet: P) -> Result<(), PopError> {
        let mut q = self.inner.lock().unwrap();
        if q.aborted {
            return Err(PopError::Aborted);
        }
        q.bytes += packet.byte_size();
        q.packets.push_back(packet);
        self.cond.notify_one();
        Ok(())
    }

    /// Blocking pop: waits for a packet, abort, or EOF.
    pub fn pop(&self) -> Result<P, PopError> {
        let mut q = self.inner.lock().unwrap();
        loop {
            if q.aborted {
                return Err(PopError::Aborted);
            }
            if let Some(p) = q.packets.pop_front() {
                q.bytes -= p.byte_size();
                return Ok(p);
            }
            if q.finished {
                return Err(PopError::Finished);
            }
            q = self.cond.wait(q).unwrap();
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Result<P, PopError> {
        let mut q = self.inner.lock().unwrap();
        if q.aborted {
            return Err(PopError::Aborted);
        }
        match q.packets.pop_front() {
            Some(p) => {
                q.bytes -= p.byte_size();
                Ok(p)
            }
            None if q.finished => Err(PopError::Finished),
            None => Err(PopError::Empty),
        }
    }

    /// Drop every queued packet atomically and wake consumers (they re-check
    /// the abort flag and either fail out or wait for fresh data).
    pub fn flush(&self) {
        let mut q = self.inner.lock().unwrap();
        q.packets.clear();
        q.bytes = 0;
        q.finished = false;
        self.cond.notify_all();
    }

    /// Wake every waiter with failure. Queued packets stay until flush.
    pub fn abort(&self) {
        let mut q = self.inner.lock().unwrap();
        q.aborted = true;
        self.cond.notify_all();
    }

    /// Re-arm after a seek: clears both abort and EOF.
    pub fn reset_abort(&self) {
        let mut q = self.inner.lock().unwrap();
        q.aborted = false;
        q.finished = false;
        self.cond.notify_all();
    }

    /// Producer-side EOF: consumers drain the remainder, then get Finished.
    pub fn finish(&self) {
        let mut q = self.inner.lock().unwrap();
        q.finished = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently queued (diagnostics).
    pub fn bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct Fake(usize);
    impl ByteSized for Fake {
        fn byte_size(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn fifo_order_and_byte_accounting() {
        let q = PacketQueue::new();
        q.push(Fake(10)).unwrap();
        q.push(Fake(20)).unwrap();
        assert_eq!(q.bytes(), 30);
        assert_eq!(q.pop().unwrap().0, 10);
        assert_eq!(q.bytes(), 20);
        assert_eq!(q.pop().unwrap().0, 20);
        assert_eq!(q.bytes(), 0);
        assert_eq!(q.try_pop().unwrap_err(), PopError::Empty);
    }

    #[test]
    fn abort_wakes_blocked_consumer() {
        let q = Arc::new(PacketQueue::<Fake>::new());
        let q2 = Arc::clone(&q);
        let h = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert_eq!(h.join().unwrap().unwrap_err(), PopError::Aborted);
    }

    #[test]
    fn finish_drains_then_reports_eof() {
        let q = PacketQueue::new();
        q.push(Fake(1)).unwrap();
        q.finish();
        assert!(q.pop().is_ok());
        assert_eq!(q.pop().unwrap_err(), PopError::Finished);
    }

    #[test]
    fn reset_abort_rearms_the_queue() {
        let q = PacketQueue::new();
        q.abort();
        assert!(q.push(Fake(1)).is_err());
        q.reset_abort();
        q.push(Fake(2)).unwrap();
        assert_eq!(q.pop().unwrap().0, 2);
    }

    #[test]
    fn flush_clears_packets_and_signals() {
        let q = PacketQueue::new();
        q.push(Fake(5)).unwrap();
        q.push(Fake(5)).unwrap();
        q.flush();
        assert_eq!(q.len(), 0);
        assert_eq!(q.bytes(), 0);
    }

    #[test]
    fn producer_consumer_hand_off() {
        let q = Arc::new(PacketQueue::<Fake>::new());
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || {
            let mut total = 0;
            while let Ok(p) = q2.pop() {
                total += p.0;
            }
            total
        });
        for _ in 0..100 {
            q.push(Fake(1)).unwrap();
        }
        q.finish();
        assert_eq!(consumer.join().unwrap(), 100);
    }
}
