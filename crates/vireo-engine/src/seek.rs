// crates/vireo-engine/src/seek.rs
//
// The two-phase seek protocol.
//
// Phase 1 (fast): bump the epoch serial, abort and flush both pipelines,
// reset both clocks, and ask the demuxer for a backward key-frame seek.
// Phase 2 (exact): decoders drop everything before `target - tolerance`; the
// render scheduler presents the first qualifying frame and closes the seek.
//
// Admission is latest-wins: a seek issued while one is in flight parks in the
// pending slot and runs at closure — rapid scrubbing coalesces instead of
// queueing.
//
// The epoch serial and the seek gate are the protocol's only shared state;
// everything else (queue aborts, codec flushes, clock resets) hangs off the
// transitions below.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use vireo_core::PlaybackState;

use crate::engine::Shared;

#[derive(Debug, Clone, Copy)]
pub struct PendingSeek {
    pub target_sec: f64,
    pub exact:      bool,
}

#[derive(Debug)]
pub struct SeekState {
    pub in_progress:            bool,
    pub exact:                  bool,
    /// Set by frame-step prev: closure emits frameStepped, not
    /// firstFrameAfterSeek, and playback stays paused.
    pub step_mode:              bool,
    pub target_sec:             f64,
    /// Demuxer picks this up, performs the container seek, then restarts the
    /// queues.
    pub container_seek_pending: bool,
    /// Epoch serial this seek established.
    pub serial:                 u64,
    /// Latest-wins slot for a seek issued mid-seek.
    pub pending:                Option<PendingSeek>,
    /// Armed for the seek watchdog.
    pub started_at:             Option<Instant>,
    /// The seek gate: closed at admission, reopened at closure.
    pub gate_open:              bool,
    /// State to restore at closure.
    pub resume_to:              PlaybackState,
    /// Position reported to the host until the first post-seek frame.
    pub admission_position_ms:  i64,
}

impl SeekState {
    pub fn new() -> Self {
        Self {
            in_progress:            false,
            exact:                  false,
            step_mode:              false,
            target_sec:             0.0,
            container_seek_pending: false,
            serial:                 0,
            pending:                None,
            started_at:             None,
            gate_open:              true,
            resume_to:              PlaybackState::Paused,
            admission_position_ms:  0,
        }
    }
}

/// Admit a seek. Runs on a host thread; returns immediately.
pub(crate) fn request(shared: &Arc<Shared>, target_sec: f64, exact: bool, step_mode: bool) {
    // Unknown duration (some broken containers) means no upper clamp.
    let upper = if shared.media.duration_sec > 0.0 {
        shared.media.duration_sec
    } else {
        f64::MAX
    };
    let target_sec = target_sec.clamp(0.0, upper);

    {
        let mut seek = shared.seek.lock();
        if seek.in_progress {
            // Latest wins; the in-flight seek finishes first.
            seek.pending = Some(PendingSeek { target_sec, exact });
            info!("seek coalesced: pending target {target_sec:.3}s");
            return;
        }

        let state = shared.state();
        seek.in_progress = true;
        seek.exact = exact;
        seek.step_mode = step_mode;
        seek.target_sec = target_sec;
        seek.container_seek_pending = true;
        seek.pending = None;
        seek.started_at = Some(Instant::now());
        seek.gate_open = false;
        seek.resume_to = match state {
            PlaybackState::Playing | PlaybackState::Buffering => PlaybackState::Playing,
            PlaybackState::Eof if !step_mode => PlaybackState::Playing,
            _ => PlaybackState::Paused,
        };
        seek.admission_position_ms = shared.last_good_position_ms();
        // All in-flight frames become stale from here.
        seek.serial = shared.serial.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
    }

    info!("seek → {target_sec:.3}s exact={exact} step={step_mode}");

    // Video-first window: master pinned to Video until the first post-seek
    // frame lands.
    shared.sync.on_seek_start();

    // Wake every pipeline waiter with failure; decoders park until the
    // demuxer restarts the queues after the container seek.
    shared.video.packets.abort();
    shared.video.frames.abort();
    shared.video.frames.flush();
    *shared.video.first_frame.lock() = None;
    if let Some(audio) = &shared.audio {
        audio.packets.abort();
        audio.frames.abort();
        audio.frames.flush();
        audio.ctrl.pause_and_flush();
        audio.ctrl.finished.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    // The one and only place either clock is reset. They stay inactive until
    // re-anchored by the post-seek swap / sink write.
    shared.video_clock.reset(target_sec);
    shared.audio_clock.reset(target_sec);

    // EOF no longer holds once we rewind.
    shared.eof.store(false, std::sync::atomic::Ordering::SeqCst);
    shared.video.finished.store(false, std::sync::atomic::Ordering::SeqCst);

    if !step_mode {
        shared.set_state(PlaybackState::Seeking);
    }
}

/// Closure: called by the render scheduler right after the first qualifying
/// post-seek swap. `pts` is that frame's presentation time.
pub(crate) fn complete(shared: &Arc<Shared>, pts: f64) {
    let (step_mode, resume_to, pending) = {
        let mut seek = shared.seek.lock();
        if !seek.in_progress {
            return;
        }
        seek.in_progress = false;
        seek.container_seek_pending = false;
        seek.started_at = None;
        seek.gate_open = true;
        (seek.step_mode, seek.resume_to, seek.pending.take())
    };

    shared.store_position(pts);

    if step_mode {
        // Stepped frame is on screen; everything stays frozen around it.
        shared.video_clock.pause(true);
        shared.audio_clock.pause(true);
        shared.emit_frame_stepped(pts);
    } else {
        shared.emit_first_frame_after_seek(pts);
        shared.set_state(resume_to);
        if resume_to == PlaybackState::Playing {
            if let Some(audio) = &shared.audio {
                audio.ctrl.resume();
            }
        } else {
            shared.video_clock.pause(true);
            shared.audio_clock.pause(true);
        }
    }

    if let Some(p) = pending {
        info!("seek closure: running pending target {:.3}s", p.target_sec);
        request(shared, p.target_sec, p.exact, false);
    }
}

/// Seek watchdog timeout: give up on this seek and quiesce.
pub(crate) fn abandon(shared: &Arc<Shared>) {
    {
        let mut seek = shared.seek.lock();
        if !seek.in_progress {
            return;
        }
        warn!(
            "seek abandoned: no frame within deadline (target {:.3}s)",
            seek.target_sec
        );
        seek.in_progress = false;
        seek.container_seek_pending = false;
        seek.started_at = None;
        seek.pending = None;
    }
    // Let the pipeline run again so a later seek can still recover it.
    shared.video.packets.reset_abort();
    shared.video.frames.reset_abort();
    if let Some(audio) = &shared.audio {
        audio.packets.reset_abort();
        audio.frames.reset_abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_open_gate_and_no_seek() {
        let s = SeekState::new();
        assert!(!s.in_progress);
        assert!(s.gate_open);
        assert!(s.pending.is_none());
    }
}
