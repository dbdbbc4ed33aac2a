// crates/vireo-engine/src/demux.rs
//
// The demuxer thread: owns the container context, reads packets and routes
// them to the per-stream queues. It idles until the AVSync gate opens (the
// surface must be live before any decode work starts), executes container
// seeks on behalf of the seek controller (the context lives on this thread),
// and latches EOF into the queues when the file runs out.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use log::{debug, info, warn};
use vireo_core::PlayerError;

use crate::engine::Shared;
use crate::helpers::seek::seek_backward;

/// Gate poll interval while waiting for the surface.
const GATE_POLL: Duration = Duration::from_millis(1);

pub(crate) fn spawn(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-demux".into())
        .spawn(move || run(shared))
        .expect("spawn demux thread")
}

fn run(shared: Arc<Shared>) {
    let mut ictx = match input(&shared.media.path) {
        Ok(ctx) => ctx,
        Err(e) => {
            // prepare() already opened this file once; a failure here is a
            // race with deletion, not a bad path.
            shared.latch_error(PlayerError::OpenFailed(format!(
                "demux reopen '{}': {e}",
                shared.media.path.display()
            )));
            return;
        }
    };

    info!("demux loop started ({})", shared.media.container);
    let video_idx = shared.media.video_stream;
    let audio_idx = shared.media.audio_stream;

    while !shared.shutdown.load(Ordering::SeqCst) {
        // Container seeks run here (the context is not shared) — even while
        // the gate is closed, so a pre-attach seek is already positioned when
        // the surface arrives.
        if take_container_seek(&shared, &mut ictx) {
            continue;
        }

        // The pipeline stays dark until the render thread has bound the
        // surface and done its dummy swap.
        if !shared.gate.open.load(Ordering::SeqCst) {
            thread::sleep(GATE_POLL);
            continue;
        }

        if shared.eof.load(Ordering::SeqCst) {
            // Drained; wait for a seek to rewind us or for shutdown.
            thread::sleep(GATE_POLL);
            continue;
        }

        match ictx.packets().next() {
            Some(Ok((stream, packet))) => {
                let idx = stream.index();
                if idx == video_idx {
                    // Push only fails while a seek holds the queues aborted;
                    // the packet belongs to the dying epoch anyway.
                    let _ = shared.video.packets.push(packet);
                } else if Some(idx) == audio_idx {
                    if let Some(audio) = &shared.audio {
                        let _ = audio.packets.push(packet);
                    }
                }
            }
            Some(Err(e)) => {
                // Transient read error: skip the packet, keep demuxing.
                warn!("demux read error: {e}");
                thread::sleep(GATE_POLL);
            }
            None => {
                info!("demux EOF");
                shared.eof.store(true, Ordering::SeqCst);
                shared.video.packets.finish();
                if let Some(audio) = &shared.audio {
                    audio.packets.finish();
                }
            }
        }
    }

    info!("demux loop finished");
}

/// Execute a pending container seek and restart the pipelines.
/// Returns true when a seek was handled this iteration.
fn take_container_seek(shared: &Arc<Shared>, ictx: &mut ffmpeg::format::context::Input) -> bool {
    let target = {
        let mut seek = shared.seek.lock();
        if !seek.container_seek_pending {
            return false;
        }
        seek.container_seek_pending = false;
        seek.target_sec
    };

    // Always a backward key-frame seek; the exact phase lands on the target
    // by decode-and-drop downstream. AVI/FLV only have keyframe indexes so
    // backward is the only option there anyway.
    seek_backward(ictx, target, "demux");
    debug!("container seek done, restarting queues at {target:.3}s");

    // Restart: drop every stale packet/frame, clear the abort flags, and let
    // the decoders (parked on Aborted) flush their codecs and resume.
    shared.video.packets.flush();
    shared.video.packets.reset_abort();
    shared.video.frames.flush();
    shared.video.frames.reset_abort();
    if let Some(audio) = &shared.audio {
        audio.packets.flush();
        audio.packets.reset_abort();
        audio.frames.flush();
        audio.frames.reset_abort();
    }

    true
}
