// crates/vireo-engine/src/decode.rs
//
// Decoder threads, one per media stream. Each owns its codec context
// (constructed from a private Input opened just for the parameters — the
// demuxer keeps the real one), pulls from its packet queue and pushes decoded
// frames into its frame queue stamped with the epoch serial current at
// decode time.
//
// Seek interaction: the controller aborts the queues; a decoder parked on
// Aborted waits for the demuxer's restart, flushes its codec, and resumes.
// Frames decoded under a dead serial are dropped by the consumers; during an
// exact seek the video decoder additionally drops everything before the
// target so the render queue never fills with pre-roll.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use log::{debug, info, warn};
use vireo_core::PlayerError;

use crate::engine::Shared;
use crate::helpers::pts::{audio_frame_pts, video_frame_pts};
use crate::packet_queue::PopError;

const PARK_POLL: Duration = Duration::from_millis(1);

pub(crate) fn spawn_video(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-vdec".into())
        .spawn(move || {
            if let Err(e) = run_video(&shared) {
                shared.latch_error(PlayerError::DecodeFailed(format!("video: {e}")));
            }
        })
        .expect("spawn video decode thread")
}

pub(crate) fn spawn_audio(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-adec".into())
        .spawn(move || {
            if let Err(e) = run_audio(&shared) {
                // A broken audio decoder degrades to video-master playback;
                // it does not kill the engine.
                warn!("audio decoder failed: {e}");
                shared.sync.on_audio_dead();
                if let Some(audio) = &shared.audio {
                    audio.ctrl.mark_dead(&shared.events);
                }
            }
        })
        .expect("spawn audio decode thread")
}

/// Build a decoder from the stream's parameters using a throwaway context.
fn open_decoder(
    shared: &Shared,
    stream_idx: usize,
) -> anyhow::Result<ffmpeg::codec::context::Context> {
    let ictx = input(&shared.media.path)?;
    let stream = ictx
        .stream(stream_idx)
        .ok_or_else(|| anyhow::anyhow!("stream {stream_idx} gone"))?;
    Ok(ffmpeg::codec::context::Context::from_parameters(
        stream.parameters(),
    )?)
}

// ── Video ─────────────────────────────────────────────────────────────────────

fn run_video(shared: &Arc<Shared>) -> anyhow::Result<()> {
    let mut decoder = open_decoder(shared, shared.media.video_stream)?
        .decoder()
        .video()?;
    let tb = shared.media.video_tb;
    info!(
        "video decode loop started ({}x{})",
        decoder.width(),
        decoder.height()
    );

    let mut drained = false;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match shared.video.packets.pop() {
            Ok(packet) => {
                drained = false;
                let serial = shared.serial.load(Ordering::SeqCst);
                if decoder.send_packet(&packet).is_err() {
                    // One bad packet is not an error condition; skip it.
                    continue;
                }
                let mut frame = ffmpeg::util::frame::video::Video::empty();
                while decoder.receive_frame(&mut frame).is_ok() {
                    let pts = video_frame_pts(&frame, tb);

                    if let Some(p) = pts {
                        if drop_for_exact_seek(shared, p) {
                            continue;
                        }
                    }

                    // Park the first ever decoded frame so very short files
                    // cannot lose it before the scheduler comes up.
                    {
                        let mut first = shared.video.first_frame.lock();
                        if first.is_none() {
                            *first = Some((frame.clone(), pts.unwrap_or(0.0)));
                            debug!("first frame parked (pts={:?})", pts);
                        }
                    }

                    // Clone: the decoder recycles `frame`'s buffers.
                    if shared.video.frames.push(frame.clone(), pts, serial).is_err() {
                        break; // aborted mid-push: back to the pop loop
                    }
                }
            }
            Err(PopError::Aborted) => {
                if park_until_restart(shared, || shared.video.packets.is_aborted()) {
                    break;
                }
                decoder.flush();
                drained = false;
            }
            Err(PopError::Finished) => {
                if !drained {
                    drained = true;
                    let serial = shared.serial.load(Ordering::SeqCst);
                    let _ = decoder.send_eof();
                    let mut frame = ffmpeg::util::frame::video::Video::empty();
                    while decoder.receive_frame(&mut frame).is_ok() {
                        let pts = video_frame_pts(&frame, tb);
                        if shared.video.frames.push(frame.clone(), pts, serial).is_err() {
                            break;
                        }
                    }
                    shared.video.finished.store(true, Ordering::SeqCst);
                    info!("video decoder drained");
                }
                if park_until_restart(shared, || shared.video.packets.is_finished()) {
                    break;
                }
                decoder.flush();
                drained = false;
            }
            Err(PopError::Empty) => unreachable!("blocking pop never returns Empty"),
        }
    }

    info!("video decode loop finished");
    Ok(())
}

/// Exact-seek phase 2 at the decoder: discard everything before the target.
fn drop_for_exact_seek(shared: &Shared, pts: f64) -> bool {
    let seek = shared.seek.lock();
    seek.in_progress && seek.exact && pts < seek.target_sec - shared.cfg.seek_tolerance
}

/// Sleep until `condition` turns false (queue restarted) or shutdown.
/// Returns true on shutdown.
fn park_until_restart(shared: &Shared, condition: impl Fn() -> bool) -> bool {
    while condition() {
        if shared.shutdown.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(PARK_POLL);
    }
    shared.shutdown.load(Ordering::SeqCst)
}

// ── Audio ─────────────────────────────────────────────────────────────────────

fn run_audio(shared: &Arc<Shared>) -> anyhow::Result<()> {
    let Some(audio) = &shared.audio else {
        return Ok(());
    };
    let stream_idx = shared
        .media
        .audio_stream
        .ok_or_else(|| anyhow::anyhow!("no audio stream"))?;
    let mut decoder = open_decoder(shared, stream_idx)?.decoder().audio()?;
    let tb = shared.media.audio_tb;
    info!("audio decode loop started ({} Hz)", decoder.rate());

    let mut drained = false;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match audio.packets.pop() {
            Ok(packet) => {
                drained = false;
                let serial = shared.serial.load(Ordering::SeqCst);
                if decoder.send_packet(&packet).is_err() {
                    continue;
                }
                let mut frame = ffmpeg::util::frame::audio::Audio::empty();
                while decoder.receive_frame(&mut frame).is_ok() {
                    let pts = audio_frame_pts(&frame, tb);
                    if audio.frames.push(frame.clone(), pts, serial).is_err() {
                        break;
                    }
                }
            }
            Err(PopError::Aborted) => {
                if park_until_restart(shared, || audio.packets.is_aborted()) {
                    break;
                }
                decoder.flush();
                drained = false;
            }
            Err(PopError::Finished) => {
                if !drained {
                    drained = true;
                    let serial = shared.serial.load(Ordering::SeqCst);
                    let _ = decoder.send_eof();
                    let mut frame = ffmpeg::util::frame::audio::Audio::empty();
                    while decoder.receive_frame(&mut frame).is_ok() {
                        let pts = audio_frame_pts(&frame, tb);
                        if audio.frames.push(frame.clone(), pts, serial).is_err() {
                            break;
                        }
                    }
                    audio.ctrl.finished.store(true, Ordering::SeqCst);
                    info!("audio decoder drained");
                }
                if park_until_restart(shared, || audio.packets.is_finished()) {
                    break;
                }
                decoder.flush();
                drained = false;
            }
            Err(PopError::Empty) => unreachable!("blocking pop never returns Empty"),
        }
    }

    info!("audio decode loop finished");
    Ok(())
}
