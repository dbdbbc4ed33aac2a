// crates/vireo-engine/src/audio.rs
//
// The audio renderer thread: pops decoded frames, resamples them to the
// sink's format, writes PCM, and — only after a successful write — anchors
// the audio clock at `frame_pts + frame_duration - sink_latency`. The sink's
// playback-head position is never consulted as a clock source; it freezes on
// enough devices that the written-sample ledger is the only trustworthy one.
//
// Drift compensation: the renderer keeps an exponentially-averaged drift
// between the audio clock and the master. Inside the 40–100 ms window it
// nudges the resample ratio by ±0.2 % so the backlog bleeds off inaudibly;
// beyond 100 ms it leaves correction to the sync core, which will drop or
// resync video instead.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use log::{info, warn};
use vireo_core::{AudioLifecycle, AudioSink, SinkError};

use crate::engine::Shared;

const IDLE_POLL: Duration = Duration::from_millis(2);
const WRITE_BACKOFF: Duration = Duration::from_millis(2);

/// Exponential moving average coefficient for the drift estimate.
const DRIFT_EMA: f64 = 0.9;

pub(crate) fn spawn_renderer(shared: Arc<Shared>, sink: Box<dyn AudioSink>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-audio".into())
        .spawn(move || run(shared, sink))
        .expect("spawn audio render thread")
}

// ── Pure ratio math (unit-tested) ─────────────────────────────────────────────

/// Resample-ratio nudge for an averaged drift reading. Positive drift means
/// audio is ahead of the master: stretch output (consume slower).
pub fn nudge_for_drift(avg_drift: f64, window_min: f64, window_max: f64, ratio: f64) -> f64 {
    let mag = avg_drift.abs();
    if mag < window_min || mag > window_max {
        return 0.0;
    }
    if avg_drift > 0.0 {
        ratio
    } else {
        -ratio
    }
}

/// Output sample rate that realises `speed` plus a drift nudge.
pub fn effective_out_rate(sink_rate: u32, speed: f64, nudge: f64) -> u32 {
    let rate = sink_rate as f64 / (speed * (1.0 + nudge));
    rate.round().max(1.0) as u32
}

pub fn update_drift_avg(avg: f64, sample: f64) -> f64 {
    DRIFT_EMA * avg + (1.0 - DRIFT_EMA) * sample
}

// ── The renderer loop ─────────────────────────────────────────────────────────

struct Resampler {
    ctx:        resampling::Context,
    in_format:  Sample,
    in_rate:    u32,
    in_channels: u32,
    out_rate:   u32,
}

fn run(shared: Arc<Shared>, mut sink: Box<dyn AudioSink>) {
    let Some(audio) = &shared.audio else { return };
    let spec = sink.spec();

    audio.ctrl.set_lifecycle(AudioLifecycle::Initializing, &shared.events);
    if let Err(e) = sink.start() {
        warn!("audio sink start failed: {e}");
        audio.ctrl.mark_dead(&shared.events);
        shared.sync.on_audio_dead();
        return;
    }
    audio.ctrl.set_lifecycle(AudioLifecycle::Initialized, &shared.events);
    info!("audio render loop started ({} Hz, {} ch)", spec.rate, spec.channels);

    let out_layout = if spec.channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    };
    let out_channels = out_layout.channels() as usize;

    let mut resampler: Option<Resampler> = None;
    let mut drift_avg = 0.0_f64;
    let mut sink_paused = false;
    let mut stall_since: Option<Instant> = None;

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Engine-side control mailbox, applied on this thread only.
        if audio.ctrl.take_flush() {
            sink.flush();
            drift_avg = 0.0;
        }
        let want_paused = audio.ctrl.paused.load(Ordering::SeqCst);
        if want_paused != sink_paused {
            if want_paused {
                sink.pause();
                audio.ctrl.set_lifecycle(AudioLifecycle::Paused, &shared.events);
            } else {
                sink.resume();
            }
            sink_paused = want_paused;
        }
        if sink_paused || audio.ctrl.is_dead() {
            thread::sleep(IDLE_POLL);
            continue;
        }

        // While a seek is in flight the sink is paused and the first post-seek
        // video frame has not reopened the gate; don't consume frames yet.
        if shared.seek.lock().in_progress {
            thread::sleep(IDLE_POLL);
            continue;
        }

        let slot = match audio.frames.pop() {
            Ok(slot) => slot,
            Err(_) => {
                // Aborted: park until the seek restart re-arms the queue.
                thread::sleep(IDLE_POLL);
                continue;
            }
        };

        // Stale epoch: the frame was decoded before the last seek.
        if slot.serial != shared.serial.load(Ordering::SeqCst) {
            continue;
        }

        let frame = &slot.frame;
        let samples = frame.samples();
        if samples == 0 {
            continue;
        }
        let in_rate = frame.rate().max(1);
        let duration = samples as f64 / in_rate as f64;

        // Pre-roll after a backward seek: a frame wholly before the target
        // would anchor the audio clock behind the video anchor.
        {
            let seek = shared.seek.lock();
            if slot.pts + duration < seek.target_sec - shared.cfg.seek_tolerance {
                continue;
            }
        }

        // ── Resample ─────────────────────────────────────────────────────────
        let speed = *shared.speed.lock();
        let nudge = nudge_for_drift(
            drift_avg,
            shared.cfg.drift_nudge_min,
            shared.cfg.drift_nudge_max,
            shared.cfg.drift_nudge_ratio,
        );
        let out_rate = effective_out_rate(spec.rate, speed, nudge);

        let in_channels = frame.ch_layout().channels() as u32;
        let needs_rebuild = match &resampler {
            None => true,
            Some(r) => {
                r.in_format != frame.format()
                    || r.in_rate != in_rate
                    || r.in_channels != in_channels
                    || r.out_rate != out_rate
            }
        };
        if needs_rebuild {
            let src_layout = if in_channels >= 2 {
                frame.ch_layout()
            } else {
                ChannelLayout::MONO
            };
            match resampling::Context::get2(
                frame.format(), src_layout, in_rate,
                Sample::F32(SampleType::Packed), out_layout, out_rate,
            ) {
                Ok(ctx) => {
                    resampler = Some(Resampler {
                        ctx,
                        in_format: frame.format(),
                        in_rate,
                        in_channels,
                        out_rate,
                    });
                }
                Err(e) => {
                    warn!("audio resampler init failed: {e}");
                    continue;
                }
            }
        }
        let rs = resampler.as_mut().unwrap();

        let mut resampled = ffmpeg::util::frame::audio::Audio::empty();
        if rs.ctx.run(frame, &mut resampled).is_err() || resampled.samples() == 0 {
            continue;
        }

        // Packed F32: plane 0 is already interleaved.
        let out_samples = resampled.samples();
        let interleaved: &[f32] = unsafe {
            std::slice::from_raw_parts(
                resampled.data(0).as_ptr() as *const f32,
                out_samples * out_channels,
            )
        };

        // ── Write, then (and only then) the clock ────────────────────────────
        let mut off_frames = 0usize;
        let write_ok = loop {
            if shared.shutdown.load(Ordering::SeqCst) || audio.ctrl.paused.load(Ordering::SeqCst) {
                break false;
            }
            match sink.write(&interleaved[off_frames * out_channels..]) {
                Ok(n) => {
                    off_frames += n;
                    stall_since = None;
                    if off_frames >= out_samples {
                        break true;
                    }
                    if n == 0 {
                        thread::sleep(WRITE_BACKOFF);
                    }
                }
                Err(SinkError::Full) => {
                    let since = *stall_since.get_or_insert_with(Instant::now);
                    if shared.is_playing()
                        && since.elapsed().as_secs_f64() > shared.cfg.audio_stall_timeout
                    {
                        warn!("audio sink not advancing; stopped by system");
                        audio.ctrl.set_lifecycle(AudioLifecycle::StoppedBySystem, &shared.events);
                        shared.sync.on_audio_dead();
                        break false;
                    }
                    thread::sleep(WRITE_BACKOFF);
                }
                Err(SinkError::Dead(msg)) => {
                    warn!("audio sink dead: {msg}");
                    audio.ctrl.mark_dead(&shared.events);
                    shared.sync.on_audio_dead();
                    break false;
                }
            }
        };

        if !write_ok {
            continue;
        }

        shared.audio_clock.set(slot.pts + duration - sink.latency());
        shared.sync.on_audio_write();
        shared.diag.audio_writes.fetch_add(1, Ordering::Relaxed);
        audio.ctrl.set_lifecycle(AudioLifecycle::Playing, &shared.events);

        // Drift sample for the nudge: audio clock vs master.
        if let (Some(a), Some(m)) = (
            shared.audio_clock.now(),
            shared.master_now(),
        ) {
            drift_avg = update_drift_avg(drift_avg, a - m);
        }
    }

    sink.stop();
    info!("audio render loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nudge_only_inside_window() {
        assert_eq!(nudge_for_drift(0.010, 0.040, 0.100, 0.002), 0.0);
        assert_eq!(nudge_for_drift(0.060, 0.040, 0.100, 0.002), 0.002);
        assert_eq!(nudge_for_drift(-0.060, 0.040, 0.100, 0.002), -0.002);
        // Beyond the window the sync core owns correction.
        assert_eq!(nudge_for_drift(0.200, 0.040, 0.100, 0.002), 0.0);
    }

    #[test]
    fn out_rate_tracks_speed() {
        assert_eq!(effective_out_rate(48000, 1.0, 0.0), 48000);
        assert_eq!(effective_out_rate(48000, 2.0, 0.0), 24000);
        assert_eq!(effective_out_rate(48000, 0.5, 0.0), 96000);
    }

    #[test]
    fn out_rate_nudge_is_small() {
        let nudged = effective_out_rate(48000, 1.0, 0.002);
        assert!((47880..48000).contains(&nudged));
    }

    #[test]
    fn drift_average_converges() {
        let mut avg = 0.0;
        for _ in 0..200 {
            avg = update_drift_avg(avg, 0.05);
        }
        assert!((avg - 0.05).abs() < 1e-3);
    }
}
