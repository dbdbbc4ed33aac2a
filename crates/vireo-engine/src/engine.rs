// crates/vireo-engine/src/engine.rs
//
// EngineContext and the host-facing API. One Engine owns one file's playback:
// the shared context (queues, clocks, gates, seek state, sync core) lives in
// an Arc handed to every pipeline thread, and dispose() joins them all before
// the context can drop.
//
// Host calls are short-running: they mutate state under targeted locks and
// never block on pipeline activity (seek is asynchronous by design).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use ffmpeg::util::rational::Rational;
use log::{info, warn};
use parking_lot::Mutex;
use uuid::Uuid;
use vireo_core::{
    time::secs_to_ms, AudioLifecycle, AudioSink, EngineConfig, EventReceiver, FitMode,
    InterpolationMode, PlaybackMode, PlaybackState, PlayerError, PlayerEvent, PlayerToken,
    SurfaceError, VideoSurface, Viewport,
};

use crate::clock::Clock;
use crate::frame_queue::FrameQueue;
use crate::hwaccel;
use crate::packet_queue::PacketQueue;
use crate::seek::{self, SeekState};
use crate::sink_cpal::CpalSink;
use crate::sync::SyncCore;
use crate::texture::{FrameAvailableFn, TextureSurface};
use crate::{audio as audio_render, decode, demux, render, watchdog};

// ── Media info ────────────────────────────────────────────────────────────────

/// Everything prepare() learned about the file, shared read-only.
#[derive(Debug, Clone)]
pub(crate) struct MediaInfo {
    pub path:         PathBuf,
    pub container:    String,
    pub duration_sec: f64,
    pub video_stream: usize,
    pub video_tb:     Rational,
    pub fps:          f64,
    pub width:        u32,
    pub height:       u32,
    pub video_codec:  String,
    pub audio_stream: Option<usize>,
    pub audio_tb:     Rational,
}

fn probe(path: &PathBuf) -> Result<MediaInfo, PlayerError> {
    let ictx =
        input(path).map_err(|e| PlayerError::OpenFailed(format!("{}: {e}", path.display())))?;

    let container = ictx.format().name().to_string();

    let video = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| PlayerError::OpenFailed(format!("{}: no video stream", path.display())))?;
    let video_stream = video.index();
    let video_tb = video.time_base();
    let fps = crate::helpers::pts::fps_or_default(video.avg_frame_rate());
    let (width, height) = unsafe {
        let p = video.parameters().as_ptr();
        ((*p).width as u32, (*p).height as u32)
    };
    let video_codec = ffmpeg::decoder::find(video.parameters().id())
        .map(|c| c.name().to_string())
        .unwrap_or_default();

    let (audio_stream, audio_tb) = match ictx.streams().best(Type::Audio) {
        Some(s) => (Some(s.index()), s.time_base()),
        None => (None, Rational::new(1, 1)),
    };

    // Container duration, falling back to the stream's own.
    let mut duration_sec = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
    if duration_sec <= 0.0 {
        let tb = video.time_base();
        let d = video.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        if d > 0.0 {
            duration_sec = d;
        }
    }

    Ok(MediaInfo {
        path: path.clone(),
        container,
        duration_sec,
        video_stream,
        video_tb,
        fps,
        width,
        height,
        video_codec,
        audio_stream,
        audio_tb,
    })
}

// ── Event hub ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OnceFlags {
    prepared:    bool,
    duration:    bool,
    first_frame: bool,
    completed:   bool,
}

pub(crate) struct EventHub {
    tx:    Sender<PlayerEvent>,
    token: PlayerToken,
    /// dispose_in_progress ⇒ no outbound events.
    muted: AtomicBool,
    once:  Mutex<OnceFlags>,
}

impl EventHub {
    fn new(token: PlayerToken, capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                token,
                muted: AtomicBool::new(false),
                once: Mutex::new(OnceFlags::default()),
            },
            rx,
        )
    }

    pub(crate) fn token(&self) -> PlayerToken {
        self.token
    }

    pub(crate) fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        if self.muted.load(Ordering::SeqCst) {
            return;
        }
        {
            // One-shot guard for the per-lifetime events.
            let mut once = self.once.lock();
            let flag = match &event {
                PlayerEvent::Prepared { .. } => Some(&mut once.prepared),
                PlayerEvent::Duration { .. } => Some(&mut once.duration),
                PlayerEvent::FirstFrame { .. } => Some(&mut once.first_frame),
                PlayerEvent::PlaybackCompleted { .. } => Some(&mut once.completed),
                _ => None,
            };
            if let Some(flag) = flag {
                if *flag {
                    return;
                }
                *flag = true;
            }
        }
        if self.tx.try_send(event).is_err() {
            warn!("event channel full; event dropped");
        }
    }
}

// ── Shared pipeline state ─────────────────────────────────────────────────────

pub(crate) struct AvSyncGate {
    /// Opens (and stays open) after the first surface bind + dummy swap.
    pub open:  AtomicBool,
    /// Drops while the surface is detached or sync is being re-anchored.
    pub valid: AtomicBool,
}

pub(crate) struct AudioCtrl {
    pub lifecycle: Mutex<AudioLifecycle>,
    pub paused:    AtomicBool,
    pub finished:  AtomicBool,
    flush_req:     AtomicBool,
}

impl AudioCtrl {
    fn new() -> Self {
        Self {
            lifecycle: Mutex::new(AudioLifecycle::Initializing),
            paused:    AtomicBool::new(true),
            finished:  AtomicBool::new(false),
            flush_req: AtomicBool::new(false),
        }
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub(crate) fn pause_and_flush(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.flush_req.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_flush(&self) -> bool {
        self.flush_req.swap(false, Ordering::SeqCst)
    }

    /// Dead or stopped-by-system: the renderer stops driving the sink.
    pub(crate) fn is_dead(&self) -> bool {
        matches!(
            *self.lifecycle.lock(),
            AudioLifecycle::Dead | AudioLifecycle::StoppedBySystem
        )
    }

    pub(crate) fn mark_dead(&self, events: &EventHub) {
        self.set_lifecycle(AudioLifecycle::Dead, events);
    }

    pub(crate) fn set_lifecycle(&self, next: AudioLifecycle, events: &EventHub) {
        let mut l = self.lifecycle.lock();
        if *l == next {
            return;
        }
        if !l.can_transition(next) {
            warn!("audio lifecycle {:?} -> {:?} refused", *l, next);
            return;
        }
        *l = next;
        events.emit(PlayerEvent::AudioState {
            token: events.token(),
            state: next,
        });
    }
}

pub(crate) struct VideoShared {
    pub packets:              PacketQueue<ffmpeg::Packet>,
    pub frames:               FrameQueue<ffmpeg::util::frame::video::Video>,
    /// First decoded frame, parked until the scheduler shows it.
    pub first_frame:          Mutex<Option<(ffmpeg::util::frame::video::Video, f64)>>,
    pub first_frame_rendered: AtomicBool,
    pub finished:             AtomicBool,
    pub last_surface_error:   Mutex<Option<SurfaceError>>,
}

pub(crate) struct AudioShared {
    pub packets: PacketQueue<ffmpeg::Packet>,
    pub frames:  FrameQueue<ffmpeg::util::frame::audio::Audio>,
    pub ctrl:    AudioCtrl,
}

pub(crate) struct Diagnostics {
    pub swaps:              AtomicU64,
    pub drops_late:         AtomicU64,
    pub drops_stale:        AtomicU64,
    pub drops_garbage:      AtomicU64,
    pub drops_backpressure: AtomicU64,
    pub holds:              AtomicU64,
    pub forced_renders:     AtomicU64,
    pub hard_resyncs:       AtomicU64,
    pub audio_writes:       AtomicU64,
}

impl Diagnostics {
    fn new() -> Self {
        Self {
            swaps:              AtomicU64::new(0),
            drops_late:         AtomicU64::new(0),
            drops_stale:        AtomicU64::new(0),
            drops_garbage:      AtomicU64::new(0),
            drops_backpressure: AtomicU64::new(0),
            holds:              AtomicU64::new(0),
            forced_renders:     AtomicU64::new(0),
            hard_resyncs:       AtomicU64::new(0),
            audio_writes:       AtomicU64::new(0),
        }
    }
}

pub(crate) struct Shared {
    pub cfg:      EngineConfig,
    pub media:    MediaInfo,
    pub instance: Uuid,
    pub events:   EventHub,

    pub shutdown: AtomicBool,
    state:        Mutex<PlaybackState>,
    pub mode:     Mutex<PlaybackMode>,
    pub error:    Mutex<Option<PlayerError>>,

    pub serial: AtomicU64,
    pub gate:   AvSyncGate,
    pub seek:   Mutex<SeekState>,
    pub sync:   SyncCore,

    pub video: VideoShared,
    pub audio: Option<AudioShared>,

    pub audio_clock: Clock,
    pub video_clock: Clock,
    /// (serial, pts) of the last clock write, for the regression assert.
    last_swap: Mutex<(u64, f64)>,

    pub pending_play: AtomicBool,
    /// Armed by begin_playing; the next presented frame emits playStarted.
    play_started_pending: AtomicBool,
    pub eof:          AtomicBool,
    pub render_stop:  AtomicBool,
    pub step_request: Mutex<Option<i32>>,

    pub interp_mode: Mutex<InterpolationMode>,
    pub fit:         Mutex<FitMode>,
    pub viewport:    Mutex<Option<Viewport>>,
    pub speed:       Mutex<f64>,

    position_ms: AtomicI64,
    pub diag:    Diagnostics,
}

impl Shared {
    pub(crate) fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, to: PlaybackState) {
        let mut s = self.state.lock();
        if *s == to {
            return;
        }
        if !s.can_transition(to) {
            warn!("state transition {:?} -> {:?} refused", *s, to);
            return;
        }
        info!("state {:?} -> {:?}", *s, to);
        *s = to;
    }

    pub(crate) fn is_playing(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Playing | PlaybackState::Buffering
        )
    }

    pub(crate) fn master_now(&self) -> Option<f64> {
        self.sync
            .master_now(self.audio_clock.now(), self.video_clock.now())
    }

    /// The single video-clock write path, called immediately after a
    /// successful swap and nowhere else.
    pub(crate) fn set_video_clock_after_swap(&self, pts: f64) {
        if pts.is_nan() || pts < 0.0 {
            // Broken pts frames may be force-rendered; they never move the clock.
            return;
        }
        let serial = self.serial.load(Ordering::SeqCst);
        {
            let mut last = self.last_swap.lock();
            debug_assert!(
                last.0 != serial || pts >= last.1 - 0.001,
                "video clock regression within epoch: {pts} < {}",
                last.1
            );
            *last = (serial, pts);
        }
        self.video_clock.set(pts);
        self.diag.swaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn store_position(&self, pts_sec: f64) {
        self.position_ms.store(secs_to_ms(pts_sec), Ordering::SeqCst);
    }

    pub(crate) fn last_good_position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::SeqCst)
    }

    /// Host-visible position: last-known-good while a seek is in flight.
    pub(crate) fn position_ms(&self) -> i64 {
        {
            let seek = self.seek.lock();
            if seek.in_progress {
                return seek.admission_position_ms;
            }
        }
        if let Some(now) = self.master_now() {
            let upper = if self.media.duration_sec > 0.0 {
                self.media.duration_sec
            } else {
                f64::MAX
            };
            let ms = secs_to_ms(now.clamp(0.0, upper));
            self.position_ms.store(ms, Ordering::SeqCst);
            return ms;
        }
        self.position_ms.load(Ordering::SeqCst)
    }

    /// Latch-once error cell. The error event always precedes the state
    /// change; `paused` follows iff we actually were playing.
    pub(crate) fn latch_error(&self, err: PlayerError) {
        {
            let mut cell = self.error.lock();
            if cell.is_some() {
                return;
            }
            *cell = Some(err.clone());
        }
        warn!("latched error: {}: {err}", err.code());
        let was_playing = self.is_playing();
        self.events.emit(PlayerEvent::Error {
            token: self.events.token(),
            message: format!("{}: {err}", err.code()),
        });
        if !err.is_fatal() {
            return;
        }
        self.render_stop.store(true, Ordering::SeqCst);
        self.video_clock.pause(true);
        self.audio_clock.pause(true);
        if let Some(audio) = &self.audio {
            audio.ctrl.pause();
        }
        self.set_state(PlaybackState::Error);
        if was_playing {
            self.events.emit(PlayerEvent::Paused {
                token: self.events.token(),
            });
        }
    }

    pub(crate) fn begin_playing(&self) {
        self.set_state(PlaybackState::Playing);
        self.play_started_pending.store(true, Ordering::SeqCst);
        self.video_clock.pause(false);
        self.audio_clock.pause(false);
        if let Some(audio) = &self.audio {
            audio.ctrl.resume();
        }
    }

    // ── Event helpers (the render/seek threads go through these) ──────────────

    pub(crate) fn emit_surface_ready(&self) {
        self.events.emit(PlayerEvent::SurfaceReady { token: self.events.token() });
    }

    pub(crate) fn emit_surface_replaced(&self) {
        self.events.emit(PlayerEvent::SurfaceReplaced { token: self.events.token() });
    }

    pub(crate) fn emit_surface_lost(&self) {
        self.events.emit(PlayerEvent::SurfaceLost { token: self.events.token() });
    }

    pub(crate) fn emit_decode_started(&self) {
        self.events.emit(PlayerEvent::DecodeStarted { token: self.events.token() });
    }

    pub(crate) fn emit_first_frame(&self) {
        self.events.emit(PlayerEvent::FirstFrame { token: self.events.token() });
    }

    pub(crate) fn emit_first_frame_after_seek(&self, pts: f64) {
        self.events.emit(PlayerEvent::FirstFrameAfterSeek {
            token: self.events.token(),
            pts_ms: secs_to_ms(pts),
        });
    }

    pub(crate) fn emit_frame_stepped(&self, pts: f64) {
        self.events.emit(PlayerEvent::FrameStepped {
            token: self.events.token(),
            pts_ms: secs_to_ms(pts),
        });
    }

    pub(crate) fn emit_play_started(&self) {
        if self.is_playing() && self.play_started_pending.swap(false, Ordering::SeqCst) {
            self.events.emit(PlayerEvent::PlayStarted { token: self.events.token() });
        }
    }

    pub(crate) fn emit_diagnostic(&self, key: &'static str, value: i64) {
        self.events.emit(PlayerEvent::Diagnostic {
            token: self.events.token(),
            key,
            value,
        });
    }

    pub(crate) fn emit_playback_completed(&self, reason: &'static str) {
        self.events.emit(PlayerEvent::PlaybackCompleted {
            token: self.events.token(),
            reason,
        });
    }
}

// ── The engine ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Threads {
    demux:        Option<JoinHandle<()>>,
    video_dec:    Option<JoinHandle<()>>,
    audio_dec:    Option<JoinHandle<()>>,
    audio_render: Option<JoinHandle<()>>,
    render:       Option<JoinHandle<()>>,
    stall_wd:     Option<JoinHandle<()>>,
    seek_wd:      Option<JoinHandle<()>>,
}

pub struct Engine {
    shared:      Arc<Shared>,
    threads:     Mutex<Threads>,
    had_surface: AtomicBool,
    disposed:    AtomicBool,
}

impl Engine {
    /// Open `path`, spawn the pipeline (gated on surface attach) and hand the
    /// host its event stream. The default audio sink is cpal's output device.
    pub fn prepare(
        path: impl Into<PathBuf>,
        token: PlayerToken,
    ) -> Result<(Engine, EventReceiver), PlayerError> {
        Self::prepare_with(path, token, EngineConfig::default(), None)
    }

    pub fn prepare_with(
        path: impl Into<PathBuf>,
        token: PlayerToken,
        cfg: EngineConfig,
        sink_override: Option<Box<dyn AudioSink>>,
    ) -> Result<(Engine, EventReceiver), PlayerError> {
        ffmpeg::init().map_err(|e| PlayerError::Internal(format!("ffmpeg init: {e}")))?;

        let path = path.into();
        let (events, receiver) = EventHub::new(token, cfg.event_channel_capacity);
        let media = probe(&path)?;
        info!(
            "prepared '{}': {}x{} {} {:.3}s container={} audio={}",
            path.display(),
            media.width,
            media.height,
            media.video_codec,
            media.duration_sec,
            media.container,
            media.audio_stream.is_some(),
        );
        if hwaccel::software_only(&media.container, &media.video_codec) {
            info!("hw decode blacklisted for {}/{}", media.container, media.video_codec);
        }

        let has_audio_stream = media.audio_stream.is_some();

        // The sink decides whether the audio pipeline exists at all: a file
        // with audio but no drivable sink plays video-master from the start.
        let sink: Option<Box<dyn AudioSink>> = if has_audio_stream {
            match sink_override {
                Some(s) => Some(s),
                None => match CpalSink::open() {
                    Ok(s) => Some(Box::new(s)),
                    Err(e) => {
                        warn!("audio sink unavailable: {e}");
                        None
                    }
                },
            }
        } else {
            None
        };
        let audio_enabled = sink.is_some();

        let shared = Arc::new(Shared {
            sync: SyncCore::new(&cfg, audio_enabled),
            video: VideoShared {
                packets:              PacketQueue::new(),
                frames:               FrameQueue::new(cfg.frame_queue_capacity),
                first_frame:          Mutex::new(None),
                first_frame_rendered: AtomicBool::new(false),
                finished:             AtomicBool::new(false),
                last_surface_error:   Mutex::new(None),
            },
            audio: audio_enabled.then(|| AudioShared {
                packets: PacketQueue::new(),
                frames:  FrameQueue::new(cfg.frame_queue_capacity),
                ctrl:    AudioCtrl::new(),
            }),
            audio_clock: Clock::new(cfg.speed_min, cfg.speed_max),
            video_clock: Clock::new(cfg.speed_min, cfg.speed_max),
            last_swap: Mutex::new((0, f64::NEG_INFINITY)),
            shutdown: AtomicBool::new(false),
            state: Mutex::new(PlaybackState::Preparing),
            mode: Mutex::new(PlaybackMode::Av),
            error: Mutex::new(None),
            serial: AtomicU64::new(0),
            gate: AvSyncGate {
                open:  AtomicBool::new(false),
                valid: AtomicBool::new(false),
            },
            seek: Mutex::new(SeekState::new()),
            pending_play: AtomicBool::new(false),
            play_started_pending: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            render_stop: AtomicBool::new(false),
            step_request: Mutex::new(None),
            interp_mode: Mutex::new(InterpolationMode::Auto),
            fit: Mutex::new(FitMode::Contain),
            viewport: Mutex::new(None),
            speed: Mutex::new(1.0),
            position_ms: AtomicI64::new(0),
            diag: Diagnostics::new(),
            instance: Uuid::new_v4(),
            events,
            media,
            cfg,
        });

        let mut threads = Threads::default();
        threads.demux = Some(demux::spawn(Arc::clone(&shared)));
        threads.video_dec = Some(decode::spawn_video(Arc::clone(&shared)));
        if shared.audio.is_some() {
            threads.audio_dec = Some(decode::spawn_audio(Arc::clone(&shared)));
            threads.audio_render = Some(audio_render::spawn_renderer(
                Arc::clone(&shared),
                sink.expect("audio enabled implies a sink"),
            ));
        }
        threads.stall_wd = Some(watchdog::spawn_stall(Arc::clone(&shared)));
        threads.seek_wd = Some(watchdog::spawn_seek(Arc::clone(&shared)));

        shared.set_state(PlaybackState::Ready);
        shared.events.emit(PlayerEvent::Prepared {
            token,
            has_audio: has_audio_stream,
            duration_ms: secs_to_ms(shared.media.duration_sec),
        });
        shared.events.emit(PlayerEvent::Duration {
            token,
            ms: secs_to_ms(shared.media.duration_sec),
        });
        if has_audio_stream && !audio_enabled {
            shared.events.emit(PlayerEvent::AudioState {
                token,
                state: AudioLifecycle::Dead,
            });
        } else if !has_audio_stream {
            shared.events.emit(PlayerEvent::AudioState {
                token,
                state: AudioLifecycle::NoAudio,
            });
        }

        Ok((
            Engine {
                shared,
                threads: Mutex::new(threads),
                had_surface: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            },
            receiver,
        ))
    }

    // ── Surface lifecycle ─────────────────────────────────────────────────────

    /// Hand the engine a render target. The render thread binds it, performs
    /// the gate-opening dummy swap, and starts scheduling.
    pub fn attach_surface(&self, surface: Box<dyn VideoSurface>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.stop_render_thread();
        let replaced = self.had_surface.swap(true, Ordering::SeqCst);
        self.shared.render_stop.store(false, Ordering::SeqCst);
        let handle = render::spawn(Arc::clone(&self.shared), surface, replaced);
        self.threads.lock().render = Some(handle);
    }

    /// Stop rendering; decode keeps running and audio keeps playing.
    pub fn detach_surface(&self) {
        self.stop_render_thread();
        self.shared.gate.valid.store(false, Ordering::SeqCst);
    }

    /// FBO-style alternative to attach_surface: decoded frames land as RGBA
    /// in a host-readable buffer and `on_frame(id)` fires after each swap.
    /// Returns the shared pixel buffer.
    pub fn register_texture(
        &self,
        id: i64,
        width: u32,
        height: u32,
        on_frame: FrameAvailableFn,
    ) -> std::sync::Arc<std::sync::Mutex<Vec<u8>>> {
        let surface = TextureSurface::new(id, width, height, on_frame);
        let pixels = surface.pixels();
        self.attach_surface(Box::new(surface));
        pixels
    }

    fn stop_render_thread(&self) {
        let handle = self.threads.lock().render.take();
        if let Some(handle) = handle {
            self.shared.render_stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
            self.shared.render_stop.store(false, Ordering::SeqCst);
        }
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    /// Idempotent. Before the AVSync gate opens the play is parked and runs
    /// the moment the first swap succeeds.
    pub fn play(&self) {
        if self.disposed.load(Ordering::SeqCst) || self.shared.error.lock().is_some() {
            return;
        }
        if self.shared.is_playing() {
            return;
        }
        *self.shared.mode.lock() = PlaybackMode::Av;
        self.shared.events.emit(PlayerEvent::PlayAccepted {
            token: self.shared.events.token(),
        });
        if self.shared.gate.open.load(Ordering::SeqCst) {
            self.shared.begin_playing();
        } else {
            self.shared.pending_play.store(true, Ordering::SeqCst);
        }
    }

    /// Idempotent.
    pub fn pause(&self) {
        if !self.shared.is_playing() {
            return;
        }
        self.shared.set_state(PlaybackState::Paused);
        self.shared.video_clock.pause(true);
        self.shared.audio_clock.pause(true);
        if let Some(audio) = &self.shared.audio {
            audio.ctrl.pause();
        }
        self.shared.events.emit(PlayerEvent::Paused {
            token: self.shared.events.token(),
        });
    }

    /// Asynchronous; completion is signalled by `firstFrameAfterSeek`.
    pub fn seek(&self, seconds: f64, exact: bool) {
        if self.disposed.load(Ordering::SeqCst) || self.shared.error.lock().is_some() {
            return;
        }
        *self.shared.mode.lock() = PlaybackMode::Av;
        seek::request(&self.shared, seconds, exact, false);
    }

    /// Host clamp [0.25, 3.0]; the clocks clamp again to the engine range.
    pub fn set_speed(&self, speed: f64) {
        let host = speed.clamp(0.25, 3.0);
        let engine = self.shared.cfg.clamp_speed(host);
        *self.shared.speed.lock() = engine;
        self.shared.video_clock.set_speed(engine);
        self.shared.audio_clock.set_speed(engine);
        info!("speed set to {engine}");
    }

    /// Enter frame-step mode and step one frame forward (+1) or back (-1).
    pub fn step_frame(&self, direction: i32) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.shared.mode.lock() = PlaybackMode::FrameStep;
        self.shared.set_state(PlaybackState::Paused);
        self.shared.video_clock.pause(true);
        self.shared.audio_clock.pause(true);
        if let Some(audio) = &self.shared.audio {
            audio.ctrl.pause();
        }

        if direction >= 0 {
            *self.shared.step_request.lock() = Some(1);
        } else {
            // Backward: re-seek to just before the presented frame and let
            // the exact-seek path land on it.
            let current = self
                .shared
                .video_clock
                .now()
                .unwrap_or_else(|| vireo_core::time::ms_to_secs(self.shared.last_good_position_ms()));
            let target = (current - self.shared.video.frames.estimated_frame_duration()).max(0.0);
            *self.shared.step_request.lock() = Some(-1);
            seek::request(&self.shared, target, true, true);
        }
    }

    // ── Presentation knobs ────────────────────────────────────────────────────

    pub fn set_interpolation_mode(&self, mode: InterpolationMode) {
        *self.shared.interp_mode.lock() = mode;
    }

    pub fn set_fit_mode(&self, fit: FitMode) {
        *self.shared.fit.lock() = fit;
    }

    pub fn set_viewport(&self, width: u32, height: u32, rotation: u32, fit: FitMode) {
        *self.shared.viewport.lock() = Some(Viewport {
            width,
            height,
            rotation,
            fit,
        });
        *self.shared.fit.lock() = fit;
    }

    // ── App lifecycle ─────────────────────────────────────────────────────────

    /// Backgrounded: the render loop stops and the video clock freezes;
    /// audio keeps playing against its own clock.
    pub fn on_app_background(&self) {
        *self.shared.mode.lock() = PlaybackMode::AudioOnly;
        self.stop_render_thread();
        self.shared.gate.valid.store(false, Ordering::SeqCst);
        self.shared.video_clock.pause(true);
    }

    /// Foregrounded: the host re-attaches a surface next; rendering resumes
    /// there without re-emitting firstFrame.
    pub fn on_app_foreground(&self) {
        *self.shared.mode.lock() = PlaybackMode::Av;
        if self.shared.is_playing() {
            self.shared.video_clock.pause(false);
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn position_ms(&self) -> i64 {
        self.shared.position_ms()
    }

    pub fn duration_ms(&self) -> i64 {
        secs_to_ms(self.shared.media.duration_sec)
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn last_error(&self) -> Option<PlayerError> {
        self.shared.error.lock().clone()
    }

    /// Counter snapshot for debugging hosts.
    pub fn diagnostics(&self) -> serde_json::Value {
        let d = &self.shared.diag;
        serde_json::json!({
            "instance": self.shared.instance.to_string(),
            "state": self.shared.state(),
            "position_ms": self.shared.last_good_position_ms(),
            "serial": self.shared.serial.load(Ordering::SeqCst),
            "swaps": d.swaps.load(Ordering::Relaxed),
            "drops": {
                "late": d.drops_late.load(Ordering::Relaxed),
                "stale": d.drops_stale.load(Ordering::Relaxed),
                "garbage": d.drops_garbage.load(Ordering::Relaxed),
                "backpressure": d.drops_backpressure.load(Ordering::Relaxed),
            },
            "holds": d.holds.load(Ordering::Relaxed),
            "forced_renders": d.forced_renders.load(Ordering::Relaxed),
            "hard_resyncs": d.hard_resyncs.load(Ordering::Relaxed),
            "audio_writes": d.audio_writes.load(Ordering::Relaxed),
            "video_queue": self.shared.video.frames.len(),
            "video_packet_bytes": self.shared.video.packets.bytes(),
            "synthetic_pts": self.shared.video.frames.synthetic_count(),
        })
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Block until every pipeline thread is joined. Idempotent; after it
    /// returns no further event is emitted and a new prepare is allowed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("dispose: shutting down pipeline");
        self.shared.events.mute();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.render_stop.store(true, Ordering::SeqCst);
        // Unblock a demuxer still waiting on the gate.
        self.shared.gate.open.store(true, Ordering::SeqCst);

        self.shared.video.packets.abort();
        self.shared.video.frames.abort();
        if let Some(audio) = &self.shared.audio {
            audio.packets.abort();
            audio.frames.abort();
            audio.ctrl.pause();
        }

        let mut threads = self.threads.lock();
        for handle in [
            threads.render.take(),
            threads.demux.take(),
            threads.video_dec.take(),
            threads.audio_dec.take(),
            threads.audio_render.take(),
            threads.stall_wd.take(),
            threads.seek_wd.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        info!("dispose complete");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> (EventHub, EventReceiver) {
        EventHub::new(42, 64)
    }

    #[test]
    fn one_shot_events_fire_once() {
        let (hub, rx) = hub();
        for _ in 0..3 {
            hub.emit(PlayerEvent::FirstFrame { token: 42 });
        }
        hub.emit(PlayerEvent::Prepared { token: 42, has_audio: false, duration_ms: 1 });
        hub.emit(PlayerEvent::Prepared { token: 42, has_audio: false, duration_ms: 1 });
        hub.emit(PlayerEvent::PlaybackCompleted { token: 42, reason: "eof" });
        hub.emit(PlayerEvent::PlaybackCompleted { token: 42, reason: "eof" });

        let got: Vec<_> = rx.try_iter().map(|e| e.name()).collect();
        assert_eq!(got, vec!["firstFrame", "prepared", "playbackCompleted"]);
    }

    #[test]
    fn repeating_events_are_not_filtered() {
        let (hub, rx) = hub();
        hub.emit(PlayerEvent::Paused { token: 42 });
        hub.emit(PlayerEvent::Paused { token: 42 });
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn muted_hub_emits_nothing() {
        let (hub, rx) = hub();
        hub.mute();
        hub.emit(PlayerEvent::FirstFrame { token: 42 });
        hub.emit(PlayerEvent::Paused { token: 42 });
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn overflow_drops_instead_of_blocking() {
        let (hub, rx) = EventHub::new(1, 1);
        hub.emit(PlayerEvent::Paused { token: 1 });
        hub.emit(PlayerEvent::Paused { token: 1 }); // dropped, must not block
        assert_eq!(rx.try_iter().count(), 1);
    }
}
