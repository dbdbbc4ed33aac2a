// crates/vireo-engine/src/render.rs
//
// The render scheduler: the only code that touches the surface and the only
// writer of the video clock, which it updates strictly after a successful
// swap. One thread per attached surface; pacing is a vsync-interval sleep.
//
// Per-iteration order matters and mirrors the gate protocol:
//   1. shutdown / stop checks
//   2. seek drain (runs even while paused — the seek gate outranks pause)
//   3. frame-step service
//   4. parked first frame (rendered unconditionally, exactly once)
//   5. pause / not-playing: re-present the held picture to keep the surface
//      alive, no clock movement
//   6. backpressure cap, jitter warm-up, stale-serial discard, hard-resync
//      purge
//   7. drop/hold/render verdict from the sync core, optional interpolation,
//      upload + swap, clock update, queue advance

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use log::{debug, info, warn};
use vireo_core::{
    fit_scale, ColorMatrix, InterpolationMode, Picture, PictureFormat, PlaybackMode,
    PlaybackState, PlayerError, RenderParams, SurfaceError, VideoSurface,
};

use crate::engine::Shared;
use crate::helpers::yuv::{pack_rgba, pack_yuv420};
use crate::{seek, sync};

const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Jitter above this (seconds of frame-interval deviation) selects the
/// heavier alpha low-pass.
const JITTER_HEAVY: f64 = 0.010;
const ALPHA_COEFF_CALM: f64 = 0.70;
const ALPHA_COEFF_JITTERY: f64 = 0.85;

pub(crate) fn spawn(
    shared: Arc<Shared>,
    surface: Box<dyn VideoSurface>,
    replaced: bool,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vireo-render".into())
        .spawn(move || RenderLoop::new(shared, surface).run(replaced))
        .expect("spawn render thread")
}

// ── Interpolation state ───────────────────────────────────────────────────────

struct InterpState {
    enabled:        bool,
    /// Frames left before Auto may toggle again.
    cooldown:       u32,
    alpha_filtered: f64,
    last_present:   Option<Instant>,
    jitter_avg:     f64,
}

impl InterpState {
    fn new() -> Self {
        Self {
            enabled: false,
            cooldown: 0,
            alpha_filtered: 0.0,
            last_present: None,
            jitter_avg: 0.0,
        }
    }

    /// Auto-toggle with hysteresis: flips only when the cooldown has expired.
    fn resolve(&mut self, mode: InterpolationMode, queue_len: usize, playing: bool, hysteresis: u32) -> bool {
        match mode {
            InterpolationMode::ForceOn => return true,
            InterpolationMode::ForceOff => return false,
            InterpolationMode::Auto => {}
        }
        let want = queue_len >= 2 && playing;
        if want != self.enabled {
            if self.cooldown == 0 {
                self.enabled = want;
                self.cooldown = hysteresis;
            }
        }
        self.cooldown = self.cooldown.saturating_sub(1);
        self.enabled
    }

    /// Track inter-present jitter for the alpha filter coefficient.
    fn note_present(&mut self, expected_interval: f64) {
        let now = Instant::now();
        if let Some(last) = self.last_present {
            let observed = now.duration_since(last).as_secs_f64();
            let dev = (observed - expected_interval).abs();
            self.jitter_avg = 0.9 * self.jitter_avg + 0.1 * dev;
        }
        self.last_present = Some(now);
    }

    fn filter_alpha(&mut self, raw: f64) -> f64 {
        let coeff = if self.jitter_avg > JITTER_HEAVY {
            ALPHA_COEFF_JITTERY
        } else {
            ALPHA_COEFF_CALM
        };
        self.alpha_filtered = coeff * self.alpha_filtered + (1.0 - coeff) * raw;
        self.alpha_filtered.clamp(0.0, 1.0)
    }
}

// ── The loop ──────────────────────────────────────────────────────────────────

type ScalerKey = (Pixel, u32, u32, PictureFormat, u32, u32);

struct RenderLoop {
    shared:      Arc<Shared>,
    surface:     Box<dyn VideoSurface>,
    scaler:      Option<(ScalerKey, SwsContext)>,
    /// Reusable pack buffer; after a swap it still holds the presented
    /// pixels, which is what the pause path re-uploads.
    picture:     Picture,
    last_params: RenderParams,
    has_picture: bool,
    warmed:      bool,
    interp:      InterpState,
}

impl RenderLoop {
    fn new(shared: Arc<Shared>, surface: Box<dyn VideoSurface>) -> Self {
        Self {
            shared,
            surface,
            scaler: None,
            picture: Picture {
                format: PictureFormat::Yuv420,
                width: 0,
                height: 0,
                data: Vec::new(),
            },
            last_params: RenderParams::default(),
            has_picture: false,
            warmed: false,
            interp: InterpState::new(),
        }
    }

    fn run(mut self, replaced: bool) {
        // Bind + dummy swap opens the AVSync gate; until then the demuxer
        // idles and nothing downstream moves.
        if let Err(e) = self.surface.bind().and_then(|_| self.surface.swap()) {
            warn!("surface bind failed: {e}");
            self.shared.emit_surface_lost();
            self.shared
                .latch_error(PlayerError::SurfaceLost(e.to_string()));
            return;
        }

        let first_open = !self.shared.gate.open.swap(true, Ordering::SeqCst);
        self.shared.gate.valid.store(true, Ordering::SeqCst);
        if replaced {
            self.shared.emit_surface_replaced();
        } else {
            self.shared.emit_surface_ready();
        }
        if first_open {
            self.shared.emit_decode_started();
        }
        // A play() issued before the surface existed starts now.
        if self.shared.pending_play.swap(false, Ordering::SeqCst) {
            self.shared.begin_playing();
        }
        info!("render loop started (surface {:?})", self.surface.size());

        let vsync = Duration::from_secs_f64(self.shared.cfg.vsync_interval);

        while !self.stopping() {
            if self.shared.seek.lock().in_progress {
                self.seek_drain();
                continue;
            }

            if *self.shared.mode.lock() == PlaybackMode::FrameStep {
                if self.service_frame_step() {
                    continue;
                }
            }

            if self.render_parked_first_frame() {
                continue;
            }

            let playing = self.shared.is_playing();
            if !playing {
                self.represent_held();
                thread::sleep(vsync);
                continue;
            }

            // Render-stage backpressure: the decoder may fill the ring to 16,
            // but only a few frames of lookahead are useful on screen.
            while self.shared.video.frames.len() > self.shared.cfg.video_queue_render_cap {
                self.shared.video.frames.drop_oldest();
                self.shared
                    .diag
                    .drops_backpressure
                    .fetch_add(1, Ordering::Relaxed);
            }

            // Jitter buffer: required once after start and after every seek.
            if !self.warmed {
                if self.shared.video.frames.len() < self.shared.cfg.jitter_warmup_frames
                    && !self.shared.video.finished.load(Ordering::SeqCst)
                {
                    thread::sleep(IDLE_SLEEP);
                    continue;
                }
                self.warmed = true;
            }

            if self.shared.sync.recovering() {
                self.hard_resync_purge();
            }

            let current_serial = self.shared.serial.load(Ordering::SeqCst);
            let Some((pts0, serial0, pts1)) = self
                .shared
                .video
                .frames
                .with_front(|f, next| (f.pts, f.serial, next.map(|n| n.pts)))
            else {
                if self.check_eof() {
                    thread::sleep(vsync);
                } else {
                    self.maybe_buffering();
                    thread::sleep(IDLE_SLEEP);
                }
                continue;
            };

            if serial0 != current_serial {
                self.shared.video.frames.advance();
                self.shared.diag.drops_stale.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.maybe_unbuffering();

            let frame_duration = self.shared.video.frames.estimated_frame_duration();
            let master = self.shared.master_now();
            match self.shared.sync.classify(pts0, frame_duration, master) {
                sync::Verdict::Drop(reason) => {
                    self.shared.video.frames.advance();
                    match reason {
                        sync::DropReason::Late => {
                            self.shared.diag.drops_late.fetch_add(1, Ordering::Relaxed)
                        }
                        sync::DropReason::Garbage => {
                            self.shared.diag.drops_garbage.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                    // No sleep: catch up immediately.
                }
                sync::Verdict::Hold => {
                    self.shared.diag.holds.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(IDLE_SLEEP);
                }
                sync::Verdict::Render { forced } => {
                    if forced {
                        self.shared
                            .diag
                            .forced_renders
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    self.present_front(pts0, pts1, master, frame_duration);
                    thread::sleep(vsync);
                }
            }
        }

        info!("render loop finished");
        // The surface is dropped here, on the thread that owned its context.
    }

    fn stopping(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
            || self.shared.render_stop.load(Ordering::SeqCst)
    }

    // ── Seek drain ────────────────────────────────────────────────────────────

    /// Phase-2 presentation: discard everything before the target, present
    /// the first qualifying frame with sync disabled, and close the seek.
    fn seek_drain(&mut self) {
        let (target, tol) = {
            let s = self.shared.seek.lock();
            (s.target_sec, self.shared.cfg.seek_tolerance)
        };
        let current_serial = self.shared.serial.load(Ordering::SeqCst);

        while !self.stopping() {
            if !self.shared.seek.lock().in_progress {
                return; // watchdog abandoned it
            }
            let Some((pts, serial)) = self
                .shared
                .video
                .frames
                .with_front(|f, _| (f.pts, f.serial))
            else {
                thread::sleep(Duration::from_millis(1));
                continue;
            };
            if serial != current_serial || pts < target - tol {
                self.shared.video.frames.advance();
                self.shared.diag.drops_stale.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // First qualifying frame: present it regardless of sync policy.
            match self.upload_front(0.0) {
                Ok(()) => {
                    self.shared.set_video_clock_after_swap(pts);
                    // Ends the video-first window; audio resume rides on the
                    // seek closure below.
                    self.shared.sync.on_frame_presented(pts);
                    self.shared.video.frames.advance();
                    self.warmed = false;
                    debug!("post-seek frame presented at {pts:.3}s (target {target:.3}s)");
                    seek::complete(&self.shared, pts);
                }
                Err(fatal) => {
                    if fatal {
                        return;
                    }
                    self.shared.video.frames.advance();
                }
            }
            return;
        }
    }

    // ── Frame-step ────────────────────────────────────────────────────────────

    /// Service a pending step-forward. Step-backward runs through the seek
    /// path (`step_mode`) and never reaches here. Returns true when it
    /// consumed the iteration.
    fn service_frame_step(&mut self) -> bool {
        let pending = { self.shared.step_request.lock().take() };
        let Some(dir) = pending else {
            // Step mode with nothing to do: keep the surface alive.
            self.represent_held();
            thread::sleep(IDLE_SLEEP);
            return true;
        };
        if dir < 0 {
            return true; // backward steps are fully handled by the seek path
        }

        let current_serial = self.shared.serial.load(Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_millis(500);
        while !self.stopping() && Instant::now() < deadline {
            let Some((pts, serial)) = self
                .shared
                .video
                .frames
                .with_front(|f, _| (f.pts, f.serial))
            else {
                if self.shared.video.finished.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            };
            if serial != current_serial {
                self.shared.video.frames.advance();
                continue;
            }
            if self.upload_front(0.0).is_ok() {
                self.shared.set_video_clock_after_swap(pts);
                self.shared.video.frames.advance();
                self.shared.store_position(pts);
                self.shared.emit_frame_stepped(pts);
            }
            return true;
        }
        true
    }

    // ── First frame ───────────────────────────────────────────────────────────

    /// The first decoded frame is parked by the decoder and shown
    /// unconditionally — short files can hit EOF before the sync machinery
    /// would ever admit it.
    fn render_parked_first_frame(&mut self) -> bool {
        if self.shared.video.first_frame_rendered.load(Ordering::SeqCst) {
            return false;
        }
        let parked = { self.shared.video.first_frame.lock().take() };
        let Some((frame, pts)) = parked else {
            return false;
        };

        match self.upload_frame(&frame, 0.0) {
            Ok(()) => {
                self.shared.video.first_frame_rendered.store(true, Ordering::SeqCst);
                self.shared.set_video_clock_after_swap(pts);
                self.shared.sync.on_frame_presented(pts);
                self.shared.store_position(pts);
                self.shared.emit_first_frame();
                // The queue still holds this frame (the decoder pushed it
                // too); the duplicate present is cheaper than a lost first
                // frame and the policy pass consumes it next iteration.
                info!("first frame presented at {pts:.3}s");
            }
            Err(_) => {
                // Transient surface trouble: park it again for the next try.
                *self.shared.video.first_frame.lock() = Some((frame, pts));
                thread::sleep(IDLE_SLEEP);
            }
        }
        true
    }

    // ── Held-frame re-present ─────────────────────────────────────────────────

    fn represent_held(&mut self) {
        if !self.has_picture {
            return;
        }
        let params = self.last_params;
        if let Err(e) = self
            .surface
            .upload(&self.picture, &params)
            .and_then(|_| self.surface.swap())
        {
            if matches!(e, SurfaceError::ContextLost) {
                self.fatal_surface(e);
            }
        }
        // Clock untouched: nothing new was presented.
    }

    // ── Main present path ─────────────────────────────────────────────────────

    fn present_front(
        &mut self,
        pts0: f64,
        pts1: Option<f64>,
        master: Option<f64>,
        frame_duration: f64,
    ) {
        let mode = *self.shared.interp_mode.lock();
        let queue_len = self.shared.video.frames.len();
        let interp_on = self.interp.resolve(
            mode,
            queue_len,
            true,
            self.shared.cfg.interp_hysteresis_frames,
        );

        let mut alpha = 0.0_f64;
        if interp_on {
            if let (Some(p1), Some(m)) = (pts1, master) {
                let gap = p1 - pts0;
                if gap > self.shared.cfg.interp_min_gap && gap < self.shared.cfg.interp_max_gap {
                    let raw = ((m - pts0) / gap).clamp(0.0, 1.0);
                    alpha = self.interp.filter_alpha(raw);
                }
            }
        }

        match self.upload_front(alpha as f32) {
            Ok(()) => {}
            Err(fatal) => {
                if !fatal {
                    self.shared.video.frames.advance();
                }
                return;
            }
        }

        self.shared.set_video_clock_after_swap(pts0);
        if self.shared.sync.on_frame_presented(pts0) && self.shared.is_playing() {
            if let Some(audio) = &self.shared.audio {
                audio.ctrl.resume();
            }
        }
        self.shared.store_position(pts0);
        self.shared.emit_play_started();
        self.interp.note_present(frame_duration);

        // Low-rate instrumentation for hosts that chart pipeline health.
        let swaps = self.shared.diag.swaps.load(Ordering::Relaxed);
        if swaps % 300 == 0 {
            self.shared.emit_diagnostic("swaps", swaps as i64);
            self.shared.emit_diagnostic(
                "drops_late",
                self.shared.diag.drops_late.load(Ordering::Relaxed) as i64,
            );
        }

        // Advance unless an interpolated blend still owes time to this frame;
        // a held blend re-renders next vsync with a larger alpha.
        if !interp_on || alpha >= 1.0 - f64::EPSILON || pts1.is_none() {
            self.shared.video.frames.advance();
        }
    }

    /// Pack + upload + swap the queue's front frame. Err(true) is fatal
    /// (context lost, loop must exit), Err(false) is a skippable failure.
    fn upload_front(&mut self, alpha: f32) -> Result<(), bool> {
        // Clone out under the queue lock; packing outside keeps the lock
        // narrow (the decoder pushes while we convert).
        let frame = self
            .shared
            .video
            .frames
            .with_front(|f, _| f.frame.clone())
            .ok_or(false)?;
        self.upload_frame(&frame, alpha).map_err(|_| {
            matches!(self.last_surface_error(), Some(SurfaceError::ContextLost))
        })
    }

    fn upload_frame(&mut self, frame: &VideoFrame, alpha: f32) -> Result<(), SurfaceError> {
        let wanted = self.surface.preferred_format();
        self.pack(frame, wanted)?;

        let (sw, sh) = self.surface.size();
        let viewport = *self.shared.viewport.lock();
        let (vw, vh, rotation, fit) = match viewport {
            Some(v) => (v.width, v.height, v.rotation, v.fit),
            None => (sw, sh, 0, *self.shared.fit.lock()),
        };
        let (scale_x, scale_y) = fit_scale(fit, vw, vh, self.picture.width, self.picture.height, rotation);

        let params = RenderParams {
            scale_x,
            scale_y,
            alpha,
            matrix: ColorMatrix::for_dimensions(self.picture.width, self.picture.height),
            hdr: false,
            rotation,
        };

        let result = self
            .surface
            .upload(&self.picture, &params)
            .and_then(|_| self.surface.swap());
        match result {
            Ok(()) => {
                self.last_params = params;
                self.has_picture = true;
                self.set_last_surface_error(None);
                Ok(())
            }
            Err(e) => {
                if matches!(e, SurfaceError::ContextLost) {
                    self.fatal_surface(e.clone());
                } else {
                    warn!("upload/swap failed: {e}");
                }
                self.set_last_surface_error(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Convert a decoder frame into the packed format the surface wants,
    /// reusing the scaler while the geometry is stable.
    fn pack(&mut self, frame: &VideoFrame, wanted: PictureFormat) -> Result<(), SurfaceError> {
        let src_fmt = frame.format();
        let (dst_w, dst_h, dst_pix) = match wanted {
            // GL-style surfaces take the full-resolution planes.
            PictureFormat::Yuv420 => (frame.width(), frame.height(), Pixel::YUV420P),
            // Texture surfaces want RGBA at their registered size.
            PictureFormat::Rgba => {
                let (w, h) = self.surface.size();
                (w, h, Pixel::RGBA)
            }
        };

        let direct = wanted == PictureFormat::Yuv420
            && src_fmt == Pixel::YUV420P
            && (frame.width(), frame.height()) == (dst_w, dst_h);
        if direct {
            pack_yuv420(frame, &mut self.picture);
            return Ok(());
        }

        let key: ScalerKey = (src_fmt, frame.width(), frame.height(), wanted, dst_w, dst_h);
        if self.scaler.as_ref().map(|(k, _)| *k) != Some(key) {
            let ctx = SwsContext::get(
                src_fmt, frame.width(), frame.height(),
                dst_pix, dst_w, dst_h,
                Flags::BILINEAR,
            )
            .map_err(|e| SurfaceError::Failed(format!("swscale: {e}")))?;
            self.scaler = Some((key, ctx));
        }

        let mut converted = VideoFrame::empty();
        self.scaler
            .as_mut()
            .unwrap()
            .1
            .run(frame, &mut converted)
            .map_err(|e| SurfaceError::Failed(format!("scale: {e}")))?;

        match wanted {
            PictureFormat::Yuv420 => pack_yuv420(&converted, &mut self.picture),
            PictureFormat::Rgba => pack_rgba(&converted, &mut self.picture),
        }
        Ok(())
    }

    // ── Recovery & completion ─────────────────────────────────────────────────

    /// Hard resync: purge everything older than the audio backlog window so
    /// the next present re-anchors the video clock at the master.
    fn hard_resync_purge(&mut self) {
        let Some(anchor) = self.shared.audio_clock.now() else {
            return;
        };
        let cutoff = anchor - self.shared.cfg.hard_resync_backlog;
        let mut purged = 0usize;
        while let Some(pts) = self.shared.video.frames.with_front(|f, _| f.pts) {
            if pts >= cutoff {
                break;
            }
            self.shared.video.frames.drop_oldest();
            purged += 1;
        }
        if purged > 0 {
            self.shared.diag.hard_resyncs.fetch_add(1, Ordering::Relaxed);
            self.shared.video_clock.reset(anchor);
            warn!("hard resync: purged {purged} frames behind {cutoff:.3}s");
        }
    }

    /// EOF closure: natural completion is the only emitter of
    /// playbackCompleted.
    fn check_eof(&mut self) -> bool {
        if !self.shared.eof.load(Ordering::SeqCst)
            || !self.shared.video.finished.load(Ordering::SeqCst)
            || !self.shared.video.frames.is_empty()
        {
            return false;
        }
        if let Some(audio) = &self.shared.audio {
            let audio_done = audio.ctrl.is_dead()
                || (audio.ctrl.finished.load(Ordering::SeqCst) && audio.frames.is_empty());
            if !audio_done {
                return false;
            }
        }
        if self.shared.state() == PlaybackState::Playing
            || self.shared.state() == PlaybackState::Buffering
        {
            info!("playback completed (eof)");
            self.shared.set_state(PlaybackState::Eof);
            self.shared.video_clock.pause(true);
            self.shared.audio_clock.pause(true);
            if let Some(audio) = &self.shared.audio {
                audio.ctrl.pause();
            }
            self.shared.emit_playback_completed("eof");
        }
        true
    }

    fn maybe_buffering(&self) {
        if self.shared.state() == PlaybackState::Playing
            && !self.shared.eof.load(Ordering::SeqCst)
            && !self.shared.video.finished.load(Ordering::SeqCst)
        {
            self.shared.set_state(PlaybackState::Buffering);
        }
    }

    fn maybe_unbuffering(&self) {
        if self.shared.state() == PlaybackState::Buffering {
            self.shared.set_state(PlaybackState::Playing);
        }
    }

    fn fatal_surface(&self, e: SurfaceError) {
        warn!("surface context lost: {e}");
        self.shared.emit_surface_lost();
        self.shared
            .latch_error(PlayerError::SurfaceLost(e.to_string()));
        self.shared.render_stop.store(true, Ordering::SeqCst);
    }

    // Tiny cell so upload_front can tell fatal from skippable after the fact.
    fn set_last_surface_error(&self, e: Option<SurfaceError>) {
        *self.shared.video.last_surface_error.lock() = e;
    }

    fn last_surface_error(&self) -> Option<SurfaceError> {
        self.shared.video.last_surface_error.lock().clone()
    }
}
