// crates/vireo-engine/src/sink_cpal.rs
//
// AudioSink over the default cpal output device. The engine writes
// interleaved f32; a shared ring feeds the device callback, which converts
// to whatever sample format the device wants and zero-fills on underrun.
//
// The cpal stream itself is created in start() — on the audio render thread —
// because cpal streams must live on the thread that drives them on some
// backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use log::{error, warn};
use vireo_core::{AudioSink, AudioSpec, SinkError};

/// Ring capacity in seconds of audio; writes beyond this report Full.
const RING_SECONDS: f64 = 0.25;

struct Ring {
    samples:  Mutex<VecDeque<f32>>,
    capacity: usize,
    underruns: AtomicBool,
}

pub struct CpalSink {
    device:   cpal::Device,
    config:   cpal::SupportedStreamConfig,
    spec:     AudioSpec,
    ring:     Arc<Ring>,
    stream:   Option<cpal::Stream>,
    playing:  AtomicBool,
}

// The stream is created, driven and dropped exclusively on the audio render
// thread; the handle only crosses threads before start() is called.
unsafe impl Send for CpalSink {}

impl CpalSink {
    /// Bind the default output device. The stream is not built yet.
    pub fn open() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default audio output device"))?;
        let config = device.default_output_config()?;

        let channels = (config.channels() as u16).min(2).max(1);
        let rate = config.sample_rate().0;
        let spec = AudioSpec { rate, channels };
        let capacity = (rate as f64 * RING_SECONDS) as usize * channels as usize;

        Ok(Self {
            device,
            config,
            spec,
            ring: Arc::new(Ring {
                samples:   Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                underruns: AtomicBool::new(false),
            }),
            stream: None,
            playing: AtomicBool::new(false),
        })
    }

    fn build_stream<T>(&self) -> Result<cpal::Stream, SinkError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let ring = Arc::clone(&self.ring);
        let device_channels = self.config.channels() as usize;
        let logical = self.spec.channels as usize;
        let config: cpal::StreamConfig = self.config.clone().into();

        let data_fn = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut q = ring.samples.lock().unwrap();
            let mut underrun = false;
            for frame in data.chunks_mut(device_channels) {
                // Pop one logical frame; spread it across the device channels.
                let mut logical_frame = [0.0f32; 2];
                for slot in logical_frame.iter_mut().take(logical) {
                    match q.pop_front() {
                        Some(s) => *slot = s,
                        None => underrun = true,
                    }
                }
                for (i, out) in frame.iter_mut().enumerate() {
                    let s = if logical == 1 {
                        logical_frame[0]
                    } else {
                        logical_frame[i.min(1)]
                    };
                    *out = T::from_sample(s);
                }
            }
            if underrun {
                ring.underruns.store(true, Ordering::Relaxed);
            }
        };
        let err_fn = |e| error!("cpal stream error: {e}");

        self.device
            .build_output_stream(&config, data_fn, err_fn, None)
            .map_err(|e| SinkError::Dead(format!("build stream: {e}")))
    }
}

impl AudioSink for CpalSink {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>()?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>()?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>()?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>()?,
            other => return Err(SinkError::Dead(format!("unsupported sample format {other}"))),
        };
        stream
            .play()
            .map_err(|e| SinkError::Dead(format!("play: {e}")))?;
        self.stream = Some(stream);
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.stream = None; // drops (and closes) the device stream
        self.flush();
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("cpal pause: {e}");
            }
        }
        self.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                warn!("cpal resume: {e}");
            }
        }
        self.playing.store(true, Ordering::SeqCst);
    }

    fn flush(&mut self) {
        self.ring.samples.lock().unwrap().clear();
    }

    fn write(&mut self, interleaved: &[f32]) -> Result<usize, SinkError> {
        let channels = self.spec.channels as usize;
        let mut q = self.ring.samples.lock().unwrap();
        let room = self.ring.capacity.saturating_sub(q.len());
        let frames_room = room / channels;
        if frames_room == 0 {
            return Err(SinkError::Full);
        }
        let frames_in = interleaved.len() / channels;
        let frames = frames_in.min(frames_room);
        q.extend(&interleaved[..frames * channels]);
        Ok(frames)
    }

    fn latency(&self) -> f64 {
        // Buffered frames plus a half-ring guess for the device's own buffer.
        let buffered = self.ring.samples.lock().unwrap().len() / self.spec.channels as usize;
        buffered as f64 / self.spec.rate as f64 + 0.010
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}
