// crates/vireo-core/src/sink.rs
//
// The audio output capability. The engine feeds interleaved f32 PCM at the
// sink's own rate/layout and derives the audio clock from what it wrote —
// never from the sink's playback-head position, which freezes on some
// platforms.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The sink buffer is full right now; retry after a short backoff.
    #[error("sink full")]
    Full,
    /// The sink cannot be driven any more.
    #[error("sink dead: {0}")]
    Dead(String),
}

/// Output format the engine must resample to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub rate:     u32,
    pub channels: u16,
}

impl AudioSpec {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }
}

/// A drivable audio output.
///
/// `write` takes interleaved f32 samples and returns the number of *frames*
/// accepted, which may be short. `latency` must be a stable estimate of the
/// delay between a written sample and the speaker.
pub trait AudioSink: Send {
    fn spec(&self) -> AudioSpec;

    fn start(&mut self) -> Result<(), SinkError>;
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    /// Drop all queued samples (seek).
    fn flush(&mut self);

    fn write(&mut self, interleaved: &[f32]) -> Result<usize, SinkError>;
    fn latency(&self) -> f64;
    fn is_playing(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_counts_all_channels() {
        assert_eq!(AudioSpec { rate: 48000, channels: 2 }.frame_bytes(), 8);
        assert_eq!(AudioSpec { rate: 44100, channels: 1 }.frame_bytes(), 4);
    }
}
