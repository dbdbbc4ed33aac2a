// crates/vireo-core/src/error.rs
//
// The public error taxonomy. One PlayerError is latched per engine instance;
// recoverable conditions never surface here (they are logged and skipped at
// the point of failure).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// Container cannot be opened or has no usable streams.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// Decoder initialisation refused or the decoder repeatedly rejected packets.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The surface reported a lost context after a swap.
    #[error("surface lost: {0}")]
    SurfaceLost(String),

    /// Master clock failed to advance for the stall deadline while Playing.
    #[error("master clock stalled")]
    ClockStall,

    /// No frame was presented within the seek deadline.
    #[error("no frame presented after seek")]
    SeekDeadlock,

    /// The audio sink cannot be driven; playback continues with video master.
    #[error("audio sink dead: {0}")]
    AudioDead(String),

    /// Assertion violation. Debug builds abort before constructing this.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlayerError {
    /// Stable machine-readable code, used as the `error` event message prefix.
    pub fn code(&self) -> &'static str {
        match self {
            PlayerError::OpenFailed(_)  => "OPEN_FAILED",
            PlayerError::DecodeFailed(_) => "DECODE_FAILED",
            PlayerError::SurfaceLost(_) => "SURFACE_LOST",
            PlayerError::ClockStall     => "CLOCK_STALL",
            PlayerError::SeekDeadlock   => "SEEK_FRAME_ASSERT_FAILED",
            PlayerError::AudioDead(_)   => "AUDIO_DEAD",
            PlayerError::Internal(_)    => "INTERNAL",
        }
    }

    /// True when playback cannot continue in any mode. `AudioDead` is the one
    /// taxonomy entry the engine survives (it falls back to video master).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlayerError::AudioDead(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(PlayerError::ClockStall.code(), "CLOCK_STALL");
        assert_eq!(PlayerError::SeekDeadlock.code(), "SEEK_FRAME_ASSERT_FAILED");
        assert_eq!(PlayerError::OpenFailed("x".into()).code(), "OPEN_FAILED");
    }

    #[test]
    fn audio_dead_is_survivable() {
        assert!(!PlayerError::AudioDead("sink".into()).is_fatal());
        assert!(PlayerError::ClockStall.is_fatal());
        assert!(PlayerError::SurfaceLost("ctx".into()).is_fatal());
    }
}
