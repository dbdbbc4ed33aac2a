// crates/vireo-core/src/state.rs
//
// Playback and audio lifecycle state machines. The transition table is the
// single source of truth — the engine refuses (and logs) anything not listed
// here rather than trusting call order.

use serde::Serialize;

// ── Playback ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Idle,
    Preparing,
    Ready,
    Playing,
    Paused,
    Seeking,
    Buffering,
    Eof,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackMode {
    /// Normal audio + video playback.
    Av,
    /// Backgrounded: render loop stopped, audio keeps running.
    AudioOnly,
    /// Single-frame stepping: render loop idle, sync disabled.
    FrameStep,
}

impl PlaybackState {
    /// Whether `self → to` is a legal transition.
    ///
    /// `Error` is quiescent: the only way out is dispose, which destroys the
    /// context rather than transitioning it.
    pub fn can_transition(self, to: PlaybackState) -> bool {
        use PlaybackState::*;
        if self == to {
            return true; // idempotent set_state is always allowed
        }
        match self {
            Idle      => matches!(to, Preparing),
            Preparing => matches!(to, Ready | Error),
            Ready     => matches!(to, Playing | Paused | Seeking | Error),
            Playing   => matches!(to, Paused | Seeking | Buffering | Eof | Error),
            Paused    => matches!(to, Playing | Seeking | Buffering | Error),
            Seeking   => matches!(to, Playing | Paused | Buffering | Error),
            Buffering => matches!(to, Playing | Paused | Seeking | Eof | Error),
            Eof       => matches!(to, Seeking | Playing | Paused | Error),
            Error     => false,
        }
    }

    /// States in which the pipeline is expected to be moving frames.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Seeking | PlaybackState::Buffering)
    }
}

// ── Audio lifecycle ───────────────────────────────────────────────────────────

/// The audio subsystem's own lattice. `NoAudio` and `Dead` are terminal:
/// once the file has no audio stream, or the sink has been declared
/// undriveable, nothing re-enters the audio path for this engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioLifecycle {
    NoAudio,
    Initializing,
    Initialized,
    Playing,
    Paused,
    /// The platform stopped the sink underneath us (device switch, focus loss).
    StoppedBySystem,
    Dead,
}

impl AudioLifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, AudioLifecycle::NoAudio | AudioLifecycle::Dead)
    }

    pub fn can_transition(self, to: AudioLifecycle) -> bool {
        use AudioLifecycle::*;
        if self == to {
            return true;
        }
        match self {
            NoAudio         => false,
            Initializing    => matches!(to, Initialized | Dead),
            Initialized     => matches!(to, Playing | Paused | StoppedBySystem | Dead),
            Playing         => matches!(to, Paused | StoppedBySystem | Dead),
            Paused          => matches!(to, Playing | StoppedBySystem | Dead),
            StoppedBySystem => matches!(to, Dead),
            Dead            => false,
        }
    }

    /// Wire name used in `audioState` event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioLifecycle::NoAudio         => "noAudio",
            AudioLifecycle::Initializing    => "initializing",
            AudioLifecycle::Initialized     => "initialized",
            AudioLifecycle::Playing         => "playing",
            AudioLifecycle::Paused          => "paused",
            AudioLifecycle::StoppedBySystem => "stoppedBySystem",
            AudioLifecycle::Dead            => "dead",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlaybackState::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [Idle, Preparing, Ready, Playing, Paused, Playing, Eof];
        for w in path.windows(2) {
            assert!(w[0].can_transition(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn seek_round_trips_from_play_and_pause() {
        assert!(Playing.can_transition(Seeking));
        assert!(Paused.can_transition(Seeking));
        assert!(Seeking.can_transition(Playing));
        assert!(Seeking.can_transition(Paused));
        // Replay after natural EOF goes through a seek.
        assert!(Eof.can_transition(Seeking));
    }

    #[test]
    fn eof_is_reachable_from_buffering() {
        // The queue can drain to empty right before the container ends; the
        // completion path then fires while still Buffering.
        assert!(Buffering.can_transition(Eof));
    }

    #[test]
    fn error_is_quiescent() {
        for to in [Idle, Preparing, Ready, Playing, Paused, Seeking, Buffering, Eof] {
            assert!(!Error.can_transition(to));
        }
        assert!(Error.can_transition(Error));
    }

    #[test]
    fn cannot_skip_prepare() {
        assert!(!Idle.can_transition(Playing));
        assert!(!Idle.can_transition(Ready));
        assert!(!Preparing.can_transition(Playing));
    }

    #[test]
    fn audio_terminal_states_stay_terminal() {
        use AudioLifecycle::*;
        for to in [Initializing, Initialized, Playing, Paused, StoppedBySystem] {
            assert!(!NoAudio.can_transition(to));
            assert!(!Dead.can_transition(to));
        }
        assert!(StoppedBySystem.can_transition(Dead));
        assert!(!StoppedBySystem.can_transition(Playing));
    }
}
