// crates/vireo-core/src/events.rs
//
// Typed events flowing from the engine to the host over a bounded channel.
// The engine never blocks on a full channel and never calls back into host
// code; the host drains the receiver on its own loop.
//
// Every payload echoes the player token so a host multiplexing several
// engine instances over one channel can route by token alone.

use serde::Serialize;

use crate::state::AudioLifecycle;

/// Host-chosen integer identifying one engine instance across events.
pub type PlayerToken = i64;

/// Receiving half handed to the host by `prepare`.
pub type EventReceiver = crossbeam_channel::Receiver<PlayerEvent>;

#[derive(Debug, Clone, Serialize)]
pub enum PlayerEvent {
    // ── One-shot per engine lifetime ──────────────────────────────────────────
    Prepared       { token: PlayerToken, has_audio: bool, duration_ms: i64 },
    Duration       { token: PlayerToken, ms: i64 },
    FirstFrame     { token: PlayerToken },
    PlaybackCompleted { token: PlayerToken, reason: &'static str },

    // ── One-shot per logical occurrence ───────────────────────────────────────
    SurfaceReady   { token: PlayerToken },
    SurfaceReplaced { token: PlayerToken },
    SurfaceLost    { token: PlayerToken },
    FirstFrameAfterSeek { token: PlayerToken, pts_ms: i64 },
    FrameStepped   { token: PlayerToken, pts_ms: i64 },
    DecodeStarted  { token: PlayerToken },
    PlayAccepted   { token: PlayerToken },
    PlayStarted    { token: PlayerToken },
    Paused         { token: PlayerToken },
    AudioState     { token: PlayerToken, state: AudioLifecycle },
    Error          { token: PlayerToken, message: String },

    // ── Low-rate instrumentation ──────────────────────────────────────────────
    Diagnostic     { token: PlayerToken, key: &'static str, value: i64 },
}

impl PlayerEvent {
    pub fn token(&self) -> PlayerToken {
        match *self {
            PlayerEvent::Prepared { token, .. }
            | PlayerEvent::Duration { token, .. }
            | PlayerEvent::FirstFrame { token }
            | PlayerEvent::PlaybackCompleted { token, .. }
            | PlayerEvent::SurfaceReady { token }
            | PlayerEvent::SurfaceReplaced { token }
            | PlayerEvent::SurfaceLost { token }
            | PlayerEvent::FirstFrameAfterSeek { token, .. }
            | PlayerEvent::FrameStepped { token, .. }
            | PlayerEvent::DecodeStarted { token }
            | PlayerEvent::PlayAccepted { token }
            | PlayerEvent::PlayStarted { token }
            | PlayerEvent::Paused { token }
            | PlayerEvent::AudioState { token, .. }
            | PlayerEvent::Error { token, .. }
            | PlayerEvent::Diagnostic { token, .. } => token,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Prepared { .. }            => "prepared",
            PlayerEvent::Duration { .. }            => "duration",
            PlayerEvent::FirstFrame { .. }          => "firstFrame",
            PlayerEvent::PlaybackCompleted { .. }   => "playbackCompleted",
            PlayerEvent::SurfaceReady { .. }        => "surfaceReady",
            PlayerEvent::SurfaceReplaced { .. }     => "surfaceReplaced",
            PlayerEvent::SurfaceLost { .. }         => "surfaceLost",
            PlayerEvent::FirstFrameAfterSeek { .. } => "firstFrameAfterSeek",
            PlayerEvent::FrameStepped { .. }        => "frameStepped",
            PlayerEvent::DecodeStarted { .. }       => "decodeStarted",
            PlayerEvent::PlayAccepted { .. }        => "playAccepted",
            PlayerEvent::PlayStarted { .. }         => "playStarted",
            PlayerEvent::Paused { .. }              => "paused",
            PlayerEvent::AudioState { .. }          => "audioState",
            PlayerEvent::Error { .. }               => "error",
            PlayerEvent::Diagnostic { .. }          => "diagnostic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_echoed() {
        let e = PlayerEvent::Prepared { token: 7, has_audio: true, duration_ms: 5000 };
        assert_eq!(e.token(), 7);
        let e = PlayerEvent::Diagnostic { token: 3, key: "swaps", value: 42 };
        assert_eq!(e.token(), 3);
    }

    #[test]
    fn events_serialize_for_host_bridges() {
        let e = PlayerEvent::FirstFrameAfterSeek { token: 1, pts_ms: 2500 };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("2500"));
    }
}
