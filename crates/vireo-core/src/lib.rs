// crates/vireo-core/src/lib.rs
//
// Plain data types shared between the engine and its hosts.
// No FFmpeg, no GPU, no audio device — just the vocabulary.

pub mod config;
pub mod error;
pub mod events;
pub mod sink;
pub mod state;
pub mod surface;
pub mod time;

pub use config::EngineConfig;
pub use error::PlayerError;
pub use events::{EventReceiver, PlayerEvent, PlayerToken};
pub use sink::{AudioSink, AudioSpec, SinkError};
pub use state::{AudioLifecycle, PlaybackMode, PlaybackState};
pub use surface::{
    fit_scale, ColorMatrix, FitMode, InterpolationMode, Picture, PictureFormat, RenderParams,
    SurfaceError, VideoSurface, Viewport,
};
