// crates/vireo-engine/src/lib.rs
//
// The playback engine: demux → packet queues → decoders → frame queues →
// render scheduler / audio renderer, coordinated by epoch serials, two gates
// and one lifecycle state machine. See DESIGN.md for the module map.

pub mod audio;
pub mod clock;
pub mod decode;
pub mod demux;
pub mod engine;
pub mod frame_queue;
pub mod hwaccel;
pub mod packet_queue;
pub mod preview;
pub mod render;
pub mod seek;
pub mod sink_cpal;
pub mod sync;
pub mod texture;
pub mod watchdog;
mod helpers;   // internal — not pub, not re-exported

pub use engine::Engine;
pub use preview::{preview_frame, preview_to_png};
pub use sink_cpal::CpalSink;
pub use texture::TextureSurface;
pub use vireo_core::{
    AudioLifecycle, AudioSink, EngineConfig, EventReceiver, FitMode, InterpolationMode,
    PlaybackMode, PlaybackState, PlayerError, PlayerEvent, PlayerToken, VideoSurface,
};
