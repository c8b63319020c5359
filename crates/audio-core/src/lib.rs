//! Audio routing, sound registry and the audio manager thread
//!
//! This crate owns everything that happens on the dedicated audio
//! thread of a calling client:
//!
//! - **Routing**: a deterministic state machine selecting the playback
//!   device (earpiece / speaker / headset / Bluetooth) as hardware and
//!   call-state events arrive
//! - **Sound registry**: named sound clips with mixing, in-call,
//!   intensity and priority policy
//! - **Manager thread**: a message-queue-driven worker owning the
//!   platform device layer; callers post commands from any thread
//! - **Fake audio device**: a memory-backed device for tests, pacing
//!   record/playout callbacks at the frame interval
//!
//! The platform device layer is process-wide state; its lifecycle is
//! explicit (`init`/`terminate` on the audio thread), never implicit
//! static construction.

pub mod device;
pub mod error;
pub mod manager;
pub mod platform;
pub mod router;
pub mod sounds;

pub use device::{AudioTransport, FakeAudioDevice, FRAME_LEN, FRAME_LEN_MS, FS_KHZ};
pub use error::{Error, Result};
pub use manager::{AudioManager, CallState, CallStateHandler, RouteChangedHandler};
pub use platform::{AudioPlatform, TestAudioPlatform};
pub use router::{AudioRoute, AudioRouter, RouteEvent, RouterState};
pub use sounds::{
    SoundEntry, SoundMode, SoundRegistry, INTENSITY_THRES_ALL, INTENSITY_THRES_NONE,
    INTENSITY_THRES_SOME,
};
