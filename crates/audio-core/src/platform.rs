//! Platform audio-device abstraction
//!
//! The process-wide audio device layer (route switching, sound playback,
//! call audio session management) sits behind [`AudioPlatform`]. The
//! audio manager thread owns the one instance; lifecycle is explicit
//! through [`AudioPlatform::init`] and [`AudioPlatform::terminate`] on
//! that thread.

use std::collections::HashSet;

use crate::error::Result;
use crate::router::AudioRoute;
use crate::sounds::SoundEntry;

/// Platform audio-device operations, implemented per OS
pub trait AudioPlatform: Send {
    /// One-time setup on the audio thread
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Teardown on the audio thread
    fn terminate(&mut self) {}

    /// The route the platform currently reports
    fn current_route(&self) -> AudioRoute;

    /// Switch playback to `route`
    fn enable_route(&mut self, route: AudioRoute) -> Result<()>;

    /// The device enters call mode (voice processing on)
    fn enter_call(&mut self) {}

    /// The device leaves call mode
    fn exit_call(&mut self) {}

    /// Start playing a registered sound
    fn play_sound(&mut self, entry: &SoundEntry);

    /// Pause a playing sound
    fn pause_sound(&mut self, entry: &SoundEntry);

    /// Stop a playing sound
    fn stop_sound(&mut self, entry: &SoundEntry);

    /// Whether the named sound is currently playing
    fn is_sound_playing(&self, name: &str) -> bool;
}

/// In-memory platform for tests: tracks the route it was asked to set
/// and which sounds are "playing" without touching any hardware.
#[derive(Debug, Default)]
pub struct TestAudioPlatform {
    route: AudioRoute,
    stuck: bool,
    playing: HashSet<String>,

    /// True between `enter_call` and `exit_call`
    pub in_platform_call: bool,

    /// Every route switch requested, in order
    pub switches: Vec<AudioRoute>,
}

impl TestAudioPlatform {
    /// Platform starting on `initial` that honors every switch
    pub fn new(initial: AudioRoute) -> Self {
        Self {
            route: initial,
            ..Default::default()
        }
    }

    /// Platform that accepts switches but never changes its route (for
    /// exercising the optimistic-adoption path)
    pub fn stuck(initial: AudioRoute) -> Self {
        Self {
            route: initial,
            stuck: true,
            ..Default::default()
        }
    }

    /// Names of currently playing sounds
    pub fn playing(&self) -> &HashSet<String> {
        &self.playing
    }
}

impl AudioPlatform for TestAudioPlatform {
    fn current_route(&self) -> AudioRoute {
        self.route
    }

    fn enable_route(&mut self, route: AudioRoute) -> Result<()> {
        self.switches.push(route);
        if !self.stuck {
            self.route = route;
        }
        Ok(())
    }

    fn enter_call(&mut self) {
        self.in_platform_call = true;
    }

    fn exit_call(&mut self) {
        self.in_platform_call = false;
    }

    fn play_sound(&mut self, entry: &SoundEntry) {
        self.playing.insert(entry.name.clone());
    }

    fn pause_sound(&mut self, entry: &SoundEntry) {
        self.playing.remove(&entry.name);
    }

    fn stop_sound(&mut self, entry: &SoundEntry) {
        self.playing.remove(&entry.name);
    }

    fn is_sound_playing(&self, name: &str) -> bool {
        self.playing.contains(name)
    }
}
