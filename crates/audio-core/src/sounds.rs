//! Sound registry and playback policy
//!
//! Registered sound clips live in a name-keyed registry owned by the
//! audio thread. Playback policy: the intensity threshold filters first,
//! then in-call permission, then priority (a positive priority preempts
//! everything), then the exclusive/mixing rules.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::platform::AudioPlatform;

/// Intensity threshold admitting every sound
pub const INTENSITY_THRES_ALL: i32 = 100;

/// Intensity threshold admitting only important sounds
pub const INTENSITY_THRES_SOME: i32 = 50;

/// Intensity threshold admitting nothing
pub const INTENSITY_THRES_NONE: i32 = 0;

/// Caller-facing sound mode, mapped onto intensity thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundMode {
    /// Play every sound
    All,

    /// Play only important sounds
    Some,

    /// Play nothing
    None,
}

impl SoundMode {
    /// The intensity threshold this mode maps to
    pub fn threshold(&self) -> i32 {
        match self {
            SoundMode::All => INTENSITY_THRES_ALL,
            SoundMode::Some => INTENSITY_THRES_SOME,
            SoundMode::None => INTENSITY_THRES_NONE,
        }
    }
}

/// A registered sound clip
#[derive(Clone)]
pub struct SoundEntry {
    /// Unique name
    pub name: String,

    /// Opaque platform object (player instance, asset handle)
    pub object: Arc<dyn Any + Send + Sync>,

    /// May play concurrently with other mixing sounds
    pub mixing: bool,

    /// Allowed to play during a call
    pub incall: bool,

    /// Intensity; played only when `intensity <= threshold`
    pub intensity: i32,

    /// Positive priority preempts all other sounds
    pub priority: i32,

    /// This sound is the call audio itself
    pub is_call_media: bool,
}

impl std::fmt::Debug for SoundEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundEntry")
            .field("name", &self.name)
            .field("mixing", &self.mixing)
            .field("incall", &self.incall)
            .field("intensity", &self.intensity)
            .field("priority", &self.priority)
            .field("is_call_media", &self.is_call_media)
            .finish()
    }
}

/// Playback situation across the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackMode {
    None,
    Mixing,
    Exclusive,
}

/// Name-keyed sound registry, owned by the audio thread
#[derive(Default)]
pub struct SoundRegistry {
    sounds: HashMap<String, SoundEntry>,
}

impl SoundRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a sound
    pub fn register(&mut self, entry: SoundEntry) {
        self.sounds.insert(entry.name.clone(), entry);
    }

    /// Remove a sound, returning it when present
    pub fn unregister(&mut self, name: &str) -> Option<SoundEntry> {
        self.sounds.remove(name)
    }

    /// Look up a sound by name
    pub fn get(&self, name: &str) -> Option<&SoundEntry> {
        self.sounds.get(name)
    }

    /// Number of registered sounds
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    /// Iterate all registered sounds
    pub fn iter(&self) -> impl Iterator<Item = &SoundEntry> {
        self.sounds.values()
    }

    fn playback_mode(&self, platform: &dyn AudioPlatform) -> PlaybackMode {
        let mut mode = PlaybackMode::None;
        for entry in self.sounds.values() {
            if platform.is_sound_playing(&entry.name) {
                if entry.mixing {
                    mode = PlaybackMode::Mixing;
                } else {
                    return PlaybackMode::Exclusive;
                }
            }
        }
        mode
    }

    /// Whether `to_play` may start now.
    ///
    /// Intensity filters first, then the in-call restriction; a positive
    /// priority overrides the playback-mode rules (the caller stops other
    /// sounds before starting it); otherwise one exclusive sound or any
    /// number of mixing sounds may play.
    pub fn can_play(
        &self,
        platform: &dyn AudioPlatform,
        to_play: &SoundEntry,
        intensity_threshold: i32,
        in_call: bool,
    ) -> bool {
        if to_play.intensity > intensity_threshold {
            return false;
        }
        if !to_play.incall && in_call {
            return false;
        }
        if to_play.priority > 0 {
            return true;
        }
        match self.playback_mode(platform) {
            PlaybackMode::None => true,
            PlaybackMode::Exclusive => false,
            PlaybackMode::Mixing => to_play.mixing,
        }
    }

    /// Stop every sound the platform reports as playing
    pub fn stop_all(&self, platform: &mut dyn AudioPlatform) {
        for entry in self.sounds.values() {
            if platform.is_sound_playing(&entry.name) {
                platform.stop_sound(entry);
            }
        }
    }

    /// Stop sounds that may not continue during a call
    pub fn stop_non_call_sounds(&self, platform: &mut dyn AudioPlatform) {
        for entry in self.sounds.values() {
            if !entry.incall && platform.is_sound_playing(&entry.name) {
                platform.stop_sound(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TestAudioPlatform;
    use crate::router::AudioRoute;

    pub(crate) fn entry(name: &str, priority: i32, mixing: bool) -> SoundEntry {
        SoundEntry {
            name: name.to_string(),
            object: Arc::new(()),
            mixing,
            incall: false,
            intensity: INTENSITY_THRES_SOME,
            priority,
            is_call_media: false,
        }
    }

    #[test]
    fn test_register_unregister_round_trip() {
        let mut registry = SoundRegistry::new();
        assert!(registry.is_empty());

        registry.register(entry("ringtone", 1, false));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ringtone").is_some());

        registry.unregister("ringtone").unwrap();
        assert!(registry.is_empty());
        assert!(registry.get("ringtone").is_none());
    }

    #[test]
    fn test_intensity_threshold_filters() {
        let mut registry = SoundRegistry::new();
        let platform = TestAudioPlatform::new(AudioRoute::Earpiece);
        let sound = entry("notif", 0, true);
        registry.register(sound.clone());

        assert!(registry.can_play(&platform, &sound, INTENSITY_THRES_ALL, false));
        assert!(registry.can_play(&platform, &sound, INTENSITY_THRES_SOME, false));
        assert!(!registry.can_play(&platform, &sound, INTENSITY_THRES_NONE, false));
    }

    #[test]
    fn test_non_incall_sound_blocked_during_call() {
        let registry = SoundRegistry::new();
        let platform = TestAudioPlatform::new(AudioRoute::Earpiece);
        let sound = entry("notif", 0, true);

        assert!(registry.can_play(&platform, &sound, INTENSITY_THRES_ALL, false));
        assert!(!registry.can_play(&platform, &sound, INTENSITY_THRES_ALL, true));
    }

    #[test]
    fn test_exclusive_blocks_and_priority_preempts() {
        let mut registry = SoundRegistry::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        let ringtone = entry("ringtone", 1, false);
        let notif = entry("notif", 0, true);
        registry.register(ringtone.clone());
        registry.register(notif.clone());

        // Ringtone playing exclusively: notif may not start
        platform.play_sound(&ringtone);
        assert!(!registry.can_play(&platform, &notif, INTENSITY_THRES_ALL, false));

        // But a priority sound may preempt anything
        assert!(registry.can_play(&platform, &ringtone, INTENSITY_THRES_ALL, false));

        // After stopping the ringtone, the notification may play
        platform.stop_sound(&ringtone);
        assert!(registry.can_play(&platform, &notif, INTENSITY_THRES_ALL, false));
    }

    #[test]
    fn test_mixing_sounds_coexist() {
        let mut registry = SoundRegistry::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        let a = entry("a", 0, true);
        let b = entry("b", 0, true);
        let exclusive = entry("x", 0, false);
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(exclusive.clone());

        platform.play_sound(&a);
        assert!(registry.can_play(&platform, &b, INTENSITY_THRES_ALL, false));
        // An exclusive sound may not join a mixing one
        assert!(!registry.can_play(&platform, &exclusive, INTENSITY_THRES_ALL, false));
    }

    #[test]
    fn test_stop_all() {
        let mut registry = SoundRegistry::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);
        let a = entry("a", 0, true);
        let b = entry("b", 0, true);
        registry.register(a.clone());
        registry.register(b.clone());
        platform.play_sound(&a);
        platform.play_sound(&b);

        registry.stop_all(&mut platform);
        assert!(!platform.is_sound_playing("a"));
        assert!(!platform.is_sound_playing("b"));
    }
}
