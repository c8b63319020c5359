//! Audio routing state machine
//!
//! Selects the active playback device as hardware and call-state events
//! arrive. The decision table is deterministic; the platform is only
//! consulted for the currently observed route and to apply the wanted
//! one. When the platform disagrees after a switch and no call is
//! active, the wanted route is adopted optimistically; during a call the
//! mismatch is logged and left alone.

use std::fmt;

use tracing::{info, warn};

use crate::platform::AudioPlatform;

/// Audio playback route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioRoute {
    /// Handset earpiece
    Earpiece,

    /// Loudspeaker
    Speaker,

    /// Wired headset
    Headset,

    /// Bluetooth SCO device
    Bluetooth,

    /// Line out
    LineOut,

    /// S/PDIF out
    Spdif,

    /// Not yet known
    #[default]
    Unknown,
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioRoute::Earpiece => f.write_str("Earpiece"),
            AudioRoute::Speaker => f.write_str("Speakerphone"),
            AudioRoute::Headset => f.write_str("Headset"),
            AudioRoute::Bluetooth => f.write_str("Bluetooth"),
            AudioRoute::LineOut => f.write_str("LINE"),
            AudioRoute::Spdif => f.write_str("SPDIF"),
            AudioRoute::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Routing events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    /// Wired headset plugged in
    HeadsetPlugged,

    /// Wired headset unplugged
    HeadsetUnplugged,

    /// Bluetooth device connected
    BtConnected,

    /// Bluetooth device disconnected
    BtDisconnected,

    /// Caller asked for the loudspeaker
    SpeakerEnable,

    /// Caller asked to leave the loudspeaker
    SpeakerDisable,

    /// A call started
    CallStart {
        /// Video call
        video: bool,
    },

    /// The call ended
    CallStop,
}

/// Router state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterState {
    /// Caller prefers the loudspeaker
    pub prefer_loudspeaker: bool,

    /// A Bluetooth device is connected
    pub bt_connected: bool,

    /// A wired headset is connected
    pub wired_headset_connected: bool,

    /// Route currently considered active
    pub current_route: AudioRoute,

    /// Route snapshot taken when the call started
    pub route_before_call: AudioRoute,
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            prefer_loudspeaker: false,
            bt_connected: false,
            wired_headset_connected: false,
            current_route: AudioRoute::Unknown,
            route_before_call: AudioRoute::Unknown,
        }
    }
}

/// Audio routing controller
#[derive(Debug, Default)]
pub struct AudioRouter {
    state: RouterState,
}

impl AudioRouter {
    /// Create a router in the initial state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state snapshot
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// Compute the wanted route for `event` and update the flag fields.
    ///
    /// Pure decision logic; `current` is the route observed right now.
    pub fn wanted_route(
        &mut self,
        event: RouteEvent,
        current: AudioRoute,
        in_call: bool,
        in_video_call: bool,
    ) -> AudioRoute {
        let state = &mut self.state;
        match event {
            RouteEvent::HeadsetPlugged => {
                // Always switch to the headset when plugged in
                state.wired_headset_connected = true;
                state.prefer_loudspeaker = false;
                AudioRoute::Headset
            }

            RouteEvent::HeadsetUnplugged => {
                if in_video_call {
                    state.prefer_loudspeaker = true;
                }
                let wanted = if current == AudioRoute::Speaker {
                    AudioRoute::Speaker
                } else if state.bt_connected {
                    AudioRoute::Bluetooth
                } else if state.prefer_loudspeaker {
                    AudioRoute::Speaker
                } else {
                    AudioRoute::Earpiece
                };
                state.wired_headset_connected = false;
                wanted
            }

            RouteEvent::BtConnected => {
                let wanted = if in_call || in_video_call {
                    // Always switch to BT when it appears mid-call
                    AudioRoute::Bluetooth
                } else {
                    current
                };
                state.bt_connected = true;
                wanted
            }

            RouteEvent::BtDisconnected => {
                let wanted = if state.wired_headset_connected {
                    AudioRoute::Headset
                } else if state.prefer_loudspeaker {
                    AudioRoute::Speaker
                } else {
                    AudioRoute::Earpiece
                };
                state.bt_connected = false;
                wanted
            }

            RouteEvent::SpeakerEnable => {
                state.prefer_loudspeaker = true;
                AudioRoute::Speaker
            }

            RouteEvent::SpeakerDisable => {
                state.prefer_loudspeaker = false;
                if state.wired_headset_connected {
                    AudioRoute::Headset
                } else if state.bt_connected {
                    AudioRoute::Bluetooth
                } else {
                    AudioRoute::Earpiece
                }
            }

            RouteEvent::CallStart { video: false } => {
                state.route_before_call = current;
                if state.wired_headset_connected {
                    AudioRoute::Headset
                } else if state.bt_connected {
                    AudioRoute::Bluetooth
                } else if state.prefer_loudspeaker {
                    AudioRoute::Speaker
                } else {
                    AudioRoute::Earpiece
                }
            }

            RouteEvent::CallStart { video: true } => {
                state.route_before_call = current;
                let wanted = if state.wired_headset_connected {
                    AudioRoute::Headset
                } else if state.bt_connected {
                    AudioRoute::Bluetooth
                } else {
                    AudioRoute::Speaker
                };
                // Video calls route to the speaker for the call itself but
                // do not latch the preference.
                state.prefer_loudspeaker = false;
                wanted
            }

            RouteEvent::CallStop => {
                state.prefer_loudspeaker = false;
                AudioRoute::Earpiece
            }
        }
    }

    /// Apply `event`: compute the wanted route, switch the platform, and
    /// settle on the effective route.
    pub fn update(
        &mut self,
        event: RouteEvent,
        in_call: bool,
        in_video_call: bool,
        platform: &mut dyn AudioPlatform,
    ) -> AudioRoute {
        let observed = platform.current_route();
        let wanted = self.wanted_route(event, observed, in_call, in_video_call);
        info!("router: wanted_route={} current={}", wanted, observed);

        let mut switch_ok = true;
        if wanted != observed {
            if let Err(e) = platform.enable_route(wanted) {
                warn!("router: platform rejected {}: {}", wanted, e);
                switch_ok = false;
            }
        }

        // Check that we got what we asked for
        let mut effective = platform.current_route();
        if wanted != effective && switch_ok {
            if !in_call && !in_video_call {
                effective = wanted;
            } else {
                warn!(
                    "router: route change did not happen (wanted={}, current={})",
                    wanted, effective
                );
            }
        }

        self.state.current_route = effective;
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TestAudioPlatform;

    fn apply(
        router: &mut AudioRouter,
        platform: &mut TestAudioPlatform,
        event: RouteEvent,
    ) -> AudioRoute {
        apply_in_call(router, platform, event, false, false)
    }

    fn apply_in_call(
        router: &mut AudioRouter,
        platform: &mut TestAudioPlatform,
        event: RouteEvent,
        in_call: bool,
        in_video: bool,
    ) -> AudioRoute {
        router.update(event, in_call, in_video, platform)
    }

    #[test]
    fn test_headset_plug_unplug_cycle() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::HeadsetPlugged),
            AudioRoute::Headset
        );
        assert!(router.state().wired_headset_connected);
        assert!(!router.state().prefer_loudspeaker);

        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::HeadsetUnplugged),
            AudioRoute::Earpiece
        );
        assert!(!router.state().wired_headset_connected);
    }

    #[test]
    fn test_call_sequence_from_spec_scenario() {
        // initial (earpiece) -> plug -> headset -> call start -> headset
        // -> unplug -> earpiece -> speaker on -> speaker -> call stop ->
        // earpiece
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::HeadsetPlugged),
            AudioRoute::Headset
        );
        assert_eq!(
            apply_in_call(
                &mut router,
                &mut platform,
                RouteEvent::CallStart { video: false },
                true,
                false
            ),
            AudioRoute::Headset
        );
        assert_eq!(
            apply_in_call(
                &mut router,
                &mut platform,
                RouteEvent::HeadsetUnplugged,
                true,
                false
            ),
            AudioRoute::Earpiece
        );
        assert_eq!(
            apply_in_call(
                &mut router,
                &mut platform,
                RouteEvent::SpeakerEnable,
                true,
                false
            ),
            AudioRoute::Speaker
        );
        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::CallStop),
            AudioRoute::Earpiece
        );
        assert!(!router.state().prefer_loudspeaker);
    }

    #[test]
    fn test_bt_connect_only_switches_in_call() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        // Idle: connection is remembered but the route stays put
        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::BtConnected),
            AudioRoute::Earpiece
        );
        assert!(router.state().bt_connected);

        // In call: switch immediately
        assert_eq!(
            apply_in_call(&mut router, &mut platform, RouteEvent::BtConnected, true, false),
            AudioRoute::Bluetooth
        );
    }

    #[test]
    fn test_bt_disconnect_falls_back_by_priority() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Bluetooth);

        apply(&mut router, &mut platform, RouteEvent::BtConnected);
        apply(&mut router, &mut platform, RouteEvent::HeadsetPlugged);
        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::BtDisconnected),
            AudioRoute::Headset
        );
    }

    #[test]
    fn test_speaker_disable_prefers_headset_then_bt() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Speaker);

        apply(&mut router, &mut platform, RouteEvent::BtConnected);
        assert_eq!(
            apply(&mut router, &mut platform, RouteEvent::SpeakerDisable),
            AudioRoute::Bluetooth
        );
        assert!(!router.state().prefer_loudspeaker);
    }

    #[test]
    fn test_video_call_start_does_not_latch_speaker_preference() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);

        assert_eq!(
            apply_in_call(
                &mut router,
                &mut platform,
                RouteEvent::CallStart { video: true },
                false,
                true
            ),
            AudioRoute::Speaker
        );
        assert!(!router.state().prefer_loudspeaker);
    }

    #[test]
    fn test_audio_call_start_saves_route_before_call() {
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Speaker);

        apply_in_call(
            &mut router,
            &mut platform,
            RouteEvent::CallStart { video: false },
            true,
            false,
        );
        assert_eq!(router.state().route_before_call, AudioRoute::Speaker);
    }

    #[test]
    fn test_headset_invariant_without_call() {
        // wiredHS and no loudspeaker preference outside a call always
        // resolves to the headset for non-call events.
        let mut router = AudioRouter::new();
        let mut platform = TestAudioPlatform::new(AudioRoute::Earpiece);
        apply(&mut router, &mut platform, RouteEvent::HeadsetPlugged);

        for event in [
            RouteEvent::BtConnected,
            RouteEvent::BtDisconnected,
            RouteEvent::SpeakerDisable,
        ] {
            let route = apply(&mut router, &mut platform, event);
            assert!(router.state().wired_headset_connected);
            assert!(!router.state().prefer_loudspeaker);
            if event != RouteEvent::BtConnected {
                assert_eq!(route, AudioRoute::Headset);
            }
        }
    }

    #[test]
    fn test_optimistic_adoption_outside_call() {
        let mut router = AudioRouter::new();
        // Platform that never actually switches
        let mut platform = TestAudioPlatform::stuck(AudioRoute::Earpiece);

        let route = apply(&mut router, &mut platform, RouteEvent::SpeakerEnable);
        // Not in call: the wanted route is adopted anyway
        assert_eq!(route, AudioRoute::Speaker);

        // In call: the observed route wins
        let route = apply_in_call(
            &mut router,
            &mut platform,
            RouteEvent::SpeakerEnable,
            true,
            false,
        );
        assert_eq!(route, AudioRoute::Earpiece);
    }
}
