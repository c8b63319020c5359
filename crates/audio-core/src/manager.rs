//! Audio manager thread
//!
//! A dedicated thread owns the platform audio device, the sound registry
//! and the routing state machine. Callers on any thread post commands
//! through a message queue; commands from one caller are serviced in
//! FIFO order. The thread publishes a `started` flag before servicing
//! its first command and exits when `Exit` is posted; dropping the
//! manager posts `Exit` and joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::platform::AudioPlatform;
use crate::router::{AudioRoute, AudioRouter, RouteEvent};
use crate::sounds::{SoundEntry, SoundMode, SoundRegistry, INTENSITY_THRES_ALL};

/// Call state reported by the call control layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call
    Normal,

    /// Audio call active
    InCall,

    /// Video call active
    InVideoCall,

    /// Call on hold
    Hold,

    /// Resume the held call
    Resume,
}

/// Invoked on the audio thread whenever the effective route settles
pub type RouteChangedHandler = Box<dyn Fn(AudioRoute) + Send>;

/// Invoked on the audio thread when the call state changes
pub type CallStateHandler = Box<dyn Fn(CallState) + Send>;

enum Command {
    Play(String),
    Pause(String),
    Stop(String),
    CallState(CallState),
    EnableSpeaker(bool),
    HeadsetConnected(bool),
    BtConnected(bool),
    Register(SoundEntry),
    Unregister(String),
    SetIntensity(i32),
    SetRouteHandler(RouteChangedHandler),
    Flush(Sender<()>),
    Exit,
}

/// Handle to the audio manager thread
pub struct AudioManager {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    started: Arc<AtomicBool>,
    last_route: Arc<Mutex<AudioRoute>>,
}

impl AudioManager {
    /// Spawn the audio thread.
    ///
    /// Blocks until the thread has initialized the platform and signalled
    /// `started`; callers may post commands as soon as this returns.
    pub fn new(
        platform: Box<dyn AudioPlatform>,
        state_changed: CallStateHandler,
    ) -> Result<Self> {
        let (tx, rx) = channel();
        let started = Arc::new(AtomicBool::new(false));
        let last_route = Arc::new(Mutex::new(AudioRoute::Unknown));

        let worker = {
            let started = Arc::clone(&started);
            let last_route = Arc::clone(&last_route);
            thread::Builder::new()
                .name("audio-manager".into())
                .spawn(move || {
                    audio_thread(platform, state_changed, rx, started, last_route)
                })
                .map_err(|_| Error::StartupTimeout)?
        };

        // Bounded wait for the thread to come up
        let deadline = Instant::now() + Duration::from_secs(10);
        while !started.load(Ordering::Acquire) {
            if Instant::now() > deadline {
                return Err(Error::StartupTimeout);
            }
            thread::sleep(Duration::from_millis(1));
        }

        Ok(Self {
            tx,
            worker: Some(worker),
            started,
            last_route,
        })
    }

    fn post(&self, command: Command) {
        if self.tx.send(command).is_err() {
            error!("audio: command queue closed");
        }
    }

    /// Play a registered sound by name
    pub fn play_media(&self, name: &str) {
        self.post(Command::Play(name.to_string()));
    }

    /// Pause a playing sound by name
    pub fn pause_media(&self, name: &str) {
        self.post(Command::Pause(name.to_string()));
    }

    /// Stop a playing sound by name
    pub fn stop_media(&self, name: &str) {
        self.post(Command::Stop(name.to_string()));
    }

    /// Report a call state change
    pub fn set_call_state(&self, state: CallState) {
        self.post(Command::CallState(state));
    }

    /// Request or release the loudspeaker
    pub fn enable_speaker(&self, enable: bool) {
        self.post(Command::EnableSpeaker(enable));
    }

    /// Report wired headset plug state
    pub fn headset_connected(&self, connected: bool) {
        self.post(Command::HeadsetConnected(connected));
    }

    /// Report Bluetooth device state
    pub fn bt_device_connected(&self, connected: bool) {
        self.post(Command::BtConnected(connected));
    }

    /// Register a sound clip
    #[allow(clippy::too_many_arguments)]
    pub fn register_media(
        &self,
        name: &str,
        object: Arc<dyn std::any::Any + Send + Sync>,
        mixing: bool,
        incall: bool,
        intensity: i32,
        priority: i32,
        is_call_media: bool,
    ) {
        self.post(Command::Register(SoundEntry {
            name: name.to_string(),
            object,
            mixing,
            incall,
            intensity,
            priority,
            is_call_media,
        }));
    }

    /// Remove a registered sound clip
    pub fn unregister_media(&self, name: &str) {
        self.post(Command::Unregister(name.to_string()));
    }

    /// Set the sound mode (maps onto an intensity threshold)
    pub fn set_sound_mode(&self, mode: SoundMode) {
        self.post(Command::SetIntensity(mode.threshold()));
    }

    /// Install the route-changed observer
    pub fn register_route_change_handler(&self, handler: RouteChangedHandler) {
        self.post(Command::SetRouteHandler(handler));
    }

    /// Last route the router settled on
    pub fn get_route(&self) -> AudioRoute {
        *self.last_route.lock().expect("route lock")
    }

    /// Block until every previously posted command has been serviced.
    ///
    /// Used by tests and shutdown paths that need the queue drained.
    pub fn flush(&self) {
        let (tx, rx) = channel();
        self.post(Command::Flush(tx));
        let _ = rx.recv_timeout(Duration::from_secs(5));
    }

    /// True once the audio thread services commands
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    platform: Box<dyn AudioPlatform>,
    registry: SoundRegistry,
    router: AudioRouter,
    call_state: CallState,
    prev_call_state: CallState,
    intensity_threshold: i32,
    route_changed: Option<RouteChangedHandler>,
    state_changed: CallStateHandler,
    last_route: Arc<Mutex<AudioRoute>>,
}

impl Worker {
    fn in_call(&self) -> bool {
        matches!(self.call_state, CallState::InCall | CallState::InVideoCall)
    }

    fn update_route(&mut self, event: RouteEvent) {
        let in_call = self.call_state == CallState::InCall;
        let in_video = self.call_state == CallState::InVideoCall;
        let route = self
            .router
            .update(event, in_call, in_video, self.platform.as_mut());
        *self.last_route.lock().expect("route lock") = route;
        if let Some(handler) = &self.route_changed {
            handler(route);
        }
    }

    fn enter_call(&mut self) {
        self.registry.stop_non_call_sounds(self.platform.as_mut());
        self.platform.enter_call();
    }

    fn exit_call(&mut self) {
        self.platform.exit_call();
    }

    fn handle_play(&mut self, name: &str) {
        let Some(sound) = self.registry.get(name).cloned() else {
            error!("audio: play: unknown sound {}", name);
            return;
        };
        if !self.registry.can_play(
            self.platform.as_ref(),
            &sound,
            self.intensity_threshold,
            self.in_call(),
        ) {
            debug!("audio: suppressing sound {}", name);
            return;
        }
        if sound.priority > 0 {
            debug!("audio: priority sound {}, stopping others", name);
            self.registry.stop_all(self.platform.as_mut());
        }
        if sound.is_call_media && !self.in_call() {
            // Call media outside a signalled call still routes like a call
            self.platform.enter_call();
            self.update_route(RouteEvent::CallStart { video: false });
        }
        self.platform.play_sound(&sound);
    }

    fn handle_stop(&mut self, name: &str) {
        let Some(sound) = self.registry.get(name).cloned() else {
            error!("audio: stop: unknown sound {}", name);
            return;
        };
        self.platform.stop_sound(&sound);
        if sound.is_call_media && !self.in_call() {
            self.platform.exit_call();
            self.update_route(RouteEvent::CallStop);
        }
    }

    fn handle_call_state(&mut self, new_state: CallState) {
        let mut event = None;
        let mut fire_callback = false;

        match new_state {
            CallState::InCall => {
                self.call_state = CallState::InCall;
                self.enter_call();
                event = Some(RouteEvent::CallStart { video: false });
                fire_callback = true;
            }
            CallState::InVideoCall => {
                self.call_state = CallState::InVideoCall;
                self.enter_call();
                event = Some(RouteEvent::CallStart { video: true });
            }
            CallState::Normal => {
                self.call_state = CallState::Normal;
                self.exit_call();
                event = Some(RouteEvent::CallStop);
                fire_callback = true;
            }
            CallState::Hold => {
                if self.in_call() {
                    info!("audio: putting call on hold");
                    self.prev_call_state = self.call_state;
                    self.call_state = CallState::Hold;
                    event = Some(RouteEvent::CallStop);
                    fire_callback = true;
                }
            }
            CallState::Resume => {
                if self.call_state == CallState::Hold {
                    info!("audio: resuming call");
                    self.call_state = self.prev_call_state;
                    self.enter_call();
                    event = Some(RouteEvent::CallStart {
                        video: self.call_state == CallState::InVideoCall,
                    });
                    fire_callback = true;
                }
            }
        }

        if let Some(event) = event {
            self.update_route(event);
        }
        if fire_callback {
            (self.state_changed)(new_state);
        }
    }
}

fn audio_thread(
    mut platform: Box<dyn AudioPlatform>,
    state_changed: CallStateHandler,
    rx: Receiver<Command>,
    started: Arc<AtomicBool>,
    last_route: Arc<Mutex<AudioRoute>>,
) {
    if let Err(e) = platform.init() {
        error!("audio: platform init failed: {}", e);
        return;
    }

    let mut worker = Worker {
        platform,
        registry: SoundRegistry::new(),
        router: AudioRouter::new(),
        call_state: CallState::Normal,
        prev_call_state: CallState::Normal,
        intensity_threshold: INTENSITY_THRES_ALL,
        route_changed: None,
        state_changed,
        last_route,
    };

    started.store(true, Ordering::Release);
    debug!("audio: manager thread started");

    while let Ok(command) = rx.recv() {
        match command {
            Command::Play(name) => worker.handle_play(&name),
            Command::Pause(name) => {
                match worker.registry.get(&name).cloned() {
                    Some(sound) => worker.platform.pause_sound(&sound),
                    None => error!("audio: pause: unknown sound {}", name),
                }
            }
            Command::Stop(name) => worker.handle_stop(&name),
            Command::CallState(state) => worker.handle_call_state(state),
            Command::EnableSpeaker(enable) => {
                let event = if enable {
                    RouteEvent::SpeakerEnable
                } else {
                    RouteEvent::SpeakerDisable
                };
                worker.update_route(event);
            }
            Command::HeadsetConnected(connected) => {
                let event = if connected {
                    RouteEvent::HeadsetPlugged
                } else {
                    RouteEvent::HeadsetUnplugged
                };
                worker.update_route(event);
            }
            Command::BtConnected(connected) => {
                let event = if connected {
                    RouteEvent::BtConnected
                } else {
                    RouteEvent::BtDisconnected
                };
                worker.update_route(event);
            }
            Command::Register(entry) => {
                debug!("audio: registering sound {}", entry.name);
                worker.registry.register(entry);
            }
            Command::Unregister(name) => {
                worker.registry.unregister(&name);
            }
            Command::SetIntensity(threshold) => {
                debug!("audio: intensity threshold {}", threshold);
                worker.intensity_threshold = threshold;
            }
            Command::SetRouteHandler(handler) => {
                worker.route_changed = Some(handler);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Exit => {
                debug!("audio: manager thread exiting");
                break;
            }
        }
    }

    worker.platform.terminate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TestAudioPlatform;
    use crate::sounds::INTENSITY_THRES_SOME;

    /// Platform proxy so tests can observe state owned by the thread
    #[derive(Clone)]
    struct SharedPlatform(Arc<Mutex<TestAudioPlatform>>);

    impl SharedPlatform {
        fn new(initial: AudioRoute) -> Self {
            Self(Arc::new(Mutex::new(TestAudioPlatform::new(initial))))
        }

        fn is_playing(&self, name: &str) -> bool {
            self.0.lock().unwrap().is_sound_playing(name)
        }
    }

    impl AudioPlatform for SharedPlatform {
        fn current_route(&self) -> AudioRoute {
            self.0.lock().unwrap().current_route()
        }

        fn enable_route(&mut self, route: AudioRoute) -> Result<()> {
            self.0.lock().unwrap().enable_route(route)
        }

        fn enter_call(&mut self) {
            self.0.lock().unwrap().enter_call();
        }

        fn exit_call(&mut self) {
            self.0.lock().unwrap().exit_call();
        }

        fn play_sound(&mut self, entry: &SoundEntry) {
            self.0.lock().unwrap().play_sound(entry);
        }

        fn pause_sound(&mut self, entry: &SoundEntry) {
            self.0.lock().unwrap().pause_sound(entry);
        }

        fn stop_sound(&mut self, entry: &SoundEntry) {
            self.0.lock().unwrap().stop_sound(entry);
        }

        fn is_sound_playing(&self, name: &str) -> bool {
            self.0.lock().unwrap().is_sound_playing(name)
        }
    }

    fn manager(platform: &SharedPlatform) -> AudioManager {
        AudioManager::new(Box::new(platform.clone()), Box::new(|_| {})).unwrap()
    }

    fn register(manager: &AudioManager, name: &str, priority: i32, mixing: bool) {
        manager.register_media(
            name,
            Arc::new(()),
            mixing,
            false,
            INTENSITY_THRES_SOME,
            priority,
            false,
        );
    }

    #[test]
    fn test_started_flag_set_before_commands() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);
        assert!(manager.is_started());
    }

    #[test]
    fn test_priority_sound_preempts_others() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);

        register(&manager, "ringtone", 1, false);
        register(&manager, "notif", 0, true);

        manager.play_media("ringtone");
        manager.play_media("notif");
        manager.flush();
        assert!(platform.is_playing("ringtone"));
        assert!(!platform.is_playing("notif"));

        manager.stop_media("ringtone");
        manager.play_media("notif");
        manager.flush();
        assert!(platform.is_playing("notif"));
    }

    #[test]
    fn test_sound_mode_none_blocks_everything() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);

        register(&manager, "notif", 0, true);
        manager.set_sound_mode(SoundMode::None);
        manager.play_media("notif");
        manager.flush();
        assert!(!platform.is_playing("notif"));

        manager.set_sound_mode(SoundMode::All);
        manager.play_media("notif");
        manager.flush();
        assert!(platform.is_playing("notif"));
    }

    #[test]
    fn test_register_unregister_leaves_no_trace() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);

        register(&manager, "temp", 0, true);
        manager.unregister_media("temp");
        manager.play_media("temp");
        manager.flush();
        assert!(!platform.is_playing("temp"));
    }

    #[test]
    fn test_route_sequence_through_commands() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);

        manager.headset_connected(true);
        manager.flush();
        assert_eq!(manager.get_route(), AudioRoute::Headset);

        manager.set_call_state(CallState::InCall);
        manager.flush();
        assert_eq!(manager.get_route(), AudioRoute::Headset);

        manager.headset_connected(false);
        manager.flush();
        assert_eq!(manager.get_route(), AudioRoute::Earpiece);

        manager.enable_speaker(true);
        manager.flush();
        assert_eq!(manager.get_route(), AudioRoute::Speaker);

        manager.set_call_state(CallState::Normal);
        manager.flush();
        assert_eq!(manager.get_route(), AudioRoute::Earpiece);
    }

    #[test]
    fn test_route_changed_handler_fires() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let manager = manager(&platform);

        let seen: Arc<Mutex<Vec<AudioRoute>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        manager.register_route_change_handler(Box::new(move |route| {
            seen_clone.lock().unwrap().push(route);
        }));

        manager.headset_connected(true);
        manager.flush();
        assert_eq!(seen.lock().unwrap().as_slice(), &[AudioRoute::Headset]);
    }

    #[test]
    fn test_hold_and_resume_restore_call_routing() {
        let platform = SharedPlatform::new(AudioRoute::Earpiece);
        let states: Arc<Mutex<Vec<CallState>>> = Arc::new(Mutex::new(Vec::new()));
        let states_clone = Arc::clone(&states);
        let manager = AudioManager::new(
            Box::new(platform.clone()),
            Box::new(move |state| states_clone.lock().unwrap().push(state)),
        )
        .unwrap();

        manager.set_call_state(CallState::InCall);
        manager.set_call_state(CallState::Hold);
        manager.set_call_state(CallState::Resume);
        manager.flush();

        let states = states.lock().unwrap();
        assert_eq!(
            states.as_slice(),
            &[CallState::InCall, CallState::Hold, CallState::Resume]
        );
    }
}
