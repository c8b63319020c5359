//! Fake audio device
//!
//! Test collaborator standing in for platform audio hardware: a record
//! task and a playout task each wake every frame interval, call the
//! registered transport, and sleep to the next deadline. With
//! `realtime == false` the sleeps are skipped so tests run faster than
//! wall clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

/// Frame interval in milliseconds
pub const FRAME_LEN_MS: u64 = 10;

/// Sample rate in kHz
pub const FS_KHZ: u32 = 48;

/// Samples per frame (mono)
pub const FRAME_LEN: usize = (FS_KHZ as usize) * (FRAME_LEN_MS as usize);

/// Callback interface between the device and the media session
pub trait AudioTransport: Send + Sync {
    /// A frame of recorded samples is available
    fn recorded_data_available(&self, samples: &[i16], sample_rate_hz: u32, channels: u8);

    /// Fill `samples` with playout data, returning the samples written
    fn need_more_play_data(&self, samples: &mut [i16], sample_rate_hz: u32, channels: u8)
        -> usize;
}

type SharedTransport = Arc<RwLock<Option<Arc<dyn AudioTransport>>>>;

/// Memory-backed audio device with periodic record and playout tasks
pub struct FakeAudioDevice {
    transport: SharedTransport,
    recording: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    rec_worker: Option<JoinHandle<()>>,
    play_worker: Option<JoinHandle<()>>,
    realtime: bool,
}

impl FakeAudioDevice {
    /// Create a device; `realtime` controls whether the periodic tasks
    /// pace themselves against wall clock.
    pub fn new(realtime: bool) -> Self {
        Self {
            transport: Arc::new(RwLock::new(None)),
            recording: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            rec_worker: None,
            play_worker: None,
            realtime,
        }
    }

    /// Install the transport, restarting any running directions so the
    /// old callback is never invoked again.
    pub fn register_transport(&mut self, transport: Arc<dyn AudioTransport>) {
        let was_recording = self.is_recording();
        let was_playing = self.is_playing();
        self.stop_recording();
        self.stop_playout();
        *self.transport.write().expect("transport lock") = Some(transport);
        if was_recording {
            self.start_recording();
        }
        if was_playing {
            self.start_playout();
        }
    }

    /// True while the record task runs
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// True while the playout task runs
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Start the record task; idempotent
    pub fn start_recording(&mut self) {
        if self.recording.swap(true, Ordering::AcqRel) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let running = Arc::clone(&self.recording);
        let realtime = self.realtime;
        self.rec_worker = Some(
            thread::Builder::new()
                .name("fake-audio-rec".into())
                .spawn(move || {
                    periodic_task(running, realtime, "record", move |buf| {
                        if let Some(t) = transport.read().expect("transport lock").as_ref() {
                            t.recorded_data_available(buf, FS_KHZ * 1000, 1);
                        }
                    })
                })
                .expect("spawn record thread"),
        );
    }

    /// Stop the record task and join it
    pub fn stop_recording(&mut self) {
        self.recording.store(false, Ordering::Release);
        if let Some(worker) = self.rec_worker.take() {
            let _ = worker.join();
        }
    }

    /// Start the playout task; idempotent
    pub fn start_playout(&mut self) {
        if self.playing.swap(true, Ordering::AcqRel) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let running = Arc::clone(&self.playing);
        let realtime = self.realtime;
        self.play_worker = Some(
            thread::Builder::new()
                .name("fake-audio-play".into())
                .spawn(move || {
                    periodic_task(running, realtime, "playout", move |buf| {
                        if let Some(t) = transport.read().expect("transport lock").as_ref() {
                            let _ = t.need_more_play_data(buf, FS_KHZ * 1000, 1);
                        }
                    })
                })
                .expect("spawn playout thread"),
        );
    }

    /// Stop the playout task and join it
    pub fn stop_playout(&mut self) {
        self.playing.store(false, Ordering::Release);
        if let Some(worker) = self.play_worker.take() {
            let _ = worker.join();
        }
    }

    /// Stop both directions
    pub fn terminate(&mut self) {
        self.stop_recording();
        self.stop_playout();
    }
}

impl Drop for FakeAudioDevice {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn periodic_task(
    running: Arc<AtomicBool>,
    realtime: bool,
    what: &'static str,
    mut tick: impl FnMut(&mut [i16]),
) {
    let mut buf = [0i16; FRAME_LEN];
    let delta = Duration::from_millis(FRAME_LEN_MS);
    let mut next_deadline = Instant::now();

    while running.load(Ordering::Acquire) {
        next_deadline += delta;

        tick(&mut buf);

        let now = Instant::now();
        if now > next_deadline {
            warn!("fake audio device: {} task falling behind", what);
            next_deadline = now;
        } else if realtime {
            thread::sleep(next_deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        recorded: AtomicUsize,
        played: AtomicUsize,
    }

    impl AudioTransport for CountingTransport {
        fn recorded_data_available(&self, samples: &[i16], sample_rate_hz: u32, channels: u8) {
            assert_eq!(samples.len(), FRAME_LEN);
            assert_eq!(sample_rate_hz, 48000);
            assert_eq!(channels, 1);
            self.recorded.fetch_add(1, Ordering::Relaxed);
        }

        fn need_more_play_data(
            &self,
            samples: &mut [i16],
            _sample_rate_hz: u32,
            _channels: u8,
        ) -> usize {
            self.played.fetch_add(1, Ordering::Relaxed);
            samples.len()
        }
    }

    #[test]
    fn test_non_realtime_device_runs_fast() {
        let transport = Arc::new(CountingTransport {
            recorded: AtomicUsize::new(0),
            played: AtomicUsize::new(0),
        });

        let mut device = FakeAudioDevice::new(false);
        device.register_transport(transport.clone());
        device.start_recording();
        device.start_playout();

        // Without pacing the tasks spin; a short wall-clock window covers
        // far more than one frame interval worth of callbacks.
        thread::sleep(Duration::from_millis(30));
        device.terminate();

        assert!(transport.recorded.load(Ordering::Relaxed) >= 3);
        assert!(transport.played.load(Ordering::Relaxed) >= 3);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut device = FakeAudioDevice::new(false);
        device.start_recording();
        device.start_recording();
        assert!(device.is_recording());
        device.stop_recording();
        device.stop_recording();
        assert!(!device.is_recording());
    }

    #[test]
    fn test_register_transport_restarts_running_directions() {
        let transport = Arc::new(CountingTransport {
            recorded: AtomicUsize::new(0),
            played: AtomicUsize::new(0),
        });

        let mut device = FakeAudioDevice::new(false);
        device.start_recording();
        device.register_transport(transport.clone());
        assert!(device.is_recording());
        assert!(!device.is_playing());

        thread::sleep(Duration::from_millis(20));
        device.terminate();
        assert!(transport.recorded.load(Ordering::Relaxed) > 0);
        assert_eq!(transport.played.load(Ordering::Relaxed), 0);
    }
}
