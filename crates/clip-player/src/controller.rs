//! Playback controller and the realtime render path.
//!
//! [`Controller`] is shared between the control thread and the audio thread.
//! - Flags and counters the UI polls are atomics, so queries never touch the lock.
//! - The loaded buffer, the feed cursor and the stretch engine live behind one mutex.
//!   The control thread may wait on it; [`Controller::render`] only ever `try_lock`s and
//!   plays silence if the lock is busy.
//!
//! Swapping the buffer happens under that mutex, so the audio thread can never be reading a
//! buffer while it is released. The replaced `Arc` is handed back to the caller to drop
//! outside the lock, on the control thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::buffer::{AudioBuffer, time_to_frame};
use crate::config::{PlayerConfig, clamp_speed};
use crate::stretch::TimeStretch;

struct Session {
    buffer: Option<Arc<AudioBuffer>>,
    /// Next source frame to feed into the engine.
    cursor: usize,
    engine: Box<dyn TimeStretch>,
}

/// Playback state machine plus the pull-driven render callback.
pub struct Controller {
    sample_rate: u32,
    channels: usize,
    feed_chunk_frames: usize,
    render_block_frames: usize,
    playing: AtomicBool,
    /// Source frame currently leaving the engine (what the listener hears).
    position: AtomicU64,
    frame_count: AtomicU64,
    speed_bits: AtomicU32,
    rendered_frames: AtomicU64,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
    session: Mutex<Session>,
}

impl Controller {
    /// Build a controller around an engine configured for `config`'s format.
    pub fn new(config: &PlayerConfig, mut engine: Box<dyn TimeStretch>) -> Self {
        engine.set_speed(1.0);
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels.max(1),
            feed_chunk_frames: config.feed_chunk_frames.max(1),
            render_block_frames: config.render_block_frames.max(1),
            playing: AtomicBool::new(false),
            position: AtomicU64::new(0),
            frame_count: AtomicU64::new(0),
            speed_bits: AtomicU32::new(1.0f32.to_bits()),
            rendered_frames: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
            session: Mutex::new(Session {
                buffer: None,
                cursor: 0,
                engine,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Install a new track at frame 0, paused. Returns the previous buffer.
    pub fn load(&self, buffer: Arc<AudioBuffer>) -> Option<Arc<AudioBuffer>> {
        let frames = buffer.frame_count() as u64;
        let mut s = self.lock();
        self.playing.store(false, Ordering::Relaxed);
        s.engine.reset();
        s.cursor = 0;
        let old = s.buffer.replace(buffer);
        self.position.store(0, Ordering::Relaxed);
        self.frame_count.store(frames, Ordering::Relaxed);
        old
    }

    /// Drop the current track. Returns it so the caller controls where it is freed.
    pub fn unload(&self) -> Option<Arc<AudioBuffer>> {
        let mut s = self.lock();
        self.playing.store(false, Ordering::Relaxed);
        s.engine.reset();
        s.cursor = 0;
        self.position.store(0, Ordering::Relaxed);
        self.frame_count.store(0, Ordering::Relaxed);
        s.buffer.take()
    }

    pub fn is_loaded(&self) -> bool {
        self.frame_count.load(Ordering::Relaxed) > 0
    }

    /// Start or resume; no-op without a track.
    pub fn play(&self) {
        if self.is_loaded() {
            self.playing.store(true, Ordering::Relaxed);
        }
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    /// Pause and rewind to the start.
    pub fn stop(&self) {
        self.pause();
        self.seek(0.0);
    }

    /// Jump to `secs` (clamped to the track) and flush the engine. Playing state is kept.
    ///
    /// The engine is primed with the audio just before the new position.
    pub fn seek(&self, secs: f64) {
        let mut s = self.lock();
        let Some(total) = s.buffer.as_ref().map(|b| b.frame_count()) else {
            return;
        };
        let frame = time_to_frame(secs, self.sample_rate, total);
        let session = &mut *s;
        session.cursor = frame;
        session.engine.reset();
        if let Some(buffer) = session.buffer.as_ref() {
            let from = frame.saturating_sub(session.engine.preroll_frames());
            session.engine.prime(buffer.frames(from..frame));
        }
        self.position.store(frame as u64, Ordering::Relaxed);
        tracing::debug!(frame, secs, "seek");
    }

    /// Store the clamped speed and forward it to the engine.
    pub fn set_speed(&self, speed: f32) -> f32 {
        let speed = clamp_speed(speed);
        let mut s = self.lock();
        s.engine.set_speed(speed);
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
        speed
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Playback position in seconds.
    pub fn current_time(&self) -> f64 {
        self.position.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> f64 {
        self.frame_count.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Raw feed cursor (frames handed to the engine so far).
    pub fn cursor_frame(&self) -> usize {
        self.lock().cursor
    }

    /// Frames the engine could emit right now.
    pub fn engine_available_frames(&self) -> usize {
        self.lock().engine.available_frames()
    }

    pub fn buffer(&self) -> Option<Arc<AudioBuffer>> {
        self.lock().buffer.clone()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Relaxed)
    }

    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    pub fn underrun_events(&self) -> u64 {
        self.underrun_events.load(Ordering::Relaxed)
    }

    fn count_underrun(&self, frames: usize) {
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Fill `out` (interleaved, session channels) completely.
    ///
    /// Runs on the audio thread: never blocks, never allocates. Anything that cannot be
    /// produced is silence.
    pub fn render(&self, out: &mut [f32]) {
        let c = self.channels;
        let frames = out.len() / c;

        if !self.is_playing() {
            out.fill(0.0);
            return;
        }

        let mut guard = match self.session.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0.0);
                self.count_underrun(frames);
                return;
            }
        };
        let session = &mut *guard;

        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(self.render_block_frames);
            self.render_block(session, &mut out[offset * c..(offset + n) * c]);
            offset += n;
        }
        out[frames * c..].fill(0.0);

        let heard = session
            .cursor
            .saturating_sub(session.engine.backlog_source_frames());
        self.position.store(heard as u64, Ordering::Relaxed);
        self.rendered_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Feed the engine until it can cover `block`, then pull from it.
    fn render_block(&self, s: &mut Session, block: &mut [f32]) {
        let c = self.channels;
        let wanted = block.len() / c;

        if !self.is_playing() {
            block.fill(0.0);
            return;
        }
        let Some(buffer) = s.buffer.as_ref() else {
            block.fill(0.0);
            return;
        };
        let total = buffer.frame_count();

        while s.engine.available_frames() < wanted {
            if s.cursor >= total {
                s.engine.finish();
                break;
            }
            let chunk = self.feed_chunk_frames.min(total - s.cursor);
            let accepted = s
                .engine
                .write_frames(buffer.frames(s.cursor..s.cursor + chunk));
            if accepted == 0 {
                break;
            }
            s.cursor += accepted;
        }

        let read = s.engine.read_frames(block);
        if read < wanted {
            block[read * c..].fill(0.0);
            if s.cursor >= total && s.engine.available_frames() == 0 {
                self.playing.store(false, Ordering::Relaxed);
            } else {
                self.count_underrun(wanted - read);
            }
        }
    }
}
