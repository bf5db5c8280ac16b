//! Pitch-preserving time stretch.
//!
//! [`TimeStretch`] is the streaming contract the playback core relies on: source frames go
//! in with [`write_frames`](TimeStretch::write_frames), stretched frames come out with
//! [`read_frames`](TimeStretch::read_frames), and neither call blocks or allocates.
//!
//! [`Stretcher`] implements it on top of `signalsmith-stretch`. The library works on paired
//! input/output blocks whose length ratio is the tempo factor, so the adapter keeps an input
//! FIFO, runs the library in fixed 256-frame output chunks as soon as enough input is queued,
//! and parks the result in an output FIFO. The library's latency is hidden: after a reset the
//! first output frames are dropped so the first audible frame is the first frame written, and
//! [`prime`](TimeStretch::prime) lets the caller hand in the audio that precedes a seek point
//! so playback does not start from a fade out of silence.

use signalsmith_stretch::Stretch;

use crate::config::{MAX_SPEED, clamp_speed};

/// Output frames produced per library call.
const OUT_CHUNK_FRAMES: usize = 256;

/// Streaming time-stretch engine contract.
///
/// All sample slices are interleaved with [`channels`](TimeStretch::channels) channels.
pub trait TimeStretch: Send {
    fn channels(&self) -> usize;

    /// Set the tempo factor; only audio written afterwards is affected.
    fn set_speed(&mut self, speed: f32);

    fn speed(&self) -> f32;

    /// Feed source frames. Returns how many frames were accepted (bounded by free capacity).
    fn write_frames(&mut self, input: &[f32]) -> usize;

    /// Stretched frames ready to be read.
    fn available_frames(&self) -> usize;

    /// Read up to `out.len() / channels` frames; returns the number written.
    fn read_frames(&mut self, out: &mut [f32]) -> usize;

    /// No more input is coming: make the buffered tail readable.
    fn finish(&mut self);

    /// Drop everything buffered. `available_frames()` is 0 afterwards.
    fn reset(&mut self);

    /// Source frames accepted but not yet heard, in source-frame units.
    fn backlog_source_frames(&self) -> usize;

    /// Frames of history worth passing to [`prime`](TimeStretch::prime).
    fn preroll_frames(&self) -> usize {
        0
    }

    /// Warm the engine with the audio right before the next frame to be written.
    ///
    /// Only meaningful straight after [`reset`](TimeStretch::reset). Nothing becomes readable
    /// and the history does not count as accepted input.
    fn prime(&mut self, history: &[f32]) {
        let _ = history;
    }
}

/// Where the engine is in draining its tail after [`TimeStretch::finish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tail {
    Open,
    /// Queued input shorter than one chunk still has to go through.
    Remainder,
    /// Silence still to push so the last real input clears the analysis window.
    Padding(usize),
    Flush,
    Done,
}

/// `signalsmith-stretch` behind fixed-capacity FIFOs.
pub struct Stretcher {
    stretch: Stretch,
    channels: usize,
    speed: f32,
    capacity: usize,
    input: Vec<f32>,
    in_start: usize,
    in_len: usize,
    output: Vec<f32>,
    out_start: usize,
    out_len: usize,
    /// Library output lands here before the latency skip and the FIFO copy.
    scratch: Vec<f32>,
    scratch_frames: usize,
    /// Silent input for the tail padding.
    zeros: Vec<f32>,
    /// Carry of the fractional input length between chunks.
    fraction: f64,
    /// Output frames still owed to the library's latency.
    skip: usize,
    /// Source frames consumed by the library since the last reset.
    processed: usize,
    /// Source frames written since the last reset.
    accepted: usize,
    /// Source frames read back out since the last reset.
    heard: f64,
    tail: Tail,
}

impl Stretcher {
    /// Allocate an engine for `channels` at `sample_rate`, holding up to `capacity_frames`
    /// frames in each of its input and output FIFOs.
    pub fn new(sample_rate: u32, channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        let stretch = Stretch::preset_default(channels as u32, sample_rate);

        let max_in_chunk = (OUT_CHUNK_FRAMES as f64 * MAX_SPEED as f64).ceil() as usize + 1;
        let scratch_frames = OUT_CHUNK_FRAMES.max(stretch.output_latency());
        let capacity = capacity_frames.max(4 * scratch_frames).max(4 * max_in_chunk);

        let mut engine = Self {
            stretch,
            channels,
            speed: 1.0,
            capacity,
            input: vec![0.0; capacity * channels],
            in_start: 0,
            in_len: 0,
            output: vec![0.0; capacity * channels],
            out_start: 0,
            out_len: 0,
            scratch: vec![0.0; scratch_frames * channels],
            scratch_frames,
            zeros: vec![0.0; max_in_chunk * channels],
            fraction: 0.0,
            skip: 0,
            processed: 0,
            accepted: 0,
            heard: 0.0,
            tail: Tail::Open,
        };
        engine.skip = engine.latency_skip();
        engine
    }

    /// FIFO capacity in frames.
    pub fn capacity_frames(&self) -> usize {
        self.capacity
    }

    /// Library latency as (input frames, output frames).
    pub fn latency_frames(&self) -> (usize, usize) {
        (self.stretch.input_latency(), self.stretch.output_latency())
    }

    /// Output frames covering the library latency at the current speed.
    ///
    /// Output latency is counted in output time, input latency in input time.
    fn latency_skip(&self) -> usize {
        let input_latency = self.stretch.input_latency() as f64 / self.speed as f64;
        self.stretch.output_latency() + input_latency.ceil() as usize
    }

    fn out_free(&self) -> usize {
        self.capacity - self.out_len
    }

    /// Copy `frames` frames of scratch into the output FIFO, minus any latency still owed.
    fn push_scratch(&mut self, frames: usize) {
        let c = self.channels;
        let dropped = self.skip.min(frames);
        self.skip -= dropped;
        let keep = frames - dropped;
        if keep == 0 {
            return;
        }
        if self.out_start + self.out_len + keep > self.capacity {
            self.output
                .copy_within(self.out_start * c..(self.out_start + self.out_len) * c, 0);
            self.out_start = 0;
        }
        let at = (self.out_start + self.out_len) * c;
        self.output[at..at + keep * c].copy_from_slice(&self.scratch[dropped * c..frames * c]);
        self.out_len += keep;
    }

    fn consume_input(&mut self, frames: usize) {
        self.in_start += frames;
        self.in_len -= frames;
        self.processed += frames;
        if self.in_len == 0 {
            self.in_start = 0;
        }
    }

    /// Run the library while there is input for a chunk and room for its output.
    fn pump(&mut self) {
        let c = self.channels;
        loop {
            if self.out_free() < self.scratch_frames {
                return;
            }
            let want = self.fraction + OUT_CHUNK_FRAMES as f64 * self.speed as f64;
            let n_in = want.floor() as usize;

            if self.in_len >= n_in {
                let from = self.in_start * c;
                self.stretch.process(
                    &self.input[from..from + n_in * c],
                    &mut self.scratch[..OUT_CHUNK_FRAMES * c],
                );
                self.fraction = want - n_in as f64;
                self.consume_input(n_in);
                self.push_scratch(OUT_CHUNK_FRAMES);
                continue;
            }

            match self.tail {
                Tail::Open | Tail::Done => return,
                Tail::Remainder => {
                    let n = self.in_len;
                    if n > 0 {
                        let out = self.tail_output_frames(n);
                        let from = self.in_start * c;
                        self.stretch.process(
                            &self.input[from..from + n * c],
                            &mut self.scratch[..out * c],
                        );
                        self.consume_input(n);
                        self.push_scratch(out);
                    }
                    self.tail = Tail::Padding(self.stretch.input_latency());
                }
                Tail::Padding(0) => self.tail = Tail::Flush,
                Tail::Padding(left) => {
                    let n = left.min(n_in);
                    let out = if n == n_in {
                        self.fraction = want - n_in as f64;
                        OUT_CHUNK_FRAMES
                    } else {
                        self.tail_output_frames(n)
                    };
                    self.stretch
                        .process(&self.zeros[..n * c], &mut self.scratch[..out * c]);
                    self.push_scratch(out);
                    self.tail = Tail::Padding(left - n);
                }
                Tail::Flush => {
                    let out = self.stretch.output_latency().min(self.scratch_frames);
                    self.stretch.flush(&mut self.scratch[..out * c]);
                    self.push_scratch(out);
                    self.tail = Tail::Done;
                }
            }
        }
    }

    /// Output length for a partial input chunk at the current speed.
    fn tail_output_frames(&self, input_frames: usize) -> usize {
        ((input_frames as f64 / self.speed as f64).round() as usize).clamp(1, OUT_CHUNK_FRAMES)
    }
}

impl TimeStretch for Stretcher {
    fn channels(&self) -> usize {
        self.channels
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_speed(speed);
        // The latency skip depends on speed until the first chunk has gone through.
        if self.processed == 0 && self.tail == Tail::Open {
            self.skip = self.latency_skip();
        }
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn write_frames(&mut self, input: &[f32]) -> usize {
        if self.tail != Tail::Open {
            return 0;
        }
        let c = self.channels;
        let frames = (input.len() / c).min(self.capacity - self.in_len);
        if frames == 0 {
            return 0;
        }
        if self.in_start + self.in_len + frames > self.capacity {
            self.input
                .copy_within(self.in_start * c..(self.in_start + self.in_len) * c, 0);
            self.in_start = 0;
        }
        let at = (self.in_start + self.in_len) * c;
        self.input[at..at + frames * c].copy_from_slice(&input[..frames * c]);
        self.in_len += frames;
        self.accepted += frames;
        self.pump();
        frames
    }

    fn available_frames(&self) -> usize {
        self.out_len
    }

    fn read_frames(&mut self, out: &mut [f32]) -> usize {
        let c = self.channels;
        let frames = (out.len() / c).min(self.out_len);
        if frames > 0 {
            let from = self.out_start * c;
            out[..frames * c].copy_from_slice(&self.output[from..from + frames * c]);
            self.out_start += frames;
            self.out_len -= frames;
            if self.out_len == 0 {
                self.out_start = 0;
            }
            self.heard += frames as f64 * self.speed as f64;
        }
        self.pump();
        frames
    }

    fn finish(&mut self) {
        if self.tail == Tail::Open {
            self.tail = Tail::Remainder;
        }
        self.pump();
    }

    fn reset(&mut self) {
        self.stretch.reset();
        self.in_start = 0;
        self.in_len = 0;
        self.out_start = 0;
        self.out_len = 0;
        self.fraction = 0.0;
        self.processed = 0;
        self.accepted = 0;
        self.heard = 0.0;
        self.tail = Tail::Open;
        self.skip = self.latency_skip();
    }

    fn backlog_source_frames(&self) -> usize {
        if self.tail == Tail::Done && self.out_len == 0 {
            return 0;
        }
        self.accepted
            .saturating_sub(self.heard.round() as usize)
    }

    fn preroll_frames(&self) -> usize {
        self.stretch.input_latency() + self.stretch.output_latency()
    }

    fn prime(&mut self, history: &[f32]) {
        let c = self.channels;
        let frames = history.len() / c;
        let keep = frames.min(self.preroll_frames());
        let history = &history[(frames - keep) * c..frames * c];
        for chunk in history.chunks(OUT_CHUNK_FRAMES * c) {
            let n = chunk.len();
            self.stretch.process(chunk, &mut self.scratch[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 44_100;

    fn engine() -> Stretcher {
        Stretcher::new(RATE as u32, 2, RATE * 4)
    }

    /// 441 Hz stereo sine at amplitude 0.5.
    fn sine(frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (i as f32 * std::f32::consts::TAU / 100.0).sin() * 0.5;
                [v, v]
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// Feed everything in 1024-frame chunks, reading 2048-frame blocks, then drain.
    fn run(engine: &mut Stretcher, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        let mut block = vec![0.0f32; 2048 * 2];
        let mut fed = 0;
        while fed < input.len() {
            let end = (fed + 1024 * 2).min(input.len());
            fed += engine.write_frames(&input[fed..end]) * 2;
            let n = engine.read_frames(&mut block);
            out.extend_from_slice(&block[..n * 2]);
        }
        engine.finish();
        loop {
            let n = engine.read_frames(&mut block);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&block[..n * 2]);
        }
        out
    }

    fn assert_length(speed: f32) {
        let mut e = engine();
        e.set_speed(speed);
        let input = sine(RATE * 2);
        let out = run(&mut e, &input);
        let expected = (RATE * 2) as f32 / speed;
        let frames = (out.len() / 2) as f32;
        assert!(
            (frames - expected).abs() < expected * 0.02,
            "speed {speed}: {frames} frames, expected {expected}"
        );
        assert_eq!(e.backlog_source_frames(), 0);
    }

    #[test]
    fn library_reports_latency() {
        let e = engine();
        let (input, output) = e.latency_frames();
        assert!(input > 0);
        assert!(output > 0);
        assert_eq!(e.preroll_frames(), input + output);
        assert_eq!(e.channels(), 2);
    }

    #[test]
    fn nothing_available_until_latency_is_covered() {
        let mut e = engine();
        let input = sine(256);
        assert_eq!(e.write_frames(&input), 256);
        assert_eq!(e.available_frames(), 0);
        assert_eq!(e.backlog_source_frames(), 256);

        let more = sine(RATE);
        e.write_frames(&more);
        assert!(e.available_frames() > 0);
    }

    #[test]
    fn unity_speed_preserves_length() {
        assert_length(1.0);
    }

    #[test]
    fn double_speed_halves_length() {
        assert_length(2.0);
    }

    #[test]
    fn half_speed_doubles_length() {
        assert_length(0.5);
    }

    #[test]
    fn primed_engine_starts_at_full_level() {
        let source = sine(RATE * 2);
        let seek = RATE;
        let mut e = engine();
        e.reset();
        let preroll = e.preroll_frames();
        e.prime(&source[(seek - preroll) * 2..seek * 2]);
        assert_eq!(e.available_frames(), 0);
        assert_eq!(e.backlog_source_frames(), 0);

        e.write_frames(&source[seek * 2..]);
        let mut head = vec![0.0f32; 512 * 2];
        assert_eq!(e.read_frames(&mut head), 512);
        let level = rms(&head);
        let expected = 0.5 / std::f32::consts::SQRT_2;
        assert!(
            (level - expected).abs() < expected * 0.25,
            "head rms {level}, expected {expected}"
        );
    }

    #[test]
    fn speed_change_before_first_chunk_keeps_alignment() {
        let mut e = engine();
        let (input_latency, output_latency) = e.latency_frames();
        e.set_speed(2.0);
        assert_eq!(e.skip, output_latency + input_latency.div_ceil(2));
        e.set_speed(1.0);
        assert_eq!(e.skip, output_latency + input_latency);
    }

    #[test]
    fn reset_discards_everything() {
        let mut e = engine();
        e.write_frames(&sine(RATE));
        assert!(e.available_frames() > 0);
        e.reset();
        assert_eq!(e.available_frames(), 0);
        assert_eq!(e.backlog_source_frames(), 0);
        let mut out = vec![0.0f32; 64];
        assert_eq!(e.read_frames(&mut out), 0);
    }

    #[test]
    fn finish_without_input_emits_nothing() {
        let mut e = engine();
        e.finish();
        assert_eq!(e.available_frames(), 0);
        assert_eq!(e.backlog_source_frames(), 0);
    }

    #[test]
    fn finish_drains_short_tail() {
        let mut e = engine();
        let (input_latency, output_latency) = e.latency_frames();
        let frames = input_latency + output_latency + 500;
        e.write_frames(&sine(frames));
        e.finish();
        let mut out = vec![0.0f32; frames * 4];
        let n = e.read_frames(&mut out);
        assert!(n.abs_diff(frames) <= 2, "{n} of {frames}");
        assert_eq!(e.backlog_source_frames(), 0);
        assert_eq!(e.write_frames(&sine(16)), 0);
    }

    #[test]
    fn write_is_bounded_by_capacity() {
        let mut e = engine();
        let capacity = e.capacity_frames();
        let big = sine(capacity * 3);
        let mut accepted = 0;
        loop {
            let n = e.write_frames(&big[accepted * 2..]);
            if n == 0 {
                break;
            }
            accepted += n;
        }
        // Input FIFO, output FIFO and the frames dropped for latency.
        assert!(accepted <= capacity * 2 + e.preroll_frames());
        assert!(e.available_frames() <= capacity);

        let mut out = vec![0.0f32; 8192 * 2];
        assert!(e.read_frames(&mut out) > 0);
        assert!(e.write_frames(&big[accepted * 2..]) > 0);
    }

    #[test]
    fn speed_is_clamped() {
        let mut e = engine();
        e.set_speed(10.0);
        assert_eq!(e.speed(), 3.0);
        e.set_speed(0.1);
        assert_eq!(e.speed(), 0.5);
        e.set_speed(f32::NAN);
        assert_eq!(e.speed(), 1.0);
    }
}
