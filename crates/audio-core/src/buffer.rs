//! Real-time side of a stream
//!
//! A backend owns a [`Processor`] for every open stream and calls
//! [`Processor::process`] from its real-time thread once per native buffer.
//! The processor hands the user callback a [`StreamBuffer`] view, converting
//! between interleaved and non-interleaved layouts through buffers allocated
//! when the stream was opened. Nothing on this path allocates or blocks.
//!
//! The callback runs under a hard deadline: it must return well within one
//! buffer period and must not block, allocate or take locks. Missing the
//! deadline is heard as a dropout, it is not reported as an error.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::format::{Direction, NegotiatedFormat, SampleEncoding};

/// User callback invoked once per buffer
pub type StreamCallback = Box<dyn FnMut(&mut StreamBuffer<'_>) + Send>;

/// Invoked with the running xrun count whenever the backend reports one
pub type XRunCallback = Box<dyn FnMut(u64) + Send>;

/// Barrier between the control thread and the real-time thread.
///
/// The real-time side [`enter`](Gate::enter)s before touching user state; the
/// control side [`close`](Gate::close)s and returns only once no invocation
/// is in flight, so none can begin afterwards.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    running: AtomicBool,
    inside: AtomicUsize,
}

pub(crate) struct GateGuard<'a>(&'a Gate);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Gate {
    pub(crate) fn open(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub(crate) fn enter(&self) -> Option<GateGuard<'_>> {
        self.inside.fetch_add(1, Ordering::SeqCst);
        let guard = GateGuard(self);
        self.running.load(Ordering::SeqCst).then_some(guard)
    }

    pub(crate) fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        while self.inside.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn sample_offset(
    interleaved: bool,
    total_frames: usize,
    channels: usize,
    size: usize,
    frame: usize,
    channel: usize,
) -> usize {
    if interleaved {
        (frame * channels + channel) * size
    } else {
        (channel * total_frames + frame) * size
    }
}

/// Read-only view of one direction of a buffer
#[derive(Debug)]
pub struct Frames<'a> {
    data: &'a [u8],
    frames: usize,
    channels: usize,
    encoding: SampleEncoding,
    interleaved: bool,
}

impl<'a> Frames<'a> {
    fn new(
        data: &'a [u8],
        frames: usize,
        channels: usize,
        encoding: SampleEncoding,
        interleaved: bool,
    ) -> Self {
        Self {
            data,
            frames,
            channels,
            encoding,
            interleaved,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn is_empty(&self) -> bool {
        self.channels == 0 || self.frames == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }

    /// Raw bytes of one sample
    pub fn sample(&self, frame: usize, channel: usize) -> Option<&[u8]> {
        if frame >= self.frames || channel >= self.channels {
            return None;
        }
        let size = self.encoding.size();
        let at = sample_offset(
            self.interleaved,
            self.frames,
            self.channels,
            size,
            frame,
            channel,
        );
        self.data.get(at..at + size)
    }

    /// One channel's samples; only available for non-interleaved buffers
    pub fn channel(&self, channel: usize) -> Option<&[u8]> {
        if self.interleaved || channel >= self.channels {
            return None;
        }
        let len = self.frames * self.encoding.size();
        self.data.get(channel * len..(channel + 1) * len)
    }

    /// Reads a `Float32` sample
    pub fn read_f32(&self, frame: usize, channel: usize) -> Option<f32> {
        if self.encoding != SampleEncoding::Float32 {
            return None;
        }
        let bytes: [u8; 4] = self.sample(frame, channel)?.try_into().ok()?;
        Some(f32::from_ne_bytes(bytes))
    }
}

/// Writable view of the output direction of a buffer
#[derive(Debug)]
pub struct FramesMut<'a> {
    data: &'a mut [u8],
    frames: usize,
    channels: usize,
    encoding: SampleEncoding,
    interleaved: bool,
}

impl<'a> FramesMut<'a> {
    fn new(
        data: &'a mut [u8],
        frames: usize,
        channels: usize,
        encoding: SampleEncoding,
        interleaved: bool,
    ) -> Self {
        Self {
            data,
            frames,
            channels,
            encoding,
            interleaved,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn is_empty(&self) -> bool {
        self.channels == 0 || self.frames == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data
    }

    pub fn sample_mut(&mut self, frame: usize, channel: usize) -> Option<&mut [u8]> {
        if frame >= self.frames || channel >= self.channels {
            return None;
        }
        let size = self.encoding.size();
        let at = sample_offset(
            self.interleaved,
            self.frames,
            self.channels,
            size,
            frame,
            channel,
        );
        self.data.get_mut(at..at + size)
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut [u8]> {
        if self.interleaved || channel >= self.channels {
            return None;
        }
        let len = self.frames * self.encoding.size();
        self.data.get_mut(channel * len..(channel + 1) * len)
    }

    /// Writes a `Float32` sample, returning `false` if out of range or the
    /// stream uses another encoding
    pub fn write_f32(&mut self, frame: usize, channel: usize, value: f32) -> bool {
        if self.encoding != SampleEncoding::Float32 {
            return false;
        }
        match self.sample_mut(frame, channel) {
            Some(sample) => {
                sample.copy_from_slice(&value.to_ne_bytes());
                true
            }
            None => false,
        }
    }

    pub fn silence(&mut self) {
        self.data.fill(self.encoding.silence());
    }
}

/// Everything the callback sees for one invocation
///
/// Borrowed for the duration of the call only.
#[derive(Debug)]
pub struct StreamBuffer<'a> {
    /// Frames in this buffer
    pub frames: usize,
    /// Frames processed since the stream was first started
    pub position: u64,
    /// Stream time reported by the backend, if it keeps one
    pub time: Option<Duration>,
    pub input: Frames<'a>,
    pub output: FramesMut<'a>,
}

/// Native buffers handed over by a backend for one period.
///
/// Layout follows [`NegotiatedFormat::native_interleaved`]; non-interleaved
/// data is stored channel after channel, each `frames` samples long.
pub struct NativeIo<'a> {
    pub frames: usize,
    pub time: Option<Duration>,
    pub input: Option<&'a [u8]>,
    pub output: Option<&'a mut [u8]>,
}

struct Scratch {
    input: Vec<u8>,
    output: Vec<u8>,
    capacity: usize,
}

/// Owns the user callback and drives it from the backend's real-time thread
pub struct Processor {
    format: NegotiatedFormat,
    gate: std::sync::Arc<Gate>,
    callback: StreamCallback,
    on_xrun: Option<XRunCallback>,
    xruns: u64,
    position: u64,
    scratch: Option<Scratch>,
}

impl Processor {
    pub(crate) fn new(
        format: NegotiatedFormat,
        gate: std::sync::Arc<Gate>,
        callback: StreamCallback,
        on_xrun: Option<XRunCallback>,
    ) -> Self {
        let scratch = (format.interleaved != format.native_interleaved).then(|| {
            let capacity = format.buffer_frames.max(1) as usize;
            Scratch {
                input: vec![0; capacity * format.frame_bytes(Direction::Input)],
                output: vec![0; capacity * format.frame_bytes(Direction::Output)],
                capacity,
            }
        });

        Self {
            format,
            gate,
            callback,
            on_xrun,
            xruns: 0,
            position: 0,
            scratch,
        }
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    /// Whether the stream is currently started
    pub fn is_running(&self) -> bool {
        self.gate.is_open()
    }

    pub fn xruns(&self) -> u64 {
        self.xruns
    }

    /// Processes one native period. Output is silenced when the stream is not
    /// running.
    pub fn process(&mut self, io: NativeIo<'_>) {
        let NativeIo {
            frames,
            time,
            input,
            output,
        } = io;

        let in_bytes = self.format.frame_bytes(Direction::Input);
        let out_bytes = self.format.frame_bytes(Direction::Output);
        let silence = self.format.encoding.silence();

        let input: &[u8] = input.unwrap_or(&[]);
        let output: &mut [u8] = output.unwrap_or_default();
        output.fill(silence);

        let mut frames = frames;
        if in_bytes > 0 {
            frames = frames.min(input.len() / in_bytes);
        }
        if out_bytes > 0 {
            frames = frames.min(output.len() / out_bytes);
        }

        let Some(_guard) = self.gate.enter() else {
            return;
        };

        let input = input.get(..frames * in_bytes).unwrap_or(&[]);
        let output = match output.get_mut(..frames * out_bytes) {
            Some(output) => output,
            None => return,
        };

        match self.scratch.as_mut() {
            None => {
                let mut buffer = StreamBuffer {
                    frames,
                    position: self.position,
                    time,
                    input: Frames::new(
                        input,
                        frames,
                        self.format.input_channels,
                        self.format.encoding,
                        self.format.interleaved,
                    ),
                    output: FramesMut::new(
                        output,
                        frames,
                        self.format.output_channels,
                        self.format.encoding,
                        self.format.interleaved,
                    ),
                };
                (self.callback)(&mut buffer);
            }
            Some(scratch) => {
                let format = &self.format;
                let mut offset = 0;
                while offset < frames {
                    let chunk = scratch.capacity.min(frames - offset);
                    let scratch_in = &mut scratch.input[..chunk * in_bytes];
                    let scratch_out = &mut scratch.output[..chunk * out_bytes];

                    weave_in(format, input, frames, offset, scratch_in, chunk);
                    scratch_out.fill(silence);

                    let mut buffer = StreamBuffer {
                        frames: chunk,
                        position: self.position + offset as u64,
                        time: time.map(|t| t + frames_duration(offset, format.sample_rate)),
                        input: Frames::new(
                            scratch_in,
                            chunk,
                            format.input_channels,
                            format.encoding,
                            format.interleaved,
                        ),
                        output: FramesMut::new(
                            scratch_out,
                            chunk,
                            format.output_channels,
                            format.encoding,
                            format.interleaved,
                        ),
                    };
                    (self.callback)(&mut buffer);

                    weave_out(format, scratch_out, chunk, output, frames, offset);
                    offset += chunk;
                }
            }
        }

        self.position += frames as u64;
    }

    /// Reports an under- or overrun detected by the backend
    pub fn xrun(&mut self) {
        self.xruns += 1;
        let xruns = self.xruns;
        if let Some(on_xrun) = self.on_xrun.as_mut() {
            if let Some(_guard) = self.gate.enter() {
                on_xrun(xruns);
            }
        }
    }
}

fn frames_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
}

/// Copies `chunk` frames starting at `offset` out of a native buffer holding
/// `native_frames` frames into a scratch buffer in the callback's layout
fn weave_in(
    format: &NegotiatedFormat,
    native: &[u8],
    native_frames: usize,
    offset: usize,
    scratch: &mut [u8],
    chunk: usize,
) {
    let size = format.encoding.size();
    let channels = format.input_channels;
    for frame in 0..chunk {
        for channel in 0..channels {
            let src = sample_offset(
                format.native_interleaved,
                native_frames,
                channels,
                size,
                offset + frame,
                channel,
            );
            let dst = sample_offset(format.interleaved, chunk, channels, size, frame, channel);
            if let (Some(from), Some(to)) =
                (native.get(src..src + size), scratch.get_mut(dst..dst + size))
            {
                to.copy_from_slice(from);
            }
        }
    }
}

fn weave_out(
    format: &NegotiatedFormat,
    scratch: &[u8],
    chunk: usize,
    native: &mut [u8],
    native_frames: usize,
    offset: usize,
) {
    let size = format.encoding.size();
    let channels = format.output_channels;
    for frame in 0..chunk {
        for channel in 0..channels {
            let src = sample_offset(format.interleaved, chunk, channels, size, frame, channel);
            let dst = sample_offset(
                format.native_interleaved,
                native_frames,
                channels,
                size,
                offset + frame,
                channel,
            );
            if let (Some(from), Some(to)) =
                (scratch.get(src..src + size), native.get_mut(dst..dst + size))
            {
                to.copy_from_slice(from);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelMask;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn format(interleaved: bool, native_interleaved: bool, buffer_frames: u32) -> NegotiatedFormat {
        NegotiatedFormat {
            sample_rate: 48_000,
            encoding: SampleEncoding::Float32,
            input_mask: ChannelMask::first(2),
            output_mask: ChannelMask::first(2),
            input_channels: 2,
            output_channels: 2,
            buffer_frames,
            interleaved,
            native_interleaved,
        }
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn f32_values(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_gate_blocks_after_close() {
        let gate = Gate::default();
        assert!(gate.enter().is_none());
        gate.open();
        {
            let guard = gate.enter();
            assert!(guard.is_some());
        }
        gate.close();
        assert!(gate.enter().is_none());
        assert_eq!(gate.inside.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closed_gate_silences_output() {
        let gate = Arc::new(Gate::default());
        let called = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&called);
        let mut processor = Processor::new(
            format(true, true, 4),
            Arc::clone(&gate),
            Box::new(move |_: &mut StreamBuffer<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        let input = vec![0u8; 4 * 8];
        let mut output = f32_bytes(&[1.0; 8]);
        processor.process(NativeIo {
            frames: 4,
            time: None,
            input: Some(&input),
            output: Some(&mut output),
        });

        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(f32_values(&output).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_passthrough_when_layouts_match() {
        let gate = Arc::new(Gate::default());
        gate.open();
        let mut processor = Processor::new(
            format(true, true, 2),
            Arc::clone(&gate),
            Box::new(|buffer: &mut StreamBuffer<'_>| {
                for frame in 0..buffer.frames {
                    for channel in 0..2 {
                        let value = buffer.input.read_f32(frame, channel).unwrap_or(0.0);
                        buffer.output.write_f32(frame, channel, value * 2.0);
                    }
                }
            }),
            None,
        );

        let input = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let mut output = vec![0u8; input.len()];
        processor.process(NativeIo {
            frames: 2,
            time: None,
            input: Some(&input),
            output: Some(&mut output),
        });

        assert_eq!(f32_values(&output), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_non_interleaved_emulation_converts_both_ways() {
        let gate = Arc::new(Gate::default());
        gate.open();
        let mut processor = Processor::new(
            format(false, true, 2),
            Arc::clone(&gate),
            Box::new(|buffer: &mut StreamBuffer<'_>| {
                assert!(!buffer.input.is_interleaved());
                // channel 0 holds frames 0..n, then channel 1
                let left = buffer.input.channel(0).map(<[u8]>::to_vec);
                if let (Some(left), Some(out)) = (left, buffer.output.channel_mut(1)) {
                    out.copy_from_slice(&left);
                }
            }),
            None,
        );

        // Native interleaved L/R pairs, 4 frames: processed as two chunks of 2
        let input = f32_bytes(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        let mut output = vec![0u8; input.len()];
        processor.process(NativeIo {
            frames: 4,
            time: Some(Duration::ZERO),
            input: Some(&input),
            output: Some(&mut output),
        });

        assert_eq!(
            f32_values(&output),
            vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0]
        );
    }

    #[test]
    fn test_position_advances_and_xruns_reported() {
        let gate = Arc::new(Gate::default());
        gate.open();
        let positions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&positions);
        let xruns = Arc::new(AtomicU64::new(0));
        let xrun_seen = Arc::clone(&xruns);
        let mut processor = Processor::new(
            format(true, true, 2),
            gate,
            Box::new(move |buffer: &mut StreamBuffer<'_>| {
                seen.lock().unwrap().push(buffer.position);
            }),
            Some(Box::new(move |count: u64| {
                xrun_seen.store(count, Ordering::SeqCst);
            })),
        );

        let input = vec![0u8; 16];
        let mut output = vec![0u8; 16];
        for _ in 0..3 {
            processor.process(NativeIo {
                frames: 2,
                time: None,
                input: Some(&input),
                output: Some(&mut output),
            });
        }
        processor.xrun();
        processor.xrun();

        assert_eq!(*positions.lock().unwrap(), vec![0, 2, 4]);
        assert_eq!(xruns.load(Ordering::SeqCst), 2);
        assert_eq!(processor.xruns(), 2);
    }

    #[test]
    fn test_short_native_buffer_limits_frames() {
        let gate = Arc::new(Gate::default());
        gate.open();
        let frames_seen = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&frames_seen);
        let mut processor = Processor::new(
            format(true, true, 8),
            gate,
            Box::new(move |buffer: &mut StreamBuffer<'_>| {
                seen.store(buffer.frames as u64, Ordering::SeqCst);
            }),
            None,
        );

        let input = vec![0u8; 3 * 8];
        let mut output = vec![0u8; 8 * 8];
        processor.process(NativeIo {
            frames: 8,
            time: None,
            input: Some(&input),
            output: Some(&mut output),
        });
        assert_eq!(frames_seen.load(Ordering::SeqCst), 3);
    }
}
