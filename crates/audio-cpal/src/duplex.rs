//! Ring buffer joining the input and output halves of a duplex stream
//!
//! The input callback queues whole frames; the output callback drains them
//! into the processor one period at a time. Frames that do not fit are
//! dropped and reported as an xrun on the next output period. An empty ring
//! after the first input arrived is reported the same way and fed as silence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use unison_audio_core::{Direction, NativeIo, NegotiatedFormat, Processor};

/// Ring buffer capacity between the duplex halves, in periods
const DUPLEX_PERIODS: usize = 4;

/// Receiver of the joined periods
pub(crate) trait Render {
    fn format(&self) -> &NegotiatedFormat;

    fn process(&mut self, io: NativeIo<'_>);

    fn xrun(&mut self);
}

impl Render for Processor {
    fn format(&self) -> &NegotiatedFormat {
        Processor::format(self)
    }

    fn process(&mut self, io: NativeIo<'_>) {
        Processor::process(self, io);
    }

    fn xrun(&mut self) {
        Processor::xrun(self);
    }
}

/// Splits a ring sized for `format` into its two halves
pub(crate) fn bridge<R: Render>(target: R) -> (DuplexInput, DuplexOutput<R>) {
    let format = *target.format();
    let in_frame = format.frame_bytes(Direction::Input).max(1);
    let period = format.buffer_frames.max(1) as usize;
    let (producer, consumer) = HeapRb::<u8>::new(period * in_frame * DUPLEX_PERIODS).split();
    let overruns = Arc::new(AtomicU64::new(0));

    let input = DuplexInput {
        producer,
        frame: in_frame,
        overruns: Arc::clone(&overruns),
    };
    let output = DuplexOutput {
        target,
        consumer,
        overruns,
        seen_overruns: 0,
        scratch: vec![0; period * in_frame],
        primed: false,
    };
    (input, output)
}

pub(crate) struct DuplexInput {
    producer: HeapProd<u8>,
    frame: usize,
    overruns: Arc<AtomicU64>,
}

impl DuplexInput {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        // whole frames only, so the consumer never reads a torn frame
        let room = self.producer.vacant_len() / self.frame * self.frame;
        let take = bytes.len().min(room);
        self.producer.push_slice(&bytes[..take]);
        if take < bytes.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub(crate) struct DuplexOutput<R> {
    target: R,
    consumer: HeapCons<u8>,
    overruns: Arc<AtomicU64>,
    seen_overruns: u64,
    scratch: Vec<u8>,
    primed: bool,
}

impl<R: Render> DuplexOutput<R> {
    /// Fills `output` with processed frames; `start` is the stream time of
    /// its first frame
    pub(crate) fn render(&mut self, output: &mut [u8], start: Option<Duration>) {
        let format = *self.target.format();
        let in_frame = format.frame_bytes(Direction::Input).max(1);
        let out_frame = format.frame_bytes(Direction::Output).max(1);
        let chunk = (self.scratch.len() / in_frame).max(1);
        let frames = output.len() / out_frame;

        let overruns = self.overruns.load(Ordering::Relaxed);
        if overruns != self.seen_overruns {
            self.seen_overruns = overruns;
            self.target.xrun();
        }

        let mut starved = false;
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(chunk);
            let wanted = n * in_frame;
            let got = self.consumer.pop_slice(&mut self.scratch[..wanted]);
            self.primed |= got > 0;
            if got < wanted {
                self.scratch[got..wanted].fill(format.encoding.silence());
                starved |= self.primed;
            }

            let offset = Duration::from_secs_f64(done as f64 / f64::from(format.sample_rate));
            self.target.process(NativeIo {
                frames: n,
                time: start.map(|t| t + offset),
                input: Some(&self.scratch[..wanted]),
                output: Some(&mut output[done * out_frame..(done + n) * out_frame]),
            });
            done += n;
        }

        if starved {
            self.target.xrun();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unison_audio_core::{ChannelMask, SampleEncoding};

    /// Copies input to output and records what it saw
    struct Loopback {
        format: NegotiatedFormat,
        xruns: usize,
        times: Vec<Option<Duration>>,
    }

    impl Render for Loopback {
        fn format(&self) -> &NegotiatedFormat {
            &self.format
        }

        fn process(&mut self, io: NativeIo<'_>) {
            self.times.push(io.time);
            if let (Some(input), Some(output)) = (io.input, io.output) {
                output.copy_from_slice(input);
            }
        }

        fn xrun(&mut self) {
            self.xruns += 1;
        }
    }

    /// Mono Int16 both ways, two-frame periods: the ring holds eight frames
    fn loopback() -> (DuplexInput, DuplexOutput<Loopback>) {
        bridge(Loopback {
            format: NegotiatedFormat {
                sample_rate: 48_000,
                encoding: SampleEncoding::Int16,
                input_mask: ChannelMask::first(1),
                output_mask: ChannelMask::first(1),
                input_channels: 1,
                output_channels: 1,
                buffer_frames: 2,
                interleaved: true,
                native_interleaved: true,
            },
            xruns: 0,
            times: Vec::new(),
        })
    }

    fn frames(values: std::ops::RangeInclusive<u8>) -> Vec<u8> {
        values.flat_map(|v| [v, 0]).collect()
    }

    #[test]
    fn test_steady_state_passes_input_through() {
        let (mut input, mut output) = loopback();
        let mut buffer = [0xff; 4];

        for period in 0..5u8 {
            let first = period * 2 + 1;
            input.push(&frames(first..=first + 1));
            output.render(&mut buffer, None);
            assert_eq!(buffer.to_vec(), frames(first..=first + 1));
        }
        assert_eq!(output.target.xruns, 0);
    }

    #[test]
    fn test_long_output_is_split_into_periods() {
        let (mut input, mut output) = loopback();
        let mut buffer = [0; 8];

        input.push(&frames(1..=4));
        output.render(&mut buffer, Some(Duration::from_millis(10)));
        assert_eq!(buffer.to_vec(), frames(1..=4));

        let step = Duration::from_secs_f64(2.0 / 48_000.0);
        assert_eq!(
            output.target.times,
            vec![
                Some(Duration::from_millis(10)),
                Some(Duration::from_millis(10) + step)
            ]
        );
    }

    #[test]
    fn test_starvation_reports_xrun_and_feeds_silence() {
        let (mut input, mut output) = loopback();
        let mut buffer = [0xff; 4];

        // nothing captured yet: silence, but not an xrun
        output.render(&mut buffer, None);
        assert_eq!(buffer, [0; 4]);
        assert_eq!(output.target.xruns, 0);

        input.push(&frames(1..=2));
        output.render(&mut buffer, None);
        assert_eq!(output.target.xruns, 0);

        buffer = [0xff; 4];
        output.render(&mut buffer, None);
        assert_eq!(buffer, [0; 4]);
        assert_eq!(output.target.xruns, 1);

        // half a period short
        input.push(&frames(7..=7));
        output.render(&mut buffer, None);
        assert_eq!(buffer, [7, 0, 0, 0]);
        assert_eq!(output.target.xruns, 2);
    }

    #[test]
    fn test_overrun_reports_xrun_and_drops_frames() {
        let (mut input, mut output) = loopback();
        let mut buffer = [0; 4];

        input.push(&frames(1..=10));
        assert_eq!(output.target.xruns, 0);

        output.render(&mut buffer, None);
        assert_eq!(output.target.xruns, 1);
        assert_eq!(buffer.to_vec(), frames(1..=2));

        let mut rest = Vec::new();
        for _ in 0..3 {
            output.render(&mut buffer, None);
            rest.extend_from_slice(&buffer);
        }
        // frames 9 and 10 did not fit
        assert_eq!(rest, frames(3..=8));
        assert_eq!(output.target.xruns, 1);

        output.render(&mut buffer, None);
        assert_eq!(buffer, [0; 4]);
        assert_eq!(output.target.xruns, 2);
    }

    #[test]
    fn test_partial_frames_are_not_queued() {
        let (mut input, mut output) = loopback();
        let mut buffer = [0; 4];

        input.push(&frames(1..=7));
        // room for one more frame; the stray byte is dropped
        input.push(&[8, 0, 9]);
        assert_eq!(input.producer.occupied_len(), 16);

        output.render(&mut buffer, None);
        assert_eq!(buffer.to_vec(), frames(1..=2));
        assert_eq!(output.target.xruns, 1);
    }
}
