//! Segment player - the render-side end of the playback scheduler
//!
//! Plays a queue of [`Segment`]s back to back with no gap between them,
//! reporting when each one starts and completes. Segments are either a frame
//! range of the source file, read in chunks, or a pre-decoded loop pass.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::clock::RenderClock;
use crate::loop_buffer::LoopBuffer;
use crate::node::{AudioNode, ProcessContext};
use crate::source::FrameReader;

/// Highest source channel count the player will render
pub const MAX_CHANNELS: usize = 8;

/// Frames read from a file reader at a time
const CHUNK_FRAMES: usize = 1024;

/// Identifies one scheduled segment.
///
/// `generation` changes on every flush. Events carrying an older generation
/// belong to a schedule that has already been thrown away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentToken {
    pub generation: u64,
    pub serial: u64,
}

/// Where a segment's frames come from
#[derive(Clone)]
pub enum SegmentFrames {
    /// `[start, end)` of the source file
    File {
        reader: Arc<dyn FrameReader>,
        start: u64,
        end: u64,
    },
    /// One full pass of the loop buffer
    Buffer(Arc<LoopBuffer>),
}

impl core::fmt::Debug for SegmentFrames {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SegmentFrames::File { start, end, .. } => {
                f.debug_struct("File").field("start", start).field("end", end).finish()
            }
            SegmentFrames::Buffer(buffer) => f
                .debug_struct("Buffer")
                .field("start", &buffer.start_frame())
                .field("end", &buffer.end_frame())
                .finish(),
        }
    }
}

/// A contiguous run of source frames queued for playback
#[derive(Clone, Debug)]
pub struct Segment {
    pub token: SegmentToken,
    pub frames: SegmentFrames,
}

impl Segment {
    pub fn file(token: SegmentToken, reader: Arc<dyn FrameReader>, start: u64, end: u64) -> Self {
        Self {
            token,
            frames: SegmentFrames::File { reader, start, end },
        }
    }

    pub fn buffer(token: SegmentToken, buffer: Arc<LoopBuffer>) -> Self {
        Self {
            token,
            frames: SegmentFrames::Buffer(buffer),
        }
    }

    /// Length in frames
    pub fn len(&self) -> u64 {
        match &self.frames {
            SegmentFrames::File { start, end, .. } => end.saturating_sub(*start),
            SegmentFrames::Buffer(buffer) => buffer.frames(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages to control a [`SegmentPlayer`]
#[derive(Debug)]
pub enum PlayerMessage {
    /// Start or resume rendering
    Play,
    /// Stop rendering, keeping the queue and position
    Pause,
    /// Append a segment to the queue
    Schedule(Segment),
    /// Drop everything queued and start a new generation
    Flush { generation: u64 },
    /// Playback rate, 1.0 = original tempo
    SetRate(f64),
    /// Format of the segments that follow
    SetFormat { sample_rate: u32, channels: usize },
}

/// Render events, drained by the control side.
///
/// `sample_time` counts source frames played since the last flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The first frame of the segment is now playing
    Started { token: SegmentToken, sample_time: u64 },
    /// The last frame of the segment has been played, or the segment was flushed
    Completed { token: SegmentToken, sample_time: u64 },
}

impl PlayerEvent {
    pub fn token(&self) -> SegmentToken {
        match *self {
            PlayerEvent::Started { token, .. } | PlayerEvent::Completed { token, .. } => token,
        }
    }
}

#[derive(Clone, Copy)]
struct Frame {
    samples: [f32; MAX_CHANNELS],
    valid: bool,
    starts: Option<SegmentToken>,
    ends: Option<SegmentToken>,
}

impl Frame {
    const SILENT: Frame = Frame {
        samples: [0.0; MAX_CHANNELS],
        valid: false,
        starts: None,
        ends: None,
    };
}

struct Cursor {
    segment: Segment,
    pos: u64,
    len: u64,
}

/// Plays scheduled segments gaplessly at a variable rate.
///
/// Resampling from the source rate to the graph rate and the tempo change
/// are one linear-interpolation step. At rate 1.0 with matching sample rates
/// every source frame is output unchanged.
pub struct SegmentPlayer {
    queue: VecDeque<Segment>,
    current: Option<Cursor>,

    // Read cache for file segments
    chunk: Vec<f32>,
    chunk_start: u64,
    chunk_frames: usize,

    curr: Frame,
    next: Frame,
    frac: f64,

    rate: f64,
    source_rate: u32,
    channels: usize,
    playing: bool,

    sample_time: u64,
    clock: Arc<RenderClock>,
    events: Producer<PlayerEvent>,
    dropped_events: u64,
}

impl SegmentPlayer {
    /// Create a player that publishes to `clock` and reports through `events`.
    ///
    /// `queue_capacity` bounds the number of pending segments; the scheduler
    /// never keeps more than a few in flight.
    pub fn new(clock: Arc<RenderClock>, events: Producer<PlayerEvent>, queue_capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(queue_capacity),
            current: None,
            chunk: alloc::vec![0.0; CHUNK_FRAMES * MAX_CHANNELS],
            chunk_start: 0,
            chunk_frames: 0,
            curr: Frame::SILENT,
            next: Frame::SILENT,
            frac: 0.0,
            rate: 1.0,
            source_rate: 0,
            channels: 2,
            playing: false,
            sample_time: 0,
            clock,
            events,
            dropped_events: 0,
        }
    }

    /// Events that could not be delivered because the event queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    fn emit(&mut self, event: PlayerEvent) {
        if self.events.push(event).is_err() {
            self.dropped_events += 1;
        }
    }

    fn flush(&mut self, generation: u64) {
        // Flushed segments are reported as completed, the generation guard
        // on the control side discards them.
        let sample_time = self.sample_time;
        if let Some(cursor) = self.current.take() {
            self.emit(PlayerEvent::Completed { token: cursor.segment.token, sample_time });
        }
        while let Some(segment) = self.queue.pop_front() {
            self.emit(PlayerEvent::Completed { token: segment.token, sample_time });
        }
        self.curr = Frame::SILENT;
        self.next = Frame::SILENT;
        self.frac = 0.0;
        self.chunk_frames = 0;
        self.sample_time = 0;
        self.clock.reset(generation);
    }

    /// Take the next frame off the queue, or silence if there is none.
    fn pull(&mut self) -> Frame {
        loop {
            let Some(cursor) = self.current.as_mut() else {
                match self.queue.pop_front() {
                    Some(segment) => {
                        let len = segment.len();
                        self.current = Some(Cursor { segment, pos: 0, len });
                        self.chunk_frames = 0;
                        continue;
                    }
                    None => return Frame::SILENT,
                }
            };

            if cursor.pos >= cursor.len {
                // Empty or cut short by a failed read
                let token = cursor.segment.token;
                let started = cursor.pos > 0;
                self.current = None;
                let sample_time = self.sample_time;
                if !started {
                    self.emit(PlayerEvent::Started { token, sample_time });
                }
                self.emit(PlayerEvent::Completed { token, sample_time });
                continue;
            }

            let mut frame = Frame::SILENT;
            frame.valid = true;
            let channels = self.channels;
            let pos = cursor.pos;

            match &cursor.segment.frames {
                SegmentFrames::Buffer(buffer) => {
                    let from = pos as usize * buffer.channels();
                    let src = &buffer.samples()[from..from + buffer.channels()];
                    for (ch, s) in frame.samples.iter_mut().take(channels).enumerate() {
                        *s = src[ch.min(src.len() - 1)];
                    }
                }
                SegmentFrames::File { reader, start, .. } => {
                    let abs = start + pos;
                    let cached = abs >= self.chunk_start && abs < self.chunk_start + self.chunk_frames as u64;
                    if !cached {
                        let want = ((cursor.len - pos) as usize).min(CHUNK_FRAMES);
                        let read = reader.read_frames(abs, &mut self.chunk[..want * channels]).unwrap_or(0);
                        self.chunk_start = abs;
                        self.chunk_frames = read;
                        if read == 0 {
                            cursor.len = pos;
                            continue;
                        }
                    }
                    let from = (abs - self.chunk_start) as usize * channels;
                    frame.samples[..channels].copy_from_slice(&self.chunk[from..from + channels]);
                }
            }

            if pos == 0 {
                frame.starts = Some(cursor.segment.token);
            }
            cursor.pos += 1;
            if cursor.pos == cursor.len {
                frame.ends = Some(cursor.segment.token);
                self.current = None;
            }
            return frame;
        }
    }

    fn mark_started(&mut self) {
        if let Some(token) = self.curr.starts {
            let sample_time = self.sample_time;
            self.emit(PlayerEvent::Started { token, sample_time });
        }
    }

    /// Pick up new segments after running dry.
    fn prime(&mut self) {
        if self.curr.valid {
            return;
        }
        if !self.next.valid {
            self.next = self.pull();
        }
        if self.next.valid {
            self.curr = self.next;
            self.next = self.pull();
            self.frac = 0.0;
            self.mark_started();
        }
    }

    fn advance(&mut self) {
        if self.curr.valid {
            self.sample_time += 1;
            if let Some(token) = self.curr.ends {
                let sample_time = self.sample_time;
                self.emit(PlayerEvent::Completed { token, sample_time });
            }
        }
        self.curr = self.next;
        self.next = self.pull();
        self.mark_started();
    }
}

impl AudioNode for SegmentPlayer {
    type Message = PlayerMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = PlayerMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                PlayerMessage::Play => {
                    self.playing = true;
                    self.clock.set_running(true);
                }
                PlayerMessage::Pause => {
                    self.playing = false;
                    self.clock.set_running(false);
                }
                PlayerMessage::Schedule(segment) => {
                    if self.queue.len() == self.queue.capacity() {
                        // Refuse to allocate on the render thread
                        self.emit(PlayerEvent::Completed { token: segment.token, sample_time: self.sample_time });
                    } else {
                        self.queue.push_back(segment);
                    }
                }
                PlayerMessage::Flush { generation } => self.flush(generation),
                PlayerMessage::SetRate(rate) => self.rate = rate.max(0.0),
                PlayerMessage::SetFormat { sample_rate, channels } => {
                    self.source_rate = sample_rate;
                    self.channels = channels.clamp(1, MAX_CHANNELS);
                    self.chunk_frames = 0;
                }
            }
        }

        for buffer in outputs.iter_mut() {
            buffer.silence();
        }
        if !self.playing || outputs.is_empty() {
            return;
        }

        let source_rate = if self.source_rate == 0 { ctx.sample_rate } else { self.source_rate };
        let step = self.rate * source_rate as f64 / ctx.sample_rate as f64;
        let buffer_len = outputs[0].len();
        let channels = self.channels;

        for i in 0..buffer_len {
            self.prime();
            let t = self.frac as f32;
            for (ch, buffer) in outputs.iter_mut().enumerate() {
                let src_ch = ch % channels;
                let a = self.curr.samples[src_ch];
                let b = self.next.samples[src_ch];
                buffer[i] = a + (b - a) * t;
            }

            self.frac += step;
            while self.frac >= 1.0 {
                self.frac -= 1.0;
                self.advance();
            }
        }

        self.clock.publish(self.sample_time);
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use rtrb::{Consumer, RingBuffer};

    const RATE: u32 = 1000;

    fn ctx() -> ProcessContext {
        ProcessContext { sample_rate: RATE, buffer_size: Buffer::LEN }
    }

    fn setup() -> (SegmentPlayer, Consumer<PlayerEvent>, Arc<RenderClock>) {
        let clock = Arc::new(RenderClock::new());
        let (tx, rx) = RingBuffer::new(64);
        let mut player = SegmentPlayer::new(clock.clone(), tx, 8);
        player.source_rate = RATE;
        player.channels = 1;
        (player, rx, clock)
    }

    fn ramp_reader(frames: usize) -> Arc<dyn FrameReader> {
        let samples = (0..frames).map(|i| i as f32).collect();
        Arc::new(MemorySource::new(samples, 1, RATE).unwrap())
    }

    fn token(generation: u64, serial: u64) -> SegmentToken {
        SegmentToken { generation, serial }
    }

    fn render(player: &mut SegmentPlayer, msgs: Vec<PlayerMessage>) -> Vec<f32> {
        let mut out = [Buffer::SILENT; 2];
        player.process(&ctx(), msgs.into_iter(), &[], &mut out);
        out[0].to_vec()
    }

    fn drain(rx: &mut Consumer<PlayerEvent>) -> Vec<PlayerEvent> {
        core::iter::from_fn(|| rx.pop().ok()).collect()
    }

    #[test]
    fn back_to_back_segments_are_gapless() {
        let (mut player, mut rx, clock) = setup();
        let reader = ramp_reader(200);
        let out = render(
            &mut player,
            vec![
                PlayerMessage::Flush { generation: 1 },
                PlayerMessage::Schedule(Segment::file(token(1, 0), reader.clone(), 10, 40)),
                PlayerMessage::Schedule(Segment::file(token(1, 1), reader, 100, 140)),
                PlayerMessage::Play,
            ],
        );

        let expected: Vec<f32> = (10..40).chain(100..134).map(|i| i as f32).collect();
        assert_eq!(out, expected);
        assert_eq!(
            drain(&mut rx),
            vec![
                PlayerEvent::Started { token: token(1, 0), sample_time: 0 },
                PlayerEvent::Completed { token: token(1, 0), sample_time: 30 },
                PlayerEvent::Started { token: token(1, 1), sample_time: 30 },
            ]
        );
        assert_eq!(clock.snapshot().unwrap().sample_time, 64);
    }

    #[test]
    fn flush_reports_pending_segments_as_completed() {
        let (mut player, mut rx, clock) = setup();
        let reader = ramp_reader(500);
        render(
            &mut player,
            vec![
                PlayerMessage::Schedule(Segment::file(token(0, 0), reader.clone(), 0, 400)),
                PlayerMessage::Schedule(Segment::file(token(0, 1), reader, 400, 500)),
                PlayerMessage::Play,
            ],
        );
        drain(&mut rx);

        let out = render(&mut player, vec![PlayerMessage::Flush { generation: 5 }]);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(
            drain(&mut rx),
            vec![
                PlayerEvent::Completed { token: token(0, 0), sample_time: 64 },
                PlayerEvent::Completed { token: token(0, 1), sample_time: 64 },
            ]
        );
        let snap = clock.snapshot().unwrap();
        assert_eq!((snap.generation, snap.sample_time), (5, 0));
    }

    #[test]
    fn loop_buffer_passes_repeat() {
        let (mut player, mut rx, _) = setup();
        let source = crate::source::AudioSource::new(MemorySource::new(vec![1.0; 1000], 1, RATE).unwrap()).unwrap();
        let cache = crate::loop_buffer::LoopBufferCache::new(0, 0.0);
        let buffer = cache.rebuild(&source, 0.0, 0.02).unwrap();

        let out = render(
            &mut player,
            vec![
                PlayerMessage::Schedule(Segment::buffer(token(0, 0), buffer.clone())),
                PlayerMessage::Schedule(Segment::buffer(token(0, 1), buffer)),
                PlayerMessage::Play,
            ],
        );
        assert!(out[..40].iter().all(|&s| s == 1.0));
        assert!(out[40..].iter().all(|&s| s == 0.0));

        let completed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PlayerEvent::Completed { token, sample_time } => Some((token.serial, sample_time)),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![(0, 20), (1, 40)]);
    }

    #[test]
    fn paused_player_holds_position() {
        let (mut player, _rx, clock) = setup();
        let reader = ramp_reader(1000);
        render(
            &mut player,
            vec![
                PlayerMessage::Schedule(Segment::file(token(0, 0), reader, 0, 1000)),
                PlayerMessage::Play,
            ],
        );
        let out = render(&mut player, vec![PlayerMessage::Pause]);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(clock.snapshot().is_none());

        let out = render(&mut player, vec![PlayerMessage::Play]);
        assert_eq!(out[0], 64.0);
    }

    #[test]
    fn double_rate_consumes_twice_as_fast() {
        let (mut player, _rx, clock) = setup();
        let reader = ramp_reader(1000);
        let out = render(
            &mut player,
            vec![
                PlayerMessage::SetRate(2.0),
                PlayerMessage::Schedule(Segment::file(token(0, 0), reader, 0, 1000)),
                PlayerMessage::Play,
            ],
        );
        assert_eq!(&out[..4], &[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(clock.snapshot().unwrap().sample_time, 128);
    }

    #[test]
    fn empty_segment_completes_immediately() {
        let (mut player, mut rx, _) = setup();
        let reader = ramp_reader(10);
        render(
            &mut player,
            vec![
                PlayerMessage::Schedule(Segment::file(token(0, 3), reader, 10, 10)),
                PlayerMessage::Play,
            ],
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                PlayerEvent::Started { token: token(0, 3), sample_time: 0 },
                PlayerEvent::Completed { token: token(0, 3), sample_time: 0 },
            ]
        );
    }
}
