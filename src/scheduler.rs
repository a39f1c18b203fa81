//! The playback scheduler.
//!
//! Decides which segments the render path plays: an optional head leading up
//! to the loop, loop passes repeated for as long as looping stays enabled,
//! and the tail out of the loop to the end of the file. The scheduler never
//! touches audio itself. It talks to the render path through [`RenderPath`]
//! and learns what is actually playing from [`PlayerEvent`]s, which makes it
//! a plain state machine that can be driven by hand in tests.
//!
//! Every schedule carries a generation number. Flushing the render path
//! starts a new one; events tagged with an older generation are ignored.

use alloc::sync::Arc;
use alloc::vec::Vec;

use tracing::{debug, trace, warn};

use crate::clock::ClockSnapshot;
use crate::loop_buffer::{LoopBuffer, LoopRegion};
use crate::nodes::{PlayerEvent, Segment, SegmentToken};
use crate::source::AudioSource;

/// Default lead time for queueing the next segment, in seconds
pub const DEFAULT_DECISION_WINDOW: f64 = 0.04;

/// Default period of the boundary tick, in seconds
pub const DEFAULT_TICK_PERIOD: f64 = 0.02;

/// Upper bound on loop passes queued in one go
pub const MAX_PASSES_PER_GROUP: usize = 24;

/// Where playback is relative to the loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Nothing scheduled
    Idle,
    /// Playing from the file towards the loop start; the first pass is queued
    HeadToLoop,
    /// Started inside the loop, playing the rest of it from the file
    LoopRemainder,
    /// Playing a pass of the loop buffer
    LoopFullPass,
    /// Playing from the file to its end
    TailToEnd,
}

/// What a scheduled segment is for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentRole {
    /// File range from the start position up to the loop start
    Head,
    /// File range from a position inside the loop up to the loop end
    Remainder,
    /// One loop buffer pass
    Pass,
    /// File range from the loop end to the end of the file
    Exit,
    /// File range from the start position to the end of the file, no loop
    Tail,
}

/// Bookkeeping for the next loop boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundaryState {
    /// Source frame where the current segment ends
    pub current_boundary_frame: u64,
    /// A segment following the current one is already queued
    pub next_queued: bool,
    /// Render time at which the current loop pass started, once known
    pub pass_start_sample_time: Option<u64>,
    /// Length of the current loop pass
    pub pass_duration_frames: u64,
}

/// The render-side operations the scheduler needs.
pub trait RenderPath {
    /// Drop everything queued; events after this carry `generation`
    fn flush(&mut self, generation: u64);
    /// Append a segment to the queue
    fn enqueue(&mut self, segment: Segment);
}

/// Everything a scheduling decision reads, borrowed fresh for each decision.
pub struct ScheduleContext<'a> {
    pub source: &'a AudioSource,
    pub loop_region: &'a LoopRegion,
    pub tempo_rate: f64,
}

impl<'a> ScheduleContext<'a> {
    /// The loop buffer, if looping is enabled and the region is valid
    pub fn active_loop(&self) -> Option<&'a Arc<LoopBuffer>> {
        if self.loop_region.enabled() {
            self.loop_region.buffer()
        } else {
            None
        }
    }
}

/// Result of starting a schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// The start position is already at the end of the file
    EndOfTrack,
}

/// What a render event meant to the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Stale or unknown; nothing changed
    Ignored,
    Handled,
    /// A segment began: `source_frame` is playing at `sample_time`
    SegmentStarted { source_frame: u64, sample_time: u64 },
    /// The last segment finished; playback should stop
    EndOfTrack,
}

#[derive(Clone, Copy, Debug)]
struct TrackedSegment {
    token: SegmentToken,
    role: SegmentRole,
    source_start: u64,
    frames: u64,
    // Render time of the start event, once seen
    started_at: Option<u64>,
}

/// The scheduling state machine.
#[derive(Debug)]
pub struct Scheduler {
    phase: PlaybackPhase,
    boundary: BoundaryState,
    generation: u64,
    next_serial: u64,
    in_flight: Vec<TrackedSegment>,
    // Loop span of the pass currently playing or last queued
    active_span: Option<(u64, u64)>,
    decision_window: f64,
    tick_period: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DECISION_WINDOW, DEFAULT_TICK_PERIOD)
    }
}

impl Scheduler {
    /// `decision_window` is how long before a boundary the next segment is
    /// queued, `tick_period` how often [`boundary_tick`](Self::boundary_tick)
    /// runs, both in seconds.
    ///
    /// Loops shorter than the two together are queued several passes at a
    /// time, so that the render path never runs dry between ticks.
    pub fn new(decision_window: f64, tick_period: f64) -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            boundary: BoundaryState::default(),
            generation: 0,
            next_serial: 0,
            in_flight: Vec::with_capacity(MAX_PASSES_PER_GROUP * 2),
            active_span: None,
            decision_window,
            tick_period,
        }
    }

    #[inline]
    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    #[inline]
    pub fn boundary(&self) -> BoundaryState {
        self.boundary
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Segments queued or playing in the current generation
    pub fn in_flight(&self) -> impl Iterator<Item = (SegmentToken, SegmentRole)> + '_ {
        self.in_flight.iter().map(|s| (s.token, s.role))
    }

    /// Flush the render path and forget the current schedule.
    pub fn stop(&mut self, path: &mut impl RenderPath) {
        self.begin_generation(path);
        self.phase = PlaybackPhase::Idle;
    }

    /// Forget the current schedule without touching the render path.
    pub fn reset(&mut self) {
        self.phase = PlaybackPhase::Idle;
        self.boundary = BoundaryState::default();
        self.in_flight.clear();
        self.active_span = None;
    }

    fn begin_generation(&mut self, path: &mut impl RenderPath) {
        self.reset();
        self.generation += 1;
        self.next_serial = 0;
        path.flush(self.generation);
    }

    fn set_phase(&mut self, phase: PlaybackPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "playback phase");
            self.phase = phase;
        }
    }

    fn next_token(&mut self) -> SegmentToken {
        let token = SegmentToken {
            generation: self.generation,
            serial: self.next_serial,
        };
        self.next_serial += 1;
        token
    }

    fn enqueue_file(&mut self, ctx: &ScheduleContext<'_>, role: SegmentRole, start: u64, end: u64, path: &mut impl RenderPath) {
        let token = self.next_token();
        trace!(?role, start, end, serial = token.serial, "queue file segment");
        self.in_flight.push(TrackedSegment {
            token,
            role,
            source_start: start,
            frames: end - start,
            started_at: None,
        });
        path.enqueue(Segment::file(token, ctx.source.reader(), start, end));
    }

    fn enqueue_pass(&mut self, buffer: &Arc<LoopBuffer>, path: &mut impl RenderPath) {
        let token = self.next_token();
        trace!(start = buffer.start_frame(), end = buffer.end_frame(), serial = token.serial, "queue loop pass");
        self.in_flight.push(TrackedSegment {
            token,
            role: SegmentRole::Pass,
            source_start: buffer.start_frame(),
            frames: buffer.frames(),
            started_at: None,
        });
        self.active_span = Some((buffer.start_frame(), buffer.end_frame()));
        path.enqueue(Segment::buffer(token, Arc::clone(buffer)));
    }

    /// Playing time of `frames` source frames at the current tempo
    fn seconds(frames: u64, ctx: &ScheduleContext<'_>) -> f64 {
        let frames_per_second = ctx.source.sample_rate() as f64 * ctx.tempo_rate.max(f64::EPSILON);
        frames as f64 / frames_per_second
    }

    // Queued audio must outlast this, or the render path can run dry before
    // the next tick gets to top it up.
    fn lead_time(&self) -> f64 {
        self.decision_window + self.tick_period
    }

    /// Passes that together outlast the decision window plus one tick.
    fn passes_per_group(&self, buffer: &LoopBuffer, ctx: &ScheduleContext<'_>) -> usize {
        let pass_seconds = Self::seconds(buffer.frames(), ctx);
        if pass_seconds <= 0.0 {
            return 1;
        }
        ((self.lead_time() / pass_seconds).ceil() as usize).clamp(1, MAX_PASSES_PER_GROUP)
    }

    fn enqueue_pass_group(&mut self, buffer: &Arc<LoopBuffer>, ctx: &ScheduleContext<'_>, path: &mut impl RenderPath) {
        let passes = self.passes_per_group(buffer, ctx);
        if passes > 1 {
            trace!(passes, "short loop, queueing passes as a group");
        }
        for _ in 0..passes {
            self.enqueue_pass(buffer, path);
        }
    }

    /// Frames still to play across everything in flight: what is left of the
    /// current segment plus all segments queued behind it.
    ///
    /// The current segment is measured from its start event when that has
    /// been seen, otherwise from the clock position.
    fn queued_frames(&self, timing: Option<ClockSnapshot>, cur_frame: u64) -> u64 {
        let mut segments = self.in_flight.iter();
        let Some(current) = segments.next() else { return 0 };
        let current_left = match (current.started_at, timing) {
            (Some(start), Some(snap)) => current.frames.saturating_sub(snap.sample_time.saturating_sub(start)),
            _ => (current.source_start + current.frames).saturating_sub(cur_frame).min(current.frames),
        };
        current_left + segments.map(|s| s.frames).sum::<u64>()
    }

    /// Queue whatever follows the current loop segment: more passes while
    /// looping is active, otherwise the rest of the file after the loop.
    ///
    /// Returns false when there is nothing left to play.
    fn enqueue_after_loop(&mut self, ctx: &ScheduleContext<'_>, path: &mut impl RenderPath) -> bool {
        if let Some(buffer) = ctx.active_loop() {
            self.enqueue_pass_group(buffer, ctx, path);
            return true;
        }
        let total = ctx.source.total_frames();
        let exit_start = self.active_span.map(|(_, end)| end).unwrap_or(self.boundary.current_boundary_frame).min(total);
        if exit_start >= total {
            return false;
        }
        self.enqueue_file(ctx, SegmentRole::Exit, exit_start, total, path);
        true
    }

    /// Start a fresh schedule at `cur_frame`.
    ///
    /// Flushes the render path first, so nothing from the previous schedule
    /// is played after this.
    pub fn schedule_from(
        &mut self,
        cur_frame: u64,
        ctx: &ScheduleContext<'_>,
        path: &mut impl RenderPath,
    ) -> ScheduleOutcome {
        self.begin_generation(path);

        let total = ctx.source.total_frames();
        let cur = cur_frame.min(total);

        match ctx.active_loop() {
            Some(buffer) if cur < buffer.start_frame() => {
                self.set_phase(PlaybackPhase::HeadToLoop);
                self.boundary.current_boundary_frame = buffer.start_frame();
                self.enqueue_file(ctx, SegmentRole::Head, cur, buffer.start_frame(), path);
                self.enqueue_pass_group(buffer, ctx, path);
                self.boundary.next_queued = true;
            }
            Some(buffer) if cur < buffer.end_frame() => {
                self.set_phase(PlaybackPhase::LoopRemainder);
                self.boundary.current_boundary_frame = buffer.end_frame();
                self.active_span = Some((buffer.start_frame(), buffer.end_frame()));
                self.enqueue_file(ctx, SegmentRole::Remainder, cur, buffer.end_frame(), path);
                if Self::seconds(buffer.end_frame() - cur, ctx) < self.lead_time() {
                    self.enqueue_pass_group(buffer, ctx, path);
                    self.boundary.next_queued = true;
                }
            }
            _ => {
                if cur >= total {
                    debug!(cur, total, "nothing left to play");
                    self.set_phase(PlaybackPhase::Idle);
                    return ScheduleOutcome::EndOfTrack;
                }
                self.set_phase(PlaybackPhase::TailToEnd);
                self.boundary.current_boundary_frame = total;
                self.enqueue_file(ctx, SegmentRole::Tail, cur, total, path);
            }
        }
        ScheduleOutcome::Scheduled
    }

    /// Feed a render event to the state machine.
    pub fn on_event(
        &mut self,
        event: PlayerEvent,
        ctx: &ScheduleContext<'_>,
        path: &mut impl RenderPath,
    ) -> EventOutcome {
        let token = event.token();
        if token.generation != self.generation {
            trace!(?event, current = self.generation, "stale render event");
            return EventOutcome::Ignored;
        }
        let Some(index) = self.in_flight.iter().position(|s| s.token == token) else {
            trace!(?event, "event for unknown segment");
            return EventOutcome::Ignored;
        };
        let segment = self.in_flight[index];

        match event {
            PlayerEvent::Started { sample_time, .. } => {
                self.in_flight[index].started_at = Some(sample_time);
                match segment.role {
                    SegmentRole::Pass => {
                        self.set_phase(PlaybackPhase::LoopFullPass);
                        self.boundary.pass_start_sample_time = Some(sample_time);
                        self.boundary.pass_duration_frames = segment.frames;
                        self.boundary.current_boundary_frame = segment.source_start + segment.frames;
                        self.active_span = Some((segment.source_start, segment.source_start + segment.frames));
                    }
                    SegmentRole::Exit => {
                        self.set_phase(PlaybackPhase::TailToEnd);
                        self.boundary.current_boundary_frame = segment.source_start + segment.frames;
                        self.boundary.pass_start_sample_time = None;
                    }
                    SegmentRole::Head | SegmentRole::Remainder | SegmentRole::Tail => {}
                }
                EventOutcome::SegmentStarted {
                    source_frame: segment.source_start,
                    sample_time,
                }
            }
            PlayerEvent::Completed { .. } => {
                self.in_flight.remove(index);
                match segment.role {
                    SegmentRole::Head => {
                        self.set_phase(PlaybackPhase::LoopFullPass);
                        self.boundary.next_queued = self.in_flight.len() > 1;
                        if self.in_flight.is_empty() {
                            self.catch_up(ctx, path)
                        } else {
                            EventOutcome::Handled
                        }
                    }
                    SegmentRole::Remainder | SegmentRole::Pass => {
                        self.boundary.next_queued = self.in_flight.len() > 1;
                        if self.in_flight.is_empty() {
                            self.catch_up(ctx, path)
                        } else {
                            EventOutcome::Handled
                        }
                    }
                    SegmentRole::Exit | SegmentRole::Tail => {
                        debug!("end of track");
                        self.reset();
                        EventOutcome::EndOfTrack
                    }
                }
            }
        }
    }

    // A loop segment ended with nothing queued behind it: the boundary tick
    // was late. Queue the follow-up now and accept the gap.
    fn catch_up(&mut self, ctx: &ScheduleContext<'_>, path: &mut impl RenderPath) -> EventOutcome {
        if self.enqueue_after_loop(ctx, path) {
            warn!(phase = ?self.phase, "loop boundary missed, catching up");
            self.boundary.next_queued = true;
            EventOutcome::Handled
        } else {
            debug!("loop ended at the end of the file");
            self.reset();
            EventOutcome::EndOfTrack
        }
    }

    /// Periodic boundary check: queue what follows once the loop audio still
    /// in flight is within the decision window of running out.
    ///
    /// `timing` is the render clock of the current generation, `cur_frame`
    /// the playback position derived from it. Returns whether the boundary
    /// was acted on.
    pub fn boundary_tick(
        &mut self,
        timing: Option<ClockSnapshot>,
        cur_frame: u64,
        ctx: &ScheduleContext<'_>,
        path: &mut impl RenderPath,
    ) -> bool {
        if self.phase == PlaybackPhase::HeadToLoop {
            // The pass is already queued; only notice the crossing here in
            // case its start event has not been drained yet.
            if cur_frame >= self.boundary.current_boundary_frame {
                self.set_phase(PlaybackPhase::LoopFullPass);
            }
            return false;
        }
        if !matches!(self.phase, PlaybackPhase::LoopRemainder | PlaybackPhase::LoopFullPass) {
            return false;
        }

        let remaining = Self::seconds(self.queued_frames(timing, cur_frame), ctx);
        if remaining > self.decision_window {
            return false;
        }

        trace!(remaining, "boundary within decision window");
        // Nothing left after the loop means the track ends with this segment
        self.enqueue_after_loop(ctx, path);
        self.boundary.next_queued = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_buffer::LoopBufferCache;
    use crate::nodes::SegmentFrames;
    use crate::source::MemorySource;

    const RATE: u32 = 1000;

    /// Render path double that records what it was told.
    #[derive(Default)]
    struct FakePath {
        flushes: Vec<u64>,
        queued: Vec<Segment>,
    }

    impl RenderPath for FakePath {
        fn flush(&mut self, generation: u64) {
            self.flushes.push(generation);
            self.queued.clear();
        }

        fn enqueue(&mut self, segment: Segment) {
            self.queued.push(segment);
        }
    }

    fn span(segment: &Segment) -> (u64, u64) {
        match &segment.frames {
            SegmentFrames::File { start, end, .. } => (*start, *end),
            SegmentFrames::Buffer(b) => (b.start_frame(), b.end_frame()),
        }
    }

    fn is_pass(segment: &Segment) -> bool {
        matches!(segment.frames, SegmentFrames::Buffer(_))
    }

    struct Fixture {
        source: AudioSource,
        region: LoopRegion,
    }

    impl Fixture {
        /// 10 s source at 1 kHz with a loop over [2 s, 4 s)
        fn new() -> Self {
            let source = AudioSource::new(MemorySource::new(vec![0.5; 10 * RATE as usize], 1, RATE).unwrap()).unwrap();
            let mut region = LoopRegion::default();
            region.set_enabled(true);
            region.set_bounds(2.0, 4.0);
            region.set_buffer(LoopBufferCache::default().rebuild(&source, 2.0, 4.0));
            Self { source, region }
        }

        fn ctx(&self) -> ScheduleContext<'_> {
            ScheduleContext {
                source: &self.source,
                loop_region: &self.region,
                tempo_rate: 1.0,
            }
        }
    }

    fn started(token: SegmentToken, sample_time: u64) -> PlayerEvent {
        PlayerEvent::Started { token, sample_time }
    }

    fn completed(token: SegmentToken, sample_time: u64) -> PlayerEvent {
        PlayerEvent::Completed { token, sample_time }
    }

    fn snap(generation: u64, sample_time: u64) -> Option<ClockSnapshot> {
        Some(ClockSnapshot { generation, sample_time })
    }

    #[test]
    fn head_and_first_pass_are_queued_together() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();

        assert_eq!(s.schedule_from(500, &fx.ctx(), &mut path), ScheduleOutcome::Scheduled);
        assert_eq!(s.phase(), PlaybackPhase::HeadToLoop);
        assert_eq!(path.flushes, vec![1]);
        assert_eq!(path.queued.len(), 2);
        assert_eq!(span(&path.queued[0]), (500, 2000));
        assert!(is_pass(&path.queued[1]));
        assert!(s.boundary().next_queued);
    }

    #[test]
    fn start_inside_loop_plays_remainder_from_file() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();

        s.schedule_from(3000, &fx.ctx(), &mut path);
        assert_eq!(s.phase(), PlaybackPhase::LoopRemainder);
        assert_eq!(path.queued.len(), 1);
        assert_eq!(span(&path.queued[0]), (3000, 4000));

        // Far from the boundary: nothing happens
        assert!(!s.boundary_tick(snap(1, 100), 3100, &fx.ctx(), &mut path));
        // Within 40 ms of the loop end: the first pass is queued, once
        assert!(s.boundary_tick(snap(1, 965), 3965, &fx.ctx(), &mut path));
        assert!(!s.boundary_tick(snap(1, 980), 3980, &fx.ctx(), &mut path));
        assert_eq!(path.queued.len(), 2);
        assert!(is_pass(&path.queued[1]));
    }

    #[test]
    fn start_after_loop_plays_tail() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();

        s.schedule_from(7000, &fx.ctx(), &mut path);
        assert_eq!(s.phase(), PlaybackPhase::TailToEnd);
        assert_eq!(span(&path.queued[0]), (7000, 10000));

        let token = path.queued[0].token;
        assert_eq!(s.on_event(completed(token, 3000), &fx.ctx(), &mut path), EventOutcome::EndOfTrack);
        assert_eq!(s.phase(), PlaybackPhase::Idle);
    }

    #[test]
    fn start_at_end_of_file_ends_immediately() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        assert_eq!(s.schedule_from(10_000, &fx.ctx(), &mut path), ScheduleOutcome::EndOfTrack);
        assert!(path.queued.is_empty());
    }

    #[test]
    fn passes_are_queued_once_per_boundary() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(1000, &fx.ctx(), &mut path);
        let head = path.queued[0].token;
        let pass0 = path.queued[1].token;

        assert_eq!(
            s.on_event(started(head, 0), &fx.ctx(), &mut path),
            EventOutcome::SegmentStarted { source_frame: 1000, sample_time: 0 }
        );
        s.on_event(completed(head, 1000), &fx.ctx(), &mut path);
        assert_eq!(
            s.on_event(started(pass0, 1000), &fx.ctx(), &mut path),
            EventOutcome::SegmentStarted { source_frame: 2000, sample_time: 1000 }
        );
        assert_eq!(s.phase(), PlaybackPhase::LoopFullPass);
        assert!(!s.boundary().next_queued);

        // Tick every 20 ms through the pass; exactly one pass gets queued
        let mut queued = 0;
        for t in (1000..3000).step_by(20) {
            if s.boundary_tick(snap(1, t), 2000 + (t - 1000), &fx.ctx(), &mut path) {
                queued += 1;
            }
        }
        assert_eq!(queued, 1);
        assert_eq!(path.queued.len(), 3);

        // Pass timing is taken from the start event, not the clock frame
        let b = s.boundary();
        assert_eq!(b.pass_start_sample_time, Some(1000));
        assert_eq!(b.pass_duration_frames, 2000);
    }

    #[test]
    fn short_loops_are_queued_in_groups() {
        let source = AudioSource::new(MemorySource::new(vec![0.5; 10 * RATE as usize], 1, RATE).unwrap()).unwrap();
        let mut region = LoopRegion::default();
        region.set_enabled(true);
        region.set_bounds(2.0, 2.025);
        region.set_buffer(LoopBufferCache::default().rebuild(&source, 2.0, 2.025));
        let ctx = ScheduleContext { source: &source, loop_region: &region, tempo_rate: 1.0 };

        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(1990, &ctx, &mut path);

        // 25 ms passes: three of them outlast window and tick together
        assert_eq!(path.queued.len(), 4);
        assert_eq!(span(&path.queued[0]), (1990, 2000));
        assert!(path.queued[1..].iter().all(|seg| is_pass(seg) && span(seg) == (2000, 2025)));
        let tokens: Vec<_> = path.queued.iter().map(|seg| seg.token).collect();

        s.on_event(started(tokens[0], 0), &ctx, &mut path);
        s.on_event(completed(tokens[0], 10), &ctx, &mut path);
        s.on_event(started(tokens[1], 10), &ctx, &mut path);
        assert!(s.boundary().next_queued);
        // 15 ms of this pass plus two queued passes: plenty left
        assert!(!s.boundary_tick(snap(1, 20), 2010, &ctx, &mut path));

        s.on_event(completed(tokens[1], 35), &ctx, &mut path);
        s.on_event(started(tokens[2], 35), &ctx, &mut path);
        assert!(!s.boundary_tick(snap(1, 36), 2001, &ctx, &mut path));
        // 10 ms left of this pass and one more queued: top up with a new group
        assert!(s.boundary_tick(snap(1, 50), 2015, &ctx, &mut path));
        assert_eq!(path.queued.len(), 7);
        assert!(!s.boundary_tick(snap(1, 55), 2020, &ctx, &mut path));
        assert_eq!(s.in_flight().count(), 5);
    }

    #[test]
    fn faster_tempo_queues_more_passes_per_group() {
        let source = AudioSource::new(MemorySource::new(vec![0.5; 10 * RATE as usize], 1, RATE).unwrap()).unwrap();
        let mut region = LoopRegion::default();
        region.set_enabled(true);
        region.set_bounds(2.0, 2.025);
        region.set_buffer(LoopBufferCache::default().rebuild(&source, 2.0, 2.025));
        let ctx = ScheduleContext { source: &source, loop_region: &region, tempo_rate: 2.0 };

        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(2010, &ctx, &mut path);

        // A 7.5 ms remainder gets its passes straight away, 12.5 ms each at
        // double speed: five to cover 60 ms
        assert_eq!(span(&path.queued[0]), (2010, 2025));
        assert_eq!(path.queued.iter().filter(|seg| is_pass(seg)).count(), 5);
        assert!(s.boundary().next_queued);
    }

    #[test]
    fn disabling_loop_mid_pass_queues_exit() {
        let mut fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(2500, &fx.ctx(), &mut path);
        let remainder = path.queued[0].token;
        s.on_event(started(remainder, 0), &fx.ctx(), &mut path);
        s.boundary_tick(snap(1, 1470), 3970, &fx.ctx(), &mut path);
        let pass = path.queued[1].token;
        s.on_event(completed(remainder, 1500), &fx.ctx(), &mut path);
        s.on_event(started(pass, 1500), &fx.ctx(), &mut path);

        fx.region.set_enabled(false);
        assert!(s.boundary_tick(snap(1, 3470), 3970, &fx.ctx(), &mut path));
        let exit = &path.queued[2];
        assert!(!is_pass(exit));
        assert_eq!(span(exit), (4000, 10000));
        let exit = exit.token;

        s.on_event(completed(pass, 3500), &fx.ctx(), &mut path);
        s.on_event(started(exit, 3500), &fx.ctx(), &mut path);
        assert_eq!(s.phase(), PlaybackPhase::TailToEnd);
        assert_eq!(s.on_event(completed(exit, 9500), &fx.ctx(), &mut path), EventOutcome::EndOfTrack);
    }

    #[test]
    fn stale_events_are_ignored() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(7000, &fx.ctx(), &mut path);
        let old = path.queued[0].token;

        // Seek: the old tail is flushed and reported complete afterwards
        s.schedule_from(8000, &fx.ctx(), &mut path);
        assert_eq!(path.flushes, vec![1, 2]);
        assert_eq!(s.on_event(completed(old, 10), &fx.ctx(), &mut path), EventOutcome::Ignored);
        assert_eq!(s.phase(), PlaybackPhase::TailToEnd);
        assert_eq!(s.in_flight().count(), 1);
    }

    #[test]
    fn missed_boundary_catches_up() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(3000, &fx.ctx(), &mut path);
        let remainder = path.queued[0].token;

        // The remainder ended before any tick queued a pass
        assert_eq!(s.on_event(completed(remainder, 1000), &fx.ctx(), &mut path), EventOutcome::Handled);
        assert_eq!(path.queued.len(), 2);
        assert!(is_pass(&path.queued[1]));
        assert!(s.boundary().next_queued);
    }

    #[test]
    fn loop_ending_at_end_of_file_finishes_track() {
        let source = AudioSource::new(MemorySource::new(vec![0.5; 4000], 1, RATE).unwrap()).unwrap();
        let mut region = LoopRegion::default();
        region.set_enabled(true);
        region.set_bounds(2.0, 4.0);
        region.set_buffer(LoopBufferCache::default().rebuild(&source, 2.0, 4.0));
        let ctx = ScheduleContext { source: &source, loop_region: &region, tempo_rate: 1.0 };

        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(3000, &ctx, &mut path);
        let remainder = path.queued[0].token;
        region.set_enabled(false);
        let ctx = ScheduleContext { source: &source, loop_region: &region, tempo_rate: 1.0 };

        // No exit segment to queue, but the boundary is still marked handled
        assert!(s.boundary_tick(snap(1, 970), 3970, &ctx, &mut path));
        assert_eq!(path.queued.len(), 1);
        assert_eq!(s.on_event(completed(remainder, 1000), &ctx, &mut path), EventOutcome::EndOfTrack);
    }

    #[test]
    fn slower_tempo_widens_the_window_in_frames() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(3000, &fx.ctx(), &mut path);
        let ctx = ScheduleContext { tempo_rate: 0.5, ..fx.ctx() };

        // 30 frames left at half speed is 60 ms: not yet
        assert!(!s.boundary_tick(snap(1, 970), 3970, &ctx, &mut path));
        // 15 frames left is 30 ms
        assert!(s.boundary_tick(snap(1, 985), 3985, &ctx, &mut path));
    }

    #[test]
    fn head_crossing_without_start_event() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(0, &fx.ctx(), &mut path);
        assert!(!s.boundary_tick(snap(1, 1999), 1999, &fx.ctx(), &mut path));
        assert_eq!(s.phase(), PlaybackPhase::HeadToLoop);
        s.boundary_tick(snap(1, 2000), 2000, &fx.ctx(), &mut path);
        assert_eq!(s.phase(), PlaybackPhase::LoopFullPass);
    }

    #[test]
    fn stop_flushes_and_idles() {
        let fx = Fixture::new();
        let mut path = FakePath::default();
        let mut s = Scheduler::default();
        s.schedule_from(0, &fx.ctx(), &mut path);
        let head = path.queued[0].token;
        s.stop(&mut path);
        assert_eq!(s.phase(), PlaybackPhase::Idle);
        assert_eq!(path.flushes, vec![1, 2]);
        assert_eq!(s.on_event(started(head, 0), &fx.ctx(), &mut path), EventOutcome::Ignored);
    }
}
