//! The control facade.
//!
//! [`Player`] is what an application talks to. It owns the signal chain,
//! the scheduler and the loop region, and is driven by calling
//! [`Player::update`] regularly from the control thread (a UI frame
//! callback, a timer, or a plain loop):
//!
//! ```
//! use std::time::Instant;
//! use schleife::{AudioSource, ManualDriver, MemorySource, Player, RtrbSink};
//!
//! let (tx, _rx) = rtrb::RingBuffer::new(1 << 16);
//! let mut player = Player::new(ManualDriver::new(), 8000, RtrbSink::stereo(tx));
//!
//! let source = AudioSource::new(MemorySource::new(vec![0.0; 8000 * 4], 1, 8000).unwrap()).unwrap();
//! player.load(source, None).unwrap();
//! player.set_loop_seconds(true, 1.0, 2.0);
//! player.play().unwrap();
//!
//! player.driver_mut().render_frames(160);
//! player.update(Instant::now());
//! assert!(player.status().is_playing);
//! ```

use std::time::Instant;

use tracing::{debug, info};

use crate::audio_graph::{AudioGraph, GraphConfig};
use crate::clock::PlaybackClock;
use crate::config::{PlayerConfig, Tempo, TrackDefaults};
use crate::driver::RenderDriver;
use crate::error::{PlayerError, SourceError};
use crate::loop_buffer::{LoopBufferCache, LoopRegion};
use crate::meter::LevelMeter;
use crate::node::AudioNode;
use crate::nodes::source::MAX_CHANNELS;
use crate::nodes::EqBand;
use crate::scheduler::{EventOutcome, PlaybackPhase, ScheduleContext, ScheduleOutcome, Scheduler};
use crate::source::AudioSource;
use crate::ticker::PeriodicTask;

/// Snapshot for the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerStatus {
    pub is_playing: bool,
    /// Playback position in seconds
    pub current_time: f64,
    /// Length of the loaded source in seconds, 0 without one
    pub duration: f64,
    /// Meter level in `[0, 1]`
    pub audio_level: f32,
}

/// A looping audio player.
pub struct Player<D: RenderDriver> {
    graph: AudioGraph<D>,
    scheduler: Scheduler,
    clock: PlaybackClock,

    source: Option<AudioSource>,
    loop_region: LoopRegion,
    loop_cache: LoopBufferCache,
    meter: LevelMeter,

    boundary_task: PeriodicTask,
    display_task: PeriodicTask,
    level_task: PeriodicTask,

    config: PlayerConfig,
    tempo: Tempo,
    is_playing: bool,
    // Paused with the schedule intact; play resumes without rescheduling
    paused: bool,
    current_time: f64,
    now: Instant,
}

impl<D: RenderDriver> Player<D> {
    /// Create a player rendering at `sample_rate` into `sink`.
    pub fn new<S: AudioNode<Message = ()>>(driver: D, sample_rate: u32, sink: S) -> Self {
        Self::with_config(driver, sample_rate, sink, PlayerConfig::default())
    }

    pub fn with_config<S: AudioNode<Message = ()>>(driver: D, sample_rate: u32, sink: S, config: PlayerConfig) -> Self {
        let graph = AudioGraph::new(driver, sample_rate, sink, &config.engine, &config.meter);
        Self {
            graph,
            scheduler: Scheduler::new(
                config.scheduling.decision_window_secs,
                config.scheduling.boundary_tick().as_secs_f64(),
            ),
            clock: PlaybackClock::new(),
            source: None,
            loop_region: LoopRegion::default(),
            loop_cache: LoopBufferCache::new(config.looping.ramp_frames, config.looping.min_loop_secs),
            meter: LevelMeter::new(config.meter.decay, config.meter.silence_threshold, config.meter.min_db),
            boundary_task: PeriodicTask::new(config.scheduling.boundary_tick()),
            display_task: PeriodicTask::new(config.scheduling.display_tick()),
            level_task: PeriodicTask::new(config.meter.level_tick()),
            tempo: Tempo::default(),
            is_playing: false,
            paused: false,
            current_time: 0.0,
            now: Instant::now(),
            config,
        }
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            is_playing: self.is_playing,
            current_time: self.current_time,
            duration: self.duration(),
            audio_level: self.meter.level(),
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn duration(&self) -> f64 {
        self.source.as_ref().map(AudioSource::duration_secs).unwrap_or(0.0)
    }

    #[inline]
    pub fn phase(&self) -> PlaybackPhase {
        self.scheduler.phase()
    }

    #[inline]
    pub fn loop_region(&self) -> &LoopRegion {
        &self.loop_region
    }

    #[inline]
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn graph_config(&self) -> &GraphConfig {
        self.graph.config()
    }

    pub fn audio_graph(&self) -> &AudioGraph<D> {
        &self.graph
    }

    pub fn driver_mut(&mut self) -> &mut D {
        self.graph.driver_mut()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Live playback position in seconds, read straight from the render clock.
    ///
    /// [`status`](Self::status) reports the position as of the last display
    /// tick instead.
    pub fn position(&self) -> f64 {
        let Some(source) = &self.source else { return 0.0 };
        if !self.is_playing {
            return self.current_time;
        }
        if self.clock.just_seeked() {
            return self.clock.seek_offset_seconds();
        }
        let frame = self.clock.current_source_frame(self.graph.render_timing(), source.total_frames());
        source.format().seconds_at(frame)
    }

    /// Replace the loaded source.
    ///
    /// The source is checked before anything changes; on error the player
    /// keeps its previous state. `defaults` sets pitch, tempo and loop for the
    /// new track. Without them the current settings carry over and the loop
    /// bounds are re-clamped to the new length.
    pub fn load(&mut self, source: AudioSource, defaults: Option<TrackDefaults>) -> Result<(), PlayerError> {
        let format = source.format();
        if format.total_frames == 0 {
            return Err(SourceError::InvalidFormat("source has no frames".into()).into());
        }
        if format.channels > MAX_CHANNELS {
            return Err(SourceError::InvalidFormat(format!(
                "{} channels, at most {} supported",
                format.channels, MAX_CHANNELS
            ))
            .into());
        }

        self.stop();
        self.graph.set_source_format(Some(format));
        self.source = Some(source);
        self.clock.reset();
        self.current_time = 0.0;
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            duration = format.duration_secs(),
            "source loaded"
        );

        match defaults {
            Some(defaults) => {
                self.set_pitch_semitones(defaults.pitch_semitones);
                self.set_tempo(defaults.tempo);
                self.set_loop(defaults.loop_enabled, defaults.intro_position, defaults.outro_position);
            }
            None => {
                let (start, end) = (self.loop_region.start_seconds(), self.loop_region.end_seconds());
                self.set_loop_seconds(self.loop_region.enabled(), start, end);
            }
        }
        Ok(())
    }

    /// Decode an Ogg Vorbis file and load it.
    #[cfg(all(feature = "vorbis_src", feature = "std"))]
    pub fn load_vorbis<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
        defaults: Option<TrackDefaults>,
    ) -> Result<(), PlayerError> {
        let source = crate::source::load_vorbis(path)?;
        self.load(source, defaults)
    }

    /// Unload the current source.
    pub fn unload(&mut self) {
        self.stop();
        self.source = None;
        self.loop_region.set_buffer(None);
        self.graph.set_source_format(None);
    }

    /// Start or resume playback.
    ///
    /// After [`pause`](Self::pause) the existing schedule simply continues.
    /// Otherwise playback is scheduled from the current position. If the
    /// render path cannot be started the failure is logged and the player
    /// stays stopped.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.source.is_none() {
            return Err(PlayerError::NoSource);
        }
        if self.is_playing {
            return Ok(());
        }
        if self.graph.start().is_err() {
            self.is_playing = false;
            return Ok(());
        }

        if self.paused {
            debug!("resuming");
            self.paused = false;
            self.graph.play();
            self.mark_playing();
            return Ok(());
        }

        self.start_from(self.current_time);
        Ok(())
    }

    /// Pause playback, keeping the schedule.
    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        self.current_time = self.position();
        self.graph.pause();
        self.is_playing = false;
        self.paused = true;
        self.boundary_task.stop();
        self.display_task.stop();
        self.meter.set_decaying();
        debug!(position = self.current_time, "paused");
    }

    /// Stop playback and rewind to the start.
    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.graph);
        self.graph.pause();
        self.is_playing = false;
        self.paused = false;
        self.current_time = 0.0;
        self.clock.reset();
        self.boundary_task.stop();
        self.display_task.stop();
        self.meter.set_decaying();
    }

    /// Move to `seconds`, clamped to the track.
    ///
    /// While playing, the render path is flushed and rescheduled at once;
    /// it applies the flush before the new segments, so nothing stale plays.
    pub fn seek(&mut self, seconds: f64) -> Result<(), PlayerError> {
        let Some(source) = &self.source else {
            return Err(PlayerError::NoSource);
        };
        let target = if seconds.is_nan() { 0.0 } else { seconds.clamp(0.0, source.duration_secs()) };
        debug!(target, "seek");

        if self.is_playing {
            self.start_from(target);
        } else {
            if self.paused {
                // The paused schedule is no longer wanted
                self.scheduler.stop(&mut self.graph);
                self.paused = false;
            }
            self.current_time = target;
        }
        Ok(())
    }

    /// Set the loop from fractions of the track length.
    ///
    /// Bounds are clamped to `[0, 1]` and put in order. Without a source the
    /// loop collapses to nothing.
    pub fn set_loop(&mut self, enabled: bool, start: f64, end: f64) {
        let duration = self.duration();
        if duration <= 0.0 {
            self.loop_region.set_enabled(enabled);
            self.loop_region.set_bounds(0.0, 0.0);
            self.loop_region.set_buffer(None);
            return;
        }
        let s = clamp_unit(start) * duration;
        let e = clamp_unit(end) * duration;
        self.set_loop_seconds(enabled, s.min(e), s.max(e));
    }

    /// Set the loop in seconds. Bounds are clamped to the track and ordered.
    pub fn set_loop_seconds(&mut self, enabled: bool, start: f64, end: f64) {
        let duration = self.duration();
        let clamp = |t: f64| if t.is_nan() { 0.0 } else { t.clamp(0.0, duration) };
        let (s, e) = (clamp(start), clamp(end));
        let (lo, hi) = (s.min(e), s.max(e));

        self.loop_region.set_enabled(enabled);
        self.loop_region.set_bounds(lo, hi);
        let buffer = self.source.as_ref().and_then(|source| self.loop_cache.rebuild(source, lo, hi));
        self.loop_region.set_buffer(buffer);
        debug!(enabled, start = lo, end = hi, active = self.loop_region.is_active(), "loop set");
    }

    /// Switch mono output on or off.
    ///
    /// This rewires the chain, which stops the render path for the duration.
    /// Playback resumes from where it was.
    pub fn set_force_mono(&mut self, force_mono: bool) {
        if self.graph.config().force_mono == force_mono {
            return;
        }
        let was_playing = self.is_playing;
        let position = self.position();
        if was_playing {
            self.graph.pause();
        }

        if self.graph.rebuild(force_mono).is_err() {
            self.is_playing = false;
            self.paused = false;
            self.current_time = position;
            self.boundary_task.stop();
            self.display_task.stop();
            self.meter.set_decaying();
            return;
        }
        if was_playing {
            self.start_from(position);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.graph.set_volume(volume);
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.graph.set_pitch_semitones(semitones);
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        self.graph.set_tempo_rate(tempo.rate(self.config.base_bpm));
    }

    /// Set the playback rate directly, 1.0 = original speed.
    pub fn set_tempo_rate(&mut self, rate: f64) {
        self.tempo = Tempo::Percent(rate * 100.0);
        self.graph.set_tempo_rate(rate);
    }

    pub fn set_eq_gain(&mut self, band: EqBand, db: f32) {
        self.graph.set_eq_gain(band, db);
    }

    /// Run the control side: handle render events, then any periodic task
    /// that is due at `now`.
    pub fn update(&mut self, now: Instant) {
        self.now = now;
        self.drain_events();
        self.drain_levels();

        if self.boundary_task.poll(now) {
            self.boundary_tick();
        }
        if self.display_task.poll(now) {
            self.display_tick();
        }
        if self.level_task.poll(now) {
            self.meter.tick();
            if !self.meter.needs_tick() {
                self.level_task.stop();
            }
        }
    }

    fn mark_playing(&mut self) {
        self.is_playing = true;
        self.boundary_task.start(self.now);
        self.display_task.start(self.now);
        self.level_task.start(self.now);
        self.meter.set_live();
    }

    fn start_from(&mut self, seconds: f64) {
        let Some(source) = &self.source else { return };
        let frame = source.format().frame_at(seconds);
        let ctx = ScheduleContext {
            source,
            loop_region: &self.loop_region,
            tempo_rate: self.graph.config().tempo_rate,
        };

        if self.scheduler.schedule_from(frame, &ctx, &mut self.graph) == ScheduleOutcome::EndOfTrack {
            self.finish();
            return;
        }
        self.clock.seek(seconds, frame, self.scheduler.generation());
        self.current_time = seconds;
        self.graph.play();
        self.mark_playing();
    }

    fn finish(&mut self) {
        info!("playback finished");
        self.stop();
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.graph.pop_event() {
            let Some(source) = &self.source else { continue };
            let ctx = ScheduleContext {
                source,
                loop_region: &self.loop_region,
                tempo_rate: self.graph.config().tempo_rate,
            };
            match self.scheduler.on_event(event, &ctx, &mut self.graph) {
                EventOutcome::SegmentStarted { source_frame, sample_time } => {
                    self.clock.rebase(source_frame, sample_time);
                }
                EventOutcome::EndOfTrack => self.finish(),
                EventOutcome::Handled | EventOutcome::Ignored => {}
            }
        }
    }

    fn drain_levels(&mut self) {
        while let Some(rms) = self.graph.pop_level() {
            self.meter.push_rms(rms);
        }
    }

    fn boundary_tick(&mut self) {
        let Some(source) = &self.source else { return };
        let render = self.graph.render_timing();
        let timing = self.clock.timing(render);
        let frame = self.clock.current_source_frame(render, source.total_frames());
        let ctx = ScheduleContext {
            source,
            loop_region: &self.loop_region,
            tempo_rate: self.graph.config().tempo_rate,
        };
        self.scheduler.boundary_tick(timing, frame, &ctx, &mut self.graph);
    }

    fn display_tick(&mut self) {
        self.current_time = self.position();
        // A loop ending at the end of the file reaches the duration every pass
        let playing_out = self.scheduler.phase() == PlaybackPhase::TailToEnd || !self.loop_region.is_active();
        if playing_out && self.current_time >= self.duration() {
            self.finish();
        }
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
