use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};

use crate::{
    dispatcher::{AudioDispatcher, DispatcherHandle},
    error::Error,
    event::AudioEvent,
    format::AudioFormat,
    io::{AudioSink, Media},
    processor::{
        gain::{GainControl, GainProcessor},
        writer::AudioWriter,
        AudioProcessor,
    },
    utils::atomic::AtomicF64,
    wsola::{Wsola, WsolaControl, WsolaParameters},
};

// -------------------------------------------------------------------------------------------------

/// Playback state of a [`Player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No media is loaded.
    NoFileLoaded,
    /// Media is loaded and ready to be played.
    FileLoaded,
    /// The media is playing.
    Playing,
    /// Playback is paused.
    Paused,
    /// Playback was stopped.
    Stopped,
}

// -------------------------------------------------------------------------------------------------

/// Observer invoked on state transitions with the old and the new state, on the thread that
/// caused the transition.
pub type StateListener = dyn Fn(PlayerState, PlayerState) + Send;

/// Creates the audio sink for a playback run from the media's format. Invoked once per `play`.
pub type SinkFactory = dyn Fn(&AudioFormat) -> Result<Box<dyn AudioSink>, Error> + Send;

/// Creates an extra processor for a playback run, e.g. a probe or a visualizer feed.
pub type ProcessorFactory = dyn Fn() -> Box<dyn AudioProcessor> + Send;

// -------------------------------------------------------------------------------------------------

/// State shared between the player and its probe processor on the worker thread.
struct PlayerShared {
    state: Mutex<PlayerState>,
    listeners: Mutex<Vec<Box<StateListener>>>,
    current_time: AtomicF64,
    bytes_processed: AtomicU64,
}

impl PlayerShared {
    fn state(&self) -> PlayerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new_state: PlayerState) {
        let old_state = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            for listener in self.listeners.lock().unwrap().iter() {
                listener(old_state, new_state);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// First chain stage of every playback run: tracks the play-head and flips the player into
/// `Stopped` when the stream runs out on its own.
struct PlayerProbe {
    shared: Arc<PlayerShared>,
}

impl AudioProcessor for PlayerProbe {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        self.shared.current_time.store(event.time_stamp());
        self.shared
            .bytes_processed
            .store(event.bytes_processed(), Ordering::Relaxed);
        true
    }

    fn processing_finished(&mut self) {
        // a pause or stop has already moved the state on; only a natural end still sees Playing
        if self.shared.state() == PlayerState::Playing {
            self.shared.set_state(PlayerState::Stopped);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Plays loaded media through a gain and time-stretch pipeline on a dedicated worker thread,
/// with live tempo and gain control.
///
/// The player builds a fresh dispatcher, processor chain and sink for every playback run. The
/// worker thread owns the dispatch loop; the controlling thread only flips atomic parameters and
/// the stop flag.
pub struct Player {
    sink_factory: Box<SinkFactory>,
    pre_stretch_factory: Option<Box<ProcessorFactory>>,
    post_stretch_factory: Option<Box<ProcessorFactory>>,

    media: Option<Box<dyn Media>>,
    shared: Arc<PlayerShared>,

    gain_control: Option<GainControl>,
    wsola_control: Option<WsolaControl>,
    dispatcher: Option<DispatcherHandle>,
    worker: Option<JoinHandle<()>>,

    paused_at: f64,
    gain: f64,
    tempo: f64,
}

impl Player {
    /// Create a new player. The factory provides the playback sink for each run.
    pub fn new(sink_factory: Box<SinkFactory>) -> Self {
        Self {
            sink_factory,
            pre_stretch_factory: None,
            post_stretch_factory: None,
            media: None,
            shared: Arc::new(PlayerShared {
                state: Mutex::new(PlayerState::NoFileLoaded),
                listeners: Mutex::new(Vec::new()),
                current_time: AtomicF64::new(0.0),
                bytes_processed: AtomicU64::new(0),
            }),
            gain_control: None,
            wsola_control: None,
            dispatcher: None,
            worker: None,
            paused_at: 0.0,
            gain: 1.0,
            tempo: 1.0,
        }
    }

    /// Create a player targeting the default system audio output.
    #[cfg(feature = "cpal-output")]
    pub fn with_default_output() -> Self {
        Self::new(Box::new(|format| {
            Ok(Box::new(crate::io::cpal::CpalSink::open(format)?))
        }))
    }

    /// Register an extra processor in front of the time stretcher on every playback run.
    pub fn set_pre_stretch_processor(&mut self, factory: Box<ProcessorFactory>) {
        self.pre_stretch_factory = Some(factory);
    }

    /// Register an extra processor behind the time stretcher on every playback run.
    pub fn set_post_stretch_processor(&mut self, factory: Box<ProcessorFactory>) {
        self.post_stretch_factory = Some(factory);
    }

    /// Register a state transition observer. Listeners run on the thread causing the transition.
    pub fn add_state_listener(
        &mut self,
        listener: impl Fn(PlayerState, PlayerState) + Send + 'static,
    ) {
        self.shared.listeners.lock().unwrap().push(Box::new(listener));
    }

    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    /// Load new media, ejecting any previously loaded one first.
    pub fn load(&mut self, media: Box<dyn Media>) -> Result<(), Error> {
        if self.state() != PlayerState::NoFileLoaded {
            self.eject();
        }
        self.media = Some(media);
        self.paused_at = 0.0;
        self.shared.current_time.store(0.0);
        self.shared.bytes_processed.store(0, Ordering::Relaxed);
        self.shared.set_state(PlayerState::FileLoaded);
        Ok(())
    }

    /// Probe an audio file and load it.
    #[cfg(feature = "file")]
    pub fn load_file<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<(), Error> {
        let media = crate::io::file::MediaFile::open(path)?;
        self.load(Box::new(media))
    }

    /// Stop playback if running and drop the loaded media.
    pub fn eject(&mut self) {
        if matches!(self.state(), PlayerState::Playing | PlayerState::Paused) {
            self.stop_playback();
        }
        self.media = None;
        self.shared.set_state(PlayerState::NoFileLoaded);
    }

    /// Start or resume playback.
    pub fn play(&mut self) -> Result<(), Error> {
        if self.state() != PlayerState::Paused {
            self.paused_at = 0.0;
        }
        self.play_from(self.paused_at)
    }

    /// Start playback at the given position in seconds.
    pub fn play_from(&mut self, start_time: f64) -> Result<(), Error> {
        match self.state() {
            PlayerState::FileLoaded | PlayerState::Paused | PlayerState::Stopped => (),
            state => {
                return Err(Error::StateError(format!("can not play while {state:?}")));
            }
        }
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| Error::StateError("no media loaded".to_string()))?;
        let format = media.format();

        let gain_processor = GainProcessor::new(self.gain);
        let gain_control = gain_processor.control();

        let mut wsola = Wsola::new(
            Self::player_parameters(self.tempo, format.sample_rate()),
            format.channels(),
        );
        let wsola_control = wsola.control();

        let stream = media.open_stream()?;
        let mut dispatcher =
            AudioDispatcher::new(stream, wsola.input_buffer_size(), wsola.overlap())?;
        wsola.set_dispatcher(dispatcher.handle());
        dispatcher.skip(start_time);

        // the sink must be available before anything starts playing
        let sink = (self.sink_factory)(&format)?;

        dispatcher.add_processor(PlayerProbe {
            shared: Arc::clone(&self.shared),
        });
        dispatcher.add_processor(gain_processor);
        if let Some(factory) = &self.pre_stretch_factory {
            dispatcher.chain().add_boxed(factory());
        }
        dispatcher.add_processor(wsola);
        if let Some(factory) = &self.post_stretch_factory {
            dispatcher.chain().add_boxed(factory());
        }
        dispatcher.add_processor(AudioWriter::new(sink));

        let handle = dispatcher.handle();
        let worker = thread::Builder::new()
            .name("audio_dispatcher".to_string())
            .spawn(move || {
                if let Err(err) = dispatcher.run() {
                    log::error!("Audio dispatcher error: {err}");
                }
            })?;

        self.gain_control = Some(gain_control);
        self.wsola_control = Some(wsola_control);
        self.dispatcher = Some(handle);
        self.worker = Some(worker);
        self.shared.set_state(PlayerState::Playing);
        Ok(())
    }

    /// Pause playback at the current play-head position.
    pub fn pause(&mut self) -> Result<(), Error> {
        self.pause_at(self.current_time())
    }

    /// Pause playback, remembering `position` (in seconds) as the resume point.
    pub fn pause_at(&mut self, position: f64) -> Result<(), Error> {
        match self.state() {
            PlayerState::Playing | PlayerState::Paused => {
                // move the state first, so the probe's finalizer sees a pause, not a natural end
                self.shared.set_state(PlayerState::Paused);
                self.shutdown_worker();
                self.paused_at = position;
                Ok(())
            }
            state => Err(Error::StateError(format!("can not pause while {state:?}"))),
        }
    }

    /// Stop playback and join the worker thread.
    pub fn stop(&mut self) -> Result<(), Error> {
        match self.state() {
            PlayerState::Playing | PlayerState::Paused => {
                self.stop_playback();
                Ok(())
            }
            PlayerState::Stopped => Ok(()),
            state => Err(Error::StateError(format!("can not stop while {state:?}"))),
        }
    }

    fn stop_playback(&mut self) {
        self.shared.set_state(PlayerState::Stopped);
        self.shutdown_worker();
    }

    /// Stop the dispatcher and join the worker, so no stale finalizer can race a later run.
    fn shutdown_worker(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Audio dispatcher thread panicked");
            }
        }
        self.gain_control = None;
        self.wsola_control = None;
    }

    /// Set the playback gain. Applies to the running pipeline when playing, otherwise to the
    /// next one.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
        if self.state() == PlayerState::Playing {
            if let Some(control) = &self.gain_control {
                control.set_gain(gain);
            }
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Set the playback tempo: 1.0 is unchanged, 2.0 twice as fast, 0.5 half speed. Applies to
    /// the running pipeline when playing, otherwise to the next one.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
        if self.state() == PlayerState::Playing {
            if let (Some(control), Some(media)) = (&self.wsola_control, &self.media) {
                control.set_parameters(Self::player_parameters(
                    tempo,
                    media.format().sample_rate(),
                ));
            }
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Duration of the loaded media in seconds.
    pub fn duration_seconds(&self) -> Result<f64, Error> {
        match &self.media {
            Some(media) => Ok(media.duration_seconds()),
            None => Err(Error::StateError(
                "no media loaded, unable to determine the duration".to_string(),
            )),
        }
    }

    /// Total number of sample frames of the loaded media.
    pub fn total_frames(&self) -> Result<u64, Error> {
        match &self.media {
            Some(media) => Ok(media.total_frames()),
            None => Err(Error::StateError(
                "no media loaded, unable to determine the frame count".to_string(),
            )),
        }
    }

    /// The current play-head position in output seconds.
    pub fn current_time(&self) -> f64 {
        self.shared.current_time.load()
    }

    /// Fraction of the media processed so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        match &self.media {
            Some(media) if media.total_frames() > 0 => {
                let frames_processed = self.shared.bytes_processed.load(Ordering::Relaxed)
                    / media.format().frame_size() as u64;
                frames_processed as f64 / media.total_frames() as f64
            }
            _ => 0.0,
        }
    }

    fn player_parameters(tempo: f64, sample_rate: f64) -> WsolaParameters {
        WsolaParameters::music_defaults(tempo, sample_rate)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleConverter;
    use crate::io::{MemoryMedia, MemorySink};
    use std::time::{Duration, Instant};

    fn sine_media(seconds: f64) -> MemoryMedia {
        let format = AudioFormat::pcm16le(44100.0, 1).unwrap();
        let count = (44100.0 * seconds) as usize;
        let samples: Vec<f32> = (0..count)
            .map(|i| (i as f32 * 440.0 / 44100.0 * std::f32::consts::TAU).sin() * 0.5)
            .collect();
        let converter = SampleConverter::for_format(&format);
        let mut bytes = vec![0u8; samples.len() * 2];
        converter.to_bytes(&samples, &mut bytes);
        MemoryMedia::new(format, bytes)
    }

    fn memory_player() -> Player {
        Player::new(Box::new(|_format| Ok(Box::new(MemorySink::new()))))
    }

    fn wait_for_state(player: &Player, state: PlayerState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while player.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {state:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn loads_and_plays_to_the_end() {
        let mut player = memory_player();
        player.load(Box::new(sine_media(0.5))).unwrap();
        assert_eq!(player.state(), PlayerState::FileLoaded);
        assert!((player.duration_seconds().unwrap() - 0.5).abs() < 1e-6);

        player.play().unwrap();
        wait_for_state(&player, PlayerState::Stopped);
        assert!(player.progress() > 0.9);

        // a finished run can be restarted
        player.play().unwrap();
        wait_for_state(&player, PlayerState::Stopped);
    }

    #[test]
    fn rejects_illegal_transitions() {
        let mut player = memory_player();
        assert!(matches!(player.play(), Err(Error::StateError(_))));
        assert!(matches!(player.pause(), Err(Error::StateError(_))));
        assert!(matches!(player.stop(), Err(Error::StateError(_))));

        player.load(Box::new(sine_media(0.2))).unwrap();
        assert!(matches!(player.pause(), Err(Error::StateError(_))));
    }

    /// A sink that sleeps per write, emulating device back-pressure.
    struct ThrottledSink(MemorySink);

    impl AudioSink for ThrottledSink {
        fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
            thread::sleep(Duration::from_millis(1));
            self.0.write(bytes)
        }
        fn drain(&mut self) -> Result<(), Error> {
            self.0.drain()
        }
        fn close(&mut self) -> Result<(), Error> {
            self.0.close()
        }
    }

    #[test]
    fn pause_records_the_resume_point() {
        let mut player =
            Player::new(Box::new(|_format| Ok(Box::new(ThrottledSink(MemorySink::new())))));
        player.load(Box::new(sine_media(20.0))).unwrap();
        player.play().unwrap();
        player.pause_at(0.5).unwrap();
        assert_eq!(player.state(), PlayerState::Paused);

        // resuming starts from the recorded point instead of the beginning
        player.play().unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        player.stop().unwrap();
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[test]
    fn listeners_observe_transitions() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let mut player = memory_player();
        let log = Arc::clone(&transitions);
        player.add_state_listener(move |old, new| {
            log.lock().unwrap().push((old, new));
        });

        player.load(Box::new(sine_media(0.1))).unwrap();
        player.eject();

        let transitions = transitions.lock().unwrap();
        assert_eq!(
            transitions.as_slice(),
            &[
                (PlayerState::NoFileLoaded, PlayerState::FileLoaded),
                (PlayerState::FileLoaded, PlayerState::NoFileLoaded),
            ]
        );
    }

    #[test]
    fn setters_apply_pending_values_to_the_next_run() {
        let mut player = memory_player();
        player.set_gain(0.5);
        player.set_tempo(1.5);
        assert_eq!(player.gain(), 0.5);
        assert_eq!(player.tempo(), 1.5);

        player.load(Box::new(sine_media(0.2))).unwrap();
        player.play().unwrap();
        player.set_tempo(2.0);
        player.set_gain(0.8);
        wait_for_state(&player, PlayerState::Stopped);
    }
}
