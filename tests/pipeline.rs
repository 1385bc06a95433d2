//! End-to-end pipeline scenarios: dispatcher, gain, time stretcher, rate transposer and player
//! wired together over in-memory streams and sinks.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use stretto::{
    io::{AudioSink, MemoryMedia, MemorySink, MemoryStream},
    AudioDispatcher, AudioEvent, AudioFormat, AudioProcessor, AudioWriter, Error, GainProcessor,
    Player, PlayerState, RateTransposer, SampleConverter, Wsola, WsolaParameters,
};

// -------------------------------------------------------------------------------------------------

fn pcm16_mono(sample_rate: f64) -> AudioFormat {
    AudioFormat::pcm16le(sample_rate, 1).unwrap()
}

fn encode(format: &AudioFormat, samples: &[f32]) -> Vec<u8> {
    let converter = SampleConverter::for_format(format);
    let mut bytes = vec![0u8; samples.len() * format.frame_size()];
    converter.to_bytes(samples, &mut bytes);
    bytes
}

fn decode(format: &AudioFormat, bytes: &[u8]) -> Vec<f32> {
    let converter = SampleConverter::for_format(format);
    let mut samples = vec![0.0; bytes.len() / format.frame_size()];
    converter.to_float(bytes, &mut samples);
    samples
}

fn sine(frequency: f64, sample_rate: f64, count: usize, amplitude: f32) -> Vec<f32> {
    (0..count)
        .map(|i| (i as f64 * frequency / sample_rate * std::f64::consts::TAU).sin() as f32 * amplitude)
        .collect()
}

fn rms(samples: &[f32]) -> f64 {
    let sum: f64 = samples.iter().map(|v| (*v as f64) * (*v as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Estimate how much of the window is a sinusoid of the given frequency, in `[0, 1]`.
fn quadrature_correlation(samples: &[f32], frequency: f64, sample_rate: f64) -> f64 {
    let mut sin_sum = 0.0f64;
    let mut cos_sum = 0.0f64;
    for (i, v) in samples.iter().enumerate() {
        let phase = i as f64 * frequency / sample_rate * std::f64::consts::TAU;
        sin_sum += *v as f64 * phase.sin();
        cos_sum += *v as f64 * phase.cos();
    }
    let magnitude = (sin_sum * sin_sum + cos_sum * cos_sum).sqrt();
    let amplitude = 2.0 * magnitude / samples.len() as f64;
    amplitude / (rms(samples) * std::f64::consts::SQRT_2)
}

/// Collects every event's float buffer, either before or after some chain stage.
#[derive(Clone)]
struct Collector {
    buffers: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl Collector {
    fn new() -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn concatenated(&self) -> Vec<f32> {
        self.buffers.lock().unwrap().concat()
    }
}

impl AudioProcessor for Collector {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        self.buffers.lock().unwrap().push(event.float_buffer().to_vec());
        true
    }
}

// -------------------------------------------------------------------------------------------------

#[test]
fn no_op_pipeline_reproduces_the_stream() {
    let format = pcm16_mono(44100.0);
    let input: Vec<f32> = (0..10).map(|i| i as f32 * 0.1 - 0.45).collect();
    let bytes = encode(&format, &input);

    let stream = MemoryStream::new(format, bytes.clone());
    let mut dispatcher = AudioDispatcher::new(Box::new(stream), 4, 2).unwrap();
    let sink = MemorySink::new();
    let collected = sink.collected();
    dispatcher.add_processor(AudioWriter::new(Box::new(sink)));

    dispatcher.run().unwrap();

    // the writer skips each event's overlap prefix, so the sink sees the stream exactly once
    assert_eq!(*collected.lock().unwrap(), bytes);
}

#[test]
fn gain_doubles_and_clips_through_the_chain() {
    let format = pcm16_mono(44100.0);
    let input = [0.4, 0.6, -0.8, 0.9];
    let stream = MemoryStream::new(format, encode(&format, &input));

    let mut dispatcher = AudioDispatcher::new(Box::new(stream), 4, 0).unwrap();
    dispatcher.add_processor(GainProcessor::new(2.0));
    let sink = MemorySink::new();
    let collected = sink.collected();
    dispatcher.add_processor(AudioWriter::new(Box::new(sink)));

    dispatcher.run().unwrap();

    let output = decode(&format, &collected.lock().unwrap());
    let expected = [0.8, 1.0, -1.0, 1.0];
    for (o, e) in output.iter().zip(expected.iter()) {
        assert!((o - e).abs() < 1e-4, "expected {expected:?}, got {output:?}");
    }
}

#[test]
fn wsola_halves_the_duration_at_tempo_two() {
    let sample_rate = 44100.0;
    let format = pcm16_mono(sample_rate);
    let input = sine(1000.0, sample_rate, 2 * 44100, 0.5);
    let stream = MemoryStream::new(format, encode(&format, &input));

    let mut wsola = Wsola::new(WsolaParameters::music_defaults(2.0, sample_rate), 1);
    let mut dispatcher =
        AudioDispatcher::new(Box::new(stream), wsola.input_buffer_size(), wsola.overlap()).unwrap();
    wsola.set_dispatcher(dispatcher.handle());
    let step_size = wsola.input_buffer_size() - wsola.overlap();

    let output = Collector::new();
    dispatcher.add_processor(wsola);
    dispatcher.add_processor(output.clone());

    dispatcher.run().unwrap();

    let output = output.concatenated();
    // compressed to half the duration, within one event of slack
    let expected_len = input.len() / 2;
    assert!(
        (output.len() as i64 - expected_len as i64).unsigned_abs() < 2 * step_size as u64,
        "output length {} vs expected {expected_len}",
        output.len()
    );

    // energy is preserved (skip the first event's ramp-in)
    let input_rms = rms(&input);
    let output_rms = rms(&output[step_size..]);
    assert!(
        (output_rms - input_rms).abs() / input_rms < 0.1,
        "input rms {input_rms}, output rms {output_rms}"
    );

    // and the pitch still is 1 kHz
    let window = &output[5000..15000];
    let correlation = quadrature_correlation(window, 1000.0, sample_rate);
    assert!(correlation > 0.8, "correlation {correlation}");
}

#[test]
fn tempo_change_mid_stream_keeps_the_output_continuous() {
    let sample_rate = 44100.0;
    let format = pcm16_mono(sample_rate);
    let input = sine(440.0, sample_rate, 6 * 44100, 0.5);
    let stream = MemoryStream::new(format, encode(&format, &input));

    let mut wsola = Wsola::new(WsolaParameters::music_defaults(1.0, sample_rate), 1);
    let control = wsola.control();
    let mut dispatcher =
        AudioDispatcher::new(Box::new(stream), wsola.input_buffer_size(), wsola.overlap()).unwrap();
    wsola.set_dispatcher(dispatcher.handle());

    /// Pushes a tempo change while processing the 50th event.
    struct TempoChanger {
        control: stretto::WsolaControl,
        sample_rate: f64,
        events: usize,
        input_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl AudioProcessor for TempoChanger {
        fn process(&mut self, event: &mut AudioEvent) -> bool {
            self.input_sizes.lock().unwrap().push(event.float_buffer().len());
            self.events += 1;
            if self.events == 50 {
                self.control
                    .set_parameters(WsolaParameters::music_defaults(1.5, self.sample_rate));
            }
            true
        }
    }

    let input_sizes = Arc::new(Mutex::new(Vec::new()));
    dispatcher.add_processor(TempoChanger {
        control,
        sample_rate,
        events: 0,
        input_sizes: Arc::clone(&input_sizes),
    });

    let output = Collector::new();
    dispatcher.add_processor(wsola);
    dispatcher.add_processor(output.clone());

    dispatcher.run().unwrap();

    // the dispatcher geometry switched exactly once, at event 51
    let sizes = input_sizes.lock().unwrap();
    assert!(sizes.len() > 60, "only {} events", sizes.len());
    let switches = sizes.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(switches, 1);
    assert_ne!(sizes[49], sizes[51]);

    // output RMS stays continuous across the transition
    let buffers = output.buffers.lock().unwrap();
    let before: Vec<f32> = buffers[47..50].concat();
    let after: Vec<f32> = buffers[50..53].concat();
    let before_rms = rms(&before);
    let after_rms = rms(&after);
    assert!(
        (after_rms - before_rms).abs() / before_rms < 0.05,
        "rms before {before_rms}, after {after_rms}"
    );
}

#[test]
fn rate_transposer_halves_a_ramp() {
    let format = pcm16_mono(44100.0);
    let input: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
    let stream = MemoryStream::new(format, encode(&format, &input));

    let mut dispatcher = AudioDispatcher::new(Box::new(stream), 1000, 0).unwrap();
    dispatcher.add_processor(RateTransposer::new(0.5));
    let output = Collector::new();
    dispatcher.add_processor(output.clone());

    dispatcher.run().unwrap();

    let output = output.concatenated();
    assert_eq!(output.len(), 500);
    for i in 50..400 {
        assert!(
            (output[i] - input[2 * i]).abs() < 0.03,
            "mismatch at {i}: {} vs {}",
            output[i],
            input[2 * i]
        );
    }
}

// -------------------------------------------------------------------------------------------------

/// A sink that sleeps per write, emulating device back-pressure.
struct ThrottledSink(MemorySink);

impl AudioSink for ThrottledSink {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        thread::sleep(Duration::from_millis(2));
        self.0.write(bytes)
    }
    fn drain(&mut self) -> Result<(), Error> {
        self.0.drain()
    }
    fn close(&mut self) -> Result<(), Error> {
        self.0.close()
    }
}

/// Counts processed events and finalizer invocations across playback runs.
#[derive(Clone)]
struct CountingProbe {
    events: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl AudioProcessor for CountingProbe {
    fn process(&mut self, _event: &mut AudioEvent) -> bool {
        self.events.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn processing_finished(&mut self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn stop_during_play_shuts_down_cleanly() {
    let sample_rate = 44100.0;
    let format = pcm16_mono(sample_rate);
    let media = MemoryMedia::new(format, encode(&format, &sine(440.0, sample_rate, 30 * 44100, 0.5)));

    let mut player = Player::new(Box::new(|_format| {
        Ok(Box::new(ThrottledSink(MemorySink::new())))
    }));
    let probe = CountingProbe {
        events: Arc::new(AtomicUsize::new(0)),
        finished: Arc::new(AtomicUsize::new(0)),
    };
    let probe_template = probe.clone();
    player.set_pre_stretch_processor(Box::new(move || Box::new(probe_template.clone())));

    player.load(Box::new(media)).unwrap();
    player.play().unwrap();

    // wait until at least five events went through the chain
    let deadline = Instant::now() + Duration::from_secs(10);
    while probe.events.load(Ordering::SeqCst) < 5 {
        assert!(Instant::now() < deadline, "no events dispatched");
        thread::sleep(Duration::from_millis(2));
    }

    let stop_started = Instant::now();
    player.stop().unwrap();
    assert!(
        stop_started.elapsed() < Duration::from_millis(200),
        "stop took {:?}",
        stop_started.elapsed()
    );
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(probe.finished.load(Ordering::SeqCst), 1);

    // a stopped player can start over
    player.play().unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
    player.stop().unwrap();
    assert_eq!(probe.finished.load(Ordering::SeqCst), 2);
}
