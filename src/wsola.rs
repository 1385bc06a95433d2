use std::{mem, sync::Arc};

use crossbeam_queue::ArrayQueue;

use crate::{
    dispatcher::DispatcherHandle,
    event::AudioEvent,
    processor::AudioProcessor,
    utils::samples::SampleMath,
};

// -------------------------------------------------------------------------------------------------

/// Algorithm parameters for [`Wsola`].
///
/// The sequence length determines how long the chopped sound sequences are, the seek window how
/// far the algorithm may look for the best overlapping location, and the overlap length over how
/// long a period consecutive sequences are mixed into each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WsolaParameters {
    tempo: f64,
    sample_rate: f64,
    sequence_ms: f64,
    seek_window_ms: f64,
    overlap_ms: f64,
}

impl WsolaParameters {
    /// Create a parameter set from scratch. `tempo` of 1.0 means unchanged speed, 2.0 doubles
    /// it, 0.5 halves it. The window lengths are in milliseconds.
    pub fn new(
        tempo: f64,
        sample_rate: f64,
        sequence_ms: f64,
        seek_window_ms: f64,
        overlap_ms: f64,
    ) -> Self {
        Self {
            tempo,
            sample_rate,
            sequence_ms,
            seek_window_ms,
            overlap_ms,
        }
    }

    /// Defaults that work well for speech material.
    pub fn speech_defaults(tempo: f64, sample_rate: f64) -> Self {
        Self::new(tempo, sample_rate, 40.0, 15.0, 12.0)
    }

    /// Defaults that work well for music material.
    pub fn music_defaults(tempo: f64, sample_rate: f64) -> Self {
        Self::new(tempo, sample_rate, 82.0, 28.0, 12.0)
    }

    /// Defaults that work well when slowing down heavily.
    pub fn slowdown_defaults(tempo: f64, sample_rate: f64) -> Self {
        Self::new(tempo, sample_rate, 100.0, 35.0, 20.0)
    }

    /// Window lengths interpolated from the tempo: longer sequences when slowing down, shorter
    /// ones when speeding up.
    pub fn automatic_defaults(tempo: f64, sample_rate: f64) -> Self {
        let tempo_low = 0.5;
        let tempo_high = 2.0;

        let sequence_ms_low = 125.0;
        let sequence_ms_high = 50.0;
        let sequence_k = (sequence_ms_high - sequence_ms_low) / (tempo_high - tempo_low);
        let sequence_c = sequence_ms_low - sequence_k * tempo_low;

        let seek_low = 25.0;
        let seek_high = 15.0;
        let seek_k = (seek_high - seek_low) / (tempo_high - tempo_low);
        let seek_c = seek_low - seek_k * tempo_low;

        let sequence_ms = (sequence_c + sequence_k * tempo + 0.5).floor();
        let seek_window_ms = (seek_c + seek_k * tempo + 0.5).floor();
        Self::new(tempo, sample_rate, sequence_ms, seek_window_ms, 12.0)
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn sequence_ms(&self) -> f64 {
        self.sequence_ms
    }

    pub fn seek_window_ms(&self) -> f64 {
        self.seek_window_ms
    }

    pub fn overlap_ms(&self) -> f64 {
        self.overlap_ms
    }
}

// -------------------------------------------------------------------------------------------------

/// Waveform-similarity-based overlap-add time stretching.
///
/// Changes the playback speed of the signal without altering its pitch by chopping it into
/// sequences and re-joining them at the most similar overlapping position, found with a
/// normalized cross-correlation over a seek window. Consumes whole input buffers of
/// [`Wsola::input_buffer_size`] samples and emits re-timed buffers of fixed size per event.
///
/// Tempo updates are pushed through an atomic single slot and picked up between events; when the
/// derived buffer geometry changes, the dispatcher is told to adapt through the handle installed
/// with [`Wsola::set_dispatcher`]. Without a handle the geometry update is skipped.
pub struct Wsola {
    samples: SampleMath,
    seek_window_length: usize,
    seek_length: usize,
    overlap_length: usize,

    output_to_input_ratio: f64,

    /// Tail of the previous output sequence, mixed into the head of the next one.
    mid_buffer: Vec<f32>,
    /// Amplitude-sloped copy of the mid buffer used as the correlation reference.
    ref_mid_buffer: Vec<f32>,
    output_buffer: Vec<f32>,

    int_skip: usize,
    sample_req: usize,

    dispatcher: Option<DispatcherHandle>,
    new_parameters: Arc<ArrayQueue<WsolaParameters>>,
}

impl Wsola {
    /// Create a new instance from algorithm parameters, for signals with the given number of
    /// channels per sample.
    pub fn new(params: WsolaParameters, channels: usize) -> Self {
        let mut wsola = Self {
            samples: SampleMath::new(channels),
            seek_window_length: 0,
            seek_length: 0,
            overlap_length: 0,
            output_to_input_ratio: 1.0,
            mid_buffer: Vec::new(),
            ref_mid_buffer: Vec::new(),
            output_buffer: Vec::new(),
            int_skip: 0,
            sample_req: 0,
            dispatcher: None,
            new_parameters: Arc::new(ArrayQueue::new(1)),
        };
        wsola.set_parameters(params);
        wsola.apply_new_parameters();
        wsola
    }

    /// Push a new parameter set. Picked up between events; when pushed multiple times in
    /// between, only the latest set survives.
    pub fn set_parameters(&mut self, params: WsolaParameters) {
        self.new_parameters.force_push(params);
    }

    /// A handle for pushing parameter updates from another thread.
    pub fn control(&self) -> WsolaControl {
        WsolaControl {
            parameters: Arc::clone(&self.new_parameters),
        }
    }

    /// Install the back-channel used to adapt the dispatcher's buffer geometry on tempo changes.
    pub fn set_dispatcher(&mut self, dispatcher: DispatcherHandle) {
        self.dispatcher = Some(dispatcher);
    }

    /// The input buffer size this instance requires, in samples.
    pub fn input_buffer_size(&self) -> usize {
        self.sample_req
    }

    /// The dispatcher overlap this instance requires, in samples.
    pub fn overlap(&self) -> usize {
        self.sample_req - self.int_skip
    }

    /// The number of samples emitted per event.
    fn output_buffer_size(&self) -> usize {
        self.seek_window_length - self.overlap_length
    }

    fn apply_new_parameters(&mut self) -> bool {
        let params = match self.new_parameters.pop() {
            Some(params) => params,
            None => return false,
        };

        self.output_to_input_ratio = 1.0 / params.tempo();
        let old_overlap_length = self.overlap_length;

        let rate = params.sample_rate() / 1000.0;
        self.overlap_length = (rate * params.overlap_ms()) as usize;
        self.seek_window_length = (rate * params.sequence_ms()) as usize;
        self.seek_length = (rate * params.seek_window_ms()) as usize;

        // the mid buffers must grow with the overlap; reallocate as well when they were never
        // allocated at all
        if self.overlap_length > old_overlap_length || self.mid_buffer.is_empty() {
            let old_mid = mem::take(&mut self.mid_buffer);
            self.mid_buffer = self.samples.realloc_samples(Some(&old_mid), self.overlap_length);
            self.ref_mid_buffer = self.samples.realloc_samples(None, self.overlap_length);
        }

        let nominal_skip =
            params.tempo() * (self.seek_window_length - self.overlap_length) as f64;
        self.int_skip = (nominal_skip + 0.5) as usize;

        self.sample_req =
            (self.int_skip + self.overlap_length).max(self.seek_window_length) + self.seek_length;

        let old_output = mem::take(&mut self.output_buffer);
        self.output_buffer = self
            .samples
            .realloc_samples(Some(&old_output), self.output_buffer_size());
        true
    }

    /// Slope the amplitude of the mid buffer samples to form the correlation reference. The
    /// parabolic weight favors the center of the overlap region during the seek.
    fn precalc_corr_reference(&mut self) {
        for i in 0..self.overlap_length {
            let offset = self.samples.sample_to_array(i);
            let temp = (i * (self.overlap_length - i)) as f32;
            for c in 0..self.samples.channels() {
                self.ref_mid_buffer[offset + c] = self.mid_buffer[offset + c] * temp;
            }
        }
    }

    /// Normalized cross-correlation between the sloped reference and the input at `offset`,
    /// computed on the channel-averaged mono projection.
    fn calc_cross_correlation(&self, compare: &[f32], offset: usize) -> f64 {
        let mut corr = 0.0f64;
        let mut norm = 0.0f64;
        for i in 0..self.overlap_length {
            let mono_ref = self.samples.mono_sample(&self.ref_mid_buffer, i) as f64;
            let mono_cmp = self.samples.mono_sample(compare, i + offset) as f64;
            corr += mono_ref * mono_cmp;
            norm += mono_ref * mono_ref;
        }
        // avoid division by zero on silent references
        if norm < 1e-8 {
            norm = 1.0;
        }
        corr / norm.sqrt()
    }

    /// Find the offset in `[0, seek_length)` where the input is most alike the tail of the
    /// previous sequence. Ties are broken towards the smallest offset.
    fn seek_best_overlap_position(&mut self, input: &[f32], position: usize) -> usize {
        self.precalc_corr_reference();

        let mut best_correlation = -10.0;
        let mut best_offset = 0;

        for temp_offset in 0..self.seek_length {
            let compare_position = position + temp_offset;
            let correlation = self.calc_cross_correlation(input, compare_position);
            // slightly favor positions close to the middle of the seek range
            let tmp = (2 * temp_offset as i64 - self.seek_length as i64) as f64
                / self.seek_length as f64;
            let correlation = (correlation + 0.1) * (1.0 - 0.25 * tmp * tmp);
            if correlation > best_correlation {
                best_correlation = correlation;
                best_offset = temp_offset;
            }
        }
        best_offset
    }

    /// Cross-fade the tail of the previous sequence with the input at `input_offset` into the
    /// head of the output buffer.
    fn overlap_add(&mut self, input: &[f32], input_offset: usize) {
        let overlap = self.overlap_length;
        for i in 0..overlap {
            let fade_in = i as f32;
            let fade_out = (overlap - i) as f32;
            let out = self.samples.sample_to_array(i);
            let inp = self.samples.sample_to_array(i + input_offset);
            for c in 0..self.samples.channels() {
                self.output_buffer[out + c] = (input[inp + c] * fade_in
                    + self.mid_buffer[out + c] * fade_out)
                    / overlap as f32;
            }
        }
    }
}

impl AudioProcessor for Wsola {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        debug_assert_eq!(event.channels(), self.samples.channels());
        debug_assert_eq!(
            event.float_buffer().len(),
            self.samples.sample_to_array(self.sample_req),
            "input buffer does not match the required input size"
        );

        let samples = self.samples;
        let input = event.float_buffer();

        // search for the best overlapping position
        let offset = self.seek_best_overlap_position(input, 0);

        // mix the previous sequence tail into the head of the output
        self.overlap_add(input, offset);

        // copy the sequence body behind the cross-faded head
        let sequence_length = self.seek_window_length - 2 * self.overlap_length;
        samples.samples_copy(
            input,
            offset + self.overlap_length,
            &mut self.output_buffer,
            self.overlap_length,
            sequence_length,
        );

        // keep the end of the current sequence for mixing with the next one
        samples.samples_copy(
            input,
            offset + sequence_length + self.overlap_length,
            &mut self.mid_buffer,
            0,
            self.overlap_length,
        );

        event.set_float_buffer(&self.output_buffer);
        event.set_overlap(0);
        event.set_output_to_input_ratio(self.output_to_input_ratio);

        if self.apply_new_parameters() {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.set_step_size_and_overlap(self.input_buffer_size(), self.overlap());
            }
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// Lock-free control handle for pushing parameter updates into a [`Wsola`] that lives in a chain.
#[derive(Clone)]
pub struct WsolaControl {
    parameters: Arc<ArrayQueue<WsolaParameters>>,
}

impl WsolaControl {
    /// Push a new parameter set; only the latest one pushed before the next event survives.
    pub fn set_parameters(&self, params: WsolaParameters) {
        self.parameters.force_push(params);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;

    /// Small windows keep the tests quick: 10 ms sequences, 5 ms seek, 2.5 ms overlap @ 8 kHz.
    fn small_params(tempo: f64) -> WsolaParameters {
        WsolaParameters::new(tempo, 8000.0, 10.0, 5.0, 2.5)
    }

    fn event_with(samples: &[f32]) -> AudioEvent {
        let mut event = AudioEvent::new(AudioFormat::pcm16le(8000.0, 1).unwrap());
        event.input_buffer_mut().extend_from_slice(samples);
        event.begin_block(0);
        event
    }

    /// Deterministic noise; aperiodic so the correlation seek locks onto the true alignment.
    fn noise(count: usize) -> Vec<f32> {
        let mut state = 0x2545f491u32;
        (0..count)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn derived_sizes() {
        let wsola = Wsola::new(small_params(1.0), 1);
        // overlap 20, seek window 80, seek 40
        assert_eq!(wsola.overlap_length, 20);
        assert_eq!(wsola.seek_window_length, 80);
        assert_eq!(wsola.seek_length, 40);
        assert_eq!(wsola.int_skip, 60);
        assert_eq!(wsola.input_buffer_size(), 120);
        assert_eq!(wsola.overlap(), 60);
        assert_eq!(wsola.mid_buffer.len(), 20);
        assert_eq!(wsola.output_buffer.len(), 60);
    }

    #[test]
    fn tempo_one_is_identity_after_ramp_in() {
        let mut wsola = Wsola::new(small_params(1.0), 1);
        // a slow ramp keeps the correlation landscape flat, so the center-favoring seek
        // settles on a steady lag of seek_length / 2
        let input: Vec<f32> = (0..8000).map(|i| i as f32 / 8000.0 - 0.5).collect();
        let step = wsola.int_skip;
        let req = wsola.input_buffer_size();
        let overlap_len = wsola.overlap_length;
        let lag = wsola.seek_length / 2;

        let mut output = Vec::new();
        let mut position = 0;
        while position + req <= input.len() {
            let mut event = event_with(&input[position..position + req]);
            assert!(wsola.process(&mut event));
            assert_eq!(event.float_buffer().len(), wsola.output_buffer_size());
            assert_eq!(event.overlap(), 0);
            output.extend_from_slice(event.float_buffer());
            position += step;
        }

        // past the initial ramp-in the output reproduces the (lagged) input sample for sample
        assert!(output.len() > 1000);
        for i in overlap_len..output.len() {
            assert!(
                (output[i] - input[i + lag]).abs() < 1e-3,
                "mismatch at {i}: {} vs {}",
                output[i],
                input[i + lag]
            );
        }
    }

    #[test]
    fn seek_finds_the_true_alignment() {
        let mut wsola = Wsola::new(small_params(1.0), 1);
        let overlap_len = wsola.overlap_length;
        let input = noise(wsola.input_buffer_size());
        // plant the mid buffer 25 samples into the input; the seek must recover that offset
        wsola
            .mid_buffer
            .copy_from_slice(&input[25..25 + overlap_len]);
        assert_eq!(wsola.seek_best_overlap_position(&input, 0), 25);
    }

    #[test]
    fn parameter_updates_apply_between_events() {
        let mut wsola = Wsola::new(small_params(1.0), 1);
        let req_before = wsola.input_buffer_size();

        let mut event = event_with(&noise(req_before));
        let control = wsola.control();
        control.set_parameters(small_params(2.0));
        // superseded by a later update before the next event; only the latest wins
        control.set_parameters(small_params(1.5));
        wsola.process(&mut event);

        assert_eq!(wsola.int_skip, 90);
        assert_eq!(wsola.input_buffer_size(), 150);
        assert!((wsola.output_to_input_ratio - 1.0 / 1.5).abs() < 1e-9);
        // the event that carried the update still used the old geometry
        assert_eq!(event.float_buffer().len(), 60);
    }

    #[test]
    fn stereo_output_keeps_channels_interleaved() {
        let mut wsola = Wsola::new(small_params(1.0), 2);
        let req = wsola.input_buffer_size();
        // left channel carries a ramp, right channel its negation
        let mut input = Vec::with_capacity(req * 2);
        for i in 0..req {
            let v = i as f32 / req as f32 - 0.5;
            input.push(v);
            input.push(-v);
        }
        let mut event = AudioEvent::new(AudioFormat::pcm16le(8000.0, 2).unwrap());
        event.input_buffer_mut().extend_from_slice(&input);
        event.begin_block(0);

        wsola.process(&mut event);
        let output = event.float_buffer();
        assert_eq!(output.len(), wsola.output_buffer_size() * 2);
        for frame in output.chunks_exact(2) {
            assert!((frame[0] + frame[1]).abs() < 1e-5);
        }
    }

    #[test]
    fn silent_reference_does_not_divide_by_zero() {
        let mut wsola = Wsola::new(small_params(1.0), 1);
        let req = wsola.input_buffer_size();
        let mut event = event_with(&vec![0.0; req]);
        wsola.process(&mut event);
        assert!(event.float_buffer().iter().all(|v| *v == 0.0));
    }
}
