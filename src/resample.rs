use std::sync::Arc;

use crate::{event::AudioEvent, processor::AudioProcessor, utils::atomic::AtomicF64};

mod filter_kit;
mod resampler;

pub use resampler::Resampler;

// -------------------------------------------------------------------------------------------------

/// Sample rate transposer: changes the sample rate of the stream by sinc interpolation.
///
/// The factor determines the new rate: 0.5 halves it, 1.0 changes nothing, 2.0 doubles it.
/// Played back at the original speed the pitch shifts accordingly; chained behind a
/// [`Wsola`](crate::Wsola) stage this implements pitch shifting with unchanged duration.
pub struct RateTransposer {
    factor: Arc<AtomicF64>,
    resampler: Option<Resampler>,
    output: Vec<f32>,
}

impl RateTransposer {
    pub fn new(factor: f64) -> Self {
        Self {
            factor: Arc::new(AtomicF64::new(factor)),
            resampler: None,
            output: Vec::new(),
        }
    }

    /// A handle for updating the factor while the processor lives in a chain.
    pub fn control(&self) -> RateControl {
        RateControl {
            factor: Arc::clone(&self.factor),
        }
    }
}

impl AudioProcessor for RateTransposer {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        let factor = self.factor.load();
        let samples = event.samples();

        let resampler = self
            .resampler
            .get_or_insert_with(|| Resampler::new(false, 0.1, 4.0, samples));

        // the buffer travels on to the next processor, which checks the full length, so it must
        // be exactly the factored size
        let required_len = samples.array_factored_length(event.float_buffer().len(), factor);
        if self.output.len() != required_len {
            self.output = vec![0.0; required_len];
        }

        resampler.process(factor, event.float_buffer(), false, &mut self.output);

        event.set_float_buffer(&self.output);
        event.set_overlap(samples.samples_count_factored(event.overlap(), factor));
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// Lock-free control handle for a [`RateTransposer`].
#[derive(Clone)]
pub struct RateControl {
    factor: Arc<AtomicF64>,
}

impl RateControl {
    pub fn set_factor(&self, factor: f64) {
        self.factor.store(factor);
    }

    pub fn factor(&self) -> f64 {
        self.factor.load()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;

    fn event_with(samples: &[f32], overlap: usize) -> AudioEvent {
        let mut event = AudioEvent::new(AudioFormat::pcm16le(44100.0, 1).unwrap());
        event.input_buffer_mut().extend_from_slice(samples);
        event.begin_block(0);
        event.set_overlap(overlap);
        event
    }

    #[test]
    fn output_length_follows_the_factor() {
        let input: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let mut transposer = RateTransposer::new(0.5);
        let mut event = event_with(&input, 100);

        transposer.process(&mut event);
        assert_eq!(event.float_buffer().len(), 500);
        // the overlap scales along with the buffer
        assert_eq!(event.overlap(), 50);
    }

    #[test]
    fn downsampled_ramp_approximates_decimation() {
        let input: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let mut transposer = RateTransposer::new(0.5);
        let mut event = event_with(&input, 0);

        transposer.process(&mut event);
        let output = event.float_buffer();
        for i in 50..400 {
            assert!(
                (output[i] - input[2 * i]).abs() < 0.03,
                "mismatch at {i}: {} vs {}",
                output[i],
                input[2 * i]
            );
        }
    }

    #[test]
    fn factor_updates_resize_the_output() {
        let input: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let mut transposer = RateTransposer::new(1.0);
        let control = transposer.control();

        let mut event = event_with(&input, 0);
        transposer.process(&mut event);
        assert_eq!(event.float_buffer().len(), 1000);

        control.set_factor(2.0);
        let mut event = event_with(&input, 0);
        transposer.process(&mut event);
        assert_eq!(event.float_buffer().len(), 2000);
    }
}
