use std::sync::Arc;

use crate::{event::AudioEvent, processor::AudioProcessor, utils::atomic::AtomicF64};

// -------------------------------------------------------------------------------------------------

/// Scales the signal by a gain factor and hard-clips the result to `[-1, 1]`.
///
/// The overlap prefix of each event already carries the previous event's processed samples, so
/// only the fresh samples are touched. The gain value is read once per event and can be updated
/// lock-free from another thread through a [`GainControl`].
pub struct GainProcessor {
    gain: Arc<AtomicF64>,
}

impl GainProcessor {
    /// Create a new processor with the given gain. 1.0 leaves the signal untouched.
    pub fn new(gain: f64) -> Self {
        Self {
            gain: Arc::new(AtomicF64::new(gain)),
        }
    }

    /// A handle for updating the gain while the processor lives in a chain.
    pub fn control(&self) -> GainControl {
        GainControl {
            gain: Arc::clone(&self.gain),
        }
    }
}

impl AudioProcessor for GainProcessor {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        let gain = self.gain.load() as f32;
        let start = event.samples().sample_to_array(event.overlap());
        for value in event.float_buffer_mut()[start..].iter_mut() {
            *value = (*value * gain).clamp(-1.0, 1.0);
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// Lock-free control handle for a [`GainProcessor`].
#[derive(Clone)]
pub struct GainControl {
    gain: Arc<AtomicF64>,
}

impl GainControl {
    pub fn set_gain(&self, gain: f64) {
        self.gain.store(gain);
    }

    pub fn gain(&self) -> f64 {
        self.gain.load()
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
    fn scales_and_clips() {
        let mut event = event_with(&[0.4, 0.6, -0.8, 0.9], 0);
        let mut gain = GainProcessor::new(2.0);
        assert!(gain.process(&mut event));
        assert_eq!(event.float_buffer(), &[0.8, 1.0, -1.0, 1.0]);
    }

    #[test]
    fn skips_overlap_prefix() {
        let mut event = event_with(&[0.1, 0.2, 0.3, 0.4], 2);
        let mut gain = GainProcessor::new(2.0);
        gain.process(&mut event);
        assert_eq!(event.float_buffer(), &[0.1, 0.2, 0.6, 0.8]);
    }

    #[test]
    fn unit_gain_is_identity() {
        let samples = [0.25, -0.5, 0.75, -1.0];
        let mut event = event_with(&samples, 0);
        let mut gain = GainProcessor::new(1.0);
        gain.process(&mut event);
        assert_eq!(event.float_buffer(), &samples);
    }

    #[test]
    fn control_updates_are_visible() {
        let mut event = event_with(&[0.5], 0);
        let mut gain = GainProcessor::new(1.0);
        let control = gain.control();
        control.set_gain(0.5);
        gain.process(&mut event);
        assert_eq!(event.float_buffer(), &[0.25]);
    }
}
