use crate::{
    format::{AudioFormat, SampleConverter},
    utils::samples::SampleMath,
};

// -------------------------------------------------------------------------------------------------

/// The carrier that travels through the processor chain once per block.
///
/// The event owns two float buffers. The *input* buffer is the dispatcher's decode target and
/// persists across events, so in-place processors (such as gain) keep their writes in the region
/// that re-appears as the next event's overlap prefix. Whole-buffer processors (time stretcher,
/// rate transposer) install their output with [`AudioEvent::set_float_buffer`], which switches the
/// event to the reusable *replaced* buffer until the dispatcher rearms it for the next block.
///
/// The byte view is produced on demand by encoding the current float buffer through the stream's
/// sample converter.
pub struct AudioEvent {
    format: AudioFormat,
    samples: SampleMath,
    converter: SampleConverter,
    input_buffer: Vec<f32>,
    replaced_buffer: Vec<f32>,
    replaced: bool,
    byte_scratch: Vec<u8>,
    /// Number of leading samples that duplicate the previous event's trailing samples.
    overlap: usize,
    /// Stream position in bytes, including the initial skip.
    bytes_processed: u64,
    /// Output duration per input duration of the last rate changing processor, 1.0 otherwise.
    output_to_input_ratio: f64,
}

impl AudioEvent {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            samples: SampleMath::new(format.channels()),
            converter: SampleConverter::for_format(&format),
            format,
            input_buffer: Vec::new(),
            replaced_buffer: Vec::new(),
            replaced: false,
            byte_scratch: Vec::new(),
            overlap: 0,
            bytes_processed: 0,
            output_to_input_ratio: 1.0,
        }
    }

    /// The format of the underlying byte stream.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Sample index math for this event's channel layout.
    pub fn samples(&self) -> SampleMath {
        self.samples
    }

    /// Number of channels per sample.
    pub fn channels(&self) -> usize {
        self.samples.channels()
    }

    /// The current interleaved float buffer.
    pub fn float_buffer(&self) -> &[f32] {
        if self.replaced {
            &self.replaced_buffer
        } else {
            &self.input_buffer
        }
    }

    /// Mutable access to the current interleaved float buffer, for in-place processors.
    pub fn float_buffer_mut(&mut self) -> &mut [f32] {
        if self.replaced {
            &mut self.replaced_buffer
        } else {
            &mut self.input_buffer
        }
    }

    /// Replace the event's float buffer with a processor's output. Later processors in the chain
    /// see the new contents; the dispatcher's decoded input stays untouched.
    pub fn set_float_buffer(&mut self, buffer: &[f32]) {
        debug_assert!(
            buffer.len() % self.channels() == 0,
            "buffer is not aligned to sample boundaries"
        );
        self.replaced_buffer.clear();
        self.replaced_buffer.extend_from_slice(buffer);
        self.replaced = true;
    }

    /// Number of samples in the current float buffer.
    pub fn sample_count(&self) -> usize {
        self.samples.array_to_sample(self.float_buffer().len())
    }

    /// The current buffer encoded into stream bytes. Encoded lazily per call.
    pub fn byte_buffer(&mut self) -> &[u8] {
        let width = self.converter.bytes_per_channel_sample();
        if self.replaced {
            self.byte_scratch.resize(self.replaced_buffer.len() * width, 0);
            self.converter.to_bytes(&self.replaced_buffer, &mut self.byte_scratch);
        } else {
            self.byte_scratch.resize(self.input_buffer.len() * width, 0);
            self.converter.to_bytes(&self.input_buffer, &mut self.byte_scratch);
        }
        &self.byte_scratch
    }

    /// Leading samples duplicating the previous event.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn set_overlap(&mut self, overlap: usize) {
        self.overlap = overlap;
    }

    /// Bytes consumed from the stream so far, including the initial skip.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Ratio of output duration to input duration of the rate changing stage, if any.
    pub fn output_to_input_ratio(&self) -> f64 {
        self.output_to_input_ratio
    }

    pub fn set_output_to_input_ratio(&mut self, ratio: f64) {
        self.output_to_input_ratio = ratio;
    }

    /// Position of this event in the output stream, in seconds.
    pub fn time_stamp(&self) -> f64 {
        self.bytes_processed as f64
            / (self.format.frame_size() as f64 * self.format.sample_rate())
            * self.output_to_input_ratio
    }

    // dispatcher-side accessors ------------------------------------------------------------------

    /// The dispatcher's persistent decode buffer.
    pub(crate) fn input_buffer_mut(&mut self) -> &mut Vec<f32> {
        &mut self.input_buffer
    }

    pub(crate) fn input_buffer(&self) -> &[f32] {
        &self.input_buffer
    }

    /// Rearm the event for the next block: current buffer is the input buffer again.
    pub(crate) fn begin_block(&mut self, bytes_processed: u64) {
        self.replaced = false;
        self.bytes_processed = bytes_processed;
    }
}

// -------------------------------------------------------------------------------------------------
