use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_queue::ArrayQueue;

use crate::{
    error::Error,
    event::AudioEvent,
    format::{AudioFormat, SampleConverter},
    io::ByteStream,
    processor::{AudioProcessor, ProcessorChain, ProcessorId},
    utils::samples::SampleMath,
};

// -------------------------------------------------------------------------------------------------

/// State shared between a dispatcher and its handles.
struct DispatcherLink {
    /// When set the dispatcher stops dispatching at the next loop boundary.
    stopped: AtomicBool,
    /// Buffer geometry requested by a processor, applied between blocks. Latest request wins.
    pending_geometry: ArrayQueue<(usize, usize)>,
}

// -------------------------------------------------------------------------------------------------

/// A cheap, cloneable handle onto a running [`AudioDispatcher`].
///
/// Handles outlive the dispatcher's move onto the worker thread and are the only way other
/// threads interact with it: stopping, changing buffer geometry and modifying the chain.
#[derive(Clone)]
pub struct DispatcherHandle {
    link: Arc<DispatcherLink>,
    chain: ProcessorChain,
}

impl DispatcherHandle {
    /// Request the dispatcher to stop. The worker exits at the next loop boundary and then runs
    /// every processor's finalizer.
    pub fn stop(&self) {
        self.link.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.link.stopped.load(Ordering::SeqCst)
    }

    /// Request new buffer geometry (buffer size and overlap, both in samples). Applied between
    /// blocks, never in the middle of one; when requested repeatedly only the latest wins.
    pub fn set_step_size_and_overlap(&self, buffer_size: usize, overlap: usize) {
        self.link.pending_geometry.force_push((buffer_size, overlap));
    }

    /// The dispatcher's processor chain.
    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }
}

// -------------------------------------------------------------------------------------------------

/// Pulls bytes from a [`ByteStream`], decodes them into overlapping float blocks and drives an
/// [`AudioEvent`] through the processor chain, once per block.
///
/// The dispatcher itself runs on a dedicated worker thread via [`AudioDispatcher::run`]. A
/// controller thread uses a [`DispatcherHandle`] to stop it or to modify the chain.
pub struct AudioDispatcher {
    /// The audio stream (in bytes); conversion to float happens at the last moment.
    stream: Box<dyn ByteStream>,
    format: AudioFormat,
    samples: SampleMath,
    converter: SampleConverter,
    /// Carries the decoded float block through the chain; owns the reusable float buffers.
    event: AudioEvent,
    /// Reusable byte read buffer.
    byte_buffer: Vec<u8>,
    samples_overlap: usize,
    samples_step: usize,
    byte_overlap: usize,
    byte_step: usize,
    /// The number of bytes to skip before processing starts.
    bytes_to_skip: u64,
    /// Position in the stream in bytes, including the initial skip.
    bytes_processed: u64,
    /// If true the first buffer is only filled up to buffer size - step size.
    zero_pad_first: bool,
    /// If true the last buffer is zero padded to canonical size; otherwise it is truncated and
    /// downstream processors must accept short buffers.
    zero_pad_last: bool,
    torn_down: bool,
    chain: ProcessorChain,
    link: Arc<DispatcherLink>,
}

impl AudioDispatcher {
    /// Create a new dispatcher reading from `stream` with the given buffer size and overlap,
    /// both in samples. The overlap must be strictly smaller than the buffer size.
    pub fn new(
        stream: Box<dyn ByteStream>,
        buffer_size: usize,
        overlap: usize,
    ) -> Result<Self, Error> {
        if buffer_size == 0 || overlap >= buffer_size {
            return Err(Error::ParameterError(format!(
                "invalid buffer geometry: buffer size {buffer_size}, overlap {overlap}"
            )));
        }
        let format = stream.format();
        let mut dispatcher = Self {
            samples: SampleMath::new(format.channels()),
            converter: SampleConverter::for_format(&format),
            event: AudioEvent::new(format),
            byte_buffer: Vec::new(),
            samples_overlap: 0,
            samples_step: 0,
            byte_overlap: 0,
            byte_step: 0,
            bytes_to_skip: 0,
            bytes_processed: 0,
            zero_pad_first: false,
            zero_pad_last: true,
            torn_down: false,
            chain: ProcessorChain::new(),
            link: Arc::new(DispatcherLink {
                stopped: AtomicBool::new(false),
                pending_geometry: ArrayQueue::new(1),
            }),
            format,
            stream,
        };
        dispatcher.set_step_size_and_overlap(buffer_size, overlap);
        Ok(dispatcher)
    }

    /// A handle for interacting with the dispatcher from other threads.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            link: Arc::clone(&self.link),
            chain: self.chain.clone(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Append a processor to the dispatch chain.
    pub fn add_processor(&self, processor: impl AudioProcessor + 'static) -> ProcessorId {
        self.chain.add(processor)
    }

    /// Detach a processor and run its finalizer.
    pub fn remove_processor(&self, id: ProcessorId) -> bool {
        self.chain.remove(id)
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }

    /// Skip a number of seconds before processing the stream. Must be called before `run`.
    pub fn skip(&mut self, seconds: f64) {
        self.bytes_to_skip =
            (seconds * self.format.sample_rate()).round() as u64 * self.format.frame_size() as u64;
    }

    /// If true the first buffer is only partially filled with fresh samples, leaving a zero
    /// padded prefix of overlap length.
    pub fn set_zero_pad_first_buffer(&mut self, zero_pad: bool) {
        self.zero_pad_first = zero_pad;
    }

    /// If true (the default) the last buffer keeps its canonical size, padded with zeros.
    /// Otherwise it is truncated to what was read.
    pub fn set_zero_pad_last_buffer(&mut self, zero_pad: bool) {
        self.zero_pad_last = zero_pad;
    }

    /// Request the dispatcher to stop at the next loop boundary.
    pub fn stop(&self) {
        self.link.stopped.store(true, Ordering::SeqCst);
    }

    /// True if the dispatcher was stopped or the end of the stream has been reached.
    pub fn is_stopped(&self) -> bool {
        self.link.stopped.load(Ordering::SeqCst)
    }

    /// The number of seconds of input processed so far.
    pub fn seconds_processed(&self) -> f64 {
        (self.bytes_processed / self.format.frame_size() as u64) as f64
            / self.format.sample_rate()
    }

    /// Set a new buffer size and overlap, both in samples. Only called between blocks; the
    /// freshest samples of the previous block are preserved so the next overlap shift still
    /// sees real history after a geometry change.
    fn set_step_size_and_overlap(&mut self, buffer_size: usize, overlap: usize) {
        debug_assert!(overlap < buffer_size, "overlap must stay below buffer size");
        let new_len = self.samples.sample_to_array(buffer_size);
        let input = self.event.input_buffer_mut();
        if input.len() != new_len {
            let mut buffer = vec![0.0; new_len];
            let keep = input.len().min(new_len);
            buffer[new_len - keep..].copy_from_slice(&input[input.len() - keep..]);
            *input = buffer;
        }
        let frame_size = self.format.frame_size();
        self.samples_overlap = overlap;
        self.samples_step = buffer_size - overlap;
        self.byte_buffer.resize(buffer_size * frame_size, 0);
        self.byte_overlap = overlap * frame_size;
        self.byte_step = self.samples_step * frame_size;
    }

    /// The worker entry point: skip, then read and dispatch blocks until the stream ends or a
    /// stop is requested. Tears the chain down exactly once on every exit path.
    pub fn run(&mut self) -> Result<(), Error> {
        let result = self.run_loop();
        self.teardown();
        result
    }

    fn run_loop(&mut self) -> Result<(), Error> {
        self.bytes_processed = 0;
        self.skip_to_start()?;
        loop {
            // apply buffer geometry requested by a processor during the previous block
            if let Some((buffer_size, overlap)) = self.link.pending_geometry.pop() {
                self.set_step_size_and_overlap(buffer_size, overlap);
            }
            self.event.begin_block(self.bytes_processed);
            let bytes_read = self.read_next_block()?;
            if bytes_read == 0 || self.link.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.chain.for_each(|processor| processor.process(&mut self.event));
            self.bytes_processed += bytes_read as u64;
        }
    }

    fn skip_to_start(&mut self) -> Result<(), Error> {
        if self.bytes_processed < self.bytes_to_skip {
            let skipped = self.stream.skip(self.bytes_to_skip)?;
            if skipped != self.bytes_to_skip {
                return Err(Error::ShortSkip {
                    skipped,
                    expected: self.bytes_to_skip,
                });
            }
            self.bytes_processed += self.bytes_to_skip;
        }
        Ok(())
    }

    /// Reads the next audio block into the event's buffers.
    ///
    /// Everything but the first buffer reads a step worth of bytes behind the shifted overlap.
    /// The behavior at the end of the stream is defined by the zero pad last setting. Returns
    /// the number of bytes read; 0 means the stream is exhausted.
    fn read_next_block(&mut self) -> Result<usize, Error> {
        debug_assert!(
            self.samples_overlap < self.samples.array_to_sample(self.event.input_buffer().len())
        );

        let frame_size = self.format.frame_size();
        let is_first_buffer = self.bytes_processed <= self.bytes_to_skip;

        let (bytes_to_read, offset_bytes, offset_samples) =
            if is_first_buffer && !self.zero_pad_first {
                // read a whole buffer into a fresh block
                (self.byte_buffer.len(), 0, 0)
            } else {
                // read a step worth of bytes behind the overlap prefix
                (self.byte_step, self.byte_overlap, self.samples_overlap)
            };

        // shift the trailing overlap samples down to the front of the buffer
        let canonical_len = self.samples.sample_to_array(self.samples_overlap + self.samples_step);
        if !is_first_buffer && self.event.input_buffer().len() == canonical_len {
            let samples = self.samples;
            let (step, overlap) = (self.samples_step, self.samples_overlap);
            samples.samples_copy_within(self.event.input_buffer_mut(), step, 0, overlap);
        }

        // read until the block is full, the stream ends or a stop is requested
        let mut end_of_stream = false;
        let mut total_read = 0;
        while !self.link.stopped.load(Ordering::SeqCst) && !end_of_stream && total_read < bytes_to_read
        {
            let region = &mut self.byte_buffer[offset_bytes + total_read..offset_bytes + bytes_to_read];
            match self.stream.read(region)? {
                0 => end_of_stream = true,
                read => total_read += read,
            }
        }

        if end_of_stream {
            if self.zero_pad_last {
                // keep the canonical buffer size and pad the remainder with zeros
                let len = self.byte_buffer.len();
                self.byte_buffer[offset_bytes + total_read..len].fill(0);
                let float_offset = self.samples.sample_to_array(offset_samples);
                let input = self.event.input_buffer_mut();
                self.converter
                    .to_float(&self.byte_buffer[offset_bytes..], &mut input[float_offset..]);
            } else {
                // truncate both buffers to exactly what was read
                let samples_read = total_read / frame_size;
                self.byte_buffer.truncate(offset_bytes + total_read);
                let truncated = self
                    .samples
                    .realloc_samples(Some(self.event.input_buffer()), offset_samples + samples_read);
                *self.event.input_buffer_mut() = truncated;
                let float_offset = self.samples.sample_to_array(offset_samples);
                let input = self.event.input_buffer_mut();
                self.converter
                    .to_float(&self.byte_buffer[offset_bytes..], &mut input[float_offset..]);
            }
        } else if total_read == bytes_to_read {
            // the expected amount of bytes has been read; decode the fresh region
            let float_offset = self.samples.sample_to_array(offset_samples);
            let float_len = self.samples.sample_to_array(total_read / frame_size);
            let input = self.event.input_buffer_mut();
            self.converter.to_float(
                &self.byte_buffer[offset_bytes..offset_bytes + total_read],
                &mut input[float_offset..float_offset + float_len],
            );
        } else if !self.link.stopped.load(Ordering::SeqCst) {
            return Err(Error::PartialRead {
                read: total_read,
                expected: bytes_to_read,
            });
        }

        self.event.set_overlap(offset_samples);
        Ok(total_read)
    }

    /// Flush every processor's finalizer once and close the stream. Idempotent.
    fn teardown(&mut self) {
        if !self.torn_down {
            self.torn_down = true;
            self.link.stopped.store(true, Ordering::SeqCst);
            self.chain.finish_all();
            if let Err(err) = self.stream.close() {
                log::error!("Closing audio stream error: {err}");
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
