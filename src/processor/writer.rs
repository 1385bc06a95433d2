use crate::{event::AudioEvent, io::AudioSink, processor::AudioProcessor};

// -------------------------------------------------------------------------------------------------

/// Terminal chain stage that pushes each event's bytes into an [`AudioSink`].
///
/// Only the non-overlap tail of the byte view is written, since the overlap prefix repeats bytes
/// that went out with the previous event. The first event is written whole. A blocking sink
/// paces the whole dispatch loop through this processor.
pub struct AudioWriter {
    sink: Box<dyn AudioSink>,
    first_event: bool,
}

impl AudioWriter {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            first_event: true,
        }
    }
}

impl AudioProcessor for AudioWriter {
    fn process(&mut self, event: &mut AudioEvent) -> bool {
        let byte_overlap = event.overlap() * event.format().frame_size();
        let skip = if self.first_event {
            self.first_event = false;
            0
        } else {
            byte_overlap
        };

        let bytes = &event.byte_buffer()[skip..];
        let expected = bytes.len();
        match self.sink.write(bytes) {
            Ok(written) if written != expected => {
                log::error!("Expected to write {expected} bytes but only wrote {written} bytes");
            }
            Ok(_) => (),
            Err(err) => {
                log::error!("Audio sink write error: {err}");
            }
        }
        true
    }

    fn processing_finished(&mut self) {
        if let Err(err) = self.sink.drain() {
            log::error!("Audio sink drain error: {err}");
        }
        if let Err(err) = self.sink.close() {
            log::error!("Audio sink close error: {err}");
        }
    }
}

// -------------------------------------------------------------------------------------------------
