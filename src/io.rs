use std::sync::{Arc, Mutex};

use crate::{error::Error, format::AudioFormat};

#[cfg(feature = "cpal-output")]
pub mod cpal;
#[cfg(feature = "file")]
pub mod file;

// -------------------------------------------------------------------------------------------------

/// A readable source of interleaved audio bytes with a known format.
///
/// The dispatcher pulls from a byte stream, converts to floats at the last moment and pushes the
/// result through its processor chain.
pub trait ByteStream: Send {
    /// The layout of the bytes this stream produces.
    fn format(&self) -> AudioFormat;

    /// Read up to `buffer.len()` bytes. Returns the number of bytes read; `Ok(0)` signals the end
    /// of the stream. Implementations wrapping decoders that fail at the end of input (as some
    /// pipe decoders do) should map that condition to end-of-stream instead of an error.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error>;

    /// Skip over `bytes` bytes. Returns the number of bytes actually skipped.
    fn skip(&mut self, bytes: u64) -> Result<u64, Error>;

    /// Release the underlying resource.
    fn close(&mut self) -> Result<(), Error>;
}

// -------------------------------------------------------------------------------------------------

/// A writable destination for interleaved audio bytes.
///
/// `write` is expected to block when the device buffer is full; this back-pressure paces the
/// dispatch loop.
pub trait AudioSink: Send {
    /// Write the given bytes, blocking until they are accepted. Returns the number of bytes
    /// written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error>;

    /// Block until all written audio has been played out.
    fn drain(&mut self) -> Result<(), Error>;

    /// Release the underlying device.
    fn close(&mut self) -> Result<(), Error>;

    /// Playback position of the device in microseconds, when the backend can report one.
    fn microsecond_position(&self) -> Option<u64> {
        None
    }
}

// -------------------------------------------------------------------------------------------------

/// A loadable piece of audio: knows its format and length and can open fresh byte streams,
/// one per playback run.
pub trait Media: Send {
    fn open_stream(&self) -> Result<Box<dyn ByteStream>, Error>;

    fn format(&self) -> AudioFormat;

    /// Total length in sample frames.
    fn total_frames(&self) -> u64;

    /// Total length in seconds.
    fn duration_seconds(&self) -> f64 {
        self.total_frames() as f64 / self.format().sample_rate()
    }
}

// -------------------------------------------------------------------------------------------------

/// A byte stream over an in-memory buffer. Useful for tests and for feeding pre-decoded audio.
pub struct MemoryStream {
    format: AudioFormat,
    data: Arc<[u8]>,
    position: usize,
}

impl MemoryStream {
    pub fn new(format: AudioFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
            position: 0,
        }
    }
}

impl ByteStream for MemoryStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let remaining = self.data.len() - self.position;
        let len = buffer.len().min(remaining);
        buffer[..len].copy_from_slice(&self.data[self.position..self.position + len]);
        self.position += len;
        Ok(len)
    }

    fn skip(&mut self, bytes: u64) -> Result<u64, Error> {
        let remaining = (self.data.len() - self.position) as u64;
        let skipped = bytes.min(remaining);
        self.position += skipped as usize;
        Ok(skipped)
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// An [`AudioSink`] that collects all written bytes into a shared buffer.
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the collected bytes, usable after the sink moved into a chain.
    pub fn collected(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.data)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.data.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn drain(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// [`Media`] over an in-memory byte buffer.
pub struct MemoryMedia {
    format: AudioFormat,
    data: Arc<[u8]>,
}

impl MemoryMedia {
    pub fn new(format: AudioFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }
}

impl Media for MemoryMedia {
    fn open_stream(&self) -> Result<Box<dyn ByteStream>, Error> {
        Ok(Box::new(MemoryStream {
            format: self.format,
            data: Arc::clone(&self.data),
            position: 0,
        }))
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        (self.data.len() / self.format.frame_size()) as u64
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reads_and_skips() {
        let format = AudioFormat::pcm16le(44100.0, 1).unwrap();
        let mut stream = MemoryStream::new(format, vec![1u8, 2, 3, 4, 5, 6]);

        assert_eq!(stream.skip(2).unwrap(), 2);
        let mut buffer = [0u8; 3];
        assert_eq!(stream.read(&mut buffer).unwrap(), 3);
        assert_eq!(buffer, [3, 4, 5]);
        assert_eq!(stream.read(&mut buffer).unwrap(), 1);
        assert_eq!(stream.read(&mut buffer).unwrap(), 0);
        // skipping past the end reports the truncated count
        assert_eq!(stream.skip(10).unwrap(), 0);
    }

    #[test]
    fn memory_media_opens_fresh_streams() {
        let format = AudioFormat::pcm16le(44100.0, 2).unwrap();
        let media = MemoryMedia::new(format, vec![0u8; 16]);
        assert_eq!(media.total_frames(), 4);

        let mut first = media.open_stream().unwrap();
        let mut buffer = [0u8; 16];
        assert_eq!(first.read(&mut buffer).unwrap(), 16);
        let mut second = media.open_stream().unwrap();
        assert_eq!(second.read(&mut buffer).unwrap(), 16);
    }
}
