use std::{
    fs::File,
    io as std_io,
    path::{Path, PathBuf},
};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::{ByteStream, Media};
use crate::{
    error::Error,
    format::{AudioFormat, SampleConverter},
};

// -------------------------------------------------------------------------------------------------

/// A [`ByteStream`] decoding an audio file through symphonia.
///
/// The decoded audio is exposed as 32 bit little-endian float bytes, whatever the container
/// carried. Seeking is packet quantized; the remainder up to the exact target position is
/// decoded and discarded.
pub struct FileStream {
    format: AudioFormat,
    converter: SampleConverter,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    total_frames: u64,
    sample_buffer: Option<SampleBuffer<f32>>,
    /// Encoded bytes of the last packet awaiting delivery.
    pending: Vec<u8>,
    pending_pos: usize,
    /// Channel values to drop after a packet quantized seek.
    values_to_skip: u64,
}

impl FileStream {
    /// Open and probe an audio file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref()).map_err(|err| match err.kind() {
            std_io::ErrorKind::NotFound => Error::MediaFileNotFound,
            _ => Error::IoError(err),
        })?;
        let source_stream = MediaSourceStream::new(Box::new(file), Default::default());

        // probe the media source stream for a format
        let hint = Hint::new();
        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();
        let decoder_opts: DecoderOptions = Default::default();
        let probed = symphonia::default::get_probe()
            .format(&hint, source_stream, &format_opts, &metadata_opts)
            .map_err(|_| Error::MediaFileProbeError)?;
        let reader = probed.format;

        let track = reader.default_track().ok_or(Error::MediaFileNotFound)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &decoder_opts)
            .map_err(|err| Error::DecodingError(Box::new(err)))?;

        let sample_rate = codec_params.sample_rate.ok_or(Error::MediaFileProbeError)?;
        let channels = codec_params
            .channels
            .ok_or(Error::MediaFileProbeError)?
            .count();
        let total_frames = codec_params.n_frames.unwrap_or(0);

        let format = AudioFormat::float32le(sample_rate as f64, channels)?;
        Ok(Self {
            converter: SampleConverter::for_format(&format),
            format,
            reader,
            decoder,
            track_id,
            total_frames,
            sample_buffer: None,
            pending: Vec::new(),
            pending_pos: 0,
            values_to_skip: 0,
        })
    }

    /// Total length of the stream in sample frames, when the container reports one.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Decode the next packet into the pending byte buffer. Returns false at the end of the
    /// stream.
    fn refill(&mut self) -> Result<bool, Error> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std_io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(err) => {
                    // treat unrecoverable format errors at the stream tail as end of stream
                    log::error!("Audio file decoder format error: {err}");
                    return Ok(false);
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let capacity = decoded.capacity() as u64;
                    let buffer = self
                        .sample_buffer
                        .get_or_insert_with(|| SampleBuffer::new(capacity, spec));
                    buffer.copy_interleaved_ref(decoded);

                    let mut samples = buffer.samples();
                    if self.values_to_skip > 0 {
                        let skip = (self.values_to_skip as usize).min(samples.len());
                        samples = &samples[skip..];
                        self.values_to_skip -= skip as u64;
                    }
                    if samples.is_empty() {
                        continue;
                    }
                    self.pending.resize(samples.len() * 4, 0);
                    self.converter.to_bytes(samples, &mut self.pending);
                    self.pending_pos = 0;
                    return Ok(true);
                }
                Err(SymphoniaError::IoError(err)) => {
                    // the packet failed to decode due to an IO error, skip it
                    log::error!("Audio file decoder I/O error: {err}");
                    continue;
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    // the packet failed to decode due to invalid data, skip it
                    log::error!("Audio file decoder error: {err}");
                    continue;
                }
                Err(err) => {
                    log::error!("Audio file decoder fatal error: {err}");
                    return Ok(false);
                }
            }
        }
    }
}

impl ByteStream for FileStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let mut written = 0;
        while written < buffer.len() {
            if self.pending_pos == self.pending.len() && !self.refill()? {
                break;
            }
            let available = self.pending.len() - self.pending_pos;
            let len = (buffer.len() - written).min(available);
            buffer[written..written + len]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + len]);
            self.pending_pos += len;
            written += len;
        }
        Ok(written)
    }

    fn skip(&mut self, bytes: u64) -> Result<u64, Error> {
        let frame_size = self.format.frame_size() as u64;
        let frames = bytes / frame_size;
        let seconds = frames as f64 / self.format.sample_rate();

        let seeked_to = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: seconds.into(),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|_| Error::MediaFileSeekError)?;

        // seeking moves to packet boundaries: compensate by decoding and discarding samples
        // until the exact target position
        let actual_frames = seeked_to.actual_ts;
        self.values_to_skip = frames.saturating_sub(actual_frames) * self.format.channels() as u64;
        self.pending.clear();
        self.pending_pos = 0;
        Ok(bytes)
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// [`Media`] backed by an audio file on disk. Opens a fresh [`FileStream`] per playback run.
pub struct MediaFile {
    path: PathBuf,
    format: AudioFormat,
    total_frames: u64,
}

impl MediaFile {
    /// Probe the file once and keep its format and length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let stream = FileStream::open(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            format: stream.format(),
            total_frames: stream.total_frames(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Media for MediaFile {
    fn open_stream(&self) -> Result<Box<dyn ByteStream>, Error> {
        Ok(Box::new(FileStream::open(&self.path)?))
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }
}
