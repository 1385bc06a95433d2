use std::{
    io as std_io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rb::{Producer, RbConsumer, RbInspector, RbProducer, SpscRb, RB};

use super::AudioSink;
use crate::{
    error::Error,
    format::{AudioFormat, SampleConverter},
};

// -------------------------------------------------------------------------------------------------

/// Ring buffer capacity between the writer and the device callback.
const RING_BUFFER_SECONDS: f64 = 0.5;

// -------------------------------------------------------------------------------------------------

/// An [`AudioSink`] playing through the default cpal output device.
///
/// Bytes are decoded to floats and pushed into an SPSC ring buffer which the device callback
/// drains; a full ring blocks the writer, providing the back-pressure that paces the dispatch
/// loop. The cpal stream itself is owned by a dedicated thread, since streams must not move
/// across threads on every platform.
pub struct CpalSink {
    converter: SampleConverter,
    ring: SpscRb<f32>,
    producer: Producer<f32>,
    consumed: Arc<AtomicU64>,
    sample_rate: f64,
    channels: usize,
    shutdown: Arc<AtomicBool>,
    stream_thread: Option<thread::JoinHandle<()>>,
    scratch: Vec<f32>,
}

impl CpalSink {
    /// Open the default output device for the given stream format. Fails when no device is
    /// available or the device rejects the format.
    pub fn open(format: &AudioFormat) -> Result<Self, Error> {
        let channels = format.channels();
        let sample_rate = format.sample_rate();

        let ring = SpscRb::new((sample_rate * RING_BUFFER_SECONDS) as usize * channels);
        let producer = ring.producer();
        let consumer = ring.consumer();
        let consumed = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let config = cpal::StreamConfig {
            channels: channels as cpal::ChannelCount,
            sample_rate: cpal::SampleRate(sample_rate as u32),
            buffer_size: cpal::BufferSize::Default,
        };

        // the stream thread reports back once the device is up, so open errors surface here
        let (ready_send, ready_recv) = mpsc::channel();
        let thread_consumed = Arc::clone(&consumed);
        let thread_shutdown = Arc::clone(&shutdown);
        let stream_thread = thread::Builder::new()
            .name("audio_output".to_string())
            .spawn(move || {
                let stream = (|| -> Result<cpal::Stream, Error> {
                    let device = cpal::default_host().default_output_device().ok_or_else(|| {
                        Error::AudioOutputError(Box::new(
                            cpal::DefaultStreamConfigError::DeviceNotAvailable,
                        ))
                    })?;
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let read = consumer.read(output).unwrap_or(0);
                                output[read..].fill(0.0);
                                thread_consumed.fetch_add(read as u64, Ordering::Relaxed);
                            },
                            |err| log::error!("Audio output stream error: {err}"),
                            None,
                        )
                        .map_err(|err| Error::AudioOutputError(Box::new(err)))?;
                    stream
                        .play()
                        .map_err(|err| Error::AudioOutputError(Box::new(err)))?;
                    Ok(stream)
                })();
                match stream {
                    Ok(_stream) => {
                        let _ = ready_send.send(Ok(()));
                        // keep the stream alive until the sink closes
                        while !thread_shutdown.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(20));
                        }
                    }
                    Err(err) => {
                        let _ = ready_send.send(Err(err));
                    }
                }
            })?;

        ready_recv.recv().map_err(|_| {
            Error::IoError(std_io::Error::new(
                std_io::ErrorKind::BrokenPipe,
                "audio output thread died during startup",
            ))
        })??;

        Ok(Self {
            converter: SampleConverter::for_format(format),
            ring,
            producer,
            consumed,
            sample_rate,
            channels,
            shutdown,
            stream_thread: Some(stream_thread),
            scratch: Vec::new(),
        })
    }

    fn shutdown_stream(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.stream_thread.take() {
            let _ = thread.join();
        }
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let width = self.converter.bytes_per_channel_sample();
        self.scratch.resize(bytes.len() / width, 0.0);
        self.converter.to_float(bytes, &mut self.scratch);

        let mut written = 0;
        while written < self.scratch.len() {
            match self.producer.write_blocking(&self.scratch[written..]) {
                Some(count) => written += count,
                None => break,
            }
        }
        Ok(written * width)
    }

    fn drain(&mut self) -> Result<(), Error> {
        while !self.ring.is_empty() && self.stream_thread.is_some() {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.shutdown_stream();
        Ok(())
    }

    fn microsecond_position(&self) -> Option<u64> {
        let frames = self.consumed.load(Ordering::Relaxed) / self.channels as u64;
        Some((frames as f64 / self.sample_rate * 1_000_000.0) as u64)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown_stream();
    }
}
