//! **stretto** is a streaming audio engine for real-time playback with independent control of
//! volume and tempo. It pulls raw bytes from an audio source, decodes them into overlapping
//! float blocks and pushes them through a user-composable chain of processors, with a
//! waveform-similarity overlap-add (WSOLA) time stretcher and a Kaiser-windowed sinc resampler
//! at the heart of the chain.
//!
//! ### Overview
//!
//! - **[`AudioDispatcher`]** drives everything: it reads a [`io::ByteStream`], maintains the
//!   byte and sample accounting across skips and end-of-stream padding, and invokes each
//!   registered [`AudioProcessor`] once per block with an [`AudioEvent`].
//!
//! - **[`AudioProcessor`]** implementations transform the event in chain order:
//!   [`GainProcessor`] scales and clips samples, [`Wsola`] changes the playback speed without
//!   altering pitch, [`RateTransposer`] changes the sample rate by sinc interpolation and
//!   [`AudioWriter`] pushes the result into an [`io::AudioSink`].
//!
//! - **[`Player`]** wires a complete playback pipeline onto a worker thread and exposes a small
//!   state machine with live tempo and gain control.
//!
//! ### Getting Started
//!
//! ```rust,no_run
//! use stretto::{io::MemoryMedia, io::MemorySink, AudioFormat, Error, Player};
//!
//! fn main() -> Result<(), Error> {
//!     // Raw interleaved 16 bit PCM, e.g. pre-decoded elsewhere. With the `file` feature,
//!     // `player.load_file("music.mp3")` probes and decodes audio files instead.
//!     let format = AudioFormat::pcm16le(44100.0, 2)?;
//!     let media = MemoryMedia::new(format, std::fs::read("audio.raw")?);
//!
//!     // Create a player with a sink factory. With the `cpal-output` feature enabled,
//!     // `Player::with_default_output()` plays through the system audio device instead.
//!     let mut player = Player::new(Box::new(|_format| Ok(Box::new(MemorySink::new()))));
//!     player.load(Box::new(media))?;
//!
//!     // Play 25% faster at half the volume, without changing the pitch.
//!     player.set_tempo(1.25);
//!     player.set_gain(0.5);
//!     player.play()?;
//!
//!     // Playback runs on a worker thread.
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     player.stop()?;
//!     Ok(())
//! }
//! ```

// -------------------------------------------------------------------------------------------------

// private mods (partly re-exported)

mod dispatcher;
mod error;
mod event;
mod format;
mod player;
mod processor;
mod resample;
mod wsola;

// public, flat re-exports (common types and traits)

pub use error::Error;

pub use dispatcher::{AudioDispatcher, DispatcherHandle};
pub use event::AudioEvent;
pub use format::{AudioFormat, Endianness, SampleConverter, SampleEncoding};
pub use player::{Player, PlayerState, ProcessorFactory, SinkFactory, StateListener};
pub use processor::{AudioProcessor, ProcessorChain, ProcessorId};
pub use resample::{RateControl, RateTransposer, Resampler};
pub use wsola::{Wsola, WsolaControl, WsolaParameters};

pub use processor::{
    gain::{GainControl, GainProcessor},
    writer::AudioWriter,
};

// -------------------------------------------------------------------------------------------------

// public mods

pub mod io;
pub mod utils;
