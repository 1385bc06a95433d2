use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// `Error` provides an enumeration of all possible errors reported by stretto.
#[derive(Debug)]
pub enum Error {
    MediaFileNotFound,
    MediaFileProbeError,
    MediaFileSeekError,
    DecodingError(Box<dyn error::Error + Send>),
    AudioOutputError(Box<dyn error::Error + Send>),
    IoError(io::Error),
    /// Fewer bytes than requested could be skipped from a byte stream.
    ShortSkip { skipped: u64, expected: u64 },
    /// A read stopped short without reaching the end of the stream.
    PartialRead { read: usize, expected: usize },
    ParameterError(String),
    StateError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaFileNotFound => write!(f, "Audio file not found"),
            Self::MediaFileProbeError => write!(f, "Audio file failed to probe"),
            Self::MediaFileSeekError => write!(f, "Audio file failed to seek"),
            Self::DecodingError(err) | Self::AudioOutputError(err) => err.fmt(f),
            Self::IoError(err) => err.fmt(f),
            Self::ShortSkip { skipped, expected } => write!(
                f,
                "Did not skip the expected amount of bytes: {skipped} skipped, {expected} expected"
            ),
            Self::PartialRead { read, expected } => write!(
                f,
                "The end of the audio stream has not been reached and the number of bytes \
                 read ({read}) is not equal to the expected amount of bytes ({expected})"
            ),
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::StateError(str) => write!(f, "Invalid player state: {str}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
