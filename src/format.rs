use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Byte order of multi-byte sample values in a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

// -------------------------------------------------------------------------------------------------

/// How a single channel value is encoded in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Integer PCM with 8, 16, 24 or 32 bits per channel value.
    Pcm { bits: u16, signed: bool },
    /// IEEE float with 32 or 64 bits per channel value.
    Float { bits: u16 },
}

impl SampleEncoding {
    /// Byte footprint of one channel value.
    pub fn bytes_per_channel_sample(&self) -> usize {
        match self {
            Self::Pcm { bits, .. } | Self::Float { bits } => *bits as usize / 8,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Pcm { bits, .. } if matches!(bits, 8 | 16 | 24 | 32) => Ok(()),
            Self::Float { bits } if matches!(bits, 32 | 64) => Ok(()),
            _ => Err(Error::ParameterError(format!(
                "unsupported sample encoding: {self:?}"
            ))),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Immutable description of an interleaved audio byte stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    sample_rate: f64,
    channels: usize,
    encoding: SampleEncoding,
    endianness: Endianness,
}

impl AudioFormat {
    /// Create a new format description. Fails for unsupported encodings or empty channel layouts.
    pub fn new(
        sample_rate: f64,
        channels: usize,
        encoding: SampleEncoding,
        endianness: Endianness,
    ) -> Result<Self, Error> {
        if channels < 1 {
            return Err(Error::ParameterError(format!(
                "invalid channel count: {channels}"
            )));
        }
        if !(sample_rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "invalid sample rate: {sample_rate}"
            )));
        }
        encoding.validate()?;
        Ok(Self {
            sample_rate,
            channels,
            encoding,
            endianness,
        })
    }

    /// Shortcut for the common signed 16 bit little-endian PCM layout.
    pub fn pcm16le(sample_rate: f64, channels: usize) -> Result<Self, Error> {
        Self::new(
            sample_rate,
            channels,
            SampleEncoding::Pcm {
                bits: 16,
                signed: true,
            },
            Endianness::Little,
        )
    }

    /// Shortcut for 32 bit little-endian IEEE float streams.
    pub fn float32le(sample_rate: f64, channels: usize) -> Result<Self, Error> {
        Self::new(
            sample_rate,
            channels,
            SampleEncoding::Float { bits: 32 },
            Endianness::Little,
        )
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Byte footprint of one sample across all channels.
    pub fn frame_size(&self) -> usize {
        self.channels * self.encoding.bytes_per_channel_sample()
    }
}

// -------------------------------------------------------------------------------------------------

/// Converts between raw stream bytes and normalized `f32` channel values in `[-1, 1]`.
///
/// Decoding is exact; encoding clamps out-of-range values to the closest representable one.
/// For values representable in the `f32` pipeline the two directions round-trip bit-exactly.
#[derive(Debug, Clone, Copy)]
pub struct SampleConverter {
    encoding: SampleEncoding,
    endianness: Endianness,
}

impl SampleConverter {
    pub fn for_format(format: &AudioFormat) -> Self {
        Self {
            encoding: format.encoding(),
            endianness: format.endianness(),
        }
    }

    /// Byte footprint of one channel value in this encoding.
    pub fn bytes_per_channel_sample(&self) -> usize {
        self.encoding.bytes_per_channel_sample()
    }

    /// Decode `floats.len()` channel values from `bytes`.
    pub fn to_float(&self, bytes: &[u8], floats: &mut [f32]) {
        let width = self.bytes_per_channel_sample();
        debug_assert_eq!(bytes.len(), floats.len() * width, "buffer length mismatch");
        for (chunk, value) in bytes.chunks_exact(width).zip(floats.iter_mut()) {
            *value = self.decode_one(chunk);
        }
    }

    /// Encode `floats` into `bytes`, clamping values outside `[-1, 1]`.
    pub fn to_bytes(&self, floats: &[f32], bytes: &mut [u8]) {
        let width = self.bytes_per_channel_sample();
        debug_assert_eq!(bytes.len(), floats.len() * width, "buffer length mismatch");
        for (value, chunk) in floats.iter().zip(bytes.chunks_exact_mut(width)) {
            self.encode_one(*value, chunk);
        }
    }

    fn decode_one(&self, chunk: &[u8]) -> f32 {
        let little = self.endianness == Endianness::Little;
        match self.encoding {
            SampleEncoding::Pcm { bits: 8, signed } => {
                if signed {
                    chunk[0] as i8 as f32 / 128.0
                } else {
                    (chunk[0] as i16 - 128) as f32 / 128.0
                }
            }
            SampleEncoding::Pcm { bits: 16, signed } => {
                let v = if signed {
                    read_value(little, chunk, LittleEndian::read_i16, BigEndian::read_i16) as i32
                } else {
                    read_value(little, chunk, LittleEndian::read_u16, BigEndian::read_u16) as i32
                        - 32768
                };
                v as f32 / 32768.0
            }
            SampleEncoding::Pcm { bits: 24, signed } => {
                let v = if signed {
                    read_value(little, chunk, LittleEndian::read_i24, BigEndian::read_i24)
                } else {
                    read_value(little, chunk, LittleEndian::read_u24, BigEndian::read_u24) as i32
                        - 8_388_608
                };
                v as f32 / 8_388_608.0
            }
            SampleEncoding::Pcm { bits: 32, signed } => {
                let v = if signed {
                    read_value(little, chunk, LittleEndian::read_i32, BigEndian::read_i32) as i64
                } else {
                    read_value(little, chunk, LittleEndian::read_u32, BigEndian::read_u32) as i64
                        - 2_147_483_648
                };
                (v as f64 / 2_147_483_648.0) as f32
            }
            SampleEncoding::Float { bits: 32 } => {
                read_value(little, chunk, LittleEndian::read_f32, BigEndian::read_f32)
            }
            SampleEncoding::Float { bits: 64 } => {
                read_value(little, chunk, LittleEndian::read_f64, BigEndian::read_f64) as f32
            }
            _ => unreachable!("encoding validated on construction"),
        }
    }

    fn encode_one(&self, value: f32, chunk: &mut [u8]) {
        let little = self.endianness == Endianness::Little;
        match self.encoding {
            SampleEncoding::Pcm { bits: 8, signed } => {
                let v = scale_to_int(value, 128.0);
                chunk[0] = if signed { v as i8 as u8 } else { (v + 128) as u8 };
            }
            SampleEncoding::Pcm { bits: 16, signed } => {
                let v = scale_to_int(value, 32768.0);
                if signed {
                    write_value(little, chunk, v as i16, LittleEndian::write_i16, BigEndian::write_i16);
                } else {
                    let v = (v + 32768) as u16;
                    write_value(little, chunk, v, LittleEndian::write_u16, BigEndian::write_u16);
                }
            }
            SampleEncoding::Pcm { bits: 24, signed } => {
                let v = scale_to_int(value, 8_388_608.0) as i32;
                if signed {
                    write_value(little, chunk, v, LittleEndian::write_i24, BigEndian::write_i24);
                } else {
                    let v = (v + 8_388_608) as u32;
                    write_value(little, chunk, v, LittleEndian::write_u24, BigEndian::write_u24);
                }
            }
            SampleEncoding::Pcm { bits: 32, signed } => {
                let v = scale_to_int(value, 2_147_483_648.0);
                if signed {
                    write_value(little, chunk, v as i32, LittleEndian::write_i32, BigEndian::write_i32);
                } else {
                    let v = (v + 2_147_483_648) as u32;
                    write_value(little, chunk, v, LittleEndian::write_u32, BigEndian::write_u32);
                }
            }
            SampleEncoding::Float { bits: 32 } => {
                write_value(little, chunk, value, LittleEndian::write_f32, BigEndian::write_f32);
            }
            SampleEncoding::Float { bits: 64 } => {
                write_value(little, chunk, value as f64, LittleEndian::write_f64, BigEndian::write_f64);
            }
            _ => unreachable!("encoding validated on construction"),
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[inline]
fn read_value<T>(little: bool, chunk: &[u8], le: fn(&[u8]) -> T, be: fn(&[u8]) -> T) -> T {
    if little {
        le(chunk)
    } else {
        be(chunk)
    }
}

#[inline]
fn write_value<T>(little: bool, chunk: &mut [u8], value: T, le: fn(&mut [u8], T), be: fn(&mut [u8], T)) {
    if little {
        le(chunk, value)
    } else {
        be(chunk, value)
    }
}

/// Scale a normalized value to an integer range, rounding to nearest and clamping to the
/// representable range of a `scale` wide signed integer.
#[inline]
fn scale_to_int(value: f32, scale: f64) -> i64 {
    (value as f64 * scale).round().clamp(-scale, scale - 1.0) as i64
}

// -------------------------------------------------------------------------------------------------
