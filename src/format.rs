//! Audio format negotiation and fixation.
//!
//! Upstream describes what it can produce with an [`AudioFormat`] in which
//! any field may be left open. [`AudioFormat::fixate`] fills the open
//! fields with this sink's defaults, producing the [`FixedFormat`] the ring
//! buffer is acquired with.

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// The byte order of the machine we are running on.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }
}

/// A possibly under-specified audio format, as offered by upstream.
///
/// Fields left as `None` are choices upstream does not care about; the sink
/// fills them in during fixation.
#[derive(Debug, Clone, Default)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub rate: Option<u32>,
    /// Interleaved channel count.
    pub channels: Option<u16>,
    /// Bits used per sample value.
    pub width: Option<u32>,
    /// Bits of resolution inside `width` (integer formats).
    pub depth: Option<u32>,
    /// Whether samples are signed.
    pub signed: Option<bool>,
    /// Sample byte order.
    pub endianness: Option<Endianness>,
}

impl AudioFormat {
    /// Resolves all open fields to this sink's defaults.
    ///
    /// Open fields fixate to: rate 44100, 2 channels, width 16, depth =
    /// width rounded up to the next multiple of 8, signed samples, native
    /// byte order.
    ///
    /// # Example
    ///
    /// ```
    /// use render_audio::AudioFormat;
    ///
    /// let fixed = AudioFormat { rate: Some(48000), ..Default::default() }.fixate();
    /// assert_eq!(fixed.rate, 48000);
    /// assert_eq!(fixed.channels, 2);
    /// assert_eq!(fixed.bytes_per_sample(), 4);
    /// ```
    pub fn fixate(&self) -> FixedFormat {
        let rate = self.rate.unwrap_or(44100);
        let channels = self.channels.unwrap_or(2);
        let width = self.width.unwrap_or(16);
        // depth defaults to the width rounded up to whole bytes
        let depth = self.depth.unwrap_or((width + 7) & !7);
        let signed = self.signed.unwrap_or(true);
        let endianness = self.endianness.unwrap_or_else(Endianness::native);

        FixedFormat {
            rate,
            channels,
            width,
            depth,
            signed,
            endianness,
        }
    }
}

/// A fully-specified audio format, ready to acquire a ring buffer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFormat {
    /// Sample rate in Hz.
    pub rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample value.
    pub width: u32,
    /// Bits of resolution inside `width`.
    pub depth: u32,
    /// Whether samples are signed.
    pub signed: bool,
    /// Sample byte order.
    pub endianness: Endianness,
}

impl FixedFormat {
    /// Size in bytes of one frame (one sample value per channel).
    pub fn bytes_per_sample(&self) -> u32 {
        (self.width / 8) * u32::from(self.channels)
    }
}
