/// Negotiated raw PCM format, immutable once the ring buffer is acquired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub channels: u16,
    /// bits per sample value as stored
    pub width: u8,
    /// significant bits, rounded up to a whole byte from width
    pub depth: u8,
    pub signed: bool,
    pub float: bool,
    pub big_endian: bool,
}

impl AudioFormat {
    /// Bytes of one interleaved sample across all channels.
    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.width / 8) * u32::from(self.channels)
    }

    /// The byte value silence is made of. Unsigned integer formats idle
    /// at mid-scale, everything else at zero.
    pub fn silence_byte(&self) -> u8 {
        if !self.float && !self.signed {
            0x80
        } else {
            0
        }
    }
}

/// A format request with unconstrained fields still open. `fixate`
/// resolves the open fields to the defaults used when upstream leaves
/// the choice to us.
#[derive(Debug, Copy, Clone, Default)]
pub struct PartialFormat {
    pub rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u8>,
    pub signed: Option<bool>,
    pub float: Option<bool>,
    pub big_endian: Option<bool>,
}

impl PartialFormat {
    pub fn fixate(self) -> AudioFormat {
        let width = self.width.unwrap_or(16);

        AudioFormat {
            rate: self.rate.unwrap_or(44100),
            channels: self.channels.unwrap_or(2),
            width,
            depth: round_up_byte(width),
            signed: self.signed.unwrap_or(true),
            float: self.float.unwrap_or(false),
            big_endian: self.big_endian.unwrap_or(cfg!(target_endian = "big")),
        }
    }
}

fn round_up_byte(width: u8) -> u8 {
    width.checked_add(7).expect("width overflow") & !7
}
