//! Encoding of typed SunSpec point values into big-endian 16-bit registers.

/// Sentinel register values signalling "not implemented" for a point.
///
/// A point that carries no value must encode to the sentinel of its type,
/// never to zero: zero is a legitimate measurement.
pub const NOT_IMPLEMENTED_UINT16: u16 = 0xFFFF;
pub const NOT_IMPLEMENTED_ENUM16: u16 = 0xFFFF;
pub const NOT_IMPLEMENTED_UINT32: u32 = 0xFFFF_FFFF;
pub const NOT_IMPLEMENTED_BITFIELD32: u32 = 0xFFFF_FFFF;
/// Quiet NaN. Stored as the raw bit pattern so the encoding is exact
/// regardless of how the platform canonicalizes NaNs.
pub const NOT_IMPLEMENTED_FLOAT32: u32 = 0x7FC0_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Uint16,
    Uint32,
    Float32,
    /// A fixed-size string occupying this many registers (two bytes each).
    String(u16),
    Bitfield32,
    Enum16,
    /// A reserved filler register, always encoded as zero.
    Pad,
}

impl DataType {
    pub const fn words(self) -> u16 {
        match self {
            DataType::Uint16 | DataType::Enum16 | DataType::Pad => 1,
            DataType::Uint32 | DataType::Float32 | DataType::Bitfield32 => 2,
            DataType::String(length) => length,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DataType::Uint16 => f.write_str("uint16"),
            DataType::Uint32 => f.write_str("uint32"),
            DataType::Float32 => f.write_str("float32"),
            DataType::String(length) => f.write_fmt(format_args!("string({})", length)),
            DataType::Bitfield32 => f.write_str("bitfield32"),
            DataType::Enum16 => f.write_str("enum16"),
            DataType::Pad => f.write_str("pad"),
        }
    }
}

impl serde::Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Accumulates the register words of one SunSpec block.
///
/// Every `add`-style method appends exactly as many words as the point's
/// data type occupies, substituting the type's sentinel when the value is
/// absent. 32-bit quantities are split high word first (big-endian word
/// order).
pub struct BlockBuilder {
    words: Vec<u16>,
}

impl BlockBuilder {
    pub fn with_capacity(words: usize) -> Self {
        Self { words: Vec::with_capacity(words) }
    }

    fn split_u32(&mut self, bits: u32) {
        self.words.push((bits >> 16) as u16);
        self.words.push(bits as u16);
    }

    pub fn uint16(&mut self, value: Option<u16>) {
        self.words.push(value.unwrap_or(NOT_IMPLEMENTED_UINT16));
    }

    pub fn enum16(&mut self, value: Option<u16>) {
        self.words.push(value.unwrap_or(NOT_IMPLEMENTED_ENUM16));
    }

    pub fn uint32(&mut self, value: Option<u32>) {
        self.split_u32(value.unwrap_or(NOT_IMPLEMENTED_UINT32));
    }

    pub fn bitfield32(&mut self, value: Option<u32>) {
        self.split_u32(value.unwrap_or(NOT_IMPLEMENTED_BITFIELD32));
    }

    /// IEEE-754 bit pattern, high word first. Finite values round-trip
    /// exactly; an absent value encodes the quiet-NaN sentinel.
    pub fn float32(&mut self, value: Option<f32>) {
        self.split_u32(value.map(f32::to_bits).unwrap_or(NOT_IMPLEMENTED_FLOAT32));
    }

    /// UTF-8 bytes null-padded to exactly `length` registers. Input beyond
    /// `2 * length` bytes is silently dropped (at a byte, not character,
    /// boundary).
    pub fn string(&mut self, value: &str, length: u16) {
        let bytes = value.as_bytes();
        for i in 0..usize::from(length) {
            let hi = bytes.get(2 * i).copied().unwrap_or(0);
            let lo = bytes.get(2 * i + 1).copied().unwrap_or(0);
            self.words.push(u16::from_be_bytes([hi, lo]));
        }
    }

    pub fn pad(&mut self) {
        self.words.push(0);
    }

    pub fn finish(self) -> Vec<u16> {
        self.words
    }
}
