//! MSB-first bit streams with the trailing bit-count byte.
//!
//! A packed stream is the data bits padded with zeros to a byte boundary,
//! followed by one byte holding how many bits of the last data byte are
//! significant (1 to 8). An empty stream packs to no bytes at all.

/// Accumulates bits MSB-first.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    /// Completed bytes
    bytes: Vec<u8>,
    /// Current partial byte, MSB-aligned
    bit_buffer: u8,
    /// Bits in `bit_buffer` (0-7)
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the lowest `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, count: u8) {
        debug_assert!(count <= 32);
        for shift in (0..count).rev() {
            let bit = ((value >> shift) & 1) as u8;
            self.bit_buffer |= bit << (7 - self.bit_count);
            self.bit_count += 1;
            if self.bit_count == 8 {
                self.bytes.push(self.bit_buffer);
                self.bit_buffer = 0;
                self.bit_count = 0;
            }
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u32, 1);
    }

    /// Total number of bits written.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.bit_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len() == 0
    }

    /// Pad and append the trailing bit-count byte.
    pub fn finish_packed(mut self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let valid_in_last = if self.bit_count == 0 { 8 } else { self.bit_count };
        if self.bit_count > 0 {
            self.bytes.push(self.bit_buffer);
        }
        self.bytes.push(valid_in_last);
        self.bytes
    }
}

/// Reads bits MSB-first up to a known bit length.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Current bit position (0 = MSB of first byte)
    bit_position: usize,
    /// Number of significant bits in `data`
    bit_len: usize,
}

impl<'a> BitReader<'a> {
    /// Reader over a packed stream.
    ///
    /// Inputs shorter than two bytes, or whose trailing count is outside
    /// 1..=8, read as an empty stream.
    pub fn from_packed(packed: &'a [u8]) -> Self {
        let empty = Self { data: packed, bit_position: 0, bit_len: 0 };
        let Some((&valid_in_last, data)) = packed.split_last() else {
            return empty;
        };
        if data.is_empty() || !(1..=8).contains(&valid_in_last) {
            return empty;
        }
        Self {
            data,
            bit_position: 0,
            bit_len: (data.len() - 1) * 8 + valid_in_last as usize,
        }
    }

    /// Read `count` bits, or `None` if fewer remain.
    pub fn read_bits(&mut self, count: u8) -> Option<u32> {
        if count as usize > self.bits_remaining() {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self.data[self.bit_position / 8];
            let bit = (byte >> (7 - self.bit_position % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.bit_position += 1;
        }
        Some(value)
    }

    pub fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    pub fn bits_remaining(&self) -> usize {
        self.bit_len - self.bit_position
    }

    pub fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }
}
