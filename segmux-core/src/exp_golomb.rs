//! Exponential-Golomb bit reader for H.264/H.265 parameter sets.
//!
//! Keeps a 32-bit window refilled from the byte buffer. The only failure is
//! starvation, so callers must bound reads to the RBSP they were given.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bitstream exhausted")]
pub struct Exhausted;

pub struct ExpGolomb<'a> {
    data: &'a [u8],
    /// Next unread byte in `data`.
    position: usize,
    word: u32,
    bits_available: u32,
}

impl<'a> ExpGolomb<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            word: 0,
            bits_available: 0,
        }
    }

    fn bytes_remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Bits still readable, window included.
    pub fn bits_left(&self) -> usize {
        self.bytes_remaining() * 8 + self.bits_available as usize
    }

    fn load_word(&mut self) -> Result<(), Exhausted> {
        let available = self.bytes_remaining().min(4);
        if available == 0 {
            return Err(Exhausted);
        }
        let mut bytes = [0u8; 4];
        bytes[..available].copy_from_slice(&self.data[self.position..self.position + available]);
        self.word = u32::from_be_bytes(bytes);
        self.position += available;
        self.bits_available = available as u32 * 8;
        Ok(())
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<(), Exhausted> {
        let mut count = count;
        if self.bits_available as usize > count {
            self.word <<= count;
            self.bits_available -= count as u32;
            return Ok(());
        }
        count -= self.bits_available as usize;
        let skip_bytes = count / 8;
        if skip_bytes > self.bytes_remaining() {
            return Err(Exhausted);
        }
        self.position += skip_bytes;
        self.bits_available = 0;
        self.word = 0;
        let rest = count % 8;
        if rest > 0 {
            self.load_word()?;
            self.word <<= rest;
            self.bits_available -= rest as u32;
        }
        Ok(())
    }

    /// Read up to 32 bits, most significant first.
    pub fn read_bits(&mut self, count: u32) -> Result<u32, Exhausted> {
        debug_assert!(count <= 32);
        if count == 0 {
            return Ok(0);
        }
        let take = count.min(self.bits_available);
        let mut value = if take == 0 { 0 } else { self.word >> (32 - take) };
        self.bits_available -= take;
        self.word = if take == 32 { 0 } else { self.word << take };
        let remaining = count - take;
        if remaining > 0 {
            self.load_word()?;
            if self.bits_available < remaining {
                return Err(Exhausted);
            }
            let low = self.read_bits(remaining)?;
            value = if remaining == 32 { low } else { (value << remaining) | low };
        } else if self.bits_available == 0 && self.bytes_remaining() > 0 {
            self.load_word()?;
        }
        Ok(value)
    }

    fn skip_leading_zeros(&mut self) -> Result<u32, Exhausted> {
        let mut zeros = 0;
        loop {
            if self.bits_available == 0 {
                self.load_word()?;
            }
            let leading = self.word.leading_zeros().min(self.bits_available);
            if leading < self.bits_available {
                self.word <<= leading;
                self.bits_available -= leading;
                return Ok(zeros + leading);
            }
            zeros += leading;
            self.bits_available = 0;
            self.word = 0;
        }
    }

    pub fn skip_ueg(&mut self) -> Result<(), Exhausted> {
        let zeros = self.skip_leading_zeros()?;
        self.skip_bits(1 + zeros as usize)
    }

    pub fn skip_eg(&mut self) -> Result<(), Exhausted> {
        self.skip_ueg()
    }

    /// Unsigned Exp-Golomb, `ue(v)`.
    pub fn read_ueg(&mut self) -> Result<u32, Exhausted> {
        let zeros = self.skip_leading_zeros()?;
        if zeros > 31 {
            return Err(Exhausted);
        }
        let value = self.read_bits(zeros + 1)? as u64;
        Ok((value - 1) as u32)
    }

    /// Signed Exp-Golomb, `se(v)`.
    pub fn read_eg(&mut self) -> Result<i32, Exhausted> {
        let value = self.read_ueg()? as i64;
        if value & 1 == 1 {
            Ok(((1 + value) >> 1) as i32)
        } else {
            Ok(-(value >> 1) as i32)
        }
    }

    pub fn read_boolean(&mut self) -> Result<bool, Exhausted> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_ubyte(&mut self) -> Result<u8, Exhausted> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_ushort(&mut self) -> Result<u16, Exhausted> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_uint(&mut self) -> Result<u32, Exhausted> {
        self.read_bits(32)
    }
}
