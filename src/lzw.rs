//! GIF-flavoured LZW compression.
//!
//! Variable-width codes up to 12 bits, packed LSB-first and framed in GIF
//! sub-blocks. The string table is an open-addressing hash with a relatively
//! prime secondary probe, as in the classic `compress` utility. When the
//! table fills up a CLEAR code is emitted and coding restarts.

use std::io::{self, Write};

const MAX_BITS: u32 = 12;
const MAX_CODE_LIMIT: u32 = 1 << MAX_BITS;
const HASH_SIZE: usize = 5003;
/// `(byte << HASH_SHIFT) ^ prefix` is the primary probe.
const HASH_SHIFT: u32 = 4;
/// Largest payload of one sub-block. GIF allows 255; 254 is what we emit.
const BLOCK_LEN: usize = 254;
const EMPTY: i32 = -1;

/// Reusable encoder; keeps its tables between calls to avoid reallocating.
#[derive(Debug, Clone)]
pub struct LzwEncoder {
    hash_tab: Box<[i32]>,
    code_tab: Box<[u16]>,
}

impl Default for LzwEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzwEncoder {
    pub fn new() -> Self {
        Self {
            hash_tab: vec![EMPTY; HASH_SIZE].into_boxed_slice(),
            code_tab: vec![0; HASH_SIZE].into_boxed_slice(),
        }
    }

    /// Compress `indices` into `out` as GIF image data: the code size byte,
    /// the data sub-blocks, then a zero-length terminator.
    ///
    /// `min_code_size` must be in `2..=8` and every index must be below
    /// `2^min_code_size`.
    pub fn encode<W: Write>(
        &mut self,
        indices: &[u8],
        min_code_size: u8,
        out: &mut W,
    ) -> io::Result<()> {
        if !(2..=8).contains(&min_code_size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("LZW minimum code size {min_code_size} is outside 2..=8"),
            ));
        }
        let clear_code = 1u32 << min_code_size;
        if let Some(&bad) = indices.iter().find(|&&i| u32::from(i) >= clear_code) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("index {bad} does not fit a {min_code_size}-bit code"),
            ));
        }

        out.write_all(&[min_code_size])?;
        let mut state = CodeWriter::new(out, u32::from(min_code_size) + 1);
        self.hash_tab.fill(EMPTY);
        state.write_code(clear_code)?;

        let mut resets = 0u32;
        let mut bytes = indices.iter().map(|&b| u32::from(b));
        if let Some(first) = bytes.next() {
            let mut prefix = first;
            for byte in bytes {
                let fcode = ((byte << MAX_BITS) + prefix) as i32;
                let mut i = ((byte << HASH_SHIFT) ^ prefix) as usize;

                if self.hash_tab[i] == fcode {
                    prefix = u32::from(self.code_tab[i]);
                    continue;
                }
                if self.hash_tab[i] >= 0 {
                    let disp = if i == 0 { 1 } else { HASH_SIZE - i };
                    let mut found = false;
                    loop {
                        i = (i + HASH_SIZE - disp) % HASH_SIZE;
                        if self.hash_tab[i] == fcode {
                            found = true;
                            break;
                        }
                        if self.hash_tab[i] < 0 {
                            break;
                        }
                    }
                    if found {
                        prefix = u32::from(self.code_tab[i]);
                        continue;
                    }
                }

                state.write_code(prefix)?;
                prefix = byte;
                if state.free_entry < MAX_CODE_LIMIT {
                    self.code_tab[i] = state.free_entry as u16;
                    self.hash_tab[i] = fcode;
                    state.free_entry += 1;
                } else {
                    self.hash_tab.fill(EMPTY);
                    state.free_entry = clear_code + 2;
                    state.clear_flag = true;
                    state.write_code(clear_code)?;
                    resets += 1;
                }
            }
            state.write_code(prefix)?;
        }
        state.write_code(clear_code + 1)?;
        state.flush_bits()?;
        state.out.write_all(&[0])?;

        tracing::trace!(
            pixels = indices.len(),
            min_code_size,
            resets,
            "lzw block encoded"
        );
        Ok(())
    }
}

/// Compress `indices` with a fresh encoder. See [`LzwEncoder::encode`].
pub fn compress<W: Write>(indices: &[u8], min_code_size: u8, out: &mut W) -> io::Result<()> {
    LzwEncoder::new().encode(indices, min_code_size, out)
}

/// Packs variable-width codes into sub-blocks and tracks the code width.
struct CodeWriter<'w, W: Write> {
    out: &'w mut W,
    init_bits: u32,
    n_bits: u32,
    max_code: u32,
    free_entry: u32,
    clear_flag: bool,
    acc: u32,
    acc_bits: u32,
    block: [u8; BLOCK_LEN],
    block_len: usize,
}

impl<'w, W: Write> CodeWriter<'w, W> {
    fn new(out: &'w mut W, init_bits: u32) -> Self {
        Self {
            out,
            init_bits,
            n_bits: init_bits,
            max_code: max_code(init_bits),
            free_entry: (1 << (init_bits - 1)) + 2,
            clear_flag: false,
            acc: 0,
            acc_bits: 0,
            block: [0; BLOCK_LEN],
            block_len: 0,
        }
    }

    fn write_code(&mut self, code: u32) -> io::Result<()> {
        self.acc |= code << self.acc_bits;
        self.acc_bits += self.n_bits;
        while self.acc_bits >= 8 {
            self.put_byte(self.acc as u8)?;
            self.acc >>= 8;
            self.acc_bits -= 8;
        }

        // The width changes only after the code that triggered it is out.
        if self.clear_flag {
            self.n_bits = self.init_bits;
            self.max_code = max_code(self.n_bits);
            self.clear_flag = false;
        } else if self.free_entry > self.max_code {
            self.n_bits += 1;
            self.max_code = if self.n_bits == MAX_BITS {
                MAX_CODE_LIMIT
            } else {
                max_code(self.n_bits)
            };
        }
        Ok(())
    }

    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        self.block[self.block_len] = byte;
        self.block_len += 1;
        if self.block_len == BLOCK_LEN {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.block_len > 0 {
            self.out.write_all(&[self.block_len as u8])?;
            self.out.write_all(&self.block[..self.block_len])?;
            self.block_len = 0;
        }
        Ok(())
    }

    /// Emit the partial last byte and the pending sub-block.
    fn flush_bits(&mut self) -> io::Result<()> {
        if self.acc_bits > 0 {
            self.put_byte(self.acc as u8)?;
            self.acc = 0;
            self.acc_bits = 0;
        }
        self.flush_block()
    }
}

#[inline]
fn max_code(n_bits: u32) -> u32 {
    (1 << n_bits) - 1
}
