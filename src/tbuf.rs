//! The track-buffer encoder (`tbuf`): the write-side dual of [`crate::flux`].
//! Accepts directive-tagged bit/byte emissions, synthesizes MFM clock bits,
//! tracks a per-byte speed map and weak-bits bitmap, and produces the final
//! cell array a container writer commits to media.

use crate::bitcell::{mfm_encode_byte, Encoding};
use crate::util::crc16_ccitt_bit;
use bit_vec::BitVec;

/// Nominal speed value (1000 = 100% of nominal cell width), matching the
/// original source's `SPEED_AVG`.
pub const SPEED_AVG: u16 = 1000;

/// Everything `finalise()` hands to the container writer.
pub struct TrackBufferOutput {
    pub cells: BitVec,
    pub speed: Vec<u16>,
    pub weak: BitVec,
    pub crc16: u16,
}

pub struct TrackBuffer {
    cells: BitVec,
    weak: BitVec,
    speed: Vec<u16>,
    total_bits: usize,
    pos: usize,
    data_bitoff: usize,
    prev_data_bit: bool,
    crc16: u16,
    rng_state: u32,
}

impl TrackBuffer {
    /// Allocates buffers for `total_bits` cells. `pos := data_bitoff`,
    /// `prev_data_bit := 0`, `crc16 := 0xffff`.
    pub fn init(total_bits: usize, data_bitoff: usize, prng_seed: u32) -> Self {
        TrackBuffer {
            cells: BitVec::from_elem(total_bits, false),
            weak: BitVec::from_elem(total_bits, false),
            speed: vec![SPEED_AVG; total_bits.div_ceil(8)],
            total_bits,
            pos: data_bitoff % total_bits.max(1),
            data_bitoff,
            prev_data_bit: false,
            crc16: 0xffff,
            rng_state: prng_seed | 1,
        }
    }

    fn advance(&mut self) -> usize {
        let p = self.pos;
        self.pos = (self.pos + 1) % self.total_bits;
        p
    }

    fn mark_speed(&mut self, speed: u16) {
        let byte_idx = self.pos / 8;
        if let Some(slot) = self.speed.get_mut(byte_idx) {
            *slot = speed;
        }
    }

    fn push_cell(&mut self, speed: u16, bit: bool) {
        self.mark_speed(speed);
        let p = self.advance();
        self.cells.set(p, bit);
        self.crc16 = crc16_ccitt_bit(bit, self.crc16);
    }

    /// Emit `n` bits of `value` (taken from the low `n` bits, MSB-first)
    /// under the given encoding directive.
    pub fn bits(&mut self, speed: u16, enc: Encoding, n: u32, value: u32) {
        match enc {
            Encoding::Raw => {
                for i in (0..n).rev() {
                    self.push_cell(speed, (value >> i) & 1 != 0);
                }
            }
            Encoding::Mfm => {
                for i in (0..n).rev() {
                    let d = (value >> i) & 1 != 0;
                    let c = !(self.prev_data_bit || d);
                    self.push_cell(speed, c);
                    self.push_cell(speed, d);
                    self.prev_data_bit = d;
                }
            }
            Encoding::MfmEvenOdd => {
                let even_bits: Vec<bool> = (0..n).rev().step_by(2).map(|i| (value >> i) & 1 != 0).collect();
                let odd_bits: Vec<bool> = (0..n.saturating_sub(1)).rev().step_by(2).map(|i| (value >> i) & 1 != 0).collect();
                for d in even_bits.into_iter().chain(odd_bits) {
                    let c = !(self.prev_data_bit || d);
                    self.push_cell(speed, c);
                    self.push_cell(speed, d);
                    self.prev_data_bit = d;
                }
            }
        }
    }

    /// As [`Self::bits`], but for whole bytes.
    pub fn bytes(&mut self, speed: u16, enc: Encoding, src: &[u8]) {
        match enc {
            Encoding::Raw => {
                for &byte in src {
                    for i in (0..8).rev() {
                        self.push_cell(speed, (byte >> i) & 1 != 0);
                    }
                }
            }
            Encoding::Mfm => {
                for &byte in src {
                    let (word, new_prev) = mfm_encode_byte(byte, self.prev_data_bit);
                    self.push_cell_word(speed, word);
                    self.prev_data_bit = new_prev;
                }
            }
            Encoding::MfmEvenOdd => {
                // AmigaDOS layout: every even-indexed data bit across the
                // whole buffer, then every odd-indexed data bit.
                let mut even_bytes = Vec::with_capacity(src.len());
                let mut odd_bytes = Vec::with_capacity(src.len());
                for &byte in src {
                    let mut e = 0u8;
                    let mut o = 0u8;
                    for bit in 0..4 {
                        e = (e << 1) | ((byte >> (7 - 2 * bit)) & 1);
                        o = (o << 1) | ((byte >> (6 - 2 * bit)) & 1);
                    }
                    even_bytes.push(e);
                    odd_bytes.push(o);
                }
                for &nib in &even_bytes {
                    self.bits(speed, Encoding::Mfm, 4, nib as u32);
                }
                for &nib in &odd_bytes {
                    self.bits(speed, Encoding::Mfm, 4, nib as u32);
                }
            }
        }
    }

    fn push_cell_word(&mut self, speed: u16, word: u16) {
        for i in (0..16).rev() {
            self.push_cell(speed, (word >> i) & 1 != 0);
        }
    }

    /// Resets the running CRC seed.
    pub fn start_crc(&mut self) {
        self.crc16 = 0xffff;
    }

    pub fn crc16(&self) -> u16 {
        self.crc16
    }

    /// Overrides the running CRC, for formats that need to exclude a region
    /// (e.g. weak bits) from the checksum despite having pushed cells for it.
    pub fn set_crc16(&mut self, crc: u16) {
        self.crc16 = crc;
    }

    /// Emits the current running CRC as two MFM-encoded bytes.
    pub fn emit_crc16_ccitt(&mut self, speed: u16) {
        let crc = self.crc16;
        self.bytes(speed, Encoding::Mfm, &crc.to_be_bytes());
    }

    /// Advances `pos` by `n_cells` without writing meaningful data; filled
    /// with an MFM-legal dummy pattern so no spurious sync word can form.
    pub fn gap(&mut self, speed: u16, n_cells: u32) {
        for i in 0..n_cells {
            let d = i % 4 == 3;
            let c = !(self.prev_data_bit || d);
            self.push_cell(speed, c);
            self.prev_data_bit = d;
        }
    }

    /// Marks the next `n_cells` as weak (random at read-back time),
    /// advancing `pos` by `n_cells`.
    pub fn weak(&mut self, speed: u16, n_cells: u32) {
        for i in 0..n_cells {
            let d = i % 2 == 0;
            self.mark_speed(speed);
            let p = self.advance();
            self.cells.set(p, d);
            self.weak.set(p, true);
        }
    }

    /// Returns 16 bits from the encoder's deterministic PRNG.
    pub fn rnd16(&mut self) -> u16 {
        let mut out = 0u16;
        for _ in 0..16 {
            self.rng_state = self.rng_state.wrapping_mul(0x45d9_f3b);
            self.rng_state ^= self.rng_state >> 16;
            out = (out << 1) | (self.rng_state & 1) as u16;
        }
        out
    }

    /// Closes the track: fills the gap from `pos` around to `data_bitoff -
    /// 1` with legal MFM zero-cells, inserting a single 1-cell at the
    /// write-splice boundary.
    pub fn finalise(mut self) -> TrackBufferOutput {
        if self.total_bits > 0 && self.pos != self.data_bitoff {
            let gap_cells = (self.data_bitoff + self.total_bits - self.pos) % self.total_bits;
            for i in 0..gap_cells {
                let is_splice = i + 1 == gap_cells;
                let d = is_splice;
                let c = !(self.prev_data_bit || d);
                self.push_cell(SPEED_AVG, c);
                self.prev_data_bit = d;
            }
        }
        TrackBufferOutput {
            cells: self.cells,
            speed: self.speed,
            weak: self.weak,
            crc16: self.crc16,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn total_bits(&self) -> usize {
        self.total_bits
    }

    pub fn data_bitoff(&self) -> usize {
        self.data_bitoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_sets_pos_to_data_bitoff() {
        let tbuf = TrackBuffer::init(100_150, 1024, 1);
        assert_eq!(tbuf.pos(), 1024);
        assert_eq!(tbuf.crc16(), 0xffff);
    }

    #[test]
    fn mfm_rule_holds_for_emitted_bytes() {
        let mut tbuf = TrackBuffer::init(4096, 0, 7);
        tbuf.bytes(SPEED_AVG, Encoding::Mfm, &[0xff, 0x00, 0xaa, 0x55]);
        let out = tbuf.finalise();
        // Invariant 4: no 3 consecutive 1-cells, no 4 consecutive 0-cells,
        // outside Raw/weak regions.
        let mut run_ones = 0u32;
        let mut run_zeros = 0u32;
        for i in 0..64 {
            if out.cells[i] {
                run_ones += 1;
                run_zeros = 0;
                assert!(run_ones <= 3, "too many consecutive one-cells at {i}");
            } else {
                run_zeros += 1;
                run_ones = 0;
                assert!(run_zeros <= 4, "too many consecutive zero-cells at {i}");
            }
        }
    }

    #[test]
    fn emit_crc16_ccitt_round_trips_to_zero() {
        let mut tbuf = TrackBuffer::init(4096, 0, 3);
        tbuf.start_crc();
        tbuf.bytes(SPEED_AVG, Encoding::Mfm, b"abcdefgh");
        let crc = tbuf.crc16();
        let mut check = 0xffffu16;
        for &b in b"abcdefgh" {
            check = crate::util::crc16_ccitt_byte(b, check);
        }
        assert_eq!(crc, check);
    }

    #[test]
    fn finalise_closes_gap_to_data_bitoff() {
        let mut tbuf = TrackBuffer::init(200, 16, 1);
        tbuf.bytes(SPEED_AVG, Encoding::Raw, &[0xaa]);
        let out = tbuf.finalise();
        assert_eq!(out.cells.len(), 200);
    }

    #[test]
    fn weak_marks_bitmap() {
        let mut tbuf = TrackBuffer::init(64, 0, 9);
        tbuf.weak(SPEED_AVG, 10);
        let out = tbuf.finalise();
        assert!((0..10).all(|i| out.weak[i]));
    }

    #[test]
    fn rnd16_is_deterministic_for_a_given_seed() {
        let mut a = TrackBuffer::init(16, 0, 42);
        let mut b = TrackBuffer::init(16, 0, 42);
        assert_eq!(a.rnd16(), b.rnd16());
    }
}
