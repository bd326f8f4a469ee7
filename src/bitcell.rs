//! MFM/FM cell <-> data conversion.
//!
//! A *data bit* `d` at cell position `2k+1` is preceded by a *clock bit* `c`
//! at cell `2k`, where `c = !(prev_data | d)`. FM is the degenerate case
//! where the clock bit is always 1 (one data bit per cell pair, no
//! clock-suppression rule).

use crate::error::FluxError;

/// Selects how a run of bytes is laid out as MFM cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Cells are copied verbatim; no clock bits are synthesized or stripped.
    /// Used for sync words, whose whole pattern is specified literally.
    Raw,
    /// Standard MFM: each source byte is 8 encoded cells = 4 data bits; two
    /// source bytes of cells decode to one data byte.
    Mfm,
    /// AmigaDOS convention: `n` bytes of even-indexed data bits followed by
    /// `n` bytes of odd-indexed data bits, interleaved on decode.
    MfmEvenOdd,
}

/// Extract the 8 data bits from a 16-cell MFM word (clock bits discarded).
pub fn mfm_decode_word(w16: u16) -> u8 {
    let mut out = 0u8;
    for i in 0..8 {
        // Each source bit occupies the even-numbered cell of its (clock,
        // data) pair, counting from the LSB; the pair for bit `i` (MSB
        // first) sits at cell offset 2*(7-i).
        let data_bit = (w16 >> (2 * (7 - i))) & 1;
        out |= (data_bit as u8) << (7 - i);
    }
    out
}

/// Encode one data byte into a 16-cell MFM word, given the preceding data
/// bit (the last data bit emitted by the previous byte, or the track's
/// initial condition at `0`). Returns the word and the new trailing data bit.
pub fn mfm_encode_byte(byte: u8, prev_data_bit: bool) -> (u16, bool) {
    let mut word = 0u16;
    let mut prev = prev_data_bit;
    for i in 0..8 {
        let d = (byte >> (7 - i)) & 1 != 0;
        let c = !(prev || d);
        word = (word << 2) | ((c as u16) << 1) | (d as u16);
        prev = d;
    }
    (word, prev)
}

/// Extract the 4 data bits from an 8-cell MFM nibble (clock bits discarded).
/// Used by the `MfmEvenOdd` encoding, where each plane element carries half
/// a data byte.
pub fn mfm_decode_nibble(cell_byte: u8) -> u8 {
    let mut out = 0u8;
    for i in 0..4 {
        let data_bit = (cell_byte >> (2 * (3 - i))) & 1;
        out |= (data_bit as u8) << (3 - i);
    }
    out
}

/// Encode a 4-bit nibble into an 8-cell MFM byte, threading `prev_data_bit`
/// the same way [`mfm_encode_byte`] does.
pub fn mfm_encode_nibble(nibble: u8, prev_data_bit: bool) -> (u8, bool) {
    let mut cell_byte = 0u8;
    let mut prev = prev_data_bit;
    for i in 0..4 {
        let d = (nibble >> (3 - i)) & 1 != 0;
        let c = !(prev || d);
        cell_byte = (cell_byte << 2) | ((c as u8) << 1) | (d as u8);
        prev = d;
    }
    (cell_byte, prev)
}

/// Decode one FM-encoded byte (16 cells, clock bit always the even cell,
/// always 1) into its data byte.
pub fn fm_decode_word(w16: u16) -> u8 {
    mfm_decode_word(w16)
}

/// Encode one data byte into a 16-cell FM word: clock cells are fixed at 1,
/// so there is no clock-suppression rule and no dependency on `prev_data_bit`.
pub fn fm_encode_byte(byte: u8) -> u16 {
    let mut word = 0u16;
    for i in 0..8 {
        let d = (byte >> (7 - i)) & 1;
        word = (word << 2) | (1 << 1) | d as u16;
    }
    word
}

/// Decode `n_bytes` of FM-encoded output from `src` (16 cells per byte,
/// clock cells discarded). The FM counterpart of [`mfm_decode_bytes`]'s
/// `Mfm` arm; FM has no even/odd-plane convention.
pub fn fm_decode_bytes(n_bytes: usize, src: &[u8]) -> Result<Vec<u8>, FluxError> {
    if n_bytes < 1 {
        return Err(FluxError::BadLength("fm_decode_bytes: n_bytes < 1".into()));
    }
    if src.len() < n_bytes * 2 {
        return Err(FluxError::BadLength("fm_decode_bytes: short source".into()));
    }
    let mut out = Vec::with_capacity(n_bytes);
    for i in 0..n_bytes {
        let w16 = u16::from_be_bytes([src[2 * i], src[2 * i + 1]]);
        out.push(fm_decode_word(w16));
    }
    Ok(out)
}

/// Encodes `src` as FM cells: clock cells fixed at 1, no `prev_data_bit`
/// dependency.
pub fn fm_encode_bytes(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * 2);
    for &byte in src {
        out.extend_from_slice(&fm_encode_byte(byte).to_be_bytes());
    }
    out
}

/// Decode `n_bytes` of output from `src`, honoring `encoding`. `src` is a
/// cell-bit source already split into bytes of *cells* (16 cells per decoded
/// byte for Mfm, 8 cells per raw byte for Raw).
pub fn mfm_decode_bytes(encoding: Encoding, n_bytes: usize, src: &[u8]) -> Result<Vec<u8>, FluxError> {
    if n_bytes < 1 {
        return Err(FluxError::BadLength("mfm_decode_bytes: n_bytes < 1".into()));
    }
    match encoding {
        Encoding::Raw => Ok(src[..n_bytes].to_vec()),
        Encoding::Mfm => {
            if src.len() < n_bytes * 2 {
                return Err(FluxError::BadLength("mfm_decode_bytes: short source".into()));
            }
            let mut out = Vec::with_capacity(n_bytes);
            for i in 0..n_bytes {
                let w16 = u16::from_be_bytes([src[2 * i], src[2 * i + 1]]);
                out.push(mfm_decode_word(w16));
            }
            Ok(out)
        }
        Encoding::MfmEvenOdd => {
            // `n_bytes` even-plane cell bytes (one 8-cell nibble each),
            // followed by `n_bytes` odd-plane cell bytes.
            if src.len() < n_bytes * 2 {
                return Err(FluxError::BadLength("mfm_decode_bytes: short source".into()));
            }
            let mut out = Vec::with_capacity(n_bytes);
            for i in 0..n_bytes {
                let e = mfm_decode_nibble(src[i]);
                let o = mfm_decode_nibble(src[n_bytes + i]);
                let mut byte = 0u8;
                for bit in 0..4 {
                    byte = (byte << 1) | ((e >> (3 - bit)) & 1);
                    byte = (byte << 1) | ((o >> (3 - bit)) & 1);
                }
                out.push(byte);
            }
            Ok(out)
        }
    }
}

/// Encode `src` (`n_bytes` data bytes) as cells, inserting clock bits per
/// `encoding`. `prev_data_bit` is the last data bit emitted before this call
/// and is threaded through so clock suppression is correct across calls.
/// Returns the cell bytes and the new trailing data bit.
pub fn mfm_encode_bytes(
    encoding: Encoding,
    src: &[u8],
    prev_data_bit: bool,
) -> Result<(Vec<u8>, bool), FluxError> {
    if src.is_empty() {
        return Err(FluxError::BadLength("mfm_encode_bytes: empty source".into()));
    }
    match encoding {
        Encoding::Raw => Ok((src.to_vec(), prev_data_bit)),
        Encoding::Mfm => {
            let mut out = Vec::with_capacity(src.len() * 2);
            let mut prev = prev_data_bit;
            for &byte in src {
                let (word, new_prev) = mfm_encode_byte(byte, prev);
                out.extend_from_slice(&word.to_be_bytes());
                prev = new_prev;
            }
            Ok((out, prev))
        }
        Encoding::MfmEvenOdd => {
            // Emission order matches the tbuf encoder: every even-plane
            // nibble (in byte order), then every odd-plane nibble - not an
            // interleave of the two within one source byte.
            let mut evens = Vec::with_capacity(src.len());
            let mut odds = Vec::with_capacity(src.len());
            for &byte in src {
                let mut e = 0u8;
                let mut o = 0u8;
                for bit in 0..4 {
                    e = (e << 1) | ((byte >> (7 - 2 * bit)) & 1);
                    o = (o << 1) | ((byte >> (6 - 2 * bit)) & 1);
                }
                evens.push(e);
                odds.push(o);
            }
            let mut prev = prev_data_bit;
            let mut out = Vec::with_capacity(src.len() * 2);
            for nib in evens {
                let (cell, new_prev) = mfm_encode_nibble(nib, prev);
                out.push(cell);
                prev = new_prev;
            }
            for nib in odds {
                let (cell, new_prev) = mfm_encode_nibble(nib, prev);
                out.push(cell);
                prev = new_prev;
            }
            Ok((out, prev))
        }
    }
}
