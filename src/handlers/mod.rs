//! The track-handler library: per-format decoders/encoders sharing the
//! `TrackHandler` contract. Each module here is grounded on one file of
//! `examples/original_source/libdisk/*.c`; see DESIGN.md for the full
//! ledger.

pub mod amigados;
pub mod copylock;
pub mod gremlin;
pub mod ibm_fm;
pub mod ibm_mfm;
pub mod longtrack;
pub mod psygnosis;
pub mod rainbird;
pub mod registry;
pub mod rnc_pdos;
pub mod rnc_triformat;
pub mod unformatted;
pub mod weak_bits;

use crate::flux::FluxStream;
use crate::tbuf::TrackBuffer;
use crate::track::{Density, Disk, TrackInfo};

/// The uniform contract every track format implements (spec §4.4).
///
/// A handler must not retain a reference to the stream after `write_raw`
/// returns, nor to the tbuf after `read_raw` returns.
pub trait TrackHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn density(&self) -> Density;
    fn bytes_per_sector(&self) -> u32;
    fn nr_sectors(&self) -> u32;

    /// Scans `stream` for this format's sync marks, validates structure and
    /// checksums, and returns the allocated track-info (with `data_bitoff`
    /// set, and `total_bits`/`valid_sectors` set where applicable) on
    /// success.
    fn write_raw(&self, disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo>;

    /// Emits the MFM bit sequence that, parsed by `write_raw` on a clean
    /// stream, reconstructs the payload currently stored for this track.
    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer);

    /// Display name, for handlers whose name depends on the payload (e.g.
    /// IBM-MFM includes sector count/size). Defaults to `name()`.
    fn get_name(&self, _disk: &Disk, _tracknr: u32) -> String {
        self.name().to_string()
    }
}

/// Reads `n_bytes` bytes that were written with `Encoding::Mfm` (clock bits
/// interleaved) directly off the bit stream. Returns `None` at end of track.
pub fn read_mfm_bytes(stream: &mut FluxStream, n_bytes: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(n_bytes);
    for _ in 0..n_bytes {
        let mut byte = 0u8;
        for _ in 0..8 {
            stream.next_bit()?; // clock cell, discarded
            let d = stream.next_bit()?;
            byte = (byte << 1) | d;
        }
        out.push(byte);
    }
    Some(out)
}

/// Reads `n_bytes` decoded bytes written with `Encoding::MfmEvenOdd`: `n`
/// nibbles of even-indexed data bits, then `n` nibbles of odd-indexed data
/// bits, interleaved back into whole bytes (the AmigaDOS layout).
pub fn read_mfm_evenodd_bytes(stream: &mut FluxStream, n_bytes: usize) -> Option<Vec<u8>> {
    let read_nibble = |stream: &mut FluxStream| -> Option<u8> {
        let mut nib = 0u8;
        for _ in 0..4 {
            stream.next_bit()?;
            let d = stream.next_bit()?;
            nib = (nib << 1) | d;
        }
        Some(nib)
    };

    let mut evens = Vec::with_capacity(n_bytes);
    for _ in 0..n_bytes {
        evens.push(read_nibble(stream)?);
    }
    let mut odds = Vec::with_capacity(n_bytes);
    for _ in 0..n_bytes {
        odds.push(read_nibble(stream)?);
    }

    let mut out = Vec::with_capacity(n_bytes);
    for i in 0..n_bytes {
        let mut byte = 0u8;
        for bit in 0..4 {
            byte = (byte << 1) | ((evens[i] >> (3 - bit)) & 1);
            byte = (byte << 1) | ((odds[i] >> (3 - bit)) & 1);
        }
        out.push(byte);
    }
    Some(out)
}

/// Reads an `n`-bit value (n even) written by [`crate::tbuf::TrackBuffer::bits`]
/// with `Encoding::MfmEvenOdd`: `n/2` single-bit Mfm cells carrying the
/// even-indexed source bits (counting from the MSB), then `n/2` carrying the
/// odd-indexed bits, interleaved back into one value.
pub fn read_mfm_evenodd_bits(stream: &mut FluxStream, n: u32) -> Option<u32> {
    let half = n / 2;
    let odd_n = n - half;
    let mut even = 0u32;
    for _ in 0..half {
        stream.next_bit()?;
        let d = stream.next_bit()?;
        even = (even << 1) | d as u32;
    }
    let mut odd = 0u32;
    for _ in 0..odd_n {
        stream.next_bit()?;
        let d = stream.next_bit()?;
        odd = (odd << 1) | d as u32;
    }
    let mut out = 0u32;
    for i in 0..half {
        out = (out << 1) | ((even >> (half - 1 - i)) & 1);
        if i < odd_n {
            out = (out << 1) | ((odd >> (odd_n - 1 - i)) & 1);
        }
    }
    Some(out)
}

/// Second, optional contract for handlers that also participate in a
/// logical sector-level import/export path (ADF containers for AmigaDOS,
/// IMG containers for IBM-MFM). Most protection-track handlers never
/// implement this.
pub trait SectorHandler: TrackHandler {
    fn read_sectors(&self, disk: &Disk, tracknr: u32) -> Option<Vec<u8>>;
    fn write_sectors(&self, disk: &mut Disk, tracknr: u32, sectors: &[u8]) -> bool;
}
