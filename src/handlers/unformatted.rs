//! Fallback handler for tracks that never were formatted: the cell stream
//! looks like noise rather than any legal encoding. Accepted once at least
//! 10% of the track's 1000-cell blocks violate the MFM run-length rule (no
//! run of more than 3 one-cells, no run of more than 4 zero-cells).
//! Strictly last in the candidate list (spec's dispatch tie-break). Grounded
//! on `original_source/libdisk/unformatted.c`.

use crate::bitcell::Encoding;
use crate::flux::FluxStream;
use crate::handlers::TrackHandler;
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, TrackFlags, TrackInfo, TrackType, WEAK_SENTINEL};

const BLOCK_CELLS: u32 = 1000;
const VIOLATION_FRACTION: f64 = 0.10;

pub struct UnformattedHandler;

impl TrackHandler for UnformattedHandler {
    fn name(&self) -> &'static str {
        "Unformatted"
    }

    fn density(&self) -> Density {
        Density::Double
    }

    fn bytes_per_sector(&self) -> u32 {
        0
    }

    fn nr_sectors(&self) -> u32 {
        0
    }

    fn write_raw(&self, _disk: &mut Disk, _tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        let mut total_blocks = 0u32;
        let mut bad_blocks = 0u32;
        let mut run_ones = 0u32;
        let mut run_zeros = 0u32;
        let mut cells_in_block = 0u32;
        let mut block_bad = false;

        while let Some(bit) = stream.next_bit() {
            if bit == 1 {
                run_ones += 1;
                run_zeros = 0;
                if run_ones > 3 {
                    block_bad = true;
                }
            } else {
                run_zeros += 1;
                run_ones = 0;
                if run_zeros > 4 {
                    block_bad = true;
                }
            }

            cells_in_block += 1;
            if cells_in_block == BLOCK_CELLS {
                total_blocks += 1;
                if block_bad {
                    bad_blocks += 1;
                }
                cells_in_block = 0;
                block_bad = false;
            }
        }

        if total_blocks == 0 || (bad_blocks as f64) < VIOLATION_FRACTION * total_blocks as f64 {
            return None;
        }

        Some(TrackInfo {
            track_type: TrackType::Unformatted,
            total_bits: WEAK_SENTINEL,
            data_bitoff: 0,
            nr_sectors: 0,
            bytes_per_sector: 0,
            valid_sectors: 0,
            dat: None,
            flags: TrackFlags::empty(),
        })
    }

    fn read_raw(&self, _disk: &Disk, _tracknr: u32, tbuf: &mut TrackBuffer) {
        let mut remaining = tbuf.total_bits() as u32;
        while remaining > 0 {
            let n = remaining.min(16);
            let word = tbuf.rnd16();
            tbuf.bits(SPEED_AVG, Encoding::Raw, n, (word >> (16 - n)) as u32);
            remaining -= n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::PllMode;
    use crate::testutil::CellFlux;
    use crate::track::DEFAULT_BITS_PER_TRACK;

    #[test]
    fn noise_track_round_trips_as_unformatted() {
        let handler = UnformattedHandler;
        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 99);
        handler.read_raw(&Disk::new(1), 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut disk = Disk::new(1);
        let decoded = handler.write_raw(&mut disk, 0, &mut stream);
        assert!(decoded.is_some());
        assert_eq!(decoded.unwrap().track_type, TrackType::Unformatted);
    }

    #[test]
    fn clean_mfm_track_is_rejected() {
        let handler = UnformattedHandler;
        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 1);
        tbuf.bytes(SPEED_AVG, Encoding::Mfm, &vec![0x55u8; DEFAULT_BITS_PER_TRACK as usize / 16]);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut disk = Disk::new(1);
        assert!(handler.write_raw(&mut disk, 0, &mut stream).is_none());
    }
}
