//! Gremlin Graphics (Lotus I/II/III, Harlequin): triple sync `0x4489` plus
//! `0x5555`, word-level odd/even MFM interleave (each 16-bit word split
//! across its own even/odd cell pair rather than AmigaDOS's whole-buffer
//! split), a running 16-bit sum checksum, and a track number stored with
//! side 0/1 inverted. Grounded on `original_source/libdisk/gremlin.c`.

use crate::flux::FluxStream;
use crate::handlers::{read_mfm_evenodd_bits, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};

const NR_SECTORS: u32 = 12;
const BYTES_PER_SECTOR: usize = 512;
const TOTAL_BYTES: usize = BYTES_PER_SECTOR * NR_SECTORS as usize;

pub struct GremlinHandler;

impl TrackHandler for GremlinHandler {
    fn name(&self) -> &'static str {
        "Gremlin Graphics"
    }

    fn density(&self) -> Density {
        Density::Double
    }

    fn bytes_per_sector(&self) -> u32 {
        BYTES_PER_SECTOR as u32
    }

    fn nr_sectors(&self) -> u32 {
        NR_SECTORS
    }

    fn write_raw(&self, _disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        while stream.next_bit().is_some() {
            if stream.word as u16 != 0x4489 {
                continue;
            }
            if stream.next_bits(32)? != 0x4489_4489 {
                continue;
            }
            if stream.next_bits(16)? as u16 != 0x5555 {
                continue;
            }
            let idx_off = stream.index_offset.wrapping_sub(63);

            let mut block = vec![0u8; TOTAL_BYTES];
            let mut csum: u16 = 0;
            for word in block.chunks_exact_mut(2) {
                let v = read_mfm_evenodd_bits(stream, 16)? as u16;
                csum = csum.wrapping_add(v);
                word.copy_from_slice(&v.to_be_bytes());
            }

            let stored_csum = read_mfm_evenodd_bits(stream, 16)? as u16;
            if stored_csum != csum {
                continue;
            }

            let trk = read_mfm_evenodd_bits(stream, 16)? as u16;
            if trk != (tracknr as u16 ^ 1) {
                continue;
            }

            return Some(TrackInfo {
                track_type: TrackType::GremlinGraphics,
                total_bits: DEFAULT_BITS_PER_TRACK,
                data_bitoff: idx_off,
                nr_sectors: NR_SECTORS,
                bytes_per_sector: BYTES_PER_SECTOR as u32,
                valid_sectors: (1 << NR_SECTORS) - 1,
                dat: Some(Payload(block)),
                flags: TrackFlags::empty(),
            });
        }
        None
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        use crate::bitcell::Encoding;

        let info = &disk.tracks[tracknr as usize];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[0u8; TOTAL_BYTES]);

        tbuf.bits(SPEED_AVG, Encoding::Raw, 16, 0x4489);
        tbuf.bits(SPEED_AVG, Encoding::Raw, 16, 0x4489);
        tbuf.bits(SPEED_AVG, Encoding::Raw, 16, 0x4489);
        tbuf.bits(SPEED_AVG, Encoding::Raw, 16, 0x5555);

        let mut csum: u16 = 0;
        for word in dat.chunks_exact(2) {
            let v = u16::from_be_bytes([word[0], word[1]]);
            csum = csum.wrapping_add(v);
            tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 16, v as u32);
        }

        if info.valid_sectors != (1 << NR_SECTORS) - 1 {
            csum ^= 1;
        }
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 16, csum as u32);
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 16, (tracknr as u16 ^ 1) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::PllMode;
    use crate::testutil::CellFlux;

    #[test]
    fn round_trips_through_flux_on_inverted_side() {
        let mut dat = vec![0u8; TOTAL_BYTES];
        for (i, b) in dat.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let mut disk = Disk::new(3);
        disk.tracks[2] = TrackInfo {
            track_type: TrackType::GremlinGraphics,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff: 0,
            nr_sectors: NR_SECTORS,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: (1 << NR_SECTORS) - 1,
            dat: Some(Payload(dat.clone())),
            flags: TrackFlags::empty(),
        };

        let handler = GremlinHandler;
        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 9);
        handler.read_raw(&disk, 2, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(2).unwrap();

        let mut fresh = Disk::new(3);
        let decoded = handler.write_raw(&mut fresh, 2, &mut stream).expect("decode should succeed");
        assert_eq!(decoded.valid_sectors, (1 << NR_SECTORS) - 1);
        assert_eq!(decoded.dat.unwrap().0, dat);
    }
}
