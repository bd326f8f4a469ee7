//! Psygnosis A: as Rainbird, but the track sync alternates between `0x4489`
//! and `0x4429` release-to-release; the payload carries the matched sync
//! word itself (as its last 2 bytes) so `read_raw` re-emits the same one.
//! Grounded on `original_source/libdisk/psygnosis_a.c`.

use crate::bitcell::Encoding;
use crate::flux::FluxStream;
use crate::handlers::{read_mfm_evenodd_bits, read_mfm_evenodd_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};

const SYNC_A: u16 = 0x4489;
const SYNC_B: u16 = 0x4429;
const SECTOR_BYTES: usize = 12 * 512;

fn xor_words(data: &[u8]) -> u32 {
    let mut csum = 0u32;
    for word in data.chunks_exact(4) {
        csum ^= u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }
    csum
}

fn fold_checksum(mut csum: u32) -> u32 {
    csum ^= csum >> 1;
    csum &= 0x5555_5555;
    csum
}

pub struct PsygnosisAHandler;

impl TrackHandler for PsygnosisAHandler {
    fn name(&self) -> &'static str {
        "Psygnosis A"
    }

    fn density(&self) -> Density {
        Density::Double
    }

    fn bytes_per_sector(&self) -> u32 {
        SECTOR_BYTES as u32
    }

    fn nr_sectors(&self) -> u32 {
        1
    }

    fn write_raw(&self, _disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        while stream.next_bit().is_some() {
            let sync = stream.word as u16;
            if sync != SYNC_A && sync != SYNC_B {
                continue;
            }
            let idx_off = stream.index_offset;

            let hdr = read_mfm_evenodd_bits(stream, 32)?;
            if hdr != 0xffff_ff00 | tracknr {
                continue;
            }
            let dat_checksum = read_mfm_evenodd_bits(stream, 32)?;

            let data = read_mfm_evenodd_bytes(stream, SECTOR_BYTES)?;
            if fold_checksum(xor_words(&data)) != dat_checksum {
                continue;
            }

            let mut block = data;
            block.extend_from_slice(&sync.to_be_bytes());

            return Some(TrackInfo {
                track_type: TrackType::PsygnosisA,
                total_bits: DEFAULT_BITS_PER_TRACK,
                data_bitoff: idx_off,
                nr_sectors: 1,
                bytes_per_sector: SECTOR_BYTES as u32,
                valid_sectors: 1,
                dat: Some(Payload(block)),
                flags: TrackFlags::empty(),
            });
        }
        None
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[tracknr as usize];
        let block = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[0u8; SECTOR_BYTES + 2]);
        let dat = &block[..SECTOR_BYTES];
        let sync = u16::from_be_bytes([block[SECTOR_BYTES], block[SECTOR_BYTES + 1]]);

        tbuf.bits(SPEED_AVG, Encoding::Raw, 16, sync as u32);
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 32, 0xffff_ff00 | tracknr);

        let mut csum = xor_words(dat);
        if info.valid_sectors == 0 {
            csum ^= 1;
        }
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 32, fold_checksum(csum));
        tbuf.bytes(SPEED_AVG, Encoding::MfmEvenOdd, dat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::PllMode;
    use crate::testutil::CellFlux;

    #[test]
    fn round_trips_through_flux_with_alternate_sync() {
        let mut dat = vec![0u8; SECTOR_BYTES];
        for (i, b) in dat.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let mut block = dat.clone();
        block.extend_from_slice(&SYNC_B.to_be_bytes());

        let mut disk = Disk::new(1);
        disk.tracks[0] = TrackInfo {
            track_type: TrackType::PsygnosisA,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff: 0,
            nr_sectors: 1,
            bytes_per_sector: SECTOR_BYTES as u32,
            valid_sectors: 1,
            dat: Some(Payload(block)),
            flags: TrackFlags::empty(),
        };

        let handler = PsygnosisAHandler;
        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 7);
        handler.read_raw(&disk, 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut fresh = Disk::new(1);
        let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("decode should succeed");
        assert_eq!(decoded.valid_sectors, 1);
        let block = decoded.dat.unwrap().0;
        assert_eq!(&block[..SECTOR_BYTES], dat.as_slice());
        assert_eq!(u16::from_be_bytes([block[SECTOR_BYTES], block[SECTOR_BYTES + 1]]), SYNC_B);
    }
}
