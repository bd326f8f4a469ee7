//! Rainbird: one giant AmigaDOS-style sector spanning the whole track, sync
//! `0x44894489`, header `0xffffff00 | tracknr`, checksum over the full
//! 5120-byte payload. Grounded on `original_source/libdisk/rainbird.c`.

use crate::bitcell::Encoding;
use crate::flux::FluxStream;
use crate::handlers::{read_mfm_evenodd_bits, read_mfm_evenodd_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};

const SYNC: u32 = 0x4489_4489;
const PAYLOAD_BYTES: usize = 5120;

fn xor_words(data: &[u8]) -> u32 {
    let mut csum = 0u32;
    for word in data.chunks_exact(4) {
        csum ^= u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }
    csum
}

/// XOR-fold a 32-bit checksum down to the half of its bits AmigaDOS-style
/// formats actually verify (`csum ^= csum>>1; csum &= 0x55555555`).
fn fold_checksum(mut csum: u32) -> u32 {
    csum ^= csum >> 1;
    csum &= 0x5555_5555;
    csum
}

pub struct RainbirdHandler;

impl TrackHandler for RainbirdHandler {
    fn name(&self) -> &'static str {
        "Rainbird"
    }

    fn density(&self) -> Density {
        Density::Double
    }

    fn bytes_per_sector(&self) -> u32 {
        PAYLOAD_BYTES as u32
    }

    fn nr_sectors(&self) -> u32 {
        1
    }

    fn write_raw(&self, _disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        while stream.next_bit().is_some() {
            if stream.word != SYNC {
                continue;
            }
            let idx_off = stream.index_offset;

            let hdr = read_mfm_evenodd_bits(stream, 32)?;
            if hdr != 0xffff_ff00 | tracknr {
                continue;
            }
            let dat_checksum = read_mfm_evenodd_bits(stream, 32)?;

            let data = read_mfm_evenodd_bytes(stream, PAYLOAD_BYTES)?;
            if fold_checksum(xor_words(&data)) != dat_checksum {
                continue;
            }

            return Some(TrackInfo {
                track_type: TrackType::Rainbird,
                total_bits: DEFAULT_BITS_PER_TRACK,
                data_bitoff: idx_off,
                nr_sectors: 1,
                bytes_per_sector: PAYLOAD_BYTES as u32,
                valid_sectors: 1,
                dat: Some(Payload(data)),
                flags: TrackFlags::empty(),
            });
        }
        None
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[tracknr as usize];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[0u8; PAYLOAD_BYTES]);

        tbuf.bits(SPEED_AVG, Encoding::Raw, 32, SYNC);
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 32, 0xffff_ff00 | tracknr);

        let mut csum = xor_words(dat);
        if info.valid_sectors == 0 {
            csum ^= 1;
        }
        tbuf.bits(SPEED_AVG, Encoding::MfmEvenOdd, 32, fold_checksum(csum));
        tbuf.bytes(SPEED_AVG, Encoding::MfmEvenOdd, dat);
    }
}
