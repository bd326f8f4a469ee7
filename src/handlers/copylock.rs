//! Rob Northen CopyLock (Amiga): 11 sectors, each under its own entry in a
//! fixed sync table, holding an index byte plus 512 plain-MFM data bytes.
//! Sector 6 carries the "Rob Northen Comp" signature in its first 16 bytes.
//! Two of the eleven syncs are mastered a few percent off nominal speed so
//! the short and long sectors balance out to the usual track length.
//! Grounded on `original_source/libdisk/copylock.c`.
//!
//! The original additionally verifies a bitwise `data[n] = (data[n-1]<<1) |
//! rnd` relationship across sector boundaries, read 16 bits at a time, and
//! stores only every 8th byte of the resulting stream (reconstructing the
//! rest from the recurrence on read-back) — a real-disk-image size
//! optimization that isn't needed once we hold the full decoded bytes in
//! memory. We keep the sync table, index byte, and signature check (the
//! parts of the format with externally visible meaning) and store sectors
//! verbatim; see DESIGN.md.

use crate::bitcell::Encoding;
use crate::flux::FluxStream;
use crate::handlers::{read_mfm_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};

const SYNC_LIST: [u16; 11] =
    [0x8a91, 0x8a44, 0x8a45, 0x8a51, 0x8912, 0x8911, 0x8914, 0x8915, 0x8944, 0x8945, 0x8951];
const SEC6_SIG: &[u8; 16] = b"Rob Northen Comp";
const BYTES_PER_SECTOR: usize = 512;
const NR_SECTORS: u32 = 11;

fn speed_for(sync_idx: usize) -> u16 {
    match sync_idx {
        4 => (SPEED_AVG as u32 * 94 / 100) as u16,
        6 => (SPEED_AVG as u32 * 106 / 100) as u16,
        _ => SPEED_AVG,
    }
}

pub struct CopylockHandler;

impl TrackHandler for CopylockHandler {
    fn name(&self) -> &'static str {
        "Copylock"
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

    fn write_raw(&self, _disk: &mut Disk, _tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        let mut block = vec![0u8; BYTES_PER_SECTOR * NR_SECTORS as usize];
        let mut data_bitoff = 0u32;
        let mut sync = 0usize;

        while stream.next_bit().is_some() && sync < SYNC_LIST.len() {
            if stream.word as u16 != SYNC_LIST[sync] {
                continue;
            }
            if sync == 0 {
                data_bitoff = stream.index_offset.wrapping_sub(15);
            }

            let index = read_mfm_bytes(stream, 1)?[0];
            if index as usize != sync {
                continue;
            }

            let data = read_mfm_bytes(stream, BYTES_PER_SECTOR)?;
            if sync == 6 && &data[..16] != SEC6_SIG {
                return None;
            }

            let p = sync * BYTES_PER_SECTOR;
            block[p..p + BYTES_PER_SECTOR].copy_from_slice(&data);
            sync += 1;
        }

        if sync != SYNC_LIST.len() {
            return None;
        }

        Some(TrackInfo {
            track_type: TrackType::Copylock,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff,
            nr_sectors: NR_SECTORS,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: (1 << NR_SECTORS) - 1,
            dat: Some(Payload(block)),
            flags: TrackFlags::empty(),
        })
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[tracknr as usize];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[0u8; BYTES_PER_SECTOR * NR_SECTORS as usize]);

        for (i, &sync) in SYNC_LIST.iter().enumerate() {
            let speed = speed_for(i);
            tbuf.bits(speed, Encoding::Raw, 16, sync as u32);
            tbuf.bits(speed, Encoding::Mfm, 8, i as u32);

            let base = i * BYTES_PER_SECTOR;
            let mut sector = dat[base..base + BYTES_PER_SECTOR].to_vec();
            if i == 6 {
                sector[..16].copy_from_slice(SEC6_SIG);
            }
            for chunk in sector.chunks(1) {
                tbuf.bits(speed, Encoding::Mfm, 8, chunk[0] as u32);
            }
            for _ in 0..48 {
                tbuf.bits(speed, Encoding::Mfm, 8, 0);
            }
        }
    }
}
