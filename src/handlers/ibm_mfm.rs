//! IBM System/34 MFM: 9 (DD) or 18 (HD) 512-byte sectors. IAM (optional),
//! then per-sector IDAM (`0x4489 0x4489 0x4489 0xfe, cyl,hd,sec,no, crc16`)
//! and DAM (`...0xfb, data, crc16`). Grounded on
//! `original_source/libdisk/ibm_pc.c`.

use crate::bitcell::{mfm_decode_word, Encoding};
use crate::flux::FluxStream;
use crate::handlers::{read_mfm_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType};

const IAM_SYNC: u32 = 0x5224_5224;
const IAM_MARK: u32 = 0x5224_5552;
const IDAM_ID: u16 = 0x5554;
const DAM_ID: u16 = 0x5545;
const BYTES_PER_SECTOR: usize = 512;

pub struct IbmMfmHandler {
    pub nr_sectors: u32,
    pub density: Density,
}

/// Scans for `word == 0x44894489` then `0x4489<<16 | mark`, as `ibm_scan_mark`
/// does; returns the index offset of the mark's first sync cell, or `None`.
fn scan_mark(stream: &mut FluxStream, mark: u16, max_scan: u32) -> Option<u32> {
    let mut scanned = 0u32;
    loop {
        if stream.word == 0x4489_4489 {
            stream.start_crc();
            let bits = stream.next_bits(32)?;
            if bits == (0x4489_0000 | mark as u32) {
                return Some(stream.index_offset.wrapping_sub(63));
            }
            return None;
        }
        stream.next_bit()?;
        scanned += 1;
        if scanned >= max_scan {
            return None;
        }
    }
}

fn scan_idam(stream: &mut FluxStream) -> Option<u32> {
    scan_mark(stream, IDAM_ID, u32::MAX)
}

fn scan_dam(stream: &mut FluxStream) -> Option<u32> {
    scan_mark(stream, DAM_ID, 1000)
}

impl TrackHandler for IbmMfmHandler {
    fn name(&self) -> &'static str {
        if self.nr_sectors > 9 {
            "IBM-MFM HD"
        } else {
            "IBM-MFM DD"
        }
    }

    fn density(&self) -> Density {
        self.density
    }

    fn bytes_per_sector(&self) -> u32 {
        BYTES_PER_SECTOR as u32
    }

    fn nr_sectors(&self) -> u32 {
        self.nr_sectors
    }

    fn write_raw(&self, _disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        let mut block = vec![0u8; BYTES_PER_SECTOR * self.nr_sectors as usize];
        let mut valid_blocks: u32 = 0;
        let mut data_bitoff = 0u32;
        let mut iam = false;

        while !iam {
            if stream.next_bit().is_none() {
                break;
            }
            if stream.word != IAM_SYNC {
                continue;
            }
            if let Some(bits) = stream.next_bits(32) {
                iam = bits == IAM_MARK;
            } else {
                break;
            }
        }
        stream.reset(tracknr).ok()?;

        while stream.next_bit().is_some() && valid_blocks != (1u32 << self.nr_sectors) - 1 {
            let idx_off = match scan_idam(stream) {
                Some(off) => off,
                None => continue,
            };

            let w1 = stream.next_bits(32)?;
            let cyl = mfm_decode_word((w1 >> 16) as u16);
            let head = mfm_decode_word(w1 as u16);
            let w2 = stream.next_bits(32)?;
            let sec_raw = mfm_decode_word((w2 >> 16) as u16);
            let no = mfm_decode_word(w2 as u16);
            if stream.next_bits(32).is_none() {
                break;
            }
            let sz = 128usize << no;

            if cyl as u32 != tracknr / 2 || head as u32 != tracknr & 1 || sz != BYTES_PER_SECTOR || stream.crc16 != 0 {
                continue;
            }

            let sec = sec_raw.wrapping_sub(1) as u32;
            if sec >= self.nr_sectors || (valid_blocks & (1 << sec)) != 0 {
                continue;
            }

            if scan_dam(stream).is_none() {
                continue;
            }
            let dat = match read_mfm_bytes(stream, BYTES_PER_SECTOR) {
                Some(d) => d,
                None => break,
            };
            if read_mfm_bytes(stream, 2).is_none() {
                break;
            }
            if stream.crc16 != 0 {
                continue;
            }

            block[sec as usize * BYTES_PER_SECTOR..(sec as usize + 1) * BYTES_PER_SECTOR].copy_from_slice(&dat);
            valid_blocks |= 1 << sec;
            if sec == 0 {
                data_bitoff = idx_off;
            }
        }

        if valid_blocks == 0 {
            return None;
        }

        let _ = data_bitoff; // superseded by the fixed gap-based offset below, as in the original

        Some(TrackInfo {
            track_type: TrackType::IbmMfm,
            total_bits: 100_150,
            data_bitoff: if iam { 80 * 16 } else { 140 * 16 },
            nr_sectors: self.nr_sectors,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: valid_blocks,
            dat: Some(Payload(block)),
            flags: TrackFlags::empty(),
        })
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[tracknr as usize];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[]);
        let cyl = (tracknr / 2) as u32;
        let head = tracknr & 1;
        let no: u32 = 2;
        let gap4 = if self.nr_sectors > 9 { 108 } else { 80 };

        for _ in 0..12 {
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x00);
        }
        tbuf.bits(SPEED_AVG, Encoding::Raw, 32, IAM_SYNC);
        tbuf.bits(SPEED_AVG, Encoding::Raw, 32, IAM_MARK);
        for _ in 0..gap4 {
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x4e);
        }

        for sec in 0..self.nr_sectors {
            for _ in 0..12 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x00);
            }
            tbuf.start_crc();
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_4489);
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_0000 | IDAM_ID as u32);
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, cyl);
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, head);
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, sec + 1);
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, no);
            tbuf.emit_crc16_ccitt(SPEED_AVG);
            for _ in 0..22 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x4e);
            }

            for _ in 0..12 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x00);
            }
            tbuf.start_crc();
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_4489);
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_0000 | DAM_ID as u32);
            let base = sec as usize * BYTES_PER_SECTOR;
            tbuf.bytes(SPEED_AVG, Encoding::Mfm, &dat[base..base + BYTES_PER_SECTOR]);
            tbuf.emit_crc16_ccitt(SPEED_AVG);
            for _ in 0..gap4 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x4e);
            }
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
    fn round_trips_through_flux() {
        let handler = IbmMfmHandler { nr_sectors: 9, density: Density::Double };
        let mut dat = vec![0u8; BYTES_PER_SECTOR * 9];
        for (i, b) in dat.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut disk = Disk::new(1);
        disk.tracks[0] = TrackInfo {
            track_type: TrackType::IbmMfm,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff: 80 * 16,
            nr_sectors: 9,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: 0x1ff,
            dat: Some(Payload(dat.clone())),
            flags: TrackFlags::empty(),
        };

        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 80 * 16, 7);
        handler.read_raw(&disk, 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut fresh = Disk::new(1);
        let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("decode should succeed");
        assert_eq!(decoded.valid_sectors, 0x1ff);
        assert_eq!(decoded.dat.unwrap().0, dat);
    }
}
