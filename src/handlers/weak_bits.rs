//! Dungeon Master / Chaos Strikes Back weak-bit protection: an Atari ST IBM
//! MFM track (cyl 0, head 1, 10×512-byte sectors) where one designated
//! sector's data carries a deliberately ambiguous flux transition — the MSB
//! of each byte in a 448-byte window randomly reads back as 0 or 1,
//! something only an authentic, slow-responding PLL reproduces reliably.
//! Grounded on `original_source/libdisk/dungeon_master.c`.

use crate::bitcell::{mfm_decode_word, Encoding};
use crate::flux::{FluxStream, PllMode};
use crate::handlers::{read_mfm_bytes, TrackHandler};
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};

const NR_SECTORS: u32 = 10;
const BYTES_PER_SECTOR: usize = 512;
const FILL: u8 = 0xe5;
const WEAK_START: usize = 20;
const WEAK_END: usize = 509;

pub struct WeakBitsHandler {
    pub weak_sector: u32,
    pub track_type: TrackType,
}

fn scan_word(stream: &mut FluxStream, want: u32) -> Option<()> {
    while stream.next_bit().is_some() {
        if stream.word == 0x4489_4489 {
            stream.start_crc();
            return if stream.next_bits(32) == Some(want) { Some(()) } else { None };
        }
    }
    None
}

impl TrackHandler for WeakBitsHandler {
    fn name(&self) -> &'static str {
        "Dungeon Master Weak Bits"
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
        let mut block = vec![FILL; BYTES_PER_SECTOR * NR_SECTORS as usize];
        let mut valid_blocks: u32 = 0;
        let mut data_bitoff = 0u32;

        while stream.next_bit().is_some() && valid_blocks != (1u32 << NR_SECTORS) - 1 {
            if stream.word != 0x4489_4489 {
                continue;
            }
            let idx_off = stream.index_offset.wrapping_sub(31);
            stream.start_crc();
            if stream.next_bits(32)? != 0x4489_5554 {
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
            let sz = 128usize << no;

            if cyl != 0 || head != 1 || sz != BYTES_PER_SECTOR || stream.crc16 != 0 {
                continue;
            }
            let sec = sec_raw.wrapping_sub(1) as u32;
            if sec >= NR_SECTORS || (valid_blocks & (1 << sec)) != 0 {
                continue;
            }

            if scan_word(stream, 0x4489_5545).is_none() {
                continue;
            }

            let mut dat = vec![0u8; BYTES_PER_SECTOR];
            if sec == self.weak_sector {
                let old_mode = stream.pll_mode(PllMode::Authentic);
                let mut well_formed = true;
                let mut broke = false;
                for (i, slot) in dat.iter_mut().enumerate() {
                    if i >= WEAK_START && i < WEAK_END {
                        // The ambiguous MSB reads back as 0 or 1 depending on
                        // flux noise; exclude it from the running CRC on both
                        // sides so a clean reconstruction to 0x68 still
                        // checksums, the way the DAM mark excludes the weak
                        // cells in read_raw via tbuf.weak().
                        let crc_before = stream.crc16;
                        let byte = match read_mfm_bytes(stream, 1) {
                            Some(b) => b[0],
                            None => {
                                broke = true;
                                break;
                            }
                        };
                        stream.crc16 = crc_before;
                        let masked = byte & 0x7f;
                        if masked != 0x68 {
                            well_formed = false;
                            break;
                        }
                        *slot = masked;
                    } else {
                        *slot = match read_mfm_bytes(stream, 1) {
                            Some(b) => b[0],
                            None => {
                                broke = true;
                                break;
                            }
                        };
                    }
                }
                stream.pll_mode(old_mode);
                if broke {
                    break;
                }
                if !well_formed {
                    continue;
                }
            } else {
                match read_mfm_bytes(stream, BYTES_PER_SECTOR) {
                    Some(d) => dat.copy_from_slice(&d),
                    None => break,
                }
            }

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

        if valid_blocks & (1 << self.weak_sector) == 0 {
            return None;
        }

        Some(TrackInfo {
            track_type: self.track_type,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff,
            nr_sectors: NR_SECTORS,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: valid_blocks,
            dat: Some(Payload(block)),
            flags: TrackFlags::WEAK_BITS,
        })
    }

    fn read_raw(&self, disk: &Disk, _tracknr: u32, tbuf: &mut TrackBuffer) {
        let info = &disk.tracks[0];
        let dat = info.dat.as_ref().map(|p| p.0.as_slice()).unwrap_or(&[FILL; BYTES_PER_SECTOR * NR_SECTORS as usize]);
        let (cyl, head, no) = (0u32, 1u32, 2u32);

        for sec in 0..NR_SECTORS {
            tbuf.start_crc();
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_4489);
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_5554);
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
            tbuf.bits(SPEED_AVG, Encoding::Raw, 32, 0x4489_5545);
            let base = sec as usize * BYTES_PER_SECTOR;

            if sec == self.weak_sector {
                tbuf.bytes(SPEED_AVG, Encoding::Mfm, &dat[base..base + WEAK_START]);
                let crc_before = tbuf.crc16();
                for _ in WEAK_START..WEAK_END {
                    tbuf.weak(SPEED_AVG, 2);
                    tbuf.bits(SPEED_AVG, Encoding::Mfm, 7, 0x68 & 0x7f);
                }
                tbuf.set_crc16(crc_before);
                tbuf.bytes(SPEED_AVG, Encoding::Mfm, &dat[base + WEAK_END..base + BYTES_PER_SECTOR]);
            } else {
                tbuf.bytes(SPEED_AVG, Encoding::Mfm, &dat[base..base + BYTES_PER_SECTOR]);
            }

            tbuf.emit_crc16_ccitt(SPEED_AVG);
            for _ in 0..40 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x4e);
            }
            for _ in 0..12 {
                tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, 0x00);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CellFlux;

    /// The genuinely ambiguous MSB only settles to a deterministic value
    /// under real flux noise, which our deterministic test flux source
    /// doesn't model; this exercises the surrounding IDAM/DAM/CRC machinery
    /// and the weak-region content check with a literal, non-randomised
    /// 0x68 fill standing in for a "read cleanly" outcome.
    #[test]
    fn round_trips_non_weak_sectors_through_flux() {
        let mut dat = vec![FILL; BYTES_PER_SECTOR * NR_SECTORS as usize];
        for sec in 0..NR_SECTORS as usize {
            if sec == 1 {
                continue;
            }
            for (i, b) in dat[sec * BYTES_PER_SECTOR..(sec + 1) * BYTES_PER_SECTOR].iter_mut().enumerate() {
                *b = ((sec * 37 + i) % 256) as u8;
            }
        }
        for b in dat[BYTES_PER_SECTOR + WEAK_START..BYTES_PER_SECTOR + WEAK_END].iter_mut() {
            *b = 0x68;
        }

        let handler = WeakBitsHandler { weak_sector: 1, track_type: TrackType::DungeonMasterWeak };
        let mut disk = Disk::new(1);
        disk.tracks[0] = TrackInfo {
            track_type: TrackType::DungeonMasterWeak,
            total_bits: DEFAULT_BITS_PER_TRACK,
            data_bitoff: 0,
            nr_sectors: NR_SECTORS,
            bytes_per_sector: BYTES_PER_SECTOR as u32,
            valid_sectors: (1 << NR_SECTORS) - 1,
            dat: Some(Payload(dat.clone())),
            flags: TrackFlags::WEAK_BITS,
        };

        let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 17);
        handler.read_raw(&disk, 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut fresh = Disk::new(1);
        let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("decode should succeed");
        assert!(decoded.valid_sectors & (1 << 1) != 0);
        assert_eq!(decoded.dat.unwrap().0, dat);
    }
}
