//! PROTEC and Protoscan long-track protections (Amnios, Archipelagos, Lotus
//! I/II): no sectors at all. A raw sync is followed by roughly a thousand
//! repetitions of one fixed MFM-encoded byte, and the track itself is
//! mastered past the nominal cell count so no ordinary write can reproduce
//! it. PROTEC uses a 16-bit sync and fill byte `0x33`; Protoscan uses a
//! doubled 32-bit sync and fill byte `0x00`, at a different track length.
//! Grounded on `original_source/libdisk/longtrack.c`.

use crate::bitcell::{mfm_decode_word, Encoding};
use crate::flux::FluxStream;
use crate::handlers::TrackHandler;
use crate::tbuf::{TrackBuffer, SPEED_AVG};
use crate::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType};

/// Repetitions of the fill byte required to accept the track on read-back.
const CHECK_REPEATS: usize = 1000;
/// Repetitions written on encode; comfortably covers the inflated track
/// length at any nominal cell width.
const FILL_REPEATS: usize = 6000;

pub struct LongTrackHandler {
    pub track_type: TrackType,
}

struct Params {
    sync_bits: u32,
    sync_value: u32,
    fill: u8,
    total_bits: u32,
}

fn params_for(track_type: TrackType) -> Params {
    match track_type {
        TrackType::ProtecLongTrack => Params { sync_bits: 16, sync_value: 0x4454, fill: 0x33, total_bits: 110_000 },
        TrackType::ProtoscanLongTrack => {
            Params { sync_bits: 32, sync_value: 0x4124_4124, fill: 0x00, total_bits: 105_500 }
        }
        _ => unreachable!("LongTrackHandler only handles long-track types"),
    }
}

/// Reads one MFM-encoded cell-word (16 raw cells) and checks it decodes to
/// `want`.
fn check_fill(stream: &mut FluxStream, want: u8) -> Option<()> {
    let w = stream.next_bits(16)?;
    if mfm_decode_word(w as u16) == want {
        Some(())
    } else {
        None
    }
}

impl TrackHandler for LongTrackHandler {
    fn name(&self) -> &'static str {
        match self.track_type {
            TrackType::ProtecLongTrack => "PROTEC Long Track",
            TrackType::ProtoscanLongTrack => "Protoscan Long Track",
            _ => "Long Track",
        }
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
        let p = params_for(self.track_type);

        loop {
            stream.next_bit()?;
            let matched = if p.sync_bits == 16 { stream.word & 0xffff == p.sync_value } else { stream.word == p.sync_value };
            if matched {
                break;
            }
        }
        let data_bitoff = stream.index_offset.wrapping_sub(p.sync_bits);

        for _ in 0..CHECK_REPEATS {
            check_fill(stream, p.fill)?;
        }

        Some(TrackInfo {
            track_type: self.track_type,
            total_bits: p.total_bits,
            data_bitoff,
            nr_sectors: 0,
            bytes_per_sector: 0,
            valid_sectors: 1,
            dat: Some(Payload(vec![p.fill])),
            flags: TrackFlags::LONG_TRACK,
        })
    }

    fn read_raw(&self, _disk: &Disk, _tracknr: u32, tbuf: &mut TrackBuffer) {
        let p = params_for(self.track_type);
        tbuf.bits(SPEED_AVG, Encoding::Raw, p.sync_bits, p.sync_value);
        for _ in 0..FILL_REPEATS {
            tbuf.bits(SPEED_AVG, Encoding::Mfm, 8, p.fill as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::PllMode;
    use crate::testutil::CellFlux;

    fn round_trip(track_type: TrackType) {
        let handler = LongTrackHandler { track_type };
        let p = params_for(track_type);

        let mut tbuf = TrackBuffer::init(p.total_bits as usize, 0, 5);
        handler.read_raw(&Disk::new(1), 0, &mut tbuf);
        let out = tbuf.finalise();

        let source = CellFlux::new(out.cells, 2000.0);
        let mut stream = FluxStream::from_source(Box::new(source));
        stream.pll_mode(PllMode::VariableClock);
        stream.reset(0).unwrap();

        let mut disk = Disk::new(1);
        let decoded = handler.write_raw(&mut disk, 0, &mut stream).expect("decode should succeed");
        assert_eq!(decoded.total_bits, p.total_bits);
        assert_eq!(decoded.dat.unwrap().0, vec![p.fill]);
    }

    #[test]
    fn protec_round_trips_through_flux() {
        round_trip(TrackType::ProtecLongTrack);
    }

    #[test]
    fn protoscan_round_trips_through_flux() {
        round_trip(TrackType::ProtoscanLongTrack);
    }
}
