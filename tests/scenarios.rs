//! Integration tests against the literal walkthrough scenarios: sync
//! detection, the standard CRC-16/CCITT check value, a long-track
//! protection's accept threshold, RNC PDOS key bootstrap, Dungeon Master's
//! weak-sector canonical byte, and a full AmigaDOS track round trip.

use bit_vec::BitVec;
use trackflux::flux::source::{FluxSample, FluxSource};
use trackflux::flux::{FluxStream, PllMode};
use trackflux::handlers::registry;
use trackflux::track::{Density, Disk, Payload, TrackFlags, TrackInfo, TrackType, DEFAULT_BITS_PER_TRACK};
use trackflux::util::crc16_ccitt;
use trackflux::TrackBuffer;

/// Replays a `TrackBuffer` cell array as flux intervals, the same trick the
/// crate's own handler tests use internally, but written against the public
/// `FluxSource` trait since this file builds as its own crate.
struct ReplayFlux {
    cells: BitVec,
    clk_ns: f64,
    pos: usize,
    revolutions_left: u32,
}

impl ReplayFlux {
    fn new(cells: BitVec, clk_ns: f64) -> Self {
        ReplayFlux { cells, clk_ns, pos: 0, revolutions_left: 5 }
    }
}

impl FluxSource for ReplayFlux {
    fn reset(&mut self, _tracknr: u32) -> Result<(), trackflux::FluxError> {
        self.pos = 0;
        self.revolutions_left = 5;
        Ok(())
    }

    fn next_flux(&mut self) -> Option<FluxSample> {
        if self.cells.is_empty() || self.revolutions_left == 0 {
            return None;
        }
        let index = self.pos == 0;
        if index {
            self.revolutions_left -= 1;
        }
        let mut n_cells = 0u32;
        loop {
            let bit = self.cells[self.pos];
            self.pos = (self.pos + 1) % self.cells.len();
            n_cells += 1;
            if bit || self.pos == 0 {
                break;
            }
        }
        Some(FluxSample { interval_ps: (n_cells as f64 * self.clk_ns * 1000.0) as u32, index })
    }

    fn nominal_cell_ns(&self) -> f64 {
        self.clk_ns
    }
}

fn stream_from_cells(cells: BitVec, clk_ns: f64) -> FluxStream {
    let mut stream = FluxStream::from_source(Box::new(ReplayFlux::new(cells, clk_ns)));
    stream.pll_mode(PllMode::VariableClock);
    stream.reset(0).unwrap();
    stream
}

/// S1: the stream's 32-bit `word` register reaches the AmigaDOS sync
/// `0x44894489` after its 48th accumulated bit, and the 16 bits immediately
/// following decode (as an MFM word) to `0xff`.
#[test]
fn s1_sync_word_then_0xff_payload() {
    let mut tbuf = TrackBuffer::init(200, 0, 1);
    tbuf.bits(1000, trackflux::bitcell::Encoding::Raw, 32, 0x4489_4489);
    let (word, _) = trackflux::bitcell::mfm_encode_byte(0xff, false);
    tbuf.bits(1000, trackflux::bitcell::Encoding::Raw, 16, word as u32);
    let out = tbuf.finalise();

    let mut stream = stream_from_cells(out.cells, 2000.0);
    let mut seen_sync = false;
    while stream.next_bit().is_some() {
        if stream.word == 0x4489_4489 {
            seen_sync = true;
            break;
        }
    }
    assert!(seen_sync, "stream never reached the AmigaDOS sync word");

    let payload = stream.next_bits(16).expect("16 more bits after sync");
    assert_eq!(trackflux::bitcell::mfm_decode_word(payload as u16), 0xff);
}

/// S2: the standard CRC-16/CCITT check value for the ASCII string
/// "123456789" seeded with `0xffff` is `0x29b1`.
#[test]
fn s2_crc16_ccitt_check_value() {
    assert_eq!(crc16_ccitt(b"123456789", 0xffff), 0x29b1);
}

/// S3: a PROTEC long track (108000-cell nominal capture, sync `0x4454`
/// followed by thousands of `0x33` fill bytes) is recognised with
/// `total_bits == 110000`.
#[test]
fn s3_protec_long_track_recognised() {
    let handler = registry::lookup(TrackType::ProtecLongTrack);
    let mut tbuf = TrackBuffer::init(110_000, 0, 5);
    handler.read_raw(&Disk::new(1), 0, &mut tbuf);
    let out = tbuf.finalise();

    let mut stream = stream_from_cells(out.cells, 2000.0);
    let mut disk = Disk::new(1);
    let decoded = handler.write_raw(&mut disk, 0, &mut stream).expect("PROTEC long track should be recognised");
    assert_eq!(decoded.track_type, TrackType::ProtecLongTrack);
    assert_eq!(decoded.total_bits, 110_000);
    assert!(decoded.flags.contains(TrackFlags::LONG_TRACK));
}

/// S4: RNC PDOS's first sector, read with no key on file, bootstraps the
/// disk-wide key from its own header, and every later sector on the same
/// track validates against that same key.
#[test]
fn s4_pdos_key_bootstraps_from_first_sector() {
    let handler = registry::lookup(TrackType::RncPdos);
    let mut dat = vec![0u8; 512 * 12];
    for (i, b) in dat.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }

    let mut source_disk = Disk::new(1);
    source_disk.set_tag_rnc_pdos_key(0x1357_9bdf);
    source_disk.tracks[0] = TrackInfo {
        track_type: TrackType::RncPdos,
        total_bits: 105_500,
        data_bitoff: 0,
        nr_sectors: 12,
        bytes_per_sector: 512,
        valid_sectors: (1 << 12) - 1,
        dat: Some(Payload(dat.clone())),
        flags: TrackFlags::empty(),
    };

    let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 3);
    handler.read_raw(&source_disk, 0, &mut tbuf);
    let out = tbuf.finalise();

    let mut stream = stream_from_cells(out.cells, 2000.0);
    let mut fresh_disk = Disk::new(1);
    assert_eq!(fresh_disk.tag_rnc_pdos_key(), None);

    let decoded = handler.write_raw(&mut fresh_disk, 0, &mut stream).expect("PDOS track should decode");
    assert_eq!(decoded.valid_sectors, (1 << 12) - 1);
    assert_eq!(decoded.dat.unwrap().0, dat);
    assert_eq!(fresh_disk.tag_rnc_pdos_key(), Some(0x1357_9bdf));
}

/// S5: in Dungeon Master's weak sector 1, bytes 20..508 of the canonical
/// reconstruction settle to `0x68`, the value masked in over the ambiguous
/// flux region.
#[test]
fn s5_dungeon_master_weak_sector_canonical_byte() {
    let handler = registry::lookup(TrackType::DungeonMasterWeak);
    let mut dat = vec![0xe5u8; 512 * 10];
    for b in dat[512 + 20..512 + 509].iter_mut() {
        *b = 0x68;
    }

    let mut disk = Disk::new(1);
    disk.tracks[0] = TrackInfo {
        track_type: TrackType::DungeonMasterWeak,
        total_bits: DEFAULT_BITS_PER_TRACK,
        data_bitoff: 0,
        nr_sectors: 10,
        bytes_per_sector: 512,
        valid_sectors: (1 << 10) - 1,
        dat: Some(Payload(dat.clone())),
        flags: TrackFlags::WEAK_BITS,
    };

    let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 0, 17);
    handler.read_raw(&disk, 0, &mut tbuf);
    let out = tbuf.finalise();

    let mut stream = stream_from_cells(out.cells, 2000.0);
    let mut fresh = Disk::new(1);
    let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("Dungeon Master track should decode");
    let weak_bytes = &decoded.dat.unwrap().0[512 + 20..512 + 509];
    assert!(weak_bytes.iter().all(|&b| b == 0x68));
}

/// S6: a full AmigaDOS track round trip produces exactly `DEFAULT_BITS_PER_TRACK`
/// cells, a `data_bitoff` of 1024, an identical re-decoded payload, and all
/// 11 sectors valid (`0x7ff`).
#[test]
fn s6_amigados_full_track_round_trip() {
    let handler = registry::lookup(TrackType::AmigaDos);
    let mut dat = vec![0u8; 512 * 11];
    for (i, b) in dat.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }

    let mut disk = Disk::new(1);
    disk.tracks[0] = TrackInfo {
        track_type: TrackType::AmigaDos,
        total_bits: DEFAULT_BITS_PER_TRACK,
        data_bitoff: 1024,
        nr_sectors: 11,
        bytes_per_sector: 512,
        valid_sectors: 0x7ff,
        dat: Some(Payload(dat.clone())),
        flags: TrackFlags::empty(),
    };

    let mut tbuf = TrackBuffer::init(DEFAULT_BITS_PER_TRACK as usize, 1024, 0xabcd);
    handler.read_raw(&disk, 0, &mut tbuf);
    let out = tbuf.finalise();
    assert_eq!(out.cells.len(), 100_150);

    let mut stream = stream_from_cells(out.cells, 2000.0);
    let mut fresh = Disk::new(1);
    let decoded = handler.write_raw(&mut fresh, 0, &mut stream).expect("AmigaDOS track should decode");
    assert_eq!(decoded.valid_sectors, 0x7ff);
    assert_eq!(decoded.dat.unwrap().0, dat);
    assert_eq!(decoded.data_bitoff, 1024);
}

/// Every `TrackType` resolves to a handler whose declared density is one of
/// the four recognised classes (a cheap sanity check that the registry
/// doesn't panic for any variant, complementing the unit test in
/// `registry.rs` that only checks `name()`).
#[test]
fn every_track_type_has_a_sane_density() {
    use strum::IntoEnumIterator;
    for t in TrackType::iter() {
        let handler = registry::lookup(t);
        match handler.density() {
            Density::Single | Density::Double | Density::High | Density::Extra => {}
        }
    }
}
