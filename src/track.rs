//! Track-info blocks, the disk container, and the handler dispatch loop
//! ("analyse"). Grounded on `libdisk/private.h`'s `struct track_info` /
//! `struct disk` and the dispatch steps in spec §4.4.

use crate::error::DiskError;
use crate::flux::FluxStream;
use crate::handlers::{self, TrackHandler};
use crate::tbuf::TrackBuffer;
use strum::EnumIter;

/// Nominal cell-count for a 300 RPM, 2us-cell track (`DEFAULT_BITS_PER_TRACK`
/// in the original source).
pub const DEFAULT_BITS_PER_TRACK: u32 = 100_150;

/// Sentinel `total_bits` value marking a weak/unformatted track.
pub const WEAK_SENTINEL: u32 = u32::MAX;

/// Tagged identifier for every implemented track format. A pointer-array of
/// function-table descriptors (the original's `struct track_handler *`) is
/// replaced with this enum plus a `match`-based registry (see
/// [`crate::handlers::registry`]), per the redesign note on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum TrackType {
    AmigaDos,
    AmigaDosLabelled,
    IbmMfm,
    IbmFm,
    DecRx02,
    Copylock,
    RncPdos,
    RncTriFormat,
    Rainbird,
    PsygnosisA,
    GremlinGraphics,
    ProtecLongTrack,
    ProtoscanLongTrack,
    DungeonMasterWeak,
    ChaosStrikesBackWeak,
    Unformatted,
}

/// Density class a handler is mastered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    Single,
    Double,
    High,
    Extra,
}

/// Handler-specific decoded content of a track. Each handler owns parsing
/// its own byte layout; this crate never inspects a payload outside its
/// owning handler except to export it verbatim.
#[derive(Debug, Clone, Default)]
pub struct Payload(pub Vec<u8>);

bitflags::bitflags! {
    /// Per-track modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrackFlags: u32 {
        const WEAK_BITS = 0b0000_0001;
        const LONG_TRACK = 0b0000_0010;
    }
}

/// Per-track metadata record (spec §3's "Track-info block").
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_type: TrackType,
    pub total_bits: u32,
    pub data_bitoff: u32,
    pub nr_sectors: u32,
    pub bytes_per_sector: u32,
    pub valid_sectors: u32,
    pub dat: Option<Payload>,
    pub flags: TrackFlags,
}

impl TrackInfo {
    pub fn unformatted() -> Self {
        TrackInfo {
            track_type: TrackType::Unformatted,
            total_bits: WEAK_SENTINEL,
            data_bitoff: 0,
            nr_sectors: 0,
            bytes_per_sector: 0,
            valid_sectors: 0,
            dat: None,
            flags: TrackFlags::empty(),
        }
    }

    /// Normalizes `data_bitoff` into `[0, total_bits)` (negative offsets,
    /// represented as a wrapped `u32`, are modulo-reduced).
    pub fn normalize_data_bitoff(&mut self) {
        if self.total_bits != 0 && self.total_bits != WEAK_SENTINEL {
            self.data_bitoff %= self.total_bits;
        }
    }
}

/// Small blob one handler produces and another consumes via the disk's tag
/// list. The one example named in the external-interfaces section is the
/// RNC PDOS decryption key.
#[derive(Debug, Clone)]
pub enum DiskTag {
    RncPdosKey(u32),
}

/// A fixed-size collection of track-info blocks plus the tag list shared
/// between handlers while analysing one disk.
pub struct Disk {
    pub tracks: Vec<TrackInfo>,
    pub tags: Vec<DiskTag>,
}

impl Disk {
    pub fn new(nr_tracks: usize) -> Self {
        Disk {
            tracks: (0..nr_tracks).map(|_| TrackInfo::unformatted()).collect(),
            tags: Vec::new(),
        }
    }

    pub fn tag_rnc_pdos_key(&self) -> Option<u32> {
        self.tags.iter().find_map(|t| match t {
            DiskTag::RncPdosKey(k) => Some(*k),
        })
    }

    pub fn set_tag_rnc_pdos_key(&mut self, key: u32) {
        self.tags.retain(|t| !matches!(t, DiskTag::RncPdosKey(_)));
        self.tags.push(DiskTag::RncPdosKey(key));
    }
}

/// Dispatch loop ("analyse"): resets the stream to `tracknr`, tries each
/// candidate handler in order, and falls back to `Unformatted` last.
pub fn analyse_track(
    disk: &mut Disk,
    tracknr: u32,
    stream: &mut FluxStream,
    candidates: &[TrackType],
) -> Result<TrackType, DiskError> {
    for &candidate in candidates {
        stream.reset(tracknr)?;
        let handler = handlers::registry::lookup(candidate);
        if let Some(mut info) = handler.write_raw(&mut *disk, tracknr, stream) {
            info.track_type = candidate;
            info.normalize_data_bitoff();
            disk.tracks[tracknr as usize] = info;
            return Ok(candidate);
        }
    }

    stream.reset(tracknr)?;
    let unformatted = handlers::registry::lookup(TrackType::Unformatted);
    if let Some(mut info) = unformatted.write_raw(&mut *disk, tracknr, stream) {
        info.track_type = TrackType::Unformatted;
        disk.tracks[tracknr as usize] = info;
        return Ok(TrackType::Unformatted);
    }

    disk.tracks[tracknr as usize] = TrackInfo::unformatted();
    Err(DiskError::UnrecognisedTrack(tracknr))
}

/// Re-synthesizes the MFM bitstream for a track from its stored payload.
pub fn synthesize_track(disk: &Disk, tracknr: u32) -> Option<TrackBuffer> {
    let info = disk.tracks.get(tracknr as usize)?;
    let handler = handlers::registry::lookup(info.track_type);
    let total_bits = if info.total_bits == WEAK_SENTINEL {
        DEFAULT_BITS_PER_TRACK
    } else {
        info.total_bits
    };
    let mut tbuf = TrackBuffer::init(total_bits as usize, info.data_bitoff as usize, tracknr ^ 0x5a5a_5a5a);
    handler.read_raw(disk, tracknr, &mut tbuf);
    Some(tbuf)
}
