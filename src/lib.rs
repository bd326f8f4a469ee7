//! # trackflux
//!
//! trackflux decodes raw floppy-disk flux captures into sector data and
//! re-synthesizes flux from that data, for emulator authors and disk-image
//! archivists who need the full round trip rather than a single direction.
//!
//! The pipeline has four stages: a flux source yields timed transition
//! intervals; a PLL ([`flux::Pll`]) turns those into an MFM/FM cell
//! bitstream ([`flux::FluxStream`]); a [`handlers::TrackHandler`] scans that
//! stream for its format's sync marks and validates structure/checksums,
//! producing a [`track::TrackInfo`]; the same handler's `read_raw` runs the
//! pipeline backwards, emitting cells into a [`tbuf::TrackBuffer`] that a
//! container writer commits to media.
//!
//! [`track::analyse_track`] drives the decode side end to end, trying a
//! disk format's candidate list of handlers in order and falling back to
//! [`handlers::registry::lookup`]`(TrackType::Unformatted)` once everything
//! else fails. [`track::synthesize_track`] drives the encode side.

pub mod bitcell;
pub mod error;
pub mod flux;
pub mod handlers;
pub mod tbuf;
pub mod track;
pub mod util;

#[cfg(test)]
mod testutil;

pub use error::{DiskError, FluxError};
pub use flux::FluxStream;
pub use tbuf::TrackBuffer;
pub use track::{analyse_track, synthesize_track, Disk, TrackInfo, TrackType};
