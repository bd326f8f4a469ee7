use thiserror::Error;

/// Errors surfaced by the flux stream and its back-ends.
#[derive(Debug, Error)]
pub enum FluxError {
    #[error("no flux back-end recognised the source")]
    NoSource,
    #[error("track {0} is absent from the capture")]
    NoTrack(u32),
    #[error("i/o error reading flux source: {0}")]
    Io(#[from] std::io::Error),
    #[error("flux source is malformed: {0}")]
    BadLength(String),
}

/// Errors surfaced by the track-handler dispatcher and disk-level operations.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("no handler recognised track {0}")]
    UnrecognisedTrack(u32),
    #[error("container cannot represent track {0}: {1}")]
    UnsupportedFormat(u32, String),
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),
    #[error(transparent)]
    Flux(#[from] FluxError),
}
