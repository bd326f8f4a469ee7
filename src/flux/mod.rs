//! Flux stream abstraction: PLL-driven conversion of flux-interval samples
//! into MFM cell bits, plus the back-ends that supply those samples.

pub mod pll;
pub mod source;
pub mod stream;

pub use pll::{Pll, PllMode};
pub use source::FluxSource;
pub use stream::{FluxStream, DENSITY_DD_NS, DENSITY_GCR_NS, DENSITY_HD_NS};
