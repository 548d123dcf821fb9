//! claycode - clay-code style erasure coding
//!
//! A file is cut into read-ins; each read-in becomes a stripe of `planes`
//! planes over k data and m coding units. Every plane is encoded with an
//! MDS code (Reed-Solomon or a bitmatrix code), then a pairwise butterfly
//! coupling across planes lets a single lost unit be rebuilt from a
//! fraction of the surviving data.

pub mod butterfly;
pub mod config;
pub mod error;
pub mod galois;
pub mod matrix;
pub mod session;
pub mod solver;
pub mod storage;
pub mod stripe;

pub use config::{CodecConfig, Technique};
pub use error::{Error, Result};
pub use galois::FieldRegistry;
pub use session::Session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CodecConfig, CouplingConfig, Technique};
    pub use crate::error::{Error, Result};
    pub use crate::galois::{Field, FieldRegistry, Strategy};
    pub use crate::session::{Mode, ProgressObserver, Session, SessionState};
    pub use crate::stripe::{ErasureSet, Stripe, StripeGeometry};
}
