//! Galois field arithmetic
//!
//! Provides GF(2^w) for w in 1..=32:
//! - Scalar multiply, divide, inverse and power ([`Field`])
//! - Bulk region multiply and XOR for w in {8, 16, 32}
//! - A [`FieldRegistry`] that builds each field once and shares it

mod field;
mod region;
mod registry;

pub use field::{Field, Strategy};
pub use region::region_xor;
pub use registry::FieldRegistry;
