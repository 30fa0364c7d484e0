//! Forward-pass execution over a loaded model.
//!
//! No computation-graph framework: the transformer is an explicit sequence
//! of free-function kernels ([`ops`], [`attention`]) driven by
//! [`Session::forward`], with all intermediate compute in f32.

pub mod attention;
pub mod ops;
pub mod session;

pub use session::{KvCache, Session};
