//! Core value types

mod hash;

pub use hash::Hash;
