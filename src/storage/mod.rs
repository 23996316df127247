//! Storage backends shipped with the crate.

pub mod ram;
pub mod shared;
