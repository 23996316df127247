//! Device-side MTP protocol handling.

pub mod consts;
pub mod container;
pub mod dataset;
pub mod operations;
pub mod responder;
pub mod storage;
