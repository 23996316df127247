//! MTP responder for embassy-usb devices.
//!
//! [`Responder`] implements the transaction protocol over registered storage
//! backends and is independent of USB; [`usb::mtp::MtpClass`] moves its
//! containers over a bulk endpoint pair.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod mtp_handler;
pub mod storage;
pub mod usb;

pub use config::{ConfigError, ResponderConfig, StalePolicy};
pub use mtp_handler::consts::{ContainerType, OperationCode, ResponseCode};
pub use mtp_handler::container::{Container, DecodeError, EncodeError, Params};
pub use mtp_handler::dataset::{DatasetError, ObjectInfo};
pub use mtp_handler::responder::{Responder, Response, State, Transaction};
pub use mtp_handler::storage::{
    ParentFilter, RegistryError, StorageBackend, StorageError, StorageInfo, StorageRegistry,
};
