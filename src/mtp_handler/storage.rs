//! Storage capability interface and the registry binding storage ids to
//! backends.

use heapless::{String, Vec};
use thiserror::Error;

use super::consts::{AccessCapability, ResponseCode, StorageType, ROOT_PARENT};
use super::dataset::{self, DatasetError, ObjectInfo};

/// Number of storages a responder can expose.
pub const MAX_STORAGES: usize = 4;

pub const MAX_DESCRIPTION_BYTES: usize = 64;

/// Failures reported by a storage backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("object handle not found")]
    NotFound,
    #[error("parent object does not exist or is not a folder")]
    InvalidParent,
    #[error("storage is full")]
    Full,
    #[error("storage is read-only")]
    ReadOnly,
    #[error("access denied")]
    AccessDenied,
    #[error("storage not available")]
    Unavailable,
}

impl From<StorageError> for ResponseCode {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ResponseCode::InvalidObjectHandle,
            StorageError::InvalidParent => ResponseCode::InvalidParentObject,
            StorageError::Full => ResponseCode::StoreFull,
            StorageError::ReadOnly => ResponseCode::StoreReadOnly,
            StorageError::AccessDenied => ResponseCode::AccessDenied,
            StorageError::Unavailable => ResponseCode::StoreNotAvailable,
        }
    }
}

/// Registry failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("storage {0:#010x} is already registered")]
    DuplicateId(u32),
    #[error("storage {0:#010x} is not registered")]
    NotFound(u32),
    #[error("no free storage slot")]
    Full,
}

/// Description of a storage as reported by GetStorageInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_type: StorageType,
    pub filesystem_type: u16,
    pub access: AccessCapability,
    pub max_capacity: u64,
    pub free_space: u64,
    /// `u32::MAX` when the backend does not count objects.
    pub free_objects: u32,
    pub description: String<MAX_DESCRIPTION_BYTES>,
    pub volume_id: String<MAX_DESCRIPTION_BYTES>,
}

/// Parent selection for object enumeration, decoded from the host's
/// parent-handle parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParentFilter {
    /// Every object of the storage.
    Any,
    /// Objects at the storage root.
    Root,
    /// Children of the given folder.
    Object(u32),
}

impl ParentFilter {
    pub fn from_param(param: u32) -> Self {
        match param {
            0 => ParentFilter::Any,
            ROOT_PARENT => ParentFilter::Root,
            handle => ParentFilter::Object(handle),
        }
    }

    pub fn matches(&self, parent: u32) -> bool {
        match self {
            ParentFilter::Any => true,
            ParentFilter::Root => parent == ROOT_PARENT,
            ParentFilter::Object(handle) => parent == *handle,
        }
    }
}

/// Capabilities a storage exposes to the responder.
///
/// `Context` is handed back on every call; it is whatever per-registration
/// state the owner of the backend wants to keep next to it.
pub trait StorageBackend {
    type Context;

    fn storage_info(&mut self, ctx: &mut Self::Context) -> Result<StorageInfo, StorageError>;

    fn is_format_supported(&mut self, ctx: &mut Self::Context, format: u16) -> bool;

    /// Decodes the ObjectInfo dataset of a SendObjectInfo data phase.
    ///
    /// The crate's own parser is the canonical decoder; override only when the
    /// backend needs stricter validation on top of it.
    fn deserialize_object_info(
        &mut self,
        _ctx: &mut Self::Context,
        bytes: &[u8],
    ) -> Result<ObjectInfo, DatasetError> {
        dataset::parse_object_info(bytes)
    }

    /// Creates an object and returns its handle.
    fn create(&mut self, ctx: &mut Self::Context, info: &ObjectInfo) -> Result<u32, StorageError>;

    fn stat(&mut self, ctx: &mut Self::Context, handle: u32) -> Result<ObjectInfo, StorageError>;

    /// Calls `visit` with the handle of every object matching the filters.
    fn enumerate(
        &mut self,
        ctx: &mut Self::Context,
        format: Option<u16>,
        parent: ParentFilter,
        visit: &mut dyn FnMut(u32),
    ) -> Result<(), StorageError>;

    fn delete(&mut self, ctx: &mut Self::Context, handle: u32) -> Result<(), StorageError>;

    fn rename(&mut self, ctx: &mut Self::Context, handle: u32, name: &str) -> Result<(), StorageError>;

    /// Reads object content starting at `offset`, returning the byte count.
    fn read(
        &mut self,
        ctx: &mut Self::Context,
        handle: u32,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError>;

    /// Replaces object content from `offset` on.
    fn write(
        &mut self,
        ctx: &mut Self::Context,
        handle: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;
}

/// A backend bound to its storage id.
pub struct StorageRegistration<B: StorageBackend> {
    pub storage_id: u32,
    pub backend: B,
    pub context: B::Context,
}

/// Maps storage ids to backends. Holds no transaction state.
pub struct StorageRegistry<B: StorageBackend> {
    entries: Vec<StorageRegistration<B>, MAX_STORAGES>,
}

impl<B: StorageBackend> Default for StorageRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StorageBackend> StorageRegistry<B> {
    pub const fn new() -> Self {
        StorageRegistry {
            entries: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        storage_id: u32,
        backend: B,
        context: B::Context,
    ) -> Result<(), RegistryError> {
        if self.contains(storage_id) {
            return Err(RegistryError::DuplicateId(storage_id));
        }
        self.entries
            .push(StorageRegistration {
                storage_id,
                backend,
                context,
            })
            .map_err(|_| RegistryError::Full)
    }

    /// Removes a storage, handing back its backend and context.
    pub fn unregister(&mut self, storage_id: u32) -> Option<(B, B::Context)> {
        let index = self.position(storage_id)?;
        let entry = self.entries.remove(index);
        Some((entry.backend, entry.context))
    }

    pub fn resolve(&mut self, storage_id: u32) -> Result<&mut StorageRegistration<B>, RegistryError> {
        let index = self
            .position(storage_id)
            .ok_or(RegistryError::NotFound(storage_id))?;
        Ok(&mut self.entries[index])
    }

    pub fn contains(&self, storage_id: u32) -> bool {
        self.position(storage_id).is_some()
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|entry| entry.storage_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StorageRegistration<B>> {
        self.entries.iter_mut()
    }

    /// Finds the storage holding `handle`. Object handles are global to the
    /// device, so every backend is asked in turn.
    pub fn locate(&mut self, handle: u32) -> Result<&mut StorageRegistration<B>, StorageError> {
        let index = self
            .entries
            .iter_mut()
            .position(|entry| entry.backend.stat(&mut entry.context, handle).is_ok())
            .ok_or(StorageError::NotFound)?;
        Ok(&mut self.entries[index])
    }

    fn position(&self, storage_id: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.storage_id == storage_id)
    }
}
