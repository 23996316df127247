//! Backend shared between several responders.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::mtp_handler::dataset::{DatasetError, ObjectInfo};
use crate::mtp_handler::storage::{ParentFilter, StorageBackend, StorageError, StorageInfo};

/// Forwards every call to a backend guarded by a blocking mutex, so one
/// storage can be registered with responders serving different interfaces.
/// Each registration keeps its own context.
pub struct SharedStorage<'a, M: RawMutex, B> {
    inner: &'a Mutex<M, RefCell<B>>,
}

impl<'a, M: RawMutex, B> SharedStorage<'a, M, B> {
    pub fn new(inner: &'a Mutex<M, RefCell<B>>) -> Self {
        SharedStorage { inner }
    }

    fn with<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<M: RawMutex, B: StorageBackend> StorageBackend for SharedStorage<'_, M, B> {
    type Context = B::Context;

    fn storage_info(&mut self, ctx: &mut Self::Context) -> Result<StorageInfo, StorageError> {
        self.with(|backend| backend.storage_info(ctx))
    }

    fn is_format_supported(&mut self, ctx: &mut Self::Context, format: u16) -> bool {
        self.with(|backend| backend.is_format_supported(ctx, format))
    }

    fn deserialize_object_info(
        &mut self,
        ctx: &mut Self::Context,
        bytes: &[u8],
    ) -> Result<ObjectInfo, DatasetError> {
        self.with(|backend| backend.deserialize_object_info(ctx, bytes))
    }

    fn create(&mut self, ctx: &mut Self::Context, info: &ObjectInfo) -> Result<u32, StorageError> {
        self.with(|backend| backend.create(ctx, info))
    }

    fn stat(&mut self, ctx: &mut Self::Context, handle: u32) -> Result<ObjectInfo, StorageError> {
        self.with(|backend| backend.stat(ctx, handle))
    }

    fn enumerate(
        &mut self,
        ctx: &mut Self::Context,
        format: Option<u16>,
        parent: ParentFilter,
        visit: &mut dyn FnMut(u32),
    ) -> Result<(), StorageError> {
        self.with(|backend| backend.enumerate(ctx, format, parent, visit))
    }

    fn delete(&mut self, ctx: &mut Self::Context, handle: u32) -> Result<(), StorageError> {
        self.with(|backend| backend.delete(ctx, handle))
    }

    fn rename(&mut self, ctx: &mut Self::Context, handle: u32, name: &str) -> Result<(), StorageError> {
        self.with(|backend| backend.rename(ctx, handle, name))
    }

    fn read(
        &mut self,
        ctx: &mut Self::Context,
        handle: u32,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        self.with(|backend| backend.read(ctx, handle, offset, buf))
    }

    fn write(
        &mut self,
        ctx: &mut Self::Context,
        handle: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.with(|backend| backend.write(ctx, handle, offset, data))
    }
}
