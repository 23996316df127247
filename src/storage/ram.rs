//! Volatile storage backed by a fixed-size handle table.

use heapless::{String, Vec};

use crate::mtp_handler::consts::{
    AccessCapability, StorageType, FILESYSTEM_GENERIC_HIERARCHICAL, FORMAT_ASSOCIATION,
    FORMAT_TEXT, FORMAT_UNDEFINED, ROOT_PARENT,
};
use crate::mtp_handler::dataset::ObjectInfo;
use crate::mtp_handler::storage::{ParentFilter, StorageBackend, StorageError, StorageInfo};

/// Content bytes each object can hold.
pub const RAM_OBJECT_CAPACITY: usize = 512;

const MAX_FORMATS: usize = 8;

struct RamObject {
    handle: u32,
    info: ObjectInfo,
    content: Vec<u8, RAM_OBJECT_CAPACITY>,
}

/// Storage holding at most `N` objects in RAM.
///
/// Handles are allocated from a monotonically increasing counter and never
/// reused while the storage lives. Give each instance a distinct handle base
/// when several are registered, since object handles are device-wide.
pub struct RamStorage<const N: usize> {
    objects: Vec<RamObject, N>,
    next_handle: u32,
    formats: Vec<u16, MAX_FORMATS>,
    read_only: bool,
    description: String<64>,
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamStorage<N> {
    pub fn new() -> Self {
        Self::with_handle_base(1)
    }

    pub fn with_handle_base(first_handle: u32) -> Self {
        let mut formats = Vec::new();
        for format in [FORMAT_UNDEFINED, FORMAT_ASSOCIATION, FORMAT_TEXT] {
            let _ = formats.push(format);
        }
        let mut description = String::new();
        let _ = description.push_str("RAM");
        RamStorage {
            objects: Vec::new(),
            next_handle: first_handle,
            formats,
            read_only: false,
            description,
        }
    }

    /// Replaces the accepted object formats. Formats beyond the table size
    /// are ignored.
    pub fn set_formats(&mut self, formats: &[u16]) {
        self.formats.clear();
        for format in formats.iter().take(MAX_FORMATS) {
            let _ = self.formats.push(*format);
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn find(&self, handle: u32) -> Result<&RamObject, StorageError> {
        self.objects
            .iter()
            .find(|object| object.handle == handle)
            .ok_or(StorageError::NotFound)
    }

    fn find_mut(&mut self, handle: u32) -> Result<&mut RamObject, StorageError> {
        self.objects
            .iter_mut()
            .find(|object| object.handle == handle)
            .ok_or(StorageError::NotFound)
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn used_bytes(&self) -> u64 {
        self.objects
            .iter()
            .map(|object| object.content.len() as u64)
            .sum()
    }

    fn is_orphan(&self, object: &RamObject) -> bool {
        object.info.parent_object != ROOT_PARENT
            && !self
                .objects
                .iter()
                .any(|other| other.handle == object.info.parent_object)
    }
}

impl<const N: usize> StorageBackend for RamStorage<N> {
    type Context = ();

    fn storage_info(&mut self, _ctx: &mut ()) -> Result<StorageInfo, StorageError> {
        let max_capacity = (N * RAM_OBJECT_CAPACITY) as u64;
        Ok(StorageInfo {
            storage_type: StorageType::FixedRam,
            filesystem_type: FILESYSTEM_GENERIC_HIERARCHICAL,
            access: if self.read_only {
                AccessCapability::ReadOnlyWithoutDeletion
            } else {
                AccessCapability::ReadWrite
            },
            max_capacity,
            free_space: max_capacity - self.used_bytes(),
            free_objects: (N - self.objects.len()) as u32,
            description: self.description.clone(),
            volume_id: String::new(),
        })
    }

    fn is_format_supported(&mut self, _ctx: &mut (), format: u16) -> bool {
        self.formats.contains(&format)
    }

    fn create(&mut self, _ctx: &mut (), info: &ObjectInfo) -> Result<u32, StorageError> {
        self.ensure_writable()?;
        let parent = match info.parent_object {
            0 | ROOT_PARENT => ROOT_PARENT,
            handle => {
                let parent = self.find(handle).map_err(|_| StorageError::InvalidParent)?;
                if parent.info.object_format != FORMAT_ASSOCIATION {
                    return Err(StorageError::InvalidParent);
                }
                handle
            }
        };
        if info.object_size > RAM_OBJECT_CAPACITY as u64 {
            return Err(StorageError::Full);
        }

        let handle = self.next_handle;
        let mut stored = info.clone();
        stored.parent_object = parent;
        self.objects
            .push(RamObject {
                handle,
                info: stored,
                content: Vec::new(),
            })
            .map_err(|_| StorageError::Full)?;
        self.next_handle = self.next_handle.wrapping_add(1);
        Ok(handle)
    }

    fn stat(&mut self, _ctx: &mut (), handle: u32) -> Result<ObjectInfo, StorageError> {
        self.find(handle).map(|object| object.info.clone())
    }

    fn enumerate(
        &mut self,
        _ctx: &mut (),
        format: Option<u16>,
        parent: ParentFilter,
        visit: &mut dyn FnMut(u32),
    ) -> Result<(), StorageError> {
        self.objects
            .iter()
            .filter(|object| format.is_none_or(|format| object.info.object_format == format))
            .filter(|object| parent.matches(object.info.parent_object))
            .for_each(|object| visit(object.handle));
        Ok(())
    }

    fn delete(&mut self, _ctx: &mut (), handle: u32) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let index = self
            .objects
            .iter()
            .position(|object| object.handle == handle)
            .ok_or(StorageError::NotFound)?;
        self.objects.swap_remove(index);

        // drop everything that lived below the removed folder
        loop {
            let Some(orphan) = self
                .objects
                .iter()
                .position(|object| self.is_orphan(object))
            else {
                break;
            };
            self.objects.swap_remove(orphan);
        }
        Ok(())
    }

    fn rename(&mut self, _ctx: &mut (), handle: u32, name: &str) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let object = self.find_mut(handle)?;
        object.info.filename.clear();
        object
            .info
            .filename
            .push_str(name)
            .map_err(|_| StorageError::AccessDenied)
    }

    fn read(
        &mut self,
        _ctx: &mut (),
        handle: u32,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        let content = &self.find(handle)?.content;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(content.len());
        let len = buf.len().min(content.len() - start);
        buf[..len].copy_from_slice(&content[start..start + len]);
        Ok(len)
    }

    fn write(
        &mut self,
        _ctx: &mut (),
        handle: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let object = self.find_mut(handle)?;
        let offset = usize::try_from(offset).map_err(|_| StorageError::Full)?;
        if offset > object.content.len() {
            return Err(StorageError::AccessDenied);
        }
        object.content.truncate(offset);
        object
            .content
            .extend_from_slice(data)
            .map_err(|_| StorageError::Full)?;
        object.info.object_size = object.content.len() as u64;
        Ok(())
    }
}
