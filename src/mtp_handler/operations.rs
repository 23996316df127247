//! Operation table and handlers.
//!
//! Handlers receive already validated inputs: the storage referenced by the
//! command exists, and for data-phase operations the data block belongs to the
//! pending transaction. They return the response parameters, or the response
//! code describing the failure.

use tracing::{debug, warn};

use super::consts::{
    ContainerType, OperationCode, ResponseCode, PROP_OBJECT_FILE_NAME, STANDARD_VERSION,
    VENDOR_EXTENSION_ID, VENDOR_EXTENSION_VERSION,
};
use super::container::{DataWriter, Params};
use super::dataset;
use super::storage::{ParentFilter, StorageBackend, StorageRegistry};
use crate::config::ResponderConfig;

/// Where a command carries the storage id it operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageParam {
    None,
    At(usize),
    /// Like `At`, but `ALL_STORAGES` selects every registered storage.
    AtOrAll(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataPhase {
    None,
    DeviceToHost,
    HostToDevice,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub operation: OperationCode,
    pub storage: StorageParam,
    pub phase: DataPhase,
}

const fn op(operation: OperationCode, storage: StorageParam, phase: DataPhase) -> OperationDescriptor {
    OperationDescriptor {
        operation,
        storage,
        phase,
    }
}

/// Every operation the responder serves, in the order advertised by
/// GetDeviceInfo.
pub const OPERATIONS: [OperationDescriptor; 13] = [
    op(OperationCode::GetDeviceInfo, StorageParam::None, DataPhase::DeviceToHost),
    op(OperationCode::OpenSession, StorageParam::None, DataPhase::None),
    op(OperationCode::CloseSession, StorageParam::None, DataPhase::None),
    op(OperationCode::GetStorageIds, StorageParam::None, DataPhase::DeviceToHost),
    op(OperationCode::GetStorageInfo, StorageParam::At(0), DataPhase::DeviceToHost),
    op(OperationCode::GetNumObjects, StorageParam::AtOrAll(0), DataPhase::None),
    op(OperationCode::GetObjectHandles, StorageParam::AtOrAll(0), DataPhase::DeviceToHost),
    op(OperationCode::GetObjectInfo, StorageParam::None, DataPhase::DeviceToHost),
    op(OperationCode::GetObject, StorageParam::None, DataPhase::DeviceToHost),
    op(OperationCode::DeleteObject, StorageParam::None, DataPhase::None),
    op(OperationCode::SendObjectInfo, StorageParam::At(0), DataPhase::HostToDevice),
    op(OperationCode::SendObject, StorageParam::None, DataPhase::HostToDevice),
    op(OperationCode::SetObjectPropValue, StorageParam::None, DataPhase::HostToDevice),
];

pub fn descriptor(code: u16) -> Option<&'static OperationDescriptor> {
    OPERATIONS
        .iter()
        .find(|descriptor| descriptor.operation as u16 == code)
}

/// Object created by the last successful SendObjectInfo, receiving the
/// content of the following SendObject.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectTarget {
    pub storage_id: u32,
    pub handle: u32,
}

pub(crate) struct OperationContext<'a, B: StorageBackend> {
    pub registry: &'a mut StorageRegistry<B>,
    pub config: &'a ResponderConfig,
    pub session: &'a mut Option<u32>,
    pub object_target: &'a mut Option<ObjectTarget>,
    /// Scratch buffer receiving a device-to-host data container.
    pub data: &'a mut [u8],
}

pub(crate) struct Request<'a> {
    pub operation: OperationCode,
    pub transaction_id: u32,
    pub params: &'a [u32],
    /// Storage resolved at command time; `None` for operations without a
    /// storage parameter and for the all-storages wildcard.
    pub storage_id: Option<u32>,
    /// Data-phase payload, empty for single-phase operations.
    pub payload: &'a [u8],
}

impl Request<'_> {
    fn param(&self, index: usize) -> u32 {
        self.params.get(index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Reply {
    pub params: Params,
    /// Length of the data container written to the scratch buffer.
    pub data_len: usize,
}

impl Reply {
    fn with_params(values: &[u32]) -> Self {
        Reply {
            params: values.iter().copied().collect(),
            data_len: 0,
        }
    }

    fn with_data(data_len: usize) -> Self {
        Reply {
            params: Params::new(),
            data_len,
        }
    }
}

pub(crate) type HandlerResult = Result<Reply, ResponseCode>;

/// Command-phase checks of host-to-device operations, run before the
/// transaction is parked waiting for its data.
pub(crate) fn accept_command(
    operation: OperationCode,
    params: &[u32],
    object_target: Option<ObjectTarget>,
) -> Result<(), ResponseCode> {
    match operation {
        OperationCode::SendObject if object_target.is_none() => Err(ResponseCode::NoValidObjectInfo),
        OperationCode::SetObjectPropValue => match params.get(1) {
            Some(&prop) if prop == u32::from(PROP_OBJECT_FILE_NAME) => Ok(()),
            _ => Err(ResponseCode::InvalidObjectPropCode),
        },
        _ => Ok(()),
    }
}

pub(crate) fn execute<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    match request.operation {
        OperationCode::GetDeviceInfo => get_device_info(ctx, request),
        OperationCode::OpenSession => open_session(ctx, request),
        OperationCode::CloseSession => close_session(ctx),
        OperationCode::GetStorageIds => get_storage_ids(ctx, request),
        OperationCode::GetStorageInfo => get_storage_info(ctx, request),
        OperationCode::GetNumObjects => get_num_objects(ctx, request),
        OperationCode::GetObjectHandles => get_object_handles(ctx, request),
        OperationCode::GetObjectInfo => get_object_info(ctx, request),
        OperationCode::GetObject => get_object(ctx, request),
        OperationCode::DeleteObject => delete_object(ctx, request),
        OperationCode::SendObjectInfo => send_object_info(ctx, request),
        OperationCode::SendObject => send_object(ctx, request),
        OperationCode::SetObjectPropValue => set_object_prop_value(ctx, request),
    }
}

fn finish_data(writer: DataWriter<'_>, request: &Request<'_>) -> HandlerResult {
    let len = writer.finish_container(
        ContainerType::Data,
        request.operation as u16,
        request.transaction_id,
    )?;
    Ok(Reply::with_data(len))
}

fn get_device_info<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let config = ctx.config;
    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    writer.write_u16(STANDARD_VERSION)?;
    writer.write_u32(VENDOR_EXTENSION_ID)?;
    writer.write_u16(VENDOR_EXTENSION_VERSION)?;
    writer.write_string(&config.vendor_extension_desc)?;
    writer.write_u16(0)?; // FunctionalMode

    writer.write_u32(OPERATIONS.len() as u32)?;
    for descriptor in OPERATIONS.iter() {
        writer.write_u16(descriptor.operation as u16)?;
    }
    writer.write_u16_array(&[])?; // EventsSupported
    writer.write_u16_array(&[])?; // DevicePropertiesSupported
    writer.write_u16_array(&[])?; // CaptureFormats
    writer.write_u16_array(&config.playback_formats)?;

    writer.write_string(&config.manufacturer)?;
    writer.write_string(&config.model)?;
    writer.write_string(&config.device_version)?;
    writer.write_string(&config.serial_number)?;
    finish_data(writer, request)
}

fn open_session<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let session_id = request.param(0);
    if session_id == 0 {
        return Err(ResponseCode::InvalidParameter);
    }
    if ctx.session.is_some() {
        return Err(ResponseCode::SessionAlreadyOpen);
    }
    *ctx.session = Some(session_id);
    debug!("session {} opened", session_id);
    Ok(Reply::default())
}

fn close_session<B: StorageBackend>(ctx: &mut OperationContext<'_, B>) -> HandlerResult {
    let session_id = ctx.session.take().ok_or(ResponseCode::SessionNotOpen)?;
    *ctx.object_target = None;
    debug!("session {} closed", session_id);
    Ok(Reply::default())
}

fn get_storage_ids<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    writer.write_u32(ctx.registry.len() as u32)?;
    for storage_id in ctx.registry.ids() {
        writer.write_u32(storage_id)?;
    }
    finish_data(writer, request)
}

fn get_storage_info<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let storage_id = request.storage_id.ok_or(ResponseCode::InvalidStorageId)?;
    let registration = ctx
        .registry
        .resolve(storage_id)
        .map_err(|_| ResponseCode::InvalidStorageId)?;
    let info = registration
        .backend
        .storage_info(&mut registration.context)?;

    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    writer.write_u16(info.storage_type as u16)?;
    writer.write_u16(info.filesystem_type)?;
    writer.write_u16(info.access as u16)?;
    writer.write_u64(info.max_capacity)?;
    writer.write_u64(info.free_space)?;
    writer.write_u32(info.free_objects)?;
    writer.write_string(&info.description)?;
    writer.write_string(&info.volume_id)?;
    finish_data(writer, request)
}

/// Visits the objects selected by the (storage, format, parent) parameters
/// shared by GetNumObjects and GetObjectHandles.
fn for_each_object<B: StorageBackend>(
    registry: &mut StorageRegistry<B>,
    request: &Request<'_>,
    visit: &mut dyn FnMut(u32),
) -> Result<(), ResponseCode> {
    let format = match request.param(1) {
        0 => None,
        format => Some(u16::try_from(format).map_err(|_| ResponseCode::InvalidObjectFormatCode)?),
    };
    let parent = ParentFilter::from_param(request.param(2));

    match request.storage_id {
        Some(storage_id) => {
            let registration = registry
                .resolve(storage_id)
                .map_err(|_| ResponseCode::InvalidStorageId)?;
            registration
                .backend
                .enumerate(&mut registration.context, format, parent, visit)?;
        }
        None => {
            for registration in registry.iter_mut() {
                registration
                    .backend
                    .enumerate(&mut registration.context, format, parent, &mut *visit)?;
            }
        }
    }
    Ok(())
}

fn get_num_objects<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let mut count = 0u32;
    for_each_object(ctx.registry, request, &mut |_: u32| count += 1)?;
    Ok(Reply::with_params(&[count]))
}

fn get_object_handles<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    // count prefix is filled in once the handles are out
    let count_at = writer.len();
    writer.write_u32(0)?;

    let mut count = 0u32;
    let mut overflow = None;
    for_each_object(ctx.registry, request, &mut |handle: u32| {
        if overflow.is_none() {
            match writer.write_u32(handle) {
                Ok(()) => count += 1,
                Err(err) => overflow = Some(err),
            }
        }
    })?;
    if let Some(err) = overflow {
        return Err(err.into());
    }
    writer.patch_u32(count_at, count)?;
    finish_data(writer, request)
}

fn get_object_info<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let handle = request.param(0);
    let registration = ctx.registry.locate(handle)?;
    let mut info = registration.backend.stat(&mut registration.context, handle)?;
    info.storage_id = registration.storage_id;

    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    dataset::write_object_info(&mut writer, &info)?;
    finish_data(writer, request)
}

fn get_object<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let handle = request.param(0);
    let registration = ctx.registry.locate(handle)?;
    let info = registration.backend.stat(&mut registration.context, handle)?;

    let mut writer = DataWriter::begin_container(&mut *ctx.data)?;
    let spare = writer.spare_mut();
    let size = usize::try_from(info.object_size)
        .ok()
        .filter(|size| *size <= spare.len())
        .ok_or(ResponseCode::IncompleteTransfer)?;
    let read = registration
        .backend
        .read(&mut registration.context, handle, 0, &mut spare[..size])?;
    writer.advance(read)?;
    finish_data(writer, request)
}

fn delete_object<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let handle = request.param(0);
    let registration = ctx.registry.locate(handle)?;
    registration.backend.delete(&mut registration.context, handle)?;
    if ctx.object_target.is_some_and(|target| target.handle == handle) {
        *ctx.object_target = None;
    }
    debug!("object {:#010x} deleted", handle);
    Ok(Reply::default())
}

/// SendObjectInfo data phase: decode, check the format, then create.
/// `create` is only reached for formats the backend accepts.
fn send_object_info<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let storage_id = request.storage_id.ok_or(ResponseCode::InvalidStorageId)?;
    let registration = ctx
        .registry
        .resolve(storage_id)
        .map_err(|_| ResponseCode::InvalidStorageId)?;

    let mut info = registration
        .backend
        .deserialize_object_info(&mut registration.context, request.payload)?;
    if !registration
        .backend
        .is_format_supported(&mut registration.context, info.object_format)
    {
        return Err(ResponseCode::InvalidObjectFormatCode);
    }

    // a parent given with the command wins over the dataset's
    let parent = match request.param(1) {
        0 => info.parent_object,
        parent => parent,
    };
    info.parent_object = parent;
    info.storage_id = storage_id;

    let handle = registration
        .backend
        .create(&mut registration.context, &info)
        .map_err(|err| {
            warn!("creating {} failed: {}", info.filename.as_str(), err);
            ResponseCode::StoreNotAvailable
        })?;
    *ctx.object_target = Some(ObjectTarget { storage_id, handle });
    debug!(
        "object {:#010x} created as {} on storage {:#010x}",
        handle,
        info.filename.as_str(),
        storage_id
    );
    Ok(Reply::with_params(&[storage_id, parent, handle]))
}

fn send_object<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let target = ctx
        .object_target
        .take()
        .ok_or(ResponseCode::NoValidObjectInfo)?;
    let registration = ctx
        .registry
        .resolve(target.storage_id)
        .map_err(|_| ResponseCode::InvalidStorageId)?;
    registration.backend.write(
        &mut registration.context,
        target.handle,
        0,
        request.payload,
    )?;
    Ok(Reply::default())
}

fn set_object_prop_value<B: StorageBackend>(
    ctx: &mut OperationContext<'_, B>,
    request: &Request<'_>,
) -> HandlerResult {
    let handle = request.param(0);
    let name = dataset::parse_filename(request.payload)?;
    let registration = ctx.registry.locate(handle)?;
    registration
        .backend
        .rename(&mut registration.context, handle, &name)?;
    Ok(Reply::default())
}
