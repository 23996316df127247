//! MTP/PTP protocol constants.

/// USB interface triple advertised by the MTP function.
pub const USB_CLASS_APPN_SPEC: u8 = 0x06;
pub const APPN_SPEC_SUBCLASS_MTP: u8 = 0x01;
pub const MTP_PROTOCOL_MTP: u8 = 0x01;

/// Size of the fixed container header.
pub const HEADER_SIZE: usize = 12;
/// A PTP command or response carries at most five parameters.
pub const MAX_PARAMS: usize = 5;

/// Parent handle meaning "root of the storage".
pub const ROOT_PARENT: u32 = 0xFFFF_FFFF;
/// Storage id wildcard accepted by the enumeration operations.
pub const ALL_STORAGES: u32 = 0xFFFF_FFFF;

pub const STANDARD_VERSION: u16 = 100;
pub const VENDOR_EXTENSION_ID: u32 = 6; // Microsoft
pub const VENDOR_EXTENSION_VERSION: u16 = 100;

/// Object property code for the file name.
pub const PROP_OBJECT_FILE_NAME: u16 = 0xDC07;

pub const FORMAT_UNDEFINED: u16 = 0x3000;
pub const FORMAT_ASSOCIATION: u16 = 0x3001;
pub const FORMAT_TEXT: u16 = 0x3004;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

impl TryFrom<u16> for ContainerType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ContainerType::Command),
            2 => Ok(ContainerType::Data),
            3 => Ok(ContainerType::Response),
            4 => Ok(ContainerType::Event),
            other => Err(other),
        }
    }
}

/// Operations served by the responder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIds = 0x1004,
    GetStorageInfo = 0x1005,
    GetNumObjects = 0x1006,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    SetObjectPropValue = 0x9804,
}

impl TryFrom<u16> for OperationCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x1001 => Ok(OperationCode::GetDeviceInfo),
            0x1002 => Ok(OperationCode::OpenSession),
            0x1003 => Ok(OperationCode::CloseSession),
            0x1004 => Ok(OperationCode::GetStorageIds),
            0x1005 => Ok(OperationCode::GetStorageInfo),
            0x1006 => Ok(OperationCode::GetNumObjects),
            0x1007 => Ok(OperationCode::GetObjectHandles),
            0x1008 => Ok(OperationCode::GetObjectInfo),
            0x1009 => Ok(OperationCode::GetObject),
            0x100B => Ok(OperationCode::DeleteObject),
            0x100C => Ok(OperationCode::SendObjectInfo),
            0x100D => Ok(OperationCode::SendObject),
            0x9804 => Ok(OperationCode::SetObjectPropValue),
            other => Err(other),
        }
    }
}

/// Result codes carried in the response container.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 0x2001,
    /// Malformed container or a data block without a matching transaction.
    /// Sent as General_Error.
    InvalidRequest = 0x2002,
    SessionNotOpen = 0x2003,
    OperationNotSupported = 0x2005,
    IncompleteTransfer = 0x2007,
    InvalidStorageId = 0x2008,
    InvalidObjectHandle = 0x2009,
    InvalidObjectFormatCode = 0x200B,
    StoreFull = 0x200C,
    StoreReadOnly = 0x200E,
    AccessDenied = 0x200F,
    StoreNotAvailable = 0x2013,
    NoValidObjectInfo = 0x2015,
    DeviceBusy = 0x2019,
    InvalidParentObject = 0x201A,
    InvalidParameter = 0x201D,
    SessionAlreadyOpen = 0x201E,
    InvalidObjectPropCode = 0xA801,
    InvalidDataset = 0xA806,
}

impl ResponseCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl From<ResponseCode> for u16 {
    fn from(value: ResponseCode) -> Self {
        value as u16
    }
}

/// StorageInfo storage types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum StorageType {
    FixedRom = 0x0001,
    RemovableRom = 0x0002,
    FixedRam = 0x0003,
    RemovableRam = 0x0004,
}

/// StorageInfo access capabilities.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum AccessCapability {
    ReadWrite = 0x0000,
    ReadOnlyWithoutDeletion = 0x0001,
    ReadOnlyWithDeletion = 0x0002,
}

pub const FILESYSTEM_GENERIC_HIERARCHICAL: u16 = 0x0002;
