//! ObjectInfo dataset decoding and encoding.
//!
//! Pure functions over byte slices, no storage access, so the data phase can
//! be validated before any backend is touched.

use heapless::String;
use thiserror::Error;

use super::consts::ResponseCode;
use super::container::{DataReader, DataWriter, EncodeError};

/// Bytes of the fixed-width ObjectInfo fields preceding the filename.
pub const FIXED_FIELDS_LEN: usize = 52;

/// UTF-16 units a PTP string can carry besides its terminating null.
pub const MAX_STRING_UNITS: usize = 254;

/// Any PTP string fits: a UTF-16 unit never takes more than 3 UTF-8 bytes
/// (a surrogate pair is two units and four bytes).
pub const MAX_FILENAME_BYTES: usize = MAX_STRING_UNITS * 3;
/// Dates are ASCII ISO 8601 stamps.
pub const MAX_DATE_BYTES: usize = 32;
pub const MAX_KEYWORDS_BYTES: usize = MAX_STRING_UNITS * 3;

pub type Filename = String<MAX_FILENAME_BYTES>;
pub type DateString = String<MAX_DATE_BYTES>;
pub type Keywords = String<MAX_KEYWORDS_BYTES>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("dataset ends inside the fixed fields")]
    Truncated,
    #[error("string field runs past the end of the dataset")]
    StringOverrun,
    #[error("string field is not null terminated")]
    Unterminated,
    #[error("string field is not valid UTF-16")]
    InvalidUtf16,
    #[error("string field exceeds {0} bytes")]
    TooLong(usize),
    #[error("object filename is empty")]
    EmptyFilename,
}

impl From<DatasetError> for ResponseCode {
    fn from(_: DatasetError) -> Self {
        ResponseCode::InvalidDataset
    }
}

/// Object metadata as sent with SendObjectInfo and returned by GetObjectInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    /// Widened from the 32-bit compressed size field.
    pub object_size: u64,
    pub thumb_format: u16,
    pub image_width: u32,
    pub image_height: u32,
    pub image_bit_depth: u32,
    /// `ROOT_PARENT` for objects at the storage root.
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: Filename,
    pub date_created: DateString,
    pub date_modified: DateString,
    pub keywords: Keywords,
}

/// Decodes an ObjectInfo dataset.
pub fn parse_object_info(bytes: &[u8]) -> Result<ObjectInfo, DatasetError> {
    if bytes.len() < FIXED_FIELDS_LEN + 1 {
        return Err(DatasetError::Truncated);
    }
    let mut reader = DataReader::new(bytes);
    let mut info = ObjectInfo::default();
    read_fixed_fields(&mut reader, &mut info).ok_or(DatasetError::Truncated)?;

    info.filename = read_string(&mut reader)?;
    if info.filename.is_empty() {
        return Err(DatasetError::EmptyFilename);
    }
    info.date_created = read_string(&mut reader)?;
    info.date_modified = read_string(&mut reader)?;
    info.keywords = read_string(&mut reader)?;
    Ok(info)
}

fn read_fixed_fields(reader: &mut DataReader<'_>, info: &mut ObjectInfo) -> Option<()> {
    info.storage_id = reader.read_u32()?;
    info.object_format = reader.read_u16()?;
    info.protection_status = reader.read_u16()?;
    info.object_size = u64::from(reader.read_u32()?);
    info.thumb_format = reader.read_u16()?;
    // thumb compressed size, width, height
    reader.skip(12)?;
    info.image_width = reader.read_u32()?;
    info.image_height = reader.read_u32()?;
    info.image_bit_depth = reader.read_u32()?;
    info.parent_object = reader.read_u32()?;
    info.association_type = reader.read_u16()?;
    info.association_desc = reader.read_u32()?;
    info.sequence_number = reader.read_u32()?;
    Some(())
}

/// Decodes a dataset made of a single non-empty PTP string, as sent when
/// setting the file name property.
pub fn parse_filename(bytes: &[u8]) -> Result<Filename, DatasetError> {
    let mut reader = DataReader::new(bytes);
    let name: Filename = read_string(&mut reader)?;
    if name.is_empty() {
        return Err(DatasetError::EmptyFilename);
    }
    Ok(name)
}

/// Reads a PTP string: a u8 count of UTF-16 units including the terminating
/// null, then the units. The declared count is checked against the buffer and
/// the decoded text against the capacity `N`.
pub fn read_string<const N: usize>(reader: &mut DataReader<'_>) -> Result<String<N>, DatasetError> {
    let count = usize::from(reader.read_u8().ok_or(DatasetError::StringOverrun)?);
    let mut out = String::new();
    if count == 0 {
        return Ok(out);
    }
    let raw = reader.take(count * 2).ok_or(DatasetError::StringOverrun)?;
    if raw[raw.len() - 2..] != [0, 0] {
        return Err(DatasetError::Unterminated);
    }

    let units = raw
        .chunks_exact(2)
        .take(count - 1)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]));
    for ch in char::decode_utf16(units) {
        let ch = ch.map_err(|_| DatasetError::InvalidUtf16)?;
        if ch == '\0' {
            break;
        }
        out.push(ch).map_err(|_| DatasetError::TooLong(N))?;
    }
    Ok(out)
}

/// Encodes `info` as an ObjectInfo dataset.
pub fn write_object_info(writer: &mut DataWriter<'_>, info: &ObjectInfo) -> Result<(), EncodeError> {
    writer.write_u32(info.storage_id)?;
    writer.write_u16(info.object_format)?;
    writer.write_u16(info.protection_status)?;
    writer.write_u32(u32::try_from(info.object_size).unwrap_or(u32::MAX))?;
    writer.write_u16(info.thumb_format)?;
    writer.write_u32(0)?; // thumb compressed size
    writer.write_u32(0)?; // thumb width
    writer.write_u32(0)?; // thumb height
    writer.write_u32(info.image_width)?;
    writer.write_u32(info.image_height)?;
    writer.write_u32(info.image_bit_depth)?;
    writer.write_u32(info.parent_object)?;
    writer.write_u16(info.association_type)?;
    writer.write_u32(info.association_desc)?;
    writer.write_u32(info.sequence_number)?;
    writer.write_string(&info.filename)?;
    writer.write_string(&info.date_created)?;
    writer.write_string(&info.date_modified)?;
    writer.write_string(&info.keywords)
}
