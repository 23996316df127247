//! Container codec.
//!
//! Every MTP exchange is a container: a fixed 12 byte little-endian header
//! (`length`, `type`, `code`, `transaction_id`) followed by a payload. Command
//! and response payloads are up to five `u32` parameters, data payloads are
//! opaque datasets.

use thiserror::Error;

use super::consts::{ContainerType, ResponseCode, HEADER_SIZE, MAX_PARAMS};

/// Parameters of a command or response block.
pub type Params = heapless::Vec<u32, MAX_PARAMS>;

/// Errors returned by [`decode`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer of {0} bytes is shorter than the container header")]
    Truncated(usize),
    #[error("container length {declared} is inconsistent with {actual} delivered bytes")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("unknown container type {0:#06x}")]
    UnknownBlockType(u16),
    #[error("container carries more than five parameters")]
    TooManyParameters,
}

/// Errors returned while building an outgoing container.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("output buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("string longer than 254 UTF-16 units")]
    StringTooLong,
}

impl From<EncodeError> for ResponseCode {
    /// A data container that does not fit the scratch buffer cannot be sent
    /// in one piece.
    fn from(_: EncodeError) -> Self {
        ResponseCode::IncompleteTransfer
    }
}

/// A decoded container borrowing its payload from the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Container<'a> {
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
    pub payload: &'a [u8],
}

impl<'a> Container<'a> {
    /// Parameters of a command or response block. Only meaningful for those
    /// block types; `decode` guarantees the payload length is a multiple of 4.
    pub fn params(&self) -> impl Iterator<Item = u32> + 'a {
        self.payload
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn param(&self, index: usize) -> Option<u32> {
        self.params().nth(index)
    }

    /// Parameters collected into a bounded vector.
    pub fn param_vec(&self) -> Params {
        // `decode` caps the parameter count, so nothing is dropped here.
        self.params().take(MAX_PARAMS).collect()
    }
}

/// Decodes one complete container.
///
/// The buffer must hold exactly one container: its length has to match the
/// `length` field of the header.
pub fn decode(buf: &[u8]) -> Result<Container<'_>, DecodeError> {
    let mut reader = DataReader::new(buf);
    let (Some(declared), Some(raw_kind), Some(code), Some(transaction_id)) = (
        reader.read_u32(),
        reader.read_u16(),
        reader.read_u16(),
        reader.read_u32(),
    ) else {
        return Err(DecodeError::Truncated(buf.len()));
    };

    if declared as usize != buf.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }
    let kind = ContainerType::try_from(raw_kind).map_err(DecodeError::UnknownBlockType)?;
    let payload = &buf[HEADER_SIZE..];

    if matches!(kind, ContainerType::Command | ContainerType::Response) {
        if payload.len() % 4 != 0 {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        if payload.len() / 4 > MAX_PARAMS {
            return Err(DecodeError::TooManyParameters);
        }
    }

    Ok(Container {
        kind,
        code,
        transaction_id,
        payload,
    })
}

/// Encodes a container with an opaque payload into `out`, returning its length.
pub fn encode(
    out: &mut [u8],
    kind: ContainerType,
    code: u16,
    transaction_id: u32,
    payload: &[u8],
) -> Result<usize, EncodeError> {
    let mut writer = DataWriter::begin_container(out)?;
    writer.write_bytes(payload)?;
    writer.finish_container(kind, code, transaction_id)
}

/// Encodes a container whose payload is a list of `u32` parameters.
pub fn encode_params(
    out: &mut [u8],
    kind: ContainerType,
    code: u16,
    transaction_id: u32,
    params: &[u32],
) -> Result<usize, EncodeError> {
    let mut writer = DataWriter::begin_container(out)?;
    for param in params {
        writer.write_u32(*param)?;
    }
    writer.finish_container(kind, code, transaction_id)
}

/// Bounds-checked little-endian cursor over a received payload.
pub struct DataReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> DataReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        DataReader { buf, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let bytes = self.buf.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            u64::from_le_bytes(raw)
        })
    }
}

/// Bounds-checked little-endian writer used to build outgoing containers.
pub struct DataWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> DataWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        DataWriter { buf, offset: 0 }
    }

    /// Starts a container: the header is reserved and filled in by
    /// [`DataWriter::finish_container`].
    pub fn begin_container(buf: &'a mut [u8]) -> Result<Self, EncodeError> {
        let mut writer = DataWriter::new(buf);
        writer.reserve(HEADER_SIZE)?;
        Ok(writer)
    }

    /// Writes the header of a container started with
    /// [`DataWriter::begin_container`] and returns the total length.
    pub fn finish_container(
        self,
        kind: ContainerType,
        code: u16,
        transaction_id: u32,
    ) -> Result<usize, EncodeError> {
        let total = self.offset;
        let length = u32::try_from(total).map_err(|_| EncodeError::BufferTooSmall {
            needed: total,
            available: u32::MAX as usize,
        })?;
        let mut header = DataWriter::new(&mut self.buf[..HEADER_SIZE]);
        header.write_u32(length)?;
        header.write_u16(kind as u16)?;
        header.write_u16(code)?;
        header.write_u32(transaction_id)?;
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Unwritten tail of the buffer, for callers that fill it in place.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..]
    }

    /// Commits `len` bytes written through [`DataWriter::spare_mut`].
    pub fn advance(&mut self, len: usize) -> Result<(), EncodeError> {
        self.reserve(len).map(|_| ())
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], EncodeError> {
        let available = self.buf.len();
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= available)
            .ok_or(EncodeError::BufferTooSmall {
                needed: self.offset.saturating_add(len),
                available,
            })?;
        let start = self.offset;
        self.offset = end;
        Ok(&mut self.buf[start..end])
    }

    pub fn write_u8(&mut self, val: u8) -> Result<(), EncodeError> {
        self.reserve(1)?[0] = val;
        Ok(())
    }

    pub fn write_u16(&mut self, val: u16) -> Result<(), EncodeError> {
        self.write_bytes(&val.to_le_bytes())
    }

    pub fn write_u32(&mut self, val: u32) -> Result<(), EncodeError> {
        self.write_bytes(&val.to_le_bytes())
    }

    pub fn write_u64(&mut self, val: u64) -> Result<(), EncodeError> {
        self.write_bytes(&val.to_le_bytes())
    }

    /// Overwrites a `u32` written earlier at `offset`.
    pub fn patch_u32(&mut self, offset: usize, val: u32) -> Result<(), EncodeError> {
        let end = offset
            .checked_add(4)
            .filter(|end| *end <= self.offset)
            .ok_or(EncodeError::BufferTooSmall {
                needed: offset.saturating_add(4),
                available: self.offset,
            })?;
        self.buf[offset..end].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// PTP string: char count (u8, including the null), UTF-16LE units, null.
    /// An empty string is a single zero byte.
    pub fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        if s.is_empty() {
            return self.write_u8(0);
        }
        let units = s.encode_utf16().count() + 1;
        let count = u8::try_from(units).map_err(|_| EncodeError::StringTooLong)?;
        self.write_u8(count)?;
        for unit in s.encode_utf16() {
            self.write_u16(unit)?;
        }
        self.write_u16(0)
    }

    /// PTP array: u32 element count followed by the elements.
    pub fn write_u16_array(&mut self, values: &[u16]) -> Result<(), EncodeError> {
        self.write_u32(values.len() as u32)?;
        for value in values {
            self.write_u16(*value)?;
        }
        Ok(())
    }

    pub fn write_u32_array(&mut self, values: &[u32]) -> Result<(), EncodeError> {
        self.write_u32(values.len() as u32)?;
        for value in values {
            self.write_u32(*value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEND_OBJECT_INFO: [u8; 20] = [
        0x14, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0c, 0x10, 0xe2, 0x03, 0x00, 0x00, 0x01, 0x00, 0x01,
        0x00, 0xFF, 0xFF, 0xFF, 0xFF,
    ];

    #[test]
    fn test_decode_command() {
        let container = decode(&SEND_OBJECT_INFO).unwrap();
        assert_eq!(container.kind, ContainerType::Command);
        assert_eq!(container.code, 0x100C);
        assert_eq!(container.transaction_id, 0x03E2);
        assert_eq!(container.param(0), Some(0x0001_0001));
        assert_eq!(container.param(1), Some(0xFFFF_FFFF));
        assert_eq!(container.param(2), None);
        assert_eq!(container.param_vec().as_slice(), &[0x0001_0001, 0xFFFF_FFFF]);
    }

    #[test]
    fn test_decode_short_buffers_are_truncated() {
        for len in 0..HEADER_SIZE {
            assert_eq!(
                decode(&SEND_OBJECT_INFO[..len]).unwrap_err(),
                DecodeError::Truncated(len)
            );
        }
    }

    #[test]
    fn test_decode_rejects_declared_length_mismatch() {
        let mut longer = SEND_OBJECT_INFO;
        longer[0] = 0x18;
        assert_eq!(
            decode(&longer).unwrap_err(),
            DecodeError::LengthMismatch {
                declared: 0x18,
                actual: 20
            }
        );

        let mut shorter = SEND_OBJECT_INFO;
        shorter[0] = 0x04;
        assert!(matches!(
            decode(&shorter),
            Err(DecodeError::LengthMismatch { declared: 4, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_partial_parameter() {
        let mut buf = [0u8; 14];
        buf[..12].copy_from_slice(&SEND_OBJECT_INFO[..12]);
        buf[0] = 14;
        assert!(matches!(
            decode(&buf),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_extra_params() {
        let mut unknown = SEND_OBJECT_INFO;
        unknown[4] = 0x07;
        assert_eq!(
            decode(&unknown).unwrap_err(),
            DecodeError::UnknownBlockType(7)
        );

        let mut six = [0u8; 36];
        six[0] = 36;
        six[4] = 1;
        assert_eq!(decode(&six).unwrap_err(), DecodeError::TooManyParameters);
    }

    #[test]
    fn test_data_payload_is_opaque() {
        let buf = [0x0F, 0, 0, 0, 2, 0, 0x0C, 0x10, 1, 0, 0, 0, 0xAA, 0xBB, 0xCC];
        let container = decode(&buf).unwrap();
        assert_eq!(container.kind, ContainerType::Data);
        assert_eq!(container.payload, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_encode_response_header() {
        let mut out = [0u8; 32];
        let len = encode_params(
            &mut out,
            ContainerType::Response,
            0x2001,
            0x03E2,
            &[0x0001_0001, 0xFFFF_FFFF, 7],
        )
        .unwrap();
        assert_eq!(len, 24);
        assert_eq!(&out[..12], &[24, 0, 0, 0, 3, 0, 0x01, 0x20, 0xE2, 0x03, 0, 0]);
        let decoded = decode(&out[..len]).unwrap();
        assert_eq!(decoded.param(2), Some(7));
    }

    #[test]
    fn test_encode_reports_small_buffer() {
        let mut out = [0u8; 8];
        assert_eq!(
            encode(&mut out, ContainerType::Data, 0x1001, 1, &[]).unwrap_err(),
            EncodeError::BufferTooSmall {
                needed: 12,
                available: 8
            }
        );
    }

    #[test]
    fn test_write_string() {
        let mut out = [0u8; 16];
        let mut writer = DataWriter::new(&mut out);
        writer.write_string("ab").unwrap();
        writer.write_string("").unwrap();
        assert_eq!(writer.len(), 8);
        assert_eq!(&out[..8], &[3, b'a', 0, b'b', 0, 0, 0, 0]);
    }

    #[test]
    fn test_patch_u32_only_touches_written_bytes() {
        let mut out = [0u8; 16];
        let mut writer = DataWriter::new(&mut out);
        writer.write_u32(0).unwrap();
        writer.write_u16(0xBEEF).unwrap();
        writer.patch_u32(0, 2).unwrap();
        assert!(matches!(
            writer.patch_u32(4, 1),
            Err(EncodeError::BufferTooSmall { needed: 8, available: 6 })
        ));
        assert_eq!(writer.len(), 6);
        assert_eq!(&out[..6], &[2, 0, 0, 0, 0xEF, 0xBE]);
    }

    #[test]
    fn test_reader_stops_at_end() {
        let mut reader = DataReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16(), Some(0x0201));
        assert_eq!(reader.read_u16(), None);
        assert_eq!(reader.read_u8(), Some(3));
        assert_eq!(reader.remaining(), 0);
    }
}
