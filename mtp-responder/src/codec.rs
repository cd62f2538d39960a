// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP value codec.
 */

//! Wire encoding of MTP data types.
//!
//! All values are little-endian. Variable-length types are
//! length-prefixed: strings carry a one-byte UCS-2 unit count (including
//! the NUL terminator), arrays a u32 element count.

use chrono::TimeZone;
use nom::combinator::{map, map_opt};
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
use nom::IResult;
use num_traits::FromPrimitive;

use mtp::{
    AccessCapability, DataType, DevicePropertyCode, EventCode, FilesystemType,
    FormFlag, Handle, ObjectFormat, ObjectPropertyCode, OperationCode,
    ResponseCode, StorageId, StorageType, ASSOCIATION_GENERIC_FOLDER,
};

/// A value with an MTP wire representation.
///
/// `put` appends the encoded form to a buffer; `parse` is a [`nom`] parser
/// over the raw bytes. The packet layer surfaces parse failures as
/// [`mtp::Error::MalformedPacket`].
pub trait Value: Sized {
    /// Append the wire encoding of `self` to `out`.
    fn put(&self, out: &mut Vec<u8>);
    /// Parse one value from the front of `i`.
    fn parse(i: &[u8]) -> IResult<&[u8], Self>;
}

macro_rules! value_int {
    ($($ty:ty => $parser:expr),* $(,)?) => {$(
        impl Value for $ty {
            fn put(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
            fn parse(i: &[u8]) -> IResult<&[u8], Self> {
                $parser(i)
            }
        }
    )*};
}

value_int! {
    u8 => le_u8,
    u16 => le_u16,
    u32 => le_u32,
    u64 => le_u64,
}

macro_rules! value_code {
    ($($ty:ty),* $(,)?) => {$(
        impl Value for $ty {
            fn put(&self, out: &mut Vec<u8>) {
                (*self as u16).put(out)
            }
            fn parse(i: &[u8]) -> IResult<&[u8], Self> {
                map_opt(le_u16, <$ty>::from_u16)(i)
            }
        }
    )*};
}

value_code! {
    OperationCode,
    ResponseCode,
    EventCode,
    DevicePropertyCode,
    ObjectPropertyCode,
    DataType,
    StorageType,
    FilesystemType,
    AccessCapability,
}

impl Value for Handle {
    fn put(&self, out: &mut Vec<u8>) {
        self.0.put(out)
    }
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(le_u32, Handle)(i)
    }
}

impl Value for StorageId {
    fn put(&self, out: &mut Vec<u8>) {
        self.0.put(out)
    }
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(le_u32, StorageId)(i)
    }
}

impl Value for ObjectFormat {
    fn put(&self, out: &mut Vec<u8>) {
        self.0.put(out)
    }
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(le_u16, ObjectFormat)(i)
    }
}

impl Value for FormFlag {
    fn put(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map_opt(le_u8, FormFlag::from_u8)(i)
    }
}

/// MTP arrays: a u32 element count followed by the elements.
impl<T: Value> Value for Vec<T> {
    fn put(&self, out: &mut Vec<u8>) {
        (self.len() as u32).put(out);
        for v in self {
            v.put(out);
        }
    }

    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, n) = le_u32(i)?;
        let n = n as usize;
        // every element takes at least one byte
        if n > i.len() {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Count,
            )));
        }
        count(T::parse, n)(i)
    }
}

/// An MTP string: UCS-2 little-endian, NUL terminated, prefixed with a
/// one-byte code-unit count that includes the NUL.
///
/// The empty string is encoded as the single absent byte `0x00`; both the
/// absent form and a bare NUL decode back to the empty string.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MtpString(pub String);

impl MtpString {
    /// The UTF-8 form of the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for MtpString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MtpString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl core::fmt::Display for MtpString {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.0.fmt(fmt)
    }
}

impl Value for MtpString {
    fn put(&self, out: &mut Vec<u8>) {
        if self.0.is_empty() {
            out.push(0);
            return;
        }
        let mut units: Vec<u16> = self.0.encode_utf16().collect();
        // the count prefix is a single byte, NUL included
        units.truncate(u8::MAX as usize - 1);
        out.push(units.len() as u8 + 1);
        for u in &units {
            u.put(out);
        }
        out.extend_from_slice(&[0, 0]);
    }

    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, n) = le_u8(i)?;
        if n == 0 {
            return Ok((i, Self::default()));
        }
        let (i, units) = count(le_u16, n as usize)(i)?;
        let end = units.iter().position(|u| *u == 0).unwrap_or(units.len());
        Ok((i, Self(String::from_utf16_lossy(&units[..end]))))
    }
}

/// An MTP DateTime: a string of the literal form `YYYYMMDDThhmmss`.
///
/// The formatted string is kept rather than the timestamp, so values
/// decoded from the wire round-trip exactly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MtpDateTime(pub MtpString);

impl MtpDateTime {
    /// Render a device timestamp (seconds since the epoch) using the
    /// local calendar rules.
    pub fn from_unix(secs: i64) -> Self {
        match chrono::Local.timestamp_opt(secs, 0).single() {
            Some(dt) => {
                Self(MtpString(dt.format("%Y%m%dT%H%M%S").to_string()))
            }
            None => Self::default(),
        }
    }
}

impl Value for MtpDateTime {
    fn put(&self, out: &mut Vec<u8>) {
        self.0.put(out)
    }
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(MtpString::parse, MtpDateTime)(i)
    }
}

/// The ObjectInfo dataset describing a single object.
///
/// Serialisation order is fixed; the thumbnail and image fields are always
/// zero for this responder.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub storage_id: StorageId,
    pub format: ObjectFormat,
    pub protection: u16,
    /// Object byte size, `0xffff_ffff` when unknown or too large.
    pub compressed_size: u32,
    pub thumb_format: ObjectFormat,
    pub thumb_size: u32,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub image_depth: u32,
    pub parent: Handle,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: MtpString,
    pub created: MtpDateTime,
    pub modified: MtpDateTime,
    pub keywords: MtpString,
}

#[allow(missing_docs)]
impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            storage_id: StorageId(0),
            format: ObjectFormat::UNDEFINED,
            protection: 0,
            compressed_size: 0,
            thumb_format: ObjectFormat(0),
            thumb_size: 0,
            thumb_width: 0,
            thumb_height: 0,
            image_width: 0,
            image_height: 0,
            image_depth: 0,
            parent: Handle(0),
            association_type: ASSOCIATION_GENERIC_FOLDER,
            association_desc: 0,
            sequence_number: 0,
            filename: MtpString::default(),
            created: MtpDateTime::default(),
            modified: MtpDateTime::default(),
            keywords: MtpString::default(),
        }
    }
}

impl Value for ObjectInfo {
    fn put(&self, out: &mut Vec<u8>) {
        self.storage_id.put(out);
        self.format.put(out);
        self.protection.put(out);
        self.compressed_size.put(out);
        self.thumb_format.put(out);
        self.thumb_size.put(out);
        self.thumb_width.put(out);
        self.thumb_height.put(out);
        self.image_width.put(out);
        self.image_height.put(out);
        self.image_depth.put(out);
        self.parent.put(out);
        self.association_type.put(out);
        self.association_desc.put(out);
        self.sequence_number.put(out);
        self.filename.put(out);
        self.created.put(out);
        self.modified.put(out);
        self.keywords.put(out);
    }

    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, storage_id) = StorageId::parse(i)?;
        let (i, format) = ObjectFormat::parse(i)?;
        let (i, protection) = le_u16(i)?;
        let (i, compressed_size) = le_u32(i)?;
        let (i, thumb_format) = ObjectFormat::parse(i)?;
        let (i, thumb_size) = le_u32(i)?;
        let (i, thumb_width) = le_u32(i)?;
        let (i, thumb_height) = le_u32(i)?;
        let (i, image_width) = le_u32(i)?;
        let (i, image_height) = le_u32(i)?;
        let (i, image_depth) = le_u32(i)?;
        let (i, parent) = Handle::parse(i)?;
        let (i, association_type) = le_u16(i)?;
        let (i, association_desc) = le_u32(i)?;
        let (i, sequence_number) = le_u32(i)?;
        let (i, filename) = MtpString::parse(i)?;
        let (i, created) = MtpDateTime::parse(i)?;
        let (i, modified) = MtpDateTime::parse(i)?;
        let (i, keywords) = MtpString::parse(i)?;
        Ok((
            i,
            Self {
                storage_id,
                format,
                protection,
                compressed_size,
                thumb_format,
                thumb_size,
                thumb_width,
                thumb_height,
                image_width,
                image_height,
                image_depth,
                parent,
                association_type,
                association_desc,
                sequence_number,
                filename,
                created,
                modified,
                keywords,
            },
        ))
    }
}

/// Encode a single value into a fresh buffer.
pub fn to_bytes<V: Value>(v: &V) -> Vec<u8> {
    let mut out = Vec::new();
    v.put(&mut out);
    out
}

/// Decode a single value, requiring all input to be consumed.
pub fn from_bytes<V: Value>(i: &[u8]) -> mtp::Result<V> {
    match V::parse(i) {
        Ok((rest, v)) if rest.is_empty() => Ok(v),
        _ => Err(mtp::Error::MalformedPacket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<V: Value + PartialEq + core::fmt::Debug>(v: V) {
        let bytes = to_bytes(&v);
        assert_eq!(from_bytes::<V>(&bytes).unwrap(), v);
    }

    #[test]
    fn int_roundtrip() {
        roundtrip(0xabu8);
        roundtrip(0x1234u16);
        roundtrip(0xdead_beefu32);
        roundtrip(0x0123_4567_89ab_cdefu64);
        assert_eq!(to_bytes(&0x1234u16), [0x34, 0x12]);
    }

    #[test]
    fn string_framing() {
        // k chars encode to 1 + 2 * (k + 1) bytes, count prefix k + 1,
        // trailing NUL
        let s = MtpString::from("a.txt");
        let bytes = to_bytes(&s);
        assert_eq!(bytes.len(), 1 + 2 * 6);
        assert_eq!(bytes[0], 6);
        assert_eq!(&bytes[1..3], [b'a', 0]);
        assert_eq!(&bytes[bytes.len() - 2..], [0, 0]);
        roundtrip(s);
    }

    #[test]
    fn string_empty() {
        let bytes = to_bytes(&MtpString::default());
        assert_eq!(bytes, [0]);
        roundtrip(MtpString::default());
        // a bare NUL also decodes as empty
        let (rest, s) = MtpString::parse(&[1, 0, 0]).unwrap();
        assert!(rest.is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn string_non_ascii() {
        roundtrip(MtpString::from("snapshot-æøå-01"));
    }

    #[test]
    fn string_short_input() {
        // count prefix promises more units than the buffer holds
        assert!(from_bytes::<MtpString>(&[6, b'a', 0]).is_err());
    }

    #[test]
    fn array_roundtrip() {
        roundtrip::<Vec<u32>>(vec![]);
        roundtrip(vec![1u32, 2, 0xffff_ffff]);
        let bytes = to_bytes(&vec![0x0001_0001u32]);
        assert_eq!(bytes, [1, 0, 0, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn array_bogus_count() {
        // an oversized count must fail instead of allocating
        let mut bytes = vec![0xff, 0xff, 0xff, 0xff];
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(from_bytes::<Vec<u32>>(&bytes).is_err());
    }

    #[test]
    fn datetime_shape() {
        let dt = MtpDateTime::from_unix(1_700_000_000);
        assert_eq!(dt.0 .0.len(), 15);
        assert_eq!(dt.0 .0.as_bytes()[8], b'T');
        let bytes = to_bytes(&dt);
        assert_eq!(bytes.len(), 1 + 2 * 16);
        assert_eq!(bytes[0], 16);
        roundtrip(dt);
    }

    #[test]
    fn object_info_roundtrip() {
        let info = ObjectInfo {
            storage_id: StorageId::new(1, 1),
            format: ObjectFormat::UNDEFINED,
            compressed_size: 5,
            parent: Handle(0),
            filename: MtpString::from("a.txt"),
            modified: MtpDateTime::from_unix(0),
            ..Default::default()
        };
        let bytes = to_bytes(&info);
        assert_eq!(from_bytes::<ObjectInfo>(&bytes).unwrap(), info);
    }

    #[test]
    fn object_info_truncated() {
        let info = ObjectInfo::default();
        let bytes = to_bytes(&info);
        assert!(from_bytes::<ObjectInfo>(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn code_values() {
        assert_eq!(to_bytes(&OperationCode::GetDeviceInfo), [0x01, 0x10]);
        assert_eq!(to_bytes(&ResponseCode::Ok), [0x01, 0x20]);
        assert_eq!(to_bytes(&DataType::Str), [0xff, 0xff]);
        assert!(from_bytes::<OperationCode>(&[0xff, 0x1f]).is_err());
    }
}
