// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP common types and traits.
 */

// Tests may use std
#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Media Transfer Protocol (MTP)
//!
//! This crate provides common types for MTP (ISO 15740 / PTP family):
//! wire code enumerations, identifier newtypes, the responder error type,
//! and the [`Transport`] trait implemented by USB device stacks.
//!
//! The protocol engine itself lives in the `mtp-responder` crate.

use core::time::Duration;

use num_derive::FromPrimitive;

/// MTP object handle.
///
/// Assigned by the responder, unique per process, stable for the process
/// lifetime. Zero is never allocated; it is the wire sentinel meaning
/// "root" in parent-parameter context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Handle(pub u32);

/// The reserved handle of each storage's root object.
pub const HANDLE_ROOT: Handle = Handle(0xffff_ffff);

/// Wire value for a parent parameter meaning "the storage root".
pub const PARENT_ROOT: u32 = 0;

impl core::fmt::Display for Handle {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{:#x}", self.0)
    }
}

/// MTP storage identifier.
///
/// A packed pair: the low 16 bits identify the partition, the high 16 bits
/// the physical location. Equality and hashing are on the packed 32-bit
/// form, which is also the wire representation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StorageId(pub u32);

impl StorageId {
    /// Construct from a location / partition pair.
    pub const fn new(location: u16, partition: u16) -> Self {
        Self(((location as u32) << 16) | partition as u32)
    }

    /// The partition number (low 16 bits).
    pub const fn partition(&self) -> u16 {
        self.0 as u16
    }

    /// The physical location (high 16 bits).
    pub const fn location(&self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl core::fmt::Display for StorageId {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{:#010x}", self.0)
    }
}

/// MTP object format code.
///
/// Arbitrary format codes are allowed on the wire; anything other than
/// [`ObjectFormat::ASSOCIATION`] is treated as a file by the responder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectFormat(pub u16);

impl ObjectFormat {
    /// Undefined object (a plain file).
    pub const UNDEFINED: ObjectFormat = ObjectFormat(0x3000);
    /// Association (a directory).
    pub const ASSOCIATION: ObjectFormat = ObjectFormat(0x3001);

    /// Returns `true` for the directory format.
    pub fn is_association(&self) -> bool {
        *self == Self::ASSOCIATION
    }
}

/// Packet kinds as defined in ISO 15740.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum PacketType {
    Undefined = 0,
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

/// Operation codes serviced by the responder.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIds = 0x1004,
    GetStorageInfo = 0x1005,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100b,
    SendObjectInfo = 0x100c,
    SendObject = 0x100d,
    GetDevicePropDesc = 0x1014,
    GetDevicePropValue = 0x1015,
    MoveObject = 0x1019,
    CopyObject = 0x101a,
    GetPartialObject = 0x101b,
    GetObjectPropsSupported = 0x9801,
    GetObjectPropDesc = 0x9802,
    GetObjectPropValue = 0x9803,
    SetObjectPropValue = 0x9804,
    GetObjectPropList = 0x9805,
}

/// Response codes emitted by the responder.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    Undefined = 0x2000,
    Ok = 0x2001,
    GeneralError = 0x2002,
    SessionNotOpen = 0x2003,
    InvalidTransactionId = 0x2004,
    OperationNotSupported = 0x2005,
    ParameterNotSupported = 0x2006,
    IncompleteTransfer = 0x2007,
    InvalidStorageId = 0x2008,
    InvalidObjectHandle = 0x2009,
    DevicePropNotSupported = 0x200a,
    ObjectWriteProtected = 0x200d,
    AccessDenied = 0x200f,
    StoreNotAvailable = 0x2013,
    SpecificationByFormatUnsupported = 0x2014,
    NoValidObjectInfo = 0x2015,
    InvalidObjectPropCode = 0xa801,
    SpecificationByGroupUnsupported = 0xa807,
}

/// Event codes. Only the stub event channel exists.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum EventCode {
    Undefined = 0x4000,
}

/// Device property codes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum DevicePropertyCode {
    Undefined = 0x5000,
    SynchronizationPartner = 0xd401,
    DeviceFriendlyName = 0xd402,
}

/// Object property codes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum ObjectPropertyCode {
    StorageId = 0xdc01,
    ObjectFormat = 0xdc02,
    ProtectionStatus = 0xdc03,
    ObjectSize = 0xdc04,
    ObjectFileName = 0xdc07,
    DateCreated = 0xdc08,
    DateModified = 0xdc09,
    Keywords = 0xdc0a,
    ParentObject = 0xdc0b,
}

/// Wire value for a property parameter meaning "all properties".
pub const PROP_ALL: u32 = 0xffff_ffff;

/// Datatype codes used in property descriptors and prop-list entries.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum DataType {
    Undefined = 0x0000,
    Int8 = 0x0001,
    Uint8 = 0x0002,
    Int16 = 0x0003,
    Uint16 = 0x0004,
    Int32 = 0x0005,
    Uint32 = 0x0006,
    Int64 = 0x0007,
    Uint64 = 0x0008,
    Str = 0xffff,
}

/// Storage hardware classification, reported in StorageInfo.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum StorageType {
    Undefined = 0,
    FixedRom = 1,
    RemovableRom = 2,
    FixedRam = 3,
    RemovableRam = 4,
}

/// Filesystem classification, reported in StorageInfo.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum FilesystemType {
    Undefined = 0,
    GenericFlat = 1,
    GenericHierarchical = 2,
    Dcf = 3,
}

/// Storage access capability, reported in StorageInfo.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum AccessCapability {
    ReadWrite = 0,
    ReadOnlyWithoutDeletion = 1,
    ReadOnlyWithDeletion = 2,
}

/// Association (directory) subtype. Only the generic folder is used.
pub const ASSOCIATION_GENERIC_FOLDER: u16 = 1;

/// Form flag values for property descriptors.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum FormFlag {
    None = 0,
    Range = 1,
    Enumeration = 2,
    DateTime = 3,
}

/// An error type for the MTP responder.
///
/// Captures transport and framing failures. Protocol-level outcomes are
/// expressed as [`ResponseCode`] instead and travel in response packets.
/// Platform-specific failures can be reported through `Other` and (on
/// `std`) `Io`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failure in the transmit path, typically transport-specific
    TxFailure,
    /// Failure in the receive path, typically transport-specific
    RxFailure,
    /// The transport sent fewer bytes than requested
    SendShort,
    /// The transport returned fewer bytes than the packet layer needed
    ReceiveShort,
    /// Timed out waiting for the host
    TimedOut,
    /// A packet failed to parse
    MalformedPacket,
    /// Bad argument
    BadArgument,
    /// Provided buffer is too small
    NoSpace,
    /// Operation is unsupported
    Unsupported,
    /// Other error type
    Other,
    /// IO error from a backend
    #[cfg(feature = "std")]
    Io(std::io::Error),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            #[cfg(feature = "std")]
            Self::Io(e) => write!(fmt, "MTP IO error: {e}"),
            _ => write!(fmt, "MTP error: {self:?}"),
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

/// MTP result type
pub type Result<T> = core::result::Result<T, Error>;

/// Bulk endpoint direction, named from the host's point of view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointDir {
    /// Device-to-host (bulk IN)
    In,
    /// Host-to-device (bulk OUT)
    Out,
}

/// Identifies a submitted transfer on one endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UrbId(pub u32);

/// Number of buffer slots per endpoint direction.
///
/// The packet layer pipelines streamed transfers by alternating between
/// the two slots, overlapping file I/O with the in-flight USB transfer.
pub const NUM_SLOTS: usize = 2;

/// Default endpoint buffer slot size: 4 MiB.
pub const ENDPOINT_BUFFER_SIZE: usize = 0x40_0000;

/// A USB bulk transport consumed by the responder.
///
/// Implementations own the endpoint double buffers ([`NUM_SLOTS`] slots per
/// direction, each [`slot_size`](Transport::slot_size) bytes, page-aligned
/// where the platform requires it) and expose them by index; the packet
/// layer fills or drains one slot while a transfer runs on the other.
///
/// `send` and `receive` are blocking. `receive` on the command endpoint is
/// expected to use a finite timeout, surfacing as [`Error::TimedOut`] so
/// the serve loop can idle without a host attached. Transfers on a single
/// direction are strictly serialised: at most one in-flight submission per
/// endpoint.
pub trait Transport {
    /// Blocking bulk send of a complete buffer. Returns bytes sent.
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Blocking bulk receive into `buf`. Returns bytes received.
    ///
    /// A short (or zero-length) completion is meaningful to the caller and
    /// is not an error at this level.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The size of one endpoint buffer slot.
    fn slot_size(&self) -> usize;

    /// Shared access to a slot's contents, e.g. to drain received data.
    fn slot(&self, ep: EndpointDir, slot: usize) -> &[u8];

    /// Exclusive access to a slot, e.g. to stage outgoing data.
    fn slot_mut(&mut self, ep: EndpointDir, slot: usize) -> &mut [u8];

    /// Submit a transfer of the first `len` bytes of `slot` on `ep`.
    fn begin_xfer(
        &mut self,
        ep: EndpointDir,
        slot: usize,
        len: usize,
    ) -> Result<UrbId>;

    /// Wait for a submitted transfer to complete. Returns bytes moved.
    fn wait_xfer(
        &mut self,
        ep: EndpointDir,
        urb: UrbId,
        timeout_ns: u64,
    ) -> Result<usize>;

    /// Request (or suppress) a terminating zero-length packet on `ep` for
    /// transfers ending on a `wMaxPacketSize` boundary.
    fn set_zlt(&mut self, ep: EndpointDir, enable: bool) -> Result<()>;

    /// Abort any in-flight transfer on both bulk endpoints, causing
    /// blocked waits to return immediately.
    fn cancel(&mut self);

    /// Whether a host is currently configured on the bus.
    fn is_connected(&self) -> bool;

    /// Wait up to `timeout` for the host connection. Returns
    /// [`is_connected`](Transport::is_connected) at expiry.
    fn wait_ready(&mut self, timeout: Duration) -> bool;
}
