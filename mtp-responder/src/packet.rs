// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP packet layer: framing and bulk streaming.
 */

//! The four packet kinds (command, data, response, event) framed over a
//! bulk USB [`Transport`], plus the double-buffered streaming paths that
//! move object payloads between a file and the bus without staging them
//! in memory.

use deku::{DekuContainerRead, DekuContainerWrite, DekuRead, DekuWrite};
use log::{trace, warn};

use mtp::{
    EndpointDir, Error, EventCode, PacketType, ResponseCode, Result,
    Transport,
};

use crate::codec::Value;
use crate::util::HexDump;
use crate::vfs::File;

/// Size of the packed packet header.
pub const HEADER_LEN: usize = 12;

/// Maximum parameter count in a command or response packet.
pub const MAX_PARAMS: usize = 5;

/// The packet header defined by ISO 15740, 12 bytes packed little-endian.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct PacketHeader {
    /// Total packet length including this header; `0xffff_ffff` marks a
    /// streamed data packet whose body overflows 32 bits.
    pub size: u32,
    /// Packet kind, one of [`PacketType`].
    pub ptype: u16,
    /// Operation, response or event code.
    pub code: u16,
    /// Echoed from the originating command.
    pub transaction_id: u32,
}

impl PacketHeader {
    fn new(ptype: PacketType, code: u16, transaction_id: u32) -> Self {
        Self {
            size: HEADER_LEN as u32,
            ptype: ptype as u16,
            code,
            transaction_id,
        }
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        let (_rest, header) =
            Self::from_bytes((buf, 0)).map_err(|_| Error::MalformedPacket)?;
        Ok(header)
    }

    fn to_wire(self) -> Result<Vec<u8>> {
        self.to_bytes().map_err(|_| Error::MalformedPacket)
    }
}

fn read_param(buf: &[u8], idx: usize) -> u32 {
    let off = HEADER_LEN + idx * 4;
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// A command packet received from the host.
///
/// Parameters the host did not supply read as zero, as the dispatch paths
/// expect.
#[derive(Clone, Debug)]
pub struct CommandPacket {
    /// The packet header; `ptype` is checked by the dispatcher.
    pub header: PacketHeader,
    /// Up to five u32 parameters, zero-filled.
    pub params: [u32; MAX_PARAMS],
}

impl CommandPacket {
    /// Receive one command from the bulk OUT endpoint.
    ///
    /// An idle timeout surfaces as [`Error::TimedOut`]; anything shorter
    /// than a header is [`Error::ReceiveShort`].
    pub fn receive<T: Transport>(transport: &mut T) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN + 4 * MAX_PARAMS];
        let received = transport.receive(&mut buf)?;
        if received < HEADER_LEN {
            return Err(Error::ReceiveShort);
        }
        Self::from_wire(&buf[..received])
    }

    fn from_wire(buf: &[u8]) -> Result<Self> {
        let header = PacketHeader::parse(buf)?;
        let claimed = (header.size as usize).saturating_sub(HEADER_LEN) / 4;
        let avail = (buf.len() - HEADER_LEN) / 4;
        let mut params = [0u32; MAX_PARAMS];
        for (idx, param) in params
            .iter_mut()
            .enumerate()
            .take(claimed.min(avail).min(MAX_PARAMS))
        {
            *param = read_param(buf, idx);
        }
        Ok(Self { header, params })
    }

    /// The `idx`th parameter, zero when absent.
    pub fn param(&self, idx: usize) -> u32 {
        self.params.get(idx).copied().unwrap_or(0)
    }
}

/// A response packet, carrying a [`ResponseCode`] and up to five
/// parameters back to the host.
#[derive(Clone, Debug)]
pub struct ResponsePacket {
    /// The packet header.
    pub header: PacketHeader,
    params: [u32; MAX_PARAMS],
    nparams: usize,
}

impl ResponsePacket {
    /// A parameterless response.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            header: PacketHeader::new(PacketType::Response, code as u16, 0),
            params: [0; MAX_PARAMS],
            nparams: 0,
        }
    }

    /// A response with parameters.
    pub fn with_params(code: ResponseCode, params: &[u32]) -> Self {
        let mut packet = Self::new(code);
        packet.set_params(params);
        packet
    }

    /// Set the response parameters, adjusting the header size.
    pub fn set_params(&mut self, params: &[u32]) {
        self.nparams = params.len().min(MAX_PARAMS);
        self.params[..self.nparams].copy_from_slice(&params[..self.nparams]);
        self.header.size = (HEADER_LEN + 4 * self.nparams) as u32;
    }

    /// The parameters set so far.
    pub fn params(&self) -> &[u32] {
        &self.params[..self.nparams]
    }

    /// Adopt the transaction id of the originating command.
    pub fn echo(&mut self, request: &CommandPacket) {
        self.header.transaction_id = request.header.transaction_id;
    }

    /// Serialise header plus parameters.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut out = self.header.to_wire()?;
        for param in self.params() {
            param.put(&mut out);
        }
        Ok(out)
    }

    /// Send on the bulk IN endpoint.
    pub fn send<T: Transport>(&self, transport: &mut T) -> Result<()> {
        let wire = self.to_wire()?;
        let sent = transport.send(&wire)?;
        if sent != wire.len() {
            return Err(Error::SendShort);
        }
        Ok(())
    }
}

impl From<ResponseCode> for ResponsePacket {
    fn from(code: ResponseCode) -> Self {
        Self::new(code)
    }
}

/// An event packet. Only framing is provided; the interrupt endpoint
/// carrying events is a stub in this responder.
#[derive(Clone, Debug)]
pub struct EventPacket {
    /// The packet header.
    pub header: PacketHeader,
    /// Event parameters, all three always present on the wire.
    pub params: [u32; 3],
}

impl EventPacket {
    /// Frame an event with its parameters.
    pub fn new(code: EventCode, params: [u32; 3]) -> Self {
        let mut header = PacketHeader::new(PacketType::Event, code as u16, 0);
        header.size = (HEADER_LEN + 4 * params.len()) as u32;
        Self { header, params }
    }

    /// Serialise header plus parameters.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut out = self.header.to_wire()?;
        for param in &self.params {
            param.put(&mut out);
        }
        Ok(out)
    }
}

/// A data packet: a header bound to the originating command plus a
/// payload buffer with an advancing read cursor.
#[derive(Clone, Debug, Default)]
pub struct DataPacket {
    /// The packet header.
    pub header: PacketHeader,
    payload: Vec<u8>,
    read: usize,
}

impl DataPacket {
    /// A data packet bound to `request`: same code and transaction id.
    pub fn for_command(request: &CommandPacket) -> Self {
        Self {
            header: PacketHeader {
                size: HEADER_LEN as u32,
                ptype: PacketType::Data as u16,
                code: request.header.code,
                transaction_id: request.header.transaction_id,
            },
            payload: Vec::new(),
            read: 0,
        }
    }

    /// Append one value to the payload.
    pub fn put<V: Value>(&mut self, v: &V) {
        v.put(&mut self.payload);
    }

    /// Pop one value from the read cursor.
    pub fn pop<V: Value>(&mut self) -> Result<V> {
        let rest = self
            .payload
            .get(self.read..)
            .ok_or(Error::MalformedPacket)?;
        let (rem, v) = V::parse(rest).map_err(|_| Error::MalformedPacket)?;
        self.read = self.payload.len() - rem.len();
        Ok(v)
    }

    /// The raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Patch a u32 at the start of the payload; used to back-fill element
    /// counts written before the elements.
    pub fn patch_lead_count(&mut self, value: u32) {
        if self.payload.len() >= 4 {
            self.payload[..4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Receive a complete data packet: a 12-byte header, then `size - 12`
    /// payload bytes.
    pub fn receive<T: Transport>(transport: &mut T) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        let received = transport.receive(&mut buf)?;
        if received < HEADER_LEN {
            return Err(Error::ReceiveShort);
        }
        let header = PacketHeader::parse(&buf)?;
        let len = (header.size as usize).saturating_sub(HEADER_LEN);
        let mut payload = vec![0u8; len];
        if len > 0 {
            let received = transport.receive(&mut payload)?;
            if received != len {
                return Err(Error::ReceiveShort);
            }
        }
        trace!("data in {:?}", HexDump(&payload));
        Ok(Self {
            header,
            payload,
            read: 0,
        })
    }

    /// Send header and payload, requesting a terminating zero-length
    /// packet in case the payload ends on a `wMaxPacketSize` boundary.
    pub fn send<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
        self.header.size = (HEADER_LEN + self.payload.len()) as u32;
        trace!("data out {:?} {:?}", self.header, HexDump(&self.payload));

        transport.set_zlt(EndpointDir::In, true)?;

        let header = self.header.to_wire()?;
        let sent = transport.send(&header)?;
        if sent != header.len() {
            return Err(Error::SendShort);
        }
        let sent = transport.send(&self.payload)?;
        if sent != self.payload.len() {
            return Err(Error::SendShort);
        }
        Ok(())
    }

    /// Stream `size` bytes of `file` starting at `offset` to the host as
    /// this packet's body.
    ///
    /// Disk reads and USB transfers overlap on the two endpoint buffer
    /// slots: while one slot is in flight the next chunk is read into the
    /// other. ZLT is suppressed for the duration; the final short or
    /// zero-length chunk terminates the transfer.
    pub fn stream_from_file<T: Transport>(
        &mut self,
        transport: &mut T,
        file: &mut dyn File,
        size: u64,
        offset: u64,
    ) -> Result<()> {
        self.header.size = if size + HEADER_LEN as u64 > u32::MAX as u64 {
            u32::MAX
        } else {
            (HEADER_LEN as u64 + size) as u32
        };
        trace!("data out (streamed, {size} bytes) {:?}", self.header);

        let header = self.header.to_wire()?;
        let sent = transport.send(&header)?;
        if sent != header.len() {
            return Err(Error::SendShort);
        }

        if size == 0 {
            return Ok(());
        }

        let chunk = transport.slot_size();
        transport.set_zlt(EndpointDir::In, false)?;

        let mut remaining = size;
        let mut offset = offset;
        let mut cur = 0;

        let want = chunk.min(usize::try_from(remaining).unwrap_or(chunk));
        let buf = &mut transport.slot_mut(EndpointDir::In, cur)[..want];
        let mut read = file.read_at(buf, offset)?;
        offset += read as u64;
        let mut urb = transport.begin_xfer(EndpointDir::In, cur, read)?;

        while remaining > 0 {
            let next = cur ^ 1;
            let ahead = remaining.saturating_sub(read as u64);
            let want = chunk.min(usize::try_from(ahead).unwrap_or(chunk));
            let buf = &mut transport.slot_mut(EndpointDir::In, next)[..want];
            let next_read = file.read_at(buf, offset)?;
            offset += next_read as u64;

            let sent = transport.wait_xfer(EndpointDir::In, urb, u64::MAX)?;
            if sent != read || (sent == 0 && remaining > 0) {
                return Err(Error::SendShort);
            }
            remaining -= sent as u64;
            read = next_read;
            cur = next;
            urb = transport.begin_xfer(EndpointDir::In, cur, read)?;
        }

        let sent = transport.wait_xfer(EndpointDir::In, urb, u64::MAX)?;
        if sent != read {
            return Err(Error::SendShort);
        }
        Ok(())
    }

    /// Stream the host's data stage into `file` at `offset`.
    ///
    /// `size` is the length declared by `SendObjectInfo` and is treated as
    /// a hint: the transfer ends at a short or zero-length read. If the
    /// last chunk exactly filled a slot, one more read drains the
    /// zero-length end-of-transfer marker.
    pub fn stream_to_file<T: Transport>(
        &mut self,
        transport: &mut T,
        file: &mut dyn File,
        size: u64,
        offset: u64,
    ) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        let received = transport.receive(&mut buf)?;
        if received < HEADER_LEN {
            return Err(Error::ReceiveShort);
        }
        self.header = PacketHeader::parse(&buf)?;
        trace!("data in (streamed, {size} byte hint) {:?}", self.header);

        if size == 0 {
            return Ok(());
        }

        let chunk = transport.slot_size();
        let mut remaining = size;
        let mut offset = offset;
        let mut cur = 0;

        let mut urb = transport.begin_xfer(EndpointDir::Out, cur, chunk)?;
        let mut received =
            transport.wait_xfer(EndpointDir::Out, urb, u64::MAX)?;
        remaining = remaining.saturating_sub(received as u64);

        while remaining > 0 && received == chunk {
            let prev = cur;
            cur ^= 1;
            urb = transport.begin_xfer(EndpointDir::Out, cur, chunk)?;

            // drain the completed slot while the next chunk is in flight
            file.write_at(
                &transport.slot(EndpointDir::Out, prev)[..received],
                offset,
            )?;
            offset += received as u64;

            received = transport.wait_xfer(EndpointDir::Out, urb, u64::MAX)?;
            remaining = remaining.saturating_sub(received as u64);
        }

        file.write_at(
            &transport.slot(EndpointDir::Out, cur)[..received],
            offset,
        )?;

        // a transfer ending exactly on a slot boundary is followed by a
        // zero-length marker
        if received == chunk {
            let urb = transport.begin_xfer(EndpointDir::Out, cur ^ 1, chunk)?;
            let drained =
                transport.wait_xfer(EndpointDir::Out, urb, u64::MAX)?;
            if drained != 0 {
                warn!("expected end-of-transfer marker, got {drained} bytes");
            }
        }

        file.flush()?;
        Ok(())
    }
}
