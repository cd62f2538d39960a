// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test support: a scripted USB transport and packet builders.

// not every test file uses every helper
#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use mtp::{EndpointDir, Error, Result, StorageId, Transport, UrbId};
use mtp_responder::storage::{Storage, StorageInfo, StorageManager};
use mtp_responder::vfs::MemFs;
use mtp_responder::Server;

pub fn start_log() {
    let _ = env_logger::Builder::new()
        .filter(None, log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// A transport fed from a script of host transfers, capturing everything
/// the responder sends.
///
/// `receive` drains the front transfer up to the requested length, so a
/// single pushed transfer can serve a header read followed by a payload
/// read, and a short remainder models end-of-transfer.
pub struct ScriptedUsb {
    slot_size: usize,
    inbound: VecDeque<Vec<u8>>,
    pub outbound: Vec<Vec<u8>>,
    pub zlt_events: Vec<(EndpointDir, bool)>,
    in_slots: [Vec<u8>; 2],
    out_slots: [Vec<u8>; 2],
    pending: [Option<(usize, usize)>; 2],
    next_urb: u32,
    pub connected: bool,
}

fn dir_idx(ep: EndpointDir) -> usize {
    match ep {
        EndpointDir::In => 0,
        EndpointDir::Out => 1,
    }
}

impl ScriptedUsb {
    pub fn new(slot_size: usize) -> Self {
        Self {
            slot_size,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            zlt_events: Vec::new(),
            in_slots: [vec![0; slot_size], vec![0; slot_size]],
            out_slots: [vec![0; slot_size], vec![0; slot_size]],
            pending: [None, None],
            next_urb: 0,
            connected: true,
        }
    }

    /// Queue one host-to-device transfer.
    pub fn push_host(&mut self, bytes: Vec<u8>) {
        self.inbound.push_back(bytes);
    }

    /// Take everything sent so far.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    fn drain_inbound(&mut self, buf: &mut [u8]) -> usize {
        let Some(front) = self.inbound.front_mut() else {
            return 0;
        };
        let len = front.len().min(buf.len());
        buf[..len].copy_from_slice(&front[..len]);
        if len == front.len() {
            self.inbound.pop_front();
        } else {
            front.drain(..len);
        }
        len
    }
}

impl Transport for ScriptedUsb {
    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.outbound.push(buf.to_vec());
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.inbound.is_empty() {
            return Err(Error::TimedOut);
        }
        Ok(self.drain_inbound(buf))
    }

    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn slot(&self, ep: EndpointDir, slot: usize) -> &[u8] {
        match ep {
            EndpointDir::In => &self.in_slots[slot],
            EndpointDir::Out => &self.out_slots[slot],
        }
    }

    fn slot_mut(&mut self, ep: EndpointDir, slot: usize) -> &mut [u8] {
        match ep {
            EndpointDir::In => &mut self.in_slots[slot],
            EndpointDir::Out => &mut self.out_slots[slot],
        }
    }

    fn begin_xfer(
        &mut self,
        ep: EndpointDir,
        slot: usize,
        len: usize,
    ) -> Result<UrbId> {
        let idx = dir_idx(ep);
        assert!(self.pending[idx].is_none(), "overlapping transfers on {ep:?}");
        self.pending[idx] = Some((slot, len));
        self.next_urb += 1;
        Ok(UrbId(self.next_urb))
    }

    fn wait_xfer(
        &mut self,
        ep: EndpointDir,
        _urb: UrbId,
        _timeout_ns: u64,
    ) -> Result<usize> {
        let idx = dir_idx(ep);
        let (slot, len) = self.pending[idx].take().ok_or(Error::Other)?;
        match ep {
            EndpointDir::In => {
                self.outbound.push(self.in_slots[slot][..len].to_vec());
                Ok(len)
            }
            EndpointDir::Out => {
                let mut staged = std::mem::take(&mut self.out_slots[slot]);
                let received = self.drain_inbound(&mut staged[..len]);
                self.out_slots[slot] = staged;
                Ok(received)
            }
        }
    }

    fn set_zlt(&mut self, ep: EndpointDir, enable: bool) -> Result<()> {
        self.zlt_events.push((ep, enable));
        Ok(())
    }

    fn cancel(&mut self) {
        self.pending = [None, None];
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn wait_ready(&mut self, _timeout: Duration) -> bool {
        self.connected
    }
}

fn packet(ptype: u16, code: u16, txid: u32, size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(size as u32).to_le_bytes());
    out.extend_from_slice(&ptype.to_le_bytes());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&txid.to_le_bytes());
    out
}

/// Build a command packet's wire bytes.
pub fn command(code: u16, txid: u32, params: &[u32]) -> Vec<u8> {
    let mut out = packet(1, code, txid, 12 + 4 * params.len());
    for p in params {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

/// Build a data packet's wire bytes (header plus payload, one transfer).
pub fn data(code: u16, txid: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = packet(2, code, txid, 12 + payload.len());
    out.extend_from_slice(payload);
    out
}

/// Split a captured packet into its header fields and body.
pub fn header_of(bytes: &[u8]) -> (u32, u16, u16, u32) {
    assert!(bytes.len() >= 12, "short packet: {bytes:02x?}");
    (
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
        u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
    )
}

/// The u32 parameters of a captured command/response packet.
pub fn params_of(bytes: &[u8]) -> Vec<u32> {
    bytes[12..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

pub const STORAGE_A: StorageId = StorageId::new(1, 1);
pub const STORAGE_B: StorageId = StorageId::new(2, 1);

/// A server over one in-memory storage with id `0x00010001`.
pub fn single_storage_server(
    slot_size: usize,
) -> (MemFs, Server<ScriptedUsb>) {
    start_log();
    let fs = MemFs::new();
    let mut storages = StorageManager::new();
    storages.add_storage(Storage::new(
        Box::new(fs.clone()),
        STORAGE_A,
        StorageInfo {
            storage_type: mtp::StorageType::FixedRam,
            filesystem_type: mtp::FilesystemType::GenericHierarchical,
            description: mtp_responder::codec::MtpString::from("mem"),
            ..Default::default()
        },
    ));
    (fs, Server::new(ScriptedUsb::new(slot_size), storages))
}

/// A server over two in-memory storages.
pub fn dual_storage_server(
    slot_size: usize,
) -> (MemFs, MemFs, Server<ScriptedUsb>) {
    start_log();
    let fs_a = MemFs::new();
    let fs_b = MemFs::new();
    let mut storages = StorageManager::new();
    storages.add_storage(Storage::new(
        Box::new(fs_a.clone()),
        STORAGE_A,
        StorageInfo::default(),
    ));
    storages.add_storage(Storage::new(
        Box::new(fs_b.clone()),
        STORAGE_B,
        StorageInfo::default(),
    ));
    (fs_a, fs_b, Server::new(ScriptedUsb::new(slot_size), storages))
}
