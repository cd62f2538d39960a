// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end transactions driven byte-for-byte through a scripted
//! transport over in-memory storages.

mod common;

use common::*;

use mtp::{Handle, ObjectFormat};
use mtp_responder::codec::{self, MtpString, ObjectInfo};
use mtp_responder::vfs::{EntryKind, Filesystem};
use mtp_responder::Server;

const GET_DEVICE_INFO: u16 = 0x1001;
const OPEN_SESSION: u16 = 0x1002;
const CLOSE_SESSION: u16 = 0x1003;
const GET_STORAGE_IDS: u16 = 0x1004;
const GET_STORAGE_INFO: u16 = 0x1005;
const GET_OBJECT_HANDLES: u16 = 0x1007;
const GET_OBJECT_INFO: u16 = 0x1008;
const GET_OBJECT: u16 = 0x1009;
const DELETE_OBJECT: u16 = 0x100b;
const SEND_OBJECT_INFO: u16 = 0x100c;
const SEND_OBJECT: u16 = 0x100d;
const GET_DEVICE_PROP_VALUE: u16 = 0x1015;
const MOVE_OBJECT: u16 = 0x1019;
const COPY_OBJECT: u16 = 0x101a;
const GET_PARTIAL_OBJECT: u16 = 0x101b;
const GET_OBJECT_PROP_VALUE: u16 = 0x9803;
const SET_OBJECT_PROP_VALUE: u16 = 0x9804;

const RC_OK: u16 = 0x2001;
const RC_INVALID_TRANSACTION_ID: u16 = 0x2004;
const RC_OBJECT_WRITE_PROTECTED: u16 = 0x200d;
const RC_STORE_NOT_AVAILABLE: u16 = 0x2013;
const RC_SPEC_BY_FORMAT_UNSUPPORTED: u16 = 0x2014;
const RC_NO_VALID_OBJECT_INFO: u16 = 0x2015;

const PROP_OBJECT_FILE_NAME: u32 = 0xdc07;

/// Run one GetObjectHandles transaction and return the handle array.
fn enumerate_root(server: &mut Server<ScriptedUsb>, storage: u32, txid: u32) -> Vec<u32> {
    server
        .transport_mut()
        .push_host(command(GET_OBJECT_HANDLES, txid, &[storage, 0, 0xffff_ffff]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, _) = header_of(out.last().unwrap());
    assert_eq!(code, RC_OK);
    codec::from_bytes::<Vec<u32>>(&out[1]).unwrap()
}

#[test]
fn s1_get_device_info() {
    let (_fs, mut server) = single_storage_server(64);

    let cmd = command(GET_DEVICE_INFO, 1, &[]);
    assert_eq!(cmd, [0x0c, 0, 0, 0, 0x01, 0, 0x01, 0x10, 0x01, 0, 0, 0]);
    server.transport_mut().push_host(cmd);
    server.process().unwrap();

    let out = server.transport_mut().take_outbound();
    assert_eq!(out.len(), 3);

    let (size, ptype, code, txid) = header_of(&out[0]);
    assert_eq!((ptype, code, txid), (2, GET_DEVICE_INFO, 1));
    assert_eq!(size as usize, 12 + out[1].len());
    // standard version 100, MTP vendor extension id 6, version 110
    assert_eq!(&out[1][..8], [100, 0, 6, 0, 0, 0, 110, 0]);

    assert_eq!(out[2], [0x0c, 0, 0, 0, 0x03, 0, 0x01, 0x20, 0x01, 0, 0, 0]);
}

#[test]
fn s2_open_session_then_storage_ids() {
    let (_fs, mut server) = single_storage_server(64);

    server.transport_mut().push_host(command(OPEN_SESSION, 2, &[1]));
    server.process().unwrap();
    assert!(server.session_opened());
    let out = server.transport_mut().take_outbound();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], [0x0c, 0, 0, 0, 0x03, 0, 0x01, 0x20, 0x02, 0, 0, 0]);

    server.transport_mut().push_host(command(GET_STORAGE_IDS, 3, &[]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    assert_eq!(out[1], [0x01, 0, 0, 0, 0x01, 0, 0x01, 0]);
    let (_, _, code, txid) = header_of(&out[2]);
    assert_eq!((code, txid), (RC_OK, 3));

    server.transport_mut().push_host(command(CLOSE_SESSION, 4, &[]));
    server.process().unwrap();
    assert!(!server.session_opened());
    server.transport_mut().take_outbound();
}

#[test]
fn s3_two_step_upload() {
    let (fs, mut server) = single_storage_server(64);

    let info = ObjectInfo {
        storage_id: STORAGE_A,
        format: ObjectFormat::UNDEFINED,
        compressed_size: 5,
        filename: MtpString::from("a.txt"),
        ..Default::default()
    };
    server
        .transport_mut()
        .push_host(command(SEND_OBJECT_INFO, 10, &[STORAGE_A.0, 0]));
    server
        .transport_mut()
        .push_host(data(SEND_OBJECT_INFO, 10, &codec::to_bytes(&info)));
    server.process().unwrap();

    let out = server.transport_mut().take_outbound();
    assert_eq!(out.len(), 1);
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_OK, 10));
    let params = params_of(&out[0]);
    assert_eq!(params[0], STORAGE_A.0);
    assert_eq!(params[1], 0);
    let handle = params[2];
    assert_ne!(handle, 0);

    server.transport_mut().push_host(command(SEND_OBJECT, 11, &[]));
    server.transport_mut().push_host(data(SEND_OBJECT, 11, b"hello"));
    server.process().unwrap();

    let out = server.transport_mut().take_outbound();
    let (_, _, code, txid) = header_of(out.last().unwrap());
    assert_eq!((code, txid), (RC_OK, 11));

    // the backend file exists and reads exactly `hello`
    let mut file = fs.open_file("/a.txt", false).unwrap();
    let mut buf = [0u8; 16];
    let read = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..read], b"hello");

    let storage = server.storages().storage(STORAGE_A).unwrap();
    assert_eq!(storage.handle_for_path("/a.txt"), Some(Handle(handle)));
}

#[test]
fn send_object_without_info_refused() {
    let (_fs, mut server) = single_storage_server(64);
    server.transport_mut().push_host(command(SEND_OBJECT, 12, &[]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_NO_VALID_OBJECT_INFO, 12));
}

#[test]
fn s4_delete_write_protected() {
    let (fs, mut server) = single_storage_server(64);
    fs.create_file("/locked.txt", 1).unwrap();
    let handles = enumerate_root(&mut server, STORAGE_A.0, 20);
    assert_eq!(handles.len(), 1);

    fs.set_read_only(true);
    server
        .transport_mut()
        .push_host(command(DELETE_OBJECT, 21, &[handles[0], 0]));
    server.process().unwrap();

    let out = server.transport_mut().take_outbound();
    assert_eq!(out.len(), 1);
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_OBJECT_WRITE_PROTECTED, 21));
    assert_eq!(fs.entry_kind("/locked.txt").unwrap(), EntryKind::File);
}

#[test]
fn s5_cross_storage_move_and_copy_refused() {
    let (fs_a, _fs_b, mut server) = dual_storage_server(64);
    fs_a.create_file("/f", 1).unwrap();
    let handle = enumerate_root(&mut server, STORAGE_A.0, 30)[0];

    server
        .transport_mut()
        .push_host(command(MOVE_OBJECT, 31, &[handle, STORAGE_B.0, 0]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_STORE_NOT_AVAILABLE, 31));

    server
        .transport_mut()
        .push_host(command(COPY_OBJECT, 32, &[handle, STORAGE_B.0, 0]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    assert_eq!(header_of(&out[0]).2, RC_STORE_NOT_AVAILABLE);

    // within the owning storage the move succeeds and keeps the handle
    server
        .transport_mut()
        .push_host(command(MOVE_OBJECT, 33, &[handle, STORAGE_A.0, 0]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, _) = header_of(&out[0]);
    assert_eq!(code, RC_OK);
    assert_eq!(params_of(&out[0]), [handle]);
}

#[test]
fn s6_rename_via_prop_value() {
    let (fs, mut server) = single_storage_server(64);
    fs.create_file("/a.txt", 2).unwrap();
    {
        let mut file = fs.open_file("/a.txt", true).unwrap();
        file.write_at(b"hi", 0).unwrap();
    }
    let handle = enumerate_root(&mut server, STORAGE_A.0, 40)[0];

    server.transport_mut().push_host(command(
        SET_OBJECT_PROP_VALUE,
        41,
        &[handle, PROP_OBJECT_FILE_NAME],
    ));
    server.transport_mut().push_host(data(
        SET_OBJECT_PROP_VALUE,
        41,
        &codec::to_bytes(&MtpString::from("b.txt")),
    ));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_OK, 41));

    // handle unchanged, both indices moved, the disk file renamed
    let storage = server.storages().storage(STORAGE_A).unwrap();
    assert_eq!(storage.handle_for_path("/b.txt"), Some(Handle(handle)));
    assert_eq!(storage.handle_for_path("/a.txt"), None);
    assert_eq!(fs.entry_kind("/b.txt").unwrap(), EntryKind::File);
    assert!(fs.entry_kind("/a.txt").is_err());

    server.transport_mut().push_host(command(
        GET_OBJECT_PROP_VALUE,
        42,
        &[handle, PROP_OBJECT_FILE_NAME],
    ));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    assert_eq!(out[1], codec::to_bytes(&MtpString::from("b.txt")));
    assert_eq!(header_of(&out[2]).3, 42);
}

#[test]
fn format_filter_unsupported() {
    let (_fs, mut server) = single_storage_server(64);
    server.transport_mut().push_host(command(
        GET_OBJECT_HANDLES,
        50,
        &[STORAGE_A.0, 0x3000, 0xffff_ffff],
    ));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    // refused before any data phase
    assert_eq!(out.len(), 1);
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_SPEC_BY_FORMAT_UNSUPPORTED, 50));
}

#[test]
fn unknown_operation() {
    let (_fs, mut server) = single_storage_server(64);
    server.transport_mut().push_host(command(0x6666, 60, &[]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, _, code, txid) = header_of(&out[0]);
    assert_eq!((code, txid), (RC_INVALID_TRANSACTION_ID, 60));
}

#[test]
fn non_command_packet_answered() {
    let (_fs, mut server) = single_storage_server(64);
    // a response-typed packet arriving on the command pipe
    server
        .transport_mut()
        .push_host(vec![0x0c, 0, 0, 0, 0x03, 0, 0x01, 0x20, 0x05, 0, 0, 0]);
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (_, ptype, code, txid) = header_of(&out[0]);
    assert_eq!((ptype, code, txid), (3, 0x2000, 5));
}

#[test]
fn partial_object_windows() {
    let (fs, mut server) = single_storage_server(64);
    fs.create_file("/p.bin", 0).unwrap();
    {
        let mut file = fs.open_file("/p.bin", true).unwrap();
        file.write_at(b"abcdefgh", 0).unwrap();
    }
    let handle = enumerate_root(&mut server, STORAGE_A.0, 70)[0];

    server
        .transport_mut()
        .push_host(command(GET_PARTIAL_OBJECT, 71, &[handle, 2, 4]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let (size, ptype, code, txid) = header_of(&out[0]);
    assert_eq!((size, ptype, code, txid), (16, 2, GET_PARTIAL_OBJECT, 71));
    let body: Vec<u8> = out[1..out.len() - 1].concat();
    assert_eq!(body, b"cdef");
    let response = out.last().unwrap();
    assert_eq!(header_of(response).2, RC_OK);
    assert_eq!(params_of(response), [4]);

    // a window past end of file is clamped
    server
        .transport_mut()
        .push_host(command(GET_PARTIAL_OBJECT, 72, &[handle, 6, 100]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let body: Vec<u8> = out[1..out.len() - 1].concat();
    assert_eq!(body, b"gh");
    assert_eq!(params_of(out.last().unwrap()), [2]);
}

#[test]
fn get_object_streams_in_chunks() {
    // 4-byte endpoint slots force the double buffer through several laps
    let (fs, mut server) = single_storage_server(4);
    fs.create_file("/big", 0).unwrap();
    {
        let mut file = fs.open_file("/big", true).unwrap();
        file.write_at(b"0123456789", 0).unwrap();
    }
    let handle = enumerate_root(&mut server, STORAGE_A.0, 80)[0];
    server.transport_mut().zlt_events.clear();

    server
        .transport_mut()
        .push_host(command(GET_OBJECT, 81, &[handle]));
    server.process().unwrap();

    let out = server.transport_mut().take_outbound();
    let (size, ptype, code, txid) = header_of(&out[0]);
    assert_eq!((size, ptype, code, txid), (22, 2, GET_OBJECT, 81));

    let chunks = &out[1..out.len() - 1];
    assert_eq!(chunks[0], b"0123");
    assert_eq!(chunks[1], b"4567");
    assert_eq!(chunks[2], b"89");
    // the stream terminates with a zero-length transfer
    assert!(chunks.last().unwrap().is_empty());

    let (_, _, code, txid) = header_of(out.last().unwrap());
    assert_eq!((code, txid), (RC_OK, 81));

    // ZLT was suppressed for the streamed transfer
    assert!(server
        .transport_mut()
        .zlt_events
        .contains(&(mtp::EndpointDir::In, false)));
}

#[test]
fn send_object_streams_exact_multiple() {
    let (fs, mut server) = single_storage_server(4);

    let info = ObjectInfo {
        storage_id: STORAGE_A,
        compressed_size: 8,
        filename: MtpString::from("e.bin"),
        ..Default::default()
    };
    server
        .transport_mut()
        .push_host(command(SEND_OBJECT_INFO, 90, &[STORAGE_A.0, 0]));
    server
        .transport_mut()
        .push_host(data(SEND_OBJECT_INFO, 90, &codec::to_bytes(&info)));
    server.process().unwrap();
    server.transport_mut().take_outbound();

    server.transport_mut().push_host(command(SEND_OBJECT, 91, &[]));
    server
        .transport_mut()
        .push_host(data(SEND_OBJECT, 91, b"abcdefgh"));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    assert_eq!(header_of(out.last().unwrap()).2, RC_OK);

    let mut file = fs.open_file("/e.bin", false).unwrap();
    let mut buf = [0u8; 16];
    let read = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf[..read], b"abcdefgh");
}

#[test]
fn root_object_info() {
    let (_fs, mut server) = single_storage_server(64);
    server
        .transport_mut()
        .push_host(command(GET_OBJECT_INFO, 95, &[0xffff_ffff]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    let info = codec::from_bytes::<ObjectInfo>(&out[1]).unwrap();
    assert_eq!(info.format, ObjectFormat::ASSOCIATION);
    assert_eq!(info.parent, Handle(0));
    assert_eq!(header_of(&out[2]).2, RC_OK);
}

#[test]
fn storage_info_and_device_prop() {
    let (_fs, mut server) = single_storage_server(64);

    server
        .transport_mut()
        .push_host(command(GET_STORAGE_INFO, 96, &[STORAGE_A.0]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    // FixedRam, hierarchical, read-write
    assert_eq!(&out[1][..6], [3, 0, 2, 0, 0, 0]);
    assert_eq!(header_of(&out[2]).2, RC_OK);

    server
        .transport_mut()
        .push_host(command(GET_DEVICE_PROP_VALUE, 97, &[0xd402]));
    server.process().unwrap();
    let out = server.transport_mut().take_outbound();
    assert_eq!(out[1], codec::to_bytes(&MtpString::from("mtpd")));
}

#[test]
fn idle_receive_times_out() {
    let (_fs, mut server) = single_storage_server(64);
    assert!(matches!(server.process(), Err(mtp::Error::TimedOut)));
    assert!(server.transport_mut().take_outbound().is_empty());
}
