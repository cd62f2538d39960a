// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packet framing against the scripted transport.

mod common;

use common::*;

use mtp::{EndpointDir, Error, EventCode, ResponseCode};
use mtp_responder::packet::{
    CommandPacket, DataPacket, EventPacket, ResponsePacket,
};

#[test]
fn command_params_zero_filled() {
    let mut usb = ScriptedUsb::new(64);
    // size claims two params, the rest must read back as zero
    usb.push_host(command(0x1007, 7, &[0xaabb, 0x3000]));
    let request = CommandPacket::receive(&mut usb).unwrap();
    assert_eq!(request.header.code, 0x1007);
    assert_eq!(request.header.transaction_id, 7);
    assert_eq!(request.param(0), 0xaabb);
    assert_eq!(request.param(1), 0x3000);
    assert_eq!(request.param(2), 0);
    assert_eq!(request.param(7), 0);
}

#[test]
fn command_short_header() {
    let mut usb = ScriptedUsb::new(64);
    usb.push_host(vec![1, 2, 3]);
    assert!(matches!(
        CommandPacket::receive(&mut usb),
        Err(Error::ReceiveShort)
    ));
}

#[test]
fn response_wire_form() {
    let mut usb = ScriptedUsb::new(64);
    let mut response = ResponsePacket::with_params(ResponseCode::Ok, &[9]);
    usb.push_host(command(0x1002, 4, &[]));
    let request = CommandPacket::receive(&mut usb).unwrap();
    response.echo(&request);
    response.send(&mut usb).unwrap();

    let out = usb.take_outbound();
    assert_eq!(
        out[0],
        [0x10, 0, 0, 0, 0x03, 0, 0x01, 0x20, 4, 0, 0, 0, 9, 0, 0, 0]
    );
}

#[test]
fn event_framing() {
    let event = EventPacket::new(EventCode::Undefined, [1, 2, 3]);
    let wire = event.to_wire().unwrap();
    assert_eq!(wire.len(), 24);
    assert_eq!(&wire[..12], [24, 0, 0, 0, 0x04, 0, 0x00, 0x40, 0, 0, 0, 0]);
    assert_eq!(&wire[12..16], [1, 0, 0, 0]);
}

#[test]
fn data_send_requests_zlt() {
    let mut usb = ScriptedUsb::new(64);
    usb.push_host(command(0x1004, 3, &[]));
    let request = CommandPacket::receive(&mut usb).unwrap();

    let mut data = DataPacket::for_command(&request);
    data.put(&vec![0x0001_0001u32]);
    data.send(&mut usb).unwrap();

    assert_eq!(usb.zlt_events, [(EndpointDir::In, true)]);
    let out = usb.take_outbound();
    let (size, ptype, code, txid) = header_of(&out[0]);
    assert_eq!((size, ptype, code, txid), (20, 2, 0x1004, 3));
    assert_eq!(out[1], [1, 0, 0, 0, 1, 0, 1, 0]);
}

#[test]
fn data_receive_split_reads() {
    let mut usb = ScriptedUsb::new(64);
    usb.push_host(data(0x100c, 9, b"payload"));
    let packet = DataPacket::receive(&mut usb).unwrap();
    assert_eq!(packet.header.transaction_id, 9);
    assert_eq!(packet.payload(), b"payload");
}

#[test]
fn data_receive_truncated_payload() {
    let mut usb = ScriptedUsb::new(64);
    // header promises 20 payload bytes, only 3 arrive
    let mut bytes = data(0x100c, 9, b"abc");
    bytes[0] = 32;
    usb.push_host(bytes);
    assert!(matches!(
        DataPacket::receive(&mut usb),
        Err(Error::ReceiveShort)
    ));
}

#[test]
fn data_pop_cursor_advances() {
    let mut usb = ScriptedUsb::new(64);
    let mut payload = Vec::new();
    payload.extend_from_slice(&0x1234u16.to_le_bytes());
    payload.extend_from_slice(&0xdead_beefu32.to_le_bytes());
    usb.push_host(data(0x9804, 5, &payload));

    let mut packet = DataPacket::receive(&mut usb).unwrap();
    assert_eq!(packet.pop::<u16>().unwrap(), 0x1234);
    assert_eq!(packet.pop::<u32>().unwrap(), 0xdead_beef);
    assert!(matches!(packet.pop::<u8>(), Err(Error::MalformedPacket)));
}
