// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP command dispatcher.
 */

//! The responder server: receives one command packet per transaction,
//! routes it to an operation handler, and always answers with a response
//! carrying the command's transaction id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, trace, warn};
use num_traits::FromPrimitive;

use mtp::{
    Error, Handle, OperationCode, PacketType, ResponseCode, Result,
    StorageId, Transport, HANDLE_ROOT, PARENT_ROOT,
};

use crate::packet::{CommandPacket, DataPacket, ResponsePacket};
use crate::storage::StorageManager;
use crate::{props, CommandResult};

/// Translate a wire parent parameter: zero means the storage root.
fn parent_handle(wire: u32) -> Handle {
    if wire == PARENT_ROOT {
        HANDLE_ROOT
    } else {
        Handle(wire)
    }
}

/// The MTP responder.
///
/// Single-threaded: one `process()` call services one transaction, and
/// the transport's blocking receive/send calls are the only suspension
/// points. Auxiliary threads interact with it solely through
/// [`Transport::cancel`] and the `running` flag of [`Server::run`].
pub struct Server<T: Transport> {
    transport: T,
    storages: StorageManager,
    session_opened: AtomicBool,
    /// Pinned between SendObjectInfo and the following SendObject.
    last_sent: Option<(StorageId, Handle)>,
}

impl<T: Transport> Server<T> {
    /// A responder serving `storages` over `transport`.
    pub fn new(transport: T, storages: StorageManager) -> Self {
        Self {
            transport,
            storages,
            session_opened: AtomicBool::new(false),
            last_sent: None,
        }
    }

    /// The storages being served.
    pub fn storages(&self) -> &StorageManager {
        &self.storages
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether a session is currently open. Advisory: operations are not
    /// gated on it.
    pub fn session_opened(&self) -> bool {
        self.session_opened.load(Ordering::Relaxed)
    }

    /// Service transactions until `running` is cleared.
    ///
    /// Receive timeouts while no host is talking are idle time, not
    /// errors. A [`Transport::cancel`] from another thread unblocks any
    /// in-flight wait and lets this loop observe the flag.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            if !self.transport.wait_ready(Duration::from_millis(100)) {
                continue;
            }
            match self.process() {
                Ok(()) => trace!("transaction complete"),
                Err(Error::TimedOut) => (),
                Err(e) => warn!("failed to process request: {e}"),
            }
        }
    }

    /// Service exactly one transaction.
    ///
    /// Every received packet is answered; protocol-level failures travel
    /// in the response code, and only transport failures surface as
    /// `Err`.
    pub fn process(&mut self) -> Result<()> {
        let request = CommandPacket::receive(&mut self.transport)?;
        trace!(
            "received request {:#06x} (txid {})",
            request.header.code,
            request.header.transaction_id
        );

        let mut response = match PacketType::from_u16(request.header.ptype) {
            Some(PacketType::Command) => self.handle_request(&request),
            _ => {
                error!(
                    "received wrong packet type {:#x}",
                    request.header.ptype
                );
                ResponsePacket::new(ResponseCode::Undefined)
            }
        };

        response.echo(&request);
        trace!("sending response {:#06x}", response.header.code);
        response.send(&mut self.transport)
    }

    fn handle_request(&mut self, request: &CommandPacket) -> ResponsePacket {
        let Some(op) = OperationCode::from_u16(request.header.code) else {
            error!("request {:#06x} not implemented", request.header.code);
            return ResponsePacket::new(ResponseCode::InvalidTransactionId);
        };

        let result = match op {
            OperationCode::GetDeviceInfo => self.get_device_info(request),
            OperationCode::OpenSession => self.open_session(request),
            OperationCode::CloseSession => self.close_session(request),
            OperationCode::GetStorageIds => self.get_storage_ids(request),
            OperationCode::GetStorageInfo => self.get_storage_info(request),
            OperationCode::GetObjectHandles => {
                self.get_object_handles(request)
            }
            OperationCode::GetObjectInfo => self.get_object_info(request),
            OperationCode::GetObject => self.get_object(request),
            OperationCode::DeleteObject => self.delete_object(request),
            OperationCode::SendObjectInfo => self.send_object_info(request),
            OperationCode::SendObject => self.send_object(request),
            OperationCode::GetDevicePropDesc => {
                self.get_device_prop_desc(request)
            }
            OperationCode::GetDevicePropValue => {
                self.get_device_prop_value(request)
            }
            OperationCode::MoveObject => self.move_object(request),
            OperationCode::CopyObject => self.copy_object(request),
            OperationCode::GetPartialObject => {
                self.get_partial_object(request)
            }
            OperationCode::GetObjectPropsSupported => {
                self.get_object_props_supported(request)
            }
            OperationCode::GetObjectPropDesc => {
                self.get_object_prop_desc(request)
            }
            OperationCode::GetObjectPropValue => {
                self.get_object_prop_value(request)
            }
            OperationCode::SetObjectPropValue => {
                self.set_object_prop_value(request)
            }
            OperationCode::GetObjectPropList => {
                self.get_object_prop_list(request)
            }
        };

        result.unwrap_or_else(ResponsePacket::from)
    }

    /// Send a filled data packet; the transaction outcome is `OK` unless
    /// the transport fails mid-stream.
    fn send_data(&mut self, mut data: DataPacket) -> ResponsePacket {
        match data.send(&mut self.transport) {
            Ok(()) => ResponsePacket::new(ResponseCode::Ok),
            Err(e) => {
                warn!("data send failed: {e}");
                ResponsePacket::new(ResponseCode::GeneralError)
            }
        }
    }

    fn get_device_info(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending device info");
        let mut data = DataPacket::for_command(request);
        props::push_device_info(&mut data);
        Ok(self.send_data(data))
    }

    fn open_session(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("opening session (id {})", request.param(0));
        self.session_opened.store(true, Ordering::Relaxed);
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn close_session(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("closing session (id {})", request.param(0));
        self.session_opened.store(false, Ordering::Relaxed);
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn get_storage_ids(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending storage ids");
        let mut data = DataPacket::for_command(request);
        self.storages.get_storage_ids(&mut data)?;
        Ok(self.send_data(data))
    }

    fn get_storage_info(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending storage info (storage {:#010x})", request.param(0));
        let mut data = DataPacket::for_command(request);
        let storage =
            self.storages.storage_mut(StorageId(request.param(0)))?;
        storage.get_storage_info(&mut data)?;
        Ok(self.send_data(data))
    }

    fn get_object_handles(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "sending object handles (storage {:#010x}, format {:#x}, parent {:#x})",
            request.param(0),
            request.param(1),
            request.param(2)
        );
        if request.param(1) != 0 {
            error!("filtering by format {:#x} not supported", request.param(1));
            return Err(ResponseCode::SpecificationByFormatUnsupported);
        }

        let storage =
            self.storages.storage_mut(StorageId(request.param(0)))?;
        let handle = Handle(request.param(2));
        if !storage.contains(handle) {
            return Err(ResponseCode::InvalidObjectHandle);
        }

        let mut data = DataPacket::for_command(request);
        storage.get_object_handles(&mut data, handle)?;
        Ok(self.send_data(data))
    }

    fn get_object_info(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending object info (handle {:#x})", request.param(0));
        let handle = Handle(request.param(0));
        let mut data = DataPacket::for_command(request);
        let storage = self.storages.find_handle_mut(handle)?;
        storage.get_object_info(&mut data, handle)?;
        Ok(self.send_data(data))
    }

    fn get_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("getting object (handle {:#x})", request.param(0));
        let handle = Handle(request.param(0));
        let mut data = DataPacket::for_command(request);

        let Self {
            transport,
            storages,
            ..
        } = self;
        let storage = storages.find_handle_mut(handle)?;
        storage.get_object(transport, &mut data, handle)?;
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn delete_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "deleting object (handle {:#x}, format {:#x})",
            request.param(0),
            request.param(1)
        );
        if request.param(1) != 0 {
            return Err(ResponseCode::SpecificationByFormatUnsupported);
        }

        let handle = Handle(request.param(0));
        let storage = self.storages.find_handle_mut(handle)?;
        storage.delete_object(handle)?;
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn send_object_info(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "receiving object info (storage {:#010x}, parent {:#x})",
            request.param(0),
            request.param(1)
        );
        let mut data = DataPacket::receive(&mut self.transport)
            .map_err(|_| ResponseCode::GeneralError)?;

        let storage_id = StorageId(request.param(0));
        let parent = parent_handle(request.param(1));
        let storage = self.storages.storage_mut(storage_id)?;
        let handle = storage.send_object_info(&mut data, parent)?;

        self.last_sent = Some((storage_id, handle));
        Ok(ResponsePacket::with_params(
            ResponseCode::Ok,
            &[storage_id.0, request.param(1), handle.0],
        ))
    }

    fn send_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        let Some((storage_id, handle)) = self.last_sent else {
            warn!("SendObject without a preceding SendObjectInfo");
            return Err(ResponseCode::NoValidObjectInfo);
        };
        trace!("receiving object (handle {handle})");

        let mut data = DataPacket::for_command(request);
        let Self {
            transport,
            storages,
            ..
        } = self;
        let storage = storages.storage_mut(storage_id)?;
        storage.send_object(transport, &mut data, handle)?;
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn get_device_prop_desc(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending device prop desc (property {:#x})", request.param(0));
        let mut data = DataPacket::for_command(request);
        props::get_device_prop_desc(&mut data, request.param(0))?;
        Ok(self.send_data(data))
    }

    fn get_device_prop_value(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending device prop value (property {:#x})", request.param(0));
        let mut data = DataPacket::for_command(request);
        props::get_device_prop_value(&mut data, request.param(0))?;
        Ok(self.send_data(data))
    }

    fn move_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "moving object (handle {:#x}, storage {:#010x}, parent {:#x})",
            request.param(0),
            request.param(1),
            request.param(2)
        );
        let handle = Handle(request.param(0));
        let storage = self.storages.find_handle_mut(handle)?;

        // moving objects between stores is not supported
        if storage.id().0 != request.param(1) {
            return Err(ResponseCode::StoreNotAvailable);
        }

        let new_handle =
            storage.move_object(handle, parent_handle(request.param(2)))?;
        Ok(ResponsePacket::with_params(
            ResponseCode::Ok,
            &[new_handle.0],
        ))
    }

    fn copy_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "copying object (handle {:#x}, storage {:#010x}, parent {:#x})",
            request.param(0),
            request.param(1),
            request.param(2)
        );
        let handle = Handle(request.param(0));
        let storage = self.storages.find_handle_mut(handle)?;

        // copying objects between stores is not supported
        if storage.id().0 != request.param(1) {
            return Err(ResponseCode::StoreNotAvailable);
        }

        let new_handle =
            storage.copy_object(handle, parent_handle(request.param(2)))?;
        Ok(ResponsePacket::with_params(
            ResponseCode::Ok,
            &[new_handle.0],
        ))
    }

    fn get_partial_object(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "getting partial object (handle {:#x}, offset {:#x}, size {:#x})",
            request.param(0),
            request.param(1),
            request.param(2)
        );
        let handle = Handle(request.param(0));
        let mut data = DataPacket::for_command(request);

        let Self {
            transport,
            storages,
            ..
        } = self;
        let storage = storages.find_handle_mut(handle)?;
        let sent = storage.get_partial_object(
            transport,
            &mut data,
            handle,
            request.param(1) as u64,
            request.param(2) as u64,
        )?;
        Ok(ResponsePacket::with_params(ResponseCode::Ok, &[sent as u32]))
    }

    fn get_object_props_supported(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!("sending object props supported (format {:#x})", request.param(0));
        let mut data = DataPacket::for_command(request);
        props::get_object_props_supported(&mut data, request.param(0))?;
        Ok(self.send_data(data))
    }

    fn get_object_prop_desc(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "sending object prop desc (property {:#x}, format {:#x})",
            request.param(0),
            request.param(1)
        );
        let mut data = DataPacket::for_command(request);
        props::get_object_prop_desc(
            &mut data,
            request.param(0),
            request.param(1),
        )?;
        Ok(self.send_data(data))
    }

    fn get_object_prop_value(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "sending object prop value (handle {:#x}, property {:#x})",
            request.param(0),
            request.param(1)
        );
        let handle = Handle(request.param(0));
        let property = mtp::ObjectPropertyCode::from_u32(request.param(1))
            .ok_or(ResponseCode::InvalidObjectPropCode)?;

        let mut data = DataPacket::for_command(request);
        let storage = self.storages.find_handle_mut(handle)?;
        storage.get_object_prop_value(&mut data, handle, property)?;
        Ok(self.send_data(data))
    }

    fn set_object_prop_value(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "setting object prop value (handle {:#x}, property {:#x})",
            request.param(0),
            request.param(1)
        );
        let mut data = DataPacket::receive(&mut self.transport)
            .map_err(|_| ResponseCode::GeneralError)?;

        let handle = Handle(request.param(0));
        let property = mtp::ObjectPropertyCode::from_u32(request.param(1))
            .ok_or(ResponseCode::InvalidObjectPropCode)?;

        let storage = self.storages.find_handle_mut(handle)?;
        storage.set_object_prop_value(&mut data, handle, property)?;
        Ok(ResponsePacket::new(ResponseCode::Ok))
    }

    fn get_object_prop_list(
        &mut self,
        request: &CommandPacket,
    ) -> CommandResult<ResponsePacket> {
        trace!(
            "sending object prop list (handle {:#x}, format {:#x}, property {:#x})",
            request.param(0),
            request.param(1),
            request.param(2)
        );
        let handle = Handle(request.param(0));
        let mut data = DataPacket::for_command(request);
        let storage = self.storages.find_handle_mut(handle)?;
        storage.get_object_prop_list(
            &mut data,
            handle,
            request.param(1),
            request.param(2),
            request.param(3),
            request.param(4),
        )?;
        Ok(self.send_data(data))
    }
}
