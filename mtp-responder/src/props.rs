// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Static device capability and property tables.
 */

//! The property registry: device identity, the capability tables emitted
//! by `GetDeviceInfo`, and the device/object property descriptors.

use log::error;

use mtp::{
    DataType, DevicePropertyCode, EventCode, FormFlag, ObjectFormat,
    ObjectPropertyCode, OperationCode, ResponseCode,
};

use crate::codec::{MtpString, Value};
use crate::packet::DataPacket;
use crate::CommandResult;

/// PTP standard version: 1.0.0.
pub const STANDARD_VERSION: u16 = 100;
/// MTP vendor extension id. ISO 15740 reserves 0xffffffff here, but that
/// value is commonly emitted by plain PTP devices; 6 is the id hosts
/// expect from an MTP responder.
pub const VENDOR_EXTENSION_ID: u32 = 6;
/// MTP version: 1.1.0.
pub const VENDOR_EXTENSION_VERSION: u16 = 110;
/// Standard functional mode.
pub const FUNCTIONAL_MODE: u16 = 0;

const MANUFACTURER: &str = "mtpd";
const MODEL: &str = "mtpd";
const DEVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
const SERIAL_NUMBER: &str = "0000000000000000";

const DEVICE_FRIENDLY_NAME: &str = "mtpd";
const SYNCHRONIZATION_PARTNER: &str = "mtpd";

/// The operations this responder advertises and services.
pub const SUPPORTED_OPERATIONS: [OperationCode; 20] = [
    OperationCode::GetDeviceInfo,
    OperationCode::OpenSession,
    OperationCode::CloseSession,
    OperationCode::GetStorageIds,
    OperationCode::GetStorageInfo,
    OperationCode::GetObjectHandles,
    OperationCode::GetObjectInfo,
    OperationCode::GetObject,
    OperationCode::DeleteObject,
    OperationCode::SendObjectInfo,
    OperationCode::SendObject,
    OperationCode::GetDevicePropDesc,
    OperationCode::GetDevicePropValue,
    OperationCode::MoveObject,
    OperationCode::CopyObject,
    OperationCode::GetPartialObject,
    OperationCode::GetObjectPropsSupported,
    OperationCode::GetObjectPropDesc,
    OperationCode::GetObjectPropValue,
    OperationCode::SetObjectPropValue,
];

/// The advertised event set. Only the stub entry.
pub const SUPPORTED_EVENTS: [EventCode; 1] = [EventCode::Undefined];

/// The advertised device properties.
pub const SUPPORTED_DEVICE_PROPERTIES: [DevicePropertyCode; 2] = [
    DevicePropertyCode::DeviceFriendlyName,
    DevicePropertyCode::SynchronizationPartner,
];

/// The advertised capture formats.
pub const SUPPORTED_CAPTURE_FORMATS: [ObjectFormat; 1] =
    [ObjectFormat::UNDEFINED];

/// The advertised playback formats.
pub const SUPPORTED_PLAYBACK_FORMATS: [ObjectFormat; 2] =
    [ObjectFormat::UNDEFINED, ObjectFormat::ASSOCIATION];

/// Serialise the DeviceInfo dataset.
pub fn push_device_info(data: &mut DataPacket) {
    data.put(&STANDARD_VERSION);
    data.put(&VENDOR_EXTENSION_ID);
    data.put(&VENDOR_EXTENSION_VERSION);
    data.put(&MtpString::default()); // mtp extensions
    data.put(&FUNCTIONAL_MODE);
    data.put(&SUPPORTED_OPERATIONS.to_vec());
    data.put(&SUPPORTED_EVENTS.to_vec());
    data.put(&SUPPORTED_DEVICE_PROPERTIES.to_vec());
    data.put(&SUPPORTED_CAPTURE_FORMATS.to_vec());
    data.put(&SUPPORTED_PLAYBACK_FORMATS.to_vec());
    data.put(&MtpString::from(MANUFACTURER));
    data.put(&MtpString::from(MODEL));
    data.put(&MtpString::from(DEVICE_VERSION));
    data.put(&MtpString::from(SERIAL_NUMBER));
}

/// A DevicePropDesc dataset.
pub struct DevicePropDesc<T> {
    /// Property code.
    pub code: DevicePropertyCode,
    /// Wire datatype of the value.
    pub data_type: DataType,
    /// 0 = get only, 1 = get/set.
    pub get_set: u8,
    /// Factory default value.
    pub default_value: T,
    /// Current value.
    pub current_value: T,
    /// Property group.
    pub group_code: u32,
    /// Form of the value.
    pub form_flag: FormFlag,
}

impl<T: Value> DevicePropDesc<T> {
    fn push_to(&self, data: &mut DataPacket) {
        data.put(&self.code);
        data.put(&self.data_type);
        data.put(&self.get_set);
        data.put(&self.default_value);
        data.put(&self.current_value);
        data.put(&self.group_code);
        data.put(&self.form_flag);
    }
}

/// An ObjectPropDesc dataset.
pub struct ObjectPropDesc<T> {
    /// Property code.
    pub code: ObjectPropertyCode,
    /// Wire datatype of the value.
    pub data_type: DataType,
    /// 0 = get only, 1 = get/set.
    pub get_set: u8,
    /// Factory default value.
    pub default_value: T,
    /// Property group.
    pub group_code: u32,
    /// Form of the value.
    pub form_flag: FormFlag,
}

impl<T: Value> ObjectPropDesc<T> {
    fn push_to(&self, data: &mut DataPacket) {
        data.put(&self.code);
        data.put(&self.data_type);
        data.put(&self.get_set);
        data.put(&self.default_value);
        data.put(&self.group_code);
        data.put(&self.form_flag);
    }
}

fn string_device_prop(code: DevicePropertyCode, value: &str) -> DevicePropDesc<MtpString> {
    DevicePropDesc {
        code,
        data_type: DataType::Str,
        get_set: 0,
        default_value: MtpString::from(value),
        current_value: MtpString::from(value),
        group_code: 0,
        form_flag: FormFlag::None,
    }
}

/// Serialise the descriptor for one device property.
pub fn get_device_prop_desc(
    data: &mut DataPacket,
    property: u32,
) -> CommandResult {
    use num_traits::FromPrimitive;
    match DevicePropertyCode::from_u32(property) {
        Some(DevicePropertyCode::DeviceFriendlyName) => {
            string_device_prop(
                DevicePropertyCode::DeviceFriendlyName,
                DEVICE_FRIENDLY_NAME,
            )
            .push_to(data);
        }
        Some(DevicePropertyCode::SynchronizationPartner) => {
            string_device_prop(
                DevicePropertyCode::SynchronizationPartner,
                SYNCHRONIZATION_PARTNER,
            )
            .push_to(data);
        }
        _ => {
            error!("device property desc {property:#x} not implemented");
            return Err(ResponseCode::DevicePropNotSupported);
        }
    }
    Ok(())
}

/// Serialise the value of one device property.
pub fn get_device_prop_value(
    data: &mut DataPacket,
    property: u32,
) -> CommandResult {
    use num_traits::FromPrimitive;
    match DevicePropertyCode::from_u32(property) {
        Some(DevicePropertyCode::DeviceFriendlyName) => {
            data.put(&MtpString::from(DEVICE_FRIENDLY_NAME));
        }
        Some(DevicePropertyCode::SynchronizationPartner) => {
            data.put(&MtpString::from(SYNCHRONIZATION_PARTNER));
        }
        _ => {
            error!("device property value {property:#x} not implemented");
            return Err(ResponseCode::DevicePropNotSupported);
        }
    }
    Ok(())
}

/// Serialise the object property set supported for one format.
pub fn get_object_props_supported(
    data: &mut DataPacket,
    format: u32,
) -> CommandResult {
    let format = ObjectFormat(format as u16);
    let props: Vec<ObjectPropertyCode> = if format == ObjectFormat::UNDEFINED {
        vec![
            ObjectPropertyCode::StorageId,
            ObjectPropertyCode::ObjectFormat,
            ObjectPropertyCode::ObjectSize,
            ObjectPropertyCode::ObjectFileName,
            ObjectPropertyCode::DateCreated,
            ObjectPropertyCode::DateModified,
            ObjectPropertyCode::ParentObject,
        ]
    } else if format == ObjectFormat::ASSOCIATION {
        vec![
            ObjectPropertyCode::StorageId,
            ObjectPropertyCode::ObjectFormat,
            ObjectPropertyCode::ObjectFileName,
            ObjectPropertyCode::ParentObject,
        ]
    } else {
        error!("object props supported {:#x} not implemented", format.0);
        return Err(ResponseCode::OperationNotSupported);
    };
    data.put(&props);
    Ok(())
}

/// Serialise the descriptor for one object property.
pub fn get_object_prop_desc(
    data: &mut DataPacket,
    property: u32,
    _format: u32,
) -> CommandResult {
    use num_traits::FromPrimitive;
    match ObjectPropertyCode::from_u32(property) {
        Some(code @ ObjectPropertyCode::StorageId)
        | Some(code @ ObjectPropertyCode::ParentObject) => {
            ObjectPropDesc {
                code,
                data_type: DataType::Uint32,
                get_set: 0,
                default_value: 0u32,
                group_code: 0,
                form_flag: FormFlag::None,
            }
            .push_to(data);
        }
        Some(ObjectPropertyCode::ObjectFormat) => {
            ObjectPropDesc {
                code: ObjectPropertyCode::ObjectFormat,
                data_type: DataType::Uint16,
                get_set: 0,
                default_value: ObjectFormat::UNDEFINED,
                group_code: 0,
                form_flag: FormFlag::None,
            }
            .push_to(data);
        }
        Some(ObjectPropertyCode::ObjectSize) => {
            ObjectPropDesc {
                code: ObjectPropertyCode::ObjectSize,
                data_type: DataType::Uint64,
                get_set: 0,
                default_value: 0u64,
                group_code: 0,
                form_flag: FormFlag::None,
            }
            .push_to(data);
        }
        Some(ObjectPropertyCode::ObjectFileName) => {
            ObjectPropDesc {
                code: ObjectPropertyCode::ObjectFileName,
                data_type: DataType::Str,
                get_set: 1, // get/set
                default_value: MtpString::default(),
                group_code: 0,
                form_flag: FormFlag::None,
            }
            .push_to(data);
        }
        Some(code @ ObjectPropertyCode::DateCreated)
        | Some(code @ ObjectPropertyCode::DateModified) => {
            ObjectPropDesc {
                code,
                data_type: DataType::Str,
                get_set: 0,
                default_value: MtpString::default(),
                group_code: 0,
                form_flag: FormFlag::DateTime,
            }
            .push_to(data);
        }
        _ => {
            error!("object property desc {property:#x} not implemented");
            return Err(ResponseCode::OperationNotSupported);
        }
    }
    Ok(())
}
