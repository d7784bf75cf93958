//! Native binding to the ME-iDS driver library (`libmedriver`).
//!
//! Only the query call family is bound; the configuration tool never
//! performs subdevice I/O. Remote hosts are reached by the driver's RPC
//! layer, not by this binding, so the remote query methods report a
//! driver error instead.

use std::os::raw::{c_char, c_double, c_int};

use crate::defines::{BusKind, PhysicalUnit, Plugged, SubdeviceSubtype, SubdeviceType};
use crate::driver::{
    BusLocation, DeviceHardwareInfo, Driver, DriverError, DriverResult, RangeInfo,
};

const ME_OPEN_NO_FLAGS: c_int = 0;
const ME_CLOSE_NO_FLAGS: c_int = 0;
const ME_ERROR_MSG_MAX_COUNT: usize = 256;
const NAME_MAX_COUNT: usize = 256;

#[link(name = "medriver")]
extern "C" {
    fn meOpen(iFlags: c_int) -> c_int;
    fn meClose(iFlags: c_int) -> c_int;
    fn meErrorGetMessage(iErrorCode: c_int, pcErrorMsg: *mut c_char, iCount: c_int) -> c_int;

    fn meQueryNumberDevices(piNumber: *mut c_int) -> c_int;
    fn meQueryInfoDevice(
        iDevice: c_int,
        piVendorId: *mut c_int,
        piDeviceId: *mut c_int,
        piSerialNo: *mut c_int,
        piBusType: *mut c_int,
        piBusNo: *mut c_int,
        piDevNo: *mut c_int,
        piFuncNo: *mut c_int,
        piPlugged: *mut c_int,
    ) -> c_int;
    fn meQueryNameDevice(iDevice: c_int, pcName: *mut c_char, iCount: c_int) -> c_int;
    fn meQueryDescriptionDevice(iDevice: c_int, pcDescription: *mut c_char, iCount: c_int)
        -> c_int;
    fn meQueryNumberSubdevices(iDevice: c_int, piNumber: *mut c_int) -> c_int;
    fn meQuerySubdeviceType(
        iDevice: c_int,
        iSubdevice: c_int,
        piType: *mut c_int,
        piSubtype: *mut c_int,
    ) -> c_int;
    fn meQueryNumberChannels(iDevice: c_int, iSubdevice: c_int, piNumber: *mut c_int) -> c_int;
    fn meQueryNumberRanges(
        iDevice: c_int,
        iSubdevice: c_int,
        iUnit: c_int,
        piNumber: *mut c_int,
    ) -> c_int;
    fn meQueryRangeInfo(
        iDevice: c_int,
        iSubdevice: c_int,
        iRange: c_int,
        piUnit: *mut c_int,
        pdMin: *mut c_double,
        pdMax: *mut c_double,
        piMaxData: *mut c_int,
    ) -> c_int;
}

fn check(code: c_int) -> DriverResult<()> {
    if code == 0 {
        return Ok(());
    }
    let mut msg = vec![0u8; ME_ERROR_MSG_MAX_COUNT];
    let res =
        unsafe { meErrorGetMessage(code, msg.as_mut_ptr() as *mut c_char, msg.len() as c_int) };
    msg.retain(|&b| b != 0);
    let message = if res == 0 {
        String::from_utf8_lossy(&msg).into_owned()
    } else {
        "unknown driver error".to_string()
    };
    Err(DriverError::new(code, message))
}

fn query_string(
    device: u32,
    call: unsafe extern "C" fn(c_int, *mut c_char, c_int) -> c_int,
) -> DriverResult<String> {
    let mut buffer = vec![0u8; NAME_MAX_COUNT];
    check(unsafe {
        call(
            device as c_int,
            buffer.as_mut_ptr() as *mut c_char,
            buffer.len() as c_int,
        )
    })?;
    buffer.retain(|&b| b != 0);
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn remote_unsupported() -> DriverError {
    DriverError::new(
        -1,
        "remote device queries are not supported by the native backend",
    )
}

/// Driver backed by the installed ME-iDS library.
#[derive(Debug, Default)]
pub struct FfiDriver;

impl Driver for FfiDriver {
    fn open(&mut self) -> DriverResult<()> {
        check(unsafe { meOpen(ME_OPEN_NO_FLAGS) })
    }

    fn close(&mut self) -> DriverResult<()> {
        check(unsafe { meClose(ME_CLOSE_NO_FLAGS) })
    }

    fn number_devices(&mut self) -> DriverResult<u32> {
        let mut number: c_int = 0;
        check(unsafe { meQueryNumberDevices(&mut number) })?;
        Ok(number as u32)
    }

    fn device_info(&mut self, device: u32) -> DriverResult<DeviceHardwareInfo> {
        let mut vendor_id: c_int = 0;
        let mut device_id: c_int = 0;
        let mut serial_no: c_int = 0;
        let mut bus_type: c_int = 0;
        let mut bus_no: c_int = 0;
        let mut dev_no: c_int = 0;
        let mut func_no: c_int = 0;
        let mut plugged: c_int = 0;
        check(unsafe {
            meQueryInfoDevice(
                device as c_int,
                &mut vendor_id,
                &mut device_id,
                &mut serial_no,
                &mut bus_type,
                &mut bus_no,
                &mut dev_no,
                &mut func_no,
                &mut plugged,
            )
        })?;
        let bus = BusKind::from(bus_type as u32);
        let location = match bus {
            BusKind::Pci => BusLocation::Pci {
                bus: bus_no as u32,
                device: dev_no as u32,
                function: func_no as u32,
            },
            BusKind::Usb => BusLocation::Usb {
                root_hub: bus_no as u32,
            },
            _ => BusLocation::Network,
        };
        Ok(DeviceHardwareInfo {
            vendor_id: vendor_id as u32,
            device_id: device_id as u32,
            serial_no: serial_no as u32,
            bus,
            location,
            plugged: Plugged::from(plugged as u32),
        })
    }

    fn device_name(&mut self, device: u32) -> DriverResult<String> {
        query_string(device, meQueryNameDevice)
    }

    fn device_description(&mut self, device: u32) -> DriverResult<String> {
        query_string(device, meQueryDescriptionDevice)
    }

    fn number_subdevices(&mut self, device: u32) -> DriverResult<u32> {
        let mut number: c_int = 0;
        check(unsafe { meQueryNumberSubdevices(device as c_int, &mut number) })?;
        Ok(number as u32)
    }

    fn subdevice_type(
        &mut self,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)> {
        let mut kind: c_int = 0;
        let mut subtype: c_int = 0;
        check(unsafe {
            meQuerySubdeviceType(device as c_int, subdevice as c_int, &mut kind, &mut subtype)
        })?;
        Ok((
            SubdeviceType::from(kind as u32),
            SubdeviceSubtype::from(subtype as u32),
        ))
    }

    fn number_channels(&mut self, device: u32, subdevice: u32) -> DriverResult<u32> {
        let mut number: c_int = 0;
        check(unsafe {
            meQueryNumberChannels(device as c_int, subdevice as c_int, &mut number)
        })?;
        Ok(number as u32)
    }

    fn number_ranges(
        &mut self,
        device: u32,
        subdevice: u32,
        unit: PhysicalUnit,
    ) -> DriverResult<u32> {
        let mut number: c_int = 0;
        check(unsafe {
            meQueryNumberRanges(
                device as c_int,
                subdevice as c_int,
                unit as u32 as c_int,
                &mut number,
            )
        })?;
        Ok(number as u32)
    }

    fn range_info(&mut self, device: u32, subdevice: u32, range: u32) -> DriverResult<RangeInfo> {
        let mut unit: c_int = 0;
        let mut min: c_double = 0.0;
        let mut max: c_double = 0.0;
        let mut max_data: c_int = 0;
        check(unsafe {
            meQueryRangeInfo(
                device as c_int,
                subdevice as c_int,
                range as c_int,
                &mut unit,
                &mut min,
                &mut max,
                &mut max_data,
            )
        })?;
        Ok(RangeInfo {
            unit: PhysicalUnit::from(unit as u32),
            min,
            max,
            max_data: max_data as u32,
        })
    }

    fn remote_number_devices(&mut self, _host: &str) -> DriverResult<u32> {
        Err(remote_unsupported())
    }

    fn remote_device_info(&mut self, _host: &str, _device: u32) -> DriverResult<DeviceHardwareInfo> {
        Err(remote_unsupported())
    }

    fn remote_device_name(&mut self, _host: &str, _device: u32) -> DriverResult<String> {
        Err(remote_unsupported())
    }

    fn remote_device_description(&mut self, _host: &str, _device: u32) -> DriverResult<String> {
        Err(remote_unsupported())
    }

    fn remote_number_subdevices(&mut self, _host: &str, _device: u32) -> DriverResult<u32> {
        Err(remote_unsupported())
    }

    fn remote_subdevice_type(
        &mut self,
        _host: &str,
        _device: u32,
        _subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)> {
        Err(remote_unsupported())
    }

    fn remote_number_channels(
        &mut self,
        _host: &str,
        _device: u32,
        _subdevice: u32,
    ) -> DriverResult<u32> {
        Err(remote_unsupported())
    }

    fn remote_number_ranges(
        &mut self,
        _host: &str,
        _device: u32,
        _subdevice: u32,
        _unit: PhysicalUnit,
    ) -> DriverResult<u32> {
        Err(remote_unsupported())
    }

    fn remote_range_info(
        &mut self,
        _host: &str,
        _device: u32,
        _subdevice: u32,
        _range: u32,
    ) -> DriverResult<RangeInfo> {
        Err(remote_unsupported())
    }
}
