//! Abstraction over the ME-iDS driver system.
//!
//! The configuration tool only ever asks the driver *questions*; it never
//! performs I/O on a subdevice. The [`Driver`] trait therefore covers the
//! query family of the driver API plus the remote variants that take a host
//! name. The native binding lives in [`crate::ffi`] behind the `medriver`
//! feature; [`MockDriver`] backs tests and the `--simulate` mode.

use std::collections::HashMap;

use thiserror::Error;

use crate::defines::{BusKind, PhysicalUnit, Plugged, SubdeviceSubtype, SubdeviceType};

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Error reported by the driver system, carrying its status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ME driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Where a device sits on its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusLocation {
    Pci { bus: u32, device: u32, function: u32 },
    Usb { root_hub: u32 },
    Network,
}

/// Identity block returned by the driver for one device index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHardwareInfo {
    pub vendor_id: u32,
    pub device_id: u32,
    pub serial_no: u32,
    pub bus: BusKind,
    pub location: BusLocation,
    pub plugged: Plugged,
}

/// One conversion range of an analog subdevice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeInfo {
    pub unit: PhysicalUnit,
    pub min: f64,
    pub max: f64,
    pub max_data: u32,
}

/// Query interface of the driver system.
///
/// Mirrors the `meQuery*` call family and its `meRQuery*` remote twin. All
/// calls are synchronous; a failing call carries the driver status code.
pub trait Driver {
    fn open(&mut self) -> DriverResult<()>;
    fn close(&mut self) -> DriverResult<()>;

    fn number_devices(&mut self) -> DriverResult<u32>;
    fn device_info(&mut self, device: u32) -> DriverResult<DeviceHardwareInfo>;
    fn device_name(&mut self, device: u32) -> DriverResult<String>;
    fn device_description(&mut self, device: u32) -> DriverResult<String>;
    fn number_subdevices(&mut self, device: u32) -> DriverResult<u32>;
    fn subdevice_type(
        &mut self,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)>;
    fn number_channels(&mut self, device: u32, subdevice: u32) -> DriverResult<u32>;
    fn number_ranges(
        &mut self,
        device: u32,
        subdevice: u32,
        unit: PhysicalUnit,
    ) -> DriverResult<u32>;
    fn range_info(&mut self, device: u32, subdevice: u32, range: u32) -> DriverResult<RangeInfo>;

    fn remote_number_devices(&mut self, host: &str) -> DriverResult<u32>;
    fn remote_device_info(&mut self, host: &str, device: u32) -> DriverResult<DeviceHardwareInfo>;
    fn remote_device_name(&mut self, host: &str, device: u32) -> DriverResult<String>;
    fn remote_device_description(&mut self, host: &str, device: u32) -> DriverResult<String>;
    fn remote_number_subdevices(&mut self, host: &str, device: u32) -> DriverResult<u32>;
    fn remote_subdevice_type(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)>;
    fn remote_number_channels(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<u32>;
    fn remote_number_ranges(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
        unit: PhysicalUnit,
    ) -> DriverResult<u32>;
    fn remote_range_info(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
        range: u32,
    ) -> DriverResult<RangeInfo>;
}

/// A subdevice of a simulated board.
#[derive(Debug, Clone)]
pub struct MockSubdevice {
    pub kind: SubdeviceType,
    pub subtype: SubdeviceSubtype,
    pub channels: u32,
    pub ranges: Vec<RangeInfo>,
}

impl MockSubdevice {
    pub fn new(kind: SubdeviceType, subtype: SubdeviceSubtype, channels: u32) -> Self {
        Self {
            kind,
            subtype,
            channels,
            ranges: Vec::new(),
        }
    }

    pub fn with_range(mut self, unit: PhysicalUnit, min: f64, max: f64, max_data: u32) -> Self {
        self.ranges.push(RangeInfo {
            unit,
            min,
            max,
            max_data,
        });
        self
    }
}

/// A simulated board.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub info: DeviceHardwareInfo,
    pub name: String,
    pub description: String,
    pub subdevices: Vec<MockSubdevice>,
}

impl MockDevice {
    pub fn new(name: &str, device_id: u32, serial_no: u32) -> Self {
        Self {
            info: DeviceHardwareInfo {
                vendor_id: 0x1402,
                device_id,
                serial_no,
                bus: BusKind::Pci,
                location: BusLocation::Pci {
                    bus: 2,
                    device: serial_no % 16,
                    function: 0,
                },
                plugged: Plugged::In,
            },
            name: name.to_string(),
            description: format!("Meilhaus Electronic {name}"),
            subdevices: Vec::new(),
        }
    }

    pub fn unplugged(mut self) -> Self {
        self.info.plugged = Plugged::Out;
        self
    }

    pub fn usb(mut self, root_hub: u32) -> Self {
        self.info.bus = BusKind::Usb;
        self.info.location = BusLocation::Usb { root_hub };
        self
    }

    pub fn subdevice(mut self, sub: MockSubdevice) -> Self {
        self.subdevices.push(sub);
        self
    }

    /// ME-4680 style board: one streaming AI, four AO (the fourth is the
    /// extension timer), one DIO port and a counter.
    pub fn me4680(serial_no: u32) -> Self {
        let mut dev = Self::new("ME-4680", 0x4680, serial_no);
        dev = dev.subdevice(
            MockSubdevice::new(SubdeviceType::Ai, SubdeviceSubtype::Streaming, 32)
                .with_range(PhysicalUnit::Volt, -10.0, 10.0, 0xFFFF)
                .with_range(PhysicalUnit::Volt, 0.0, 10.0, 0xFFFF),
        );
        for _ in 0..4 {
            dev = dev.subdevice(
                MockSubdevice::new(SubdeviceType::Ao, SubdeviceSubtype::Single, 1)
                    .with_range(PhysicalUnit::Volt, -10.0, 10.0, 0xFFFF),
            );
        }
        dev.subdevice(MockSubdevice::new(
            SubdeviceType::Dio,
            SubdeviceSubtype::Single,
            8,
        ))
        .subdevice(MockSubdevice::new(
            SubdeviceType::Ctr,
            SubdeviceSubtype::Ctr8254,
            3,
        ))
    }

    /// ME-4610 style board: one streaming AI and a DIO port, no timer AO.
    pub fn me4610(serial_no: u32) -> Self {
        Self::new("ME-4610", 0x4610, serial_no)
            .subdevice(
                MockSubdevice::new(SubdeviceType::Ai, SubdeviceSubtype::Streaming, 16)
                    .with_range(PhysicalUnit::Volt, -10.0, 10.0, 0x3FFF),
            )
            .subdevice(MockSubdevice::new(
                SubdeviceType::Dio,
                SubdeviceSubtype::Single,
                8,
            ))
    }

    /// ME-1000 style board: two DIO ports, ME-1001 capable.
    pub fn me1000(serial_no: u32) -> Self {
        Self::new("ME-1000", crate::defines::ME1000_DEVICE_ID, serial_no)
            .subdevice(MockSubdevice::new(
                SubdeviceType::Dio,
                SubdeviceSubtype::Single,
                32,
            ))
            .subdevice(MockSubdevice::new(
                SubdeviceType::Dio,
                SubdeviceSubtype::Single,
                32,
            ))
    }
}

/// In-process driver fake. Devices are addressed by their list position,
/// exactly like the real driver's dense device indices.
#[derive(Debug, Default)]
pub struct MockDriver {
    pub devices: Vec<MockDevice>,
    pub remote_hosts: HashMap<String, Vec<MockDevice>>,
    pub fail_open: bool,
}

impl MockDriver {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    /// A small mixed local setup used by `--simulate`.
    pub fn sample() -> Self {
        Self::new(vec![
            MockDevice::me4680(0x0001_0001),
            MockDevice::me4610(0x0001_0002),
            MockDevice::me1000(0x0001_0003),
        ])
    }

    pub fn with_remote_host(mut self, host: &str, devices: Vec<MockDevice>) -> Self {
        self.remote_hosts.insert(host.to_string(), devices);
        self
    }

    fn device(&self, device: u32) -> DriverResult<&MockDevice> {
        self.devices
            .get(device as usize)
            .ok_or_else(|| DriverError::new(2, format!("invalid device number {device}")))
    }

    fn subdevice(&self, device: u32, subdevice: u32) -> DriverResult<&MockSubdevice> {
        self.device(device)?
            .subdevices
            .get(subdevice as usize)
            .ok_or_else(|| DriverError::new(3, format!("invalid subdevice number {subdevice}")))
    }

    fn host(&self, host: &str) -> DriverResult<&Vec<MockDevice>> {
        self.remote_hosts
            .get(host)
            .ok_or_else(|| DriverError::new(70, format!("cannot reach host '{host}'")))
    }

    fn host_device(&self, host: &str, device: u32) -> DriverResult<&MockDevice> {
        self.host(host)?
            .get(device as usize)
            .ok_or_else(|| DriverError::new(2, format!("invalid device number {device}")))
    }

    fn host_subdevice(
        &self,
        host: &str,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<&MockSubdevice> {
        self.host_device(host, device)?
            .subdevices
            .get(subdevice as usize)
            .ok_or_else(|| DriverError::new(3, format!("invalid subdevice number {subdevice}")))
    }

    fn range(sub: &MockSubdevice, range: u32) -> DriverResult<RangeInfo> {
        sub.ranges
            .get(range as usize)
            .copied()
            .ok_or_else(|| DriverError::new(12, format!("invalid range number {range}")))
    }
}

impl Driver for MockDriver {
    fn open(&mut self) -> DriverResult<()> {
        if self.fail_open {
            return Err(DriverError::new(1, "cannot open the driver system"));
        }
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn number_devices(&mut self) -> DriverResult<u32> {
        Ok(self.devices.len() as u32)
    }

    fn device_info(&mut self, device: u32) -> DriverResult<DeviceHardwareInfo> {
        Ok(self.device(device)?.info.clone())
    }

    fn device_name(&mut self, device: u32) -> DriverResult<String> {
        Ok(self.device(device)?.name.clone())
    }

    fn device_description(&mut self, device: u32) -> DriverResult<String> {
        Ok(self.device(device)?.description.clone())
    }

    fn number_subdevices(&mut self, device: u32) -> DriverResult<u32> {
        Ok(self.device(device)?.subdevices.len() as u32)
    }

    fn subdevice_type(
        &mut self,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)> {
        let sub = self.subdevice(device, subdevice)?;
        Ok((sub.kind, sub.subtype))
    }

    fn number_channels(&mut self, device: u32, subdevice: u32) -> DriverResult<u32> {
        Ok(self.subdevice(device, subdevice)?.channels)
    }

    fn number_ranges(
        &mut self,
        device: u32,
        subdevice: u32,
        unit: PhysicalUnit,
    ) -> DriverResult<u32> {
        let sub = self.subdevice(device, subdevice)?;
        let count = match unit {
            PhysicalUnit::Any => sub.ranges.len(),
            unit => sub.ranges.iter().filter(|r| r.unit == unit).count(),
        };
        Ok(count as u32)
    }

    fn range_info(&mut self, device: u32, subdevice: u32, range: u32) -> DriverResult<RangeInfo> {
        Self::range(self.subdevice(device, subdevice)?, range)
    }

    fn remote_number_devices(&mut self, host: &str) -> DriverResult<u32> {
        Ok(self.host(host)?.len() as u32)
    }

    fn remote_device_info(&mut self, host: &str, device: u32) -> DriverResult<DeviceHardwareInfo> {
        Ok(self.host_device(host, device)?.info.clone())
    }

    fn remote_device_name(&mut self, host: &str, device: u32) -> DriverResult<String> {
        Ok(self.host_device(host, device)?.name.clone())
    }

    fn remote_device_description(&mut self, host: &str, device: u32) -> DriverResult<String> {
        Ok(self.host_device(host, device)?.description.clone())
    }

    fn remote_number_subdevices(&mut self, host: &str, device: u32) -> DriverResult<u32> {
        Ok(self.host_device(host, device)?.subdevices.len() as u32)
    }

    fn remote_subdevice_type(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<(SubdeviceType, SubdeviceSubtype)> {
        let sub = self.host_subdevice(host, device, subdevice)?;
        Ok((sub.kind, sub.subtype))
    }

    fn remote_number_channels(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
    ) -> DriverResult<u32> {
        Ok(self.host_subdevice(host, device, subdevice)?.channels)
    }

    fn remote_number_ranges(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
        unit: PhysicalUnit,
    ) -> DriverResult<u32> {
        let sub = self.host_subdevice(host, device, subdevice)?;
        let count = match unit {
            PhysicalUnit::Any => sub.ranges.len(),
            unit => sub.ranges.iter().filter(|r| r.unit == unit).count(),
        };
        Ok(count as u32)
    }

    fn remote_range_info(
        &mut self,
        host: &str,
        device: u32,
        subdevice: u32,
        range: u32,
    ) -> DriverResult<RangeInfo> {
        Self::range(self.host_subdevice(host, device, subdevice)?, range)
    }
}
