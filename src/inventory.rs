//! Discovery of the hardware currently known to the driver system.
//!
//! A snapshot is a pure read: it never touches the configuration document.
//! [`snapshot`] is strict and fails on the first driver error (partial
//! results are discarded); [`probe_snapshot`] tolerates per-device errors
//! so that reconciliation can treat an unreachable device as unplugged.

use log::debug;

use crate::defines::{PhysicalUnit, Plugged, SubdeviceSubtype, SubdeviceType};
use crate::driver::{DeviceHardwareInfo, Driver, DriverResult, RangeInfo};

/// Discovery record of one subdevice.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdeviceDescriptor {
    pub kind: SubdeviceType,
    pub subtype: SubdeviceSubtype,
    pub channels: u32,
    pub ranges: Vec<RangeInfo>,
}

/// Discovery record of one device index.
///
/// `subdevices` is `None` for a device that is currently unplugged; the
/// driver cannot enumerate the subdevices of an absent board.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub info: DeviceHardwareInfo,
    pub name: String,
    pub description: String,
    pub subdevices: Option<Vec<SubdeviceDescriptor>>,
}

enum Scope<'a> {
    Local,
    Remote(&'a str),
}

/// Queries the full local hardware inventory. Strict: any driver error
/// aborts the pass and no partial snapshot is returned.
pub fn snapshot(driver: &mut dyn Driver) -> DriverResult<Vec<DeviceDescriptor>> {
    driver.open()?;
    let result = snapshot_scope(driver, Scope::Local);
    let closed = driver.close();
    let devices = result?;
    closed?;
    Ok(devices)
}

/// Queries the inventory of a remote host via the driver's remote call
/// family. Strict, like [`snapshot`].
pub fn remote_snapshot(driver: &mut dyn Driver, host: &str) -> DriverResult<Vec<DeviceDescriptor>> {
    driver.open()?;
    let result = snapshot_scope(driver, Scope::Remote(host));
    let closed = driver.close();
    let devices = result?;
    closed?;
    Ok(devices)
}

/// Queries every local device index, mapping a per-device driver error to
/// `None` instead of aborting. Failing to open the driver system or to
/// count devices is still fatal.
pub fn probe_snapshot(driver: &mut dyn Driver) -> DriverResult<Vec<Option<DeviceDescriptor>>> {
    driver.open()?;
    let result = (|| -> DriverResult<Vec<Option<DeviceDescriptor>>> {
        let count = driver.number_devices()?;
        let mut devices = Vec::with_capacity(count as usize);
        for i in 0..count {
            match query_device(driver, &Scope::Local, i) {
                Ok(descriptor) => devices.push(Some(descriptor)),
                Err(err) => {
                    debug!("device {i} not reachable during probe: {err}");
                    devices.push(None);
                }
            }
        }
        Ok(devices)
    })();
    let closed = driver.close();
    let devices = result?;
    closed?;
    Ok(devices)
}

fn snapshot_scope(driver: &mut dyn Driver, scope: Scope) -> DriverResult<Vec<DeviceDescriptor>> {
    let count = match &scope {
        Scope::Local => driver.number_devices()?,
        Scope::Remote(host) => driver.remote_number_devices(host)?,
    };
    let mut devices = Vec::with_capacity(count as usize);
    for i in 0..count {
        devices.push(query_device(driver, &scope, i)?);
    }
    Ok(devices)
}

fn query_device(
    driver: &mut dyn Driver,
    scope: &Scope,
    device: u32,
) -> DriverResult<DeviceDescriptor> {
    let (info, name, description) = match scope {
        Scope::Local => (
            driver.device_info(device)?,
            driver.device_name(device)?,
            driver.device_description(device)?,
        ),
        Scope::Remote(host) => (
            driver.remote_device_info(host, device)?,
            driver.remote_device_name(host, device)?,
            driver.remote_device_description(host, device)?,
        ),
    };

    let subdevices = if info.plugged == Plugged::In {
        Some(query_subdevices(driver, scope, device)?)
    } else {
        None
    };

    Ok(DeviceDescriptor {
        info,
        name,
        description,
        subdevices,
    })
}

fn query_subdevices(
    driver: &mut dyn Driver,
    scope: &Scope,
    device: u32,
) -> DriverResult<Vec<SubdeviceDescriptor>> {
    let count = match scope {
        Scope::Local => driver.number_subdevices(device)?,
        Scope::Remote(host) => driver.remote_number_subdevices(host, device)?,
    };
    let mut subdevices = Vec::with_capacity(count as usize);
    for j in 0..count {
        let ((kind, subtype), channels) = match scope {
            Scope::Local => (
                driver.subdevice_type(device, j)?,
                driver.number_channels(device, j)?,
            ),
            Scope::Remote(host) => (
                driver.remote_subdevice_type(host, device, j)?,
                driver.remote_number_channels(host, device, j)?,
            ),
        };
        let ranges = if kind.is_analog() {
            query_ranges(driver, scope, device, j)?
        } else {
            Vec::new()
        };
        subdevices.push(SubdeviceDescriptor {
            kind,
            subtype,
            channels,
            ranges,
        });
    }
    Ok(subdevices)
}

fn query_ranges(
    driver: &mut dyn Driver,
    scope: &Scope,
    device: u32,
    subdevice: u32,
) -> DriverResult<Vec<RangeInfo>> {
    let count = match scope {
        Scope::Local => driver.number_ranges(device, subdevice, PhysicalUnit::Any)?,
        Scope::Remote(host) => {
            driver.remote_number_ranges(host, device, subdevice, PhysicalUnit::Any)?
        }
    };
    let mut ranges = Vec::with_capacity(count as usize);
    for k in 0..count {
        ranges.push(match scope {
            Scope::Local => driver.range_info(device, subdevice, k)?,
            Scope::Remote(host) => driver.remote_range_info(host, device, subdevice, k)?,
        });
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDevice, MockDriver};

    #[test]
    fn snapshot_covers_subdevices_and_ranges() {
        let mut drv = MockDriver::sample();
        let devices = snapshot(&mut drv).unwrap();
        assert_eq!(devices.len(), 3);
        let me4680 = &devices[0];
        let subs = me4680.subdevices.as_ref().unwrap();
        assert_eq!(subs.len(), 7);
        assert_eq!(subs[0].kind, SubdeviceType::Ai);
        assert_eq!(subs[0].ranges.len(), 2);
        assert!(subs[5].ranges.is_empty());
    }

    #[test]
    fn unplugged_device_has_no_subdevice_list() {
        let mut drv = MockDriver::new(vec![MockDevice::me4610(1).unplugged()]);
        let devices = snapshot(&mut drv).unwrap();
        assert!(devices[0].subdevices.is_none());
    }

    #[test]
    fn snapshot_fails_fast_when_driver_is_down() {
        let mut drv = MockDriver::sample();
        drv.fail_open = true;
        assert!(snapshot(&mut drv).is_err());
        assert!(probe_snapshot(&mut drv).is_err());
    }

    #[test]
    fn remote_snapshot_queries_the_host() {
        let mut drv = MockDriver::new(vec![])
            .with_remote_host("labpc", vec![MockDevice::me4610(42).usb(1)]);
        let devices = remote_snapshot(&mut drv, "labpc").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].info.serial_no, 42);
        assert!(remote_snapshot(&mut drv, "nowhere").is_err());
    }
}
