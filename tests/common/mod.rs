//! Shared fixtures: synthetic board topologies served by the mock driver.
#![allow(dead_code)]

use meidc::defines::{PhysicalUnit, SubdeviceSubtype, SubdeviceType};
use meidc::document::ConfigDocument;
use meidc::driver::{MockDevice, MockDriver, MockSubdevice};
use meidc::inventory::snapshot;
use meidc::reconcile::build_from_inventory;

pub const DATE: &str = "Mon, 06 Jul 2026 12:00:00 +0000";

pub fn doc_from(devices: Vec<MockDevice>) -> ConfigDocument {
    let mut drv = MockDriver::new(devices);
    let snap = snapshot(&mut drv).unwrap();
    let doc = build_from_inventory(&snap, DATE);
    doc.verify_consistency().unwrap();
    doc
}

pub fn ao(channels: u32) -> MockSubdevice {
    MockSubdevice::new(SubdeviceType::Ao, SubdeviceSubtype::Single, channels)
        .with_range(PhysicalUnit::Volt, -10.0, 10.0, 0xFFFF)
}

pub fn ai(channels: u32) -> MockSubdevice {
    MockSubdevice::new(SubdeviceType::Ai, SubdeviceSubtype::Streaming, channels)
        .with_range(PhysicalUnit::Volt, -10.0, 10.0, 0xFFFF)
}

pub fn dio(channels: u32) -> MockSubdevice {
    MockSubdevice::new(SubdeviceType::Dio, SubdeviceSubtype::Single, channels)
}

pub fn counter() -> MockSubdevice {
    MockSubdevice::new(SubdeviceType::Ctr, SubdeviceSubtype::Ctr8254, 3)
}

/// Board with its AI bank at subdevice 2 and no DIO of its own.
pub fn ai_at_two() -> MockDevice {
    MockDevice::new("ME-AI", 0x4610, 0x11)
        .subdevice(counter())
        .subdevice(MockSubdevice::new(
            SubdeviceType::Di,
            SubdeviceSubtype::Single,
            8,
        ))
        .subdevice(ai(4))
}

/// Board contributing one 8-channel DIO port at subdevice 0.
pub fn dio_only() -> MockDevice {
    MockDevice::new("ME-DIO", 0x4670, 0x22).subdevice(dio(8))
}

/// Timing-capable board: four AO subdevices at 0..3, DIO at 4.
pub fn me4680_ao_first(serial_no: u32) -> MockDevice {
    MockDevice::new("ME-4680", 0x4680, serial_no)
        .subdevice(ao(1))
        .subdevice(ao(1))
        .subdevice(ao(1))
        .subdevice(ao(1))
        .subdevice(dio(8))
}
