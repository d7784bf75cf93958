//! Device-entry operations: renumbering, reference rewriting, deletion
//! preconditions and the ME-1001 piggyback.

mod common;

use common::*;
use meidc::allocator::RegisterExtension;
use meidc::defines::{ExtensionKind, Plugged};
use meidc::driver::{MockDevice, MockDriver};
use meidc::error::ConfigError;
use meidc::inventory::probe_snapshot;
use meidc::reconcile::reconcile;
use meidc::topology::{AddMe1001, DeleteDevice, Direction, MoveDevice, RemoveMe1001};
use meidc::xml::{from_xml_str, to_xml_string};

#[test]
fn move_up_swaps_numbers_and_rewrites_references() {
    // Device 0 provides the DIO, device 1 hosts the multiplexer.
    let mut doc = doc_from(vec![
        dio_only(),
        MockDevice::new("ME-AI", 0x4610, 0x31).subdevice(ai(16)),
        me4680_ao_first(0x32),
    ]);
    RegisterExtension::validate(&doc, (1, 0), ExtensionKind::Mux32m, 0, (0, 0), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    MoveDevice::validate(&doc, 1, Direction::Up)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();

    // The host board is device 0 now; its borrowed DIO follows as 1.
    let host_entry = doc.device(0).unwrap();
    assert_eq!(host_entry.info.name, "ME-AI");
    let ext = host_entry.subdevice(0).unwrap().extension.clone().unwrap();
    assert_eq!(doc.number_of(ext.dio.device), Some(1));

    let xml = to_xml_string(&doc);
    assert!(xml.contains("<mux32m_dio_device description=\"Digital I/O device\">1<"));
    assert!(xml.contains("lock_device=\"0\""));

    // The file round-trips to the same renumbered document.
    assert_eq!(from_xml_str(&xml).unwrap(), doc);
}

#[test]
fn move_at_the_list_boundary_has_no_neighbor() {
    let doc = doc_from(vec![dio_only(), ai_at_two()]);
    assert!(matches!(
        MoveDevice::validate(&doc, 0, Direction::Up),
        Err(ConfigError::NoSuchNeighbor(0))
    ));
    assert!(matches!(
        MoveDevice::validate(&doc, 1, Direction::Down),
        Err(ConfigError::NoSuchNeighbor(1))
    ));
    assert!(matches!(
        MoveDevice::validate(&doc, 7, Direction::Up),
        Err(ConfigError::NoSuchDevice(7))
    ));
}

#[test]
fn delete_requires_the_device_to_be_gone() {
    let doc = doc_from(vec![dio_only(), ai_at_two()]);
    assert!(matches!(
        DeleteDevice::validate(&doc, 0),
        Err(ConfigError::DeviceStillPluggedIn(0))
    ));
}

#[test]
fn delete_rejects_a_device_entangled_in_locks() {
    let mut drv = MockDriver::new(vec![
        dio_only(),
        MockDevice::new("ME-AI", 0x4610, 0x41).subdevice(ai(16)),
        me4680_ao_first(0x42),
    ]);
    let snap = meidc::inventory::snapshot(&mut drv).unwrap();
    let mut doc = meidc::reconcile::build_from_inventory(&snap, DATE);

    // Device 1 hosts an extension borrowing a DIO on device 0, so a
    // subdevice on device 0 carries lock_device = 1.
    RegisterExtension::validate(&doc, (1, 0), ExtensionKind::Mux32m, 0, (0, 0), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    // Unplug both boards so only the lock precondition is in the way.
    drv.devices[0].info.plugged = Plugged::Out;
    drv.devices[1].info.plugged = Plugged::Out;
    let probes = probe_snapshot(&mut drv).unwrap();
    reconcile(&mut doc, &probes);

    let before = to_xml_string(&doc);
    assert!(matches!(
        DeleteDevice::validate(&doc, 1),
        Err(ConfigError::DeviceLocked(1))
    ));
    assert!(matches!(
        DeleteDevice::validate(&doc, 0),
        Err(ConfigError::DeviceLocked(0))
    ));
    assert_eq!(to_xml_string(&doc), before);
}

#[test]
fn delete_renumbers_and_keeps_references_resolving() {
    let mut drv = MockDriver::new(vec![
        MockDevice::new("ME-GONE", 0x4610, 0x51).subdevice(counter()),
        MockDevice::new("ME-DIO", 0x4670, 0x52).subdevice(dio(8)).subdevice(dio(8)),
        MockDevice::new("ME-AI", 0x4610, 0x53).subdevice(ai(16)),
    ]);
    let snap = meidc::inventory::snapshot(&mut drv).unwrap();
    let mut doc = meidc::reconcile::build_from_inventory(&snap, DATE);

    RegisterExtension::validate(&doc, (2, 0), ExtensionKind::Mux32m, 0, (1, 1), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    drv.devices[0].info.plugged = Plugged::Out;
    let probes = probe_snapshot(&mut drv).unwrap();
    reconcile(&mut doc, &probes);

    DeleteDevice::validate(&doc, 0)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();

    assert_eq!(doc.devices.len(), 2);
    assert_eq!(doc.device(0).unwrap().info.name, "ME-DIO");
    assert_eq!(doc.device(1).unwrap().info.name, "ME-AI");

    // The extension still resolves to the same logical DIO, now number 0.
    let ext = doc
        .device(1)
        .unwrap()
        .subdevice(0)
        .unwrap()
        .extension
        .clone()
        .unwrap();
    assert_eq!(doc.number_of(ext.dio.device), Some(0));
    let xml = to_xml_string(&doc);
    assert!(xml.contains("lock_device=\"1\""));
    assert!(xml.contains("<mux32m_dio_device description=\"Digital I/O device\">0<"));
}

#[test]
fn registered_remote_devices_are_deletable_while_plugged() {
    let mut drv = MockDriver::new(vec![dio_only()])
        .with_remote_host("labpc", vec![MockDevice::new("ME-R", 0x4610, 0x61).subdevice(ai(16))]);
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _) = meidc::Session::startup(&mut drv, dir.path().join("meconfig.xml")).unwrap();

    assert_eq!(
        session.add_remote_devices(&mut drv, "labpc", None).unwrap(),
        1
    );
    assert_eq!(session.document().devices.len(), 2);
    assert!(session.document().device(1).unwrap().is_remote());

    session.delete_device(1).unwrap();
    assert_eq!(session.document().devices.len(), 1);
    session.document().verify_consistency().unwrap();
}

#[test]
fn me1001_clones_and_removes_the_subdevice_pair() {
    let mut doc = doc_from(vec![MockDevice::me1000(0x71), me4680_ao_first(0x72)]);

    AddMe1001::validate(&doc, 0).unwrap().apply(&mut doc).unwrap();
    doc.verify_consistency().unwrap();
    let subs = doc.device(0).unwrap().subdevices.as_ref().unwrap();
    assert_eq!(subs.len(), 4);
    assert_eq!(subs[3].subdevice_number, 3);
    assert_eq!(subs[3].channels, subs[0].channels);

    // Already four entries: not eligible again.
    assert!(matches!(
        AddMe1001::validate(&doc, 0),
        Err(ConfigError::Me1001NotApplicable(0))
    ));
    // Not a ME-1000.
    assert!(matches!(
        AddMe1001::validate(&doc, 1),
        Err(ConfigError::Me1001NotApplicable(1))
    ));

    RemoveMe1001::validate(&doc, 0).unwrap().apply(&mut doc).unwrap();
    doc.verify_consistency().unwrap();
    assert_eq!(doc.device(0).unwrap().subdevices.as_ref().unwrap().len(), 2);
}

#[test]
fn me1001_entries_in_use_cannot_be_removed() {
    let mut doc = doc_from(vec![MockDevice::me1000(0x81), me4680_ao_first(0x82)]);
    AddMe1001::validate(&doc, 0).unwrap().apply(&mut doc).unwrap();

    // Borrow one of the cloned DIO ports.
    RegisterExtension::validate(&doc, (1, 0), ExtensionKind::Demux32, 0, (0, 2), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    assert!(matches!(
        RemoveMe1001::validate(&doc, 0),
        Err(ConfigError::DeviceLocked(0))
    ));
}
