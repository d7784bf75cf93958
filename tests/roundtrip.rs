//! Persistence round-trips, reconciliation idempotence and failure modes.

mod common;

use common::*;
use meidc::allocator::{AddMuxSlave, RegisterExtension};
use meidc::defines::{ExtensionKind, Plugged};
use meidc::driver::{MockDevice, MockDriver};
use meidc::error::ConfigError;
use meidc::inventory::probe_snapshot;
use meidc::reconcile::{append_remote_device, reconcile};
use meidc::topology::AddMe1001;
use meidc::xml::{from_xml_str, load_document, save_document, to_xml_string};
use meidc::Session;

/// A document exercising every node kind the file format knows.
fn rich_document() -> meidc::ConfigDocument {
    let mut drv = MockDriver::new(vec![
        me4680_ao_first(0x1001),
        MockDevice::new("ME-AI", 0x4610, 0x1002)
            .subdevice(ai(16))
            .subdevice(dio(8))
            .usb(2),
        MockDevice::me1000(0x1003),
    ])
    .with_remote_host(
        "labpc",
        vec![MockDevice::new("ME-R", 0x4680, 0x1004).subdevice(ai(32))],
    );

    let snap = meidc::inventory::snapshot(&mut drv).unwrap();
    let mut doc = meidc::reconcile::build_from_inventory(&snap, DATE);

    RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 1, (0, 4), true)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    RegisterExtension::validate(&doc, (1, 0), ExtensionKind::Mux32m, 5, (1, 1), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    for _ in 0..2 {
        AddMuxSlave::validate(&doc, (1, 0))
            .unwrap()
            .apply(&mut doc)
            .unwrap();
    }
    AddMe1001::validate(&doc, 2).unwrap().apply(&mut doc).unwrap();

    let remote_snap = meidc::inventory::remote_snapshot(&mut drv, "labpc").unwrap();
    append_remote_device(&mut doc, &remote_snap[0], "labpc", 0);

    doc.verify_consistency().unwrap();
    doc
}

#[test]
fn save_load_save_is_stable() {
    let doc = rich_document();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("medriver").join("meconfig.xml");

    save_document(&doc, &path).unwrap();
    let loaded = load_document(&path).unwrap();
    assert_eq!(loaded, doc);

    let second = dir.path().join("meconfig2.xml");
    save_document(&loaded, &second).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        std::fs::read_to_string(&second).unwrap()
    );
}

#[test]
fn the_remote_entry_round_trips_with_its_network_block() {
    let doc = rich_document();
    let xml = to_xml_string(&doc);
    assert!(xml.contains("<tcpip description=\"Network information\">"));
    assert!(xml.contains("<remote_host description=\"Hostname\">labpc<"));

    let reloaded = from_xml_str(&xml).unwrap();
    let remote = reloaded.device(3).unwrap();
    assert!(remote.is_remote());
    assert_eq!(remote.bus, meidc::defines::BusKind::Invalid);
    assert_eq!(remote.info.device_id, 0x4680);
}

#[test]
fn reconciling_twice_with_the_same_hardware_is_a_no_op() {
    let mut drv = MockDriver::new(vec![me4680_ao_first(1), MockDevice::me1000(2)]);
    let snap = meidc::inventory::snapshot(&mut drv).unwrap();
    let mut doc = meidc::reconcile::build_from_inventory(&snap, DATE);

    drv.devices[1].info.plugged = Plugged::Out;
    drv.devices.push(MockDevice::me1000(3));
    let probes = probe_snapshot(&mut drv).unwrap();

    assert!(reconcile(&mut doc, &probes));
    let settled = doc.clone();
    assert!(!reconcile(&mut doc, &probes));
    assert_eq!(doc, settled);
}

#[test]
fn locks_survive_an_unplug_replug_cycle() {
    let mut drv = MockDriver::new(vec![
        MockDevice::new("ME-AI", 0x4610, 0x91).subdevice(ai(16)),
        dio_only(),
    ]);
    let snap = meidc::inventory::snapshot(&mut drv).unwrap();
    let mut doc = meidc::reconcile::build_from_inventory(&snap, DATE);
    RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Mux32m, 0, (1, 0), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    drv.devices[1].info.plugged = Plugged::Out;
    let probes = probe_snapshot(&mut drv).unwrap();
    assert!(reconcile(&mut doc, &probes));
    assert_eq!(doc.device(1).unwrap().plugged, Plugged::Out);
    doc.verify_consistency().unwrap();

    drv.devices[1].info.plugged = Plugged::In;
    drv.devices[1].info.serial_no = 0x23;
    let probes = probe_snapshot(&mut drv).unwrap();
    assert!(reconcile(&mut doc, &probes));
    let replugged = doc.device(1).unwrap();
    assert_eq!(replugged.plugged, Plugged::In);
    assert_eq!(replugged.info.serial_no, 0x23);
    // The subdevice list was never dropped, so the lock is still there.
    assert!(replugged.subdevice(0).unwrap().is_locked());
    doc.verify_consistency().unwrap();
}

#[test]
fn a_malformed_file_aborts_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meconfig.xml");
    std::fs::write(&path, "<medrvconfig><device_list></medrvconfig>").unwrap();

    let mut drv = MockDriver::sample();
    assert!(matches!(
        Session::startup(&mut drv, path),
        Err(ConfigError::MalformedDocument(_))
    ));
}

#[test]
fn a_failed_save_keeps_the_document_dirty() {
    let dir = tempfile::tempdir().unwrap();
    // The parent "directory" is a plain file, so the write must fail.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let path = blocker.join("meconfig.xml");

    let mut drv = MockDriver::sample();
    let (mut session, _) = Session::startup(&mut drv, path).unwrap();
    assert!(matches!(
        session.save(),
        Err(ConfigError::PersistenceWriteFailed { .. })
    ));
    assert!(session.is_dirty());
}

#[test]
fn startup_round_trip_preserves_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meconfig.xml");
    let mut drv = MockDriver::new(vec![me4680_ao_first(0xA1), MockDevice::me1000(0xA2)]);

    let (mut session, _) = Session::startup(&mut drv, path.clone()).unwrap();
    session
        .register_extension((0, 0), ExtensionKind::Demux32, 0, (0, 4), true)
        .unwrap();
    session.save().unwrap();

    let (session, changed) = Session::startup(&mut drv, path).unwrap();
    assert!(!changed);
    let ext = session
        .document()
        .device(0)
        .unwrap()
        .subdevice(0)
        .unwrap()
        .extension
        .clone()
        .unwrap();
    assert!(ext.timed());
    session.document().verify_consistency().unwrap();
}
