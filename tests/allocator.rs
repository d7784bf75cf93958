//! Extension registration, editing and removal against the locking model.

mod common;

use common::*;
use meidc::allocator::{
    eligible_dio_targets, AddMuxSlave, EditExtension, RegisterExtension, RemoveExtension,
    RemoveMuxSlave,
};
use meidc::defines::ExtensionKind;
use meidc::driver::{MockDevice, MockDriver};
use meidc::error::ConfigError;
use meidc::xml::to_xml_string;
use meidc::Session;

#[test]
fn register_mux_then_second_registration_conflicts() {
    let mut doc = doc_from(vec![ai_at_two(), dio_only()]);

    let cmd =
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 1, (1, 0), false).unwrap();
    cmd.apply(&mut doc).unwrap();
    doc.verify_consistency().unwrap();

    let host = doc.resolve(0, 2).unwrap();
    let borrowed = doc.device(1).unwrap().subdevice(0).unwrap();
    assert_eq!(borrowed.locked_by, Some(host));
    let ext = doc
        .device(0)
        .unwrap()
        .subdevice(2)
        .unwrap()
        .extension
        .clone()
        .unwrap();
    assert_eq!(ext.kind, ExtensionKind::Mux32m);
    assert_eq!(ext.channel, 1);
    assert!(!ext.timed());

    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (1, 0), false),
        Err(ConfigError::AlreadyRegistered {
            device: 0,
            subdevice: 2
        })
    ));
}

#[test]
fn timed_demux_locks_the_fourth_ao() {
    let mut doc = doc_from(vec![me4680_ao_first(7)]);

    let cmd =
        RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 0, (0, 4), true).unwrap();
    cmd.apply(&mut doc).unwrap();
    doc.verify_consistency().unwrap();

    let host = doc.resolve(0, 0).unwrap();
    let timer = doc.device(0).unwrap().subdevice(3).unwrap();
    assert_eq!(timer.locked_by, Some(host));
    let dio = doc.device(0).unwrap().subdevice(4).unwrap();
    assert_eq!(dio.locked_by, Some(host));

    let xml = to_xml_string(&doc);
    assert!(xml.contains("timed=\"1\""));
    assert!(xml.contains("lock_device=\"0\""));
    assert!(xml.contains("<demux32_timer_subdevice"));
}

#[test]
fn cross_device_timing_is_rejected() {
    let doc = doc_from(vec![me4680_ao_first(7), dio_only()]);
    let before = to_xml_string(&doc);

    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 0, (1, 0), true),
        Err(ConfigError::CrossDeviceTimingNotSupported)
    ));
    assert_eq!(to_xml_string(&doc), before);
}

#[test]
fn timed_request_downgrades_without_timing_support() {
    // 0x4610 is not in the ME-4680 family, so the option is unavailable
    // rather than an error.
    let mut doc = doc_from(vec![MockDevice::new("ME-4610", 0x4610, 3)
        .subdevice(ai(16))
        .subdevice(dio(8))]);

    let cmd =
        RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Mux32m, 0, (0, 1), true).unwrap();
    cmd.apply(&mut doc).unwrap();

    let ext = doc
        .device(0)
        .unwrap()
        .subdevice(0)
        .unwrap()
        .extension
        .clone()
        .unwrap();
    assert!(!ext.timed());
    assert!(to_xml_string(&doc).contains("timed=\"0\""));
}

#[test]
fn dio_selection_is_validated_not_substituted() {
    let mut doc = doc_from(vec![ai_at_two(), dio_only()]);

    // Wrong node kind for the host.
    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Mux32m, 0, (1, 0), false),
        Err(ConfigError::UnsupportedForNodeType)
    ));
    // Channel beyond the host's channel count.
    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 4, (1, 0), false),
        Err(ConfigError::ChannelOutOfRange {
            channel: 4,
            channels: 4
        })
    ));
    // A subdevice that is not a DIO resource.
    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (0, 0), false),
        Err(ConfigError::DioTargetUnavailable {
            device: 0,
            subdevice: 0
        })
    ));
    // Unknown references.
    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (9, 0), false),
        Err(ConfigError::NoSuchDevice(9))
    ));

    // A locked resource is no longer offered.
    RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (1, 0), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    assert!(eligible_dio_targets(&doc, None).is_empty());
}

#[test]
fn no_dio_available_without_any_candidate() {
    let doc = doc_from(vec![ai_at_two()]);
    assert!(matches!(
        RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (0, 0), false),
        Err(ConfigError::NoDioAvailable)
    ));
}

#[test]
fn edit_walks_every_timed_transition() {
    let mut doc = doc_from(vec![me4680_ao_first(9).subdevice(dio(16))]);
    RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 0, (0, 4), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    let host = doc.resolve(0, 0).unwrap();
    let timer_number = 3;

    // untimed -> timed: the timer subdevice gets locked.
    EditExtension::validate(&doc, (0, 0), 0, (0, 4), true)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    assert_eq!(
        doc.device(0).unwrap().subdevice(timer_number).unwrap().locked_by,
        Some(host)
    );

    // timed -> timed with a new DIO: old resource freed, timer kept.
    EditExtension::validate(&doc, (0, 0), 1, (0, 5), true)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    assert!(!doc.device(0).unwrap().subdevice(4).unwrap().is_locked());
    assert_eq!(doc.device(0).unwrap().subdevice(5).unwrap().locked_by, Some(host));
    assert!(doc.device(0).unwrap().subdevice(timer_number).unwrap().is_locked());

    // timed -> untimed: the timer lock is released.
    EditExtension::validate(&doc, (0, 0), 1, (0, 5), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    assert!(!doc.device(0).unwrap().subdevice(timer_number).unwrap().is_locked());

    // untimed -> untimed, keeping the current resource (edit-in-place).
    EditExtension::validate(&doc, (0, 0), 2, (0, 5), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    assert_eq!(
        doc.device(0)
            .unwrap()
            .subdevice(0)
            .unwrap()
            .extension
            .as_ref()
            .unwrap()
            .channel,
        2
    );
}

#[test]
fn edit_requires_an_existing_extension() {
    let doc = doc_from(vec![ai_at_two(), dio_only()]);
    assert!(matches!(
        EditExtension::validate(&doc, (0, 2), 0, (1, 0), false),
        Err(ConfigError::NotRegistered {
            device: 0,
            subdevice: 2
        })
    ));
    assert!(matches!(
        RemoveExtension::validate(&doc, (0, 2)),
        Err(ConfigError::NotRegistered { .. })
    ));
}

#[test]
fn remove_releases_every_lock() {
    let mut doc = doc_from(vec![me4680_ao_first(5)]);
    RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 0, (0, 4), true)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    RemoveExtension::validate(&doc, (0, 0))
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    assert!(doc
        .device(0)
        .unwrap()
        .subdevices
        .as_ref()
        .unwrap()
        .iter()
        .all(|s| !s.is_locked() && s.extension.is_none()));
}

#[test]
fn slave_stages_are_bounded_and_dense() {
    let mut doc = doc_from(vec![ai_at_two(), dio_only()]);
    RegisterExtension::validate(&doc, (0, 2), ExtensionKind::Mux32m, 0, (1, 0), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();

    for _ in 0..7 {
        AddMuxSlave::validate(&doc, (0, 2))
            .unwrap()
            .apply(&mut doc)
            .unwrap();
    }
    assert!(matches!(
        AddMuxSlave::validate(&doc, (0, 2)),
        Err(ConfigError::SlaveLimitReached)
    ));

    RemoveMuxSlave::validate(&doc, (0, 2), 3)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    doc.verify_consistency().unwrap();
    let slaves = &doc
        .device(0)
        .unwrap()
        .subdevice(2)
        .unwrap()
        .extension
        .as_ref()
        .unwrap()
        .slaves;
    assert_eq!(slaves.len(), 6);
    assert_eq!(
        slaves.iter().map(|s| s.number).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5]
    );

    assert!(matches!(
        RemoveMuxSlave::validate(&doc, (0, 2), 9),
        Err(ConfigError::NoSuchSlave(9))
    ));
}

#[test]
fn slave_operations_need_a_mux_master() {
    let mut doc = doc_from(vec![me4680_ao_first(5)]);
    RegisterExtension::validate(&doc, (0, 0), ExtensionKind::Demux32, 0, (0, 4), false)
        .unwrap()
        .apply(&mut doc)
        .unwrap();
    assert!(matches!(
        AddMuxSlave::validate(&doc, (0, 0)),
        Err(ConfigError::NotRegistered { .. })
    ));
}

#[test]
fn rejected_operations_leave_the_session_document_untouched() {
    let mut drv = MockDriver::new(vec![ai_at_two(), dio_only()]);
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _) =
        Session::startup(&mut drv, dir.path().join("meconfig.xml")).unwrap();
    session.save().unwrap();
    let before = to_xml_string(session.document());

    assert!(session
        .register_extension((0, 0), ExtensionKind::Mux32m, 0, (1, 0), false)
        .is_err());
    assert!(session
        .register_extension((0, 2), ExtensionKind::Mux32m, 9, (1, 0), false)
        .is_err());
    assert!(session.remove_extension((0, 2)).is_err());
    assert!(session.remove_mux_slave((0, 2), 0).is_err());

    assert_eq!(to_xml_string(session.document()), before);
    assert!(!session.is_dirty());
}
