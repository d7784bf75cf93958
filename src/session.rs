//! The session owns the configuration document and its dirty state.
//!
//! Every user-facing operation goes through a session method: validate the
//! command against the document, apply it, mark the document dirty. The
//! dirty flag is only cleared by a confirmed successful save.

use std::path::{Path, PathBuf};

use log::info;

use crate::allocator::{
    AddMuxSlave, EditExtension, RegisterExtension, RemoveExtension, RemoveMuxSlave,
};
use crate::defines::ExtensionKind;
use crate::document::ConfigDocument;
use crate::driver::Driver;
use crate::error::{ConfigError, Result};
use crate::reconcile;
use crate::topology::{AddMe1001, DeleteDevice, Direction, MoveDevice, RemoveMe1001};
use crate::{inventory, xml};

/// Timestamp for the document's `date` node.
fn timestamp() -> String {
    let now = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

pub struct Session {
    doc: ConfigDocument,
    config_path: PathBuf,
    dirty: bool,
}

impl Session {
    /// Loads the persisted document and reconciles it against the current
    /// hardware, or builds a fresh document on first run. The returned
    /// flag reports whether the hardware setup changed since the last
    /// save; callers surface it as an advisory.
    pub fn startup(driver: &mut dyn Driver, config_path: PathBuf) -> Result<(Self, bool)> {
        if config_path.exists() {
            info!("loading configuration from {}", config_path.display());
            let mut doc = xml::load_document(&config_path)?;
            let probes = inventory::probe_snapshot(driver)?;
            let changed = reconcile::reconcile(&mut doc, &probes);
            Ok((
                Self {
                    doc,
                    config_path,
                    dirty: changed,
                },
                changed,
            ))
        } else {
            info!(
                "no configuration at {}; building one from the driver",
                config_path.display()
            );
            let snap = inventory::snapshot(driver)?;
            let doc = reconcile::build_from_inventory(&snap, &timestamp());
            Ok((
                Self {
                    doc,
                    config_path,
                    dirty: true,
                },
                false,
            ))
        }
    }

    /// Wraps an already-built document; used by tests and one-shot
    /// commands operating on a loaded file.
    pub fn from_document(doc: ConfigDocument, config_path: PathBuf) -> Self {
        Self {
            doc,
            config_path,
            dirty: false,
        }
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.doc
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the document, refreshing its date stamp. The dirty flag is
    /// cleared only after the write succeeded.
    pub fn save(&mut self) -> Result<()> {
        self.doc.date = timestamp();
        self.dirty = true;
        xml::save_document(&self.doc, &self.config_path)?;
        self.dirty = false;
        info!("configuration saved to {}", self.config_path.display());
        Ok(())
    }

    pub fn register_extension(
        &mut self,
        host: (u32, u32),
        kind: ExtensionKind,
        channel: u32,
        dio: (u32, u32),
        timed: bool,
    ) -> Result<()> {
        let cmd = RegisterExtension::validate(&self.doc, host, kind, channel, dio, timed)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn edit_extension(
        &mut self,
        host: (u32, u32),
        channel: u32,
        dio: (u32, u32),
        timed: bool,
    ) -> Result<()> {
        let cmd = EditExtension::validate(&self.doc, host, channel, dio, timed)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_extension(&mut self, host: (u32, u32)) -> Result<()> {
        let cmd = RemoveExtension::validate(&self.doc, host)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn add_mux_slave(&mut self, host: (u32, u32)) -> Result<()> {
        let cmd = AddMuxSlave::validate(&self.doc, host)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_mux_slave(&mut self, host: (u32, u32), index: u32) -> Result<()> {
        let cmd = RemoveMuxSlave::validate(&self.doc, host, index)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn delete_device(&mut self, device_number: u32) -> Result<()> {
        let cmd = DeleteDevice::validate(&self.doc, device_number)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn move_device(&mut self, device_number: u32, direction: Direction) -> Result<()> {
        let cmd = MoveDevice::validate(&self.doc, device_number, direction)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn add_me1001(&mut self, device_number: u32) -> Result<()> {
        let cmd = AddMe1001::validate(&self.doc, device_number)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_me1001(&mut self, device_number: u32) -> Result<()> {
        let cmd = RemoveMe1001::validate(&self.doc, device_number)?;
        cmd.apply(&mut self.doc)?;
        self.dirty = true;
        Ok(())
    }

    /// Registers devices of a remote host. With `device` set only that
    /// remote index is registered, otherwise every device the host
    /// reports. Returns the number of appended entries.
    pub fn add_remote_devices(
        &mut self,
        driver: &mut dyn Driver,
        host: &str,
        device: Option<u32>,
    ) -> Result<usize> {
        let snap = inventory::remote_snapshot(driver, host)?;
        let appended = match device {
            Some(i) => {
                let descriptor = snap
                    .get(i as usize)
                    .ok_or(ConfigError::NoSuchDevice(i))?;
                reconcile::append_remote_device(&mut self.doc, descriptor, host, i);
                1
            }
            None => reconcile::append_remote_devices(&mut self.doc, &snap, host),
        };
        if appended > 0 {
            self.dirty = true;
        }
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;

    #[test]
    fn startup_builds_and_saves_a_fresh_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medriver").join("meconfig.xml");
        let mut drv = MockDriver::sample();

        let (mut session, changed) = Session::startup(&mut drv, path.clone()).unwrap();
        assert!(!changed);
        assert!(session.is_dirty());
        session.save().unwrap();
        assert!(!session.is_dirty());
        assert!(path.exists());

        // Second run: load + reconcile with unchanged hardware.
        let (session, changed) = Session::startup(&mut drv, path).unwrap();
        assert!(!changed);
        assert!(!session.is_dirty());
        assert_eq!(session.document().devices.len(), 3);
    }

    #[test]
    fn startup_fails_without_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meconfig.xml");
        let mut drv = MockDriver::sample();
        drv.fail_open = true;
        assert!(matches!(
            Session::startup(&mut drv, path),
            Err(ConfigError::DriverUnavailable(_))
        ));
    }

    #[test]
    fn mutating_operations_set_the_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meconfig.xml");
        let mut drv = MockDriver::sample();
        let (mut session, _) = Session::startup(&mut drv, path).unwrap();
        session.save().unwrap();
        assert!(!session.is_dirty());

        session
            .register_extension((0, 0), ExtensionKind::Mux32m, 0, (1, 1), false)
            .unwrap();
        assert!(session.is_dirty());
    }

    #[test]
    fn failed_operations_leave_the_document_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meconfig.xml");
        let mut drv = MockDriver::sample();
        let (mut session, _) = Session::startup(&mut drv, path).unwrap();
        session.save().unwrap();

        let before = crate::xml::to_xml_string(session.document());
        assert!(session.delete_device(0).is_err());
        assert_eq!(crate::xml::to_xml_string(session.document()), before);
        assert!(!session.is_dirty());
    }
}
