//! Device-entry level operations: delete, reorder and the ME-1001
//! piggyback extension.
//!
//! Deleting or moving a device renumbers the remaining entries. Because
//! every cross-reference is stored by stable [`crate::document::DeviceId`],
//! renumbering cannot invalidate a lock or extension reference; the new
//! numbers are substituted into the file on the next save.

use log::info;

use crate::defines::ME1000_DEVICE_ID;
use crate::document::{ConfigDocument, DeviceId};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Command removing a device entry from the document.
///
/// Only an unplugged or remote entry may be deleted, and only while the
/// device takes part in no cross-device lock relationship: neither a
/// subdevice of it borrowed by another device's extension, nor one of its
/// own extensions borrowing a foreign subdevice. Locks confined to the
/// device vanish with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteDevice {
    id: DeviceId,
}

impl DeleteDevice {
    pub fn validate(doc: &ConfigDocument, device_number: u32) -> Result<Self> {
        let entry = doc
            .device(device_number)
            .ok_or(ConfigError::NoSuchDevice(device_number))?;
        if entry.is_plugged() && !entry.is_remote() {
            return Err(ConfigError::DeviceStillPluggedIn(device_number));
        }
        for sub in entry.subdevices.iter().flatten() {
            if let Some(holder) = sub.locked_by {
                if holder.device != entry.id {
                    return Err(ConfigError::DeviceLocked(device_number));
                }
            }
            if let Some(ext) = sub.extension.as_ref() {
                let foreign = ext.dio.device != entry.id
                    || ext.timer.is_some_and(|t| t.device != entry.id);
                if foreign {
                    return Err(ConfigError::DeviceLocked(device_number));
                }
            }
        }
        Ok(Self { id: entry.id })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let entry = doc
            .device_by_id(self.id)
            .ok_or(ConfigError::NoSuchDevice(u32::MAX))?;
        let number = entry.device_number;
        doc.devices.retain(|d| d.id != self.id);
        doc.renumber();
        info!("device entry {number} deleted");
        Ok(())
    }
}

/// Command swapping a device entry with its neighbor. The two entries
/// exchange device numbers and list positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveDevice {
    id: DeviceId,
    direction: Direction,
}

impl MoveDevice {
    pub fn validate(doc: &ConfigDocument, device_number: u32, direction: Direction) -> Result<Self> {
        let entry = doc
            .device(device_number)
            .ok_or(ConfigError::NoSuchDevice(device_number))?;
        let neighbor = match direction {
            Direction::Up => device_number.checked_sub(1),
            Direction::Down => Some(device_number + 1),
        };
        match neighbor {
            Some(n) if doc.device(n).is_some() => {}
            _ => return Err(ConfigError::NoSuchNeighbor(device_number)),
        }
        Ok(Self {
            id: entry.id,
            direction,
        })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let position = doc
            .devices
            .iter()
            .position(|d| d.id == self.id)
            .ok_or(ConfigError::NoSuchDevice(u32::MAX))?;
        let neighbor = match self.direction {
            Direction::Up => position.checked_sub(1),
            Direction::Down => {
                let next = position + 1;
                (next < doc.devices.len()).then_some(next)
            }
        };
        let Some(neighbor) = neighbor else {
            return Err(ConfigError::NoSuchNeighbor(position as u32));
        };
        doc.devices.swap(position, neighbor);
        doc.renumber();
        Ok(())
    }
}

/// Command cloning the subdevice pair of a ME-1000 into four entries,
/// modelling the ME-1001 piggyback module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddMe1001 {
    id: DeviceId,
}

impl AddMe1001 {
    pub fn validate(doc: &ConfigDocument, device_number: u32) -> Result<Self> {
        let entry = doc
            .device(device_number)
            .ok_or(ConfigError::NoSuchDevice(device_number))?;
        let eligible = entry.info.device_id == ME1000_DEVICE_ID
            && entry.subdevices.as_ref().is_some_and(|s| s.len() == 2);
        if !eligible {
            return Err(ConfigError::Me1001NotApplicable(device_number));
        }
        Ok(Self { id: entry.id })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let entry = doc
            .device_by_id_mut(self.id)
            .ok_or(ConfigError::NoSuchDevice(u32::MAX))?;
        let Some(subdevices) = entry.subdevices.as_mut() else {
            return Err(ConfigError::Me1001NotApplicable(entry.device_number));
        };
        if subdevices.len() != 2 {
            return Err(ConfigError::Me1001NotApplicable(entry.device_number));
        }
        for number in [2u32, 3u32] {
            let mut clone = subdevices[0].clone();
            clone.subdevice_number = number;
            clone.locked_by = None;
            clone.extension = None;
            subdevices.push(clone);
        }
        Ok(())
    }
}

/// Command removing the two ME-1001 subdevice entries again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveMe1001 {
    id: DeviceId,
}

impl RemoveMe1001 {
    pub fn validate(doc: &ConfigDocument, device_number: u32) -> Result<Self> {
        let entry = doc
            .device(device_number)
            .ok_or(ConfigError::NoSuchDevice(device_number))?;
        let eligible = entry.info.device_id == ME1000_DEVICE_ID
            && entry.subdevices.as_ref().is_some_and(|s| s.len() == 4);
        if !eligible {
            return Err(ConfigError::Me1001NotApplicable(device_number));
        }
        let piggyback = &entry.subdevices.as_ref().expect("checked")[2..];
        if piggyback.iter().any(|s| s.is_locked() || s.extension.is_some()) {
            return Err(ConfigError::DeviceLocked(device_number));
        }
        Ok(Self { id: entry.id })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let entry = doc
            .device_by_id_mut(self.id)
            .ok_or(ConfigError::NoSuchDevice(u32::MAX))?;
        let Some(subdevices) = entry.subdevices.as_mut() else {
            return Err(ConfigError::Me1001NotApplicable(entry.device_number));
        };
        if subdevices.len() != 4 {
            return Err(ConfigError::Me1001NotApplicable(entry.device_number));
        }
        subdevices.truncate(2);
        Ok(())
    }
}
