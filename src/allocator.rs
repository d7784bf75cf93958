//! Registration, editing and removal of extension modules.
//!
//! Every operation is split into a pure validation step that produces a
//! command value and an apply step that commits it. Validation checks all
//! preconditions against the current document and never mutates; apply
//! re-resolves its references before the first write, so a rejected call
//! leaves the document byte-for-byte unchanged.
//!
//! The allocator never picks a DIO resource on its own. The caller (dialog
//! or command line) chooses from [`eligible_dio_targets`]; the allocator
//! only validates the choice.

use log::warn;

use crate::defines::ExtensionKind;
use crate::document::{ConfigDocument, DeviceEntry, Extension, Mux32sEntry, SubdeviceRef};
use crate::error::{ConfigError, Result};

/// An unlocked DIO/DO subdevice an extension could borrow, described the
/// way the selection dialogs present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DioTarget {
    pub device_number: u32,
    pub subdevice_number: u32,
    pub channels: u32,
    pub addr: SubdeviceRef,
}

/// All DIO/DO subdevices currently available for borrowing. `keep` names a
/// resource that counts as available even though it is locked — the one
/// the edited extension already holds.
pub fn eligible_dio_targets(doc: &ConfigDocument, keep: Option<SubdeviceRef>) -> Vec<DioTarget> {
    let mut targets = Vec::new();
    for device in &doc.devices {
        let Some(subdevices) = device.subdevices.as_ref() else {
            continue;
        };
        for sub in subdevices {
            if !sub.kind.is_dio_resource() {
                continue;
            }
            let addr = SubdeviceRef {
                device: device.id,
                subdevice: sub.subdevice_number,
            };
            if sub.is_locked() && keep != Some(addr) {
                continue;
            }
            targets.push(DioTarget {
                device_number: device.device_number,
                subdevice_number: sub.subdevice_number,
                channels: sub.channels,
                addr,
            });
        }
    }
    targets
}

/// The timer resource an extension hosted at `host` could lock: the fourth
/// AO subdevice of the host device, provided the board family supports
/// timed mode and the subdevice is unlocked or already held by this host.
pub fn timer_target(
    doc: &ConfigDocument,
    device: &DeviceEntry,
    host: SubdeviceRef,
) -> Option<SubdeviceRef> {
    if !device.is_timing_capable() {
        return None;
    }
    let timer = device.fourth_ao_subdevice()?;
    if timer.is_locked() && timer.locked_by != Some(host) {
        return None;
    }
    Some(SubdeviceRef {
        device: device.id,
        subdevice: timer.subdevice_number,
    })
}

/// Command registering a new extension on an analog subdevice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterExtension {
    host: SubdeviceRef,
    kind: ExtensionKind,
    channel: u32,
    dio: SubdeviceRef,
    timer: Option<SubdeviceRef>,
}

impl RegisterExtension {
    pub fn validate(
        doc: &ConfigDocument,
        host: (u32, u32),
        kind: ExtensionKind,
        channel: u32,
        dio: (u32, u32),
        timed: bool,
    ) -> Result<Self> {
        let host_ref = doc.resolve(host.0, host.1)?;
        let host_sub = doc.subdevice(host_ref).expect("resolved host");
        if host_sub.kind != kind.host_type() {
            return Err(ConfigError::UnsupportedForNodeType);
        }
        if host_sub.extension.is_some() {
            return Err(ConfigError::AlreadyRegistered {
                device: host.0,
                subdevice: host.1,
            });
        }
        if channel >= host_sub.channels {
            return Err(ConfigError::ChannelOutOfRange {
                channel,
                channels: host_sub.channels,
            });
        }

        let dio_ref = check_dio_choice(doc, dio, None)?;
        let timer = grant_timer(doc, host_ref, host.0, dio.0, timed)?;

        Ok(Self {
            host: host_ref,
            kind,
            channel,
            dio: dio_ref,
            timer,
        })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        check_refs(doc, [Some(self.host), Some(self.dio), self.timer])?;
        let host_sub = doc.subdevice_mut(self.host).expect("checked host");
        host_sub.extension = Some(Extension {
            kind: self.kind,
            channel: self.channel,
            dio: self.dio,
            timer: self.timer,
            slaves: Vec::new(),
        });
        lock(doc, self.dio, self.host);
        if let Some(timer) = self.timer {
            lock(doc, timer, self.host);
        }
        Ok(())
    }
}

/// Command changing the channel, DIO resource or timed mode of an existing
/// extension. Handles all four timed transitions, creating or releasing
/// the timer lock as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditExtension {
    host: SubdeviceRef,
    channel: u32,
    dio: SubdeviceRef,
    timer: Option<SubdeviceRef>,
}

impl EditExtension {
    pub fn validate(
        doc: &ConfigDocument,
        host: (u32, u32),
        channel: u32,
        dio: (u32, u32),
        timed: bool,
    ) -> Result<Self> {
        let host_ref = doc.resolve(host.0, host.1)?;
        let host_sub = doc.subdevice(host_ref).expect("resolved host");
        let ext = host_sub
            .extension
            .as_ref()
            .ok_or(ConfigError::NotRegistered {
                device: host.0,
                subdevice: host.1,
            })?;
        if channel >= host_sub.channels {
            return Err(ConfigError::ChannelOutOfRange {
                channel,
                channels: host_sub.channels,
            });
        }

        let dio_ref = check_dio_choice(doc, dio, Some(ext.dio))?;
        let timer = grant_timer(doc, host_ref, host.0, dio.0, timed)?;

        Ok(Self {
            host: host_ref,
            channel,
            dio: dio_ref,
            timer,
        })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        check_refs(doc, [Some(self.host), Some(self.dio), self.timer])?;
        let device_number = doc.number_of(self.host.device).unwrap_or(u32::MAX);
        let host_sub = doc.subdevice_mut(self.host).expect("checked host");
        let Some(ext) = host_sub.extension.as_mut() else {
            return Err(ConfigError::NotRegistered {
                device: device_number,
                subdevice: self.host.subdevice,
            });
        };
        let old_dio = ext.dio;
        let old_timer = ext.timer;
        ext.channel = self.channel;
        ext.dio = self.dio;
        ext.timer = self.timer;

        unlock(doc, old_dio);
        if let Some(timer) = old_timer {
            unlock(doc, timer);
        }
        lock(doc, self.dio, self.host);
        if let Some(timer) = self.timer {
            lock(doc, timer, self.host);
        }
        Ok(())
    }
}

/// Command removing an extension, releasing every lock it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveExtension {
    host: SubdeviceRef,
}

impl RemoveExtension {
    pub fn validate(doc: &ConfigDocument, host: (u32, u32)) -> Result<Self> {
        let host_ref = doc.resolve(host.0, host.1)?;
        let host_sub = doc.subdevice(host_ref).expect("resolved host");
        if host_sub.extension.is_none() {
            return Err(ConfigError::NotRegistered {
                device: host.0,
                subdevice: host.1,
            });
        }
        Ok(Self { host: host_ref })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        check_refs(doc, [Some(self.host), None, None])?;
        let device_number = doc.number_of(self.host.device).unwrap_or(u32::MAX);
        let host_sub = doc.subdevice_mut(self.host).expect("checked host");
        let Some(ext) = host_sub.extension.take() else {
            return Err(ConfigError::NotRegistered {
                device: device_number,
                subdevice: self.host.subdevice,
            });
        };
        unlock(doc, ext.dio);
        if let Some(timer) = ext.timer {
            unlock(doc, timer);
        }
        Ok(())
    }
}

/// Command appending a slave multiplexer stage behind a ME-MUX32-M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddMuxSlave {
    host: SubdeviceRef,
}

impl AddMuxSlave {
    pub fn validate(doc: &ConfigDocument, host: (u32, u32)) -> Result<Self> {
        let (host_ref, ext) = require_mux32m(doc, host)?;
        if ext.slaves.len() >= crate::defines::MAX_MUX32S_ENTRIES {
            return Err(ConfigError::SlaveLimitReached);
        }
        Ok(Self { host: host_ref })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let ext = require_mux32m_mut(doc, self.host)?;
        let number = ext.slaves.len() as u32;
        ext.slaves.push(Mux32sEntry { number });
        Ok(())
    }
}

/// Command removing one slave stage; the remaining stages are renumbered
/// to stay dense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveMuxSlave {
    host: SubdeviceRef,
    index: u32,
}

impl RemoveMuxSlave {
    pub fn validate(doc: &ConfigDocument, host: (u32, u32), index: u32) -> Result<Self> {
        let (host_ref, ext) = require_mux32m(doc, host)?;
        if index as usize >= ext.slaves.len() {
            return Err(ConfigError::NoSuchSlave(index));
        }
        Ok(Self {
            host: host_ref,
            index,
        })
    }

    pub fn apply(&self, doc: &mut ConfigDocument) -> Result<()> {
        let ext = require_mux32m_mut(doc, self.host)?;
        if self.index as usize >= ext.slaves.len() {
            return Err(ConfigError::NoSuchSlave(self.index));
        }
        ext.slaves.remove(self.index as usize);
        for (k, slave) in ext.slaves.iter_mut().enumerate() {
            slave.number = k as u32;
        }
        Ok(())
    }
}

/// Validates a DIO selection: it must exist, be a DIO/DO subdevice and be
/// unlocked (or the resource named by `keep`). `NoDioAvailable` is only
/// reported when nothing could have been chosen at all.
fn check_dio_choice(
    doc: &ConfigDocument,
    dio: (u32, u32),
    keep: Option<SubdeviceRef>,
) -> Result<SubdeviceRef> {
    let eligible = eligible_dio_targets(doc, keep);
    if eligible.is_empty() {
        return Err(ConfigError::NoDioAvailable);
    }
    let dio_ref = doc.resolve(dio.0, dio.1)?;
    if !eligible.iter().any(|t| t.addr == dio_ref) {
        return Err(ConfigError::DioTargetUnavailable {
            device: dio.0,
            subdevice: dio.1,
        });
    }
    Ok(dio_ref)
}

/// Resolves a timed-mode request. When the host device cannot provide the
/// timer (wrong board family, or fourth AO held elsewhere) the request is
/// quietly downgraded to untimed — the selection dialogs gray the option
/// out rather than fail. A granted timer additionally requires the DIO
/// resource to live on the host device.
fn grant_timer(
    doc: &ConfigDocument,
    host: SubdeviceRef,
    host_device_number: u32,
    dio_device_number: u32,
    timed: bool,
) -> Result<Option<SubdeviceRef>> {
    if !timed {
        return Ok(None);
    }
    let device = doc.device_by_id(host.device).expect("resolved host device");
    match timer_target(doc, device, host) {
        Some(timer) => {
            if dio_device_number != host_device_number {
                return Err(ConfigError::CrossDeviceTimingNotSupported);
            }
            Ok(Some(timer))
        }
        None => {
            warn!(
                "device {host_device_number} cannot drive a timed extension; registering untimed"
            );
            Ok(None)
        }
    }
}

fn require_mux32m<'a>(
    doc: &'a ConfigDocument,
    host: (u32, u32),
) -> Result<(SubdeviceRef, &'a Extension)> {
    let host_ref = doc.resolve(host.0, host.1)?;
    let host_sub = doc.subdevice(host_ref).expect("resolved host");
    match host_sub.extension.as_ref() {
        Some(ext) if ext.kind == ExtensionKind::Mux32m => Ok((host_ref, ext)),
        _ => Err(ConfigError::NotRegistered {
            device: host.0,
            subdevice: host.1,
        }),
    }
}

fn require_mux32m_mut(doc: &mut ConfigDocument, host: SubdeviceRef) -> Result<&mut Extension> {
    let device_number = doc.number_of(host.device).unwrap_or(u32::MAX);
    let host_sub = doc
        .subdevice_mut(host)
        .ok_or(ConfigError::NoSuchSubdevice {
            device: device_number,
            subdevice: host.subdevice,
        })?;
    match host_sub.extension.as_mut() {
        Some(ext) if ext.kind == ExtensionKind::Mux32m => Ok(ext),
        _ => Err(ConfigError::NotRegistered {
            device: device_number,
            subdevice: host.subdevice,
        }),
    }
}

/// Apply-time guard: every reference a command is about to touch must
/// still resolve, otherwise nothing is written.
fn check_refs(doc: &ConfigDocument, refs: [Option<SubdeviceRef>; 3]) -> Result<()> {
    for r in refs.into_iter().flatten() {
        if doc.subdevice(r).is_none() {
            let device = doc.number_of(r.device).unwrap_or(u32::MAX);
            return Err(ConfigError::NoSuchSubdevice {
                device,
                subdevice: r.subdevice,
            });
        }
    }
    Ok(())
}

fn lock(doc: &mut ConfigDocument, resource: SubdeviceRef, holder: SubdeviceRef) {
    if let Some(sub) = doc.subdevice_mut(resource) {
        sub.locked_by = Some(holder);
    }
}

fn unlock(doc: &mut ConfigDocument, resource: SubdeviceRef) {
    if let Some(sub) = doc.subdevice_mut(resource) {
        sub.locked_by = None;
    }
}
