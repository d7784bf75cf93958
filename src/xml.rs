//! Reading and writing the `medrvconfig` XML document.
//!
//! The file layout follows the driver system's configuration schema: fixed
//! element names, numeric attributes holding the driver's constant values,
//! and scalar values as element text. Loading is all-or-nothing; any
//! structural violation, including asymmetric lock references, aborts with
//! `MalformedDocument` and no partial document is produced.

use std::io::Write;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::defines::{
    AccessKind, BusKind, ExtensionKind, PhysicalUnit, Plugged, SubdeviceSubtype, SubdeviceType,
    EXTENSION_TYPE_NONE,
};
use crate::document::{
    ConfigDocument, DeviceAccess, DeviceEntry, DeviceInfo, Extension, Mux32sEntry, RangeEntry,
    RemoteInfo, SubdeviceEntry, SubdeviceRef,
};
use crate::driver::BusLocation;
use crate::error::{ConfigError, Result};

const DOCTYPE: &str = "medrvconfig SYSTEM \"medrvconfig.dtd\"";

/// Serializes the document to the configuration file format.
pub fn to_xml_string(doc: &ConfigDocument) -> String {
    let mut buf = Vec::new();
    write_document(doc, &mut buf).expect("writing to memory cannot fail");
    String::from_utf8(buf).expect("serializer emits UTF-8")
}

/// Parses a configuration file. Structural violations of the document
/// invariants are fatal.
pub fn from_xml_str(text: &str) -> Result<ConfigDocument> {
    parse_document(text)
}

/// Writes the document to `path`, creating the configuration directory if
/// needed. On failure the file may be incomplete but the in-memory
/// document is untouched and stays dirty.
pub fn save_document(doc: &ConfigDocument, path: &Path) -> Result<()> {
    let write = |path: &Path| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, to_xml_string(doc))
    };
    write(path).map_err(|source| ConfigError::PersistenceWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the document from `path`.
pub fn load_document(path: &Path) -> Result<ConfigDocument> {
    let text =
        std::fs::read_to_string(path).map_err(|source| ConfigError::PersistenceReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
    from_xml_str(&text)
}

//
// Writer
//

fn write_document<W: Write>(doc: &ConfigDocument, out: W) -> std::io::Result<()> {
    let mut w = Writer::new_with_indent(out, b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    w.write_event(Event::DocType(BytesText::from_escaped(DOCTYPE)))?;

    w.write_event(Event::Start(BytesStart::new("medrvconfig")))?;
    text_element(&mut w, "date", "Date last modified", &doc.date)?;

    let mut device_list = BytesStart::new("device_list");
    device_list.push_attribute(("description", "Device list"));
    w.write_event(Event::Start(device_list))?;
    for device in &doc.devices {
        write_device(&mut w, doc, device)?;
    }
    w.write_event(Event::End(BytesEnd::new("device_list")))?;

    w.write_event(Event::End(BytesEnd::new("medrvconfig")))?;
    Ok(())
}

fn write_start<W: Write>(
    w: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
) -> std::io::Result<()> {
    let mut el = BytesStart::new(name);
    for (key, value) in attrs {
        el.push_attribute((*key, *value));
    }
    w.write_event(Event::Start(el))
}

fn write_device<W: Write>(
    w: &mut Writer<W>,
    doc: &ConfigDocument,
    device: &DeviceEntry,
) -> std::io::Result<()> {
    let number = device.device_number.to_string();
    let plugged = (device.plugged as u32).to_string();
    let access = (device.access.kind() as u32).to_string();
    let bus = (device.bus as u32).to_string();
    write_start(
        w,
        "device_entry",
        &[
            ("description", "Device"),
            ("device_number", &number),
            ("device_plugged", &plugged),
            ("access", &access),
            ("bus", &bus),
        ],
    )?;

    if let DeviceAccess::Remote(Some(remote)) = &device.access {
        write_start(w, "tcpip", &[("description", "Network information")])?;
        text_element(w, "remote_host", "Hostname", &remote.host)?;
        text_element(
            w,
            "remote_device_number",
            "Remote device number",
            &remote.remote_device_number.to_string(),
        )?;
        w.write_event(Event::End(BytesEnd::new("tcpip")))?;
    }

    let hw_bus = (device.info.hw_bus as u32).to_string();
    write_start(
        w,
        "device_info",
        &[("description", "Device info"), ("bus", &hw_bus)],
    )?;
    text_element(w, "device_name", "Device name", &device.info.name)?;
    text_element(
        w,
        "device_description",
        "Device description",
        &device.info.description,
    )?;
    text_element(w, "vendor_id", "Vendor ID", &device.info.vendor_id.to_string())?;
    text_element(w, "device_id", "Device ID", &device.info.device_id.to_string())?;
    text_element(w, "serial_no", "Serial number", &device.info.serial_no.to_string())?;
    match device.info.location {
        BusLocation::Pci {
            bus,
            device: dev,
            function,
        } => {
            text_element(w, "pci_bus_no", "PCI bus number", &bus.to_string())?;
            text_element(w, "pci_dev_no", "PCI device number", &dev.to_string())?;
            text_element(w, "pci_func_no", "PCI function number", &function.to_string())?;
        }
        BusLocation::Usb { root_hub } => {
            text_element(w, "usb_root_hub_no", "USB root hub number", &root_hub.to_string())?;
        }
        BusLocation::Network => {
            text_element(w, "remote_PNP", "Plug&Play remote device.", "LOCAL NETWORK")?;
        }
    }
    w.write_event(Event::End(BytesEnd::new("device_info")))?;

    if let Some(subdevices) = device.subdevices.as_ref() {
        write_start(w, "subdevice_list", &[("description", "Subdevice list")])?;
        for sub in subdevices {
            write_subdevice(w, doc, sub)?;
        }
        w.write_event(Event::End(BytesEnd::new("subdevice_list")))?;
    }

    w.write_event(Event::End(BytesEnd::new("device_entry")))?;
    Ok(())
}

fn write_subdevice<W: Write>(
    w: &mut Writer<W>,
    doc: &ConfigDocument,
    sub: &SubdeviceEntry,
) -> std::io::Result<()> {
    let extension_attr = match sub.extension.as_ref() {
        Some(ext) => ext.kind as u32,
        None => EXTENSION_TYPE_NONE,
    };
    let number = sub.subdevice_number.to_string();
    let kind = (sub.kind as u32).to_string();
    let extension = extension_attr.to_string();
    let mut attrs = vec![
        ("description", "Subdevice".to_string()),
        ("subdevice_number", number),
        ("subdevice_type", kind),
        ("subdevice_extension", extension),
        (
            "subdevice_lock",
            if sub.is_locked() { "1" } else { "0" }.to_string(),
        ),
    ];
    if let Some(holder) = sub.locked_by {
        attrs.push(("lock_device", display_number(doc, holder.device).to_string()));
        attrs.push(("lock_subdevice", holder.subdevice.to_string()));
    }
    let attrs: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    write_start(w, "subdevice_entry", &attrs)?;

    write_start(w, "subdevice_info", &[("description", "Subdevice info")])?;
    text_element(w, "subdevice_type", "Subdevice type", &(sub.kind as u32).to_string())?;
    text_element(
        w,
        "subdevice_sub_type",
        "Subdevice subtype",
        &(sub.subtype as u32).to_string(),
    )?;
    text_element(
        w,
        "subdevice_number_channels",
        "Number of channels",
        &sub.channels.to_string(),
    )?;
    w.write_event(Event::End(BytesEnd::new("subdevice_info")))?;

    if sub.kind.is_analog() {
        write_start(w, "range_list", &[("description", "Range list")])?;
        for range in &sub.ranges {
            write_range(w, range)?;
        }
        w.write_event(Event::End(BytesEnd::new("range_list")))?;
    }

    if let Some(ext) = sub.extension.as_ref() {
        write_extension(w, doc, ext)?;
    }

    w.write_event(Event::End(BytesEnd::new("subdevice_entry")))?;
    Ok(())
}

fn write_range<W: Write>(w: &mut Writer<W>, range: &RangeEntry) -> std::io::Result<()> {
    let number = range.range_number.to_string();
    write_start(
        w,
        "range_entry",
        &[("description", "Range"), ("range_number", &number)],
    )?;
    text_element(w, "range_unit", "Physical unit", &(range.unit as u32).to_string())?;
    text_element(w, "range_min", "Minimum physical value", &range.min.to_string())?;
    text_element(w, "range_max", "Maximum physical value", &range.max.to_string())?;
    text_element(
        w,
        "range_max_data",
        "Maximum digital value",
        &range.max_data.to_string(),
    )?;
    w.write_event(Event::End(BytesEnd::new("range_entry")))?;
    Ok(())
}

fn write_extension<W: Write>(
    w: &mut Writer<W>,
    doc: &ConfigDocument,
    ext: &Extension,
) -> std::io::Result<()> {
    let (name, channel_tag, channel_desc, prefix) = match ext.kind {
        ExtensionKind::Mux32m => (
            "mux32m",
            "mux32m_ai_channel",
            "Analog input channel",
            "mux32m",
        ),
        ExtensionKind::Demux32 => (
            "demux32",
            "demux32_ao_channel",
            "Analog output channel",
            "demux32",
        ),
    };
    write_start(
        w,
        name,
        &[
            ("description", ext.kind.label()),
            ("timed", if ext.timed() { "1" } else { "0" }),
        ],
    )?;

    text_element(w, channel_tag, channel_desc, &ext.channel.to_string())?;
    text_element(
        w,
        &format!("{prefix}_dio_device"),
        "Digital I/O device",
        &display_number(doc, ext.dio.device).to_string(),
    )?;
    text_element(
        w,
        &format!("{prefix}_dio_subdevice"),
        "Digital I/O subdevice",
        &ext.dio.subdevice.to_string(),
    )?;
    if let Some(timer) = ext.timer {
        text_element(
            w,
            &format!("{prefix}_timer_device"),
            "Timer device",
            &display_number(doc, timer.device).to_string(),
        )?;
        text_element(
            w,
            &format!("{prefix}_timer_subdevice"),
            "Timer subdevice",
            &timer.subdevice.to_string(),
        )?;
    }

    if ext.kind == ExtensionKind::Mux32m {
        write_start(w, "mux32s_list", &[("description", "ME-MUX32-S list")])?;
        for slave in &ext.slaves {
            let number = slave.number.to_string();
            write_start(
                w,
                "mux32s_entry",
                &[("description", "ME-MUX32-S"), ("mux32s_number", &number)],
            )?;
            w.write_event(Event::End(BytesEnd::new("mux32s_entry")))?;
        }
        w.write_event(Event::End(BytesEnd::new("mux32s_list")))?;
    }

    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element<W: Write>(
    w: &mut Writer<W>,
    name: &str,
    description: &str,
    value: &str,
) -> std::io::Result<()> {
    write_start(w, name, &[("description", description)])?;
    if !value.is_empty() {
        w.write_event(Event::Text(BytesText::new(value)))?;
    }
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Current display number of a device id, for the file's numeric
/// cross-references. An unresolvable id cannot occur in a consistent
/// document; it is written as an out-of-range number rather than
/// panicking mid-save.
fn display_number(doc: &ConfigDocument, id: crate::document::DeviceId) -> u32 {
    doc.number_of(id).unwrap_or(u32::MAX)
}

//
// Parser
//

struct RawLock {
    device: u32,
    subdevice: u32,
}

struct RawExtension {
    kind: ExtensionKind,
    timed: bool,
    channel: Option<u32>,
    dio_device: Option<u32>,
    dio_subdevice: Option<u32>,
    timer_device: Option<u32>,
    timer_subdevice: Option<u32>,
    slaves: Vec<u32>,
}

struct RawSubdevice {
    entry: SubdeviceEntry,
    lock: Option<RawLock>,
    extension: Option<RawExtension>,
}

struct RawDevice {
    number: u32,
    plugged: Plugged,
    access_kind: AccessKind,
    bus: BusKind,
    tcpip: Option<RemoteInfo>,
    hw_bus: BusKind,
    name: String,
    description: String,
    vendor_id: u32,
    device_id: u32,
    serial_no: u32,
    location: Option<BusLocation>,
    subdevices: Option<Vec<RawSubdevice>>,
}

fn malformed(msg: impl Into<String>) -> ConfigError {
    ConfigError::MalformedDocument(msg.into())
}

fn parse_document(text: &str) -> Result<ConfigDocument> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut date = None;
    let mut raw_devices = None;

    loop {
        match reader.read_event().map_err(|e| malformed(e.to_string()))? {
            Event::Start(e) if e.name().as_ref() == b"medrvconfig" => {
                let (d, devices) = parse_root(&mut reader)?;
                date = d;
                raw_devices = Some(devices);
            }
            Event::Start(e) => {
                return Err(malformed(format!(
                    "unexpected root element '{}'",
                    name_of(&e)
                )))
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let raw_devices = raw_devices.ok_or_else(|| malformed("missing medrvconfig root element"))?;
    link_document(date.unwrap_or_default(), raw_devices)
}

fn parse_root(reader: &mut Reader<&[u8]>) -> Result<(Option<String>, Vec<RawDevice>)> {
    let mut date = None;
    let mut devices = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"date" => date = Some(read_text(reader, "date")?),
                b"device_list" => {
                    loop {
                        match next_event(reader)? {
                            Event::Start(e) if e.name().as_ref() == b"device_entry" => {
                                devices.push(parse_device(reader, &e)?);
                            }
                            Event::End(e) if e.name().as_ref() == b"device_list" => break,
                            Event::Start(e) => {
                                return Err(malformed(format!(
                                    "unexpected element '{}' in device_list",
                                    name_of(&e)
                                )))
                            }
                            _ => {}
                        }
                    }
                }
                other => {
                    return Err(malformed(format!(
                        "unexpected element '{}' in medrvconfig",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Event::Empty(e) if e.name().as_ref() == b"date" => date = Some(String::new()),
            Event::End(e) if e.name().as_ref() == b"medrvconfig" => break,
            _ => {}
        }
    }
    Ok((date, devices))
}

fn parse_device(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<RawDevice> {
    let mut device = RawDevice {
        number: parse_u32(&require_attr(start, "device_number")?, "device_number")?,
        plugged: Plugged::from(parse_u32(
            &require_attr(start, "device_plugged")?,
            "device_plugged",
        )?),
        access_kind: AccessKind::from(parse_u32(&require_attr(start, "access")?, "access")?),
        bus: BusKind::from(parse_u32(&require_attr(start, "bus")?, "bus")?),
        tcpip: None,
        hw_bus: BusKind::Invalid,
        name: String::new(),
        description: String::new(),
        vendor_id: 0,
        device_id: 0,
        serial_no: 0,
        location: None,
        subdevices: None,
    };

    loop {
        match next_event(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"tcpip" => device.tcpip = Some(parse_tcpip(reader)?),
                b"device_info" => parse_device_info(reader, &e, &mut device)?,
                b"subdevice_list" => device.subdevices = Some(parse_subdevice_list(reader)?),
                other => {
                    return Err(malformed(format!(
                        "unexpected element '{}' in device_entry",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Event::End(e) if e.name().as_ref() == b"device_entry" => break,
            _ => {}
        }
    }
    Ok(device)
}

fn parse_tcpip(reader: &mut Reader<&[u8]>) -> Result<RemoteInfo> {
    let mut host = None;
    let mut number = None;
    loop {
        match next_event(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"remote_host" => host = Some(read_text(reader, "remote_host")?),
                b"remote_device_number" => {
                    let text = read_text(reader, "remote_device_number")?;
                    number = Some(parse_u32(&text, "remote_device_number")?);
                }
                other => {
                    return Err(malformed(format!(
                        "unexpected element '{}' in tcpip",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Event::End(e) if e.name().as_ref() == b"tcpip" => break,
            _ => {}
        }
    }
    Ok(RemoteInfo {
        host: host.ok_or_else(|| malformed("tcpip without remote_host"))?,
        remote_device_number: number
            .ok_or_else(|| malformed("tcpip without remote_device_number"))?,
    })
}

fn parse_device_info(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    device: &mut RawDevice,
) -> Result<()> {
    device.hw_bus = BusKind::from(parse_u32(&require_attr(start, "bus")?, "bus")?);
    let mut pci = (None, None, None);
    loop {
        match next_event(reader)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let text = read_text(reader, &String::from_utf8_lossy(&name))?;
                match name.as_slice() {
                    b"device_name" => device.name = text,
                    b"device_description" => device.description = text,
                    b"vendor_id" => device.vendor_id = parse_u32(&text, "vendor_id")?,
                    b"device_id" => device.device_id = parse_u32(&text, "device_id")?,
                    b"serial_no" => device.serial_no = parse_u32(&text, "serial_no")?,
                    b"pci_bus_no" => pci.0 = Some(parse_u32(&text, "pci_bus_no")?),
                    b"pci_dev_no" => pci.1 = Some(parse_u32(&text, "pci_dev_no")?),
                    b"pci_func_no" => pci.2 = Some(parse_u32(&text, "pci_func_no")?),
                    b"usb_root_hub_no" => {
                        device.location = Some(BusLocation::Usb {
                            root_hub: parse_u32(&text, "usb_root_hub_no")?,
                        })
                    }
                    b"remote_PNP" => device.location = Some(BusLocation::Network),
                    other => {
                        return Err(malformed(format!(
                            "unexpected element '{}' in device_info",
                            String::from_utf8_lossy(other)
                        )))
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"device_info" => break,
            _ => {}
        }
    }
    if let (Some(bus), Some(dev), Some(function)) = pci {
        device.location = Some(BusLocation::Pci {
            bus,
            device: dev,
            function,
        });
    }
    Ok(())
}

fn parse_subdevice_list(reader: &mut Reader<&[u8]>) -> Result<Vec<RawSubdevice>> {
    let mut subdevices = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"subdevice_entry" => {
                subdevices.push(parse_subdevice(reader, &e)?);
            }
            Event::End(e) if e.name().as_ref() == b"subdevice_list" => break,
            Event::Start(e) => {
                return Err(malformed(format!(
                    "unexpected element '{}' in subdevice_list",
                    name_of(&e)
                )))
            }
            _ => {}
        }
    }
    Ok(subdevices)
}

fn parse_subdevice(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<RawSubdevice> {
    let number = parse_u32(
        &require_attr(start, "subdevice_number")?,
        "subdevice_number",
    )?;
    let kind = SubdeviceType::from(parse_u32(
        &require_attr(start, "subdevice_type")?,
        "subdevice_type",
    )?);
    let locked = require_attr(start, "subdevice_lock")? == "1";
    let lock = if locked {
        Some(RawLock {
            device: parse_u32(&require_attr(start, "lock_device")?, "lock_device")?,
            subdevice: parse_u32(&require_attr(start, "lock_subdevice")?, "lock_subdevice")?,
        })
    } else {
        None
    };

    let mut subtype = SubdeviceSubtype::Invalid;
    let mut channels = 0;
    let mut ranges = Vec::new();
    let mut extension = None;

    loop {
        match next_event(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"subdevice_info" => {
                    let (st, ch) = parse_subdevice_info(reader)?;
                    subtype = st;
                    channels = ch;
                }
                b"range_list" => ranges = parse_range_list(reader)?,
                b"mux32m" => {
                    extension = Some(parse_extension(reader, &e, ExtensionKind::Mux32m)?)
                }
                b"demux32" => {
                    extension = Some(parse_extension(reader, &e, ExtensionKind::Demux32)?)
                }
                other => {
                    return Err(malformed(format!(
                        "unexpected element '{}' in subdevice_entry",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Event::End(e) if e.name().as_ref() == b"subdevice_entry" => break,
            _ => {}
        }
    }

    Ok(RawSubdevice {
        entry: SubdeviceEntry {
            subdevice_number: number,
            kind,
            subtype,
            channels,
            locked_by: None,
            extension: None,
            ranges,
        },
        lock,
        extension,
    })
}

fn parse_subdevice_info(reader: &mut Reader<&[u8]>) -> Result<(SubdeviceSubtype, u32)> {
    let mut subtype = SubdeviceSubtype::Invalid;
    let mut channels = 0;
    loop {
        match next_event(reader)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let text = read_text(reader, &String::from_utf8_lossy(&name))?;
                match name.as_slice() {
                    // The type repeats the entry attribute; the attribute wins.
                    b"subdevice_type" => {}
                    b"subdevice_sub_type" => {
                        subtype =
                            SubdeviceSubtype::from(parse_u32(&text, "subdevice_sub_type")?)
                    }
                    b"subdevice_number_channels" => {
                        channels = parse_u32(&text, "subdevice_number_channels")?
                    }
                    other => {
                        return Err(malformed(format!(
                            "unexpected element '{}' in subdevice_info",
                            String::from_utf8_lossy(other)
                        )))
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"subdevice_info" => break,
            _ => {}
        }
    }
    Ok((subtype, channels))
}

fn parse_range_list(reader: &mut Reader<&[u8]>) -> Result<Vec<RangeEntry>> {
    let mut ranges = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"range_entry" => {
                let number = parse_u32(&require_attr(&e, "range_number")?, "range_number")?;
                let mut range = RangeEntry {
                    range_number: number,
                    unit: PhysicalUnit::Invalid,
                    min: 0.0,
                    max: 0.0,
                    max_data: 0,
                };
                loop {
                    match next_event(reader)? {
                        Event::Start(e) => {
                            let name = e.name().as_ref().to_vec();
                            let text = read_text(reader, &String::from_utf8_lossy(&name))?;
                            match name.as_slice() {
                                b"range_unit" => {
                                    range.unit =
                                        PhysicalUnit::from(parse_u32(&text, "range_unit")?)
                                }
                                b"range_min" => range.min = parse_f64(&text, "range_min")?,
                                b"range_max" => range.max = parse_f64(&text, "range_max")?,
                                b"range_max_data" => {
                                    range.max_data = parse_u32(&text, "range_max_data")?
                                }
                                other => {
                                    return Err(malformed(format!(
                                        "unexpected element '{}' in range_entry",
                                        String::from_utf8_lossy(other)
                                    )))
                                }
                            }
                        }
                        Event::End(e) if e.name().as_ref() == b"range_entry" => break,
                        _ => {}
                    }
                }
                ranges.push(range);
            }
            Event::End(e) if e.name().as_ref() == b"range_list" => break,
            Event::Start(e) => {
                return Err(malformed(format!(
                    "unexpected element '{}' in range_list",
                    name_of(&e)
                )))
            }
            _ => {}
        }
    }
    Ok(ranges)
}

fn parse_extension(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    kind: ExtensionKind,
) -> Result<RawExtension> {
    let container = match kind {
        ExtensionKind::Mux32m => "mux32m",
        ExtensionKind::Demux32 => "demux32",
    };
    let mut ext = RawExtension {
        kind,
        timed: require_attr(start, "timed")? == "1",
        channel: None,
        dio_device: None,
        dio_subdevice: None,
        timer_device: None,
        timer_subdevice: None,
        slaves: Vec::new(),
    };

    loop {
        match next_event(reader)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"mux32s_list" => {
                        ext.slaves = parse_mux32s_list(reader)?;
                        continue;
                    }
                    _ => {}
                }
                let text = read_text(reader, &String::from_utf8_lossy(&name))?;
                match name.as_slice() {
                    b"mux32m_ai_channel" | b"demux32_ao_channel" => {
                        ext.channel = Some(parse_u32(&text, "channel")?)
                    }
                    b"mux32m_dio_device" | b"demux32_dio_device" => {
                        ext.dio_device = Some(parse_u32(&text, "dio_device")?)
                    }
                    b"mux32m_dio_subdevice" | b"demux32_dio_subdevice" => {
                        ext.dio_subdevice = Some(parse_u32(&text, "dio_subdevice")?)
                    }
                    b"mux32m_timer_device" | b"demux32_timer_device" => {
                        ext.timer_device = Some(parse_u32(&text, "timer_device")?)
                    }
                    b"mux32m_timer_subdevice" | b"demux32_timer_subdevice" => {
                        ext.timer_subdevice = Some(parse_u32(&text, "timer_subdevice")?)
                    }
                    other => {
                        return Err(malformed(format!(
                            "unexpected element '{}' in {container}",
                            String::from_utf8_lossy(other)
                        )))
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == container.as_bytes() => break,
            _ => {}
        }
    }
    Ok(ext)
}

fn parse_mux32s_list(reader: &mut Reader<&[u8]>) -> Result<Vec<u32>> {
    let mut slaves = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"mux32s_entry" => {
                slaves.push(parse_u32(
                    &require_attr(&e, "mux32s_number")?,
                    "mux32s_number",
                )?);
                // Consume the matching end tag.
                loop {
                    match next_event(reader)? {
                        Event::End(e) if e.name().as_ref() == b"mux32s_entry" => break,
                        Event::Start(e) => {
                            return Err(malformed(format!(
                                "unexpected element '{}' in mux32s_entry",
                                name_of(&e)
                            )))
                        }
                        _ => {}
                    }
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"mux32s_entry" => {
                slaves.push(parse_u32(
                    &require_attr(&e, "mux32s_number")?,
                    "mux32s_number",
                )?);
            }
            Event::End(e) if e.name().as_ref() == b"mux32s_list" => break,
            Event::Start(e) => {
                return Err(malformed(format!(
                    "unexpected element '{}' in mux32s_list",
                    name_of(&e)
                )))
            }
            _ => {}
        }
    }
    Ok(slaves)
}

/// Resolves the raw tree into a document: allocates stable device ids in
/// list order, turns numeric cross-references into id-based references and
/// verifies the result against the document invariants.
fn link_document(date: String, raw_devices: Vec<RawDevice>) -> Result<ConfigDocument> {
    let mut doc = ConfigDocument::new(date);

    let mut ids = Vec::with_capacity(raw_devices.len());
    for (i, raw) in raw_devices.iter().enumerate() {
        if raw.number != i as u32 {
            return Err(malformed(format!(
                "device entry at position {i} carries number {}",
                raw.number
            )));
        }
        ids.push(doc.allocate_id());
    }
    let id_of = |number: u32| -> Result<crate::document::DeviceId> {
        ids.get(number as usize)
            .copied()
            .ok_or_else(|| malformed(format!("reference to unknown device {number}")))
    };

    for (i, raw) in raw_devices.into_iter().enumerate() {
        let access = match raw.access_kind {
            AccessKind::Remote => DeviceAccess::Remote(raw.tcpip),
            _ => DeviceAccess::Local,
        };
        let location = raw
            .location
            .ok_or_else(|| malformed(format!("device {i} without bus location")))?;

        let subdevices = match raw.subdevices {
            None => None,
            Some(raw_subs) => {
                let mut subs = Vec::with_capacity(raw_subs.len());
                for (j, raw_sub) in raw_subs.into_iter().enumerate() {
                    let mut entry = raw_sub.entry;
                    if entry.subdevice_number != j as u32 {
                        return Err(malformed(format!(
                            "device {i}: subdevice at position {j} carries number {}",
                            entry.subdevice_number
                        )));
                    }
                    if let Some(lock) = raw_sub.lock {
                        entry.locked_by = Some(SubdeviceRef {
                            device: id_of(lock.device)?,
                            subdevice: lock.subdevice,
                        });
                    }
                    if let Some(raw_ext) = raw_sub.extension {
                        entry.extension = Some(link_extension(raw_ext, i, &id_of)?);
                    }
                    subs.push(entry);
                }
                Some(subs)
            }
        };

        doc.devices.push(DeviceEntry {
            id: ids[i],
            device_number: i as u32,
            plugged: raw.plugged,
            bus: raw.bus,
            access,
            info: DeviceInfo {
                name: raw.name,
                description: raw.description,
                vendor_id: raw.vendor_id,
                device_id: raw.device_id,
                serial_no: raw.serial_no,
                hw_bus: raw.hw_bus,
                location,
            },
            subdevices,
        });
    }

    doc.verify_consistency().map_err(malformed)?;
    Ok(doc)
}

fn link_extension(
    raw: RawExtension,
    device_index: usize,
    id_of: &dyn Fn(u32) -> Result<crate::document::DeviceId>,
) -> Result<Extension> {
    let channel = raw
        .channel
        .ok_or_else(|| malformed(format!("device {device_index}: extension without channel")))?;
    let dio = SubdeviceRef {
        device: id_of(raw.dio_device.ok_or_else(|| {
            malformed(format!("device {device_index}: extension without DIO device"))
        })?)?,
        subdevice: raw.dio_subdevice.ok_or_else(|| {
            malformed(format!("device {device_index}: extension without DIO subdevice"))
        })?,
    };
    let timer = if raw.timed {
        Some(SubdeviceRef {
            device: id_of(raw.timer_device.ok_or_else(|| {
                malformed(format!(
                    "device {device_index}: timed extension without timer device"
                ))
            })?)?,
            subdevice: raw.timer_subdevice.ok_or_else(|| {
                malformed(format!(
                    "device {device_index}: timed extension without timer subdevice"
                ))
            })?,
        })
    } else {
        None
    };
    let slaves = raw
        .slaves
        .into_iter()
        .map(|number| Mux32sEntry { number })
        .collect();
    Ok(Extension {
        kind: raw.kind,
        channel,
        dio,
        timer,
        slaves,
    })
}

//
// Shared parsing helpers
//

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>> {
    match reader.read_event().map_err(|e| malformed(e.to_string()))? {
        Event::Eof => Err(malformed("unexpected end of file")),
        event => Ok(event),
    }
}

fn read_text(reader: &mut Reader<&[u8]>, element: &str) -> Result<String> {
    let mut text = String::new();
    loop {
        match next_event(reader)? {
            Event::Text(t) => {
                text.push_str(
                    t.unescape()
                        .map_err(|e| malformed(e.to_string()))?
                        .as_ref(),
                );
            }
            Event::End(_) => break,
            Event::Start(e) => {
                return Err(malformed(format!(
                    "unexpected element '{}' inside '{element}'",
                    name_of(&e)
                )))
            }
            _ => {}
        }
    }
    Ok(text)
}

fn require_attr(start: &BytesStart, name: &str) -> Result<String> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(e.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(attr
                .unescape_value()
                .map_err(|e| malformed(e.to_string()))?
                .into_owned());
        }
    }
    Err(malformed(format!(
        "element '{}' without '{name}' attribute",
        name_of(start)
    )))
}

fn name_of(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn parse_u32(text: &str, what: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("invalid number '{text}' for {what}")))
}

fn parse_f64(text: &str, what: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("invalid value '{text}' for {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::inventory::snapshot;
    use crate::reconcile::build_from_inventory;

    fn sample_doc() -> ConfigDocument {
        let mut drv = MockDriver::sample();
        let snap = snapshot(&mut drv).unwrap();
        build_from_inventory(&snap, "Thu Jan  1 00:00:00 2026")
    }

    #[test]
    fn round_trip_preserves_the_document() {
        let doc = sample_doc();
        let xml = to_xml_string(&doc);
        let reloaded = from_xml_str(&xml).unwrap();
        assert_eq!(reloaded, doc);
        assert_eq!(to_xml_string(&reloaded), xml);
    }

    #[test]
    fn document_carries_the_driver_vocabulary() {
        let doc = sample_doc();
        let xml = to_xml_string(&doc);
        // ME_TYPE_AI and ME_PLUGGED_IN as decimal constants.
        assert!(xml.contains(&(crate::defines::SubdeviceType::Ai as u32).to_string()));
        assert!(xml.contains("device_plugged=\"1769473\""));
        assert!(xml.contains("<!DOCTYPE medrvconfig SYSTEM \"medrvconfig.dtd\">"));
    }

    #[test]
    fn rejects_sparse_device_numbers() {
        let doc = sample_doc();
        let xml = to_xml_string(&doc).replace("device_number=\"1\"", "device_number=\"7\"");
        assert!(matches!(
            from_xml_str(&xml),
            Err(ConfigError::MalformedDocument(_))
        ));
    }

    #[test]
    fn rejects_one_sided_locks() {
        let doc = sample_doc();
        let xml = to_xml_string(&doc).replacen(
            "subdevice_lock=\"0\"",
            "subdevice_lock=\"1\" lock_device=\"0\" lock_subdevice=\"0\"",
            1,
        );
        assert!(matches!(
            from_xml_str(&xml),
            Err(ConfigError::MalformedDocument(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(from_xml_str("not xml at all").is_err());
        assert!(from_xml_str("<wrong_root></wrong_root>").is_err());
    }
}
