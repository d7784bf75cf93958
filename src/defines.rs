//! Numeric vocabulary of the ME-iDS driver system.
//!
//! The driver reports every classification as a plain integer and the
//! configuration file stores the same integers as text, so each enum here
//! carries the driver's value and converts losslessly in both directions.

/// Device ids of the ME-4680 board family. Only these boards can drive an
/// extension in timed mode from their fourth analog output subdevice.
pub const TIMING_CAPABLE_DEVICE_IDS: [u32; 4] = [0x4680, 0x4681, 0x4682, 0x4683];

/// Device id of the ME-1000; eligible for the ME-1001 piggyback extension.
pub const ME1000_DEVICE_ID: u32 = 0x100B;

/// Upper bound on ME-MUX32-S slave stages behind one ME-MUX32-M.
pub const MAX_MUX32S_ENTRIES: usize = 7;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SubdeviceType {
    Invalid = 0x0000_0000,
    Ao = 0x0018_0001,
    Ai = 0x0018_0002,
    Dio = 0x0018_0003,
    Do = 0x0018_0004,
    Di = 0x0018_0005,
    Ctr = 0x0018_0006,
    ExtIrq = 0x0018_0007,
    FreqO = 0x0018_0009,
    FreqI = 0x0018_000A,
}

impl From<u32> for SubdeviceType {
    fn from(value: u32) -> Self {
        match value {
            0x0018_0001 => Self::Ao,
            0x0018_0002 => Self::Ai,
            0x0018_0003 => Self::Dio,
            0x0018_0004 => Self::Do,
            0x0018_0005 => Self::Di,
            0x0018_0006 => Self::Ctr,
            0x0018_0007 => Self::ExtIrq,
            0x0018_0009 => Self::FreqO,
            0x0018_000A => Self::FreqI,
            _ => Self::Invalid,
        }
    }
}

impl SubdeviceType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ao => "Analog output",
            Self::Ai => "Analog input",
            Self::Dio => "Digital I/O",
            Self::Do => "Digital output",
            Self::Di => "Digital input",
            Self::Ctr => "Counter",
            Self::ExtIrq => "External interrupt",
            Self::FreqO => "Frequency output",
            Self::FreqI => "Frequency input",
            Self::Invalid => "Invalid",
        }
    }

    /// Analog subdevices own a range list.
    pub fn is_analog(self) -> bool {
        matches!(self, Self::Ai | Self::Ao)
    }

    /// Subdevices an extension may borrow as its digital I/O resource.
    pub fn is_dio_resource(self) -> bool {
        matches!(self, Self::Dio | Self::Do)
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SubdeviceSubtype {
    Invalid = 0x0000_0000,
    Single = 0x0019_0001,
    Streaming = 0x0019_0002,
    Ctr8254 = 0x0019_0003,
    Any = 0x0019_0004,
}

impl From<u32> for SubdeviceSubtype {
    fn from(value: u32) -> Self {
        match value {
            0x0019_0001 => Self::Single,
            0x0019_0002 => Self::Streaming,
            0x0019_0003 => Self::Ctr8254,
            0x0019_0004 => Self::Any,
            _ => Self::Invalid,
        }
    }
}

impl SubdeviceSubtype {
    pub fn label(self) -> &'static str {
        match self {
            Self::Single => "Single",
            Self::Streaming => "Streaming",
            Self::Ctr8254 => "8254",
            Self::Any => "Any",
            Self::Invalid => "Invalid",
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusKind {
    Invalid = 0x0000_0000,
    Pci = 0x001A_0001,
    Usb = 0x001A_0002,
    LanPci = 0x001A_0101,
    LanUsb = 0x001A_0102,
}

impl From<u32> for BusKind {
    fn from(value: u32) -> Self {
        match value {
            0x001A_0001 => Self::Pci,
            0x001A_0002 => Self::Usb,
            0x001A_0101 => Self::LanPci,
            0x001A_0102 => Self::LanUsb,
            _ => Self::Invalid,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Plugged {
    Invalid = 0x0000_0000,
    In = 0x001B_0001,
    Out = 0x001B_0002,
}

impl From<u32> for Plugged {
    fn from(value: u32) -> Self {
        match value {
            0x001B_0001 => Self::In,
            0x001B_0002 => Self::Out,
            _ => Self::Invalid,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExtensionKind {
    Mux32m = 0x001C_0002,
    Demux32 = 0x001C_0003,
}

impl ExtensionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mux32m => "ME-MUX32-M",
            Self::Demux32 => "ME-DEMUX32",
        }
    }

    /// Subdevice type the extension attaches to.
    pub fn host_type(self) -> SubdeviceType {
        match self {
            Self::Mux32m => SubdeviceType::Ai,
            Self::Demux32 => SubdeviceType::Ao,
        }
    }
}

/// Value of the `subdevice_extension` attribute for an extension-free entry.
pub const EXTENSION_TYPE_NONE: u32 = 0x001C_0001;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Invalid = 0x0000_0000,
    Local = 0x001D_0001,
    Remote = 0x001D_0002,
}

impl From<u32> for AccessKind {
    fn from(value: u32) -> Self {
        match value {
            0x001D_0001 => Self::Local,
            0x001D_0002 => Self::Remote,
            _ => Self::Invalid,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PhysicalUnit {
    Invalid = 0x0000_0000,
    Volt = 0x0017_0001,
    Ampere = 0x0017_0002,
    Any = 0x0017_0003,
    Hertz = 0x0017_0004,
}

impl From<u32> for PhysicalUnit {
    fn from(value: u32) -> Self {
        match value {
            0x0017_0001 => Self::Volt,
            0x0017_0002 => Self::Ampere,
            0x0017_0003 => Self::Any,
            0x0017_0004 => Self::Hertz,
            _ => Self::Invalid,
        }
    }
}

impl PhysicalUnit {
    pub fn label(self) -> &'static str {
        match self {
            Self::Volt => "Volt",
            Self::Ampere => "Ampere",
            Self::Hertz => "Hertz",
            Self::Any => "Any",
            Self::Invalid => "Invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdevice_type_round_trip() {
        for ty in [
            SubdeviceType::Ao,
            SubdeviceType::Ai,
            SubdeviceType::Dio,
            SubdeviceType::Do,
            SubdeviceType::Di,
            SubdeviceType::Ctr,
            SubdeviceType::ExtIrq,
            SubdeviceType::FreqO,
            SubdeviceType::FreqI,
        ] {
            assert_eq!(SubdeviceType::from(ty as u32), ty);
        }
        assert_eq!(SubdeviceType::from(0xDEAD_BEEF), SubdeviceType::Invalid);
    }

    #[test]
    fn dio_resource_types() {
        assert!(SubdeviceType::Dio.is_dio_resource());
        assert!(SubdeviceType::Do.is_dio_resource());
        assert!(!SubdeviceType::Di.is_dio_resource());
        assert!(!SubdeviceType::Ai.is_dio_resource());
    }

    #[test]
    fn extension_hosts() {
        assert_eq!(ExtensionKind::Mux32m.host_type(), SubdeviceType::Ai);
        assert_eq!(ExtensionKind::Demux32.host_type(), SubdeviceType::Ao);
    }
}
