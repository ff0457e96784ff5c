// Licensed under the Apache-2.0 license

//! Common types and constants for the SMBus driver modules.
//!
//! This module provides the protocol and capability enumerations, the UDID
//! layout, limits shared by the instance table and the driver configuration
//! builder.

use fugit::HertzU32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const DATA_SIZE_MAX: usize = 256;
pub const UDID_LENGTH: usize = 16;
/// Byte count reported in a Get UDID response (UDID plus address byte).
pub const GET_UDID_DATA_LENGTH: u8 = 17;
/// Total Get UDID response length including the leading byte count.
pub const GET_UDID_MSG_LENGTH: usize = 18;

pub const MAX_INSTANCES: usize = 8;
pub const MAX_NON_ARP_INSTANCES: usize = 7;
pub const ARP_INSTANCE_ID: usize = 7;
pub const INVALID_INSTANCE: u8 = 99;

pub const COMMAND_INVALID: u8 = 66;
pub const INVALID_ADDRESS_MASK: u8 = 0x80;
pub const DEFAULT_ARP_ADDRESS: u8 = 0x61;
pub const HOST_NOTIFY_ADDRESS: u8 = 0x10;

pub const MAGIC_NUMBER: u32 = 0x534D_4273;
pub const FIREWALL1: u32 = 0xF15E_2112;
pub const FIREWALL2: u32 = 0xAC1D_BA78;
pub const FIREWALL3: u32 = 0x1CE1_CE99;
pub const INITIALIZATION_CODE: u32 = 0x7AB3_F91D;

pub const FIFO_DEPTH: u32 = 64;
pub const HALF_FIFO_DEPTH: u32 = 32;
/// RX threshold used while streaming long writes into the target RX FIFO.
pub const PARTIAL_FILL_SIZE: u32 = 20;
pub const FIFO_SPACE_FOR_TWO_BYTES: u32 = 62;
pub const MAX_FIFO_EMPTY_WHILE_IN_DONE: u8 = 10;
pub const UNEXPECTED_READ_DATA: u8 = 0xFF;

pub const UDID_CAPABILITIES_BYTE: usize = 15;
pub const UDID_ADDRESS_TYPE_MASK: u8 = 0xC0;
pub const UDID_PEC_SUPPORTED: u8 = 0x01;
pub const UDID_ADDRESS_UNASSIGNED: u8 = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FrequencyClass {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl FrequencyClass {
    #[must_use]
    pub fn bus_frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    None,
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ArpCapability {
    Unknown,
    Capable,
    FixedAndDiscoverable,
    FixedNotDiscoverable,
    NonArpCapable,
}

impl ArpCapability {
    /// Instances that answer Get UDID and Prepare to ARP broadcasts.
    #[must_use]
    pub fn is_discoverable(self) -> bool {
        matches!(self, Self::Capable | Self::FixedAndDiscoverable)
    }

    /// Instances that take part in ARP at all.
    #[must_use]
    pub fn participates(self) -> bool {
        matches!(
            self,
            Self::Capable | Self::FixedAndDiscoverable | Self::FixedNotDiscoverable
        )
    }
}

/// Address type held in the top two bits of the UDID device capabilities byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Fixed = 0x00,
    DynamicPersistent = 0x40,
    DynamicVolatile = 0x80,
    Random = 0xC0,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Protocol {
    QuickCommandLo,
    QuickCommandHi,
    SendByte,
    ReceiveByte,
    WriteByte,
    WriteWord,
    ReadByte,
    ReadWord,
    ProcessCall,
    BlockWrite,
    BlockRead,
    BlockWriteBlockReadProcessCall,
    HostNotify,
    Write32,
    Read32,
    Write64,
    Read64,
    PrepareToArp,
    ResetDevice,
    GetUdid,
    AssignAddress,
    GetUdidDirected,
    ResetDeviceDirected,
    None,
    I2cWrite,
    I2cRead,
    I2cWriteRead,
    I2cNone,
}

/// Number of per-protocol statistics slots.
pub const PROTOCOL_COUNT: usize = Protocol::I2cNone as usize;

const PROTOCOL_TABLE: [Protocol; PROTOCOL_COUNT + 1] = [
    Protocol::QuickCommandLo,
    Protocol::QuickCommandHi,
    Protocol::SendByte,
    Protocol::ReceiveByte,
    Protocol::WriteByte,
    Protocol::WriteWord,
    Protocol::ReadByte,
    Protocol::ReadWord,
    Protocol::ProcessCall,
    Protocol::BlockWrite,
    Protocol::BlockRead,
    Protocol::BlockWriteBlockReadProcessCall,
    Protocol::HostNotify,
    Protocol::Write32,
    Protocol::Read32,
    Protocol::Write64,
    Protocol::Read64,
    Protocol::PrepareToArp,
    Protocol::ResetDevice,
    Protocol::GetUdid,
    Protocol::AssignAddress,
    Protocol::GetUdidDirected,
    Protocol::ResetDeviceDirected,
    Protocol::None,
    Protocol::I2cWrite,
    Protocol::I2cRead,
    Protocol::I2cWriteRead,
    Protocol::I2cNone,
];

impl Protocol {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        PROTOCOL_TABLE.get(usize::from(value)).copied()
    }

    /// Protocols a caller may start through the SMBus controller API.
    #[must_use]
    pub fn is_smbus(self) -> bool {
        self < Self::None
    }

    #[must_use]
    pub fn is_arp(self) -> bool {
        (Self::PrepareToArp..=Self::ResetDeviceDirected).contains(&self)
    }

    #[must_use]
    pub fn is_i2c(self) -> bool {
        matches!(self, Self::I2cWrite | Self::I2cRead | Self::I2cWriteRead)
    }

    /// Index into the per-protocol message counters.
    #[must_use]
    pub fn stats_index(self) -> Option<usize> {
        match self {
            Self::None | Self::I2cNone => None,
            p => Some(p as usize),
        }
    }

    /// Target-side protocols where the target answers with data.
    #[must_use]
    pub fn is_target_read(self) -> bool {
        matches!(
            self,
            Self::BlockWriteBlockReadProcessCall
                | Self::ProcessCall
                | Self::BlockRead
                | Self::Read64
                | Self::Read32
                | Self::ReadWord
                | Self::ReadByte
                | Self::ReceiveByte
        )
    }

    /// Fixed-length reads where the byte count is implied by the protocol.
    #[must_use]
    pub fn fixed_read_length(self) -> Option<u32> {
        match self {
            Self::Read64 => Some(8),
            Self::Read32 => Some(4),
            Self::ReadWord | Self::ProcessCall => Some(2),
            Self::ReadByte | Self::ReceiveByte => Some(1),
            _ => None,
        }
    }

    /// Fixed-length writes where the byte count is implied by the protocol.
    #[must_use]
    pub fn fixed_write_length(self) -> Option<u32> {
        match self {
            Self::Write64 => Some(8),
            Self::Write32 => Some(4),
            Self::WriteWord | Self::ProcessCall => Some(2),
            Self::WriteByte => Some(1),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::QuickCommandLo => "QUICK_COMMAND_LO",
            Self::QuickCommandHi => "QUICK_COMMAND_HI",
            Self::SendByte => "SEND_BYTE",
            Self::ReceiveByte => "RECEIVE_BYTE",
            Self::WriteByte => "WRITE_BYTE",
            Self::WriteWord => "WRITE_WORD",
            Self::ReadByte => "READ_BYTE",
            Self::ReadWord => "READ_WORD",
            Self::ProcessCall => "PROCESS_CALL",
            Self::BlockWrite => "BLOCK_WRITE",
            Self::BlockRead => "BLOCK_READ",
            Self::BlockWriteBlockReadProcessCall => "BLOCK_WRITE_BLOCK_READ_PROCESS_CALL",
            Self::HostNotify => "HOST_NOTIFY",
            Self::Write32 => "WRITE_32",
            Self::Read32 => "READ_32",
            Self::Write64 => "WRITE_64",
            Self::Read64 => "READ_64",
            Self::PrepareToArp => "PREPARE_TO_ARP",
            Self::ResetDevice => "RESET_DEVICE",
            Self::GetUdid => "GET_UDID",
            Self::AssignAddress => "ASSIGN_ADDRESS",
            Self::GetUdidDirected => "GET_UDID_DIRECTED",
            Self::ResetDeviceDirected => "RESET_DEVICE_DIRECTED",
            Self::None => "NONE",
            Self::I2cWrite => "I2C_WRITE",
            Self::I2cRead => "I2C_READ",
            Self::I2cWriteRead => "I2C_WRITE_READ",
            Self::I2cNone => "I2C_NONE",
        }
    }
}

/// SMBus Unique Device Identifier.
///
/// Stored least significant byte first, so the device capabilities byte, which
/// goes out first on the wire, sits at index 15.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct Udid {
    pub vendor_specific_id: [u8; 4],
    pub subsystem_device_id: [u8; 2],
    pub subsystem_vendor_id: [u8; 2],
    pub interface: [u8; 2],
    pub device_id: [u8; 2],
    pub vendor_id: [u8; 2],
    pub version: u8,
    pub device_capabilities: u8,
}

impl Udid {
    pub const ZERO: Self = Self {
        vendor_specific_id: [0; 4],
        subsystem_device_id: [0; 2],
        subsystem_vendor_id: [0; 2],
        interface: [0; 2],
        device_id: [0; 2],
        vendor_id: [0; 2],
        version: 0,
        device_capabilities: 0,
    };

    /// Builds a UDID from its 16 bytes in wire order (capabilities first).
    #[must_use]
    pub fn from_wire(wire: [u8; UDID_LENGTH]) -> Self {
        let mut bytes = wire;
        bytes.reverse();
        Self::from_storage(bytes)
    }

    /// Builds a UDID from bytes in storage order (capabilities last).
    #[must_use]
    pub fn from_storage(bytes: [u8; UDID_LENGTH]) -> Self {
        Self::read_from_bytes(&bytes).unwrap_or_default()
    }

    /// Byte `index` in storage order; out of range reads return zero.
    #[must_use]
    pub fn byte(&self, index: usize) -> u8 {
        self.as_bytes().get(index).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn address_type(&self) -> AddressType {
        match self.device_capabilities & UDID_ADDRESS_TYPE_MASK {
            0x00 => AddressType::Fixed,
            0x40 => AddressType::DynamicPersistent,
            0x80 => AddressType::DynamicVolatile,
            _ => AddressType::Random,
        }
    }

    #[must_use]
    pub fn pec_supported(&self) -> bool {
        self.device_capabilities & UDID_PEC_SUPPORTED != 0
    }

    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        u16::from_le_bytes(self.vendor_id)
    }

    #[must_use]
    pub fn device_id(&self) -> u16 {
        u16::from_le_bytes(self.device_id)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmbusConfig {
    pub frequency: FrequencyClass,
    pub log_level: LogLevel,
}

pub struct SmbusConfigBuilder {
    frequency: FrequencyClass,
    log_level: Option<LogLevel>,
}

impl Default for SmbusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SmbusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frequency: FrequencyClass::Standard,
            log_level: None,
        }
    }
    #[must_use]
    pub fn frequency(mut self, frequency: FrequencyClass) -> Self {
        self.frequency = frequency;
        self
    }
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }
    #[must_use]
    pub fn build(self) -> SmbusConfig {
        SmbusConfig {
            frequency: self.frequency,
            log_level: self.log_level.unwrap_or(LogLevel::Error),
        }
    }
}

/// Parameters for a new SMBus target instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    pub address: u8,
    pub udid: Udid,
    pub arp_capability: ArpCapability,
    /// Device answers quick commands, send byte and receive byte only.
    pub simple_device: bool,
}

impl InstanceConfig {
    #[must_use]
    pub fn new(address: u8, arp_capability: ArpCapability) -> Self {
        Self {
            address,
            udid: Udid::default(),
            arp_capability,
            simple_device: false,
        }
    }
    #[must_use]
    pub fn udid(mut self, udid: Udid) -> Self {
        self.udid = udid;
        self
    }
    #[must_use]
    pub fn simple_device(mut self, simple: bool) -> Self {
        self.simple_device = simple;
        self
    }
}

/// Per-protocol message counters for one instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageStats {
    pub initiated: [u32; PROTOCOL_COUNT],
    pub completed: [u32; PROTOCOL_COUNT],
}

impl MessageStats {
    pub const fn new() -> Self {
        Self {
            initiated: [0; PROTOCOL_COUNT],
            completed: [0; PROTOCOL_COUNT],
        }
    }

    #[must_use]
    pub fn initiated(&self, protocol: Protocol) -> u32 {
        protocol
            .stats_index()
            .and_then(|i| self.initiated.get(i).copied())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn completed(&self, protocol: Protocol) -> u32 {
        protocol
            .stats_index()
            .and_then(|i| self.completed.get(i).copied())
            .unwrap_or(0)
    }

    pub(crate) fn note_initiated(&mut self, protocol: Protocol) {
        if let Some(count) = protocol
            .stats_index()
            .and_then(|i| self.initiated.get_mut(i))
        {
            *count = count.wrapping_add(1);
        }
    }

    pub(crate) fn note_completed(&mut self, protocol: Protocol) {
        if let Some(count) = protocol
            .stats_index()
            .and_then(|i| self.completed.get_mut(i))
        {
            *count = count.wrapping_add(1);
        }
    }
}

impl Default for MessageStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub ip_major: u16,
    pub ip_minor: u16,
    pub sw_major: u8,
    pub sw_minor: u8,
    pub sw_patch: u8,
    /// Set on builds carrying a pre-release tag.
    pub sw_dev_build: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn protocol_round_trips_through_u8() {
        assert_eq!(Protocol::from_u8(0), Some(Protocol::QuickCommandLo));
        assert_eq!(Protocol::from_u8(23), Some(Protocol::None));
        assert_eq!(Protocol::from_u8(26), Some(Protocol::I2cWriteRead));
        assert_eq!(Protocol::from_u8(28), None);
    }

    #[test]
    fn protocol_classes() {
        assert!(Protocol::Read64.is_smbus());
        assert!(Protocol::ResetDeviceDirected.is_smbus());
        assert!(!Protocol::None.is_smbus());
        assert!(!Protocol::I2cRead.is_smbus());
        assert!(Protocol::GetUdid.is_arp());
        assert!(!Protocol::HostNotify.is_arp());
        assert_eq!(Protocol::None.stats_index(), None);
        assert_eq!(Protocol::I2cWrite.stats_index(), Some(24));
        assert_eq!(Protocol::ProcessCall.fixed_read_length(), Some(2));
        assert_eq!(Protocol::Write32.fixed_write_length(), Some(4));
    }

    #[test]
    fn udid_wire_order_is_reversed_storage() {
        let udid = Udid::from_wire(hex!("c1 10 1022 1234 0004 0000 0000 deadbeef"));
        assert_eq!(udid.device_capabilities, 0xC1);
        assert_eq!(udid.byte(15), 0xC1);
        assert_eq!(udid.byte(0), 0xEF);
        assert_eq!(udid.vendor_id(), 0x1022);
        assert_eq!(udid.device_id(), 0x1234);
        assert_eq!(udid.address_type(), AddressType::Random);
        assert!(udid.pec_supported());
        assert_eq!(udid.byte(16), 0);
    }

    #[test]
    fn config_builder_defaults() {
        let config = SmbusConfigBuilder::new().build();
        assert_eq!(config.frequency, FrequencyClass::Standard);
        assert_eq!(config.log_level, LogLevel::Error);
        let config = SmbusConfigBuilder::default()
            .frequency(FrequencyClass::FastPlus)
            .log_level(LogLevel::Debug)
            .build();
        assert_eq!(config.frequency.bus_frequency().raw(), 1_000_000);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn stats_ignore_none_protocols() {
        let mut stats = MessageStats::new();
        stats.note_initiated(Protocol::None);
        stats.note_initiated(Protocol::BlockRead);
        stats.note_completed(Protocol::BlockRead);
        stats.note_completed(Protocol::I2cNone);
        assert_eq!(stats.initiated(Protocol::BlockRead), 1);
        assert_eq!(stats.completed(Protocol::BlockRead), 1);
        assert_eq!(stats.initiated.iter().sum::<u32>(), 1);
    }
}
