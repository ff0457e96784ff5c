// Licensed under the Apache-2.0 license

//! Descriptor FIFO encoding.
//!
//! Each bus phase is queued to the IP as a single 32-bit word carrying a 4-bit
//! opcode and an 8-bit payload. Writes are non-blocking: when the FIFO reports
//! full the descriptor is not written and `nb::Error::WouldBlock` is returned
//! so the state machine can retry on the next almost-empty event.

use core::convert::Infallible;

use super::registers::{SmbusFields, SmbusRegisters};

pub const ID_FIELD_POSITION: u32 = 8;
pub const PAYLOAD_MASK: u32 = 0xFF;

const READ_BIT: u8 = 0x01;

/// Whether to consult the FIFO-full flag before writing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FifoCheck {
    Checked,
    /// Skip the status read. Only honoured by descriptors issued from FIFO
    /// top-up loops that already sized the write against the fill level.
    Unchecked,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetDescriptor {
    /// Send one data byte to the controller.
    Read(u8),
    ReadPec,
    WriteAck,
    WriteNack,
    WritePec,
}

impl TargetDescriptor {
    #[must_use]
    pub fn opcode(self) -> u32 {
        match self {
            Self::WriteAck => 0x0,
            Self::WriteNack => 0x1,
            Self::WritePec => 0x2,
            Self::Read(_) => 0x8,
            Self::ReadPec => 0x9,
        }
    }

    #[must_use]
    pub fn encode(self) -> u32 {
        let payload = match self {
            Self::Read(data) => data,
            _ => 0,
        };
        (self.opcode() << ID_FIELD_POSITION) | u32::from(payload)
    }

    fn allows_unchecked(self) -> bool {
        self == Self::WriteAck
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerDescriptor {
    /// Start condition plus address byte for a write.
    WriteStart(u8),
    WriteQuick(u8),
    WriteByte(u8),
    /// Last data byte followed by a stop condition.
    WriteStop(u8),
    WritePec,
    /// Start condition plus address byte for a read.
    ReadStart(u8),
    ReadQuick(u8),
    ReadByte,
    ReadStop,
    ReadPec,
}

impl ControllerDescriptor {
    #[must_use]
    pub fn opcode(self) -> u32 {
        match self {
            Self::WriteStart(_) => 0x0,
            Self::WriteQuick(_) => 0x1,
            Self::WriteByte(_) => 0x2,
            Self::WriteStop(_) => 0x3,
            Self::WritePec => 0x4,
            Self::ReadStart(_) => 0x8,
            Self::ReadQuick(_) => 0x9,
            Self::ReadByte => 0xA,
            Self::ReadStop => 0xB,
            Self::ReadPec => 0xC,
        }
    }

    #[must_use]
    pub fn payload(self) -> u8 {
        match self {
            Self::WriteStart(dest) | Self::WriteQuick(dest) => dest << 1,
            Self::ReadStart(dest) | Self::ReadQuick(dest) => (dest << 1) | READ_BIT,
            Self::WriteByte(data) | Self::WriteStop(data) => data,
            Self::WritePec | Self::ReadByte | Self::ReadStop | Self::ReadPec => 0,
        }
    }

    #[must_use]
    pub fn encode(self) -> u32 {
        (self.opcode() << ID_FIELD_POSITION) | u32::from(self.payload())
    }

    fn allows_unchecked(self) -> bool {
        matches!(self, Self::WriteByte(_) | Self::ReadByte)
    }
}

/// Queues a target-side descriptor.
///
/// # Errors
///
/// `nb::Error::WouldBlock` if the target descriptor FIFO is full.
pub fn write_target<R: SmbusRegisters + ?Sized>(
    regs: &mut R,
    descriptor: TargetDescriptor,
    check: FifoCheck,
) -> nb::Result<(), Infallible> {
    let skip = check == FifoCheck::Unchecked && descriptor.allows_unchecked();
    if !skip && regs.tgt_desc().is_full() {
        return Err(nb::Error::WouldBlock);
    }
    regs.write_tgt_desc_fifo(descriptor.encode());
    Ok(())
}

/// Queues a controller-side descriptor.
///
/// # Errors
///
/// `nb::Error::WouldBlock` if the controller descriptor FIFO is full.
pub fn write_controller<R: SmbusRegisters + ?Sized>(
    regs: &mut R,
    descriptor: ControllerDescriptor,
    check: FifoCheck,
) -> nb::Result<(), Infallible> {
    let skip = check == FifoCheck::Unchecked && descriptor.allows_unchecked();
    if !skip && regs.ctrl_desc().is_full() {
        return Err(nb::Error::WouldBlock);
    }
    regs.write_ctrl_desc_fifo(descriptor.encode());
    Ok(())
}
