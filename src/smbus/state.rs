// Licensed under the Apache-2.0 license

//! Per-instance protocol state machine.
//!
//! Every event popped from an instance queue lands in [`Profile::fsm`], which
//! dispatches on the instance's current [`State`]. Target states drive the
//! target descriptor FIFO in response to a remote controller; controller
//! states sequence the descriptors of a transaction started through
//! `initiate_command` or the I2C facade.
//!
//! Events a state does not expect fall through to a shared handler: timeouts
//! are reported as warnings, bus faults abort the transaction and anything
//! else is logged and aborted.

use super::common::{
    Protocol, Status, FIFO_SPACE_FOR_TWO_BYTES, HALF_FIFO_DEPTH, HOST_NOTIFY_ADDRESS,
    MAX_FIFO_EMPTY_WHILE_IN_DONE, PARTIAL_FILL_SIZE, UNEXPECTED_READ_DATA,
};
use super::descriptor::{
    write_controller, ControllerDescriptor as Ctlr, FifoCheck, TargetDescriptor as Tgt,
};
use super::event::Event;
use super::instance::Instance;
use super::profile::Profile;
use super::registers::{RegisterBlock, SmbusFields, SmbusRegisters};
use crate::common::Logger;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Initial,
    AwaitingCommandByte,
    AwaitingBlockSize,
    AwaitingData,
    AwaitingRead,
    ReadyToSendByte,
    CheckIfPecRequired,
    AwaitingDone,
    ControllerSendCommand,
    ControllerSendReadStart,
    ControllerReadBlockSize,
    ControllerReadByte,
    ControllerReadPec,
    ControllerReadDone,
    ControllerWriteByte,
}

const STATE_TABLE: [State; 15] = [
    State::Initial,
    State::AwaitingCommandByte,
    State::AwaitingBlockSize,
    State::AwaitingData,
    State::AwaitingRead,
    State::ReadyToSendByte,
    State::CheckIfPecRequired,
    State::AwaitingDone,
    State::ControllerSendCommand,
    State::ControllerSendReadStart,
    State::ControllerReadBlockSize,
    State::ControllerReadByte,
    State::ControllerReadPec,
    State::ControllerReadDone,
    State::ControllerWriteByte,
];

impl State {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        STATE_TABLE.get(usize::from(value)).copied()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::AwaitingCommandByte => "AWAITING_COMMAND_BYTE",
            Self::AwaitingBlockSize => "AWAITING_BLOCK_SIZE",
            Self::AwaitingData => "AWAITING_DATA",
            Self::AwaitingRead => "AWAITING_READ",
            Self::ReadyToSendByte => "READY_TO_SEND_BYTE",
            Self::CheckIfPecRequired => "CHECK_IF_PEC_REQUIRED",
            Self::AwaitingDone => "AWAITING_DONE",
            Self::ControllerSendCommand => "CONTROLLER_SEND_COMMAND",
            Self::ControllerSendReadStart => "CONTROLLER_SEND_READ_START",
            Self::ControllerReadBlockSize => "CONTROLLER_READ_BLOCK_SIZE",
            Self::ControllerReadByte => "CONTROLLER_READ_BYTE",
            Self::ControllerReadPec => "CONTROLLER_READ_PEC",
            Self::ControllerReadDone => "CONTROLLER_READ_DONE",
            Self::ControllerWriteByte => "CONTROLLER_WRITE_BYTE",
        }
    }
}

/// Protocols whose payload a remote controller writes to our target.
fn is_target_write(protocol: Protocol) -> bool {
    matches!(
        protocol,
        Protocol::BlockWrite
            | Protocol::Write64
            | Protocol::Write32
            | Protocol::WriteWord
            | Protocol::WriteByte
            | Protocol::SendByte
    )
}

/// Target protocols that finish with an application-level result.
fn is_target_data(protocol: Protocol) -> bool {
    protocol.is_target_read() || is_target_write(protocol) || protocol == Protocol::HostNotify
        || protocol == Protocol::None
}

fn is_get_udid(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::GetUdid | Protocol::GetUdidDirected)
}

/// Controller protocols that stream `send` out after the command byte.
pub(crate) fn is_controller_write(protocol: Protocol) -> bool {
    matches!(
        protocol,
        Protocol::BlockWrite
            | Protocol::WriteByte
            | Protocol::WriteWord
            | Protocol::Write32
            | Protocol::Write64
            | Protocol::ProcessCall
            | Protocol::BlockWriteBlockReadProcessCall
            | Protocol::SendByte
            | Protocol::HostNotify
            | Protocol::I2cWrite
            | Protocol::I2cWriteRead
    )
}

/// Controller reads whose length comes from the first received byte.
fn is_controller_block_read(protocol: Protocol) -> bool {
    matches!(
        protocol,
        Protocol::BlockRead
            | Protocol::BlockWriteBlockReadProcessCall
            | Protocol::GetUdid
            | Protocol::GetUdidDirected
    )
}

/// Controller reads topped up from the descriptor almost-empty event.
fn is_streamed_read(protocol: Protocol) -> bool {
    is_controller_block_read(protocol)
        || matches!(protocol, Protocol::I2cRead | Protocol::I2cWriteRead)
}

fn is_controller_read(protocol: Protocol) -> bool {
    is_streamed_read(protocol)
        || matches!(
            protocol,
            Protocol::Read64
                | Protocol::Read32
                | Protocol::ReadWord
                | Protocol::ReadByte
                | Protocol::ProcessCall
                | Protocol::ReceiveByte
        )
}

fn capped_partial(remaining: usize) -> u32 {
    remaining.min(HALF_FIFO_DEPTH as usize) as u32
}

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    pub(crate) fn fsm(&mut self, inst: &mut Instance<'a>, event: Event) {
        self.log.fsm(inst.index, inst.state, event);
        match inst.state {
            State::Initial => self.initial(inst, event),
            State::AwaitingCommandByte => self.awaiting_command_byte(inst, event),
            State::AwaitingBlockSize => self.awaiting_block_size(inst, event),
            State::AwaitingData => self.awaiting_data(inst, event),
            State::AwaitingRead => self.awaiting_read(inst, event),
            State::ReadyToSendByte => self.ready_to_send_byte(inst, event),
            State::CheckIfPecRequired => self.check_if_pec_required(inst, event),
            State::AwaitingDone => self.awaiting_done(inst, event),
            State::ControllerSendCommand => self.controller_send_command(inst, event),
            State::ControllerSendReadStart => self.controller_send_read_start(inst, event),
            State::ControllerReadBlockSize => self.controller_read_block_size(inst, event),
            State::ControllerReadByte => self.controller_read_byte(inst, event),
            State::ControllerReadPec => self.controller_read_pec(inst, event),
            State::ControllerReadDone => self.controller_read_done(inst, event),
            State::ControllerWriteByte => self.controller_write_byte(inst, event),
        }
    }

    pub(crate) fn abort(&mut self, inst: &mut Instance<'a>) {
        self.reset_all_data(inst);
        Self::next_state(inst, State::Initial);
    }

    /// Shared handling for events a state has no specific use for.
    fn unhandled(&mut self, inst: &mut Instance<'a>, event: Event) {
        if event.is_warning() {
            Self::bus_warning(inst, event);
        } else if event.is_target_error() {
            Self::bus_error(inst, event);
            if inst.state == State::AwaitingDone {
                self.announce(inst, Status::Error);
            }
            self.abort(inst);
        } else if event.is_controller_error() {
            Self::bus_error(inst, event);
            self.announce(inst, Status::Error);
            self.abort(inst);
        } else {
            self.log.error(inst.index, u32::from(event.code()), line!());
            self.abort(inst);
        }
    }

    fn enable_controller(&mut self) {
        self.regs.write_ctrl_enable(1);
    }

    fn initial(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtWrite => {
                if inst.simple_device {
                    inst.protocol = Protocol::SendByte;
                    inst.expected = 1;
                    inst.partial = 1;
                    inst.stats.note_initiated(inst.protocol);
                    self.regs.write_tgt_rx_fill_threshold(1);
                    self.ack(inst);
                    Self::next_state(inst, State::AwaitingData);
                } else if inst.is_i2c {
                    Self::next_state(inst, State::AwaitingData);
                } else {
                    Self::next_state(inst, State::AwaitingCommandByte);
                }
            }
            Event::TgtRead => {
                if inst.simple_device {
                    inst.protocol = Protocol::ReceiveByte;
                    inst.stats.note_initiated(inst.protocol);
                    self.get_data(inst);
                    Self::next_state(inst, State::ReadyToSendByte);
                } else if inst.is_i2c {
                    self.i2c_get_data(inst);
                    Self::next_state(inst, State::ReadyToSendByte);
                } else {
                    self.target_descriptor(inst, Tgt::Read(UNEXPECTED_READ_DATA));
                    self.log.error(inst.index, u32::from(event.code()), line!());
                    self.abort(inst);
                }
            }
            Event::SendNextByte => self.start_controller(inst),
            _ => self.unhandled(inst, event),
        }
    }

    /// First descriptors of a controller transaction.
    fn start_controller(&mut self, inst: &mut Instance<'a>) {
        inst.stats.note_initiated(inst.protocol);
        let destination = inst.destination;
        match inst.protocol {
            Protocol::QuickCommandLo => {
                self.controller_descriptor(inst, Ctlr::WriteQuick(destination));
                self.enable_controller();
                Self::next_state(inst, State::AwaitingDone);
            }
            Protocol::QuickCommandHi => {
                self.controller_descriptor(inst, Ctlr::ReadQuick(destination));
                self.enable_controller();
                Self::next_state(inst, State::AwaitingDone);
            }
            Protocol::ReceiveByte => {
                inst.expected = 1;
                inst.partial = 1;
                self.create_event(inst, Event::SendNextByte);
                Self::next_state(inst, State::ControllerSendReadStart);
            }
            Protocol::I2cWrite | Protocol::I2cWriteRead => {
                self.controller_descriptor(inst, Ctlr::WriteStart(destination));
                self.create_event(inst, Event::SendNextByte);
                Self::next_state(inst, State::ControllerWriteByte);
            }
            Protocol::I2cRead => {
                self.controller_descriptor(inst, Ctlr::ReadStart(destination));
                self.enable_controller();
                inst.partial = capped_partial(inst.expected);
                if inst.partial > 0 {
                    self.regs.write_ctrl_rx_fill_threshold(inst.partial);
                }
                Self::next_state(inst, State::ControllerReadByte);
            }
            _ => {
                self.controller_descriptor(inst, Ctlr::WriteStart(destination));
                self.create_event(inst, Event::SendNextByte);
                Self::next_state(inst, State::ControllerSendCommand);
            }
        }
    }

    fn awaiting_command_byte(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtDescFifoAlmostEmpty => {}
            Event::TgtData => {
                if inst.address == HOST_NOTIFY_ADDRESS {
                    inst.protocol = Protocol::HostNotify;
                    inst.command = self.regs.tgt_rx_byte();
                    inst.expected = 2;
                    inst.partial = 2;
                    self.ack_uncounted(inst);
                    Self::next_state(inst, State::AwaitingData);
                } else if Self::is_arp_responder(inst) {
                    self.arp_command_byte(inst);
                } else {
                    self.get_protocol(inst);
                    self.dispatch_target_protocol(inst);
                }
                inst.stats.note_initiated(inst.protocol);
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn dispatch_target_protocol(&mut self, inst: &mut Instance<'a>) {
        match inst.protocol {
            Protocol::BlockRead
            | Protocol::Read64
            | Protocol::Read32
            | Protocol::ReadWord
            | Protocol::ReadByte => {
                self.get_data(inst);
                self.ack_uncounted(inst);
                Self::next_state(inst, State::AwaitingRead);
            }
            Protocol::Write64
            | Protocol::Write32
            | Protocol::WriteWord
            | Protocol::ProcessCall
            | Protocol::WriteByte => {
                inst.expected = inst.protocol.fixed_write_length().unwrap_or(1) as usize;
                self.regs.write_tgt_rx_fill_threshold(inst.expected as u32);
                // Command byte plus every data byte.
                for _ in 0..=inst.expected {
                    if !self.ack(inst) {
                        break;
                    }
                }
                if !self.regs.tgt_rx().is_empty() {
                    self.create_event(inst, Event::TgtData);
                }
                Self::next_state(inst, State::AwaitingData);
            }
            Protocol::BlockWrite | Protocol::BlockWriteBlockReadProcessCall => {
                self.ack_uncounted(inst);
                Self::next_state(inst, State::AwaitingBlockSize);
            }
            _ => {
                self.nack(inst);
                Self::next_state(inst, State::AwaitingDone);
            }
        }
    }

    fn awaiting_block_size(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtDescFifoAlmostEmpty => {}
            Event::TgtData
                if matches!(
                    inst.protocol,
                    Protocol::BlockWriteBlockReadProcessCall
                        | Protocol::BlockWrite
                        | Protocol::AssignAddress
                ) =>
            {
                if self.regs.tgt_rx().is_empty() {
                    return;
                }
                inst.expected = usize::from(self.regs.tgt_rx_byte());
                self.ack_uncounted(inst);
                inst.receive_index = 0;
                inst.partial = if inst.expected < PARTIAL_FILL_SIZE as usize {
                    1
                } else {
                    PARTIAL_FILL_SIZE
                };
                self.regs.write_tgt_rx_fill_threshold(inst.partial);
                if inst.protocol == Protocol::BlockWriteBlockReadProcessCall && inst.expected == 0 {
                    self.get_data(inst);
                    Self::next_state(inst, State::AwaitingRead);
                } else {
                    Self::next_state(inst, State::AwaitingData);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn awaiting_data(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtDescFifoAlmostEmpty => {
                if inst.protocol != Protocol::AssignAddress {
                    let limit = if inst.is_i2c {
                        inst.receive_index
                    } else {
                        inst.expected
                    };
                    self.top_up_acks(inst, limit);
                }
            }
            Event::TgtRead => {
                if inst.protocol == Protocol::HostNotify {
                    Self::bus_error(inst, event);
                    self.announce(inst, Status::Error);
                    self.abort(inst);
                } else if inst.is_i2c {
                    if !inst.nack_sent && inst.receive_index > 0 {
                        Self::i2c_write_data(inst);
                    }
                    self.i2c_get_data(inst);
                    Self::next_state(inst, State::ReadyToSendByte);
                } else {
                    // Replayed once the write half has been received.
                    inst.read_deferred = true;
                }
            }
            Event::TgtDone => {
                if inst.is_i2c {
                    if !inst.nack_sent && inst.receive_index > 0 {
                        Self::i2c_write_data(inst);
                    }
                    self.create_event(inst, Event::TgtDone);
                    Self::next_state(inst, State::AwaitingDone);
                } else {
                    self.announce(inst, Status::Error);
                    Self::bus_error(inst, event);
                    self.abort(inst);
                }
            }
            Event::TgtData => {
                if inst.is_i2c {
                    self.read_target_fifo(inst);
                } else if inst.protocol == Protocol::AssignAddress {
                    self.arp_assign_bytes(inst);
                } else if matches!(
                    inst.protocol,
                    Protocol::HostNotify
                        | Protocol::BlockWriteBlockReadProcessCall
                        | Protocol::ProcessCall
                ) || is_target_write(inst.protocol)
                {
                    self.receive_write_payload(inst);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn receive_write_payload(&mut self, inst: &mut Instance<'a>) {
        self.read_target_fifo(inst);
        if inst.receive_index < inst.expected {
            inst.partial = if inst.expected - inst.receive_index < PARTIAL_FILL_SIZE as usize {
                1
            } else {
                PARTIAL_FILL_SIZE
            };
            self.regs.write_tgt_rx_fill_threshold(inst.partial);
            return;
        }

        self.regs.write_tgt_rx_fill_threshold(1);
        if matches!(
            inst.protocol,
            Protocol::BlockWriteBlockReadProcessCall | Protocol::ProcessCall
        ) {
            if !inst.nack_sent {
                self.write_data(inst);
            }
            self.get_data(inst);
            Self::next_state(inst, State::AwaitingRead);
        } else {
            Self::next_state(inst, State::AwaitingDone);
        }
        if inst.read_deferred {
            inst.read_deferred = false;
            self.create_event(inst, Event::TgtRead);
        }
    }

    fn awaiting_read(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtDescFifoAlmostEmpty => {
                let limit = inst.expected;
                self.top_up_acks(inst, limit);
            }
            Event::TgtRead if inst.protocol.is_target_read() || is_get_udid(inst.protocol) => {
                Self::next_state(inst, State::ReadyToSendByte);
            }
            Event::TgtData => {}
            _ => self.unhandled(inst, event),
        }
    }

    fn ready_to_send_byte(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::TgtDescFifoAlmostEmpty
                if inst.protocol.is_target_read() || is_get_udid(inst.protocol) || inst.is_i2c =>
            {
                for _ in 0..self.target_space() {
                    if inst.send_index >= inst.send_size {
                        break;
                    }
                    let byte = inst.next_send_byte();
                    if !self.target_descriptor(inst, Tgt::Read(byte)) {
                        break;
                    }
                    inst.send_index += 1;
                }
                if inst.send_index >= inst.send_size {
                    self.create_event(inst, Event::IsPecRequired);
                    Self::next_state(inst, State::CheckIfPecRequired);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn check_if_pec_required(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            // A full FIFO on the first attempt is retried once it drains.
            Event::IsPecRequired | Event::TgtDescFifoAlmostEmpty => {
                let pec = if is_get_udid(inst.protocol) {
                    true
                } else if inst.protocol.is_target_read() || inst.is_i2c {
                    inst.pec_required
                } else {
                    self.unhandled(inst, event);
                    return;
                };
                if !pec || self.target_descriptor(inst, Tgt::ReadPec) {
                    Self::next_state(inst, State::AwaitingDone);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn awaiting_done(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::CtlrDescFifoAlmostEmpty => {}
            Event::TgtDescFifoAlmostEmpty => {
                inst.fifo_empty_count = inst.fifo_empty_count.saturating_add(1);
                if inst.fifo_empty_count > MAX_FIFO_EMPTY_WHILE_IN_DONE {
                    self.nack(inst);
                    Self::bus_error(inst, event);
                    self.announce(inst, Status::Error);
                    self.abort(inst);
                    return;
                }
                if !inst.nack_sent {
                    let limit = inst.expected;
                    self.top_up_acks(inst, limit);
                }
                if inst.receive_index > inst.expected {
                    if inst.pec_required && !inst.pec_sent {
                        if self.target_descriptor(inst, Tgt::WritePec) {
                            inst.pec_sent = true;
                        }
                    } else if inst.simple_device {
                        self.nack(inst);
                    }
                }
            }
            Event::TgtRead => self.nack(inst),
            Event::TgtDone => self.target_done(inst),
            Event::TgtData
                if inst.is_i2c || is_target_write(inst.protocol) || inst.protocol.is_arp() =>
            {
                self.read_target_fifo(inst);
            }
            Event::CtlrDone => {
                if inst.protocol == Protocol::BlockRead {
                    self.write_data(inst);
                }
                inst.stats.note_completed(inst.protocol);
                self.announce(inst, Status::Success);
                self.abort(inst);
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn target_done(&mut self, inst: &mut Instance<'a>) {
        inst.stats.note_completed(inst.protocol);
        if inst.is_i2c {
            if !inst.nack_sent {
                self.announce(inst, Status::Success);
            }
            self.abort(inst);
            return;
        }

        let protocol = inst.protocol;
        if is_target_write(protocol) && !inst.nack_sent {
            self.write_data(inst);
        }
        if protocol == Protocol::HostNotify {
            self.write_data(inst);
        }
        if protocol.is_arp() {
            self.arp_done(inst);
        } else if is_target_data(protocol) {
            let status = if inst.nack_sent {
                Status::Error
            } else {
                Status::Success
            };
            self.announce(inst, status);
        }
        self.abort(inst);
    }

    fn controller_send_command(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::SendNextByte | Event::CtlrDescFifoAlmostEmpty => {
                let protocol = inst.protocol;
                if protocol == Protocol::SendByte {
                    self.create_event(inst, Event::SendNextByte);
                    Self::next_state(inst, State::ControllerWriteByte);
                    return;
                }
                let next = if is_controller_block_read(protocol)
                    || matches!(
                        protocol,
                        Protocol::Read64 | Protocol::Read32 | Protocol::ReadWord | Protocol::ReadByte
                    ) {
                    State::ControllerSendReadStart
                } else if is_controller_write(protocol) || protocol.is_arp() {
                    State::ControllerWriteByte
                } else {
                    self.unhandled(inst, event);
                    return;
                };
                if self.controller_descriptor(inst, Ctlr::WriteByte(inst.command)) {
                    self.create_event(inst, Event::SendNextByte);
                    Self::next_state(inst, next);
                } else {
                    self.log.error(inst.index, u32::from(inst.command), line!());
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn controller_write_byte(&mut self, inst: &mut Instance<'a>, event: Event) {
        if !matches!(event, Event::SendNextByte | Event::CtlrDescFifoAlmostEmpty) {
            self.unhandled(inst, event);
            return;
        }
        let protocol = inst.protocol;
        match protocol {
            Protocol::AssignAddress => {
                for _ in 0..self.controller_space() {
                    if inst.send_size == 0 {
                        break;
                    }
                    let byte = inst.next_send_byte();
                    if write_controller(&mut self.regs, Ctlr::WriteByte(byte), FifoCheck::Unchecked)
                        .is_err()
                    {
                        break;
                    }
                    inst.send_index += 1;
                    inst.send_size -= 1;
                }
                if inst.send_size == 0 {
                    self.controller_descriptor(inst, Ctlr::WritePec);
                    Self::next_state(inst, State::AwaitingDone);
                }
                self.enable_controller();
            }
            Protocol::PrepareToArp | Protocol::ResetDevice | Protocol::ResetDeviceDirected => {
                self.controller_descriptor(inst, Ctlr::WritePec);
                self.enable_controller();
                Self::next_state(inst, State::AwaitingDone);
            }
            p if is_controller_write(p) => {
                if inst.send_size > 1 {
                    for _ in 0..self.controller_space() {
                        if inst.send_size <= 1 {
                            break;
                        }
                        let byte = inst.next_send_byte();
                        if write_controller(
                            &mut self.regs,
                            Ctlr::WriteByte(byte),
                            FifoCheck::Unchecked,
                        )
                        .is_err()
                        {
                            break;
                        }
                        inst.send_index += 1;
                        inst.send_size -= 1;
                    }
                    self.enable_controller();
                } else {
                    self.write_last_byte(inst);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn write_last_byte(&mut self, inst: &mut Instance<'a>) {
        let last = inst.next_send_byte();
        match inst.protocol {
            Protocol::ProcessCall
            | Protocol::BlockWriteBlockReadProcessCall
            | Protocol::I2cWriteRead => {
                if self.controller_descriptor(inst, Ctlr::WriteByte(last)) {
                    self.create_event(inst, Event::SendNextByte);
                    Self::next_state(inst, State::ControllerSendReadStart);
                }
            }
            Protocol::HostNotify => {
                let written = self.controller_descriptor(inst, Ctlr::WriteStop(last));
                self.enable_controller();
                if written {
                    Self::next_state(inst, State::AwaitingDone);
                }
            }
            _ if inst.pec_for_transaction => {
                if self.regs.ctrl_desc().fill_level() <= FIFO_SPACE_FOR_TWO_BYTES {
                    self.controller_descriptor(inst, Ctlr::WriteByte(last));
                    self.controller_descriptor(inst, Ctlr::WritePec);
                    self.enable_controller();
                    Self::next_state(inst, State::AwaitingDone);
                }
            }
            _ => {
                let written = self.controller_descriptor(inst, Ctlr::WriteStop(last));
                self.enable_controller();
                if written {
                    Self::next_state(inst, State::AwaitingDone);
                }
            }
        }
    }

    fn controller_send_read_start(&mut self, inst: &mut Instance<'a>, event: Event) {
        if event != Event::SendNextByte {
            self.unhandled(inst, event);
            return;
        }
        let destination = inst.destination;
        match inst.protocol {
            Protocol::I2cWriteRead => {
                inst.descriptors_sent = 0;
                self.controller_descriptor(inst, Ctlr::ReadStart(destination));
                inst.partial = capped_partial(inst.expected);
                if inst.partial > 0 {
                    self.regs.write_ctrl_rx_fill_threshold(inst.partial);
                }
                if inst.expected == 0 {
                    self.controller_descriptor(inst, Ctlr::ReadStop);
                    self.enable_controller();
                    Self::next_state(inst, State::ControllerReadDone);
                } else {
                    self.enable_controller();
                    Self::next_state(inst, State::ControllerReadByte);
                }
            }
            p if is_controller_block_read(p) => {
                inst.descriptors_sent = 0;
                self.controller_descriptor(inst, Ctlr::ReadStart(destination));
                self.enable_controller();
                Self::next_state(inst, State::ControllerReadBlockSize);
            }
            p @ (Protocol::Read64
            | Protocol::Read32
            | Protocol::ReadWord
            | Protocol::ReadByte
            | Protocol::ProcessCall
            | Protocol::ReceiveByte) => {
                let length = p.fixed_read_length().unwrap_or(1);
                inst.expected = length as usize;
                inst.partial = length;
                inst.descriptors_sent = 0;
                self.regs.write_ctrl_rx_fill_threshold(inst.partial);
                self.controller_descriptor(inst, Ctlr::ReadStart(destination));
                let data_reads = if inst.pec_for_transaction {
                    inst.expected
                } else {
                    inst.expected - 1
                };
                for _ in 0..data_reads {
                    if self.controller_descriptor(inst, Ctlr::ReadByte) {
                        inst.descriptors_sent += 1;
                    }
                }
                let last = if inst.pec_for_transaction {
                    Ctlr::ReadPec
                } else {
                    Ctlr::ReadStop
                };
                if self.controller_descriptor(inst, last) {
                    inst.descriptors_sent += 1;
                }
                self.enable_controller();
                Self::next_state(inst, State::ControllerReadByte);
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn controller_read_block_size(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::CtlrDescFifoAlmostEmpty => {}
            Event::CtlrData if is_controller_block_read(inst.protocol) => {
                inst.expected = usize::from(self.regs.ctrl_rx_byte());
                inst.descriptors_sent = 0;
                inst.partial = capped_partial(inst.expected);
                if inst.partial > 0 {
                    self.regs.write_ctrl_rx_fill_threshold(inst.partial);
                }
                if inst.pec_for_transaction {
                    self.controller_descriptor(inst, Ctlr::ReadByte);
                    if inst.expected == 0 {
                        self.controller_descriptor(inst, Ctlr::ReadPec);
                    }
                    self.enable_controller();
                    Self::next_state(inst, State::ControllerReadByte);
                } else if inst.expected == 0 {
                    self.controller_descriptor(inst, Ctlr::ReadStop);
                    self.enable_controller();
                    Self::next_state(inst, State::ControllerReadDone);
                } else {
                    self.controller_descriptor(inst, Ctlr::ReadByte);
                    self.enable_controller();
                    Self::next_state(inst, State::ControllerReadByte);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    /// Queues read descriptors for the remaining bytes, ending with a stop or
    /// a PEC read.
    fn top_up_reads(&mut self, inst: &mut Instance<'a>) {
        for _ in 0..self.controller_space() {
            let remaining = inst.expected.saturating_sub(inst.descriptors_sent);
            if inst.pec_for_transaction {
                if remaining > 0 {
                    if write_controller(&mut self.regs, Ctlr::ReadByte, FifoCheck::Unchecked)
                        .is_err()
                    {
                        break;
                    }
                    inst.descriptors_sent += 1;
                } else {
                    if inst.descriptors_sent == inst.expected
                        && self.controller_descriptor(inst, Ctlr::ReadPec)
                    {
                        inst.descriptors_sent += 1;
                    }
                    break;
                }
            } else if remaining > 1 {
                if write_controller(&mut self.regs, Ctlr::ReadByte, FifoCheck::Unchecked).is_err() {
                    break;
                }
                inst.descriptors_sent += 1;
            } else {
                if remaining == 1 && self.controller_descriptor(inst, Ctlr::ReadStop) {
                    inst.descriptors_sent += 1;
                }
                break;
            }
        }
        self.enable_controller();
    }

    fn controller_read_byte(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::CtlrDescFifoAlmostEmpty => {
                if is_streamed_read(inst.protocol) && inst.descriptors_sent < inst.expected {
                    self.top_up_reads(inst);
                }
            }
            Event::CtlrDone => {}
            Event::CtlrData if is_controller_read(inst.protocol) => {
                self.read_controller_fifo(inst);
                if inst.receive_index >= inst.expected {
                    self.regs.write_ctrl_rx_fill_threshold(1);
                    if !inst.pec_for_transaction || inst.receive_index > inst.expected {
                        Self::next_state(inst, State::ControllerReadDone);
                    }
                } else {
                    inst.partial = capped_partial(inst.expected - inst.receive_index);
                    self.regs.write_ctrl_rx_fill_threshold(inst.partial);
                }
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn controller_read_pec(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::CtlrData if is_controller_read(inst.protocol) && inst.pec_for_transaction => {
                self.controller_descriptor(inst, Ctlr::ReadPec);
                self.enable_controller();
                Self::next_state(inst, State::ControllerReadDone);
            }
            _ => self.unhandled(inst, event),
        }
    }

    fn controller_read_done(&mut self, inst: &mut Instance<'a>, event: Event) {
        match event {
            Event::CtlrData => self.read_controller_fifo(inst),
            Event::CtlrDescFifoAlmostEmpty => {
                let outstanding = inst.descriptors_sent < inst.expected
                    || (inst.pec_for_transaction && inst.descriptors_sent == inst.expected);
                if outstanding {
                    self.top_up_reads(inst);
                }
            }
            Event::CtlrDone => match inst.protocol {
                Protocol::I2cRead | Protocol::I2cWriteRead => {
                    Self::i2c_write_data(inst);
                    self.complete_controller(inst);
                }
                p if is_controller_read(p) => {
                    self.write_data(inst);
                    self.complete_controller(inst);
                }
                p if is_controller_write(p) || p.is_arp() => self.complete_controller(inst),
                _ => {}
            },
            _ => self.unhandled(inst, event),
        }
    }

    fn complete_controller(&mut self, inst: &mut Instance<'a>) {
        self.announce(inst, Status::Success);
        inst.stats.note_completed(inst.protocol);
        self.abort(inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smbus::common::{ArpCapability, InstanceConfig, INVALID_INSTANCE};
    use crate::smbus::profile::harness;
    use crate::smbus::registers::offset;
    use crate::smbus::traits::recorder::{Call, Recorder};

    const ACK: u32 = 0x000;
    const NACK: u32 = 0x100;

    #[test]
    fn state_names_and_codes() {
        assert_eq!(State::from_u8(0), Some(State::Initial));
        assert_eq!(State::from_u8(7), Some(State::AwaitingDone));
        assert_eq!(State::from_u8(14), Some(State::ControllerWriteByte));
        assert_eq!(State::from_u8(15), None);
        assert_eq!(State::ControllerReadDone.name(), "CONTROLLER_READ_DONE");
    }

    #[test]
    fn target_write_word() {
        let rec = Recorder::with_protocol(Protocol::WriteWord);
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        profile.inject(id, &[Event::TgtWrite]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingCommandByte);

        profile.regs.push_tgt_rx(&[0x20]);
        profile.inject(id, &[Event::TgtData]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingData);
        assert_eq!(profile.regs.tgt_desc, [ACK, ACK, ACK]);
        assert_eq!(profile.regs.last_write(offset::TGT_RX_FILL_THRESHOLD), Some(2));

        profile.regs.push_tgt_rx(&[0x34, 0x12]);
        profile.inject(id, &[Event::TgtData]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);

        profile.inject(id, &[Event::TgtDone]);
        let inst = profile.instance(id).unwrap();
        assert_eq!(inst.state(), State::Initial);
        assert_eq!(inst.previous_state(), State::AwaitingDone);
        assert_eq!(inst.stats().initiated(Protocol::WriteWord), 1);
        assert_eq!(inst.stats().completed(Protocol::WriteWord), 1);
        assert_eq!(
            rec.calls(),
            [
                Call::GetProtocol(0x20),
                Call::WriteData(0x20, vec![0x34, 0x12], 0),
                Call::Announce(0x20, 0, Status::Success),
            ]
        );
    }

    #[test]
    fn target_block_read() {
        let rec = Recorder::with_protocol(Protocol::BlockRead);
        rec.respond(&[3, 0x0A, 0x0B, 0x0C]);
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();

        profile.inject(id, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x30]);
        profile.inject(id, &[Event::TgtData]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingRead);

        profile.regs.clear_trace();
        profile.inject(id, &[Event::TgtRead, Event::TgtDescFifoAlmostEmpty]);
        assert_eq!(profile.regs.tgt_desc, [0x803, 0x80A, 0x80B, 0x80C]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);

        profile.inject(id, &[Event::TgtDone]);
        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert_eq!(rec.announced(), [Status::Success]);
        assert!(rec.written().is_empty());
    }

    #[test]
    fn early_read_in_process_call_is_replayed() {
        let rec = Recorder::with_protocol(Protocol::ProcessCall);
        rec.respond(&[0x55, 0x66]);
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();

        profile.inject(id, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x40]);
        profile.inject(id, &[Event::TgtData, Event::TgtRead]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingData);

        profile.regs.push_tgt_rx(&[0x01, 0x02]);
        profile.inject(id, &[Event::TgtData]);
        let inst = profile.instance(id).unwrap();
        assert_eq!(inst.state(), State::ReadyToSendByte);
        assert_eq!(inst.pending_events(), 0);
        assert_eq!(rec.written(), [vec![0x01, 0x02]]);
    }

    #[test]
    fn unknown_command_is_nacked() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        profile.inject(id, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x99]);
        profile.inject(id, &[Event::TgtData, Event::TgtDone]);

        assert_eq!(profile.regs.tgt_desc, [NACK]);
        assert_eq!(
            rec.calls(),
            [
                Call::GetProtocol(0x99),
                Call::Announce(0x99, 0, Status::Error)
            ]
        );
    }

    #[test]
    fn simple_device_send_byte() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(
                InstanceConfig::new(0x52, ArpCapability::NonArpCapable).simple_device(true),
                &rec,
            )
            .unwrap();

        profile.inject(id, &[Event::TgtWrite]);
        assert_eq!(profile.instance(id).unwrap().protocol(), Protocol::SendByte);
        profile.regs.push_tgt_rx(&[0x42]);
        profile.inject(id, &[Event::TgtData, Event::TgtDone]);

        assert_eq!(rec.written(), [vec![0x42]]);
        assert_eq!(rec.announced(), [Status::Success]);
    }

    #[test]
    fn target_error_aborts_and_warning_does_not() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();

        profile.inject(id, &[Event::TgtWrite, Event::TgtPhyTextTimeout]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingCommandByte);

        profile.inject(id, &[Event::TgtLoaError]);
        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert_eq!(
            rec.calls(),
            [
                Call::BusWarning(Event::TgtPhyTextTimeout),
                Call::BusError(Event::TgtLoaError)
            ]
        );
    }

    #[test]
    fn stalled_done_gives_up_after_bounded_retries() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.inject(id, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x99]);
        profile.inject(id, &[Event::TgtData]);

        let stalls = [Event::TgtDescFifoAlmostEmpty; MAX_FIFO_EMPTY_WHILE_IN_DONE as usize];
        profile.inject(id, &stalls);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);

        profile.inject(id, &[Event::TgtDescFifoAlmostEmpty]);
        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert!(rec
            .calls()
            .contains(&Call::BusError(Event::TgtDescFifoAlmostEmpty)));
        assert_eq!(rec.announced(), [Status::Error]);
    }

    #[test]
    fn controller_write_byte() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        let txid = profile
            .initiate_command(id, 0x20, 0x05, Protocol::WriteByte, &[0x7E], false)
            .unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x040, 0x205, 0x37E]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);

        profile.inject(id, &[Event::CtlrDone]);
        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert_eq!(profile.in_play, INVALID_INSTANCE);
        assert_eq!(rec.calls(), [Call::Announce(0x05, txid, Status::Success)]);
    }

    #[test]
    fn controller_read_word() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        let txid = profile
            .initiate_command(id, 0x20, 0x06, Protocol::ReadWord, &[], false)
            .unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x040, 0x206, 0x841, 0xA00, 0xB00]);
        assert_eq!(profile.instance(id).unwrap().state(), State::ControllerReadByte);

        profile.regs.push_ctrl_rx(&[0x11, 0x22]);
        profile.inject(id, &[Event::CtlrData]);
        assert_eq!(profile.instance(id).unwrap().state(), State::ControllerReadDone);

        profile.inject(id, &[Event::CtlrDone]);
        assert_eq!(
            rec.calls(),
            [
                Call::WriteData(0x06, vec![0x11, 0x22], txid),
                Call::Announce(0x06, txid, Status::Success)
            ]
        );
        assert_eq!(
            profile.instance(id).unwrap().stats().completed(Protocol::ReadWord),
            1
        );
    }

    #[test]
    fn controller_block_write_streams_payload() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        profile
            .initiate_command(id, 0x20, 0x07, Protocol::BlockWrite, &[3, 1, 2, 3], false)
            .unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x040, 0x207, 0x203, 0x201, 0x202]);
        assert_eq!(profile.instance(id).unwrap().state(), State::ControllerWriteByte);

        profile.inject(id, &[Event::CtlrDescFifoAlmostEmpty]);
        assert_eq!(profile.regs.ctrl_desc.last(), Some(&0x303));
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);
    }

    #[test]
    fn controller_write_byte_with_pec() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        profile.regs.clear_trace();

        profile
            .initiate_command(id, 0x20, 0x07, Protocol::WriteByte, &[0x99], true)
            .unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x040, 0x207, 0x299, 0x400]);
    }

    #[test]
    fn controller_nack_reports_error() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();

        let txid = profile
            .initiate_command(id, 0x20, 0x05, Protocol::WriteByte, &[0x7E], false)
            .unwrap();
        profile.inject(id, &[Event::CtlrNackError]);

        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert_eq!(profile.in_play, INVALID_INSTANCE);
        assert_eq!(
            rec.calls(),
            [
                Call::BusError(Event::CtlrNackError),
                Call::Announce(0x05, txid, Status::Error)
            ]
        );
    }

    #[test]
    fn controller_block_read_tops_up_descriptors() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();

        profile
            .initiate_command(id, 0x20, 0x08, Protocol::BlockRead, &[], false)
            .unwrap();
        assert_eq!(
            profile.instance(id).unwrap().state(),
            State::ControllerReadBlockSize
        );

        profile.regs.clear_trace();
        profile.regs.push_ctrl_rx(&[3]);
        profile.inject(id, &[Event::CtlrData]);
        assert_eq!(profile.regs.ctrl_desc, [0xA00]);

        profile.inject(id, &[Event::CtlrDescFifoAlmostEmpty]);
        assert_eq!(profile.regs.ctrl_desc, [0xA00, 0xA00, 0xA00, 0xB00]);

        profile.regs.push_ctrl_rx(&[7, 8, 9]);
        profile.inject(id, &[Event::CtlrData, Event::CtlrDone]);
        assert_eq!(rec.written(), [vec![7, 8, 9]]);
        assert_eq!(rec.announced(), [Status::Success]);
    }
}
