// Licensed under the Apache-2.0 license

//! Side effects shared by the state machine.
//!
//! Every state handler funnels its hardware and callback work through these
//! helpers so that FIFO resets, callback argument conventions and logging stay
//! identical across states.

use super::common::{
    LogLevel, Protocol, Status, ARP_INSTANCE_ID, DATA_SIZE_MAX, DEFAULT_ARP_ADDRESS,
    INVALID_INSTANCE,
};
use super::descriptor::{
    write_controller, write_target, ControllerDescriptor, FifoCheck, TargetDescriptor,
};
use super::event::Event;
use super::instance::Instance;
use super::log::LogEventType;
use super::profile::Profile;
use super::registers::{RegisterBlock, SmbusFields, SmbusRegisters};
use crate::common::Logger;

/// Decoded ARP command byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ArpCommand {
    Prepare,
    Reset,
    GetUdid,
    Assign,
    GetUdidDirected(u8),
    ResetDirected(u8),
    Reserved,
}

impl ArpCommand {
    pub(crate) fn decode(command: u8) -> Self {
        match command {
            0x01 => Self::Prepare,
            0x02 => Self::Reset,
            0x03 => Self::GetUdid,
            0x04 => Self::Assign,
            0x00 | 0x05..=0x1F => Self::Reserved,
            c if c & 0x01 != 0 => Self::GetUdidDirected((c & 0xFE) >> 1),
            c => Self::ResetDirected((c & 0xFE) >> 1),
        }
    }
}

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    pub(crate) fn next_state(inst: &mut Instance<'a>, state: super::state::State) {
        inst.previous_state = inst.state;
        inst.state = state;
    }

    /// Transaction id reported to callbacks: the one handed out when the
    /// instance started its controller transaction, zero for target traffic.
    fn callback_transaction_id(&self, inst: &Instance<'a>) -> u32 {
        if inst.index == self.in_play {
            inst.transaction_id
        } else {
            0
        }
    }

    /// Clears the transaction scratch state and the FIFOs it was using.
    pub(crate) fn reset_all_data(&mut self, inst: &mut Instance<'a>) {
        inst.clear_transaction();
        self.log.debug(inst.index, 0, line!());

        if inst.index == self.in_play {
            self.in_play = INVALID_INSTANCE;
            while !self.regs.ctrl_rx().is_empty() {
                let _ = self.regs.read_ctrl_rx_fifo();
            }
            self.regs.write_ctrl_rx_reset(1);
            self.regs.write_ctrl_desc_reset(1);
        } else {
            self.active_target = INVALID_INSTANCE;
            while !self.regs.tgt_rx().is_empty() {
                let _ = self.regs.read_tgt_rx_fifo();
            }
            self.regs.write_tgt_rx_reset(1);
        }
    }

    /// Queues `event` for `inst`; a full queue drops it and logs an error.
    pub(crate) fn create_event(&mut self, inst: &mut Instance<'a>, event: Event) {
        if inst.queue.push(event).is_err() {
            self.log.error(inst.index, u32::from(event.code()), line!());
        }
    }

    /// Reads the command byte and asks the handler which protocol it selects.
    pub(crate) fn get_protocol(&mut self, inst: &mut Instance<'a>) {
        if self.regs.tgt_rx().is_empty() {
            self.log.error(inst.index, 0, line!());
            return;
        }
        inst.command = self.regs.tgt_rx_byte();
        inst.protocol = inst
            .smbus_handler()
            .map_or(Protocol::None, |h| h.get_protocol(inst.command));
        self.log.protocol(inst.index, inst.command, inst.protocol);
    }

    /// Reads and decodes an ARP command byte.
    pub(crate) fn get_arp_protocol(&mut self, inst: &mut Instance<'a>) -> ArpCommand {
        if self.regs.tgt_rx().is_empty() {
            self.log.error(inst.index, 0, line!());
            return ArpCommand::Reserved;
        }
        inst.command = self.regs.tgt_rx_byte();
        let decoded = ArpCommand::decode(inst.command);
        inst.protocol = match decoded {
            ArpCommand::Prepare => Protocol::PrepareToArp,
            ArpCommand::Reset => Protocol::ResetDevice,
            ArpCommand::GetUdid => Protocol::GetUdid,
            ArpCommand::Assign => Protocol::AssignAddress,
            ArpCommand::GetUdidDirected(address) => {
                inst.matched_address = address;
                Protocol::GetUdidDirected
            }
            ArpCommand::ResetDirected(address) => {
                inst.matched_address = address;
                Protocol::ResetDeviceDirected
            }
            ArpCommand::Reserved => Protocol::None,
        };
        self.log.protocol(inst.index, inst.command, inst.protocol);
        decoded
    }

    /// Fetches the response for a target read from the handler.
    pub(crate) fn get_data(&mut self, inst: &mut Instance<'a>) {
        let mut buffer = [0u8; DATA_SIZE_MAX];
        let size = inst
            .smbus_handler()
            .map_or(0, |h| h.get_data(inst.command, &mut buffer));
        if size > DATA_SIZE_MAX {
            self.log.error(inst.index, size as u32, line!());
            return;
        }
        if let (Some(dst), Some(src)) = (inst.send.get_mut(..size), buffer.get(..size)) {
            dst.copy_from_slice(src);
        }
        inst.send_index = 0;
        inst.send_size = match inst.protocol.fixed_read_length() {
            Some(length) => length as usize,
            None => size,
        };
    }

    /// Hands the received payload to the handler.
    pub(crate) fn write_data(&mut self, inst: &mut Instance<'a>) {
        let transaction_id = self.callback_transaction_id(inst);
        if let Some(handler) = inst.smbus_handler() {
            handler.write_data(
                inst.command,
                inst.received_prefix(inst.expected),
                transaction_id,
            );
        }
    }

    pub(crate) fn announce(&mut self, inst: &mut Instance<'a>, status: Status) {
        let transaction_id = self.callback_transaction_id(inst);
        match inst.handler {
            Some(super::traits::Handler::Smbus(handler)) => {
                handler.announce_result(inst.command, transaction_id, status);
            }
            Some(super::traits::Handler::I2c(handler)) => handler.announce_result(status),
            None => {}
        }
    }

    pub(crate) fn address_change(target: &Instance<'a>) {
        if let Some(handler) = target.smbus_handler() {
            handler.arp_address_change(target.address);
        }
    }

    pub(crate) fn bus_error(inst: &Instance<'a>, event: Event) {
        if let Some(handler) = inst.handler {
            handler.bus_error(event);
        }
    }

    pub(crate) fn bus_warning(inst: &Instance<'a>, event: Event) {
        if let Some(handler) = inst.handler {
            handler.bus_warning(event);
        }
    }

    pub(crate) fn i2c_get_data(&mut self, inst: &mut Instance<'a>) {
        let mut buffer = [0u8; DATA_SIZE_MAX];
        let size = inst.i2c_handler().map_or(0, |h| h.get_data(&mut buffer));
        if size > DATA_SIZE_MAX {
            self.log.error(inst.index, size as u32, line!());
            return;
        }
        if let (Some(dst), Some(src)) = (inst.send.get_mut(..size), buffer.get(..size)) {
            dst.copy_from_slice(src);
        }
        inst.send_index = 0;
        inst.send_size = size;
    }

    pub(crate) fn i2c_write_data(inst: &Instance<'a>) {
        if let Some(handler) = inst.i2c_handler() {
            handler.write_data(inst.received_prefix(inst.receive_index));
        }
    }

    /// Pops every byte currently in the target RX FIFO into the receive buffer.
    pub(crate) fn read_target_fifo(&mut self, inst: &mut Instance<'a>) {
        let fill = self.regs.tgt_rx().fill_level();
        for _ in 0..fill {
            let byte = self.regs.tgt_rx_byte();
            if !inst.store_received(byte) {
                self.log.error(inst.index, u32::from(byte), line!());
            }
        }
    }

    /// Pops the controller RX FIFO until it reports empty.
    pub(crate) fn read_controller_fifo(&mut self, inst: &mut Instance<'a>) {
        while !self.regs.ctrl_rx().is_empty() {
            let byte = self.regs.ctrl_rx_byte();
            if !inst.store_received(byte) {
                self.log.error(inst.index, u32::from(byte), line!());
            }
        }
    }

    pub(crate) fn target_descriptor(
        &mut self,
        inst: &Instance<'a>,
        descriptor: TargetDescriptor,
    ) -> bool {
        match write_target(&mut self.regs, descriptor, FifoCheck::Checked) {
            Ok(()) => true,
            Err(_) => {
                self.log.add(
                    LogLevel::Debug,
                    inst.index,
                    LogEventType::TryWrite,
                    descriptor.encode(),
                    line!(),
                );
                false
            }
        }
    }

    pub(crate) fn controller_descriptor(
        &mut self,
        inst: &Instance<'a>,
        descriptor: ControllerDescriptor,
    ) -> bool {
        match write_controller(&mut self.regs, descriptor, FifoCheck::Checked) {
            Ok(()) => true,
            Err(_) => {
                self.log.add(
                    LogLevel::Debug,
                    inst.index,
                    LogEventType::TryWrite,
                    descriptor.encode(),
                    line!(),
                );
                false
            }
        }
    }

    /// ACKs one byte, counting the descriptor when it was accepted.
    pub(crate) fn ack(&mut self, inst: &mut Instance<'a>) -> bool {
        let written = self.target_descriptor(inst, TargetDescriptor::WriteAck);
        if written {
            inst.descriptors_sent += 1;
        }
        written
    }

    /// ACKs one byte without counting it against the expected total.
    pub(crate) fn ack_uncounted(&mut self, inst: &Instance<'a>) {
        if !self.target_descriptor(inst, TargetDescriptor::WriteAck) {
            self.log.error(inst.index, 0, line!());
        }
    }

    pub(crate) fn nack(&mut self, inst: &mut Instance<'a>) {
        self.target_descriptor(inst, TargetDescriptor::WriteNack);
        inst.nack_sent = true;
    }

    /// Free slots in the target descriptor FIFO.
    pub(crate) fn target_space(&self) -> u32 {
        super::common::FIFO_DEPTH.saturating_sub(self.regs.tgt_desc().fill_level())
    }

    /// Free slots in the controller descriptor FIFO.
    pub(crate) fn controller_space(&self) -> u32 {
        super::common::FIFO_DEPTH.saturating_sub(self.regs.ctrl_desc().fill_level())
    }

    /// Tops up unchecked ACKs until `limit` descriptors have been queued.
    pub(crate) fn top_up_acks(&mut self, inst: &mut Instance<'a>, limit: usize) {
        for _ in 0..self.target_space() {
            if inst.descriptors_sent >= limit {
                break;
            }
            if write_target(&mut self.regs, TargetDescriptor::WriteAck, FifoCheck::Unchecked)
                .is_err()
            {
                break;
            }
            inst.descriptors_sent += 1;
        }
    }

    pub(crate) fn is_arp_responder(inst: &Instance<'a>) -> bool {
        inst.slot() == ARP_INSTANCE_ID && inst.address == DEFAULT_ARP_ADDRESS
    }
}
