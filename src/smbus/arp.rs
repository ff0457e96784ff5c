// Licensed under the Apache-2.0 license

//! SMBus Address Resolution Protocol responder.
//!
//! Slot 7 listens on the SMBus device default address and answers ARP on
//! behalf of every instance in slots 0..=6. The handlers here run while slot 7
//! is detached from the instance table, so they can read and update the other
//! slots freely.

use heapless::Vec;
use zerocopy::IntoBytes;

use super::action::ArpCommand;
use super::common::{
    AddressType, ArpCapability, Protocol, GET_UDID_DATA_LENGTH, GET_UDID_MSG_LENGTH,
    MAX_NON_ARP_INSTANCES, UDID_ADDRESS_UNASSIGNED, UDID_LENGTH,
};
use super::descriptor::TargetDescriptor;
use super::instance::Instance;
use super::profile::Profile;
use super::registers::{RegisterBlock, SmbusFields};
use super::state::State;
use crate::common::Logger;

/// Get UDID payload: byte count, UDID in wire order, then the address byte.
fn udid_response(target: &Instance<'_>, address_byte: u8) -> [u8; GET_UDID_MSG_LENGTH] {
    let mut response = [0u8; GET_UDID_MSG_LENGTH];
    let mut slots = response.iter_mut();
    if let Some(count) = slots.next() {
        *count = GET_UDID_DATA_LENGTH;
    }
    for (slot, byte) in slots.by_ref().zip(target.udid.as_bytes().iter().rev()) {
        *slot = *byte;
    }
    if let Some(address) = slots.next() {
        *address = address_byte;
    }
    response
}

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    /// Command byte received by the ARP responder.
    pub(crate) fn arp_command_byte(&mut self, inst: &mut Instance<'a>) {
        match self.get_arp_protocol(inst) {
            ArpCommand::GetUdid => match self.arbitrate_get_udid() {
                Some(winner) => {
                    let response = self.instances.get(winner).map(|target| {
                        let address_byte = if target.av_flag {
                            (target.address << 1) | 1
                        } else {
                            UDID_ADDRESS_UNASSIGNED
                        };
                        udid_response(target, address_byte)
                    });
                    self.respond_with(inst, response);
                }
                None => self.refuse(inst),
            },
            ArpCommand::GetUdidDirected(address) => {
                let response = self
                    .instances
                    .iter()
                    .take(MAX_NON_ARP_INSTANCES)
                    .find(|target| {
                        target.in_use
                            && target.address == address
                            && target.arp_capability != ArpCapability::NonArpCapable
                            && target.av_flag
                    })
                    .map(|target| udid_response(target, (target.address << 1) | 1));
                self.respond_with(inst, response);
            }
            ArpCommand::Prepare | ArpCommand::Reset => {
                let in_play = self.in_play;
                let any = self
                    .instances
                    .iter()
                    .take(MAX_NON_ARP_INSTANCES)
                    .any(|target| {
                        target.arp_capability.is_discoverable() && target.index != in_play
                    });
                self.acknowledge_with_pec(inst, any);
            }
            ArpCommand::ResetDirected(address) => {
                let valid = self
                    .instances
                    .iter()
                    .take(MAX_NON_ARP_INSTANCES)
                    .find(|target| target.in_use && target.address == address)
                    .is_some_and(|target| target.av_flag);
                self.acknowledge_with_pec(inst, valid);
            }
            ArpCommand::Assign => {
                self.udid_match = [true; MAX_NON_ARP_INSTANCES];
                self.ack_uncounted(inst);
                Self::next_state(inst, State::AwaitingBlockSize);
            }
            ArpCommand::Reserved => self.refuse(inst),
        }
    }

    /// Picks the instance that wins Get UDID arbitration on the wire.
    ///
    /// Bits are sent most significant first and a zero bit dominates, so the
    /// winner is the lowest UDID compared in wire order.
    pub(crate) fn arbitrate_get_udid(&self) -> Option<usize> {
        let in_play = self.in_play;
        let mut candidates: Vec<usize, MAX_NON_ARP_INSTANCES> = self
            .instances
            .iter()
            .take(MAX_NON_ARP_INSTANCES)
            .filter(|target| {
                target.in_use
                    && target.arp_capability.is_discoverable()
                    && target.index != in_play
                    && !target.ar_flag
            })
            .map(Instance::slot)
            .collect();

        for position in (0..UDID_LENGTH).rev() {
            let byte_of = |slot: &usize| {
                self.instances
                    .get(*slot)
                    .map_or(u8::MAX, |target| target.udid.byte(position))
            };
            let lowest = candidates.iter().map(&byte_of).min()?;
            candidates.retain(|slot| byte_of(slot) == lowest);
        }
        candidates.first().copied()
    }

    fn respond_with(
        &mut self,
        inst: &mut Instance<'a>,
        response: Option<[u8; GET_UDID_MSG_LENGTH]>,
    ) {
        let Some(response) = response else {
            self.refuse(inst);
            return;
        };
        if let Some(send) = inst.send.get_mut(..GET_UDID_MSG_LENGTH) {
            send.copy_from_slice(&response);
        }
        inst.send_index = 0;
        inst.send_size = GET_UDID_MSG_LENGTH;
        self.ack_uncounted(inst);
        Self::next_state(inst, State::AwaitingRead);
    }

    fn refuse(&mut self, inst: &mut Instance<'a>) {
        self.nack(inst);
        Self::next_state(inst, State::AwaitingDone);
    }

    fn acknowledge_with_pec(&mut self, inst: &mut Instance<'a>, accept: bool) {
        if !accept {
            self.refuse(inst);
            return;
        }
        self.ack(inst);
        if self.target_descriptor(inst, TargetDescriptor::WritePec) {
            inst.pec_sent = true;
        }
        Self::next_state(inst, State::AwaitingDone);
    }

    /// Assign Address payload bytes: 16 UDID bytes, the new address, then PEC.
    pub(crate) fn arp_assign_bytes(&mut self, inst: &mut Instance<'a>) {
        let fill = self.regs.tgt_rx().fill_level();
        for _ in 0..fill {
            let byte = self.regs.tgt_rx_byte();
            if inst.receive_index < UDID_LENGTH {
                let position = UDID_LENGTH - 1 - inst.receive_index;
                inst.store_received(byte);
                match self.match_udid_byte(position, byte) {
                    Some(slot) => {
                        inst.udid_matched_instance = slot as u8;
                        self.ack(inst);
                    }
                    None => {
                        self.refuse(inst);
                        return;
                    }
                }
            } else if inst.receive_index == UDID_LENGTH {
                inst.store_received(byte);
                inst.new_address = byte >> 1;
                self.log.debug(inst.index, u32::from(inst.new_address), line!());
                self.ack(inst);
            } else {
                self.target_descriptor(inst, TargetDescriptor::WritePec);
                inst.pec_sent = true;
                Self::next_state(inst, State::AwaitingDone);
                return;
            }
        }
    }

    /// Narrows the Assign Address candidates by one UDID byte, returning the
    /// last slot still matching.
    fn match_udid_byte(&mut self, position: usize, byte: u8) -> Option<usize> {
        let mut matched = None;
        for (target, still_matching) in self
            .instances
            .iter()
            .take(MAX_NON_ARP_INSTANCES)
            .zip(self.udid_match.iter_mut())
        {
            if !target.in_use || !*still_matching {
                continue;
            }
            if target.udid.byte(position) == byte {
                matched = Some(target.slot());
            } else {
                *still_matching = false;
            }
        }
        matched
    }

    /// Applies a completed ARP command to the instances it addressed.
    pub(crate) fn arp_done(&mut self, inst: &mut Instance<'a>) {
        let in_play = self.in_play;
        match inst.protocol {
            Protocol::AssignAddress if !inst.nack_sent => {
                self.complete_assign(usize::from(inst.udid_matched_instance), inst.new_address);
            }
            Protocol::PrepareToArp => {
                for target in self.instances.iter_mut().take(MAX_NON_ARP_INSTANCES) {
                    if target.in_use
                        && target.arp_capability.participates()
                        && target.index != in_play
                    {
                        target.ar_flag = false;
                    }
                }
            }
            Protocol::ResetDevice => {
                for slot in 0..MAX_NON_ARP_INSTANCES {
                    let selected = self.instances.get(slot).is_some_and(|target| {
                        target.in_use
                            && target.arp_capability.participates()
                            && target.index != in_play
                    });
                    if selected {
                        self.reset_device(slot);
                    }
                }
            }
            Protocol::ResetDeviceDirected => {
                let address = inst.matched_address;
                for slot in 0..MAX_NON_ARP_INSTANCES {
                    let selected = self.instances.get(slot).is_some_and(|target| {
                        target.in_use
                            && target.arp_capability.participates()
                            && target.address == address
                    });
                    if selected {
                        self.reset_device(slot);
                    }
                }
            }
            _ => {}
        }
    }

    fn complete_assign(&mut self, slot: usize, new_address: u8) {
        let Some(target) = self.instances.get_mut(slot) else {
            return;
        };
        if target.arp_capability.is_discoverable() {
            target.ar_flag = true;
            target.av_flag = true;
        }
        if target.arp_capability == ArpCapability::Capable {
            target.address = new_address;
            self.regs.set_target_enable(slot, false);
            self.regs.set_target_address(slot, new_address);
            self.regs.set_target_enable(slot, true);
            Self::address_change(target);
        }
    }

    /// Reset Device semantics for one instance.
    pub(crate) fn reset_device(&mut self, slot: usize) {
        let Some(target) = self.instances.get_mut(slot) else {
            return;
        };
        target.ar_flag = false;
        if matches!(
            target.arp_capability,
            ArpCapability::NonArpCapable | ArpCapability::Unknown
        ) {
            return;
        }
        match target.udid.address_type() {
            AddressType::Fixed => target.av_flag = true,
            AddressType::DynamicPersistent => {
                if target.av_flag {
                    self.regs.set_target_enable(slot, false);
                }
                target.av_flag = false;
            }
            AddressType::DynamicVolatile | AddressType::Random => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smbus::common::{InstanceConfig, Udid, ARP_INSTANCE_ID};
    use crate::smbus::event::Event;
    use crate::smbus::profile::harness;
    use crate::smbus::registers::TGT_CONTROL_ENABLE;
    use crate::smbus::traits::recorder::{Call, Recorder};
    use hex_literal::hex;

    const ARP: u8 = ARP_INSTANCE_ID as u8;

    fn volatile_udid(last: u8) -> Udid {
        let mut wire = hex!("81 10 1022 1234 0004 0000 0000 0000 0000");
        wire[15] = last;
        Udid::from_wire(wire)
    }

    #[test]
    fn get_udid_response_layout() {
        let mut target = Instance::new(0);
        target.udid = Udid::from_wire(hex!("c1 10 1022 1234 0004 0000 0000 deadbeef"));
        let response = udid_response(&target, 0xA1);
        assert_eq!(
            response,
            hex!("11 c1 10 1022 1234 0004 0000 0000 deadbeef a1")
        );
    }

    #[test]
    fn get_udid_lowest_udid_wins() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        profile
            .create_instance(
                InstanceConfig::new(0x30, ArpCapability::Capable).udid(volatile_udid(0x02)),
                &rec,
            )
            .unwrap();
        let low = profile
            .create_instance(
                InstanceConfig::new(0x31, ArpCapability::Capable).udid(volatile_udid(0x01)),
                &rec,
            )
            .unwrap();
        assert_eq!(profile.arbitrate_get_udid(), Some(usize::from(low)));

        profile.regs.clear_trace();
        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x03]);
        profile.inject(
            ARP,
            &[Event::TgtData, Event::TgtRead, Event::TgtDescFifoAlmostEmpty],
        );

        let sent: std::vec::Vec<u8> = profile.regs.tgt_desc[1..19]
            .iter()
            .map(|d| (d & 0xFF) as u8)
            .collect();
        assert_eq!(
            sent,
            hex!("11 81 10 1022 1234 0004 0000 0000 0000 0001 ff")
        );
        assert_eq!(profile.regs.tgt_desc.last(), Some(&0x900));
        assert_eq!(
            profile.instance(ARP).unwrap().state(),
            State::AwaitingDone
        );
    }

    #[test]
    fn resolved_instances_drop_out_of_arbitration() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(
                InstanceConfig::new(0x30, ArpCapability::Capable).udid(volatile_udid(0x01)),
                &rec,
            )
            .unwrap();
        profile.instances[usize::from(id)].ar_flag = true;
        assert_eq!(profile.arbitrate_get_udid(), None);
    }

    #[test]
    fn assign_address_reprograms_matching_instance() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let udid = volatile_udid(0x07);
        let id = profile
            .create_instance(InstanceConfig::new(0x00, ArpCapability::Capable).udid(udid), &rec)
            .unwrap();
        assert!(!profile.instance(id).unwrap().address_valid());

        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x04]);
        profile.inject(ARP, &[Event::TgtData]);
        assert_eq!(
            profile.instance(ARP).unwrap().state(),
            State::AwaitingBlockSize
        );

        profile.regs.push_tgt_rx(&[17]);
        profile.inject(ARP, &[Event::TgtData]);
        let mut payload = hex!("81 10 1022 1234 0004 0000 0000 0000 0007").to_vec();
        payload.push(0x5A << 1);
        profile.regs.push_tgt_rx(&payload);
        profile.inject(ARP, &[Event::TgtData]);
        assert_eq!(profile.instance(ARP).unwrap().state(), State::AwaitingData);

        profile.regs.push_tgt_rx(&[0xEE]);
        profile.inject(ARP, &[Event::TgtData, Event::TgtDone]);

        let inst = profile.instance(id).unwrap();
        assert_eq!(inst.address(), 0x5A);
        assert!(inst.address_valid());
        assert!(inst.address_resolved());
        assert_eq!(
            profile.regs.target_control(usize::from(id)),
            (0x5A << 1) | TGT_CONTROL_ENABLE
        );
        assert_eq!(rec.calls(), [Call::AddressChange(0x5A)]);
        assert_eq!(profile.instance(ARP).unwrap().state(), State::Initial);
    }

    #[test]
    fn assign_address_with_foreign_udid_is_nacked() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(
                InstanceConfig::new(0x00, ArpCapability::Capable).udid(volatile_udid(0x07)),
                &rec,
            )
            .unwrap();

        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x04]);
        profile.inject(ARP, &[Event::TgtData]);
        profile.regs.push_tgt_rx(&[17]);
        profile.inject(ARP, &[Event::TgtData]);
        profile.regs.push_tgt_rx(&[0x41]);
        profile.inject(ARP, &[Event::TgtData]);
        assert_eq!(profile.instance(ARP).unwrap().state(), State::AwaitingDone);

        profile.inject(ARP, &[Event::TgtDone]);
        assert_eq!(profile.instance(id).unwrap().address(), 0x00);
        assert!(rec.calls().is_empty());
    }

    #[test]
    fn prepare_to_arp_clears_resolved_flag() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(
                InstanceConfig::new(0x30, ArpCapability::Capable).udid(volatile_udid(0x01)),
                &rec,
            )
            .unwrap();
        profile.instances[usize::from(id)].ar_flag = true;

        profile.regs.clear_trace();
        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x01]);
        profile.inject(ARP, &[Event::TgtData]);
        assert_eq!(profile.regs.tgt_desc, [0x000, 0x200]);

        profile.inject(ARP, &[Event::TgtDone]);
        assert!(!profile.instance(id).unwrap().address_resolved());
    }

    #[test]
    fn directed_reset_invalidates_persistent_address() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let udid = Udid::from_wire(hex!("41 10 1022 1234 0004 0000 0000 0000 0001"));
        let id = profile
            .create_instance(InstanceConfig::new(0x40, ArpCapability::Capable).udid(udid), &rec)
            .unwrap();
        assert!(profile.instance(id).unwrap().address_valid());
        profile.regs.set_target_enable(usize::from(id), true);

        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x40 << 1]);
        profile.inject(ARP, &[Event::TgtData, Event::TgtDone]);

        assert!(!profile.instance(id).unwrap().address_valid());
        assert_eq!(
            profile.regs.target_control(usize::from(id)) & TGT_CONTROL_ENABLE,
            0
        );
    }

    #[test]
    fn reset_keeps_fixed_address_valid() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile
            .create_instance(
                InstanceConfig::new(0x44, ArpCapability::FixedAndDiscoverable),
                &rec,
            )
            .unwrap();
        profile.instances[usize::from(id)].ar_flag = true;
        profile.reset_device(usize::from(id));
        let inst = profile.instance(id).unwrap();
        assert!(inst.address_valid());
        assert!(!inst.address_resolved());
    }

    #[test]
    fn reserved_command_is_nacked() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        profile
            .create_instance(InstanceConfig::new(0x30, ArpCapability::FixedAndDiscoverable), &rec)
            .unwrap();
        profile.regs.clear_trace();
        profile.inject(ARP, &[Event::TgtWrite]);
        profile.regs.push_tgt_rx(&[0x10]);
        profile.inject(ARP, &[Event::TgtData]);
        assert_eq!(profile.regs.tgt_desc, [0x100]);
        assert_eq!(profile.instance(ARP).unwrap().protocol(), Protocol::None);
    }
}
