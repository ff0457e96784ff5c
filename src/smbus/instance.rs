// Licensed under the Apache-2.0 license

//! Per-slot instance record.
//!
//! An instance bundles the static identity of a bus endpoint (address, UDID,
//! ARP role) with the scratch state of the transaction it is currently
//! running. The profile owns eight of them; slot 7 is reserved for the ARP
//! responder at the SMBus default device address.

use super::common::{
    ArpCapability, MessageStats, Protocol, Udid, COMMAND_INVALID, DATA_SIZE_MAX, FIREWALL1,
    FIREWALL2, FIREWALL3, INVALID_INSTANCE,
};
use super::event::EventQueue;
use super::state::State;
use super::traits::{Handler, I2cHandler, SmbusHandler};

/// Received bytes plus the block count and PEC byte.
pub const RECEIVE_BUFFER_SIZE: usize = DATA_SIZE_MAX + 2;

pub struct Instance<'a> {
    firewall1: u32,

    pub(crate) index: u8,
    pub(crate) in_use: bool,
    pub(crate) arp_capability: ArpCapability,
    pub(crate) simple_device: bool,
    pub(crate) is_i2c: bool,
    pub(crate) address: u8,
    pub(crate) udid: Udid,
    pub(crate) pec_required: bool,
    /// ARP "address resolved" flag.
    pub(crate) ar_flag: bool,
    /// ARP "address valid" flag.
    pub(crate) av_flag: bool,
    pub(crate) handler: Option<Handler<'a>>,

    firewall2: u32,

    pub(crate) state: State,
    pub(crate) previous_state: State,
    pub(crate) protocol: Protocol,
    pub(crate) command: u8,
    pub(crate) destination: u8,
    pub(crate) pec_for_transaction: bool,
    pub(crate) transaction_id: u32,

    pub(crate) send: [u8; DATA_SIZE_MAX],
    pub(crate) send_index: usize,
    pub(crate) send_size: usize,
    pub(crate) received: [u8; RECEIVE_BUFFER_SIZE],
    pub(crate) receive_index: usize,
    pub(crate) expected: usize,
    pub(crate) partial: u32,
    pub(crate) descriptors_sent: usize,
    pub(crate) nack_sent: bool,
    pub(crate) pec_sent: bool,
    pub(crate) fifo_empty_count: u8,
    /// A target read arrived before the write half of a combined
    /// transaction finished; it is replayed once the data is complete.
    pub(crate) read_deferred: bool,

    pub(crate) udid_matched_instance: u8,
    pub(crate) matched_address: u8,
    pub(crate) new_address: u8,

    pub(crate) stats: MessageStats,
    pub(crate) queue: EventQueue,

    firewall3: u32,
}

impl<'a> Instance<'a> {
    /// An unused slot with its firewall words stamped.
    pub const fn new(index: u8) -> Self {
        Self {
            firewall1: FIREWALL1,
            index,
            in_use: false,
            arp_capability: ArpCapability::Unknown,
            simple_device: false,
            is_i2c: false,
            address: 0,
            udid: Udid::ZERO,
            pec_required: false,
            ar_flag: false,
            av_flag: false,
            handler: None,
            firewall2: FIREWALL2,
            state: State::Initial,
            previous_state: State::Initial,
            protocol: Protocol::None,
            command: COMMAND_INVALID,
            destination: 0,
            pec_for_transaction: false,
            transaction_id: 0,
            send: [0; DATA_SIZE_MAX],
            send_index: 0,
            send_size: 0,
            received: [0; RECEIVE_BUFFER_SIZE],
            receive_index: 0,
            expected: 0,
            partial: 0,
            descriptors_sent: 0,
            nack_sent: false,
            pec_sent: false,
            fifo_empty_count: 0,
            read_deferred: false,
            udid_matched_instance: INVALID_INSTANCE,
            matched_address: 0,
            new_address: 0,
            stats: MessageStats::new(),
            queue: EventQueue::new(),
            firewall3: FIREWALL3,
        }
    }

    #[must_use]
    pub fn index(&self) -> u8 {
        self.index
    }

    #[must_use]
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn previous_state(&self) -> State {
        self.previous_state
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn arp_capability(&self) -> ArpCapability {
        self.arp_capability
    }

    #[must_use]
    pub fn udid(&self) -> &Udid {
        &self.udid
    }

    #[must_use]
    pub fn pec_required(&self) -> bool {
        self.pec_required
    }

    #[must_use]
    pub fn address_resolved(&self) -> bool {
        self.ar_flag
    }

    #[must_use]
    pub fn address_valid(&self) -> bool {
        self.av_flag
    }

    #[must_use]
    pub fn is_i2c(&self) -> bool {
        self.is_i2c
    }

    #[must_use]
    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn firewall_intact(&self) -> bool {
        self.firewall1 == FIREWALL1 && self.firewall2 == FIREWALL2 && self.firewall3 == FIREWALL3
    }

    pub(crate) fn slot(&self) -> usize {
        usize::from(self.index)
    }

    pub(crate) fn smbus_handler(&self) -> Option<&'a dyn SmbusHandler> {
        match self.handler {
            Some(Handler::Smbus(handler)) => Some(handler),
            _ => None,
        }
    }

    pub(crate) fn i2c_handler(&self) -> Option<&'a dyn I2cHandler> {
        match self.handler {
            Some(Handler::I2c(handler)) => Some(handler),
            _ => None,
        }
    }

    /// Appends a received byte, returning `false` once the buffer is full.
    pub(crate) fn store_received(&mut self, byte: u8) -> bool {
        match self.received.get_mut(self.receive_index) {
            Some(slot) => {
                *slot = byte;
                self.receive_index += 1;
                true
            }
            None => false,
        }
    }

    /// The bytes collected so far, capped at `len`.
    pub(crate) fn received_prefix(&self, len: usize) -> &[u8] {
        let len = len.min(self.receive_index).min(RECEIVE_BUFFER_SIZE);
        self.received.get(..len).unwrap_or(&[])
    }

    pub(crate) fn next_send_byte(&self) -> u8 {
        self.send.get(self.send_index).copied().unwrap_or(0)
    }

    /// Clears everything tied to the current transaction.
    pub(crate) fn clear_transaction(&mut self) {
        self.command = COMMAND_INVALID;
        self.protocol = Protocol::None;
        self.send_size = 0;
        self.send_index = 0;
        self.receive_index = 0;
        self.expected = 0;
        self.partial = 0;
        self.new_address = 0;
        self.nack_sent = false;
        self.descriptors_sent = 0;
        self.pec_sent = false;
        self.fifo_empty_count = 0;
        self.read_deferred = false;
        self.udid_matched_instance = INVALID_INSTANCE;
    }

    #[cfg(test)]
    pub(crate) fn corrupt_firewall(&mut self) {
        self.firewall2 = 0;
    }

    /// Compares every field except the handler against `Instance::new`.
    #[cfg(test)]
    pub(crate) fn matches_fresh(&self) -> bool {
        let fresh = Instance::new(self.index);
        self.handler.is_none()
            && self.firewall1 == fresh.firewall1
            && self.in_use == fresh.in_use
            && self.arp_capability == fresh.arp_capability
            && self.simple_device == fresh.simple_device
            && self.is_i2c == fresh.is_i2c
            && self.address == fresh.address
            && self.udid == fresh.udid
            && self.pec_required == fresh.pec_required
            && self.ar_flag == fresh.ar_flag
            && self.av_flag == fresh.av_flag
            && self.firewall2 == fresh.firewall2
            && self.state == fresh.state
            && self.previous_state == fresh.previous_state
            && self.protocol == fresh.protocol
            && self.command == fresh.command
            && self.destination == fresh.destination
            && self.pec_for_transaction == fresh.pec_for_transaction
            && self.transaction_id == fresh.transaction_id
            && self.send == fresh.send
            && self.send_index == fresh.send_index
            && self.send_size == fresh.send_size
            && self.received == fresh.received
            && self.receive_index == fresh.receive_index
            && self.expected == fresh.expected
            && self.partial == fresh.partial
            && self.descriptors_sent == fresh.descriptors_sent
            && self.nack_sent == fresh.nack_sent
            && self.pec_sent == fresh.pec_sent
            && self.fifo_empty_count == fresh.fifo_empty_count
            && self.read_deferred == fresh.read_deferred
            && self.udid_matched_instance == fresh.udid_matched_instance
            && self.matched_address == fresh.matched_address
            && self.new_address == fresh.new_address
            && self.stats == fresh.stats
            && self.queue.is_empty()
            && self.firewall3 == fresh.firewall3
    }
}
