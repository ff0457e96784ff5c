// Licensed under the Apache-2.0 license

//! The SMBus profile: one driver object per SMBus IP block.
//!
//! A [`Profile`] owns the register block, eight instance slots and the
//! diagnostic log. Slots `0..=6` hold caller-created SMBus targets or I2C
//! devices; slot 7 is the ARP responder at the SMBus default device address
//! and is provisioned automatically while any ARP-participating instance
//! exists.
//!
//! Every public operation checks the initialization code and the firewall
//! words of all slots before touching the hardware.
//!
//! # Example
//!
//! ```ignore
//! let regs = unsafe { Mmio::new(SMBUS_BASE)? };
//! let config = SmbusConfigBuilder::new().frequency(FrequencyClass::Fast).build();
//! let mut profile = Profile::new(regs, config, read_ticks, NoOpLogger {});
//! profile.init()?;
//! let id = profile.create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &handler)?;
//! profile.enable_interrupts()?;
//! let txid = profile.initiate_command(id, 0x20, 0x05, Protocol::WriteByte, &[0x7E], false)?;
//! ```

use core::fmt;
use core::mem;

use fugit::HertzU32;

use super::common::{
    AddressType, ArpCapability, InstanceConfig, LogLevel, MessageStats, Protocol, SmbusConfig,
    Version, ARP_INSTANCE_ID, DATA_SIZE_MAX, DEFAULT_ARP_ADDRESS, INITIALIZATION_CODE,
    INVALID_ADDRESS_MASK, INVALID_INSTANCE, MAGIC_NUMBER, MAX_INSTANCES, MAX_NON_ARP_INSTANCES,
};
use super::error::Error;
use super::event::Event;
use super::instance::Instance;
use super::interrupt::{err, IER_DEFAULT, ISR_ALL};
use super::log::EventLog;
use super::registers::{RegisterBlock, SmbusFields, SmbusRegisters};
use super::state::{self, State};
use super::timing::PhyTiming;
use super::traits::{Handler, SmbusHandler};
use crate::common::{Logger, NoOpLogger};

pub struct Profile<'a, R: RegisterBlock, L: Logger = NoOpLogger> {
    pub(crate) regs: R,
    pub(crate) logger: L,
    pub(crate) log: EventLog,
    config: SmbusConfig,
    pub(crate) instances: [Instance<'a>; MAX_INSTANCES],
    /// Slot that currently owns the controller.
    pub(crate) in_play: u8,
    /// Slot the hardware last matched as target.
    pub(crate) active_target: u8,
    /// Running UDID comparison for an Assign Address in progress.
    pub(crate) udid_match: [bool; MAX_NON_ARP_INSTANCES],
    transaction_counter: u32,
    initialization: u32,
    axi_clock: HertzU32,
    glitch_filter: Option<u32>,
}

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    /// Creates an uninitialized profile over `regs`.
    ///
    /// `read_ticks` timestamps diagnostic log entries.
    pub const fn new(regs: R, config: SmbusConfig, read_ticks: fn() -> u32, logger: L) -> Self {
        Self {
            regs,
            logger,
            log: EventLog::new(config.log_level, read_ticks),
            config,
            instances: [
                Instance::new(0),
                Instance::new(1),
                Instance::new(2),
                Instance::new(3),
                Instance::new(4),
                Instance::new(5),
                Instance::new(6),
                Instance::new(7),
            ],
            in_play: INVALID_INSTANCE,
            active_target: INVALID_INSTANCE,
            udid_match: [false; MAX_NON_ARP_INSTANCES],
            transaction_counter: 0,
            initialization: 0,
            axi_clock: HertzU32::from_raw(0),
            glitch_filter: None,
        }
    }

    /// Checks the IP magic number, programs bus timing and resets every FIFO and slot.
    ///
    /// # Errors
    ///
    /// * [`Error::AlreadyInitialized`] if `init` already succeeded.
    /// * [`Error::HardwareNotFound`] if the magic number register does not match.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialization == INITIALIZATION_CODE {
            return Err(Error::AlreadyInitialized);
        }
        let magic = self.regs.read_ip_magic_num();
        if magic != MAGIC_NUMBER {
            self.log.error(INVALID_INSTANCE, magic, line!());
            self.logger.error("smbus: magic number mismatch");
            return Err(Error::HardwareNotFound);
        }

        let build0 = self.regs.read_build_config_0();
        let build1 = self.regs.read_build_config_1();
        self.log.debug(INVALID_INSTANCE, build0, line!());
        self.log.debug(INVALID_INSTANCE, build1, line!());
        self.axi_clock = HertzU32::from_raw(build0);

        let filter = self.regs.filter();
        self.glitch_filter = filter.enabled().then(|| filter.duration());
        PhyTiming::compute(self.config.frequency, self.axi_clock, self.glitch_filter)
            .apply(&mut self.regs);

        for (slot, inst) in self.instances.iter_mut().enumerate() {
            *inst = Instance::new(slot as u8);
        }
        self.in_play = INVALID_INSTANCE;
        self.active_target = INVALID_INSTANCE;
        self.udid_match = [false; MAX_NON_ARP_INSTANCES];

        self.regs.write_ctrl_desc_reset(1);
        self.regs.write_tgt_rx_reset(1);
        self.regs.write_ctrl_rx_reset(1);

        self.initialization = INITIALIZATION_CODE;
        self.logger.debug("smbus: initialized");
        Ok(())
    }

    /// Masks all interrupts and returns the profile to the uninitialized state.
    ///
    /// # Errors
    ///
    /// [`Error::InstancesInUse`] while any slot `0..=6` is still allocated.
    pub fn deinit(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        if self.caller_slots().any(Instance::in_use) {
            return Err(Error::InstancesInUse);
        }
        self.disable_and_clear_interrupts()?;
        self.initialization = 0;
        self.logger.debug("smbus: deinitialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialization == INITIALIZATION_CODE
    }

    pub(crate) fn ensure_ready(&mut self) -> Result<(), Error> {
        if self.initialization != INITIALIZATION_CODE {
            return Err(Error::NotInitialized);
        }
        if let Some(inst) = self.instances.iter().find(|inst| !inst.firewall_intact()) {
            self.log.error(inst.index, 0, line!());
            self.logger.error("smbus: firewall check failed");
            return Err(Error::Firewall);
        }
        Ok(())
    }

    fn caller_slots(&self) -> impl Iterator<Item = &Instance<'a>> {
        self.instances.iter().take(MAX_NON_ARP_INSTANCES)
    }

    /// Registers an SMBus target instance and returns its id.
    ///
    /// Instances that take part in ARP also bring up the ARP responder on
    /// slot 7 if it is not already running.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for an unknown ARP capability, or for an
    ///   ARP-capable instance whose UDID is fixed or whose address is only
    ///   valid for a persistent UDID.
    /// * [`Error::AddressCollision`] if a non-ARP-capable address is taken.
    /// * [`Error::NoFreeInstance`] if slots `0..=6` are all allocated.
    pub fn create_instance(
        &mut self,
        config: InstanceConfig,
        handler: &'a dyn SmbusHandler,
    ) -> Result<u8, Error> {
        self.ensure_ready()?;
        let capability = config.arp_capability;
        let address_type = config.udid.address_type();
        match capability {
            ArpCapability::Unknown => return Err(Error::InvalidArgument),
            ArpCapability::Capable => {
                if config.address & INVALID_ADDRESS_MASK != 0
                    && address_type != AddressType::DynamicPersistent
                {
                    return Err(Error::InvalidArgument);
                }
                if address_type == AddressType::Fixed {
                    return Err(Error::InvalidArgument);
                }
            }
            _ => self.check_collision(config.address)?,
        }
        let slot = self.free_slot()?;

        let address = config.address & !INVALID_ADDRESS_MASK;
        let av_flag = match (capability, address_type) {
            (ArpCapability::Capable, AddressType::DynamicPersistent) => {
                config.address & INVALID_ADDRESS_MASK == 0 && config.address != 0
            }
            (ArpCapability::Capable, _) => false,
            _ => true,
        };
        let Some(inst) = self.instances.get_mut(slot) else {
            return Err(Error::InvalidArgument);
        };
        inst.in_use = true;
        inst.address = address;
        inst.handler = Some(Handler::Smbus(handler));
        inst.arp_capability = capability;
        inst.udid = config.udid;
        inst.simple_device = config.simple_device;
        inst.pec_required = config.udid.pec_supported();
        inst.is_i2c = false;
        inst.av_flag = av_flag;

        self.regs.set_target_address(slot, address);
        if capability != ArpCapability::Capable {
            self.regs.set_target_enable(slot, true);
        }
        if capability != ArpCapability::NonArpCapable {
            self.provision_arp_responder();
        }
        self.log.debug(slot as u8, u32::from(address), line!());
        Ok(slot as u8)
    }

    /// Releases an SMBus instance.
    ///
    /// The ARP responder on slot 7 is released with the last instance that
    /// takes part in ARP.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for an id outside `0..=6`.
    /// * [`Error::InstanceNotInUse`] if the slot is free or holds an I2C device.
    /// * [`Error::InstanceBusy`] while the instance is mid-transaction.
    pub fn destroy_instance(&mut self, id: u8) -> Result<(), Error> {
        self.ensure_ready()?;
        let slot = usize::from(id);
        if slot >= MAX_NON_ARP_INSTANCES {
            return Err(Error::InvalidArgument);
        }
        let inst = self.instances.get(slot).ok_or(Error::InvalidArgument)?;
        if !inst.in_use || inst.is_i2c {
            return Err(Error::InstanceNotInUse);
        }
        if inst.state != State::Initial {
            return Err(Error::InstanceBusy);
        }
        self.release_slot(slot);

        let arp_needed = self
            .caller_slots()
            .any(|inst| inst.in_use && inst.arp_capability != ArpCapability::NonArpCapable);
        let responder_up = self
            .instances
            .get(ARP_INSTANCE_ID)
            .is_some_and(|inst| inst.in_use);
        if !arp_needed && responder_up {
            self.release_slot(ARP_INSTANCE_ID);
        }
        Ok(())
    }

    pub(crate) fn check_collision(&self, address: u8) -> Result<(), Error> {
        if self
            .instances
            .iter()
            .any(|inst| inst.in_use && inst.address == address)
        {
            return Err(Error::AddressCollision);
        }
        Ok(())
    }

    pub(crate) fn free_slot(&self) -> Result<usize, Error> {
        self.caller_slots()
            .position(|inst| !inst.in_use)
            .ok_or(Error::NoFreeInstance)
    }

    pub(crate) fn release_slot(&mut self, slot: usize) {
        self.regs.set_target_enable(slot, false);
        self.regs.set_target_address(slot, 0);
        if let Some(inst) = self.instances.get_mut(slot) {
            *inst = Instance::new(slot as u8);
        }
        self.log.debug(slot as u8, 0, line!());
    }

    fn provision_arp_responder(&mut self) {
        let Some(inst) = self.instances.get_mut(ARP_INSTANCE_ID) else {
            return;
        };
        if inst.in_use {
            return;
        }
        inst.in_use = true;
        inst.address = DEFAULT_ARP_ADDRESS;
        inst.pec_required = true;
        self.regs.set_target_address(ARP_INSTANCE_ID, DEFAULT_ARP_ADDRESS);
        self.regs.set_target_enable(ARP_INSTANCE_ID, true);
    }

    /// Starts a controller transaction on behalf of instance `id`.
    ///
    /// `data` is the payload after the command byte. Block protocols and
    /// Assign Address include their byte count as the first byte. ARP
    /// protocols always append a PEC.
    ///
    /// Returns the transaction id later passed to the handler's
    /// `write_data` and `announce_result`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for a bad id, a non-SMBus protocol, a
    ///   payload over 256 bytes or a write protocol without payload.
    /// * [`Error::BusStuck`] if the PHY reports a clock-low or data-low timeout.
    /// * [`Error::ControllerBusy`] while another transaction is in play.
    /// * [`Error::InstanceNotInUse`] / [`Error::InstanceBusy`] for the instance.
    pub fn initiate_command(
        &mut self,
        id: u8,
        destination: u8,
        command: u8,
        protocol: Protocol,
        data: &[u8],
        pec: bool,
    ) -> Result<u32, Error> {
        let slot = usize::from(id);
        if slot >= MAX_NON_ARP_INSTANCES || !protocol.is_smbus() || data.len() > DATA_SIZE_MAX {
            return Err(Error::InvalidArgument);
        }
        if (state::is_controller_write(protocol) || protocol == Protocol::AssignAddress)
            && data.is_empty()
        {
            return Err(Error::InvalidArgument);
        }
        self.claim_controller(slot, false)?;

        let command = match protocol {
            Protocol::GetUdidDirected => command | 0x01,
            Protocol::ResetDeviceDirected => command & 0xFE,
            _ => command,
        };
        let txid = self.prepare_controller(slot, destination, command, protocol, data, 0);
        if let Some(inst) = self.instances.get_mut(slot) {
            inst.pec_for_transaction = pec || protocol.is_arp();
        }
        self.start_controller_transaction(slot);
        Ok(txid)
    }

    /// Checks that `slot` may start a controller transaction.
    pub(crate) fn claim_controller(&mut self, slot: usize, i2c: bool) -> Result<(), Error> {
        self.ensure_ready()?;
        if self.regs.phy().bus_stuck() {
            return Err(Error::BusStuck);
        }
        if self.in_play != INVALID_INSTANCE {
            return Err(Error::ControllerBusy);
        }
        let inst = self.instances.get(slot).ok_or(Error::InvalidArgument)?;
        if !inst.in_use || inst.is_i2c != i2c {
            return Err(Error::InstanceNotInUse);
        }
        if inst.state != State::Initial {
            return Err(Error::InstanceBusy);
        }
        Ok(())
    }

    /// Loads the transaction into `slot` and takes the controller.
    pub(crate) fn prepare_controller(
        &mut self,
        slot: usize,
        destination: u8,
        command: u8,
        protocol: Protocol,
        data: &[u8],
        expected: usize,
    ) -> u32 {
        let txid = self.transaction_counter;
        self.transaction_counter = self.transaction_counter.wrapping_add(1);
        self.in_play = slot as u8;
        if let Some(inst) = self.instances.get_mut(slot) {
            inst.clear_transaction();
            if let Some(send) = inst.send.get_mut(..data.len()) {
                send.copy_from_slice(data);
            }
            inst.send_size = data.len();
            inst.send_index = 0;
            inst.expected = expected;
            inst.command = command;
            inst.protocol = protocol;
            inst.destination = destination;
            inst.transaction_id = txid;
            inst.pec_for_transaction = false;
            self.log.protocol(inst.index, command, protocol);
        }
        txid
    }

    /// Resets the controller FIFOs and runs the first state machine step.
    pub(crate) fn start_controller_transaction(&mut self, slot: usize) {
        self.regs.write_ctrl_desc_reset(1);
        self.regs.write_ctrl_rx_reset(1);
        if let Some(inst) = self.instances.get_mut(slot) {
            if inst.queue.push(Event::SendNextByte).is_err() {
                self.log.error(inst.index, u32::from(Event::SendNextByte.code()), line!());
            }
        }
        self.regs.write_irq_gie(0);
        self.drain_events();
        self.regs.write_irq_ier(IER_DEFAULT);
        self.regs.write_irq_gie(1);
    }

    /// Runs queued events through the state machine, slot by slot.
    pub(crate) fn drain_events(&mut self) {
        for slot in 0..MAX_INSTANCES {
            let Some(entry) = self.instances.get_mut(slot) else {
                continue;
            };
            if !entry.in_use || entry.queue.is_empty() {
                continue;
            }
            // Detached so handlers can reach the rest of the table.
            let mut inst = mem::replace(entry, Instance::new(slot as u8));
            while let Some(event) = inst.queue.pop() {
                self.fsm(&mut inst, event);
            }
            if let Some(entry) = self.instances.get_mut(slot) {
                *entry = inst;
            }
        }
    }

    /// Unmasks every interrupt source.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] or [`Error::Firewall`].
    pub fn enable_interrupts(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        self.regs.write_irq_ier(IER_DEFAULT);
        self.regs.write_err_irq_ier(err::ALL);
        self.regs.write_irq_gie(1);
        Ok(())
    }

    /// Masks every interrupt source and clears anything pending.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] or [`Error::Firewall`].
    pub fn disable_and_clear_interrupts(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        self.regs.write_irq_gie(0);
        self.regs.write_irq_ier(0);
        self.regs.write_err_irq_ier(0);
        self.regs.write_irq_isr(ISR_ALL);
        self.regs.write_err_irq_isr(err::ALL);
        Ok(())
    }

    /// Renders the diagnostic log into `out`, oldest entry first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `out` refuses the text.
    pub fn get_log<W: fmt::Write>(&self, out: &mut W) -> Result<(), Error> {
        self.log.render(out).map_err(|_| Error::InvalidArgument)
    }

    pub fn log_reset(&mut self) {
        self.log.reset();
    }

    pub fn log_enable(&mut self) {
        self.log.set_level(LogLevel::Debug);
    }

    pub fn log_disable(&mut self) {
        self.log.set_level(LogLevel::None);
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log.set_level(level);
    }

    /// Message counters for instance `id` (`0..=7`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an id outside `0..=7`.
    pub fn stats(&self, id: u8) -> Result<MessageStats, Error> {
        self.instances
            .get(usize::from(id))
            .map(|inst| inst.stats)
            .ok_or(Error::InvalidArgument)
    }

    /// Zeroes the message counters for instance `id` (`0..=7`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an id outside `0..=7`.
    pub fn reset_stats(&mut self, id: u8) -> Result<(), Error> {
        let inst = self
            .instances
            .get_mut(usize::from(id))
            .ok_or(Error::InvalidArgument)?;
        inst.stats = MessageStats::new();
        Ok(())
    }

    /// IP and driver version.
    pub fn version(&self) -> Version {
        let ip = self.regs.read_ip_version();
        Version {
            ip_major: (ip >> 16) as u16,
            ip_minor: (ip & 0xFFFF) as u16,
            sw_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            sw_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            sw_patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
            sw_dev_build: u8::from(!env!("CARGO_PKG_VERSION_PRE").is_empty()),
        }
    }

    pub fn instance(&self, id: u8) -> Option<&Instance<'a>> {
        self.instances.get(usize::from(id))
    }

    /// Instance that currently owns the controller.
    pub fn in_play(&self) -> Option<u8> {
        (self.in_play != INVALID_INSTANCE).then_some(self.in_play)
    }

    pub fn axi_clock(&self) -> HertzU32 {
        self.axi_clock
    }

    pub fn config(&self) -> &SmbusConfig {
        &self.config
    }

    /// Releases the register block.
    pub fn free(self) -> R {
        self.regs
    }

    #[cfg(test)]
    pub(crate) fn inject(&mut self, id: u8, events: &[Event]) {
        if let Some(inst) = self.instances.get_mut(usize::from(id)) {
            for &event in events {
                let _ = inst.queue.push(event);
            }
        }
        self.drain_events();
    }

    #[cfg(test)]
    pub(crate) fn log_entries(&self) -> impl Iterator<Item = super::log::LogEventType> + '_ {
        self.log.iter().map(|entry| entry.event_type)
    }
}
