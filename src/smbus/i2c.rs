// Licensed under the Apache-2.0 license

//! Plain I2C devices on the SMBus IP.
//!
//! An I2C device occupies one of the caller slots like an SMBus instance but
//! has no command byte, no ARP role and never uses PEC. As target it accepts
//! raw writes and serves raw reads through its [`I2cHandler`]; as controller
//! it runs write, read and combined write-then-read transfers.

use super::common::{ArpCapability, Protocol, DATA_SIZE_MAX, MAX_NON_ARP_INSTANCES};
use super::error::Error;
use super::profile::Profile;
use super::registers::{RegisterBlock, SmbusFields};
use super::state::State;
use super::traits::{Handler, I2cHandler};
use crate::common::Logger;

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    /// Registers an I2C target at `address` and returns its id.
    ///
    /// # Errors
    ///
    /// * [`Error::AddressCollision`] if another slot owns `address`.
    /// * [`Error::NoFreeInstance`] if slots `0..=6` are all allocated.
    pub fn create_i2c_device(
        &mut self,
        address: u8,
        handler: &'a dyn I2cHandler,
    ) -> Result<u8, Error> {
        self.ensure_ready()?;
        if address & 0x80 != 0 {
            return Err(Error::InvalidArgument);
        }
        self.check_collision(address)?;
        let slot = self.free_slot()?;
        let inst = self.instances.get_mut(slot).ok_or(Error::InvalidArgument)?;
        inst.in_use = true;
        inst.is_i2c = true;
        inst.address = address;
        inst.handler = Some(Handler::I2c(handler));
        inst.arp_capability = ArpCapability::NonArpCapable;
        inst.av_flag = true;
        inst.pec_required = false;

        self.regs.set_target_address(slot, address);
        self.regs.set_target_enable(slot, true);
        self.log.debug(slot as u8, u32::from(address), line!());
        Ok(slot as u8)
    }

    /// Releases an I2C device.
    ///
    /// # Errors
    ///
    /// * [`Error::InstanceNotInUse`] if the slot is free or holds an SMBus instance.
    /// * [`Error::InstanceBusy`] while the device is mid-transfer.
    pub fn destroy_i2c_device(&mut self, id: u8) -> Result<(), Error> {
        self.ensure_ready()?;
        let slot = usize::from(id);
        if slot >= MAX_NON_ARP_INSTANCES {
            return Err(Error::InvalidArgument);
        }
        let inst = self.instances.get(slot).ok_or(Error::InvalidArgument)?;
        if !inst.in_use || !inst.is_i2c {
            return Err(Error::InstanceNotInUse);
        }
        if inst.state != State::Initial {
            return Err(Error::InstanceBusy);
        }
        self.release_slot(slot);
        Ok(())
    }

    /// Writes `data` to the device at `address`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty or oversized payload, plus the
    /// controller errors of [`Profile::initiate_command`].
    pub fn i2c_write(&mut self, id: u8, address: u8, data: &[u8]) -> Result<u32, Error> {
        if data.is_empty() || data.len() > DATA_SIZE_MAX {
            return Err(Error::InvalidArgument);
        }
        self.start_i2c(id, address, Protocol::I2cWrite, data, 0)
    }

    /// Reads `len` bytes from the device at `address`.
    ///
    /// The bytes arrive through the handler's `write_data` before the result
    /// is announced.
    pub fn i2c_read(&mut self, id: u8, address: u8, len: usize) -> Result<u32, Error> {
        if len == 0 || len > DATA_SIZE_MAX {
            return Err(Error::InvalidArgument);
        }
        self.start_i2c(id, address, Protocol::I2cRead, &[], len)
    }

    /// Writes `data` then reads `len` bytes after a repeated start.
    pub fn i2c_write_read(
        &mut self,
        id: u8,
        address: u8,
        data: &[u8],
        len: usize,
    ) -> Result<u32, Error> {
        if data.is_empty() || data.len() > DATA_SIZE_MAX || len == 0 || len > DATA_SIZE_MAX {
            return Err(Error::InvalidArgument);
        }
        self.start_i2c(id, address, Protocol::I2cWriteRead, data, len)
    }

    fn start_i2c(
        &mut self,
        id: u8,
        address: u8,
        protocol: Protocol,
        data: &[u8],
        len: usize,
    ) -> Result<u32, Error> {
        let slot = usize::from(id);
        if slot >= MAX_NON_ARP_INSTANCES || address & 0x80 != 0 {
            return Err(Error::InvalidArgument);
        }
        self.claim_controller(slot, true)?;
        let txid = self.prepare_controller(slot, address, 0, protocol, data, len);
        self.start_controller_transaction(slot);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use crate::smbus::common::{ArpCapability, InstanceConfig, Protocol, Status};
    use crate::smbus::error::Error;
    use crate::smbus::event::Event;
    use crate::smbus::profile::harness;
    use crate::smbus::state::State;
    use crate::smbus::traits::recorder::{Call, Recorder};

    #[test]
    fn device_lifecycle_is_separate_from_smbus() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let smbus = profile
            .create_instance(InstanceConfig::new(0x50, ArpCapability::NonArpCapable), &rec)
            .unwrap();
        assert_eq!(
            profile.create_i2c_device(0x50, &rec),
            Err(Error::AddressCollision)
        );
        let id = profile.create_i2c_device(0x30, &rec).unwrap();
        assert!(profile.instance(id).unwrap().is_i2c());
        assert!(!profile.instance(7).unwrap().in_use());

        assert_eq!(profile.destroy_i2c_device(smbus), Err(Error::InstanceNotInUse));
        assert_eq!(profile.destroy_instance(id), Err(Error::InstanceNotInUse));
        assert_eq!(
            profile.initiate_command(id, 0x20, 0, Protocol::ReadByte, &[], false),
            Err(Error::InstanceNotInUse)
        );
        assert_eq!(profile.i2c_read(smbus, 0x20, 1), Err(Error::InstanceNotInUse));
        profile.destroy_i2c_device(id).unwrap();
    }

    #[test]
    fn write_streams_then_stops() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile.create_i2c_device(0x30, &rec).unwrap();
        profile.regs.clear_trace();

        profile.i2c_write(id, 0x20, &[1, 2, 3]).unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x040, 0x201, 0x202]);
        assert_eq!(profile.instance(id).unwrap().state(), State::ControllerWriteByte);

        profile.inject(id, &[Event::CtlrDescFifoAlmostEmpty]);
        assert_eq!(profile.regs.ctrl_desc.last(), Some(&0x303));
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingDone);

        profile.inject(id, &[Event::CtlrDone]);
        assert_eq!(rec.calls(), [Call::Announce(0, 0, Status::Success)]);
        assert_eq!(profile.in_play(), None);
    }

    #[test]
    fn read_delivers_bytes() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile.create_i2c_device(0x30, &rec).unwrap();
        profile.regs.clear_trace();

        profile.i2c_read(id, 0x20, 3).unwrap();
        assert_eq!(profile.regs.ctrl_desc, [0x841]);

        profile.inject(id, &[Event::CtlrDescFifoAlmostEmpty]);
        assert_eq!(profile.regs.ctrl_desc, [0x841, 0xA00, 0xA00, 0xB00]);

        profile.regs.push_ctrl_rx(&[7, 8, 9]);
        profile.inject(id, &[Event::CtlrData, Event::CtlrDone]);
        assert_eq!(
            rec.calls(),
            [
                Call::WriteData(0, vec![7, 8, 9], 0),
                Call::Announce(0, 0, Status::Success)
            ]
        );
    }

    #[test]
    fn target_write_is_delivered_on_done() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile.create_i2c_device(0x30, &rec).unwrap();

        profile.inject(id, &[Event::TgtWrite]);
        assert_eq!(profile.instance(id).unwrap().state(), State::AwaitingData);
        profile.regs.push_tgt_rx(&[0xAA, 0xBB]);
        profile.inject(id, &[Event::TgtData, Event::TgtDone]);

        assert_eq!(profile.instance(id).unwrap().state(), State::Initial);
        assert_eq!(
            rec.calls(),
            [
                Call::WriteData(0, vec![0xAA, 0xBB], 0),
                Call::Announce(0, 0, Status::Success)
            ]
        );
    }

    #[test]
    fn transfer_lengths_are_checked() {
        let rec = Recorder::new();
        let mut profile = harness::profile();
        let id = profile.create_i2c_device(0x30, &rec).unwrap();
        assert_eq!(profile.i2c_read(id, 0x20, 0), Err(Error::InvalidArgument));
        assert_eq!(profile.i2c_read(id, 0x20, 257), Err(Error::InvalidArgument));
        assert_eq!(profile.i2c_write(id, 0x20, &[]), Err(Error::InvalidArgument));
        assert_eq!(
            profile.i2c_write_read(id, 0x20, &[1], 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(profile.in_play(), None);
    }
}
