// Licensed under the Apache-2.0 license

//! Caller-supplied handlers.
//!
//! Each SMBus instance is bound to a [`SmbusHandler`] and each I2C device to an
//! [`I2cHandler`]. The driver invokes them from the event dispatcher, which runs
//! either in interrupt context or inside the synchronous drain performed when a
//! controller transaction is started. Implementations must not block and must
//! not call back into the profile.
//!
//! Handlers are borrowed immutably by the profile; implementations that need to
//! record state use interior mutability.

use super::common::{Protocol, Status};
use super::event::Event;

/// Callbacks for an SMBus instance acting as target and controller.
pub trait SmbusHandler {
    /// Maps an incoming command byte to the protocol the target implements for it.
    ///
    /// Called when a controller addresses this instance and the command byte has
    /// arrived. Returning [`Protocol::None`] makes the target NACK the command.
    ///
    /// Simple devices never receive a command byte and may keep the default.
    fn get_protocol(&self, command: u8) -> Protocol {
        let _ = command;
        Protocol::None
    }

    /// Supplies the bytes the target sends back for `command`.
    ///
    /// # Arguments
    ///
    /// * `command` - Command byte received from the controller
    /// * `data` - Buffer of up to 256 bytes to fill
    ///
    /// # Returns
    ///
    /// Number of valid bytes written into `data`. Values larger than the buffer
    /// are ignored. Fixed-length protocols send their implied length regardless.
    fn get_data(&self, command: u8, data: &mut [u8]) -> usize;

    /// Delivers bytes received for `command`.
    ///
    /// For target transactions `transaction_id` is zero; for controller reads it
    /// is the id returned when the transaction was started.
    fn write_data(&self, command: u8, data: &[u8], transaction_id: u32);

    /// Reports the outcome of a transaction.
    fn announce_result(&self, command: u8, transaction_id: u32, status: Status);

    /// ARP assigned this instance a new address.
    fn arp_address_change(&self, new_address: u8) {
        let _ = new_address;
    }

    /// A bus error aborted the current transaction.
    fn bus_error(&self, error: Event) {
        let _ = error;
    }

    /// A bus timeout was reported without aborting the transaction.
    fn bus_warning(&self, warning: Event) {
        let _ = warning;
    }
}

/// Callbacks for a plain I2C device.
pub trait I2cHandler {
    /// Supplies bytes to send when a controller reads from this device.
    fn get_data(&self, data: &mut [u8]) -> usize;

    /// Delivers bytes written to this device, or read back by a controller
    /// transaction started through this device.
    fn write_data(&self, data: &[u8]);

    fn announce_result(&self, status: Status);

    fn bus_error(&self, error: Event) {
        let _ = error;
    }

    fn bus_warning(&self, warning: Event) {
        let _ = warning;
    }
}

/// Handler bound to an instance slot.
#[derive(Copy, Clone)]
pub enum Handler<'a> {
    Smbus(&'a dyn SmbusHandler),
    I2c(&'a dyn I2cHandler),
}

impl Handler<'_> {
    pub(crate) fn bus_error(&self, event: Event) {
        match self {
            Self::Smbus(h) => h.bus_error(event),
            Self::I2c(h) => h.bus_error(event),
        }
    }

    pub(crate) fn bus_warning(&self, event: Event) {
        match self {
            Self::Smbus(h) => h.bus_warning(event),
            Self::I2c(h) => h.bus_warning(event),
        }
    }
}
