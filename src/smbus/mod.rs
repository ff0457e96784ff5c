// Licensed under the Apache-2.0 license

//! Driver for the AMD SMBus IP.
//!
//! The IP provides a target with eight address slots and a controller, each
//! fed through a descriptor FIFO and drained through a receive FIFO. This
//! module layers SMBus 3.x protocols on top: per-slot protocol state machines,
//! the Address Resolution Protocol responder and a plain I2C facade.
//!
//! Entry points live on [`Profile`]. Applications bind an [`SmbusHandler`] or
//! [`I2cHandler`] to each slot and call [`Profile::interrupt_handler`] from the
//! IP's interrupt vector.

pub(crate) mod action;
pub mod arp;
pub mod common;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod i2c;
pub mod instance;
pub mod interrupt;
pub mod log;
pub mod profile;
pub mod registers;
pub mod state;
pub mod timing;
pub mod traits;

pub use common::{
    AddressType, ArpCapability, FrequencyClass, InstanceConfig, LogLevel, MessageStats, Protocol,
    SmbusConfig, SmbusConfigBuilder, Status, Udid, Version,
};
pub use error::Error;
pub use event::Event;
pub use instance::Instance;
pub use profile::Profile;
pub use registers::{Mmio, RegisterBlock};
pub use state::State;
pub use traits::{I2cHandler, SmbusHandler};
