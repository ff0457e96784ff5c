// Licensed under the Apache-2.0 license

//! Driver error type.
//!
//! Every public entry point returns `Result<_, Error>`. Bus-level faults such as
//! NACK, loss of arbitration or PEC mismatch are not reported here; they travel
//! through the event queue to the instance's handler callbacks.

use embedded_hal::i2c::ErrorKind;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Argument out of range (instance id, protocol, payload size, address).
    InvalidArgument,
    /// The profile has not been initialized.
    NotInitialized,
    /// `init` was called on a profile that is already initialized.
    AlreadyInitialized,
    /// The register block did not report the SMBus IP magic number.
    HardwareNotFound,
    /// A firewall word no longer holds its sentinel value.
    Firewall,
    /// All instance slots are taken.
    NoFreeInstance,
    /// Another in-use instance already owns the address.
    AddressCollision,
    /// Instance not created, or created through the other API.
    InstanceNotInUse,
    /// Instance is in the middle of a transaction.
    InstanceBusy,
    /// Another instance currently owns the controller.
    ControllerBusy,
    /// The bus reports a clock-low or data-low timeout.
    BusStuck,
    /// Instances must be destroyed before the profile is torn down.
    InstancesInUse,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BusStuck | Self::ControllerBusy => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotInitialized => "profile not initialized",
            Self::AlreadyInitialized => "profile already initialized",
            Self::HardwareNotFound => "SMBus IP not found",
            Self::Firewall => "firewall check failed",
            Self::NoFreeInstance => "no free instance",
            Self::AddressCollision => "address already in use",
            Self::InstanceNotInUse => "instance not in use",
            Self::InstanceBusy => "instance busy",
            Self::ControllerBusy => "controller busy",
            Self::BusStuck => "bus stuck low",
            Self::InstancesInUse => "instances still in use",
        };
        f.write_str(msg)
    }
}
