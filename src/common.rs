// Licensed under the Apache-2.0 license

//! Diagnostic logging sink shared by the driver modules.
//!
//! Drivers carry a `Logger` as a generic parameter so that board code can route
//! messages to a UART while tests and production builds without a console use
//! [`NoOpLogger`].

pub trait Logger {
    fn debug(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Logger that drops every message.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger {}

impl Logger for NoOpLogger {
    fn debug(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}
