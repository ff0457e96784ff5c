// Licensed under the Apache-2.0 license

//! Interrupt dispatch.
//!
//! The handler masks the IP, translates the pending status bits into events
//! for the active target instance and the in-play controller instance, drains
//! the queues and acknowledges the bits it saw.

use super::common::{LogLevel, INVALID_INSTANCE, MAX_INSTANCES};
use super::event::Event;
use super::log::LogEventType;
use super::profile::Profile;
use super::registers::{RegisterBlock, SmbusFields, SmbusRegisters};
use crate::common::Logger;

/// IER/ISR bits.
pub mod irq {
    pub const ERROR: u32 = 1 << 0;
    pub const TGT_LOA: u32 = 1 << 1;
    pub const TGT_PEC: u32 = 1 << 2;
    pub const TGT_DONE: u32 = 1 << 3;
    pub const TGT_DESC_FIFO_EMPTY: u32 = 1 << 4;
    pub const TGT_RX_FIFO_FILL: u32 = 1 << 5;
    pub const TGT_READ: u32 = 1 << 6;
    pub const TGT_WRITE: u32 = 1 << 7;
    pub const TGT_DESC_FIFO_ALMOST_EMPTY: u32 = 1 << 8;
    pub const CTLR_LOA: u32 = 1 << 9;
    pub const CTLR_NACK: u32 = 1 << 10;
    pub const CTLR_PEC: u32 = 1 << 11;
    pub const CTLR_DONE: u32 = 1 << 12;
    pub const CTLR_DESC_FIFO_EMPTY: u32 = 1 << 13;
    pub const CTLR_RX_FIFO_FILL: u32 = 1 << 14;
    pub const CTLR_DESC_FIFO_ALMOST_EMPTY: u32 = 1 << 15;

    pub const TGT: u32 = 0x1FE;
    pub const CTLR: u32 = 0xFE00;
    pub const READ_OR_WRITE: u32 = TGT_READ | TGT_WRITE;
}

/// Error IER/ISR bits.
pub mod err {
    pub const SMBCLK_LOW_TIMEOUT: u32 = 1 << 0;
    pub const SMBDAT_LOW_TIMEOUT: u32 = 1 << 1;
    pub const TGT_UNEXPECTED_BUS_IDLE: u32 = 1 << 2;
    pub const TGT_DESC_ERROR: u32 = 1 << 3;
    pub const TGT_DESC_FIFO_UNDERFLOW: u32 = 1 << 4;
    pub const TGT_DESC_FIFO_OVERFLOW: u32 = 1 << 5;
    pub const TGT_DESC_FIFO_ERROR: u32 = 1 << 6;
    pub const TGT_RX_FIFO_UNDERFLOW: u32 = 1 << 7;
    pub const TGT_RX_FIFO_OVERFLOW: u32 = 1 << 8;
    pub const TGT_RX_FIFO_ERROR: u32 = 1 << 9;
    pub const TGT_TEXT_TIMEOUT: u32 = 1 << 10;
    pub const CTLR_DESC_ERROR: u32 = 1 << 11;
    pub const CTLR_DESC_FIFO_UNDERFLOW: u32 = 1 << 12;
    pub const CTLR_DESC_FIFO_OVERFLOW: u32 = 1 << 13;
    pub const CTLR_DESC_FIFO_ERROR: u32 = 1 << 14;
    pub const CTLR_RX_FIFO_UNDERFLOW: u32 = 1 << 15;
    pub const CTLR_RX_FIFO_OVERFLOW: u32 = 1 << 16;
    pub const CTLR_RX_FIFO_ERROR: u32 = 1 << 17;
    pub const CTLR_TEXT_TIMEOUT: u32 = 1 << 18;
    pub const CTLR_CEXT_TIMEOUT: u32 = 1 << 19;

    pub const ALL: u32 = 0xF_FFFF;
}

/// Everything except the controller almost-empty, which is enabled only
/// while a controller transaction is in play.
pub const IER_DEFAULT: u32 = 0xDFEF;
/// Target sources only, restored once a controller transaction completes.
pub const IER_TARGET_ONLY: u32 = 0x1EF;
pub const ISR_ALL: u32 = 0xFFFF;

// Queue order within one interrupt: faults first, then protocol progress.
const TARGET_ERROR_EVENTS: [(u32, Event); 11] = [
    (err::TGT_TEXT_TIMEOUT, Event::TgtPhyTextTimeout),
    (err::TGT_RX_FIFO_ERROR, Event::TgtRxFifoError),
    (err::TGT_RX_FIFO_OVERFLOW, Event::TgtRxFifoOverflow),
    (err::TGT_RX_FIFO_UNDERFLOW, Event::TgtRxFifoUnderflow),
    (err::TGT_DESC_FIFO_ERROR, Event::TgtDescFifoError),
    (err::TGT_DESC_FIFO_OVERFLOW, Event::TgtDescFifoOverflow),
    (err::TGT_DESC_FIFO_UNDERFLOW, Event::TgtDescFifoUnderflow),
    (err::TGT_DESC_ERROR, Event::TgtDescError),
    (err::TGT_UNEXPECTED_BUS_IDLE, Event::TgtPhyUnexpectedBusIdle),
    (err::SMBDAT_LOW_TIMEOUT, Event::TgtPhySmbdatLowTimeout),
    (err::SMBCLK_LOW_TIMEOUT, Event::TgtPhySmbclkLowTimeout),
];

const TARGET_EVENTS: [(u32, Event); 7] = [
    (irq::TGT_LOA, Event::TgtLoaError),
    (irq::TGT_PEC, Event::TgtPecError),
    (irq::TGT_READ, Event::TgtRead),
    (irq::TGT_WRITE, Event::TgtWrite),
    (irq::TGT_RX_FIFO_FILL, Event::TgtData),
    (irq::TGT_DONE, Event::TgtDone),
    (irq::TGT_DESC_FIFO_ALMOST_EMPTY, Event::TgtDescFifoAlmostEmpty),
];

const CONTROLLER_ERROR_EVENTS: [(u32, Event); 9] = [
    (err::CTLR_TEXT_TIMEOUT, Event::CtlrPhyTextTimeout),
    (err::CTLR_CEXT_TIMEOUT, Event::CtlrPhyCextTimeout),
    (err::CTLR_RX_FIFO_ERROR, Event::CtlrRxFifoError),
    (err::CTLR_RX_FIFO_OVERFLOW, Event::CtlrRxFifoOverflow),
    (err::CTLR_RX_FIFO_UNDERFLOW, Event::CtlrRxFifoUnderflow),
    (err::CTLR_DESC_FIFO_ERROR, Event::CtlrDescFifoError),
    (err::CTLR_DESC_FIFO_OVERFLOW, Event::CtlrDescFifoOverflow),
    (err::CTLR_DESC_FIFO_UNDERFLOW, Event::CtlrDescFifoUnderflow),
    (err::CTLR_DESC_ERROR, Event::CtlrDescError),
];

// Done goes last so data and top-ups are handled before completion.
const CONTROLLER_EVENTS: [(u32, Event); 6] = [
    (irq::CTLR_LOA, Event::CtlrLoaError),
    (irq::CTLR_NACK, Event::CtlrNackError),
    (irq::CTLR_PEC, Event::CtlrPecError),
    (irq::CTLR_RX_FIFO_FILL, Event::CtlrData),
    (irq::CTLR_DESC_FIFO_ALMOST_EMPTY, Event::CtlrDescFifoAlmostEmpty),
    (irq::CTLR_DONE, Event::CtlrDone),
];

impl<'a, R: RegisterBlock, L: Logger> Profile<'a, R, L> {
    /// Services one SMBus IP interrupt.
    ///
    /// Call from the interrupt vector the IP is wired to. Handlers run inside
    /// this call.
    pub fn interrupt_handler(&mut self) {
        let phy = self.regs.phy();
        if !phy.smbclk_low_timeout() && !phy.smbdat_low_timeout() {
            // Re-arm the stuck-bus sources once the lines have recovered.
            self.regs.write_err_irq_ier(err::ALL);
        }
        self.regs.write_irq_gie(0);

        let in_play_at_entry = self.in_play;
        let isr = self.regs.read_irq_isr();
        let vector = isr & self.regs.read_irq_ier();
        // Error status is only taken, and acknowledged, under the summary bit;
        // anything latched earlier stays pending and raises its own interrupt.
        let mut err_isr = 0;
        let mut errors = 0;
        if vector & irq::ERROR != 0 {
            err_isr = self.regs.read_err_irq_isr();
            errors = err_isr & self.regs.read_err_irq_ier();
            // Stuck-line errors stay asserted until the bus recovers; mask
            // them so they do not storm.
            if errors & err::SMBCLK_LOW_TIMEOUT != 0 {
                let ier = self.regs.read_err_irq_ier();
                self.regs.write_err_irq_ier(ier & !err::SMBCLK_LOW_TIMEOUT);
            }
            if errors & err::SMBDAT_LOW_TIMEOUT != 0 {
                let ier = self.regs.read_err_irq_ier();
                self.regs.write_err_irq_ier(ier & !err::SMBDAT_LOW_TIMEOUT);
            }
        }
        self.log.add(
            LogLevel::Info,
            INVALID_INSTANCE,
            LogEventType::Interrupt,
            isr,
            err_isr,
        );

        if vector & (irq::TGT | irq::ERROR) != 0 {
            self.dispatch_target(vector, errors);
        }
        if vector & (irq::CTLR | irq::ERROR) != 0 {
            self.dispatch_controller(vector, errors);
        }

        self.regs.write_err_irq_isr(err_isr);
        self.regs.write_irq_isr(isr);
        if in_play_at_entry != INVALID_INSTANCE && vector & irq::CTLR_DONE != 0 {
            self.regs.write_irq_ier(IER_TARGET_ONLY);
        }
        self.regs.write_irq_gie(1);
    }

    fn dispatch_target(&mut self, vector: u32, errors: u32) {
        if vector & irq::READ_OR_WRITE != 0 {
            let address = self.regs.target().address();
            self.active_target = self
                .instances
                .iter()
                .find(|inst| inst.in_use && inst.address == address)
                .map_or(INVALID_INSTANCE, |inst| inst.index);
        }

        let slot = usize::from(self.active_target);
        if slot >= MAX_INSTANCES {
            self.regs.write_tgt_rx_reset(1);
            return;
        }
        self.queue_events(slot, errors, &TARGET_ERROR_EVENTS);
        self.queue_events(slot, vector, &TARGET_EVENTS);
        self.drain_events();
    }

    fn dispatch_controller(&mut self, vector: u32, errors: u32) {
        let slot = usize::from(self.in_play);
        if slot >= MAX_INSTANCES {
            self.regs.write_ctrl_rx_reset(1);
            self.regs.write_ctrl_desc_reset(1);
            return;
        }
        self.queue_events(slot, errors, &CONTROLLER_ERROR_EVENTS);
        self.queue_events(slot, vector, &CONTROLLER_EVENTS);
        self.drain_events();
    }

    fn queue_events(&mut self, slot: usize, bits: u32, table: &[(u32, Event)]) {
        for &(mask, event) in table {
            if bits & mask == 0 {
                continue;
            }
            let Some(inst) = self.instances.get_mut(slot) else {
                return;
            };
            if inst.queue.push(event).is_err() {
                self.log.error(inst.index, u32::from(event.code()), line!());
            }
        }
    }
}
