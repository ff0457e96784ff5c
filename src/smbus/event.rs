// Licensed under the Apache-2.0 license

//! Protocol events and the per-instance event queue.
//!
//! The interrupt dispatcher translates status bits into [`Event`]s and pushes
//! them onto the owning instance's queue; the queue is drained in order by the
//! state machine.

use heapless::Deque;

pub const MAX_EVENT_ELEMENTS: usize = 300;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    TgtWrite = 0x01,
    TgtRead = 0x02,
    TgtData = 0x03,
    TgtDone = 0x04,
    TgtDesc = 0x05,
    TgtLoaError = 0x06,
    TgtPecError = 0x07,
    TgtPhyTextTimeout = 0x08,
    TgtRxFifoError = 0x09,
    TgtRxFifoOverflow = 0x0A,
    TgtRxFifoUnderflow = 0x0B,
    TgtDescFifoError = 0x0C,
    TgtDescFifoOverflow = 0x0D,
    TgtDescFifoUnderflow = 0x0E,
    TgtDescError = 0x0F,
    TgtPhyUnexpectedBusIdle = 0x10,
    TgtPhySmbdatLowTimeout = 0x11,
    TgtPhySmbclkLowTimeout = 0x12,
    CtlrWrite = 0x13,
    CtlrRead = 0x14,
    CtlrData = 0x15,
    CtlrDone = 0x16,
    CtlrDescFifoAlmostEmpty = 0x17,
    CtlrLoaError = 0x18,
    CtlrNackError = 0x19,
    CtlrPecError = 0x1A,
    CtlrPhyTextTimeout = 0x1B,
    CtlrPhyCextTimeout = 0x1C,
    CtlrRxFifoError = 0x1D,
    CtlrRxFifoOverflow = 0x1E,
    CtlrRxFifoUnderflow = 0x1F,
    CtlrDescFifoError = 0x20,
    CtlrDescFifoOverflow = 0x21,
    CtlrDescFifoUnderflow = 0x22,
    CtlrDescError = 0x23,
    SendNextByte = 0x24,
    IsPecRequired = 0x25,
    TgtDescFifoAlmostEmpty = 0x26,
}

const EVENT_TABLE: [Event; 38] = [
    Event::TgtWrite,
    Event::TgtRead,
    Event::TgtData,
    Event::TgtDone,
    Event::TgtDesc,
    Event::TgtLoaError,
    Event::TgtPecError,
    Event::TgtPhyTextTimeout,
    Event::TgtRxFifoError,
    Event::TgtRxFifoOverflow,
    Event::TgtRxFifoUnderflow,
    Event::TgtDescFifoError,
    Event::TgtDescFifoOverflow,
    Event::TgtDescFifoUnderflow,
    Event::TgtDescError,
    Event::TgtPhyUnexpectedBusIdle,
    Event::TgtPhySmbdatLowTimeout,
    Event::TgtPhySmbclkLowTimeout,
    Event::CtlrWrite,
    Event::CtlrRead,
    Event::CtlrData,
    Event::CtlrDone,
    Event::CtlrDescFifoAlmostEmpty,
    Event::CtlrLoaError,
    Event::CtlrNackError,
    Event::CtlrPecError,
    Event::CtlrPhyTextTimeout,
    Event::CtlrPhyCextTimeout,
    Event::CtlrRxFifoError,
    Event::CtlrRxFifoOverflow,
    Event::CtlrRxFifoUnderflow,
    Event::CtlrDescFifoError,
    Event::CtlrDescFifoOverflow,
    Event::CtlrDescFifoUnderflow,
    Event::CtlrDescError,
    Event::SendNextByte,
    Event::IsPecRequired,
    Event::TgtDescFifoAlmostEmpty,
];

impl Event {
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        EVENT_TABLE.get(usize::from(code).checked_sub(1)?).copied()
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Timeouts reported to the handler without aborting the transaction.
    #[must_use]
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            Self::TgtPhyTextTimeout | Self::CtlrPhyTextTimeout | Self::CtlrPhyCextTimeout
        )
    }

    /// Target-side faults that abort the current target transaction.
    #[must_use]
    pub fn is_target_error(self) -> bool {
        matches!(
            self,
            Self::TgtLoaError
                | Self::TgtPecError
                | Self::TgtRxFifoError
                | Self::TgtRxFifoOverflow
                | Self::TgtRxFifoUnderflow
                | Self::TgtDescFifoError
                | Self::TgtDescFifoOverflow
                | Self::TgtDescFifoUnderflow
                | Self::TgtDescError
                | Self::TgtPhyUnexpectedBusIdle
                | Self::TgtPhySmbdatLowTimeout
                | Self::TgtPhySmbclkLowTimeout
        )
    }

    /// Controller-side faults that abort the transaction in play.
    #[must_use]
    pub fn is_controller_error(self) -> bool {
        matches!(
            self,
            Self::CtlrLoaError
                | Self::CtlrNackError
                | Self::CtlrPecError
                | Self::CtlrRxFifoError
                | Self::CtlrRxFifoOverflow
                | Self::CtlrRxFifoUnderflow
                | Self::CtlrDescFifoError
                | Self::CtlrDescFifoOverflow
                | Self::CtlrDescFifoUnderflow
                | Self::CtlrDescError
        )
    }

    /// Internal events that ask the dispatcher to run the state machine again.
    #[must_use]
    pub fn is_internal(self) -> bool {
        matches!(self, Self::SendNextByte | Self::IsPecRequired)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TgtWrite => "TGT_WRITE",
            Self::TgtRead => "TGT_READ",
            Self::TgtData => "TGT_DATA",
            Self::TgtDone => "TGT_DONE",
            Self::TgtDesc => "TGT_DESC",
            Self::TgtLoaError => "TGT_LOA_ERROR",
            Self::TgtPecError => "TGT_PEC_ERROR",
            Self::TgtPhyTextTimeout => "TGT_TEXT_TIMEOUT",
            Self::TgtRxFifoError => "TGT_RX_FIFO_ERROR",
            Self::TgtRxFifoOverflow => "TGT_RX_FIFO_OVERFLOW",
            Self::TgtRxFifoUnderflow => "TGT_RX_FIFO_UNDERFLOW",
            Self::TgtDescFifoError => "TGT_DESC_FIFO_ERROR",
            Self::TgtDescFifoOverflow => "TGT_DESC_FIFO_OVERFLOW",
            Self::TgtDescFifoUnderflow => "TGT_DESC_FIFO_UNDERFLOW",
            Self::TgtDescError => "TGT_DESC_ERROR",
            Self::TgtPhyUnexpectedBusIdle => "TGT_UNEXPECTED_BUS_IDLE",
            Self::TgtPhySmbdatLowTimeout => "TGT_SMBDAT_LOW_TIMEOUT",
            Self::TgtPhySmbclkLowTimeout => "TGT_SMBCLK_LOW_TIMEOUT",
            Self::CtlrWrite => "CTLR_WRITE",
            Self::CtlrRead => "CTLR_READ",
            Self::CtlrData => "CTLR_DATA",
            Self::CtlrDone => "CTLR_DONE",
            Self::CtlrDescFifoAlmostEmpty => "CTLR_DESC_FIFO_ALMOST_EMPTY",
            Self::CtlrLoaError => "CTLR_LOA_ERROR",
            Self::CtlrNackError => "CTLR_NACK_ERROR",
            Self::CtlrPecError => "CTLR_PEC_ERROR",
            Self::CtlrPhyTextTimeout => "CTLR_TEXT_TIMEOUT",
            Self::CtlrPhyCextTimeout => "CTLR_CEXT_TIMEOUT",
            Self::CtlrRxFifoError => "CTLR_RX_FIFO_ERROR",
            Self::CtlrRxFifoOverflow => "CTLR_RX_FIFO_OVERFLOW",
            Self::CtlrRxFifoUnderflow => "CTLR_RX_FIFO_UNDERFLOW",
            Self::CtlrDescFifoError => "CTLR_DESC_FIFO_ERROR",
            Self::CtlrDescFifoOverflow => "CTLR_DESC_FIFO_OVERFLOW",
            Self::CtlrDescFifoUnderflow => "CTLR_DESC_FIFO_UNDERFLOW",
            Self::CtlrDescError => "CTLR_DESC_ERROR",
            Self::SendNextByte => "SEND_NEXT_BYTE",
            Self::IsPecRequired => "IS_PEC_REQUIRED",
            Self::TgtDescFifoAlmostEmpty => "TGT_DESC_FIFO_ALMOST_EMPTY",
        }
    }
}

/// Bounded FIFO of pending events for one instance.
///
/// A full queue rejects the new event and keeps the ones already queued.
pub struct EventQueue {
    events: Deque<Event, MAX_EVENT_ELEMENTS>,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
        }
    }

    /// Appends `event`, handing it back if the queue is full.
    pub fn push(&mut self, event: Event) -> Result<(), Event> {
        self.events.push_back(event)
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
