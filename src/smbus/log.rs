// Licensed under the Apache-2.0 license

//! Diagnostic log ring.
//!
//! A fixed-capacity history of driver activity (interrupt status, state machine
//! steps, protocol decisions, errors). Once full, each new entry overwrites the
//! oldest one. The ring is a side channel for debugging and is rendered as text
//! on request; nothing in the driver reads it back.

use core::fmt::{self, Write};

use heapless::HistoryBuffer;

use super::common::{LogLevel, Protocol};
use super::event::Event;
use super::state::State;

pub const MAX_CIRCULAR_LOG_ENTRIES: usize = 5000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEventType {
    Interrupt = 1,
    Fsm,
    Error,
    HwRead,
    HwWrite,
    Protocol,
    Debug,
    TryRead,
    TryWrite,
}

impl LogEventType {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Interrupt => "INTERRUPT",
            Self::Fsm => "FSM",
            Self::Error => "ERROR",
            Self::HwRead => "HW_READ",
            Self::HwWrite => "HW_WRITE",
            Self::Protocol => "PROTOCOL",
            Self::Debug => "DEBUG",
            Self::TryRead => "TRYREAD",
            Self::TryWrite => "TRYWRITE",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub ticks: u32,
    pub event_type: LogEventType,
    pub instance: u8,
    pub entry1: u32,
    pub entry2: u32,
}

pub struct EventLog {
    entries: HistoryBuffer<LogEntry, MAX_CIRCULAR_LOG_ENTRIES>,
    level: LogLevel,
    read_ticks: fn() -> u32,
}

impl EventLog {
    pub const fn new(level: LogLevel, read_ticks: fn() -> u32) -> Self {
        Self {
            entries: HistoryBuffer::new(),
            level,
            read_ticks,
        }
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    /// Records an entry if `level` is enabled.
    pub fn add(
        &mut self,
        level: LogLevel,
        instance: u8,
        event_type: LogEventType,
        entry1: u32,
        entry2: u32,
    ) {
        if level == LogLevel::None || level > self.level {
            return;
        }
        self.entries.write(LogEntry {
            ticks: (self.read_ticks)(),
            event_type,
            instance,
            entry1,
            entry2,
        });
    }

    pub fn fsm(&mut self, instance: u8, state: State, event: Event) {
        self.add(
            LogLevel::Debug,
            instance,
            LogEventType::Fsm,
            u32::from(state as u8),
            u32::from(event.code()),
        );
    }

    pub fn protocol(&mut self, instance: u8, command: u8, protocol: Protocol) {
        self.add(
            LogLevel::Info,
            instance,
            LogEventType::Protocol,
            u32::from(command),
            u32::from(protocol as u8),
        );
    }

    pub fn error(&mut self, instance: u8, value: u32, line: u32) {
        self.add(LogLevel::Error, instance, LogEventType::Error, value, line);
    }

    pub fn debug(&mut self, instance: u8, value: u32, line: u32) {
        self.add(LogLevel::Debug, instance, LogEventType::Debug, value, line);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.oldest_ordered()
    }

    /// Writes every entry, oldest first, one line per entry.
    pub fn render<W: Write>(&self, out: &mut W) -> fmt::Result {
        for (index, entry) in self.iter().enumerate() {
            write!(
                out,
                "{:04} {:07} {} {:2} ",
                index,
                entry.ticks,
                entry.event_type.label(),
                entry.instance
            )?;
            match entry.event_type {
                LogEventType::TryWrite | LogEventType::TryRead | LogEventType::Debug => {
                    write!(out, "0x{:08x} line {}", entry.entry1, entry.entry2)?;
                }
                LogEventType::Protocol => {
                    let name = u8::try_from(entry.entry2)
                        .ok()
                        .and_then(Protocol::from_u8)
                        .map_or("UNKNOWN", Protocol::name);
                    write!(out, "0x{:08x} {}", entry.entry1, name)?;
                }
                LogEventType::HwWrite
                | LogEventType::HwRead
                | LogEventType::Interrupt
                | LogEventType::Error => {
                    write!(out, "0x{:08x} 0x{:08x}", entry.entry1, entry.entry2)?;
                }
                LogEventType::Fsm => {
                    let state = u8::try_from(entry.entry1)
                        .ok()
                        .and_then(State::from_u8)
                        .map_or("UNKNOWN", State::name);
                    let event = u8::try_from(entry.entry2)
                        .ok()
                        .and_then(Event::from_code)
                        .map_or("UNKNOWN", Event::name);
                    write!(out, "{} {}", state, event)?;
                }
            }
            out.write_str("\r\n")?;
        }
        Ok(())
    }
}
