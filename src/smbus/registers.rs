// Licensed under the Apache-2.0 license

//! Hardware register access for the SMBus IP block.
//!
//! The driver talks to the IP through the [`RegisterBlock`] trait so that the
//! same code runs against memory-mapped hardware ([`Mmio`]) and against the
//! FIFO-modelling mock used by the unit tests. Named accessors for every
//! register are generated once by `smbus_registers!` and shared by the read
//! and write paths; field decoding lives in small newtypes such as
//! [`FifoStatus`].
//!
//! # Register map
//!
//! | Offset          | Register                                   |
//! |-----------------|--------------------------------------------|
//! | `0x000..=0x010` | IP version, revision, magic, build config  |
//! | `0x100..=0x110` | GIE, IER, ISR, error IER, error ISR        |
//! | `0x200..=0x228` | PHY status, glitch filter, timing          |
//! | `0x300..=0x31C` | Target status, descriptor and RX FIFOs     |
//! | `0x320 + 4n`    | Target control for slot `n`                |
//! | `0x400..=0x41C` | Controller enable, descriptor and RX FIFOs |

use core::ptr::NonNull;

use paste::paste;

use super::error::Error;

/// Raw 32-bit access to a register block.
pub trait RegisterBlock {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

macro_rules! smbus_registers {
    (@accessor $name:ident, $offset:literal, ro) => {
        paste! {
            #[inline]
            fn [<read_ $name>](&self) -> u32 {
                self.read($offset)
            }
        }
    };
    (@accessor $name:ident, $offset:literal, wo) => {
        paste! {
            #[inline]
            fn [<write_ $name>](&mut self, value: u32) {
                self.write($offset, value)
            }
        }
    };
    (@accessor $name:ident, $offset:literal, rw) => {
        smbus_registers!(@accessor $name, $offset, ro);
        smbus_registers!(@accessor $name, $offset, wo);
    };
    ($( $name:ident @ $offset:literal : $access:ident ),* $(,)?) => {
        paste! {
            /// Register offsets relative to the block base.
            pub mod offset {
                $( pub const [<$name:upper>]: usize = $offset; )*
            }
        }

        /// Named accessors over any [`RegisterBlock`].
        pub trait SmbusRegisters: RegisterBlock {
            $( smbus_registers!(@accessor $name, $offset, $access); )*
        }

        impl<T: RegisterBlock + ?Sized> SmbusRegisters for T {}
    };
}

smbus_registers! {
    ip_version @ 0x000 : ro,
    ip_revision @ 0x004 : ro,
    ip_magic_num @ 0x008 : ro,
    build_config_0 @ 0x00C : ro,
    build_config_1 @ 0x010 : ro,

    irq_gie @ 0x100 : rw,
    irq_ier @ 0x104 : rw,
    irq_isr @ 0x108 : rw,
    err_irq_ier @ 0x10C : rw,
    err_irq_isr @ 0x110 : rw,

    phy_status @ 0x200 : ro,
    phy_filter_control @ 0x204 : rw,
    phy_bus_freetime @ 0x208 : rw,
    phy_tgt_data_setup @ 0x20C : rw,
    phy_tgt_data_hold @ 0x210 : rw,
    phy_ctrl_data_hold @ 0x214 : rw,
    phy_ctrl_start_hold @ 0x218 : rw,
    phy_ctrl_start_setup @ 0x21C : rw,
    phy_ctrl_stop_setup @ 0x220 : rw,
    phy_ctrl_clk_tlow @ 0x224 : rw,
    phy_ctrl_clk_thigh @ 0x228 : rw,

    tgt_status @ 0x300 : ro,
    tgt_desc_fifo @ 0x304 : wo,
    tgt_desc_status @ 0x308 : ro,
    tgt_rx_fifo @ 0x310 : ro,
    tgt_rx_status @ 0x314 : ro,
    tgt_rx_fill_threshold @ 0x318 : rw,
    tgt_rx_reset @ 0x31C : wo,

    ctrl_enable @ 0x400 : rw,
    ctrl_desc_fifo @ 0x404 : wo,
    ctrl_desc_status @ 0x408 : ro,
    ctrl_desc_reset @ 0x40C : wo,
    ctrl_rx_fifo @ 0x410 : ro,
    ctrl_rx_status @ 0x414 : ro,
    ctrl_rx_fill_threshold @ 0x418 : rw,
    ctrl_rx_reset @ 0x41C : wo,
}

/// First per-slot target control register; slot `n` lives at `+ 4 * n`.
pub const TGT_CONTROL_BASE: usize = 0x320;
pub const TGT_CONTROL_ENABLE: u32 = 1 << 0;
pub const TGT_CONTROL_ADDRESS_SHIFT: u32 = 1;
pub const TGT_CONTROL_ADDRESS_MASK: u32 = 0x7F << TGT_CONTROL_ADDRESS_SHIFT;

/// Status word shared by the descriptor and RX FIFOs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FifoStatus(pub u32);

impl FifoStatus {
    pub const FILL_LEVEL_MASK: u32 = 0xFFFF;
    pub const FULL: u32 = 1 << 16;
    pub const ALMOST_FULL: u32 = 1 << 17;
    pub const ALMOST_EMPTY: u32 = 1 << 18;
    pub const EMPTY: u32 = 1 << 19;
    pub const RESET_BUSY: u32 = 1 << 20;

    #[must_use]
    pub fn fill_level(self) -> u32 {
        self.0 & Self::FILL_LEVEL_MASK
    }
    #[must_use]
    pub fn is_full(self) -> bool {
        self.0 & Self::FULL != 0
    }
    #[must_use]
    pub fn is_almost_full(self) -> bool {
        self.0 & Self::ALMOST_FULL != 0
    }
    #[must_use]
    pub fn is_almost_empty(self) -> bool {
        self.0 & Self::ALMOST_EMPTY != 0
    }
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 & Self::EMPTY != 0
    }
    #[must_use]
    pub fn reset_busy(self) -> bool {
        self.0 & Self::RESET_BUSY != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhyStatus(pub u32);

impl PhyStatus {
    pub const SMBDAT_LOW_TIMEOUT: u32 = 1 << 0;
    pub const SMBCLK_LOW_TIMEOUT: u32 = 1 << 1;
    pub const BUS_IDLE: u32 = 1 << 2;

    #[must_use]
    pub fn smbdat_low_timeout(self) -> bool {
        self.0 & Self::SMBDAT_LOW_TIMEOUT != 0
    }
    #[must_use]
    pub fn smbclk_low_timeout(self) -> bool {
        self.0 & Self::SMBCLK_LOW_TIMEOUT != 0
    }
    #[must_use]
    pub fn bus_idle(self) -> bool {
        self.0 & Self::BUS_IDLE != 0
    }
    /// Either line held low past its timeout.
    #[must_use]
    pub fn bus_stuck(self) -> bool {
        self.smbdat_low_timeout() || self.smbclk_low_timeout()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterControl(pub u32);

impl FilterControl {
    pub const ENABLE: u32 = 1 << 31;
    pub const DURATION_MASK: u32 = 0xFF;

    #[must_use]
    pub fn enabled(self) -> bool {
        self.0 & Self::ENABLE != 0
    }
    #[must_use]
    pub fn duration(self) -> u32 {
        self.0 & Self::DURATION_MASK
    }
}

/// Target status: which address the bus is currently talking to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetStatus(pub u32);

impl TargetStatus {
    pub const ACTIVE: u32 = 1 << 0;
    pub const ADDRESS_SHIFT: u32 = 1;
    pub const ADDRESS_MASK: u32 = 0x7F;
    pub const READ: u32 = 1 << 8;

    #[must_use]
    pub fn active(self) -> bool {
        self.0 & Self::ACTIVE != 0
    }
    #[must_use]
    pub fn address(self) -> u8 {
        ((self.0 >> Self::ADDRESS_SHIFT) & Self::ADDRESS_MASK) as u8
    }
    #[must_use]
    pub fn is_read(self) -> bool {
        self.0 & Self::READ != 0
    }
}

/// Decoded views and multi-step operations on top of [`SmbusRegisters`].
pub trait SmbusFields: SmbusRegisters {
    fn phy(&self) -> PhyStatus {
        PhyStatus(self.read_phy_status())
    }
    fn filter(&self) -> FilterControl {
        FilterControl(self.read_phy_filter_control())
    }
    fn target(&self) -> TargetStatus {
        TargetStatus(self.read_tgt_status())
    }
    fn tgt_desc(&self) -> FifoStatus {
        FifoStatus(self.read_tgt_desc_status())
    }
    fn tgt_rx(&self) -> FifoStatus {
        FifoStatus(self.read_tgt_rx_status())
    }
    fn ctrl_desc(&self) -> FifoStatus {
        FifoStatus(self.read_ctrl_desc_status())
    }
    fn ctrl_rx(&self) -> FifoStatus {
        FifoStatus(self.read_ctrl_rx_status())
    }

    /// Pops one byte from the target RX FIFO.
    fn tgt_rx_byte(&self) -> u8 {
        (self.read_tgt_rx_fifo() & 0xFF) as u8
    }
    /// Pops one byte from the controller RX FIFO.
    fn ctrl_rx_byte(&self) -> u8 {
        (self.read_ctrl_rx_fifo() & 0xFF) as u8
    }

    fn target_control(&self, slot: usize) -> u32 {
        self.read(TGT_CONTROL_BASE + 4 * slot)
    }

    fn set_target_address(&mut self, slot: usize, address: u8) {
        let offset = TGT_CONTROL_BASE + 4 * slot;
        let value = (self.read(offset) & !TGT_CONTROL_ADDRESS_MASK)
            | ((u32::from(address) << TGT_CONTROL_ADDRESS_SHIFT) & TGT_CONTROL_ADDRESS_MASK);
        self.write(offset, value);
    }

    fn set_target_enable(&mut self, slot: usize, enable: bool) {
        let offset = TGT_CONTROL_BASE + 4 * slot;
        let value = self.read(offset);
        let value = if enable {
            value | TGT_CONTROL_ENABLE
        } else {
            value & !TGT_CONTROL_ENABLE
        };
        self.write(offset, value);
    }
}

impl<T: SmbusRegisters + ?Sized> SmbusFields for T {}

/// Volatile access to a memory-mapped SMBus IP.
pub struct Mmio {
    base: NonNull<u32>,
}

impl Mmio {
    /// Wraps the register block at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the address of a mapped SMBus IP register block that
    /// stays valid for the lifetime of the returned value, and no other code
    /// may access the block while it is owned by the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a null base address.
    pub unsafe fn new(base: usize) -> Result<Self, Error> {
        NonNull::new(base as *mut u32)
            .map(|base| Self { base })
            .ok_or(Error::InvalidArgument)
    }
}

impl RegisterBlock for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: `new` requires a valid, exclusively owned register block.
        unsafe { core::ptr::read_volatile(self.base.as_ptr().byte_add(offset)) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        // SAFETY: `new` requires a valid, exclusively owned register block.
        unsafe { core::ptr::write_volatile(self.base.as_ptr().byte_add(offset), value) }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Register block double that models the four FIFOs.

    use super::{offset, FifoStatus, RegisterBlock};
    use crate::smbus::common::{FIFO_DEPTH, MAGIC_NUMBER};
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::vec::Vec;

    pub struct MockRegisters {
        regs: HashMap<usize, u32>,
        tgt_rx: RefCell<VecDeque<u8>>,
        ctrl_rx: RefCell<VecDeque<u8>>,
        /// Every descriptor word written to the target FIFO.
        pub tgt_desc: Vec<u32>,
        /// Every descriptor word written to the controller FIFO.
        pub ctrl_desc: Vec<u32>,
        /// Descriptors not yet consumed by the modelled bus.
        pub tgt_desc_pending: u32,
        pub ctrl_desc_pending: u32,
        pub tgt_desc_full: bool,
        pub ctrl_desc_full: bool,
        /// Full write trace in order.
        pub writes: Vec<(usize, u32)>,
    }

    impl MockRegisters {
        pub fn new() -> Self {
            let mut regs = HashMap::new();
            regs.insert(offset::IP_MAGIC_NUM, MAGIC_NUMBER);
            regs.insert(offset::IP_VERSION, 0x0001_0002);
            regs.insert(offset::BUILD_CONFIG_0, 100_000_000);
            Self {
                regs,
                tgt_rx: RefCell::new(VecDeque::new()),
                ctrl_rx: RefCell::new(VecDeque::new()),
                tgt_desc: Vec::new(),
                ctrl_desc: Vec::new(),
                tgt_desc_pending: 0,
                ctrl_desc_pending: 0,
                tgt_desc_full: false,
                ctrl_desc_full: false,
                writes: Vec::new(),
            }
        }

        pub fn set(&mut self, offset: usize, value: u32) {
            self.regs.insert(offset, value);
        }

        pub fn get(&self, offset: usize) -> u32 {
            self.regs.get(&offset).copied().unwrap_or(0)
        }

        pub fn push_tgt_rx(&self, bytes: &[u8]) {
            self.tgt_rx.borrow_mut().extend(bytes.iter().copied());
        }

        pub fn push_ctrl_rx(&self, bytes: &[u8]) {
            self.ctrl_rx.borrow_mut().extend(bytes.iter().copied());
        }

        pub fn tgt_rx_len(&self) -> usize {
            self.tgt_rx.borrow().len()
        }

        pub fn ctrl_rx_len(&self) -> usize {
            self.ctrl_rx.borrow().len()
        }

        pub fn wrote(&self, offset: usize) -> bool {
            self.writes.iter().any(|&(o, _)| o == offset)
        }

        pub fn last_write(&self, offset: usize) -> Option<u32> {
            self.writes
                .iter()
                .rev()
                .find(|&&(o, _)| o == offset)
                .map(|&(_, v)| v)
        }

        pub fn clear_trace(&mut self) {
            self.writes.clear();
            self.tgt_desc.clear();
            self.ctrl_desc.clear();
        }

        fn fifo_status(fill: u32, full: bool) -> u32 {
            let mut status = fill & FifoStatus::FILL_LEVEL_MASK;
            if full || fill >= FIFO_DEPTH {
                status |= FifoStatus::FULL;
            }
            if fill == 0 {
                status |= FifoStatus::EMPTY;
            }
            status
        }
    }

    impl RegisterBlock for MockRegisters {
        fn read(&self, offset: usize) -> u32 {
            match offset {
                offset::TGT_RX_FIFO => u32::from(self.tgt_rx.borrow_mut().pop_front().unwrap_or(0)),
                offset::CTRL_RX_FIFO => {
                    u32::from(self.ctrl_rx.borrow_mut().pop_front().unwrap_or(0))
                }
                offset::TGT_RX_STATUS => Self::fifo_status(self.tgt_rx_len() as u32, false),
                offset::CTRL_RX_STATUS => Self::fifo_status(self.ctrl_rx_len() as u32, false),
                offset::TGT_DESC_STATUS => {
                    Self::fifo_status(self.tgt_desc_pending, self.tgt_desc_full)
                }
                offset::CTRL_DESC_STATUS => {
                    Self::fifo_status(self.ctrl_desc_pending, self.ctrl_desc_full)
                }
                _ => self.get(offset),
            }
        }

        fn write(&mut self, offset: usize, value: u32) {
            self.writes.push((offset, value));
            match offset {
                offset::TGT_DESC_FIFO => {
                    self.tgt_desc.push(value);
                    self.tgt_desc_pending += 1;
                }
                offset::CTRL_DESC_FIFO => {
                    self.ctrl_desc.push(value);
                    self.ctrl_desc_pending += 1;
                }
                offset::TGT_RX_RESET => self.tgt_rx.borrow_mut().clear(),
                offset::CTRL_RX_RESET => self.ctrl_rx.borrow_mut().clear(),
                offset::CTRL_DESC_RESET => self.ctrl_desc_pending = 0,
                offset::IRQ_ISR | offset::ERR_IRQ_ISR => {
                    let current = self.get(offset);
                    self.set(offset, current & !value);
                }
                _ => self.set(offset, value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockRegisters;
    use super::*;

    #[test]
    fn generated_offsets() {
        assert_eq!(offset::IRQ_IER, 0x104);
        assert_eq!(offset::PHY_CTRL_CLK_THIGH, 0x228);
        assert_eq!(offset::CTRL_RX_RESET, 0x41C);
    }

    #[test]
    fn generated_accessors_hit_offsets() {
        let mut regs = MockRegisters::new();
        regs.write_irq_ier(0xDFEF);
        regs.write_phy_bus_freetime(469);
        assert_eq!(regs.read_irq_ier(), 0xDFEF);
        assert_eq!(regs.get(offset::PHY_BUS_FREETIME), 469);
        assert_eq!(regs.read_ip_magic_num(), crate::smbus::common::MAGIC_NUMBER);
    }

    #[test]
    fn fifo_status_fields() {
        let status = FifoStatus(5 | FifoStatus::FULL | FifoStatus::RESET_BUSY);
        assert_eq!(status.fill_level(), 5);
        assert!(status.is_full());
        assert!(status.reset_busy());
        assert!(!status.is_empty());
        assert!(!status.is_almost_full());
        assert!(!status.is_almost_empty());
    }

    #[test]
    fn target_control_read_modify_write() {
        let mut regs = MockRegisters::new();
        regs.set_target_address(3, 0x50);
        regs.set_target_enable(3, true);
        assert_eq!(regs.target_control(3), (0x50 << 1) | TGT_CONTROL_ENABLE);
        regs.set_target_enable(3, false);
        assert_eq!(regs.target_control(3), 0x50 << 1);
        regs.set_target_address(3, 0);
        assert_eq!(regs.target_control(3), 0);
    }

    #[test]
    fn decoded_status_words() {
        let mut regs = MockRegisters::new();
        regs.set(offset::PHY_STATUS, PhyStatus::SMBCLK_LOW_TIMEOUT);
        assert!(regs.phy().bus_stuck());
        assert!(!regs.phy().smbdat_low_timeout());
        regs.set(offset::TGT_STATUS, (0x61 << 1) | TargetStatus::ACTIVE);
        assert_eq!(regs.target().address(), 0x61);
        assert!(regs.target().active());
        regs.set(offset::PHY_FILTER_CONTROL, FilterControl::ENABLE | 3);
        assert!(regs.filter().enabled());
        assert_eq!(regs.filter().duration(), 3);
    }

    #[test]
    fn mock_rx_fifo_pops_in_order() {
        let regs = MockRegisters::new();
        regs.push_tgt_rx(&[0xAA, 0xBB]);
        assert_eq!(regs.tgt_rx().fill_level(), 2);
        assert_eq!(regs.tgt_rx_byte(), 0xAA);
        assert_eq!(regs.tgt_rx_byte(), 0xBB);
        assert!(regs.tgt_rx().is_empty());
    }

    #[test]
    fn mmio_rejects_null_base() {
        assert_eq!(unsafe { Mmio::new(0) }.err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn mmio_volatile_round_trip() {
        let mut block = [0u32; 0x120];
        let mut mmio = unsafe { Mmio::new(block.as_mut_ptr() as usize) }.unwrap();
        mmio.write_irq_gie(1);
        assert_eq!(mmio.read_irq_gie(), 1);
        drop(mmio);
        assert_eq!(block[0x100 / 4], 1);
    }
}
