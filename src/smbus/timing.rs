// Licensed under the Apache-2.0 license

//! PHY timing register values.
//!
//! Minimum bus timings are tabulated per frequency class in hundredths of the
//! 10 ns unit the IP counts in. A register value is the number of AXI clock
//! cycles covering the timing, rounded up, minus either one or the fixed
//! controller input latency (plus the glitch filter duration when the filter
//! is enabled).

use fugit::HertzU32;

use super::common::FrequencyClass;
use super::registers::SmbusRegisters;

const TBUF_DIVISOR: u64 = 100_000_000;
const HUNDREDTHS: u64 = 100;
const CTRL_FIXED_INPUT_LATENCY: u32 = 7;

/// Minimum timings for one frequency class, in hundredths.
struct TimingTable {
    bus_free: u64,
    tgt_data_setup: u64,
    tgt_data_hold: u64,
    ctrl_data_hold: u64,
    start_hold: u64,
    start_setup: u64,
    stop_setup: u64,
    clk_low: u64,
    clk_high: u64,
}

const STANDARD: TimingTable = TimingTable {
    bus_free: 47_000,
    tgt_data_setup: 12_500,
    tgt_data_hold: 3_300,
    ctrl_data_hold: 3_300,
    start_hold: 44_000,
    start_setup: 51_700,
    stop_setup: 44_000,
    clk_low: 51_700,
    clk_high: 44_000,
};

const FAST: TimingTable = TimingTable {
    bus_free: 13_000,
    tgt_data_setup: 4_000,
    tgt_data_hold: 11,
    ctrl_data_hold: 11,
    start_hold: 6_600,
    start_setup: 6_600,
    stop_setup: 6_600,
    clk_low: 14_300,
    clk_high: 6_600,
};

const FAST_PLUS: TimingTable = TimingTable {
    bus_free: 5_000,
    tgt_data_setup: 1_700,
    tgt_data_hold: 11,
    ctrl_data_hold: 11,
    start_hold: 2_860,
    start_setup: 2_860,
    stop_setup: 2_860,
    clk_low: 5_500,
    clk_high: 2_860,
};

/// Computed values for the nine PHY timing registers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhyTiming {
    pub bus_free: u32,
    pub tgt_data_setup: u32,
    pub tgt_data_hold: u32,
    pub ctrl_data_hold: u32,
    pub start_hold: u32,
    pub start_setup: u32,
    pub stop_setup: u32,
    pub clk_low: u32,
    pub clk_high: u32,
}

/// Clock cycles covering `hundredths`, rounded up.
fn cycles(hundredths: u64, clock: HertzU32) -> u32 {
    let scaled = hundredths * u64::from(clock.raw());
    let divisor = TBUF_DIVISOR * HUNDREDTHS;
    u32::try_from(scaled.div_ceil(divisor)).unwrap_or(u32::MAX)
}

fn plain(hundredths: u64, clock: HertzU32) -> u32 {
    cycles(hundredths, clock).saturating_sub(1)
}

fn minus(hundredths: u64, clock: HertzU32, constant: u32) -> u32 {
    cycles(hundredths, clock).saturating_sub(constant)
}

/// Latency subtracted from controller timings.
///
/// `glitch_filter` is the raw filter duration field when the filter is enabled.
#[must_use]
pub fn latency_constant(glitch_filter: Option<u32>) -> u32 {
    let base = CTRL_FIXED_INPUT_LATENCY + 1;
    match glitch_filter {
        Some(duration) => duration + 1 + base,
        None => base,
    }
}

impl PhyTiming {
    #[must_use]
    pub fn compute(class: FrequencyClass, clock: HertzU32, glitch_filter: Option<u32>) -> Self {
        let k = latency_constant(glitch_filter);
        match class {
            FrequencyClass::Standard => {
                let t = &STANDARD;
                Self {
                    bus_free: plain(t.bus_free, clock),
                    tgt_data_setup: plain(t.tgt_data_setup, clock),
                    tgt_data_hold: minus(t.tgt_data_hold, clock, k),
                    ctrl_data_hold: minus(t.ctrl_data_hold, clock, k),
                    start_hold: minus(t.start_hold, clock, k),
                    start_setup: minus(t.start_setup, clock, k),
                    stop_setup: minus(t.stop_setup, clock, k),
                    clk_low: minus(t.clk_low, clock, k),
                    clk_high: minus(t.clk_high, clock, k),
                }
            }
            FrequencyClass::Fast | FrequencyClass::FastPlus => {
                let t = if class == FrequencyClass::Fast {
                    &FAST
                } else {
                    &FAST_PLUS
                };
                Self {
                    bus_free: plain(t.bus_free, clock),
                    tgt_data_setup: plain(t.tgt_data_setup, clock),
                    tgt_data_hold: plain(t.tgt_data_hold, clock),
                    ctrl_data_hold: plain(t.ctrl_data_hold, clock),
                    start_hold: minus(t.start_hold, clock, k),
                    start_setup: minus(t.start_setup, clock, k),
                    stop_setup: minus(t.stop_setup, clock, k),
                    clk_low: minus(t.clk_low, clock, k),
                    clk_high: minus(t.clk_high, clock, k),
                }
            }
        }
    }

    pub fn apply<R: SmbusRegisters + ?Sized>(&self, regs: &mut R) {
        regs.write_phy_bus_freetime(self.bus_free);
        regs.write_phy_tgt_data_setup(self.tgt_data_setup);
        regs.write_phy_tgt_data_hold(self.tgt_data_hold);
        regs.write_phy_ctrl_data_hold(self.ctrl_data_hold);
        regs.write_phy_ctrl_start_hold(self.start_hold);
        regs.write_phy_ctrl_start_setup(self.start_setup);
        regs.write_phy_ctrl_stop_setup(self.stop_setup);
        regs.write_phy_ctrl_clk_tlow(self.clk_low);
        regs.write_phy_ctrl_clk_thigh(self.clk_high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn standard_at_100mhz() {
        let t = PhyTiming::compute(FrequencyClass::Standard, 100.MHz(), None);
        assert_eq!(t.bus_free, 470 - 1);
        assert_eq!(t.tgt_data_setup, 125 - 1);
        assert_eq!(t.tgt_data_hold, 33 - 8);
        assert_eq!(t.ctrl_data_hold, 33 - 8);
        assert_eq!(t.start_hold, 440 - 8);
        assert_eq!(t.start_setup, 517 - 8);
        assert_eq!(t.clk_low, 517 - 8);
        assert_eq!(t.clk_high, 440 - 8);
    }

    #[test]
    fn fractional_timings_round_up() {
        let t = PhyTiming::compute(FrequencyClass::FastPlus, 100.MHz(), None);
        // 0.11 and 28.6 both round up.
        assert_eq!(t.tgt_data_hold, 0);
        assert_eq!(t.ctrl_data_hold, 0);
        assert_eq!(t.start_hold, 29 - 8);
        assert_eq!(t.bus_free, 49);
    }

    #[test]
    fn glitch_filter_extends_latency() {
        assert_eq!(latency_constant(None), 8);
        assert_eq!(latency_constant(Some(3)), 12);
        let t = PhyTiming::compute(FrequencyClass::Fast, 250.MHz(), Some(3));
        // 66 * 2.5 = 165, 143 * 2.5 = 357.5 -> 358
        assert_eq!(t.start_hold, 165 - 12);
        assert_eq!(t.clk_low, 358 - 12);
        // 130 * 2.5 = 325
        assert_eq!(t.bus_free, 324);
    }

    #[test]
    fn slow_clock_saturates_at_zero() {
        let t = PhyTiming::compute(FrequencyClass::FastPlus, 1.MHz(), None);
        assert_eq!(t.start_hold, 0);
    }
}
