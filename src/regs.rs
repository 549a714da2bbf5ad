//! Register access for SYSCON clock blocks.
//!
//! Hardware is reached through [`RegWindow`], a 32-bit window addressed by
//! byte offset. [`MmioWindow`] is the volatile implementation used on the
//! MCU; tests substitute a RAM-backed fake. Keeping the window behind a
//! trait means the whole negotiation engine runs unmodified on a host.

/// A window of 32-bit registers, addressed by byte offset from its base.
pub trait RegWindow {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&mut self, offset: usize, value: u32);
}

/// Volatile MMIO implementation of [`RegWindow`].
#[derive(Clone, Copy)]
pub struct MmioWindow {
    base: *mut u32,
}

impl MmioWindow {
    /// Window starting at `base`.
    ///
    /// # Safety
    /// `base` must be the address of a device register block, 4-byte
    /// aligned, and all offsets later passed to this window must stay
    /// inside that block.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }
}

impl RegWindow for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile(self.base.byte_add(offset)) }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile(self.base.byte_add(offset), value) }
    }
}

/// A contiguous field within a 32-bit register.
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitField {
    pub shift: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    pub const fn mask(self) -> u32 {
        ((1 << self.width) - 1) << self.shift
    }

    /// Field value extracted from `word`.
    pub const fn get(self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }

    /// `word` with the field replaced by `value` (truncated to the field
    /// width); other bits preserved.
    pub const fn set(self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// PLL block register layout. Byte offsets from the block base, fields as
/// in UM11126's PLL0/PLL1 register maps, with the power-down control folded
/// into CTRL bit 0.
pub mod pll {
    use super::BitField;

    /// Control register. Holds the power-down bit and the loop filter
    /// settings (SELI/SELP).
    pub const CTRL: usize = 0x00;
    /// CTRL, PD bit. 1 = analog block powered down, output gated.
    pub const CTRL_PD: u32 = 1 << 0;
    /// CTRL, SELI field: bandwidth select, integrator path.
    pub const CTRL_SELI: BitField = BitField::new(4, 6);
    /// CTRL, SELP field: bandwidth select, proportional path.
    pub const CTRL_SELP: BitField = BitField::new(10, 5);

    /// Status register.
    pub const STAT: usize = 0x04;
    /// STAT, LOCK bit. Only meaningful for a 100 kHz..20 MHz reference with
    /// spread spectrum off.
    pub const STAT_LOCK: u32 = 1 << 0;

    /// Pre-divider (N) request register.
    pub const NDEC: usize = 0x08;
    /// NDEC, NDIV field.
    pub const NDEC_NDIV: BitField = BitField::new(0, 8);
    /// NDEC, NREQ strobe. Write 1 together with NDIV to latch it.
    pub const NDEC_NREQ: u32 = 1 << 8;

    /// Integer multiplier (M) request register.
    pub const MDEC: usize = 0x0C;
    /// MDEC, MDIV field.
    pub const MDEC_MDIV: BitField = BitField::new(0, 16);
    /// MDEC, MREQ strobe.
    pub const MDEC_MREQ: u32 = 1 << 16;

    /// Spread spectrum control 0: low 32 bits of the fractional multiplier.
    pub const SSCG0: usize = 0x10;

    /// Spread spectrum control 1: multiplier MSB, latch request, and the
    /// modulation profile.
    pub const SSCG1: usize = 0x14;
    /// SSCG1, MD bit 32.
    pub const SSCG1_MD_MSB: u32 = 1 << 0;
    /// SSCG1, MD_REQ strobe. Write 1 together with the MD bits to latch.
    pub const SSCG1_MD_REQ: u32 = 1 << 1;
    /// SSCG1, SEL_EXT bit. 1 = fixed fractional multiplier, modulator off.
    /// 0 = spread spectrum active; the lock detector is unusable.
    pub const SSCG1_SEL_EXT: u32 = 1 << 2;
    /// SSCG1, MF field: modulation frequency.
    pub const SSCG1_MF: BitField = BitField::new(3, 3);
    /// SSCG1, MR field: modulation depth.
    pub const SSCG1_MR: BitField = BitField::new(6, 3);
    /// SSCG1, MC field: modulation waveform control.
    pub const SSCG1_MC: BitField = BitField::new(9, 2);
}

/// Post-divider register layout, relative to the offset each divider node
/// is constructed with.
pub mod pdiv {
    use super::BitField;

    /// PDIV field: half the divisor. 0 means not yet configured.
    pub const PDEC_PDIV: BitField = BitField::new(0, 5);
    /// PREQ strobe. Write 1 together with PDIV to latch it.
    pub const PDEC_PREQ: u32 = 1 << 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_mask_get_set() {
        let seli = pll::CTRL_SELI;
        assert_eq!(seli.mask(), 0b111111 << 4);
        let word = seli.set(0xFFFF_FFFF, 0);
        assert_eq!(seli.get(word), 0);
        // Neighbours untouched.
        assert_eq!(word | seli.mask(), 0xFFFF_FFFF);

        let word = seli.set(0, 63);
        assert_eq!(seli.get(word), 63);
        // Truncates to the field width.
        let word = seli.set(0, 64);
        assert_eq!(seli.get(word), 0);
    }

    #[test]
    fn mmio_window_offsets() {
        let mut block = [0u32; 8];
        let mut win = unsafe { MmioWindow::new(block.as_mut_ptr() as usize) };
        win.write32(pll::NDEC, 3 | pll::NDEC_NREQ);
        win.write32(pll::MDEC, 56 | pll::MDEC_MREQ);
        assert_eq!(win.read32(pll::NDEC), block[2]);
        assert_eq!(pll::MDEC_MDIV.get(win.read32(pll::MDEC)), 56);
    }
}
