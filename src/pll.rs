//! Frequency synthesis for the two PLL variants: the fractional SSCG PLL
//! (33-bit fixed-point multiplier, optional spread-spectrum modulation) and
//! the integer M/N PLL.
//!
//! Planning is pure arithmetic over a parent rate; committing a plan is a
//! fixed sequence: power down, latch dividers with their request strobes,
//! set the loop filter, power up, wait for lock. Both searches satisfice
//! rather than optimize: the first candidate within 1% of the request wins,
//! matching the bounded-time behavior expected of a boot path.

use embedded_hal::delay::DelayNs;

use crate::{
    MAX_ITERS,
    error::{ClockError, Result},
    freq,
    macros::{clk_debug, clk_trace},
    node::SscgProfile,
    regs::{RegWindow, pll::*},
};

/// Lowest output the VCO covers; `round_rate` clamps up to this.
pub const PLL_MIN_HZ: u32 = 275_000_000;
/// Highest output the VCO covers; `round_rate` clamps down to this. Also
/// the ceiling a post-divider search will push a parent to.
pub const PLL_MAX_HZ: u32 = 550_000_000;

// set_rate clamps 1 MHz inside the VCO envelope, leaving headroom for the
// fractional multiplier to settle on either side of the target.
pub(crate) const SET_MIN_HZ: u32 = 276_000_000;
pub(crate) const SET_MAX_HZ: u32 = 549_000_000;

// Phase-detector input window for the SSCG PLL, ideal point in the middle.
const PD_MIN_HZ: u32 = 3_000_000;
const PD_MAX_HZ: u32 = 5_000_000;
const PD_IDEAL_HZ: u32 = 4_000_000;

// Envelope in which STAT.LOCK is trustworthy.
const LOCK_REF_MIN_HZ: u32 = 100_000;
const LOCK_REF_MAX_HZ: u32 = 20_000_000;

/// Settle time used when the lock detector can't be: long enough for any
/// legal reference.
const SETTLE_US: u32 = 6_000;

const NDIV_MAX: u32 = 255;
const MDIV_MAX: u64 = 65_535;

/// Which synthesis engine a PLL node runs.
#[derive(Clone, Copy, PartialEq)]
pub(crate) enum PllVariant {
    Sscg,
    Int,
}

/// Planned fractional configuration.
#[derive(Debug, PartialEq)]
pub(crate) struct SscgPlan {
    pub ndiv: u8,
    pub md: u64,
    pub out: u32,
    pub ref_hz: u32,
}

/// Planned integer configuration.
#[derive(Debug, PartialEq)]
pub(crate) struct IntPlan {
    pub ndiv: u8,
    pub mdiv: u16,
    pub out: u32,
    pub ref_hz: u32,
}

/// A plan for either variant, ready to commit. Rate-driven commits never
/// engage spread spectrum; that needs an explicit profile via `configure`.
pub(crate) enum PllPlan {
    Sscg(SscgPlan),
    Int(IntPlan),
}

impl PllPlan {
    pub fn plan(variant: PllVariant, req: u32, parent: u32) -> Result<Self> {
        Ok(match variant {
            PllVariant::Sscg => Self::Sscg(plan_sscg(req, parent)?),
            PllVariant::Int => Self::Int(plan_int(req, parent)?),
        })
    }

    pub fn out(&self) -> u32 {
        match self {
            Self::Sscg(p) => p.out,
            Self::Int(p) => p.out,
        }
    }

    pub fn ref_hz(&self) -> u32 {
        match self {
            Self::Sscg(p) => p.ref_hz,
            Self::Int(p) => p.ref_hz,
        }
    }

    /// Latch the plan into a powered-down PLL's registers.
    pub fn commit<R: RegWindow>(&self, regs: &mut R) {
        match self {
            Self::Sscg(p) => write_sscg_cfg(regs, p.ndiv, p.md, None),
            Self::Int(p) => write_int_cfg(regs, p.ndiv, p.mdiv),
        }
    }
}

pub(crate) fn round_clamp(req: u32) -> u32 {
    req.clamp(PLL_MIN_HZ, PLL_MAX_HZ)
}

pub(crate) fn set_clamp(req: u32) -> u32 {
    req.clamp(SET_MIN_HZ, SET_MAX_HZ)
}

/// Plan a fractional synthesis of `req` Hz from `parent` Hz.
///
/// The pre-divider is fixed by the parent alone: round-closest to a 4 MHz
/// phase-detector input, `Unsupported` if that lands outside 3..=5 MHz.
/// The multiplier truncates, so the result can come out 1 Hz under the
/// request; that case snaps up and reports the request exactly.
pub(crate) fn plan_sscg(req: u32, parent: u32) -> Result<SscgPlan> {
    if parent == 0 {
        return Err(ClockError::NotConnected);
    }
    let ndiv = freq::div_round_closest(parent as u64, PD_IDEAL_HZ as u64).max(1);
    if ndiv > NDIV_MAX as u64 {
        return Err(ClockError::Unsupported);
    }
    let ref_hz = parent / ndiv as u32;
    if !(PD_MIN_HZ..=PD_MAX_HZ).contains(&ref_hz) {
        return Err(ClockError::Unsupported);
    }
    let md = freq::frac_for_rate(req, ref_hz).ok_or(ClockError::NotConnected)?;
    if md == 0 || md > freq::MD_MAX {
        return Err(ClockError::Unsupported);
    }
    let mut out = freq::frac_mul(ref_hz, md);
    if out + 1 == req {
        out = req;
    }
    clk_debug!(
        "sscg plan: req={} ndiv={} ref={} out={}",
        req,
        ndiv,
        ref_hz,
        out
    );
    Ok(SscgPlan {
        ndiv: ndiv as u8,
        md,
        out,
        ref_hz,
    })
}

/// Plan an integer synthesis of `req` Hz from `parent` Hz.
///
/// Linear scan of NDIV from 1 up, each paired with the round-closest MDIV.
/// Candidates outside the VCO envelope are skipped outright; a ratio the
/// VCO can't run is no candidate at all, however near the request. The
/// first legal candidate within 1% of the request is taken as-is; only
/// when no candidate ever gets that close does the closest one seen win.
/// The closest-seen bookkeeping runs before the tolerance test, so both
/// exit paths agree on the answer. Ties keep the earlier (lower NDIV)
/// candidate.
pub(crate) fn plan_int(req: u32, parent: u32) -> Result<IntPlan> {
    if parent == 0 {
        return Err(ClockError::NotConnected);
    }
    let tol = req / 100;
    let mut best: Option<IntPlan> = None;
    let mut best_diff = u32::MAX;
    for ndiv in 1..=NDIV_MAX {
        let mdiv =
            freq::div_round_closest(req as u64 * ndiv as u64, parent as u64).clamp(1, MDIV_MAX);
        let out64 = parent as u64 * mdiv / ndiv as u64;
        if out64 < PLL_MIN_HZ as u64 || out64 > PLL_MAX_HZ as u64 {
            continue;
        }
        let out = out64 as u32;
        let diff = out.abs_diff(req);
        if diff < best_diff {
            best = Some(IntPlan {
                ndiv: ndiv as u8,
                mdiv: mdiv as u16,
                out,
                ref_hz: parent / ndiv,
            });
            best_diff = diff;
        }
        if diff <= tol {
            break;
        }
    }
    let plan = best.ok_or(ClockError::Unsupported)?;
    clk_debug!(
        "int plan: req={} ndiv={} mdiv={} out={}",
        req,
        plan.ndiv,
        plan.mdiv,
        plan.out
    );
    Ok(plan)
}

/// Loop filter bandwidth selection for a feedback multiplier of `m`.
/// Piecewise per UM11126's PLL programming guidance. Returns (SELP, SELI).
pub(crate) fn pll_filter(m: u32) -> (u32, u32) {
    let selp = (m / 4 + 1).min(31);
    let seli = if m >= 8000 {
        1
    } else if m >= 122 {
        8000 / m
    } else {
        2 * (m / 4) + 3
    }
    .min(63);
    (selp, seli)
}

pub(crate) fn is_powered<R: RegWindow>(regs: &R) -> bool {
    regs.read32(CTRL) & CTRL_PD == 0
}

pub(crate) fn power_down<R: RegWindow>(regs: &mut R) {
    let ctrl = regs.read32(CTRL);
    regs.write32(CTRL, ctrl | CTRL_PD);
}

pub(crate) fn power_up<R: RegWindow>(regs: &mut R) {
    let ctrl = regs.read32(CTRL);
    regs.write32(CTRL, ctrl & !CTRL_PD);
}

/// Latch the integer path configuration. The PLL must be powered down.
pub(crate) fn write_int_cfg<R: RegWindow>(regs: &mut R, ndiv: u8, mdiv: u16) {
    regs.write32(NDEC, NDEC_NDIV.set(0, ndiv as u32) | NDEC_NREQ);
    regs.write32(MDEC, MDEC_MDIV.set(0, mdiv as u32) | MDEC_MREQ);
    write_filter(regs, mdiv as u32);
}

/// Latch the fractional path configuration. The PLL must be powered down.
pub(crate) fn write_sscg_cfg<R: RegWindow>(
    regs: &mut R,
    ndiv: u8,
    md: u64,
    ss: Option<SscgProfile>,
) {
    regs.write32(NDEC, NDEC_NDIV.set(0, ndiv as u32) | NDEC_NREQ);
    regs.write32(SSCG0, md as u32);
    let mut sscg1 = SSCG1_MD_REQ;
    if md & (1 << 32) != 0 {
        sscg1 |= SSCG1_MD_MSB;
    }
    match ss {
        Some(p) => {
            sscg1 = SSCG1_MF.set(sscg1, p.mf as u32);
            sscg1 = SSCG1_MR.set(sscg1, p.mr as u32);
            sscg1 = SSCG1_MC.set(sscg1, p.mc as u32);
        }
        None => sscg1 |= SSCG1_SEL_EXT,
    }
    regs.write32(SSCG1, sscg1);
    write_filter(regs, (md >> freq::FRAC_BITS) as u32);
}

fn write_filter<R: RegWindow>(regs: &mut R, m: u32) {
    let (selp, seli) = pll_filter(m);
    let mut ctrl = regs.read32(CTRL);
    ctrl = CTRL_SELP.set(ctrl, selp);
    ctrl = CTRL_SELI.set(ctrl, seli);
    regs.write32(CTRL, ctrl);
}

/// Rate from the live register state, given `parent` Hz in. A powered-down
/// PLL reports 0; unlatched dividers are `NotConnected`.
pub(crate) fn recalc<R: RegWindow>(regs: &R, variant: PllVariant, parent: u32) -> Result<u32> {
    if !is_powered(regs) {
        return Ok(0);
    }
    let ndiv = NDEC_NDIV.get(regs.read32(NDEC));
    if ndiv == 0 {
        return Err(ClockError::NotConnected);
    }
    match variant {
        PllVariant::Int => {
            let mdiv = MDEC_MDIV.get(regs.read32(MDEC));
            if mdiv == 0 {
                return Err(ClockError::NotConnected);
            }
            Ok((parent as u64 * mdiv as u64 / ndiv as u64) as u32)
        }
        PllVariant::Sscg => {
            let sscg1 = regs.read32(SSCG1);
            let mut md = regs.read32(SSCG0) as u64;
            if sscg1 & SSCG1_MD_MSB != 0 {
                md |= 1 << 32;
            }
            if md == 0 {
                return Err(ClockError::NotConnected);
            }
            Ok(freq::frac_mul(parent / ndiv, md))
        }
    }
}

/// Whether the spread-spectrum modulator is engaged in the latched
/// configuration.
pub(crate) fn ss_active<R: RegWindow>(regs: &R) -> bool {
    regs.read32(SSCG1) & SSCG1_SEL_EXT == 0
}

/// Block until the PLL locks.
///
/// STAT.LOCK is only trustworthy for a 100 kHz..20 MHz phase-detector
/// reference with spread spectrum off; inside that envelope, poll it for at
/// most `MAX_ITERS` iterations. Outside it, sit out a fixed 6 ms settle
/// time instead.
pub(crate) fn wait_lock<R: RegWindow, D: DelayNs>(
    regs: &R,
    delay: &mut D,
    ref_hz: u32,
    ss: bool,
) -> Result<()> {
    if ss || !(LOCK_REF_MIN_HZ..=LOCK_REF_MAX_HZ).contains(&ref_hz) {
        clk_trace!("pll settle: fixed wait, ref={} ss={}", ref_hz, ss);
        delay.delay_us(SETTLE_US);
        return Ok(());
    }
    let mut i = 0;
    while regs.read32(STAT) & STAT_LOCK == 0 {
        i += 1;
        if i >= MAX_ITERS {
            return Err(ClockError::LockTimeout);
        }
    }
    Ok(())
}
