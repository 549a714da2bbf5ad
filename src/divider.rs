//! Post-divider planning: even divisors 2..=62, stored halved in the PDIV
//! field with a latch strobe.
//!
//! A divider can't pick its rate alone; it negotiates by asking the parent
//! for ever higher rates, starting at twice the request (the smallest legal
//! divisor) and doubling, until a combination lands within 1% or the search
//! runs out of headroom. Three things end the search: the probe request
//! passing the 550 MHz parent ceiling, the parent repeating its previous
//! answer (its envelope is exhausted), or the answer itself reaching the
//! ceiling.

use crate::{
    error::{ClockError, Result},
    freq,
    macros::clk_trace,
    pll,
    regs::{RegWindow, pdiv::*},
};

/// Smallest legal divisor.
pub(crate) const DIV_MIN: u8 = 2;
/// Largest legal divisor (PDIV field is 5 bits of div/2).
pub(crate) const DIV_MAX: u8 = 62;

/// Outcome of a divider search: the divisor, the parent rate it assumes,
/// and the output it yields.
#[derive(Debug, PartialEq)]
pub(crate) struct DivPlan {
    pub div: u8,
    pub parent_rate: u32,
    pub out: u32,
}

pub(crate) fn valid_div(div: u8) -> bool {
    (DIV_MIN..=DIV_MAX).contains(&div) && div % 2 == 0
}

/// Doubling search for `req` Hz through an even divisor.
///
/// `parent_round` is the parent's query-only rate negotiation. Its errors
/// propagate; a 0 Hz answer means the parent chain is gated and nothing
/// can be derived from it.
pub(crate) fn plan(req: u32, mut parent_round: impl FnMut(u32) -> Result<u32>) -> Result<DivPlan> {
    if req == 0 {
        return Err(ClockError::InvalidArgument);
    }
    let mut target = req.saturating_mul(2);
    let mut best: Option<DivPlan> = None;
    let mut best_diff = u32::MAX;
    let mut prev: Option<u32> = None;
    while target <= pll::PLL_MAX_HZ {
        let got = parent_round(target)?;
        if got == 0 {
            return Err(ClockError::NotConnected);
        }
        let half = freq::div_round_closest(got as u64, (req as u64) * 2).clamp(1, 31) as u32;
        let div = 2 * half;
        let out = got / div;
        let diff = out.abs_diff(req);
        clk_trace!(
            "div search: target={} parent={} div={} out={}",
            target,
            got,
            div,
            out
        );
        if diff < best_diff {
            best = Some(DivPlan {
                div: div as u8,
                parent_rate: got,
                out,
            });
            best_diff = diff;
        }
        if diff <= req / 100 {
            break;
        }
        if prev == Some(got) || got >= pll::PLL_MAX_HZ {
            break;
        }
        prev = Some(got);
        target = target.saturating_mul(2);
    }
    best.ok_or(ClockError::Unsupported)
}

/// Rate from the live register state, given `parent` Hz in. An unlatched
/// divider (PDIV still 0) is `NotConnected`.
pub(crate) fn recalc<R: RegWindow>(regs: &R, offset: usize, parent: u32) -> Result<u32> {
    let half = PDEC_PDIV.get(regs.read32(offset));
    if half == 0 {
        return Err(ClockError::NotConnected);
    }
    Ok(parent / (2 * half))
}

/// Latch an (already validated) even divisor.
pub(crate) fn write_div<R: RegWindow>(regs: &mut R, offset: usize, div: u8) {
    let word = PDEC_PDIV.set(regs.read32(offset), div as u32 / 2);
    regs.write32(offset, word | PDEC_PREQ);
}
