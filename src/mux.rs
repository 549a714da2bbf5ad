//! Parent selection for clock muxes.
//!
//! A mux's parent list is fixed at build time and ordered; the selector
//! field encodes the list index. Rate requests scan every parent and take
//! the one whose rounded rate lands closest, so selection is deterministic:
//! strict improvement only, which keeps the lowest index on ties.

use crate::{
    error::{ClockError, Result},
    macros::clk_trace,
    regs::{BitField, RegWindow},
};

/// Winner of a closest-parent scan.
pub(crate) struct MuxPick {
    pub index: usize,
    pub rate: u32,
}

/// Scan `parent_count` parents for the rate closest to `req`.
///
/// `round` is asked what each parent would deliver; parents that refuse are
/// skipped rather than failing the scan. Only when every parent refuses is
/// the mux considered dead.
pub(crate) fn pick_parent(
    req: u32,
    parent_count: usize,
    mut round: impl FnMut(usize, u32) -> Result<u32>,
) -> Result<MuxPick> {
    let mut best: Option<MuxPick> = None;
    let mut best_diff = u32::MAX;
    for index in 0..parent_count {
        let rate = match round(index, req) {
            Ok(r) => r,
            Err(_) => {
                clk_trace!("mux scan: parent {} refused", index);
                continue;
            }
        };
        let diff = rate.abs_diff(req);
        if diff < best_diff {
            best = Some(MuxPick { index, rate });
            best_diff = diff;
        }
    }
    best.ok_or(ClockError::NotConnected)
}

/// Currently selected parent index, read from the selector field.
/// Out-of-range hardware (eg never initialized) is `NotConnected`.
pub(crate) fn selected<R: RegWindow>(
    regs: &R,
    offset: usize,
    field: BitField,
    parent_count: usize,
) -> Result<usize> {
    let index = field.get(regs.read32(offset)) as usize;
    if index >= parent_count {
        return Err(ClockError::NotConnected);
    }
    Ok(index)
}

/// Write the selector field, preserving the rest of the register.
pub(crate) fn write_sel<R: RegWindow>(regs: &mut R, offset: usize, field: BitField, index: usize) {
    let word = regs.read32(offset);
    regs.write32(offset, field.set(word, index as u32));
}
