//! Clock tree configuration and rate negotiation for NXP SYSCON-based
//! MCUs, following the LPC55 series layout (UM11126).
//!
//! The tree is built once from the hardware topology: fixed sources
//! (FRO, crystal, external input), SSCG and integer PLLs, glitchless
//! muxes, and post dividers. Each hardware node owns a register window;
//! on target that is an [`MmioWindow`] over the SYSCON block, in tests
//! any [`RegWindow`] implementation.
//!
//! Rates are negotiated, not dictated: `round_rate` asks what a node
//! would deliver for a request without touching hardware, `set_rate`
//! commits the nearest achievable configuration and walks the gate
//! window past the registered consumers. Nodes that must briefly stop
//! their output ask downstream first; a consumer that can't tolerate
//! losing its clock vetoes the change before anything is written.
//!
//! # Example
//!
//! ```
//! use embedded_hal::delay::DelayNs;
//! use syscon_clocks::{ClockTreeBuilder, RegWindow};
//!
//! // Host-side stand-in for a SYSCON register window.
//! struct Ram([u32; 8]);
//!
//! impl RegWindow for Ram {
//!     fn read32(&self, offset: usize) -> u32 {
//!         self.0[offset / 4]
//!     }
//!     fn write32(&mut self, offset: usize, value: u32) {
//!         self.0[offset / 4] = value;
//!     }
//! }
//!
//! struct NoDelay;
//!
//! impl DelayNs for NoDelay {
//!     fn delay_ns(&mut self, _ns: u32) {}
//! }
//!
//! let mut b = ClockTreeBuilder::new();
//! let xtal = b.fixed_source("clk_in", 16_000_000);
//! let pll = b.int_pll("pll0", xtal, Ram([0; 8]));
//! let tree = b.build(NoDelay);
//!
//! // Query-only: the answer comes from planning, nothing is written.
//! assert_eq!(tree.round_rate(pll, 300_000_000), Ok(298_666_666));
//! assert_eq!(tree.rate(pll), 0);
//! ```
//!
//! # Features
//!
//! - `defmt`: derive `defmt::Format` on public types and route internal
//!   logging through `defmt`.
//! - `log`: route internal logging through the `log` facade instead.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod divider;
pub mod error;
pub mod freq;
mod macros;
mod mux;
pub mod node;
mod pll;
pub mod regs;
#[cfg(test)]
mod testutil;
pub mod tree;

pub use crate::error::{ClockError, Result};
pub use crate::node::{Consumer, GateCheck, NodeCfg, NodeId, PllCfg, SscgProfile};
pub use crate::pll::{PLL_MAX_HZ, PLL_MIN_HZ};
pub use crate::regs::{BitField, MmioWindow, RegWindow};
pub use crate::tree::{ClockTree, ClockTreeBuilder};

/// Iteration bound for register polling loops; exceeding it raises
/// [`ClockError::LockTimeout`] instead of hanging.
pub const MAX_ITERS: u32 = 300_000;
