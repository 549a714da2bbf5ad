//! Node handles, configuration types, and the consumer boundary.
//!
//! Configuration uses plain structs and enums, starting from
//! `Default::default()` where a sensible default exists; the tree's
//! `configure` method writes them to hardware.

/// Handle to a node in a [`crate::tree::ClockTree`]. Issued by the builder;
/// only valid for the tree it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(pub(crate) u16);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Answer to a downward gate-tolerance query, worst answer wins.
///
/// `SafeVeto` comes from a safe mux actively consuming the queried node: the
/// gating parent may ride through it for a transient gate window, but a
/// permanent gate must surface it as `ClockError::SafeGateVeto`. `HardVeto`
/// can never be ridden through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateCheck {
    Clear,
    SafeVeto,
    HardVeto,
}

/// A peripheral (or anything else) fed by a clock node.
///
/// Attached at build time. `rate_changed` is called on every committed
/// change of the node's output, including the 0 Hz report while the node is
/// inside a gate window.
pub trait Consumer {
    /// Whether this consumer keeps working through a clock gate window.
    /// Returning `false` turns any gate of the supplying node into a
    /// [`GateCheck::HardVeto`].
    fn tolerates_gating(&self) -> bool;

    /// The supplying node's output changed to `rate` Hz, possibly 0 during
    /// a gate window.
    fn rate_changed(&mut self, rate: u32);
}

/// Spread-spectrum modulation profile. Sets the SSCG1 register, MF, MR and
/// MC fields.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SscgProfile {
    /// Modulation frequency select, 3 bits.
    pub mf: u8,
    /// Modulation depth select, 3 bits.
    pub mr: u8,
    /// Modulation waveform control, 2 bits.
    pub mc: u8,
}

/// Configures the dividers, multiplier and modulation of an individual PLL.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllCfg {
    /// Power the PLL down. Its subtree reports 0 Hz until reconfigured.
    #[default]
    Off,
    /// Fractional synthesis: `md` is the 33-bit 2^25 fixed-point multiplier
    /// applied to the phase-detector input (parent / `ndiv`). `ss` engages
    /// the spread-spectrum modulator; the lock detector is then unusable
    /// and configuration falls back to a fixed settle delay.
    Sscg {
        ndiv: u8,
        md: u64,
        ss: Option<SscgProfile>,
    },
    /// Integer synthesis: output = parent * `mdiv` / `ndiv`.
    Int { ndiv: u8, mdiv: u16 },
}

/// Configuration request for any node kind; must match the target node.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeCfg {
    Pll(PllCfg),
    /// Select a mux input by index into its parent list.
    Mux { input: usize },
    /// Set a post-divider to an even divisor in 2..=62.
    Divider { div: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_check_ordering() {
        // Aggregation relies on the worst answer being the greatest.
        assert!(GateCheck::Clear < GateCheck::SafeVeto);
        assert!(GateCheck::SafeVeto < GateCheck::HardVeto);
        assert_eq!(
            GateCheck::Clear.max(GateCheck::SafeVeto),
            GateCheck::SafeVeto
        );
    }

    #[test]
    fn pll_cfg_defaults_off() {
        assert_eq!(PllCfg::default(), PllCfg::Off);
    }
}
