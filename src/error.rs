//! Common error definitions.

/// Alias for Result<T, ClockError>.
pub type Result<T> = core::result::Result<T, ClockError>;

/// Collection of all errors the clock tree can produce.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// A node's input is absent: zero divisor, out-of-range selector, or a
    /// rate derivation that would have to run from a gated (0 Hz) input.
    NotConnected,
    /// An argument is outside the legal range for the target node, eg a mux
    /// input index past the parent list, or an odd post-divider value.
    InvalidArgument,
    /// The request is well-formed but outside what the node can achieve, eg
    /// a phase-detector input that no prediv brings into range.
    Unsupported,
    /// A safe mux is actively consuming the node being gated.
    ///
    /// Returned only when the gate would be permanent (`set_rate(0)` or
    /// `PllCfg::Off`). A transient gate window during reconfiguration is
    /// ridden through instead; see `ClockTree::children_check`.
    SafeGateVeto,
    /// A consumer that cannot tolerate losing its clock sits below the node
    /// being gated or reconfigured.
    HardVeto,
    /// Occurs when an expected lock indication does not happen in time.
    ///
    /// This is returned when a bounded poll exceeds its allotted iteration
    /// count (`MAX_ITERS`).
    LockTimeout,
}
