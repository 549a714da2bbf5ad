//! The clock tree: an arena of nodes wired at build time, and the rate
//! negotiation protocol over it.
//!
//! All mutation goes through `&mut self`, so at most one configuration
//! sequence is ever in flight; callers that share a tree across contexts
//! serialize outside (ownership, or their platform's mutex). Query-only
//! operations (`rate`, `round_rate`, `children_check`) take `&self` and can
//! never touch hardware state.
//!
//! A committed change runs check -> compute -> commit -> notify: the
//! subtree is asked whether it tolerates the gate window, the plan is
//! derived with pure arithmetic, hardware is written only once the check
//! has passed, and consumers then observe the output going to 0 for the
//! window and to the new rate after lock.

use alloc::{boxed::Box, vec::Vec};

use embedded_hal::delay::DelayNs;

use crate::{
    divider,
    error::{ClockError, Result},
    freq,
    macros::clk_debug,
    mux,
    node::{Consumer, GateCheck, NodeCfg, NodeId, PllCfg},
    pll::{self, PllVariant},
    regs::{BitField, RegWindow},
};

struct Node<R> {
    name: &'static str,
    kind: NodeKind<R>,
    consumers: Vec<Box<dyn Consumer>>,
}

enum NodeKind<R> {
    Source {
        rate: u32,
    },
    Pll {
        regs: R,
        variant: PllVariant,
        parent: NodeId,
    },
    Mux {
        regs: R,
        offset: usize,
        field: BitField,
        parents: Vec<NodeId>,
        safe: bool,
    },
    Div {
        regs: R,
        offset: usize,
        parent: NodeId,
    },
}

/// Builds a [`ClockTree`], wiring each node to already-added parents.
///
/// Parents must exist before their children, which also makes cycles
/// unrepresentable. Handing in a [`NodeId`] that this builder didn't issue
/// is a programming error and panics.
pub struct ClockTreeBuilder<R> {
    nodes: Vec<Node<R>>,
}

impl<R: RegWindow> ClockTreeBuilder<R> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn push(&mut self, name: &'static str, kind: NodeKind<R>) -> NodeId {
        assert!(self.nodes.len() < u16::MAX as usize, "clock tree too large");
        let id = NodeId(self.nodes.len() as u16);
        self.nodes.push(Node {
            name,
            kind,
            consumers: Vec::new(),
        });
        id
    }

    fn check_parent(&self, parent: NodeId) {
        assert!(
            parent.index() < self.nodes.len(),
            "parent node does not exist"
        );
    }

    /// Root with a fixed rate: crystal, FRO, external clock input.
    pub fn fixed_source(&mut self, name: &'static str, rate: u32) -> NodeId {
        self.push(name, NodeKind::Source { rate })
    }

    /// Fractional (SSCG) PLL over the given register window.
    pub fn sscg_pll(&mut self, name: &'static str, parent: NodeId, regs: R) -> NodeId {
        self.check_parent(parent);
        self.push(
            name,
            NodeKind::Pll {
                regs,
                variant: PllVariant::Sscg,
                parent,
            },
        )
    }

    /// Integer M/N PLL over the given register window.
    pub fn int_pll(&mut self, name: &'static str, parent: NodeId, regs: R) -> NodeId {
        self.check_parent(parent);
        self.push(
            name,
            NodeKind::Pll {
                regs,
                variant: PllVariant::Int,
                parent,
            },
        )
    }

    /// Mux over an ordered parent list; `field` at byte `offset` holds the
    /// selected index.
    pub fn mux(
        &mut self,
        name: &'static str,
        parents: &[NodeId],
        regs: R,
        offset: usize,
        field: BitField,
    ) -> NodeId {
        self.add_mux(name, parents, regs, offset, field, false)
    }

    /// Like [`Self::mux`], but flagged safe: it answers `SafeVeto` when a
    /// selected input gates, and refuses to switch away from a gated input.
    pub fn safe_mux(
        &mut self,
        name: &'static str,
        parents: &[NodeId],
        regs: R,
        offset: usize,
        field: BitField,
    ) -> NodeId {
        self.add_mux(name, parents, regs, offset, field, true)
    }

    fn add_mux(
        &mut self,
        name: &'static str,
        parents: &[NodeId],
        regs: R,
        offset: usize,
        field: BitField,
        safe: bool,
    ) -> NodeId {
        assert!(!parents.is_empty(), "mux needs at least one parent");
        for p in parents {
            self.check_parent(*p);
        }
        self.push(
            name,
            NodeKind::Mux {
                regs,
                offset,
                field,
                parents: parents.to_vec(),
                safe,
            },
        )
    }

    /// Post-divider; its PDIV/PREQ register sits at byte `offset` in the
    /// window.
    pub fn post_div(&mut self, name: &'static str, parent: NodeId, regs: R, offset: usize) -> NodeId {
        self.check_parent(parent);
        self.push(
            name,
            NodeKind::Div {
                regs,
                offset,
                parent,
            },
        )
    }

    /// Register a consumer on a node's output.
    pub fn attach_consumer(&mut self, node: NodeId, consumer: Box<dyn Consumer>) {
        self.check_parent(node);
        self.nodes[node.index()].consumers.push(consumer);
    }

    pub fn build<D: DelayNs>(self, delay: D) -> ClockTree<R, D> {
        ClockTree {
            nodes: self.nodes,
            delay,
        }
    }
}

impl<R: RegWindow> Default for ClockTreeBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The clock tree. Owns every node's register window, the attached
/// consumers, and the delay provider used for PLL settle waits.
pub struct ClockTree<R, D> {
    nodes: Vec<Node<R>>,
    delay: D,
}

impl<R: RegWindow, D: DelayNs> ClockTree<R, D> {
    /// Node name, as given to the builder.
    pub fn name(&self, id: NodeId) -> &'static str {
        self.nodes[id.index()].name
    }

    /// Current output rate in Hz, walking parents from the live register
    /// state. A gated or not-yet-configured chain reports 0, never an
    /// error.
    pub fn rate(&self, id: NodeId) -> u32 {
        self.try_rate(id).unwrap_or(0)
    }

    fn try_rate(&self, id: NodeId) -> Result<u32> {
        match &self.nodes[id.index()].kind {
            NodeKind::Source { rate } => Ok(*rate),
            NodeKind::Pll {
                regs,
                variant,
                parent,
            } => pll::recalc(regs, *variant, self.rate(*parent)),
            NodeKind::Mux {
                regs,
                offset,
                field,
                parents,
                ..
            } => {
                let sel = mux::selected(regs, *offset, *field, parents.len())?;
                Ok(self.rate(parents[sel]))
            }
            NodeKind::Div { regs, offset, parent } => {
                divider::recalc(regs, *offset, self.rate(*parent))
            }
        }
    }

    /// Pure reverse of the node's register state: the output for
    /// `parent_rate` Hz in. No hardware access beyond reads, no recursion.
    pub fn recalc_rate(&self, id: NodeId, parent_rate: u32) -> Result<u32> {
        match &self.nodes[id.index()].kind {
            NodeKind::Source { rate } => Ok(*rate),
            NodeKind::Pll { regs, variant, .. } => pll::recalc(regs, *variant, parent_rate),
            NodeKind::Mux { .. } => Ok(parent_rate),
            NodeKind::Div { regs, offset, .. } => divider::recalc(regs, *offset, parent_rate),
        }
    }

    /// Query-only negotiation: the rate the node would deliver for `req`
    /// Hz, committing nothing. Taking `&self` is the guarantee.
    pub fn round_rate(&self, id: NodeId, req: u32) -> Result<u32> {
        match &self.nodes[id.index()].kind {
            NodeKind::Source { rate } => Ok(*rate),
            NodeKind::Pll {
                variant, parent, ..
            } => {
                let parent_rate = self.rate(*parent);
                if parent_rate == 0 {
                    return Err(ClockError::NotConnected);
                }
                let req = pll::round_clamp(req);
                Ok(pll::PllPlan::plan(*variant, req, parent_rate)?.out())
            }
            NodeKind::Mux { parents, .. } => {
                if req == 0 {
                    return Err(ClockError::InvalidArgument);
                }
                let pick =
                    mux::pick_parent(req, parents.len(), |i, r| self.round_rate(parents[i], r))?;
                Ok(pick.rate)
            }
            NodeKind::Div { parent, .. } => {
                if req == 0 {
                    return Err(ClockError::InvalidArgument);
                }
                let parent = *parent;
                Ok(divider::plan(req, |t| self.round_rate(parent, t))?.out)
            }
        }
    }

    /// Negotiate and commit `req` Hz. Returns the achieved rate.
    ///
    /// `set_rate(id, 0)` on a PLL is a permanent gate, identical to
    /// `configure(id, PllCfg::Off)`; on nodes that can't gate it is
    /// `InvalidArgument`. A veto aborts before any register is written; a
    /// failure after the gate window opened (eg `LockTimeout`) leaves the
    /// node gated with its subtree notified of 0 Hz.
    pub fn set_rate(&mut self, id: NodeId, req: u32) -> Result<u32> {
        match &self.nodes[id.index()].kind {
            NodeKind::Source { rate } => Ok(*rate),
            NodeKind::Pll {
                variant, parent, ..
            } => {
                let (variant, parent) = (*variant, *parent);
                self.set_rate_pll(id, variant, parent, req)
            }
            NodeKind::Mux { parents, safe, .. } => {
                if req == 0 {
                    return Err(ClockError::InvalidArgument);
                }
                let (parents, safe) = (parents.clone(), *safe);
                self.set_rate_mux(id, &parents, safe, req)
            }
            NodeKind::Div { parent, .. } => {
                if req == 0 {
                    return Err(ClockError::InvalidArgument);
                }
                let parent = *parent;
                self.set_rate_div(id, parent, req)
            }
        }
    }

    /// Write an explicit configuration to a node. The cfg kind must match
    /// the node kind.
    pub fn configure(&mut self, id: NodeId, cfg: NodeCfg) -> Result<()> {
        match (&self.nodes[id.index()].kind, cfg) {
            (NodeKind::Pll { variant, parent, .. }, NodeCfg::Pll(pcfg)) => {
                let (variant, parent) = (*variant, *parent);
                self.configure_pll(id, variant, parent, pcfg)
            }
            (NodeKind::Mux { parents, safe, .. }, NodeCfg::Mux { input }) => {
                let (parents, safe) = (parents.clone(), *safe);
                self.configure_mux(id, &parents, safe, input)
            }
            (NodeKind::Div { .. }, NodeCfg::Divider { div }) => self.configure_div(id, div),
            _ => Err(ClockError::InvalidArgument),
        }
    }

    /// Currently selected input index of a mux.
    pub fn selected_parent(&self, id: NodeId) -> Result<usize> {
        match &self.nodes[id.index()].kind {
            NodeKind::Mux {
                regs,
                offset,
                field,
                parents,
                ..
            } => mux::selected(regs, *offset, *field, parents.len()),
            _ => Err(ClockError::InvalidArgument),
        }
    }

    /// Downward gate-tolerance query: the worst answer from `id`'s own
    /// consumers and everything below it, for a pending output of
    /// `pending` Hz (0 means a gate).
    ///
    /// Vetoes only arise where a live clock would be lost; consumers and
    /// safe muxes on branches already at 0 Hz don't object, so bringing a
    /// powered-down tree up is never vetoed.
    pub fn children_check(&self, id: NodeId, pending: u32) -> GateCheck {
        let mut worst = GateCheck::Clear;
        if pending == 0 && self.rate(id) != 0 {
            for c in &self.nodes[id.index()].consumers {
                if !c.tolerates_gating() {
                    worst = GateCheck::HardVeto;
                }
            }
        }
        for k in 0..self.nodes.len() {
            if !self.feeds(k, id) {
                continue;
            }
            let child = NodeId(k as u16);
            let safe_child = matches!(
                &self.nodes[k].kind,
                NodeKind::Mux { safe: true, .. }
            );
            if pending == 0 && safe_child && self.rate(child) != 0 {
                // The safe mux qualifies its whole subtree: an intolerant
                // consumer below it still escalates.
                let sub = self.children_check(child, 0);
                worst = worst.max(if sub == GateCheck::HardVeto {
                    sub
                } else {
                    GateCheck::SafeVeto
                });
            } else {
                let derived = if pending == 0 {
                    0
                } else {
                    self.recalc_rate(child, pending).unwrap_or(0)
                };
                worst = worst.max(self.children_check(child, derived));
            }
        }
        worst
    }

    /// Whether node `k` currently takes its input from `id` (for muxes:
    /// actively selected, not merely listed).
    fn feeds(&self, k: usize, id: NodeId) -> bool {
        match &self.nodes[k].kind {
            NodeKind::Pll { parent, .. } | NodeKind::Div { parent, .. } => *parent == id,
            NodeKind::Mux {
                regs,
                offset,
                field,
                parents,
                ..
            } => match mux::selected(regs, *offset, *field, parents.len()) {
                Ok(sel) => parents[sel] == id,
                Err(_) => false,
            },
            NodeKind::Source { .. } => false,
        }
    }

    /// Tell `id`'s consumers about `rate`, then walk everything currently
    /// fed by it with the rate each would derive.
    fn notify_subtree(&mut self, id: NodeId, rate: u32) {
        for c in self.nodes[id.index()].consumers.iter_mut() {
            c.rate_changed(rate);
        }
        for k in 0..self.nodes.len() {
            if !self.feeds(k, id) {
                continue;
            }
            let child = NodeId(k as u16);
            let derived = if rate == 0 {
                0
            } else {
                self.recalc_rate(child, rate).unwrap_or(0)
            };
            self.notify_subtree(child, derived);
        }
    }

    fn set_rate_pll(
        &mut self,
        id: NodeId,
        variant: PllVariant,
        parent: NodeId,
        req: u32,
    ) -> Result<u32> {
        if req == 0 {
            self.pll_off(id)?;
            return Ok(0);
        }
        let req = pll::set_clamp(req);
        match self.children_check(id, 0) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => {
                clk_debug!("{}: transient gate rides over safe mux veto", self.name(id));
            }
            GateCheck::Clear => {}
        }
        let parent_rate = self.rate(parent);
        if parent_rate == 0 {
            return Err(ClockError::NotConnected);
        }
        let plan = pll::PllPlan::plan(variant, req, parent_rate)?;
        self.with_pll_regs(id, |regs| pll::power_down(regs))?;
        self.notify_subtree(id, 0);
        self.with_pll_regs(id, |regs| {
            plan.commit(regs);
            pll::power_up(regs);
        })?;
        if let Err(e) = self.wait_pll_lock(id, plan.ref_hz()) {
            // An unlocked PLL must not feed the tree: back out to
            // powered-off, leaving the subtree at the 0 Hz it was told.
            self.with_pll_regs(id, |regs| pll::power_down(regs))?;
            return Err(e);
        }
        let out = plan.out();
        clk_debug!("{}: set_rate committed {} Hz", self.name(id), out);
        self.notify_subtree(id, out);
        Ok(out)
    }

    /// Permanent gate. Unlike the transient window inside a reconfigure, a
    /// safe mux's veto is surfaced here, not ridden over.
    fn pll_off(&mut self, id: NodeId) -> Result<()> {
        match self.children_check(id, 0) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => return Err(ClockError::SafeGateVeto),
            GateCheck::Clear => {}
        }
        self.with_pll_regs(id, |regs| pll::power_down(regs))?;
        clk_debug!("{}: powered down", self.name(id));
        self.notify_subtree(id, 0);
        Ok(())
    }

    fn set_rate_mux(
        &mut self,
        id: NodeId,
        parents: &[NodeId],
        safe: bool,
        req: u32,
    ) -> Result<u32> {
        let pick = mux::pick_parent(req, parents.len(), |i, r| self.round_rate(parents[i], r))?;
        let current = self.current_mux_sel(id);
        if safe {
            if let Some(cur) = current {
                if cur != pick.index && self.rate(parents[cur]) == 0 {
                    // A safe mux handshakes the switch; with the selected
                    // input dead the handshake would hang.
                    return Err(ClockError::Unsupported);
                }
            }
        }
        match self.children_check(id, pick.rate) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => return Err(ClockError::SafeGateVeto),
            GateCheck::Clear => {}
        }
        let achieved = self.set_rate(parents[pick.index], req)?;
        self.write_mux_sel(id, pick.index)?;
        clk_debug!(
            "{}: input {} selected, {} Hz",
            self.name(id),
            pick.index,
            achieved
        );
        if current != Some(pick.index) {
            self.notify_subtree(id, achieved);
        }
        Ok(achieved)
    }

    fn set_rate_div(&mut self, id: NodeId, parent: NodeId, req: u32) -> Result<u32> {
        let plan = divider::plan(req, |t| self.round_rate(parent, t))?;
        match self.children_check(id, 0) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => {
                clk_debug!("{}: transient gate rides over safe mux veto", self.name(id));
            }
            GateCheck::Clear => {}
        }
        let got = self.set_rate(parent, plan.parent_rate)?;
        self.write_div(id, plan.div)?;
        let out = got / plan.div as u32;
        clk_debug!("{}: set_rate committed {} Hz, div {}", self.name(id), out, plan.div);
        self.notify_subtree(id, out);
        Ok(out)
    }

    fn configure_pll(
        &mut self,
        id: NodeId,
        variant: PllVariant,
        parent: NodeId,
        cfg: PllCfg,
    ) -> Result<()> {
        match cfg {
            PllCfg::Off => self.pll_off(id),
            PllCfg::Sscg { ndiv, md, ss } => {
                if variant != PllVariant::Sscg {
                    return Err(ClockError::InvalidArgument);
                }
                if ndiv == 0 || md == 0 || md > freq::MD_MAX {
                    return Err(ClockError::InvalidArgument);
                }
                if let Some(p) = ss {
                    if p.mf > 7 || p.mr > 7 || p.mc > 3 {
                        return Err(ClockError::InvalidArgument);
                    }
                }
                self.commit_pll_cfg(id, parent, cfg)
            }
            PllCfg::Int { ndiv, mdiv } => {
                if variant != PllVariant::Int {
                    return Err(ClockError::InvalidArgument);
                }
                if ndiv == 0 || mdiv == 0 {
                    return Err(ClockError::InvalidArgument);
                }
                self.commit_pll_cfg(id, parent, cfg)
            }
        }
    }

    fn commit_pll_cfg(&mut self, id: NodeId, parent: NodeId, cfg: PllCfg) -> Result<()> {
        match self.children_check(id, 0) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => {
                clk_debug!("{}: transient gate rides over safe mux veto", self.name(id));
            }
            GateCheck::Clear => {}
        }
        let parent_rate = self.rate(parent);
        self.with_pll_regs(id, |regs| pll::power_down(regs))?;
        self.notify_subtree(id, 0);
        let (ref_hz, achieved) = match cfg {
            PllCfg::Sscg { ndiv, md, ss } => {
                self.with_pll_regs(id, |regs| {
                    pll::write_sscg_cfg(regs, ndiv, md, ss);
                    pll::power_up(regs);
                })?;
                let ref_hz = parent_rate / ndiv as u32;
                (ref_hz, freq::frac_mul(ref_hz, md))
            }
            PllCfg::Int { ndiv, mdiv } => {
                self.with_pll_regs(id, |regs| {
                    pll::write_int_cfg(regs, ndiv, mdiv);
                    pll::power_up(regs);
                })?;
                let achieved = (parent_rate as u64 * mdiv as u64 / ndiv as u64) as u32;
                (parent_rate / ndiv as u32, achieved)
            }
            PllCfg::Off => return Err(ClockError::InvalidArgument),
        };
        if let Err(e) = self.wait_pll_lock(id, ref_hz) {
            self.with_pll_regs(id, |regs| pll::power_down(regs))?;
            return Err(e);
        }
        clk_debug!("{}: configured, {} Hz", self.name(id), achieved);
        self.notify_subtree(id, achieved);
        Ok(())
    }

    fn configure_mux(
        &mut self,
        id: NodeId,
        parents: &[NodeId],
        safe: bool,
        input: usize,
    ) -> Result<()> {
        if input >= parents.len() {
            return Err(ClockError::InvalidArgument);
        }
        let current = self.current_mux_sel(id);
        if safe {
            if let Some(cur) = current {
                if cur != input && self.rate(parents[cur]) == 0 {
                    return Err(ClockError::Unsupported);
                }
            }
        }
        self.write_mux_sel(id, input)?;
        if current != Some(input) {
            let rate = self.rate(id);
            clk_debug!("{}: input {} selected, {} Hz", self.name(id), input, rate);
            self.notify_subtree(id, rate);
        }
        Ok(())
    }

    fn configure_div(&mut self, id: NodeId, div: u8) -> Result<()> {
        if !divider::valid_div(div) {
            return Err(ClockError::InvalidArgument);
        }
        match self.children_check(id, 0) {
            GateCheck::HardVeto => return Err(ClockError::HardVeto),
            GateCheck::SafeVeto => {
                clk_debug!("{}: transient gate rides over safe mux veto", self.name(id));
            }
            GateCheck::Clear => {}
        }
        self.write_div(id, div)?;
        let out = self.rate(id);
        self.notify_subtree(id, out);
        Ok(())
    }

    fn current_mux_sel(&self, id: NodeId) -> Option<usize> {
        match &self.nodes[id.index()].kind {
            NodeKind::Mux {
                regs,
                offset,
                field,
                parents,
                ..
            } => mux::selected(regs, *offset, *field, parents.len()).ok(),
            _ => None,
        }
    }

    fn write_mux_sel(&mut self, id: NodeId, index: usize) -> Result<()> {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Mux {
                regs, offset, field, ..
            } => {
                mux::write_sel(regs, *offset, *field, index);
                Ok(())
            }
            _ => Err(ClockError::InvalidArgument),
        }
    }

    fn write_div(&mut self, id: NodeId, div: u8) -> Result<()> {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Div { regs, offset, .. } => {
                divider::write_div(regs, *offset, div);
                Ok(())
            }
            _ => Err(ClockError::InvalidArgument),
        }
    }

    fn with_pll_regs<T>(&mut self, id: NodeId, f: impl FnOnce(&mut R) -> T) -> Result<T> {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Pll { regs, .. } => Ok(f(regs)),
            _ => Err(ClockError::InvalidArgument),
        }
    }

    /// Lock wait for a PLL whose new configuration is already latched. The
    /// spread-spectrum state is read back from the registers, so the policy
    /// always matches what was actually committed.
    fn wait_pll_lock(&mut self, id: NodeId, ref_hz: u32) -> Result<()> {
        let delay = &mut self.delay;
        match &self.nodes[id.index()].kind {
            NodeKind::Pll { regs, variant, .. } => {
                let ss = *variant == PllVariant::Sscg && pll::ss_active(regs);
                pll::wait_lock(regs, delay, ref_hz, ss)
            }
            _ => Err(ClockError::InvalidArgument),
        }
    }
}
