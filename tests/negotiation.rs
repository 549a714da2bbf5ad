//! End-to-end rate negotiation over an LPC55-flavored clock tree: two
//! roots, both PLL variants, the glitchless main mux and the AHB divider,
//! driven purely through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use syscon_clocks::{
    BitField, ClockError, ClockTree, ClockTreeBuilder, Consumer, GateCheck, NodeCfg, NodeId,
    PllCfg, RegWindow, SscgProfile,
};

const CTRL: usize = 0x00;
const CTRL_PD: u32 = 1 << 0;
const STAT: usize = 0x04;
const STAT_LOCK: u32 = 1 << 0;
const NDEC: usize = 0x08;
const MDEC: usize = 0x0C;
const SSCG1: usize = 0x14;
const SSCG1_MD_MSB: u32 = 1 << 0;

/// One register window backed by plain memory. Clones share the storage,
/// so the test keeps a handle and watches what the driver writes. The
/// lock bit tracks the power bit unless the window is built stuck.
#[derive(Clone)]
struct FakeSyscon {
    mem: Rc<RefCell<Vec<u32>>>,
    lock_stuck: bool,
}

impl FakeSyscon {
    fn new() -> Self {
        Self {
            mem: Rc::new(RefCell::new(vec![0; 16])),
            lock_stuck: false,
        }
    }

    fn never_locks() -> Self {
        Self {
            mem: Rc::new(RefCell::new(vec![0; 16])),
            lock_stuck: true,
        }
    }

    fn word(&self, offset: usize) -> u32 {
        self.mem.borrow()[offset / 4]
    }

    fn dump(&self) -> Vec<u32> {
        self.mem.borrow().clone()
    }
}

impl RegWindow for FakeSyscon {
    fn read32(&self, offset: usize) -> u32 {
        if offset == STAT {
            let powered = self.word(CTRL) & CTRL_PD == 0;
            return if powered && !self.lock_stuck {
                STAT_LOCK
            } else {
                0
            };
        }
        self.word(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.mem.borrow_mut()[offset / 4] = value;
    }
}

/// Delay provider that only counts.
#[derive(Clone)]
struct SettleLog(Rc<Cell<u64>>);

impl SettleLog {
    fn new() -> Self {
        Self(Rc::new(Cell::new(0)))
    }

    fn ns(&self) -> u64 {
        self.0.get()
    }
}

impl DelayNs for SettleLog {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

/// A clocked peripheral stand-in that logs every rate notification.
#[derive(Clone)]
struct Watcher {
    seen: Rc<RefCell<Vec<u32>>>,
    strict: bool,
}

impl Watcher {
    /// Cannot survive losing its clock.
    fn strict() -> Self {
        Self {
            seen: Rc::new(RefCell::new(Vec::new())),
            strict: true,
        }
    }

    /// Tolerates the gate window.
    fn relaxed() -> Self {
        Self {
            seen: Rc::new(RefCell::new(Vec::new())),
            strict: false,
        }
    }

    fn rates(&self) -> Vec<u32> {
        self.seen.borrow().clone()
    }
}

impl Consumer for Watcher {
    fn tolerates_gating(&self) -> bool {
        !self.strict
    }

    fn rate_changed(&mut self, rate: u32) {
        self.seen.borrow_mut().push(rate);
    }
}

struct Board {
    tree: ClockTree<FakeSyscon, SettleLog>,
    fro_12m: NodeId,
    pll0: NodeId,
    pll1: NodeId,
    main_sel: NodeId,
    ahb: NodeId,
    pll0_regs: FakeSyscon,
    pll1_regs: FakeSyscon,
    ahb_regs: FakeSyscon,
    settle: SettleLog,
}

/// Main clock path of an LPC55: 12 MHz FRO and a 16 MHz crystal, the
/// SSCG PLL0 and integer PLL1 off the crystal, the safe main mux over
/// [fro, pll0, pll1], and the AHB divider.
fn board(stuck: bool, on_ahb: Option<Watcher>) -> Board {
    let make = if stuck {
        FakeSyscon::never_locks
    } else {
        FakeSyscon::new
    };
    let pll0_regs = make();
    let pll1_regs = make();
    let sel_regs = FakeSyscon::new();
    let ahb_regs = FakeSyscon::new();
    let settle = SettleLog::new();

    let mut b = ClockTreeBuilder::new();
    let fro_12m = b.fixed_source("fro_12m", 12_000_000);
    let clk_in = b.fixed_source("clk_in", 16_000_000);
    let pll0 = b.sscg_pll("pll0", clk_in, pll0_regs.clone());
    let pll1 = b.int_pll("pll1", clk_in, pll1_regs.clone());
    let main_sel = b.safe_mux(
        "main_clk_sel",
        &[fro_12m, pll0, pll1],
        sel_regs.clone(),
        0x00,
        BitField::new(0, 2),
    );
    let ahb = b.post_div("ahb_clk_div", main_sel, ahb_regs.clone(), 0x00);
    if let Some(w) = on_ahb {
        b.attach_consumer(ahb, Box::new(w));
    }
    Board {
        tree: b.build(settle.clone()),
        fro_12m,
        pll0,
        pll1,
        main_sel,
        ahb,
        pll0_regs,
        pll1_regs,
        ahb_regs,
        settle,
    }
}

#[test]
fn brings_main_clock_to_300mhz() {
    let mut board = board(false, None);
    // The fractional PLL synthesizes 300 MHz exactly from the crystal,
    // so the mux prefers it over the integer PLL's 298.67 MHz.
    assert_eq!(board.tree.set_rate(board.main_sel, 300_000_000), Ok(300_000_000));
    assert_eq!(board.tree.selected_parent(board.main_sel), Ok(1));
    assert_eq!(board.tree.rate(board.pll0), 300_000_000);
    // Halve it onto the AHB.
    assert_eq!(board.tree.set_rate(board.ahb, 150_000_000), Ok(150_000_000));
    assert_eq!(board.tree.rate(board.ahb), 150_000_000);
}

#[test]
fn integer_pll_satisfices_within_one_percent() {
    let mut board = board(false, None);
    let got = board.tree.set_rate(board.pll1, 300_000_000).unwrap();
    assert_eq!(got, 298_666_666);
    assert!(got.abs_diff(300_000_000) <= 3_000_000);
    // The committed dividers reproduce the plan: 16 MHz * 56 / 3.
    assert_eq!(board.pll1_regs.word(NDEC) & 0xFF, 3);
    assert_eq!(board.pll1_regs.word(MDEC) & 0xFFFF, 56);
    assert_eq!(board.tree.rate(board.pll1), got);
}

#[test]
fn consumers_ride_the_gate_window() {
    let ahb_load = Watcher::relaxed();
    let mut board = board(false, Some(ahb_load.clone()));
    // One top-down call negotiates the whole chain.
    assert_eq!(board.tree.set_rate(board.ahb, 150_000_000), Ok(150_000_000));
    // Retuning the live PLL gates the branch for the lock window; the
    // load on the AHB sees 0 and then the new derived rate.
    assert_eq!(board.tree.set_rate(board.pll0, 320_000_000), Ok(320_000_000));
    assert_eq!(ahb_load.rates(), vec![0, 150_000_000, 0, 160_000_000]);
}

#[test]
fn strict_consumer_vetoes_live_gate() {
    let core = Watcher::strict();
    let mut board = board(false, Some(core.clone()));
    board.tree.set_rate(board.ahb, 150_000_000).unwrap();
    assert_eq!(board.tree.children_check(board.pll0, 0), GateCheck::HardVeto);
    let before = board.pll0_regs.dump();
    assert_eq!(
        board.tree.set_rate(board.pll0, 320_000_000),
        Err(ClockError::HardVeto)
    );
    assert_eq!(board.pll0_regs.dump(), before);
    assert_eq!(board.tree.rate(board.ahb), 150_000_000);
}

#[test]
fn shutdown_and_restart_stay_possible() {
    let core = Watcher::strict();
    let mut board = board(false, Some(core.clone()));
    board.tree.set_rate(board.ahb, 150_000_000).unwrap();
    // Step the main clock onto the FRO first. A rate change is not a
    // gate, so even the strict consumer allows it.
    assert_eq!(board.tree.set_rate(board.main_sel, 12_000_000), Ok(12_000_000));
    // Nothing hangs off PLL0 anymore; shutting it down is clear.
    assert_eq!(board.tree.set_rate(board.pll0, 0), Ok(0));
    assert_ne!(board.pll0_regs.word(CTRL) & CTRL_PD, 0);
    // And so is the restart, strict consumer or not.
    assert_eq!(board.tree.set_rate(board.pll0, 300_000_000), Ok(300_000_000));
    assert_eq!(board.tree.set_rate(board.main_sel, 300_000_000), Ok(300_000_000));
    assert_eq!(board.tree.rate(board.ahb), 150_000_000);
    assert_eq!(core.rates().last(), Some(&150_000_000));
}

#[test]
fn permanent_gate_respects_safe_mux() {
    let mut board = board(false, None);
    board.tree.set_rate(board.main_sel, 300_000_000).unwrap();
    assert_eq!(board.tree.children_check(board.pll0, 0), GateCheck::SafeVeto);
    assert_eq!(board.tree.set_rate(board.pll0, 0), Err(ClockError::SafeGateVeto));
    assert_eq!(
        board.tree.configure(board.pll0, NodeCfg::Pll(PllCfg::Off)),
        Err(ClockError::SafeGateVeto)
    );
    // Still powered, still delivering.
    assert_eq!(board.pll0_regs.word(CTRL) & CTRL_PD, 0);
    assert_eq!(board.tree.rate(board.main_sel), 300_000_000);
}

#[test]
fn glitchless_mux_wont_strand_its_output() {
    let mut board = board(false, None);
    // Operator override onto the dead PLL1 is allowed.
    board
        .tree
        .configure(board.main_sel, NodeCfg::Mux { input: 2 })
        .unwrap();
    assert_eq!(board.tree.rate(board.main_sel), 0);
    // But the handshake out of a gated input would hang, so the switch
    // back is refused until the input is alive again.
    assert_eq!(
        board.tree.set_rate(board.main_sel, 12_000_000),
        Err(ClockError::Unsupported)
    );
    board.tree.set_rate(board.pll1, 300_000_000).unwrap();
    assert_eq!(board.tree.set_rate(board.main_sel, 12_000_000), Ok(12_000_000));
    assert_eq!(board.tree.selected_parent(board.main_sel), Ok(0));
    assert_eq!(board.tree.rate(board.fro_12m), 12_000_000);
}

#[test]
fn divider_walks_the_chain_up() {
    let mut board = board(false, None);
    // 130 MHz forces the search past 260 MHz (divide by 2 misses) up to
    // 520 MHz / 4, which PLL0 synthesizes exactly.
    assert_eq!(board.tree.set_rate(board.ahb, 130_000_000), Ok(130_000_000));
    assert_eq!(board.tree.rate(board.pll0), 520_000_000);
    assert_eq!(board.ahb_regs.word(0x00) & 0x1F, 2);
    // 130 * 2^25 needs the 33rd multiplier bit.
    assert_ne!(board.pll0_regs.word(SSCG1) & SSCG1_MD_MSB, 0);
}

#[test]
fn negotiation_is_stable() {
    for req in [300_000_000u32, 533_333_333, 549_000_000] {
        let mut board = board(false, None);
        let promised = board.tree.round_rate(board.pll0, req).unwrap();
        assert_eq!(board.tree.set_rate(board.pll0, req), Ok(promised));
        // Asking again for what was delivered changes nothing.
        assert_eq!(board.tree.round_rate(board.pll0, promised), Ok(promised));
        assert_eq!(board.tree.rate(board.pll0), promised);
    }
}

#[test]
fn clamps_bound_the_envelope() {
    let mut board = board(false, None);
    assert_eq!(board.tree.round_rate(board.pll0, 1_000), Ok(275_000_000));
    assert_eq!(board.tree.round_rate(board.pll0, u32::MAX), Ok(550_000_000));
    // Committed rates keep 1 MHz of margin off the VCO edges.
    assert_eq!(board.tree.set_rate(board.pll0, u32::MAX), Ok(549_000_000));
    assert_eq!(board.tree.set_rate(board.pll0, 1_000), Ok(276_000_000));
    // The integer PLL quantizes, but never past an edge: from 16 MHz the
    // nearest ratio to the clamped ceiling is 552 MHz, which the planner
    // passes over for one inside the envelope.
    assert_eq!(board.tree.round_rate(board.pll1, u32::MAX), Ok(549_333_333));
    assert_eq!(board.tree.set_rate(board.pll1, u32::MAX), Ok(544_000_000));
    assert_eq!(board.tree.round_rate(board.pll1, 1_000), Ok(277_333_333));
    assert_eq!(board.tree.set_rate(board.pll1, 1_000), Ok(277_333_333));
}

#[test]
fn spread_spectrum_settles_on_time() {
    // LOCK is stuck low; engaging spread spectrum must not poll it.
    let mut board = board(true, None);
    board
        .tree
        .configure(
            board.pll0,
            NodeCfg::Pll(PllCfg::Sscg {
                ndiv: 4,
                md: 75 << 25,
                ss: Some(SscgProfile { mf: 4, mr: 3, mc: 1 }),
            }),
        )
        .unwrap();
    assert_eq!(board.settle.ns(), 6_000_000);
    assert_eq!(board.tree.rate(board.pll0), 300_000_000);
}

#[test]
fn lock_timeout_surfaces() {
    let mut board = board(true, None);
    assert_eq!(
        board.tree.set_rate(board.pll1, 300_000_000),
        Err(ClockError::LockTimeout)
    );
    // The failed bring-up leaves the PLL powered down, not half-running
    // on the new dividers.
    assert_ne!(board.pll1_regs.word(CTRL) & CTRL_PD, 0);
    assert_eq!(board.tree.rate(board.pll1), 0);
}
