//! Register-faithful fakes for host-side tests.

use alloc::{rc::Rc, vec::Vec};
use core::cell::{Cell, RefCell};

use embedded_hal::delay::DelayNs;

use crate::{
    node::Consumer,
    regs::{RegWindow, pll},
};

/// How a simulated PLL's lock bit behaves.
#[derive(Clone, Copy, PartialEq)]
pub(crate) enum LockSim {
    /// Plain RAM window, no lock synthesis (muxes, dividers).
    None,
    /// LOCK reads 1 whenever the PLL is powered up.
    Instant,
    /// LOCK never comes; exercises the timeout path.
    Never,
}

/// RAM-backed [`RegWindow`]. Cloning yields a handle onto the same
/// registers, so a test can keep one and inspect what the tree wrote.
#[derive(Clone)]
pub(crate) struct SimWindow {
    words: Rc<RefCell<[u32; 16]>>,
    lock: LockSim,
}

impl SimWindow {
    pub fn pll(lock: LockSim) -> Self {
        Self {
            words: Rc::new(RefCell::new([0; 16])),
            lock,
        }
    }

    pub fn plain() -> Self {
        Self::pll(LockSim::None)
    }

    pub fn raw(&self, offset: usize) -> u32 {
        self.words.borrow()[offset / 4]
    }

    pub fn set_raw(&self, offset: usize, value: u32) {
        self.words.borrow_mut()[offset / 4] = value;
    }

    /// Snapshot of the whole window, for before/after comparisons.
    pub fn snapshot(&self) -> [u32; 16] {
        *self.words.borrow()
    }
}

impl RegWindow for SimWindow {
    fn read32(&self, offset: usize) -> u32 {
        if self.lock != LockSim::None && offset == pll::STAT {
            let powered = self.raw(pll::CTRL) & pll::CTRL_PD == 0;
            return match self.lock {
                LockSim::Instant if powered => pll::STAT_LOCK,
                _ => 0,
            };
        }
        self.raw(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.set_raw(offset, value);
    }
}

/// Delay provider that records instead of sleeping. Clones share the
/// counters.
#[derive(Clone)]
pub(crate) struct CountingDelay {
    ns: Rc<Cell<u64>>,
}

impl CountingDelay {
    pub fn new() -> Self {
        Self {
            ns: Rc::new(Cell::new(0)),
        }
    }

    pub fn total_ns(&self) -> u64 {
        self.ns.get()
    }
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ns.set(self.ns.get() + ns as u64);
    }
}

/// Consumer that records every rate notification. Clones share the log.
#[derive(Clone)]
pub(crate) struct RecordingConsumer {
    rates: Rc<RefCell<Vec<u32>>>,
    tolerant: bool,
}

impl RecordingConsumer {
    pub fn tolerant() -> Self {
        Self {
            rates: Rc::new(RefCell::new(Vec::new())),
            tolerant: true,
        }
    }

    pub fn intolerant() -> Self {
        Self {
            rates: Rc::new(RefCell::new(Vec::new())),
            tolerant: false,
        }
    }

    pub fn seen(&self) -> Vec<u32> {
        self.rates.borrow().clone()
    }
}

impl Consumer for RecordingConsumer {
    fn tolerates_gating(&self) -> bool {
        self.tolerant
    }

    fn rate_changed(&mut self, rate: u32) {
        self.rates.borrow_mut().push(rate);
    }
}
