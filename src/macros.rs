//! Internal logging macros. Forward to `defmt` or `log` depending on which
//! feature is enabled; with neither, they evaluate their arguments' borrows
//! and emit nothing.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "defmt")] {
        macro_rules! clk_trace {
            ($($arg:expr),* $(,)?) => { defmt::trace!($($arg),*) };
        }
        macro_rules! clk_debug {
            ($($arg:expr),* $(,)?) => { defmt::debug!($($arg),*) };
        }
    } else if #[cfg(feature = "log")] {
        macro_rules! clk_trace {
            ($($arg:expr),* $(,)?) => { log::trace!($($arg),*) };
        }
        macro_rules! clk_debug {
            ($($arg:expr),* $(,)?) => { log::debug!($($arg),*) };
        }
    } else {
        macro_rules! clk_trace {
            ($($arg:expr),* $(,)?) => {{ let _ = ($( &$arg ),*); }};
        }
        macro_rules! clk_debug {
            ($($arg:expr),* $(,)?) => {{ let _ = ($( &$arg ),*); }};
        }
    }
}

pub(crate) use {clk_debug, clk_trace};
