//! Walk-forward backtesting
//!
//! Repeats the production training cycle over chronologically advancing
//! windows, scores each window's test slice, and simulates capped Kelly
//! staking against the recorded odds.

mod engine;
mod staking;
mod windows;
#[cfg(test)]
mod tests;

pub use engine::{BacktestReport, BacktestSummary, SkippedWindow, WalkForwardBacktester, WindowResult};
pub use staking::{Bet, StakingSimulator, StakingSummary};
pub use windows::{generate_windows, BacktestWindow};
