//! Kelly staking simulation
//!
//! Stakes are fractions of a unit bankroll, computed per bet (no compounding):
//! - edge = p * odds - 1
//! - stake = min(kelly_fraction * edge / (odds - 1), stake_cap)
//! - realized return = stake * (outcome * odds - 1)

use rust_decimal::prelude::*;
use serde::Serialize;

use crate::config::StakingConfig;
use crate::error::{PipelineError, Result};
use crate::types::MatchRow;

const MONEY_DP: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bet {
    pub match_id: String,
    pub probability: Decimal,
    pub odds: Decimal,
    pub edge: Decimal,
    pub stake: Decimal,
    pub won: bool,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StakingSummary {
    pub bets: usize,
    pub wins: usize,
    pub total_staked: Decimal,
    pub total_return: Decimal,
    /// `None` when nothing was staked
    pub roi: Option<Decimal>,
}

impl StakingSummary {
    pub fn from_bets(bets: &[Bet]) -> Self {
        let mut summary = Self::default();
        for bet in bets {
            summary.bets += 1;
            if bet.won {
                summary.wins += 1;
            }
            summary.total_staked += bet.stake;
            summary.total_return += bet.profit;
        }
        summary.roi = roi(summary.total_return, summary.total_staked);
        summary
    }

    /// Combine window summaries into one
    pub fn merge<'a, I>(summaries: I) -> Self
    where
        I: IntoIterator<Item = &'a StakingSummary>,
    {
        let mut total = Self::default();
        for s in summaries {
            total.bets += s.bets;
            total.wins += s.wins;
            total.total_staked += s.total_staked;
            total.total_return += s.total_return;
        }
        total.roi = roi(total.total_return, total.total_staked);
        total
    }
}

fn roi(total_return: Decimal, total_staked: Decimal) -> Option<Decimal> {
    (total_staked > Decimal::ZERO).then(|| (total_return / total_staked).round_dp(MONEY_DP))
}

#[derive(Debug, Clone)]
pub struct StakingSimulator {
    config: StakingConfig,
}

impl StakingSimulator {
    pub fn new(config: StakingConfig) -> Self {
        Self { config }
    }

    /// Edge and stake for one opportunity, `None` if it is not a bet
    pub fn stake(&self, probability: Decimal, odds: Decimal) -> Option<(Decimal, Decimal)> {
        if odds <= Decimal::ONE {
            return None;
        }
        let edge = probability * odds - Decimal::ONE;
        if edge <= self.config.min_edge {
            return None;
        }

        let kelly = self.config.kelly_fraction * edge / (odds - Decimal::ONE);
        let stake = kelly.min(self.config.stake_cap).round_dp(MONEY_DP);
        (stake > Decimal::ZERO).then_some((edge.round_dp(MONEY_DP), stake))
    }

    pub fn simulate(&self, rows: &[MatchRow], probabilities: &[f64]) -> Result<(Vec<Bet>, StakingSummary)> {
        if rows.len() != probabilities.len() {
            return Err(PipelineError::LengthMismatch {
                expected: rows.len(),
                actual: probabilities.len(),
            });
        }

        let mut bets = Vec::new();
        for (row, p) in rows.iter().zip(probabilities) {
            let (Some(probability), Some(odds)) = (Decimal::from_f64(*p), Decimal::from_f64(row.odds)) else {
                continue;
            };
            let Some((edge, stake)) = self.stake(probability, odds) else {
                continue;
            };

            let payout = if row.label { odds } else { Decimal::ZERO };
            bets.push(Bet {
                match_id: row.match_id.clone(),
                probability: probability.round_dp(MONEY_DP),
                odds,
                edge,
                stake,
                won: row.label,
                profit: (stake * (payout - Decimal::ONE)).round_dp(MONEY_DP),
            });
        }

        let summary = StakingSummary::from_bets(&bets);
        Ok((bets, summary))
    }
}
