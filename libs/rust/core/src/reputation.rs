//! Reputation scoring for stakers.
//!
//! The score grows with the square root of the stake, doubles linearly over
//! the first year of staking and loses 10% per recorded slash. Everything in
//! here is pure; rounding for display happens in [`round1`] at the edges.

use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// Base units per whole token (18 decimals).
pub const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;
pub const SECONDS_PER_DAY: i64 = 86_400;
/// Stake age at which the age multiplier stops growing.
pub const MATURITY_DAYS: u64 = 365;
/// Fraction of the score removed per recorded slash.
pub const PENALTY_PER_SLASH: f64 = 0.1;

/// Exact token quantity in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub const fn from_wei(wei: u128) -> Self { Self(wei) }

    /// Whole tokens; saturates at `u128::MAX` base units.
    pub const fn from_tokens(tokens: u64) -> Self { Self((tokens as u128).saturating_mul(WEI_PER_TOKEN)) }

    pub const fn wei(self) -> u128 { self.0 }

    pub const fn is_zero(self) -> bool { self.0 == 0 }

    /// Normalized decimal value. Any non-zero amount maps to a strictly
    /// positive float.
    pub fn as_tokens(self) -> f64 {
        let whole = (self.0 / WEI_PER_TOKEN) as f64;
        let frac = (self.0 % WEI_PER_TOKEN) as f64 / WEI_PER_TOKEN as f64;
        whole + frac
    }

    pub const fn saturating_add(self, other: Self) -> Self { Self(self.0.saturating_add(other.0)) }
}

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self { iter.fold(Self::ZERO, Self::saturating_add) }
}

impl<'a> Sum<&'a TokenAmount> for TokenAmount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self { iter.copied().sum() }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / WEI_PER_TOKEN;
        let frac = self.0 % WEI_PER_TOKEN;
        if frac == 0 { return write!(f, "{whole}"); }
        let digits = format!("{frac:018}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// `sqrt(stake) * age_multiplier * (1 - penalty)`, never negative.
pub fn reputation(staked_tokens: f64, stake_days: u64, penalty_count: u64) -> f64 {
    // also rejects NaN
    if !(staked_tokens > 0.0) { return 0.0; }
    let age_multiplier = 1.0 + (stake_days as f64 / MATURITY_DAYS as f64).min(1.0);
    let penalty = (penalty_count as f64 * PENALTY_PER_SLASH).min(1.0);
    (staked_tokens.sqrt() * age_multiplier * (1.0 - penalty)).max(0.0)
}

/// Whole days between `staked_at` and `now`; zero when unset or in the future.
pub fn stake_days(staked_at: Option<u64>, now: i64) -> u64 {
    match staked_at {
        None => 0,
        Some(at) => {
            let at = i64::try_from(at).unwrap_or(i64::MAX);
            (now.saturating_sub(at).max(0) / SECONDS_PER_DAY) as u64
        }
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 { (value * 10.0).round() / 10.0 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier { Unranked, Bronze, Silver, Gold, Diamond }

impl Tier {
    /// Highest first so the best applicable tier wins.
    const LADDER: [Tier; 4] = [Tier::Diamond, Tier::Gold, Tier::Silver, Tier::Bronze];

    /// Inclusive lower bound in whole tokens.
    pub const fn min_tokens(self) -> u64 {
        match self { Tier::Unranked => 0, Tier::Bronze => 100, Tier::Silver => 1_000, Tier::Gold => 10_000, Tier::Diamond => 100_000 }
    }

    pub fn for_tokens(staked_tokens: f64) -> Tier {
        Self::LADDER.into_iter().find(|t| staked_tokens >= t.min_tokens() as f64).unwrap_or(Tier::Unranked)
    }

    /// Exact variant of [`for_tokens`](Self::for_tokens) on base units.
    pub fn for_amount(amount: TokenAmount) -> Tier {
        Self::LADDER.into_iter().find(|t| amount >= TokenAmount::from_tokens(t.min_tokens())).unwrap_or(Tier::Unranked)
    }

    pub const fn label(self) -> &'static str {
        match self { Tier::Unranked => "Unranked", Tier::Bronze => "Bronze", Tier::Silver => "Silver", Tier::Gold => "Gold", Tier::Diamond => "Diamond" }
    }

    pub const fn ordinal(self) -> u8 { self as u8 }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}
