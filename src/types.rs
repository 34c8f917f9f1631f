// =============================================================================
// Shared types used across the cycler
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a trade cycle (and of an open position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens (or adds to) a position in this direction.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// Interpret an exchange side label (`side` / `positionSide`).
    ///
    /// `BUY` and `LONG` mean long; anything else is treated as short.
    pub fn from_exchange_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Self::Long,
            _ => Self::Short,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side as understood by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1.0 for buys, -1.0 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Whether orders go to the real venue or to the in-process paper exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Paper,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

impl std::str::FromStr for AccountMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" | "demo" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => anyhow::bail!("unknown account mode '{other}' (expected paper or live)"),
        }
    }
}

/// Lot-size rule for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotRule {
    /// Quantity is submitted as computed.
    Decimal,
    /// Quantity is floored to whole units, never below one unit.
    WholeUnits,
}

impl Default for LotRule {
    fn default() -> Self {
        Self::WholeUnits
    }
}

impl LotRule {
    pub fn apply(self, quantity: f64) -> f64 {
        match self {
            Self::Decimal => quantity,
            Self::WholeUnits => quantity.floor().max(1.0),
        }
    }
}
