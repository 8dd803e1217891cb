use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::KibitzError;

/// Rule set of the game being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GameVariant {
    #[default]
    #[serde(rename = "chess")]
    Chess,
    #[serde(rename = "fischerandom")]
    FischerRandom,
    #[serde(rename = "crazyhouse")]
    Crazyhouse,
    #[serde(rename = "kingofthehill")]
    KingOfTheHill,
    #[serde(rename = "3check")]
    ThreeCheck,
    #[serde(rename = "antichess")]
    Antichess,
    #[serde(rename = "atomic")]
    Atomic,
    #[serde(rename = "horde")]
    Horde,
    #[serde(rename = "racingkings")]
    RacingKings,
}

impl GameVariant {
    pub const ALL: [GameVariant; 9] = [
        GameVariant::Chess,
        GameVariant::FischerRandom,
        GameVariant::Crazyhouse,
        GameVariant::KingOfTheHill,
        GameVariant::ThreeCheck,
        GameVariant::Antichess,
        GameVariant::Atomic,
        GameVariant::Horde,
        GameVariant::RacingKings,
    ];

    /// Identifier used in configuration and for the `UCI_Variant` option.
    pub fn id(self) -> &'static str {
        match self {
            GameVariant::Chess => "chess",
            GameVariant::FischerRandom => "fischerandom",
            GameVariant::Crazyhouse => "crazyhouse",
            GameVariant::KingOfTheHill => "kingofthehill",
            GameVariant::ThreeCheck => "3check",
            GameVariant::Antichess => "antichess",
            GameVariant::Atomic => "atomic",
            GameVariant::Horde => "horde",
            GameVariant::RacingKings => "racingkings",
        }
    }

    /// Variants where a side that runs out of moves wins instead of losing.
    pub fn inverts_loss(self) -> bool {
        matches!(self, GameVariant::Antichess)
    }

    pub fn is_chess960(self) -> bool {
        matches!(self, GameVariant::FischerRandom)
    }
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for GameVariant {
    type Err = KibitzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameVariant::ALL
            .into_iter()
            .find(|variant| variant.id() == s)
            .ok_or_else(|| KibitzError::Configuration(format!("unknown game variant '{s}'")))
    }
}
