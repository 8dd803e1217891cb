//! Engine variant catalogue and backend capability flags.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{variant::GameVariant, KibitzError};

/// Transport used to reach an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    LocalProcess,
    EmbeddedModule,
    SandboxedSubordinate,
    RemoteService,
}

/// Where the precomputed evaluation weights of a variant come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeightSource {
    None,
    /// The module reports the file names it wants, by index.
    ModuleRecommended,
    /// One file per game variant, looked up in the `nnue/` directory.
    PerGameVariant,
    /// A single named blob transferred once over the message boundary.
    Blob(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub hash_option: bool,
    pub threads_option: bool,
    pub variant_option: bool,
    pub weights: WeightSource,
}

impl Capabilities {
    pub fn requires_weights(&self) -> bool {
        self.weights != WeightSource::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub variant: EngineVariant,
    pub kind: BackendKind,
    pub capabilities: Capabilities,
}

/// Selectable engine builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EngineVariant {
    #[serde(rename = "stockfish-17-nnue-79")]
    Stockfish17Nnue79,
    #[serde(rename = "stockfish-16-nnue-40")]
    Stockfish16Nnue40,
    #[default]
    #[serde(rename = "stockfish-16-nnue-7")]
    Stockfish16Nnue7,
    #[serde(rename = "stockfish-11-hce")]
    Stockfish11Hce,
    #[serde(rename = "stockfish-6")]
    Stockfish6,
    #[serde(rename = "lc0")]
    Lc0,
    #[serde(rename = "fairy-stockfish-14-nnue")]
    FairyStockfish14Nnue,
    #[serde(rename = "remote")]
    Remote,
}

impl EngineVariant {
    pub const ALL: [EngineVariant; 8] = [
        EngineVariant::Stockfish17Nnue79,
        EngineVariant::Stockfish16Nnue40,
        EngineVariant::Stockfish16Nnue7,
        EngineVariant::Stockfish11Hce,
        EngineVariant::Stockfish6,
        EngineVariant::Lc0,
        EngineVariant::FairyStockfish14Nnue,
        EngineVariant::Remote,
    ];

    pub fn id(self) -> &'static str {
        match self {
            EngineVariant::Stockfish17Nnue79 => "stockfish-17-nnue-79",
            EngineVariant::Stockfish16Nnue40 => "stockfish-16-nnue-40",
            EngineVariant::Stockfish16Nnue7 => "stockfish-16-nnue-7",
            EngineVariant::Stockfish11Hce => "stockfish-11-hce",
            EngineVariant::Stockfish6 => "stockfish-6",
            EngineVariant::Lc0 => "lc0",
            EngineVariant::FairyStockfish14Nnue => "fairy-stockfish-14-nnue",
            EngineVariant::Remote => "remote",
        }
    }

    pub fn descriptor(self) -> BackendDescriptor {
        let full = Capabilities {
            hash_option: true,
            threads_option: true,
            variant_option: false,
            weights: WeightSource::None,
        };
        let (kind, capabilities) = match self {
            EngineVariant::Stockfish17Nnue79 | EngineVariant::Stockfish16Nnue7 => (
                BackendKind::EmbeddedModule,
                Capabilities {
                    weights: WeightSource::ModuleRecommended,
                    ..full
                },
            ),
            EngineVariant::Stockfish11Hce => (BackendKind::EmbeddedModule, full),
            // Legacy builds crash when they receive a Hash option.
            EngineVariant::Stockfish16Nnue40 => (
                BackendKind::LocalProcess,
                Capabilities {
                    hash_option: false,
                    ..full
                },
            ),
            EngineVariant::Stockfish6 => (
                BackendKind::LocalProcess,
                Capabilities {
                    hash_option: false,
                    threads_option: false,
                    ..full
                },
            ),
            EngineVariant::Lc0 => (
                BackendKind::SandboxedSubordinate,
                Capabilities {
                    weights: WeightSource::Blob("weights_32195.dat.gz"),
                    ..full
                },
            ),
            EngineVariant::FairyStockfish14Nnue => (
                BackendKind::EmbeddedModule,
                Capabilities {
                    variant_option: true,
                    weights: WeightSource::PerGameVariant,
                    ..full
                },
            ),
            EngineVariant::Remote => (BackendKind::RemoteService, full),
        };
        BackendDescriptor {
            variant: self,
            kind,
            capabilities,
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EngineVariant {
    type Err = KibitzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineVariant::ALL
            .into_iter()
            .find(|variant| variant.id() == s)
            .ok_or_else(|| KibitzError::Configuration(format!("unknown engine variant '{s}'")))
    }
}

/// Weight file the fairy engine needs for a given game variant.
pub fn variant_weight_file(variant: GameVariant) -> &'static str {
    match variant {
        GameVariant::Chess | GameVariant::FischerRandom => "nn-46832cfbead3.nnue",
        GameVariant::Crazyhouse => "crazyhouse-8ebf84784ad2.nnue",
        GameVariant::KingOfTheHill => "kingofthehill-978b86d0e6a4.nnue",
        GameVariant::ThreeCheck => "3check-cb5f517c228b.nnue",
        GameVariant::Antichess => "antichess-dd3cbe53cd4e.nnue",
        GameVariant::Atomic => "atomic-2cf13ff256cc.nnue",
        GameVariant::Horde => "horde-28173ddccabe.nnue",
        GameVariant::RacingKings => "racingkings-636b95f085e3.nnue",
    }
}
