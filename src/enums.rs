//! Opaque codes passed through to the engine, plus the callback verdicts.
//!
//! Numeric values match `include/feed_bridge.h`.

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schema {
    Mbo = 0,
    #[serde(rename = "mbp-1")]
    Mbp1 = 1,
    #[serde(rename = "mbp-10")]
    Mbp10 = 2,
    Tbbo = 3,
    Trades = 4,
    #[serde(rename = "ohlcv-1s")]
    Ohlcv1S = 5,
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1M = 6,
    #[serde(rename = "ohlcv-1h")]
    Ohlcv1H = 7,
    #[serde(rename = "ohlcv-1d")]
    Ohlcv1D = 8,
    Definition = 9,
    Statistics = 10,
    Status = 11,
    Imbalance = 12,
    OhlcvEod = 13,
    #[serde(rename = "cmbp-1")]
    Cmbp1 = 14,
    #[serde(rename = "cbbo-1s")]
    Cbbo1S = 15,
    #[serde(rename = "cbbo-1m")]
    Cbbo1M = 16,
    Tcbbo = 17,
    #[serde(rename = "bbo-1s")]
    Bbo1S = 18,
    #[serde(rename = "bbo-1m")]
    Bbo1M = 19,
}

impl Schema {
    pub fn from_u32(v: u32) -> Option<Self> {
        use Schema::*;
        const ALL: [Schema; 20] = [
            Mbo, Mbp1, Mbp10, Tbbo, Trades, Ohlcv1S, Ohlcv1M, Ohlcv1H, Ohlcv1D, Definition,
            Statistics, Status, Imbalance, OhlcvEod, Cmbp1, Cbbo1S, Cbbo1M, Tcbbo, Bbo1S, Bbo1M,
        ];
        ALL.get(v as usize).copied()
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SType {
    InstrumentId = 0,
    RawSymbol = 1,
    Smart = 2,
    Continuous = 3,
    Parent = 4,
    NasdaqSymbol = 5,
    CmsSymbol = 6,
    Isin = 7,
    UsCode = 8,
    BbgCompId = 9,
    BbgCompTicker = 10,
    Figi = 11,
    FigiTicker = 12,
}

impl SType {
    pub fn from_u32(v: u32) -> Option<Self> {
        use SType::*;
        const ALL: [SType; 13] = [
            InstrumentId, RawSymbol, Smart, Continuous, Parent, NasdaqSymbol, CmsSymbol, Isin,
            UsCode, BbgCompId, BbgCompTicker, Figi, FigiTicker,
        ];
        ALL.get(v as usize).copied()
    }
}

/// How the gateway upgrades older record versions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePolicy {
    AsIs = 0,
    UpgradeToV2 = 1,
    #[default]
    UpgradeToV3 = 2,
}

impl UpgradePolicy {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(UpgradePolicy::AsIs),
            1 => Some(UpgradePolicy::UpgradeToV2),
            2 => Some(UpgradePolicy::UpgradeToV3),
            _ => None,
        }
    }
}

/// Datasets addressable by enumerated constant. Values start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dataset(u32);

const DATASET_CODES: [&str; 39] = [
    "GLBX.MDP3",
    "XNAS.ITCH",
    "XBOS.ITCH",
    "XPSX.ITCH",
    "BATS.PITCH",
    "BATY.PITCH",
    "EDGA.PITCH",
    "EDGX.PITCH",
    "XNYS.PILLAR",
    "XCIS.PILLAR",
    "XASE.PILLAR",
    "XCHI.PILLAR",
    "XCIS.BBO",
    "XCIS.TRADES",
    "MEMX.MEMOIR",
    "EPRL.DOM",
    "FINN.NLS",
    "FINY.TRADES",
    "OPRA.PILLAR",
    "DBEQ.BASIC",
    "ARCX.PILLAR",
    "IEXG.TOPS",
    "EQUS.PLUS",
    "XNYS.BBO",
    "XNYS.TRADES",
    "XNAS.QBBO",
    "XNAS.NLS",
    "IFEU.IMPACT",
    "NDEX.IMPACT",
    "EQUS.ALL",
    "XNAS.BASIC",
    "EQUS.SUMMARY",
    "XCIS.TRADESBBO",
    "XNYS.TRADESBBO",
    "EQUS.MINI",
    "IFUS.IMPACT",
    "IFLL.IMPACT",
    "XEUR.EOBI",
    "XEEE.EOBI",
];

impl Dataset {
    pub const GLBX_MDP3: Dataset = Dataset(1);
    pub const XNAS_ITCH: Dataset = Dataset(2);
    pub const OPRA_PILLAR: Dataset = Dataset(19);

    pub fn from_u32(v: u32) -> Option<Self> {
        if v >= 1 && (v as usize) <= DATASET_CODES.len() {
            Some(Dataset(v))
        } else {
            None
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        DATASET_CODES
            .iter()
            .position(|c| *c == code)
            .map(|i| Dataset(i as u32 + 1))
    }

    pub fn code(&self) -> &'static str {
        DATASET_CODES[self.0 as usize - 1]
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Record sink verdict
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepGoing {
    Continue = 0,
    Stop = 1,
}

impl KeepGoing {
    /// Anything other than the continue code stops the loop
    pub fn from_code(code: u32) -> Self {
        if code == KeepGoing::Continue as u32 {
            KeepGoing::Continue
        } else {
            KeepGoing::Stop
        }
    }
}

/// Exception policy verdict
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    Restart = 0,
    Stop = 1,
}

impl ExceptionAction {
    /// Anything other than the restart code stops the session
    pub fn from_code(code: u32) -> Self {
        if code == ExceptionAction::Restart as u32 {
            ExceptionAction::Restart
        } else {
            ExceptionAction::Stop
        }
    }
}
