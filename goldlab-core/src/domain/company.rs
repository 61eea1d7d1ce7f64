//! Quoting companies and their raw-field layouts.
//!
//! Each company publishes a flat object of `buy_*` / `sell_*` fields. The
//! tables below say which field pair becomes which `(instrument, location)`
//! record. Table order matters: it is the order records are emitted in and
//! the preference order for default-location resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::record::DEFAULT_LOCATION;

/// One raw field pair and the record identity it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub buy_field: &'static str,
    pub sell_field: &'static str,
    pub instrument: &'static str,
    pub location: &'static str,
}

const fn national(
    buy_field: &'static str,
    sell_field: &'static str,
    instrument: &'static str,
) -> FieldMapping {
    FieldMapping {
        buy_field,
        sell_field,
        instrument,
        location: DEFAULT_LOCATION,
    }
}

const fn gold_bar(
    buy_field: &'static str,
    sell_field: &'static str,
    location: &'static str,
) -> FieldMapping {
    FieldMapping {
        buy_field,
        sell_field,
        instrument: "Gold Bar",
        location,
    }
}

static SJC_FIELDS: [FieldMapping; 5] = [
    national("buy_1l", "sell_1l", "SJC 1L"),
    national("buy_nhan1c", "sell_nhan1c", "SJC Ring 1C"),
    national("buy_nutrang_9999", "sell_nutrang_9999", "SJC Jewelry 24K"),
    national("buy_nutrang_99", "sell_nutrang_99", "SJC Jewelry 99%"),
    national("buy_nutrang_75", "sell_nutrang_75", "SJC Jewelry 18K"),
];

static DOJI_FIELDS: [FieldMapping; 4] = [
    gold_bar("buy_hcm", "sell_hcm", "Ho Chi Minh City"),
    gold_bar("buy_hn", "sell_hn", "Hanoi"),
    gold_bar("buy_ct", "sell_ct", "Can Tho"),
    gold_bar("buy_dn", "sell_dn", "Da Nang"),
];

static PNJ_FIELDS: [FieldMapping; 5] = [
    national("buy_nhan_24k", "sell_nhan_24k", "PNJ 24K Ring"),
    national("buy_nt_24k", "sell_nt_24k", "PNJ 24K Jewelry"),
    national("buy_nt_18k", "sell_nt_18k", "PNJ 18K Jewelry"),
    national("buy_nt_14k", "sell_nt_14k", "PNJ 14K Jewelry"),
    national("buy_nt_10k", "sell_nt_10k", "PNJ 10K Jewelry"),
];

/// A company known to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Company {
    Sjc,
    Doji,
    Pnj,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown company '{0}' (expected one of: sjc, doji, pnj)")]
pub struct UnknownCompany(pub String);

impl Company {
    /// The fixed comparison set, in display order.
    pub const ALL: [Company; 3] = [Company::Sjc, Company::Doji, Company::Pnj];

    /// Upper-case code as stored in the `company` column.
    pub fn code(self) -> &'static str {
        match self {
            Company::Sjc => "SJC",
            Company::Doji => "DOJI",
            Company::Pnj => "PNJ",
        }
    }

    /// Lower-case slug used in provider URLs.
    pub fn slug(self) -> &'static str {
        match self {
            Company::Sjc => "sjc",
            Company::Doji => "doji",
            Company::Pnj => "pnj",
        }
    }

    pub fn field_map(self) -> &'static [FieldMapping] {
        match self {
            Company::Sjc => &SJC_FIELDS,
            Company::Doji => &DOJI_FIELDS,
            Company::Pnj => &PNJ_FIELDS,
        }
    }

    /// Lookup by stored company string (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        code.parse().ok()
    }

    /// Mapping entry for a stored `(instrument, location)` pair.
    pub fn mapping_for(self, instrument: &str, location: &str) -> Option<&'static FieldMapping> {
        self.field_map()
            .iter()
            .find(|m| m.instrument == instrument && m.location == location)
    }

    /// Position of `(instrument, location)` in the field table.
    pub fn table_position(self, instrument: &str, location: &str) -> Option<usize> {
        self.field_map()
            .iter()
            .position(|m| m.instrument == instrument && m.location == location)
    }

    /// Locations in table order, optionally restricted to one instrument.
    pub fn locations(self, instrument: Option<&str>) -> Vec<&'static str> {
        let mut seen: Vec<&'static str> = Vec::new();
        for m in self.field_map() {
            if instrument.is_some_and(|i| i != m.instrument) {
                continue;
            }
            if !seen.contains(&m.location) {
                seen.push(m.location);
            }
        }
        seen
    }
}

impl fmt::Display for Company {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Company {
    type Err = UnknownCompany;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sjc" => Ok(Company::Sjc),
            "doji" => Ok(Company::Doji),
            "pnj" => Ok(Company::Pnj),
            _ => Err(UnknownCompany(s.to_string())),
        }
    }
}
