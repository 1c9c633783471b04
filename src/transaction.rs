use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Upstream filtering keeps every amount strictly below this cap
pub const AMOUNT_CAP: f64 = 2500.0;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// Normalise a categorical cell the way the ingestion step does: trim, upper-case
fn normalise(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MerchantCategory {
    Dining,
    Electronics,
    Fuel,
    Groceries,
    Cars,
}

impl MerchantCategory {
    pub const ALL: [MerchantCategory; 5] = [
        MerchantCategory::Dining,
        MerchantCategory::Electronics,
        MerchantCategory::Fuel,
        MerchantCategory::Groceries,
        MerchantCategory::Cars,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MerchantCategory::Dining => "DINING",
            MerchantCategory::Electronics => "ELECTRONICS",
            MerchantCategory::Fuel => "FUEL",
            MerchantCategory::Groceries => "GROCERIES",
            MerchantCategory::Cars => "CARS",
        }
    }
}

impl FromStr for MerchantCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = normalise(s);
        MerchantCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .ok_or_else(|| format!("unknown merchant category '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Usa,
    Uk,
    India,
    Pakistan,
    Bangladesh,
}

impl Location {
    pub const ALL: [Location; 5] = [
        Location::Usa,
        Location::Uk,
        Location::India,
        Location::Pakistan,
        Location::Bangladesh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Usa => "USA",
            Location::Uk => "UK",
            Location::India => "INDIA",
            Location::Pakistan => "PAKISTAN",
            Location::Bangladesh => "BANGLADESH",
        }
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = normalise(s);
        Location::ALL
            .into_iter()
            .find(|l| l.as_str() == value)
            .ok_or_else(|| format!("unknown location '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Atm,
    Online,
    Pos,
}

impl TransactionType {
    pub const ALL: [TransactionType; 3] =
        [TransactionType::Atm, TransactionType::Online, TransactionType::Pos];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Atm => "ATM",
            TransactionType::Online => "ONLINE",
            TransactionType::Pos => "POS",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = normalise(s);
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| format!("unknown transaction type '{}'", s.trim()))
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(MerchantCategory, Location, TransactionType);

/// A validated transaction. Immutable once ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id: String,
    pub timestamp: NaiveDateTime,
    pub amount: f64,
    pub merchant_category: MerchantCategory,
    pub location: Location,
    pub transaction_type: TransactionType,
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| format!("unparsable timestamp '{}'", raw))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

pub fn validate_amount(amount: f64) -> Result<f64, String> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("invalid transaction amount {}", amount));
    }
    Ok(amount)
}
