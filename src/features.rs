//! Per-customer feature derivation.
//!
//! Transactions are grouped into customer histories, each history is walked in
//! timestamp order (ties keep ingestion order), and every transaction yields one
//! `FeatureRow` built only from that customer's past and current activity.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{FraudError, Result};
use crate::transaction::{Location, MerchantCategory, Transaction, TransactionType};

pub const N_FEATURES: usize = 8;

/// Model input columns, in the fixed order used by the scaler and both detectors.
pub const FEATURE_COLUMNS: [&str; N_FEATURES] = [
    "Hour",
    "Day",
    "Boundary",
    "Suspicious_car_rental",
    "Suspicious_fuel",
    "Cumulative_type_percent",
    "Cumulative_Unique_Locations",
    "Days_since_last",
];

const LOW_AMOUNT_LIMIT: f64 = 500.0;
const HIGH_AMOUNT_LIMIT: f64 = 1000.0;
const CAR_RENTAL_LIMIT: f64 = 500.0;
const FUEL_LIMIT: f64 = 300.0;

/// One derived row. `customer_id` and `amount` travel along for grouping and
/// reporting but never enter the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "Customer_id")]
    pub customer_id: String,
    #[serde(rename = "Transaction_amount")]
    pub amount: f64,
    #[serde(rename = "Hour")]
    pub hour: u32,
    #[serde(rename = "Day")]
    pub day: u32,
    #[serde(rename = "Boundary")]
    pub boundary: u8,
    #[serde(rename = "Suspicious_car_rental")]
    pub suspicious_car_rental: u8,
    #[serde(rename = "Suspicious_fuel")]
    pub suspicious_fuel: u8,
    #[serde(rename = "Cumulative_type_percent")]
    pub cumulative_type_percent: f64,
    #[serde(rename = "Cumulative_Unique_Locations")]
    pub cumulative_unique_locations: u32,
    #[serde(rename = "Days_since_last")]
    pub days_since_last: i64,
}

impl FeatureRow {
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.hour as f64,
            self.day as f64,
            self.boundary as f64,
            self.suspicious_car_rental as f64,
            self.suspicious_fuel as f64,
            self.cumulative_type_percent,
            self.cumulative_unique_locations as f64,
            self.days_since_last as f64,
        ]
    }
}

/// The eight model inputs as plain numbers, named and ordered like `FEATURE_COLUMNS`.
/// This is the payload accepted by the prediction endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "Hour")]
    pub hour: f64,
    #[serde(rename = "Day")]
    pub day: f64,
    #[serde(rename = "Boundary")]
    pub boundary: f64,
    #[serde(rename = "Suspicious_car_rental")]
    pub suspicious_car_rental: f64,
    #[serde(rename = "Suspicious_fuel")]
    pub suspicious_fuel: f64,
    #[serde(rename = "Cumulative_type_percent")]
    pub cumulative_type_percent: f64,
    #[serde(rename = "Cumulative_Unique_Locations")]
    pub cumulative_unique_locations: f64,
    #[serde(rename = "Days_since_last")]
    pub days_since_last: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.hour,
            self.day,
            self.boundary,
            self.suspicious_car_rental,
            self.suspicious_fuel,
            self.cumulative_type_percent,
            self.cumulative_unique_locations,
            self.days_since_last,
        ]
    }
}

impl From<&FeatureRow> for FeatureVector {
    fn from(row: &FeatureRow) -> Self {
        let v = row.to_array();
        FeatureVector {
            hour: v[0],
            day: v[1],
            boundary: v[2],
            suspicious_car_rental: v[3],
            suspicious_fuel: v[4],
            cumulative_type_percent: v[5],
            cumulative_unique_locations: v[6],
            days_since_last: v[7],
        }
    }
}

/// All transactions of one customer, in timestamp order.
#[derive(Debug)]
pub struct CustomerHistory<'a> {
    pub customer_id: &'a str,
    pub transactions: Vec<&'a Transaction>,
}

pub fn boundary(amount: f64) -> u8 {
    if amount <= LOW_AMOUNT_LIMIT {
        0
    } else if amount <= HIGH_AMOUNT_LIMIT {
        1
    } else {
        2
    }
}

// Weekday index shifted by two, with 8 wrapped to 1: Monday=2 .. Saturday=7, Sunday=1
pub fn day_code(weekday: Weekday) -> u32 {
    match weekday.num_days_from_monday() + 2 {
        8 => 1,
        day => day,
    }
}

// Round to two decimals, ties to even
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Group transactions by customer and order each history by timestamp.
/// Histories come out sorted by customer id; equal timestamps keep input order.
pub fn group_histories(transactions: &[Transaction]) -> Vec<CustomerHistory<'_>> {
    let mut order: Vec<&Transaction> = transactions.iter().collect();
    order.sort_by(|a, b| {
        a.customer_id
            .cmp(&b.customer_id)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    let mut histories: Vec<CustomerHistory<'_>> = Vec::new();
    for tx in order {
        match histories.last_mut() {
            Some(history) if history.customer_id == tx.customer_id => history.transactions.push(tx),
            _ => histories.push(CustomerHistory {
                customer_id: &tx.customer_id,
                transactions: vec![tx],
            }),
        }
    }
    histories
}

// Running state for one customer while walking its history
struct HistoryState {
    seen: usize,
    type_counts: [usize; 3],
    locations: HashSet<Location>,
    last_timestamp: Option<NaiveDateTime>,
}

impl HistoryState {
    fn new() -> Self {
        HistoryState {
            seen: 0,
            type_counts: [0; 3],
            locations: HashSet::new(),
            last_timestamp: None,
        }
    }

    fn advance(&mut self, tx: &Transaction) -> FeatureRow {
        self.seen += 1;
        let type_slot = match tx.transaction_type {
            TransactionType::Atm => 0,
            TransactionType::Online => 1,
            TransactionType::Pos => 2,
        };
        self.type_counts[type_slot] += 1;
        self.locations.insert(tx.location);

        let days_since_last = match self.last_timestamp {
            Some(previous) => (tx.timestamp - previous).num_days(),
            None => 0,
        };
        self.last_timestamp = Some(tx.timestamp);

        FeatureRow {
            customer_id: tx.customer_id.clone(),
            amount: tx.amount,
            hour: tx.timestamp.hour(),
            day: day_code(tx.timestamp.weekday()),
            boundary: boundary(tx.amount),
            suspicious_car_rental: u8::from(
                tx.merchant_category == MerchantCategory::Cars && tx.amount < CAR_RENTAL_LIMIT,
            ),
            suspicious_fuel: u8::from(
                tx.merchant_category == MerchantCategory::Fuel && tx.amount > FUEL_LIMIT,
            ),
            cumulative_type_percent: round2(self.type_counts[type_slot] as f64 / self.seen as f64),
            cumulative_unique_locations: self.locations.len() as u32,
            days_since_last,
        }
    }
}

/// Derive one row per transaction of a single customer's history.
pub fn derive_history(history: &CustomerHistory<'_>) -> Vec<FeatureRow> {
    let mut state = HistoryState::new();
    history
        .transactions
        .iter()
        .map(|tx| state.advance(tx))
        .collect()
}

/// Derive the full feature table, ordered by customer then time.
pub fn derive_features(transactions: &[Transaction]) -> Result<Vec<FeatureRow>> {
    if transactions.is_empty() {
        return Err(FraudError::EmptyInput);
    }
    Ok(group_histories(transactions)
        .iter()
        .flat_map(derive_history)
        .collect())
}

/// Stack the model columns of a feature table into an `n x 8` matrix.
pub fn feature_matrix(rows: &[[f64; N_FEATURES]]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), N_FEATURES), |(i, j)| rows[i][j])
}
