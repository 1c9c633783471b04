use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ensemble::Verdict;
use crate::error::{FraudError, Result};
use crate::features::{FeatureRow, N_FEATURES};
use crate::transaction::{format_timestamp, parse_timestamp, validate_amount, Transaction};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RawTransaction {
    #[serde(rename = "Transaction_id")]
    pub transaction_id: String,
    #[serde(rename = "Customer_id")]
    pub customer_id: String,
    #[serde(rename = "Transaction_date")]
    pub transaction_date: String,
    #[serde(rename = "Transaction_amount")]
    pub transaction_amount: f64,
    #[serde(rename = "Merchant_category")]
    pub merchant_category: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Transaction_type")]
    pub transaction_type: String,
}

impl RawTransaction {
    pub fn validate(self, row: usize) -> Result<Transaction> {
        let invalid = |reason: String| FraudError::invalid_row(row, reason);
        if self.customer_id.trim().is_empty() {
            return Err(invalid("missing customer id".to_string()));
        }
        Ok(Transaction {
            timestamp: parse_timestamp(&self.transaction_date).map_err(invalid)?,
            amount: validate_amount(self.transaction_amount).map_err(invalid)?,
            merchant_category: self.merchant_category.parse().map_err(invalid)?,
            location: self.location.parse().map_err(invalid)?,
            transaction_type: self.transaction_type.parse().map_err(invalid)?,
            transaction_id: self.transaction_id,
            customer_id: self.customer_id.trim().to_string(),
        })
    }
}

impl From<&Transaction> for RawTransaction {
    fn from(tx: &Transaction) -> Self {
        RawTransaction {
            transaction_id: tx.transaction_id.clone(),
            customer_id: tx.customer_id.clone(),
            transaction_date: format_timestamp(&tx.timestamp),
            transaction_amount: tx.amount,
            merchant_category: tx.merchant_category.to_string(),
            location: tx.location.to_string(),
            transaction_type: tx.transaction_type.to_string(),
        }
    }
}

/// A feature row plus the three prediction columns written after training
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScoredRow {
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
    #[serde(rename = "Forest_prediction")]
    pub forest_prediction: u8,
    #[serde(rename = "LOF_prediction")]
    pub lof_prediction: u8,
    #[serde(rename = "Both_prediction")]
    pub both_prediction: u8,
}

impl ScoredRow {
    pub fn new(row: &FeatureRow, verdict: Verdict) -> Self {
        ScoredRow {
            customer_id: row.customer_id.clone(),
            amount: row.amount,
            hour: row.hour,
            day: row.day,
            boundary: row.boundary,
            suspicious_car_rental: row.suspicious_car_rental,
            suspicious_fuel: row.suspicious_fuel,
            cumulative_type_percent: row.cumulative_type_percent,
            cumulative_unique_locations: row.cumulative_unique_locations,
            days_since_last: row.days_since_last,
            forest_prediction: verdict.forest_flag(),
            lof_prediction: verdict.lof_flag(),
            both_prediction: verdict.combined_flag(),
        }
    }

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

fn read_records<T>(file_path: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let file = File::open(file_path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let records = rdr.deserialize().collect::<std::result::Result<Vec<T>, csv::Error>>()?;
    Ok(records)
}

fn write_records<T: Serialize>(file_path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(file_path)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_transactions(file_path: &Path) -> Result<Vec<Transaction>> {
    let raw: Vec<RawTransaction> = read_records(file_path)?;
    if raw.is_empty() {
        return Err(FraudError::EmptyInput);
    }
    raw.into_iter()
        .enumerate()
        .map(|(i, record)| record.validate(i + 1))
        .collect()
}

pub fn write_transactions(file_path: &Path, transactions: &[Transaction]) -> Result<()> {
    let raw: Vec<RawTransaction> = transactions.iter().map(RawTransaction::from).collect();
    write_records(file_path, &raw)
}

pub fn read_features(file_path: &Path) -> Result<Vec<FeatureRow>> {
    let rows: Vec<FeatureRow> = read_records(file_path)?;
    if rows.is_empty() {
        return Err(FraudError::EmptyInput);
    }
    Ok(rows)
}

pub fn write_features(file_path: &Path, rows: &[FeatureRow]) -> Result<()> {
    write_records(file_path, rows)
}

pub fn read_scored(file_path: &Path) -> Result<Vec<ScoredRow>> {
    let rows: Vec<ScoredRow> = read_records(file_path)?;
    if rows.is_empty() {
        return Err(FraudError::EmptyInput);
    }
    Ok(rows)
}

pub fn write_scored(file_path: &Path, rows: &[ScoredRow]) -> Result<()> {
    write_records(file_path, rows)
}
