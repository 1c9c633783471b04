// Synthetic transaction data for exercising the pipeline end to end.
use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::GeneratorConfig;
use crate::transaction::{Location, MerchantCategory, Transaction, TransactionType};

const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

// Exponential draw by inverse transform, rounded to cents
fn exponential_amount(rng: &mut ChaCha8Rng, scale: f64) -> f64 {
    let u: f64 = rng.gen();
    let amount = -scale * (1.0 - u).ln();
    (amount * 100.0).round() / 100.0
}

/// Produce transactions spread uniformly over the year before `end`.
/// Amounts at or above the cap are dropped, then rows that repeat every
/// column except the id are removed, keeping the first.
pub fn generate(config: &GeneratorConfig, end: NaiveDateTime) -> Vec<Transaction> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let start = end - Duration::seconds(SECONDS_PER_YEAR);

    let mut seen = HashSet::new();
    let mut transactions = Vec::with_capacity(config.rows);
    for i in 0..config.rows {
        let customer = rng.gen_range(0..=config.customers);
        let offset = rng.gen_range(0..=SECONDS_PER_YEAR);
        let amount = exponential_amount(&mut rng, config.amount_scale);
        let merchant_category = MerchantCategory::ALL[rng.gen_range(0..MerchantCategory::ALL.len())];
        let location = Location::ALL[rng.gen_range(0..Location::ALL.len())];
        let transaction_type = TransactionType::ALL[rng.gen_range(0..TransactionType::ALL.len())];

        if amount >= config.amount_cap {
            continue;
        }
        let tx = Transaction {
            transaction_id: format!("Transaction{:05}", i),
            customer_id: format!("Customer{:03}", customer),
            timestamp: start + Duration::seconds(offset),
            amount,
            merchant_category,
            location,
            transaction_type,
        };
        let key = (
            tx.customer_id.clone(),
            tx.timestamp,
            tx.amount.to_bits(),
            tx.merchant_category,
            tx.location,
            tx.transaction_type,
        );
        if seen.insert(key) {
            transactions.push(tx);
        }
    }
    transactions
}
