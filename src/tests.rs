use crate::bundle::ScorerBundle;
use crate::config::{GeneratorConfig, TrainingConfig};
use crate::csv_io;
use crate::detectors::quantile;
use crate::ensemble::{EnsembleScorer, Verdict};
use crate::error::FraudError;
use crate::features::{derive_features, feature_matrix, FeatureRow, FeatureVector};
use crate::generator;
use crate::pipeline;
use crate::report::RecordingObserver;
use crate::scaler::Scaler;
use crate::server::{create_app, AppState};
use crate::transaction::{parse_timestamp, Location, MerchantCategory, Transaction, TransactionType};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{NaiveDate, NaiveDateTime};
    use tower::ServiceExt;

    fn tx(
        id: &str,
        customer: &str,
        timestamp: &str,
        amount: f64,
        category: MerchantCategory,
        location: Location,
        kind: TransactionType,
    ) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            customer_id: customer.to_string(),
            timestamp: parse_timestamp(timestamp).unwrap(),
            amount,
            merchant_category: category,
            location,
            transaction_type: kind,
        }
    }

    fn generation_end() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    fn small_generator(rows: usize, customers: u32) -> GeneratorConfig {
        GeneratorConfig {
            rows,
            customers,
            ..GeneratorConfig::default()
        }
    }

    fn generated_features() -> Vec<FeatureRow> {
        let transactions = generator::generate(&small_generator(600, 30), generation_end());
        derive_features(&transactions).unwrap()
    }

    fn trained_bundle(rows: &[FeatureRow], training: &TrainingConfig) -> ScorerBundle {
        let mut observer = RecordingObserver::default();
        pipeline::train(rows, training, &mut observer).unwrap().bundle
    }

    #[test]
    fn test_single_large_fuel_purchase() {
        let transactions = vec![tx(
            "T1",
            "C1",
            "2024-03-04 02:15:00",
            5000.0,
            MerchantCategory::Fuel,
            Location::Usa,
            TransactionType::Pos,
        )];
        let rows = derive_features(&transactions).unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.hour, 2);
        assert_eq!(row.day, 2, "Monday should map to day code 2");
        assert_eq!(row.boundary, 2);
        assert_eq!(row.suspicious_fuel, 1);
        assert_eq!(row.suspicious_car_rental, 0);
        assert_eq!(row.days_since_last, 0);
        assert_eq!(row.cumulative_type_percent, 1.0);
        assert_eq!(row.cumulative_unique_locations, 1);
    }

    #[test]
    fn test_customer_history_accumulates_in_time_order() {
        // Deliberately shuffled and interleaved with another customer
        let transactions = vec![
            tx("T4", "A", "2024-01-10 12:00:00", 80.0, MerchantCategory::Dining, Location::India, TransactionType::Pos),
            tx("T1", "A", "2024-01-01 10:00:00", 100.0, MerchantCategory::Groceries, Location::Usa, TransactionType::Atm),
            tx("B1", "B", "2024-01-02 08:00:00", 60.0, MerchantCategory::Dining, Location::Uk, TransactionType::Online),
            tx("T3", "A", "2024-01-03 12:00:00", 40.0, MerchantCategory::Groceries, Location::Usa, TransactionType::Atm),
            tx("T2", "A", "2024-01-03 09:00:00", 700.0, MerchantCategory::Electronics, Location::Uk, TransactionType::Online),
        ];
        let rows = derive_features(&transactions).unwrap();
        assert_eq!(rows.len(), 5);

        let a: Vec<&FeatureRow> = rows.iter().filter(|r| r.customer_id == "A").collect();
        let amounts: Vec<f64> = a.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![100.0, 700.0, 40.0, 80.0]);

        let days: Vec<i64> = a.iter().map(|r| r.days_since_last).collect();
        assert_eq!(days, vec![0, 1, 0, 7], "Partial days should truncate");

        let locations: Vec<u32> = a.iter().map(|r| r.cumulative_unique_locations).collect();
        assert_eq!(locations, vec![1, 2, 2, 3]);

        let type_percent: Vec<f64> = a.iter().map(|r| r.cumulative_type_percent).collect();
        assert_eq!(type_percent, vec![1.0, 0.5, 0.67, 0.25]);

        let boundaries: Vec<u8> = a.iter().map(|r| r.boundary).collect();
        assert_eq!(boundaries, vec![0, 1, 0, 0]);

        let b: Vec<&FeatureRow> = rows.iter().filter(|r| r.customer_id == "B").collect();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].days_since_last, 0);
        assert_eq!(b[0].cumulative_unique_locations, 1);
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let transactions = vec![
            tx("T1", "C1", "2024-05-01 12:00:00", 11.0, MerchantCategory::Dining, Location::Usa, TransactionType::Online),
            tx("T2", "C1", "2024-05-01 12:00:00", 22.0, MerchantCategory::Dining, Location::Usa, TransactionType::Atm),
        ];
        let rows = derive_features(&transactions).unwrap();
        assert_eq!(rows[0].amount, 11.0);
        assert_eq!(rows[1].amount, 22.0);
        assert_eq!(rows[1].cumulative_type_percent, 0.5);
        assert_eq!(rows[1].days_since_last, 0);
    }

    #[test]
    fn test_suspicious_flag_limits() {
        let transactions = vec![
            tx("T1", "C1", "2024-01-01 00:00:00", 499.99, MerchantCategory::Cars, Location::Uk, TransactionType::Pos),
            tx("T2", "C2", "2024-01-01 00:00:00", 500.0, MerchantCategory::Cars, Location::Uk, TransactionType::Pos),
            tx("T3", "C3", "2024-01-01 00:00:00", 300.0, MerchantCategory::Fuel, Location::Uk, TransactionType::Pos),
            tx("T4", "C4", "2024-01-01 00:00:00", 300.01, MerchantCategory::Fuel, Location::Uk, TransactionType::Pos),
        ];
        let rows = derive_features(&transactions).unwrap();
        let car: Vec<u8> = rows.iter().map(|r| r.suspicious_car_rental).collect();
        let fuel: Vec<u8> = rows.iter().map(|r| r.suspicious_fuel).collect();
        assert_eq!(car, vec![1, 0, 0, 0]);
        assert_eq!(fuel, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_empty_table_is_rejected() {
        assert!(matches!(derive_features(&[]), Err(FraudError::EmptyInput)));
    }

    #[test]
    fn test_thresholds_are_training_quantiles() {
        let rows = generated_features();
        let arrays: Vec<_> = rows.iter().map(FeatureRow::to_array).collect();
        let (_, scaled) = Scaler::fit_transform(feature_matrix(&arrays).view()).unwrap();

        let training = TrainingConfig::default();
        let outcome = EnsembleScorer::from(&training).fit(scaled.view()).unwrap();
        assert_eq!(
            outcome.model.threshold_iso(),
            quantile(&outcome.scores.forest, training.contamination)
        );
        assert_eq!(
            outcome.model.threshold_lof(),
            quantile(&outcome.scores.lof, training.contamination)
        );

        let n = rows.len();
        let limit = (training.contamination * (n - 1) as f64).floor() as usize + 1;
        let forest_flags = outcome.verdicts.iter().filter(|v| v.forest_flag() == 1).count();
        let lof_flags = outcome.verdicts.iter().filter(|v| v.lof_flag() == 1).count();
        assert!(forest_flags <= limit, "{} forest flags over limit {}", forest_flags, limit);
        assert!(lof_flags <= limit, "{} lof flags over limit {}", lof_flags, limit);

        for (verdict, (&iso, &lof)) in outcome
            .verdicts
            .iter()
            .zip(outcome.scores.forest.iter().zip(&outcome.scores.lof))
        {
            assert_eq!(*verdict, Verdict::from_flags(iso < outcome.model.threshold_iso(), lof < outcome.model.threshold_lof()));
        }
    }

    #[test]
    fn test_training_is_reproducible_with_fixed_seed() {
        let rows = generated_features();
        let training = TrainingConfig::default();
        let first = trained_bundle(&rows, &training);
        let second = trained_bundle(&rows, &training);
        assert_eq!(first, second);

        let reseeded = TrainingConfig {
            seed: 7,
            ..TrainingConfig::default()
        };
        let third = trained_bundle(&rows, &reseeded);
        assert_ne!(first.ensemble().forest(), third.ensemble().forest());
    }

    #[test]
    fn test_scored_rows_combine_with_or() {
        let rows = generated_features();
        let mut observer = RecordingObserver::default();
        let trained = pipeline::train(&rows, &TrainingConfig::default(), &mut observer).unwrap();

        assert_eq!(trained.scored.len(), rows.len());
        for row in &trained.scored {
            assert_eq!(row.both_prediction, row.forest_prediction | row.lof_prediction);
        }
        let combined = trained.scored.iter().filter(|r| r.both_prediction == 1).count();
        assert_eq!(combined, trained.counts.combined);
    }

    #[test]
    fn test_bundle_round_trip_predicts_identically() {
        let rows = generated_features();
        let bundle = trained_bundle(&rows, &TrainingConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("ensemble.bin");
        bundle.save(&path).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("models").join("ensemble.bin.tmp").exists());

        let loaded = ScorerBundle::load(&path).unwrap();
        assert_eq!(loaded, bundle);

        let arrays: Vec<_> = rows.iter().map(FeatureRow::to_array).collect();
        let matrix = feature_matrix(&arrays);
        assert_eq!(loaded.predict(matrix.view()).unwrap(), bundle.predict(matrix.view()).unwrap());

        let scaled = bundle.scaler().transform(matrix.view()).unwrap();
        let before = bundle.ensemble().score(scaled.view()).unwrap();
        let after = loaded.ensemble().score(scaled.view()).unwrap();
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&before.forest), bits(&after.forest));
        assert_eq!(bits(&before.lof), bits(&after.lof));
    }

    #[test]
    fn test_training_rows_predict_like_training_verdicts() {
        let rows = generated_features();
        let mut observer = RecordingObserver::default();
        let trained = pipeline::train(&rows, &TrainingConfig::default(), &mut observer).unwrap();

        let sample = &rows[0];
        let verdict = trained.bundle.predict_one(&FeatureVector::from(sample)).unwrap();
        assert!(verdict.combined_flag() <= 1);
        // The forest does not depend on novelty handling, so it must agree with training
        assert_eq!(verdict.forest_flag(), trained.scored[0].forest_prediction);
    }

    #[test]
    fn test_pipeline_reports_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let transactions_path = dir.path().join("cleaned_transactions.csv");
        let features_path = dir.path().join("transactions_enhanced.csv");
        let bundle_path = dir.path().join("models/ensemble.bin");
        let mut observer = RecordingObserver::default();

        let generated = pipeline::generate_data(
            &small_generator(600, 30),
            generation_end(),
            &transactions_path,
            &mut observer,
        )
        .unwrap();
        let features = pipeline::preprocess(&transactions_path, &features_path, &mut observer).unwrap();
        assert_eq!(features.len(), generated.len());

        let trained = pipeline::train_and_save(
            &features_path,
            &bundle_path,
            &TrainingConfig::default(),
            &mut observer,
        )
        .unwrap();

        let n = generated.len();
        assert_eq!(observer.events[0], format!("generated {}", n));
        assert_eq!(observer.events[1], format!("loaded {}", n));
        assert!(observer.events[2].starts_with(&format!("features {} ", n)));
        assert_eq!(observer.events[3], format!("training {}", n));
        assert_eq!(observer.events[4], format!("fitted {}", trained.counts.combined));
        assert_eq!(observer.events[5], "saved");
        assert_eq!(observer.events.len(), 6);

        assert!(bundle_path.exists());
        let scored = csv_io::read_scored(&features_path).unwrap();
        assert_eq!(scored, trained.scored);
    }

    #[test]
    fn test_too_few_rows_abort_training_without_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let transactions_path = dir.path().join("cleaned_transactions.csv");
        let features_path = dir.path().join("transactions_enhanced.csv");
        let bundle_path = dir.path().join("ensemble.bin");
        let mut observer = RecordingObserver::default();

        pipeline::generate_data(&small_generator(40, 5), generation_end(), &transactions_path, &mut observer)
            .unwrap();
        pipeline::preprocess(&transactions_path, &features_path, &mut observer).unwrap();
        let result = pipeline::train_and_save(
            &features_path,
            &bundle_path,
            &TrainingConfig::default(),
            &mut observer,
        );

        assert!(matches!(
            result,
            Err(FraudError::InsufficientRows { required: 65, .. }) | Err(FraudError::ZeroVariance { .. })
        ));
        assert_eq!(observer.events.last().map(String::as_str), Some("failed train"));
        assert!(!observer.events.iter().any(|e| e == "saved"));
        assert!(!bundle_path.exists());
    }

    #[test]
    fn test_unknown_category_is_an_invalid_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Transaction_id,Customer_id,Transaction_date,Transaction_amount,Merchant_category,Location,Transaction_type\n\
             Transaction00001,Customer001,2024-06-01 10:00:00,12.5,dining,usa,online\n\
             Transaction00002,Customer001,2024-06-02 10:00:00,40.0,TOYS,USA,POS"
        )
        .unwrap();

        match csv_io::read_transactions(file.path()) {
            Err(FraudError::InvalidRow { row, reason }) => {
                assert_eq!(row, 2);
                assert!(reason.contains("TOYS"), "reason was {}", reason);
            }
            other => panic!("expected an invalid row, got {:?}", other),
        }
    }

    #[test]
    fn test_lowercase_categories_are_normalised() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Transaction_id,Customer_id,Transaction_date,Transaction_amount,Merchant_category,Location,Transaction_type\n\
             Transaction00001, Customer001 ,2024-06-01 10:00:00,12.5, fuel ,pakistan,atm"
        )
        .unwrap();

        let transactions = csv_io::read_transactions(file.path()).unwrap();
        assert_eq!(transactions[0].customer_id, "Customer001");
        assert_eq!(transactions[0].merchant_category, MerchantCategory::Fuel);
        assert_eq!(transactions[0].location, Location::Pakistan);
        assert_eq!(transactions[0].transaction_type, TransactionType::Atm);
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn predict_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_home_reports_running() {
        let rows = generated_features();
        let state = Arc::new(AppState::new(
            trained_bundle(&rows, &TrainingConfig::default()),
            "unused.bin".into(),
        ));

        let response = create_app(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Fraud Detection API is running");
    }

    #[tokio::test]
    async fn test_predict_matches_bundle() {
        let rows = generated_features();
        let bundle = trained_bundle(&rows, &TrainingConfig::default());
        let vector = FeatureVector::from(&rows[3]);
        let expected = bundle.predict_one(&vector).unwrap().combined_flag();
        let state = Arc::new(AppState::new(bundle, "unused.bin".into()));

        let response = create_app(state)
            .oneshot(predict_request(serde_json::to_string(&vector).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["prediction"], expected);
    }

    #[tokio::test]
    async fn test_predict_rejects_missing_field() {
        let rows = generated_features();
        let state = Arc::new(AppState::new(
            trained_bundle(&rows, &TrainingConfig::default()),
            "unused.bin".into(),
        ));

        let body = r#"{"Hour": 3, "Day": 2, "Boundary": 0, "Suspicious_car_rental": 0,
            "Suspicious_fuel": 0, "Cumulative_type_percent": 0.5, "Cumulative_Unique_Locations": 2}"#;
        let response = create_app(state)
            .oneshot(predict_request(body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["detail"].as_str().unwrap().contains("Days_since_last"));
    }

    #[tokio::test]
    async fn test_reload_swaps_bundle() {
        let rows = generated_features();
        let active = trained_bundle(&rows, &TrainingConfig::default());
        let replacement = trained_bundle(
            &rows,
            &TrainingConfig {
                contamination: 0.1,
                ..TrainingConfig::default()
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.bin");
        replacement.save(&path).unwrap();

        let state = Arc::new(AppState::new(active.clone(), path));
        let held = state.current();

        let response = create_app(Arc::clone(&state))
            .oneshot(Request::builder().method("POST").uri("/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*state.current(), replacement);
        assert_eq!(*held, active, "A reference taken before reload keeps the old bundle");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_active_bundle() {
        let rows = generated_features();
        let active = trained_bundle(&rows, &TrainingConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(active.clone(), dir.path().join("missing.bin")));

        let response = create_app(Arc::clone(&state))
            .oneshot(Request::builder().method("POST").uri("/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*state.current(), active);
    }
}
