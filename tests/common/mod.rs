//! Common test utilities
//!
//! Synthetic telecom churn data and helpers shared by the integration tests.

#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const FEATURES: [&str; 10] = [
    "AccountWeeks",
    "ContractRenewal",
    "DataPlan",
    "DataUsage",
    "CustServCalls",
    "DayMins",
    "DayCalls",
    "MonthlyCharge",
    "OverageFee",
    "RoamMins",
];

/// Deterministic churn-like CSV with a `Churn` label column.
///
/// Churn probability rises with day minutes and service calls and falls with
/// contract renewal, so a linear model separates the classes reasonably well.
pub fn synthetic_csv(rows: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = String::new();
    out.push_str(&FEATURES.join(","));
    out.push_str(",Churn\n");

    for _ in 0..rows {
        let account_weeks = rng.random_range(1..240) as f64;
        let contract_renewal = if rng.random_bool(0.9) { 1.0 } else { 0.0 };
        let data_plan = if rng.random_bool(0.3) { 1.0 } else { 0.0 };
        let data_usage = if data_plan == 1.0 {
            (rng.random::<f64>() * 5.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        let cust_serv_calls = rng.random_range(0..8) as f64;
        let day_mins = (rng.random::<f64>() * 350.0 * 10.0).round() / 10.0;
        let day_calls = rng.random_range(40..160) as f64;
        let monthly_charge = (20.0 + day_mins * 0.17 + data_usage * 10.0).round();
        let overage_fee = (rng.random::<f64>() * 18.0 * 100.0).round() / 100.0;
        let roam_mins = (rng.random::<f64>() * 20.0 * 10.0).round() / 10.0;

        let z = -4.0 + 0.015 * day_mins + 0.55 * cust_serv_calls - 1.8 * contract_renewal
            + 0.1 * overage_fee
            - 0.6 * data_plan;
        let p = 1.0 / (1.0 + (-z).exp());
        let churn = if rng.random::<f64>() < p { 1 } else { 0 };

        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            account_weeks,
            contract_renewal,
            data_plan,
            data_usage,
            cust_serv_calls,
            day_mins,
            day_calls,
            monthly_charge,
            overage_fee,
            roam_mins,
            churn
        );
    }
    out
}

/// Write [`synthetic_csv`] into `dir` and return its path
pub fn write_dataset(dir: &Path, rows: usize, seed: u64) -> PathBuf {
    let path = dir.join("telecom_churn.csv");
    std::fs::write(&path, synthetic_csv(rows, seed)).expect("write dataset");
    path
}

/// A request body with every feature present
pub fn sample_request() -> serde_json::Value {
    serde_json::json!({
        "AccountWeeks": 128,
        "ContractRenewal": 1,
        "DataPlan": 1,
        "DataUsage": 2.7,
        "CustServCalls": 1,
        "DayMins": 265.1,
        "DayCalls": 110,
        "MonthlyCharge": 89,
        "OverageFee": 9.87,
        "RoamMins": 10.0
    })
}

/// Parse Prometheus exposition format into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}
