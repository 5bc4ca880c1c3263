//! Paired t-test result normalization.
//!
//! The comparison endpoint has shipped several spellings for the same
//! statistic over time. Each canonical field owns an ordered alias list; the
//! first alias present (and not null) wins, then the value is parsed
//! tolerantly. Unparsable values leave the field empty instead of failing.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const P_VALUE_ALIASES: &[&str] = &[
    "pValue",
    "pvalue",
    "pVal",
    "p_value",
    "p_two_tailed",
    "pTwoTailed",
    "p_twotailed",
    "p_two_tail",
    "pTwoTail",
    "p",
    "pval",
];
pub const T_STATISTIC_ALIASES: &[&str] = &[
    "tStatistic",
    "t_statistic",
    "tStat",
    "t_value",
    "tValue",
    "statistic",
    "t",
];
pub const DEGREES_OF_FREEDOM_ALIASES: &[&str] = &[
    "degreesOfFreedom",
    "degrees_of_freedom",
    "degreesFreedom",
    "degFreedom",
    "df",
    "dof",
    "d_f",
];
pub const MEAN_DIFFERENCE_ALIASES: &[&str] =
    &["meanDifference", "mean_difference", "meanDiff", "diffMean"];
pub const STANDARD_ERROR_ALIASES: &[&str] = &["standardError", "stdError", "standard_error", "se"];
pub const CI_LOWER_ALIASES: &[&str] = &["ciLower", "ci_lower", "confidenceIntervalLower", "ciLow"];
pub const CI_UPPER_ALIASES: &[&str] =
    &["ciUpper", "ci_upper", "confidenceIntervalUpper", "ciHigh"];
pub const COHENS_D_ALIASES: &[&str] = &["cohensD", "cohenD", "cohen_d", "effectSizeValue"];
pub const EFFECT_SIZE_ALIASES: &[&str] = &["effectSize"];
pub const SIGNIFICANT_ALIASES: &[&str] = &["significant", "isSignificant", "sig"];
pub const BETTER_ALGORITHM_ALIASES: &[&str] = &["betterAlgorithm", "winnerAlgorithm", "better_algo"];
pub const IMPROVEMENT_ALIASES: &[&str] = &[
    "improvementPercentage",
    "improvement_percent",
    "improvementPercent",
];

/// Containers that may hold the per-metric tests, in lookup order.
pub const METRIC_CONTAINER_ALIASES: &[&str] =
    &["metricTests", "metrics", "tests", "perMetric", "per_metric"];

pub const OVERALL_WINNER_ALIASES: &[&str] = &["overallWinner", "winner"];
pub const SIGNIFICANT_COUNT_ALIASES: &[&str] = &["significantDifferences", "num_significant"];
pub const SAMPLE_SIZE_ALIASES: &[&str] = &["sampleSize", "n", "sample_size"];
pub const ALPHA_ALIASES: &[&str] = &["alpha", "significance", "p_threshold"];

/// Every per-metric field with its alias list, for enumeration in tests and docs.
pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("pValue", P_VALUE_ALIASES),
    ("tStatistic", T_STATISTIC_ALIASES),
    ("degreesOfFreedom", DEGREES_OF_FREEDOM_ALIASES),
    ("meanDifference", MEAN_DIFFERENCE_ALIASES),
    ("standardError", STANDARD_ERROR_ALIASES),
    ("ciLower", CI_LOWER_ALIASES),
    ("ciUpper", CI_UPPER_ALIASES),
    ("cohensD", COHENS_D_ALIASES),
    ("improvementPercentage", IMPROVEMENT_ALIASES),
];

pub const NO_CLEAR_WINNER: &str = "No clear winner for the both algorithms";

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?(?:[eE][+\-]?\d+)?").expect("numeric token regex")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_statistic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrees_of_freedom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_difference: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohens_d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<String>,
    #[serde(default)]
    pub significant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub better_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedStatisticalResult {
    pub metric_tests: BTreeMap<String, MetricTest>,
    pub overall_winner: String,
    pub significant_differences: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

/// Numbers pass through; strings yield their leading numeric token.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => LEADING_NUMBER
            .find(s.trim())
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|f| f.is_finite()),
        _ => None,
    }
}

/// First alias present with a non-null value.
pub fn resolve<'a>(object: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| object.get(*alias))
        .find(|v| !v.is_null())
}

fn resolve_number(object: &Value, aliases: &[&str]) -> Option<f64> {
    resolve(object, aliases).and_then(parse_number)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cohen's d magnitude thresholds.
pub fn effect_size_category(cohens_d: f64) -> Option<&'static str> {
    if !cohens_d.is_finite() {
        return None;
    }
    let d = cohens_d.abs();
    Some(if d < 0.2 {
        "negligible"
    } else if d < 0.5 {
        "small"
    } else if d < 0.8 {
        "medium"
    } else {
        "large"
    })
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for (i, ch) in key.chars().enumerate() {
        if ch == '_' || ch == '-' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if i == 0 || out.is_empty() {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Canonical metric name for a backend metric key.
pub fn normalize_metric_key(key: &str) -> String {
    let mapped = match key {
        "avgResponseTime" | "averageResponseTime" | "response_time" => "responseTime",
        "energy" | "energy_consumption" => "energyConsumption",
        "utilization" | "resource_utilization" => "resourceUtilization",
        "load_balance" => "loadBalance",
        "completionTime" | "completion_time" => "makespan",
        other => return snake_to_camel(other),
    };
    mapped.to_string()
}

pub fn normalize_metric_test(test: &Value) -> MetricTest {
    let cohens_d = resolve_number(test, COHENS_D_ALIASES);
    let effect_size = resolve(test, EFFECT_SIZE_ALIASES)
        .and_then(non_empty_string)
        .or_else(|| cohens_d.and_then(effect_size_category).map(str::to_string));
    MetricTest {
        p_value: resolve_number(test, P_VALUE_ALIASES),
        t_statistic: resolve_number(test, T_STATISTIC_ALIASES),
        degrees_of_freedom: resolve_number(test, DEGREES_OF_FREEDOM_ALIASES),
        mean_difference: resolve_number(test, MEAN_DIFFERENCE_ALIASES),
        standard_error: resolve_number(test, STANDARD_ERROR_ALIASES),
        ci_lower: resolve_number(test, CI_LOWER_ALIASES),
        ci_upper: resolve_number(test, CI_UPPER_ALIASES),
        cohens_d,
        effect_size,
        significant: resolve(test, SIGNIFICANT_ALIASES)
            .map(truthy)
            .unwrap_or(false),
        better_algorithm: resolve(test, BETTER_ALGORITHM_ALIASES).and_then(non_empty_string),
        improvement_percentage: resolve_number(test, IMPROVEMENT_ALIASES),
    }
}

/// Normalize a raw comparison payload. Null or absent input yields None.
pub fn normalize(raw: Option<&Value>) -> Option<NormalizedStatisticalResult> {
    let raw = raw.filter(|v| !v.is_null())?;

    let container = METRIC_CONTAINER_ALIASES
        .iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| truthy(v));

    let entries: Vec<(String, &Value)> = match container {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = resolve(item, &["metric", "name"]).and_then(Value::as_str)?;
                Some((normalize_metric_key(name), item))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (normalize_metric_key(k), v))
            .collect(),
        _ => Vec::new(),
    };

    let mut metric_tests = BTreeMap::new();
    for (metric, test) in entries {
        if metric.is_empty() {
            continue;
        }
        metric_tests.insert(metric, normalize_metric_test(test));
    }

    Some(NormalizedStatisticalResult {
        metric_tests,
        overall_winner: resolve(raw, OVERALL_WINNER_ALIASES)
            .and_then(non_empty_string)
            .unwrap_or_else(|| NO_CLEAR_WINNER.to_string()),
        significant_differences: resolve_number(raw, SIGNIFICANT_COUNT_ALIASES)
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32)
            .unwrap_or(0),
        sample_size: resolve_number(raw, SAMPLE_SIZE_ALIASES)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u64),
        alpha: resolve_number(raw, ALPHA_ALIASES),
    })
}
