//! Physical names derived from catalog ids, representations and periods

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Prefix of every dataset name
pub const DATASET_PREFIX: &str = "dataset_";

/// Group name of a catalog: leading `/` stripped, remaining `/` become `_`
///
/// `physical_id(physical_id(x)) == physical_id(x)` for every `x`.
pub fn physical_id(catalog_id: &str) -> String {
    catalog_id
        .strip_prefix('/')
        .unwrap_or(catalog_id)
        .replace('/', "_")
}

/// Dataset name of a representation, e.g. `dataset_1_s(window=5,x=y)`
///
/// Parameters are emitted in key order; an absent or empty map adds no
/// suffix.
pub fn dataset_name(representation_id: &str, parameters: Option<&BTreeMap<String, String>>) -> String {
    let mut name = format!("{DATASET_PREFIX}{representation_id}");
    if let Some(parameters) = parameters.filter(|p| !p.is_empty()) {
        let pairs: Vec<String> = parameters
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        name.push('(');
        name.push_str(&pairs.join(","));
        name.push(')');
    }
    name
}

const UNITS: [(u128, &str); 7] = [
    (86_400_000_000_000, "d"),
    (3_600_000_000_000, "h"),
    (60_000_000_000, "min"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "us"),
    (1, "ns"),
];

/// Integer plus unit, using the largest unit that divides the period evenly
///
/// `1 s`, `100 ms`, `1 min`, `90 s`.
pub fn unit_string(period: Duration) -> String {
    let nanos = period.as_nanos();
    if nanos == 0 {
        return "0 s".to_string();
    }
    UNITS
        .iter()
        .find(|(size, _)| nanos % size == 0)
        .map(|(size, unit)| format!("{} {unit}", nanos / size))
        .unwrap_or_else(|| format!("{nanos} ns"))
}

/// ISO-8601 UTC timestamp with second precision, `2020-01-01T00:00:00Z`
pub fn date_time(begin: DateTime<Utc>) -> String {
    begin.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// File name of the period starting at `begin`, e.g. `2020-01-01T00-00-00Z_1_s.tsra`
pub fn file_name(begin: DateTime<Utc>, sample_period: Duration, extension: &str) -> String {
    format!(
        "{}Z_{}.{extension}",
        begin.format("%Y-%m-%dT%H-%M-%S"),
        unit_string(sample_period).replace(' ', "_")
    )
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_physical_id() {
        assert_eq!(physical_id("/SAMPLE/LOCAL"), "SAMPLE_LOCAL");
        assert_eq!(physical_id("A/B/C"), "A_B_C");
        assert_eq!(physical_id("/"), "");
        assert_eq!(physical_id("plain"), "plain");
    }

    #[test]
    fn test_dataset_name() {
        assert_eq!(dataset_name("1_s", None), "dataset_1_s");
        assert_eq!(dataset_name("1_s", Some(&BTreeMap::new())), "dataset_1_s");
        // Keys come out sorted regardless of insertion order
        assert_eq!(
            dataset_name("1_s_mean", Some(&params(&[("window", "5"), ("kind", "x")]))),
            "dataset_1_s_mean(kind=x,window=5)"
        );
    }

    #[test]
    fn test_unit_string() {
        assert_eq!(unit_string(Duration::from_secs(1)), "1 s");
        assert_eq!(unit_string(Duration::from_millis(100)), "100 ms");
        assert_eq!(unit_string(Duration::from_secs(60)), "1 min");
        assert_eq!(unit_string(Duration::from_secs(90)), "90 s");
        assert_eq!(unit_string(Duration::from_secs(3_600)), "1 h");
        assert_eq!(unit_string(Duration::from_secs(86_400)), "1 d");
        assert_eq!(unit_string(Duration::from_micros(250)), "250 us");
    }

    #[test]
    fn test_file_name() {
        let begin = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(date_time(begin), "2020-01-01T00:00:00Z");
        assert_eq!(
            file_name(begin, Duration::from_secs(1), "tsra"),
            "2020-01-01T00-00-00Z_1_s.tsra"
        );
        let begin = Utc.with_ymd_and_hms(2021, 6, 30, 13, 5, 9).unwrap();
        assert_eq!(
            file_name(begin, Duration::from_millis(100), "tsra"),
            "2021-06-30T13-05-09Z_100_ms.tsra"
        );
    }

    proptest! {
        #[test]
        fn physical_id_is_idempotent(id in "[/A-Za-z0-9_]{0,40}") {
            let once = physical_id(&id);
            prop_assert_eq!(physical_id(&once), once.clone());
            prop_assert!(!once.contains('/'));
        }

        #[test]
        fn distinct_parameters_give_distinct_names(
            a in prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{1,4}", 1..4),
            b in prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{1,4}", 1..4),
        ) {
            let name_a = dataset_name("r", Some(&a));
            let name_b = dataset_name("r", Some(&b));
            prop_assert_eq!(name_a == name_b, a == b);
            prop_assert_eq!(dataset_name("r", Some(&a)), name_a);
        }
    }
}
