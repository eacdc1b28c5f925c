//! Parsing of a raw TiDB slow query log entry into a [`SlowQueryRecord`].
//!
//! A log entry is a block of `# Key: value` header lines (one or more
//! key-value pairs per line) followed by a trailing SQL statement line. The
//! header's `Plan` value is itself base64+snappy encoded and is decoded
//! in-place via [`crate::plan::decode_plan`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("slow query log must contain a header and a trailing statement line")]
    MalformedLog,
    #[error("slow query log is missing a Time field")]
    MissingTimeField,
    #[error("slow query log has an unparseable Time value {0:?}: {1}")]
    BadTimeFormat(String, chrono::ParseError),
}

type Result<T, E = ParseError> = std::result::Result<T, E>;

/// A single header field's coerced value. Coercion tries, in order, `bool`,
/// then `u64` (for fields the caller pins to an unsigned integer, such as
/// `Txn_start_ts`), then `f64`, falling back to the raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    UInt64(u64),
    Float64(f64),
    String(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A parsed slow query log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowQueryRecord {
    pub time: DateTime<Utc>,
    /// Copied in from the shipping agent's pod/host identity; the parser
    /// itself has no notion of "which instance produced this log".
    pub instance: Option<String>,
    pub query: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl SlowQueryRecord {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

static KV_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+): (\S+)").unwrap());

/// Fields whose pinned type bypasses the normal bool/float/string coercion
/// precedence: `Txn_start_ts` is always a u64, since its magnitude overflows
/// `f64`'s exact-integer range and a lossy float round-trip would corrupt it.
const PINNED_U64_FIELDS: &[&str] = &["Txn_start_ts"];

/// Parses a raw slow query log entry.
///
/// `instance` is the identity of the producing node (pod name, hostname),
/// supplied by the caller since it comes from shipping-agent metadata rather
/// than the log text itself.
pub fn parse(raw: &str, instance: Option<&str>) -> Result<SlowQueryRecord> {
    let lines: Vec<&str> = raw.split('\n').collect();
    if lines.len() < 3 {
        return Err(ParseError::MalformedLog);
    }

    let (header_lines, query_line) = lines.split_at(lines.len() - 1);
    let header = header_lines.join("\n");
    let query = query_line[0].trim().to_string();

    let mut fields = BTreeMap::new();
    let mut raw_time: Option<String> = None;

    for caps in KV_PATTERN.captures_iter(&header) {
        let key = &caps[1];
        let value = &caps[2];
        if key.is_empty() || value.is_empty() {
            continue;
        }

        if key == "Time" {
            raw_time = Some(value.to_string());
            continue;
        }

        if key == "Plan" {
            fields.insert(key.to_string(), FieldValue::String(trim_plan_wrapper(value).to_string()));
            continue;
        }

        if let Some(coerced) = coerce(key, value) {
            fields.insert(key.to_string(), coerced);
        }
    }

    let raw_time = raw_time.ok_or(ParseError::MissingTimeField)?;
    let time = DateTime::parse_from_rfc3339(&raw_time)
        .map_err(|e| ParseError::BadTimeFormat(raw_time, e))?
        .with_timezone(&Utc);

    Ok(SlowQueryRecord {
        time,
        instance: instance.map(str::to_string),
        query,
        fields,
    })
}

/// Strips the `tidb_decode_plan('...')` wrapper the TiDB server embeds the
/// encoded plan in, keeping the inner base64+snappy payload as-is. The value
/// stored in the record stays in encoded form: decoding into a human-readable
/// tree is a display-time transform (see [`crate::plan::decode_plan`]), not
/// something persisted to the database, so this step never fails — a value
/// that doesn't match the wrapper shape is passed through unchanged.
fn trim_plan_wrapper(value: &str) -> &str {
    value
        .strip_prefix("tidb_decode_plan('")
        .and_then(|s| s.strip_suffix("')"))
        .unwrap_or(value)
}

/// Coerces one header value. For a pinned-u64 field (`Txn_start_ts`), a
/// failed `u64` parse drops the field entirely rather than falling through
/// to the bool/float/string coercions, per the parser's coercion-precedence
/// invariant. All other fields try bool, then float, then string.
fn coerce(key: &str, value: &str) -> Option<FieldValue> {
    if PINNED_U64_FIELDS.contains(&key) {
        return value.parse::<u64>().ok().map(FieldValue::UInt64);
    }
    if let Ok(b) = value.parse::<bool>() {
        return Some(FieldValue::Bool(b));
    }
    if let Ok(f) = value.parse::<f64>() {
        return Some(FieldValue::Float64(f));
    }
    Some(FieldValue::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "# Time: 2021-05-25T14:34:03.62477988Z\n# Txn_start_ts: 425026766397767689\n# Query_time: 0.002647249\n# Is_internal: true\n# Digest: 4e9ea14d0398e6e6cd86cb8a013d5dcec420bfe697bfc4536e91bdd8a0e26522\n# Plan: \nselect value from mysql.stats_fm_sketch where table_id = 53 and is_index = 0 and hist_id = 2;";

    #[test]
    fn parses_time_and_query() {
        let rec = parse(SAMPLE_LOG, Some("pod-a")).unwrap();
        assert_eq!(rec.instance.as_deref(), Some("pod-a"));
        assert_eq!(
            rec.query,
            "select value from mysql.stats_fm_sketch where table_id = 53 and is_index = 0 and hist_id = 2;"
        );
        assert_eq!(rec.time.to_rfc3339(), "2021-05-25T14:34:03.624779880+00:00");
    }

    #[test]
    fn txn_start_ts_is_pinned_to_u64() {
        let rec = parse(SAMPLE_LOG, None).unwrap();
        assert_eq!(
            rec.get("Txn_start_ts"),
            Some(&FieldValue::UInt64(425026766397767689))
        );
    }

    #[test]
    fn coercion_precedence_prefers_bool_then_float_then_string() {
        assert_eq!(coerce("Is_internal", "true"), Some(FieldValue::Bool(true)));
        assert_eq!(coerce("Query_time", "0.002647249"), Some(FieldValue::Float64(0.002647249)));
        assert_eq!(
            coerce("Digest", "4e9ea14d0398e6"),
            Some(FieldValue::String("4e9ea14d0398e6".to_string()))
        );
    }

    #[test]
    fn unparseable_txn_start_ts_is_dropped_not_coerced_further() {
        assert_eq!(coerce("Txn_start_ts", "not-a-number"), None);
    }

    #[test]
    fn header_with_unparseable_txn_start_ts_omits_the_field() {
        let log = "# Time: 2021-05-25T14:34:03.62477988Z\n# Txn_start_ts: not-a-number\nselect 1;";
        let rec = parse(log, None).unwrap();
        assert_eq!(rec.get("Txn_start_ts"), None);
    }

    #[test]
    fn missing_time_field_is_an_error() {
        let log = "# Txn_start_ts: 1\n# Digest: abc\nselect 1;";
        assert!(matches!(parse(log, None), Err(ParseError::MissingTimeField)));
    }

    #[test]
    fn too_few_lines_is_malformed() {
        assert!(matches!(parse("only one line", None), Err(ParseError::MalformedLog)));
        assert!(matches!(parse("line one\nline two", None), Err(ParseError::MalformedLog)));
    }

    #[test]
    fn plan_value_is_kept_encoded_not_decoded() {
        let rec = parse(SAMPLE_LOG, None).unwrap();
        // `# Plan: ` (trailing space, empty value) never matches the kv
        // pattern, so the field is simply absent rather than empty.
        assert_eq!(rec.get("Plan"), None);
    }

    #[test]
    fn trim_plan_wrapper_strips_the_tidb_decode_plan_wrapper() {
        assert_eq!(trim_plan_wrapper("tidb_decode_plan('AAA')"), "AAA");
        assert_eq!(trim_plan_wrapper("short"), "short");
    }

    #[test]
    fn plan_field_in_log_is_stored_still_wrapped_stripped_but_encoded() {
        let log = "# Time: 2021-05-25T14:34:03.62477988Z\n# Txn_start_ts: 1\n# Plan: tidb_decode_plan('AAA==')\nselect 1;";
        let rec = parse(log, None).unwrap();
        assert_eq!(rec.get("Plan"), Some(&FieldValue::String("AAA==".to_string())));
    }

    #[test]
    fn bad_time_format_is_reported() {
        let log = "# Time: not-a-time\n# Digest: abc\nselect 1;";
        assert!(matches!(parse(log, None), Err(ParseError::BadTimeFormat(_, _))));
    }
}
