//! OData query construction and input sanitization
//!
//! Exact Online exposes a fixed OData subset ($select, $filter, $top, $skip,
//! $orderby). Filter values built from external input must pass through
//! [`sanitize_odata_string`] before interpolation; that is the sole injection
//! defense on this surface.

use crate::error::ExactError;
use chrono::NaiveDate;
use url::form_urlencoded;

/// Operator tokens that let a value escape a quoted literal's scope.
/// Matched case-insensitively, space-delimited.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    " or ", " and ", " eq ", " ne ", " gt ", " lt ", " ge ", " le ",
];

/// Sanitize a string value for use in OData filter expressions.
///
/// Rejects values containing boolean/comparison operator tokens and doubles
/// embedded single quotes per the OData escaping convention. Sanitize once
/// only: re-sanitizing an already-escaped value doubles the quotes again.
pub fn sanitize_odata_string(value: &str) -> Result<String, ExactError> {
    let lower = value.to_lowercase();
    for pattern in SUSPICIOUS_PATTERNS {
        if lower.contains(pattern) {
            return Err(ExactError::invalid_input(
                format!("Invalid characters in filter value: {}", value),
                "Remove OData operator keywords from the value",
            ));
        }
    }
    Ok(value.replace('\'', "''"))
}

/// Build an inclusive date-range predicate on `date_field`.
pub fn build_date_filter(start_date: &str, end_date: &str, date_field: &str) -> String {
    format!(
        "{field} ge datetime'{start}' and {field} le datetime'{end}'",
        field = date_field,
        start = start_date,
        end = end_date,
    )
}

/// Convert the legacy OData date encoding to an ISO date string.
///
/// Exact Online returns dates as `/Date(milliseconds)/` or
/// `/Date(milliseconds+offset)/`, with the millisecond timestamp optionally
/// signed. Values not matching that encoding are assumed to already be in a
/// plain date format and are returned unchanged.
pub fn parse_odata_date(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix("/Date(").and_then(|s| s.strip_suffix(")/")) else {
        return raw.to_string();
    };

    // A +hhmm/-hhmm zone offset may follow the timestamp; the leading sign
    // of the timestamp itself does not count.
    let offset_idx = inner
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '+' || c == '-')
        .map(|(i, _)| i);
    let millis = match offset_idx {
        Some(i) => &inner[..i],
        None => inner,
    };

    match millis.parse::<i64>() {
        Ok(ms) => match chrono::DateTime::from_timestamp_millis(ms) {
            Some(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
            None => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

/// Parse a raw record date (legacy OData or ISO) into a calendar date.
pub fn record_date(raw: &str) -> Option<NaiveDate> {
    let iso = parse_odata_date(raw);
    let prefix = iso.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Query options for Exact Online OData requests
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub select: Option<String>,
    pub filter: Option<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub orderby: Option<String>,
}

impl QueryOptions {
    /// Build the encoded query string; absent parameters are omitted entirely.
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;

        if let Some(ref select) = self.select {
            serializer.append_pair("$select", select);
            any = true;
        }
        if let Some(ref filter) = self.filter {
            serializer.append_pair("$filter", filter);
            any = true;
        }
        if let Some(top) = self.top {
            serializer.append_pair("$top", &top.to_string());
            any = true;
        }
        if let Some(skip) = self.skip {
            serializer.append_pair("$skip", &skip.to_string());
            any = true;
        }
        if let Some(ref orderby) = self.orderby {
            serializer.append_pair("$orderby", orderby);
            any = true;
        }

        if any {
            format!("?{}", serializer.finish())
        } else {
            String::new()
        }
    }
}
