//! Pure aggregation and shaping functions for the reporting tools
//!
//! Everything here is computed from raw record batches already in memory;
//! no I/O. Monetary amounts are rounded to two decimals at the aggregate
//! level, never on individual records.

use crate::models::{
    account_type_category, AccountCategory, AgingEntry, BalanceSheetCategory, BalanceSheetSummary,
    CustomerRevenue, GLAccountBalance, OpenReceivable, ProjectRevenue, RevenuePeriod,
    TransactionLine,
};
use crate::odata::query::{parse_odata_date, record_date};
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Period grouping for revenue reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    Month,
    Quarter,
    Year,
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "month" => Ok(GroupBy::Month),
            "quarter" => Ok(GroupBy::Quarter),
            "year" => Ok(GroupBy::Year),
            other => Err(format!(
                "Invalid group_by '{}'. Use 'month', 'quarter' or 'year'.",
                other
            )),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Month => write!(f, "month"),
            GroupBy::Quarter => write!(f, "quarter"),
            GroupBy::Year => write!(f, "year"),
        }
    }
}

/// One grouping bucket with its clipped calendar bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodBoundary {
    /// "2024-01", "2024-Q1" or "2024" depending on grouping
    pub key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Generate contiguous period buckets covering `[start, end]`.
///
/// Buckets follow calendar boundaries but the first and last are clipped
/// to the requested range, so the union of all buckets is exactly the
/// range with no gaps and no overlap.
pub fn period_boundaries(group_by: GroupBy, start: NaiveDate, end: NaiveDate) -> Vec<PeriodBoundary> {
    let mut periods = Vec::new();
    if start > end {
        return periods;
    }

    match group_by {
        GroupBy::Year => {
            for year in start.year()..=end.year() {
                let period_start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(start);
                let period_end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(end);
                periods.push(PeriodBoundary {
                    key: year.to_string(),
                    start: period_start.max(start),
                    end: period_end.min(end),
                });
            }
        }
        GroupBy::Quarter => {
            let mut current = start;
            while current <= end {
                let quarter = (current.month0() / 3) + 1;
                let first_month = (quarter - 1) * 3 + 1;
                let last_month = quarter * 3;
                let period_start =
                    NaiveDate::from_ymd_opt(current.year(), first_month, 1).unwrap_or(current);
                let period_end = last_day_of_month(current.year(), last_month);
                periods.push(PeriodBoundary {
                    key: format!("{}-Q{}", current.year(), quarter),
                    start: period_start.max(start),
                    end: period_end.min(end),
                });
                current = match period_end.succ_opt() {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        GroupBy::Month => {
            let mut current = start;
            while current <= end {
                let period_start =
                    NaiveDate::from_ymd_opt(current.year(), current.month(), 1).unwrap_or(current);
                let period_end = last_day_of_month(current.year(), current.month());
                periods.push(PeriodBoundary {
                    key: format!("{}-{:02}", current.year(), current.month()),
                    start: period_start.max(start),
                    end: period_end.min(end),
                });
                current = match period_end.succ_opt() {
                    Some(next) => next,
                    None => break,
                };
            }
        }
    }

    periods
}

/// Key of the same period one year earlier ("2024-Q1" -> "2023-Q1").
pub fn previous_year_key(period_key: &str) -> String {
    let (year_part, rest) = match period_key.split_once('-') {
        Some((year, rest)) => (year, Some(rest)),
        None => (period_key, None),
    };
    match year_part.parse::<i32>() {
        Ok(year) => match rest {
            Some(rest) => format!("{}-{}", year - 1, rest),
            None => (year - 1).to_string(),
        },
        Err(_) => period_key.to_string(),
    }
}

/// Group invoice records into period buckets by InvoiceDate.
///
/// Records with a missing, unparseable or out-of-range date are silently
/// dropped; every period key is present in the result even when empty.
pub fn group_by_period<'a>(
    invoices: &'a [Value],
    periods: &[PeriodBoundary],
) -> HashMap<String, Vec<&'a Value>> {
    let mut grouped: HashMap<String, Vec<&Value>> = periods
        .iter()
        .map(|p| (p.key.clone(), Vec::new()))
        .collect();

    for invoice in invoices {
        let Some(date) = invoice
            .get("InvoiceDate")
            .and_then(Value::as_str)
            .and_then(record_date)
        else {
            continue;
        };
        if let Some(period) = periods.iter().find(|p| p.start <= date && date <= p.end) {
            if let Some(bucket) = grouped.get_mut(&period.key) {
                bucket.push(invoice);
            }
        }
    }

    grouped
}

/// Total revenue (rounded to 2 decimals) and invoice count for a bucket.
pub fn period_revenue(invoices: &[&Value]) -> (f64, usize) {
    let total: f64 = invoices.iter().map(|inv| f64_field(inv, "AmountDC")).sum();
    (round2(total), invoices.len())
}

/// Build the per-period revenue breakdown with year-over-year comparison.
pub fn revenue_periods(
    periods: &[PeriodBoundary],
    grouped: &HashMap<String, Vec<&Value>>,
    previous_grouped: &HashMap<String, Vec<&Value>>,
) -> Vec<RevenuePeriod> {
    periods
        .iter()
        .map(|period| {
            let empty = Vec::new();
            let bucket = grouped.get(&period.key).unwrap_or(&empty);
            let (revenue, invoice_count) = period_revenue(bucket);

            let prev_key = previous_year_key(&period.key);
            let prev_bucket = previous_grouped.get(&prev_key).unwrap_or(&empty);
            let (prev_revenue, _) = period_revenue(prev_bucket);

            let previous_revenue = (prev_revenue != 0.0).then_some(prev_revenue);
            let change_percentage = previous_revenue
                .map(|prev| round2((revenue - prev) / prev * 100.0));

            RevenuePeriod {
                period_key: period.key.clone(),
                start_date: period.start.to_string(),
                end_date: period.end.to_string(),
                revenue,
                invoice_count,
                previous_revenue,
                change_percentage,
            }
        })
        .collect()
}

/// Aggregate invoices per customer, sorted by revenue descending.
pub fn aggregate_by_customer(invoices: &[Value]) -> Vec<CustomerRevenue> {
    struct Entry {
        name: String,
        revenue: f64,
        count: usize,
    }

    // Encounter order is kept so equal-revenue customers sort stably.
    let mut order: Vec<String> = Vec::new();
    let mut data: HashMap<String, Entry> = HashMap::new();
    let mut total_revenue = 0.0;

    for inv in invoices {
        let customer_id = inv
            .get("InvoiceTo")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let customer_name = inv
            .get("InvoiceToName")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let amount = f64_field(inv, "AmountDC");

        let entry = data.entry(customer_id.clone()).or_insert_with(|| {
            order.push(customer_id.clone());
            Entry {
                name: String::new(),
                revenue: 0.0,
                count: 0,
            }
        });
        entry.name = customer_name;
        entry.revenue += amount;
        entry.count += 1;
        total_revenue += amount;
    }

    let mut customers: Vec<CustomerRevenue> = order
        .into_iter()
        .filter_map(|id| {
            let entry = data.remove(&id)?;
            let pct = if total_revenue > 0.0 {
                entry.revenue / total_revenue * 100.0
            } else {
                0.0
            };
            Some(CustomerRevenue {
                customer_id: id,
                customer_name: entry.name,
                revenue: round2(entry.revenue),
                invoice_count: entry.count,
                percentage_of_total: round2(pct),
            })
        })
        .collect();

    customers.sort_by(|a, b| b.revenue.partial_cmp(&a.revenue).unwrap_or(std::cmp::Ordering::Equal));
    customers
}

/// Aggregate invoice lines per project, joined with project metadata and
/// optional logged hours. Sorted by revenue descending.
pub fn aggregate_by_project(
    invoice_lines: &[Value],
    project_metadata: &HashMap<String, Value>,
    hours_data: Option<&HashMap<String, f64>>,
) -> Vec<ProjectRevenue> {
    let mut order: Vec<String> = Vec::new();
    let mut data: HashMap<String, (f64, usize)> = HashMap::new();

    for line in invoice_lines {
        let Some(project_id) = line.get("Project").and_then(Value::as_str) else {
            continue;
        };
        let amount = f64_field(line, "AmountDC");
        let entry = data.entry(project_id.to_string()).or_insert_with(|| {
            order.push(project_id.to_string());
            (0.0, 0)
        });
        entry.0 += amount;
        entry.1 += 1;
    }

    let mut projects: Vec<ProjectRevenue> = order
        .into_iter()
        .filter_map(|project_id| {
            let (revenue, count) = data.remove(&project_id)?;
            let metadata = project_metadata.get(&project_id);
            let hours = hours_data.and_then(|h| h.get(&project_id)).copied();

            Some(ProjectRevenue {
                project_code: metadata
                    .and_then(|m| m.get("Code"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                project_name: metadata
                    .and_then(|m| m.get("Description"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown Project")
                    .to_string(),
                client_id: metadata
                    .and_then(|m| m.get("Account"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                client_name: metadata
                    .and_then(|m| m.get("AccountName"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                project_id,
                revenue: round2(revenue),
                invoice_count: count,
                hours: hours.map(round2),
            })
        })
        .collect();

    projects.sort_by(|a, b| b.revenue.partial_cmp(&a.revenue).unwrap_or(std::cmp::Ordering::Equal));
    projects
}

/// Aggregate reporting balances into balance sheet categories.
///
/// Profit & loss account types are skipped; unknown types land under
/// assets keyed by the provider's own type description.
pub fn aggregate_balances_by_category(
    balances: &[Value],
    division: i64,
    year: i64,
    period: i64,
) -> BalanceSheetSummary {
    struct Bucket {
        category: AccountCategory,
        name: String,
        amount: f64,
        count: usize,
    }

    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Bucket> = HashMap::new();

    for balance in balances {
        let account_type = i64_field(balance, "Type");
        let amount = f64_field(balance, "Amount");

        let (category, name) = match account_type_category(account_type) {
            Some((AccountCategory::ProfitLoss, _)) => continue,
            Some((category, name)) => (category, name.to_string()),
            None => (
                AccountCategory::Assets,
                str_field(balance, "TypeDescription", "Unknown"),
            ),
        };

        let key = format!("{:?}:{}", category, name);
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Bucket {
                category,
                name,
                amount: 0.0,
                count: 0,
            }
        });
        bucket.amount += amount;
        bucket.count += 1;
    }

    let mut assets = Vec::new();
    let mut liabilities = Vec::new();
    let mut equity = Vec::new();

    for key in order {
        let Some(bucket) = buckets.remove(&key) else {
            continue;
        };
        let entry = BalanceSheetCategory {
            name: bucket.name,
            amount: round2(bucket.amount),
            account_count: bucket.count,
        };
        match bucket.category {
            AccountCategory::Assets => assets.push(entry),
            AccountCategory::Liabilities => liabilities.push(entry),
            AccountCategory::Equity => equity.push(entry),
            AccountCategory::ProfitLoss => {}
        }
    }

    let total = |entries: &[BalanceSheetCategory]| round2(entries.iter().map(|c| c.amount).sum());
    let total_assets = total(&assets);
    let total_liabilities = total(&liabilities);
    let total_equity = total(&equity);

    let by_amount_desc = |a: &BalanceSheetCategory, b: &BalanceSheetCategory| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    assets.sort_by(by_amount_desc);
    liabilities.sort_by(by_amount_desc);
    equity.sort_by(by_amount_desc);

    BalanceSheetSummary {
        division,
        reporting_year: year,
        reporting_period: period,
        currency_code: "EUR".to_string(),
        total_assets,
        total_liabilities,
        total_equity,
        assets,
        liabilities,
        equity,
    }
}

/// Shape a raw aging report record into fixed day-range buckets.
pub fn aging_entry_from_record(record: &Value) -> AgingEntry {
    AgingEntry {
        account_id: str_field(record, "AccountId", ""),
        account_code: str_field(record, "AccountCode", ""),
        account_name: str_field(record, "AccountName", ""),
        total_amount: f64_field(record, "TotalAmount"),
        age_0_30: f64_field(record, "AgeGroup1Amount"),
        age_31_60: f64_field(record, "AgeGroup2Amount"),
        age_61_90: f64_field(record, "AgeGroup3Amount"),
        age_over_90: f64_field(record, "AgeGroup4Amount"),
        currency_code: str_field(record, "CurrencyCode", "EUR"),
    }
}

/// Shape a raw GL balance record.
pub fn gl_account_balance_from_record(record: &Value) -> GLAccountBalance {
    GLAccountBalance {
        gl_account_id: str_field(record, "GLAccountID", ""),
        gl_account_code: str_field(record, "GLAccountCode", ""),
        gl_account_description: str_field(record, "GLAccountDescription", ""),
        amount: f64_field(record, "Amount"),
        amount_debit: f64_field(record, "AmountDebit"),
        amount_credit: f64_field(record, "AmountCredit"),
        balance_type: str_field(record, "BalanceType", ""),
        account_type: i64_field(record, "Type"),
        account_type_description: str_field(record, "TypeDescription", ""),
        reporting_year: i64_field(record, "ReportingYear"),
        reporting_period: i64_field(record, "ReportingPeriod"),
    }
}

/// Shape a raw journal entry line.
pub fn transaction_line_from_record(record: &Value) -> TransactionLine {
    TransactionLine {
        id: str_field(record, "ID", ""),
        date: parse_odata_date(&str_field(record, "Date", "")),
        financial_year: i64_field(record, "FinancialYear"),
        financial_period: i64_field(record, "FinancialPeriod"),
        gl_account_code: str_field(record, "GLAccountCode", ""),
        gl_account_description: str_field(record, "GLAccountDescription", ""),
        description: str_field(record, "Description", ""),
        amount: f64_field(record, "AmountDC"),
        entry_number: i64_field(record, "EntryNumber"),
        journal_code: str_field(record, "JournalCode", ""),
    }
}

/// Shape a raw open receivable.
///
/// AmountDC is negative for money still owed to us and positive for a
/// credit note; both are exposed as absolute amounts with an is_credit
/// flag. days_overdue is negative for items not yet due.
pub fn shape_open_receivable(record: &Value, today: NaiveDate) -> OpenReceivable {
    let invoice_date = parse_odata_date(&str_field(record, "InvoiceDate", ""));
    let due_date = parse_odata_date(&str_field(record, "DueDate", ""));

    let days_overdue = NaiveDate::parse_from_str(&due_date, "%Y-%m-%d")
        .map(|due| (today - due).num_days())
        .unwrap_or(0);

    let amount_dc = f64_field(record, "AmountDC");
    let transaction_amount = f64_field(record, "TransactionAmountDC");

    OpenReceivable {
        account_code: str_field(record, "AccountCode", "").trim().to_string(),
        account_name: str_field(record, "AccountName", ""),
        invoice_number: i64_field(record, "InvoiceNumber"),
        invoice_date,
        due_date,
        original_amount: transaction_amount.abs(),
        remaining_amount: amount_dc.abs(),
        is_credit: amount_dc > 0.0,
        description: str_field(record, "Description", ""),
        payment_terms: str_field(record, "PaymentConditionDescription", ""),
        days_overdue,
        currency: str_field(record, "Currency", "EUR"),
    }
}

// Loose-typed field access: Exact Online occasionally serializes numbers
// as strings, and null-valued fields are common.

pub fn f64_field(record: &Value, key: &str) -> f64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn i64_field(record: &Value, key: &str) -> i64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

pub fn str_field(record: &Value, key: &str, default: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_boundaries_clipped_and_gap_free() {
        let periods = period_boundaries(GroupBy::Month, date(2024, 1, 15), date(2024, 3, 10));
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].key, "2024-01");
        assert_eq!(periods[0].start, date(2024, 1, 15));
        assert_eq!(periods[0].end, date(2024, 1, 31));
        assert_eq!(periods[1].start, date(2024, 2, 1));
        assert_eq!(periods[1].end, date(2024, 2, 29));
        assert_eq!(periods[2].key, "2024-03");
        assert_eq!(periods[2].end, date(2024, 3, 10));

        for pair in periods.windows(2) {
            assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
        }
    }

    #[test]
    fn test_quarter_boundaries_cross_year() {
        let periods = period_boundaries(GroupBy::Quarter, date(2023, 11, 1), date(2024, 2, 15));
        let keys: Vec<&str> = periods.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["2023-Q4", "2024-Q1"]);
        assert_eq!(periods[0].start, date(2023, 11, 1));
        assert_eq!(periods[0].end, date(2023, 12, 31));
        assert_eq!(periods[1].end, date(2024, 2, 15));
    }

    #[test]
    fn test_year_boundaries() {
        let periods = period_boundaries(GroupBy::Year, date(2022, 6, 1), date(2024, 3, 31));
        let keys: Vec<&str> = periods.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["2022", "2023", "2024"]);
        assert_eq!(periods[0].start, date(2022, 6, 1));
        assert_eq!(periods[2].end, date(2024, 3, 31));
    }

    #[test]
    fn test_inverted_range_yields_nothing() {
        assert!(period_boundaries(GroupBy::Month, date(2024, 3, 1), date(2024, 1, 1)).is_empty());
    }

    #[test]
    fn test_previous_year_key() {
        assert_eq!(previous_year_key("2024-Q1"), "2023-Q1");
        assert_eq!(previous_year_key("2024-01"), "2023-01");
        assert_eq!(previous_year_key("2024"), "2023");
        assert_eq!(previous_year_key("garbage"), "garbage");
    }

    #[test]
    fn test_single_invoice_quarter() {
        // One 500.00 invoice in Q1, no previous-year data.
        let periods = period_boundaries(GroupBy::Quarter, date(2024, 1, 1), date(2024, 3, 31));
        let invoices = vec![json!({
            "InvoiceID": "a1",
            "InvoiceDate": "2024-02-10T00:00:00",
            "AmountDC": 500.0,
        })];
        let grouped = group_by_period(&invoices, &periods);
        let results = revenue_periods(&periods, &grouped, &HashMap::new());

        assert_eq!(results.len(), 1);
        let q1 = &results[0];
        assert_eq!(q1.period_key, "2024-Q1");
        assert_eq!(q1.revenue, 500.00);
        assert_eq!(q1.invoice_count, 1);
        assert_eq!(q1.previous_revenue, None);
        assert_eq!(q1.change_percentage, None);
    }

    #[test]
    fn test_year_over_year_change() {
        let periods = period_boundaries(GroupBy::Quarter, date(2024, 1, 1), date(2024, 3, 31));
        let prev_periods = period_boundaries(GroupBy::Quarter, date(2023, 1, 1), date(2023, 3, 31));
        let invoices = vec![json!({"InvoiceDate": "2024-02-01", "AmountDC": 1100.0})];
        let prev_invoices = vec![json!({"InvoiceDate": "2023-02-01", "AmountDC": 1000.0})];

        let grouped = group_by_period(&invoices, &periods);
        let prev_grouped = group_by_period(&prev_invoices, &prev_periods);
        let results = revenue_periods(&periods, &grouped, &prev_grouped);

        assert_eq!(results[0].previous_revenue, Some(1000.0));
        assert_eq!(results[0].change_percentage, Some(10.0));
    }

    #[test]
    fn test_invoices_outside_range_dropped() {
        let periods = period_boundaries(GroupBy::Month, date(2024, 1, 1), date(2024, 1, 31));
        let invoices = vec![
            json!({"InvoiceDate": "2024-01-15", "AmountDC": 100.0}),
            json!({"InvoiceDate": "2024-02-15", "AmountDC": 999.0}),
            json!({"InvoiceDate": "not a date", "AmountDC": 999.0}),
            json!({"AmountDC": 999.0}),
        ];
        let grouped = group_by_period(&invoices, &periods);
        assert_eq!(grouped["2024-01"].len(), 1);
    }

    #[test]
    fn test_group_handles_legacy_date_encoding() {
        let periods = period_boundaries(GroupBy::Month, date(2024, 2, 1), date(2024, 2, 29));
        // 2024-02-10 as epoch milliseconds
        let invoices = vec![json!({"InvoiceDate": "/Date(1707523200000)/", "AmountDC": 50.0})];
        let grouped = group_by_period(&invoices, &periods);
        assert_eq!(grouped["2024-02"].len(), 1);
    }

    #[test]
    fn test_aggregate_by_customer_sorted_with_percentages() {
        let invoices = vec![
            json!({"InvoiceTo": "c1", "InvoiceToName": "Acme", "AmountDC": 300.0}),
            json!({"InvoiceTo": "c2", "InvoiceToName": "Beta", "AmountDC": 600.0}),
            json!({"InvoiceTo": "c1", "InvoiceToName": "Acme", "AmountDC": 100.0}),
        ];
        let customers = aggregate_by_customer(&invoices);

        assert_eq!(customers.len(), 2);
        assert_eq!(customers[0].customer_id, "c2");
        assert_eq!(customers[0].revenue, 600.0);
        assert_eq!(customers[0].percentage_of_total, 60.0);
        assert_eq!(customers[1].customer_name, "Acme");
        assert_eq!(customers[1].invoice_count, 2);
        assert_eq!(customers[1].percentage_of_total, 40.0);
    }

    #[test]
    fn test_aggregate_by_customer_missing_fields() {
        let invoices = vec![json!({"AmountDC": 100.0})];
        let customers = aggregate_by_customer(&invoices);
        assert_eq!(customers[0].customer_id, "unknown");
        assert_eq!(customers[0].customer_name, "Unknown");
        assert_eq!(customers[0].percentage_of_total, 100.0);
    }

    #[test]
    fn test_aggregate_by_project_joins_metadata_and_hours() {
        let lines = vec![
            json!({"Project": "p1", "AmountDC": 400.0}),
            json!({"Project": "p1", "AmountDC": 100.0}),
            json!({"Project": "p2", "AmountDC": 200.0}),
            json!({"AmountDC": 999.0}),
        ];
        let mut metadata = HashMap::new();
        metadata.insert(
            "p1".to_string(),
            json!({"Code": "PRJ-1", "Description": "Website", "Account": "a1", "AccountName": "Acme"}),
        );
        let mut hours = HashMap::new();
        hours.insert("p1".to_string(), 42.5);

        let projects = aggregate_by_project(&lines, &metadata, Some(&hours));

        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].project_id, "p1");
        assert_eq!(projects[0].project_code, "PRJ-1");
        assert_eq!(projects[0].revenue, 500.0);
        assert_eq!(projects[0].invoice_count, 2);
        assert_eq!(projects[0].hours, Some(42.5));
        assert_eq!(projects[0].client_name.as_deref(), Some("Acme"));
        // p2 has no metadata
        assert_eq!(projects[1].project_name, "Unknown Project");
        assert_eq!(projects[1].hours, None);
    }

    #[test]
    fn test_balance_sheet_aggregation() {
        let balances = vec![
            json!({"Type": 12, "Amount": 5000.0, "TypeDescription": "Bank"}),
            json!({"Type": 12, "Amount": 2500.0, "TypeDescription": "Bank"}),
            json!({"Type": 20, "Amount": -3000.0, "TypeDescription": "AP"}),
            json!({"Type": 90, "Amount": 1000.0, "TypeDescription": "Equity"}),
            // P&L accounts do not belong on a balance sheet
            json!({"Type": 110, "Amount": 99999.0, "TypeDescription": "Revenue"}),
            // Unknown type falls back to assets keyed by description
            json!({"Type": 77, "Amount": 10.0, "TypeDescription": "Mystery"}),
        ];
        let summary = aggregate_balances_by_category(&balances, 7095, 2024, 6);

        assert_eq!(summary.division, 7095);
        assert_eq!(summary.total_assets, 7510.0);
        assert_eq!(summary.total_liabilities, -3000.0);
        assert_eq!(summary.total_equity, 1000.0);
        assert_eq!(summary.assets[0].name, "Bank accounts");
        assert_eq!(summary.assets[0].account_count, 2);
        assert!(summary.assets.iter().any(|c| c.name == "Mystery"));
        assert!(!summary.assets.iter().any(|c| c.name == "Revenue"));
    }

    #[test]
    fn test_aging_entry_mapping() {
        let record = json!({
            "AccountId": "id-1",
            "AccountCode": "C001",
            "AccountName": "Acme",
            "TotalAmount": 1000.0,
            "AgeGroup1Amount": 400.0,
            "AgeGroup2Amount": 300.0,
            "AgeGroup3Amount": 200.0,
            "AgeGroup4Amount": 100.0,
        });
        let entry = aging_entry_from_record(&record);
        assert_eq!(entry.total_amount, 1000.0);
        assert_eq!(entry.age_0_30, 400.0);
        assert_eq!(entry.age_over_90, 100.0);
        assert_eq!(entry.currency_code, "EUR");
    }

    #[test]
    fn test_shape_open_receivable_invoice() {
        let today = date(2024, 3, 15);
        let record = json!({
            "AccountCode": "  C001  ",
            "AccountName": "Acme",
            "InvoiceNumber": 2024001,
            "InvoiceDate": "/Date(1706745600000)/",
            "DueDate": "2024-03-01",
            "AmountDC": -450.0,
            "TransactionAmountDC": -450.0,
            "Currency": "EUR",
        });
        let item = shape_open_receivable(&record, today);

        assert_eq!(item.account_code, "C001");
        assert_eq!(item.invoice_date, "2024-02-01");
        assert_eq!(item.remaining_amount, 450.0);
        assert!(!item.is_credit);
        assert_eq!(item.days_overdue, 14);
    }

    #[test]
    fn test_shape_open_receivable_credit_note_not_yet_due() {
        let today = date(2024, 3, 15);
        let record = json!({
            "DueDate": "2024-04-01",
            "AmountDC": 120.0,
            "TransactionAmountDC": 120.0,
        });
        let item = shape_open_receivable(&record, today);
        assert!(item.is_credit);
        assert_eq!(item.remaining_amount, 120.0);
        assert_eq!(item.days_overdue, -17);
    }

    #[test]
    fn test_transaction_line_mapping() {
        let record = json!({
            "ID": "t1",
            "Date": "/Date(1707523200000)/",
            "FinancialYear": 2024,
            "FinancialPeriod": 2,
            "GLAccountCode": "8000",
            "GLAccountDescription": "Revenue",
            "Description": "Invoice 2024001",
            "AmountDC": "1234.56",
            "EntryNumber": 99,
            "JournalCode": "70",
        });
        let line = transaction_line_from_record(&record);
        assert_eq!(line.date, "2024-02-10");
        assert_eq!(line.amount, 1234.56);
        assert_eq!(line.entry_number, 99);
    }

    #[test]
    fn test_loose_field_access() {
        let record = json!({"a": 1.5, "b": "2.5", "c": null});
        assert_eq!(f64_field(&record, "a"), 1.5);
        assert_eq!(f64_field(&record, "b"), 2.5);
        assert_eq!(f64_field(&record, "c"), 0.0);
        assert_eq!(f64_field(&record, "missing"), 0.0);
        assert_eq!(i64_field(&json!({"x": "42"}), "x"), 42);
        assert_eq!(str_field(&record, "c", "dflt"), "dflt");
    }

    #[test]
    fn test_round2() {
        // 1.005 is stored as slightly less than 1.005, so it rounds down;
        // -2.675 * 100 lands on -267.5 exactly and rounds away from zero
        assert_eq!(round2(1.005), 1.0);
        assert_eq!(round2(10.0 / 3.0), 3.33);
        assert_eq!(round2(-2.675), -2.68);
        assert_eq!(round2(2.5), 2.5);
    }
}
