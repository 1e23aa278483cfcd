//! Data models for the Exact Online MCP server
//!
//! Report aggregates are pure derived views over raw record batches: they are
//! recomputed on every tool call and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An Exact Online division (administratie)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Division {
    /// Unique numeric division identifier (e.g., 7095)
    pub code: i64,
    pub name: String,
    /// Whether this is the user's default/current division
    pub is_current: bool,
}

/// A known Exact Online API endpoint in the static catalog
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub path: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub typical_use: &'static str,
}

/// Result of exploring an API endpoint
#[derive(Debug, Serialize)]
pub struct ExplorationResult {
    pub endpoint: String,
    pub division: i64,
    pub count: usize,
    pub data: Vec<Value>,
    pub available_fields: Vec<String>,
}

/// Revenue totals for a time period with year-over-year comparison
#[derive(Debug, Clone, Serialize)]
pub struct RevenuePeriod {
    /// Period identifier (e.g., "2024-Q1", "2024-01", "2024")
    pub period_key: String,
    pub start_date: String,
    pub end_date: String,
    pub revenue: f64,
    pub invoice_count: usize,
    /// Revenue for the same period last year (None if not available)
    pub previous_revenue: Option<f64>,
    /// Year-over-year change; None when previous revenue is zero or absent
    pub change_percentage: Option<f64>,
}

/// Revenue metrics for a single customer
#[derive(Debug, Clone, Serialize)]
pub struct CustomerRevenue {
    pub customer_id: String,
    pub customer_name: String,
    pub revenue: f64,
    pub invoice_count: usize,
    /// Share of total revenue (0-100)
    pub percentage_of_total: f64,
}

/// Revenue metrics for a single project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRevenue {
    pub project_id: String,
    pub project_code: String,
    pub project_name: String,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub revenue: f64,
    pub invoice_count: usize,
    /// Total hours logged (from TimeTransactions, when available)
    pub hours: Option<f64>,
}

/// Profit & loss summary with year-over-year comparison
#[derive(Debug, Clone, Serialize)]
pub struct ProfitLossOverview {
    pub division: i64,
    pub current_year: i64,
    pub previous_year: i64,
    pub currency_code: String,
    pub revenue_current_year: f64,
    pub revenue_previous_year: f64,
    pub costs_current_year: f64,
    pub costs_previous_year: f64,
    pub result_current_year: f64,
    pub result_previous_year: f64,
    pub current_period: i64,
    pub revenue_current_period: f64,
    pub costs_current_period: f64,
    pub result_current_period: f64,
}

/// One categorized line of the balance sheet
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSheetCategory {
    pub name: String,
    pub amount: f64,
    pub account_count: usize,
}

/// Balance sheet totals grouped into assets, liabilities and equity
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSheetSummary {
    pub division: i64,
    pub reporting_year: i64,
    pub reporting_period: i64,
    pub currency_code: String,
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
    pub assets: Vec<BalanceSheetCategory>,
    pub liabilities: Vec<BalanceSheetCategory>,
    pub equity: Vec<BalanceSheetCategory>,
}

/// Aging buckets for a single debtor or creditor
#[derive(Debug, Clone, Serialize)]
pub struct AgingEntry {
    pub account_id: String,
    pub account_code: String,
    pub account_name: String,
    pub total_amount: f64,
    pub age_0_30: f64,
    pub age_31_60: f64,
    pub age_61_90: f64,
    pub age_over_90: f64,
    pub currency_code: String,
}

/// GL account balance for a reporting year/period
#[derive(Debug, Clone, Serialize)]
pub struct GLAccountBalance {
    pub gl_account_id: String,
    pub gl_account_code: String,
    pub gl_account_description: String,
    pub amount: f64,
    pub amount_debit: f64,
    pub amount_credit: f64,
    /// "B" for balance sheet, "W" for profit & loss
    pub balance_type: String,
    pub account_type: i64,
    pub account_type_description: String,
    pub reporting_year: i64,
    pub reporting_period: i64,
}

/// A single journal entry line on a GL account
#[derive(Debug, Clone, Serialize)]
pub struct TransactionLine {
    pub id: String,
    pub date: String,
    pub financial_year: i64,
    pub financial_period: i64,
    pub gl_account_code: String,
    pub gl_account_description: String,
    pub description: String,
    pub amount: f64,
    pub entry_number: i64,
    pub journal_code: String,
}

/// An unpaid invoice or credit note from cashflow/Receivables
#[derive(Debug, Clone, Serialize)]
pub struct OpenReceivable {
    pub account_code: String,
    pub account_name: String,
    pub invoice_number: i64,
    pub invoice_date: String,
    pub due_date: String,
    pub original_amount: f64,
    pub remaining_amount: f64,
    /// True when the open item is a credit note rather than an invoice
    pub is_credit: bool,
    pub description: String,
    pub payment_terms: String,
    /// Days past the due date; negative means not yet due
    pub days_overdue: i64,
    pub currency: String,
}

/// Balance sheet category for a GL account type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCategory {
    Assets,
    Liabilities,
    Equity,
    /// Profit & loss accounts, excluded from balance sheet totals
    ProfitLoss,
}

/// Map an Exact Online GL account type code to its balance sheet category
/// and display name. Unknown codes are handled by the caller (they default
/// to assets keyed by the provider's own type description).
pub fn account_type_category(account_type: i64) -> Option<(AccountCategory, &'static str)> {
    use AccountCategory::*;
    let entry = match account_type {
        10 => (Assets, "Cash"),
        12 => (Assets, "Bank accounts"),
        14 => (Assets, "Credit card"),
        16 => (Assets, "Payment services"),
        18 => (Assets, "Accounts receivable"),
        20 => (Liabilities, "Accounts payable"),
        21 => (Liabilities, "VAT payable"),
        22 => (Liabilities, "Employees payable"),
        24 => (Assets, "Prepaid expenses"),
        25 => (Liabilities, "Accrued liabilities"),
        26 => (Liabilities, "Income taxes payable"),
        27 => (Assets, "Fixed assets"),
        28 => (Assets, "Other assets"),
        29 => (Assets, "Accumulated depreciation"),
        30 => (Assets, "Inventory"),
        32 => (Equity, "Capital stock"),
        34 => (Liabilities, "Dividends payable"),
        35 => (Assets, "Loans receivable"),
        40 => (Liabilities, "Long term debt"),
        50 => (Liabilities, "Current portion of debt"),
        90 => (Equity, "General equity"),
        110 => (ProfitLoss, "Revenue"),
        111 => (ProfitLoss, "Cost of goods sold"),
        120 => (ProfitLoss, "Other costs"),
        121 => (ProfitLoss, "Expenses"),
        122 => (ProfitLoss, "Depreciation costs"),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_account_types() {
        assert_eq!(
            account_type_category(12),
            Some((AccountCategory::Assets, "Bank accounts"))
        );
        assert_eq!(
            account_type_category(20),
            Some((AccountCategory::Liabilities, "Accounts payable"))
        );
        assert_eq!(
            account_type_category(32),
            Some((AccountCategory::Equity, "Capital stock"))
        );
        assert_eq!(
            account_type_category(110),
            Some((AccountCategory::ProfitLoss, "Revenue"))
        );
    }

    #[test]
    fn test_unknown_account_type() {
        assert_eq!(account_type_category(9999), None);
    }
}
