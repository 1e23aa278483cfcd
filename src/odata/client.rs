//! Exact Online API client
//!
//! Authenticated HTTP client with rate limiting, retry-with-backoff and
//! status-code-driven error classification. All tool operations funnel
//! through [`ExactClient::request`], so every outbound call shares one
//! rate limiter and one cached token.

use crate::auth::{OAuth2Client, Token};
use crate::config::Config;
use crate::error::ExactError;
use crate::models::{
    AgingEntry, Division, ExplorationResult, GLAccountBalance, OpenReceivable, ProfitLossOverview,
    TransactionLine,
};
use crate::odata::query::{build_date_filter, sanitize_odata_string, QueryOptions};
use crate::odata::rate_limit::RateLimiter;
use crate::reports;
use crate::reports::{f64_field, i64_field, str_field};
use chrono::Datelike;
use reqwest::{header, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_BASE: u64 = 2;
const DEFAULT_RETRY_AFTER: u64 = 60;
const TOKEN_EXPIRY_BUFFER: i64 = 30;
const DEFAULT_PAGE_SIZE: usize = 1000;

const REPORTING_BALANCE_FIELDS: &str =
    "ID,GLAccountID,GLAccountCode,GLAccountDescription,Amount,AmountDebit,AmountCredit,\
     BalanceType,Type,TypeDescription,ReportingYear,ReportingPeriod";

/// Async HTTP client for the Exact Online REST API
#[derive(Debug)]
pub struct ExactClient {
    base_url: String,
    oauth: OAuth2Client,
    rate_limiter: RateLimiter,
    http: reqwest::Client,
    current_token: RwLock<Option<Token>>,
    current_division: RwLock<Option<i64>>,
}

impl ExactClient {
    pub fn new(config: &Config, oauth: OAuth2Client) -> Result<Self, ExactError> {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| ExactError::Api(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.region.base_url().to_string(),
            oauth,
            rate_limiter: RateLimiter::new(),
            http,
            current_token: RwLock::new(None),
            current_division: RwLock::new(None),
        })
    }

    /// Return a bearer token, going through the authenticator when the
    /// cached one is missing or about to expire.
    async fn access_token(&self) -> Result<String, ExactError> {
        {
            let cached = self.current_token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired(TOKEN_EXPIRY_BUFFER) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = self.oauth.get_valid_token().await?;
        let access = token.access_token.clone();
        *self.current_token.write().await = Some(token);
        Ok(access)
    }

    async fn invalidate_token(&self) {
        *self.current_token.write().await = None;
    }

    /// Execute an authenticated request with retry logic.
    ///
    /// Each attempt waits for rate-limit admission and attaches a bearer
    /// token; the outcome is classified by [`send_with_retries`]. On a 401
    /// the cached token is dropped before the next attempt so it is fetched
    /// or refreshed anew.
    async fn request(&self, method: Method, url: &str) -> Result<reqwest::Response, ExactError> {
        send_with_retries(url, |_attempt| {
            let method = method.clone();
            async move {
                self.rate_limiter.wait_if_needed().await;
                let access_token = self.access_token().await?;

                let result = self
                    .http
                    .request(method, url)
                    .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                    .header(header::ACCEPT, "application/json")
                    .send()
                    .await;

                let response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        return Ok(Attempt::Transport {
                            timeout: e.is_timeout(),
                            error: e,
                        })
                    }
                };

                let status = response.status();
                if status.as_u16() < 400 {
                    return Ok(Attempt::Ok(response));
                }

                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());

                if status == StatusCode::UNAUTHORIZED {
                    // Token may have been revoked server-side; drop the cache
                    // so the next attempt fetches or refreshes a fresh one.
                    self.invalidate_token().await;
                }

                // Only the generic 4xx/5xx classification needs the body.
                let body = match status.as_u16() {
                    401 | 403 | 404 | 429 => String::new(),
                    _ => response.text().await.unwrap_or_default(),
                };

                Ok(Attempt::Status {
                    code: status.as_u16(),
                    retry_after,
                    body,
                })
            }
        })
        .await
    }

    /// GET any Exact Online endpoint within a division scope.
    pub async fn get(
        &self,
        endpoint: &str,
        division: i64,
        options: &QueryOptions,
    ) -> Result<Value, ExactError> {
        let url = format!(
            "{}/api/v1/{}/{}{}",
            self.base_url,
            division,
            endpoint,
            options.to_query_string()
        );
        tracing::debug!("GET {}", url);

        let response = self.request(Method::GET, &url).await.map_err(|e| {
            if let ExactError::DivisionNotAccessible { .. } = e {
                ExactError::DivisionNotAccessible { division }
            } else {
                e
            }
        })?;

        response
            .json()
            .await
            .map_err(|e| ExactError::Api(format!("Failed to parse API response: {}", e)))
    }

    /// The current user's default division, cached for the process lifetime.
    pub async fn get_current_division(&self) -> Result<i64, ExactError> {
        {
            let cached = self.current_division.read().await;
            if let Some(code) = *cached {
                return Ok(code);
            }
        }

        let url = format!(
            "{}/api/v1/current/Me?%24select=CurrentDivision",
            self.base_url
        );
        let response = self.request(Method::GET, &url).await?;
        let data: Value = response
            .json()
            .await
            .map_err(|e| ExactError::Api(format!("Failed to parse API response: {}", e)))?;

        let results = extract_results(&data);
        let code = results
            .first()
            .and_then(|r| r.get("CurrentDivision"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ExactError::Api("Could not determine current division".to_string()))?;

        *self.current_division.write().await = Some(code);
        Ok(code)
    }

    /// All divisions accessible to the user, sorted by name.
    pub async fn get_divisions(&self) -> Result<Vec<Division>, ExactError> {
        let current = self.get_current_division().await?;

        let options = QueryOptions {
            select: Some("Code,Description,HID".to_string()),
            orderby: Some("Description".to_string()),
            ..Default::default()
        };
        let data = self.get("hrm/Divisions", current, &options).await?;

        let mut divisions: Vec<Division> = extract_results(&data)
            .iter()
            .filter_map(|item| {
                let code = item.get("Code").and_then(Value::as_i64)?;
                Some(Division {
                    code,
                    name: item
                        .get("Description")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Division {}", code)),
                    is_current: code == current,
                })
            })
            .collect();

        divisions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(divisions)
    }

    /// Fetch sample records plus the field list for an endpoint.
    pub async fn explore_endpoint(
        &self,
        endpoint: &str,
        division: Option<i64>,
        top: usize,
        select: Option<&str>,
        filter: Option<&str>,
    ) -> Result<ExplorationResult, ExactError> {
        let top = top.min(25);

        let division = match division {
            Some(code) => code,
            None => {
                let divisions = self.get_divisions().await?;
                divisions
                    .first()
                    .map(|d| d.code)
                    .ok_or_else(|| ExactError::Api("No accessible divisions found".to_string()))?
            }
        };

        let options = QueryOptions {
            select: select.map(str::to_string),
            filter: filter.map(str::to_string),
            top: Some(top),
            ..Default::default()
        };
        let data = self.get(endpoint, division, &options).await?;
        let results = extract_results(&data);

        let mut available_fields: Vec<String> = results
            .first()
            .and_then(Value::as_object)
            .map(|record| {
                record
                    .keys()
                    .filter(|k| !k.starts_with("__"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        available_fields.sort();

        Ok(ExplorationResult {
            endpoint: endpoint.to_string(),
            division,
            count: results.len(),
            data: results,
            available_fields,
        })
    }

    /// Fetch every record from an endpoint with automatic pagination.
    pub async fn get_all_paginated(
        &self,
        endpoint: &str,
        division: i64,
        select: Option<&str>,
        filter: Option<&str>,
        orderby: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<Value>, ExactError> {
        paginate(page_size, |skip| {
            let options = QueryOptions {
                select: select.map(str::to_string),
                filter: filter.map(str::to_string),
                orderby: orderby.map(str::to_string),
                top: Some(page_size),
                skip: (skip > 0).then_some(skip),
            };
            async move {
                let data = self.get(endpoint, division, &options).await?;
                Ok(extract_results(&data))
            }
        })
        .await
    }

    // =====================================================================
    // Revenue fetch helpers
    // =====================================================================

    /// All processed (Status 50) sales invoices in a date range.
    pub async fn fetch_invoices_for_date_range(
        &self,
        division: i64,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<Value>, ExactError> {
        let date_filter = build_date_filter(start_date, end_date, "InvoiceDate");
        let filter = format!("Status eq 50 and {}", date_filter);

        self.get_all_paginated(
            "salesinvoice/SalesInvoices",
            division,
            Some("InvoiceID,InvoiceDate,AmountDC,InvoiceTo,InvoiceToName"),
            Some(&filter),
            None,
            DEFAULT_PAGE_SIZE,
        )
        .await
    }

    /// Invoice lines carrying a project reference.
    ///
    /// SalesInvoiceLines has no usable date field to filter on; date scoping
    /// happens through the parent invoices.
    pub async fn fetch_invoice_lines_with_projects(
        &self,
        division: i64,
    ) -> Result<Vec<Value>, ExactError> {
        self.get_all_paginated(
            "salesinvoice/SalesInvoiceLines",
            division,
            Some("ID,InvoiceID,Project,AmountDC"),
            Some("Project ne null"),
            None,
            DEFAULT_PAGE_SIZE,
        )
        .await
    }

    /// Project metadata keyed by project GUID.
    pub async fn fetch_projects(
        &self,
        division: i64,
    ) -> Result<HashMap<String, Value>, ExactError> {
        let projects = self
            .get_all_paginated(
                "project/Projects",
                division,
                Some("ID,Code,Description,Account,AccountName"),
                None,
                None,
                DEFAULT_PAGE_SIZE,
            )
            .await?;

        Ok(projects
            .into_iter()
            .filter_map(|p| {
                let id = p.get("ID").and_then(Value::as_str)?.to_string();
                Some((id, p))
            })
            .collect())
    }

    /// Logged hours per project GUID from TimeTransactions.
    pub async fn fetch_time_transactions(
        &self,
        division: i64,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<HashMap<String, f64>, ExactError> {
        let filter = match (start_date, end_date) {
            (Some(start), Some(end)) => Some(build_date_filter(start, end, "Date")),
            _ => None,
        };

        let transactions = self
            .get_all_paginated(
                "project/TimeTransactions",
                division,
                Some("ID,Project,Quantity"),
                filter.as_deref(),
                None,
                DEFAULT_PAGE_SIZE,
            )
            .await?;

        let mut hours: HashMap<String, f64> = HashMap::new();
        for tx in &transactions {
            if let Some(project) = tx.get("Project").and_then(Value::as_str) {
                *hours.entry(project.to_string()).or_default() += f64_field(tx, "Quantity");
            }
        }
        Ok(hours)
    }

    // =====================================================================
    // Financial reporting fetch helpers
    // =====================================================================

    /// Profit & loss overview; a single-record read endpoint.
    pub async fn fetch_profit_loss_overview(
        &self,
        division: i64,
    ) -> Result<ProfitLossOverview, ExactError> {
        let data = self
            .get(
                "read/financial/ProfitLossOverview",
                division,
                &QueryOptions::default(),
            )
            .await?;

        let results = extract_results(&data);
        let Some(record) = results.first() else {
            let current_year = i64::from(chrono::Utc::now().date_naive().year());
            return Ok(ProfitLossOverview {
                division,
                current_year,
                previous_year: current_year - 1,
                currency_code: "EUR".to_string(),
                revenue_current_year: 0.0,
                revenue_previous_year: 0.0,
                costs_current_year: 0.0,
                costs_previous_year: 0.0,
                result_current_year: 0.0,
                result_previous_year: 0.0,
                current_period: 1,
                revenue_current_period: 0.0,
                costs_current_period: 0.0,
                result_current_period: 0.0,
            });
        };

        Ok(ProfitLossOverview {
            division,
            current_year: i64_field(record, "CurrentYear"),
            previous_year: i64_field(record, "PreviousYear"),
            currency_code: str_field(record, "CurrencyCode", "EUR"),
            revenue_current_year: f64_field(record, "RevenueCurrentYear"),
            revenue_previous_year: f64_field(record, "RevenuePreviousYear"),
            costs_current_year: f64_field(record, "CostsCurrentYear"),
            costs_previous_year: f64_field(record, "CostsPreviousYear"),
            result_current_year: f64_field(record, "ResultCurrentYear"),
            result_previous_year: f64_field(record, "ResultPreviousYear"),
            current_period: i64_field(record, "CurrentPeriod").max(1),
            revenue_current_period: f64_field(record, "RevenueCurrentPeriod"),
            costs_current_period: f64_field(record, "CostsCurrentPeriod"),
            result_current_period: f64_field(record, "ResultCurrentPeriod"),
        })
    }

    /// Look up a GL account by its code.
    pub async fn fetch_gl_account_by_code(
        &self,
        division: i64,
        account_code: &str,
    ) -> Result<Option<Value>, ExactError> {
        let safe_code = sanitize_odata_string(account_code)?;
        let options = QueryOptions {
            filter: Some(format!("Code eq '{}'", safe_code)),
            select: Some("ID,Code,Description,BalanceType,Type,TypeDescription".to_string()),
            top: Some(1),
            ..Default::default()
        };
        let data = self.get("financial/GLAccounts", division, &options).await?;
        Ok(extract_results(&data).into_iter().next())
    }

    /// Reporting balance for one GL account, latest period first.
    pub async fn fetch_reporting_balance(
        &self,
        division: i64,
        gl_account_id: &str,
        year: Option<i64>,
        period: Option<i64>,
    ) -> Result<Option<Value>, ExactError> {
        let mut filter_parts = vec![format!("GLAccountID eq guid'{}'", gl_account_id)];
        if let Some(year) = year {
            filter_parts.push(format!("ReportingYear eq {}", year));
        }
        if let Some(period) = period {
            filter_parts.push(format!("ReportingPeriod eq {}", period));
        }

        let options = QueryOptions {
            filter: Some(filter_parts.join(" and ")),
            select: Some(REPORTING_BALANCE_FIELDS.to_string()),
            top: Some(1),
            orderby: Some("ReportingYear desc,ReportingPeriod desc".to_string()),
            ..Default::default()
        };
        let data = self
            .get("financial/ReportingBalance", division, &options)
            .await?;
        Ok(extract_results(&data).into_iter().next())
    }

    /// All balance sheet (BalanceType B) account balances.
    pub async fn fetch_all_balance_sheet_balances(
        &self,
        division: i64,
        year: Option<i64>,
        period: Option<i64>,
    ) -> Result<Vec<Value>, ExactError> {
        let mut filter_parts = vec!["BalanceType eq 'B'".to_string()];
        if let Some(year) = year {
            filter_parts.push(format!("ReportingYear eq {}", year));
        }
        if let Some(period) = period {
            filter_parts.push(format!("ReportingPeriod eq {}", period));
        }

        self.get_all_paginated(
            "financial/ReportingBalance",
            division,
            Some(REPORTING_BALANCE_FIELDS),
            Some(&filter_parts.join(" and ")),
            None,
            DEFAULT_PAGE_SIZE,
        )
        .await
    }

    /// GL account balances with optional filters, ordered by account code.
    pub async fn fetch_filtered_balances(
        &self,
        division: i64,
        balance_type: Option<&str>,
        account_type: Option<i64>,
        year: Option<i64>,
        period: Option<i64>,
    ) -> Result<Vec<GLAccountBalance>, ExactError> {
        let mut filter_parts = Vec::new();
        if let Some(balance_type) = balance_type {
            let safe = sanitize_odata_string(balance_type)?;
            filter_parts.push(format!("BalanceType eq '{}'", safe));
        }
        if let Some(account_type) = account_type {
            filter_parts.push(format!("Type eq {}", account_type));
        }
        if let Some(year) = year {
            filter_parts.push(format!("ReportingYear eq {}", year));
        }
        if let Some(period) = period {
            filter_parts.push(format!("ReportingPeriod eq {}", period));
        }

        let filter = if filter_parts.is_empty() {
            None
        } else {
            Some(filter_parts.join(" and "))
        };

        let records = self
            .get_all_paginated(
                "financial/ReportingBalance",
                division,
                Some(REPORTING_BALANCE_FIELDS),
                filter.as_deref(),
                Some("GLAccountCode"),
                DEFAULT_PAGE_SIZE,
            )
            .await?;

        Ok(records
            .iter()
            .map(reports::gl_account_balance_from_record)
            .collect())
    }

    /// Aging receivables report with fixed day-range buckets.
    pub async fn fetch_aging_receivables(
        &self,
        division: i64,
    ) -> Result<Vec<AgingEntry>, ExactError> {
        let data = self
            .get(
                "read/financial/AgingReceivablesList",
                division,
                &QueryOptions::default(),
            )
            .await?;
        Ok(extract_results(&data)
            .iter()
            .map(reports::aging_entry_from_record)
            .collect())
    }

    /// Aging payables report with fixed day-range buckets.
    pub async fn fetch_aging_payables(&self, division: i64) -> Result<Vec<AgingEntry>, ExactError> {
        let data = self
            .get(
                "read/financial/AgingPayablesList",
                division,
                &QueryOptions::default(),
            )
            .await?;
        Ok(extract_results(&data)
            .iter()
            .map(reports::aging_entry_from_record)
            .collect())
    }

    /// Open receivables (unpaid invoices and credit notes).
    pub async fn fetch_open_receivables(
        &self,
        division: i64,
        top: usize,
        account_code: Option<&str>,
        overdue_only: bool,
    ) -> Result<Vec<OpenReceivable>, ExactError> {
        let mut filters = vec!["IsFullyPaid eq false".to_string()];
        if let Some(code) = account_code {
            let safe = sanitize_odata_string(code.trim())?;
            filters.push(format!("trim(AccountCode) eq '{}'", safe));
        }
        if overdue_only {
            let today = chrono::Utc::now().date_naive().format("%Y-%m-%d");
            filters.push(format!("DueDate lt datetime'{}'", today));
        }

        let options = QueryOptions {
            filter: Some(filters.join(" and ")),
            select: Some(
                "AccountCode,AccountName,InvoiceNumber,InvoiceDate,DueDate,\
                 TransactionAmountDC,AmountDC,Description,PaymentConditionDescription,Currency"
                    .to_string(),
            ),
            top: Some(top.min(1000)),
            orderby: Some("DueDate".to_string()),
            ..Default::default()
        };
        let data = self.get("cashflow/Receivables", division, &options).await?;

        let today = chrono::Utc::now().date_naive();
        Ok(extract_results(&data)
            .iter()
            .map(|r| reports::shape_open_receivable(r, today))
            .collect())
    }

    /// Journal entry lines for one GL account, newest first.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_transaction_lines(
        &self,
        division: i64,
        gl_account_id: &str,
        year: Option<i64>,
        period: Option<i64>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TransactionLine>, ExactError> {
        let mut filter_parts = vec![format!("GLAccount eq guid'{}'", gl_account_id)];
        if let Some(year) = year {
            filter_parts.push(format!("FinancialYear eq {}", year));
        }
        if let Some(period) = period {
            filter_parts.push(format!("FinancialPeriod eq {}", period));
        }
        if let (Some(start), Some(end)) = (start_date, end_date) {
            filter_parts.push(build_date_filter(start, end, "Date"));
        }

        let options = QueryOptions {
            filter: Some(filter_parts.join(" and ")),
            select: Some(
                "ID,Date,FinancialYear,FinancialPeriod,GLAccountCode,GLAccountDescription,\
                 Description,AmountDC,EntryNumber,JournalCode"
                    .to_string(),
            ),
            top: Some(limit),
            orderby: Some("Date desc".to_string()),
            ..Default::default()
        };
        let data = self
            .get("financialtransaction/TransactionLines", division, &options)
            .await?;

        Ok(extract_results(&data)
            .iter()
            .map(reports::transaction_line_from_record)
            .collect())
    }

    // =====================================================================
    // Bank & purchase fetch helpers
    // =====================================================================

    /// Bank statement lines, newest first.
    pub async fn fetch_bank_transactions(
        &self,
        division: i64,
        top: usize,
        start_date: Option<&str>,
        end_date: Option<&str>,
        gl_account_code: Option<&str>,
    ) -> Result<Vec<Value>, ExactError> {
        let mut filters = Vec::new();
        if let Some(start) = start_date {
            filters.push(format!("Date ge datetime'{}'", start));
        }
        if let Some(end) = end_date {
            filters.push(format!("Date le datetime'{}'", end));
        }
        if let Some(code) = gl_account_code {
            let safe = sanitize_odata_string(code.trim())?;
            filters.push(format!("trim(GLAccountCode) eq '{}'", safe));
        }

        let options = QueryOptions {
            filter: (!filters.is_empty()).then(|| filters.join(" and ")),
            select: Some(
                "ID,Date,Description,AmountDC,AccountCode,AccountName,GLAccountCode,\
                 GLAccountDescription,EntryNumber,DocumentSubject,Notes,OurRef"
                    .to_string(),
            ),
            top: Some(top.min(1000)),
            orderby: Some("Date desc".to_string()),
            ..Default::default()
        };
        let data = self
            .get("financialtransaction/BankEntryLines", division, &options)
            .await?;
        Ok(extract_results(&data))
    }

    /// Purchase invoices, newest first. Requires the purchase module; when
    /// missing the provider answers 403 and the division error surfaces.
    pub async fn fetch_purchase_invoices(
        &self,
        division: i64,
        top: usize,
        start_date: Option<&str>,
        end_date: Option<&str>,
        supplier_code: Option<&str>,
    ) -> Result<Vec<Value>, ExactError> {
        let mut filters = Vec::new();
        if let Some(start) = start_date {
            filters.push(format!("InvoiceDate ge datetime'{}'", start));
        }
        if let Some(end) = end_date {
            filters.push(format!("InvoiceDate le datetime'{}'", end));
        }
        if let Some(code) = supplier_code {
            let safe = sanitize_odata_string(code.trim())?;
            filters.push(format!("trim(SupplierCode) eq '{}'", safe));
        }

        let options = QueryOptions {
            filter: (!filters.is_empty()).then(|| filters.join(" and ")),
            select: Some(
                "ID,InvoiceNumber,InvoiceDate,DueDate,SupplierCode,SupplierName,AmountDC,\
                 Currency,Status,StatusDescription,Description,PaymentConditionDescription"
                    .to_string(),
            ),
            top: Some(top.min(1000)),
            orderby: Some("InvoiceDate desc".to_string()),
            ..Default::default()
        };
        let data = self
            .get("purchase/PurchaseInvoices", division, &options)
            .await?;
        Ok(extract_results(&data))
    }
}

/// Extract the record array from an Exact Online response envelope.
///
/// System endpoints answer `{"d": {"results": [...]}}` while the read
/// endpoints answer `{"d": [...]}`; both shapes normalize to a flat vec.
pub fn extract_results(data: &Value) -> Vec<Value> {
    match data.get("d") {
        Some(Value::Object(map)) => map
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Outcome of a single request attempt, as seen by the retry loop.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    /// A response below 400; handed back to the caller as-is.
    Ok(T),
    /// An error status with the Retry-After header (when present) and the
    /// body for statuses whose classification needs it.
    Status {
        code: u16,
        retry_after: Option<u64>,
        body: String,
    },
    /// The request never produced a response.
    Transport { timeout: bool, error: reqwest::Error },
}

/// Retry loop over an attempt closure, up to [`MAX_RETRIES`] attempts.
///
/// 429 sleeps out the Retry-After interval (60 s when absent) and retries;
/// 401 retries immediately (the caller drops its cached token first); 404,
/// 403 and other 4xx/5xx fail on the spot; transport failures back off
/// exponentially. Running out of attempts surfaces the last condition.
pub(crate) async fn send_with_retries<T, F, Fut>(
    url: &str,
    mut send: F,
) -> Result<T, ExactError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Attempt<T>, ExactError>>,
{
    for attempt in 0..MAX_RETRIES {
        match send(attempt).await? {
            Attempt::Ok(value) => return Ok(value),
            Attempt::Status {
                code: 429,
                retry_after,
                ..
            } => {
                let retry_after = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                if attempt + 1 < MAX_RETRIES {
                    tracing::warn!(
                        "Rate limited, waiting {}s (attempt {}/{})",
                        retry_after,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                return Err(ExactError::RateLimited { retry_after });
            }
            Attempt::Status { code: 401, .. } => {
                if attempt + 1 < MAX_RETRIES {
                    tracing::warn!("Auth error, refreshing token...");
                    continue;
                }
                return Err(ExactError::authentication());
            }
            Attempt::Status { code: 404, .. } => {
                let endpoint = url.split("/api/v1/").last().unwrap_or(url).to_string();
                return Err(ExactError::EndpointNotFound { endpoint });
            }
            Attempt::Status { code: 403, .. } => {
                // Division code is filled in by `get`, which knows it.
                return Err(ExactError::DivisionNotAccessible { division: 0 });
            }
            Attempt::Status { code, body, .. } => {
                let message = provider_error_message(&body)
                    .unwrap_or_else(|| format!("API error: {}", code));
                return Err(ExactError::Api(message));
            }
            Attempt::Transport { timeout, error } => {
                if attempt + 1 < MAX_RETRIES {
                    let wait = RETRY_BACKOFF_BASE.pow(attempt);
                    tracing::warn!(
                        "Network error, retrying in {}s (attempt {}/{})",
                        wait,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                let message = if timeout {
                    "Request timed out"
                } else {
                    "Network connection failed"
                };
                return Err(ExactError::Network {
                    message: message.to_string(),
                    source: error,
                });
            }
        }
    }

    Err(ExactError::Api("Max retries exceeded".to_string()))
}

/// Exhaustive multi-page fetch loop.
///
/// Calls `fetch_page` with an advancing skip offset until a page comes back
/// empty or shorter than `page_size`. Ordering and uniqueness of the
/// provider's records are trusted; no de-duplication happens here.
pub async fn paginate<F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<Value>, ExactError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ExactError>>,
{
    let mut all_records = Vec::new();
    let mut skip = 0;

    loop {
        let page = fetch_page(skip).await?;
        if page.is_empty() {
            break;
        }
        let last_page = page.len() < page_size;
        all_records.extend(page);
        if last_page {
            break;
        }
        skip += page_size;
    }

    Ok(all_records)
}

fn provider_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")?
        .get("message")?
        .get("value")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_extract_results_nested_envelope() {
        let data = json!({"d": {"results": [{"Code": 1}, {"Code": 2}]}});
        assert_eq!(extract_results(&data).len(), 2);
    }

    #[test]
    fn test_extract_results_bare_array() {
        let data = json!({"d": [{"Code": 1}]});
        assert_eq!(extract_results(&data).len(), 1);
    }

    #[test]
    fn test_extract_results_missing() {
        assert!(extract_results(&json!({})).is_empty());
        assert!(extract_results(&json!({"d": {}})).is_empty());
        assert!(extract_results(&json!({"d": null})).is_empty());
    }

    #[tokio::test]
    async fn test_paginate_accumulates_all_pages() {
        // Pages of 1000, 1000, 1000, 400: four fetches, 3400 records.
        let pages = [1000usize, 1000, 1000, 400];
        let calls = Cell::new(0usize);

        let records = paginate(1000, |skip| {
            calls.set(calls.get() + 1);
            let index = skip / 1000;
            let size = pages.get(index).copied().unwrap_or(0);
            async move { Ok(vec![json!({"n": index}); size]) }
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 3400);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn test_paginate_stops_on_empty_first_page() {
        let calls = Cell::new(0usize);
        let records = paginate(1000, |_skip| {
            calls.set(calls.get() + 1);
            async move { Ok(Vec::new()) }
        })
        .await
        .unwrap();

        assert!(records.is_empty());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_paginate_full_final_page_needs_one_extra_probe() {
        // 2000 records in pages of exactly 1000: the third fetch returns
        // an empty page and terminates the loop.
        let calls = Cell::new(0usize);
        let records = paginate(1000, |skip| {
            calls.set(calls.get() + 1);
            let size = if skip < 2000 { 1000 } else { 0 };
            async move { Ok(vec![json!({}); size]) }
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 2000);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_paginate_propagates_errors() {
        let result = paginate(1000, |_skip| async move {
            Err(ExactError::Api("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
    }

    fn status<T>(code: u16) -> Attempt<T> {
        Attempt::Status {
            code,
            retry_after: None,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_once_succeeds_on_second_attempt() {
        // First attempt hits a 401, the second goes through with a fresh
        // token; the caller sees only the success.
        let attempts = Cell::new(0u32);
        let result = send_with_retries("https://host/api/v1/crm/Accounts", |attempt| {
            attempts.set(attempts.get() + 1);
            async move {
                if attempt == 0 {
                    Ok(status(401))
                } else {
                    Ok(Attempt::Ok("fresh"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_every_attempt_fails_auth() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = send_with_retries("url", |_attempt| {
            attempts.set(attempts.get() + 1);
            async move { Ok(status(401)) }
        })
        .await;

        assert!(matches!(result, Err(ExactError::Authentication { .. })));
        assert_eq!(attempts.get(), MAX_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honors_retry_after_then_retries() {
        let started = tokio::time::Instant::now();
        let result = send_with_retries("url", |attempt| async move {
            if attempt == 0 {
                Ok(Attempt::Status {
                    code: 429,
                    retry_after: Some(30),
                    body: String::new(),
                })
            } else {
                Ok(Attempt::Ok(json!({"d": []})))
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_every_attempt_gives_up() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = send_with_retries("url", |_attempt| {
            attempts.set(attempts.get() + 1);
            async move {
                Ok(Attempt::Status {
                    code: 429,
                    retry_after: Some(5),
                    body: String::new(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ExactError::RateLimited { retry_after: 5 })
        ));
        assert_eq!(attempts.get(), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_not_found_fails_without_retry() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = send_with_retries(
            "https://start.exactonline.nl/api/v1/123/nope/Thing",
            |_attempt| {
                attempts.set(attempts.get() + 1);
                async move { Ok(status(404)) }
            },
        )
        .await;

        match result {
            Err(ExactError::EndpointNotFound { endpoint }) => {
                assert_eq!(endpoint, "123/nope/Thing");
            }
            other => panic!("expected EndpointNotFound, got {:?}", other),
        }
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_fails_without_retry() {
        let result: Result<(), _> =
            send_with_retries("url", |_attempt| async move { Ok(status(403)) }).await;
        assert!(matches!(
            result,
            Err(ExactError::DivisionNotAccessible { division: 0 })
        ));
    }

    #[tokio::test]
    async fn test_generic_error_uses_provider_message() {
        let result: Result<(), _> = send_with_retries("url", |_attempt| async move {
            Ok(Attempt::Status {
                code: 400,
                retry_after: None,
                body: r#"{"error": {"message": {"value": "Bad filter"}}}"#.to_string(),
            })
        })
        .await;

        match result {
            Err(ExactError::Api(message)) => assert_eq!(message, "Bad filter"),
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_provider_error_message() {
        let body = r#"{"error": {"message": {"value": "Division is blocked"}}}"#;
        assert_eq!(
            provider_error_message(body),
            Some("Division is blocked".to_string())
        );
        assert_eq!(provider_error_message("not json"), None);
        assert_eq!(provider_error_message(r#"{"error": "plain"}"#), None);
    }
}
