//! MCP server implementation for Exact Online
//!
//! Exposes read-only reporting and exploration tools over the accounting
//! data. Every tool validates its inputs before any network call and
//! converts failures into structured `{error, action}` payloads; a tool
//! call never crashes the server.

use crate::endpoints::{all_categories, endpoints_by_category, KNOWN_ENDPOINTS};
use crate::error::ExactError;
use crate::mcp::protocol::*;
use crate::odata::client::ExactClient;
use crate::odata::query::parse_odata_date;
use crate::reports::{self, round2, GroupBy};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// MCP server exposing the Exact Online tool surface
pub struct ExactMcpServer {
    client: Arc<ExactClient>,
}

impl ExactMcpServer {
    pub fn new(client: Arc<ExactClient>) -> Self {
        Self { client }
    }

    /// The complete tool catalog.
    pub fn get_tools() -> Vec<Tool> {
        let division = ("division", "integer", "Division code. Defaults to the current division.", false);
        vec![
            Tool {
                name: "list_divisions".to_string(),
                description: "List all Exact Online divisions (administraties) accessible to the authenticated user.".to_string(),
                input_schema: create_tool_schema(vec![]),
            },
            Tool {
                name: "explore_endpoint".to_string(),
                description: "Explore any Exact Online API endpoint with sample data. Returns records plus the list of available fields.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("endpoint", "string", "API endpoint path in 'category/Resource' format, e.g. 'crm/Accounts'", true),
                    division,
                    ("top", "integer", "Maximum records to return (1-25, default 5)", false),
                    ("select", "string", "Comma-separated fields to return (OData $select)", false),
                    ("filter", "string", "OData filter expression, e.g. \"Name eq 'Acme'\"", false),
                ]),
            },
            Tool {
                name: "list_endpoints".to_string(),
                description: "List known Exact Online API endpoints with descriptions, optionally filtered by category.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("category", "string", "Filter by category: crm, sales, financial, project or logistics", false),
                ]),
            },
            Tool {
                name: "get_revenue_by_period".to_string(),
                description: "Revenue totals grouped by month, quarter or year with year-over-year comparison. Based on processed sales invoices only.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("start_date", "string", "Start date (YYYY-MM-DD)", true),
                    ("end_date", "string", "End date (YYYY-MM-DD)", true),
                    ("group_by", "string", "'month', 'quarter' or 'year' (default 'month')", false),
                    division,
                ]),
            },
            Tool {
                name: "get_revenue_by_customer".to_string(),
                description: "Customer revenue ranking with invoice counts and share of total revenue.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("start_date", "string", "Optional start date filter (YYYY-MM-DD)", false),
                    ("end_date", "string", "Optional end date filter (YYYY-MM-DD)", false),
                    ("top", "integer", "Number of top customers to return (1-100, default 10)", false),
                ]),
            },
            Tool {
                name: "get_revenue_by_project".to_string(),
                description: "Project revenue from invoice lines, optionally joined with logged hours from time transactions.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("start_date", "string", "Optional start date filter for hours (YYYY-MM-DD)", false),
                    ("end_date", "string", "Optional end date filter for hours (YYYY-MM-DD)", false),
                    ("include_hours", "boolean", "Whether to fetch logged hours (default true)", false),
                ]),
            },
            Tool {
                name: "get_profit_loss_overview".to_string(),
                description: "Profit & loss summary with current year, previous year and current period figures.".to_string(),
                input_schema: create_tool_schema(vec![division]),
            },
            Tool {
                name: "get_gl_account_balance".to_string(),
                description: "Balance of a single general ledger account for a reporting year/period.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("account_code", "string", "GL account code, e.g. '1300'", true),
                    division,
                    ("year", "integer", "Reporting year (defaults to latest available)", false),
                    ("period", "integer", "Reporting period 1-12", false),
                ]),
            },
            Tool {
                name: "get_balance_sheet_summary".to_string(),
                description: "Balance sheet totals grouped into assets, liabilities and equity categories.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("year", "integer", "Reporting year (default current year)", false),
                    ("period", "integer", "Reporting period 1-12 (default all periods)", false),
                ]),
            },
            Tool {
                name: "list_gl_account_balances".to_string(),
                description: "GL account balances with optional filters on balance type, account type, year and period.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("balance_type", "string", "'B' for balance sheet accounts, 'W' for profit & loss", false),
                    ("account_type", "integer", "Exact Online account type code", false),
                    ("year", "integer", "Reporting year", false),
                    ("period", "integer", "Reporting period 1-12", false),
                ]),
            },
            Tool {
                name: "get_aging_receivables".to_string(),
                description: "Outstanding customer invoices in aging buckets (0-30, 31-60, 61-90, 90+ days).".to_string(),
                input_schema: create_tool_schema(vec![division]),
            },
            Tool {
                name: "get_aging_payables".to_string(),
                description: "Outstanding supplier invoices in aging buckets (0-30, 31-60, 61-90, 90+ days).".to_string(),
                input_schema: create_tool_schema(vec![division]),
            },
            Tool {
                name: "get_gl_account_transactions".to_string(),
                description: "Journal entry lines for a general ledger account, newest first.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("account_code", "string", "GL account code, e.g. '8000'", true),
                    division,
                    ("year", "integer", "Financial year filter", false),
                    ("period", "integer", "Financial period 1-12", false),
                    ("start_date", "string", "Optional start date filter (YYYY-MM-DD)", false),
                    ("end_date", "string", "Optional end date filter (YYYY-MM-DD)", false),
                    ("limit", "integer", "Maximum lines to return (1-1000, default 100)", false),
                ]),
            },
            Tool {
                name: "get_open_receivables".to_string(),
                description: "Unpaid invoices and credit notes with days overdue, from the receivables administration.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("top", "integer", "Maximum items to return (1-1000, default 100)", false),
                    ("account_code", "string", "Filter by customer account code", false),
                    ("overdue_only", "boolean", "Only items past their due date (default false)", false),
                ]),
            },
            Tool {
                name: "list_bank_transactions".to_string(),
                description: "Bank statement lines, newest first, optionally filtered by date range or GL account.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("top", "integer", "Maximum lines to return (1-1000, default 50)", false),
                    ("start_date", "string", "Optional start date filter (YYYY-MM-DD)", false),
                    ("end_date", "string", "Optional end date filter (YYYY-MM-DD)", false),
                    ("gl_account_code", "string", "Filter by bank GL account code", false),
                ]),
            },
            Tool {
                name: "list_purchase_invoices".to_string(),
                description: "Purchase invoices from suppliers, newest first. Requires the purchase module subscription.".to_string(),
                input_schema: create_tool_schema(vec![
                    division,
                    ("top", "integer", "Maximum invoices to return (1-1000, default 50)", false),
                    ("start_date", "string", "Optional start date filter (YYYY-MM-DD)", false),
                    ("end_date", "string", "Optional end date filter (YYYY-MM-DD)", false),
                    ("supplier_code", "string", "Filter by supplier account code", false),
                ]),
            },
        ]
    }

    /// Handle a tool call, converting any failure into a structured payload.
    pub async fn call_tool(&self, name: &str, args: &HashMap<String, Value>) -> CallToolResult {
        let result = match name {
            "list_divisions" => self.list_divisions().await,
            "explore_endpoint" => self.explore_endpoint(args).await,
            "list_endpoints" => self.list_endpoints(args),
            "get_revenue_by_period" => self.get_revenue_by_period(args).await,
            "get_revenue_by_customer" => self.get_revenue_by_customer(args).await,
            "get_revenue_by_project" => self.get_revenue_by_project(args).await,
            "get_profit_loss_overview" => self.get_profit_loss_overview(args).await,
            "get_gl_account_balance" => self.get_gl_account_balance(args).await,
            "get_balance_sheet_summary" => self.get_balance_sheet_summary(args).await,
            "list_gl_account_balances" => self.list_gl_account_balances(args).await,
            "get_aging_receivables" => self.get_aging_receivables(args).await,
            "get_aging_payables" => self.get_aging_payables(args).await,
            "get_gl_account_transactions" => self.get_gl_account_transactions(args).await,
            "get_open_receivables" => self.get_open_receivables(args).await,
            "list_bank_transactions" => self.list_bank_transactions(args).await,
            "list_purchase_invoices" => self.list_purchase_invoices(args).await,
            _ => return CallToolResult::error(format!("Unknown tool: {}", name)),
        };

        match result {
            Ok(payload) => CallToolResult::json(&payload),
            Err(e) => {
                tracing::error!("Tool {} failed: {}", name, e);
                CallToolResult::error_json(&e.to_json())
            }
        }
    }

    async fn resolve_division(&self, args: &HashMap<String, Value>) -> Result<i64, ExactError> {
        match i64_arg(args, "division") {
            Some(code) => Ok(code),
            None => self.client.get_current_division().await,
        }
    }

    async fn list_divisions(&self) -> Result<Value, ExactError> {
        let divisions = self.client.get_divisions().await?;
        Ok(json!({
            "count": divisions.len(),
            "divisions": divisions,
        }))
    }

    async fn explore_endpoint(&self, args: &HashMap<String, Value>) -> Result<Value, ExactError> {
        let endpoint = require_str(args, "endpoint")?;
        if !endpoint.contains('/')
            || endpoint.starts_with('/')
            || endpoint.ends_with('/')
            || endpoint.contains(char::is_whitespace)
        {
            return Err(ExactError::invalid_input(
                format!("Invalid endpoint format: '{}'", endpoint),
                "Endpoint must be in 'category/Resource' format, e.g. 'crm/Accounts'",
            ));
        }

        let top = usize_arg(args, "top").unwrap_or(5).clamp(1, 25);
        let result = self
            .client
            .explore_endpoint(
                endpoint,
                i64_arg(args, "division"),
                top,
                str_arg(args, "select"),
                str_arg(args, "filter"),
            )
            .await?;
        serde_json::to_value(result).map_err(|e| ExactError::Api(e.to_string()))
    }

    fn list_endpoints(&self, args: &HashMap<String, Value>) -> Result<Value, ExactError> {
        match str_arg(args, "category") {
            Some(category) => {
                let entries = endpoints_by_category(category);
                if entries.is_empty() {
                    return Err(ExactError::invalid_input(
                        format!("Unknown category: '{}'", category),
                        format!("Use one of: {}", all_categories().join(", ")),
                    ));
                }
                Ok(json!({
                    "category": category,
                    "count": entries.len(),
                    "endpoints": entries,
                }))
            }
            None => Ok(json!({
                "categories": all_categories(),
                "count": KNOWN_ENDPOINTS.len(),
                "endpoints": KNOWN_ENDPOINTS,
            })),
        }
    }

    async fn get_revenue_by_period(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let start_date = require_str(args, "start_date")?;
        let end_date = require_str(args, "end_date")?;
        let (start, end) = parse_date_range(start_date, end_date)?;
        let group_by: GroupBy = str_arg(args, "group_by")
            .unwrap_or("month")
            .parse()
            .map_err(|e: String| {
                ExactError::invalid_input(e, "Use 'month', 'quarter' or 'year'")
            })?;

        let division = self.resolve_division(args).await?;
        let periods = reports::period_boundaries(group_by, start, end);

        // Previous-year range for the comparison, same offset the provider
        // reports use.
        let prev_start = (start - Duration::days(365)).to_string();
        let prev_end = (end - Duration::days(365)).to_string();
        let prev_periods = reports::period_boundaries(
            group_by,
            start - Duration::days(365),
            end - Duration::days(365),
        );

        let (invoices, prev_invoices) = futures::try_join!(
            self.client
                .fetch_invoices_for_date_range(division, start_date, end_date),
            self.client
                .fetch_invoices_for_date_range(division, &prev_start, &prev_end),
        )?;

        let grouped = reports::group_by_period(&invoices, &periods);
        let prev_grouped = reports::group_by_period(&prev_invoices, &prev_periods);
        let results = reports::revenue_periods(&periods, &grouped, &prev_grouped);

        let total_revenue = round2(results.iter().map(|p| p.revenue).sum());
        let total_invoices: usize = results.iter().map(|p| p.invoice_count).sum();

        Ok(json!({
            "division": division,
            "start_date": start_date,
            "end_date": end_date,
            "group_by": group_by.to_string(),
            "total_revenue": total_revenue,
            "total_invoices": total_invoices,
            "periods": results,
        }))
    }

    async fn get_revenue_by_customer(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let top = usize_arg(args, "top").unwrap_or(10).clamp(1, 100);
        let range = optional_date_range(args)?;
        let division = self.resolve_division(args).await?;

        let invoices = match &range {
            Some((start, end)) => {
                self.client
                    .fetch_invoices_for_date_range(division, &start.to_string(), &end.to_string())
                    .await?
            }
            None => {
                self.client
                    .get_all_paginated(
                        "salesinvoice/SalesInvoices",
                        division,
                        Some("InvoiceID,InvoiceDate,AmountDC,InvoiceTo,InvoiceToName"),
                        Some("Status eq 50"),
                        None,
                        1000,
                    )
                    .await?
            }
        };

        let customers = reports::aggregate_by_customer(&invoices);
        let total_revenue = round2(customers.iter().map(|c| c.revenue).sum());
        let total_invoices: usize = customers.iter().map(|c| c.invoice_count).sum();

        Ok(json!({
            "division": division,
            "start_date": str_arg(args, "start_date"),
            "end_date": str_arg(args, "end_date"),
            "total_revenue": total_revenue,
            "total_invoices": total_invoices,
            "customer_count": customers.len(),
            "customers": customers.into_iter().take(top).collect::<Vec<_>>(),
        }))
    }

    async fn get_revenue_by_project(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        optional_date_range(args)?;
        let include_hours = bool_arg(args, "include_hours").unwrap_or(true);
        let division = self.resolve_division(args).await?;

        let invoice_lines = self.client.fetch_invoice_lines_with_projects(division).await?;
        if invoice_lines.is_empty() {
            return Ok(json!({
                "division": division,
                "total_revenue": 0.0,
                "total_invoices": 0,
                "project_count": 0,
                "hours_available": false,
                "projects": [],
            }));
        }

        let metadata = self.client.fetch_projects(division).await?;

        // The project module may lack time registration; hours are optional.
        let hours = if include_hours {
            match self
                .client
                .fetch_time_transactions(
                    division,
                    str_arg(args, "start_date"),
                    str_arg(args, "end_date"),
                )
                .await
            {
                Ok(hours) => Some(hours),
                Err(e) => {
                    tracing::warn!("Could not fetch time transactions: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let projects = reports::aggregate_by_project(&invoice_lines, &metadata, hours.as_ref());
        let total_revenue = round2(projects.iter().map(|p| p.revenue).sum());
        let total_invoices: usize = projects.iter().map(|p| p.invoice_count).sum();

        Ok(json!({
            "division": division,
            "start_date": str_arg(args, "start_date"),
            "end_date": str_arg(args, "end_date"),
            "total_revenue": total_revenue,
            "total_invoices": total_invoices,
            "project_count": projects.len(),
            "hours_available": hours.is_some(),
            "projects": projects,
        }))
    }

    async fn get_profit_loss_overview(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let division = self.resolve_division(args).await?;
        let overview = self.client.fetch_profit_loss_overview(division).await?;
        serde_json::to_value(overview).map_err(|e| ExactError::Api(e.to_string()))
    }

    async fn get_gl_account_balance(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let account_code = require_str(args, "account_code")?;
        let year = optional_year(args)?;
        let period = optional_period(args)?;
        let division = self.resolve_division(args).await?;

        let account = self
            .client
            .fetch_gl_account_by_code(division, account_code)
            .await?
            .ok_or_else(|| {
                ExactError::invalid_input(
                    format!("GL account '{}' not found", account_code),
                    "Check the account code, or browse accounts with list_gl_account_balances",
                )
            })?;

        let account_id = account
            .get("ID")
            .and_then(Value::as_str)
            .ok_or_else(|| ExactError::Api("GL account record has no ID".to_string()))?;

        let balance = self
            .client
            .fetch_reporting_balance(division, account_id, year, period)
            .await?
            .map(|r| serde_json::to_value(reports::gl_account_balance_from_record(&r)))
            .transpose()
            .map_err(|e| ExactError::Api(e.to_string()))?;

        Ok(json!({
            "division": division,
            "account": {
                "code": account.get("Code"),
                "description": account.get("Description"),
                "type": account.get("Type"),
                "type_description": account.get("TypeDescription"),
            },
            "balance": balance,
        }))
    }

    async fn get_balance_sheet_summary(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let year = optional_year(args)?.unwrap_or_else(|| i64::from(Utc::now().year()));
        let period = optional_period(args)?;
        let division = self.resolve_division(args).await?;

        let balances = self
            .client
            .fetch_all_balance_sheet_balances(division, Some(year), period)
            .await?;
        let summary = reports::aggregate_balances_by_category(
            &balances,
            division,
            year,
            period.unwrap_or(0),
        );
        serde_json::to_value(summary).map_err(|e| ExactError::Api(e.to_string()))
    }

    async fn list_gl_account_balances(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let balance_type = match str_arg(args, "balance_type") {
            Some("B") => Some("B"),
            Some("W") => Some("W"),
            Some(other) => {
                return Err(ExactError::invalid_input(
                    format!("Invalid balance_type: '{}'", other),
                    "Use 'B' for balance sheet accounts or 'W' for profit & loss",
                ))
            }
            None => None,
        };
        let account_type = i64_arg(args, "account_type");
        let year = optional_year(args)?;
        let period = optional_period(args)?;
        let division = self.resolve_division(args).await?;

        let balances = self
            .client
            .fetch_filtered_balances(division, balance_type, account_type, year, period)
            .await?;

        Ok(json!({
            "division": division,
            "count": balances.len(),
            "balances": balances,
        }))
    }

    async fn get_aging_receivables(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let division = self.resolve_division(args).await?;
        let entries = self.client.fetch_aging_receivables(division).await?;
        let total = round2(entries.iter().map(|e| e.total_amount).sum());
        Ok(json!({
            "division": division,
            "count": entries.len(),
            "total_outstanding": total,
            "receivables": entries,
        }))
    }

    async fn get_aging_payables(&self, args: &HashMap<String, Value>) -> Result<Value, ExactError> {
        let division = self.resolve_division(args).await?;
        let entries = self.client.fetch_aging_payables(division).await?;
        let total = round2(entries.iter().map(|e| e.total_amount).sum());
        Ok(json!({
            "division": division,
            "count": entries.len(),
            "total_outstanding": total,
            "payables": entries,
        }))
    }

    async fn get_gl_account_transactions(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let account_code = require_str(args, "account_code")?;
        let year = optional_year(args)?;
        let period = optional_period(args)?;
        let range = optional_date_range(args)?;
        let limit = usize_arg(args, "limit").unwrap_or(100).clamp(1, 1000);
        let division = self.resolve_division(args).await?;

        let account = self
            .client
            .fetch_gl_account_by_code(division, account_code)
            .await?
            .ok_or_else(|| {
                ExactError::invalid_input(
                    format!("GL account '{}' not found", account_code),
                    "Check the account code, or browse accounts with list_gl_account_balances",
                )
            })?;
        let account_id = account
            .get("ID")
            .and_then(Value::as_str)
            .ok_or_else(|| ExactError::Api("GL account record has no ID".to_string()))?;

        let (start, end) = match &range {
            Some((start, end)) => (Some(start.to_string()), Some(end.to_string())),
            None => (None, None),
        };
        let lines = self
            .client
            .fetch_transaction_lines(
                division,
                account_id,
                year,
                period,
                start.as_deref(),
                end.as_deref(),
                limit,
            )
            .await?;

        let total = round2(lines.iter().map(|l| l.amount).sum());
        Ok(json!({
            "division": division,
            "account_code": account_code,
            "account_description": account.get("Description"),
            "count": lines.len(),
            "total_amount": total,
            "transactions": lines,
        }))
    }

    async fn get_open_receivables(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let top = usize_arg(args, "top").unwrap_or(100).clamp(1, 1000);
        let overdue_only = bool_arg(args, "overdue_only").unwrap_or(false);
        let division = self.resolve_division(args).await?;

        let items = self
            .client
            .fetch_open_receivables(division, top, str_arg(args, "account_code"), overdue_only)
            .await?;

        // Credits reduce the outstanding total.
        let total_outstanding = round2(
            items
                .iter()
                .map(|i| {
                    if i.is_credit {
                        -i.remaining_amount
                    } else {
                        i.remaining_amount
                    }
                })
                .sum(),
        );
        let overdue_count = items
            .iter()
            .filter(|i| i.days_overdue > 0 && !i.is_credit)
            .count();

        Ok(json!({
            "division": division,
            "count": items.len(),
            "overdue_count": overdue_count,
            "total_outstanding": total_outstanding,
            "receivables": items,
        }))
    }

    async fn list_bank_transactions(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let top = usize_arg(args, "top").unwrap_or(50).clamp(1, 1000);
        let range = optional_date_range(args)?;
        let division = self.resolve_division(args).await?;

        let (start, end) = match &range {
            Some((start, end)) => (Some(start.to_string()), Some(end.to_string())),
            None => (None, None),
        };
        let mut records = self
            .client
            .fetch_bank_transactions(
                division,
                top,
                start.as_deref(),
                end.as_deref(),
                str_arg(args, "gl_account_code"),
            )
            .await?;

        for record in &mut records {
            normalize_date_field(record, "Date");
        }

        Ok(json!({
            "division": division,
            "count": records.len(),
            "transactions": records,
        }))
    }

    async fn list_purchase_invoices(
        &self,
        args: &HashMap<String, Value>,
    ) -> Result<Value, ExactError> {
        let top = usize_arg(args, "top").unwrap_or(50).clamp(1, 1000);
        let range = optional_date_range(args)?;
        let division = self.resolve_division(args).await?;

        let (start, end) = match &range {
            Some((start, end)) => (Some(start.to_string()), Some(end.to_string())),
            None => (None, None),
        };
        let mut records = self
            .client
            .fetch_purchase_invoices(
                division,
                top,
                start.as_deref(),
                end.as_deref(),
                str_arg(args, "supplier_code"),
            )
            .await?;

        for record in &mut records {
            normalize_date_field(record, "InvoiceDate");
            normalize_date_field(record, "DueDate");
        }

        Ok(json!({
            "division": division,
            "count": records.len(),
            "invoices": records,
        }))
    }
}

// Argument access helpers. MCP clients send numbers both as JSON numbers
// and as strings, so both are accepted.

fn str_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn require_str<'a>(args: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, ExactError> {
    str_arg(args, key).ok_or_else(|| {
        ExactError::invalid_input(
            format!("Missing required parameter: {}", key),
            format!("Provide the '{}' parameter", key),
        )
    })
}

fn i64_arg(args: &HashMap<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn usize_arg(args: &HashMap<String, Value>, key: &str) -> Option<usize> {
    i64_arg(args, key).and_then(|n| usize::try_from(n).ok())
}

fn bool_arg(args: &HashMap<String, Value>, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| {
        v.as_bool()
            .or_else(|| v.as_str().map(|s| s.eq_ignore_ascii_case("true")))
    })
}

fn parse_iso_date(raw: &str) -> Result<NaiveDate, ExactError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ExactError::invalid_input(
            format!("Invalid date format: '{}'", raw),
            "Use ISO format: YYYY-MM-DD",
        )
    })
}

fn parse_date_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), ExactError> {
    let start = parse_iso_date(start)?;
    let end = parse_iso_date(end)?;
    if start > end {
        return Err(ExactError::invalid_input(
            "start_date must be before or equal to end_date",
            "Provide a valid date range in ISO format",
        ));
    }
    Ok((start, end))
}

/// Validate start_date/end_date when both are present; either alone is
/// ignored the same way a missing pair is.
fn optional_date_range(
    args: &HashMap<String, Value>,
) -> Result<Option<(NaiveDate, NaiveDate)>, ExactError> {
    match (str_arg(args, "start_date"), str_arg(args, "end_date")) {
        (Some(start), Some(end)) => parse_date_range(start, end).map(Some),
        _ => Ok(None),
    }
}

fn optional_period(args: &HashMap<String, Value>) -> Result<Option<i64>, ExactError> {
    match i64_arg(args, "period") {
        Some(period) if !(1..=12).contains(&period) => Err(ExactError::invalid_input(
            format!("Invalid period: {}", period),
            "Period must be between 1 and 12",
        )),
        other => Ok(other),
    }
}

fn optional_year(args: &HashMap<String, Value>) -> Result<Option<i64>, ExactError> {
    match i64_arg(args, "year") {
        Some(year) if !(1900..=2100).contains(&year) => Err(ExactError::invalid_input(
            format!("Invalid year: {}", year),
            "Year must be a four-digit calendar year",
        )),
        other => Ok(other),
    }
}

/// Rewrite a legacy `/Date(ms)/` field to an ISO date in place.
fn normalize_date_field(record: &mut Value, key: &str) {
    if let Some(raw) = record.get(key).and_then(Value::as_str) {
        let iso = parse_odata_date(raw);
        if let Some(obj) = record.as_object_mut() {
            obj.insert(key.to_string(), Value::String(iso));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_tool_catalog() {
        let tools = ExactMcpServer::get_tools();
        assert_eq!(tools.len(), 16);

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"list_divisions"));
        assert!(names.contains(&"get_revenue_by_period"));
        assert!(names.contains(&"get_open_receivables"));

        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object");
            assert!(!tool.description.is_empty());
        }
    }

    #[test]
    fn test_arg_helpers_accept_both_encodings() {
        let a = args(&[
            ("division", json!(7095)),
            ("top", json!("25")),
            ("overdue_only", json!("TRUE")),
            ("include_hours", json!(false)),
            ("empty", json!("")),
        ]);
        assert_eq!(i64_arg(&a, "division"), Some(7095));
        assert_eq!(usize_arg(&a, "top"), Some(25));
        assert_eq!(bool_arg(&a, "overdue_only"), Some(true));
        assert_eq!(bool_arg(&a, "include_hours"), Some(false));
        assert_eq!(str_arg(&a, "empty"), None);
        assert_eq!(i64_arg(&a, "missing"), None);
    }

    #[test]
    fn test_require_str() {
        let a = args(&[("account_code", json!("1300"))]);
        assert_eq!(require_str(&a, "account_code").unwrap(), "1300");
        assert!(require_str(&a, "endpoint").is_err());
    }

    #[test]
    fn test_date_range_validation() {
        assert!(parse_date_range("2024-01-01", "2024-03-31").is_ok());
        assert!(parse_date_range("2024-03-31", "2024-01-01").is_err());
        assert!(parse_date_range("01-01-2024", "2024-03-31").is_err());
        assert!(parse_date_range("2024-02-30", "2024-03-31").is_err());
    }

    #[test]
    fn test_optional_date_range_requires_both() {
        let only_start = args(&[("start_date", json!("2024-01-01"))]);
        assert_eq!(optional_date_range(&only_start).unwrap(), None);

        let both = args(&[
            ("start_date", json!("2024-01-01")),
            ("end_date", json!("2024-01-31")),
        ]);
        assert!(optional_date_range(&both).unwrap().is_some());
    }

    #[test]
    fn test_period_and_year_bounds() {
        assert!(optional_period(&args(&[("period", json!(13))])).is_err());
        assert!(optional_period(&args(&[("period", json!(0))])).is_err());
        assert_eq!(
            optional_period(&args(&[("period", json!(6))])).unwrap(),
            Some(6)
        );
        assert_eq!(optional_period(&args(&[])).unwrap(), None);

        assert!(optional_year(&args(&[("year", json!(99))])).is_err());
        assert_eq!(
            optional_year(&args(&[("year", json!(2024))])).unwrap(),
            Some(2024)
        );
    }

    #[test]
    fn test_normalize_date_field() {
        let mut record = json!({"Date": "/Date(1707523200000)/", "Other": 1});
        normalize_date_field(&mut record, "Date");
        assert_eq!(record["Date"], "2024-02-10");

        let mut plain = json!({"Date": "2024-02-10"});
        normalize_date_field(&mut plain, "Date");
        assert_eq!(plain["Date"], "2024-02-10");
    }
}
