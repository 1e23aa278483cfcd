//! Curated catalog of known Exact Online API endpoints
//!
//! Static reference data, not derived from the live API. Browsed through the
//! `list_endpoints` tool and meant as a starting point for `explore_endpoint`.

use crate::models::Endpoint;

pub const KNOWN_ENDPOINTS: &[Endpoint] = &[
    // CRM
    Endpoint {
        path: "crm/Accounts",
        category: "crm",
        description: "Customer and supplier accounts",
        typical_use: "Look up customer details, search for accounts by name",
    },
    Endpoint {
        path: "crm/Contacts",
        category: "crm",
        description: "Contact persons linked to accounts",
        typical_use: "Find contact details for a customer",
    },
    Endpoint {
        path: "crm/Addresses",
        category: "crm",
        description: "Addresses linked to accounts",
        typical_use: "Get delivery or invoice addresses",
    },
    // Sales
    Endpoint {
        path: "salesinvoice/SalesInvoices",
        category: "sales",
        description: "Sales invoices header data with amounts and status",
        typical_use: "Revenue analysis, list invoices, check invoice status",
    },
    Endpoint {
        path: "salesinvoice/SalesInvoiceLines",
        category: "sales",
        description: "Invoice line items with project links",
        typical_use: "Project-based revenue, get invoice line details",
    },
    Endpoint {
        path: "salesorder/SalesOrders",
        category: "sales",
        description: "Sales orders header data",
        typical_use: "Track order status, list pending orders",
    },
    Endpoint {
        path: "salesorder/SalesOrderLines",
        category: "sales",
        description: "Line items on sales orders",
        typical_use: "Get order line details",
    },
    // Financial
    Endpoint {
        path: "financial/GLAccounts",
        category: "financial",
        description: "General ledger accounts",
        typical_use: "Look up account codes and descriptions",
    },
    Endpoint {
        path: "financialtransaction/TransactionLines",
        category: "financial",
        description: "Transaction lines (journal entries)",
        typical_use: "Analyze financial transactions",
    },
    Endpoint {
        path: "financialtransaction/BankEntryLines",
        category: "financial",
        description: "Bank statement transaction lines",
        typical_use: "Review bank mutations, match payments",
    },
    Endpoint {
        path: "cashflow/Receivables",
        category: "financial",
        description: "Outstanding receivables",
        typical_use: "Check unpaid invoices, aging analysis",
    },
    Endpoint {
        path: "cashflow/Payables",
        category: "financial",
        description: "Outstanding payables",
        typical_use: "Check bills to pay, cash flow planning",
    },
    Endpoint {
        path: "budget/Budgets",
        category: "financial",
        description: "Budget definitions",
        typical_use: "Review budget allocations",
    },
    Endpoint {
        path: "read/financial/ProfitLossOverview",
        category: "financial",
        description: "Profit & loss summary with year-over-year comparison",
        typical_use: "Get P&L overview, revenue vs costs comparison",
    },
    Endpoint {
        path: "financial/ReportingBalance",
        category: "financial",
        description: "GL account balances by reporting period",
        typical_use: "Check account balances, balance sheet data",
    },
    Endpoint {
        path: "read/financial/AgingReceivablesList",
        category: "financial",
        description: "Outstanding receivables with aging buckets",
        typical_use: "Analyze overdue customer invoices by age",
    },
    Endpoint {
        path: "read/financial/AgingPayablesList",
        category: "financial",
        description: "Outstanding payables with aging buckets",
        typical_use: "Analyze overdue supplier invoices by age",
    },
    Endpoint {
        path: "financial/FinancialPeriods",
        category: "financial",
        description: "Fiscal year and period definitions",
        typical_use: "Get period boundaries for reporting",
    },
    // Project
    Endpoint {
        path: "project/Projects",
        category: "project",
        description: "Project definitions",
        typical_use: "List active projects, project status",
    },
    Endpoint {
        path: "project/TimeTransactions",
        category: "project",
        description: "Time entries on projects",
        typical_use: "Review logged hours, time analysis",
    },
    Endpoint {
        path: "project/CostTransactions",
        category: "project",
        description: "Cost entries on projects",
        typical_use: "Track project costs",
    },
    // Logistics
    Endpoint {
        path: "logistics/Items",
        category: "logistics",
        description: "Product/item master data",
        typical_use: "Look up products, check stock items",
    },
    Endpoint {
        path: "inventory/StockPositions",
        category: "logistics",
        description: "Current stock levels",
        typical_use: "Check inventory, stock availability",
    },
    Endpoint {
        path: "purchaseorder/PurchaseOrders",
        category: "logistics",
        description: "Purchase orders header data",
        typical_use: "Track purchase orders",
    },
    Endpoint {
        path: "purchase/PurchaseInvoices",
        category: "logistics",
        description: "Purchase invoices from suppliers",
        typical_use: "Review supplier invoices, cost analysis",
    },
];

/// Endpoints filtered by category
pub fn endpoints_by_category(category: &str) -> Vec<&'static Endpoint> {
    KNOWN_ENDPOINTS
        .iter()
        .filter(|ep| ep.category == category)
        .collect()
}

/// Sorted list of unique category names
pub fn all_categories() -> Vec<&'static str> {
    let mut categories: Vec<&'static str> = KNOWN_ENDPOINTS.iter().map(|ep| ep.category).collect();
    categories.sort_unstable();
    categories.dedup();
    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_known() {
        let categories = all_categories();
        assert_eq!(
            categories,
            vec!["crm", "financial", "logistics", "project", "sales"]
        );
    }

    #[test]
    fn test_filter_by_category() {
        let crm = endpoints_by_category("crm");
        assert_eq!(crm.len(), 3);
        assert!(crm.iter().all(|ep| ep.category == "crm"));
        assert!(endpoints_by_category("nonexistent").is_empty());
    }

    #[test]
    fn test_paths_are_well_formed() {
        for ep in KNOWN_ENDPOINTS {
            assert!(ep.path.contains('/'), "bad path: {}", ep.path);
        }
    }
}
