use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(EngagementId);
id_type!(ImportId);
id_type!(LineId);
id_type!(FundId);
id_type!(RuleId);
id_type!(TemplateId);
id_type!(LineItemId);

/// Lifecycle of one upload/mapping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    NeedsMapping,
    Imported,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::NeedsMapping => "NEEDS_MAPPING",
            ImportStatus::Imported => "IMPORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEEDS_MAPPING" => Some(ImportStatus::NeedsMapping),
            "IMPORTED" => Some(ImportStatus::Imported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundType {
    Governmental,
    Proprietary,
    Fiduciary,
    ComponentUnitBlended,
    ComponentUnitDiscrete,
}

impl FundType {
    pub fn as_str(self) -> &'static str {
        match self {
            FundType::Governmental => "GOVERNMENTAL",
            FundType::Proprietary => "PROPRIETARY",
            FundType::Fiduciary => "FIDUCIARY",
            FundType::ComponentUnitBlended => "COMPONENT_UNIT_BLENDED",
            FundType::ComponentUnitDiscrete => "COMPONENT_UNIT_DISCRETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOVERNMENTAL" => Some(FundType::Governmental),
            "PROPRIETARY" => Some(FundType::Proprietary),
            "FIDUCIARY" => Some(FundType::Fiduciary),
            "COMPONENT_UNIT_BLENDED" => Some(FundType::ComponentUnitBlended),
            "COMPONENT_UNIT_DISCRETE" => Some(FundType::ComponentUnitDiscrete),
            _ => None,
        }
    }
}

/// Statement-template line item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
    Other,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
            AccountType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ASSET" => Some(AccountType::Asset),
            "LIABILITY" => Some(AccountType::Liability),
            "EQUITY" => Some(AccountType::Equity),
            "REVENUE" => Some(AccountType::Revenue),
            "EXPENSE" => Some(AccountType::Expense),
            "OTHER" => Some(AccountType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    GovernmentalFundsBalanceSheet,
    GovernmentalFundsOperating,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::GovernmentalFundsBalanceSheet => "GOVERNMENTAL_FUNDS_BS",
            StatementKind::GovernmentalFundsOperating => "GOVERNMENTAL_FUNDS_IS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOVERNMENTAL_FUNDS_BS" => Some(StatementKind::GovernmentalFundsBalanceSheet),
            "GOVERNMENTAL_FUNDS_IS" => Some(StatementKind::GovernmentalFundsOperating),
            _ => None,
        }
    }
}

/// One canonical trial-balance row after mapping. Owned by exactly one
/// import; optional fields stay `None` rather than empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub id: Option<LineId>,
    pub account: String,
    pub description: Option<String>,
    pub balance: Money,
    pub audit_group: Option<String>,
    pub audit_subgroup: Option<String>,
    pub fund_code: Option<String>,
}

/// Budgetary sub-entity inferred from account-code structure. Created
/// lazily on first detection; never auto-deleted by re-detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub id: FundId,
    pub fund_code: String,
    pub name: Option<String>,
    pub fund_type: FundType,
    pub is_major: bool,
}

/// Ordered fund-detection rule. `capture_group` follows the regex
/// crate's numbering: group 0 is the entire match, group 1 the first
/// parenthesized group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRule {
    pub id: Option<RuleId>,
    pub name: String,
    pub pattern: String,
    pub capture_group: usize,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub sort_order: i64,
    pub label: String,
    pub account_type: AccountType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trip() {
        for s in [ImportStatus::NeedsMapping, ImportStatus::Imported] {
            assert_eq!(ImportStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ImportStatus::parse("BOGUS"), None);
    }

    #[test]
    fn fund_type_string_round_trip() {
        for t in [
            FundType::Governmental,
            FundType::Proprietary,
            FundType::Fiduciary,
            FundType::ComponentUnitBlended,
            FundType::ComponentUnitDiscrete,
        ] {
            assert_eq!(FundType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn account_type_string_round_trip() {
        for t in [
            AccountType::Asset,
            AccountType::Liability,
            AccountType::Equity,
            AccountType::Revenue,
            AccountType::Expense,
            AccountType::Other,
        ] {
            assert_eq!(AccountType::parse(t.as_str()), Some(t));
        }
    }
}
