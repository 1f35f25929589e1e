pub mod domain;
pub mod mapping;
pub mod matrix;
pub mod money;

pub use domain::{
    AccountType, EngagementId, Fund, FundId, FundRule, FundType, ImportId, ImportStatus,
    LedgerLine, LineId, LineItem, LineItemId, RuleId, StatementKind, TemplateId,
};
pub use mapping::{BalanceStrategy, ColumnMapping, MappingError};
pub use matrix::{CellValue, RawMatrix};
pub use money::Money;
