use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column-role selection confirmed by the user before an import is
/// finalized. Indices are zero-based into the raw matrix. The account
/// column is structurally required; every other role is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub account: usize,
    pub description: Option<usize>,
    pub final_balance: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub group: Option<usize>,
    pub subgroup: Option<usize>,
    pub fund: Option<usize>,
}

/// How the signed balance of each row is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStrategy {
    FinalBalance(usize),
    DebitCredit { debit: usize, credit: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("choose either a final balance column or both debit and credit columns")]
    MissingBalanceStrategy,
    #[error("final balance and debit/credit columns are mutually exclusive")]
    AmbiguousBalanceStrategy,
}

impl ColumnMapping {
    /// Resolves the balance strategy, rejecting mappings that supply
    /// neither a final balance column nor a complete debit/credit pair,
    /// or that supply both.
    pub fn strategy(&self) -> Result<BalanceStrategy, MappingError> {
        match (self.final_balance, self.debit, self.credit) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                Err(MappingError::AmbiguousBalanceStrategy)
            }
            (Some(col), None, None) => Ok(BalanceStrategy::FinalBalance(col)),
            (None, Some(debit), Some(credit)) => Ok(BalanceStrategy::DebitCredit { debit, credit }),
            _ => Err(MappingError::MissingBalanceStrategy),
        }
    }
}
