pub mod header;
pub mod mapper;
pub mod reader;
pub mod rules;

pub use header::suggest_has_headers;
pub use mapper::{map_rows, parse_money, MappedImport};
pub use reader::{read_matrix, FileKind, FormatError};
pub use rules::{FundRuleSet, RuleError};
