pub mod db;
pub mod error;
pub mod funds;
pub mod imports;
pub mod lines;
pub mod statements;

pub use db::{create_db, create_db_in_memory, DbPool};
pub use error::{StorageError, StorageResult};
pub use funds::{
    create_fund_rule, ensure_fund, list_fund_rules, list_funds, set_rule_enabled, update_fund,
};
pub use imports::{
    apply_fund_detection, clear_engagement_tb, create_engagement, create_import, get_engagement,
    get_import, get_raw_matrix, import_lines, import_preview, latest_import, latest_imported,
    replace_import_lines, Engagement, ImportRecord,
};
pub use lines::{
    bulk_update_groupings, grouping_stats, list_ledger_lines, GroupingEdit, GroupingStats,
    LinePage,
};
pub use statements::{
    build_matrix, cell_details, ensure_default_templates, line_items, list_templates,
    save_cell_assignments, unassigned_count, AnnotatedLine, CellDetails, MatrixRow,
    StatementMatrix, TemplateRecord,
};
