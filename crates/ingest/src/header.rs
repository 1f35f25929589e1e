use acfr_core::CellValue;

/// Header words commonly seen on the first row of a trial balance
/// export, plus close synonyms.
const HEADER_VOCABULARY: &[&str] = &[
    "account",
    "acct",
    "account number",
    "account no",
    "description",
    "desc",
    "name",
    "balance",
    "final balance",
    "ending balance",
    "amount",
    "debit",
    "dr",
    "credit",
    "cr",
    "group",
    "subgroup",
    "fund",
];

/// Suggests whether the first row looks like a header row: at least two
/// cells must match the vocabulary after lowercase trimming. Advisory
/// only; the user confirms the actual rows to skip.
pub fn suggest_has_headers(first_row: &[CellValue]) -> bool {
    let hits = first_row
        .iter()
        .filter_map(|cell| cell.trimmed())
        .filter(|text| HEADER_VOCABULARY.contains(&text.to_lowercase().as_str()))
        .count();
    hits >= 2
}
