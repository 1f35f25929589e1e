use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use acfr_core::{
    ColumnMapping, EngagementId, FundId, FundType, ImportId, LineId, LineItemId, RawMatrix,
    RuleId, TemplateId,
};
use acfr_ingest::{map_rows, read_matrix, suggest_has_headers, FileKind, FundRuleSet};
use acfr_storage as storage;
use acfr_storage::DbPool;

use crate::error::{ApiError, ApiResult};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(pool: DbPool) -> Router {
    Router::new()
        .route("/api/engagements", post(create_engagement))
        .route("/api/engagements/{id}", get(get_engagement))
        .route("/api/engagements/{id}/imports", post(upload_import))
        .route("/api/engagements/{id}/imports/latest", get(latest_import))
        .route("/api/engagements/{id}/imports/current", get(current_import))
        .route("/api/engagements/{id}/funds", get(list_funds))
        .route("/api/engagements/{id}/fund-rules", get(list_fund_rules).post(create_fund_rule))
        .route("/api/engagements/{id}/templates", get(list_templates))
        .route("/api/engagements/{id}/templates/defaults", post(ensure_default_templates))
        .route("/api/engagements/{id}/tb", delete(clear_tb))
        .route("/api/imports/{id}", get(get_import))
        .route("/api/imports/{id}/mapping-data", get(mapping_data))
        .route("/api/imports/{id}/finalize", post(finalize_import))
        .route("/api/imports/{id}/preview", get(import_preview))
        .route("/api/imports/{id}/lines", get(list_lines))
        .route("/api/imports/{id}/groupings", put(update_groupings))
        .route("/api/imports/{id}/grouping-stats", get(grouping_stats))
        .route("/api/imports/{id}/detect-funds", post(detect_funds))
        .route("/api/imports/{id}/statement", get(statement_matrix))
        .route("/api/imports/{id}/cell", get(cell_details).put(save_cell))
        .route("/api/imports/{id}/unassigned-count", get(unassigned_count))
        .route("/api/funds/{id}", patch(update_fund))
        .route("/api/fund-rules/{id}", patch(update_fund_rule))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .with_state(pool)
}

// ---- engagements ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateEngagementRequest {
    name: String,
}

async fn create_engagement(
    State(pool): State<DbPool>,
    Json(req): Json<CreateEngagementRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("engagement name must not be blank".into()));
    }
    let id = storage::create_engagement(&pool, name).await?;
    Ok(Json(json!({ "id": id })))
}

async fn get_engagement(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<storage::Engagement>> {
    Ok(Json(storage::get_engagement(&pool, id).await?))
}

// ---- upload and mapping ---------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    import_id: ImportId,
    file_type: &'static str,
    row_count: usize,
    column_count: usize,
    has_headers_suggested: bool,
}

/// Accepts raw upload bytes, decodes them into a cell matrix, and
/// stages a `NEEDS_MAPPING` import. Nothing is interpreted yet; the
/// caller confirms the column mapping in a second step.
async fn upload_import(
    State(pool): State<DbPool>,
    Path(engagement_id): Path<EngagementId>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    let kind = FileKind::from_filename(&query.filename)?;
    let matrix = read_matrix(&body, kind)?;
    let suggested = matrix.rows().first().is_some_and(|row| suggest_has_headers(row));

    let import_id =
        storage::create_import(&pool, engagement_id, &query.filename, kind.as_str(), suggested, &matrix)
            .await?;

    Ok(Json(UploadResponse {
        import_id,
        file_type: kind.as_str(),
        row_count: matrix.len(),
        column_count: matrix.column_count(),
        has_headers_suggested: suggested,
    }))
}

async fn get_import(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
) -> ApiResult<Json<storage::ImportRecord>> {
    Ok(Json(storage::get_import(&pool, id).await?))
}

async fn latest_import(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Option<storage::ImportRecord>>> {
    Ok(Json(storage::latest_import(&pool, id).await?))
}

async fn current_import(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Option<storage::ImportRecord>>> {
    Ok(Json(storage::latest_imported(&pool, id).await?))
}

#[derive(Debug, Serialize)]
struct MappingData {
    import: storage::ImportRecord,
    matrix: RawMatrix,
    column_count: usize,
    has_headers_suggested: bool,
}

/// Everything the mapping screen needs: the import record, the raw
/// matrix, and the header suggestion recomputed from the stored data.
async fn mapping_data(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
) -> ApiResult<Json<MappingData>> {
    let import = storage::get_import(&pool, id).await?;
    let matrix = storage::get_raw_matrix(&pool, id).await?;
    let has_headers_suggested = matrix.rows().first().is_some_and(|row| suggest_has_headers(row));
    let column_count = matrix.column_count();

    Ok(Json(MappingData {
        import,
        matrix,
        column_count,
        has_headers_suggested,
    }))
}

#[derive(Debug, Deserialize)]
struct FinalizeRequest {
    has_headers: bool,
    header_rows_to_skip: usize,
    mapping: ColumnMapping,
}

/// Applies a confirmed mapping: materializes canonical lines from the
/// stored matrix, then runs fund detection over the fresh lines.
/// Re-finalizing replaces the previous lines wholesale.
async fn finalize_import(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Json(req): Json<FinalizeRequest>,
) -> ApiResult<Json<storage::ImportRecord>> {
    let import = storage::get_import(&pool, id).await?;
    let matrix = storage::get_raw_matrix(&pool, id).await?;

    let mapped = map_rows(&matrix, req.header_rows_to_skip, &req.mapping)?;
    storage::replace_import_lines(
        &pool,
        id,
        &mapped.lines,
        &req.mapping,
        req.has_headers,
        req.header_rows_to_skip as i64,
        mapped.total_balance,
    )
    .await?;

    run_fund_detection(&pool, import.engagement_id, id).await?;

    Ok(Json(storage::get_import(&pool, id).await?))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    #[serde(default = "default_preview_limit")]
    limit: i64,
}

fn default_preview_limit() -> i64 {
    50
}

async fn import_preview(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<Vec<acfr_core::LedgerLine>>> {
    Ok(Json(storage::import_preview(&pool, id, query.limit).await?))
}

// ---- grouping -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LinesQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
    search: Option<String>,
    #[serde(default)]
    ungrouped: bool,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

async fn list_lines(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<Json<storage::LinePage>> {
    let page = storage::list_ledger_lines(
        &pool,
        id,
        query.page,
        query.page_size,
        query.search.as_deref(),
        query.ungrouped,
    )
    .await?;
    Ok(Json(page))
}

async fn update_groupings(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Json(edits): Json<Vec<storage::GroupingEdit>>,
) -> ApiResult<Json<storage::GroupingStats>> {
    storage::bulk_update_groupings(&pool, id, &edits).await?;
    Ok(Json(storage::grouping_stats(&pool, id).await?))
}

async fn grouping_stats(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
) -> ApiResult<Json<storage::GroupingStats>> {
    Ok(Json(storage::grouping_stats(&pool, id).await?))
}

// ---- funds and rules ------------------------------------------------------

async fn list_funds(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Vec<acfr_core::Fund>>> {
    Ok(Json(storage::list_funds(&pool, id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateFundRequest {
    name: Option<String>,
    fund_type: FundType,
    is_major: bool,
}

async fn update_fund(
    State(pool): State<DbPool>,
    Path(id): Path<FundId>,
    Json(req): Json<UpdateFundRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    storage::update_fund(&pool, id, req.name.as_deref(), req.fund_type, req.is_major).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_fund_rules(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Vec<acfr_core::FundRule>>> {
    Ok(Json(storage::list_fund_rules(&pool, id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    name: String,
    pattern: String,
    #[serde(default = "default_capture_group")]
    capture_group: usize,
}

fn default_capture_group() -> usize {
    1
}

/// Creates a detection rule. The pattern must compile before anything
/// is stored; a broken pattern never reaches classification.
async fn create_fund_rule(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
    Json(req): Json<CreateRuleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("rule name must not be blank".into()));
    }

    let rule_id =
        storage::create_fund_rule(&pool, id, name, &req.pattern, req.capture_group).await?;
    Ok(Json(json!({ "id": rule_id })))
}

#[derive(Debug, Deserialize)]
struct UpdateRuleRequest {
    enabled: bool,
}

async fn update_fund_rule(
    State(pool): State<DbPool>,
    Path(id): Path<RuleId>,
    Json(req): Json<UpdateRuleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    storage::set_rule_enabled(&pool, id, req.enabled).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Reruns fund detection over the import's lines with the engagement's
/// current rule list.
async fn detect_funds(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
) -> ApiResult<Json<serde_json::Value>> {
    let import = storage::get_import(&pool, id).await?;
    let detected = run_fund_detection(&pool, import.engagement_id, id).await?;
    Ok(Json(json!({ "detected": detected })))
}

async fn run_fund_detection(
    pool: &DbPool,
    engagement_id: EngagementId,
    import_id: ImportId,
) -> ApiResult<usize> {
    let rules = storage::list_fund_rules(pool, engagement_id).await?;
    let rule_set = FundRuleSet::compile(rules)?;
    let lines = storage::import_lines(pool, import_id).await?;

    let detections: Vec<(LineId, String)> = lines
        .iter()
        .filter_map(|line| {
            let id = line.id?;
            rule_set.detect(&line.account).map(|code| (id, code))
        })
        .collect();

    storage::apply_fund_detection(pool, engagement_id, import_id, &detections).await?;
    Ok(detections.len())
}

// ---- statements -----------------------------------------------------------

async fn ensure_default_templates(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Vec<storage::TemplateRecord>>> {
    storage::ensure_default_templates(&pool, id).await?;
    Ok(Json(storage::list_templates(&pool, id).await?))
}

async fn list_templates(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<Vec<storage::TemplateRecord>>> {
    Ok(Json(storage::list_templates(&pool, id).await?))
}

#[derive(Debug, Deserialize)]
struct StatementQuery {
    template_id: TemplateId,
}

async fn statement_matrix(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Query(query): Query<StatementQuery>,
) -> ApiResult<Json<storage::StatementMatrix>> {
    Ok(Json(storage::build_matrix(&pool, query.template_id, id).await?))
}

#[derive(Debug, Deserialize)]
struct CellQuery {
    fund_code: String,
    line_item_id: LineItemId,
}

async fn cell_details(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Query(query): Query<CellQuery>,
) -> ApiResult<Json<storage::CellDetails>> {
    let details =
        storage::cell_details(&pool, id, &query.fund_code, query.line_item_id).await?;
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
struct SaveCellRequest {
    fund_code: String,
    line_item_id: LineItemId,
    line_ids: Vec<LineId>,
}

async fn save_cell(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
    Json(req): Json<SaveCellRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    storage::save_cell_assignments(&pool, id, &req.fund_code, req.line_item_id, &req.line_ids)
        .await?;
    let remaining = storage::unassigned_count(&pool, id).await?;
    Ok(Json(json!({ "unassigned": remaining })))
}

async fn unassigned_count(
    State(pool): State<DbPool>,
    Path(id): Path<ImportId>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = storage::unassigned_count(&pool, id).await?;
    Ok(Json(json!({ "unassigned": count })))
}

async fn clear_tb(
    State(pool): State<DbPool>,
    Path(id): Path<EngagementId>,
) -> ApiResult<Json<serde_json::Value>> {
    storage::clear_engagement_tb(&pool, id).await?;
    Ok(Json(json!({ "ok": true })))
}
