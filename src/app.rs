use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Datelike, NaiveDate};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::debt::{CustomerBalance, DebtEntry};
use crate::downloader;
use crate::error::PosError;
use crate::inventory::{NewProduct, Product};
use crate::manager::DataManager;
use crate::numeric::parse_date;
use crate::purchases::ImportItem;
use crate::report::{self, StockOrder};
use crate::sales::CartItem;
use crate::saving::{self, FileStore};
use crate::sheet::RowStore;

pub struct AppState {
    dm: Mutex<DataManager<FileStore>>,
    store_name: String,
}

impl AppState {
    pub fn new(dm: DataManager<FileStore>, store_name: &str) -> Self {
        AppState {
            dm: Mutex::new(dm),
            store_name: store_name.to_string(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DataManager<FileStore>>, ApiError> {
        self.dm.lock().map_err(|_| ApiError::Poisoned)
    }
}

/// Error body returned by every endpoint
#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

enum ApiError {
    Pos(PosError),
    BadRequest(String),
    Poisoned,
}

impl From<PosError> for ApiError {
    fn from(e: PosError) -> Self {
        ApiError::Pos(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pos(
                e @ (PosError::ProductNotFound { .. }
                | PosError::SaleNotFound { .. }
                | PosError::WorksheetNotFound { .. }),
            ) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Pos(e) if e.is_user_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Pos(e) => {
                error!("request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Poisoned => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "data manager lock poisoned".to_string(),
            ),
        };
        let body = StatusResponse {
            status: "error".to_string(),
            message: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct CheckoutRequest {
    items: Vec<CartItem>,
    /// Sell on credit to this customer
    customer: Option<String>,
}

#[derive(Deserialize)]
struct ImportRequest {
    items: Vec<ImportItem>,
}

#[derive(Deserialize)]
struct ReturnRequest {
    order_id: String,
    product_id: String,
    quantity: f64,
}

#[derive(Deserialize)]
struct HistoryQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct PeriodQuery {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Deserialize)]
struct StockQuery {
    order: Option<String>,
}

#[derive(Deserialize)]
struct ExpiryQuery {
    days: Option<i64>,
}

#[derive(Deserialize)]
struct DebtRequest {
    customer: String,
    amount: f64,
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

#[derive(Serialize)]
struct CreatedProduct {
    product_id: String,
}

#[derive(Serialize)]
struct CustomerStatement {
    customer: String,
    balance: f64,
    entries: Vec<DebtEntry>,
}

#[derive(Serialize)]
struct StoreInfo {
    store_name: String,
    worksheets: Vec<String>,
    /// Export targets besides worksheet names
    reports: Vec<&'static str>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/info", get(store_info))
        .route("/api/inventory", get(list_inventory))
        .route("/api/products", post(add_product))
        .route("/api/products/:product_id", get(get_product))
        .route("/api/checkout", post(checkout))
        .route("/api/import", post(import_goods))
        .route("/api/return", post(return_goods))
        .route("/api/history", get(sales_history))
        .route("/api/orders/:order_id", get(get_order))
        .route("/api/purchases", get(purchase_history))
        .route("/api/reports/dashboard", get(dashboard))
        .route("/api/reports/month", get(month_report))
        .route("/api/reports/year", get(year_report))
        .route("/api/reports/stock", get(stock_report))
        .route("/api/reports/low", get(low_stock_report))
        .route("/api/reports/expiry", get(expiry_report))
        .route("/api/debt", get(list_balances))
        .route("/api/debt/charge", post(charge_customer))
        .route("/api/debt/pay", post(customer_payment))
        .route("/api/debt/:customer", get(customer_statement))
        .route("/api/export/:target", get(export_target))
        .route("/api/workbook", get(download_workbook).post(upload_workbook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(&config.workbook_path)?;
    let dm = DataManager::with_config(store, &config);
    let app_state = Arc::new(AppState::new(dm, &config.store_name));

    let app = router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(
        "{} listening on http://{} (workbook {})",
        config.store_name,
        config.bind_addr,
        config.workbook_path.display()
    );
    axum::serve(listener, app).await?;

    Ok(())
}

async fn store_info(State(state): State<Arc<AppState>>) -> ApiResult<StoreInfo> {
    let dm = state.lock()?;
    Ok(Json(StoreInfo {
        store_name: state.store_name.clone(),
        worksheets: dm.store().worksheet_names(),
        reports: downloader::REPORT_TARGETS.to_vec(),
    }))
}

async fn list_inventory(
    Query(params): Query<SearchQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<Product>> {
    let mut dm = state.lock()?;
    let products = match params.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => dm.search_products(q)?,
        _ => dm.load_inventory()?,
    };
    Ok(Json(products))
}

async fn get_product(
    Path(product_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Product> {
    let mut dm = state.lock()?;
    Ok(Json(dm.find_product(&product_id)?))
}

async fn add_product(
    State(state): State<Arc<AppState>>,
    Json(product): Json<NewProduct>,
) -> Result<(StatusCode, Json<CreatedProduct>), ApiError> {
    let mut dm = state.lock()?;
    let product_id = dm.add_product(product)?;
    Ok((StatusCode::CREATED, Json(CreatedProduct { product_id })))
}

async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutRequest>,
) -> ApiResult<crate::sales::Receipt> {
    let mut dm = state.lock()?;
    let receipt = match payload.customer {
        Some(customer) => dm.checkout_on_credit(&payload.items, &customer)?,
        None => dm.checkout(&payload.items)?,
    };
    Ok(Json(receipt))
}

async fn import_goods(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ImportRequest>,
) -> ApiResult<crate::purchases::ImportSummary> {
    let mut dm = state.lock()?;
    Ok(Json(dm.process_import(&payload.items)?))
}

async fn return_goods(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReturnRequest>,
) -> ApiResult<crate::sales::Refund> {
    let mut dm = state.lock()?;
    let refund = dm.process_return(&payload.order_id, &payload.product_id, payload.quantity)?;
    Ok(Json(refund))
}

async fn sales_history(
    Query(params): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<crate::sales::SaleRecord>> {
    let dm = state.lock()?;
    let history = dm.load_sales_history()?;
    match params.date {
        Some(raw) => {
            let date = query_date(&raw)?;
            Ok(Json(report::daily_sales(&history, date)))
        }
        None => Ok(Json(history)),
    }
}

async fn get_order(
    Path(order_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<crate::sales::SaleRecord>> {
    let dm = state.lock()?;
    Ok(Json(dm.find_order(&order_id)?))
}

async fn purchase_history(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<crate::purchases::PurchaseRecord>> {
    let dm = state.lock()?;
    Ok(Json(dm.load_purchase_history()?))
}

async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<report::Dashboard> {
    let mut dm = state.lock()?;
    Ok(Json(dm.dashboard()?))
}

async fn month_report(
    Query(params): Query<PeriodQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<report::PeriodReport> {
    let dm = state.lock()?;
    let today = dm.now().date();
    let month = params.month.unwrap_or(today.month());
    if !(1..=12).contains(&month) {
        return Err(ApiError::BadRequest(format!("invalid month {}", month)));
    }
    let history = dm.load_sales_history()?;
    let purchases = dm.load_purchase_history()?;
    Ok(Json(report::monthly_by_day(
        &history,
        &purchases,
        params.year.unwrap_or(today.year()),
        month,
    )))
}

async fn year_report(
    Query(params): Query<PeriodQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<report::PeriodReport> {
    let dm = state.lock()?;
    let year = params.year.unwrap_or(dm.now().date().year());
    let history = dm.load_sales_history()?;
    let purchases = dm.load_purchase_history()?;
    Ok(Json(report::yearly_by_month(&history, &purchases, year)))
}

async fn stock_report(
    Query(params): Query<StockQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<report::Valuation> {
    let order = match params.order {
        Some(raw) => raw.parse::<StockOrder>().map_err(ApiError::BadRequest)?,
        None => StockOrder::default(),
    };
    let mut dm = state.lock()?;
    let products = dm.load_inventory()?;
    Ok(Json(report::inventory_valuation(&products, order)))
}

async fn low_stock_report(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Product>> {
    let mut dm = state.lock()?;
    Ok(Json(report::low_stock(&dm.load_inventory()?)))
}

async fn expiry_report(
    Query(params): Query<ExpiryQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<report::ExpiryAlert>> {
    let mut dm = state.lock()?;
    let today = dm.now().date();
    let products = dm.load_inventory()?;
    Ok(Json(report::expiring(
        &products,
        today,
        params.days.unwrap_or(30),
    )))
}

async fn list_balances(State(state): State<Arc<AppState>>) -> ApiResult<Vec<CustomerBalance>> {
    let dm = state.lock()?;
    Ok(Json(dm.outstanding_balances()?))
}

async fn customer_statement(
    Path(customer): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<CustomerStatement> {
    let dm = state.lock()?;
    let key = customer.trim().to_lowercase();
    let entries: Vec<DebtEntry> = dm
        .load_debt_ledger()?
        .into_iter()
        .filter(|e| e.customer.to_lowercase() == key)
        .collect();
    Ok(Json(CustomerStatement {
        balance: dm.customer_balance(&customer)?,
        customer,
        entries,
    }))
}

async fn charge_customer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DebtRequest>,
) -> ApiResult<DebtEntry> {
    let mut dm = state.lock()?;
    let entry = dm.record_charge(
        &payload.customer,
        payload.amount,
        &payload.order_id,
        &payload.note,
    )?;
    Ok(Json(entry))
}

async fn customer_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DebtRequest>,
) -> ApiResult<DebtEntry> {
    let mut dm = state.lock()?;
    Ok(Json(dm.record_payment(&payload.customer, payload.amount, &payload.note)?))
}

async fn export_target(
    Path(target): Path<String>,
    Query(params): Query<ExportQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let tables = state.lock()?.export_tables(&target)?;

    match params.format.as_deref().unwrap_or("csv") {
        "csv" => {
            let mut text = String::new();
            for table in &tables {
                text.push_str(&downloader::to_csv(table)?);
            }
            Ok(download(
                text.into_bytes(),
                "text/csv; charset=utf-8",
                &format!("{}.csv", target),
            ))
        }
        "xlsx" => Ok(download(
            downloader::to_xlsx(&tables)?,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            &format!("{}.xlsx", target),
        )),
        other => Err(ApiError::BadRequest(format!(
            "unsupported export format {:?}",
            other
        ))),
    }
}

async fn download_workbook(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let dm = state.lock()?;
    let buffer = saving::to_bytes(dm.store().workbook())?;
    Ok(download(buffer, "application/gzip", "pharmacy.bin.gz"))
}

async fn upload_workbook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<StatusResponse> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("No file data received".to_string()));
    }
    let workbook = saving::from_bytes(&body).map_err(|e| {
        warn!("rejected workbook upload: {}", e);
        ApiError::BadRequest(format!("Failed to load workbook: {}", e))
    })?;

    let mut dm = state.lock()?;
    dm.store_mut().replace(workbook)?;
    info!("workbook replaced by upload ({} bytes)", body.len());
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        message: None,
    }))
}

fn download(buffer: Vec<u8>, content_type: &str, filename: &str) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", filename);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(buffer),
    )
        .into_response()
}

fn query_date(raw: &str) -> Result<NaiveDate, ApiError> {
    parse_date(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid date {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_at(path: &std::path::Path) -> Router {
        let dm = DataManager::new(FileStore::open(path).unwrap());
        router(Arc::new(AppState::new(dm, "Nhà thuốc test")))
    }

    async fn status_of(app: Router, method: &str, uri: &str, body: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.bin.gz");

        assert_eq!(
            status_of(app_at(&path), "GET", "/api/products/NOPE", "").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(app_at(&path), "GET", "/api/export/Khac", "").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn bad_requests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.bin.gz");

        assert_eq!(
            status_of(app_at(&path), "POST", "/api/checkout", r#"{"items": []}"#).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                app_at(&path),
                "POST",
                "/api/debt/pay",
                r#"{"customer": "Cô Ba", "amount": 50000}"#
            )
            .await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(app_at(&path), "GET", "/api/export/today?format=pdf", "").await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn store_failures_are_server_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_at(&dir.path().join("shop.bin.gz"));
        drop(dir);

        assert_eq!(
            status_of(app, "POST", "/api/products", r#"{"id": "P1", "name": "Gạc"}"#).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn report_exports_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_at(&dir.path().join("shop.bin.gz"));

        assert_eq!(
            status_of(app, "GET", "/api/export/stock?format=xlsx", "").await,
            StatusCode::OK
        );
    }
}
