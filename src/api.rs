//! HTTP API for the Payroll Engine.
//!
//! This module exposes the payroll service as a JSON REST API using the
//! [`axum`](https://crates.io/crates/axum) framework.  Every route under
//! `/api` requires a session; handlers hand the resolved principal to
//! [`PayrollEngine`] and map its errors to status codes through
//! [`PayrollError`]'s `IntoResponse` impl.

use crate::auth::{Authenticated, Principal, SessionGate, SessionRegistry};
use crate::config::Config;
use crate::engine::PayrollEngine;
use crate::error::{PayrollError, PayrollResult};
use crate::models::{
    Department, DepartmentPatch, DepartmentView, Employee, EmployeePatch, EmployeeView, Id,
    NewSalary, PayrollSummary, ProcessOutcome, SalaryUpdate, SalaryView,
};
use crate::store::DocumentStore;
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, FromRequest, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Application state shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub engine: PayrollEngine<DocumentStore>,
    pub sessions: Arc<dyn SessionGate>,
}

impl FromRef<AppState> for Arc<dyn SessionGate> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.sessions)
    }
}

/// JSON body whose parse failures surface as `VALIDATION_FAILED`.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PayrollError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| PayrollError::ValidationFailed(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}

#[derive(Debug, Deserialize)]
pub struct MonthParam {
    pub month: Option<String>,
}

impl MonthParam {
    fn required(self) -> PayrollResult<String> {
        self.month
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| PayrollError::ValidationFailed("month is required".into()))
    }
}

/// Build the API router around the given state.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/departments", get(list_departments).post(create_department))
        .route(
            "/departments/:id",
            get(get_department).put(update_department).delete(delete_department),
        )
        .route("/employees", get(list_employees).post(create_employee))
        .route(
            "/employees/:id",
            get(get_employee).put(update_employee).delete(delete_employee),
        )
        .route("/salaries", get(list_salaries).post(create_salary))
        .route(
            "/salaries/:id",
            get(get_salary).put(update_salary).delete(delete_salary),
        )
        .route("/salaries/employee/:employee_id", get(list_salaries_by_employee))
        .route("/payroll/summary", get(payroll_summary))
        .route("/payroll/process", post(process_payroll));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

fn parse_id(raw: &str) -> PayrollResult<Id> {
    raw.parse()
        .map_err(|_| PayrollError::ValidationFailed(format!("'{raw}' is not a valid id")))
}

fn deleted(what: &str) -> Json<Value> {
    Json(json!({ "message": format!("{what} deleted successfully") }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Session ─────────────────────────────────────────────────────────

async fn me(Authenticated(principal): Authenticated) -> Json<Principal> {
    Json(principal)
}

async fn logout(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    headers: HeaderMap,
) -> Json<Value> {
    state.sessions.end_session(&headers);
    info!(principal = %principal.email, "logged out");
    Json(json!({ "message": "Logged out successfully" }))
}

// ── Departments ─────────────────────────────────────────────────────

async fn list_departments(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> PayrollResult<Json<Vec<DepartmentView>>> {
    Ok(Json(state.engine.list_departments(&principal)?))
}

async fn get_department(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<DepartmentView>> {
    Ok(Json(state.engine.get_department(&principal, parse_id(&id)?)?))
}

async fn create_department(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    JsonBody(department): JsonBody<Department>,
) -> PayrollResult<impl IntoResponse> {
    let view = state.engine.create_department(&principal, department)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_department(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<DepartmentPatch>,
) -> PayrollResult<Json<DepartmentView>> {
    Ok(Json(state.engine.update_department(&principal, parse_id(&id)?, &patch)?))
}

async fn delete_department(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<Value>> {
    state.engine.delete_department(&principal, parse_id(&id)?)?;
    Ok(deleted("Department"))
}

// ── Employees ───────────────────────────────────────────────────────

async fn list_employees(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> PayrollResult<Json<Vec<EmployeeView>>> {
    Ok(Json(state.engine.list_employees(&principal)?))
}

async fn get_employee(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<EmployeeView>> {
    Ok(Json(state.engine.get_employee(&principal, parse_id(&id)?)?))
}

async fn create_employee(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    JsonBody(employee): JsonBody<Employee>,
) -> PayrollResult<impl IntoResponse> {
    let view = state.engine.create_employee(&principal, employee)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_employee(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<EmployeePatch>,
) -> PayrollResult<Json<EmployeeView>> {
    Ok(Json(state.engine.update_employee(&principal, parse_id(&id)?, &patch)?))
}

async fn delete_employee(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<Value>> {
    state.engine.delete_employee(&principal, parse_id(&id)?)?;
    Ok(deleted("Employee"))
}

// ── Salaries ────────────────────────────────────────────────────────

async fn list_salaries(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> PayrollResult<Json<Vec<SalaryView>>> {
    Ok(Json(state.engine.list_salaries(&principal)?))
}

async fn list_salaries_by_employee(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(employee_id): Path<String>,
) -> PayrollResult<Json<Vec<SalaryView>>> {
    let employee = parse_id(&employee_id)?;
    Ok(Json(state.engine.list_salaries_by_employee(&principal, employee)?))
}

async fn get_salary(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<SalaryView>> {
    Ok(Json(state.engine.get_salary(&principal, parse_id(&id)?)?))
}

async fn create_salary(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    JsonBody(salary): JsonBody<NewSalary>,
) -> PayrollResult<impl IntoResponse> {
    let view = state.engine.create_salary(&principal, salary)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_salary(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    JsonBody(update): JsonBody<SalaryUpdate>,
) -> PayrollResult<Json<SalaryView>> {
    Ok(Json(state.engine.update_salary(&principal, parse_id(&id)?, update)?))
}

async fn delete_salary(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> PayrollResult<Json<Value>> {
    state.engine.delete_salary(&principal, parse_id(&id)?)?;
    Ok(deleted("Salary record"))
}

// ── Payroll ─────────────────────────────────────────────────────────

/// GET /api/payroll/summary?month=YYYY-MM
async fn payroll_summary(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Query(param): Query<MonthParam>,
) -> PayrollResult<Json<PayrollSummary>> {
    let month = param.required()?;
    Ok(Json(state.engine.summarize(&principal, &month)?))
}

/// POST /api/payroll/process `{"month": "YYYY-MM"}`
async fn process_payroll(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    JsonBody(param): JsonBody<MonthParam>,
) -> PayrollResult<Json<ProcessOutcome>> {
    let month = param.required()?;
    Ok(Json(state.engine.process_payroll(&principal, &month)?))
}

// ── Server ──────────────────────────────────────────────────────────

/// Launch the API server with the given configuration.  Blocks until
/// the process receives SIGINT or SIGTERM; the store is then written
/// back to the configured snapshot file, if any.
pub async fn serve(config: Config) -> Result<()> {
    serve_until(config, shutdown_signal()).await
}

/// Like [`serve`], but stops once `shutdown` resolves.
pub async fn serve_until<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = match &config.data_file {
        Some(path) => DocumentStore::load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?,
        None => DocumentStore::new(),
    };
    let store = Arc::new(store);

    let sessions = SessionRegistry::new();
    if let Some(token) = &config.admin_token {
        sessions
            .register(token.clone(), Principal::admin(config.admin_email.clone()))
            .context("registering admin session")?;
        info!(admin = %config.admin_email, "admin session registered");
    }

    let state = AppState {
        engine: PayrollEngine::new(Arc::clone(&store)),
        sessions: Arc::new(sessions),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Server listening on {}", config.listen);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Some(path) = &config.data_file {
        store
            .save(path)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
