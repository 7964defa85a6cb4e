//! REST API server for the loan origination orchestrator
//!
//! Exposes synchronous and background loan processing plus run lookups.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::models::LoanApplicationRequest;
use crate::pipeline::Orchestrator;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn error_response(e: OrchestrationError) -> ApiResult {
    let status = match &e {
        OrchestrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::ContextConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

fn parse_run_id(raw: &str) -> Result<Uuid, OrchestrationError> {
    Uuid::parse_str(raw)
        .map_err(|_| OrchestrationError::InvalidInput(format!("invalid run id: {}", raw)))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Loan Processing
/// =============================

/// Run the whole pipeline and return the finished run
async fn process_loan(
    State(state): State<ApiState>,
    Json(req): Json<LoanApplicationRequest>,
) -> ApiResult {
    info!(
        customer = %req.customer_name,
        loan_amount = req.loan_amount,
        "Received loan processing request"
    );

    match state.orchestrator.run(req).await {
        Ok(run) => (StatusCode::OK, Json(ApiResponse::success(run))),
        Err(e) => error_response(e),
    }
}

/// Accept the application and drive the pipeline in the background
async fn submit_loan(
    State(state): State<ApiState>,
    Json(req): Json<LoanApplicationRequest>,
) -> ApiResult {
    let run = match state.orchestrator.begin(req).await {
        Ok(run) => run,
        Err(e) => return error_response(e),
    };

    let run_id = run.run_id;
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.drive(run).await;
    });

    info!(run_id = %run_id, "Loan application accepted");

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(serde_json::json!({
            "run_id": run_id,
            "status_url": format!("/api/loan/status/{}", run_id),
        }))),
    )
}

async fn loan_status(State(state): State<ApiState>, Path(run_id): Path<String>) -> ApiResult {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.tracker().load(run_id).await {
        Ok(Some(run)) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "run_id": run.run_id,
                "state": run.state,
                "status": run.status,
                "completed_stages": run.stages.iter().map(|r| r.stage).collect::<Vec<_>>(),
                "decision": run.verdict.as_ref().map(|v| v.decision),
                "failure": run.failure,
            }))),
        ),
        Ok(None) => error_response(OrchestrationError::NotFound(format!("run {}", run_id))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Results
/// =============================

async fn list_results(State(state): State<ApiState>) -> ApiResult {
    match state.orchestrator.sink().list().await {
        Ok(summaries) => (StatusCode::OK, Json(ApiResponse::success(summaries))),
        Err(e) => {
            warn!(error = %e, "Failed to list results");
            error_response(e)
        }
    }
}

async fn get_result(State(state): State<ApiState>, Path(run_id): Path<String>) -> ApiResult {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.sink().get(run_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Ok(None) => error_response(OrchestrationError::NotFound(format!("result {}", run_id))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/loan/process", post(process_loan))
        .route("/api/loan/submit", post(submit_loan))
        .route("/api/loan/status/:run_id", get(loan_status))
        .route("/api/results", get(list_results))
        .route("/api/results/:run_id", get(get_result))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::create_rule_based_registry;
    use crate::sink::InMemoryResultSink;
    use crate::state::InMemoryRunTracker;
    use crate::underwriting::DecisionSynthesizer;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(Arc::new(Orchestrator::new(
            create_rule_based_registry(),
            DecisionSynthesizer::default(),
            Arc::new(InMemoryResultSink::new()),
            Arc::new(InMemoryRunTracker::new()),
        )))
    }

    fn application() -> serde_json::Value {
        serde_json::json!({
            "customer_name": "Kala Divan",
            "loan_amount": 4000000.0,
            "loan_purpose": "Home Loan",
            "tenure_years": 20,
            "contact_number": "+91-9876543210",
            "profile": {
                "age": 30,
                "monthly_income": 150000.0,
                "employment_years": 5.0,
                "existing_emis": 0.0,
                "employment_type": "Salaried",
                "cibil_score": 720,
                "property": {
                    "collateral_type": "residential",
                    "location": "metro",
                    "built_up_area_sqft": 1500.0,
                    "age_years": 5,
                    "construction_quality": "good"
                },
                "document_ids": ["pan", "aadhaar", "salary_slip", "bank_statement", "sale_deed"]
            }
        })
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_process_then_fetch_result() {
        let app = router();

        let (status, body) = call(app.clone(), post_json("/api/loan/process", &application())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);

        let data = body.data.unwrap();
        assert_eq!(data["status"], "completed");
        assert_eq!(data["verdict"]["decision"], "APPROVE");
        let run_id = data["run_id"].as_str().unwrap().to_string();

        let (status, body) = call(
            app.clone(),
            Request::builder()
                .uri(format!("/api/results/{}", run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.data.unwrap()["context_hash"].as_str().is_some());

        let (status, body) = call(
            app,
            Request::builder().uri("/api/results").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_application_is_bad_request() {
        let mut app_json = application();
        app_json["loan_amount"] = serde_json::json!(0.0);

        let (status, body) = call(router(), post_json("/api/loan/process", &app_json)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_submit_returns_accepted_and_status_is_tracked() {
        let app = router();

        let (status, body) = call(app.clone(), post_json("/api/loan/submit", &application())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body.data.unwrap()["run_id"].as_str().unwrap().to_string();

        let (status, body) = call(
            app,
            Request::builder()
                .uri(format!("/api/loan/status/{}", run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["run_id"], run_id);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_run_ids() {
        let (status, _) = call(
            router(),
            Request::builder()
                .uri(format!("/api/loan/status/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            router(),
            Request::builder()
                .uri("/api/results/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
