// Tally Audit - Findings API Server
// REST API over the findings database, for dashboards and scripted review

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use tally_audit::{db, Severity, StoredFinding, TableCounts};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[derive(Serialize)]
struct SummaryResponse {
    counts: TableCounts,
    findings_by_severity: Vec<SeverityStat>,
    latest_run: Option<String>,
}

#[derive(Serialize)]
struct SeverityStat {
    severity: String,
    count: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/findings - All findings, info and up
async fn get_findings(State(state): State<AppState>) -> impl IntoResponse {
    findings_at(state, Severity::Info)
}

/// GET /api/findings/:severity - Findings at or above a severity
async fn get_findings_filtered(
    State(state): State<AppState>,
    AxumPath(severity): AxumPath<String>,
) -> axum::response::Response {
    match severity.parse::<Severity>() {
        Ok(min) => findings_at(state, min),
        Err(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                data: Vec::<StoredFinding>::new(),
                error: Some(msg),
            }),
        )
            .into_response(),
    }
}

fn findings_at(state: AppState, min: Severity) -> axum::response::Response {
    let conn = state.db.lock().unwrap();
    match db::get_findings(&conn, min) {
        Ok(findings) => (StatusCode::OK, Json(ApiResponse::ok(findings))).into_response(),
        Err(e) => {
            eprintln!("Error getting findings: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::ok(Vec::<StoredFinding>::new())),
            )
                .into_response()
        }
    }
}

/// GET /api/summary - Table counts and per-severity totals
async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let counts = match db::verify_counts(&conn) {
        Ok(counts) => counts,
        Err(e) => {
            eprintln!("Error counting tables: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse {
                    success: false,
                    data: None::<SummaryResponse>,
                    error: Some(e.to_string()),
                }),
            )
                .into_response();
        }
    };

    let findings_by_severity = db::get_finding_counts(&conn)
        .unwrap_or_default()
        .into_iter()
        .map(|(severity, count)| SeverityStat { severity, count })
        .collect();
    let latest_run = db::latest_run_id(&conn).unwrap_or(None);

    (
        StatusCode::OK,
        Json(ApiResponse::ok(Some(SummaryResponse {
            counts,
            findings_by_severity,
            latest_run,
        }))),
    )
        .into_response()
}

#[tokio::main]
async fn main() {
    println!("🖥️  Tally Audit API Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tally-audit.db".to_string());
    let db_path = std::path::Path::new(&db_path);

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: tally-audit import");
        eprintln!("   to import sources first.");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path).expect("Failed to open database");
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/findings", get(get_findings))
        .route("/findings/:severity", get(get_findings_filtered))
        .route("/summary", get(get_summary))
        .with_state(state.clone());

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   Findings: http://localhost:3000/api/findings");
    println!("   Summary:  http://localhost:3000/api/summary");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
