// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web UI for the Stampvault dashboard

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::collection::{browse, portfolio_stats, recent, with_status, CollectionQuery, PortfolioStats};
use crate::config::AppConfig;
use crate::imaging::ImagePayload;
use crate::model::{ExpertStatus, Stamp};
use crate::store::{export_filename, RecordStore};
use crate::StampvaultError;

/// Shared application state
pub struct AppState {
    pub store: Mutex<RecordStore>,
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Pages
        .route("/", get(index_page))
        .route("/collection", get(collection_page))
        .route("/appraisals", get(appraisals_page))
        // API endpoints
        .route("/api/stamps", get(api_list_stamps))
        .route("/api/stamps/:id", get(api_get_stamp).delete(api_delete_stamp))
        .route("/api/stamps/:id/image", get(api_stamp_image))
        .route("/api/stamps/:id/appraisal", post(api_request_appraisal))
        .route("/api/stamps/:id/appraise", post(api_appraise))
        .route("/api/stamps/:id/reject", post(api_reject))
        .route("/api/albums", get(api_get_albums).post(api_add_album))
        .route("/api/stats", get(api_get_stats))
        .route("/api/export", get(api_export))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Store errors as HTTP responses
struct ApiError(StampvaultError);

impl From<StampvaultError> for ApiError {
    fn from(err: StampvaultError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StampvaultError::NotFound(_) => StatusCode::NOT_FOUND,
            StampvaultError::InvalidTransition { .. } | StampvaultError::DuplicateId(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Lock the store and pick up records written by other processes sharing the archive
async fn fresh_store(state: &AppState) -> crate::Result<MutexGuard<'_, RecordStore>> {
    let mut store = state.store.lock().await;
    store.refresh()?;
    Ok(store)
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let store = fresh_store(&state).await?;
    let stats = portfolio_stats(store.stamps());
    Ok(Html(render_index(&stats, recent(store.stamps(), 6))))
}

async fn collection_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectionQuery>,
) -> ApiResult<Html<String>> {
    let store = fresh_store(&state).await?;
    let stamps = browse(store.stamps(), &query);
    Ok(Html(render_collection_page(&stamps, store.albums(), &query)))
}

async fn appraisals_page(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let store = fresh_store(&state).await?;
    let pending: Vec<&Stamp> = with_status(store.stamps(), ExpertStatus::Pending).collect();
    let appraised: Vec<&Stamp> = with_status(store.stamps(), ExpertStatus::Appraised).collect();
    Ok(Html(render_appraisals_page(&pending, &appraised)))
}

// === API Handlers ===

async fn api_list_stamps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectionQuery>,
) -> ApiResult<Json<Vec<Stamp>>> {
    let store = fresh_store(&state).await?;
    Ok(Json(browse(store.stamps(), &query).into_iter().cloned().collect()))
}

async fn api_get_stamp(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Stamp>> {
    let store = fresh_store(&state).await?;
    store
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| StampvaultError::NotFound(id).into())
}

async fn api_stamp_image(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let store = fresh_store(&state).await?;
    let payload = store
        .get(&id)
        .and_then(|s| ImagePayload::from_data_url(&s.image))
        .ok_or(StampvaultError::NotFound(id))?;
    Ok(([(header::CONTENT_TYPE, payload.mime_type)], payload.bytes).into_response())
}

async fn api_delete_stamp(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let mut store = state.store.lock().await;
    if store.remove(&id)? {
        info!("Deleted stamp {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StampvaultError::NotFound(id).into())
    }
}

async fn api_request_appraisal(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Stamp>> {
    let mut store = state.store.lock().await;
    Ok(Json(store.request_appraisal(&id)?))
}

#[derive(Deserialize)]
struct AppraiseBody {
    valuation: Option<String>,
    note: Option<String>,
}

async fn api_appraise(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AppraiseBody>,
) -> ApiResult<Json<Stamp>> {
    let mut store = state.store.lock().await;
    Ok(Json(store.appraise(&id, body.valuation.as_deref(), body.note.as_deref())?))
}

async fn api_reject(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Stamp>> {
    let mut store = state.store.lock().await;
    Ok(Json(store.reject(&id)?))
}

async fn api_get_albums(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    let store = fresh_store(&state).await?;
    Ok(Json(store.albums().to_vec()))
}

#[derive(Deserialize)]
struct AlbumBody {
    name: String,
}

#[derive(Serialize)]
struct AlbumResponse {
    created: bool,
    albums: Vec<String>,
}

async fn api_add_album(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AlbumBody>,
) -> ApiResult<Json<AlbumResponse>> {
    let mut store = state.store.lock().await;
    let created = store.add_album(&body.name)?;
    Ok(Json(AlbumResponse { created, albums: store.albums().to_vec() }))
}

async fn api_get_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<PortfolioStats>> {
    let store = fresh_store(&state).await?;
    Ok(Json(portfolio_stats(store.stamps())))
}

async fn api_export(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let store = fresh_store(&state).await?;
    let json = store.export_json()?;
    let disposition = format!("attachment; filename=\"{}\"", export_filename(Local::now().date_naive()));
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        json,
    )
        .into_response())
}

// === Template Rendering ===

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn base_template(title: &str, content: &str) -> String {
    format!(r#"<!DOCTYPE html>
<html lang="de">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - Stampvault</title>
    <style>
        :root {{
            --bg-primary: #0f172a;
            --bg-card: #1e293b;
            --text-primary: #e2e8f0;
            --text-secondary: #94a3b8;
            --accent: #6366f1;
            --success: #10b981;
            --warning: #f59e0b;
            --border: #334155;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }}
        .container {{ max-width: 1400px; margin: 0 auto; padding: 20px; }}
        nav {{
            background: var(--bg-card);
            padding: 15px 20px;
            display: flex;
            gap: 30px;
            border-bottom: 1px solid var(--border);
        }}
        nav .logo {{ font-weight: bold; color: var(--accent); text-decoration: none; }}
        nav a {{ color: var(--text-secondary); text-decoration: none; }}
        .card {{ background: var(--bg-card); border-radius: 12px; padding: 20px; margin-bottom: 20px; }}
        .stats-grid {{
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }}
        .stat-card {{ background: var(--bg-card); border-radius: 12px; padding: 20px; text-align: center; }}
        .stat-card .number {{ font-size: 2em; font-weight: bold; color: var(--accent); }}
        .stat-card .label {{ color: var(--text-secondary); font-size: 0.9em; }}
        table {{ width: 100%; border-collapse: collapse; }}
        th, td {{ padding: 10px; text-align: left; border-bottom: 1px solid var(--border); }}
        th {{ color: var(--text-secondary); font-weight: 500; }}
        img.thumb {{ width: 48px; height: 48px; object-fit: cover; border-radius: 6px; }}
        .badge {{ padding: 2px 8px; border-radius: 6px; font-size: 0.8em; }}
        .badge.appraised {{ background: var(--success); }}
        .badge.pending {{ background: var(--warning); }}
    </style>
</head>
<body>
    <nav>
        <a href="/" class="logo">Stampvault</a>
        <a href="/">Dashboard</a>
        <a href="/collection">Archiv</a>
        <a href="/appraisals">Begutachtung</a>
    </nav>
    <main class="container">
        {}
    </main>
</body>
</html>"#, escape_html(title), content)
}

fn status_badge(status: ExpertStatus) -> &'static str {
    match status {
        ExpertStatus::None => "",
        ExpertStatus::Pending => r#"<span class="badge pending">Angefragt</span>"#,
        ExpertStatus::Appraised => r#"<span class="badge appraised">Verifiziert</span>"#,
    }
}

fn thumbnail(stamp: &Stamp) -> String {
    if stamp.image.is_empty() {
        return String::new();
    }
    format!(r#"<img class="thumb" src="/api/stamps/{}/image" alt="">"#, escape_html(&stamp.id))
}

fn render_stamps_table(stamps: &[&Stamp]) -> String {
    if stamps.is_empty() {
        return "<p>Keine Marken gefunden.</p>".to_string();
    }

    let rows: String = stamps.iter()
        .map(|s| format!(r#"
                <tr>
                    <td>{}</td>
                    <td>{} {}</td>
                    <td>{}</td>
                    <td>{}</td>
                    <td>{}</td>
                    <td>{}</td>
                </tr>
            "#,
            thumbnail(s),
            escape_html(&s.name),
            status_badge(s.expert_status),
            escape_html(&s.origin),
            escape_html(&s.year),
            escape_html(s.effective_value()),
            escape_html(&s.album),
        ))
        .collect();

    format!(r#"
        <table>
            <tr><th></th><th>Name</th><th>Herkunft</th><th>Jahr</th><th>Wert</th><th>Album</th></tr>
            {}
        </table>
    "#, rows)
}

fn render_index(stats: &PortfolioStats, latest: &[Stamp]) -> String {
    let stats_html = format!(r#"
        <div class="stats-grid">
            <div class="stat-card"><div class="number">{}</div><div class="label">Portfoliowert</div></div>
            <div class="stat-card"><div class="number">{}</div><div class="label">Marken</div></div>
            <div class="stat-card"><div class="number">{}</div><div class="label">Verifiziert</div></div>
            <div class="stat-card"><div class="number">{}</div><div class="label">In Prüfung</div></div>
        </div>
    "#, stats.total_value_display, stats.stamp_count, stats.appraised_count, stats.pending_count);

    let albums_html: String = stats.albums.iter()
        .map(|(album, count)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(album), count))
        .collect();

    let latest: Vec<&Stamp> = latest.iter().collect();
    let content = format!(r#"
        <h1>Dashboard</h1>
        {}
        <div style="display: grid; grid-template-columns: 2fr 1fr; gap: 20px;">
            <div class="card"><h2>Zuletzt erfasst</h2>{}</div>
            <div class="card">
                <h2>Alben</h2>
                <table><tr><th>Album</th><th>Marken</th></tr>{}</table>
            </div>
        </div>
    "#, stats_html, render_stamps_table(&latest), albums_html);

    base_template("Dashboard", &content)
}

fn render_collection_page(stamps: &[&Stamp], albums: &[String], query: &CollectionQuery) -> String {
    let selected = query.album.as_deref().unwrap_or(crate::collection::ALL_ALBUMS);
    let options: String = std::iter::once(crate::collection::ALL_ALBUMS.to_string())
        .chain(albums.iter().cloned())
        .map(|a| {
            let sel = if a == selected { " selected" } else { "" };
            format!(r#"<option value="{0}"{1}>{0}</option>"#, escape_html(&a), sel)
        })
        .collect();

    let content = format!(r#"
        <h1>Archiv</h1>
        <div class="card">
            <form method="get">
                <input type="text" name="search" value="{}" placeholder="Archiv durchsuchen...">
                <select name="album">{}</select>
                <button type="submit">Filtern</button>
            </form>
        </div>
        <div class="card">{}</div>
    "#, escape_html(&query.search), options, render_stamps_table(stamps));

    base_template("Archiv", &content)
}

fn render_appraisals_page(pending: &[&Stamp], appraised: &[&Stamp]) -> String {
    let appraised_rows: String = appraised.iter()
        .map(|s| format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&s.name),
            escape_html(s.expert_valuation.as_deref().unwrap_or("")),
            escape_html(s.expert_note.as_deref().unwrap_or("")),
        ))
        .collect();

    let content = format!(r#"
        <h1>Begutachtung</h1>
        <div class="card"><h2>Offene Anfragen ({})</h2>{}</div>
        <div class="card">
            <h2>Abgeschlossen ({})</h2>
            <table><tr><th>Name</th><th>Expertenwert</th><th>Notiz</th></tr>{}</table>
        </div>
    "#, pending.len(), render_stamps_table(pending), appraised.len(), appraised_rows);

    base_template("Begutachtung", &content)
}

/// Start the web server with config and the loaded collection
pub async fn start_server(config: AppConfig, store: RecordStore) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState { store: Mutex::new(store) });

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Web UI available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router).await
        .map_err(|e| StampvaultError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStorage;
    use crate::model::StampDraft;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn stamp(name: &str, image: &str) -> Stamp {
        let draft = StampDraft {
            name: Some(name.to_string()),
            estimated_value: Some("100,00 €".into()),
            ..Default::default()
        };
        Stamp::from_draft(&draft, image.to_string(), "Master Archiv")
    }

    fn state_on(backend: Arc<MemoryStorage>, names: &[&str]) -> (Arc<AppState>, Vec<String>) {
        let mut store = RecordStore::load(backend, &["Master Archiv".to_string()]).unwrap();
        let mut ids = Vec::new();
        for name in names {
            let stamp = stamp(name, "");
            ids.push(stamp.id.clone());
            store.add(stamp).unwrap();
        }
        (Arc::new(AppState { store: Mutex::new(store) }), ids)
    }

    fn state_with(names: &[&str]) -> (Arc<AppState>, Vec<String>) {
        state_on(Arc::new(MemoryStorage::new()), names)
    }

    async fn send(state: Arc<AppState>, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder.body(Body::from(body.unwrap_or("").to_string())).unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_list_and_search() {
        let (state, _) = state_with(&["Penny Black", "Inverted Jenny"]);

        let (status, body) = send(state.clone(), "GET", "/api/stamps", None).await;
        assert_eq!(status, StatusCode::OK);
        let stamps: Vec<Stamp> = serde_json::from_str(&body).unwrap();
        assert_eq!(stamps.len(), 2);

        let (_, body) = send(state, "GET", "/api/stamps?search=jenny&sort=name&order=asc", None).await;
        let stamps: Vec<Stamp> = serde_json::from_str(&body).unwrap();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].name, "Inverted Jenny");
    }

    #[tokio::test]
    async fn test_appraisal_flow_over_http() {
        let (state, ids) = state_with(&["Sachsen Dreier"]);
        let id = &ids[0];

        let (status, _) = send(state.clone(), "POST", &format!("/api/stamps/{}/appraise", id), Some("{}")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(state.clone(), "POST", &format!("/api/stamps/{}/appraisal", id), None).await;
        assert_eq!(status, StatusCode::OK);

        let body = r#"{"valuation": "120,00 €", "note": "Echt, Attest vorhanden."}"#;
        let (status, body) = send(state.clone(), "POST", &format!("/api/stamps/{}/appraise", id), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let stamp: Stamp = serde_json::from_str(&body).unwrap();
        assert_eq!(stamp.expert_status, ExpertStatus::Appraised);
        assert_eq!(stamp.expert_valuation.as_deref(), Some("120,00 €"));
        assert_eq!(stamp.expert_note.as_deref(), Some("Echt, Attest vorhanden."));

        let (_, page) = send(state, "GET", "/appraisals", None).await;
        assert!(page.contains("Echt, Attest vorhanden."));
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let (state, ids) = state_with(&["Delete me"]);

        let (status, _) = send(state.clone(), "DELETE", &format!("/api/stamps/{}", ids[0]), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(state.clone(), "GET", &format!("/api/stamps/{}", ids[0]), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(state, "DELETE", "/api/stamps/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_albums_and_stats() {
        let (state, _) = state_with(&["A", "B"]);

        let (status, body) = send(state.clone(), "POST", "/api/albums", Some(r#"{"name": "Sowjetunion"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"created\":true"));

        let (_, body) = send(state.clone(), "GET", "/api/albums", None).await;
        let albums: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(albums, ["Master Archiv", "Sowjetunion"]);

        let (_, body) = send(state, "GET", "/api/stats", None).await;
        let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats["stamp_count"], 2);
        assert_eq!(stats["total_value_display"], "€200,00");
    }

    #[tokio::test]
    async fn test_export_is_dated_attachment() {
        let (state, _) = state_with(&["Exported"]);
        let request = Request::builder().uri("/api/export").body(Body::empty()).unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("PhilatelyAI_Export_"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stamps: Vec<Stamp> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stamps[0].name, "Exported");
    }

    #[tokio::test]
    async fn test_stamp_image_served_from_archive() {
        let (state, _) = state_with(&[]);
        let png = ImagePayload { mime_type: "image/png".into(), bytes: vec![0x89, b'P', b'N', b'G'] };
        let with_image = stamp("Bild", &png.to_data_url());
        let id = with_image.id.clone();
        state.store.lock().await.add(with_image).unwrap();

        let request = Request::builder().uri(format!("/api/stamps/{}/image", id)).body(Body::empty()).unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.to_vec(), png.bytes);

        let (_, page) = send(state.clone(), "GET", "/collection", None).await;
        assert!(page.contains(&format!("/api/stamps/{}/image", id)));
        assert!(!page.contains("data:image/png"));

        let (status, _) = send(state, "GET", "/api/stamps/unknown/image", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stamp_without_image_has_no_picture() {
        let (state, ids) = state_with(&["Ohne Bild"]);
        let (status, _) = send(state.clone(), "GET", &format!("/api/stamps/{}/image", ids[0]), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, page) = send(state, "GET", "/collection", None).await;
        assert!(!page.contains("<img"));
    }

    #[tokio::test]
    async fn test_reads_see_records_written_by_another_store() {
        let backend = Arc::new(MemoryStorage::new());
        let (state, _) = state_on(backend.clone(), &["Vom Server"]);

        let mut cli = RecordStore::load(backend, &["Master Archiv".to_string()]).unwrap();
        cli.add(stamp("Vom Scanner", "")).unwrap();

        let (_, body) = send(state.clone(), "GET", "/api/stamps", None).await;
        let stamps: Vec<Stamp> = serde_json::from_str(&body).unwrap();
        let names: Vec<&str> = stamps.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Vom Scanner"));
        assert!(names.contains(&"Vom Server"));

        let (status, _) = send(state.clone(), "POST", "/api/albums", Some(r#"{"name": "Helgoland"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        cli.refresh().unwrap();
        assert_eq!(cli.len(), 2);
        assert!(cli.albums().iter().any(|a| a == "Helgoland"));
    }

    #[tokio::test]
    async fn test_dashboard_escapes_names() {
        let (state, _) = state_with(&["<script>alert(1)</script>"]);
        let (status, page) = send(state, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>alert"));
    }
}
