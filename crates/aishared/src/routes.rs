use aishare_core::store::person_from_file_name;
use aishare_core::{EnrollError, EnrollOutcome, ModelStore, Scope, StoreError};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, EngineHandle};
use crate::error::ApiError;
use crate::upload::{self, TempImage};

/// Multipart field carrying image files.
const IMAGES_FIELD: &str = "images";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: ModelStore,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/train", post(train))
        .route("/predict", post(predict))
        .route("/models", get(list_models))
        .route("/models/{model_name}", delete(delete_model))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Optional storage scope, from query parameters or form fields.
#[derive(Debug, Default, Deserialize)]
pub struct ScopeParams {
    pub username: Option<String>,
    pub unique_id: Option<String>,
}

impl ScopeParams {
    fn scope(&self) -> Scope {
        Scope::resolve(self.username.as_deref(), self.unique_id.as_deref())
    }
}

/// A parsed multipart upload: text fields plus non-empty image files.
#[derive(Default)]
struct Upload {
    fields: HashMap<String, String>,
    images: Vec<Bytes>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Upload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == IMAGES_FIELD || name == "images[]" {
                let data = field.bytes().await?;
                if !data.is_empty() {
                    upload.images.push(data);
                }
            } else {
                let text = field.text().await?;
                upload.fields.insert(name, text);
            }
        }
        Ok(upload)
    }

    /// A text field, trimmed; blank counts as absent.
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    fn scope(&self) -> Scope {
        Scope::resolve(self.field("username"), self.field("unique_id"))
    }

    async fn stage(self) -> Result<Vec<TempImage>, ApiError> {
        blocking(move || upload::stage_all(&self.images))
            .await?
            .map_err(|e| ApiError::Internal(format!("cannot stage upload: {e}")))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::InvalidName(name) => ApiError::BadRequest(format!("invalid name {name:?}")),
        StoreError::NotFound(path) => ApiError::NotFound(path.display().to_string()),
        other => ApiError::Storage(other.to_string()),
    }
}

async fn train(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = Upload::read(multipart).await?;
    let Some(person) = upload.field("person_name").map(str::to_owned) else {
        return Err(ApiError::BadRequest("Missing person_name or images".into()));
    };
    if upload.images.is_empty() {
        return Err(ApiError::BadRequest("Missing person_name or images".into()));
    }
    let scope = upload.scope();
    tracing::info!(person = %person, ?scope, images = upload.images.len(), "train request");

    let staged = upload.stage().await?;
    let sources = staged.iter().map(TempImage::source).collect();
    let outcome = state.engine.train(scope, person, sources).await;
    drop(staged);

    match outcome {
        Ok(EnrollOutcome::Saved {
            path,
            embeddings,
            skipped,
        }) => {
            tracing::info!(path = %path.display(), embeddings, skipped, "train complete");
            Ok(Json(json!({
                "success": true,
                "model_path": path.display().to_string(),
            })))
        }
        Ok(EnrollOutcome::NoUsableFaces { .. }) => Err(ApiError::TrainingFailed),
        Err(EngineError::Enroll(EnrollError::Store(e @ StoreError::InvalidName(_)))) => Err(store_error(e)),
        Err(e) => {
            tracing::error!(error = %e, "train failed");
            Err(ApiError::TrainingFailed)
        }
    }
}

/// Failures after the request is accepted answer `{"results": {}, "error": ...}`.
async fn predict(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = Upload::read(multipart)
        .await
        .map_err(|e| ApiError::Predict(e.to_string()))?;
    if upload.images.is_empty() {
        return Ok(Json(json!({ "results": {} })));
    }
    let scope = upload.scope();
    tracing::info!(?scope, images = upload.images.len(), "predict request");

    let staged = upload.stage().await.map_err(|e| ApiError::Predict(e.to_string()))?;
    let sources = staged.iter().map(TempImage::source).collect();
    let predictions = state
        .engine
        .predict(scope, sources)
        .await
        .map_err(|e| ApiError::Predict(e.to_string()));
    drop(staged);

    // Every image is listed under each distinct name found in it.
    let mut results: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for prediction in predictions? {
        for name in prediction.names {
            results.entry(name).or_default().push(prediction.png_base64.clone());
        }
    }
    Ok(Json(json!({ "results": results })))
}

async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ScopeParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    let scope = params.scope();
    let models = blocking(move || state.store.list(&scope)).await?.map_err(store_error)?;
    Ok(Json(models))
}

/// Accepts the model file name (`Alice_model.pkl`) or the bare person name.
async fn delete_model(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    Query(params): Query<ScopeParams>,
) -> Result<StatusCode, ApiError> {
    let scope = params.scope();
    let person = person_from_file_name(&model_name).unwrap_or(&model_name).to_string();
    blocking(move || state.store.delete(&scope, &person))
        .await?
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(
    State(state): State<AppState>,
    Query(params): Query<ScopeParams>,
) -> Result<Json<Value>, ApiError> {
    let scope = params.scope();
    let models = blocking(move || state.store.list(&scope)).await?.map_err(store_error)?;
    Ok(Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "models": models.len(),
    })))
}
