use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use veriface_core::{Matcher, ScanMatcher};
use veriface_store::GalleryStore;

use super::error::{ApiError, Result};
use super::state::AppState;
use super::types::*;

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Readiness: the daemon only serves after models loaded, so readiness
/// reports what the current snapshot holds.
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let snapshot = state.index.current_snapshot();
    Json(ReadyResponse {
        ready: true,
        indexed_faces: snapshot.len(),
        snapshot_version: snapshot.version(),
    })
}

pub async fn list_images_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ImagesResponse>> {
    let store = state.store.clone();
    let infos = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(task_panic)??;

    Ok(Json(ImagesResponse {
        images: infos
            .into_iter()
            .map(|info| ImageItem {
                filename: info.id,
                faces: info.faces,
            })
            .collect(),
    }))
}

pub async fn serve_image_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let store = state.store.clone();
    let id = filename.clone();
    let bytes = tokio::task::spawn_blocking(move || store.get(&id))
        .await
        .map_err(task_panic)??;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type_for(&filename))],
        bytes,
    )
        .into_response())
}

/// Upload an image into the gallery.
///
/// Embeds first, so an undecodable upload is rejected before anything is
/// persisted; then the durable store write, then the fast index add.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut overwrite = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::BadRequest("file field carries no filename".into()))?;
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            "overwrite" => {
                let text = field.text().await.map_err(multipart_error)?;
                overwrite = matches!(text.trim(), "1" | "true" | "yes");
            }
            _ => {}
        }
    }

    let (filename, bytes) = file
        .ok_or_else(|| ApiError::BadRequest("no file provided; use form field 'file'".into()))?;

    let outcome = state.engine.embed(bytes.clone()).await?;

    let store = state.store.clone();
    let index = state.index.clone();
    let scheme = state.engine.scheme().to_string();
    let embeddings = outcome.embeddings.clone();
    let id = filename.clone();
    // Both phases stay off the async runtime: the durable write blocks on
    // I/O, and the index add can wait on the writer lock behind a rebuild.
    tokio::task::spawn_blocking(move || -> Result<()> {
        store.put(&id, &bytes, overwrite)?;
        let sha = GalleryStore::content_hash(&bytes);
        store.store_embeddings(&id, &sha, &scheme, &embeddings)?;
        index.add(&id, &scheme, &embeddings)?;
        Ok(())
    })
    .await
    .map_err(task_panic)??;

    tracing::info!(
        filename = %filename,
        faces = outcome.faces_detected(),
        overwrite,
        "image uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            faces: outcome.faces_detected(),
            filename,
        }),
    ))
}

/// Recognize every face in a probe image against the current snapshot.
///
/// Zero detected faces is a successful response with an empty result list,
/// not an error.
pub async fn recognize_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<RecognizeResponse>> {
    let mut image: Option<Vec<u8>> = None;
    let mut threshold: Option<f32> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "image" => {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                image = Some(bytes.to_vec());
            }
            "threshold" => {
                let text = field.text().await.map_err(multipart_error)?;
                threshold = Some(parse_threshold(&text)?);
            }
            _ => {}
        }
    }

    let bytes = image
        .ok_or_else(|| ApiError::BadRequest("no image provided; use form field 'image'".into()))?;
    let threshold = threshold.unwrap_or(state.match_threshold);

    let outcome = state.engine.embed(bytes).await?;

    // Matching runs against whatever snapshot is current right now; an
    // in-flight reload publishes atomically and never blocks this read.
    let snapshot = state.index.current_snapshot();
    let results = outcome
        .embeddings
        .iter()
        .zip(outcome.faces.iter())
        .map(|(embedding, face)| {
            let result = ScanMatcher.best_match(embedding, snapshot.entries(), threshold);
            FaceMatch::new(result, face.clone())
        })
        .collect();

    Ok(Json(RecognizeResponse {
        faces_detected: outcome.faces_detected(),
        results,
    }))
}

/// Compare two gallery entries directly, bypassing the index.
pub async fn compare_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> Result<Json<CompareResponse>> {
    let threshold = match request.threshold {
        Some(value) => validate_threshold(value)?,
        None => state.match_threshold,
    };

    let store = state.store.clone();
    let (a_id, b_id) = (request.a.clone(), request.b.clone());
    let (bytes_a, bytes_b) =
        tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, Vec<u8>)> {
            Ok((store.get(&a_id)?, store.get(&b_id)?))
        })
        .await
        .map_err(task_panic)??;

    let embedding_a = first_face(state.engine.embed(bytes_a).await?, "a", &request.a)?;
    let embedding_b = first_face(state.engine.embed(bytes_b).await?, "b", &request.b)?;

    let distance = embedding_a.cosine_distance(&embedding_b);
    Ok(Json(CompareResponse {
        matched: distance <= threshold,
        distance,
        threshold,
        a: request.a,
        b: request.b,
    }))
}

/// Rebuild the index from durable storage. On failure the previous snapshot
/// stays published and the error is reported to the operator.
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<veriface_store::RebuildStats>> {
    let stats = state.engine.rebuild().await?;
    Ok(Json(stats))
}

/// Best face of a compare side; the detector orders by confidence, so the
/// first embedding belongs to the most confident detection.
fn first_face(
    outcome: veriface_core::EmbedOutcome,
    side: &str,
    filename: &str,
) -> Result<veriface_core::Embedding> {
    outcome
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NoFaceDetected(format!("side '{side}' ({filename})")))
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn parse_threshold(raw: &str) -> Result<f32> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("threshold must be a number, got {raw:?}")))?;
    validate_threshold(value)
}

fn validate_threshold(value: f32) -> Result<f32> {
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::BadRequest(
            "threshold must be a finite non-negative number".into(),
        ));
    }
    Ok(value)
}

fn task_panic(err: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("blocking task failed: {err}"))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("malformed multipart body: {err}"))
}
