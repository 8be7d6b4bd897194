//! Template handlers (minimal: templates exist as the ownership anchor for
//! runs; authoring UX lives elsewhere)

use crate::api::require_teacher;
use crate::db::queries;
use crate::error::ApiError;
use crate::models::{SessionTemplate, TemplateCreateRequest};
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::info;

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TemplateCreateRequest>,
) -> Result<Json<SessionTemplate>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("template title is required".into()));
    }
    if title.chars().count() > 200 {
        return Err(ApiError::Validation(
            "template title must be 200 characters or fewer".into(),
        ));
    }
    if !req.settings.is_object() && !req.settings.is_null() {
        return Err(ApiError::Validation(
            "template settings must be a JSON object".into(),
        ));
    }

    let settings = if req.settings.is_null() {
        serde_json::json!({})
    } else {
        req.settings
    };

    let template = queries::create_template(&state.db, teacher.id, title, &settings).await?;
    info!(template_id = template.id, teacher_id = teacher.id, "Template created");
    Ok(Json(template))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionTemplate>>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    let templates = queries::list_templates(&state.db, teacher.id).await?;
    Ok(Json(templates))
}
