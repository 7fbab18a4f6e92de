//! `/agent-profiles` — read-only listing of enabled agent profiles.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::get(list_profiles))
}

#[derive(Debug, Serialize)]
struct ProfileSummary {
    id: String,
    name: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct ProfilesResponse {
    profiles: Vec<ProfileSummary>,
}

async fn list_profiles(State(_state): State<AppState>) -> Result<Json<ProfilesResponse>, AppError> {
    let profiles = conduit_core::config::enabled_agent_profiles()?
        .into_iter()
        .map(|p| ProfileSummary {
            name: p.name.clone().unwrap_or_else(|| p.id.clone()),
            description: p.description.clone().unwrap_or_default(),
            id: p.id,
        })
        .collect();
    Ok(Json(ProfilesResponse { profiles }))
}
