//! `/webhooks/prometheus` — Alertmanager-shaped webhook intake that turns a
//! firing alert into a run.
//!
//! Grounded line-for-line on `original_source/app/api/v1/routes/webhooks.py`:
//! HMAC-SHA256 signature verification over the raw body (`X-Webhook-Token`),
//! a sorted-label-pairs SHA-256 fingerprint for dedup, a concurrency cap
//! that fails open on its own check error, and recording the dedup entry
//! before the run is created to close the race window.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/prometheus", axum::routing::post(prometheus_webhook))
}

#[derive(Debug, Deserialize)]
struct AlertmanagerPayload {
    #[serde(default)]
    alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
struct Alert {
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    annotations: std::collections::BTreeMap<String, String>,
}

fn alert_summary(alert: &Alert) -> String {
    let base = alert
        .annotations
        .get("summary")
        .or_else(|| alert.annotations.get("description"))
        .cloned()
        .unwrap_or_else(|| {
            alert
                .labels
                .get("alertname")
                .cloned()
                .unwrap_or_else(|| "unknown alert".to_string())
        });
    match alert.labels.get("instance") {
        Some(instance) => format!("{base} (instance={instance})"),
        None => base,
    }
}

fn alert_fingerprint(alert: &Alert) -> String {
    let mut pairs: Vec<String> = alert.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    let joined = pairs.join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

fn verify_signature(secret: &str, body: &[u8], provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

async fn prometheus_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if state.settings.webhook_require_auth {
        match &state.settings.webhook_secret {
            Some(secret) => {
                let provided = headers.get("X-Webhook-Token").and_then(|v| v.to_str().ok());
                if !verify_signature(secret, &body, provided) {
                    return Ok((StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "invalid signature"}))).into_response());
                }
            }
            None => {
                tracing::warn!("webhook auth required but no WEBHOOK_SECRET configured; rejecting all requests");
                return Ok((StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "webhook not configured"}))).into_response());
            }
        }
    }

    let payload: AlertmanagerPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid alertmanager payload: {e}")))?;

    let firing: Vec<&Alert> = payload.alerts.iter().filter(|a| a.status == "firing").collect();
    if firing.is_empty() {
        return Ok(Json(json!({"ok": true, "message": "no firing alerts", "alerts_count": 0})).into_response());
    }

    let alert = firing[0];
    let fingerprint = alert_fingerprint(alert);
    if state.webhook_dedup.is_duplicate(&fingerprint) {
        return Ok(Json(json!({
            "ok": true,
            "deduplicated": true,
            "alerts_count": firing.len(),
        }))
        .into_response());
    }

    match state.container.store.count_running() {
        Ok(running) if running >= state.settings.webhook_max_concurrent_runs => {
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(json!({"ok": false, "error": "too many concurrent runs"})))
                    .into_response();
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from_static("60"));
            return Ok(response);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "concurrency cap check failed; proceeding (fail-open)");
        }
    }

    state.webhook_dedup.record(&fingerprint);

    let summary = alert_summary(alert);
    let goal = format!("Diagnose and suggest remediation for: {summary}");
    let default_profile = "default";
    if conduit_core::config::find_agent_profile(default_profile)?.is_none() {
        return Err(AppError::BadRequest(
            "no default agent profile configured for webhook-triggered runs".into(),
        ));
    }

    let run = state.container.store.create_run(
        &goal,
        default_profile,
        &std::collections::HashMap::new(),
        None,
        false,
    )?;
    state.container.dispatch(&run.run_id);

    Ok(Json(json!({
        "ok": true,
        "run_id": run.run_id,
        "goal": goal,
        "status": run.status.as_str(),
        "alerts_count": firing.len(),
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_annotation_then_falls_back_to_alertname() {
        let mut alert = Alert {
            status: "firing".into(),
            labels: std::collections::BTreeMap::new(),
            annotations: std::collections::BTreeMap::new(),
        };
        alert.labels.insert("alertname".into(), "HighLatency".into());
        assert_eq!(alert_summary(&alert), "HighLatency");

        alert.annotations.insert("summary".into(), "p99 latency above threshold".into());
        alert.labels.insert("instance".into(), "checkout-1".into());
        assert_eq!(alert_summary(&alert), "p99 latency above threshold (instance=checkout-1)");
    }

    #[test]
    fn fingerprint_is_order_independent_over_labels() {
        let mut a1 = Alert {
            status: "firing".into(),
            labels: std::collections::BTreeMap::new(),
            annotations: std::collections::BTreeMap::new(),
        };
        a1.labels.insert("alertname".into(), "X".into());
        a1.labels.insert("zone".into(), "us-east".into());

        let a2 = Alert {
            status: "firing".into(),
            labels: a1.labels.clone(),
            annotations: std::collections::BTreeMap::new(),
        };

        assert_eq!(alert_fingerprint(&a1), alert_fingerprint(&a2));
    }

    #[test]
    fn signature_verification_rejects_wrong_secret() {
        let body = b"payload";
        assert!(!verify_signature("right-secret", body, Some("deadbeef")));
    }

    #[test]
    fn signature_verification_accepts_matching_hmac() {
        let body = b"payload";
        let mut mac = Hmac::<Sha256>::new_from_slice(b"shared-secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature("shared-secret", body, Some(&sig)));
    }
}
