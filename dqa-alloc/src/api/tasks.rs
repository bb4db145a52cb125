//! Task manifest endpoint
//!
//! `GET /api/tasks` always answers 200 with a manifest. Query parameters are
//! read leniently: a malformed value falls back to its default instead of
//! rejecting the request.

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;

use crate::allocator::{AllocationRequest, DEFAULT_LIMIT};
use crate::AppState;

const NO_STORE: &str = "no-store, no-cache, max-age=0, must-revalidate";

fn flag(value: Option<&String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Build an allocation request from raw query parameters
pub fn request_from_params(params: &HashMap<String, String>) -> AllocationRequest {
    let defaults = AllocationRequest::default();
    AllocationRequest {
        stage: number(params.get("stage")).unwrap_or(defaults.stage),
        annotator_id: params
            .get("annotator_id")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or(defaults.annotator_id),
        limit: number(params.get("limit")).unwrap_or(DEFAULT_LIMIT),
        page: number::<usize>(params.get("page")).filter(|p| *p > 0),
        page_size: number::<usize>(params.get("page_size")).filter(|s| *s > 0),
        seed_fallback: flag(params.get("seed_fallback"), defaults.seed_fallback),
        use_seed: flag(params.get("use_seed"), defaults.use_seed),
        require_prefill: flag(params.get("require_prefill"), defaults.require_prefill),
        search: params
            .get("search")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        seed: number(params.get("seed")),
    }
}

/// GET /api/tasks
pub async fn get_tasks(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let request = request_from_params(&params);
    let manifest = state.allocator.allocate(&request).await;
    ([(header::CACHE_CONTROL, NO_STORE)], Json(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let request = request_from_params(&HashMap::new());
        assert_eq!(request, AllocationRequest::default());
        assert_eq!(request.effective_limit(), 10);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let request = request_from_params(&params(&[
            ("stage", "two"),
            ("limit", "-3"),
            ("use_seed", "maybe"),
            ("page", "0"),
            ("annotator_id", "  "),
        ]));
        assert_eq!(request.stage, 2);
        assert_eq!(request.limit, 10);
        assert!(!request.use_seed);
        assert_eq!(request.page, None);
        assert_eq!(request.annotator_id, "anonymous");
    }

    #[test]
    fn test_page_size_overrides_limit() {
        let request = request_from_params(&params(&[
            ("limit", "5"),
            ("page", "2"),
            ("page_size", "500"),
            ("seed_fallback", "false"),
            ("search", " clip "),
            ("seed", "42"),
        ]));
        assert_eq!(request.effective_limit(), 200);
        assert_eq!(request.page, Some(2));
        assert!(!request.seed_fallback);
        assert_eq!(request.search.as_deref(), Some("clip"));
        assert_eq!(request.seed, Some(42));
    }
}
