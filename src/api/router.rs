use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::health;
use super::state::AppState;
use super::stats;

/// Health, stats and report routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/live", get(health::live_check))
        .route("/stats", get(stats::cache_stats))
        .route("/analytics/report", get(stats::analytics_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_every_component() {
        let state = crate::create_app_state_with_config(&AppConfig::default()).await.unwrap();

        let (status, body) = get_body(create_router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["details"]["semantic.status"], "healthy");
        assert_eq!(json["details"]["query.status"], "healthy");
        assert_eq!(json["details"]["store.status"], "healthy");
    }

    #[tokio::test]
    async fn test_stats_and_report_reflect_traffic() {
        let state = crate::create_app_state_with_config(&AppConfig::default()).await.unwrap();
        state
            .semantic
            .get("what is the refund policy")
            .await
            .unwrap();

        let (status, body) = get_body(create_router(state.clone()), "/stats").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["semantic"]["misses"], 1);

        let (status, csv) =
            get_body(create_router(state), "/analytics/report?format=csv&timeframe_secs=60").await;
        assert_eq!(status, StatusCode::OK);
        assert!(csv.lines().any(|line| line.starts_with("semantic,0,1")));
    }

    #[tokio::test]
    async fn test_report_accepts_huge_timeframe_and_cache_filter() {
        let state = crate::create_app_state_with_config(&AppConfig::default()).await.unwrap();
        state.semantic.get("where is my order").await.unwrap();

        let (status, body) = get_body(
            create_router(state),
            "/analytics/report?timeframe_secs=18446744073709551615&caches=semantic",
        )
        .await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["caches"].as_array().unwrap().len(), 1);
        assert_eq!(json["totals"]["misses"], 1);
    }
}
