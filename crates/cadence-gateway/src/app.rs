use axum::{
    routing::{delete, get, post},
    Router,
};
use cadence_broker::TokenBroker;
use cadence_scheduler::SchedulerHandle;
use std::sync::Arc;
use std::time::Instant;

use crate::http::{broker, health, jobs, status};

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub broker: Arc<TokenBroker>,
    started: Instant,
}

impl AppState {
    pub fn new(scheduler: SchedulerHandle, broker: Arc<TokenBroker>) -> Self {
        Self {
            scheduler,
            broker,
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/status", get(status::status_handler))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/{name}", get(jobs::get_job))
        .route("/api/jobs/{name}/trigger", post(jobs::trigger_job))
        .route("/api/jobs/{name}/enable", post(jobs::enable_job))
        .route("/api/jobs/{name}/disable", post(jobs::disable_job))
        .route("/api/broker/tasks", get(broker::list_tasks))
        .route("/api/broker/tasks/{task_id}", delete(broker::revoke_token))
        .route("/api/broker/tasks/{task_id}/token", post(broker::issue_token))
        .route("/api/broker/validate", post(broker::validate_token))
        .route("/api/broker/audit", get(broker::audit_log))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use cadence_core::{config::BrokerConfig, Clock, ManualClock};
    use cadence_executor::ScriptRunner;
    use cadence_scheduler::{Dispatcher, JobRegistry, JobSpec};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::{fs, time::Duration};
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
    }

    impl TestApp {
        fn router(&self) -> Router {
            build_router(Arc::clone(&self.state))
        }
    }

    fn job(name: &str, script: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            schedule: "0 3 * * *".to_string(),
            description: format!("{name} job"),
            script: script.to_string(),
            enabled: true,
            timeout: Duration::from_secs(10),
        }
    }

    fn test_app(broker_enabled: bool) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("backup.sh"), "echo backed up\n").unwrap();
        fs::write(dir.path().join("slow.sh"), "sleep 1\n").unwrap();

        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let registry = Arc::new(JobRegistry::new([
            job("zeta-backup", "backup.sh"),
            job("alpha-slow", "slow.sh"),
        ]));
        let runner = Arc::new(ScriptRunner::new("sh", dir.path()));
        let (dispatcher, completion) =
            Dispatcher::new(Arc::clone(&registry), runner, Arc::clone(&clock));
        tokio::spawn(completion.run());

        let broker_config = BrokerConfig {
            enabled: broker_enabled,
            ..BrokerConfig::default()
        };
        let broker = Arc::new(TokenBroker::new(&broker_config, Arc::clone(&clock)));
        let scheduler = SchedulerHandle::new(registry, dispatcher, clock);
        let state = Arc::new(AppState::new(scheduler, broker));
        TestApp { _dir: dir, state }
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.router().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_until_idle(app: &TestApp, name: &str) {
        for _ in 0..200 {
            if !app.state.scheduler.job(name).unwrap().running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{name} still running");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app(true);
        let response = send(&app, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs_running"], 0);
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn status_lists_jobs_in_registry_order() {
        let app = test_app(true);
        let response = send(&app, "GET", "/api/status", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        // Check the raw text: `Value` maps do not keep key order.
        let raw = String::from_utf8(bytes.to_vec()).unwrap();
        let zeta = raw.find("\"zeta-backup\"").unwrap();
        let alpha = raw.find("\"alpha-slow\"").unwrap();
        assert!(zeta < alpha, "jobs out of order: {raw}");

        let body: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(body["jobs"]["zeta-backup"]["last_status"], Value::Null);
        assert_eq!(body["broker"]["enabled"], true);
        assert_eq!(body["broker"]["active_tasks"], 0);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = test_app(true);
        for (method, uri) in [
            ("GET", "/api/jobs/nope"),
            ("POST", "/api/jobs/nope/trigger"),
            ("POST", "/api/jobs/nope/enable"),
            ("POST", "/api/jobs/nope/disable"),
        ] {
            let response = send(&app, method, uri, None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(json_body(response).await["error"], "not found");
        }
    }

    #[tokio::test]
    async fn trigger_runs_job_and_records_success() {
        let app = test_app(true);
        let response = send(&app, "POST", "/api/jobs/zeta-backup/trigger", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "triggered");

        wait_until_idle(&app, "zeta-backup").await;
        let body = json_body(send(&app, "GET", "/api/jobs/zeta-backup", None).await).await;
        assert_eq!(body["last_status"], "success");
        assert_eq!(body["run_count"], 1);
        assert_eq!(body["fail_count"], 0);
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn second_trigger_conflicts() {
        let app = test_app(true);
        let first = send(&app, "POST", "/api/jobs/alpha-slow/trigger", None).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = send(&app, "POST", "/api/jobs/alpha-slow/trigger", None).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(second).await["message"], "already running");

        wait_until_idle(&app, "alpha-slow").await;
    }

    #[tokio::test]
    async fn disable_then_enable() {
        let app = test_app(true);
        let response = send(&app, "POST", "/api/jobs/zeta-backup/disable", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");

        let body = json_body(send(&app, "GET", "/api/jobs/zeta-backup", None).await).await;
        assert_eq!(body["enabled"], false);
        assert_eq!(body["next_run"], Value::Null);

        send(&app, "POST", "/api/jobs/zeta-backup/enable", None).await;
        let body = json_body(send(&app, "GET", "/api/jobs/zeta-backup", None).await).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["next_run"], "2024-05-02T03:00:00Z");
    }

    #[tokio::test]
    async fn token_lifecycle_over_http() {
        let app = test_app(true);
        let first = json_body(send(&app, "POST", "/api/broker/tasks/task-42/token", None).await).await;
        let second =
            json_body(send(&app, "POST", "/api/broker/tasks/task-42/token", None).await).await;
        assert_eq!(second["task_id"], "task-42");

        let stale = send(
            &app,
            "POST",
            "/api/broker/validate",
            Some(serde_json::json!({ "token": first["token"] })),
        )
        .await;
        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(stale).await["error"], "invalid token");

        let fresh = send(
            &app,
            "POST",
            "/api/broker/validate",
            Some(serde_json::json!({ "token": second["token"] })),
        )
        .await;
        assert_eq!(fresh.status(), StatusCode::OK);
        assert_eq!(json_body(fresh).await["task_id"], "task-42");

        let status = json_body(send(&app, "GET", "/api/status", None).await).await;
        assert_eq!(status["broker"]["total_tokens_issued"], 2);
        assert_eq!(status["broker"]["active_tasks"], 1);

        let revoked = send(&app, "DELETE", "/api/broker/tasks/task-42", None).await;
        assert_eq!(revoked.status(), StatusCode::OK);
        assert_eq!(json_body(revoked).await["status"], "revoked");

        let tasks = json_body(send(&app, "GET", "/api/broker/tasks", None).await).await;
        assert_eq!(tasks["task-42"]["state"], "revoked");

        let audit = json_body(
            send(&app, "GET", "/api/broker/audit?task_id=task-42&limit=1", None).await,
        )
        .await;
        assert_eq!(audit[0]["event"], "token_revoked");
        assert_eq!(audit.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn issue_with_scope_is_listed_and_audited() {
        let app = test_app(true);
        let scope = serde_json::json!({ "repos": ["org/api"], "kind": "reviewer" });
        let response = send(&app, "POST", "/api/broker/tasks/task-9/token", Some(scope)).await;
        assert_eq!(response.status(), StatusCode::OK);

        // a bare reissue keeps the scope
        let response = send(&app, "POST", "/api/broker/tasks/task-9/token", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let tasks = json_body(send(&app, "GET", "/api/broker/tasks", None).await).await;
        assert_eq!(tasks["task-9"]["repos"], serde_json::json!(["org/api"]));
        assert_eq!(tasks["task-9"]["kind"], "reviewer");
        assert_eq!(tasks["task-9"]["tokens_issued"], 2);

        let audit =
            json_body(send(&app, "GET", "/api/broker/audit?task_id=task-9", None).await).await;
        assert_eq!(audit[0]["repos"], serde_json::json!(["org/api"]));
        assert_eq!(audit[1]["repos"], serde_json::json!(["org/api"]));
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let app = test_app(true);
        let missing_field = send(
            &app,
            "POST",
            "/api/broker/validate",
            Some(serde_json::json!({ "tok": "x" })),
        )
        .await;
        assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(missing_field).await["error"].is_string());

        let no_body = send(&app, "POST", "/api/broker/validate", None).await;
        assert_eq!(no_body.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(no_body).await["error"].is_string());

        let bad_scope = send(
            &app,
            "POST",
            "/api/broker/tasks/t/token",
            Some(serde_json::json!({ "repos": "not-a-list" })),
        )
        .await;
        assert_eq!(bad_scope.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(bad_scope).await["error"].is_string());
    }

    #[tokio::test]
    async fn disabled_broker_is_503() {
        let app = test_app(false);
        let response = send(&app, "POST", "/api/broker/tasks/t/token", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let status = json_body(send(&app, "GET", "/api/status", None).await).await;
        assert_eq!(status["broker"]["enabled"], false);
    }
}
