use runwatch_core::contracts::{StartRunRequest, StartRunResponse, SOLVE_PATH};
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("start run failed with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("start run response missing run_id")]
    MissingRunId,
}

/// Starts a run and returns its id together with the initial roster.
pub async fn start_run(
    client: &reqwest::Client,
    base: &Url,
    request: &StartRunRequest,
) -> Result<StartRunResponse, ApiError> {
    let url = base.join(SOLVE_PATH)?;
    let response = client.post(url).json(request).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let started: StartRunResponse = response.json().await?;
    if started.run_id.trim().is_empty() {
        return Err(ApiError::MissingRunId);
    }
    info!(
        event = "run_started",
        run_id = %started.run_id,
        agents = started.agents.len(),
        scenario = %started.scenario
    );
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::LoopbackServer;

    fn request() -> StartRunRequest {
        StartRunRequest {
            problem: "Ground stop at ORD".to_string(),
            workflow_type: Some("handoff".to_string()),
            orchestration_mode: None,
            config: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_run_returns_roster() {
        let server = LoopbackServer::json(
            200,
            r#"{"run_id":"run-9","status":"started","agents":[{"id":"crew","name":"Crew","included":true},{"id":"cargo","included":false}]}"#,
        )
        .await;
        let client = reqwest::Client::new();
        let started = start_run(&client, &server.base_url(), &request())
            .await
            .expect("start run");
        assert_eq!(started.run_id, "run-9");
        assert_eq!(started.agents.len(), 2);
        assert!(!started.agents[1].included);

        let requests = server.requests().await;
        assert!(requests[0].starts_with("POST /api/av/solve"));
        assert!(requests[0].contains(r#""problem":"Ground stop at ORD""#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_run_surfaces_http_errors() {
        let server = LoopbackServer::json(500, r#"{"detail":"boom"}"#).await;
        let client = reqwest::Client::new();
        let err = start_run(&client, &server.base_url(), &request())
            .await
            .expect_err("server error");
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_run_id_is_rejected() {
        let server = LoopbackServer::json(200, r#"{"run_id":" "}"#).await;
        let client = reqwest::Client::new();
        let err = start_run(&client, &server.base_url(), &request())
            .await
            .expect_err("missing id");
        assert!(matches!(err, ApiError::MissingRunId));
    }
}
