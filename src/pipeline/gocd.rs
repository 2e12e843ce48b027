//! GoCD pipeline-config API client.
//!
//! Upsert is fetch-then-write: a GET returns the current ETag (or 404), then
//! either a POST creates the pipeline or a PUT with `If-Match` replaces it
//! wholesale. Nothing from the previous definition is merged.
//!
//! A server that is still starting shows up as dropped connections or a
//! 502/503/504; both are reported as `CiError::Unreachable` so callers keep
//! waiting.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ETAG, IF_MATCH};
use serde::Serialize;
use std::time::Duration;

use super::{CiControlPlane, PipelineSpec};
use crate::config::CiSection;
use crate::errors::CiError;

const API_MEDIA_TYPE: &str = "application/vnd.go.cd.v11+json";

pub struct GoCdClient {
    http: reqwest::Client,
    base_url: String,
    group: String,
    stage: String,
    job: String,
}

impl GoCdClient {
    pub fn new(ci: &CiSection) -> Result<Self, CiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ci.request_timeout_secs))
            .build()
            .map_err(CiError::Client)?;
        Ok(Self {
            http,
            base_url: ci.base_url(),
            group: ci.pipeline_group.clone(),
            stage: ci.stage.clone(),
            job: ci.job.clone(),
        })
    }

    fn pipelines_url(&self) -> String {
        format!("{}/go/api/admin/pipelines", self.base_url)
    }

    fn pipeline_url(&self, name: &str) -> String {
        format!("{}/{}", self.pipelines_url(), name)
    }

    fn body<'a>(&'a self, spec: &'a PipelineSpec) -> PipelineConfig<'a> {
        PipelineConfig::from_spec(spec, &self.stage, &self.job)
    }

    /// ETag of the existing pipeline, or `None` when it does not exist.
    async fn current_etag(&self, name: &str) -> Result<Option<String>, CiError> {
        let resp = self
            .http
            .get(self.pipeline_url(name))
            .header(ACCEPT, API_MEDIA_TYPE)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if is_starting(status) => Err(starting("fetch", status)),
            status if status.is_success() => resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| Some(v.to_string()))
                .ok_or_else(|| CiError::Protocol(format!("no ETag on pipeline {}", name))),
            _ => Err(rejected("fetch", resp).await),
        }
    }

    async fn create(&self, spec: &PipelineSpec) -> Result<(), CiError> {
        let payload = CreateRequest {
            group: &self.group,
            pipeline: self.body(spec),
        };
        let resp = self
            .http
            .post(self.pipelines_url())
            .header(ACCEPT, API_MEDIA_TYPE)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        if is_starting(resp.status()) {
            return Err(starting("create", resp.status()));
        }
        if !resp.status().is_success() {
            return Err(rejected("create", resp).await);
        }
        tracing::info!(pipeline = %spec.name, "pipeline created");
        Ok(())
    }

    async fn replace(&self, spec: &PipelineSpec, etag: &str) -> Result<(), CiError> {
        let resp = self
            .http
            .put(self.pipeline_url(&spec.name))
            .header(ACCEPT, API_MEDIA_TYPE)
            .header(CONTENT_TYPE, "application/json")
            .header(IF_MATCH, etag)
            .json(&self.body(spec))
            .send()
            .await
            .map_err(transport_error)?;
        if is_starting(resp.status()) {
            return Err(starting("replace", resp.status()));
        }
        if !resp.status().is_success() {
            return Err(rejected("replace", resp).await);
        }
        tracing::info!(pipeline = %spec.name, "pipeline replaced");
        Ok(())
    }
}

#[async_trait]
impl CiControlPlane for GoCdClient {
    async fn upsert_pipeline(&self, spec: &PipelineSpec) -> Result<(), CiError> {
        match self.current_etag(&spec.name).await? {
            Some(etag) => self.replace(spec, &etag).await,
            None => self.create(spec).await,
        }
    }
}

/// Any failure to get a response counts as "not up yet": refused and reset
/// connections, connections dropped by a port proxy, and timeouts.
fn transport_error(err: reqwest::Error) -> CiError {
    CiError::Unreachable(err.to_string())
}

/// Gateway-style statuses a server answers with while it boots.
fn is_starting(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn starting(operation: &str, status: StatusCode) -> CiError {
    CiError::Unreachable(format!("{} answered {}", operation, status))
}

async fn rejected(operation: &str, resp: reqwest::Response) -> CiError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    CiError::Rejected {
        operation: operation.to_string(),
        status,
        body,
    }
}

// Wire shapes for the pipeline-config API.

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    group: &'a str,
    pipeline: PipelineConfig<'a>,
}

#[derive(Debug, Serialize)]
struct PipelineConfig<'a> {
    name: &'a str,
    label_template: &'static str,
    environment_variables: Vec<EnvironmentVariable<'a>>,
    materials: Vec<Material<'a>>,
    stages: Vec<Stage<'a>>,
}

#[derive(Debug, Serialize)]
struct EnvironmentVariable<'a> {
    name: &'a str,
    value: &'a str,
    secure: bool,
}

#[derive(Debug, Serialize)]
struct Material<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: GitAttributes<'a>,
}

#[derive(Debug, Serialize)]
struct GitAttributes<'a> {
    url: &'a str,
    branch: &'a str,
    auto_update: bool,
}

#[derive(Debug, Serialize)]
struct Stage<'a> {
    name: &'a str,
    jobs: Vec<Job<'a>>,
}

#[derive(Debug, Serialize)]
struct Job<'a> {
    name: &'a str,
    tasks: Vec<Task<'a>>,
}

#[derive(Debug, Serialize)]
struct Task<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: ExecAttributes<'a>,
}

#[derive(Debug, Serialize)]
struct ExecAttributes<'a> {
    command: &'a str,
    arguments: &'a [String],
    run_if: [&'static str; 1],
}

impl<'a> PipelineConfig<'a> {
    fn from_spec(spec: &'a PipelineSpec, stage: &'a str, job: &'a str) -> Self {
        let tasks = spec
            .commands
            .iter()
            .filter_map(|command| command.split_first())
            .map(|(program, arguments)| Task {
                kind: "exec",
                attributes: ExecAttributes {
                    command: program,
                    arguments,
                    run_if: ["passed"],
                },
            })
            .collect();

        Self {
            name: &spec.name,
            label_template: "${COUNT}",
            environment_variables: spec
                .environment
                .iter()
                .map(|(name, value)| EnvironmentVariable {
                    name,
                    value,
                    secure: false,
                })
                .collect(),
            materials: vec![Material {
                kind: "git",
                attributes: GitAttributes {
                    url: &spec.git_url,
                    branch: &spec.branch,
                    auto_update: true,
                },
            }],
            stages: vec![Stage {
                name: stage,
                jobs: vec![Job { name: job, tasks }],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::readiness::ReadinessPolicy;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn spec() -> PipelineSpec {
        PipelineSpec::build(
            "docker build -t svc:$BRANCH .\nmake",
            "main",
            9000,
            "svc_main",
            "git@example.com:svc.git",
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_body_shape() {
        let spec = spec();
        let body = serde_json::to_value(PipelineConfig::from_spec(&spec, "deploy", "build")).unwrap();
        assert_eq!(
            body,
            json!({
                "name": "svc_main",
                "label_template": "${COUNT}",
                "environment_variables": [
                    {"name": "BRANCH", "value": "main", "secure": false},
                    {"name": "PORT", "value": "9000", "secure": false}
                ],
                "materials": [
                    {"type": "git", "attributes": {
                        "url": "git@example.com:svc.git",
                        "branch": "main",
                        "auto_update": true
                    }}
                ],
                "stages": [
                    {"name": "deploy", "jobs": [
                        {"name": "build", "tasks": [
                            {"type": "exec", "attributes": {
                                "command": "docker",
                                "arguments": ["build", "-t", "svc:main", "."],
                                "run_if": ["passed"]
                            }},
                            {"type": "exec", "attributes": {
                                "command": "make",
                                "arguments": [],
                                "run_if": ["passed"]
                            }}
                        ]}
                    ]}
                ]
            })
        );
    }

    #[test]
    fn test_create_request_wraps_group() {
        let spec = spec();
        let payload = CreateRequest {
            group: "defaultGroup",
            pipeline: PipelineConfig::from_spec(&spec, "deploy", "build"),
        };
        let value = serde_json::to_value(payload).unwrap();
        assert_eq!(value["group"], "defaultGroup");
        assert_eq!(value["pipeline"]["name"], "svc_main");
    }

    #[test]
    fn test_urls_follow_base() {
        let ci = CiSection {
            host: "https://ci.example.com/".into(),
            ..CiSection::default()
        };
        let client = GoCdClient::new(&ci).unwrap();
        assert_eq!(
            client.pipeline_url("svc_main"),
            "https://ci.example.com/go/api/admin/pipelines/svc_main"
        );
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let ci = CiSection {
            host: format!("127.0.0.1:{}", port),
            ..CiSection::default()
        };
        let err = GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::Unreachable(_)), "got {:?}", err);
    }

    /// Answers one connection per canned response, in order, and returns the
    /// raw requests. `None` reads the request and hangs up without answering.
    async fn serve(responses: Vec<Option<String>>) -> (CiSection, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ci = CiSection {
            host: format!("127.0.0.1:{}", listener.local_addr().unwrap().port()),
            request_timeout_secs: 5,
            ..CiSection::default()
        };
        let server = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                if let Some(response) = response {
                    stream.write_all(response.as_bytes()).await.unwrap();
                }
            }
            requests
        });
        (ci, server)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .to_ascii_lowercase()
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:").map(str::to_string))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn reply(status: &str, headers: &str, body: &str) -> Option<String> {
        Some(format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            headers,
            body.len(),
            body
        ))
    }

    #[tokio::test]
    async fn test_dropped_connection_is_unreachable() {
        let (ci, server) = serve(vec![None]).await;
        let err = GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::Unreachable(_)), "got {:?}", err);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_service_unavailable_is_unreachable() {
        let (ci, server) = serve(vec![reply("503 Service Unavailable", "", "starting")]).await;
        let err = GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::Unreachable(_)), "got {:?}", err);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_pipeline_is_replaced_with_etag() {
        let (ci, server) = serve(vec![
            reply("200 OK", "ETag: \"abc\"\r\n", "{}"),
            reply("200 OK", "", "{}"),
        ])
        .await;
        GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /go/api/admin/pipelines/svc_main "));
        assert!(requests[1].starts_with("PUT /go/api/admin/pipelines/svc_main "));
        let put = requests[1].to_ascii_lowercase();
        assert!(put.contains("if-match: \"abc\""), "{}", requests[1]);
        assert!(put.contains("accept: application/vnd.go.cd.v11+json"));
        assert!(requests[1].contains("\"name\":\"svc_main\""));
    }

    #[tokio::test]
    async fn test_missing_pipeline_is_created_in_group() {
        let (ci, server) = serve(vec![
            reply("404 Not Found", "", ""),
            reply("200 OK", "", "{}"),
        ])
        .await;
        GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("POST /go/api/admin/pipelines "));
        assert!(requests[1].contains("\"group\":\"defaultGroup\""));
        assert!(!requests[1].to_ascii_lowercase().contains("if-match"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_rejected() {
        let (ci, server) = serve(vec![
            reply("404 Not Found", "", ""),
            reply("422 Unprocessable Entity", "", "bad stage"),
        ])
        .await;
        let err = GoCdClient::new(&ci)
            .unwrap()
            .upsert_pipeline(&spec())
            .await
            .unwrap_err();
        match err {
            CiError::Rejected {
                operation,
                status,
                body,
            } => {
                assert_eq!(operation, "create");
                assert_eq!(status, 422);
                assert_eq!(body, "bad stage");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_waits_through_startup_responses() {
        let (ci, server) = serve(vec![
            None,
            reply("503 Service Unavailable", "", ""),
            reply("404 Not Found", "", ""),
            reply("200 OK", "", "{}"),
        ])
        .await;
        let client = GoCdClient::new(&ci).unwrap();
        PipelineBuilder::new(&client, ReadinessPolicy::new(5, 0))
            .submit(&spec())
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests[3].starts_with("POST "));
    }
}
