//! Integration tests for the bulk loader using wiremock
//!
//! These tests drive submit and completion tracking against a mocked
//! loader endpoint, covering acceptance, rejection, success, failure and
//! timeout.

use resgraph::loader::{BulkLoader, LoadOptions, LoadRequest, LoadStatus, LoaderEndpoint};
use resgraph::{CompletionError, LoadError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOAD_ID: &str = "6f1c2a8e-7d7b-4cbb-8a3f-1d2b7e0c9a11";

fn loader() -> BulkLoader {
    BulkLoader::new(LoadOptions {
        poll_interval: Duration::from_millis(10),
        ..LoadOptions::default()
    })
    .expect("loader client should build")
}

fn request(server: &MockServer) -> LoadRequest {
    LoadRequest {
        source: "s3://ingestion-bucket/output-dir/run-1/nodes/".to_string(),
        role_arn: "arn:aws:iam::222222222222:role/graph-loader".to_string(),
        region: "us-east-1".to_string(),
        endpoints: vec![LoaderEndpoint::parse(&server.uri()).expect("valid endpoint")],
    }
}

fn status_body(status: &str) -> serde_json::Value {
    json!({
        "status": "200 OK",
        "payload": {
            "overallStatus": {
                "status": status,
                "totalRecords": 2,
                "totalDuplicates": 0,
                "totalTimeSpent": 3
            }
        }
    })
}

async fn mount_submit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/loader"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "200 OK",
            "payload": {"loadId": LOAD_ID}
        })))
        .mount(server)
        .await;
}

fn status_path() -> String {
    format!("/loader/{}", LOAD_ID)
}

mod submit_tests {
    use super::*;

    /// Test the submit body carries the fixed loader options
    #[tokio::test]
    async fn test_submit_returns_load_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/loader"))
            .and(body_partial_json(json!({
                "source": "s3://ingestion-bucket/output-dir/run-1/nodes/",
                "format": "csv",
                "iamRoleArn": "arn:aws:iam::222222222222:role/graph-loader",
                "region": "us-east-1",
                "failOnError": "TRUE",
                "updateSingleCardinalityProperties": "FALSE",
                "queueRequest": "TRUE"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "200 OK",
                "payload": {"loadId": LOAD_ID}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let job = loader().submit(request(&server)).await.unwrap();

        assert_eq!(job.load_id, LOAD_ID);
        assert_eq!(job.status(), LoadStatus::Pending);
    }

    /// Test a rejected submit surfaces the loader's message
    #[tokio::test]
    async fn test_submit_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/loader"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "BadRequestException",
                "detailedMessage": "Failed to start new load for the source"
            })))
            .mount(&server)
            .await;

        let err = loader().submit(request(&server)).await.unwrap_err();

        match err {
            LoadError::Rejected { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(
                    detail,
                    "BadRequestException: Failed to start new load for the source"
                );
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    /// Test a submit without endpoints never calls out
    #[tokio::test]
    async fn test_submit_without_endpoint() {
        let server = MockServer::start().await;
        let mut req = request(&server);
        req.endpoints.clear();

        let err = loader().submit(req).await.unwrap_err();
        assert!(matches!(err, LoadError::NoEndpoint));
    }

    /// Test an unparseable acceptance is a protocol error
    #[tokio::test]
    async fn test_submit_malformed_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/loader"))
            .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
            .mount(&server)
            .await;

        let err = loader().submit(request(&server)).await.unwrap_err();
        assert!(matches!(err, LoadError::Protocol(_)));
    }
}

mod completion_tests {
    use super::*;

    /// Test the job walks pending -> in progress -> succeeded
    #[tokio::test]
    async fn test_await_completion_success() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .and(query_param("details", "true"))
            .and(query_param("errors", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_QUEUE")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_PROGRESS")),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body("LOAD_COMPLETED")))
            .mount(&server)
            .await;

        let loader = loader();
        let mut job = loader.submit(request(&server)).await.unwrap();
        let summary = loader
            .await_completion(&mut job, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(job.status(), LoadStatus::Succeeded);
        assert_eq!(job.raw_status(), Some("LOAD_COMPLETED"));
        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.rows_skipped, 0);
        assert_eq!(summary.total_time_secs, 3);
    }

    /// Test a failed load reports the loader's error logs
    #[tokio::test]
    async fn test_await_completion_failure() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "200 OK",
                "payload": {
                    "overallStatus": {"status": "LOAD_FAILED", "totalRecords": 1, "parsingErrors": 1},
                    "errors": {
                        "errorLogs": [
                            {"errorCode": "PARSING_ERROR", "errorMessage": "Bad header", "recordNum": 0}
                        ]
                    }
                }
            })))
            .mount(&server)
            .await;

        let err = loader()
            .load(request(&server), Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            CompletionError::Load(LoadError::Failed {
                load_id,
                status,
                detail,
            }) => {
                assert_eq!(load_id, LOAD_ID);
                assert_eq!(status, "LOAD_FAILED");
                assert!(detail.contains("Bad header"), "detail was {detail}");
            }
            other => panic!("expected a failed load, got {other:?}"),
        }
    }

    /// Test a load that never finishes times out instead of failing
    #[tokio::test]
    async fn test_await_completion_timeout() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_PROGRESS")),
            )
            .mount(&server)
            .await;

        let loader = loader();
        let mut job = loader.submit(request(&server)).await.unwrap();
        let err = loader
            .await_completion(&mut job, Duration::from_millis(300))
            .await
            .unwrap_err();

        match err {
            CompletionError::Timeout(timeout) => {
                assert_eq!(timeout.load_id, LOAD_ID);
                assert_eq!(timeout.last_status, "IN_PROGRESS");
                assert!(timeout.elapsed >= Duration::from_millis(300));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(!job.status().is_terminal());
    }

    /// Test a status regression from the loader is ignored
    #[tokio::test]
    async fn test_status_never_regresses() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_PROGRESS")),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_QUEUE")))
            .mount(&server)
            .await;

        let loader = loader();
        let mut job = loader.submit(request(&server)).await.unwrap();

        assert_eq!(loader.poll(&mut job).await.unwrap(), LoadStatus::InProgress);
        assert_eq!(loader.poll(&mut job).await.unwrap(), LoadStatus::InProgress);
    }

    /// Test server errors while polling an accepted load are retried
    #[tokio::test]
    async fn test_poll_server_error_is_retried() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body("LOAD_COMPLETED")))
            .mount(&server)
            .await;

        let (job, summary) = loader()
            .load(request(&server), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(job.status(), LoadStatus::Succeeded);
        assert_eq!(job.last_poll_error(), None);
        assert_eq!(summary.rows_processed, 2);
    }

    /// Test an accepted load whose polls keep failing ends as a timeout
    #[tokio::test]
    async fn test_poll_server_error_until_deadline() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = loader()
            .load(request(&server), Duration::from_millis(200))
            .await
            .unwrap_err();

        match err {
            CompletionError::Timeout(timeout) => {
                assert_eq!(timeout.load_id, LOAD_ID);
                assert_eq!(timeout.last_status, "PENDING");
                let last_error = timeout.last_error.expect("poll error recorded");
                assert!(last_error.contains("500"), "last error was {last_error}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    /// Test a zero poll interval does not spin
    #[tokio::test]
    async fn test_zero_poll_interval_is_floored() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(status_body("LOAD_IN_PROGRESS")),
            )
            .expect(1..=40)
            .mount(&server)
            .await;

        let loader = BulkLoader::new(LoadOptions {
            poll_interval: Duration::ZERO,
            ..LoadOptions::default()
        })
        .unwrap();
        let err = loader
            .load(request(&server), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Timeout(_)));
    }
}
