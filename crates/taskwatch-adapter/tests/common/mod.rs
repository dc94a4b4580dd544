/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for taskwatch-adapter tests

use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Mock bearer token for testing
pub fn mock_token() -> String {
    "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.test.signature".to_string()
}

/// Task record as the server serializes it
pub fn task_json(id: &str, status: u8, task_type: &str, study_id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("{task_type} on {study_id}"),
        "owner": 1,
        "status": status,
        "type": task_type,
        "ref_id": study_id,
        "progress": null,
        "result": null,
        "creation_date_utc": "2024-03-01T10:00:00",
        "completion_date_utc": null,
    })
}
