/*
[INPUT]:  Task list filter or task id
[OUTPUT]: Task records from the task service
[POS]:    HTTP layer - task endpoints
[UPDATE]: When adding task endpoints or changing query parameters
*/

use crate::http::{Result, TaskwatchClient, TaskwatchError};
use crate::types::{TaskDto, TaskListFilter};
use reqwest::Method;

impl TaskwatchClient {
    /// List tasks matching a filter
    ///
    /// POST /v1/tasks
    pub async fn list_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskDto>> {
        let builder = self.request(Method::POST, "/v1/tasks")?.json(filter);
        self.send_json(builder).await
    }

    /// Get a single task by id
    ///
    /// GET /v1/tasks/{id}
    pub async fn get_task(&self, id: &str) -> Result<TaskDto> {
        let endpoint = format!("/v1/tasks/{}", id);
        let builder = self.request(Method::GET, &endpoint)?;
        match self.send_json(builder).await {
            Err(TaskwatchError::Api { code: 404, .. }) => {
                Err(TaskwatchError::NotFound { id: id.to_string() })
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::http::{ClientConfig, TaskwatchClient, TaskwatchError};
    use crate::types::{TaskListFilter, TaskStatus, TaskType};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TaskwatchClient {
        TaskwatchClient::with_config_and_base_url(ClientConfig::default(), &server.uri())
            .expect("client init")
    }

    #[tokio::test]
    async fn test_list_tasks_posts_filter() {
        let server = MockServer::start().await;
        let filter = TaskListFilter::unfinished_for_study("s1", &[TaskType::UpgradeStudy]);

        let _mock = Mock::given(method("POST"))
            .and(path("/v1/tasks"))
            .and(body_json(serde_json::json!({
                "ref_id": "s1",
                "type": ["UPGRADE_STUDY"],
                "status": [1, 2],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "t1", "name": "upgrade", "status": 2, "type": "UPGRADE_STUDY", "ref_id": "s1"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let tasks = client_for(&server)
            .list_tasks(&filter)
            .await
            .expect("list_tasks failed");

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
        assert_eq!(tasks[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_get_task_sends_token() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/v1/tasks/t1"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "t1", "status": 3, "type": "UPGRADE_STUDY",
                "result": {"success": true, "message": "ok"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.set_token("abc");
        let task = client.get_task("t1").await.expect("get_task failed");
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_get_task_not_found() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/v1/tasks/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "description": "Failed to retrieve task missing in db"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).get_task("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_task_server_error_is_retryable() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/v1/tasks/t1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_task("t1").await.unwrap_err();
        assert!(matches!(err, TaskwatchError::Api { code: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/v1/tasks/t1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_task("t1").await.unwrap_err();
        assert_eq!(err.retry_delay(), Some(7));
    }
}
