use super::*;
use crate::config::LlmConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(server: &MockServer, models: &[&str]) -> LlmConfig {
    LlmConfig {
        api_base_url: format!("{}/v1/chat/completions", server.uri()),
        models: models.iter().map(|m| m.to_string()).collect(),
        timeout_secs: 5,
        ..LlmConfig::default()
    }
}

fn answer(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }]
    }))
}

fn reviewer(config: &LlmConfig, task: Task) -> LlmReviewer {
    let client = ChatClient::new(config, Some("test-key".into())).unwrap();
    LlmReviewer::new(client, task, &PromptTemplates::default())
}

#[tokio::test]
async fn returns_first_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "m1", "stream": false })))
        .respond_with(answer("  [INFO] a.txt: Line 1: fine  \n"))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["m1", "m2"]);
    let feedback = reviewer(&config, Task::Review)
        .analyze(b"-x\n+y\n")
        .await
        .unwrap();
    assert_eq!(feedback, "[INFO] a.txt: Line 1: fine");
}

#[tokio::test]
async fn falls_back_to_next_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "model": "broken" })))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "model": "empty" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "model": "good" })))
        .respond_with(answer("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["broken", "empty", "good"]);
    let feedback = reviewer(&config, Task::Pair).analyze(b"+y\n").await.unwrap();
    assert_eq!(feedback, "ok");
}

#[tokio::test]
async fn reports_exhaustion_with_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(2)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["a", "b"]);
    let err = reviewer(&config, Task::Review).analyze(b"+y\n").await.unwrap_err();
    match err {
        ReviewError::Exhausted(last) => match *last {
            ReviewError::Status { model, status, body } => {
                assert_eq!(model, "b");
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected Status, got {other:?}"),
        },
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["only"]);
    let err = reviewer(&config, Task::Review).analyze(b"+y\n").await.unwrap_err();
    match err {
        ReviewError::Exhausted(last) => {
            assert!(matches!(*last, ReviewError::Decode { ref model, .. } if model == "only"))
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_key_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(answer("unreachable"))
        .expect(0)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["m1"]);
    let client = ChatClient::new(&config, Some("   ".into())).unwrap();
    let reviewer = LlmReviewer::new(client, Task::Review, &PromptTemplates::default());
    let err = reviewer.analyze(b"+y\n").await.unwrap_err();
    assert!(matches!(err, ReviewError::MissingApiKey(ref var) if var == "LLM_API_KEY"));
}

#[tokio::test]
async fn no_models_is_its_own_error() {
    let server = MockServer::start().await;
    let config = llm_config(&server, &[]);
    let err = reviewer(&config, Task::Review).analyze(b"+y\n").await.unwrap_err();
    assert!(matches!(err, ReviewError::NoModels));
}

#[tokio::test]
async fn custom_template_shapes_the_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system" },
                { "role": "user", "content": "DIFF<+y\n>" }
            ]
        })))
        .respond_with(answer("templated"))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, &["m1"]);
    let client = ChatClient::new(&config, Some("k".into())).unwrap();
    let prompts = PromptTemplates {
        commit: Some("DIFF<{{ diff }}>".into()),
        ..PromptTemplates::default()
    };
    let reviewer = LlmReviewer::new(client, Task::CommitMessage, &prompts);
    assert_eq!(reviewer.analyze(b"+y\n").await.unwrap(), "templated");
}

#[test]
fn bad_template_is_a_prompt_error() {
    let config = LlmConfig::default();
    let client = ChatClient::new(&config, Some("k".into())).unwrap();
    let prompts = PromptTemplates {
        review: Some("{{ diff".into()),
        ..PromptTemplates::default()
    };
    let reviewer = LlmReviewer::new(client, Task::Review, &prompts);
    assert!(matches!(
        reviewer.render_user_message("x"),
        Err(ReviewError::Prompt(_))
    ));
}
