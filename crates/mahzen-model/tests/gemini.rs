use httpmock::Method::POST;
use httpmock::MockServer;
use mahzen_model::{GeminiClient, LanguageModel};

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::new(&server.base_url(), "models/gemini-2.0-flash", "fake-key", 5_000)
        .expect("client")
}

#[test]
fn generate_posts_prompt_and_joins_parts() {
    let server = MockServer::start();
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-2.0-flash:generateContent")
            .query_param("key", "fake-key")
            .body_contains("Selamün aleyküm");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"candidates": [{"content": {"parts": [
                    {"text": "Belî efendimiz, "},
                    {"text": "buyurun.\n"}
                ]}}]}"#,
            );
    });

    let reply = client(&server)
        .generate("Selamün aleyküm")
        .expect("generate");
    assert_eq!(reply, "Belî efendimiz, buyurun.");
    generate.assert();
}

#[test]
fn empty_candidates_are_an_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-2.0-flash:generateContent");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"candidates": []}"#);
    });

    let err = client(&server).generate("x").expect_err("no text");
    assert!(err.to_string().contains("no text"));
}

#[test]
fn http_failure_carries_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-2.0-flash:generateContent");
        then.status(429).body("quota exceeded");
    });

    let err = client(&server).generate("x").expect_err("429");
    let message = err.to_string();
    assert!(message.contains("429"));
    assert!(message.contains("quota exceeded"));
}
