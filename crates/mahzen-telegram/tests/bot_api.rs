use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use mahzen_telegram::TelegramGateway;

fn gateway(server: &MockServer) -> TelegramGateway {
    TelegramGateway::with_api_base("fake-token", 5_000, &server.base_url()).expect("gateway")
}

#[test]
fn get_me_returns_bot_identity() {
    let server = MockServer::start();
    let get_me = server.mock(|when, then| {
        when.method(GET).path("/botfake-token/getMe");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"ok": true, "result": {"id": 777, "is_bot": true, "first_name": "Mahzen", "username": "mahzen_bot"}}"#);
    });

    let me = gateway(&server).get_me().expect("get me");
    assert_eq!(me.id, 777);
    assert!(me.is_bot);
    assert_eq!(me.username.as_deref(), Some("mahzen_bot"));
    get_me.assert();
}

#[test]
fn send_message_posts_chat_text_and_reply() {
    let server = MockServer::start();
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/botfake-token/sendMessage")
            .body_contains(r#""chat_id":-100"#)
            .body_contains(r#""message_id":12"#)
            .body_contains("merhaba");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"ok": true, "result": {"message_id": 13, "chat": {"id": -100, "type": "supergroup"}, "text": "merhaba"}}"#);
    });

    let sent = gateway(&server)
        .send_message(-100, "merhaba", Some(12))
        .expect("send");
    assert_eq!(sent.message_id, 13);
    assert!(sent.chat.is_group());
    send.assert();
}

#[test]
fn get_updates_passes_offset_and_parses_messages() {
    let server = MockServer::start();
    let updates = server.mock(|when, then| {
        when.method(GET)
            .path("/botfake-token/getUpdates")
            .query_param("offset", "101")
            .query_param("timeout", "0");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"ok": true, "result": [
                    {"update_id": 101, "message": {
                        "message_id": 5,
                        "from": {"id": 42, "is_bot": false, "first_name": "Ayşe", "username": "ayse"},
                        "chat": {"id": -100, "type": "group", "title": "mahzen"},
                        "text": "@mahzen_bot selam",
                        "reply_to_message": {
                            "message_id": 4,
                            "from": {"id": 777, "is_bot": true, "first_name": "Mahzen"},
                            "chat": {"id": -100, "type": "group"}
                        }
                    }},
                    {"update_id": 102}
                ]}"#,
            );
    });

    let batch = gateway(&server)
        .get_updates(Some(101), 0)
        .expect("get updates");
    assert_eq!(batch.len(), 2);
    let message = batch[0].message.as_ref().expect("message");
    assert_eq!(message.text.as_deref(), Some("@mahzen_bot selam"));
    assert_eq!(
        message.from.as_ref().map(|user| user.display_name()),
        Some("ayse")
    );
    let replied = message.reply_to_message.as_ref().expect("reply");
    assert_eq!(replied.from.as_ref().map(|user| user.id), Some(777));
    assert!(batch[1].message.is_none());
    updates.assert();
}

#[test]
fn ok_false_and_http_errors_are_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/botfake-token/sendMessage");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"ok": false, "description": "Bad Request: chat not found"}"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/botfake-token/getMe");
        then.status(401).body(r#"{"ok": false, "description": "Unauthorized"}"#);
    });

    let gw = gateway(&server);
    let err = gw.send_message(1, "x", None).expect_err("ok=false");
    assert!(err.to_string().contains("chat not found"));
    let err = gw.get_me().expect_err("401");
    assert!(err.to_string().contains("401"));
}
