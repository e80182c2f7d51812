mod support;

use engine_rpc::socket::SocketEvent;
use engine_rpc::{Handle, RequestDraft, Session, SessionConfigBuilder};
use serde_json::{json, Value};

async fn open_session() -> (Session, support::MockServer) {
    let (factory, server) = support::one_shot_socket_factory();
    let config = SessionConfigBuilder::new("wss://engine.example/test")
        .socket_factory(factory)
        .build()
        .expect("valid config");
    let session = Session::new(config);
    session.open().await.expect("open succeeds");
    (session, server)
}

#[tokio::test]
async fn round_trips_a_simple_request() {
    let (session, mut server) = open_session().await;

    let call = tokio::spawn(async move {
        session
            .send(RequestDraft::new("getSheetCount", Handle::GLOBAL, Value::Null))
            .await
    });

    let frame = server.sent.recv().await.expect("request sent");
    let sent: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(sent["method"], "getSheetCount");
    assert_eq!(sent["handle"], -1);
    let id = sent["id"].as_u64().unwrap();

    server
        .events
        .send(SocketEvent::Message(json!({ "id": id, "result": 3 }).to_string()))
        .unwrap();

    let result = call.await.unwrap().expect("call succeeds");
    assert_eq!(result, json!(3));
    assert_eq!(result.request_id, id);
}

#[tokio::test]
async fn unknown_keys_in_a_raw_draft_never_reach_the_wire() {
    let (session, mut server) = open_session().await;

    let mut draft = RequestDraft::from_value(json!({
        "method": "getSheetCount",
        "handle": -1,
        "params": [],
        "xyz": "not a real field",
    }))
    .unwrap();
    draft = draft.delta(false);

    let call = tokio::spawn(async move { session.send(draft).await });

    let frame = server.sent.recv().await.expect("request sent");
    let sent: Value = serde_json::from_str(&frame).unwrap();
    let mut keys: Vec<_> = sent.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["delta", "handle", "id", "jsonrpc", "method", "params"]);

    let id = sent["id"].as_u64().unwrap();
    server.events.send(SocketEvent::Message(json!({ "id": id, "result": 0 }).to_string())).unwrap();
    call.await.unwrap().unwrap();
}
