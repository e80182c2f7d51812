mod support;

use engine_rpc::config::ReattachPolicy;
use engine_rpc::socket::SocketEvent;
use engine_rpc::{Handle, RequestDraft, Session, SessionConfigBuilder, SessionState};
use serde_json::{json, Value};

#[tokio::test]
async fn suspend_then_resume_reattaches_every_cached_handle_to_its_new_server_handle() {
    let (factory, mut new_servers) = support::resumable_socket_factory();
    let config = SessionConfigBuilder::new("wss://engine.example/test").socket_factory(factory).build().unwrap();
    let session = Session::new(config);
    session.open().await.unwrap();
    let mut first_server = new_servers.recv().await.unwrap();

    let sheet = session.proxy(Handle(2), "Sheet");
    let book = session.proxy(Handle(3), "Book");

    session.suspend().await.unwrap();
    assert_eq!(session.state(), SessionState::Suspended);

    let session_clone = session.clone();
    let resume = tokio::spawn(async move { session_clone.resume().await });

    let mut second_server = new_servers.recv().await.unwrap();

    let reassigned = [(2, 22), (3, 33)];
    for (old, new) in reassigned {
        let frame = second_server.sent.recv().await.unwrap();
        let request: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(request["method"], "reattach");
        assert_eq!(request["handle"], -1, "reattach is issued against the global handle");
        assert_eq!(request["params"]["handle"], old);
        let id = request["id"].as_u64().unwrap();
        second_server
            .events
            .send(SocketEvent::Message(json!({ "id": id, "result": { "handle": new } }).to_string()))
            .unwrap();
    }

    let outcome = resume.await.unwrap().expect("resume succeeds");
    assert!(outcome.closed.is_empty());
    assert_eq!(session.state(), SessionState::Opened);

    // the proxy identity survives the rekey: the same `Proxy` now answers
    // to the handle the server reassigned it to.
    assert_eq!(sheet.handle(), Handle(22));
    assert_eq!(book.handle(), Handle(33));

    // the pre-suspend connection never receives anything further.
    assert!(first_server.sent.try_recv().is_err());
}

#[tokio::test]
async fn resume_never_issues_a_reattach_for_the_global_handle() {
    let (factory, mut new_servers) = support::resumable_socket_factory();
    let config = SessionConfigBuilder::new("wss://engine.example/test").socket_factory(factory).build().unwrap();
    let session = Session::new(config);
    session.open().await.unwrap();
    let _first_server = new_servers.recv().await.unwrap();

    let global = session.global("Application");
    assert_eq!(global.handle(), Handle::GLOBAL);

    session.proxy(Handle(7), "Sheet");
    session.suspend().await.unwrap();

    let session_clone = session.clone();
    let resume = tokio::spawn(async move { session_clone.resume().await });

    let mut second_server = new_servers.recv().await.unwrap();

    // the only reattach sent is for the positive handle; the global
    // handle never appears as a request target.
    let frame = second_server.sent.recv().await.unwrap();
    let request: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(request["params"]["handle"], 7);
    let id = request["id"].as_u64().unwrap();
    second_server
        .events
        .send(SocketEvent::Message(json!({ "id": id, "result": { "handle": 77 } }).to_string()))
        .unwrap();

    let outcome = resume.await.unwrap().expect("resume succeeds");
    assert!(outcome.closed.is_empty());
    assert_eq!(session.state(), SessionState::Opened);
    assert_eq!(global.handle(), Handle::GLOBAL, "the global handle never gets rekeyed");
    assert!(second_server.sent.try_recv().is_err(), "no further requests, in particular no reattach for -1");
}

#[tokio::test]
async fn best_effort_resume_drops_handles_that_fail_to_reattach() {
    let (factory, mut new_servers) = support::resumable_socket_factory();
    let config = SessionConfigBuilder::new("wss://engine.example/test")
        .socket_factory(factory)
        .reattach_policy(ReattachPolicy::BestEffort)
        .build()
        .unwrap();
    let session = Session::new(config);
    session.open().await.unwrap();
    let _first_server = new_servers.recv().await.unwrap();

    session.proxy(Handle(3), "Sheet");
    session.suspend().await.unwrap();

    let session_clone = session.clone();
    let resume = tokio::spawn(async move { session_clone.resume().await });

    let mut second_server = new_servers.recv().await.unwrap();
    let frame = second_server.sent.recv().await.unwrap();
    let id = serde_json::from_str::<Value>(&frame).unwrap()["id"].as_u64().unwrap();
    second_server
        .events
        .send(SocketEvent::Message(
            json!({ "id": id, "error": { "code": -32000, "message": "gone" } }).to_string(),
        ))
        .unwrap();

    let outcome = resume.await.unwrap().expect("resume still succeeds under best-effort");
    assert_eq!(outcome.closed, vec![Handle(3)]);
    assert_eq!(session.state(), SessionState::Opened);
}

#[tokio::test]
async fn only_if_attached_resume_closes_the_session_on_any_failure() {
    let (factory, mut new_servers) = support::resumable_socket_factory();
    let config = SessionConfigBuilder::new("wss://engine.example/test")
        .socket_factory(factory)
        .reattach_policy(ReattachPolicy::OnlyIfAttached)
        .build()
        .unwrap();
    let session = Session::new(config);
    session.open().await.unwrap();
    let _first_server = new_servers.recv().await.unwrap();

    session.proxy(Handle(5), "Sheet");
    session.suspend().await.unwrap();

    let session_clone = session.clone();
    let resume = tokio::spawn(async move { session_clone.resume().await });

    let mut second_server = new_servers.recv().await.unwrap();
    let frame = second_server.sent.recv().await.unwrap();
    let id = serde_json::from_str::<Value>(&frame).unwrap()["id"].as_u64().unwrap();
    second_server
        .events
        .send(SocketEvent::Message(
            json!({ "id": id, "error": { "code": -32000, "message": "gone" } }).to_string(),
        ))
        .unwrap();

    let err = resume.await.unwrap().unwrap_err();
    assert!(matches!(err, engine_rpc::Error::Reattach { handle, .. } if handle == Handle(5)));
    assert_eq!(session.state(), SessionState::Closed);
}
