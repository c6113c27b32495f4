//! Protocol server tests over the in-memory transport, using the shipped
//! example configuration

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::gateway::ScriptedResponderClient;
use switchboard_core::orchestration::Orchestrator;
use switchboard_core::server::{MemoryTransport, Server};

fn example_config() -> SwitchboardConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../switchboard.example.toml");
    SwitchboardConfig::from_file(path).expect("example configuration loads")
}

fn server(client: Arc<ScriptedResponderClient>) -> Server {
    let orchestrator = Orchestrator::from_config(&example_config(), client).unwrap();
    Server::new(Arc::new(orchestrator))
}

#[test]
fn test_example_config_is_valid() {
    let config = example_config();
    assert_eq!(config.responders.len(), 5);
    assert_eq!(config.session.window_exchanges, 10);
    assert_eq!(config.orchestration.synthesis_responder.as_deref(), Some("coaching"));
    tokio_test::assert_ok!(config.validate());
}

#[tokio::test]
async fn test_conversation_over_protocol() {
    let client = Arc::new(
        ScriptedResponderClient::new()
            .with_reply("flow", "Look at cycle time first.")
            .with_reply("wellness", "Protect focus time."),
    );
    let server = server(client.clone());

    let mut transport = MemoryTransport::new();
    transport.push_json(json!({"id": 1, "op": "dispatch", "session_id": "team-a", "message": "Our velocity dropped this sprint"}));
    transport.push_json(json!({"id": 2, "op": "dispatch", "session_id": "team-a", "message": "And the team feels burnout", "explicit_responder_key": "wellness"}));
    transport.push_line("");
    transport.push_line("{\"id\":3,\"op\":\"teleport\"}");
    transport.push_json(json!({"id": 4, "op": "clear", "session_id": "team-a"}));
    transport.push_json(json!({"id": 5, "op": "clear", "session_id": "never-seen"}));

    server.run(&mut transport).await.unwrap();

    let replies = transport.replies();
    assert_eq!(replies.len(), 5);
    let reply = |id: u64| {
        replies
            .iter()
            .find(|r| r.id == Some(json!(id)))
            .expect("every request is answered")
    };

    let first = reply(1).result.as_ref().unwrap();
    assert_eq!(first["responder_used"], "flow");
    assert_eq!(first["method"], "keyword");
    assert_eq!(first["matched_keywords"], json!(["velocity"]));
    assert_eq!(first["degraded"], false);

    let second = reply(2).result.as_ref().unwrap();
    assert_eq!(second["responder_used"], "wellness");
    assert_eq!(second["method"], "explicit");
    assert_eq!(second["content"], "Protect focus time.");

    assert!(!reply(3).ok);
    assert_eq!(reply(3).error.as_ref().unwrap().kind, "parse");

    assert_eq!(reply(4).result.as_ref().unwrap()["cleared"], true);
    assert_eq!(reply(5).result.as_ref().unwrap()["cleared"], false);

    // Commands for one session complete in order
    let position = |id: u64| replies.iter().position(|r| r.id == Some(json!(id))).unwrap();
    assert!(position(1) < position(2));
    assert!(position(2) < position(4));

    // The second call carried the first exchange as context
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].context_turns, 2);
}

#[tokio::test]
async fn test_route_reports_scores() {
    let server = server(Arc::new(ScriptedResponderClient::new()));
    let reply = server
        .handle_line(r#"{"op":"route","message":"velocity is down and burnout is up"}"#)
        .await;

    let result = reply.result.unwrap();
    assert_eq!(result["responder_key"], "flow");
    let scores = result["scores"].as_array().unwrap();
    assert_eq!(scores.len(), 5);
    assert_eq!(scores[2], json!({"responder_key": "flow", "score": 1}));
    assert_eq!(scores[3], json!({"responder_key": "wellness", "score": 1}));
}

#[tokio::test]
async fn test_synthesize_over_protocol() {
    let client = Arc::new(ScriptedResponderClient::new().with_reply("coaching", "One plan."));
    let server = server(client.clone());

    let reply = server
        .handle_line(r#"{"op":"dispatch","session_id":"s1","message":"velocity and burnout","mode":"synthesize","responder_subset":["flow","wellness"]}"#)
        .await;

    let result = reply.result.unwrap();
    assert_eq!(result["responder_used"], "coaching");
    assert_eq!(result["content"], "One plan.");
    assert_eq!(result["outcome"], "complete");
    assert_eq!(result["contributors"].as_array().unwrap().len(), 3);
    assert_eq!(client.calls_to("flow"), 1);
    assert_eq!(client.calls_to("wellness"), 1);
    assert_eq!(client.calls_to("coaching"), 1);
}
