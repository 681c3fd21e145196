//! End-to-end tests for the palette workflow over a file-backed session store

use serde_json::{json, Value};
use stepgraph_cli::config::StepgraphConfig;
use stepgraph_cli::workflow::{self, Turn};
use stepgraph_cli::{open_engine, palette};
use stepgraph_core::{Engine, Termination};
use tempfile::TempDir;

async fn engine(dir: &TempDir, max_chat_iterations: u64) -> Engine {
    let mut config = StepgraphConfig::default();
    config.workflow.max_chat_iterations = max_chat_iterations;
    open_engine(&config, dir.path()).await.unwrap()
}

fn turn(message: &str, image_file: Option<&str>) -> Value {
    Turn {
        message: message.to_string(),
        image_file: image_file.map(str::to_string),
    }
    .to_value()
}

#[tokio::test]
async fn test_single_turn_recolor() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    let result = engine
        .submit(
            None,
            turn("here's my photo, warm autumn colors and recolor", Some("/photos/cat.png")),
        )
        .await
        .unwrap();

    assert!(!result.resumable);
    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.state["result"]["output"], json!("cat_recolored_1.png"));
    assert_eq!(result.state["image"], json!("/photos/cat.png"));
    assert!(palette::is_ready(result.state.get("palette")));
    assert_eq!(result.state["chat_iterations"], json!(1));
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_multi_turn_conversation() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    let first = engine.submit(Some("chat-1"), turn("hello", None)).await.unwrap();
    assert!(first.resumable);
    let interrupt = first.interrupt.unwrap();
    assert_eq!(interrupt.node, workflow::CHAT_AGENT);
    assert_eq!(interrupt.value["type"], json!("waiting_for_input"));

    let second = engine
        .submit(
            Some("chat-1"),
            turn("#ff0000 #00ff00 #0000ff #ffff00 #00ffff #ff00ff", None),
        )
        .await
        .unwrap();
    assert!(second.resumable, "still waiting for an image");
    assert_eq!(second.state["palette_source"], json!("user_manual"));
    assert_eq!(second.state["palette"][0], json!([255, 0, 0]));

    let third = engine
        .submit(Some("chat-1"), turn("recolor it please", Some("/photos/dog.jpg")))
        .await
        .unwrap();
    assert_eq!(third.termination, Termination::Completed);
    assert_eq!(third.state["result"]["output"], json!("dog_recolored_1.png"));
    assert_eq!(third.state["chat_iterations"], json!(3));
    assert!(third.version > second.version);
}

#[tokio::test]
async fn test_chat_turns_capped() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 2).await;

    let first = engine.submit(Some("idle"), turn("hello", None)).await.unwrap();
    assert!(first.resumable);

    let second = engine.submit(Some("idle"), turn("hello again", None)).await.unwrap();
    assert!(!second.resumable);
    assert_eq!(second.termination, Termination::IterationLimit);
    assert_eq!(second.state["chat_iterations"], json!(2));
}

#[tokio::test]
async fn test_unsupported_image_keeps_conversation_going() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    let result = engine
        .submit(Some("gif"), turn("look at this", Some("/photos/anim.gif")))
        .await
        .unwrap();
    assert_eq!(result.error.as_deref(), Some("Unsupported format: anim.gif"));
    assert!(result.resumable);
    assert!(result.state.get("image").is_none());
}

#[tokio::test]
async fn test_select_palette_candidate() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    engine
        .submit(
            Some("pick"),
            turn("#111111 #222222 #333333 #444444 #555555 #666666", None),
        )
        .await
        .unwrap();
    let varied = engine
        .submit(Some("pick"), turn("make it cooler", None))
        .await
        .unwrap();
    let candidates = varied.state["palette_candidates"].as_array().unwrap().clone();
    assert_eq!(candidates.len(), 3);
    assert_eq!(varied.state["palette"], candidates[0]["colors"]);

    let selected = workflow::select_palette(&engine, "pick", 2).await.unwrap();
    assert_eq!(selected.state["palette"], candidates[2]["colors"]);
    assert!(selected.resumable, "selection must not disturb the pending turn");
    assert_eq!(selected.version, varied.version + 1);

    assert!(workflow::select_palette(&engine, "pick", 7).await.is_err());
}

#[tokio::test]
async fn test_select_palette_without_candidates() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    engine.submit(Some("empty"), turn("hello", None)).await.unwrap();
    assert!(workflow::select_palette(&engine, "empty", 0).await.is_err());
    assert!(workflow::select_palette(&engine, "missing", 0).await.is_err());
}

#[tokio::test]
async fn test_session_survives_engine_restart() {
    let dir = TempDir::new().unwrap();

    let first = engine(&dir, 10)
        .await
        .submit(Some("durable"), turn("hello", None))
        .await
        .unwrap();
    assert!(first.resumable);

    let reopened = engine(&dir, 10).await;
    let inspected = reopened.inspect("durable").await.unwrap();
    assert_eq!(inspected.pending_nodes, vec![workflow::CHAT_AGENT.to_string()]);

    let done = reopened
        .submit(Some("durable"), turn("warm palette and recolor", Some("/p/sunset.webp")))
        .await
        .unwrap();
    assert_eq!(done.termination, Termination::Completed);
    assert_eq!(done.state["result"]["output"], json!("sunset_recolored_1.png"));

    let sessions = reopened.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(reopened.delete_session("durable").await.unwrap());
}

#[tokio::test]
async fn test_finished_session_restarts() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, 10).await;

    let done = engine
        .submit(Some("again"), turn("warm colors, recolor", Some("/p/a.png")))
        .await
        .unwrap();
    assert_eq!(done.termination, Termination::Completed);

    let second = engine
        .submit(Some("again"), turn("recolor again", None))
        .await
        .unwrap();
    assert_eq!(second.termination, Termination::Completed);
    assert_eq!(second.state["recolor_count"], json!(2));
    assert_eq!(second.state["result"]["output"], json!("a_recolored_2.png"));
    assert_eq!(second.state["chat_iterations"], json!(1));
}
