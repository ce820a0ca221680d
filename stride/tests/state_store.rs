//! File-store behavior: round-trips, forward compatibility, atomicity.

#![allow(clippy::unwrap_used)]

use assert_fs::TempDir;
use assert_fs::prelude::*;
use chrono::Utc;
use serde_json::json;

use stride::error::ErrorKind;
use stride::llm::{AgentAction, LlmDecision, ToolInvocation};
use stride::state::{AgentState, FileStateStore, StateStore, Turn};
use stride::tool::{ToolCall, ToolResult};

fn populated_state(agent_id: &str) -> AgentState {
    let mut state = AgentState::new(agent_id, "plan a trip");
    for index in 0..3 {
        let mut turn = Turn::new(index).with_decision(LlmDecision::new(AgentAction::ToolCall(
            ToolInvocation::new("search", json!({"q": index})),
        )));
        let call = ToolCall::new("search", json!({"q": index}), index);
        let result = ToolResult::success(&call, json!({"hits": index}), Utc::now(), 7);
        turn.record_single(call, result);
        state.push_turn(turn);
    }
    state
}

#[tokio::test]
async fn save_then_load_returns_an_equal_state() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    let state = populated_state("traveller");
    store.save(&state).await.unwrap();

    let loaded = store.load("traveller").await.unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn missing_state_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());
    assert!(store.load("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_fields_survive_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    let state = populated_state("future");
    store.save(&state).await.unwrap();

    // A newer writer added fields this version does not know about.
    let path = store.path_for("future");
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["schema_rev"] = json!(9);
    value["turns"][0]["trace_id"] = json!("abc-123");
    std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

    let loaded = store.load("future").await.unwrap().unwrap();
    assert_eq!(loaded.extra["schema_rev"], 9);
    assert_eq!(loaded.turns[0].extra["trace_id"], "abc-123");

    // And they are written back out on the next save.
    store.save(&loaded).await.unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["schema_rev"], 9);
    assert_eq!(value["turns"][0]["trace_id"], "abc-123");
}

#[tokio::test]
async fn corrupt_file_is_a_persist_error() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());
    dir.child("broken.json").write_str("{not json").unwrap();

    let error = store.load("broken").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StatePersistError);
}

#[tokio::test]
async fn non_contiguous_turn_indices_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    let state = populated_state("gappy");
    store.save(&state).await.unwrap();

    let path = store.path_for("gappy");
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["turns"][1]["index"] = json!(7);
    std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

    let error = store.load("gappy").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StatePersistError);
}

#[tokio::test]
async fn saves_leave_no_temp_files_behind() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    for _ in 0..3 {
        store.save(&populated_state("tidy")).await.unwrap();
    }

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    assert!(dir.child("tidy.json").path().exists());
}

#[tokio::test]
async fn awkward_agent_ids_get_portable_file_names() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    let state = AgentState::new("team/alpha:bot #1", "g");
    store.save(&state).await.unwrap();

    let loaded = store.load("team/alpha:bot #1").await.unwrap().unwrap();
    assert_eq!(loaded.agent_id, "team/alpha:bot #1");
    assert!(dir.child("team_alpha_bot__1.json").path().exists());
}

#[tokio::test]
async fn delete_removes_the_state() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path());

    store.save(&populated_state("gone")).await.unwrap();
    store.delete("gone").await.unwrap();
    assert!(store.load("gone").await.unwrap().is_none());

    // Deleting an absent state is fine.
    store.delete("gone").await.unwrap();
}
