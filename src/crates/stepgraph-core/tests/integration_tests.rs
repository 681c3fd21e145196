//! End-to-end tests for the engine: supersteps, fan-out, interrupts, the iteration
//! guard and checkpoint persistence working together.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepgraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointSource, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore, PendingNode, SessionSummary,
};
use stepgraph_core::{
    AppendReducer, Dispatch, SumReducer, Engine, EngineConfig, GraphError, IterationGuard, NodeError,
    NodeOutput, ResumeInput, Route, State, StateGraph, Suspension, Termination, TERMINAL,
};

fn obj(value: Value) -> State {
    value.as_object().cloned().unwrap()
}

fn engine_with(graph: StateGraph, store: Arc<dyn CheckpointStore>) -> Engine {
    Engine::new(Arc::new(graph.compile().unwrap()), store, EngineConfig::default()).unwrap()
}

fn engine(graph: StateGraph) -> Engine {
    engine_with(graph, Arc::new(InMemoryCheckpointStore::new()))
}

/// Counters shared with the listen node's two halves
#[derive(Default)]
struct ListenProbe {
    body_runs: AtomicUsize,
    resume_runs: AtomicUsize,
}

/// `listen` is interruptible and counted by the guard. Its first pass greets; every
/// later pass suspends. The continuation records the payload's `value` together with
/// the context saved by the body. `listen` loops back to itself through the guard.
fn listening_graph(ceiling: u64, probe: Arc<ListenProbe>) -> StateGraph {
    let guard = IterationGuard::new(ceiling).counting("listen");
    let router_guard = guard.clone();
    let body_probe = probe.clone();
    let resume_probe = probe;

    let mut graph = StateGraph::new();
    graph.add_interruptible_node(
        "listen",
        move |state: State| {
            let probe = body_probe.clone();
            async move {
                probe.body_runs.fetch_add(1, Ordering::SeqCst);
                let iteration = state
                    .get("iteration_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                if iteration == 0 {
                    return Ok::<_, NodeError>(NodeOutput::Update(obj(json!({"greeted": true}))));
                }
                Ok(NodeOutput::Suspend(
                    Suspension::new(json!({"type": "waiting_for_input", "iteration": iteration}))
                        .with_context(json!({"asked_at": iteration})),
                ))
            }
        },
        move |input: ResumeInput| {
            let probe = resume_probe.clone();
            async move {
                probe.resume_runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, NodeError>(obj(json!({
                    "observed": input.payload.get("value").cloned().unwrap_or(Value::Null),
                    "asked_at": input.context["asked_at"],
                })))
            }
        },
    );
    graph.set_entry("listen");
    graph.add_conditional_edge(
        "listen",
        move |state: &State| router_guard.loop_back(state, "listen"),
        ["listen", TERMINAL],
    );
    graph.set_iteration_guard(guard);
    graph
}

/// Store wrapper whose saves can be switched off
struct FlakyStore {
    inner: InMemoryCheckpointStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            fail_saves: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn load(&self, session_id: &str) -> stepgraph_checkpoint::Result<Option<Checkpoint>> {
        self.inner.load(session_id).await
    }

    async fn save(&self, session_id: &str, checkpoint: Checkpoint) -> stepgraph_checkpoint::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CheckpointError::storage("disk unavailable"));
        }
        self.inner.save(session_id, checkpoint).await
    }

    async fn delete(&self, session_id: &str) -> stepgraph_checkpoint::Result<bool> {
        self.inner.delete(session_id).await
    }

    async fn list_sessions(&self) -> stepgraph_checkpoint::Result<Vec<SessionSummary>> {
        self.inner.list_sessions().await
    }

    async fn sweep_expired(&self, ttl: Duration) -> stepgraph_checkpoint::Result<usize> {
        self.inner.sweep_expired(ttl).await
    }
}

#[tokio::test]
async fn test_single_node_run_completes() {
    let mut graph = StateGraph::new();
    graph.add_node("entry", |_s| async move { Ok::<_, NodeError>(obj(json!({"counter": 1}))) });
    graph.set_entry("entry");
    graph.add_edge("entry", TERMINAL);

    let result = engine(graph).submit(None, json!({"user": "ana"})).await.unwrap();

    assert!(!result.resumable);
    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.state["counter"], json!(1));
    assert_eq!(result.state["user"], json!("ana"));
    assert!(result.error.is_none());
    assert!(result.interrupt.is_none());
}

#[tokio::test]
async fn test_interrupt_then_resume_runs_only_the_continuation() {
    let probe = Arc::new(ListenProbe::default());
    let engine = engine(listening_graph(10, probe.clone()));

    let first = engine.submit(Some("chat"), json!({})).await.unwrap();
    assert!(first.resumable);
    assert_eq!(first.termination, Termination::Interrupted);
    let interrupt = first.interrupt.clone().unwrap();
    assert_eq!(interrupt.node, "listen");
    assert_eq!(interrupt.value["type"], json!("waiting_for_input"));
    assert_eq!(interrupt.value["iteration"], json!(1));
    // The suspending pass changes nothing
    assert_eq!(first.state, obj(json!({"greeted": true, "iteration_count": 1})));
    assert_eq!(probe.body_runs.load(Ordering::SeqCst), 2);

    let second = engine.submit(Some("chat"), json!({"value": "x"})).await.unwrap();
    assert_eq!(second.state["observed"], json!("x"));
    assert_eq!(second.state["asked_at"], json!(1));
    assert_eq!(probe.resume_runs.load(Ordering::SeqCst), 1);
    // One more body run: the loop-back pass that suspended again, not a replay
    assert_eq!(probe.body_runs.load(Ordering::SeqCst), 3);
    assert!(second.resumable);
    assert_ne!(second.interrupt.unwrap().token_id, interrupt.token_id);
}

#[tokio::test]
async fn test_iteration_guard_terminates_on_ceiling() {
    let probe = Arc::new(ListenProbe::default());
    let engine = engine(listening_graph(3, probe));

    let mut counts = Vec::new();
    let mut last = None;
    for (i, input) in [json!({}), json!({"value": "a"}), json!({"value": "b"})]
        .into_iter()
        .enumerate()
    {
        let result = engine.submit(Some("loop"), input).await.unwrap();
        let inspected = engine.inspect("loop").await.unwrap();
        counts.push(inspected.iteration_count);
        if i < 2 {
            assert!(result.resumable, "submission {} should still loop", i + 1);
        }
        last = Some(result);
    }

    assert_eq!(counts, vec![1, 2, 3]);
    let last = last.unwrap();
    assert!(!last.resumable);
    assert_eq!(last.termination, Termination::IterationLimit);
    assert_eq!(last.state["observed"], json!("b"));
}

#[tokio::test]
async fn test_dispatch_fan_out_runs_each_target_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let worker_calls = calls.clone();

    let mut graph = StateGraph::new();
    graph.add_node("plan", |_s| async move { Ok::<_, NodeError>(obj(json!({"planned": true}))) });
    graph.add_node("worker", move |state: State| {
        let calls = worker_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let shard = state.get("shard").cloned().unwrap_or(Value::Null);
            Ok::<_, NodeError>(obj(json!({"results": [shard], "last_shard": shard})))
        }
    });
    graph.set_entry("plan");
    graph.add_conditional_edge(
        "plan",
        |_state: &State| {
            Route::from(
                (0..3)
                    .map(|shard| Dispatch::new("worker", json!({"shard": shard})))
                    .collect::<Vec<_>>(),
            )
        },
        ["worker"],
    );
    graph.add_finish("worker");
    graph.register_reducer("results", AppendReducer);
    graph.set_initial_state(obj(json!({"results": []})));

    let result = engine(graph).submit(None, json!({})).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.supersteps, 2);
    assert_eq!(result.state["results"], json!([0, 1, 2]));
    // Overrides are per-invocation views and are never committed themselves
    assert!(result.state.get("shard").is_none());
    assert_eq!(result.state["last_shard"], json!(2));
}

#[tokio::test]
async fn test_shared_plain_targets_are_scheduled_once() {
    let joins = Arc::new(AtomicUsize::new(0));
    let join_calls = joins.clone();

    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("left", |_s| async move { Ok::<_, NodeError>(obj(json!({"left": true}))) });
    graph.add_node("right", |_s| async move { Ok::<_, NodeError>(obj(json!({"right": true}))) });
    graph.add_node("join", move |_s| {
        let joins = join_calls.clone();
        async move {
            joins.fetch_add(1, Ordering::SeqCst);
            Ok::<_, NodeError>(State::new())
        }
    });
    graph.set_entry("start");
    graph.add_edge("start", "left");
    graph.add_edge("start", "right");
    graph.add_edge("left", "join");
    graph.add_edge("right", "join");
    graph.add_finish("join");

    let result = engine(graph).submit(None, json!({})).await.unwrap();
    assert_eq!(joins.load(Ordering::SeqCst), 1);
    assert_eq!(result.supersteps, 3);
    assert_eq!(result.state["left"], json!(true));
    assert_eq!(result.state["right"], json!(true));
}

#[tokio::test]
async fn test_failing_node_is_isolated_from_siblings() {
    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("good", |_s| async move { Ok::<_, NodeError>(obj(json!({"good": true}))) });
    graph.add_node("bad", |_s| async move { Err::<State, NodeError>("palette service timed out".into()) });
    graph.add_node("after_good", |_s| async move { Ok::<_, NodeError>(obj(json!({"after_good": true}))) });
    graph.add_node("after_bad", |_s| async move { Ok::<_, NodeError>(obj(json!({"after_bad": true}))) });
    graph.set_entry("start");
    graph.add_edge("start", "good");
    graph.add_edge("start", "bad");
    graph.add_edge("good", "after_good");
    graph.add_edge("bad", "after_bad");
    graph.add_finish("after_good");
    graph.add_finish("after_bad");

    let result = engine(graph).submit(None, json!({})).await.unwrap();

    assert_eq!(result.state["good"], json!(true));
    assert_eq!(result.state["after_good"], json!(true));
    assert!(result.state.get("after_bad").is_none());
    assert_eq!(result.error.as_deref(), Some("palette service timed out"));
    assert_eq!(result.termination, Termination::Completed);
}

#[tokio::test]
async fn test_panicking_node_is_isolated() {
    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("ok", |_s| async move { Ok::<_, NodeError>(obj(json!({"ok": 1}))) });
    graph.add_node("boom", |_s| async move {
        if true {
            panic!("index out of range");
        }
        Ok::<_, NodeError>(State::new())
    });
    graph.set_entry("start");
    graph.add_edge("start", "ok");
    graph.add_edge("start", "boom");
    graph.add_finish("ok");
    graph.add_finish("boom");

    let result = engine(graph).submit(None, json!({})).await.unwrap();
    assert_eq!(result.state["ok"], json!(1));
    assert!(result.error.unwrap().contains("index out of range"));
}

#[tokio::test]
async fn test_node_panicking_before_first_await_is_isolated() {
    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("ok", |_s| async move { Ok::<_, NodeError>(obj(json!({"ok": 1}))) });
    graph.add_node("boom", |s: State| {
        let missing = s["missing_field"].clone();
        async move { Ok::<_, NodeError>(obj(json!({"boom": missing}))) }
    });
    graph.set_entry("start");
    graph.add_edge("start", "ok");
    graph.add_edge("start", "boom");
    graph.add_finish("ok");
    graph.add_finish("boom");

    let result = engine(graph).submit(None, json!({})).await.unwrap();
    assert_eq!(result.state["ok"], json!(1));
    assert!(result.state.get("boom").is_none());
    assert!(result.error.unwrap().contains("panicked"));
    assert_eq!(result.termination, Termination::Completed);
}

#[tokio::test]
async fn test_sum_past_i64_max_commits_without_panicking() {
    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(obj(json!({"total": i64::MAX}))) });
    graph.add_node("add", |_s| async move { Ok::<_, NodeError>(obj(json!({"total": 1}))) });
    graph.set_entry("start");
    graph.add_edge("start", "add");
    graph.add_finish("add");
    graph.register_reducer("total", SumReducer);

    let result = engine(graph).submit(None, json!({})).await.unwrap();
    assert_eq!(result.state["total"].as_f64(), Some(i64::MAX as f64 + 1.0));
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_siblings_of_a_suspended_node_commit_and_do_not_rerun() {
    let sibling_runs = Arc::new(AtomicUsize::new(0));
    let ask_runs = Arc::new(AtomicUsize::new(0));

    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| async move { Ok::<_, NodeError>(State::new()) });
    {
        let sibling_runs = sibling_runs.clone();
        graph.add_node("sibling", move |_s| {
            let runs = sibling_runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, NodeError>(obj(json!({"sibling": true})))
            }
        });
    }
    {
        let ask_runs = ask_runs.clone();
        graph.add_interruptible_node(
            "ask",
            move |_s| {
                let runs = ask_runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, NodeError>(NodeOutput::Suspend(Suspension::new(json!({"type": "question"}))))
                }
            },
            |input: ResumeInput| async move { Ok::<_, NodeError>(obj(json!({"answer": input.payload}))) },
        );
    }
    graph.set_entry("start");
    graph.add_edge("start", "sibling");
    graph.add_edge("start", "ask");
    graph.add_finish("sibling");
    graph.add_finish("ask");

    let engine = engine(graph);
    let paused = engine.submit(Some("mixed"), json!({})).await.unwrap();
    assert!(paused.resumable);
    assert_eq!(paused.state["sibling"], json!(true));
    assert_eq!(paused.interrupt.as_ref().map(|i| i.node.as_str()), Some("ask"));
    let inspected = engine.inspect("mixed").await.unwrap();
    assert_eq!(inspected.pending_nodes, vec!["ask".to_string()]);

    let done = engine.submit(Some("mixed"), json!("x")).await.unwrap();
    assert!(!done.resumable);
    assert_eq!(done.state["answer"], json!("x"));
    assert_eq!(done.state["sibling"], json!(true));
    assert_eq!(sibling_runs.load(Ordering::SeqCst), 1);
    assert_eq!(ask_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undeclared_route_target_aborts_without_saving() {
    let mut graph = StateGraph::new();
    graph.add_node("analyze", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("chat", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.set_entry("analyze");
    graph.add_conditional_edge("analyze", |_s: &State| Route::to("nowhere"), ["chat", TERMINAL]);
    let engine = engine(graph);

    match engine.submit(Some("bad-route"), json!({})).await {
        Err(GraphError::Routing { edge, target }) => {
            assert_eq!(edge, "analyze -> ?");
            assert_eq!(target, "nowhere");
        }
        other => panic!("expected routing error, got {:?}", other),
    }
    assert!(matches!(
        engine.inspect("bad-route").await,
        Err(GraphError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_terminal_route_requires_declaration() {
    let mut graph = StateGraph::new();
    graph.add_node("analyze", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.add_node("chat", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.set_entry("analyze");
    graph.add_conditional_edge("analyze", |_s: &State| Route::terminal(), ["chat"]);

    let err = engine(graph).submit(None, json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::Routing { target, .. } if target == TERMINAL));
}

#[tokio::test]
async fn test_inspect_never_mutates() {
    let engine = engine(listening_graph(5, Arc::new(ListenProbe::default())));
    engine.submit(Some("still"), json!({})).await.unwrap();

    let first = engine.inspect("still").await.unwrap();
    for _ in 0..5 {
        assert_eq!(engine.inspect("still").await.unwrap(), first);
    }
    assert!(first.resumable);
    assert_eq!(first.pending_nodes, vec!["listen"]);
    assert_eq!(first.iteration_count, 1);
}

#[tokio::test]
async fn test_terminated_session_never_replays_old_token() {
    let probe = Arc::new(ListenProbe::default());
    let engine = engine(listening_graph(2, probe.clone()));

    let first = engine.submit(Some("s"), json!({})).await.unwrap();
    let old_token = first.interrupt.unwrap().token_id;
    let done = engine.submit(Some("s"), json!({"value": "bye"})).await.unwrap();
    assert_eq!(done.termination, Termination::IterationLimit);
    assert_eq!(probe.resume_runs.load(Ordering::SeqCst), 1);

    // Terminal session: restarts at the entry, the continuation does not run again
    let again = engine.submit(Some("s"), json!({"value": "stale"})).await.unwrap();
    assert_eq!(probe.resume_runs.load(Ordering::SeqCst), 1);
    assert!(again.resumable);
    assert_ne!(again.interrupt.unwrap().token_id, old_token);
    assert_eq!(again.state["observed"], json!("bye"));
    assert_eq!(again.state["value"], json!("stale"));
}

#[tokio::test]
async fn test_store_failure_is_retryable() {
    let store = Arc::new(FlakyStore::new());
    let engine = engine_with(listening_graph(5, Arc::new(ListenProbe::default())), store.clone());

    store.fail_saves.store(true, Ordering::SeqCst);
    let err = engine.submit(Some("retry"), json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::Checkpoint(_)));
    assert!(err.is_retryable());
    assert!(store.load("retry").await.unwrap().is_none());

    store.fail_saves.store(false, Ordering::SeqCst);
    let result = engine.submit(Some("retry"), json!({})).await.unwrap();
    assert!(result.resumable);
    assert_eq!(result.version, 2);
}

#[tokio::test]
async fn test_suspended_session_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(ListenProbe::default());

    {
        let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
        let engine = engine_with(listening_graph(5, probe.clone()), store);
        assert!(engine.submit(Some("durable"), json!({})).await.unwrap().resumable);
    }

    let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
    let engine = engine_with(listening_graph(5, probe.clone()), store);
    let resumed = engine.submit(Some("durable"), json!({"value": "after restart"})).await.unwrap();

    assert_eq!(resumed.state["observed"], json!("after restart"));
    assert_eq!(resumed.state["asked_at"], json!(1));
    assert_eq!(probe.resume_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_state_keeps_pending_interrupt() {
    let engine = engine(listening_graph(5, Arc::new(ListenProbe::default())));
    let before = engine.submit(Some("edit"), json!({})).await.unwrap();

    let updated = engine
        .update_state("edit", json!({"selected_palette": ["#112233"]}))
        .await
        .unwrap();
    assert_eq!(updated.state["selected_palette"], json!(["#112233"]));
    assert!(updated.resumable);
    assert_eq!(updated.iteration_count, 1);
    assert_eq!(updated.version, before.version + 1);
    assert_eq!(
        updated.interrupt.map(|i| i.token_id),
        before.interrupt.map(|i| i.token_id)
    );

    assert!(matches!(
        engine.update_state("edit", json!({"iteration_count": 0})).await,
        Err(GraphError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.update_state("edit", json!("text")).await,
        Err(GraphError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.update_state("ghost", json!({})).await,
        Err(GraphError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_abandoned_run_is_reentered_from_pending_nodes() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut graph = StateGraph::new();
    graph.add_node("first", |_s| async move { Ok::<_, NodeError>(obj(json!({"first": true}))) });
    graph.add_node("second", |_s| async move { Ok::<_, NodeError>(obj(json!({"second": true}))) });
    graph.set_entry("first");
    graph.add_edge("first", "second");
    graph.add_finish("second");
    let engine = engine_with(graph, store.clone());

    let mut cp = Checkpoint::new("midway", obj(json!({"first": true})));
    cp.advance(cp.state.clone(), vec![PendingNode::new("second")], 0, CheckpointSource::Loop);
    store.save("midway", cp).await.unwrap();

    let result = engine.submit(Some("midway"), json!({"ignored": 1})).await.unwrap();
    assert_eq!(result.state["second"], json!(true));
    assert!(result.state.get("ignored").is_none());
    assert_eq!(result.supersteps, 1);
    assert_eq!(result.version, 2);
}

#[tokio::test]
async fn test_unguarded_cycle_hits_superstep_backstop() {
    let mut graph = StateGraph::new();
    graph.add_node("spin", |_s| async move { Ok::<_, NodeError>(State::new()) });
    graph.set_entry("spin");
    graph.add_edge("spin", "spin");
    let engine = Engine::new(
        Arc::new(graph.compile().unwrap()),
        Arc::new(InMemoryCheckpointStore::new()),
        EngineConfig::default().with_max_supersteps(5),
    )
    .unwrap();

    let err = engine.submit(Some("spin"), json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::Execution(_)));
    assert_eq!(engine.inspect("spin").await.unwrap().version, 5);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let engine = engine(listening_graph(5, Arc::new(ListenProbe::default())));

    let ids: Vec<String> = (0..8).map(|i| format!("user-{}", i)).collect();
    let results = futures::future::join_all(
        ids.iter().map(|id| engine.submit(Some(id.as_str()), json!({"name": id}))),
    )
    .await;
    for (id, result) in ids.iter().zip(results) {
        let result = result.unwrap();
        assert_eq!(&result.session_id, id);
        assert_eq!(result.state["name"], json!(id));
        assert!(result.resumable);
    }

    assert_eq!(engine.list_sessions().await.unwrap().len(), 8);
    assert!(engine.delete_session("user-0").await.unwrap());
    assert_eq!(engine.list_sessions().await.unwrap().len(), 7);
    assert_eq!(engine.sweep_expired(Duration::from_secs(3600)).await.unwrap(), 0);
}
