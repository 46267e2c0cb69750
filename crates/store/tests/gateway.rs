use chrono::Utc;
use tempfile::tempdir;

use rl_store::gateway::StoreGateway;
use rl_store::types::*;

fn gateway() -> StoreGateway {
    let dir = tempdir().expect("tempdir");
    StoreGateway::open(dir.path()).expect("open store")
}

fn new_task(working_dir: &str, title: &str, priority: i32, blocked_by: Vec<String>) -> Task {
    let now = Utc::now();
    Task {
        id: uuid::Uuid::new_v4().to_string(),
        working_dir: working_dir.into(),
        title: title.into(),
        description: None,
        acceptance_criteria: None,
        context_summary: None,
        scope_paths: vec![],
        required_tools: vec![],
        task_type: None,
        tags: vec![],
        priority,
        status: TaskStatus::Backlog,
        blocked_by,
        claimed_by_session_id: None,
        claimed_by_agent_id: None,
        claimed_at: None,
        started_at: None,
        completed_at: None,
        attempt_count: 0,
        outcome: None,
        completion_notes: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn conversation_blocks_get_dense_ordinals() {
    let store = gateway();
    let session = store
        .create_session(Session::new("s1".into(), "/tmp/wd".into()))
        .unwrap();

    let blocks = vec![
        ConversationBlock {
            ordinal: 99, // caller-supplied ordinal must be ignored
            kind: BlockKind::Text,
            text: Some("hi".into()),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            is_error: None,
        },
        ConversationBlock {
            ordinal: 0,
            kind: BlockKind::ToolUse,
            text: None,
            tool_use_id: Some("tu1".into()),
            tool_name: Some("grep".into()),
            tool_input: Some(serde_json::json!({"pattern": "foo"})),
            is_error: None,
        },
    ];

    let conv = store
        .insert_conversation_with_blocks(NewConversation {
            session_id: session.id.clone(),
            role: ConversationRole::Assistant,
            timestamp: Utc::now(),
            personality: None,
            medium: None,
            user_id: None,
            metrics: ConversationMetrics::default(),
            prompt_summary: None,
            blocks,
        })
        .unwrap();

    let ordinals: Vec<u32> = conv.blocks.iter().map(|b| b.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1]);
    assert!(store.tool_use_id_exists(&session.id, "tu1"));
}

#[test]
fn task_with_no_dependencies_is_ready_immediately() {
    let store = gateway();
    let task = store.insert_task(new_task("/wd", "first", 0, vec![])).unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
}

#[test]
fn blocked_task_becomes_ready_only_after_all_dependencies_done() {
    let store = gateway();
    let dep_a = store.insert_task(new_task("/wd", "a", 0, vec![])).unwrap();
    let dep_b = store.insert_task(new_task("/wd", "b", 0, vec![])).unwrap();
    let child = store
        .insert_task(new_task("/wd", "c", 0, vec![dep_a.id.clone(), dep_b.id.clone()]))
        .unwrap();
    assert_eq!(child.status, TaskStatus::Blocked);

    store.update_task(&dep_a.id, |t| t.status = TaskStatus::Done).unwrap();
    let child = store.load_task(&child.id).unwrap();
    assert_eq!(child.status, TaskStatus::Blocked, "one dependency still open");

    store.update_task(&dep_b.id, |t| t.status = TaskStatus::Done).unwrap();
    let child = store.load_task(&child.id).unwrap();
    assert_eq!(child.status, TaskStatus::Ready, "both dependencies done");
}

#[test]
fn concurrent_claims_yield_exactly_one_winner() {
    use std::sync::Arc;
    use std::thread;

    let store = Arc::new(gateway());
    store.insert_task(new_task("/wd", "only", 0, vec![])).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.claim_task_atomically("/wd", None, &format!("session-{i}"), None)
        }));
    }

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn higher_priority_task_is_claimed_first() {
    let store = gateway();
    store.insert_task(new_task("/wd", "low", 0, vec![])).unwrap();
    let high = store.insert_task(new_task("/wd", "high", 10, vec![])).unwrap();

    let claimed = store
        .claim_task_atomically("/wd", None, "session-1", None)
        .unwrap();
    assert_eq!(claimed.id, high.id);
}
