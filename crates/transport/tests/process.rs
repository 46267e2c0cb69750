use std::collections::HashMap;
use std::path::Path;

use rl_transport::config::AgentBackendConfig;
use rl_transport::event::AgentEvent;
use rl_transport::process::AgentProcess;

fn echo_backend(script: &str) -> AgentBackendConfig {
    AgentBackendConfig {
        command: "/bin/sh".into(),
        args: vec!["-c".into(), script.into()],
        env: HashMap::new(),
        resume_arg: None,
        startup_timeout_ms: 5_000,
    }
}

#[tokio::test]
async fn streams_text_then_done() {
    let config = echo_backend(
        r#"cat >/dev/null; echo '{"type":"text","text":"hi"}'; echo '{"type":"done"}'"#,
    );
    let process = AgentProcess::spawn(&config, Path::new("."), "hello", None)
        .await
        .unwrap();

    let first = process.next_event().await.unwrap().unwrap();
    assert!(matches!(first, AgentEvent::Text { text } if text == "hi"));

    let second = process.next_event().await.unwrap().unwrap();
    assert!(matches!(second, AgentEvent::Done));
    assert!(!process.is_alive());
}

#[tokio::test]
async fn skips_non_json_lines_on_stdout() {
    let config = echo_backend(
        r#"cat >/dev/null; echo "warming up"; echo '{"type":"text","text":"ok"}'; echo '{"type":"done"}'"#,
    );
    let process = AgentProcess::spawn(&config, Path::new("."), "hello", None)
        .await
        .unwrap();

    let event = process.next_event().await.unwrap().unwrap();
    assert!(matches!(event, AgentEvent::Text { text } if text == "ok"));
}

#[tokio::test]
async fn interrupt_kills_child_and_marks_dead() {
    let config = echo_backend("cat >/dev/null; sleep 30");
    let process = AgentProcess::spawn(&config, Path::new("."), "hello", None)
        .await
        .unwrap();
    assert!(process.is_alive());
    process.interrupt().await.unwrap();
    assert!(!process.is_alive());
}
