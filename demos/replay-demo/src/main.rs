//! Replays a small recorded session in every pacing mode and prints the
//! delivered events as JSON lines.

use std::{sync::Arc, time::Duration};

use agent_replay_core::{
    ReplayStatus,
    traits::{Checkpoint, HistoryRecord, RecordKind},
};
use agent_replay_engine::{
    ReplayEngine, ReplayService, ReplaySettings,
    storage::{MemoryCache, MemoryHistoryStore},
};
use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SESSION: &str = "demo-session";

fn seed(store: &MemoryHistoryStore) -> anyhow::Result<()> {
    let t0 = Utc::now() - chrono::Duration::minutes(5);
    let at = |secs: i64| t0 + chrono::Duration::seconds(secs);

    let mut question = HistoryRecord::new("r0", RecordKind::Message, at(0), SESSION)
        .with_data(json!({"content": "What is the weather in Oslo?"}));
    question.message_type = Some("human".to_string());
    let mut request = HistoryRecord::new("r1", RecordKind::ModelRequest, at(1), SESSION)
        .with_data(json!({"messages": [{"role": "user", "content": "What is the weather in Oslo?"}]}));
    request.provider = Some("openai".to_string());

    store.insert_records([
        HistoryRecord::new("r-start", RecordKind::WorkflowStart, at(0), SESSION),
        question,
        request,
        HistoryRecord::new("r2", RecordKind::ToolCall, at(2), SESSION)
            .with_data(json!({"name": "weather", "arguments": {"city": "Oslo"}})),
        HistoryRecord::new("r3", RecordKind::Error, at(3), SESSION)
            .with_data(json!({"message": "weather service timed out"})),
        HistoryRecord::new("r4", RecordKind::ToolCall, at(5), SESSION)
            .with_data(json!({"name": "weather", "arguments": {"city": "Oslo"}})),
        HistoryRecord::new("r5", RecordKind::ToolResult, at(6), SESSION)
            .with_data(json!({"temperature_c": 4})),
        HistoryRecord::new("r6", RecordKind::TokenUsage, at(7), SESSION)
            .with_data(json!({"input_tokens": 180, "output_tokens": 42})),
        HistoryRecord::new("r7", RecordKind::ModelResponse, at(7), SESSION)
            .with_data(json!({"content": "It is 4°C in Oslo."})),
        HistoryRecord::new("r-end", RecordKind::WorkflowEnd, at(8), SESSION),
    ])?;
    store.insert_checkpoint(Checkpoint {
        id: "c0".to_string(),
        session_id: SESSION.to_string(),
        thread_id: None,
        created_at: at(4),
        metadata: std::collections::HashMap::new(),
    })?;
    Ok(())
}

/// Start a replay, resume it whenever it pauses, and print what it delivers.
async fn run(service: &ReplayService, request: serde_json::Value) -> anyhow::Result<()> {
    let engine = service.engine();
    let replay_id = service.start_replay(SESSION, request).await?;
    let mut events = engine.replay_stream(replay_id).await?;

    let resumer = async {
        loop {
            match engine.get_replay_session(replay_id).await.map(|s| s.status) {
                Some(ReplayStatus::Paused) => {
                    tracing::info!(%replay_id, "Resuming");
                    engine.resume_replay(replay_id).await?;
                }
                Some(status) if status.is_terminal() => return anyhow::Ok(()),
                None => return Ok(()),
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let printer = async {
        while let Some(event) = events.next().await {
            println!("{}", serde_json::to_string(&event)?);
        }
        anyhow::Ok(())
    };
    let (resumed, printed) = tokio::join!(resumer, printer);
    resumed?;
    printed?;

    let status = service
        .get_replay_status(replay_id)
        .await
        .context("replay vanished")?;
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = ReplaySettings::load()?;
    let store = Arc::new(MemoryHistoryStore::new());
    seed(&store)?;

    let engine = Arc::new(ReplayEngine::new(
        store.clone(),
        Arc::new(settings),
        Arc::new(MemoryCache::new()),
    ));
    let service = ReplayService::new(engine, store);

    println!(
        "{}",
        serde_json::to_string(&service.session_summary(SESSION).await?)?
    );

    for request in [
        json!({"mode": "real_time", "speed": 10.0}),
        json!({"mode": "fast_forward"}),
        json!({"mode": "step_by_step", "filters": {"eventTypes": ["tool_call", "error"]}}),
        json!({"mode": "analysis", "maxEvents": 8}),
    ] {
        tracing::info!(%request, "Replaying");
        run(&service, request).await?;
    }

    Ok(())
}
