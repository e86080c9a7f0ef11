// Local demo: runs a brainstorm and an NPC exchange against in-memory
// campaign data and the echo completion driver.

use std::sync::Arc;

use anyhow::{Context, Result};
use orator_core::telemetry::{init_telemetry, TelemetryConfig};
use orator_core::{CompletionRegistry, EchoDriver, InMemoryDataService, VoiceRegistry};
use orator_resilience::{Coordinator, CoordinatorConfig};
use orator_worker::{
    AgentContext, CapabilityRouter, NpcAgentFactory, NpcPool, TaskQueue, WorkerConfig,
};
use serde_json::json;

const DEMO_CAMPAIGN: &str = "demo-campaign";

#[tokio::main]
async fn main() -> Result<()> {
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "orator" {
        telemetry_config.service_name = "orator-worker".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("orator_worker=debug,orator_resilience=debug".to_string());
    }
    let _telemetry_guard = init_telemetry(telemetry_config);

    let config = WorkerConfig::from_env();
    tracing::info!(
        max_concurrent = config.max_concurrent,
        npc_pool_capacity = config.npc_pool_capacity,
        rules_version = %config.rules_version,
        "orator-worker demo starting"
    );

    let data = Arc::new(InMemoryDataService::new().with_rows(
        "npcs",
        vec![json!({
            "id": "npc-innkeeper",
            "campaign_id": DEMO_CAMPAIGN,
            "name": "Marta",
            "gender": "female",
            "race": "halfling",
            "occupation": "innkeeper",
            "personality": "warm, nosy",
        })],
    ));
    let coordinator = Arc::new(Coordinator::new(data, CoordinatorConfig::from_env()));

    let completions = CompletionRegistry::new();
    completions.register(EchoDriver::new("echo"));
    let completions = Arc::new(completions);

    let context = AgentContext::new(DEMO_CAMPAIGN);
    let queue = TaskQueue::new(config.max_concurrent);

    let router = CapabilityRouter::with_defaults(
        Arc::clone(&completions),
        context.clone(),
        queue.clone(),
        &config,
    );
    let ideas = router
        .brainstorm("a heist at the harvest festival", &["dm", "session", "npc"], 5)
        .await
        .context("Brainstorm failed")?;
    for idea in &ideas {
        tracing::info!(agent = %idea.agent, content = %idea.content, "Idea");
    }

    let factory = NpcAgentFactory::new(
        coordinator,
        completions,
        Arc::new(VoiceRegistry::new()),
        context,
    );
    let npcs = NpcPool::new(factory, queue, &config);
    let reply = npcs
        .respond("npc-innkeeper", "Any rumours tonight?", None, 10)
        .await
        .context("NPC exchange failed")?;
    tracing::info!(npc = %reply.agent, content = %reply.content, "NPC reply");

    tracing::info!("Demo complete");
    Ok(())
}
