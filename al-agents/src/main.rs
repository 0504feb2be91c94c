//! Service entry point: wire the memory layer, the workflow runtime, the
//! reasoning graphs, the default posting schedules and the HTTP facade.

use std::sync::Arc;

use agentloom::event_bus::{EventBus, StdOutSink};
use agentloom::workflow::{
    cron::ScheduleSpec, ActivityRegistry, ActivityWorker, OverlapPolicy, Schedule, Scheduler,
    SqliteHistoryStore, WorkflowRuntime,
};
use al_agents::activities::{self, GraphCatalog};
use al_agents::env::RuntimeEnv;
use al_agents::external::{
    GraphApiPublisher, HttpObjectStorage, InMemoryObjectStorage, LoggingReportSink, ObjectStorage,
};
use al_agents::graphs::{build_feed_publisher_graph, build_invoice_matcher_graph};
use al_agents::llm::TemplateLlm;
use al_agents::server::{self, AppState};
use al_agents::workflows;
use al_memory::{LruCache, OpenAiConfig, OpenAiEmbedder, SemanticMemory, SqliteVectorStore};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agentloom=info,al_agents=info")),
        )
        .init();
}

async fn install_default_schedules(scheduler: &Scheduler) {
    let defaults = [
        (
            "pomandi-daily-posts",
            "09:00,18:00",
            json!({"brand": "pomandi", "platform": "instagram", "photo_key": "products/pomandi/daily.jpg"}),
            "Daily social media posts for the Pomandi brand",
        ),
        (
            "costume-daily-posts",
            "10:00,19:00",
            json!({"brand": "costume", "platform": "instagram", "photo_key": "products/costume/daily.jpg"}),
            "Daily social media posts for the Costume brand",
        ),
    ];
    for (id, spec, input, note) in defaults {
        let schedule = Schedule {
            id: id.to_string(),
            spec: ScheduleSpec::parse(spec).expect("default schedule spec is valid"),
            workflow_type: "feed_publisher".to_string(),
            input_template: input,
            paused: false,
            note: note.to_string(),
            overlap: OverlapPolicy::Skip,
        };
        match scheduler.create(schedule).await {
            Ok(()) => tracing::info!(schedule = id, spec, "schedule installed"),
            Err(e) => tracing::warn!(schedule = id, error = %e, "schedule not installed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let env = RuntimeEnv::from_env()?;

    // Memory layer: cache, durable vector store, OpenAI embeddings.
    let cache = Arc::new(LruCache::with_capacity(env.cache_capacity_bytes));
    let store = Arc::new(SqliteVectorStore::open(&env.memory_db_path).await?);
    let mut embedder_config = OpenAiConfig::new(env.openai_api_key.clone());
    embedder_config.model = env.embedding_model.clone();
    let memory = Arc::new(
        SemanticMemory::builder()
            .with_embedder(Arc::new(OpenAiEmbedder::new(embedder_config)))
            .with_store(store)
            .with_cache(cache)
            .build()?,
    );
    memory.initialize().await?;
    tracing::info!(db = %env.memory_db_path.display(), "memory layer ready");

    // Progress events go to stdout; the bus sender threads through graphs,
    // the runtime and the scheduler.
    let bus = EventBus::with_sink(StdOutSink::default());
    let event_sender = bus.get_sender();

    // External collaborators.
    let storage: Arc<dyn ObjectStorage> = match &env.media_base_url {
        Some(base_url) => Arc::new(HttpObjectStorage::new(base_url.clone())),
        None => Arc::new(InMemoryObjectStorage::new()),
    };
    let publisher = Arc::new(GraphApiPublisher::new(env.meta_graph_token.clone()));
    let llm = Arc::new(TemplateLlm);
    let report_sink = Arc::new(LoggingReportSink);

    // Reasoning graphs and the activity library.
    let catalog = Arc::new(GraphCatalog {
        invoice_matcher: Arc::new(build_invoice_matcher_graph(memory.clone())),
        feed_publisher: Arc::new(build_feed_publisher_graph(
            memory.clone(),
            storage.clone(),
            llm,
            publisher.clone(),
        )),
        event_sender: event_sender.clone(),
    });
    let mut registry = ActivityRegistry::new();
    activities::register_all(
        &mut registry,
        memory.clone(),
        catalog,
        storage,
        publisher,
        report_sink,
    );
    tracing::info!(activities = ?registry.names(), "activity library registered");

    // Workflow runtime over durable histories.
    let worker_slots = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let worker = Arc::new(ActivityWorker::new(Arc::new(registry), worker_slots));
    let history = Arc::new(SqliteHistoryStore::connect(&env.history_db_url).await?);
    let runtime = WorkflowRuntime::new(history, worker);
    runtime.set_event_sender(event_sender.clone());
    workflows::register_all(&runtime).await;

    let resumed = runtime.resume_pending().await?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed executions from history");
    }

    // Scheduling.
    let scheduler = Scheduler::new(runtime.clone());
    scheduler.set_event_sender(event_sender);
    install_default_schedules(&scheduler).await;
    let _fire_loop = scheduler.clone().run();

    // HTTP facade.
    let state = Arc::new(AppState {
        runtime,
        scheduler,
        memory,
    });
    let listener = TcpListener::bind(&env.http_addr).await?;
    tracing::info!(addr = %env.http_addr, "serving");
    axum::serve(listener, server::router(state).into_make_service()).await?;

    Ok(())
}
