use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use distributed_grid::bus::bus::MessageBus;
use distributed_grid::bus::handlers::handle_bus_message;
use distributed_grid::membership::service::MembershipService;
use distributed_grid::registry::handlers::*;
use distributed_grid::registry::map::TaskRegistry;
use distributed_grid::registry::partitioner::PartitionManager;
use distributed_grid::runtime::engine::ExecutionEngine;
use distributed_grid::scheduler::scheduler::Scheduler;
use distributed_grid::scheduler::selector::UniformRandomSelector;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--runtime]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000 --runtime",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut is_runtime = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed_nodes.push(args[i + 1].parse()?);
                i += 2;
            }
            "--runtime" => {
                is_runtime = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    let http_port = bind_addr.port() + 1000;
    let http_addr = SocketAddr::new(bind_addr.ip(), http_port);

    tracing::info!("Starting node on {} (runtime: {})", bind_addr, is_runtime);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let membership =
        MembershipService::new(bind_addr, http_addr, seed_nodes, is_runtime).await?;
    tracing::info!("Node ID: {:?}", membership.local_node.id);

    // 2. Task registry:
    let partitioner = Arc::new(PartitionManager::new(membership.clone()));
    let registry = Arc::new(TaskRegistry::new(membership.clone(), partitioner.clone()));

    // 3. Message bus:
    let bus = MessageBus::new(membership.clone());

    // 4. Scheduler:
    let selector = Arc::new(UniformRandomSelector);
    let scheduler = Scheduler::new(
        registry.clone(),
        bus.clone(),
        membership.clone(),
        selector,
    );
    scheduler.start().await;

    // 5. Execution engine (only meaningful with --runtime, but kill requests
    //    for finished tasks are harmless no-ops everywhere):
    let engine = ExecutionEngine::new(registry.clone(), bus.clone(), membership.clone());
    engine.start().await;

    // 6. HTTP router:
    let app = Router::new()
        .route("/task/submit", post(handle_submit_task))
        .route("/task/status/:id", get(handle_get_task_status))
        .route("/internal/task/submit", post(handle_internal_submit))
        .route("/internal/task/get/:id", get(handle_get_task_internal))
        .route("/internal/task/put", post(handle_put_entry))
        .route("/internal/task/replicate", post(handle_replicate_entry))
        .route("/internal/task/partition/:p", get(handle_partition_dump))
        .route("/internal/task/lock", post(handle_lock))
        .route("/internal/task/unlock", post(handle_unlock))
        .route("/internal/bus", post(handle_bus_message))
        .layer(Extension(registry.clone()))
        .layer(Extension(bus.clone()));

    // 7. Spawn membership service:
    let service_clone = membership.clone();
    tokio::spawn(async move {
        service_clone.start().await;
    });

    // 8. Spawn stats reporter:
    let stats_membership = membership.clone();
    let stats_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let alive = stats_membership.get_alive_members();
            tracing::info!(
                "Cluster stats: {} alive nodes, {} local entries",
                alive.len(),
                stats_registry.local_entry_count()
            );
            for node in alive {
                tracing::info!(
                    "  - {:?} gossip={} http={} runtime={} (inc={})",
                    node.id,
                    node.gossip_addr,
                    node.http_addr,
                    node.is_runtime,
                    node.incarnation
                );
            }
        }
    });

    // 9. Start HTTP server:
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
