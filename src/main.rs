// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! edgegateway — on-prem edge video-analytics gateway
//!
//! Usage:
//!   edgegateway run                        --config config.toml
//!   edgegateway status                      --config config.toml
//!   edgegateway camera add --tenant t1       --config config.toml
//!   edgegateway camera remove --id cam1      --config config.toml
//!   edgegateway camera list                  --config config.toml
//!   edgegateway task list                    --config config.toml
//!   edgegateway task show --id <task-id>     --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edgegateway::app::GatewayApp;
use edgegateway::config::Config;

#[derive(Parser)]
#[command(name = "edgegateway", about = "Edge video-analytics gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway: license plane, usage tracker, task executor,
    /// zone analytics and (if enabled) the status surface.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Manage cameras.
    Camera {
        #[command(subcommand)]
        action: CameraAction,
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Inspect background tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum CameraAction {
    /// Register a new camera, gated by the license plane.
    Add {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tenant: String,
    },
    /// Remove a camera and revoke its license.
    Remove {
        #[arg(long)]
        id: String,
    },
    /// List known cameras.
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List all tasks known to the executor.
    List,
    /// Show a single task's state.
    Show {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Status { config } => print_status(config).await,
        Command::Camera { action, config } => camera_command(action, config).await,
        Command::Task { action, config } => task_command(action, config).await,
    }
}

async fn load_app(config_path: PathBuf) -> Arc<GatewayApp> {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match GatewayApp::bootstrap(cfg).await {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!(error = %e, "failed to bootstrap gateway");
            std::process::exit(1);
        }
    }
}

async fn run(config_path: PathBuf) {
    let app = load_app(config_path).await;

    info!(
        cameras = app.registry.list().len(),
        device_id = %app.config.device.device_id,
        "starting edgegateway"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let usage_handle = app.usage_tracker.spawn(shutdown_rx.clone());
    let maintenance_handle = edgegateway::maintenance::spawn(
        app.config.maintenance.clone(),
        app.license_plane.clone(),
        app.registry.clone(),
        app.task_executor.clone(),
        app.config.features.enable_heartbeat,
        shutdown_rx,
    );

    if app.config.api.enabled {
        let api_app = app.clone();
        let port = app.config.api.port;
        tokio::spawn(async move {
            if let Err(e) = edgegateway::api::serve(api_app, port).await {
                error!(error = %e, "status surface exited");
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!(error = %e, "signal error"),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = usage_handle.await {
        warn!(error = %e, "usage tracker task did not shut down cleanly");
    }
    if let Err(e) = maintenance_handle.await {
        warn!(error = %e, "maintenance sweep task did not shut down cleanly");
    }
    app.task_executor.shutdown().await;
}

async fn print_status(config_path: PathBuf) {
    let app = load_app(config_path).await;
    let degraded = app.degraded_status();
    let cameras = app.registry.list();
    let tasks = app.task_executor.list();

    println!("=== edgegateway status ===");
    println!("device        : {}", app.config.device.device_id);
    println!("degraded mode : {}", degraded.degraded);
    println!("last sync     : {}", degraded.last_sync.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("cameras       : {}", cameras.len());
    for cam in &cameras {
        println!("  {} ({}) tenant={}", cam.id, cam.name, cam.tenant_id);
    }
    println!("tasks         : {}", tasks.len());
}

async fn camera_command(action: CameraAction, config_path: PathBuf) {
    let app = load_app(config_path).await;

    match action {
        CameraAction::Add { id, name, tenant } => match app.registry.create_camera(id, name, &tenant).await {
            Ok(camera) => println!("created camera {} ({}) for tenant {}", camera.id, camera.name, camera.tenant_id),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        CameraAction::Remove { id } => match app.registry.delete_camera(&id).await {
            Ok(()) => println!("removed camera {id}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        CameraAction::List => {
            for cam in app.registry.list() {
                println!("{} ({}) tenant={} created={}", cam.id, cam.name, cam.tenant_id, cam.created_at);
            }
        }
    }
}

async fn task_command(action: TaskAction, config_path: PathBuf) {
    let app = load_app(config_path).await;

    match action {
        TaskAction::List => {
            for task in app.task_executor.list() {
                println!("{} [{:?}] {} ({:.0}%) {}", task.task_id, task.state, task.task_type, task.progress * 100.0, task.message);
            }
        }
        TaskAction::Show { id } => {
            let task = app.task_executor.get(&id);
            println!("id       : {}", task.task_id);
            println!("type     : {}", task.task_type);
            println!("target   : {}", task.target_id);
            println!("state    : {:?}", task.state);
            println!("progress : {:.0}%", task.progress * 100.0);
            println!("message  : {}", task.message);
        }
    }
}
