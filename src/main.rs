use std::sync::Arc;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use serde_json::Value;
use tokio::{net::TcpListener, task::JoinSet};
use toolgate::{
    adapters::{HealthMonitor, HttpHandler, ProcessExecutor, StdioServer, plan_listeners},
    config::{GatewayConfig, ServerConfigValidator, discover_servers, load_config},
    core::{Cache, GatewayService, Namespace, RouterConfig, ToolRegistry, ToolRouter},
    metrics::{GatewayMetrics, MetricsRegistry},
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason, ShutdownToken},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML, YAML or JSON); `TOOLGATE_*` variables override it
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway (default)
    Serve {
        /// Serve the call protocol on stdin/stdout instead of HTTP
        #[clap(long)]
        stdio: bool,
    },
    /// Validate configuration and print a summary
    Validate,
    /// Discover configured servers and print the resolved tool table
    Tools,
}

/// Everything a running gateway is made of.
struct Gateway {
    router: Arc<ToolRouter>,
    sweeper: tokio::task::JoinHandle<()>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    let config = load_config(config_path).wrap_err("Failed to load configuration")?;

    match args.command {
        Some(Commands::Validate) => validate_config_command(&config, config_path),
        Some(Commands::Tools) => tools_command(config).await,
        Some(Commands::Serve { stdio }) => serve(config, stdio).await,
        None => serve(config, false).await,
    }
}

fn validate_config_command(config: &GatewayConfig, config_path: Option<&str>) -> Result<()> {
    let source = config_path.unwrap_or("<defaults + environment>");
    println!("Validating configuration: {source}");

    ServerConfigValidator::validate(config).wrap_err("Configuration is invalid")?;

    println!("Configuration is valid");
    println!("  gateway:  {}:{}", config.host, config.port);
    println!(
        "  health:   {}",
        if config.health_enabled {
            format!("port {}", config.effective_health_port())
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  metrics:  {}",
        if config.metrics_enabled {
            format!("port {}", config.effective_metrics_port())
        } else {
            "disabled".to_string()
        }
    );
    println!("  servers:  {} app, {} ext", config.app_servers.len(), config.ext_servers.len());
    println!("  policies: {} configured", config.policies.len());
    println!(
        "  cache:    {} entries, ttl {}",
        config.cache_max_size, config.cache_ttl
    );
    Ok(())
}

async fn tools_command(config: GatewayConfig) -> Result<()> {
    ServerConfigValidator::validate(&config).wrap_err("Configuration is invalid")?;
    tracing_setup::init_tracing(&config.log_level, config.log_format)?;

    let gateway = build_gateway(&config)?;
    register_servers(&config, &gateway.router).await;

    let registry = gateway.router.registry();
    println!("{:<32} {:<20} {:<6} {:>8}", "TOOL", "SERVER", "NS", "PRIORITY");
    for registration in registry.list_tools() {
        println!(
            "{:<32} {:<20} {:<6} {:>8}",
            registration.key(),
            registration.server_id,
            registration.namespace.as_str(),
            registration.priority
        );
    }

    println!();
    println!("Resolution:");
    let mut names: Vec<String> = registry.list_tools().into_iter().map(|r| r.name).collect();
    names.sort();
    names.dedup();
    for name in names {
        let resolution = registry.resolve_tool(&name);
        let chosen = match (&resolution.registration, resolution.is_denied()) {
            (_, true) => "denied".to_string(),
            (Some(primary), false) => format!("{} ({})", primary.key(), primary.server_id),
            (None, false) => resolution
                .fallback_options
                .first()
                .map(|r| format!("{} ({}, fallback)", r.key(), r.server_id))
                .unwrap_or_else(|| "unavailable".to_string()),
        };
        println!("  {name:<30} -> {chosen}");
    }

    gateway.router.shutdown().await;
    gateway.sweeper.abort();
    Ok(())
}

fn build_gateway(config: &GatewayConfig) -> Result<Gateway> {
    let metrics = Arc::new(
        GatewayMetrics::new(Arc::new(MetricsRegistry::new()))
            .wrap_err("Failed to initialize metrics")?,
    );

    let registry = Arc::new(ToolRegistry::new());
    for rule in &config.policies {
        registry.add_policy(rule.clone());
    }

    let cache: Arc<Cache<Value>> = Arc::new(Cache::new(
        config.cache_max_size,
        config.cache_ttl_duration()?,
    ));
    let sweeper = cache.spawn_sweeper(config.cache_sweep_interval_duration()?);

    {
        let metrics = metrics.clone();
        let weak_registry = Arc::downgrade(&registry);
        registry.on_update(move |_| {
            if let Some(registry) = weak_registry.upgrade() {
                metrics.set_registered_tools(registry.tool_count());
            }
        });
    }

    let router_config = RouterConfig {
        request_timeout: config.request_timeout_duration()?,
        shutdown_timeout: config.shutdown_timeout_duration()?,
        health_check_timeout: config.health_check_timeout_duration()?,
    };
    let executor = Arc::new(ProcessExecutor::new().with_metrics(metrics.clone()));
    let router = ToolRouter::new(registry, executor, metrics, router_config).with_cache(cache);

    Ok(Gateway {
        router: Arc::new(router),
        sweeper,
    })
}

/// Discover and register every configured server. Failures are logged and
/// skipped.
async fn register_servers(config: &GatewayConfig, router: &ToolRouter) {
    let namespaces = [
        (&config.app_servers, Namespace::App),
        (&config.ext_servers, Namespace::Ext),
    ];

    for (paths, namespace) in namespaces {
        let (servers, errors) = discover_servers(paths, namespace);
        for error in errors {
            tracing::error!("Skipping {} server: {}", namespace, error);
        }

        for mut server in servers {
            if server.tools.is_empty() {
                match router.discover_tools(&server).await {
                    Ok(tools) => {
                        tracing::info!(server = %server.id, tools = tools.len(), "Discovered tools");
                        server.tools = tools;
                    }
                    Err(e) => {
                        tracing::warn!(server = %server.id, error = %e, "Tool discovery failed");
                    }
                }
            }
            router.registry().register_server(server);
        }
    }
}

async fn serve(config: GatewayConfig, stdio: bool) -> Result<()> {
    ServerConfigValidator::validate(&config).wrap_err("Configuration is invalid")?;
    tracing_setup::init_tracing(&config.log_level, config.log_format)?;

    let gateway = build_gateway(&config)?;
    let router = gateway.router.clone();
    register_servers(&config, &router).await;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let mut main_token = graceful_shutdown.shutdown_token();

    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let health = Arc::new(HealthMonitor::new(
        router.clone(),
        config.health_check_interval_duration()?,
    ));
    if config.health_enabled {
        tokio::spawn(health.clone().run(graceful_shutdown.shutdown_token()));
    }

    let service = Arc::new(GatewayService::new(router.clone()));

    let result = if stdio {
        let server = StdioServer::new(service);
        server.run(graceful_shutdown.shutdown_token()).await
    } else {
        serve_http(&config, service, health, &graceful_shutdown, &mut main_token).await
    };
    if let Err(e) = &result {
        tracing::error!("Gateway stopped with error: {:?}", e);
    }

    graceful_shutdown.trigger_shutdown(ShutdownReason::TaskExited);
    router.shutdown().await;
    gateway.sweeper.abort();
    tracing::info!("toolgate shutdown complete");
    result
}

async fn serve_http(
    config: &GatewayConfig,
    service: Arc<GatewayService>,
    health: Arc<HealthMonitor>,
    graceful_shutdown: &GracefulShutdown,
    main_token: &mut ShutdownToken,
) -> Result<()> {
    let handler = HttpHandler::new(service, health);
    let mut servers = JoinSet::new();

    for (port, surfaces) in plan_listeners(config) {
        let addr = format!("{}:{}", config.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Failed to bind to {addr}"))?;
        tracing::info!(%addr, ?surfaces, "Listening");

        let app = handler.router(&surfaces);
        let mut token = graceful_shutdown.shutdown_token();
        servers.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.wait_for_shutdown().await;
                })
                .await
                .wrap_err_with(|| format!("Server on {addr} failed"))
        });
    }

    let outcome = tokio::select! {
        reason = main_token.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            Ok(())
        }
        Some(joined) = servers.join_next() => {
            tracing::warn!("HTTP server task exited, shutting down");
            match joined {
                Ok(result) => result,
                Err(e) => Err(eyre!("HTTP server task panicked: {e}")),
            }
        }
    };

    graceful_shutdown.trigger_shutdown(ShutdownReason::TaskExited);
    let drain = async {
        while let Some(joined) = servers.join_next().await {
            if let Ok(Err(e)) = joined {
                tracing::warn!("HTTP server ended with error: {:?}", e);
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout_duration()?, drain)
        .await
        .is_err()
    {
        tracing::warn!("Open connections did not close in time, aborting listeners");
        servers.shutdown().await;
    }
    outcome
}
