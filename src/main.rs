use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use maintenance_quiesce::azure::{
    ArmHttp, ClientSecretCredential, ScopeFactory, StaticToken, TokenCredential,
};
use maintenance_quiesce::config::{Backend, Config};
use maintenance_quiesce::event::{parse_events, EventRouter, InboundEvent};
use maintenance_quiesce::orchestrator::{MaintenanceHandler, ShutdownSignal, WindowStore};
use maintenance_quiesce::resolver::{
    AffectedResourceResolver, InMemoryCatalog, ResourceCatalog, ResourceGraphCatalog,
};
use maintenance_quiesce::rest_api::{self, AppState, DispatchSummary};
use maintenance_quiesce::suppression::{
    AlertProcessingRuleService, InMemorySuppressionService, RuleNaming, SuppressionRuleManager,
    SuppressionService,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "MAINTENANCE_QUIESCE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the event ingest API
    Run(RunArgs),
    /// Process events from a JSON file once and print the outcome
    Replay(ReplayArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(OverrideArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct OverrideArgs {
    /// Calculate rule changes without applying them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Backend override: azure or memory
    #[arg(long, env = "QUIESCE_BACKEND")]
    backend: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Pre-acquired ARM bearer token, used instead of the client secret
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Address for the ingest API
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// File holding one event or an array of events
    file: PathBuf,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("maintenance-quiesce v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::CheckConfig(overrides) => {
            let config = load_config(args.config.as_deref(), &overrides)?;
            println!(
                "Configuration OK (backend: {:?}, listen: {}, dry run: {})",
                config.azure.backend, config.listen_addr, config.dry_run
            );
            Ok(())
        }
        Commands::Replay(replay_args) => {
            init_tracing(args.log_format, false);
            let config = load_config(args.config.as_deref(), &replay_args.overrides)?;
            replay(config, &replay_args.file).await
        }
        Commands::Run(run_args) => {
            let otel_enabled = init_tracing(args.log_format, true);
            let mut config = load_config(args.config.as_deref(), &run_args.overrides)?;
            if let Some(addr) = run_args.listen_addr {
                config.listen_addr = addr;
            }
            let result = run(config).await;

            if otel_enabled {
                maintenance_quiesce::telemetry::shutdown_telemetry();
            }
            result
        }
    }
}

/// Returns whether OpenTelemetry export was enabled
fn init_tracing(format: LogFormat, allow_otel: bool) -> bool {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = matches!(format, LogFormat::Json);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with((!json).then(|| fmt::layer().with_target(true)))
        .with(json.then(|| fmt::layer().json().with_target(true)));

    // Only enable OTEL if an endpoint is provided
    let otel_enabled = allow_otel && std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        match maintenance_quiesce::telemetry::init_telemetry(&registry) {
            Ok(otel_layer) => {
                registry.with(otel_layer).init();
                info!("OpenTelemetry tracing initialized");
                return true;
            }
            Err(e) => {
                registry.init();
                warn!("OpenTelemetry tracing disabled: {}", e);
                return false;
            }
        }
    }

    registry.init();
    false
}

fn load_config(path: Option<&Path>, overrides: &OverrideArgs) -> anyhow::Result<Config> {
    let mut config = Config::load(path).context("failed to load configuration")?;

    config.dry_run |= overrides.dry_run;
    if let Some(backend) = overrides.backend.as_deref() {
        config.azure.backend = match backend.to_ascii_lowercase().as_str() {
            "azure" => Backend::Azure,
            "memory" => Backend::Memory,
            other => bail!("unknown backend {other:?}, expected azure or memory"),
        };
    }
    if overrides.tenant_id.is_some() {
        config.azure.tenant_id = overrides.tenant_id.clone();
    }
    if overrides.client_id.is_some() {
        config.azure.client_id = overrides.client_id.clone();
    }
    config.azure.client_secret = overrides.client_secret.clone();
    config.azure.static_token = overrides.access_token.clone();

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn instance_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

async fn build_router(config: &Config, shutdown: ShutdownSignal) -> anyhow::Result<EventRouter> {
    let (credential, catalog, service): (
        Arc<dyn TokenCredential>,
        Arc<dyn ResourceCatalog>,
        Arc<dyn SuppressionService>,
    ) = match config.azure.backend {
        Backend::Azure => {
            let client = reqwest::Client::builder()
                .user_agent(concat!("maintenance-quiesce/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("failed to build HTTP client")?;

            let credential = match (&config.azure.static_token, &config.azure.client_secret) {
                (Some(token), _) => Arc::new(StaticToken::new(token.clone())) as Arc<dyn TokenCredential>,
                (None, Some(secret)) => ClientSecretCredential::new(
                    client.clone(),
                    &config.azure.authority_host,
                    config.azure.tenant_id.as_deref().unwrap_or_default(),
                    config.azure.client_id.as_deref().unwrap_or_default(),
                    secret,
                    &config.azure.arm_endpoint,
                )
                .into_shared(),
                (None, None) => bail!("no Azure credential configured"),
            };

            let http = ArmHttp::new(client, &config.azure.arm_endpoint, config.azure.max_retries);
            info!("Using Azure backend at {}", http.endpoint());
            let catalog: Arc<dyn ResourceCatalog> = Arc::new(ResourceGraphCatalog::new(http.clone()));
            let service: Arc<dyn SuppressionService> = Arc::new(AlertProcessingRuleService::new(
                http,
                config.suppression.rule_resource_group.clone(),
            ));
            (credential, catalog, service)
        }
        Backend::Memory => {
            warn!("Using in-memory backend: no resources are bound and rules are not persisted");
            let credential: Arc<dyn TokenCredential> = Arc::new(StaticToken::new("local"));
            let catalog: Arc<dyn ResourceCatalog> = Arc::new(InMemoryCatalog::new());
            let service: Arc<dyn SuppressionService> = Arc::new(InMemorySuppressionService::new());
            (credential, catalog, service)
        }
    };

    let windows = match config.handler.window_store_path.as_deref() {
        Some(path) => WindowStore::load(path)
            .await
            .with_context(|| format!("failed to load window store from {path}"))?,
        None => WindowStore::in_memory(),
    };

    let scopes = ScopeFactory::new(credential);
    let resolver = AffectedResourceResolver::new(catalog, scopes.clone(), config.call_timeout());
    let manager = SuppressionRuleManager::new(
        service,
        scopes,
        RuleNaming::new(config.suppression.rule_prefix.clone()),
        config.call_timeout(),
    )
    .with_description_template(config.suppression.description.clone())
    .with_instance(instance_name())
    .with_dry_run(config.dry_run);

    if config.dry_run {
        info!("Dry-run mode: suppression rules will not be created or removed");
    }

    let handler = MaintenanceHandler::new(
        resolver,
        manager,
        Arc::new(windows),
        config.handler_options(),
        shutdown,
    );
    Ok(EventRouter::new(Arc::new(handler), config.router_options()))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting maintenance-quiesce v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = ShutdownSignal::new();
    let router = build_router(&config, shutdown.clone()).await?;
    let state = Arc::new(AppState {
        router: Arc::new(router),
    });

    rest_api::run_server(config.listen_addr, state, shutdown).await?;
    Ok(())
}

async fn replay(config: Config, file: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let body: serde_json::Value =
        serde_json::from_slice(&raw).with_context(|| format!("{} is not JSON", file.display()))?;

    let events: Vec<_> = parse_events(&body)?
        .into_iter()
        .filter_map(|item| match item {
            InboundEvent::Maintenance(event) => Some(event),
            InboundEvent::SubscriptionValidation { id, .. }
            | InboundEvent::Ignored { id, .. } => {
                info!(event_id = %id, "Skipping non-maintenance event");
                None
            }
        })
        .collect();

    let router = build_router(&config, ShutdownSignal::new()).await?;
    let report = router.dispatch(events).await;
    let summary = DispatchSummary::from(&report);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !report.all_succeeded() {
        bail!("{} of {} event(s) failed", summary.failed, summary.total);
    }
    Ok(())
}
