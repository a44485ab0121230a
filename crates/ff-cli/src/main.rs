//! Process entrypoint: wires every crate into the running node and drives
//! the startup/shutdown sequence (§4.14).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use firefrp_bot::{BotDispatcher, BotDispatcherConfig, BotTransport, BotTransportConfig};
use firefrp_clientapi::{ClientApiState, ValidateRateLimiter};
use firefrp_config::FireFrpConfig;
use firefrp_core::{AppCore, CredentialService, ExpiryScheduler, PortAllocator};
use firefrp_frps::{AdminClient, FrpsConfigInput, FrpsSupervisor};
use firefrp_plugin::PluginState;
use firefrp_store::{AuditEntry, Credential, Store};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A tunnel's 24h lookback window for rebuilding the reject set at
/// startup (§4.14 step 5).
const REJECT_SET_REBUILD_HORIZON_MS: i64 = 24 * 60 * 60 * 1000;
/// Overall ceiling on graceful shutdown before the process force-exits
/// (§5, §4.14).
const SHUTDOWN_HARD_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "firefrp", about = "FireFrp — short-lived authenticated reverse tunnels over frps")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Directory holding `firefrp.json` (overrides the standard search).
    #[arg(long, env = "FIREFRP_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Directory for store files, the frps binary, and the update marker.
    #[arg(long, env = "FIREFRP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Check for and apply an update, then exit, instead of starting the node.
    #[arg(long, default_value_t = false)]
    update: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

fn resolve_data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &cli.data_dir {
        return Ok(dir.clone());
    }
    directories::ProjectDirs::from("", "", "firefrp")
        .map(|d| d.data_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("no data directory available (HOME unset?)"))
}

fn load_config(cli: &Cli) -> anyhow::Result<(FireFrpConfig, PathBuf)> {
    match &cli.config_dir {
        Some(dir) => {
            let path = dir.join("firefrp.json");
            let config = if path.exists() {
                firefrp_config::load_config(&path)?
            } else {
                FireFrpConfig::default()
            };
            Ok((config, path))
        },
        None => {
            let config = firefrp_config::discover_and_load()?;
            let path = firefrp_config::find_or_default_config_path()?;
            Ok((config, path))
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "firefrp starting");

    let (config, config_path) = load_config(&cli)?;
    let data_dir = resolve_data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    firefrp_common::enforce_dir_mode(&data_dir);

    let install_root = firefrp_update::current_install_root().unwrap_or_else(|_| PathBuf::from("."));
    let repository_url = env!("CARGO_PKG_REPOSITORY").to_string();
    let updates = firefrp_update::UpdateService::new(repository_url)?;

    if cli.update {
        return run_update_and_exit(&updates, &config, &install_root, &data_dir).await;
    }

    // Step 2: load stores.
    let credentials_store = Store::<Credential>::load(data_dir.join("keys.json"))?;
    let audit_store = Store::<AuditEntry>::load(data_dir.join("audit.json"))?;
    let allocator = PortAllocator::new(config.port_range_start, config.port_range_end);
    let core = AppCore::new(
        credentials_store,
        audit_store,
        allocator,
        config.key_prefix.clone(),
        config.clone(),
        config_path,
    );
    let credentials = CredentialService::new(core);

    let admin_client = AdminClient::new(
        &config.frps.admin_addr,
        config.frps.admin_port,
        config.frps.admin_user.clone(),
        config.frps.admin_password.clone(),
    )?;
    let bin_dir = data_dir.join("frps-bin");
    let frps_config_path = data_dir.join("frps.toml");
    let supervisor = FrpsSupervisor::new(bin_dir, frps_config_path, config.frp_version.clone(), admin_client.clone());
    let supervisor = Arc::new(supervisor);

    let bot_transport = BotTransport::new(BotTransportConfig {
        ws_url: config.bot.ws_url.clone(),
        token: config.bot.token.clone(),
    });

    let notify = build_notify_fn(Arc::clone(&bot_transport));
    let motd_probe = firefrp_motd::MotdProbe::new(Arc::clone(&notify));

    let plugin_state = PluginState {
        credentials: Arc::clone(&credentials),
        notify: Arc::clone(&notify),
        motd_start: motd_probe.as_start_fn(),
        motd_cancel: motd_probe.as_cancel_fn(),
        public_addr: config.server.public_addr.clone(),
    };

    let rate_limiter = Arc::new(ValidateRateLimiter::new());
    let clientapi_state = ClientApiState {
        credentials: Arc::clone(&credentials),
        rate_limiter: Arc::clone(&rate_limiter),
        config: Arc::new(config.clone()),
    };

    // Step 3: bind HTTP listener, mount ClientAPI + PluginHandler.
    let app = firefrp_clientapi::router(clientapi_state).merge(firefrp_plugin::router(plugin_state));
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", config.server_port).parse()?;
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "http listener bound");

    let http_shutdown = Arc::new(Notify::new());
    let http_shutdown_wait = Arc::clone(&http_shutdown);
    let http_task = tokio::spawn(async move {
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { http_shutdown_wait.notified().await });
        if let Err(e) = server.await {
            warn!(error = %e, "http listener exited with error");
        }
    });

    // Step 4: start FrpsSupervisor (non-fatal on failure).
    let frps_input = FrpsConfigInput {
        bind_addr: config.frps.bind_addr.clone(),
        bind_port: config.frps.bind_port,
        auth_token: config.frps.auth_token.clone(),
        admin_addr: config.frps.admin_addr.clone(),
        admin_port: config.frps.admin_port,
        admin_user: config.frps.admin_user.clone(),
        admin_password: config.frps.admin_password.clone(),
        port_range_start: config.port_range_start,
        port_range_end: config.port_range_end,
        plugin_addr: format!("127.0.0.1:{}", config.server_port),
    };
    if let Err(e) = supervisor.start(&frps_input).await {
        warn!(error = %e, "frps failed to start; listener stays up for retry");
    }

    // Step 5: rebuild the reject set from the last 24h of terminal transitions.
    credentials.rebuild_reject_set(REJECT_SET_REBUILD_HORIZON_MS).await;

    // Step 6: start the periodic expiry scan.
    let expiry_scheduler = ExpiryScheduler::new(Arc::clone(&credentials));
    expiry_scheduler.start().await;

    let sweeper_rate_limiter = Arc::clone(&rate_limiter);
    let sweeper_task = tokio::spawn(async move { sweeper_rate_limiter.run_sweeper().await });

    // Step 7: start the bot transport, wired to the dispatcher.
    let dispatcher = BotDispatcher::new(
        Arc::clone(&bot_transport),
        Arc::clone(&credentials),
        Arc::clone(&supervisor),
        admin_client,
        updates,
        BotDispatcherConfig {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            install_root,
            data_dir: data_dir.clone(),
        },
    );
    bot_transport.set_event_handler(dispatcher.as_event_handler()).await;
    bot_transport.start();

    // Step 9: emit the online broadcast and reconcile any post-update marker.
    let broadcast_groups = config.bot.broadcast_groups.clone();
    bot_transport.broadcast_group_message("firefrp online", &broadcast_groups).await;
    match firefrp_update::consume_startup_marker(&data_dir, env!("CARGO_PKG_VERSION")) {
        Some(firefrp_update::MarkerOutcome::Applied { version }) => {
            bot_transport
                .broadcast_group_message(&format!("updated to {version}"), &broadcast_groups)
                .await;
        },
        Some(firefrp_update::MarkerOutcome::Stale) | None => {},
    }

    // Step 8: register signal handlers, then block until shutdown is requested.
    wait_for_shutdown_signal().await;

    bot_transport.broadcast_group_message("firefrp offline", &broadcast_groups).await;
    run_graceful_shutdown(
        bot_transport,
        http_shutdown,
        http_task,
        sweeper_task,
        expiry_scheduler,
        motd_probe,
        supervisor,
    )
    .await;

    Ok(())
}

async fn run_update_and_exit(
    updates: &firefrp_update::UpdateService,
    config: &FireFrpConfig,
    install_root: &std::path::Path,
    data_dir: &std::path::Path,
) -> anyhow::Result<()> {
    let current_version = env!("CARGO_PKG_VERSION");
    match updates.check(config.updates.channel, current_version).await {
        Ok(Some(release)) => {
            info!(version = %release.tag_name, "applying update");
            updates.apply(&release, install_root, data_dir).await?;
            info!("update staged; exiting for the supervisor to restart");
            Ok(())
        },
        Ok(None) => {
            info!("already up to date");
            Ok(())
        },
        Err(e) => {
            warn!(error = %e, "update check failed");
            Err(e.into())
        },
    }
}

fn build_notify_fn(transport: Arc<BotTransport>) -> firefrp_common::notify::NotifyFn {
    use firefrp_common::notify::GroupNotification;

    Arc::new(move |event: GroupNotification| {
        let transport = Arc::clone(&transport);
        Box::pin(async move {
            match event {
                GroupNotification::TunnelConnected {
                    group_id,
                    tunnel_id,
                    public_addr,
                    remote_port,
                    user_name,
                    display_game_name,
                } => {
                    let text = format!(
                        "{user_name}'s {display_game_name} tunnel {tunnel_id} is live at {public_addr}:{remote_port}"
                    );
                    let _ = transport.send_group_notice(&group_id, &text).await;
                },
                GroupNotification::TunnelDisconnected { group_id, tunnel_id } => {
                    let _ = transport
                        .send_group_notice(&group_id, &format!("tunnel {tunnel_id} disconnected"))
                        .await;
                },
                GroupNotification::MotdSuccess { group_id, tunnel_id, motd, online, max, version } => {
                    let text = format!("{tunnel_id}: {motd} ({online}/{max} online, {version})");
                    let _ = transport.send_group_notice(&group_id, &text).await;
                },
                GroupNotification::MotdFailed { group_id, tunnel_id } => {
                    let _ = transport
                        .send_group_notice(&group_id, &format!("{tunnel_id}: server did not respond to status probes"))
                        .await;
                },
            }
        })
    })
}

/// Races SIGTERM/SIGINT/SIGHUP (unix) and Ctrl+C against each other; the
/// first one to fire is treated as the shutdown request (§4.14 step 8).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sighup.recv() => info!("received SIGHUP"),
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}

/// Idempotent, 15s-ceiling graceful shutdown in the exact documented order
/// (§4.14): offline broadcast → stop bot transport → stop HTTP listener →
/// stop rate-limit sweeper → stop expiry scheduler → cancel MOTD probes →
/// stop frps.
async fn run_graceful_shutdown(
    bot_transport: Arc<BotTransport>,
    http_shutdown: Arc<Notify>,
    http_task: tokio::task::JoinHandle<()>,
    sweeper_task: tokio::task::JoinHandle<()>,
    expiry_scheduler: Arc<ExpiryScheduler>,
    motd_probe: Arc<firefrp_motd::MotdProbe>,
    supervisor: Arc<FrpsSupervisor>,
) {
    let shutdown = async {
        info!("shutting down");
        bot_transport.stop().await;

        http_shutdown.notify_waiters();
        let _ = http_task.await;

        sweeper_task.abort();

        expiry_scheduler.stop().await;
        motd_probe.cancel_all().await;
        supervisor.stop().await;
    };

    if tokio::time::timeout(SHUTDOWN_HARD_TIMEOUT, shutdown).await.is_err() {
        warn!("graceful shutdown exceeded its deadline, forcing exit");
    }
}
