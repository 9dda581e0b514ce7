//! `hearthd` binary entry point: configuration, wiring, and the process
//! lifecycle around the library's gateway router.

use clap::Parser;
use hearth::bus::EventBus;
use hearth::config::AppConfig;
use hearth::device::{DeviceCache, InMemoryDeviceManager};
use hearth::domain::energy::EnergyDomain;
use hearth::domain::security::SecurityDomain;
use hearth::error::ErrorMiddleware;
use hearth::gateway::{self, AppState};
use hearth::notifications::NotificationCenter;
use hearth::perf::PerfMonitor;
use hearth::pid::{HeatingController, TickContext, Weekday};
use hearth::resilience::TokenBucket;
use hearth::rules::AutomationEngine;
use hearth::settings::InMemorySettingsStore;
use hearth::supervisor::clock::IntervalWork;
use hearth::supervisor::{Clock, SubsystemModule, Supervisor, SystemClock};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "hearthd", about = "Home automation control plane")]
struct Cli {
    /// Override the configured listen port.
    #[arg(long, env = "HEARTH_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_from_env()?;
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    let config = Arc::new(config);

    init_tracing(&config);

    let bus = Arc::new(EventBus::new());
    let errors = Arc::new(ErrorMiddleware::new());
    let notifications = Arc::new(NotificationCenter::new());
    let perf = Arc::new(PerfMonitor::new());
    let settings = Arc::new(InMemorySettingsStore::new()) as Arc<dyn hearth::settings::SettingsStore>;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let device_backend = Arc::new(InMemoryDeviceManager::new());
    let devices = Arc::new(DeviceCache::new(device_backend));
    devices.refresh().await.ok();

    let pid = Arc::new(HeatingController::new(Some(devices.clone()), errors.clone()));
    let rules = Arc::new(AutomationEngine::new(
        Some(devices.clone()),
        notifications.clone(),
        errors.clone(),
    ));
    let energy = Arc::new(EnergyDomain::new(settings.clone(), config.domain.energy_tariff_sek_per_kwh));
    let security = Arc::new(SecurityDomain::new(bus.clone(), errors.clone()));

    let supervisor = Arc::new(Supervisor::new(bus.clone(), errors.clone(), clock.clone()));
    let report = supervisor
        .load_all(vec![
            (
                Arc::new(SubsystemModule(energy.clone())) as Arc<dyn hearth::supervisor::Initializable>,
                Some(Arc::new(SubsystemModule(energy.clone())) as Arc<dyn hearth::supervisor::Destroyable>),
            ),
            (
                Arc::new(SubsystemModule(security.clone())) as Arc<dyn hearth::supervisor::Initializable>,
                Some(Arc::new(SubsystemModule(security.clone())) as Arc<dyn hearth::supervisor::Destroyable>),
            ),
        ])
        .await;
    tracing::info!(ready = report.ready, total = report.total, failed = ?report.failed, "modules loaded");

    let rate_limiter = Arc::new(TokenBucket::new(config.gateway.rate_limit));

    let state = AppState {
        config: config.clone(),
        devices: devices.clone(),
        pid: pid.clone(),
        rules: rules.clone(),
        energy: energy.clone(),
        security: security.clone(),
        perf: perf.clone(),
        errors: errors.clone(),
        notifications: notifications.clone(),
        bus: bus.clone(),
        supervisor: supervisor.clone(),
        rate_limiter,
        started_at: std::time::Instant::now(),
    };

    spawn_pid_tick_loop(pid.clone(), clock.clone());
    spawn_perf_gauge_loop(perf.clone(), clock.clone());

    let router = gateway::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.gateway.port));
    tracing::info!(%addr, "starting hearthd");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(supervisor.clone()))
        .await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn spawn_pid_tick_loop(pid: Arc<HeatingController>, clock: Arc<dyn Clock>) {
    const PERIOD: Duration = Duration::from_secs(30);
    let work: IntervalWork = Box::new(move || {
        let pid = pid.clone();
        Box::pin(async move {
            use chrono::{Datelike, Timelike};
            let now = chrono::Local::now();
            let weekday = match now.weekday() {
                chrono::Weekday::Mon => Weekday::Monday,
                chrono::Weekday::Tue => Weekday::Tuesday,
                chrono::Weekday::Wed => Weekday::Wednesday,
                chrono::Weekday::Thu => Weekday::Thursday,
                chrono::Weekday::Fri => Weekday::Friday,
                chrono::Weekday::Sat => Weekday::Saturday,
                chrono::Weekday::Sun => Weekday::Sunday,
            };
            let ctx = TickContext {
                now_millis: now.timestamp_millis() as u64,
                minute_of_day: (now.hour() * 60 + now.minute()) as u16,
                weekday,
                dt_seconds: PERIOD.as_secs_f64(),
                outdoor_avg_temp_24h: Some(10.0),
                open_window: HashSet::new(),
            };
            pid.tick(&ctx).await;
        })
    });
    clock.schedule_interval("pid-controller", PERIOD, work);
}

fn spawn_perf_gauge_loop(perf: Arc<PerfMonitor>, clock: Arc<dyn Clock>) {
    const PERIOD: Duration = Duration::from_secs(10);
    let work: IntervalWork = Box::new(move || {
        let perf = perf.clone();
        Box::pin(async move {
            perf.sample_gauges(hearth::perf::CpuSample { busy_ticks: 0, total_ticks: 1 }, 0, 0);
        })
    });
    clock.schedule_interval("perf-gauges", PERIOD, work);
}

async fn shutdown_signal(supervisor: Arc<Supervisor>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down gracefully");
    supervisor.destroy_all().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
}
