//! Drives a `ResourceManager` against a simulated quote service.
//!
//! Two listeners request overlapping sets of symbols. The demo prints every
//! lifecycle event, shows that shared requests are created once, refreshes one
//! quote and finally tears everything down.
//!
//! Symbols starting with `!` make the simulated service fail.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lib_resources::{
    Completion, CreationError, IdGenerator, LifecycleEvent, ManagerSettings, RequestMeta,
    ResourceFactory, ResourceManager, StopHandle, Value,
};

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Shared resource manager demo", version)]
struct Config {
    #[clap(long, env = "RESOURCES_CONFIG_PATH", help = "Path to a JSON5 settings file.")]
    config_path: Option<PathBuf>,

    #[clap(long, env = "RESOURCES_CLEANUP_DELAY_MS", help = "Grace period in milliseconds after the last release.")]
    cleanup_delay_ms: Option<u64>,

    #[clap(long, env = "RESOURCES_CLEANUP_DELAY_ON_ERROR_MS", help = "Grace period and retry backoff in milliseconds for failed resources.")]
    cleanup_delay_on_error_ms: Option<u64>,

    #[clap(long, env = "RESOURCES_UPDATE_DELAY_MS", help = "Coalescing window in milliseconds for scheduled listener updates.")]
    update_delay_ms: Option<u64>,

    #[clap(long, env = "RESOURCES_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    log_level: Option<String>,

    #[clap(long, value_delimiter = ',', help = "Symbols requested by the first listener.")]
    symbols: Vec<String>,

    #[clap(long, default_value_t = 200, help = "Simulated service latency in milliseconds.")]
    latency_ms: u64,
}

impl Config {
    fn settings(&self) -> ManagerSettings {
        ManagerSettings {
            cleanup_delay_ms: self.cleanup_delay_ms,
            cleanup_delay_on_error_ms: self.cleanup_delay_on_error_ms,
            update_delay_ms: self.update_delay_ms,
            log_level: self.log_level.clone(),
        }
    }
}

/// Defaults, then the settings file, then CLI flags and environment.
fn load_settings(config: &Config) -> Result<ManagerSettings> {
    let settings = ManagerSettings::load(config.config_path.as_deref())?;
    Ok(settings.merge(config.settings()))
}

fn setup_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}

/// Answers `{symbol}` requests with a made-up quote after a fixed latency.
struct QuoteService {
    latency: Duration,
}

impl QuoteService {
    fn price(symbol: &str) -> f64 {
        let cents: u64 = symbol.bytes().map(u64::from).sum::<u64>() * 37 % 50_000;
        cents as f64 / 100.0
    }
}

impl ResourceFactory for QuoteService {
    fn create(&self, request: &Value, meta: RequestMeta, done: Completion) -> Box<dyn StopHandle> {
        let symbol = match request.get("symbol") {
            Some(Value::String(symbol)) => symbol.clone(),
            _ => String::new(),
        };
        let latency = self.latency;
        log::info!("Subscribing to {} for resource {}", symbol, meta.id);

        let task = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if symbol.is_empty() || symbol.starts_with('!') {
                done.reject(
                    CreationError::new(format!("no such symbol: {symbol}"))
                        .with_code("not-found")
                        .with_reason("unknown symbol"),
                );
            } else {
                done.resolve(Value::object([
                    ("symbol", Value::from(symbol.as_str())),
                    ("price", Value::from(QuoteService::price(&symbol))),
                    ("at", Value::from(chrono::Utc::now())),
                ]));
            }
        });

        Box::new(move |refresh_only: bool| {
            log::info!(
                "Unsubscribing resource {}{}",
                meta.id,
                if refresh_only { " for refresh" } else { "" }
            );
            task.abort();
        })
    }
}

fn quote(symbol: &str) -> Value {
    Value::object([("symbol", Value::from(symbol))])
}

fn describe(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::Create { id, request } => format!("create #{id} {request}"),
        LifecycleEvent::Ready { id, value } => format!("ready  #{id} {value}"),
        LifecycleEvent::Error { id, error } => format!("error  #{id} {error}"),
        LifecycleEvent::Delete { id, request } => format!("delete #{id} {request}"),
    }
}

async fn print_slots(listener: &str, slots: &[lib_resources::Requested]) {
    for slot in slots {
        match slot.value.get().await {
            Ok(value) => println!("{listener}: {value}"),
            Err(e) => println!("{listener}: failed ({e})"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    let settings = load_settings(&config)?;
    setup_logging(settings.log_level.as_deref().unwrap_or("info"))?;
    log::info!("Settings: {}", serde_json::to_string(&settings)?);

    let manager = ResourceManager::new(
        QuoteService {
            latency: Duration::from_millis(config.latency_ms),
        },
        settings.to_manager_config(),
    );

    let mut events = manager.subscribe_all();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("event: {}", describe(&event));
        }
    });

    let ids = IdGenerator::new("L");
    let (first, second) = (ids.next_id(), ids.next_id());

    let symbols = if config.symbols.is_empty() {
        vec!["AAPL".to_string(), "MSFT".to_string()]
    } else {
        config.symbols.clone()
    };
    let first_requests: Vec<Option<Value>> = symbols.iter().map(|s| Some(quote(s))).collect();
    let slots = manager.update_requests(&first, &first_requests);
    print_slots(&first, &slots).await;

    let second_requests = [Some(quote(&symbols[0])), None, Some(quote("!BAD"))];
    let slots = manager.update_requests(&second, &second_requests);
    print_slots(&second, &slots).await;
    log::info!(
        "{} resources shared by {} listeners",
        manager.resource_count(),
        manager.listener_count()
    );

    // Narrow the first listener to its first symbol, debounced.
    let update_delay = settings.update_delay();
    manager.schedule_update(&first, first_requests[..1].to_vec(), update_delay);
    tokio::time::sleep(update_delay + Duration::from_millis(50)).await;
    log::info!("{} now holds {:?}", first, manager.held_by(&first));

    let refreshed = manager.refresh(&quote(&symbols[0]))?;
    match refreshed.get().await {
        Ok(value) => println!("refreshed: {value}"),
        Err(e) => println!("refresh failed: {e}"),
    }

    manager.release_all(&first);
    manager.release_all(&second);
    manager.cleanup_resources();
    log::info!("{} resources left", manager.resource_count());

    drop(manager);
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}
