use anyhow::{bail, Context};
use change_monitor::alerts::AlertManager;
use change_monitor::config::{Config, ConfigFile};
use change_monitor::monitors::fingerprint;
use change_monitor::storage::{FileStore, MemoryStore};
use change_monitor::{MonitorConfig, MonitorService, Selector};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "change_monitor")]
#[command(about = "Watch web pages for changes and send notifications", long_about = None)]
struct Args {
    /// Verbose output (-v, -vv, -vvv, -vvvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (overrides CONFIG_FILE)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start every configured monitor and run until Ctrl-C (default)
    Run,
    /// Print the configured monitors
    List,
    /// Append a monitor to the config file
    Add {
        #[arg(long)]
        name: String,
        /// Check interval in minutes
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Notifier to send changes to (repeatable)
        #[arg(long = "notifier")]
        notifiers: Vec<String>,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Fetch and extract once, print the result
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
    #[arg(long)]
    url: String,
    /// CSS selector (repeatable, wins over --json)
    #[arg(long = "css")]
    css: Vec<String>,
    /// JSON path (repeatable)
    #[arg(long = "json")]
    json: Vec<String>,
    /// Content filter (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,
    /// HTTP header as "Name: value" (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,
    /// Render the page in headless Chrome before extracting
    #[arg(long = "chrome")]
    use_chrome: bool,
    /// Drop cycles whose extracted content is empty
    #[arg(long = "ignore-empty")]
    ignore_empty: bool,
}

impl TargetArgs {
    fn into_config(self, name: String, interval: Duration) -> anyhow::Result<MonitorConfig> {
        let mut config = MonitorConfig::new(name, self.url, interval);
        for header in self.headers {
            let Some((key, value)) = header.split_once(':') else {
                bail!("header {:?} is not in \"Name: value\" form", header);
            };
            config
                .http_headers
                .entry(key.trim().to_string())
                .or_default()
                .push(value.trim().to_string());
        }
        config.use_chrome = self.use_chrome;
        config.selector = Selector::from_lists(Some(self.css), Some(self.json));
        config.filters = self.filters;
        config.ignore_empty = self.ignore_empty;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(path) = args.config.clone() {
        config.config_file = path;
    }

    change_monitor::init_tracing(args.verbose, Some(config.log_file.clone()));
    info!("change_monitor {} starting", Config::version());

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        match args.command.unwrap_or(Command::Run) {
            Command::Run => run(&config).await,
            Command::List => list(&config),
            Command::Add {
                name,
                interval,
                notifiers,
                target,
            } => add(&config, name, interval, notifiers, target),
            Command::Check { target } => check(&config, target).await,
        }
    })
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let file = ConfigFile::load(&config.config_file)
        .with_context(|| format!("cannot load {}", config.config_file.display()))?;

    let service = MonitorService::new(
        Arc::new(FileStore::new(&config.storage_directory)),
        AlertManager::from_config(&file.notifiers),
        config.browser_endpoint(),
    )?
    .with_render_timeout(config.render_timeout);
    let ids = service.add_monitors(file.monitors).await?;
    info!(
        "Monitoring {} target(s), storage in {}",
        ids.len(),
        config.storage_directory.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    service.stop_all().await;
    Ok(())
}

fn list(config: &Config) -> anyhow::Result<()> {
    let file = ConfigFile::load_or_default(&config.config_file)?;
    if file.monitors.is_empty() {
        println!("No monitors in {}", config.config_file.display());
        return Ok(());
    }
    for monitor in &file.monitors {
        println!(
            "{}  {}\n    {}  every {} min  via {}  notifiers: {}",
            fingerprint(&monitor.url),
            monitor.name,
            monitor.url,
            monitor.interval.as_secs_f64() / 60.0,
            monitor.strategy(),
            if monitor.notifiers.is_empty() {
                "-".to_string()
            } else {
                monitor.notifiers.join(", ")
            }
        );
    }
    Ok(())
}

fn add(
    config: &Config,
    name: String,
    interval: u64,
    notifiers: Vec<String>,
    target: TargetArgs,
) -> anyhow::Result<()> {
    let mut monitor = target.into_config(name, interval_from_minutes(interval)?)?;
    monitor.notifiers = notifiers;

    let mut file = ConfigFile::load_or_default(&config.config_file)?;
    if file.monitors.iter().any(|m| m.url == monitor.url) {
        bail!("a monitor for {} already exists", monitor.url);
    }
    let id = fingerprint(&monitor.url);
    let name = monitor.name.clone();
    file.monitors.push(monitor);
    file.save(&config.config_file)
        .with_context(|| format!("cannot save {}", config.config_file.display()))?;
    println!("Added {} ({})", name, id);
    Ok(())
}

fn interval_from_minutes(minutes: u64) -> anyhow::Result<Duration> {
    match minutes.checked_mul(60) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("--interval {} minutes is too large", minutes),
    }
}

async fn check(config: &Config, target: TargetArgs) -> anyhow::Result<()> {
    let monitor = target.into_config("check".to_string(), Duration::from_secs(60))?;
    let service = MonitorService::new(
        Arc::new(MemoryStore::new()),
        AlertManager::new(),
        config.browser_endpoint(),
    )?
    .with_render_timeout(config.render_timeout);
    let content = service.preview(&monitor).await?;
    println!("{}", content);
    Ok(())
}
