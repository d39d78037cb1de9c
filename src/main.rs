use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar};
use mch::{
    cli::{AckArgs, Cli, Commands, ConfigAction},
    config::{default_config_path, Config},
    display::DisplayManager,
    executor::ProgressCounter,
    reporting::{ReportGenerator, ReportView},
    scanner::{Orchestrator, ScanKind, Scanner, TargetReport},
    state::{JsonStateStore, StateStore},
    types::ScanTarget,
    utils::{progress, target, time},
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);

    if let Err(e) = run(&cli, &display).await {
        display.print_error(&format!("{:#}", e));
        process::exit(1);
    }
}

async fn run(cli: &Cli, display: &DisplayManager) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Scan { types, hosts, host_list } => {
            let config = load_config(cli)?;
            execute_scan(config, display, types, hosts, host_list.as_deref()).await
        }
        Commands::Report {
            hosts,
            view,
            json,
            output,
        } => {
            let config = load_config(cli)?;
            execute_report(&config, display, hosts, *view, *json, output.as_deref()).await
        }
        Commands::Ack(args) => {
            let config = load_config(cli)?;
            execute_ack(&config, display, args).await
        }
        Commands::Config { action } => execute_config(cli, display, action),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    Config::load(cli.config.as_deref(), &cli.overrides).context("Invalid configuration")
}

async fn execute_scan(
    config: Config,
    display: &DisplayManager,
    types: &str,
    hosts: &[String],
    host_list: Option<&Path>,
) -> anyhow::Result<()> {
    let kinds = ScanKind::parse_list(types)?;

    let mut all_hosts = hosts.to_vec();
    if let Some(path) = host_list {
        all_hosts.extend(target::load_host_list(path).await?);
    }
    if all_hosts.is_empty() {
        bail!("No hosts provided");
    }

    let mut targets = Vec::with_capacity(all_hosts.len());
    let mut errors = 0;
    for host in &all_hosts {
        match target::validate_target(host) {
            Ok(validated) => targets.push(validated),
            Err(e) => {
                display.print_error(&e.to_string());
                errors += 1;
            }
        }
    }

    display.print_banner("MCH - Misconfiguration Scanner", Some("Authorized Testing Only"));
    display.print_info(&format!(
        "Scanning {} hosts with {}",
        targets.len(),
        kinds.iter().map(ScanKind::as_str).collect::<Vec<_>>().join(", ")
    ));

    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::from_config(&config));
    let orchestrator = Orchestrator::new(config, store);
    let scanners = orchestrator.scanners(&kinds);

    let started = Instant::now();
    let mut warnings = 0;

    for scan_target in &targets {
        display.print_section_header(&scan_target.to_string());

        match scan_with_progress(&orchestrator, scan_target, &scanners, display.is_quiet()).await {
            Ok(report) => {
                warnings += report.warnings();
                errors += report.errors().len();
                display.print_target_report(&report);
            }
            Err(e) => {
                display.print_error(&format!("Scan of {} failed: {}", scan_target, e));
                errors += 1;
            }
        }
    }

    display.print_scan_summary(targets.len(), warnings, errors);
    display.print_success(&format!("Scan completed in {}", time::format_duration(started.elapsed())));
    Ok(())
}

/// Run one target while a ticker mirrors every scanner's counter into its bar.
async fn scan_with_progress(
    orchestrator: &Orchestrator,
    scan_target: &ScanTarget,
    scanners: &[Box<dyn Scanner>],
    quiet: bool,
) -> mch::Result<TargetReport> {
    if quiet {
        return orchestrator.scan_target(scan_target, scanners).await;
    }

    let multi = MultiProgress::new();
    let bars: Vec<(ProgressBar, Arc<ProgressCounter>)> = scanners
        .iter()
        .map(|scanner| {
            let bar = progress::create_scanner_bar(&multi, scanner.kind().as_str());
            (bar, scanner.progress())
        })
        .collect();

    let scan = orchestrator.scan_target(scan_target, scanners);
    tokio::pin!(scan);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    let result = loop {
        tokio::select! {
            result = &mut scan => break result,
            _ = ticker.tick() => refresh(&bars),
        }
    };

    refresh(&bars);
    for (bar, counter) in &bars {
        bar.finish_with_message(counter.get_progress());
    }
    result
}

fn refresh(bars: &[(ProgressBar, Arc<ProgressCounter>)]) {
    for (bar, counter) in bars {
        bar.set_length(counter.total());
        bar.set_position(counter.scanned());
    }
}

async fn execute_report(
    config: &Config,
    display: &DisplayManager,
    hosts: &[String],
    view: ReportView,
    json: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    for host in hosts {
        target::validate_target(host)?;
    }

    let generator = ReportGenerator::new(Arc::new(JsonStateStore::from_config(config)));
    let reports = generator.generate(hosts, view).await?;

    if json {
        println!("{}", ReportGenerator::to_json(&reports)?);
    } else {
        for report in &reports {
            display.print_status_report(report);
        }
    }

    if let Some(path) = output {
        let written = ReportGenerator::write_json(&reports, path).await?;
        display.print_success(&format!("Report written to {}", written.display()));
    }
    Ok(())
}

async fn execute_ack(config: &Config, display: &DisplayManager, args: &AckArgs) -> anyhow::Result<()> {
    let host = target::validate_target(&args.host)?;
    let store = JsonStateStore::from_config(config);
    let mut state = store.load(&host.raw).await?;

    if let Some(port) = args.port {
        if !state.acknowledge_port(port) {
            display.print_info(&format!("Port {} was already acknowledged on {}", port, host));
        }
    }
    if let (Some(url), Some(status)) = (&args.fuzz, args.status) {
        state.acknowledge_fuzz(url, status)?;
    }
    if let (Some(index), Some(status)) = (args.issue, args.status) {
        state.acknowledge_issue(index, status)?;
    }

    store.save(&host.raw, &state).await?;
    display.print_success(&format!("Updated {}", host));
    Ok(())
}

fn execute_config(cli: &Cli, display: &DisplayManager, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path: PathBuf = match &cli.config {
                Some(path) => path.clone(),
                None => default_config_path().context("No configuration directory on this platform")?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to_file(&path.to_string_lossy())?;
            display.print_success(&format!("Wrote default configuration to {}", path.display()));
        }
        ConfigAction::Show => {
            let config = load_config(cli)?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }
    Ok(())
}
