mod cli;
mod logs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use castconfig::{Config, get_config};
use castcontrol::{
    CastController, Channel, ChannelList, ControlSettings, ControllerDeps, ControllerSettings,
    DeviceRegistry, DiscoveredDevice, DiscoverySettings, DiscoveryService, EventSettings,
    GenaEventListener, SessionUpdate, SwitchDirection, UpnpControlFactory,
};
use castproxy::{ProxySettings, StreamProxyServer};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::{CastArgs, Cli, Command};
use crate::logs::LogControl;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config_dir {
        Some(dir) => Arc::new(
            Config::load_config(dir).with_context(|| format!("cannot load config from {dir}"))?,
        ),
        None => get_config(),
    };
    let log_control = logs::init_logging(&config);

    match cli.command {
        Command::Devices { wait_secs, json } => list_devices(&config, wait_secs, json).await,
        Command::Probe { location } => probe(&config, &location).await,
        Command::Cast(args) => cast(&config, &log_control, args).await,
    }
}

fn start_discovery(config: &Config) -> Result<Arc<DiscoveryService>> {
    let settings = DiscoverySettings::from_config(config);
    let registry = Arc::new(DeviceRegistry::new(settings.expiry));
    let discovery = DiscoveryService::new(registry, settings)?;
    if let Err(e) = discovery.start() {
        warn!(error = %e, "Discovery running in degraded mode");
    }
    Ok(discovery)
}

fn print_device(device: &DiscoveredDevice) {
    println!(
        "{:<44} {:<16} {}",
        device.id, device.address, device.friendly_name
    );
}

async fn list_devices(config: &Config, wait_secs: u64, json: bool) -> Result<()> {
    let discovery = start_discovery(config)?;
    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
    discovery.stop();

    let mut devices = discovery.registry().list();
    devices.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No renderer found");
    } else {
        devices.iter().for_each(print_device);
    }
    Ok(())
}

async fn probe(config: &Config, location: &str) -> Result<()> {
    let settings = DiscoverySettings::from_config(config);
    let registry = Arc::new(DeviceRegistry::new(settings.expiry));
    let discovery = DiscoveryService::new(registry, settings)?;
    let device = discovery
        .probe_location(location)
        .await
        .with_context(|| format!("probing {location}"))?;
    print_device(&device);
    Ok(())
}

/// `NOM=URL`, ou une URL dont le nom de fichier sert de nom
fn parse_channel(raw: &str) -> Channel {
    match raw.split_once('=') {
        Some((name, url)) if !name.contains('/') => Channel::new(name.trim(), url.trim()),
        _ => {
            let file = raw.trim_end_matches('/').rsplit('/').next().unwrap_or(raw);
            let name = file.split(['.', '?']).next().unwrap_or(file);
            Channel::new(name, raw)
        }
    }
}

async fn wait_for_device(
    registry: &DeviceRegistry,
    wanted: &str,
    wait: Duration,
) -> Result<DiscoveredDevice> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let found = registry.list().into_iter().find(|d| {
            d.id.eq_ignore_ascii_case(wanted) || d.friendly_name.eq_ignore_ascii_case(wanted)
        });
        if let Some(device) = found {
            return Ok(device);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("renderer {wanted} not found after {}s", wait.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

async fn cast(config: &Config, log_control: &LogControl, args: CastArgs) -> Result<()> {
    let channels: ChannelList = args.channels.iter().map(|c| parse_channel(c)).collect();
    let first = channels
        .channels()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("no channel given"))?;

    let discovery = start_discovery(config)?;
    if let Some(location) = &args.location {
        if let Err(e) = discovery.probe_location(location).await {
            warn!(location = location.as_str(), error = %e, "Description probe failed");
        }
    }
    let device = wait_for_device(
        discovery.registry(),
        &args.device,
        Duration::from_secs(args.wait_secs),
    )
    .await?;
    info!(device = %device.id, name = device.friendly_name.as_str(), "Renderer selected");

    let proxy = Arc::new(StreamProxyServer::start(ProxySettings::from_config(config)).await?);
    let listener = GenaEventListener::start(EventSettings::from_config(config)).await?;
    let controls = Arc::new(UpnpControlFactory::new(ControlSettings::from_config(config))?);

    let controller = CastController::spawn(
        ControllerDeps {
            registry: discovery.registry().clone(),
            routes: proxy.clone(),
            controls,
            events: listener,
            catalog: Arc::new(channels),
            player: None,
        },
        ControllerSettings::from_config(config),
    );

    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                SessionUpdate::Changed(snapshot) => info!(
                    phase = ?snapshot.phase,
                    channel = snapshot.channel.as_deref().unwrap_or("-"),
                    transport = %snapshot.playback.transport,
                    "Session update"
                ),
                SessionUpdate::Failed(failure) => eprintln!("{}", failure.message),
            }
        }
    });

    let snapshot = controller.start_cast(&device.id, &first.name).await?;
    println!(
        "Casting {} to {} via {}",
        first.name,
        device.friendly_name,
        snapshot.route_url.as_deref().unwrap_or("-")
    );
    println!(
        "Commands: n(ext) p(revious) v <0-100> m(ute) u(nmute) pause r(esume) s(top) log <level> q(uit)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&controller, log_control, line.trim()).await {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    proxy.shutdown().await;
    discovery.stop();
    Ok(())
}

/// Exécute une commande interactive ; `false` pour quitter.
async fn run_command(controller: &CastController, log_control: &LogControl, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match words.next() {
        Some("n") => controller
            .switch_channel(SwitchDirection::Next)
            .await
            .map(|_| ()),
        Some("p") => controller
            .switch_channel(SwitchDirection::Previous)
            .await
            .map(|_| ()),
        Some("v") => match words.next().and_then(|v| v.parse::<u16>().ok()) {
            Some(level) => controller.set_volume(level.min(100)).await,
            None => {
                println!("usage: v <0-100>");
                Ok(())
            }
        },
        Some("m") => controller.set_mute(true).await,
        Some("u") => controller.set_mute(false).await,
        Some("pause") => controller.pause().await,
        Some("r") => controller.resume().await,
        Some("s") => controller.stop_cast().await,
        Some("log") => {
            match words.next().and_then(|l| l.parse::<tracing::Level>().ok()) {
                Some(level) => log_control.set_max_level(level),
                None => println!("usage: log <error|warn|info|debug|trace>"),
            }
            Ok(())
        }
        Some("q") => return false,
        Some(other) => {
            println!("unknown command {other}");
            Ok(())
        }
        None => Ok(()),
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
    true
}
