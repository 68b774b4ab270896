use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use normaliser_panel::panel::Delivery;
use normaliser_panel::transport::SocketTransport;
use normaliser_panel::{ControlPanel, MessagingBridge, Tiers};
use normaliser_proto::config::Config;
use normaliser_proto::{PresetId, RefreshMode};

#[derive(Parser)]
#[command(name = "normaliser", about = "Normaliser control panel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show settings, curve, allow-list and presets
    Status,
    /// Set playback gain (e.g. 1.5)
    Gain { value: f32 },
    /// Turn processing on or off
    Enable {
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Apply to every site instead of only the allow-list
    ApplyAll {
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Add a host (or the host of a URL) to the allow-list
    Allow { host: String },
    /// Remove a host from the allow-list
    Disallow { host: String },
    /// Set one EQ band, in dB
    Band {
        index: usize,
        #[arg(allow_negative_numbers = true)]
        db: i32,
    },
    /// Select a preset: a built-in name or user:<name>
    Preset { id: PresetId },
    /// Save the current curve as a user preset
    SavePreset { name: String },
    /// Delete a user preset
    DeletePreset { name: String },
    /// Meter refresh mode: fast or eco
    Refresh { mode: RefreshMode },
    /// Ask the processor to resume its audio context
    Resume,
    /// Print live meter readings
    Meter {
        #[arg(short, long, default_value_t = 20)]
        cycles: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = normaliser_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("panel.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,normaliser_panel=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("normaliser log: {}", log_path.display());
    tracing::info!("normaliser panel starting");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config not loaded, using defaults: {:#}", e);
        Config::default()
    });

    let tiers = Tiers::from_files(
        config.storage.sync_file.clone(),
        config.storage.local_file.clone(),
    );
    let transport = Arc::new(SocketTransport::new(config.processor.address.clone()));
    let bridge = MessagingBridge::new(transport, config.processor.request_timeout());
    let mut panel = ControlPanel::open(tiers, bridge, &config.timing).await;

    let command = cli.command.unwrap_or(Commands::Status);
    let outcome = run(&mut panel, command, &config).await;

    panel.flush().await;
    print_status(&panel);
    if panel.liveness().is_degraded() {
        eprintln!("processor unreachable: start audio, then run `normaliser resume`");
    }
    outcome
}

/// Runs one command.  Errors surface only after `main` has flushed.
async fn run(panel: &mut ControlPanel, command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Status => match panel.spectrum().await {
            Ok(bands) if !bands.is_empty() => {
                let levels: Vec<String> = bands.iter().map(|b| format!("{:.0}", b)).collect();
                println!("spectrum    {}", levels.join(" "));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("getSpectrum not delivered: {}", e),
        },
        Commands::Gain { value } => {
            report("setGain", panel.set_gain(value).await);
        }
        Commands::Enable { value } => {
            report("setEnabled", panel.set_enabled(value).await);
        }
        Commands::ApplyAll { value } => {
            report("setApplyAll", panel.set_apply_all(value).await);
        }
        Commands::Allow { host } => {
            let suggested = ControlPanel::host_suggestion(&host);
            let host = if suggested.is_empty() { host } else { suggested };
            match panel.add_site(&host).await {
                Some(delivery) => report("updateAllowlist", delivery),
                None => eprintln!("{:?} is empty or already allowed", host),
            }
        }
        Commands::Disallow { host } => match panel.remove_host(&host.to_lowercase()).await {
            Some(delivery) => report("updateAllowlist", delivery),
            None => eprintln!("{:?} is not on the allow-list", host),
        },
        Commands::Band { index, db } => {
            if panel.set_band(index, db).await.is_none() {
                anyhow::bail!("band {} out of range (0..{})", index, panel.curve().len());
            }
        }
        Commands::Preset { id } => panel.apply_preset(id).await,
        Commands::SavePreset { name } => panel.save_preset(&name).await?,
        Commands::DeletePreset { name } => {
            if !panel.delete_preset(&name).await {
                eprintln!("no user preset named {:?}", name);
            }
        }
        Commands::Refresh { mode } => panel.set_refresh_mode(mode).await,
        Commands::Resume => report("resumeCtx", panel.resume_audio().await),
        Commands::Meter { cycles } => {
            let poller = panel.start_meter();
            for _ in 0..cycles {
                tokio::time::sleep(config.timing.meter_delay(panel.refresh_mode())).await;
                match poller.display() {
                    Some(d) => println!("{:>3}%  {}", d.percent(), d.label()),
                    None => println!("  -   no reading"),
                }
            }
            poller.stop().await;
        }
    }
    Ok(())
}

fn report(what: &str, delivery: Delivery) {
    match delivery {
        Ok(true) => {}
        Ok(false) => eprintln!("{}: processor declined", what),
        Err(e) => tracing::debug!("{} not delivered: {}", what, e),
    }
}

fn print_status(panel: &ControlPanel) {
    println!("gain        {}", panel.gain_label());
    println!("enabled     {}", panel.enabled());
    println!("apply all   {}", panel.apply_all());
    println!("refresh     {}", panel.refresh_mode().as_str());
    println!("preset      {}", panel.selected_preset().label());

    let bands: Vec<String> = panel
        .bands()
        .into_iter()
        .map(|(label, gain)| format!("{}:{:+}", label, gain))
        .collect();
    println!("eq          {}", bands.join(" "));

    if panel.allowlist().is_empty() {
        println!("allow-list  (empty)");
    } else {
        for (i, host) in panel.allowlist().hosts().iter().enumerate() {
            println!("allow-list  [{}] {}", i, host);
        }
    }

    let user: Vec<&str> = panel.presets().names().collect();
    if !user.is_empty() {
        println!("presets     {}", user.join(", "));
    }
}
