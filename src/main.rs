#![cfg(feature = "cli")]
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use clap::{ArgAction, Parser, Subcommand};
use rsa::traits::PublicKeyParts;
use tracing::{info, warn, Level};

use wvcdm::cdm::{Cdm, SessionOptions};
use wvcdm::config::CdmConfig;
use wvcdm::pssh::{normalize, parse_header, PsshBox};

#[derive(Parser)]
#[command(name = "wvcdm", version, about = "Widevine license client")]
struct Cli {
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a license handshake over stdin/stdout.
    ///
    /// Prints the base64 challenge, reads one base64 license line from stdin
    /// and prints one `kid:key` line per key.
    License {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
        init_data: String,
    },
    /// Normalize init data and show the key ids it carries.
    Pssh { init_data: String },
    /// Show the device a config file points at.
    Device {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::License { config, init_data } => run_license(&config, &init_data),
        Commands::Pssh { init_data } => run_pssh(&init_data),
        Commands::Device { config } => run_device(&config),
    }
}

fn run_license(config_path: &Path, init_data: &str) -> anyhow::Result<()> {
    let config = CdmConfig::from_path(config_path).context("Failed to load config")?;
    let device = config.device.load().context("Failed to load device")?;
    info!(
        "[+] Loaded {:?} device (system id {:?})",
        device.device_type(),
        device.credentials().system_id()
    );

    let mut cdm = Cdm::new(device, init_data, SessionOptions::from(config.session));
    let challenge = cdm.get_challenge().context("Failed to build license request")?;
    info!("[+] Created License Request Message (Challenge)");
    println!("{}", challenge);

    info!("[*] Waiting for the base64 license on stdin");
    let mut license = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut license)
        .context("Failed to read license")?;
    if license.trim().is_empty() {
        anyhow::bail!("No license received");
    }

    cdm.provide_license(&license).context("License rejected")?;
    info!("[+] License Parsed Successfully");

    let keys = cdm.get_keys();
    if keys.is_empty() {
        warn!("[-] License carried no keys");
    }
    for key in keys {
        info!("[{}] {}", key.key_type, key);
        println!("{}", key);
    }
    Ok(())
}

fn run_pssh(init_data: &str) -> anyhow::Result<()> {
    let data = normalize(init_data).context("Invalid init data")?;
    println!("{}", base64::engine::general_purpose::STANDARD.encode(&data));

    if let Ok(pssh) = PsshBox::from_bytes(&data) {
        info!("[+] pssh box v{} for system {}", pssh.version, pssh.system_id);
        for kid in &pssh.key_ids {
            println!("box kid: {}", kid.simple());
        }
    }

    let header = parse_header(&data).context("No Widevine header found")?;
    for kid in &header.key_ids {
        println!("kid: {}", hex::encode(kid));
    }
    if let Some(content_id) = &header.content_id {
        info!("[+] content id: {}", String::from_utf8_lossy(content_id));
    }
    Ok(())
}

fn run_device(config_path: &Path) -> anyhow::Result<()> {
    let config = CdmConfig::from_path(config_path).context("Failed to load config")?;
    let device = config.device.load().context("Failed to load device")?;
    let credentials = device.credentials();

    println!("type: {:?}", device.device_type());
    match credentials.system_id() {
        Some(system_id) => println!("system id: {}", system_id),
        None => println!("system id: unknown"),
    }
    println!("key size: {} bit", credentials.public_key().size() * 8);
    for entry in &credentials.client_id().client_info {
        if let (Some(name), Some(value)) = (&entry.name, &entry.value) {
            println!("{}: {}", name, value);
        }
    }
    Ok(())
}
