//! ipgeo: serve, query and build offline IPv4 geolocation databases.

use clap::{Parser, Subcommand};
use ipgeo::api::{router, AppState, GeoResponse};
use ipgeo::binary::{decode, DatabaseWriter};
use ipgeo::config::DEFAULT_CONFIG_PATH;
use ipgeo::ratelimit::IpRateLimit;
use ipgeo::remote::unzip_single;
use ipgeo::{Config, GeoInfo, GeoService};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "ipgeo")]
#[command(version = "0.1.0")]
#[command(about = "Offline IPv4 geolocation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP lookup service
    Serve {
        /// YAML config file
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Look up addresses in a local database file (.dat or .zip)
    Lookup {
        /// Database file
        #[arg(short, long)]
        file: PathBuf,

        /// IPv4 addresses to resolve
        #[arg(required = true)]
        ips: Vec<String>,
    },

    /// Build a database from a `start|end|record` text file
    Pack {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Entry name inside the zip archive
        #[arg(long, default_value = "ipdata.dat")]
        entry: String,

        /// Write the bare database instead of a zip archive
        #[arg(long)]
        raw: bool,
    },

    /// Parse and validate a config file
    CheckConfig {
        /// YAML config file
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config } => serve(&config),
        Commands::Lookup { file, ips } => lookup(&file, &ips),
        Commands::Pack {
            input,
            output,
            entry,
            raw,
        } => pack(&input, &output, &entry, raw),
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn serve(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let service = Arc::new(GeoService::new(&config.data_sync)?);
    // No counter store is linked into this binary.
    let rate_limit = IpRateLimit::from_config(&config, None);
    let addr = config.listen_addr();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
        log::info!("Starting server at {}", addr);

        // Lookups answer 503 until the first snapshot is published.
        let init_service = Arc::clone(&service);
        let init = tokio::task::spawn_blocking(move || init_service.init());
        tokio::spawn(async move {
            let failure = match init.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            log::error!("ip geo service init failed: {}", failure);
            std::process::exit(1);
        });

        let app = router(AppState {
            service: Arc::clone(&service),
            rate_limit,
        });
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    service.shutdown();
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn lookup(file: &Path, ips: &[String]) -> CliResult<()> {
    let data = read_database(file)?;
    let snapshot = decode(data, "local")?;
    log::info!(
        "Loaded {} ({} ranges, sha256 {})",
        file.display(),
        snapshot.record_count(),
        snapshot.digest()
    );

    for ip in ips {
        match snapshot.lookup(ip) {
            Ok(record) => {
                let resp = GeoResponse::from(GeoInfo::new(snapshot.version(), record));
                println!("{}\t{}", ip, serde_json::to_string(&resp)?);
            }
            Err(e) => println!("{}\terror: {}", ip, e),
        }
    }
    Ok(())
}

/// Database bytes from a bare file or the single entry of a zip archive.
fn read_database(file: &Path) -> CliResult<Vec<u8>> {
    let bytes = fs::read(file)?;
    if !bytes.starts_with(b"PK\x03\x04") {
        return Ok(bytes);
    }
    let mut data = Vec::new();
    unzip_single(file, &mut data)?;
    Ok(data)
}

fn pack(input: &Path, output: &Path, entry: &str, raw: bool) -> CliResult<()> {
    let content = fs::read_to_string(input)?;
    let mut writer = DatabaseWriter::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(3, '|');
        let (Some(start), Some(end), Some(record)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("line {}: expected start|end|record", lineno + 1).into());
        };
        let start: Ipv4Addr = start
            .trim()
            .parse()
            .map_err(|e| format!("line {}: bad start address: {}", lineno + 1, e))?;
        let end: Ipv4Addr = end
            .trim()
            .parse()
            .map_err(|e| format!("line {}: bad end address: {}", lineno + 1, e))?;
        writer
            .add_range(start, end, record)
            .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
    }

    let bytes = if raw {
        writer.write()?
    } else {
        writer.write_zip(entry)?
    };
    fs::write(output, &bytes)?;

    println!(
        "Packed {} ranges into {} ({} bytes)",
        writer.len(),
        output.display(),
        bytes.len()
    );
    Ok(())
}

fn check_config(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let trigger = ipgeo::Trigger::from_config(&config.data_sync)?;
    println!("Config OK: {}", config_path.display());
    println!("  listen:   {}", config.listen_addr());
    println!("  source:   {}", config.data_sync.download_url);
    println!("  schedule: {}", trigger);
    println!("  probe:    {}", config.data_sync.probe_ip);
    Ok(())
}
