use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dns_tools::config::{DenialKind, ToolConfig, ZonemdSetting};
use dns_tools::dnssec::DnsSecAlgorithm;
use dns_tools::tools;

/// Sign, verify and digest DNS zones with keys held in an HSM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML or JSON); searched for when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a zone file
    Sign {
        /// Unsigned zone file
        zone_in: PathBuf,

        /// Where to write the signed zone
        zone_out: PathBuf,

        /// Zone origin, for files without $ORIGIN or SOA
        #[arg(long)]
        origin: Option<String>,

        #[arg(long)]
        algorithm: Option<DnsSecAlgorithm>,

        /// Use NSEC3 instead of NSEC
        #[arg(long)]
        nsec3: bool,

        /// Leave insecure delegations out of the NSEC3 chain
        #[arg(long)]
        opt_out: bool,

        /// Signature validity in days
        #[arg(long)]
        validity_days: Option<u32>,

        /// Add a ZONEMD record (sha384 or sha512)
        #[arg(long)]
        zonemd: Option<String>,
    },

    /// Verify a signed zone file
    Verify {
        zone_in: PathBuf,

        #[arg(long)]
        origin: Option<String>,
    },

    /// Compute the ZONEMD digest of a zone file
    Digest {
        zone_in: PathBuf,

        /// Write the zone with its new ZONEMD record here
        zone_out: Option<PathBuf>,

        #[arg(long)]
        origin: Option<String>,

        /// Hash algorithm (sha384 or sha512)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Destroy the keys whose label starts with a prefix
    #[command(name = "reset-pkcs11-keys")]
    ResetKeys {
        /// Label prefix of the keys to destroy
        #[arg(default_value = "")]
        prefix: String,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn parse_zonemd(value: &str) -> Result<ZonemdSetting, String> {
    match value.to_lowercase().as_str() {
        "none" => Ok(ZonemdSetting::None),
        "sha384" => Ok(ZonemdSetting::Sha384),
        "sha512" => Ok(ZonemdSetting::Sha512),
        other => Err(format!("unknown ZONEMD hash: {}", other)),
    }
}

fn confirm(prefix: &str) -> io::Result<bool> {
    let shown = if prefix.is_empty() { "ALL" } else { prefix };
    eprint!("Destroy keys labelled {}* on the token? This cannot be undone. [y/N] ", shown);
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn run(args: Args) -> dns_tools::Result<bool> {
    let mut config = ToolConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Sign {
            zone_in,
            zone_out,
            origin,
            algorithm,
            nsec3,
            opt_out,
            validity_days,
            zonemd,
        } => {
            if origin.is_some() {
                config.origin = origin;
            }
            if let Some(algorithm) = algorithm {
                config.algorithm = algorithm;
            }
            if nsec3 {
                config.denial_mode = DenialKind::Nsec3;
            }
            if opt_out {
                config.nsec3_opt_out = true;
            }
            if let Some(days) = validity_days {
                config.validity_days = days;
            }
            if let Some(zonemd) = zonemd {
                config.zonemd = parse_zonemd(&zonemd).map_err(dns_tools::Error::Config)?;
            }
            config.validate()?;

            let signed = tools::sign(&zone_in, &zone_out, &config).await?;
            info!(
                "Signed {} into {} ({} records)",
                zone_in.display(),
                zone_out.display(),
                signed.record_count()
            );
            Ok(true)
        }
        Command::Verify { zone_in, origin } => {
            if origin.is_some() {
                config.origin = origin;
            }
            let report = tools::verify(&zone_in, &config).await?;
            if report.is_ok() {
                println!(
                    "{}: OK ({} RRsets, {} signatures)",
                    zone_in.display(),
                    report.rrsets_checked,
                    report.signatures_checked
                );
            } else {
                for finding in &report.findings {
                    println!("{}", finding);
                }
                println!(
                    "{}: FAILED with {} findings",
                    zone_in.display(),
                    report.findings.len()
                );
            }
            Ok(report.is_ok())
        }
        Command::Digest {
            zone_in,
            zone_out,
            origin,
            hash,
        } => {
            if origin.is_some() {
                config.origin = origin;
            }
            if let Some(hash) = hash {
                config.zonemd = parse_zonemd(&hash).map_err(dns_tools::Error::Config)?;
            }
            let digest = tools::digest(&zone_in, zone_out.as_deref(), &config)?;
            println!(
                "{} {} {} {}",
                digest.serial,
                digest.scheme,
                digest.hash.to_u8(),
                hex::encode(&digest.digest)
            );
            Ok(true)
        }
        Command::ResetKeys { prefix, yes } => {
            if !yes && !confirm(&prefix)? {
                println!("Aborted");
                return Ok(false);
            }
            let destroyed = tools::reset_keys(&prefix, &config).await?;
            println!("Destroyed {} keys", destroyed);
            Ok(true)
        }
    }
}

/// How long exit waits for token calls that are still running
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start the runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let outcome = runtime.block_on(run(args));
    // A token call that timed out may still be blocked in the HSM library
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
