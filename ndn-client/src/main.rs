// ndn: command-line client for a local NDN forwarder.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ndn_client::{config, explore, fetch_segmented, ClientError, Connection, Publication};
use ndn_core::key::KEY_BITS;
use ndn_core::segment::DEFAULT_SEGMENT_SIZE;
use ndn_core::{ExploreError, Interest, Key, Name, Verification};

/// Exit status when the forwarder answers exploration with an unexpected upcall kind.
const EXIT_UNEXPECTED_UPCALL: u8 = 100;

#[derive(Parser)]
#[command(name = "ndn", version, about = "Named Data Networking client")]
struct Cli {
    /// Forwarder address, overrides the config file.
    #[arg(long, global = true)]
    forwarder: Option<String>,
    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one content object (or a whole segmented object) and write its payload to stdout.
    Get {
        uri: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Fetch `<uri>/<segment>` until the final block.
        #[arg(long)]
        segmented: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Segment a file under `<uri>/<version>` and serve it.
    Put {
        uri: String,
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
        chunk_size: usize,
        #[arg(long, default_value_t = 10_000)]
        serve_ms: u64,
    },
    /// Discover every name under `<uri>`.
    Slurp {
        uri: String,
        timeout_ms: u64,
        /// Prefixes explored at once (0: no limit).
        #[arg(long, default_value_t = 0)]
        max_active: usize,
    },
    /// Publish an enumeration of `names` under `<uri>/%C1.E.be/<key id>/<version>`.
    Enumerate {
        uri: String,
        names: Vec<String>,
        #[arg(long, default_value_t = 10_000)]
        serve_ms: u64,
    },
    /// Generate a signing key and write it as PEM.
    Keygen {
        #[arg(long, default_value_t = KEY_BITS)]
        bits: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(ClientError::Explore(ExploreError::UnexpectedUpcall(kind))) =
                e.downcast_ref::<ClientError>()
            {
                eprintln!("Received invalid kind type: {}", kind);
                return ExitCode::from(EXIT_UNEXPECTED_UPCALL);
            }
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load();
    if let Some(addr) = cli.forwarder {
        cfg.forwarder_addr = addr;
    }

    match cli.command {
        Command::Keygen { bits, out } => keygen(bits, out),
        Command::Get {
            uri,
            timeout_ms,
            segmented,
            out,
        } => {
            let name = parse_name(&uri)?;
            let timeout = timeout_ms.map_or(cfg.run_timeout(), Duration::from_millis);
            let conn = Connection::open(cfg)?;
            let payload = if segmented {
                fetch_segmented(&conn, &name, timeout)?
            } else {
                conn.get(&name, None, timeout)?.content().to_vec()
            };
            conn.disconnect()?;
            match out {
                Some(path) => std::fs::write(&path, &payload)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(&payload)?,
            }
            Ok(())
        }
        Command::Put {
            uri,
            file,
            chunk_size,
            serve_ms,
        } => {
            let prefix = parse_name(&uri)?;
            let data =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let conn = Connection::open(cfg)?;
            let key = signing_key(&conn)?;
            let publication = Publication::segmented(&prefix, None, &key, &data, chunk_size)?;
            if publication.objects().is_empty() {
                tracing::warn!("empty payload, nothing to publish");
            }
            publication.serve(&conn)?;
            println!("{}", publication.name());
            conn.run(Some(Duration::from_millis(serve_ms)))?;
            conn.disconnect()?;
            Ok(())
        }
        Command::Slurp {
            uri,
            timeout_ms,
            max_active,
        } => {
            let root = parse_name(&uri)?;
            println!("Scanning {}, timeout={}ms", root, timeout_ms);
            let conn = Connection::open(cfg)?;
            let found = explore(
                &conn,
                root,
                Interest::default(),
                max_active,
                Duration::from_millis(timeout_ms),
                |d| {
                    if d.verification == Verification::Invalid {
                        println!("*** VERIFICATION FAILURE *** {}", d.name);
                    }
                    let status = match d.verification {
                        Verification::Valid => "verified",
                        _ => "unverified",
                    };
                    println!("{} [{}]", d.name, status);
                },
            )?;
            tracing::info!(found, "exploration finished");
            conn.disconnect()?;
            Ok(())
        }
        Command::Enumerate {
            uri,
            names,
            serve_ms,
        } => {
            let prefix = parse_name(&uri)?;
            let names = names
                .iter()
                .map(String::as_str)
                .map(parse_name)
                .collect::<anyhow::Result<Vec<Name>>>()?;
            let conn = Connection::open(cfg)?;
            let key = signing_key(&conn)?;
            let publication = Publication::enumeration(&prefix, names, &key, DEFAULT_SEGMENT_SIZE)?;
            publication.push(&conn)?;
            publication.serve(&conn)?;
            println!("{}", publication.name());
            conn.run(Some(Duration::from_millis(serve_ms)))?;
            conn.disconnect()?;
            Ok(())
        }
    }
}

fn parse_name(uri: &str) -> anyhow::Result<Name> {
    uri.parse::<Name>()
        .with_context(|| format!("invalid name {:?}", uri))
}

fn signing_key(conn: &Connection) -> anyhow::Result<Key> {
    match conn.default_key() {
        Some(key) => Ok(key.clone()),
        None => bail!("no signing key: set key_file in the config or NDN_KEY_FILE (see `ndn keygen`)"),
    }
}

fn keygen(bits: usize, out: Option<PathBuf>) -> anyhow::Result<()> {
    let key = Key::generate(bits)?;
    let pem = key.private_to_pem()?;
    match out {
        Some(path) => {
            std::fs::write(&path, pem).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("wrote key {}", path.display());
        }
        None => print!("{}", pem),
    }
    Ok(())
}
