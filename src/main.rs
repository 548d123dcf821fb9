//! claycode - clay-code style erasure coding for files
//!
//! Usage:
//!   claycode encode <input>           - Split a file into k data and m coding units
//!   claycode encode <name> --random N - Encode N random bytes under <name>
//!   claycode decode <input>           - Rebuild the file from surviving units
//!   claycode repair <input> --unit U  - Regenerate one lost unit
//!   claycode info <input>             - Show metadata and unit availability

use clap::{Args, Parser, Subcommand};
use claycode::{
    config::{CodecConfig, Technique},
    galois::FieldRegistry,
    session::SessionSummary,
    storage, Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "claycode")]
#[command(author = "claycode Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Clay-code style erasure coding for files")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into units under ./Coding next to it
    Encode {
        /// Input file (with --random, only its name and directory are used)
        input: PathBuf,

        /// Encode this many random bytes instead of reading the input
        #[arg(long, value_name = "N")]
        random: Option<u64>,

        #[command(flatten)]
        codec: CodecArgs,
    },

    /// Decode a file from its units
    Decode {
        /// Original input path
        input: PathBuf,
    },

    /// Regenerate a single unit
    Repair {
        /// Original input path
        input: PathBuf,

        /// Unit to rebuild (0..k are data units, k..k+m coding units)
        #[arg(short, long)]
        unit: usize,
    },

    /// Show metadata and which units are available
    Info {
        /// Original input path
        input: PathBuf,
    },
}

#[derive(Args)]
struct CodecArgs {
    /// Configuration file (JSON or YAML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of data units
    #[arg(short)]
    k: Option<usize>,

    /// Number of coding units
    #[arg(short)]
    m: Option<usize>,

    /// Word size in bits
    #[arg(short)]
    w: Option<u32>,

    /// Coding technique
    #[arg(short, long, value_enum)]
    technique: Option<Technique>,

    /// Packet size for bitmatrix techniques
    #[arg(long = "packetsize")]
    packet_size: Option<usize>,

    /// Bytes per read-in (0 reads the whole file at once)
    #[arg(long = "buffersize")]
    buffer_size: Option<usize>,

    /// Planes per stripe (power of two)
    #[arg(long)]
    planes: Option<usize>,

    /// Coupling scalar r
    #[arg(long)]
    coupling_scalar: Option<u32>,

    /// Worker threads (defaults to the number of cores)
    #[arg(long)]
    threads: Option<usize>,
}

impl CodecArgs {
    /// Start from the config file or defaults, then apply environment and flags
    fn into_config(self) -> Result<CodecConfig> {
        let mut config = match &self.config {
            Some(path) => CodecConfig::load(path)?,
            None => CodecConfig::default(),
        };
        config.apply_env_overrides();

        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(m) = self.m {
            config.m = m;
        }
        if let Some(w) = self.w {
            config.w = w;
        }
        if let Some(technique) = self.technique {
            config.technique = technique;
        }
        if let Some(packet_size) = self.packet_size {
            config.packet_size = packet_size;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(planes) = self.planes {
            config.planes = Some(planes);
        }
        if let Some(scalar) = self.coupling_scalar {
            config.coupling.scalar = scalar;
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    if let Err(e) = run_command(cli.command) {
        error!("Error: {}", e);
        // Setup problems are usage errors; anything later is a coding failure
        std::process::exit(if e.is_setup_error() { 2 } else { 1 });
    }
}

fn run_command(command: Commands) -> Result<()> {
    let registry = FieldRegistry::new();
    match command {
        Commands::Encode {
            input,
            random,
            codec,
        } => cmd_encode(&input, random, codec.into_config()?, &registry),
        Commands::Decode { input } => cmd_decode(&input, &registry),
        Commands::Repair { input, unit } => cmd_repair(&input, unit, &registry),
        Commands::Info { input } => cmd_info(&input),
    }
}

fn cmd_encode(input: &Path, random: Option<u64>, config: CodecConfig, registry: &FieldRegistry) -> Result<()> {
    let report = match random {
        Some(size) => storage::encode_random(input, size, &config, registry)?,
        None => storage::encode_file(input, &config, registry)?,
    };

    let meta = &report.metadata;
    println!("Encoded {} ({} bytes)", meta.file_name, meta.original_size);
    println!("  Technique: {} (k={}, m={}, w={})", meta.technique, meta.k, meta.m, meta.w);
    println!("  Read-ins: {} of {} bytes", meta.readins, meta.buffer_size);
    println!("  Units: {} of {} bytes in {}", meta.k + meta.m, meta.unit_len(), report.layout.dir().display());
    print_summary("Encoding", report.summary.as_ref());
    Ok(())
}

fn cmd_decode(input: &Path, registry: &FieldRegistry) -> Result<()> {
    let report = storage::decode_file(input, registry)?;

    if report.erasures.is_empty() {
        println!("All units present");
    } else {
        println!("Recovered erased units {:?}", report.erasures.as_slice());
    }
    match report.metadata.blake3 {
        Some(_) => println!("Integrity: blake3 verified"),
        None => println!("Integrity: no hash recorded (random input)"),
    }
    println!("Decoded to {}", report.output.display());
    print_summary("Decoding", report.summary.as_ref());
    Ok(())
}

fn cmd_repair(input: &Path, unit: usize, registry: &FieldRegistry) -> Result<()> {
    let report = storage::repair_unit(input, unit, registry)?;
    println!("Repaired unit {} -> {}", report.unit, report.path.display());
    println!("  Read {} bytes from surviving units", report.bytes_read);
    print_summary("Repair", report.summary.as_ref());
    Ok(())
}

fn cmd_info(input: &Path) -> Result<()> {
    let (meta, layout, erasures) = storage::inspect(input)?;

    println!("claycode Metadata");
    println!("=================");
    println!();
    println!("File: {} ({} bytes)", meta.file_name, meta.original_size);
    println!("Technique: {}", meta.technique);
    println!("  k={}, m={}, w={}, packet size {}", meta.k, meta.m, meta.w, meta.packet_size);
    println!("  Coupling: r={} over GF(2^{})", meta.coupling.scalar, meta.coupling.width);
    println!("Planes: {}", meta.planes);
    println!("Buffer: {} bytes x {} read-ins", meta.buffer_size, meta.readins);
    println!("Block size: {} bytes", meta.block_size);
    println!("Hash: {}", meta.blake3.as_deref().unwrap_or("none"));
    println!();

    println!("Units ({}):", layout.units());
    for unit in 0..layout.units() {
        let status = if erasures.contains(unit) { "MISSING" } else { "ok" };
        println!("  [{}] {} ({})", unit, layout.unit_path(unit).display(), status);
    }
    println!();

    let lost = erasures.len();
    if lost == 0 {
        println!("Status: healthy");
    } else if lost <= meta.m {
        println!("Status: degraded, {} of {} tolerable losses", lost, meta.m);
    } else {
        info!("{} units lost with m = {}", lost, meta.m);
        return Err(Error::SingularMatrix(format!(
            "{} units missing, at most {} can be recovered",
            lost, meta.m
        )));
    }
    Ok(())
}

fn print_summary(label: &str, summary: Option<&SessionSummary>) {
    if let Some(summary) = summary {
        println!(
            "{}: {:.3} s, {:.2} MB/s",
            label,
            summary.elapsed.as_secs_f64(),
            summary.throughput()
        );
    }
}
