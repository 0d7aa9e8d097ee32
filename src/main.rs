use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::Level;
use ucas_unpack::codec::CodecRegistry;
use ucas_unpack::filter::FilterMatcher;
use ucas_unpack::perf::unpack_parallel;
use ucas_unpack::toc::ContainerMetadata;
use ucas_unpack::unpack::{FileUnpacked, UnpackObserver, UnpackOptions, Unpacker};

#[derive(Parser)]
#[command(name = "ucas-unpack", about = "Extract assets from IoStore .utoc/.ucas containers")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract files from a .ucas blob
    Unpack {
        /// Parsed table of contents (JSON)
        #[arg(short, long)]
        toc: PathBuf,
        /// The .ucas data blob
        ucas: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Patterns separated by ',' or ';'. '*', '?' and '{}' are wildcards
        #[arg(short, long, default_value = "*")]
        filter: String,
        /// AES-256 key as hex, overrides the key in the table of contents
        #[arg(short = 'k', long)]
        aes_key: Option<String>,
        /// Worker threads (needs the `parallel` feature; 0 = one per core)
        #[arg(short, long, default_value = "1")]
        jobs: usize,
    },
    /// List the files a filter selects
    List {
        #[arg(short, long)]
        toc: PathBuf,
        #[arg(short, long, default_value = "*")]
        filter: String,
    },
    /// Show container metadata
    Info {
        #[arg(short, long)]
        toc: PathBuf,
    },
}

/// Drives a byte-based progress bar from unpack notifications.
struct ProgressObserver {
    bar: ProgressBar,
}

impl UnpackObserver for ProgressObserver {
    fn file_unpacked(&self, event: &FileUnpacked) {
        self.bar.set_length(event.total_bytes);
        self.bar.set_position(event.unpacked_bytes);
        self.bar.set_message(format!("[{}/{}] {}", event.index, event.total_files, event.path));
    }

    fn finished(&self, files_unpacked: usize) {
        self.bar.finish_with_message(format!("{files_unpacked} files unpacked"));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { toc, ucas, output_dir, filter, aes_key, jobs } => {
            let mut meta = load_toc(&toc)?;
            if let Some(key) = aes_key {
                let key = key.trim_start_matches("0x").trim_start_matches("0X");
                meta.cipher_key = Some(hex::decode(key)?);
            }

            let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins())?;
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
                    .progress_chars("#>-"),
            );
            let progress = ProgressObserver { bar };

            let count = if jobs == 1 {
                unpacker.unpack(&ucas, &output_dir, &filter, &[&progress])?
            } else {
                let opts = UnpackOptions { filter, workers: jobs };
                unpack_parallel(&unpacker, &ucas, &output_dir, &opts, &[&progress])?
            };
            println!("Unpacked {count} file(s) to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { toc, filter } => {
            let meta = load_toc(&toc)?;
            println!("{:<60} {:>12} {:>12} {:>7}", "Path", "Size", "Compressed", "Blocks");
            let mut total = 0u64;
            let files = FilterMatcher::new(&filter).select(&meta.files);
            for f in &files {
                total += f.total_length;
                println!("{:<60} {:>12} {:>12} {:>7}",
                    f.file_path, f.total_length, f.blocks_compressed_size(),
                    f.compression_blocks.len());
            }
            println!("{} file(s), {} bytes", files.len(), total);
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { toc } => {
            let meta = load_toc(&toc)?;
            let codecs = CodecRegistry::with_builtins();
            let total: u64 = meta.files.iter().map(|f| f.total_length).sum();
            let blocks: usize = meta.files.iter().map(|f| f.compression_blocks.len()).sum();

            println!("── IoStore container ────────────────────────────────────");
            println!("  TOC            {}", toc.display());
            println!("  Mount point    {}", meta.mount_point);
            println!("  Encrypted      {}", meta.is_encrypted);
            println!("  Key supplied   {}", meta.cipher_key.is_some());
            println!("  Files          {}", meta.files.len());
            println!("  Blocks         {blocks}");
            println!("  Total size     {total} B");
            println!("  Compression methods ({}):", meta.compression_methods.len());
            for (i, name) in meta.compression_methods.iter().enumerate() {
                let status = if codecs.contains(name) { "available" } else { "NOT AVAILABLE" };
                println!("    [{i}] {name} ({status})");
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn load_toc(path: &Path) -> Result<ContainerMetadata, Box<dyn std::error::Error>> {
    Ok(ContainerMetadata::from_json(&std::fs::read(path)?)?)
}
