//! Hashpack CLI
//!
//! Build content-addressed archives from directory trees, inspect them and
//! pull files back out by hash.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hashpack::{Archive, ArchiveBuilder, BuildConfig, ContentHash, HashTrie, MIN_HASH_LEN};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hashpack")]
#[command(about = "Content-addressed extent archive tool", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an archive from files and directories, keyed by SHA-256
    Build {
        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,

        /// TOML build configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Build number to record (overrides the config file)
        #[arg(long)]
        build_no: Option<u64>,

        /// Files allowed per leading hash byte (overrides the config file)
        #[arg(long)]
        max_entries: Option<usize>,

        /// Skip files whose content is already in the archive
        #[arg(long)]
        skip_duplicates: bool,

        /// Print the build summary as JSON
        #[arg(long)]
        json: bool,

        /// Files or directories to add
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Report unique-prefix depths for a list of hex hashes, one per line
    Analyze {
        /// File of hex hashes
        hashes: PathBuf,
    },

    /// Show archive header and statistics
    Info {
        archive: PathBuf,

        #[arg(long)]
        json: bool,

        /// Read the archive into memory instead of mapping it
        #[arg(long)]
        buffered: bool,
    },

    /// Print where a file lives in the archive
    Find {
        archive: PathBuf,
        hash: String,

        #[arg(long)]
        buffered: bool,
    },

    /// Write a file's bytes to stdout
    Cat {
        archive: PathBuf,
        hash: String,

        #[arg(long)]
        buffered: bool,
    },

    /// List every stored file by its retained hash bytes
    List {
        archive: PathBuf,

        #[arg(long)]
        buffered: bool,
    },
}

fn open_archive(path: &Path, buffered: bool) -> anyhow::Result<Archive> {
    let archive = if buffered {
        Archive::open_buffered(path)
    } else {
        Archive::open(path)
    };
    archive.with_context(|| format!("failed to open archive {:?}", path))
}

fn parse_hash(text: &str) -> anyhow::Result<ContentHash> {
    text.parse()
        .with_context(|| format!("'{}' is not a {}-byte hex hash", text, hashpack::HASH_LEN))
}

/// Recursively collect regular files, in a stable order
fn collect_files(path: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let meta = std::fs::metadata(path).with_context(|| format!("cannot stat {:?}", path))?;
    if meta.is_file() {
        out.push(path.to_path_buf());
    } else if meta.is_dir() {
        let mut children = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        children.sort();
        for child in children {
            collect_files(&child, out)?;
        }
    } else {
        warn!("Skipping {:?}: not a regular file", path);
    }
    Ok(())
}

fn build(
    output: &Path,
    config: Option<&Path>,
    build_no: Option<u64>,
    max_entries: Option<usize>,
    skip_duplicates: bool,
    json: bool,
    inputs: &[PathBuf],
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => BuildConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {:?}", path))?,
        None => BuildConfig::default(),
    };
    if let Some(build_no) = build_no {
        config.build_no = build_no;
    }
    if let Some(max_entries) = max_entries {
        config.max_entries_per_prefix = max_entries;
    }

    let mut files = Vec::new();
    for input in inputs {
        collect_files(input, &mut files)?;
    }
    info!("Hashing {} files", files.len());

    let mut builder = ArchiveBuilder::with_config(config)?;
    for path in &files {
        let hash = ContentHash::digest_reader(File::open(path)?)
            .with_context(|| format!("failed to hash {:?}", path))?;
        if skip_duplicates && builder.trie().contains(&hash) {
            info!("Skipping duplicate content {:?} ({})", path, hash);
            continue;
        }
        builder
            .add_file(hash, path)
            .with_context(|| format!("failed to add {:?}", path))?;
    }

    let summary = builder.write_to(output)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {} files, {} bytes, max depth {}, max retained hash {} bytes",
            output.display(),
            summary.file_count,
            summary.image_bytes,
            summary.max_depth,
            summary.max_unique_len
        );
    }
    Ok(())
}

fn analyze(path: &Path) -> anyhow::Result<()> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("cannot open {:?}", path))?);
    let start = Instant::now();

    let mut trie = HashTrie::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let hash = parse_hash(line).with_context(|| format!("line {}", line_no + 1))?;
        if trie.insert(hash).is_err() {
            bail!("duplicate found at line {}: '{}'", line_no + 1, line);
        }
    }
    let elapsed = start.elapsed();

    println!("Files: {}, Max Depth: {} bytes.", trie.len(), trie.max_depth());
    println!("Trie generation took: {:.3}ms", elapsed.as_secs_f64() * 1000.0);
    let histogram = trie.depth_histogram();
    for depth in 1..=trie.max_depth() {
        println!(
            " Depth {}: {:3} files",
            depth,
            histogram.get(&depth).copied().unwrap_or(0)
        );
    }

    let widest = trie
        .prefix_depths()
        .iter()
        .map(|&d| (d as usize).max(MIN_HASH_LEN))
        .max()
        .unwrap_or(MIN_HASH_LEN);
    println!("Widest prefix retains {} hash bytes", widest);
    Ok(())
}

fn info(path: &Path, json: bool, buffered: bool) -> anyhow::Result<()> {
    let archive = open_archive(path, buffered)?;
    let stats = archive.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Archive:        {}", path.display());
    println!("Build:          {}", stats.build_no);
    match stats.created {
        Some(created) => println!("Created:        {}", created.to_rfc3339()),
        None => println!("Created:        unknown"),
    }
    println!("Files:          {}", stats.file_count);
    println!("Image bytes:    {}", stats.image_bytes);
    println!("Data extents:   {}", stats.data_extents);
    println!("Data bytes:     {}", stats.data_bytes);
    println!("Prefixes used:  {}/256", stats.prefixes_used);
    println!("Fullest prefix: {}", stats.fullest_prefix);
    for (len, count) in &stats.unique_len_histogram {
        println!(" {:2} hash bytes: {} files", len, count);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Build {
            output,
            config,
            build_no,
            max_entries,
            skip_duplicates,
            json,
            inputs,
        } => build(
            &output,
            config.as_deref(),
            build_no,
            max_entries,
            skip_duplicates,
            json,
            &inputs,
        ),
        Command::Analyze { hashes } => analyze(&hashes),
        Command::Info {
            archive,
            json,
            buffered,
        } => info(&archive, json, buffered),
        Command::Find {
            archive,
            hash,
            buffered,
        } => {
            let archive = open_archive(&archive, buffered)?;
            let hash = parse_hash(&hash)?;
            match archive.find_file(&hash) {
                Some(location) => {
                    let offset = location
                        .absolute_offset()
                        .context("descriptor points into the header region")?;
                    println!(
                        "extent {} offset {} length {}",
                        location.extent, offset, location.length
                    );
                    Ok(())
                }
                None => bail!("{} not found", hash),
            }
        }
        Command::Cat {
            archive,
            hash,
            buffered,
        } => {
            let archive = open_archive(&archive, buffered)?;
            let hash = parse_hash(&hash)?;
            let bytes = archive.read(&hash)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
        Command::List { archive, buffered } => {
            let archive = open_archive(&archive, buffered)?;
            for entry in archive.entries() {
                println!(
                    "{:<22} extent {:>7} length {:>9}",
                    entry.retained_hex(),
                    entry.location.extent,
                    entry.location.length
                );
            }
            Ok(())
        }
    }
}
