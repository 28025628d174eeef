//! CLI argument parsing and command handlers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::config::{self, EngineConfig};
use crate::engine::Engine;
use crate::events::EngineEvent;
use crate::models::{Category, SearchFilters};
use crate::output;
use crate::query::parse_byte_size;

/// Findex: fast local file metadata search
#[derive(Parser, Debug)]
#[command(
    name = "fdx",
    version,
    about = "Index file metadata and search it instantly",
    long_about = "Findex walks your folders once, stores file metadata (name, path, size, \
                  dates, category) in a local database and answers searches in milliseconds. \
                  A watcher keeps the index current while it runs."
)]
pub struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: <data dir>/findex/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rebuild the index from scratch for one or more folders
    Index {
        /// Folders to index (defaults to current directory)
        #[arg(value_name = "ROOT", default_value = ".")]
        roots: Vec<PathBuf>,

        /// Extra names or path fragments to skip (repeatable)
        #[arg(short, long, value_name = "TOKEN")]
        exclude: Vec<String>,

        /// Suppress progress bar and summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Search the index
    ///
    /// The query may contain operators:
    ///   ext:pdf            Restrict extensions (comma-separated)
    ///   size:>100MB        Size bounds (>, <, or a bare value for ±10%)
    ///   date:week          today, yesterday, week, month, year
    ///   type:image         document, image, video, audio, archive, code, folder
    ///
    /// Queries with * or ? use typo-tolerant fuzzy matching.
    ///
    /// Examples:
    ///   fdx search report
    ///   fdx search "invoice ext:pdf date:month"
    ///   fdx search "" --type image --min-size 5MB
    Search {
        /// Query text with optional operators
        query: String,

        /// Extensions to include (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,

        /// Categories to include (comma-separated)
        #[arg(long = "type", value_name = "TYPE", value_delimiter = ',')]
        types: Vec<String>,

        /// Minimum size (e.g. 10MB)
        #[arg(long, value_name = "SIZE")]
        min_size: Option<String>,

        /// Maximum size (e.g. 1GB)
        #[arg(long, value_name = "SIZE")]
        max_size: Option<String>,

        /// Exclude directories
        #[arg(long, conflicts_with = "dirs_only")]
        no_dirs: bool,

        /// Only directories
        #[arg(long)]
        dirs_only: bool,

        /// Maximum results (default from config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Results to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Output the response as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output (only with --json)
        #[arg(long)]
        pretty: bool,
    },

    /// Keep the index current while files change
    ///
    /// Runs until stdin is closed (Ctrl+D) or the process is interrupted.
    Watch {
        /// Folders to watch (defaults to current directory)
        #[arg(value_name = "ROOT", default_value = ".")]
        roots: Vec<PathBuf>,

        /// Extra names or path fragments to skip (repeatable)
        #[arg(short, long, value_name = "TOKEN")]
        exclude: Vec<String>,

        /// Rebuild the index before watching
        #[arg(long)]
        index: bool,
    },

    /// Print the number of indexed entries
    Count,

    /// Show index statistics
    Stats {
        /// Output format as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output (only with --json)
        #[arg(long)]
        pretty: bool,
    },

    /// Delete every indexed entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a default config file
    Init,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let log_level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

        if let Command::Init = self.command {
            return handle_init(self.config);
        }

        let mut engine_config = EngineConfig::load(self.config.as_deref())?;
        if let Some(db) = self.db {
            engine_config.store.path = Some(db);
        }
        let engine = Engine::open(engine_config)?;

        match self.command {
            Command::Index { roots, exclude, quiet } => handle_index(&engine, &roots, &exclude, quiet),
            Command::Search {
                query,
                ext,
                types,
                min_size,
                max_size,
                no_dirs,
                dirs_only,
                limit,
                offset,
                json,
                pretty,
            } => {
                let filters = build_filters(ext, types, min_size, max_size, no_dirs, dirs_only)?;
                handle_search(&engine, &query, filters, limit, offset, json, pretty)
            }
            Command::Watch { roots, exclude, index } => handle_watch(&engine, &roots, &exclude, index),
            Command::Count => {
                println!("{}", engine.file_count()?);
                Ok(())
            }
            Command::Stats { json, pretty } => handle_stats(&engine, json, pretty),
            Command::Clear { yes } => handle_clear(&engine, yes),
            Command::Init => Ok(()),
        }
    }
}

fn build_filters(
    ext: Vec<String>,
    types: Vec<String>,
    min_size: Option<String>,
    max_size: Option<String>,
    no_dirs: bool,
    dirs_only: bool,
) -> Result<SearchFilters> {
    let categories = types
        .iter()
        .map(|t| Category::from_alias(t).with_context(|| format!("Unknown type: {}", t)))
        .collect::<Result<Vec<_>>>()?;

    let size = |value: Option<String>| -> Result<Option<u64>> {
        value
            .map(|v| parse_byte_size(&v).with_context(|| format!("Invalid size: {}", v)))
            .transpose()
    };

    Ok(SearchFilters {
        extensions: ext,
        categories,
        size_min: size(min_size)?,
        size_max: size(max_size)?,
        include_directories: !no_dirs,
        include_files: !dirs_only,
        ..Default::default()
    }
    .normalized())
}

fn handle_init(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(p) => p,
        None => config::app_dir()?.join(config::CONFIG_TOML),
    };

    if EngineConfig::write_default(&path)? {
        println!("Created {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}

fn handle_index(engine: &Engine, roots: &[PathBuf], exclude: &[String], quiet: bool) -> Result<()> {
    log::info!("Starting index build");
    let start = Instant::now();

    let rx = engine.subscribe();
    engine.start_indexing(roots, exclude)?;

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .context("Invalid progress template")?
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let mut completed = None;
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineEvent::Progress(progress)) => {
                pb.set_position(progress.progress as u64);
                pb.set_message(format!("{} entries", progress.files_processed));
            }
            Ok(EngineEvent::Complete { files_processed, .. }) => {
                completed = Some(files_processed);
                break;
            }
            Ok(EngineEvent::Error { message }) => {
                pb.suspend(|| output::warn(&message));
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if !engine.indexing_progress().is_indexing {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pb.finish_and_clear();

    let Some(files_processed) = completed else {
        anyhow::bail!("Indexing did not complete");
    };

    if !quiet {
        println!("Indexing complete!");
        println!("  Entries indexed: {}", files_processed);
        println!("  Duration:        {:.2}s", start.elapsed().as_secs_f64());
        println!("  Database:        {}", engine.store().path().display());
    }

    Ok(())
}

fn handle_search(
    engine: &Engine,
    query: &str,
    filters: SearchFilters,
    limit: Option<usize>,
    offset: usize,
    as_json: bool,
    pretty_json: bool,
) -> Result<()> {
    let response = engine.search(query, filters, limit, offset);

    if as_json {
        let json_output = if pretty_json {
            serde_json::to_string_pretty(&response)?
        } else {
            serde_json::to_string(&response)?
        };
        println!("{}", json_output);
        return Ok(());
    }

    if response.items.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for record in &response.items {
        println!("{}", output::record_line(record));
    }
    println!(
        "\n{} of {} match(es) in {}ms",
        response.items.len(),
        response.total_count,
        response.execution_time_ms
    );

    Ok(())
}

fn handle_watch(engine: &Engine, roots: &[PathBuf], exclude: &[String], index_first: bool) -> Result<()> {
    if index_first {
        handle_index(engine, roots, exclude, false)?;
    }

    let rx = engine.subscribe();
    let watched = engine.start_watching(roots, exclude);
    if watched == 0 {
        anyhow::bail!("None of the given folders could be watched");
    }

    println!("Press Ctrl+D to stop.\n");

    let printer = std::thread::spawn(move || {
        for event in rx {
            let stop = matches!(event, EngineEvent::WatchingStopped);
            if let Some(line) = output::event_line(&event) {
                println!("{}", line);
            }
            if stop {
                break;
            }
        }
    });

    // Block until stdin closes
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if line.is_err() {
            break;
        }
    }

    engine.stop_watching();
    let _ = printer.join();
    Ok(())
}

fn handle_stats(engine: &Engine, as_json: bool, pretty_json: bool) -> Result<()> {
    log::info!("Showing index statistics");
    let stats = engine.stats()?;

    if as_json {
        let json_output = if pretty_json {
            serde_json::to_string_pretty(&stats)?
        } else {
            serde_json::to_string(&stats)?
        };
        println!("{}", json_output);
        return Ok(());
    }

    println!("Findex Index Statistics");
    println!("=======================");
    println!("Database:       {}", engine.store().path().display());
    println!("Entries:        {}", stats.total_entries);
    println!("Files:          {}", stats.files);
    println!("Directories:    {}", stats.directories);
    println!("Total size:     {}", output::format_bytes(stats.total_bytes));
    match stats.last_indexed_at {
        Some(at) => println!("Last indexed:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last indexed:   (never)"),
    }

    if !stats.by_category.is_empty() {
        println!("\nBy category:");
        let mut categories: Vec<_> = stats.by_category.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (category, count) in categories {
            println!("  {:<10} {:>8}", category, count);
        }
    }

    Ok(())
}

fn handle_clear(engine: &Engine, skip_confirm: bool) -> Result<()> {
    if !skip_confirm {
        println!("This will delete every entry in {}", engine.store().path().display());
        print!("Are you sure? [y/N] ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine.clear()?;
    engine.store().vacuum()?;
    println!("Index cleared.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "fdx", "-vv", "--db", "/tmp/i.db", "search", "report", "--ext", "pdf,docx", "--type", "document",
            "--min-size", "1KB", "--no-dirs", "-n", "5",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/i.db")));
        match cli.command {
            Command::Search { query, ext, types, min_size, no_dirs, limit, .. } => {
                assert_eq!(query, "report");
                assert_eq!(ext, vec!["pdf", "docx"]);
                assert_eq!(types, vec!["document"]);
                assert_eq!(min_size.as_deref(), Some("1KB"));
                assert!(no_dirs);
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_conflicting_dir_flags() {
        assert!(Cli::try_parse_from(["fdx", "search", "x", "--no-dirs", "--dirs-only"]).is_err());
    }

    #[test]
    fn test_index_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["fdx", "index"]).unwrap();
        match cli.command {
            Command::Index { roots, exclude, quiet } => {
                assert_eq!(roots, vec![PathBuf::from(".")]);
                assert!(exclude.is_empty());
                assert!(!quiet);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_build_filters() {
        let filters = build_filters(
            vec!["PDF".to_string()],
            vec!["docs".to_string()],
            Some("10MB".to_string()),
            None,
            true,
            false,
        )
        .unwrap();

        assert_eq!(filters.extensions, vec![".pdf"]);
        assert_eq!(filters.categories, vec![Category::Document]);
        assert_eq!(filters.size_min, Some(10 * 1024 * 1024));
        assert!(!filters.include_directories);
        assert!(filters.include_files);
    }

    #[test]
    fn test_build_filters_rejects_bad_values() {
        assert!(build_filters(vec![], vec!["spaceship".to_string()], None, None, false, false).is_err());
        assert!(build_filters(vec![], vec![], Some("big".to_string()), None, false, false).is_err());
    }
}
