//! CLI entry point for SmartBuddy: add sources to the knowledge base and query it.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use smartbuddy_core::{
    config_path, embedder_from_config, load_config, save_config, status, Config, Embedder,
    EmbedderKind, LoadStatus, RetrievalService, Session, Source, SourceFilter, SourceId,
};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "smartbuddy")]
#[command(about = "SmartBuddy: chat with your own knowledge base")]
struct Cli {
    /// Use the offline hashing embedder instead of Ollama.
    #[arg(long, global = true)]
    offline: bool,
    /// More log output (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status, storage location and index size.
    Status,
    /// Show where SmartBuddy stores its config, index and sources.
    DataDir,
    /// Write config.toml with the current settings if it does not exist yet.
    InitConfig,
    /// Add plain text to the knowledge base as a new source.
    Add {
        /// Text file to ingest.
        #[arg(long, value_name = "PATH", conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Text to ingest directly.
        #[arg(long)]
        text: Option<String>,
        /// Display name for the source (default: file name or "Raw Text Input").
        #[arg(long)]
        name: Option<String>,
    },
    /// List sources and whether they are used for answers.
    Sources,
    /// Use a source when answering.
    Enable {
        /// Source id (a unique prefix is enough).
        id: String,
    },
    /// Stop using a source when answering. Its chunks stay in the index.
    Disable {
        /// Source id (a unique prefix is enough).
        id: String,
    },
    /// Show the chunks nearest to a question, from enabled sources.
    Query {
        question: String,
        /// Chunks to fetch from the index before filtering (default: fetch_k from config).
        #[arg(short)]
        k: Option<usize>,
        /// Ignore the enabled flags and search every source.
        #[arg(long)]
        all: bool,
    },
    /// Print the context block that would be handed to the answering model.
    Context { question: String },
    /// Print every stored chunk, in ingestion order.
    Dump {
        /// Include disabled sources.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult {
    let mut config = load_config();
    if cli.offline {
        config.embedder = EmbedderKind::Hashing;
    }
    let data_dir = config
        .resolve_data_dir()
        .ok_or("could not determine app data directory")?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            let service = open_service(&config, &data_dir)?;
            let session = Session::load(&data_dir)?;
            println!("SmartBuddy backend");
            println!("  core:     {}", status());
            println!("  data:     {}", data_dir.display());
            println!(
                "  embedder: {} ({} dims)",
                service.embedder().name(),
                service.embedder().dimension()
            );
            println!("  index:    {}", service.index_path().display());
            if let Some(path) = config_path() {
                println!("  config:   {}", path.display());
            }
            let policy = service.options().policy;
            println!(
                "  chunking: {} chars, stride {}",
                policy.window_size(),
                policy.stride()
            );
            println!("  chunks:   {}", service.len()?);
            println!(
                "  sources:  {} ({} enabled)",
                session.sources().len(),
                session.sources().iter().filter(|s| s.enabled).count()
            );
        }
        Commands::DataDir => println!("{}", data_dir.display()),
        Commands::InitConfig => {
            let path = config_path().ok_or("could not determine app data directory")?;
            if path.exists() {
                println!("{} already exists", path.display());
            } else {
                save_config(&load_config())?;
                println!("Wrote {}", path.display());
            }
        }
        Commands::Add { file, text, name } => {
            let (text, default_name) = match (file, text) {
                (Some(path), _) => {
                    let text = std::fs::read_to_string(&path)?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    (text, name)
                }
                (None, Some(text)) => (text, "Raw Text Input".to_string()),
                (None, None) => return Err("pass --file or --text".into()),
            };
            if text.is_empty() {
                eprintln!("Could not load any content.");
                return Ok(());
            }

            let service = open_service(&config, &data_dir)?;
            let name = name.unwrap_or(default_name);
            let (source, added) = ingest(&service, &data_dir, &text, name).await?;
            println!(
                "Added {} ({} chunk(s)) as {}",
                source.display_name, added, source.id
            );
        }
        Commands::Sources => {
            let session = Session::load(&data_dir)?;
            if session.sources().is_empty() {
                println!("No sources yet. Add one with `smartbuddy add`.");
            }
            for s in session.sources() {
                let mark = if s.enabled { "x" } else { " " };
                println!("[{}] {}  {}", mark, s.id, s.display_name);
            }
        }
        Commands::Enable { id } => set_enabled(&data_dir, &id, true)?,
        Commands::Disable { id } => set_enabled(&data_dir, &id, false)?,
        Commands::Query { question, k, all } => {
            let Some(filter) = source_filter(&data_dir, all)? else {
                return Ok(());
            };
            let service = open_service(&config, &data_dir)?;
            let k = k.unwrap_or(config.fetch_k);
            let hits = service.search(&question, k, &filter).await?;
            if hits.is_empty() {
                println!("No matching chunks.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!("#{} distance {:.4} source {}", rank + 1, hit.distance, hit.source_id);
                println!("{}", hit.text);
                println!();
            }
        }
        Commands::Context { question } => {
            let Some(filter) = source_filter(&data_dir, false)? else {
                return Ok(());
            };
            let service = open_service(&config, &data_dir)?;
            println!("{}", service.context(&question, &filter).await?);
        }
        Commands::Dump { all } => {
            let filter = if all {
                SourceFilter::All
            } else {
                Session::load(&data_dir)?.allowed()
            };
            let service = open_service(&config, &data_dir)?;
            for text in service.get_all_texts(&filter)? {
                println!("{}", text);
                println!("---");
            }
        }
    }
    Ok(())
}

fn open_service(
    config: &Config,
    data_dir: &Path,
) -> Result<RetrievalService<Box<dyn Embedder>>, Box<dyn Error>> {
    let embedder = embedder_from_config(config)?;
    let service = RetrievalService::open(data_dir, config.retrieval_options()?, embedder)?;
    if let LoadStatus::Recovered { reason, moved_to } = service.load_status() {
        eprintln!("Warning: {}", reason);
        if let Some(p) = moved_to {
            eprintln!("  the unreadable index was moved to {}", p.display());
        }
        eprintln!("  starting with an empty knowledge base.");
    }
    Ok(service)
}

/// Register a new source, then store `text` under it. The registration is saved
/// first so stored chunks always belong to a known source; it is taken back if
/// the text cannot be stored.
async fn ingest<E: Embedder>(
    service: &RetrievalService<E>,
    data_dir: &Path,
    text: &str,
    name: String,
) -> Result<(Source, usize), Box<dyn Error>> {
    let source = Session::update(data_dir, |session| {
        Ok(session.add_source(SourceId::generate(), name).clone())
    })?;
    match service.add_texts(text, &source.id).await {
        Ok(added) => Ok((source, added)),
        Err(e) => {
            let undo = Session::update(data_dir, |session| Ok(session.forget(&source.id)));
            if let Err(undo) = undo {
                tracing::warn!(source = %source.id, error = %undo, "could not unregister source");
            }
            Err(e.into())
        }
    }
}

/// Allow-list from the enabled sources, or everything with `all`. `None` (after a
/// warning) when no source is enabled.
fn source_filter(data_dir: &Path, all: bool) -> Result<Option<SourceFilter>, Box<dyn Error>> {
    if all {
        return Ok(Some(SourceFilter::All));
    }
    let filter = Session::load(data_dir)?.allowed();
    if filter.is_empty() {
        eprintln!("Please enable at least one knowledge source (see `smartbuddy sources`).");
        return Ok(None);
    }
    Ok(Some(filter))
}

fn set_enabled(data_dir: &Path, prefix: &str, enabled: bool) -> CliResult {
    let name = Session::update(data_dir, |session| {
        let source = session.resolve(prefix)?;
        let (id, name) = (source.id.clone(), source.display_name.clone());
        session.set_enabled(&id, enabled)?;
        Ok(name)
    })?;
    println!("{} {}", if enabled { "Enabled" } else { "Disabled" }, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use smartbuddy_core::{HashingEmbedder, RetrievalOptions};

    use super::*;

    fn open(dir: &Path) -> RetrievalService<HashingEmbedder> {
        RetrievalService::open(dir, RetrievalOptions::default(), HashingEmbedder::new(64)).unwrap()
    }

    #[tokio::test]
    async fn ingest_registers_the_source_with_its_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let service = open(dir.path());

        let (source, added) = ingest(&service, dir.path(), "some notes", "notes.txt".into())
            .await
            .unwrap();
        assert_eq!(added, 1);

        let session = Session::load(dir.path()).unwrap();
        assert_eq!(session.sources(), &[source.clone()]);
        let texts = service.get_all_texts(&SourceFilter::only([source.id])).unwrap();
        assert_eq!(texts, vec!["some notes"]);
    }

    #[tokio::test]
    async fn failed_ingest_leaves_no_source_behind() {
        let dir = tempfile::tempdir().unwrap();
        let service = open(dir.path());
        ingest(&service, dir.path(), "first", "a".into()).await.unwrap();

        // An unreadable index makes the next commit fail.
        std::fs::remove_file(dir.path().join("index.json")).unwrap();
        std::fs::create_dir(dir.path().join("index.json")).unwrap();

        assert!(ingest(&service, dir.path(), "second", "b".into()).await.is_err());
        let session = Session::load(dir.path()).unwrap();
        let names: Vec<&str> = session
            .sources()
            .iter()
            .map(|s| s.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(service.len().unwrap(), 1);
    }
}
