use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inbox_digest::{
    config::{Config, DEFAULT_MAX_ATTACHMENT_BYTES},
    digest::{DigestHeader, render_digest},
    extraction::{Dispatcher, ExtractionStatus, SourceInput},
    mailbox::DirectoryMailbox,
    processing::{SummaryRequest, SummaryScope, SummaryService, SummaryType},
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "digest-cli",
    about = "Summarize attachments and mail folders from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a single document.
    File {
        path: PathBuf,
        #[command(flatten)]
        options: SummaryArgs,
    },
    /// Summarize a mail folder (`body.txt`, optional `metadata.json`, attachments).
    Dir {
        path: PathBuf,
        #[arg(long, default_value = "all")]
        scope: SummaryScope,
        #[command(flatten)]
        options: SummaryArgs,
    },
    /// Print the normalized text and extraction status of a document.
    Extract {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct SummaryArgs {
    #[arg(long, default_value = "detailed")]
    summary_type: SummaryType,
    /// Defaults to `SUMMARY_MODEL`.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Also write a JSON report to this file.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Serialize)]
struct Report<'a, T: Serialize> {
    generated_at: String,
    source: String,
    model: &'a str,
    summary_type: SummaryType,
    result: &'a T,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_stderr_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    match cli.command {
        Command::File { path, options } => runtime.block_on(summarize_file(&path, options)),
        Command::Dir {
            path,
            scope,
            options,
        } => runtime.block_on(summarize_dir(&path, scope, options)),
        Command::Extract { path, format } => extract(&path, format),
    }
}

fn init_stderr_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn load_config() -> Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_env().context("failed to load configuration from environment")
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))
}

async fn summarize_file(path: &Path, options: SummaryArgs) -> Result<()> {
    let config = load_config()?;
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let source = SourceInput::attachment(0, file_name(path)?, None, bytes);
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.summary_model.clone());

    let service = SummaryService::from_config(&config);
    let report = service
        .summarize_attachment(source, options.summary_type, model.clone())
        .await
        .with_context(|| format!("failed to summarize {}", path.display()))?;

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{}\n", report.summary.trim());
            println!(
                "{}: {} -> {} tokens ({:.2}% reduction)",
                report.filename,
                report.original_tokens,
                report.summary_tokens,
                report.compression_ratio
            );
        }
    }
    write_report(&options, path, &model, &report)
}

async fn summarize_dir(path: &Path, scope: SummaryScope, options: SummaryArgs) -> Result<()> {
    let config = load_config()?;
    let email_id = file_name(path)?;
    let root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let message = DirectoryMailbox::new(root)
        .load(&email_id)
        .with_context(|| format!("failed to load mail folder {}", path.display()))?;
    let header = DigestHeader::from(&message);
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.summary_model.clone());

    let service = SummaryService::from_config(&config);
    let request = SummaryRequest::new(scope, options.summary_type, model.clone());
    let result = service
        .summarize_message(message, request)
        .await
        .with_context(|| format!("failed to summarize {}", path.display()))?;

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => println!("{}", render_digest(&header, &result)),
    }
    write_report(&options, path, &model, &result)
}

fn extract(path: &Path, format: OutputFormat) -> Result<()> {
    dotenvy::dotenv().ok();
    let max_bytes = Config::from_env()
        .map(|config| config.max_attachment_bytes)
        .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES);
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let source = SourceInput::attachment(0, file_name(path)?, None, bytes);
    let document = Dispatcher::new(max_bytes).dispatch(&source);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
        OutputFormat::Text => {
            eprintln!(
                "status: {:?}, format: {:?}, units: {:?}",
                document.extraction_status(),
                document.format(),
                document.page_or_sheet_count()
            );
            if let Some(detail) = document.detail() {
                eprintln!("detail: {detail}");
            }
            println!("{}", document.normalized_text());
        }
    }

    if document.extraction_status() != ExtractionStatus::Ok {
        bail!(
            "extraction of {} failed: {:?}",
            path.display(),
            document.extraction_status()
        );
    }
    Ok(())
}

fn write_report<T: Serialize>(
    options: &SummaryArgs,
    source: &Path,
    model: &str,
    result: &T,
) -> Result<()> {
    let Some(output) = &options.output else {
        return Ok(());
    };
    let report = Report {
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("failed to format timestamp")?,
        source: source.display().to_string(),
        model,
        summary_type: options.summary_type,
        result,
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    eprintln!("report written to {}", output.display());
    Ok(())
}
