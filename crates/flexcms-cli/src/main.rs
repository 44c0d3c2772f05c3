//! flexcms-assist - generate CMS form fields with an AI agent

mod config;
mod form;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use flexcms_assist::controller::{describe_metadata, form_value};
use flexcms_assist::{AcceptMode, AssistEvent, FieldAssist, FieldBinding};
use flexcms_stream::{FieldType, GenerationRequest, StreamClient, TaskContext};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::form::FormData;

/// flexcms-assist - stream AI-generated content into a form field
#[derive(Parser, Debug)]
#[command(name = "flexcms-assist")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Content instance ID to generate for
    #[arg(short, long, conflicts_with = "task")]
    instance: Option<String>,

    /// Field to generate
    #[arg(short, long)]
    field: Option<String>,

    /// Free-form task description (no stored instance needed)
    #[arg(short, long)]
    task: Option<String>,

    /// Content type name, sent as context with --task
    #[arg(long)]
    content_type: Option<String>,

    /// Content type ID, sent as context with --task
    #[arg(long)]
    content_type_id: Option<String>,

    /// Human-readable field label (default: the field name)
    #[arg(long)]
    label: Option<String>,

    /// Agent type or agent config ID
    #[arg(short, long)]
    agent: Option<String>,

    /// Field type (text, textarea, rich_text, json, other)
    #[arg(long, default_value = "textarea", value_parser = parse_field_type)]
    field_type: FieldType,

    /// Example output or schema for JSON fields
    #[arg(long)]
    schema: Option<String>,

    /// JSON file holding the form's current values; the accepted value is written back
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// What to do with the generated text
    #[arg(short, long, value_enum, default_value_t = Mode::Replace)]
    mode: Mode,

    /// Cancel when no data arrives for this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// API base URL (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Replace,
    Append,
    Discard,
}

/// Accept the schema names `FieldType` understands, but refuse anything that
/// would only fall through to `other`.
fn parse_field_type(s: &str) -> std::result::Result<FieldType, String> {
    let field_type = s.parse().unwrap_or(FieldType::Other);
    if field_type == FieldType::Other && !s.trim().eq_ignore_ascii_case("other") {
        return Err(format!(
            "unknown field type '{}' (expected text, textarea, rich_text, json or other)",
            s
        ));
    }
    Ok(field_type)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("flexcms=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    let base_url = args
        .base_url
        .clone()
        .or_else(|| cfg.base_url.clone())
        .context("No API base URL. Pass --base-url or run --init-config")?;
    let field = args.field.clone().context("--field is required")?;

    let mut form = args.data.as_deref().map(FormData::load).transpose()?;
    let current = form
        .as_ref()
        .map(|f| f.text_value(&field))
        .unwrap_or_default();

    let request = build_request(&args, &cfg, &field, form.as_ref())?;
    let client = StreamClient::new(base_url, cfg.credentials()).with_endpoints(cfg.endpoints());
    let assist = FieldAssist::new(
        Arc::new(client),
        FieldBinding::new(&field, args.field_type, current),
    );

    // First Ctrl-C cancels the generation, a second one exits
    let handle = assist.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !handle.cancel() {
                std::process::exit(130);
            }
        }
    });

    let idle = args
        .timeout
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .or_else(|| cfg.idle_timeout());

    let outcome = run_generation(&assist, request, idle).await?;
    eprintln!();

    match &outcome {
        AssistEvent::Completed {
            metadata: Some(metadata),
        } => eprintln!("Done: {}", describe_metadata(metadata)),
        AssistEvent::Completed { metadata: None } => eprintln!("Done"),
        AssistEvent::Failed { message } => eprintln!("Error: {}", message),
        AssistEvent::Cancelled => eprintln!("Cancelled"),
        _ => {}
    }

    if args.mode == Mode::Discard {
        assist.discard();
        eprintln!("Discarded generated text");
        return Ok(());
    }

    if assist.accumulated_text().is_empty() {
        match &outcome {
            AssistEvent::Failed { message } => bail!("Generation failed: {}", message),
            AssistEvent::Cancelled => bail!("Generation cancelled before any text arrived"),
            _ => {}
        }
    }

    let mode = match args.mode {
        Mode::Append => AcceptMode::Append,
        _ => AcceptMode::Replace,
    };
    let accepted = assist.accept(mode)?;
    if let Some(warning) = &accepted.warning {
        eprintln!("Warning: {}", warning);
    }

    match form.as_mut() {
        Some(form) => {
            form.set(&field, form_value(args.field_type, &accepted.value));
            form.save()?;
            eprintln!("Updated '{}' in {}", field, form.path().display());
        }
        None => println!("{}", accepted.value),
    }

    Ok(())
}

fn build_request(
    args: &Args,
    cfg: &config::Config,
    field: &str,
    form: Option<&FormData>,
) -> Result<GenerationRequest> {
    let agent = args
        .agent
        .clone()
        .or_else(|| cfg.default_agent.clone())
        .unwrap_or_default();

    let request = if let Some(task) = &args.task {
        if agent.is_empty() {
            bail!("--agent (or default_agent in the config) is required with --task");
        }
        let context = TaskContext {
            content_type: args.content_type.clone().unwrap_or_default(),
            content_type_id: args.content_type_id.clone().unwrap_or_default(),
            target_field: field.to_string(),
            field_label: args.label.clone().unwrap_or_else(|| field.to_string()),
            current_data: form
                .map(FormData::as_value)
                .unwrap_or_else(|| serde_json::json!({})),
        };
        GenerationRequest::for_task(task.as_str(), context, agent, args.field_type)
    } else if let Some(instance) = &args.instance {
        GenerationRequest::for_instance(instance.as_str(), field, agent, args.field_type)
    } else {
        bail!("Pass --instance to generate for a stored instance, or --task for a free-form request");
    };

    Ok(match &args.schema {
        Some(schema) => request.with_output_schema(schema.as_str()),
        None => request,
    })
}

/// Stream a generation to the terminal and return the event that ended it.
///
/// Content goes to stderr so stdout only carries the accepted value. The idle
/// timer also runs while connecting.
async fn run_generation(
    assist: &FieldAssist,
    request: GenerationRequest,
    idle: Option<Duration>,
) -> Result<AssistEvent> {
    let mut events = assist.subscribe();
    let start = assist.start(request);
    tokio::pin!(start);
    let mut connected = false;
    let mut deadline = idle.map(|limit| Instant::now() + limit);

    let mut stderr = std::io::stderr();
    loop {
        let received = tokio::select! {
            _ = &mut start, if !connected => {
                connected = true;
                continue;
            }
            _ = idle_expired(deadline) => {
                tracing::warn!(
                    "No data for {:?}, cancelling generation",
                    idle.unwrap_or_default()
                );
                if assist.cancel() {
                    return Ok(AssistEvent::Cancelled);
                }
                deadline = None;
                continue;
            }
            received = events.recv() => received,
        };
        deadline = idle.map(|limit| Instant::now() + limit);

        match received {
            Ok(AssistEvent::Content { text }) => {
                write!(stderr, "{}", text)?;
                stderr.flush()?;
            }
            Ok(AssistEvent::Info { message }) => {
                tracing::debug!("Agent info: {}", message);
                write!(stderr, "\n[{}]\n", message)?;
            }
            Ok(event) if event.is_terminal() => return Ok(event),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Terminal output lagged, skipped {} events", n);
            }
            Err(RecvError::Closed) => bail!("Generation ended without a result"),
        }
    }
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
