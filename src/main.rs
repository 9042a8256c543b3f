use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use stickerdeck_client_core::backend::client::{HttpRemoteJobClient, IconDecision};
use stickerdeck_client_core::backend::request::PackCreationRequest;
use stickerdeck_client_core::backend::status::JobId;
use stickerdeck_client_core::default_app_root;
use stickerdeck_client_core::icon::validate_icon_file;
use stickerdeck_client_core::settings::{
    load_app_client_settings, merge_client_settings_overlays, overlay_from_env, ClientSettings,
    ClientSettingsOverlay,
};
use stickerdeck_client_core::workflow::driver::{spawn_workflow, WorkflowHandle};
use stickerdeck_client_core::workflow::events::WorkflowObserver;
use stickerdeck_client_core::workflow::machine::{
    IconDecisionOutcome, UrlNameDecisionOutcome, WorkflowError,
};
use stickerdeck_client_core::workflow::phase::WorkflowPhase;
use stickerdeck_client_core::workflow::retry::suggest_url_names;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("create-pack")) {
        run_create_pack_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>()).await?;
        return Ok(());
    }
    if matches!(cli_args.first().map(String::as_str), Some("check-icon")) {
        run_check_icon_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }

    if let Some(first) = cli_args.first() {
        if !matches!(first.as_str(), "-h" | "--help") {
            return Err(std::io::Error::other(format!(
                "Unknown command: {first}\n\nUse --help for usage."
            ))
            .into());
        }
    }
    print_general_usage();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CreatePackCliArgs {
    title: String,
    url_name: String,
    stickers: Vec<PathBuf>,
    emoji: Option<String>,
    icon: Option<PathBuf>,
    auto_skip_icon: bool,
    backend_url: Option<String>,
    settings_path: Option<String>,
    poll_interval_ms: Option<u64>,
}

fn parse_create_pack_cli_args(
    args: &[String],
) -> Result<CreatePackCliArgs, Box<dyn std::error::Error>> {
    let mut title = None::<String>;
    let mut url_name = None::<String>;
    let mut stickers = Vec::<PathBuf>::new();
    let mut emoji = None::<String>;
    let mut icon = None::<PathBuf>;
    let mut auto_skip_icon = false;
    let mut backend_url = None::<String>;
    let mut settings_path = None::<String>;
    let mut poll_interval_ms = None::<u64>;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--title" => {
                title = Some(needs_value(i)?);
                i += 2;
            }
            "--url-name" => {
                url_name = Some(needs_value(i)?);
                i += 2;
            }
            "--sticker" => {
                stickers.push(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--emoji" => {
                emoji = Some(needs_value(i)?);
                i += 2;
            }
            "--icon" => {
                icon = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--auto-skip-icon" => {
                auto_skip_icon = true;
                i += 1;
            }
            "--backend-url" => {
                backend_url = Some(needs_value(i)?);
                i += 2;
            }
            "--settings" => {
                settings_path = Some(needs_value(i)?);
                i += 2;
            }
            "--poll-interval-ms" => {
                let raw = needs_value(i)?;
                let parsed = raw.trim().parse::<u64>().map_err(|error| {
                    std::io::Error::other(format!("Invalid --poll-interval-ms '{raw}': {error}"))
                })?;
                poll_interval_ms = Some(parsed);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let title = title
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --title"))?;
    let url_name = url_name
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --url-name"))?;
    if stickers.is_empty() {
        return Err(std::io::Error::other("At least one --sticker is required").into());
    }

    Ok(CreatePackCliArgs {
        title,
        url_name,
        stickers,
        emoji,
        icon,
        auto_skip_icon,
        backend_url,
        settings_path,
        poll_interval_ms,
    })
}

async fn run_create_pack_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_create_pack_usage();
        return Ok(());
    }

    let parsed = parse_create_pack_cli_args(args.as_slice())?;

    let app_overlay =
        load_app_client_settings(default_app_root().as_path(), parsed.settings_path.as_deref())?;
    let env_overlay = overlay_from_env();
    let overrides = ClientSettingsOverlay {
        backend_base_url: parsed.backend_url.clone(),
        poll_interval_ms: parsed.poll_interval_ms,
        ..ClientSettingsOverlay::default()
    };
    let merged = merge_client_settings_overlays(&app_overlay, &env_overlay, &overrides);
    let settings = ClientSettings::resolve(&merged);

    let client = HttpRemoteJobClient::new(settings.backend_base_url.as_str())?
        .with_timeout(settings.request_timeout);
    let request = PackCreationRequest {
        title: parsed.title,
        url_name: parsed.url_name,
        sticker_files: parsed.stickers,
        default_emoji: parsed
            .emoji
            .unwrap_or_else(|| String::from("\u{1F600}")),
        icon_path: parsed.icon,
        auto_skip_icon: parsed.auto_skip_icon || settings.auto_skip_icon,
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let handle = spawn_workflow(
        Arc::new(client),
        Arc::new(ChannelObserver { events: events_tx }),
        request,
        settings.workflow_settings(),
    );
    drive_prompts(handle, events_rx).await
}

async fn drive_prompts(
    handle: WorkflowHandle,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut failure = None::<String>;

    while let Some(event) = events.recv().await {
        match event {
            UiEvent::PendingIcon { message } => {
                if let Err(error) = answer_icon_prompt(&handle, &mut input, message.as_str()).await
                {
                    eprintln!("Input stream closed ({error}); cancelling the job.");
                    handle.cancel();
                    break;
                }
            }
            UiEvent::PendingUrlName {
                taken_name,
                attempt,
                max_attempts,
            } => {
                let answered = answer_url_name_prompt(
                    &handle,
                    &mut input,
                    taken_name.as_str(),
                    attempt,
                    max_attempts,
                )
                .await;
                if let Err(error) = answered {
                    eprintln!("Input stream closed ({error}); cancelling the job.");
                    handle.cancel();
                    break;
                }
            }
            UiEvent::Completed { shareable_link } => {
                match shareable_link {
                    Some(link) => println!("Pack created: {link}"),
                    None => println!("Pack created."),
                }
                break;
            }
            UiEvent::ManualCompletionRequired => {
                println!(
                    "Automation stopped; finish the pack manually in the Telegram bot chat."
                );
                break;
            }
            UiEvent::Failed { reason } => {
                failure = Some(reason);
                break;
            }
        }
    }

    let final_phase = handle.join().await;
    info!(phase = final_phase.as_str(), "workflow finished");

    if let Some(reason) = failure {
        return Err(std::io::Error::other(reason).into());
    }
    match final_phase {
        WorkflowPhase::Completed | WorkflowPhase::ManualCompletionRequired => Ok(()),
        other => Err(std::io::Error::other(format!("workflow stopped in phase '{other}'")).into()),
    }
}

async fn answer_icon_prompt(
    handle: &WorkflowHandle,
    input: &mut BufReader<Stdin>,
    message: &str,
) -> std::io::Result<()> {
    println!("Icon requested: {message}");
    loop {
        let line = read_trimmed_line(input, "Icon file path (empty to skip): ").await?;
        let decision = if line.is_empty() {
            IconDecision::Skip
        } else {
            IconDecision::Use(PathBuf::from(line))
        };
        match handle.resolve_icon(decision).await {
            Ok(IconDecisionOutcome::Resumed) => return Ok(()),
            Ok(IconDecisionOutcome::RejectedManualCompletion { reason }) => {
                eprintln!("Icon rejected: {reason}");
                return Ok(());
            }
            Err(WorkflowError::Backend(error)) if error.is_transport() => {
                eprintln!("Backend unreachable ({error}); try again.");
            }
            Err(error) => {
                eprintln!("Could not submit the icon decision: {error}");
                return Ok(());
            }
        }
    }
}

async fn answer_url_name_prompt(
    handle: &WorkflowHandle,
    input: &mut BufReader<Stdin>,
    taken_name: &str,
    attempt: u32,
    max_attempts: u32,
) -> std::io::Result<()> {
    println!("Url name '{taken_name}' is taken (attempt {attempt} of {max_attempts}).");
    let suggestions = suggest_url_names(taken_name, Utc::now());
    if !suggestions.is_empty() {
        println!("Suggestions: {}", suggestions.join(", "));
    }
    loop {
        let line = read_trimmed_line(input, "Replacement url name: ").await?;
        if line.is_empty() {
            eprintln!("A replacement name is required.");
            continue;
        }
        match handle.resolve_url_name(line).await {
            // Still-taken, completed, and exhausted replies each arrive as
            // their own observer event; nothing more to do here.
            Ok(UrlNameDecisionOutcome::Resumed)
            | Ok(UrlNameDecisionOutcome::StillTaken { .. })
            | Ok(UrlNameDecisionOutcome::Completed { .. })
            | Ok(UrlNameDecisionOutcome::AttemptsExhausted) => return Ok(()),
            Err(WorkflowError::InvalidUrlName { message }) => {
                eprintln!("Invalid name: {message}");
            }
            Err(WorkflowError::Backend(error)) if error.is_transport() => {
                eprintln!("Backend unreachable ({error}); try again.");
            }
            Err(error) => {
                eprintln!("Could not submit the name: {error}");
                return Ok(());
            }
        }
    }
}

async fn read_trimmed_line(
    input: &mut BufReader<Stdin>,
    prompt: &str,
) -> std::io::Result<String> {
    use std::io::Write as _;
    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut line = String::new();
    let read = input.read_line(&mut line).await?;
    if read == 0 {
        return Err(std::io::Error::other("end of input"));
    }
    Ok(line.trim().to_string())
}

#[derive(Debug)]
enum UiEvent {
    PendingIcon {
        message: String,
    },
    PendingUrlName {
        taken_name: String,
        attempt: u32,
        max_attempts: u32,
    },
    Completed {
        shareable_link: Option<String>,
    },
    ManualCompletionRequired,
    Failed {
        reason: String,
    },
}

struct ChannelObserver {
    events: mpsc::UnboundedSender<UiEvent>,
}

impl WorkflowObserver for ChannelObserver {
    fn on_pending_icon(&self, _job_id: &JobId, message: &str) {
        let _ = self.events.send(UiEvent::PendingIcon {
            message: message.to_string(),
        });
    }

    fn on_pending_url_name(
        &self,
        _job_id: &JobId,
        taken_name: &str,
        attempt: u32,
        max_attempts: u32,
    ) {
        let _ = self.events.send(UiEvent::PendingUrlName {
            taken_name: taken_name.to_string(),
            attempt,
            max_attempts,
        });
    }

    fn on_completed(&self, _job_id: &JobId, shareable_link: Option<&str>) {
        let _ = self.events.send(UiEvent::Completed {
            shareable_link: shareable_link.map(str::to_string),
        });
    }

    fn on_failed(&self, _job_id: &JobId, reason: &str) {
        let _ = self.events.send(UiEvent::Failed {
            reason: reason.to_string(),
        });
    }

    fn on_manual_completion_required(&self, _job_id: &JobId) {
        let _ = self.events.send(UiEvent::ManualCompletionRequired);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CheckIconCliArgs {
    file: PathBuf,
}

fn parse_check_icon_cli_args(
    args: &[String],
) -> Result<CheckIconCliArgs, Box<dyn std::error::Error>> {
    let mut file = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--file" => {
                file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let file = file.ok_or_else(|| std::io::Error::other("Missing required --file"))?;
    Ok(CheckIconCliArgs { file })
}

fn run_check_icon_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_check_icon_usage();
        return Ok(());
    }
    let parsed = parse_check_icon_cli_args(args.as_slice())?;
    validate_icon_file(parsed.file.as_path())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "file": parsed.file.display().to_string()
        }))?
    );
    Ok(())
}

fn print_general_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- create-pack --title <text> --url-name <name> --sticker <path> [...]\n",
        "  cargo run -- check-icon --file <path>\n"
    ));
}

fn print_create_pack_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- create-pack --title <text> --url-name <name> --sticker <path> ",
        "[--sticker <path> ...] [--emoji <emoji>] [--icon <path>] [--auto-skip-icon] ",
        "[--backend-url <url>] [--settings <path>] [--poll-interval-ms <ms>]\n\n",
        "Defaults:\n",
        "  backend url: http://127.0.0.1:8789 (override with STICKERDECK_BACKEND_URL)\n",
        "  app settings: config/client.settings.toml (fallback: config/client.settings.json)\n"
    ));
}

fn print_check_icon_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- check-icon --file <path>\n"
    ));
}
