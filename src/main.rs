use std::env;
use std::process::ExitCode;

use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

mod config;
mod handlers;
mod llm;
mod media;
mod prompt;
mod state;
mod utils;

use handlers::commands::{
    handle_enhance, handle_generate, handle_save, handle_save_all, handle_set, handle_zip,
    render_diagnostics, render_gallery, render_help, render_history, render_show,
};
use handlers::{ComposerForm, GenerationSettings};
use llm::{max_images_for_model, PersonGeneration};
use media::OutputFormat;
use prompt::AspectRatio;
use state::SessionState;
use utils::logging::init_logging;

fn one_shot_usage() -> &'static str {
    "Usage: imagen-studio generate --prompt <text> [--count <n>] [--aspect <code>] [--people <policy>] [--format png|jpeg] [--model <id>] [--enhance] [--out <dir>]"
}

#[derive(Debug)]
struct OneShotArgs {
    prompt: String,
    count: Option<usize>,
    aspect: Option<AspectRatio>,
    people: Option<PersonGeneration>,
    format: Option<OutputFormat>,
    model: Option<String>,
    enhance: bool,
    out_dir: Option<String>,
}

fn parse_one_shot_args(args: &[String]) -> anyhow::Result<Option<OneShotArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("generate") {
        return Ok(None);
    }

    let mut prompt: Option<String> = None;
    let mut count = None;
    let mut aspect = None;
    let mut people = None;
    let mut format = None;
    let mut model = None;
    let mut enhance = false;
    let mut out_dir = None;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--prompt" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --prompt"))?;
                prompt = Some(value.clone());
            }
            "--count" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --count"))?;
                count = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| anyhow::anyhow!("Invalid --count value '{value}'"))?,
                );
            }
            "--aspect" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --aspect"))?;
                aspect = Some(
                    AspectRatio::parse(value)
                        .ok_or_else(|| anyhow::anyhow!("Invalid --aspect value '{value}'"))?,
                );
            }
            "--people" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --people"))?;
                people = Some(
                    PersonGeneration::parse(value)
                        .ok_or_else(|| anyhow::anyhow!("Invalid --people value '{value}'"))?,
                );
            }
            "--format" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --format"))?;
                format = Some(
                    OutputFormat::parse(value)
                        .ok_or_else(|| anyhow::anyhow!("Invalid --format value '{value}'"))?,
                );
            }
            "--model" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --model"))?;
                model = Some(value.clone());
            }
            "--enhance" => {
                enhance = true;
            }
            "--out" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --out"))?;
                out_dir = Some(value.clone());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument '{other}'"));
            }
        }
        index += 1;
    }

    let prompt = prompt.ok_or_else(|| anyhow::anyhow!("--prompt is required"))?;
    Ok(Some(OneShotArgs {
        prompt,
        count,
        aspect,
        people,
        format,
        model,
        enhance,
        out_dir,
    }))
}

async fn run_one_shot(args: OneShotArgs) -> anyhow::Result<()> {
    let state = SessionState::new();
    let mut form = ComposerForm::default();
    let mut settings = GenerationSettings::default();

    form.base = args.prompt;
    settings.use_enhanced = args.enhance;
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(aspect) = args.aspect {
        settings.aspect = aspect;
    }
    if let Some(people) = args.people {
        settings.person_generation = people;
    }
    if let Some(format) = args.format {
        settings.output_format = format;
    }
    if let Some(count) = args.count {
        settings.image_count = count.clamp(1, max_images_for_model(&settings.model));
    }

    if args.enhance {
        println!("{}", handle_enhance(&form, &settings, &state));
    }

    let message = handle_generate(&form, &settings, &state).await?;
    println!("{message}");

    if state.gallery_len() > 0 {
        let saved = handle_save_all(&state, args.out_dir.as_deref()).await?;
        println!("{saved}");
    }
    Ok(())
}

fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    }
}

async fn run_interactive() -> anyhow::Result<()> {
    let state = SessionState::new();
    let mut form = ComposerForm::default();
    let mut settings = GenerationSettings::default();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("imagen-studio — interactive Imagen 4 front-end. Type 'help' for commands.");
    if !config::CONFIG.has_api_key() {
        println!("Note: GEMINI_API_KEY is not set; 'generate' will be unavailable.");
    }

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let (command, rest) = split_command(&line);

        let output = match command {
            "" => continue,
            "prompt" => {
                form.base = rest.to_string();
                format!("prompt = {rest}")
            }
            "set" => {
                let (field, value) = split_command(rest);
                if field.is_empty() {
                    "Usage: set <field> <value>".to_string()
                } else {
                    match handle_set(&mut form, &mut settings, field, value) {
                        Ok(message) => message,
                        Err(err) => err.to_string(),
                    }
                }
            }
            "enhance" => handle_enhance(&form, &settings, &state),
            "show" => render_show(&form, &settings, &state),
            "generate" => match handle_generate(&form, &settings, &state).await {
                Ok(message) => message,
                Err(err) => err.to_string(),
            },
            "gallery" => render_gallery(&state),
            "save" => {
                let (index, path) = split_command(rest);
                match index.parse::<usize>() {
                    Ok(index) => {
                        let path = if path.is_empty() { None } else { Some(path) };
                        match handle_save(&state, index, path).await {
                            Ok(message) => message,
                            Err(err) => err.to_string(),
                        }
                    }
                    Err(_) => "Usage: save <n> [path]".to_string(),
                }
            }
            "saveall" => {
                let dir = if rest.is_empty() { None } else { Some(rest) };
                match handle_save_all(&state, dir).await {
                    Ok(message) => message,
                    Err(err) => err.to_string(),
                }
            }
            "zip" => {
                let path = if rest.is_empty() { None } else { Some(rest) };
                match handle_zip(&state, path).await {
                    Ok(message) => message,
                    Err(err) => err.to_string(),
                }
            }
            "history" => {
                let limit = rest.parse::<usize>().ok();
                render_history(&state, limit)
            }
            "clear" => {
                state.clear_gallery();
                "Gallery cleared.".to_string()
            }
            "diagnose" => render_diagnostics(&settings, &state),
            "help" => render_help().to_string(),
            "quit" | "exit" => break,
            other => format!("Unknown command '{other}'. Type 'help' for the list."),
        };

        println!("{output}");
    }

    info!("Session ended.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let _logging_guards = init_logging();

    let args: Vec<String> = env::args().collect();
    match parse_one_shot_args(&args) {
        Ok(Some(one_shot)) => match run_one_shot(one_shot).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("One-shot generation failed: {err:#}");
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
        Ok(None) => match run_interactive().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("Session failed: {err:#}");
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", one_shot_usage());
            ExitCode::FAILURE
        }
    }
}
