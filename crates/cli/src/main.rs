use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use i2v_client::{ClientConfig, Generator, SubmissionState};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "i2v")]
#[command(about = "Turn reference images into a stitched walking video")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Load client configuration from a JSON file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Generation server base URL (overrides I2V_API_BASE)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload images and download the generated video
    Generate {
        /// Image files, in clip order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Prompt sent with the images (defaults to the walking-tour prompt)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Extra form field, e.g. --field model=I2V-01-Director
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Reject selections with more images than this
        #[arg(long)]
        max_files: Option<usize>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Output file or directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Check that the generation server is reachable
    Health,

    /// Print the effective configuration
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref(), cli.base_url.as_deref())?;

    match cli.command {
        Commands::Generate {
            files,
            prompt,
            fields,
            max_files,
            timeout,
            output,
        } => {
            let mut config = config;
            if let Some(max) = max_files {
                config = config.with_max_files(max);
            }
            if let Some(secs) = timeout {
                config = config.with_timeout(secs);
            }
            generate_command(config, files, prompt, fields, output).await
        }
        Commands::Health => health_command(config).await,
        Commands::Config { write } => config_command(config, write),
    }
}

/// File config (or defaults), then `I2V_API_BASE`, then `--base-url`
fn load_config(path: Option<&PathBuf>, base_url: Option<&str>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env();
    if let Some(url) = base_url {
        config = config.with_base_url(url);
    }
    Ok(config)
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.trim().is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }
    Ok((name.trim().to_string(), value.to_string()))
}

async fn generate_command(
    config: ClientConfig,
    files: Vec<PathBuf>,
    prompt: Option<String>,
    fields: Vec<(String, String)>,
    output: PathBuf,
) -> Result<()> {
    info!("Generating from {} images via {}", files.len(), config.generate_url());

    let mut generator = Generator::new(config)?;
    generator.add_paths(&files)?;
    if let Some(prompt) = prompt {
        generator.set_prompt(prompt);
    }
    for (name, value) in fields {
        generator.set_field(name, value);
    }

    let renderer = tokio::spawn(render_progress(
        generator.subscribe(),
        generator.session().len(),
    ));

    let outcome = tokio::select! {
        result = generator.submit() => result.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling request");
            generator.cancel();
            Err(i2v_client::SubmitError::Cancelled)
        }
    };
    let _ = renderer.await;

    match outcome {
        Ok(()) => {
            let written = generator.save_result(&output)?;
            println!("{}", written.display());
            Ok(())
        }
        Err(err) => anyhow::bail!("Generation failed: {}", err),
    }
}

/// Draw the (simulated) progress until the submission settles
async fn render_progress(mut updates: watch::Receiver<SubmissionState>, file_count: usize) {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }

    loop {
        let state = updates.borrow_and_update().clone();
        bar.set_position(state.progress() as u64);
        if let Some((clip, total)) = state.clip_step(file_count) {
            bar.set_message(format!("clip {} of {}", clip, total));
        }

        match state {
            SubmissionState::Succeeded { .. } => {
                bar.finish_with_message("done");
                return;
            }
            SubmissionState::Failed { message } => {
                bar.abandon_with_message(message);
                return;
            }
            _ => {}
        }

        if updates.changed().await.is_err() {
            bar.finish_and_clear();
            return;
        }
    }
}

async fn health_command(config: ClientConfig) -> Result<()> {
    let url = config.health_url();
    let generator = Generator::new(config)?;
    if generator.is_available().await {
        println!("ok: {}", url);
        Ok(())
    } else {
        anyhow::bail!("Server not reachable: {}", url)
    }
}

fn config_command(config: ClientConfig, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config.save(&path)?;
            info!("Configuration written to: {:?}", path);
        }
        None => {
            let json = serde_json::to_string_pretty(&config).context("serialize config")?;
            println!("{}", json);
        }
    }
    Ok(())
}
