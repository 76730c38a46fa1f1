//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use storyboard_core::credentials::{clear_api_key, load_api_key, mask_api_key, save_api_key};
use storyboard_core::export::DirectorySink;
use storyboard_core::generation::OpenAiGenerator;
use storyboard_core::pipeline::{
    Pipeline, PipelineEvent, PipelineObserver, PipelineState, validate_scenes,
};
use storyboard_core::scenes::SceneStore;
use storyboard_shared::{
    AppConfig, OpenAiModel, Scene, init_config, load_config, resolve_api_key,
};
use storyboard_storage::SqliteStore;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Storyboard: turn a list of scenes into a screenplay.
#[derive(Parser)]
#[command(
    name = "storyboard",
    version,
    about = "Outline scenes, generate a screenplay for each in order, export it as text.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Scene database path (overrides `[storage] path` in the config).
    #[arg(long, env = "STORYBOARD_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Inspect and edit the scene list.
    Scenes {
        #[command(subcommand)]
        action: ScenesAction,
    },

    /// Clear every scene and start over with one blank scene.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate every scene in order and export the screenplay.
    Generate {
        /// Model: gpt-3.5-turbo or gpt-4 (defaults to config).
        #[arg(short, long, value_parser = parse_model)]
        model: Option<OpenAiModel>,

        /// Directory to write the screenplay to (defaults to config).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Manage the stored OpenAI API key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Scene list subcommands. Positions are 1-based.
#[derive(Subcommand)]
pub(crate) enum ScenesAction {
    /// Show every scene.
    List,
    /// Insert a scene.
    Add {
        /// Position the new scene takes (defaults to the end).
        #[arg(long)]
        at: Option<usize>,
        /// Scene name (left blank when omitted).
        #[arg(short, long)]
        name: Option<String>,
        /// What happens in the scene (left blank when omitted).
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Change a scene's name or description.
    Edit {
        /// Scene position.
        position: usize,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a scene.
    Remove {
        /// Scene position.
        position: usize,
    },
}

/// API key subcommands.
#[derive(Subcommand)]
pub(crate) enum KeyAction {
    /// Store the key for later runs.
    Set { key: String },
    /// Forget the stored key.
    Clear,
    /// Show whether a key is stored.
    Show,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_model(s: &str) -> std::result::Result<OpenAiModel, String> {
    s.parse().map_err(|e: storyboard_shared::StoryboardError| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "storyboard=warn",
        1 => "storyboard=info",
        2 => "storyboard=debug",
        _ => "storyboard=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so they don't interleave with command output.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Scenes { action } => match action {
            ScenesAction::List => cmd_scenes_list(db).await,
            ScenesAction::Add {
                at,
                name,
                description,
            } => cmd_scenes_add(db, at, name, description).await,
            ScenesAction::Edit {
                position,
                name,
                description,
            } => cmd_scenes_edit(db, position, name, description).await,
            ScenesAction::Remove { position } => cmd_scenes_remove(db, position).await,
        },
        Command::Reset { yes } => cmd_reset(db, yes).await,
        Command::Generate { model, out } => cmd_generate(db, model, out).await,
        Command::Key { action } => match action {
            KeyAction::Set { key } => cmd_key_set(db, &key).await,
            KeyAction::Clear => cmd_key_clear(db).await,
            KeyAction::Show => cmd_key_show(db).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open the key-value database named by the flag, falling back to config.
async fn open_db(config: &AppConfig, db: Option<PathBuf>) -> Result<SqliteStore> {
    let path = match db {
        Some(path) => path,
        None => config.storage.resolve_path()?,
    };
    info!(path = %path.display(), "opening scene database");
    Ok(SqliteStore::open(&path).await?)
}

async fn open_scenes(db: Option<PathBuf>) -> Result<SceneStore<SqliteStore>> {
    let config = load_config()?;
    let kv = open_db(&config, db).await?;
    Ok(SceneStore::load(kv).await?)
}

/// Turn a 1-based position into an index below `limit`.
fn to_index(position: usize, limit: usize) -> Result<usize> {
    if position == 0 || position > limit {
        return Err(eyre!("position {position} is out of range (1..={limit})"));
    }
    Ok(position - 1)
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() { placeholder } else { value }
}

fn print_scene(position: usize, scene: &Scene) {
    println!("── Scene {position} ──");
    println!("Scene Name");
    println!("  {}", or_placeholder(&scene.name, "No name available."));
    println!("Scene Description");
    println!("  {}", or_placeholder(&scene.description, "No description available."));
    println!("Scene Summary");
    println!("  {}", or_placeholder(&scene.summary, "No summary available."));
    println!("Scene Screenplay");
    println!("  {}", or_placeholder(&scene.script, "No script available."));
    println!();
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

// ---------------------------------------------------------------------------
// Scene commands
// ---------------------------------------------------------------------------

async fn cmd_scenes_list(db: Option<PathBuf>) -> Result<()> {
    let store = open_scenes(db).await?;
    for (i, scene) in store.scenes().iter().enumerate() {
        print_scene(i + 1, scene);
    }
    Ok(())
}

async fn cmd_scenes_add(
    db: Option<PathBuf>,
    at: Option<usize>,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let mut store = open_scenes(db).await?;
    let index = match at {
        Some(position) => to_index(position, store.len() + 1)?,
        None => store.len(),
    };
    match (name, description) {
        (None, None) => store.insert_empty(index).await?,
        (name, description) => {
            let scene =
                Scene::authored(name.unwrap_or_default(), description.unwrap_or_default());
            store.insert(index, scene).await?;
        }
    }
    info!(index, "scene added");
    println!("Added scene {} of {}.", index + 1, store.len());
    Ok(())
}

async fn cmd_scenes_edit(
    db: Option<PathBuf>,
    position: usize,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let mut store = open_scenes(db).await?;
    let index = to_index(position, store.len())?;
    let mut scene = store.scenes()[index].clone();
    if let Some(name) = name {
        scene.name = name;
    }
    if let Some(description) = description {
        scene.description = description;
    }
    store.update(index, scene).await?;
    println!("Updated scene {position}.");
    Ok(())
}

async fn cmd_scenes_remove(db: Option<PathBuf>, position: usize) -> Result<()> {
    let mut store = open_scenes(db).await?;
    let index = to_index(position, store.len())?;
    let removed = store.remove(index).await?;
    println!(
        "Removed scene {position} ({}). {} scene(s) left.",
        or_placeholder(&removed.name, "unnamed"),
        store.len()
    );
    Ok(())
}

async fn cmd_reset(db: Option<PathBuf>, yes: bool) -> Result<()> {
    if !yes && !confirm("Are you sure you want to reset the story?")? {
        println!("Reset cancelled.");
        return Ok(());
    }
    let mut store = open_scenes(db).await?;
    store.reset().await?;
    println!("Story reset.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

async fn cmd_generate(
    db: Option<PathBuf>,
    model: Option<OpenAiModel>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let kv = open_db(&config, db).await?;

    // Incomplete scenes are reported before a missing key.
    let stored_key = load_api_key(&kv).await?;
    let mut store = SceneStore::load(kv).await?;
    validate_scenes(store.scenes())?;

    let api_key = resolve_api_key(&config, stored_key)?;
    let model = model.unwrap_or(config.openai.model);
    let generator = OpenAiGenerator::new(&config.openai, api_key, model)?;

    let out_dir = out.unwrap_or_else(|| config.export.output_dir.clone());
    let sink = DirectorySink::new(out_dir);

    info!(%model, scenes = store.len(), "generating screenplay");

    let reporter = CliProgress::new();
    let mut pipeline = Pipeline::new(generator, &sink);
    let report = pipeline.run(&mut store, &reporter).await?;

    println!();
    println!("  Screenplay generated!");
    println!("  Scenes: {}", report.scene_count);
    println!("  Model:  {model}");
    println!("  File:   {}", sink.path_for(&report.export_filename).display());
    println!("  Time:   {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}") {
            bar.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl PipelineObserver for CliProgress {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        self.bar.set_length(event.total as u64);
        match event.state {
            PipelineState::Validating => self.bar.set_message("Validating scenes"),
            PipelineState::Running { index } => {
                self.bar.set_position(index as u64);
                let last = event
                    .last_completed
                    .map(|s| format!(" (last completed: {})", s.name))
                    .unwrap_or_default();
                self.bar.set_message(format!(
                    "Generating scene {} of {}{last}",
                    index + 1,
                    event.total
                ));
            }
            PipelineState::Aborted { index } => {
                self.bar
                    .abandon_with_message(format!("Failed to generate block {}.", index + 1));
            }
            PipelineState::Completed => {
                self.bar.set_position(event.total as u64);
                self.bar.set_message("Exporting screenplay");
            }
            PipelineState::Idle => self.bar.finish_and_clear(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key and config commands
// ---------------------------------------------------------------------------

async fn cmd_key_set(db: Option<PathBuf>, key: &str) -> Result<()> {
    let config = load_config()?;
    let kv = open_db(&config, db).await?;
    save_api_key(&kv, key).await?;
    println!("API key saved.");
    Ok(())
}

async fn cmd_key_clear(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let kv = open_db(&config, db).await?;
    clear_api_key(&kv).await?;
    println!("API key removed.");
    Ok(())
}

async fn cmd_key_show(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let kv = open_db(&config, db).await?;
    match load_api_key(&kv).await? {
        Some(key) => println!("Stored API key: {}", mask_api_key(&key)),
        None => println!(
            "No API key stored (the {} environment variable is used if set).",
            config.openai.api_key_env
        ),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
