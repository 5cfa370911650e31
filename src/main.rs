//! Pipeform CLI entrypoint.
//!
//! This is the main entrypoint for the pipeform command-line tool.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use pipeform::cli::{Cli, Commands, OutputFormatter, StateCommands};
use pipeform::config::{
    ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, StateBackend, find_config_file,
};
use pipeform::error::{ConfigError, PipeformError, Result, TemplateError};
use pipeform::model::{AttrValue, Concrete, ResolveContext, ResourceId, ResourceKind, resolve};
use pipeform::planner::{CancelToken, Plan};
use pipeform::provider::{
    ArtifactProvider, EnvSecretStore, HttpProvider, MemoryObjectStore, MemoryProvider,
    PlaceholderSecretStore, Provider, S3ObjectStore, SecretStore,
};
use pipeform::reconciler::{ReconcileOptions, Reconciler};
use pipeform::state::{
    LocalStateStore, MemoryStateStore, S3StateStore, STATE_DIR, StateSnapshot, StateStore,
    generate_holder_id,
};
use pipeform::template::{TemplateVar, TemplateVars};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr so JSON output on
/// stdout stays parseable.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config = cli.config.as_ref();
    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, formatter),
        Commands::Plan {
            detailed,
            refresh,
            simulate,
        } => cmd_plan(config, detailed, refresh, simulate, formatter).await,
        Commands::Apply {
            yes,
            halt_on_error,
            parallelism,
            refresh,
            simulate,
        } => {
            let options = ReconcileOptions {
                refresh,
                halt_on_error: halt_on_error.then_some(true),
                parallelism,
            };
            cmd_apply(config, yes, options, simulate, formatter).await
        }
        Commands::Destroy { yes, simulate } => cmd_destroy(config, yes, simulate, formatter).await,
        Commands::Drift { simulate } => cmd_drift(config, simulate, formatter).await,
        Commands::Render {
            resource,
            template,
            vars,
            lists,
        } => cmd_render(config, resource.as_deref(), template.as_deref(), &vars, &lists).await,
        Commands::Hash => cmd_hash(config, formatter),
        Commands::State { command } => cmd_state(config, command, formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<ExitCode> {
    info!("Initializing new pipeform project in: {}", path.display());

    let config_path = path.join("pipeform.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/pipeform.deploy.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.lines().any(|l| l.trim() == state_entry);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# pipeform")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the provider token and secrets");
    eprintln!("  2. Edit pipeform.deploy.yaml with your resources");
    eprintln!("  3. Run 'pipeform validate' to check your configuration");
    eprintln!("  4. Run 'pipeform plan' to see what will change");
    eprintln!("  5. Run 'pipeform apply' to deploy");

    Ok(ExitCode::SUCCESS)
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    info!("Validating configuration: {}", workspace.config_file.display());

    let result = ConfigValidator.check(&workspace.config);
    println!(
        "{}",
        formatter.format_validation(&workspace.config, &result, show_warnings)
    );
    Ok(exit_code(result.is_ok()))
}

/// Show the execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    refresh: bool,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let reconciler = workspace.reconciler(simulate).await?;
    let plan = reconciler.plan(refresh).await?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(ExitCode::SUCCESS)
}

/// Apply the execution plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    options: ReconcileOptions,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let reconciler = workspace.reconciler(simulate).await?;

    let outcome = reconciler
        .apply(options, |plan| {
            confirm(plan, auto_approve, formatter, "Do you want to apply this plan? [y/N]: ", "y")
        })
        .await?;

    println!("{}", formatter.format_outcome(&outcome));
    Ok(exit_code(outcome.is_success()))
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let reconciler = workspace.reconciler(simulate).await?;

    let outcome = reconciler
        .destroy(ReconcileOptions::default(), |plan| {
            confirm(
                plan,
                auto_approve,
                formatter,
                "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
                "destroy",
            )
        })
        .await?;

    if outcome.plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}", formatter.format_outcome(&outcome));
    Ok(exit_code(outcome.is_success()))
}

/// Check for drift.
async fn cmd_drift(
    config_path: Option<&PathBuf>,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let reconciler = workspace.reconciler(simulate).await?;
    let report = reconciler.check_drift().await?;
    println!("{}", formatter.format_drift(&report));
    Ok(exit_code(report.is_clean()))
}

/// Print rendered template text.
async fn cmd_render(
    config_path: Option<&PathBuf>,
    resource: Option<&str>,
    template: Option<&str>,
    vars: &[String],
    lists: &[String],
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let library = workspace.config.template_library();

    if let Some(name) = template {
        let def = library.get(name).ok_or_else(|| {
            PipeformError::Template(TemplateError::UnknownTemplate {
                name: name.to_string(),
            })
        })?;
        let vars = parse_template_vars(vars, lists)?;
        println!("{}", def.render(&vars)?);
        return Ok(ExitCode::SUCCESS);
    }

    let address = resource.unwrap_or_default();
    let id = ResourceId::parse(address)
        .map_err(|e| ConfigError::validation_field("resource", e))?;
    let spec = workspace.config.resource(&id).ok_or_else(|| {
        ConfigError::validation_field("resource", format!("{id} is not declared"))
    })?;

    let snapshot = workspace.state_store().await?.load().await?;
    let outputs = snapshot.as_ref().map(StateSnapshot::outputs).unwrap_or_default();
    let settled = BTreeSet::new();
    let ctx = ResolveContext {
        outputs: &outputs,
        pending: &settled,
        updating: &settled,
        templates: &library,
    };
    let attributes = resolve(spec, &ctx)?;

    let rendered: Vec<&String> = spec
        .attributes
        .iter()
        .filter(|(_, v)| matches!(v, AttrValue::Template(_)))
        .map(|(k, _)| k)
        .collect();
    if rendered.is_empty() {
        eprintln!("{id} has no template attributes.");
        return Ok(ExitCode::SUCCESS);
    }
    for key in rendered {
        match attributes.get(key) {
            Some(Concrete::String(text)) => println!("-- {id}.{key}\n{text}"),
            Some(Concrete::Pending { pending }) => {
                println!("-- {id}.{key}\n(known after apply: {pending})");
            }
            _ => {}
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the configuration hash and artifact content hashes.
fn cmd_hash(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let config_hash = ConfigHasher::new().hash_config(&workspace.config);
    let artifacts: Vec<(String, String)> = workspace
        .config
        .resources
        .iter()
        .filter(|r| r.kind == ResourceKind::ScriptArtifact)
        .filter_map(|r| {
            r.attributes
                .get("content_hash")
                .and_then(AttrValue::as_str)
                .map(|h| (r.id().to_string(), h.to_string()))
        })
        .collect();
    println!("{}", formatter.format_hashes(&config_hash, &artifacts));
    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = Workspace::load(config_path)?;
    let store = workspace.state_store().await?;

    match command {
        StateCommands::Show => {
            let lock = store.get_lock_info().await?;
            if let Some(state) = store.load().await? {
                println!("{}", formatter.format_state(&state, lock.as_ref()));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("{}", formatter.success(&format!("State locked: {}", lock.lock_id)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                warn!("Force-unlocking state");
                store.force_unlock().await?;
                println!("{}", formatter.success("State forcefully unlocked."));
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                println!("{}", formatter.success("State unlocked."));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loaded configuration and where it came from.
struct Workspace {
    config: DeployConfig,
    config_file: PathBuf,
    base_dir: PathBuf,
}

impl Workspace {
    /// Finds, loads and parses the configuration, with `.env` applied.
    fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let config_file = config_path.map_or_else(|| find_config_file("."), |p| Ok(p.clone()))?;
        debug!("Loading configuration from: {}", config_file.display());

        let base_dir = config_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let parser = ConfigParser::new().with_base_path(&base_dir);
        parser.load_dotenv()?;
        let config = parser.load_with_env(&config_file)?;

        Ok(Self {
            config,
            config_file,
            base_dir,
        })
    }

    /// Creates the state store the configuration names.
    async fn state_store(&self) -> Result<Arc<dyn StateStore>> {
        let state = &self.config.state;
        let store: Arc<dyn StateStore> = match state.backend {
            StateBackend::Local => match &state.path {
                Some(path) => Arc::new(LocalStateStore::with_state_path(self.base_dir.join(path))),
                None => Arc::new(LocalStateStore::with_base_dir(self.base_dir.join(STATE_DIR))),
            },
            StateBackend::S3 => {
                let bucket = state.bucket.as_deref().ok_or_else(|| {
                    ConfigError::validation_field("state.bucket", "S3 backend requires a bucket")
                })?;
                let prefix = self.config.state_prefix();
                Arc::new(S3StateStore::new(bucket, Some(&prefix), state.region.as_deref()).await)
            }
        };
        Ok(store)
    }

    /// Builds a reconciler. With `simulate`, the provider and store are
    /// in-memory copies seeded from the real snapshot.
    async fn reconciler(&self, simulate: bool) -> Result<Reconciler> {
        let store = self.state_store().await?;

        let (store, provider, secrets): (
            Arc<dyn StateStore>,
            Arc<dyn Provider>,
            Arc<dyn SecretStore>,
        ) = if simulate {
            info!("Simulating: using the in-memory provider, nothing will be written");
            let snapshot = store.load().await?;
            let inner = snapshot
                .as_ref()
                .map_or_else(MemoryProvider::new, MemoryProvider::seeded);
            let provider = ArtifactProvider::new(
                inner,
                Arc::new(MemoryObjectStore::new()),
                self.base_dir.clone(),
            );
            (
                Arc::new(MemoryStateStore::seeded(snapshot)),
                Arc::new(provider),
                Arc::new(PlaceholderSecretStore),
            )
        } else {
            let endpoint = self.config.provider.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation_field(
                    "provider.endpoint",
                    "an endpoint is required unless --simulate is used",
                )
            })?;
            let http = HttpProvider::new(
                endpoint,
                ConfigParser::provider_token(&self.config),
                self.config.provider.timeout_secs,
            )?;
            let objects = S3ObjectStore::new(self.config.provider.artifact_region.as_deref()).await;
            let provider = ArtifactProvider::new(http, Arc::new(objects), self.base_dir.clone());
            (
                store,
                Arc::new(provider),
                Arc::new(EnvSecretStore::new(self.config.secrets.prefix.clone())),
            )
        };

        let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted: finishing in-flight actions, starting no new ones");
                on_signal.cancel();
            }
        });

        Ok(Reconciler::new(self.config.clone(), store, provider, secrets).with_cancel_token(cancel))
    }
}

/// Shows the plan and asks for confirmation unless `auto_approve`.
fn confirm(
    plan: &Plan,
    auto_approve: bool,
    formatter: &OutputFormatter,
    prompt: &str,
    expected: &str,
) -> bool {
    if !formatter.is_json() {
        eprintln!("{}", formatter.format_plan(plan, false));
    }
    if auto_approve {
        return true;
    }

    eprint!("{prompt}");
    if std::io::stderr().flush().is_err() {
        return false;
    }
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case(expected)
}

/// Parses `key=value` scalars and `key=a,b,c` lists.
fn parse_template_vars(vars: &[String], lists: &[String]) -> Result<TemplateVars> {
    let split = |raw: &str| {
        raw.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .ok_or_else(|| {
                PipeformError::Config(ConfigError::validation_field(
                    "var",
                    format!("'{raw}' is not KEY=VALUE"),
                ))
            })
    };

    let mut parsed = TemplateVars::new();
    for raw in vars {
        let (key, value) = split(raw)?;
        parsed.insert(key, TemplateVar::Scalar(value));
    }
    for raw in lists {
        let (key, value) = split(raw)?;
        let items = value.split(',').map(|s| s.trim().to_string()).collect();
        parsed.insert(key, TemplateVar::List(items));
    }
    Ok(parsed)
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
