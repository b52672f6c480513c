use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use ach_core::admin::AdminClient;
use ach_core::collections::drop_collections;
use ach_core::config::{AchConfig, load_config, resolve_config_path};
use ach_core::document::{DOCTYPE_FILES, ROOT_DIR_ID};
use ach_core::fixtures::{import_fixtures, load_fixture_file};
use ach_core::import_dir::{DEFAULT_IMPORT_DIR, import_directory};
use ach_core::reconcile::{
    PlanSummary, REQUIRED_DOCTYPES, ReconcileRequest, reconcile_vendor_bills,
};
use ach_core::store::{DocumentStore, StackClient, StackClientConfig, instance_domain};
use ach_core::tunnel::{fetch_job_logs, with_env_tunnel};
use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ach",
    version,
    about = "Administrative helper for stack instances: fixtures, imports, drops and maintenance scripts"
)]
struct Cli {
    #[arg(
        short = 'u',
        long,
        global = true,
        value_name = "URL",
        help = "URL of the instance to use (defaults to http://cozy.tools:8080)"
    )]
    url: Option<String>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(
        short = 't',
        long,
        global = true,
        help = "Generate a new token through the admin endpoint"
    )]
    token: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    url: Option<String>,
    config: Option<PathBuf>,
    generate_token: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            url: cli.url.clone(),
            config: cli.config.clone(),
            generate_token: cli.token,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Import fixture documents from a JSON file keyed by doctype")]
    Import(ImportArgs),
    #[command(name = "import-dir", about = "Import the content of a local directory as files")]
    ImportDir(ImportDirArgs),
    #[command(about = "Delete every document of the given doctypes. For real.")]
    Drop(DropArgs),
    #[command(about = "Create a CLI token for an instance")]
    Token(TokenArgs),
    #[command(about = "Toggle debug logging on an instance")]
    Debug(DebugArgs),
    #[command(about = "Grep the log host of an environment for a job id")]
    Logs(LogsArgs),
    #[command(about = "Run a maintenance script against live data")]
    Script(ScriptArgs),
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(default_value = "example-data.json")]
    data_file: PathBuf,
}

#[derive(Debug, Args)]
struct ImportDirArgs {
    #[arg(default_value = DEFAULT_IMPORT_DIR)]
    directory: PathBuf,
}

#[derive(Debug, Args)]
struct DropArgs {
    #[arg(required = true)]
    doctypes: Vec<String>,
}

#[derive(Debug, Args)]
struct TokenArgs {
    domain: String,
    #[arg(required = true)]
    doctypes: Vec<String>,
    #[arg(long, value_name = "ENV", help = "Reach the admin endpoint through an ssh tunnel")]
    tunnel: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DebugMode {
    Enable,
    Disable,
}

#[derive(Debug, Args)]
struct DebugArgs {
    mode: DebugMode,
    domain: String,
    #[arg(long, value_name = "ENV", help = "Reach the admin endpoint through an ssh tunnel")]
    tunnel: Option<String>,
}

#[derive(Debug, Args)]
struct LogsArgs {
    env: String,
    job_id: String,
}

#[derive(Debug, Args)]
struct ScriptArgs {
    #[command(subcommand)]
    command: ScriptCommand,
}

#[derive(Debug, Subcommand)]
enum ScriptCommand {
    #[command(
        name = "remove-duplicate-bills",
        about = "Remove a vendor's bills whose file is gone or which duplicate another bill"
    )]
    RemoveDuplicateBills(RemoveDuplicateBillsArgs),
}

#[derive(Debug, Args)]
struct RemoveDuplicateBillsArgs {
    #[arg(help = "Connector slug of the accounts (account_type)")]
    slug: String,
    #[arg(help = "Vendor name stored on the bills")]
    vendor: String,
    #[arg(short = 'x', long, help = "Apply the deletions (dry-run otherwise)")]
    execute: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Import(args)) => run_import(&runtime, args),
        Some(Commands::ImportDir(args)) => run_import_dir(&runtime, args),
        Some(Commands::Drop(args)) => run_drop(&runtime, args),
        Some(Commands::Token(args)) => run_token(&runtime, args),
        Some(Commands::Debug(args)) => run_debug(&runtime, args),
        Some(Commands::Logs(args)) => run_logs(&runtime, args),
        Some(Commands::Script(ScriptArgs { command })) => match command {
            ScriptCommand::RemoveDuplicateBills(args) => {
                run_remove_duplicate_bills(&runtime, args)
            }
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_import(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let fixtures = load_fixture_file(&args.data_file)?;
    let mut store = connect_store(runtime, &config, &fixtures.doctypes())?;

    println!("import");
    println!("instance: {}", store.base_url());
    println!("data_file: {}", args.data_file.display());
    println!("doctypes: {}", fixtures.doctypes().join(", "));
    println!("documents: {}", fixtures.document_count());

    let report = import_fixtures(&mut store, &fixtures);
    for doctype in &report.doctypes {
        println!(
            "imported.{}: {} ({} errors)",
            doctype.doctype,
            doctype.created,
            doctype.errors.len()
        );
        for error in &doctype.errors {
            println!("  - {error}");
        }
    }
    println!("created: {}", report.created());
    println!("request_count: {}", store.request_count());
    if report.errors() > 0 {
        bail!("{} fixture documents failed to import", report.errors());
    }
    Ok(())
}

fn run_import_dir(runtime: &RuntimeOptions, args: ImportDirArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let mut store = connect_store(runtime, &config, &[DOCTYPE_FILES.to_string()])?;

    println!("import-dir");
    println!("instance: {}", store.base_url());
    println!("directory: {}", args.directory.display());

    let report = import_directory(&mut store, &args.directory, ROOT_DIR_ID)?;
    println!("directories: {}", report.directories);
    println!("files: {}", report.files);
    for error in &report.errors {
        println!("  - {error}");
    }
    println!("request_count: {}", store.request_count());
    if !report.errors.is_empty() {
        bail!("{} entries failed to import", report.errors.len());
    }
    Ok(())
}

fn run_drop(runtime: &RuntimeOptions, args: DropArgs) -> Result<()> {
    println!(
        "Are you sure? EVERY document of type {} will be removed. Type yes to confirm.",
        args.doctypes.join(", ")
    );
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    if answer.trim() != "yes" {
        println!("Thought so.");
        return Ok(());
    }

    println!("Okay, hang tight.");
    let config = load_runtime_config(runtime)?;
    let mut store = connect_store(runtime, &config, &args.doctypes)?;
    let reports = drop_collections(&mut store, &args.doctypes)?;
    for report in reports {
        println!("dropped.{}: {}", report.doctype, report.deleted);
    }
    Ok(())
}

fn run_token(runtime: &RuntimeOptions, args: TokenArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let create = || {
        AdminClient::for_domain(&config, &args.domain)?.create_token(&args.domain, &args.doctypes)
    };
    let token = match &args.tunnel {
        Some(env_name) => with_env_tunnel(&config, std::slice::from_ref(env_name), create)?,
        None => create()?,
    };
    println!("{token}");
    Ok(())
}

fn run_debug(runtime: &RuntimeOptions, args: DebugArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let toggle = || {
        let admin = AdminClient::for_domain(&config, &args.domain)?;
        match args.mode {
            DebugMode::Enable => admin.enable_debug(&args.domain),
            DebugMode::Disable => admin.disable_debug(&args.domain),
        }
    };
    match &args.tunnel {
        Some(env_name) => with_env_tunnel(&config, std::slice::from_ref(env_name), toggle)?,
        None => toggle()?,
    }
    println!(
        "debug {}: {}",
        match args.mode {
            DebugMode::Enable => "enabled",
            DebugMode::Disable => "disabled",
        },
        args.domain
    );
    Ok(())
}

fn run_logs(runtime: &RuntimeOptions, args: LogsArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let output = fetch_job_logs(&config, &args.env, &args.job_id)?;
    if output.trim().is_empty() {
        println!("logs: <none> for job {}", args.job_id);
    } else {
        print!("{output}");
    }
    Ok(())
}

fn run_remove_duplicate_bills(
    runtime: &RuntimeOptions,
    args: RemoveDuplicateBillsArgs,
) -> Result<()> {
    let request = ReconcileRequest {
        vendor_slug: args.slug,
        vendor_name: args.vendor,
        dry_run: !args.execute,
    };
    let config = load_runtime_config(runtime)?;
    let doctypes = REQUIRED_DOCTYPES
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let mut store = connect_store(runtime, &config, &doctypes)?;

    println!("Instance {}...", instance_domain(store.base_url())?);
    let outcome = reconcile_vendor_bills(&mut store, &request, print_plan_summary)?;

    if request.dry_run {
        for record in &outcome.plan.remove {
            let id = record.id().unwrap_or("<no id>");
            match &record.original {
                Some(original) => println!("  - {id} (duplicate of {original})"),
                None => println!("  - {id} (file missing)"),
            }
        }
    }

    if outcome.applied {
        println!("Deleted {} bills", outcome.summary.to_remove);
    } else if request.dry_run {
        println!("Dry run: nothing was deleted (pass --execute to apply)");
    } else {
        println!("Nothing to delete");
    }
    println!("request_count: {}", store.request_count());
    Ok(())
}

fn print_plan_summary(summary: &PlanSummary) {
    println!("accounts: {}", summary.matching_accounts);
    for folder in &summary.skipped_accounts {
        println!("{folder} does not exist");
    }
    println!("live_files: {}", summary.live_files);
    println!(
        "Found {} bills with files which do not exist",
        summary.orphaned
    );
    println!("Found {} duplicate bills", summary.duplicates);
    println!(
        "Will delete {} bills / {} total ({} fetched)",
        summary.to_remove, summary.vendor_bills, summary.fetched_bills
    );
    println!("kept: {}", summary.kept);
    println!(
        "mode: {}",
        if summary.dry_run { "dry-run" } else { "execute" }
    );
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<AchConfig> {
    dotenvy::dotenv().ok();
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let config_path = resolve_config_path(runtime.config.as_deref(), &cwd);
    tracing::debug!(path = %config_path.display(), "loading config");
    load_config(&config_path)
}

fn connect_store(
    runtime: &RuntimeOptions,
    config: &AchConfig,
    doctypes: &[String],
) -> Result<StackClient> {
    let url = config.stack.url(runtime.url.as_deref());
    let token = if runtime.generate_token {
        let domain = instance_domain(&url)?;
        AdminClient::for_domain(config, &domain)?
            .create_token(&domain, doctypes)
            .with_context(|| format!("failed to create a token for {domain}"))?
    } else {
        config
            .stack
            .token()
            .ok_or_else(|| {
                anyhow::anyhow!("no token configured: set ACH_TOKEN or [stack].token, or pass --token")
            })?
    };
    StackClient::new(StackClientConfig::new(&url, &token, &config.stack))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
