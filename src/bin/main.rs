use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tsunagi::config::load_settings;
use tsunagi::{ClientError, ClientRegistry, ClientResult, FileRequest, LanguageServerClient};

/// Drive language servers from the command line
#[derive(Parser)]
#[command(name = "tsunagi")]
#[command(version)]
#[command(about = "Start, query and stop external language servers")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/tsunagi/tsunagi.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. debug or tsunagi::connection=trace (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print debug information about the server for a filetype
    DebugInfo {
        filetype: String,

        /// Start the server first, along with every eagerly started server
        #[arg(long)]
        start: bool,
    },
    /// Run a subcommand (GoTo, GetType, RefactorRename, ...) at a position
    Exec {
        filetype: String,
        subcommand: String,

        #[arg(long)]
        file: PathBuf,

        /// 1-based line
        #[arg(long)]
        line: usize,

        /// 1-based column, counted in characters
        #[arg(long)]
        column: usize,

        /// Subcommand arguments, e.g. the new name for RefactorRename
        args: Vec<String>,
    },
    /// Open a file and print the diagnostics the server publishes for it
    Diagnostics {
        filetype: String,

        #[arg(long)]
        file: PathBuf,

        /// How long to wait for diagnostics to arrive
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
}

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.format_timestamp_millis().init();
}

fn print_json(value: &impl Serialize) -> ClientResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ClientError::Parse {
        message: e.to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn client_for<'a>(registry: &'a ClientRegistry, filetype: &str) -> ClientResult<&'a LanguageServerClient> {
    registry.client_for_filetype(filetype).ok_or_else(|| {
        ClientError::config(format!(
            "no server is configured for filetype {} (known: {})",
            filetype,
            registry.filetypes().join(", ")
        ))
    })
}

async fn run(cli: Cli) -> ClientResult<()> {
    let settings = load_settings(cli.config.as_deref())?;
    let registry = ClientRegistry::from_settings(&settings);

    let result = execute(&registry, cli.command).await;
    registry.shutdown_all().await;
    result
}

async fn execute(registry: &ClientRegistry, command: Commands) -> ClientResult<()> {
    match command {
        Commands::DebugInfo { filetype, start } => {
            let client = client_for(registry, &filetype)?;
            if start {
                registry.start_eager().await;
                client.start_server().await?;
            }
            print_json(&client.debug_info())
        }
        Commands::Exec {
            filetype,
            subcommand,
            file,
            line,
            column,
            args,
        } => {
            let client = client_for(registry, &filetype)?;
            let subcommand = tsunagi::Subcommand::parse(&subcommand, &args)?;
            let request = FileRequest::from_disk(&file, &filetype, line, column).await?;
            client.on_file_ready_to_parse(&request).await?;
            let response = client.execute_subcommand(&request, &subcommand).await?;
            print_json(&response)
        }
        Commands::Diagnostics {
            filetype,
            file,
            wait_ms,
        } => {
            let client = client_for(registry, &filetype)?;
            let request = FileRequest::from_disk(&file, &filetype, 1, 1).await?;
            client.on_file_ready_to_parse(&request).await?;
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            let diagnostics = client.diagnostics_for(&file)?.unwrap_or_default();
            print_json(&diagnostics)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
