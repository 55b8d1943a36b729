//! meshctl - Controller CLI for the MCP Mesh.
//!
//! # Usage
//!
//! ```bash
//! # Start the registry and two agents, detached
//! meshctl start agents/hello.py agents/system.py --detach
//!
//! # See what is registered
//! meshctl list
//!
//! # Invoke a tool and render its trace
//! meshctl call hello:say_hello '{"name": "world"}' --trace
//!
//! # Tail an agent's log
//! meshctl logs hello -f
//!
//! # Stop everything and wipe local state
//! meshctl stop --clean
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mesh_core::error::MeshError;
use meshctl::commands::{self, config::ConfigFormat, stop::StopScope};
use meshctl::output::{self, OutputFormat};
use meshctl::ControllerConfig;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "Controller for the MCP Mesh: supervise agents, call tools, inspect traces", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry URL override
    #[arg(long, global = true)]
    registry_url: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConfigFormatArg {
    Yaml,
    Json,
}

impl From<ConfigFormatArg> for ConfigFormat {
    fn from(arg: ConfigFormatArg) -> Self {
        match arg {
            ConfigFormatArg::Yaml => ConfigFormat::Yaml,
            ConfigFormatArg::Json => ConfigFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry and agent processes
    Start {
        /// Agent scripts to launch
        agents: Vec<PathBuf>,

        /// Start only the registry
        #[arg(long)]
        registry_only: bool,

        /// Run detached, with logs under ~/.mcp-mesh/logs
        #[arg(short, long)]
        detach: bool,

        /// Log level passed to started processes
        #[arg(long)]
        log_level: Option<String>,

        /// Extra environment for started processes (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },

    /// Stop supervised processes
    Stop {
        /// A single process name; omit to stop everything
        name: Option<String>,

        /// Stop only the registry
        #[arg(long, conflicts_with_all = ["agents", "keep_registry"])]
        registry: bool,

        /// Stop only the agents
        #[arg(long)]
        agents: bool,

        /// Stop agents but leave the registry running
        #[arg(long)]
        keep_registry: bool,

        /// SIGKILL immediately instead of escalating
        #[arg(short, long)]
        force: bool,

        /// Also delete the registry database, logs and PID files
        #[arg(long)]
        clean: bool,

        /// Seconds to wait before escalating to SIGKILL
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List registered agents
    List {
        /// Substring filter on agent or capability names
        #[arg(short, long)]
        filter: Option<String>,

        /// JSON output
        #[arg(long)]
        json: bool,

        /// Show endpoint, namespace and id columns
        #[arg(long)]
        wide: bool,

        /// Hide the dependency counters column
        #[arg(long)]
        no_deps: bool,
    },

    /// Show registry health and supervised processes
    Status {
        /// JSON output
        #[arg(long)]
        json: bool,

        /// Also list every registered agent
        #[arg(short, long)]
        verbose: bool,
    },

    /// Call a tool: meshctl call [agent:]tool [json-args]
    Call {
        /// Target tool, optionally qualified by agent name
        target: String,

        /// Inline JSON arguments
        args: Option<String>,

        /// Read JSON arguments from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Route through the registry proxy
        #[arg(
            long,
            action = clap::ArgAction::Set,
            num_args = 0..=1,
            default_value_t = false,
            default_missing_value = "true"
        )]
        use_proxy: bool,

        /// Skip discovery and call this endpoint directly
        #[arg(long)]
        agent_url: Option<String>,

        /// Ingress virtual-host domain
        #[arg(long, requires = "ingress_url")]
        ingress_domain: Option<String>,

        /// Ingress base URL
        #[arg(long, requires = "ingress_domain")]
        ingress_url: Option<String>,

        /// Print the trace id and render the call tree afterwards
        #[arg(long)]
        trace: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// View a supervised process log
    Logs {
        /// Process name
        name: String,

        /// Follow appended output
        #[arg(short, long)]
        follow: bool,

        /// Show the Nth previous run instead of the live log
        #[arg(short, long, default_value_t = 0)]
        previous: usize,

        /// Only the last N lines
        #[arg(long)]
        tail: Option<usize>,

        /// Only lines since a duration (5m) or timestamp
        #[arg(long)]
        since: Option<String>,
    },

    /// Fetch and render a distributed trace
    Trace {
        /// Trace id (32 hex characters)
        trace_id: String,

        /// JSON output
        #[arg(long)]
        json: bool,

        /// Keep proxy/internal wrapper spans in the tree
        #[arg(long)]
        show_internal: bool,
    },

    /// Inspect controller configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(long, default_value = "yaml")]
        format: ConfigFormatArg,
    },
    /// Print the config file path
    Path,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // meshctl's own logging stays quiet unless MCP_MESH_LOG_LEVEL asks
    // otherwise; the config log level is for supervised processes.
    let filter = std::env::var(mesh_core::env::LOG_LEVEL)
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match ControllerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            output::error(&err);
            process::exit(err.exit_code());
        }
    };
    if let Some(url) = &cli.registry_url {
        config.registry_url = url.trim_end_matches('/').to_string();
    }

    if let Err(err) = dispatch(cli.command, config).await {
        output::error(&err);
        process::exit(err.exit_code());
    }
}

async fn dispatch(command: Commands, config: ControllerConfig) -> Result<(), MeshError> {
    match command {
        Commands::Start {
            agents,
            registry_only,
            detach,
            log_level,
            env,
        } => commands::start::run(config, agents, registry_only, detach, log_level, env).await,

        Commands::Stop {
            name,
            registry,
            agents,
            keep_registry,
            force,
            clean,
            timeout,
        } => {
            let scope = if registry {
                StopScope::Registry
            } else if agents || keep_registry {
                StopScope::Agents
            } else {
                StopScope::All
            };
            commands::stop::run(config, name, scope, force, clean, timeout).await
        }

        Commands::List {
            filter,
            json,
            wide,
            no_deps,
        } => commands::list::run(config, filter, OutputFormat::from_flag(json), wide, no_deps).await,

        Commands::Status { json, verbose } => {
            commands::status::run(config, OutputFormat::from_flag(json), verbose).await
        }

        Commands::Call {
            target,
            args,
            file,
            use_proxy,
            agent_url,
            ingress_domain,
            ingress_url,
            trace,
            json,
        } => {
            commands::call::run(
                config,
                target,
                args,
                file,
                use_proxy,
                agent_url,
                ingress_domain,
                ingress_url,
                trace,
                OutputFormat::from_flag(json),
            )
            .await
        }

        Commands::Logs {
            name,
            follow,
            previous,
            tail,
            since,
        } => commands::logs::run(config, name, follow, previous, tail, since).await,

        Commands::Trace {
            trace_id,
            json,
            show_internal,
        } => {
            commands::trace::run(config, trace_id, OutputFormat::from_flag(json), show_internal)
                .await
        }

        Commands::Config(command) => match command {
            ConfigCommands::Show { format } => commands::config::show(&config, format.into()),
            ConfigCommands::Path => commands::config::path(&config),
        },
    }
}
