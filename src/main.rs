use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scanvault::{
    cache::IssuesCache,
    config::Config,
    issues::build_issues_tree,
    model::{ScanResults, Severity},
    output::{print_results, OutputFormat},
    platform::absolute_workspace_path,
    request::{DependencyTree, GraphMode, GraphRequestBuilder},
    scanner::discover_descriptors,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_ISSUE: u8 = 2;
    pub const HIGH_ISSUE: u8 = 3;
    pub const MEDIUM_ISSUE: u8 = 4;
    pub const LOW_ISSUE: u8 = 5;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "scanvault")]
#[command(
    author,
    version,
    about = "Inspect cached dependency scan results and build graph scan requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cached scan results of a workspace
    Status {
        /// Workspace root
        workspace: PathBuf,

        /// Output format (table, json)
        #[arg(short, long)]
        format: Option<String>,

        /// Exit with error if issues at or above this severity are cached
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,
    },

    /// Build a graph scan request from a dependency tree JSON file
    Request {
        /// Dependency tree file ({"dependency_id": ..., "children": [...]})
        tree: PathBuf,

        /// Send the full hierarchy instead of a flattened component list
        #[arg(long)]
        hierarchical: bool,

        /// Write the request to file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List workspaces with cached results
    List,

    /// Clear cached results of a workspace, or of every workspace
    Clear {
        /// Workspace root; omit to clear the whole cache
        workspace: Option<PathBuf>,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn threshold(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Medium => Severity::Medium,
            FailLevel::Low => Severity::Low,
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    match cli.command {
        Commands::Status {
            workspace,
            format,
            fail_on,
        } => {
            let format_str = format.unwrap_or_else(|| config.default_format.clone());
            let format = OutputFormat::from_str(&format_str).map_err(anyhow::Error::msg)?;
            show_status(&workspace, format, fail_on, &config)
        }
        Commands::Request {
            tree,
            hierarchical,
            output,
        } => {
            build_request(&tree, hierarchical, output, &config)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::List => {
            let cache = IssuesCache::new();
            let workspaces = cache.cached_workspaces();
            if workspaces.is_empty() {
                println!("No cached workspaces.");
            }
            for workspace in workspaces {
                println!("{}", workspace);
            }
            Ok(exit_codes::SUCCESS)
        }
        Commands::Clear { workspace } => {
            let cache = IssuesCache::new();
            match workspace {
                Some(workspace) => {
                    let workspace = absolute_workspace_path(&workspace);
                    cache.remove(&workspace)?;
                    println!("Cleared cached results for {}", workspace.display());
                }
                None => {
                    cache.clear()?;
                    println!("Cache cleared.");
                }
            }
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn show_status(
    workspace: &Path,
    format: OutputFormat,
    fail_on: Option<FailLevel>,
    config: &Config,
) -> Result<u8> {
    let workspace = absolute_workspace_path(workspace);
    let cache = IssuesCache::new().with_ttl_days(config.cache_ttl_days);

    if let Some(results) = cache.get_or_clear_if_not_relevant(&workspace) {
        print_results(&results, format)?;
        return Ok(determine_exit_code(&results, fail_on));
    }

    debug!(workspace = %workspace.display(), "no relevant cached results");
    if format == OutputFormat::Json {
        println!("null");
        return Ok(exit_codes::SUCCESS);
    }

    println!("No cached scan results for {}", workspace.display());
    let descriptors = discover_descriptors(&workspace, &config.exclude);
    if !descriptors.is_empty() {
        println!();
        println!("{} descriptor(s) waiting for a scan:", descriptors.len());
        for descriptor in descriptors {
            let relative = descriptor
                .full_path
                .strip_prefix(&workspace)
                .unwrap_or(&descriptor.full_path);
            println!("  {:<40} {}", relative.display(), descriptor.package_type);
        }
    }
    Ok(exit_codes::SUCCESS)
}

fn build_request(
    tree_path: &Path,
    hierarchical: bool,
    output_file: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let content = std::fs::read_to_string(tree_path)
        .with_context(|| format!("failed to read {}", tree_path.display()))?;
    let tree: DependencyTree = serde_json::from_str(&content)
        .with_context(|| format!("invalid dependency tree in {}", tree_path.display()))?;

    let mode = if hierarchical {
        GraphMode::Hierarchical
    } else {
        GraphMode::from_flatten(config.flatten_graph)
    };
    let request = GraphRequestBuilder::from_config(config).build(&tree, mode);
    let json = serde_json::to_string_pretty(&request)?;

    match output_file {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("Request written to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Determine the exit code based on the worst cached issue and --fail-on
fn determine_exit_code(results: &ScanResults, fail_on: Option<FailLevel>) -> u8 {
    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    let worst = build_issues_tree(results)
        .iter()
        .filter(|node| node.issue_count() > 0)
        .map(|node| node.severity())
        .max();

    match worst {
        Some(severity) if severity >= fail_on.threshold() => match severity {
            Severity::Critical => exit_codes::CRITICAL_ISSUE,
            Severity::High => exit_codes::HIGH_ISSUE,
            Severity::Medium => exit_codes::MEDIUM_ISSUE,
            _ => exit_codes::LOW_ISSUE,
        },
        _ => exit_codes::SUCCESS,
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'scanvault config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
