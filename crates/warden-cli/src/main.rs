mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::policy::PromptArgs;
use warden_types::EngineMode;

/// Warden -- governance for human-in-the-loop AI agents.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to warden.toml (default: $WARDEN_HOME/warden.toml, then ./warden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter warden.toml and policy.toml
    Init {
        /// Directory to initialize
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Builtin policy template to start from
        #[arg(long, default_value = "supervised")]
        policy: String,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Audit chain subcommands
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },

    /// Decision trace subcommands
    Trace {
        #[command(subcommand)]
        action: TraceCommands,
    },

    /// Autopilot engine mode
    Engine {
        #[command(subcommand)]
        action: EngineCommands,
    },

    /// Policy subcommands
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },

    /// Run one prompt through the pipeline without injecting anything
    Simulate {
        #[command(flatten)]
        source: PolicySource,

        #[command(flatten)]
        prompt: PromptFlags,

        /// Answer the prompt as the operator if it is routed to a human
        #[arg(long)]
        reply: Option<String>,

        /// Write decisions to the configured audit chain and trace
        #[arg(long)]
        record: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Verify the hash chain (exit status 1 if broken)
    Verify {
        /// Only report events of this session
        #[arg(long)]
        session: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent audit events
    Tail {
        #[arg(short = 'n', long, default_value = "20")]
        last: usize,

        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TraceCommands {
    /// Show the most recent decisions
    Tail {
        #[arg(short = 'n', long, default_value = "20")]
        last: usize,

        /// One JSON record per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum EngineCommands {
    /// Show the saved engine mode
    Status,
    /// Route every prompt to a human
    Pause {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Resume policy-driven handling
    Resume {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Kill switch: suppress all injection
    Stop {
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// Parse, validate, and compile a policy
    Check {
        #[command(flatten)]
        source: PolicySource,
    },
    /// List builtin policy templates
    List,
    /// Print a builtin policy template
    Show { name: String },
    /// Show how a prompt would be decided, rule by rule
    Explain {
        #[command(flatten)]
        source: PolicySource,

        #[command(flatten)]
        prompt: PromptFlags,

        #[arg(long)]
        json: bool,
    },
}

/// Which policy to use. Defaults to `policy_path` from the config.
#[derive(Args, Debug)]
struct PolicySource {
    /// Policy TOML file
    #[arg(long, conflicts_with = "builtin")]
    file: Option<PathBuf>,

    /// Builtin policy name
    #[arg(long)]
    builtin: Option<String>,
}

#[derive(Args, Debug)]
struct PromptFlags {
    /// Prompt text as the agent printed it
    #[arg(long)]
    text: String,

    /// yes_no, confirm_enter, multiple_choice, or free_text
    #[arg(long = "type", default_value = "yes_no")]
    prompt_type: String,

    /// low, medium, or high
    #[arg(long, default_value = "high")]
    confidence: String,

    #[arg(long)]
    tool: Option<String>,

    #[arg(long)]
    repo: Option<String>,

    #[arg(long)]
    session_tag: Option<String>,

    #[arg(long)]
    environment: Option<String>,
}

impl From<PromptFlags> for PromptArgs {
    fn from(flags: PromptFlags) -> Self {
        PromptArgs {
            text: flags.text,
            prompt_type: flags.prompt_type,
            confidence: flags.confidence,
            tool: flags.tool,
            repo: flags.repo,
            session_tag: flags.session_tag,
            environment: flags.environment,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_arg = cli.config.as_deref();

    match cli.command {
        Commands::Init { dir, policy, force } => commands::init::run(&dir, &policy, force),
        Commands::Audit { action } => {
            let config = commands::config::load_config(config_arg)?;
            match action {
                AuditCommands::Verify { session, json } => {
                    if !commands::audit::verify(&config, session.as_deref(), json)? {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                AuditCommands::Tail { last, session } => {
                    commands::audit::tail(&config, last, session.as_deref())
                }
            }
        }
        Commands::Trace { action } => {
            let config = commands::config::load_config(config_arg)?;
            match action {
                TraceCommands::Tail { last, json } => commands::trace::tail(&config, last, json),
            }
        }
        Commands::Engine { action } => {
            let config = commands::config::load_config(config_arg)?;
            match action {
                EngineCommands::Status => commands::engine::status(&config),
                EngineCommands::Pause { reason } => {
                    commands::engine::set(&config, EngineMode::Paused, reason).map(|_| ())
                }
                EngineCommands::Resume { reason } => {
                    commands::engine::set(&config, EngineMode::Running, reason).map(|_| ())
                }
                EngineCommands::Stop { reason } => {
                    commands::engine::set(&config, EngineMode::Stopped, reason).map(|_| ())
                }
            }
        }
        Commands::Policy { action } => match action {
            PolicyCommands::Check { source } => {
                let config = commands::config::load_config(config_arg)?;
                commands::policy::check(&config, source.file.as_deref(), source.builtin.as_deref())
            }
            PolicyCommands::List => {
                commands::policy::list();
                Ok(())
            }
            PolicyCommands::Show { name } => commands::policy::show(&name),
            PolicyCommands::Explain {
                source,
                prompt,
                json,
            } => {
                let config = commands::config::load_config(config_arg)?;
                commands::policy::explain(
                    &config,
                    source.file.as_deref(),
                    source.builtin.as_deref(),
                    &prompt.into(),
                    json,
                )
            }
        },
        Commands::Simulate {
            source,
            prompt,
            reply,
            record,
        } => {
            let config = commands::config::load_config(config_arg)?;
            let policy = commands::policy::load_policy(
                &config,
                source.file.as_deref(),
                source.builtin.as_deref(),
            )?;
            commands::simulate::run(&config, policy, &prompt.into(), reply.as_deref(), record)
        }
    }
}
