use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeledger::commands::{project, stage, status, transfer};
use pipeledger::config::Config;
use pipeledger::logging;
use pipeledger::models::{ProjectId, ProjectKind, StageId};
use pipeledger::validation::{clap_description_validator, clap_file_name_validator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipeledger")]
#[command(about = "Stage log, config store and invalidation for data pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a config file (default: ./pipeledger.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by PIPELEDGER_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project and print its id
    New {
        /// Pipeline variant: normalize or link
        kind: ProjectKind,

        /// Free-text description (max 500 characters)
        #[arg(short, long, value_parser = clap_description_validator)]
        description: Option<String>,

        /// Name shown in listings
        #[arg(short = 'n', long)]
        display_name: Option<String>,

        /// Make the project visible to other users
        #[arg(long)]
        public: bool,
    },

    /// List projects
    List {
        /// Only list projects of this kind
        kind: Option<ProjectKind>,
    },

    /// Delete a project and all of its documents
    Delete {
        project_id: ProjectId,

        /// Confirm the deletion (irreversible)
        #[arg(long)]
        yes: bool,
    },

    /// Print whether a project exists
    Exists {
        kind: ProjectKind,
        project_id: ProjectId,
    },

    /// Print a project's metadata document
    Metadata { project_id: ProjectId },

    /// Show the stage log of a project
    Status {
        project_id: ProjectId,

        /// Only show this file
        #[arg(short, long, value_parser = clap_file_name_validator)]
        file: Option<String>,
    },

    /// Print where the current version of the data lives
    LastWritten {
        project_id: ProjectId,

        /// Only consider this stage
        #[arg(short, long)]
        stage: Option<StageId>,

        /// Only consider this file
        #[arg(short, long, value_parser = clap_file_name_validator)]
        file: Option<String>,

        /// Only consider stages ranked strictly below this one
        #[arg(short, long)]
        before: Option<StageId>,
    },

    /// Mark a stage as not applicable to a file
    SetSkip {
        project_id: ProjectId,
        stage: StageId,

        #[arg(value_parser = clap_file_name_validator)]
        file: String,

        /// Clear the skip flag instead of setting it
        #[arg(long)]
        unskip: bool,
    },

    /// Replace the selected columns of a normalize project
    SelectColumns {
        project_id: ProjectId,

        /// Columns to select (must be in the uploaded header)
        #[arg(required = true, num_args = 1..)]
        columns: Vec<String>,
    },

    /// Export stage parameters as JSON
    Export {
        project_id: ProjectId,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import stage parameters produced by export
    Import {
        project_id: ProjectId,
        input: PathBuf,
    },

    /// Close stages that were started but never ended
    Reap {
        project_id: ProjectId,

        /// Only list them
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::New {
            kind,
            description,
            display_name,
            public,
        } => project::new(&config, kind, description, display_name, public),
        Commands::List { kind } => project::list(&config, kind),
        Commands::Delete { project_id, yes } => project::delete(&config, project_id, yes),
        Commands::Exists { kind, project_id } => project::exists(&config, kind, project_id),
        Commands::Metadata { project_id } => project::metadata(&config, project_id),
        Commands::Status { project_id, file } => status::execute(&config, project_id, file),
        Commands::LastWritten {
            project_id,
            stage,
            file,
            before,
        } => status::last_written(&config, project_id, stage, file, before),
        Commands::SetSkip {
            project_id,
            stage: stage_id,
            file,
            unskip,
        } => stage::set_skip(&config, project_id, stage_id, file, unskip),
        Commands::SelectColumns {
            project_id,
            columns,
        } => stage::select_columns(&config, project_id, columns),
        Commands::Export { project_id, output } => {
            transfer::export(&config, project_id, output.as_deref())
        }
        Commands::Import { project_id, input } => transfer::import(&config, project_id, &input),
        Commands::Reap {
            project_id,
            dry_run,
        } => stage::reap(&config, project_id, dry_run),
    }
}
