use anyhow::Result;
use clap::{Parser, Subcommand};
use fireball::commands::{
    add_binary_command, decompile_command, decompile_file_command, init_project_command,
    list_binaries_command, list_runs_command, list_sections_command, project_info_command,
    run_spec_command, show_run_command,
};
use tracing_subscriber::EnvFilter;

/// Incremental decompiler for native binaries.
///
/// This CLI is a thin wrapper around `fireball-core` (exposed in code as `fireball_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(name = "fireball", version, about = "Incremental decompiler for native binaries", long_about = None)]
struct Cli {
    /// Log engine progress (debug level) to stderr. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new fireball project at the given root.
    ///
    /// This will:
    /// - Create a `.fireball` metadata directory with `project.json` and the project database.
    /// - Create `specs` and `outputs` directories.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,

        /// Architecture assumed for binaries whose format does not say (e.g., x86_64, arm64).
        #[arg(long)]
        arch: Option<String>,
    },

    /// Show basic information about an existing project.
    ProjectInfo {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Register a binary in the project database.
    AddBinary {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Path to the binary to register.
        #[arg(long)]
        path: String,

        /// Optional human-friendly name. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Optional architecture override (e.g., x86_64, arm64).
        #[arg(long)]
        arch: Option<String>,

        /// Optional precomputed hash. If omitted, the CLI computes SHA-256 unless `--skip-hash` is set.
        #[arg(long)]
        hash: Option<String>,

        /// Skip hash computation (stores no hash).
        #[arg(long, default_value_t = false)]
        skip_hash: bool,
    },

    /// List all binaries registered in the project database.
    ListBinaries {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Decompile a registered binary from one or more entries.
    ///
    /// Reuses the binary's known sections from earlier runs and stores the
    /// run, its result and the updated sections.
    Decompile {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Name of the registered binary.
        #[arg(long)]
        binary: String,

        /// Entry address (hex or decimal) or symbol name. Repeatable; defaults to the binary's entry point.
        #[arg(long = "entry")]
        entries: Vec<String>,

        /// Stop after this many instructions (overrides the project default).
        #[arg(long)]
        max_instructions: Option<usize>,

        /// Ignore known sections from earlier runs.
        #[arg(long, default_value_t = false)]
        fresh: bool,

        /// Emit JSON instead of pseudocode.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Decompile a file without a project.
    DecompileFile {
        /// Path to an ELF, PE or Mach-O file, or a raw blob with `--base`.
        #[arg(long)]
        path: String,

        /// Entry address (hex or decimal) or symbol name. Repeatable; defaults to the file's entry point.
        #[arg(long = "entry")]
        entries: Vec<String>,

        /// Architecture override; required for raw blobs.
        #[arg(long)]
        arch: Option<String>,

        /// Treat the file as a raw blob loaded at this address.
        #[arg(long)]
        base: Option<String>,

        /// Stop after this many instructions.
        #[arg(long)]
        max_instructions: Option<usize>,

        /// Emit JSON instead of pseudocode.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run a YAML/JSON batch spec: several targets of one binary, decompiled concurrently.
    RunSpec {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Spec file (absolute, relative to the root, or under `specs/`).
        #[arg(long)]
        file: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List the known sections recorded for a binary.
    ListSections {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        binary: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List decompile runs.
    ListRuns {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Only runs of this binary.
        #[arg(long)]
        binary: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show a stored run with its pseudocode.
    ShowRun {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        id: i64,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::InitProject { root, name, arch } => init_project_command(&root, name, arch)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::AddBinary { root, path, name, arch, hash, skip_hash } => {
            add_binary_command(&root, &path, name, arch, hash, skip_hash)?
        }
        Command::ListBinaries { root, json } => list_binaries_command(&root, json)?,
        Command::Decompile { root, binary, entries, max_instructions, fresh, json } => {
            decompile_command(&root, &binary, &entries, max_instructions, fresh, json)?
        }
        Command::DecompileFile { path, entries, arch, base, max_instructions, json } => {
            decompile_file_command(&path, &entries, arch, base, max_instructions, json)?
        }
        Command::RunSpec { root, file, json } => run_spec_command(&root, &file, json)?,
        Command::ListSections { root, binary, json } => list_sections_command(&root, &binary, json)?,
        Command::ListRuns { root, binary, json } => list_runs_command(&root, binary, json)?,
        Command::ShowRun { root, id, json } => show_run_command(&root, id, json)?,
    }

    Ok(())
}
