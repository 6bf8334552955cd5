//! Project persistence: on-disk layout, config, and the SQLite project
//! database that stores binaries, their address-space index, and decompile
//! runs.

mod config;
mod context;
mod layout;
mod models;
mod project_db;
mod util;

pub use config::{DbConfig, DecompileOptions, ProjectConfig};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use models::{BinaryRecord, DecompileRunRecord, RunStatus};
pub use project_db::{DbError, DbResult, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, save_project_config};
