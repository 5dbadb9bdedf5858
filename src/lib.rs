//! # dbai (library root)
//!
//! Chat with a relational database. A question goes to an OpenAI compatible
//! model that can look at the database structure, have SQL generated for it and
//! run that SQL; the answer, and every statement executed on the way, are
//! stored per conversation.
//!
//! - Connected database access (`source`) and schema discovery (`discovery`,
//!   `snapshot`), with model-written column descriptions (`descriptions`).
//! - The model port (`llm`), its tools (`tools`), the prompt (`template`) and the
//!   turn loop (`assistant`). Question ideas come from `suggestions`.
//! - Conversation storage in SQLite (`conversations`, `models`, `schema`).
//! - Configuration, CLI and HTTP transport (`config`, `commands`, `server`).
//!
//! ## Modules
//! - [`assistant`], [`commands`], [`config`], [`conversations`], [`descriptions`],
//!   [`discovery`], [`error`], [`llm`], [`models`], [`schema`], [`server`],
//!   [`snapshot`], [`source`], [`suggestions`], [`template`], [`tools`]

use directories::ProjectDirs;

pub mod assistant;
pub mod commands;
pub mod config;
pub mod conversations;
pub mod descriptions;
pub mod discovery;
pub mod error;
pub mod llm;
pub mod models;
pub mod schema;
pub mod server;
pub mod snapshot;
pub mod source;
pub mod suggestions;
pub mod template;
pub mod tools;

#[cfg(test)]
mod testing;

/// Return the per-platform configuration directory used by dbai.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "dbai", "dbai")`, so you get the right place on each OS
/// (e.g., `~/.config/dbai` on Linux).
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns [`error::DbaiError::Configuration`] if the platform configuration
/// directory cannot be determined.
///
/// # Examples
/// ```rust
/// let cfg = dbai::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> error::Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "dbai", "dbai").ok_or_else(|| {
        error::DbaiError::Configuration("Unable to determine config directory".to_string())
    })?;

    Ok(proj_dirs.config_dir().to_path_buf())
}
