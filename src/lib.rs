pub mod backend;
pub mod icon;
pub mod settings;
pub mod workflow;

use std::path::PathBuf;

pub fn default_app_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}
