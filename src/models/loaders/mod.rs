pub mod toml_loader;

pub use toml_loader::{load_all_run_files, load_run_definition};
