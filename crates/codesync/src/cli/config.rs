//! Config command handlers

use std::path::{Path, PathBuf};

use codesync_core::config::Config;

use crate::cli::args::ConfigCommands;
use crate::cli::load_config;

pub fn handle_config_command(command: Option<ConfigCommands>, path: Option<PathBuf>) -> bool {
    match command {
        None | Some(ConfigCommands::Show) => show_config(path.as_deref()),
        Some(ConfigCommands::Init { force }) => init_config(path.as_deref(), force),
    }
}

/// Show the effective configuration
fn show_config(path: Option<&Path>) -> bool {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    println!("Codesync Configuration");
    println!("======================");
    println!("Debounce: {} ms", config.debounce_ms);
    println!("Text name: {}", config.text_name);
    println!("Poll interval: {} ms", config.poll_interval_ms);
    println!("Default kind: {}", config.default_kind);

    match resolve_path(path) {
        Some(file) if file.exists() => println!("Config file: {}", file.display()),
        Some(file) => println!("Config file: {} (not created, using defaults)", file.display()),
        None => println!("Config file: none (no config directory)"),
    }
    true
}

/// Write the default config, refusing to clobber an existing file unless forced
fn init_config(path: Option<&Path>, force: bool) -> bool {
    let Some(file) = resolve_path(path) else {
        eprintln!("✗ Could not determine a config directory");
        return false;
    };

    if file.exists() && !force {
        eprintln!(
            "✗ Config already exists at {} (use --force to overwrite)",
            file.display()
        );
        return false;
    }

    let written = match path {
        Some(path) => Config::default().save_to(path),
        None => Config::init().map(|_| ()),
    };
    match written {
        Ok(()) => {
            println!("✓ Wrote default config to {}", file.display());
            true
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    path.map(Path::to_path_buf).or_else(Config::config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("config.toml");

        assert!(init_config(Some(&file), false));
        assert_eq!(Config::load_from(&file).unwrap(), Config::default());
        assert!(show_config(Some(&file)));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "debounce_ms = 5\n").unwrap();

        assert!(!init_config(Some(&file), false));
        assert_eq!(Config::load_from(&file).unwrap().debounce_ms, 5);

        assert!(init_config(Some(&file), true));
        assert_eq!(Config::load_from(&file).unwrap().debounce_ms, 100);
    }

    #[test]
    fn test_show_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "debounce_ms = \"soon\"\n").unwrap();
        assert!(!show_config(Some(&file)));
    }
}
