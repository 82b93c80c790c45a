mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dbrowse_adapters::chat::OllamaAssistant;
use dbrowse_adapters::connector::DriverConnector;
use dbrowse_core::chat::ChatAssistant;
use dbrowse_core::config::{default_config_dir, FileConfigStore, CONFIG_FILE_NAME};
use dbrowse_core::history::FileHistoryStore;
use dbrowse_tui::context::AppContext;
use dbrowse_tui::Launch;

/// Terminal browser for MySQL and SQLite databases.
#[derive(Debug, Parser)]
#[command(name = "dbrowse", version, about)]
struct Cli {
    /// Saved connection to open at startup.
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,

    /// Directory holding config.toml and history.json.
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,
}

/// Loads the stores and collaborators. Problems that should not stop the
/// UI from starting are reported through `startup_error`.
fn prepare(cli: &Cli) -> Launch {
    let mut startup_error = None;

    let config_dir = match cli.config_dir.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => dir,
        Err(error) => {
            startup_error = Some(error.to_string());
            PathBuf::from(".")
        }
    };
    let config = match FileConfigStore::load_from_dir(&config_dir) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "config could not be loaded");
            startup_error = Some(error.to_string());
            FileConfigStore::with_defaults(config_dir.join(CONFIG_FILE_NAME))
        }
    };

    let history_settings = config.config().history.clone();
    let history = FileHistoryStore::load_from_dir(&config_dir, &history_settings)
        .unwrap_or_else(|error| {
            tracing::warn!(%error, "history could not be loaded, keeping it in memory");
            FileHistoryStore::in_memory(history_settings.max_entries)
        });

    let assistant: Option<Arc<dyn ChatAssistant>> =
        match OllamaAssistant::new(&config.config().ai.endpoint) {
            Ok(assistant) => Some(Arc::new(assistant)),
            Err(error) => {
                tracing::warn!(%error, "AI assistant unavailable");
                None
            }
        };

    let auto_connect = cli.profile.as_deref().and_then(|name| {
        let profile = config.profile(name).cloned();
        if profile.is_none() && startup_error.is_none() {
            startup_error = Some(format!("no saved connection named `{name}`"));
        }
        profile
    });

    tracing::info!(
        config = %config.path().display(),
        profiles = config.profiles().len(),
        "starting"
    );
    Launch {
        context: AppContext::new(config, history, Arc::new(DriverConnector), assistant),
        startup_error,
        auto_connect,
    }
}

fn run_app(
    cli: &Cli,
    run_tui: impl FnOnce(Launch) -> Result<(), dbrowse_tui::TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    run_tui(prepare(cli))?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _guard = match logging::init() {
        Ok((path, guard)) => {
            tracing::info!(log = %path.display(), "logging initialized");
            Some(guard)
        }
        Err(error) => {
            eprintln!("dbrowse: logging disabled: {error}");
            None
        }
    };
    run_app(&cli, dbrowse_tui::run)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;

    use clap::Parser;
    use tempfile::TempDir;

    use super::{prepare, run_app, Cli};

    fn cli(dir: &TempDir, profile: Option<&str>) -> Cli {
        let mut args = vec![
            "dbrowse".to_string(),
            "--config-dir".to_string(),
            dir.path().display().to_string(),
        ];
        if let Some(profile) = profile {
            args.extend(["--profile".to_string(), profile.to_string()]);
        }
        Cli::parse_from(args)
    }

    #[test]
    fn saved_profile_is_connected_at_startup() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join("config.toml"),
            "[[connections]]\nname = \"notes\"\nkind = \"sqlite\"\ndatabase = \"notes.db\"\n",
        )
        .expect("write config");

        let launch = prepare(&cli(&dir, Some("notes")));
        assert!(launch.startup_error.is_none());
        assert_eq!(
            launch.auto_connect.map(|profile| profile.name),
            Some("notes".to_string())
        );
        assert!(launch.context.assistant.is_some());
    }

    #[test]
    fn unknown_profile_starts_in_the_fatal_state() {
        let dir = TempDir::new().expect("temp dir");
        let launch = prepare(&cli(&dir, Some("prod")));
        assert!(launch.auto_connect.is_none());
        assert_eq!(
            launch.startup_error.as_deref(),
            Some("no saved connection named `prod`")
        );
    }

    #[test]
    fn unreadable_config_is_reported_and_defaults_are_used() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("config.toml"), "page_size = [").expect("write config");

        let launch = prepare(&cli(&dir, None));
        let message = launch.startup_error.expect("startup error");
        assert!(message.starts_with("failed to parse config file"));
        assert_eq!(launch.context.config.config().page_size, 50);
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let dir = TempDir::new().expect("temp dir");
        assert!(run_app(&cli(&dir, None), |_| Ok(())).is_ok());

        let result = run_app(&cli(&dir, None), |_| {
            Err(dbrowse_tui::TuiError::Io(io::Error::other("boom")))
        });
        assert!(result.is_err());
    }
}
