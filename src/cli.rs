use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use crate::{
    Chooser, LauncherCandidate,
    config::{APP_ID, ChooserSettings, default_config_path},
    preferences::PreferenceStore,
    registry::{HostRegistry, XdgRegistry},
    telemetry, ui,
};

#[derive(Parser, Debug)]
#[command(name = "crossroads", author = "GhostKellz", version, about = "Pick a browser for every link", long_about = None)]
pub struct Cli {
    /// URL to open.
    pub url: Option<String>,

    /// Custom settings path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-domain preference file (defaults to the first readable crossroads.ini).
    #[arg(long, value_name = "FILE")]
    pub preferences: Option<PathBuf>,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Print the browser command instead of spawning it.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// List launchers for the URL and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub list: bool,

    /// Print saved per-domain preferences and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub list_preferences: bool,

    /// Drop every saved setting for DOMAIN and exit.
    #[arg(long, value_name = "DOMAIN")]
    pub forget: Option<String>,

    /// Rewrite DOMAIN to TARGET before launching (DOMAIN=TARGET).
    #[arg(long, value_name = "DOMAIN=TARGET", value_parser = parse_redirect)]
    pub redirect: Option<(String, String)>,

    /// Register Crossroads as default handler for the configured content types and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub set_default: bool,
}

fn parse_redirect(raw: &str) -> Result<(String, String)> {
    let (domain, target) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected DOMAIN=TARGET, got '{raw}'"))?;
    let (domain, target) = (domain.trim(), target.trim());
    if domain.is_empty() || target.is_empty() {
        return Err(anyhow!("expected DOMAIN=TARGET, got '{raw}'"));
    }
    Ok((domain.to_string(), target.to_string()))
}

fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.clone())?;
    let settings = ChooserSettings::load_or_default(&config_path)?;
    telemetry::init_tracing(cli.verbose, &settings.logging)?;
    info!(path = %config_path.display(), "using settings");
    if let Some(log_file) = telemetry::current_log_file() {
        info!(path = %log_file.display(), "logging to file");
    }

    let mut store = match &cli.preferences {
        Some(path) => PreferenceStore::load(Some(path)),
        None => PreferenceStore::from_env(),
    };
    if let Some(target) = store.target() {
        info!(path = %target.display(), "using preferences");
    }

    if manage_preferences(&cli, &mut store)? {
        return Ok(());
    }

    let registry = XdgRegistry::from_env()?;
    if cli.set_default {
        return register_default(&registry, &settings);
    }

    let mut chooser = Chooser::new(settings, store, registry, cli.url.clone())
        .with_settings_path(config_path)
        .dry_run(cli.dry_run);
    chooser.populate()?;

    if cli.list {
        print_candidates(&chooser);
        return Ok(());
    }

    let outcome = match chooser.auto_launch()? {
        Some(outcome) => Some(outcome),
        None => ui::run(&mut chooser)?,
    };

    if let Some(outcome) = outcome {
        info!(
            launcher = %outcome.label,
            url = %outcome.url,
            pid = ?outcome.pid,
            executed = outcome.executed(),
            "launch dispatched"
        );
        if !outcome.executed() {
            println!("{}", outcome.command.describe());
        }
    }

    info!("Bye");
    Ok(())
}

/// Handle the preference-file flags. Returns `true` when nothing else should run.
fn manage_preferences(cli: &Cli, store: &mut PreferenceStore) -> Result<bool> {
    let mut handled = false;

    if let Some(domain) = &cli.forget {
        if store.clear(domain)? {
            println!("Forgot {domain}");
        } else {
            println!("Nothing saved for {domain}");
        }
        handled = true;
    }

    if let Some((domain, target)) = &cli.redirect {
        store.set_redirect(domain, target)?;
        println!("{domain} -> {target}");
        handled = true;
    }

    if cli.list_preferences {
        let entries = store.entries();
        if entries.is_empty() {
            println!("No saved preferences.");
        }
        for entry in entries {
            println!("[{}]", entry.domain);
            if let Some(browser) = &entry.browser_id {
                println!("    browser   : {browser}");
            }
            if let Some(profile) = &entry.profile {
                println!("    profile   : {profile}");
            }
            if entry.keep_asking {
                println!("    keepasking: true");
            }
            if let Some(redirect) = &entry.redirect {
                println!("    redirect  : {redirect}");
            }
        }
        handled = true;
    }

    Ok(handled)
}

fn register_default<R: HostRegistry>(registry: &R, settings: &ChooserSettings) -> Result<()> {
    registry.ensure_installed(APP_ID, &settings.content_types)?;
    for content_type in &settings.content_types {
        match registry.set_default_for(APP_ID, content_type) {
            Ok(()) => println!("{APP_ID} now handles {content_type}"),
            Err(err) => warn!(
                content_type = %content_type,
                error = %err,
                "Unable to register as default handler"
            ),
        }
    }
    Ok(())
}

fn print_candidates<R: HostRegistry>(chooser: &Chooser<R>) {
    if chooser.candidates().is_empty() {
        println!("No browsers registered for {}", chooser.settings().browse_content_type);
        return;
    }
    for (index, candidate) in chooser.candidates().iter().enumerate() {
        println!("{}", candidate_line(index, candidate));
    }
}

/// One `--list` row: auto marker, index, label, desktop id, then profile and avatar.
fn candidate_line(index: usize, candidate: &LauncherCandidate) -> String {
    let marker = if candidate.auto { "*" } else { " " };
    let mut line = format!(
        "{marker} {index:>2}  {} [{}]",
        candidate.label, candidate.browser.id
    );
    if let Some(profile) = &candidate.profile {
        line.push_str(&format!(" ({})", profile.directory));
        if let Some(avatar) = &profile.avatar {
            line.push_str(&format!(" avatar: {}", avatar.display()));
        }
    }
    line
}
