pub mod choice;
pub mod cli;
pub mod config;
pub mod engine;
pub mod preferences;
pub mod profile;
pub mod registry;
pub mod telemetry;
pub mod ui;

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, info_span, warn};

use crate::choice::{record_choice, rewrite_url, session_default_remember, should_auto_launch};
use crate::config::{APP_ID, ChooserSettings};
use crate::engine::{CommandSpec, build_args};
use crate::preferences::PreferenceStore;
use crate::profile::{ProfileDescriptor, list_profiles};
use crate::registry::{
    BrowserDescriptor, HostRegistry, is_already_default_handler, is_multi_profile_family, is_self,
};

/// Where a chooser run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChooserPhase {
    Init,
    Discovering,
    AwaitingChoice,
    AutoLaunching,
    UserLaunching,
    Launched,
}

/// One launcher entry: a browser, optionally pinned to one of its profiles.
#[derive(Debug, Clone)]
pub struct LauncherCandidate {
    pub browser: BrowserDescriptor,
    pub profile: Option<ProfileDescriptor>,
    pub label: String,
    /// Matches the saved choice for the current URL.
    pub auto: bool,
}

impl LauncherCandidate {
    pub fn profile_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|profile| profile.directory.as_str())
    }
}

/// Answer to the "set as default browser" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPromptResponse {
    Accept,
    Reject,
    Dismiss,
}

/// A single chooser run: discovery, saved choices and the final launch.
pub struct Chooser<R: HostRegistry> {
    settings: ChooserSettings,
    settings_path: Option<PathBuf>,
    store: PreferenceStore,
    registry: R,
    url: String,
    remember: bool,
    execute: bool,
    candidates: Vec<LauncherCandidate>,
    phase: ChooserPhase,
}

impl<R: HostRegistry> Chooser<R> {
    pub fn new(
        settings: ChooserSettings,
        store: PreferenceStore,
        registry: R,
        url: Option<String>,
    ) -> Self {
        let remember = session_default_remember(&store, url.as_deref());
        Self {
            settings,
            settings_path: None,
            store,
            registry,
            url: url.unwrap_or_default(),
            remember,
            execute: true,
            candidates: Vec::new(),
            phase: ChooserPhase::Init,
        }
    }

    /// Persist settings changes (e.g. "Never ask again") to `path`.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    /// Build commands without spawning them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.execute = !dry_run;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn phase(&self) -> ChooserPhase {
        self.phase
    }

    pub fn settings(&self) -> &ChooserSettings {
        &self.settings
    }

    #[cfg(test)]
    fn store(&self) -> &PreferenceStore {
        &self.store
    }

    #[cfg(test)]
    fn registry(&self) -> &R {
        &self.registry
    }

    pub fn candidates(&self) -> &[LauncherCandidate] {
        &self.candidates
    }

    pub fn remember(&self) -> bool {
        self.remember
    }

    /// "Once" (`false`) or "Always" (`true`) for the next activation.
    pub fn set_remember(&mut self, remember: bool) {
        self.remember = remember;
    }

    pub fn remember_label(&self) -> &'static str {
        if self.remember {
            "Remember this answer."
        } else {
            "Ask again next time."
        }
    }

    /// Discover browsers and profiles and mark the saved choice, if any.
    pub fn populate(&mut self) -> Result<()> {
        let _span = info_span!("discover", url = %self.url).entered();
        self.phase = ChooserPhase::Discovering;
        self.candidates.clear();

        let handlers = self
            .registry
            .handlers_for(&self.settings.browse_content_type)?;
        let profile_root = self.settings.resolve_chrome_profile_root();

        for mut browser in handlers {
            if is_self(&browser, APP_ID) {
                continue;
            }
            browser.multi_profile =
                is_multi_profile_family(&browser, &self.settings.multi_profile_family);
            let profiles = match (&profile_root, browser.multi_profile) {
                (Some(root), true) => list_profiles(root),
                _ => Vec::new(),
            };

            self.push_candidate(browser.clone(), None);
            for profile in profiles {
                self.push_candidate(browser.clone(), Some(profile));
            }
        }

        info!(count = self.candidates.len(), "populated chooser");
        self.phase = ChooserPhase::AwaitingChoice;
        Ok(())
    }

    fn push_candidate(&mut self, browser: BrowserDescriptor, profile: Option<ProfileDescriptor>) {
        let label = match &profile {
            Some(profile) => profile.display_name.clone(),
            None => browser.display_name.clone(),
        };
        let profile_id = profile.as_ref().map(|profile| profile.directory.as_str());
        let auto = should_auto_launch(&self.store, &self.url, &browser.id, profile_id);
        self.candidates.push(LauncherCandidate {
            browser,
            profile,
            label,
            auto,
        });
    }

    /// The candidate to launch without asking: exactly one saved match.
    pub fn auto_launch_index(&self) -> Option<usize> {
        let matches: Vec<usize> = self
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.auto)
            .map(|(index, _)| index)
            .collect();
        match matches.as_slice() {
            [index] => Some(*index),
            [] => None,
            _ => {
                warn!(
                    count = matches.len(),
                    "several launchers match the saved choice; asking instead"
                );
                None
            }
        }
    }

    /// Fire the saved choice, if there is one.
    pub fn auto_launch(&mut self) -> Result<Option<LaunchOutcome>> {
        let Some(index) = self.auto_launch_index() else {
            return Ok(None);
        };
        self.phase = ChooserPhase::AutoLaunching;
        self.dispatch(index).map(Some)
    }

    /// Handle a launcher activation by the user.
    pub fn activate(&mut self, index: usize) -> Result<LaunchOutcome> {
        if index >= self.candidates.len() {
            bail!("No launcher at position {index}");
        }
        self.phase = ChooserPhase::UserLaunching;
        self.dispatch(index)
    }

    fn dispatch(&mut self, index: usize) -> Result<LaunchOutcome> {
        let candidate = self.candidates[index].clone();
        let profile = candidate.profile_id();
        record_choice(
            &mut self.store,
            &self.url,
            &candidate.browser.id,
            profile,
            self.remember,
        )?;

        let url = rewrite_url(&self.store, &self.url);
        let args = build_args(&url, profile, candidate.browser.multi_profile);
        let command = self.registry.command_for(&candidate.browser, &args)?;
        let pid = if self.execute {
            self.registry.spawn(&command)?
        } else {
            None
        };
        self.phase = ChooserPhase::Launched;
        info!(
            browser = %candidate.browser.display_name,
            profile = ?profile,
            executed = self.execute,
            "opening browser"
        );

        Ok(LaunchOutcome {
            label: candidate.label.clone(),
            browser_id: candidate.browser.id.clone(),
            profile: profile.map(str::to_string),
            url,
            command,
            pid,
            executed: self.execute,
        })
    }

    /// Whether to offer registering the chooser as default browser.
    pub fn should_offer_default(&self) -> bool {
        self.settings.ask_default
            && !is_already_default_handler(
                &self.registry,
                &self.settings.browse_content_type,
                APP_ID,
            )
    }

    pub fn respond_to_default_prompt(&mut self, response: DefaultPromptResponse) -> Result<()> {
        match response {
            DefaultPromptResponse::Accept => {
                self.registry
                    .ensure_installed(APP_ID, &self.settings.content_types)?;
                for content_type in &self.settings.content_types {
                    if let Err(err) = self.registry.set_default_for(APP_ID, content_type) {
                        warn!(
                            content_type = %content_type,
                            error = %err,
                            "Unable to register as default handler"
                        );
                    }
                }
            }
            DefaultPromptResponse::Reject => {
                self.settings.ask_default = false;
                if let Some(path) = &self.settings_path {
                    self.settings.save(path)?;
                }
            }
            DefaultPromptResponse::Dismiss => {}
        }
        Ok(())
    }
}

/// Result of dispatching a launcher.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub label: String,
    pub browser_id: String,
    pub profile: Option<String>,
    /// URL after redirect rules.
    pub url: String,
    pub command: CommandSpec,
    pub pid: Option<u32>,
    executed: bool,
}

impl LaunchOutcome {
    pub fn executed(&self) -> bool {
        self.executed
    }
}
