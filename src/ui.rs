//! Terminal chooser: one row per launcher plus the "Once"/"Always" toggle, the
//! default-browser prompt, About and Quit.

use std::io::{self, IsTerminal};

use anyhow::{Result, bail};
use dialoguer::{Select, theme::ColorfulTheme};
use tracing::info;

use crate::registry::HostRegistry;
use crate::{Chooser, DefaultPromptResponse, LaunchOutcome};

const ABOUT: &str = concat!(
    "Crossroads ",
    env!("CARGO_PKG_VERSION"),
    " - pick a browser for every link"
);

/// A selectable row of the chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuItem {
    Launch(usize),
    ToggleRemember,
    About,
    Quit,
}

/// Rows in display order with their labels.
pub fn menu_items<R: HostRegistry>(chooser: &Chooser<R>) -> Vec<(MenuItem, String)> {
    let mut items: Vec<(MenuItem, String)> = chooser
        .candidates()
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let label = if candidate.profile.is_some() {
                format!("{} ({})", candidate.label, candidate.browser.display_name)
            } else {
                candidate.label.clone()
            };
            (MenuItem::Launch(index), label)
        })
        .collect();

    let toggle = if chooser.remember() {
        format!("{} [Always] switch to Once", chooser.remember_label())
    } else {
        format!("{} [Once] switch to Always", chooser.remember_label())
    };
    items.push((MenuItem::ToggleRemember, toggle));
    items.push((MenuItem::About, "About".into()));
    items.push((MenuItem::Quit, "Quit".into()));
    items
}

/// Rows of the "set as default" prompt.
pub fn default_prompt_items() -> [(DefaultPromptResponse, &'static str); 3] {
    [
        (DefaultPromptResponse::Accept, "Set as Default"),
        (DefaultPromptResponse::Reject, "Never ask again"),
        (DefaultPromptResponse::Dismiss, "Not now"),
    ]
}

/// Run the interactive chooser until a browser is launched or the user quits.
pub fn run<R: HostRegistry>(chooser: &mut Chooser<R>) -> Result<Option<LaunchOutcome>> {
    if !(io::stdin().is_terminal() && io::stderr().is_terminal()) {
        bail!("No terminal available for the chooser; pass --list to inspect launchers");
    }
    let theme = ColorfulTheme::default();

    if chooser.url().is_empty() {
        eprintln!("No URL provided");
    } else {
        eprintln!("Open {}", chooser.url());
    }

    if chooser.should_offer_default() {
        let options = default_prompt_items();
        let labels: Vec<&str> = options.iter().map(|(_, label)| *label).collect();
        let selection = Select::with_theme(&theme)
            .with_prompt("Set Crossroads as your default browser")
            .items(&labels)
            .default(2)
            .interact_opt()?;
        let response = selection
            .map(|index| options[index].0)
            .unwrap_or(DefaultPromptResponse::Dismiss);
        chooser.respond_to_default_prompt(response)?;
    }

    if chooser.candidates().is_empty() {
        bail!("No browsers registered for {}", chooser.settings().browse_content_type);
    }

    let mut cursor = 0;
    loop {
        let items = menu_items(chooser);
        let labels: Vec<&str> = items.iter().map(|(_, label)| label.as_str()).collect();
        let selection = Select::with_theme(&theme)
            .with_prompt("Open with")
            .items(&labels)
            .default(cursor.min(labels.len() - 1))
            .interact_opt()?;
        let Some(index) = selection else {
            info!("chooser dismissed");
            return Ok(None);
        };
        cursor = index;

        match &items[index].0 {
            MenuItem::Launch(candidate) => return chooser.activate(*candidate).map(Some),
            MenuItem::ToggleRemember => {
                let remember = !chooser.remember();
                chooser.set_remember(remember);
            }
            MenuItem::About => eprintln!("{ABOUT}"),
            MenuItem::Quit => {
                info!("Bye");
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChooserSettings;
    use crate::engine::CommandSpec;
    use crate::preferences::PreferenceStore;
    use crate::registry::BrowserDescriptor;
    use std::fs;
    use tempfile::tempdir;

    struct StaticRegistry(Vec<BrowserDescriptor>);

    impl HostRegistry for StaticRegistry {
        fn handlers_for(&self, _content_type: &str) -> Result<Vec<BrowserDescriptor>> {
            Ok(self.0.clone())
        }

        fn default_for(&self, _content_type: &str) -> Option<BrowserDescriptor> {
            None
        }

        fn set_default_for(&self, _app_id: &str, _content_type: &str) -> Result<()> {
            Ok(())
        }

        fn app_by_id(&self, id: &str) -> Option<BrowserDescriptor> {
            self.0.iter().find(|b| b.id == id).cloned()
        }

        fn spawn(&self, _command: &CommandSpec) -> Result<Option<u32>> {
            Ok(None)
        }
    }

    #[test]
    fn menu_lists_launchers_then_controls() {
        let temp = tempdir().unwrap();
        let chrome_root = temp.path().join("chrome");
        fs::create_dir_all(chrome_root.join("Default")).unwrap();
        fs::write(
            chrome_root.join("Default/Preferences"),
            r#"{"profile": {"name": "Personal"}}"#,
        )
        .unwrap();
        let settings = ChooserSettings {
            chrome_profile_root: Some(chrome_root),
            ..ChooserSettings::default()
        };
        let registry = StaticRegistry(vec![
            BrowserDescriptor::new("firefox.desktop", "Firefox", "firefox %u"),
            BrowserDescriptor::new("google-chrome.desktop", "Google Chrome", "google-chrome %U"),
        ]);
        let store = PreferenceStore::load(Some(&temp.path().join("prefs.ini")));
        let mut chooser = Chooser::new(settings, store, registry, None);
        chooser.populate().unwrap();

        let items = menu_items(&chooser);
        let labels: Vec<&str> = items.iter().map(|(_, label)| label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Firefox",
                "Google Chrome",
                "Personal (Google Chrome)",
                "Ask again next time. [Once] switch to Always",
                "About",
                "Quit",
            ]
        );
        assert_eq!(items[2].0, MenuItem::Launch(2));

        chooser.set_remember(true);
        let items = menu_items(&chooser);
        assert_eq!(items[3].1, "Remember this answer. [Always] switch to Once");
    }

    #[test]
    fn default_prompt_offers_three_answers() {
        let items = default_prompt_items();
        assert_eq!(items[0].0, DefaultPromptResponse::Accept);
        assert_eq!(items[1].1, "Never ask again");
        assert_eq!(items[2].0, DefaultPromptResponse::Dismiss);
    }
}
