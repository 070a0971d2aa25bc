//! Per-domain preference file.
//!
//! One INI section per domain, holding the browser picked for it, an optional
//! profile, a `keepasking` override and an optional `redirect` target. Reads are
//! best-effort; writes are flushed immediately and their errors propagate.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ini::{Ini, Properties};
use tracing::{debug, warn};

pub const KEY_BROWSER_ID: &str = "browserId";
pub const KEY_PROFILE: &str = "profile";
pub const KEY_KEEP_ASKING: &str = "keepasking";
pub const KEY_REDIRECT: &str = "redirect";

const APP_DIR: &str = "crossroads";
const FILE_NAME: &str = "crossroads.ini";
const DOTFILE_NAME: &str = ".crossroadsrc";

/// Saved choice for a single domain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreferenceEntry {
    pub domain: String,
    pub browser_id: Option<String>,
    pub profile: Option<String>,
    pub keep_asking: bool,
    pub redirect: Option<String>,
}

impl PreferenceEntry {
    fn from_properties(domain: &str, props: &Properties) -> Self {
        Self {
            domain: domain.to_string(),
            browser_id: lookup(props, KEY_BROWSER_ID).map(str::to_string),
            profile: lookup(props, KEY_PROFILE).map(str::to_string),
            keep_asking: lookup(props, KEY_KEEP_ASKING)
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            redirect: lookup(props, KEY_REDIRECT).map(str::to_string),
        }
    }
}

/// Keys are matched ASCII case-insensitively; `configparser` writes them lowercased.
fn lookup<'a>(props: &'a Properties, key: &str) -> Option<&'a str> {
    props
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

fn remove_all(props: &mut Properties, key: &str) {
    let matching: Vec<String> = props
        .iter()
        .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|(candidate, _)| candidate.to_string())
        .collect();
    for candidate in matching {
        props.remove(&candidate);
    }
}

/// In-memory view of the preference file plus the path it is flushed to.
#[derive(Debug)]
pub struct PreferenceStore {
    source: Option<PathBuf>,
    target: Option<PathBuf>,
    ini: Ini,
}

impl PreferenceStore {
    /// Parse the file at `path` if it exists. Without a path the store starts
    /// empty and writes go to `~/.crossroadsrc`.
    pub fn load(path: Option<&Path>) -> Self {
        let target = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_preferences_path(),
        };
        let source = path.map(Path::to_path_buf);
        let ini = source.as_deref().map(read_ini).unwrap_or_else(Ini::new);
        Self {
            source,
            target,
            ini,
        }
    }

    /// Open the store at a resolved location.
    pub fn open(location: &ConfigLocation) -> Self {
        match location {
            ConfigLocation::Existing(path) => Self::load(Some(path)),
            ConfigLocation::Create(path) => Self {
                source: None,
                target: Some(path.clone()),
                ini: Ini::new(),
            },
        }
    }

    /// Resolve the preference file from the environment and open it.
    pub fn from_env() -> Self {
        let candidates = ConfigCandidates::from_env();
        let location = resolve_config_file(&candidates, is_readable_file);
        debug!(
            path = %location.path().display(),
            existing = matches!(location, ConfigLocation::Existing(_)),
            "resolved preference file"
        );
        Self::open(&location)
    }

    /// Path the next write will land on.
    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    pub fn resolve(&self, domain: &str) -> Option<PreferenceEntry> {
        self.ini
            .section(Some(domain))
            .map(|props| PreferenceEntry::from_properties(domain, props))
    }

    pub fn get_value(&self, domain: &str, key: &str, default: &str) -> String {
        self.ini
            .section(Some(domain))
            .and_then(|props| lookup(props, key))
            .unwrap_or(default)
            .to_string()
    }

    /// All domain sections in file order.
    pub fn entries(&self) -> Vec<PreferenceEntry> {
        self.ini
            .iter()
            .filter_map(|(section, props)| {
                section.map(|domain| PreferenceEntry::from_properties(domain, props))
            })
            .collect()
    }

    /// Remember `browser_id` (and `profile`) for `domain`, clearing any keep-asking
    /// override.
    pub fn set_choice(
        &mut self,
        domain: &str,
        browser_id: &str,
        profile: Option<&str>,
    ) -> Result<()> {
        self.reload();
        if let Some(props) = self.ini.section_mut(Some(domain)) {
            remove_all(props, KEY_KEEP_ASKING);
            if profile.is_none() {
                remove_all(props, KEY_PROFILE);
            }
        }
        self.put(domain, KEY_BROWSER_ID, browser_id);
        if let Some(profile) = profile {
            self.put(domain, KEY_PROFILE, profile);
        }
        self.persist()
    }

    /// Force the chooser for `domain`. A stored choice stays in the file, inert.
    pub fn set_keep_asking(&mut self, domain: &str) -> Result<()> {
        self.reload();
        self.put(domain, KEY_KEEP_ASKING, "true");
        self.persist()
    }

    pub fn set_redirect(&mut self, domain: &str, redirect: &str) -> Result<()> {
        self.reload();
        self.put(domain, KEY_REDIRECT, redirect);
        self.persist()
    }

    /// Drop every saved setting for `domain`. Returns whether anything was removed.
    pub fn clear(&mut self, domain: &str) -> Result<bool> {
        self.reload();
        if self.ini.delete(Some(domain)).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Set `key` in the `domain` section, creating the section and replacing any
    /// differently-cased spelling of the key.
    fn put(&mut self, domain: &str, key: &str, value: &str) {
        if let Some(props) = self.ini.section_mut(Some(domain)) {
            remove_all(props, key);
        }
        self.ini.set_to(Some(domain), key.to_string(), value.to_string());
    }

    /// Pick up edits made by another instance since the store was loaded.
    fn reload(&mut self) {
        if let Some(source) = self.source.as_deref() {
            if source.exists() {
                self.ini = read_ini(source);
            }
        }
    }

    fn persist(&mut self) -> Result<()> {
        let target = self
            .target
            .clone()
            .context("No writable location for the preference file (HOME is unset)")?;
        if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create preference directory {}", parent.display())
            })?;
        }
        self.ini
            .write_to_file(&target)
            .with_context(|| format!("Failed to write preferences to {}", target.display()))?;
        debug!(path = %target.display(), "persisted preferences");
        self.source = Some(target);
        Ok(())
    }
}

fn read_ini(path: &Path) -> Ini {
    if !path.exists() {
        return Ini::new();
    }
    match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Unreadable preference file; ignoring saved choices"
            );
            Ini::new()
        }
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// `~/.crossroadsrc`, where a fresh preference file is created.
pub fn default_preferences_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(DOTFILE_NAME))
}

/// Where a preference file was found, or where one should be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    Existing(PathBuf),
    Create(PathBuf),
}

impl ConfigLocation {
    pub fn path(&self) -> &Path {
        match self {
            ConfigLocation::Existing(path) | ConfigLocation::Create(path) => path,
        }
    }
}

/// Ordered preference file candidates; the first readable one wins.
#[derive(Debug, Clone)]
pub struct ConfigCandidates {
    pub ordered: Vec<PathBuf>,
    pub create_at: PathBuf,
}

impl ConfigCandidates {
    pub fn from_env() -> Self {
        let user_config_dir =
            directories::BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf());
        let system_dirs = env::var("XDG_CONFIG_DIRS")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "/etc/xdg".into())
            .split(':')
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();
        let xdg_config_home = env::var_os("XDG_CONFIG_HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let home = env::var_os("HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::from_parts(user_config_dir, system_dirs, xdg_config_home, home)
    }

    pub fn from_parts(
        user_config_dir: Option<PathBuf>,
        system_dirs: Vec<PathBuf>,
        xdg_config_home: Option<PathBuf>,
        home: Option<PathBuf>,
    ) -> Self {
        let mut ordered = Vec::new();
        ordered.extend(user_config_dir.map(|dir| dir.join(APP_DIR).join(FILE_NAME)));
        ordered.extend(
            system_dirs
                .into_iter()
                .map(|dir| dir.join(APP_DIR).join(FILE_NAME)),
        );
        ordered.extend(xdg_config_home.map(|dir| dir.join(APP_DIR).join(FILE_NAME)));
        if let Some(home) = &home {
            ordered.push(home.join(".config").join(APP_DIR).join(FILE_NAME));
            ordered.push(home.join(DOTFILE_NAME));
        }
        ordered.push(PathBuf::from(FILE_NAME));

        let create_at = home
            .map(|home| home.join(DOTFILE_NAME))
            .unwrap_or_else(|| PathBuf::from(FILE_NAME));
        Self { ordered, create_at }
    }
}

/// First readable candidate, else the dotfile to create on first write.
pub fn resolve_config_file(
    candidates: &ConfigCandidates,
    is_readable: impl Fn(&Path) -> bool,
) -> ConfigLocation {
    for candidate in &candidates.ordered {
        debug!(path = %candidate.display(), "looking for preference file");
        if is_readable(candidate) {
            return ConfigLocation::Existing(candidate.clone());
        }
    }
    ConfigLocation::Create(candidates.create_at.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> PreferenceStore {
        PreferenceStore::load(Some(&dir.join("crossroads.ini")))
    }

    #[test]
    fn absent_domain_resolves_to_nothing() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        assert!(store.resolve("example.com").is_none());
        assert_eq!(store.get_value("example.com", KEY_BROWSER_ID, "none"), "none");
        assert_eq!(store.get_value("example.com", KEY_REDIRECT, ""), "");
    }

    #[test]
    fn set_choice_round_trips_through_disk() {
        let temp = tempdir().unwrap();
        let mut store = store_in(temp.path());
        store
            .set_choice("example.com", "firefox.desktop", Some("Profile 1"))
            .unwrap();

        let reloaded = store_in(temp.path());
        let entry = reloaded.resolve("example.com").unwrap();
        assert_eq!(entry.browser_id.as_deref(), Some("firefox.desktop"));
        assert_eq!(entry.profile.as_deref(), Some("Profile 1"));
        assert!(!entry.keep_asking);
    }

    #[test]
    fn set_choice_clears_keep_asking() {
        let temp = tempdir().unwrap();
        let mut store = store_in(temp.path());
        store.set_keep_asking("example.com").unwrap();
        store.set_choice("example.com", "firefox.desktop", None).unwrap();

        let raw = fs::read_to_string(temp.path().join("crossroads.ini")).unwrap();
        assert!(!raw.contains(KEY_KEEP_ASKING));
        let entry = store.resolve("example.com").unwrap();
        assert!(!entry.keep_asking);
        assert!(entry.profile.is_none());
    }

    #[test]
    fn choice_without_profile_drops_previous_profile() {
        let temp = tempdir().unwrap();
        let mut store = store_in(temp.path());
        store
            .set_choice("example.com", "google-chrome.desktop", Some("Default"))
            .unwrap();
        store.set_choice("example.com", "firefox.desktop", None).unwrap();

        let entry = store_in(temp.path()).resolve("example.com").unwrap();
        assert_eq!(entry.browser_id.as_deref(), Some("firefox.desktop"));
        assert!(entry.profile.is_none());
        assert!(crate::choice::should_auto_launch(
            &store,
            "https://example.com/",
            "firefox.desktop",
            None
        ));
    }

    #[test]
    fn keep_asking_is_idempotent_and_keeps_dormant_choice() {
        let temp = tempdir().unwrap();
        let mut store = store_in(temp.path());
        store
            .set_choice("example.com", "chrome.desktop", Some("Default"))
            .unwrap();
        store.set_keep_asking("example.com").unwrap();
        let once = fs::read_to_string(temp.path().join("crossroads.ini")).unwrap();
        store.set_keep_asking("example.com").unwrap();
        let twice = fs::read_to_string(temp.path().join("crossroads.ini")).unwrap();
        assert_eq!(once, twice);

        let entry = store.resolve("example.com").unwrap();
        assert!(entry.keep_asking);
        assert_eq!(entry.browser_id.as_deref(), Some("chrome.desktop"));
        assert_eq!(entry.profile.as_deref(), Some("Default"));
    }

    #[test]
    fn lowercased_keys_are_understood_and_replaced() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crossroads.ini");
        fs::write(
            &path,
            "[example.com]\nbrowserid = old.desktop\nkeepasking = True\ncolor = blue\n",
        )
        .unwrap();
        let mut store = PreferenceStore::load(Some(&path));
        let entry = store.resolve("example.com").unwrap();
        assert_eq!(entry.browser_id.as_deref(), Some("old.desktop"));
        assert!(entry.keep_asking);

        store.set_choice("example.com", "new.desktop", None).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("browserid"));
        assert!(raw.contains("browserId=new.desktop"));
        assert!(raw.contains("color=blue"));
    }

    #[test]
    fn malformed_file_degrades_to_empty_store() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crossroads.ini");
        fs::write(&path, "[unterminated\nbrowserId=x\n").unwrap();
        let store = PreferenceStore::load(Some(&path));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn mutations_reload_external_edits_first() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crossroads.ini");
        fs::write(&path, "[a.example]\nbrowserId=one.desktop\n").unwrap();
        let mut store = PreferenceStore::load(Some(&path));
        fs::write(
            &path,
            "[a.example]\nbrowserId=one.desktop\n[b.example]\nredirect=c.example\n",
        )
        .unwrap();
        store.set_keep_asking("a.example").unwrap();
        let domains: Vec<String> = store.entries().into_iter().map(|e| e.domain).collect();
        assert_eq!(domains, vec!["a.example", "b.example"]);
    }

    #[test]
    fn clear_removes_only_the_named_domain() {
        let temp = tempdir().unwrap();
        let mut store = store_in(temp.path());
        store.set_choice("a.example", "one.desktop", None).unwrap();
        store.set_redirect("b.example", "mirror.example").unwrap();
        assert!(store.clear("a.example").unwrap());
        assert!(!store.clear("a.example").unwrap());
        assert!(store.resolve("a.example").is_none());
        assert_eq!(
            store.resolve("b.example").unwrap().redirect.as_deref(),
            Some("mirror.example")
        );
    }

    #[test]
    fn create_location_writes_to_target() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("home/.crossroadsrc");
        let mut store = PreferenceStore::open(&ConfigLocation::Create(target.clone()));
        assert!(store.entries().is_empty());
        store.set_keep_asking("example.com").unwrap();
        assert!(target.exists());
        assert!(store.resolve("example.com").unwrap().keep_asking);
    }

    fn sample_candidates() -> ConfigCandidates {
        ConfigCandidates::from_parts(
            Some(PathBuf::from("/home/u/.config")),
            vec![PathBuf::from("/etc/xdg"), PathBuf::from("/usr/etc/xdg")],
            Some(PathBuf::from("/custom/config")),
            Some(PathBuf::from("/home/u")),
        )
    }

    #[test]
    fn candidates_follow_lookup_order() {
        let candidates = sample_candidates();
        assert_eq!(
            candidates.ordered,
            vec![
                PathBuf::from("/home/u/.config/crossroads/crossroads.ini"),
                PathBuf::from("/etc/xdg/crossroads/crossroads.ini"),
                PathBuf::from("/usr/etc/xdg/crossroads/crossroads.ini"),
                PathBuf::from("/custom/config/crossroads/crossroads.ini"),
                PathBuf::from("/home/u/.config/crossroads/crossroads.ini"),
                PathBuf::from("/home/u/.crossroadsrc"),
                PathBuf::from("crossroads.ini"),
            ]
        );
    }

    #[test]
    fn first_readable_candidate_wins() {
        let candidates = sample_candidates();
        let location = resolve_config_file(&candidates, |path| {
            path == Path::new("/usr/etc/xdg/crossroads/crossroads.ini")
                || path == Path::new("/home/u/.crossroadsrc")
        });
        assert_eq!(
            location,
            ConfigLocation::Existing(PathBuf::from("/usr/etc/xdg/crossroads/crossroads.ini"))
        );
    }

    #[test]
    fn nothing_readable_creates_home_dotfile() {
        let candidates = sample_candidates();
        let location = resolve_config_file(&candidates, |_| false);
        assert_eq!(
            location,
            ConfigLocation::Create(PathBuf::from("/home/u/.crossroadsrc"))
        );
    }

    #[test]
    fn without_home_falls_back_to_bare_filename() {
        let candidates = ConfigCandidates::from_parts(None, Vec::new(), None, None);
        assert_eq!(candidates.ordered, vec![PathBuf::from("crossroads.ini")]);
        assert_eq!(candidates.create_at, PathBuf::from("crossroads.ini"));
    }
}
