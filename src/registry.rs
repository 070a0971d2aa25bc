use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use tracing::{debug, info, warn};

use crate::engine::{CommandSpec, expand_exec};

const DESKTOP_ENTRY: &str = "Desktop Entry";
const DEFAULT_APPLICATIONS: &str = "Default Applications";
const ADDED_ASSOCIATIONS: &str = "Added Associations";
const REMOVED_ASSOCIATIONS: &str = "Removed Associations";

/// An application the host reports as able to open a content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserDescriptor {
    /// Desktop-file id, e.g. `firefox.desktop`.
    pub id: String,
    pub display_name: String,
    /// Icon name or absolute path.
    pub icon: Option<String>,
    /// Raw `Exec` line with field codes.
    pub exec: String,
    pub desktop_file: Option<PathBuf>,
    /// Set during discovery for the browser family carrying multiple profiles.
    pub multi_profile: bool,
}

impl BrowserDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        exec: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            icon: None,
            exec: exec.into(),
            desktop_file: None,
            multi_profile: false,
        }
    }
}

/// Whether `descriptor` is the chooser itself.
pub fn is_self(descriptor: &BrowserDescriptor, app_id: &str) -> bool {
    descriptor.id == app_id
}

/// Whether `descriptor` belongs to the browser family with OS-level profiles.
pub fn is_multi_profile_family(descriptor: &BrowserDescriptor, family: &str) -> bool {
    descriptor.display_name == family
}

/// Whether the chooser is already the default handler for `content_type`.
pub fn is_already_default_handler(
    registry: &dyn HostRegistry,
    content_type: &str,
    app_id: &str,
) -> bool {
    registry
        .default_for(content_type)
        .is_some_and(|default| is_self(&default, app_id))
}

/// Host application registry the chooser depends on.
pub trait HostRegistry {
    /// Every application registered for `content_type`, in host order.
    fn handlers_for(&self, content_type: &str) -> Result<Vec<BrowserDescriptor>>;

    fn default_for(&self, content_type: &str) -> Option<BrowserDescriptor>;

    fn set_default_for(&self, app_id: &str, content_type: &str) -> Result<()>;

    fn app_by_id(&self, id: &str) -> Option<BrowserDescriptor>;

    /// Make `app_id` a registered handler for `content_types` so it can become the default.
    fn ensure_installed(&self, _app_id: &str, _content_types: &[String]) -> Result<()> {
        Ok(())
    }

    /// Materialise the command that opens `args` with `browser`.
    fn command_for(&self, browser: &BrowserDescriptor, args: &[String]) -> Result<CommandSpec> {
        expand_exec(browser, args)
    }

    /// Start `command` without waiting for it.
    fn spawn(&self, command: &CommandSpec) -> Result<Option<u32>> {
        command.spawn_detached().map(Some)
    }
}

/// freedesktop.org adapter: desktop entries plus `mimeapps.list`.
#[derive(Debug, Clone)]
pub struct XdgRegistry {
    /// `applications/` parents, highest priority first.
    data_dirs: Vec<PathBuf>,
    /// Directories searched for `mimeapps.list`, highest priority first.
    config_dirs: Vec<PathBuf>,
    /// `mimeapps.list` that default-handler changes are written to.
    user_mimeapps: PathBuf,
}

impl XdgRegistry {
    pub fn new(data_dirs: Vec<PathBuf>, config_dirs: Vec<PathBuf>, user_mimeapps: PathBuf) -> Self {
        Self {
            data_dirs,
            config_dirs,
            user_mimeapps,
        }
    }

    pub fn from_env() -> Result<Self> {
        let base = directories::BaseDirs::new().context("Unable to resolve home directory")?;
        let config_home = base.config_dir().to_path_buf();

        let mut data_dirs = vec![base.data_dir().to_path_buf()];
        data_dirs.extend(split_dirs("XDG_DATA_DIRS", "/usr/local/share:/usr/share"));

        let mut config_dirs = vec![config_home.clone()];
        config_dirs.extend(split_dirs("XDG_CONFIG_DIRS", "/etc/xdg"));

        Ok(Self::new(data_dirs, config_dirs, config_home.join("mimeapps.list")))
    }

    fn mimeapps_files(&self) -> Vec<PathBuf> {
        self.config_dirs
            .iter()
            .map(|dir| dir.join("mimeapps.list"))
            .chain(
                self.data_dirs
                    .iter()
                    .map(|dir| dir.join("applications").join("mimeapps.list")),
            )
            .collect()
    }

    /// Installed desktop entries keyed by id; earlier data dirs shadow later ones.
    fn installed(&self) -> BTreeMap<String, DesktopEntry> {
        let mut entries = BTreeMap::new();
        for dir in &self.data_dirs {
            let applications = dir.join("applications");
            let mut files = Vec::new();
            collect_desktop_files(&applications, &applications, &mut files);
            for (id, path) in files {
                if entries.contains_key(&id) {
                    continue;
                }
                match DesktopEntry::load(&id, &path) {
                    Ok(Some(entry)) => {
                        entries.insert(id, entry);
                    }
                    // Hidden or non-application entries still shadow lower directories.
                    Ok(None) => {
                        entries.insert(id, DesktopEntry::masked(&path));
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "Skipping unreadable desktop entry"
                        );
                    }
                }
            }
        }
        entries.retain(|_, entry| !entry.masked);
        entries
    }

    fn associations(&self, content_type: &str) -> Associations {
        let mut associations = Associations::default();
        for path in self.mimeapps_files() {
            let Some(ini) = load_key_file(&path) else {
                continue;
            };
            if associations.default.is_empty() {
                if let Some(ids) = key_file_list(&ini, DEFAULT_APPLICATIONS, content_type) {
                    associations.default = ids;
                }
            }
            if let Some(ids) = key_file_list(&ini, ADDED_ASSOCIATIONS, content_type) {
                associations.added.extend(ids);
            }
            if let Some(ids) = key_file_list(&ini, REMOVED_ASSOCIATIONS, content_type) {
                associations.removed.extend(ids);
            }
        }
        associations
    }
}

impl HostRegistry for XdgRegistry {
    fn handlers_for(&self, content_type: &str) -> Result<Vec<BrowserDescriptor>> {
        let installed = self.installed();
        let associations = self.associations(content_type);
        let removed: HashSet<&str> = associations.removed.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let mut handlers = Vec::new();
        let default = associations
            .default
            .iter()
            .find(|id| installed.contains_key(id.as_str()));
        let ordered_ids = default
            .into_iter()
            .chain(associations.added.iter())
            .chain(
                installed
                    .iter()
                    .filter(|(_, entry)| entry.mime_types.iter().any(|mime| mime == content_type))
                    .map(|(id, _)| id),
            );
        for id in ordered_ids {
            if removed.contains(id.as_str()) || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(entry) = installed.get(id) {
                handlers.push(entry.descriptor.clone());
            }
        }
        debug!(content_type, count = handlers.len(), "discovered handlers");
        Ok(handlers)
    }

    fn default_for(&self, content_type: &str) -> Option<BrowserDescriptor> {
        let installed = self.installed();
        self.associations(content_type)
            .default
            .iter()
            .find_map(|id| installed.get(id))
            .map(|entry| entry.descriptor.clone())
    }

    fn set_default_for(&self, app_id: &str, content_type: &str) -> Result<()> {
        let path = &self.user_mimeapps;
        let mut ini = load_key_file(path).unwrap_or_else(Ini::new);

        let mut added = key_file_list(&ini, ADDED_ASSOCIATIONS, content_type).unwrap_or_default();
        added.retain(|id| id != app_id);
        added.insert(0, app_id.to_string());

        ini.set_to(
            Some(DEFAULT_APPLICATIONS),
            content_type.to_string(),
            format!("{app_id};"),
        );
        ini.set_to(
            Some(ADDED_ASSOCIATIONS),
            content_type.to_string(),
            format!("{};", added.join(";")),
        );

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let options = WriteOption {
            escape_policy: EscapePolicy::Nothing,
            ..WriteOption::default()
        };
        ini.write_to_file_opt(path, options)
            .with_context(|| format!("Failed to update {}", path.display()))?;
        debug!(app_id, content_type, path = %path.display(), "registered default handler");
        Ok(())
    }

    fn app_by_id(&self, id: &str) -> Option<BrowserDescriptor> {
        self.installed().remove(id).map(|entry| entry.descriptor)
    }

    /// Write a desktop entry for the running binary into the user `applications/`
    /// directory unless one is already installed.
    fn ensure_installed(&self, app_id: &str, content_types: &[String]) -> Result<()> {
        if self.app_by_id(app_id).is_some() {
            return Ok(());
        }
        let Some(user_data) = self.data_dirs.first() else {
            bail!("No data directory to install {app_id} into");
        };
        let applications = user_data.join("applications");
        fs::create_dir_all(&applications)
            .with_context(|| format!("Failed to create {}", applications.display()))?;

        let path = applications.join(app_id);
        fs::write(&path, self_desktop_entry(&self_exec(), content_types))
            .with_context(|| format!("Failed to install {}", path.display()))?;
        info!(app_id, path = %path.display(), "installed desktop entry");
        Ok(())
    }
}

/// Desktop entry launching the chooser in a terminal for `content_types`.
fn self_desktop_entry(exec: &str, content_types: &[String]) -> String {
    let mime_types: String = content_types.iter().map(|ct| format!("{ct};")).collect();
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=Crossroads\n\
         Comment=Pick a browser for every link\n\
         Exec={exec} %u\n\
         Terminal=true\n\
         Categories=Network;WebBrowser;\n\
         MimeType={mime_types}\n"
    )
}

fn self_exec() -> String {
    let exec = env::current_exe()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "crossroads".to_string());
    if exec.contains(char::is_whitespace) {
        format!("\"{exec}\"")
    } else {
        exec
    }
}

#[derive(Debug, Default)]
struct Associations {
    default: Vec<String>,
    added: Vec<String>,
    removed: Vec<String>,
}

#[derive(Debug, Clone)]
struct DesktopEntry {
    descriptor: BrowserDescriptor,
    mime_types: Vec<String>,
    masked: bool,
}

impl DesktopEntry {
    fn masked(path: &Path) -> Self {
        Self {
            descriptor: BrowserDescriptor::new("", "", ""),
            mime_types: Vec::new(),
            masked: true,
        }
        .with_file(path)
    }

    fn with_file(mut self, path: &Path) -> Self {
        self.descriptor.desktop_file = Some(path.to_path_buf());
        self
    }

    /// `Ok(None)` for entries that exist but must not be offered.
    fn load(id: &str, path: &Path) -> Result<Option<Self>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        let ini = Ini::load_from_str_opt(&raw, key_file_options())
            .with_context(|| format!("Malformed desktop entry {}", path.display()))?;
        let Some(section) = ini.section(Some(DESKTOP_ENTRY)) else {
            bail!("missing [{DESKTOP_ENTRY}] group");
        };

        if section.get("Type").is_some_and(|kind| kind != "Application") {
            return Ok(None);
        }
        if section.get("Hidden").is_some_and(|hidden| hidden == "true") {
            return Ok(None);
        }
        if let Some(try_exec) = section.get("TryExec") {
            if which::which(try_exec).is_err() {
                debug!(id, try_exec, "TryExec binary missing; hiding entry");
                return Ok(None);
            }
        }
        let (Some(name), Some(exec)) = (section.get("Name"), section.get("Exec")) else {
            return Ok(None);
        };

        let mut descriptor = BrowserDescriptor::new(id, name, exec);
        descriptor.icon = section.get("Icon").map(str::to_string);
        let mime_types = section
            .get("MimeType")
            .map(split_list)
            .unwrap_or_default();
        Ok(Some(
            Self {
                descriptor,
                mime_types,
                masked: false,
            }
            .with_file(path),
        ))
    }
}

/// Desktop files use backslash escapes and quoting of their own.
fn key_file_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    }
}

fn load_key_file(path: &Path) -> Option<Ini> {
    let raw = fs::read_to_string(path).ok()?;
    match Ini::load_from_str_opt(&raw, key_file_options()) {
        Ok(ini) => Some(ini),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Ignoring malformed key file");
            None
        }
    }
}

fn key_file_list(ini: &Ini, section: &str, key: &str) -> Option<Vec<String>> {
    ini.section(Some(section))
        .and_then(|props| props.get(key))
        .map(split_list)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_dirs(var: &str, fallback: &str) -> Vec<PathBuf> {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Desktop-file ids are the path below `applications/` with `/` replaced by `-`.
fn collect_desktop_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = read_dir.flatten().map(|entry| entry.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_desktop_files(root, &path, out);
        } else if path.extension().is_some_and(|ext| ext == "desktop") {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let id = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("-");
            out.push((id, path));
        }
    }
}
