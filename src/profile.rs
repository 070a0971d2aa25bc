use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// A Chrome profile found under the user-data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDescriptor {
    /// Directory name, passed back to Chrome as `--profile-directory`.
    pub directory: String,
    /// Name the user gave the profile.
    pub display_name: String,
    pub avatar: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ChromePreferences {
    profile: ChromeProfileSection,
}

#[derive(Debug, Deserialize)]
struct ChromeProfileSection {
    name: String,
}

/// Scan `<root>/*/Preferences` for profiles, sorted by directory name.
///
/// A profile whose `Preferences` file is missing or malformed is skipped.
pub fn list_profiles(root: &Path) -> Vec<ProfileDescriptor> {
    let read_dir = match fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            debug!(root = %root.display(), error = %err, "No Chrome user-data directory");
            return Vec::new();
        }
    };

    let mut directories: Vec<PathBuf> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.join("Preferences").is_file())
        .collect();
    directories.sort();

    let mut profiles = Vec::new();
    for dir in directories {
        let Some(directory) = dir.file_name().map(|name| name.to_string_lossy().into_owned())
        else {
            continue;
        };
        match read_profile_name(&dir.join("Preferences")) {
            Ok(display_name) => profiles.push(ProfileDescriptor {
                avatar: avatar_for(root, &directory),
                directory,
                display_name,
            }),
            Err(err) => {
                warn!(
                    profile = %directory,
                    error = %err,
                    "Skipping Chrome profile with unreadable preferences"
                );
            }
        }
    }
    debug!(root = %root.display(), count = profiles.len(), "discovered Chrome profiles");
    profiles
}

fn read_profile_name(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Unable to read {}", path.display()))?;
    let prefs: ChromePreferences = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed profile preferences at {}", path.display()))?;
    Ok(prefs.profile.name)
}

/// First image under `<root>/<profile>/Accounts/Avatar Images/`.
pub fn avatar_for(root: &Path, profile: &str) -> Option<PathBuf> {
    let dir = root.join(profile).join("Accounts").join("Avatar Images");
    let mut images: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    images.sort();
    images.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_profile(root: &Path, dir: &str, prefs: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("Preferences"), prefs).unwrap();
    }

    #[test]
    fn lists_profiles_by_directory_name() {
        let temp = tempdir().unwrap();
        write_profile(temp.path(), "Profile 1", r#"{"profile": {"name": "Work"}}"#);
        write_profile(
            temp.path(),
            "Default",
            r#"{"profile": {"name": "Personal", "avatar_index": 3}, "browser": {}}"#,
        );
        fs::create_dir_all(temp.path().join("ShaderCache")).unwrap();

        let profiles = list_profiles(temp.path());
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].directory, "Default");
        assert_eq!(profiles[0].display_name, "Personal");
        assert_eq!(profiles[1].directory, "Profile 1");
        assert_eq!(profiles[1].display_name, "Work");
    }

    #[test]
    fn malformed_preferences_skip_only_that_profile() {
        let temp = tempdir().unwrap();
        write_profile(temp.path(), "Default", r#"{"profile": {"name": "Personal"}}"#);
        write_profile(temp.path(), "Profile 2", "{not json");
        write_profile(temp.path(), "Profile 3", r#"{"browser": {}}"#);

        let profiles = list_profiles(temp.path());
        let names: Vec<&str> = profiles.iter().map(|p| p.directory.as_str()).collect();
        assert_eq!(names, vec!["Default"]);
    }

    #[test]
    fn missing_root_yields_no_profiles() {
        let temp = tempdir().unwrap();
        assert!(list_profiles(&temp.path().join("absent")).is_empty());
    }

    #[test]
    fn avatar_is_first_image_in_account_dir() {
        let temp = tempdir().unwrap();
        write_profile(temp.path(), "Default", r#"{"profile": {"name": "Personal"}}"#);
        let images = temp.path().join("Default/Accounts/Avatar Images");
        fs::create_dir_all(&images).unwrap();
        fs::write(images.join("b.png"), b"png").unwrap();
        fs::write(images.join("a.png"), b"png").unwrap();

        let profiles = list_profiles(temp.path());
        assert_eq!(profiles[0].avatar, Some(images.join("a.png")));
        assert!(avatar_for(temp.path(), "Profile 9").is_none());
    }
}
