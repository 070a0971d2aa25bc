use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};

use crate::registry::BrowserDescriptor;

/// Chrome's flag selecting a profile by directory name.
pub const PROFILE_DIRECTORY_FLAG: &str = "--profile-directory";
/// Suppresses Chrome's "restore pages" / automation info bars.
pub const DISABLE_INFOBARS_FLAG: &str = "--disable-infobars";

/// Materialised command specification ready to be spawned or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    binary: PathBuf,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(binary: PathBuf, args: Vec<String>) -> Self {
        Self { binary, args }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        command
    }

    pub fn describe(&self) -> String {
        let args = self.args.join(" ");
        format!("{} {}", self.binary.display(), args)
    }

    /// Spawn with stdio detached and return the child's pid without waiting.
    pub fn spawn_detached(&self) -> Result<u32> {
        let child = self
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.describe()))?;
        Ok(child.id())
    }
}

/// Arguments handed to the chosen browser: the URL first, then profile flags.
pub fn build_args(url: &str, profile: Option<&str>, multi_profile_family: bool) -> Vec<String> {
    let mut args = vec![url.to_string()];
    if let Some(profile) = profile {
        args.push(format!("{PROFILE_DIRECTORY_FLAG}={profile}"));
    }
    if multi_profile_family {
        args.push(DISABLE_INFOBARS_FLAG.into());
    }
    args
}

/// Expand a desktop-entry `Exec` line for `args`.
///
/// `%u %U %f %F` take the argument list; `%i`, `%c` and `%k` expand to the icon,
/// name and desktop file; other field codes are dropped. When the line carries no
/// file or URL code the arguments are appended.
pub fn expand_exec(browser: &BrowserDescriptor, args: &[String]) -> Result<CommandSpec> {
    let Some(tokens) = shlex::split(&browser.exec) else {
        bail!("Unparseable Exec line for {}: {}", browser.id, browser.exec);
    };

    let mut expanded = Vec::new();
    let mut consumed_args = false;
    for token in tokens {
        match token.as_str() {
            "%u" | "%U" | "%f" | "%F" => {
                if !consumed_args {
                    expanded.extend(args.iter().cloned());
                    consumed_args = true;
                }
            }
            "%i" => {
                if let Some(icon) = &browser.icon {
                    expanded.push("--icon".into());
                    expanded.push(icon.clone());
                }
            }
            _ => {
                let value = expand_inline_codes(&token, browser);
                if !value.is_empty() {
                    expanded.push(value);
                }
            }
        }
    }
    if !consumed_args {
        expanded.extend(args.iter().cloned());
    }

    let mut parts = expanded.into_iter();
    let Some(binary) = parts.next() else {
        bail!("Empty Exec line for {}", browser.id);
    };
    Ok(CommandSpec::new(PathBuf::from(binary), parts.collect()))
}

fn expand_inline_codes(token: &str, browser: &BrowserDescriptor) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('c') => out.push_str(&browser.display_name),
            Some('k') => {
                if let Some(path) = &browser.desktop_file {
                    out.push_str(&path.to_string_lossy());
                }
            }
            // Deprecated or positional codes have no meaning mid-token.
            Some(_) | None => {}
        }
    }
    out
}
