use indexmap::IndexMap;
use std::ffi::OsString;
use std::fmt;

/// Separator of path-list variables on the host.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// An immutable set of environment variables handed to child processes.
///
/// Every modification returns a new value. Lookups fall back to an ASCII
/// case-insensitive match because Windows reports `Path` where callers ask
/// for `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: IndexMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Collect `vars`, skipping entries whose name or value is not Unicode.
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        vars.into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    let name = key.unwrap_or_else(|raw| raw.to_string_lossy().into_owned());
                    tracing::warn!("Skipping environment variable that is not valid Unicode: {}", name);
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.find_key(key)
            .and_then(|existing| self.vars.get(existing))
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_key(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a copy with `key` set, reusing the existing spelling of the key.
    pub fn with(&self, key: &str, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        let key = self.find_key(key).unwrap_or(key).to_string();
        vars.insert(key, value.into());
        Self { vars }
    }

    /// Returns a copy with `entry` appended to the path list `key`.
    pub fn with_path_appended(&self, key: &str, entry: &str) -> Self {
        let value = match self.get(key) {
            Some(existing) if !existing.is_empty() => {
                format!("{}{}{}", existing, PATH_LIST_SEPARATOR, entry)
            }
            _ => entry.to_string(),
        };
        self.with(key, value)
    }

    /// Returns a copy where variables from `other` are added only if absent.
    pub fn merged_missing(&self, other: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut merged = self.clone();
        for (key, value) in other {
            if !merged.contains(&key) {
                merged.vars.insert(key, value);
            }
        }
        merged
    }

    fn find_key(&self, key: &str) -> Option<&str> {
        if let Some((existing, _)) = self.vars.get_key_value(key) {
            return Some(existing.as_str());
        }
        self.vars
            .keys()
            .find(|existing| existing.eq_ignore_ascii_case(key))
            .map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.vars {
            writeln!(f, "    {}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Joins `entries`, the previous value of a path list, and a trailing
/// empty entry so the consumer still searches its default locations.
pub fn join_search_path<S: AsRef<str>>(entries: &[S], previous: Option<&str>) -> String {
    entries
        .iter()
        .map(|entry| entry.as_ref())
        .chain([previous.unwrap_or(""), ""])
        .collect::<Vec<_>>()
        .join(PATH_LIST_SEPARATOR)
}
