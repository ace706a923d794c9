//! Destination tree assembly.
//!
//! Qt applications are selected in two stages: [`discover_applications`]
//! lists every executable in Qt's `bin`, then [`select_applications`] keeps
//! those a [`DependencyProbe`] admits. The rest of this module copies
//! plugins, QML modules and compiler redistributables into place.

use super::process::{CommandRunner, Invocation, ProcessError};
use crate::models::{Environment, RedistOrdering};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeployError {
    #[error("Expected exactly one plugin in {dir}, found {found}")]
    ExpectedSinglePlugin { dir: Utf8PathBuf, found: usize },

    #[error("No redistributable versions found in {0}")]
    NoRedistVersion(Utf8PathBuf),
}

/// Decides whether an application may ship in the bundle.
#[allow(async_fn_in_trait)]
pub trait DependencyProbe {
    async fn admits(&self, executable: &Utf8Path) -> Result<bool, ProcessError>;
}

/// Probes with `windeployqt --dry-run --list source`.
///
/// An application is rejected when the dry run fails or when its listed
/// dependencies match the excluded component.
pub struct WindeployqtProbe<'a, R> {
    runner: &'a R,
    windeployqt: Utf8PathBuf,
    cwd: Utf8PathBuf,
    env: Environment,
    excluded: Regex,
}

impl<'a, R: CommandRunner> WindeployqtProbe<'a, R> {
    pub fn new(
        runner: &'a R,
        windeployqt: Utf8PathBuf,
        cwd: Utf8PathBuf,
        env: Environment,
        excluded: Regex,
    ) -> Self {
        Self {
            runner,
            windeployqt,
            cwd,
            env,
            excluded,
        }
    }
}

impl<R: CommandRunner> DependencyProbe for WindeployqtProbe<'_, R> {
    async fn admits(&self, executable: &Utf8Path) -> Result<bool, ProcessError> {
        let invocation = Invocation::new(self.windeployqt.as_str())
            .arg(executable.as_str())
            .args(["--dry-run", "--list", "source"])
            .cwd(&self.cwd)
            .env(&self.env);

        let output = match self.runner.check_output(&invocation).await {
            Ok(output) => output,
            Err(ProcessError::Failed { status, .. }) => {
                tracing::info!("    dry run failed ({}), skipped", status);
                return Ok(false);
            }
            Err(error) => return Err(error),
        };

        let listing = String::from_utf8_lossy(&output);
        if self.excluded.is_match(&listing) {
            tracing::info!("    depends on {}, skipped", self.excluded.as_str());
            return Ok(false);
        }
        Ok(true)
    }
}

/// Every `*.exe` directly inside `qt_bin`, sorted by name.
pub fn discover_applications(qt_bin: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    for entry in qt_bin
        .read_dir_utf8()
        .with_context(|| format!("Failed to list {}", qt_bin))?
    {
        let entry = entry.with_context(|| format!("Failed to list {}", qt_bin))?;
        let path = entry.path();
        let is_exe = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
        if is_exe && path.is_file() {
            found.push(path.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Keep the candidates `probe` admits, preserving order.
pub async fn select_applications<P: DependencyProbe>(
    candidates: Vec<Utf8PathBuf>,
    probe: &P,
) -> Result<Vec<Utf8PathBuf>, ProcessError> {
    let mut selected = Vec::new();
    for candidate in candidates {
        tracing::info!("Checking: {}", candidate.file_name().unwrap_or(candidate.as_str()));
        if probe.admits(&candidate).await? {
            selected.push(candidate);
        }
    }
    Ok(selected)
}

/// True for `foo.pdb`, and for `food.dll` when `foo.dll` sits next to it.
pub fn is_debug_artifact(name: &str, siblings: &BTreeSet<String>) -> bool {
    if name.ends_with(".pdb") {
        return true;
    }

    match name.rsplit_once('.') {
        Some((base, "dll")) if !base.is_empty() => base
            .strip_suffix('d')
            .is_some_and(|release| siblings.contains(&format!("{}.dll", release))),
        _ => false,
    }
}

/// Names in a directory listing that should not be copied.
pub fn debug_artifacts(names: &BTreeSet<String>) -> BTreeSet<String> {
    names
        .iter()
        .filter(|name| is_debug_artifact(name, names))
        .cloned()
        .collect()
}

/// Recursively copy `source` to `destination`.
///
/// For each directory, `ignore` receives the directory and the names it
/// contains and returns the names to skip.
pub fn copy_tree<F>(source: &Utf8Path, destination: &Utf8Path, ignore: &F) -> Result<()>
where
    F: Fn(&Utf8Path, &BTreeSet<String>) -> BTreeSet<String>,
{
    let names: BTreeSet<String> = source
        .read_dir_utf8()
        .with_context(|| format!("Failed to list {}", source))?
        .map(|entry| entry.map(|e| e.file_name().to_string()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to list {}", source))?;
    let ignored = ignore(source, &names);

    fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination))?;

    for name in names.difference(&ignored) {
        let from = source.join(name);
        let to = destination.join(name);
        if from.is_dir() {
            copy_tree(&from, &to, ignore)?;
        } else {
            fs::copy(&from, &to).with_context(|| format!("Failed to copy {} to {}", from, to))?;
        }
    }
    Ok(())
}

/// Copy a QML module tree without debug DLLs or symbol files.
pub fn copy_qml_tree(source: &Utf8Path, destination: &Utf8Path) -> Result<()> {
    copy_tree(source, destination, &|_: &Utf8Path, names: &BTreeSet<String>| {
        debug_artifacts(names)
    })
}

/// Copy `file` into `directory`, creating the directory, and return the new path.
pub fn copy_into(file: &Utf8Path, directory: &Utf8Path) -> Result<Utf8PathBuf> {
    fs::create_dir_all(directory).with_context(|| format!("Failed to create {}", directory))?;
    let name = file
        .file_name()
        .with_context(|| format!("{} has no file name", file))?;
    let target = directory.join(name);
    fs::copy(file, &target).with_context(|| format!("Failed to copy {} to {}", file, target))?;
    Ok(target)
}

/// The only entry of a plugin install directory.
pub fn single_plugin(directory: &Utf8Path) -> Result<Utf8PathBuf> {
    let entries: Vec<Utf8PathBuf> = directory
        .read_dir_utf8()
        .with_context(|| format!("Failed to list {}", directory))?
        .map(|entry| entry.map(|e| e.path().to_path_buf()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to list {}", directory))?;

    match <[Utf8PathBuf; 1]>::try_from(entries) {
        Ok([plugin]) => Ok(plugin),
        Err(entries) => Err(DeployError::ExpectedSinglePlugin {
            dir: directory.to_path_buf(),
            found: entries.len(),
        }
        .into()),
    }
}

fn compare_versions(a: &str, b: &str, ordering: RedistOrdering) -> Ordering {
    match ordering {
        RedistOrdering::Lexicographic => a.split('.').cmp(b.split('.')),
        RedistOrdering::Numeric => {
            let key = |v: &str| -> Vec<(u64, String)> {
                v.split('.')
                    .map(|part| (part.parse::<u64>().unwrap_or(0), part.to_string()))
                    .collect()
            };
            key(a).cmp(&key(b))
        }
    }
}

/// Pick the newest redistributable version directory name.
///
/// With [`RedistOrdering::Lexicographic`] the dot-separated components are
/// compared as strings. On ties the first name wins.
pub fn pick_redist_version<S: AsRef<str>>(names: &[S], ordering: RedistOrdering) -> Option<&str> {
    let mut picked: Option<&str> = None;
    for name in names.iter().map(AsRef::as_ref) {
        picked = match picked {
            Some(best) if compare_versions(name, best, ordering) != Ordering::Greater => Some(best),
            _ => Some(name),
        };
    }
    picked
}

/// Resolve `root/<picked version>` for a VS 2017+ redist tree.
pub fn resolve_redist_version_dir(root: &Utf8Path, ordering: RedistOrdering) -> Result<Utf8PathBuf> {
    let names: Vec<String> = root
        .read_dir_utf8()
        .with_context(|| format!("Failed to list {}", root))?
        .map(|entry| entry.map(|e| e.file_name().to_string()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to list {}", root))?;

    tracing::info!("redist_path: {}", root);
    tracing::info!("candidates: {:?}", names);
    let picked = pick_redist_version(&names, ordering)
        .ok_or_else(|| DeployError::NoRedistVersion(root.to_path_buf()))?;
    tracing::info!("picked: {}", picked);

    Ok(root.join(picked))
}

/// Copy every redistributable file into `destination` and make the copies writable.
pub fn copy_redist_files(redist_dir: &Utf8Path, destination: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut copied = Vec::new();
    for entry in redist_dir
        .read_dir_utf8()
        .with_context(|| format!("Failed to list {}", redist_dir))?
    {
        let entry = entry.with_context(|| format!("Failed to list {}", redist_dir))?;
        let target = destination.join(entry.file_name());
        fs::copy(entry.path(), &target)
            .with_context(|| format!("Failed to copy {} to {}", entry.path(), target))?;
        make_writable(&target)?;
        copied.push(target);
    }
    copied.sort();
    Ok(copied)
}

#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Utf8Path) -> Result<()> {
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path))?
        .permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to make {} writable", path))
}

/// Write the single-line `build_id` and `job_id` files.
pub fn write_build_metadata(destination: &Utf8Path, build_id: &str, job_id: &str) -> Result<()> {
    for (name, value) in [("build_id", build_id), ("job_id", job_id)] {
        let path = destination.join(name);
        fs::write(&path, format!("{}\n", value))
            .with_context(|| format!("Failed to write {}", path))?;
    }
    Ok(())
}

/// Indented listing of `root`, one entry per line.
pub fn list_tree(root: &Utf8Path) -> String {
    let mut listing = String::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().flatten() {
        let indent = "    ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            listing.push_str(&format!("{}{}/\n", indent, name));
        } else {
            listing.push_str(&format!("{}{}\n", indent, name));
        }
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn temp_path(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_debug_artifacts() {
        let listing = names(&["foo.dll", "food.dll", "bar.pdb"]);
        assert_eq!(debug_artifacts(&listing), names(&["food.dll", "bar.pdb"]));
    }

    #[test]
    fn test_lone_d_suffix_is_kept() {
        // No `qtquickcontrols.dll` sibling, so this is a release build.
        let listing = names(&["qtquickcontrolsd.dll", "qmldir"]);
        assert!(debug_artifacts(&listing).is_empty());
    }

    #[test]
    fn test_pick_redist_lexicographic_quirk() {
        let names = ["14.20.1", "14.29.30", "14.9.5"];
        assert_eq!(
            pick_redist_version(&names, RedistOrdering::Lexicographic),
            Some("14.9.5")
        );
    }

    #[test]
    fn test_pick_redist_numeric() {
        let names = ["14.20.1", "14.29.30", "14.9.5"];
        assert_eq!(
            pick_redist_version(&names, RedistOrdering::Numeric),
            Some("14.29.30")
        );
    }

    #[test]
    fn test_pick_redist_empty() {
        assert_eq!(pick_redist_version::<&str>(&[], RedistOrdering::Numeric), None);
    }

    #[test]
    fn test_copy_qml_tree_skips_debug_files() {
        let source_dir = TempDir::new().unwrap();
        let source = temp_path(&source_dir);
        let module = source.join("QtQuick.2");
        fs::create_dir_all(&module).unwrap();
        for name in ["qtquick2plugin.dll", "qtquick2plugind.dll", "qtquick2plugind.pdb", "qmldir"] {
            fs::write(module.join(name), name).unwrap();
        }

        let destination_dir = TempDir::new().unwrap();
        let destination = temp_path(&destination_dir).join("qml");
        copy_qml_tree(&source, &destination).unwrap();

        let copied = destination.join("QtQuick.2");
        assert!(copied.join("qtquick2plugin.dll").exists());
        assert!(copied.join("qmldir").exists());
        assert!(!copied.join("qtquick2plugind.dll").exists());
        assert!(!copied.join("qtquick2plugind.pdb").exists());
    }

    #[test]
    fn test_single_plugin() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_path(&temp_dir);

        assert_eq!(
            single_plugin(&dir)
                .unwrap_err()
                .downcast::<DeployError>()
                .unwrap(),
            DeployError::ExpectedSinglePlugin {
                dir: dir.clone(),
                found: 0
            }
        );

        fs::write(dir.join("pyqt5.dll"), "").unwrap();
        assert_eq!(single_plugin(&dir).unwrap(), dir.join("pyqt5.dll"));

        fs::write(dir.join("extra.dll"), "").unwrap();
        assert!(single_plugin(&dir).is_err());
    }

    #[test]
    fn test_discover_applications() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_path(&temp_dir);
        for name in ["designer.exe", "Qt5Core.dll", "assistant.EXE", "qmake.exe"] {
            fs::write(dir.join(name), "").unwrap();
        }
        fs::create_dir(dir.join("fake.exe")).unwrap();

        let found = discover_applications(&dir).unwrap();
        let found: Vec<&str> = found.iter().filter_map(|p| p.file_name()).collect();
        assert_eq!(found, vec!["assistant.EXE", "designer.exe", "qmake.exe"]);
    }

    #[test]
    fn test_copy_redist_files_are_writable() {
        let redist_dir = TempDir::new().unwrap();
        let redist = temp_path(&redist_dir);
        let dll = redist.join("msvcp140.dll");
        fs::write(&dll, "crt").unwrap();
        let mut permissions = fs::metadata(&dll).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&dll, permissions).unwrap();

        let destination_dir = TempDir::new().unwrap();
        let destination = temp_path(&destination_dir);
        let copied = copy_redist_files(&redist, &destination).unwrap();

        assert_eq!(copied, vec![destination.join("msvcp140.dll")]);
        assert!(!fs::metadata(&copied[0]).unwrap().permissions().readonly());
    }

    #[test]
    fn test_write_build_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_path(&temp_dir);
        write_build_metadata(&dir, "1234", "local").unwrap();

        assert_eq!(fs::read_to_string(dir.join("build_id")).unwrap(), "1234\n");
        assert_eq!(fs::read_to_string(dir.join("job_id")).unwrap(), "local\n");
    }

    #[test]
    fn test_list_tree() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_path(&temp_dir);
        fs::create_dir_all(dir.join("Qt").join("bin")).unwrap();
        fs::write(dir.join("Qt").join("bin").join("designer.exe"), "").unwrap();

        let listing = list_tree(&dir);
        assert!(listing.contains("    Qt/\n"));
        assert!(listing.contains("        bin/\n"));
        assert!(listing.contains("            designer.exe\n"));
    }
}
