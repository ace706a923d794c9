//! Upstream release tables for PyQt5 and SIP.
//!
//! The PyQt5 version selects a matching SIP release, the archive names and
//! URLs of both, and a few version-gated build knobs.

use super::toolchain::ToolchainError;
use regex::Regex;
use std::sync::LazyLock;

/// PyQt5 release to the SIP release it was built against.
pub const SIP_VERSIONS: [(&str, &str); 11] = [
    ("5.5.1", "4.17"),
    ("5.6", "4.19"),
    ("5.7.1", "4.19.8"),
    ("5.8.2", "4.19.8"),
    ("5.9", "4.19.8"),
    ("5.9.2", "4.19.8"),
    ("5.10", "4.19.8"),
    ("5.10.1", "4.19.8"),
    ("5.11.2", "4.19.13"),
    ("5.11.3", "4.19.13"),
    ("5.12", "4.19.14"),
];

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*$").expect("Invalid version regex"));

/// A supported PyQt5 release and its SIP companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyQtRelease {
    version: String,
    components: Vec<u32>,
    sip: SipRelease,
}

impl PyQtRelease {
    pub fn lookup(version: &str) -> Result<Self, ToolchainError> {
        let version = version.trim();
        if !VERSION_PATTERN.is_match(version) {
            return Err(ToolchainError::MalformedPyQtVersion(version.to_string()));
        }

        let sip = SIP_VERSIONS
            .iter()
            .find(|(pyqt, _)| *pyqt == version)
            .map(|(_, sip)| SipRelease::new(sip))
            .ok_or_else(|| ToolchainError::UnsupportedPyQt(version.to_string()))?;

        let components = version
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| ToolchainError::MalformedPyQtVersion(version.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: version.to_string(),
            components,
            sip,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sip(&self) -> &SipRelease {
        &self.sip
    }

    /// Compares against `major.minor` the way tuple comparison does,
    /// so `5.11` is at least `(5, 11)` and `5.10.1` is not.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        self.components.as_slice() >= [major, minor].as_slice()
    }

    /// Base name of the source archive and of its extracted directory.
    pub fn archive_name(&self) -> String {
        if self.at_least(5, 6) {
            format!("PyQt5_gpl-{}", self.version)
        } else {
            format!("PyQt-gpl-{}", self.version)
        }
    }

    pub fn url(&self) -> String {
        format!(
            "https://sourceforge.net/projects/pyqt/files/PyQt5/PyQt-{}/{}.zip",
            self.version,
            self.archive_name()
        )
    }

    /// Extra arguments for the target SIP `configure.py`.
    pub fn sip_configure_extras(&self) -> Vec<String> {
        if self.at_least(5, 11) {
            vec!["--sip-module=PyQt5.sip".to_string()]
        } else {
            Vec::new()
        }
    }

    /// Plugin loader patch applied to the PyQt5 sources, if any.
    pub fn pluginloader_patch(&self) -> Option<&'static str> {
        if self.at_least(5, 11) {
            Some("pluginloader.5.11.patch")
        } else if self.at_least(5, 7) {
            Some("pluginloader.patch")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRelease {
    version: String,
}

impl SipRelease {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn archive_name(&self) -> String {
        format!("sip-{}", self.version)
    }

    pub fn url(&self) -> String {
        if self.version.contains("dev") {
            format!(
                "https://www.riverbankcomputing.com/static/Downloads/sip/sip-{}.zip",
                self.version
            )
        } else {
            format!(
                "http://downloads.sourceforge.net/project/pyqt/sip/sip-{}/{}.zip",
                self.version,
                self.archive_name()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_resolves() {
        for (pyqt, sip) in SIP_VERSIONS {
            let release = PyQtRelease::lookup(pyqt).unwrap();
            assert_eq!(release.sip().version(), sip);
        }
    }

    #[test]
    fn test_unknown_release_is_fatal() {
        assert_eq!(
            PyQtRelease::lookup("5.13").unwrap_err(),
            ToolchainError::UnsupportedPyQt("5.13".to_string())
        );
        assert_eq!(
            PyQtRelease::lookup("five").unwrap_err(),
            ToolchainError::MalformedPyQtVersion("five".to_string())
        );
    }

    #[test]
    fn test_version_gates() {
        let old = PyQtRelease::lookup("5.5.1").unwrap();
        assert_eq!(old.archive_name(), "PyQt-gpl-5.5.1");
        assert_eq!(old.pluginloader_patch(), None);
        assert!(old.sip_configure_extras().is_empty());

        let mid = PyQtRelease::lookup("5.10.1").unwrap();
        assert_eq!(mid.archive_name(), "PyQt5_gpl-5.10.1");
        assert_eq!(mid.pluginloader_patch(), Some("pluginloader.patch"));
        assert!(mid.sip_configure_extras().is_empty());

        let new = PyQtRelease::lookup("5.11.3").unwrap();
        assert_eq!(new.pluginloader_patch(), Some("pluginloader.5.11.patch"));
        assert_eq!(new.sip_configure_extras(), vec!["--sip-module=PyQt5.sip"]);

        // 5.6 has no patch but uses the new archive naming.
        let six = PyQtRelease::lookup("5.6").unwrap();
        assert_eq!(six.archive_name(), "PyQt5_gpl-5.6");
        assert_eq!(six.pluginloader_patch(), None);
    }

    #[test]
    fn test_urls() {
        let release = PyQtRelease::lookup("5.12").unwrap();
        assert_eq!(
            release.url(),
            "https://sourceforge.net/projects/pyqt/files/PyQt5/PyQt-5.12/PyQt5_gpl-5.12.zip"
        );
        assert_eq!(
            release.sip().url(),
            "http://downloads.sourceforge.net/project/pyqt/sip/sip-4.19.14/sip-4.19.14.zip"
        );

        let dev = SipRelease::new("4.19.14.dev1812051234");
        assert!(dev.url().starts_with("https://www.riverbankcomputing.com/"));
    }
}
