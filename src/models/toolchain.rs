use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use thiserror::Error;

/// Lookup failures for unsupported toolchain combinations.
///
/// These are never coerced to a nearby supported value; an unknown
/// combination stops the build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("Bit depth {0} not recognized (expected 32 or 64)")]
    UnsupportedBitness(u32),

    #[error("No MSVC version known for Python {0}")]
    UnsupportedPython(PythonVersion),

    #[error("No SIP version known for PyQt5 {0}")]
    UnsupportedPyQt(String),

    #[error("Malformed PyQt5 version: {0}")]
    MalformedPyQtVersion(String),

    #[error("Malformed interpreter probe output: {0:?}")]
    MalformedProbe(String),
}

/// Pointer width of the target interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    X86,
    X64,
}

impl Bitness {
    pub fn from_bits(bits: u32) -> Result<Self, ToolchainError> {
        match bits {
            32 => Ok(Self::X86),
            64 => Ok(Self::X64),
            other => Err(ToolchainError::UnsupportedBitness(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::X86 => 32,
            Self::X64 => 64,
        }
    }

    /// Argument for `vcvarsall.bat` and the redistributable subdirectory.
    pub fn arch(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
        }
    }

    /// Wheel platform tag.
    pub fn plat_name(self) -> &'static str {
        match self {
            Self::X86 => "win32",
            Self::X64 => "win_amd64",
        }
    }

    /// Suffix of the Qt compiler directory (`msvc2017_64`).
    pub fn qt_suffix(self) -> &'static str {
        match self {
            Self::X86 => "",
            Self::X64 => "_64",
        }
    }
}

/// Interpreter major/minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
}

impl PythonVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Compact tag used by the lookup tables (`37`).
    pub fn tag(&self) -> String {
        format!("{}{}", self.major, self.minor)
    }

    /// Wheel interpreter tag (`cp37`).
    pub fn python_tag(&self) -> String {
        format!("cp{}{}", self.major, self.minor)
    }

    /// Dotted form used for the include directory (`3.7`).
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// MSVC toolset versions the build knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MsvcVersion {
    V10_0,
    V11_0,
    V12_0,
    V14_0,
    V14_1,
    V14_14,
}

impl MsvcVersion {
    pub const ALL: [MsvcVersion; 6] = [
        Self::V10_0,
        Self::V11_0,
        Self::V12_0,
        Self::V14_0,
        Self::V14_1,
        Self::V14_14,
    ];

    /// Python (tag) to MSVC table.
    ///
    /// Python 3.4 was built with MSVC 10 but Qt only ships 12 builds, so 12 is used.
    pub const PYTHON_TABLE: [((u32, u32), MsvcVersion); 4] = [
        ((3, 4), Self::V12_0),
        ((3, 5), Self::V14_0),
        ((3, 6), Self::V14_0),
        ((3, 7), Self::V14_14),
    ];

    pub fn for_python(python: PythonVersion, bitness: Bitness) -> Result<Self, ToolchainError> {
        if bitness == Bitness::X86 && python == PythonVersion::new(3, 7) {
            return Ok(Self::V14_0);
        }

        Self::PYTHON_TABLE
            .iter()
            .find(|((major, minor), _)| python == PythonVersion::new(*major, *minor))
            .map(|(_, msvc)| *msvc)
            .ok_or(ToolchainError::UnsupportedPython(python))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V10_0 => "10.0",
            Self::V11_0 => "11.0",
            Self::V12_0 => "12.0",
            Self::V14_0 => "14.0",
            Self::V14_1 => "14.1",
            Self::V14_14 => "14.14",
        }
    }

    pub fn compiler_year(self) -> &'static str {
        match self {
            Self::V10_0 => "2010",
            Self::V11_0 => "2012",
            Self::V12_0 => "2013",
            Self::V14_0 => "2015",
            Self::V14_1 | Self::V14_14 => "2017",
        }
    }

    /// True for the Visual Studio 2017+ layout (MSVC >= 14.1).
    pub fn is_modern(self) -> bool {
        matches!(self, Self::V14_1 | Self::V14_14)
    }

    /// Version fragment of the CRT redistributable directory name.
    pub fn crt_tag(self) -> String {
        match self {
            Self::V14_14 => "141".to_string(),
            other => other.as_str().replace('.', ""),
        }
    }
}

impl fmt::Display for MsvcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything derived from the interpreter architecture and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub bitness: Bitness,
    pub python: PythonVersion,
    pub msvc: MsvcVersion,
    pub visual_studio: Utf8PathBuf,
}

impl Toolchain {
    pub fn derive(
        bitness: Bitness,
        python: PythonVersion,
        visual_studio_root: &Utf8Path,
    ) -> Result<Self, ToolchainError> {
        let msvc = MsvcVersion::for_python(python, bitness)?;

        let visual_studio = if msvc.is_modern() {
            visual_studio_root
                .join("Microsoft Visual Studio")
                .join(msvc.compiler_year())
                .join("Community")
        } else {
            visual_studio_root.join(format!("Microsoft Visual Studio {}", msvc))
        };

        Ok(Self {
            bitness,
            python,
            msvc,
            visual_studio,
        })
    }

    pub fn vcvarsall(&self) -> Utf8PathBuf {
        let vc = self.visual_studio.join("VC");
        if self.msvc.is_modern() {
            vc.join("Auxiliary").join("Build").join("vcvarsall.bat")
        } else {
            vc.join("vcvarsall.bat")
        }
    }

    pub fn compiler_year(&self) -> &'static str {
        self.msvc.compiler_year()
    }

    /// Qt's per-compiler directory name, e.g. `msvc2017_64`.
    pub fn qt_compiler_dir(&self) -> String {
        format!("msvc{}{}", self.compiler_year(), self.bitness.qt_suffix())
    }

    /// Root of the redistributable tree before version/arch selection.
    pub fn redist_root(&self) -> Utf8PathBuf {
        let redist = self.visual_studio.join("VC").join("redist");
        if self.msvc.is_modern() {
            redist.join("MSVC")
        } else {
            redist
        }
    }

    pub fn crt_dir_name(&self) -> String {
        format!("Microsoft.VC{}.CRT", self.msvc.crt_tag())
    }

    /// `setup.cfg` contents pinning the wheel tags.
    pub fn setup_cfg(&self) -> String {
        format!(
            "[bdist_wheel]\npython-tag = {}\nplat-name = {}",
            self.python.python_tag(),
            self.bitness.plat_name()
        )
    }

    /// Value of `CL` pointing the compiler at the sysroot's Python headers.
    pub fn cl_include(&self, sysroot: &Utf8Path) -> String {
        format!("/I\"{}\\include\\python{}\"", sysroot, self.python.dotted())
    }
}
