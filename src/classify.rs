//! Decide whether a command head is a sandboxed binary or a host tool.
//!
//! Sandboxed binaries are ELF files whose identification prefix carries the
//! NaCl OS/ABI value in byte 7. Only the first 8 bytes are read.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::trace;

/// OS/ABI value stamped into NaCl ELF executables.
pub const NACL_OS_ABI: u8 = 0x7B;

/// Number of header bytes inspected.
const IDENT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Built for the sandboxed runtime; must be launched through the wrapper.
    Sandboxed,
    /// Anything else runs directly on the host.
    Host,
}

impl Classification {
    pub fn is_sandboxed(self) -> bool {
        matches!(self, Classification::Sandboxed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Sandboxed => "sandboxed",
            Classification::Host => "host",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("executable '{name}' not found")]
    NotFound {
        name: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to read header of {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is shorter than an ELF ident (8 bytes)", path.display())]
    ShortHeader { path: PathBuf },
}

/// First 8 bytes of an ELF file (`e_ident[0..8]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfIdent {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub os_abi: u8,
}

impl ElfIdent {
    pub fn from_bytes(bytes: [u8; IDENT_LEN]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            class: bytes[4],
            data: bytes[5],
            version: bytes[6],
            os_abi: bytes[7],
        }
    }

    /// Read the identification prefix from the start of `path`.
    pub fn read(path: &Path) -> Result<Self, ClassifyError> {
        let io_err = |source: io::Error| ClassifyError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut buf = [0u8; IDENT_LEN];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(Self::from_bytes(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ClassifyError::ShortHeader {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => Err(io_err(e)),
        }
    }
}

/// Classifies a command head. The rewriter decides what to do on failure.
pub trait Classifier {
    fn classify(&self, head: &str) -> Result<Classification, ClassifyError>;
}

/// Resolves the head on the search path and inspects its ELF header.
#[derive(Debug, Clone)]
pub struct HeaderClassifier {
    search_path: Option<OsString>,
    os_abi: u8,
}

impl Default for HeaderClassifier {
    fn default() -> Self {
        Self {
            search_path: None,
            os_abi: NACL_OS_ABI,
        }
    }
}

impl HeaderClassifier {
    pub fn new(search_path: Option<OsString>, os_abi: u8) -> Self {
        Self {
            search_path,
            os_abi,
        }
    }

    /// Resolve a bare command name (or a path) to the file that would run.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ClassifyError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.resolve_in(name, &cwd)
    }

    /// Resolve `name` as if the current directory were `cwd`.
    ///
    /// An existing regular file wins outright, executable or not, bare name or
    /// not, as lit's own lookup does. Otherwise the configured search path
    /// (or the process `PATH`) is searched.
    pub fn resolve_in(&self, name: &str, cwd: &Path) -> Result<PathBuf, ClassifyError> {
        let direct = cwd.join(name);
        if direct.is_file() {
            return Ok(direct);
        }

        let paths = match &self.search_path {
            Some(paths) => Some(paths.clone()),
            None => std::env::var_os("PATH"),
        };
        which::which_in(name, paths, cwd).map_err(|source| ClassifyError::NotFound {
            name: name.to_string(),
            source,
        })
    }
}

impl Classifier for HeaderClassifier {
    fn classify(&self, head: &str) -> Result<Classification, ClassifyError> {
        let path = self.resolve(head)?;
        let ident = ElfIdent::read(&path)?;
        trace!(head, path = %path.display(), os_abi = ident.os_abi, "classify:header");
        if ident.os_abi == self.os_abi {
            Ok(Classification::Sandboxed)
        } else {
            Ok(Classification::Host)
        }
    }
}
