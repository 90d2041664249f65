use std::path::{Path, PathBuf};

use thiserror::Error;

/// The environment variable holding the path to the backend executable
pub const BACKEND_ENV: &str = "FERRON_CGI_BACKEND";

/// The environment variable holding the path to the project root directory
pub const PROJECT_ROOT_ENV: &str = "FERRON_CGI_PROJECT_ROOT";

/// An error in the bridge configuration, detected before the request is read
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("the backend executable path isn't specified (set FERRON_CGI_BACKEND or pass --backend)")]
  MissingBackend,
  #[error("the project root isn't specified (set FERRON_CGI_PROJECT_ROOT or pass --project-root)")]
  MissingProjectRoot,
  #[error("the backend at {} is not executable", .0.display())]
  BackendNotExecutable(PathBuf),
  #[error("the project root at {} is not a directory", .0.display())]
  ProjectRootNotDirectory(PathBuf),
  #[error("invalid command-line arguments: {0}")]
  Arguments(String),
}

/// The bridge configuration, as supplied by the service supervisor
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
  backend: Option<PathBuf>,
  project_root: Option<PathBuf>,
}

impl BridgeConfig {
  /// Creates a configuration, treating empty paths as absent.
  pub fn new(backend: Option<PathBuf>, project_root: Option<PathBuf>) -> Self {
    Self {
      backend: backend.filter(|path| !path.as_os_str().is_empty()),
      project_root: project_root.filter(|path| !path.as_os_str().is_empty()),
    }
  }

  /// Checks that the backend is executable and that the project root is a directory.
  pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
    let backend = self.backend.ok_or(ConfigError::MissingBackend)?;
    let project_root = self.project_root.ok_or(ConfigError::MissingProjectRoot)?;

    if !is_executable(&backend) {
      return Err(ConfigError::BackendNotExecutable(backend));
    }
    if !project_root.is_dir() {
      return Err(ConfigError::ProjectRootNotDirectory(project_root));
    }

    Ok(ValidatedConfig { backend, project_root })
  }
}

/// A configuration whose paths passed the precondition checks
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
  backend: PathBuf,
  project_root: PathBuf,
}

impl ValidatedConfig {
  /// The path to the backend executable
  pub fn backend(&self) -> &Path {
    &self.backend
  }

  /// The path to the project root directory
  pub fn project_root(&self) -> &Path {
    &self.project_root
  }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;

  match std::fs::metadata(path) {
    Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
    Err(_) => false,
  }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
  path.is_file()
}
