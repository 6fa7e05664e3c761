//! Typed component manifests and discovery-directory scanning.
//!
//! Every file in a discovery directory is a manifest describing one
//! component. Manifests are parsed and validated here, before anything is
//! instantiated; they only *name* factories that the server registers in its
//! catalog.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::document::{read_document, DocumentError};
use crate::pattern::PathPattern;

/// Component categories, one per discovery directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Loader,
    Service,
    Middleware,
}

impl ComponentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loader => "loader",
            Self::Service => "service",
            Self::Middleware => "middleware",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Manifest trait
// ---------------------------------------------------------------------------

/// Common behaviour of the three manifest types.
pub trait Manifest: DeserializeOwned {
    const KIND: ComponentKind;

    /// Fills fields derived from the file (e.g. a default name).
    fn complete(&mut self, _path: &Path) {}

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the manifest is unusable.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Declares a loader instance: which registered loader factory to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderManifest {
    /// Name of the registered loader factory.
    pub loader: String,
    /// Free-form options handed to the factory.
    #[serde(default)]
    pub options: Value,
}

impl Manifest for LoaderManifest {
    const KIND: ComponentKind = ComponentKind::Loader;

    fn validate(&self) -> Result<(), String> {
        non_empty("loader", &self.loader)
    }
}

/// Describes a service and the loader that knows how to build it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    /// Service name; defaults to the manifest's file stem.
    #[serde(default)]
    pub name: String,
    /// Key of the loader that instantiates this service.
    pub loader: String,
    /// Registered service definition, for loaders that build from one.
    #[serde(default)]
    pub service: Option<String>,
    /// Path prefix the service's router is nested under.
    #[serde(default)]
    pub mount: Option<String>,
    /// Free-form options interpreted by the loader.
    #[serde(default)]
    pub options: Value,
}

impl ServiceDescriptor {
    /// Creates a descriptor bound to the given loader key.
    #[must_use]
    pub fn new(name: impl Into<String>, loader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loader: loader.into(),
            service: None,
            mount: None,
            options: Value::Null,
        }
    }

    /// The service definition to look up: `service` if set, else `name`.
    #[must_use]
    pub fn definition(&self) -> &str {
        self.service.as_deref().unwrap_or(&self.name)
    }
}

impl Manifest for ServiceDescriptor {
    const KIND: ComponentKind = ComponentKind::Service;

    fn complete(&mut self, path: &Path) {
        if self.name.is_empty() {
            self.name = file_stem(path);
        }
    }

    fn validate(&self) -> Result<(), String> {
        non_empty("loader", &self.loader)?;
        match self.mount.as_deref() {
            Some(mount) if !mount.starts_with('/') || mount == "/" => Err(format!(
                "mount must start with '/' and not be the root: {mount}"
            )),
            // Mounts are literal prefixes; captures and wildcards are route syntax.
            Some(mount) if mount.contains(['{', '}', '*']) => {
                Err(format!("mount must be a literal path: {mount}"))
            }
            _ => Ok(()),
        }
    }
}

/// Declares a middleware instance.
///
/// `order` and `pattern`, when present, take precedence over the values the
/// middleware reports itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareManifest {
    /// Name of the registered middleware factory.
    pub middleware: String,
    /// Any finite number; fractional orders slot between integral ones.
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default)]
    pub pattern: Option<PathPattern>,
    #[serde(default)]
    pub options: Value,
}

impl Manifest for MiddlewareManifest {
    const KIND: ComponentKind = ComponentKind::Middleware;

    fn validate(&self) -> Result<(), String> {
        non_empty("middleware", &self.middleware)?;
        match self.order {
            Some(order) if !order.is_finite() => Err(format!("order must be finite: {order}")),
            _ => Ok(()),
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A manifest together with the file it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered<T> {
    pub path: PathBuf,
    pub manifest: T,
}

/// Errors raised while scanning a directory or reading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read discovery directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("malformed {kind} manifest {path}: {source}")]
    Malformed {
        kind: ComponentKind,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("rejected {kind} manifest {path}: {reason}")]
    Rejected {
        kind: ComponentKind,
        path: PathBuf,
        reason: String,
    },
}

/// Lists the manifest files of a discovery directory in file-name order.
///
/// Subdirectories and dot-files are skipped.
///
/// # Errors
///
/// Returns [`ManifestError::Directory`] if the directory cannot be read.
pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let directory_error = |source| ManifestError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(directory_error)? {
        let path = entry.map_err(directory_error)?.path();
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if hidden || !path.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Reads, completes, and validates a single manifest file.
///
/// # Errors
///
/// Returns an error if the document cannot be read, does not match the
/// manifest shape, or fails validation.
pub fn read_manifest<T: Manifest>(path: &Path) -> Result<T, ManifestError> {
    let document = read_document(path)?;
    let mut manifest: T =
        serde_json::from_value(document).map_err(|source| ManifestError::Malformed {
            kind: T::KIND,
            path: path.to_path_buf(),
            source,
        })?;
    manifest.complete(path);
    manifest
        .validate()
        .map_err(|reason| ManifestError::Rejected {
            kind: T::KIND,
            path: path.to_path_buf(),
            reason,
        })?;
    Ok(manifest)
}

/// Scans `dir` and reads every manifest in file-name order.
///
/// The first failure aborts the scan.
///
/// # Errors
///
/// Propagates the first directory or manifest error.
pub fn load_manifests<T: Manifest>(dir: &Path) -> Result<Vec<Discovered<T>>, ManifestError> {
    let files = scan_directory(dir)?;
    debug!(kind = %T::KIND, dir = %dir.display(), count = files.len(), "scanning manifests");

    files
        .into_iter()
        .map(|path| {
            let manifest = read_manifest::<T>(&path)?;
            Ok(Discovered { path, manifest })
        })
        .collect()
}
