// crates/slb-exec/src/rollback.rs
// ============================================================================
// Module: Rollback Capture
// Description: Pre-execution state capture for destructive operations.
// Purpose: Snapshot what a destructive command would remove, and restore it.
// Dependencies: slb-core, flate2, tar
// ============================================================================

//! ## Overview
//! Rollback capture is selected by inspecting the command text: file
//! deletions snapshot the target paths into a gzipped tarball (symlinks are
//! preserved as symlink entries, never followed), git history rewrites
//! record HEAD, branch, and a diff file, and kubernetes deletions save the
//! live manifests. Restore unpacks filesystem captures and refuses to write
//! through any symlink component in a destination path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Write;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use slb_core::CommandSpec;
use slb_core::RollbackCapture;
use slb_core::RollbackDescriptor;
use slb_core::Timestamp;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while capturing or restoring rollback state.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Filesystem I/O failure.
    #[error("rollback io error: {0}")]
    Io(String),
    /// Capture would exceed the configured size budget.
    #[error("rollback capture too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Combined uncompressed size of the capture targets.
        actual_bytes: u64,
        /// Configured budget in bytes.
        max_bytes: u64,
    },
    /// No capture target exists on disk.
    #[error("rollback has nothing to capture")]
    NothingToCapture,
    /// An external tool (git, kubectl) failed.
    #[error("rollback tool failure: {0}")]
    Tool(String),
    /// Archive contents failed validation during restore.
    #[error("rollback archive invalid: {0}")]
    BadArchive(String),
    /// A destination path component is a symlink.
    #[error("rollback restore refused: {0} is a symlink")]
    SymlinkComponent(String),
    /// The capture kind has no automated restore.
    #[error("rollback restore unsupported: {0}")]
    Unsupported(String),
}

/// Maps an I/O error with its path context.
fn io_error(context: &str, err: &std::io::Error) -> RollbackError {
    RollbackError::Io(format!("{context}: {err}"))
}

// ============================================================================
// SECTION: Plan Selection
// ============================================================================

/// Capture strategy selected for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackPlan {
    /// Snapshot the paths a file deletion targets.
    Filesystem {
        /// Delete targets as written on the command line.
        paths: Vec<String>,
    },
    /// Record git HEAD, branch, and working-tree diff.
    Git,
    /// Save live manifests for the objects a delete names.
    Kubernetes {
        /// (kind, name) pairs the delete references.
        objects: Vec<(String, String)>,
        /// Namespace argument, when present.
        namespace: Option<String>,
    },
}

/// Selects a capture strategy by inspecting the command text.
///
/// Returns `None` when the command has no supported rollback.
#[must_use]
pub fn plan_rollback(command: &CommandSpec) -> Option<RollbackPlan> {
    let tokens: Vec<&str> = command.raw.split_whitespace().collect();
    for (index, token) in tokens.iter().enumerate() {
        let program = token.rsplit('/').next().unwrap_or(token);
        match program {
            "rm" => {
                let paths: Vec<String> = tokens[index + 1 ..]
                    .iter()
                    .take_while(|argument| !is_connector(argument))
                    .filter(|argument| !argument.starts_with('-'))
                    .map(|argument| (*argument).to_string())
                    .collect();
                if !paths.is_empty() {
                    return Some(RollbackPlan::Filesystem {
                        paths,
                    });
                }
            }
            "git" => {
                let rest = &tokens[index + 1 ..];
                let rewrites = matches!(rest.first().copied(), Some("clean"))
                    || (matches!(rest.first().copied(), Some("reset"))
                        && rest.contains(&"--hard"));
                if rewrites {
                    return Some(RollbackPlan::Git);
                }
            }
            "kubectl" => {
                let rest = &tokens[index + 1 ..];
                if rest.first().copied() == Some("delete") {
                    return parse_kubectl_delete(&rest[1 ..]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns true for shell connector tokens that end an argument list.
fn is_connector(token: &str) -> bool {
    matches!(token, ";" | "&&" | "||" | "|" | "&")
}

/// Parses `kubectl delete <kind> <name>...` arguments.
fn parse_kubectl_delete(arguments: &[&str]) -> Option<RollbackPlan> {
    let mut namespace = None;
    let mut positional = Vec::new();
    let mut index = 0;
    while index < arguments.len() {
        let argument = arguments[index];
        if argument == "-n" || argument == "--namespace" {
            namespace = arguments.get(index + 1).map(|value| (*value).to_string());
            index += 2;
        } else if argument.starts_with('-') || is_connector(argument) {
            index += 1;
        } else {
            positional.push(argument.to_string());
            index += 1;
        }
    }
    let (kind, names) = positional.split_first()?;
    if names.is_empty() {
        return None;
    }
    Some(RollbackPlan::Kubernetes {
        objects: names.iter().map(|name| (kind.clone(), name.clone())).collect(),
        namespace,
    })
}

// ============================================================================
// SECTION: Capture
// ============================================================================

/// Captures rollback state for a plan into `base_dir`.
///
/// # Errors
///
/// Returns [`RollbackError`] when targets are missing, the size budget is
/// exceeded, or an external tool fails.
pub fn capture_rollback(
    plan: &RollbackPlan,
    command: &CommandSpec,
    base_dir: &Path,
    max_bytes: u64,
    now: Timestamp,
) -> Result<RollbackDescriptor, RollbackError> {
    std::fs::create_dir_all(base_dir).map_err(|err| io_error("create rollback dir", &err))?;
    let capture = match plan {
        RollbackPlan::Filesystem {
            paths,
        } => capture_filesystem(paths, &command.cwd, base_dir, max_bytes)?,
        RollbackPlan::Git => capture_git(&command.cwd, base_dir)?,
        RollbackPlan::Kubernetes {
            objects,
            namespace,
        } => capture_kubernetes(objects, namespace.as_deref(), base_dir)?,
    };
    Ok(RollbackDescriptor {
        base_dir: base_dir.to_string_lossy().into_owned(),
        captures: vec![capture],
        captured_at: now,
    })
}

/// Snapshot name for filesystem captures.
const FILESYSTEM_ARCHIVE: &str = "filesystem.tar.gz";
/// Diff file name for git captures.
const GIT_DIFF_FILE: &str = "git.diff";

/// Tars the delete targets, preserving symlinks as entries.
fn capture_filesystem(
    paths: &[String],
    cwd: &str,
    base_dir: &Path,
    max_bytes: u64,
) -> Result<RollbackCapture, RollbackError> {
    let root = Path::new(cwd);
    let mut targets: Vec<(String, PathBuf)> = Vec::new();
    let mut total_bytes = 0u64;
    for raw_path in paths {
        let absolute = resolve_target(root, raw_path);
        if std::fs::symlink_metadata(&absolute).is_ok() {
            total_bytes = total_bytes.saturating_add(measure(&absolute)?);
            targets.push((archive_name(root, &absolute), absolute));
        }
    }
    if targets.is_empty() {
        return Err(RollbackError::NothingToCapture);
    }
    if total_bytes > max_bytes {
        return Err(RollbackError::TooLarge {
            actual_bytes: total_bytes,
            max_bytes,
        });
    }
    let archive_path = base_dir.join(FILESYSTEM_ARCHIVE);
    let file =
        File::create(&archive_path).map_err(|err| io_error("create rollback archive", &err))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    for (name, absolute) in &targets {
        let metadata = std::fs::symlink_metadata(absolute)
            .map_err(|err| io_error("stat capture target", &err))?;
        if metadata.is_dir() {
            builder
                .append_dir_all(name, absolute)
                .map_err(|err| io_error("archive directory", &err))?;
        } else {
            builder
                .append_path_with_name(absolute, name)
                .map_err(|err| io_error("archive file", &err))?;
        }
    }
    let encoder = builder.into_inner().map_err(|err| io_error("finish archive", &err))?;
    encoder.finish().map_err(|err| io_error("finish gzip", &err))?;
    Ok(RollbackCapture::Filesystem {
        archive: FILESYSTEM_ARCHIVE.to_string(),
        paths: targets.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Resolves one delete target against the working directory.
fn resolve_target(root: &Path, raw_path: &str) -> PathBuf {
    let trimmed = raw_path.trim_end_matches('/');
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

/// Returns the in-archive name for a target, relative to the capture root.
fn archive_name(root: &Path, absolute: &Path) -> String {
    absolute.strip_prefix(root).map_or_else(
        |_| absolute.to_string_lossy().trim_start_matches('/').to_string(),
        |relative| relative.to_string_lossy().into_owned(),
    )
}

/// Sums the uncompressed size of a target without following symlinks.
fn measure(path: &Path) -> Result<u64, RollbackError> {
    let metadata =
        std::fs::symlink_metadata(path).map_err(|err| io_error("stat capture target", &err))?;
    if metadata.file_type().is_symlink() {
        return Ok(0);
    }
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut total = 0u64;
    let entries = std::fs::read_dir(path).map_err(|err| io_error("walk capture target", &err))?;
    for entry in entries {
        let entry = entry.map_err(|err| io_error("walk capture target", &err))?;
        total = total.saturating_add(measure(&entry.path())?);
    }
    Ok(total)
}

/// Records git HEAD, branch, and a diff of the working tree.
fn capture_git(cwd: &str, base_dir: &Path) -> Result<RollbackCapture, RollbackError> {
    let head = run_tool("git", &["rev-parse", "HEAD"], cwd)?;
    let branch = run_tool("git", &["rev-parse", "--abbrev-ref", "HEAD"], cwd)?;
    let diff = run_tool("git", &["diff", "HEAD"], cwd)?;
    let diff_path = base_dir.join(GIT_DIFF_FILE);
    let mut file =
        File::create(&diff_path).map_err(|err| io_error("create git diff file", &err))?;
    file.write_all(diff.as_bytes()).map_err(|err| io_error("write git diff file", &err))?;
    Ok(RollbackCapture::Git {
        head: head.trim().to_string(),
        branch: branch.trim().to_string(),
        diff_file: GIT_DIFF_FILE.to_string(),
    })
}

/// Saves the live manifest of each referenced object.
fn capture_kubernetes(
    objects: &[(String, String)],
    namespace: Option<&str>,
    base_dir: &Path,
) -> Result<RollbackCapture, RollbackError> {
    let manifest_dir = base_dir.join("k8s");
    std::fs::create_dir_all(&manifest_dir)
        .map_err(|err| io_error("create manifest dir", &err))?;
    let mut manifests = Vec::new();
    for (index, (kind, name)) in objects.iter().enumerate() {
        let mut arguments = vec!["get", kind.as_str(), name.as_str(), "-o", "yaml"];
        if let Some(namespace) = namespace {
            arguments.push("-n");
            arguments.push(namespace);
        }
        let manifest = run_tool("kubectl", &arguments, ".")?;
        let file_name = format!("k8s/{index}_{name}.yaml");
        let path = base_dir.join(&file_name);
        let mut file = File::create(&path).map_err(|err| io_error("create manifest", &err))?;
        file.write_all(manifest.as_bytes()).map_err(|err| io_error("write manifest", &err))?;
        manifests.push(file_name);
    }
    Ok(RollbackCapture::Kubernetes {
        manifests,
    })
}

/// Runs an external tool and returns its stdout.
fn run_tool(program: &str, arguments: &[&str], cwd: &str) -> Result<String, RollbackError> {
    let output = Command::new(program)
        .args(arguments)
        .current_dir(cwd)
        .output()
        .map_err(|err| RollbackError::Tool(format!("{program} spawn failed: {err}")))?;
    if !output.status.success() {
        return Err(RollbackError::Tool(format!(
            "{program} {} failed: {}",
            arguments.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|_| RollbackError::Tool(format!("{program} produced non-utf8 output")))
}

// ============================================================================
// SECTION: Restore
// ============================================================================

/// Restores a rollback capture under `target_root`.
///
/// Only filesystem captures restore automatically; git and kubernetes
/// captures name their artifacts for manual application.
///
/// # Errors
///
/// Returns [`RollbackError::SymlinkComponent`] when a destination path
/// passes through a symlink, and [`RollbackError::Unsupported`] for
/// capture kinds without automated restore.
pub fn restore_rollback(
    descriptor: &RollbackDescriptor,
    target_root: &Path,
) -> Result<(), RollbackError> {
    for capture in &descriptor.captures {
        match capture {
            RollbackCapture::Filesystem {
                archive,
                ..
            } => {
                let archive_path = Path::new(&descriptor.base_dir).join(archive);
                restore_filesystem(&archive_path, target_root)?;
            }
            RollbackCapture::Git {
                diff_file,
                ..
            } => {
                return Err(RollbackError::Unsupported(format!(
                    "git capture; apply {} from {}",
                    diff_file, descriptor.base_dir
                )));
            }
            RollbackCapture::Kubernetes {
                ..
            } => {
                return Err(RollbackError::Unsupported(format!(
                    "kubernetes capture; apply manifests from {}",
                    descriptor.base_dir
                )));
            }
        }
    }
    Ok(())
}

/// Unpacks a filesystem archive, checking every destination component.
fn restore_filesystem(archive_path: &Path, target_root: &Path) -> Result<(), RollbackError> {
    let file = File::open(archive_path).map_err(|err| io_error("open rollback archive", &err))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive.entries().map_err(|err| io_error("read rollback archive", &err))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| io_error("read archive entry", &err))?;
        let relative = entry
            .path()
            .map_err(|err| io_error("read entry path", &err))?
            .into_owned();
        validate_archive_path(&relative)?;
        ensure_no_symlink_components(target_root, &relative)?;
        let destination = target_root.join(&relative);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| io_error("create restore parent", &err))?;
        }
        entry.unpack(&destination).map_err(|err| io_error("unpack entry", &err))?;
    }
    Ok(())
}

/// Rejects absolute entries and parent traversal inside the archive.
fn validate_archive_path(relative: &Path) -> Result<(), RollbackError> {
    if relative.is_absolute() {
        return Err(RollbackError::BadArchive(format!(
            "absolute entry {}",
            relative.display()
        )));
    }
    for component in relative.components() {
        if matches!(component, Component::ParentDir) {
            return Err(RollbackError::BadArchive(format!(
                "parent traversal in {}",
                relative.display()
            )));
        }
    }
    Ok(())
}

/// Fails when any existing component on the destination path is a symlink.
///
/// Swapping a parent directory for a symlink between capture and restore
/// would otherwise let the unpack write outside the capture root.
fn ensure_no_symlink_components(
    target_root: &Path,
    relative: &Path,
) -> Result<(), RollbackError> {
    let mut current = target_root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if let Ok(metadata) = std::fs::symlink_metadata(&current) {
            if metadata.file_type().is_symlink() {
                return Err(RollbackError::SymlinkComponent(current.display().to_string()));
            }
        }
        // The final component may itself be a symlink entry being restored;
        // only the directories leading to it are checked.
        if components.peek().is_none() {
            break;
        }
        current.push(component);
    }
    Ok(())
}
