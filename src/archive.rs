use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use git2::{Repository, StatusOptions};
use glob::Pattern;
use log::{info, warn};
use mongodb::bson::{doc, Bson, Document};
use walkdir::WalkDir;

use crate::blob::BlobStore;
use crate::error::Error;

// provenance of an uploaded code package. either the whole tuple is known
// or none of it is: a directory that is not a git work tree(or has no
// commits, or no origin remote) yields None, never a partially filled state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitState {
    pub repository: String,
    pub author_name: String,
    pub author_email: String,
    pub commit: String,
    pub commit_message: String,
    pub dirty: bool,
}

pub fn describe_git_state(directory: &Path) -> Option<GitState> {
    let repo = Repository::open(directory).ok()?;
    let head = repo.head().ok()?.peel_to_commit().ok()?;
    let url = {
        let remote = repo.find_remote("origin").ok()?;
        remote.url()?.to_string()
    };
    let dirty = {
        let mut opts = StatusOptions::new();
        repo.statuses(Some(&mut opts))
            .map(|statuses| !statuses.is_empty())
            .unwrap_or(false)
    };
    let author = head.author();
    Some(GitState {
        repository: url,
        author_name: author.name().unwrap_or_default().to_string(),
        author_email: author.email().unwrap_or_default().to_string(),
        commit: head.id().to_string(),
        commit_message: head.message().unwrap_or_default().to_string(),
        dirty,
    })
}

fn provenance_document(state: &Option<GitState>) -> Document {
    match state {
        Some(s) => doc! {
            "gitRepository": s.repository.clone(),
            "gitAuthorName": s.author_name.clone(),
            "gitAuthorEmail": s.author_email.clone(),
            "gitCommit": s.commit.clone(),
            "gitCommitMessage": s.commit_message.clone(),
            "gitWasDirty": s.dirty,
        },
        None => doc! {
            "gitRepository": Bson::Null,
            "gitAuthorName": Bson::Null,
            "gitAuthorEmail": Bson::Null,
            "gitCommit": Bson::Null,
            "gitCommitMessage": Bson::Null,
            "gitWasDirty": Bson::Null,
        },
    }
}

// true when joining `relative` under an extraction root cannot land outside
// of it. pure component arithmetic, no filesystem access: a `..` may never
// take the running depth below the root.
fn stays_within_root(relative: &Path) -> bool {
    let mut depth: i32 = 0;
    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return false,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
        }
    }
    true
}

/// Snapshots a working directory into a gzip-compressed tar archive in the
/// blob store, and restores such archives on a worker.
pub struct ArchivePackager {
    blob: Arc<dyn BlobStore>,
}

impl ArchivePackager {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        ArchivePackager { blob }
    }

    /// Archive `directory` (minus entries whose base name matches any of the
    /// shell-style `excludes`, subtrees included) and upload it tagged with
    /// the directory's git provenance. Returns the archive handle and the
    /// included entry paths in traversal order.
    pub async fn pack(
        &self,
        directory: &Path,
        excludes: &[String],
    ) -> Result<(String, Vec<String>), Error> {
        let patterns = excludes
            .iter()
            .map(|e| Pattern::new(e))
            .collect::<Result<Vec<_>, _>>()?;
        let excluded = |name: &std::ffi::OsStr| {
            let name = name.to_string_lossy();
            patterns.iter().any(|p| p.matches(&name))
        };

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let mut included = vec![];
        let walk = WalkDir::new(directory)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !excluded(e.file_name()));
        for entry in walk {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let relative = entry
                .path()
                .strip_prefix(directory)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?
                .to_path_buf();
            if entry.file_type().is_dir() {
                builder.append_dir(&relative, entry.path())?;
            } else {
                builder.append_path_with_name(entry.path(), &relative)?;
            }
            included.push(relative.to_string_lossy().into_owned());
        }
        let bytes = builder.into_inner()?.finish()?;

        let basename = directory
            .canonicalize()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "code".to_string());
        let provenance = describe_git_state(directory);
        if provenance.is_none() {
            warn!("`{}` carries no usable git state, uploading without provenance.",
                directory.display()
            );
        }

        let handle = self
            .blob
            .put(
                bytes,
                &format!("{basename}.tgz"),
                provenance_document(&provenance),
            )
            .await?;
        info!(
            "Packaged {} entries from `{}` as `{handle}`.",
            included.len(),
            directory.display()
        );
        Ok((handle, included))
    }

    /// Download the archive behind `handle` and extract it under
    /// `destination`. Every entry is validated before anything is written;
    /// an entry that would resolve outside the destination root(`..`
    /// segments, absolute paths, escaping link targets) fails the whole
    /// call with [`Error::PathTraversal`] and leaves the destination
    /// untouched.
    pub async fn unpack(&self, handle: &str, destination: &Path) -> Result<(), Error> {
        let bytes = self.blob.get(handle).await?;

        // validation pass over the fully downloaded archive
        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        for entry in archive.entries()? {
            let entry = entry?;
            let path: PathBuf = entry.path()?.into_owned();
            if !stays_within_root(&path) {
                return Err(Error::PathTraversal(path.to_string_lossy().into_owned()));
            }
            if let Some(link) = entry.link_name()? {
                let base = path.parent().unwrap_or_else(|| Path::new(""));
                if link.is_absolute() || !stays_within_root(&base.join(&link)) {
                    return Err(Error::PathTraversal(path.to_string_lossy().into_owned()));
                }
            }
        }

        // no entry escapes; extract for real
        fs::create_dir_all(destination)?;
        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        archive.unpack(destination)?;
        info!("Unpacked `{handle}` into `{}`.", destination.display());
        Ok(())
    }
}
