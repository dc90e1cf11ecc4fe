//! Sidecar mutation on the remote host: delete stale lyric files next to a
//! track, then write and verify the new `.lrc`.

use std::io::Write;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::checkpoint::ErrorLog;
use crate::config::PathMapping;
use crate::error::ItemFailure;
use crate::models::ResolvedLyrics;
use crate::policy::ServicePolicy;
use crate::remote::{RemoteCommand, RemoteExecutor};
use crate::safety::validate_remote_path;

/// Extensions treated as lyric sidecars.
pub const SIDECAR_EXTENSIONS: [&str; 2] = ["lrc", "txt"];

/// Extension of files this tool writes.
pub const OUTPUT_EXTENSION: &str = "lrc";

// ============================================================================
// Paths
// ============================================================================

/// Ordered prefix substitutions from catalog paths to host paths.
#[derive(Clone, Debug, Default)]
pub struct PathMapper {
    mappings: Vec<PathMapping>,
}

impl PathMapper {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        Self { mappings }
    }

    /// Applies the first mapping whose prefix matches; unchanged otherwise.
    pub fn map(&self, catalog_path: &str) -> String {
        self.mappings
            .iter()
            .find_map(|m| {
                catalog_path
                    .strip_prefix(m.from.as_str())
                    .map(|rest| format!("{}{}", m.to, rest))
            })
            .unwrap_or_else(|| catalog_path.to_string())
    }
}

/// A track's location on the remote host, split for sidecar handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTrackPath {
    pub audio: String,
    pub dir: String,
    /// File name without its final extension.
    pub base: String,
}

impl RemoteTrackPath {
    pub fn parse(audio: &str) -> Result<Self, ItemFailure> {
        validate_remote_path(audio).map_err(|reason| ItemFailure::UnsafePath {
            path: audio.to_string(),
            reason,
        })?;
        // validate_remote_path guarantees a '/' with a non-empty name after it.
        let (dir, file_name) = audio.rsplit_once('/').unwrap_or(("", audio));
        Ok(Self {
            audio: audio.to_string(),
            dir: dir.to_string(),
            base: file_stem(file_name).to_string(),
        })
    }

    /// `<dir>/<base>.lrc`
    pub fn sidecar(&self) -> String {
        format!("{}/{}.{}", self.dir, self.base, OUTPUT_EXTENSION)
    }
}

/// File name minus its last extension. Leading dots do not start an extension.
fn file_stem(file_name: &str) -> &str {
    let leading = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[leading..].rfind('.') {
        Some(idx) => &file_name[..leading + idx],
        None => file_name,
    }
}

/// Escapes `find -name` glob metacharacters so the pattern matches literally.
pub fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Mutator
// ============================================================================

/// Deletes and writes sidecars through a [`RemoteExecutor`].
pub struct SidecarMutator<E> {
    executor: E,
    mapper: PathMapper,
    policy: ServicePolicy,
}

impl<E: RemoteExecutor> SidecarMutator<E> {
    pub fn new(executor: E, mapper: PathMapper, policy: ServicePolicy) -> Self {
        Self {
            executor,
            mapper,
            policy,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Maps a catalog path to its remote location and checks it is safe.
    pub fn locate(&self, catalog_path: &str) -> Result<RemoteTrackPath, ItemFailure> {
        RemoteTrackPath::parse(&self.mapper.map(catalog_path))
    }

    /// The `find` invocation that prints and deletes the track's sidecars.
    pub fn delete_command(target: &RemoteTrackPath) -> RemoteCommand {
        let base = glob_escape(&target.base);
        let mut cmd = RemoteCommand::new("find")
            .arg(target.dir.as_str())
            .args(["-maxdepth", "1", "-type", "f", "("]);
        for (i, ext) in SIDECAR_EXTENSIONS.iter().enumerate() {
            if i > 0 {
                cmd = cmd.arg("-o");
            }
            cmd = cmd.arg("-name").arg(format!("{}.{}", base, ext));
        }
        cmd.args([")", "-print", "-delete"])
    }

    /// Removes every `<base>.lrc` / `<base>.txt` beside the track.
    ///
    /// Returns the deleted paths; finding none is success.
    pub fn clear(&self, target: &RemoteTrackPath) -> Result<Vec<String>, ItemFailure> {
        let cmd = Self::delete_command(target);
        let output = self
            .policy
            .retry("delete sidecars", || {
                self.executor.run(&cmd, self.policy.timeout())?.checked()
            })
            .map_err(|source| ItemFailure::Delete {
                path: target.audio.clone(),
                source,
            })?;

        let deleted: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if deleted.is_empty() {
            debug!(dir = %target.dir, base = %target.base, "no existing lyric files");
        } else {
            for path in &deleted {
                info!(path = %path, "deleted existing lyric file");
            }
        }
        Ok(deleted)
    }

    /// Uploads `lyrics` to `<dir>/<base>.lrc` and confirms it exists.
    ///
    /// Returns the size reported by the verification listing, when parseable.
    pub fn write(
        &self,
        target: &RemoteTrackPath,
        lyrics: &ResolvedLyrics,
    ) -> Result<Option<u64>, ItemFailure> {
        let sidecar = target.sidecar();
        let stage_err = |source| ItemFailure::Stage {
            path: sidecar.clone(),
            source,
        };

        let mut staged = NamedTempFile::new().map_err(stage_err)?;
        staged
            .write_all(lyrics.text().as_bytes())
            .and_then(|_| staged.flush())
            .map_err(stage_err)?;

        self.policy
            .retry("write sidecar", || {
                self.executor
                    .copy_file(staged.path(), &sidecar, self.policy.timeout())
            })
            .map_err(|source| ItemFailure::Write {
                path: sidecar.clone(),
                source,
            })?;

        let listing = RemoteCommand::new("ls").args(["-ln", "--"]).arg(sidecar.as_str());
        let output = self
            .policy
            .retry("verify sidecar", || {
                self.executor.run(&listing, self.policy.timeout())?.checked()
            })
            .map_err(|source| ItemFailure::Verify {
                path: sidecar.clone(),
                source,
            })?;

        let size = listed_size(&output.stdout);
        info!(
            path = %sidecar,
            bytes = size,
            provenance = %lyrics.provenance(),
            "wrote lyric file"
        );
        Ok(size)
    }

    /// Clears the track's sidecars, then asks `lookup` for lyrics and writes
    /// them when it returns some.
    ///
    /// `lookup` is not called when deletion fails, so a stale sidecar is never
    /// left beside fresh lyrics. Returns the lyrics that were written.
    pub fn refresh<F>(
        &self,
        target: &RemoteTrackPath,
        lookup: F,
    ) -> Result<Option<ResolvedLyrics>, ItemFailure>
    where
        F: FnOnce() -> Option<ResolvedLyrics>,
    {
        self.clear(target)?;
        let Some(lyrics) = lookup() else {
            debug!(dir = %target.dir, base = %target.base, "sidecars cleared, no lyrics to write");
            return Ok(None);
        };
        self.write(target, &lyrics)?;
        Ok(Some(lyrics))
    }

    /// Deletes stale sidecars and, when `resolved` is present, writes the new one.
    ///
    /// Returns `false` if deletion, the write or its verification fails; the
    /// failure is written to `errors`. With `resolved = None` no file is created.
    /// Same steps as [`refresh`](Self::refresh) with the lyrics known up front.
    pub fn clear_and_write(
        &self,
        catalog_path: &str,
        resolved: Option<&ResolvedLyrics>,
        errors: &mut dyn ErrorLog,
    ) -> bool {
        let outcome = self
            .locate(catalog_path)
            .and_then(|target| self.refresh(&target, || resolved.cloned()));
        match outcome {
            Ok(_) => true,
            Err(failure) => {
                errors.log_error(&failure.to_string());
                false
            }
        }
    }
}

/// Size column of `ls -ln` output.
fn listed_size(listing: &str) -> Option<u64> {
    listing
        .lines()
        .next()?
        .split_whitespace()
        .nth(4)?
        .parse()
        .ok()
}
