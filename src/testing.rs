//! In-memory stand-ins for the catalog, the lyric service and the remote host.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogSource, ItemsPage};
use crate::error::TransportError;
use crate::lrclib::LyricSource;
use crate::models::{Library, LyricCandidate, LyricQuery, Track};
use crate::remote::{CommandOutput, RemoteCommand, RemoteExecutor};

fn unavailable(service: &'static str) -> TransportError {
    TransportError::Status {
        service,
        status: 503,
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Default)]
pub struct MemoryCatalog {
    tracks: Vec<Track>,
    libraries: Vec<Library>,
    fail_next: Cell<usize>,
    fail_from: Cell<Option<u64>>,
    calls: RefCell<Vec<(Option<String>, u64, usize)>>,
}

impl MemoryCatalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    pub fn with_libraries(mut self, libraries: Vec<Library>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Fails the next `n` listing calls.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.set(n);
    }

    /// Fails every listing call at or beyond `offset`.
    pub fn fail_from(&self, offset: u64) {
        self.fail_from.set(Some(offset));
    }

    pub fn calls(&self) -> Vec<(Option<String>, u64, usize)> {
        self.calls.borrow().clone()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.calls.borrow().iter().map(|c| c.1).collect()
    }
}

impl CatalogSource for MemoryCatalog {
    fn list_tracks(
        &self,
        scope: Option<&str>,
        offset: u64,
        limit: usize,
        _timeout: Duration,
    ) -> Result<ItemsPage, TransportError> {
        self.calls
            .borrow_mut()
            .push((scope.map(str::to_string), offset, limit));
        if self.fail_next.get() > 0 {
            self.fail_next.set(self.fail_next.get() - 1);
            return Err(unavailable("catalog"));
        }
        if self.fail_from.get().is_some_and(|from| offset >= from) {
            return Err(unavailable("catalog"));
        }
        Ok(ItemsPage {
            tracks: self
                .tracks
                .iter()
                .skip(offset as usize)
                .take(limit)
                .cloned()
                .collect(),
            total_record_count: self.tracks.len() as u64,
        })
    }

    fn list_libraries(&self, _timeout: Duration) -> Result<Vec<Library>, TransportError> {
        Ok(self.libraries.clone())
    }
}

// ============================================================================
// Lyric service
// ============================================================================

/// Answers by (cleaned) track title; unknown titles get no candidates.
#[derive(Default)]
pub struct FakeLyrics {
    responses: RefCell<HashMap<String, Vec<LyricCandidate>>>,
    fail_next: Cell<usize>,
    queries: RefCell<Vec<LyricQuery>>,
    watched: RefCell<Option<PathBuf>>,
    snapshots: RefCell<Vec<Option<String>>>,
}

impl FakeLyrics {
    pub fn respond(&self, title: &str, candidates: Vec<LyricCandidate>) {
        self.responses
            .borrow_mut()
            .insert(title.to_string(), candidates);
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.set(n);
    }

    pub fn queries(&self) -> Vec<LyricQuery> {
        self.queries.borrow().clone()
    }

    /// Captures the contents of `path` at every search.
    pub fn watch_file(&self, path: PathBuf) {
        *self.watched.borrow_mut() = Some(path);
    }

    pub fn snapshots(&self) -> Vec<Option<String>> {
        self.snapshots.borrow().clone()
    }
}

impl LyricSource for FakeLyrics {
    fn search(
        &self,
        query: &LyricQuery,
        _timeout: Duration,
    ) -> Result<Vec<LyricCandidate>, TransportError> {
        self.queries.borrow_mut().push(query.clone());
        if let Some(path) = self.watched.borrow().as_ref() {
            self.snapshots
                .borrow_mut()
                .push(fs::read_to_string(path).ok());
        }
        if self.fail_next.get() > 0 {
            self.fail_next.set(self.fail_next.get() - 1);
            return Err(unavailable("lookup"));
        }
        Ok(self
            .responses
            .borrow()
            .get(&query.title)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Remote host
// ============================================================================

/// A remote filesystem held in memory. Understands the `find` and `ls`
/// invocations the sidecar mutator issues.
#[derive(Default)]
pub struct FakeRemote {
    files: RefCell<BTreeMap<String, String>>,
    commands: RefCell<Vec<String>>,
    uploads: Cell<usize>,
    deletes: Cell<usize>,
    fail_deletes: Cell<bool>,
    fail_uploads: Cell<bool>,
    drop_uploads: Cell<bool>,
    trip: RefCell<Option<(usize, Arc<AtomicBool>)>>,
}

impl FakeRemote {
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.get()
    }

    pub fn set_fail_deletes(&self, value: bool) {
        self.fail_deletes.set(value);
    }

    pub fn set_fail_uploads(&self, value: bool) {
        self.fail_uploads.set(value);
    }

    /// Accepts uploads but never stores them, so verification fails.
    pub fn set_drop_uploads(&self, value: bool) {
        self.drop_uploads.set(value);
    }

    /// Raises `flag` once `n` delete commands have run.
    pub fn trip_after_deletes(&self, n: usize, flag: Arc<AtomicBool>) {
        *self.trip.borrow_mut() = Some((n, flag));
    }

    fn find(&self, argv: &[String]) -> CommandOutput {
        self.deletes.set(self.deletes.get() + 1);
        if let Some((n, flag)) = self.trip.borrow().as_ref() {
            if self.deletes.get() >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.fail_deletes.get() {
            return failure(1, "find: Permission denied");
        }

        let dir = argv.first().cloned().unwrap_or_default();
        let names: Vec<String> = argv
            .windows(2)
            .filter(|w| w[0] == "-name")
            .map(|w| unescape_glob(&w[1]))
            .collect();

        let mut files = self.files.borrow_mut();
        let doomed: Vec<String> = files
            .keys()
            .filter(|path| {
                path.rsplit_once('/')
                    .is_some_and(|(parent, name)| parent == dir && names.iter().any(|n| n == name))
            })
            .cloned()
            .collect();
        let mut stdout = String::new();
        for path in doomed {
            files.remove(&path);
            stdout.push_str(&path);
            stdout.push('\n');
        }
        CommandOutput {
            success: true,
            code: Some(0),
            stdout,
            stderr: String::new(),
        }
    }

    fn ls(&self, argv: &[String]) -> CommandOutput {
        let Some(path) = argv.last() else {
            return failure(2, "ls: missing operand");
        };
        match self.files.borrow().get(path) {
            Some(content) => CommandOutput {
                success: true,
                code: Some(0),
                stdout: format!(
                    "-rw-r--r-- 1 1000 1000 {} Oct 16 09:05 {}\n",
                    content.len(),
                    path
                ),
                stderr: String::new(),
            },
            None => failure(2, "ls: cannot access: No such file or directory"),
        }
    }
}

fn failure(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn unescape_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl RemoteExecutor for FakeRemote {
    fn run(
        &self,
        command: &RemoteCommand,
        _timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.commands.borrow_mut().push(command.render());
        Ok(match command.program() {
            "find" => self.find(command.argv()),
            "ls" => self.ls(command.argv()),
            other => failure(127, &format!("{}: command not found", other)),
        })
    }

    fn copy_file(
        &self,
        local: &Path,
        remote_path: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.commands
            .borrow_mut()
            .push(format!("upload {}", remote_path));
        if self.fail_uploads.get() {
            return Err(TransportError::RemoteExit {
                code: Some(1),
                stderr: "No space left on device".to_string(),
            });
        }
        let content = fs::read_to_string(local)?;
        self.uploads.set(self.uploads.get() + 1);
        if !self.drop_uploads.get() {
            self.put(remote_path, &content);
        }
        Ok(())
    }
}
