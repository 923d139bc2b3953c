//! Template source loading.
//!
//! A [`TemplateLoader`] resolves template paths to source text. Paths are
//! `/`-separated and relative to the loader's root. [`FsLoader`] reads a
//! directory tree; [`MemoryLoader`] serves sources registered in memory.
//! Both are exercised by the same [`contract`] suite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fir_core::{FirError, Result};
use walkdir::WalkDir;

/// Source of template files.
pub trait TemplateLoader: Send + Sync {
    /// Whether `path` names a readable template file.
    fn exists(&self, path: &str) -> bool;

    /// Whether `path` names a directory of templates.
    fn is_dir(&self, path: &str) -> bool;

    /// Read the template at `path`.
    fn read(&self, path: &str) -> Result<String>;

    /// Every file under `dir` whose name ends with one of `extensions`,
    /// as loader-relative paths in sorted order.
    fn list(&self, dir: &str, extensions: &[String]) -> Result<Vec<String>>;
}

fn has_extension(path: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_end_matches('/')
}

// ── Filesystem ──────────────────────────────────────────────────────────────

/// Loads templates from a directory tree.
#[derive(Clone, Debug)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    /// Loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(normalize(path))
    }
}

impl TemplateLoader for FsLoader {
    fn exists(&self, path: &str) -> bool {
        !path.is_empty() && self.resolve(path).is_file()
    }

    fn is_dir(&self, path: &str) -> bool {
        !path.is_empty() && self.resolve(path).is_dir()
    }

    fn read(&self, path: &str) -> Result<String> {
        std::fs::read_to_string(self.resolve(path))
            .map_err(|e| FirError::template(format!("failed to read {path}: {e}")))
    }

    fn list(&self, dir: &str, extensions: &[String]) -> Result<Vec<String>> {
        let base = self.resolve(dir);
        if !base.is_dir() {
            return Err(FirError::not_found(format!("template directory {dir}")));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.map_err(|e| FirError::template(format!("failed to walk {dir}: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if has_extension(&relative, extensions) {
                files.push(relative);
            }
        }
        files.sort();
        Ok(files)
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Serves templates registered in memory, for embedded sources and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    files: BTreeMap<String, String>,
}

impl MemoryLoader {
    /// Empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` at `path`, replacing any previous file.
    #[must_use]
    pub fn with(mut self, path: impl AsRef<str>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    /// Register `source` at `path`.
    pub fn insert(&mut self, path: impl AsRef<str>, source: impl Into<String>) {
        let _ = self
            .files
            .insert(normalize(path.as_ref()).to_owned(), source.into());
    }
}

impl TemplateLoader for MemoryLoader {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(normalize(path))
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", normalize(path));
        !path.is_empty() && self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn read(&self, path: &str) -> Result<String> {
        self.files
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| FirError::template(format!("failed to read {path}: no such template")))
    }

    fn list(&self, dir: &str, extensions: &[String]) -> Result<Vec<String>> {
        if !self.is_dir(dir) {
            return Err(FirError::not_found(format!("template directory {dir}")));
        }
        let prefix = format!("{}/", normalize(dir));
        Ok(self
            .files
            .keys()
            .filter(|k| k.starts_with(&prefix) && has_extension(k, extensions))
            .cloned()
            .collect())
    }
}

// ── Contract ────────────────────────────────────────────────────────────────

/// Behavior every [`TemplateLoader`] must satisfy.
///
/// The loader must contain exactly:
/// `layout.html` = `"L"`, `partials/a.html` = `"A"`,
/// `partials/nested/b.html` = `"B"` and `partials/notes.txt` = `"N"`.
pub mod contract {
    use super::TemplateLoader;

    /// Files a loader under test must be seeded with.
    pub const FIXTURE: [(&str, &str); 4] = [
        ("layout.html", "L"),
        ("partials/a.html", "A"),
        ("partials/nested/b.html", "B"),
        ("partials/notes.txt", "N"),
    ];

    /// Run every check.
    pub fn run_all(loader: &dyn TemplateLoader) {
        reads_files(loader);
        distinguishes_files_and_dirs(loader);
        lists_recursively_by_extension(loader);
        missing_paths_fail(loader);
    }

    /// Files read back verbatim, with or without a `./` prefix.
    pub fn reads_files(loader: &dyn TemplateLoader) {
        assert_eq!(loader.read("layout.html").unwrap(), "L");
        assert_eq!(loader.read("./partials/a.html").unwrap(), "A");
    }

    /// `exists` is for files, `is_dir` for directories.
    pub fn distinguishes_files_and_dirs(loader: &dyn TemplateLoader) {
        assert!(loader.exists("layout.html"));
        assert!(!loader.exists("partials"));
        assert!(loader.is_dir("partials"));
        assert!(loader.is_dir("partials/"));
        assert!(!loader.is_dir("layout.html"));
        assert!(!loader.exists("<div>inline</div>"));
    }

    /// Listing walks subdirectories, filters by extension and sorts.
    pub fn lists_recursively_by_extension(loader: &dyn TemplateLoader) {
        let html = loader.list("partials", &[".html".to_string()]).unwrap();
        assert_eq!(html, vec!["partials/a.html", "partials/nested/b.html"]);

        let both = loader
            .list("partials", &[".html".to_string(), ".txt".to_string()])
            .unwrap();
        assert_eq!(both.len(), 3);
    }

    /// Missing files and directories are errors.
    pub fn missing_paths_fail(loader: &dyn TemplateLoader) {
        assert!(loader.read("nope.html").is_err());
        assert!(loader.list("nope", &[".html".to_string()]).is_err());
    }
}
