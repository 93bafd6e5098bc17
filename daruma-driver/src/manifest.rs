//! Manifest: the index from logical paths to stored objects
//!
//! Serialized as newline-terminated records in a fixed order:
//!
//! ```text
//! @<provider_type>:<uid>\n                    installation members, in order
//! <dir path>/\n                               directories, sorted
//! <path>,<code name>,<size>,<32 key bytes>\n  files, sorted by path
//! ```
//!
//! Keys are raw bytes and may contain commas or newlines, so records are
//! matched with anchored patterns that consume exactly 32 key bytes rather
//! than by splitting lines. Content that does not re-serialize to exactly
//! the same bytes is rejected as a whole.

use crate::error::{OperationError, Result};
use daruma_core::crypto::{EncryptionKey, KEY_SIZE};
use daruma_core::{is_valid_filename, DarumaError};
use daruma_storage::ProviderId;
use regex::bytes::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

static PROVIDER_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\A@([A-Za-z0-9_.\-]+):([^\n]+)\n").expect("provider record pattern")
});

static DIRECTORY_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\A([A-Za-z0-9_.]+(?:/[A-Za-z0-9_.]+)*)/\n").expect("directory record pattern")
});

static FILE_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)\A([A-Za-z0-9_.]+(?:/[A-Za-z0-9_.]+)*),([A-Z0-9]{32}),([0-9]+),(.{32})\n")
        .expect("file record pattern")
});

static PROVIDER_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\A[A-Za-z0-9_.\-]+\z").expect("provider type pattern"));

static PATH_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\A[A-Za-z0-9_.]+\z").expect("path component pattern"));

/// A stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub code_name: String,
    pub size: u64,
    pub key: EncryptionKey,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Node {
    pub name: String,
    pub is_directory: bool,
    /// Only set for files
    pub size: Option<u64>,
}

/// Normalize a user path: strip surrounding slashes and validate components
///
/// The root directory is the empty string.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for component in trimmed.split('/') {
        if component == "."
            || component == ".."
            || !PATH_COMPONENT.is_match(component.as_bytes())
        {
            return Err(OperationError::InvalidPath(path.to_string()));
        }
    }
    Ok(trimmed.to_string())
}

/// Proper ancestors of a normalized path, nearest to the root first
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

fn is_below(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

fn parse_error(message: impl Into<String>) -> DarumaError {
    DarumaError::Parse(message.into())
}

/// Path index for one installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    providers: Vec<ProviderId>,
    directories: BTreeSet<String>,
    files: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// An empty manifest for the given installation members
    pub fn new(providers: Vec<ProviderId>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    /// Installation members, in share order
    pub fn providers(&self) -> &[ProviderId] {
        &self.providers
    }

    pub fn set_providers(&mut self, providers: Vec<ProviderId>) {
        self.providers = providers;
    }

    /// Every file, sorted by path
    pub fn files(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.files.iter()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn is_directory(&self, path: &str) -> bool {
        path.is_empty() || self.directories.contains(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.is_directory(path) || self.files.contains_key(path)
    }

    /// Fail if any ancestor of `path` is a file
    fn check_ancestors(&self, path: &str) -> Result<()> {
        if ancestors(path).any(|a| self.files.contains_key(a)) {
            return Err(OperationError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    fn add_ancestors(&mut self, path: &str) {
        for ancestor in ancestors(path) {
            self.directories.insert(ancestor.to_string());
        }
    }

    /// Look up a file
    pub fn get_file(&self, path: &str) -> Result<&ManifestEntry> {
        let path = normalize_path(path)?;
        self.files
            .get(&path)
            .ok_or(OperationError::FileNotFound(path))
    }

    /// Check that a file could be written at `path`, returning the
    /// normalized path
    pub fn validate_file_path(&self, path: &str) -> Result<String> {
        let normalized = normalize_path(path)?;
        if self.is_directory(&normalized) {
            return Err(OperationError::InvalidPath(path.to_string()));
        }
        self.check_ancestors(&normalized)?;
        Ok(normalized)
    }

    /// Create or replace a file, creating missing parent directories
    ///
    /// Returns the replaced entry, if any.
    pub fn update_file(&mut self, path: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>> {
        let path = self.validate_file_path(path)?;
        self.add_ancestors(&path);
        Ok(self.files.insert(path, entry))
    }

    /// Create a directory and any missing parents; existing directories are
    /// left alone
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        let normalized = normalize_path(path)?;
        if normalized.is_empty() {
            return Ok(());
        }
        if self.files.contains_key(&normalized) {
            return Err(OperationError::InvalidPath(path.to_string()));
        }
        self.check_ancestors(&normalized)?;
        self.add_ancestors(&normalized);
        self.directories.insert(normalized);
        Ok(())
    }

    /// Remove a file, or an empty directory
    ///
    /// Returns the removed file's entry, or `None` for a directory.
    pub fn remove(&mut self, path: &str) -> Result<Option<ManifestEntry>> {
        let normalized = normalize_path(path)?;
        if let Some(entry) = self.files.remove(&normalized) {
            return Ok(Some(entry));
        }
        if !normalized.is_empty()
            && self.directories.contains(&normalized)
            && self.children(&normalized).is_empty()
        {
            self.directories.remove(&normalized);
            return Ok(None);
        }
        Err(OperationError::FileNotFound(path.to_string()))
    }

    /// Move a file or directory subtree to a new path
    pub fn move_node(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let old = normalize_path(old_path)?;
        let new = normalize_path(new_path)?;

        if old.is_empty() || !self.exists(&old) {
            return Err(OperationError::InvalidPath(old_path.to_string()));
        }
        if new.is_empty() || self.exists(&new) || is_below(&new, &old) {
            return Err(OperationError::InvalidPath(new_path.to_string()));
        }
        self.check_ancestors(&new)?;

        if let Some(entry) = self.files.remove(&old) {
            self.files.insert(new.clone(), entry);
        } else {
            let renamed = |p: &str| format!("{}{}", new, &p[old.len()..]);

            let dirs: Vec<String> = self
                .directories
                .iter()
                .filter(|d| **d == old || is_below(d, &old))
                .cloned()
                .collect();
            for dir in dirs {
                self.directories.remove(&dir);
                self.directories.insert(renamed(&dir));
            }

            let files: Vec<String> = self
                .files
                .keys()
                .filter(|f| is_below(f, &old))
                .cloned()
                .collect();
            for file in files {
                if let Some(entry) = self.files.remove(&file) {
                    self.files.insert(renamed(&file), entry);
                }
            }
        }

        self.add_ancestors(&new);
        Ok(())
    }

    /// Direct children of a normalized directory path, sorted by name
    fn children(&self, dir: &str) -> Vec<Node> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let direct = |p: &str| -> Option<String> {
            p.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut nodes: Vec<Node> = self
            .directories
            .iter()
            .filter_map(|d| direct(d.as_str()))
            .map(|name| Node {
                name,
                is_directory: true,
                size: None,
            })
            .chain(self.files.iter().filter_map(|(path, entry)| {
                direct(path.as_str()).map(|name| Node {
                    name,
                    is_directory: false,
                    size: Some(entry.size),
                })
            }))
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    /// List a directory's children, or a single file
    pub fn ls(&self, path: &str) -> Result<Vec<Node>> {
        let normalized = normalize_path(path)?;
        if let Some(entry) = self.files.get(&normalized) {
            let name = normalized
                .rsplit('/')
                .next()
                .unwrap_or(normalized.as_str())
                .to_string();
            return Ok(vec![Node {
                name,
                is_directory: false,
                size: Some(entry.size),
            }]);
        }
        if self.is_directory(&normalized) {
            return Ok(self.children(&normalized));
        }
        Err(OperationError::InvalidPath(path.to_string()))
    }

    /// Every file and directory path, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .directories
            .iter()
            .chain(self.files.keys())
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Serialize to the record format
    pub fn to_bytes(&self) -> daruma_core::Result<Vec<u8>> {
        let mut out = Vec::new();

        for provider in &self.providers {
            if !PROVIDER_TYPE.is_match(provider.provider_type.as_bytes())
                || provider.uid.is_empty()
                || provider.uid.contains('\n')
            {
                return Err(DarumaError::IllegalArgument(format!(
                    "provider identity {} cannot be recorded",
                    provider
                )));
            }
            out.push(b'@');
            out.extend_from_slice(provider.provider_type.as_bytes());
            out.push(b':');
            out.extend_from_slice(provider.uid.as_bytes());
            out.push(b'\n');
        }

        for dir in &self.directories {
            out.extend_from_slice(dir.as_bytes());
            out.extend_from_slice(b"/\n");
        }

        for (path, entry) in &self.files {
            out.extend_from_slice(path.as_bytes());
            out.push(b',');
            out.extend_from_slice(entry.code_name.as_bytes());
            out.push(b',');
            out.extend_from_slice(entry.size.to_string().as_bytes());
            out.push(b',');
            out.extend_from_slice(entry.key.as_bytes());
            out.push(b'\n');
        }

        Ok(out)
    }

    /// Parse serialized content, rejecting anything that is not exactly
    /// what [`Manifest::to_bytes`] would produce
    pub fn parse(content: &[u8]) -> daruma_core::Result<Self> {
        let mut manifest = Manifest::default();
        let mut code_names = HashSet::new();
        let mut pos = 0;

        while pos < content.len() {
            let rest = &content[pos..];

            if let Some(caps) = PROVIDER_RECORD.captures(rest) {
                let provider_type = utf8(&caps[1])?;
                let uid = utf8(&caps[2])?;
                manifest.providers.push(ProviderId::new(provider_type, uid));
                pos += caps[0].len();
            } else if let Some(caps) = DIRECTORY_RECORD.captures(rest) {
                let dir = checked_path(&caps[1])?;
                if !manifest.directories.insert(dir) {
                    return Err(parse_error("duplicate directory record"));
                }
                pos += caps[0].len();
            } else if let Some(caps) = FILE_RECORD.captures(rest) {
                let path = checked_path(&caps[1])?;
                let code_name = utf8(&caps[2])?;
                if !is_valid_filename(&code_name) || !code_names.insert(code_name.clone()) {
                    return Err(parse_error("invalid or repeated code name"));
                }
                let size = utf8(&caps[3])?
                    .parse::<u64>()
                    .map_err(|e| parse_error(e.to_string()))?;
                let key = EncryptionKey::from_slice(&caps[4][..KEY_SIZE])
                    .map_err(|e| parse_error(e.to_string()))?;
                let entry = ManifestEntry {
                    code_name,
                    size,
                    key,
                };
                if manifest.files.insert(path, entry).is_some() {
                    return Err(parse_error("duplicate file record"));
                }
                pos += caps[0].len();
            } else {
                return Err(parse_error(format!("malformed record at byte {}", pos)));
            }
        }

        manifest.check_tree()?;

        if manifest.to_bytes()? != content {
            return Err(parse_error("manifest is not in canonical form"));
        }
        Ok(manifest)
    }

    /// Every parent directory is recorded and no path is both kinds
    fn check_tree(&self) -> daruma_core::Result<()> {
        for path in self.directories.iter().chain(self.files.keys()) {
            if ancestors(path).any(|a| !self.directories.contains(a)) {
                return Err(parse_error(format!("missing parent directory of {}", path)));
            }
        }
        if self.files.keys().any(|f| self.directories.contains(f)) {
            return Err(parse_error("path recorded as both file and directory"));
        }
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> daruma_core::Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| parse_error(e.to_string()))
}

fn checked_path(bytes: &[u8]) -> daruma_core::Result<String> {
    let path = utf8(bytes)?;
    if path.split('/').any(|c| c == "." || c == "..") {
        return Err(parse_error(format!("invalid path component in {}", path)));
    }
    Ok(path)
}
