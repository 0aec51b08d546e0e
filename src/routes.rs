//! Filesystem route table.
//!
//! The resources directory is walked once into a trie. Each level holds the
//! literal subdirectories and `*.json` files found there, plus at most one
//! dynamic directory and one dynamic file (`_name` / `{name}` forms) which
//! bind a path parameter when no literal entry matches a request segment.
//!
//! | Entry | Meaning |
//! |---|---|
//! | `users.json` | literal final segment |
//! | `_id.json`, `{id}.json` | dynamic final segment, binds `id` |
//! | `users/` | literal intermediate segment |
//! | `_id/`, `{id}/` | dynamic intermediate segment, binds `id` |

use crate::error::MockError;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A resolved route: the template file plus bound path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Template file to serve
    pub file: PathBuf,
    /// Parameters bound by dynamic entries
    pub params: HashMap<String, String>,
}

/// A dynamic entry: the parameter it binds and the literal key it is stored under.
#[derive(Debug, Clone)]
struct DynamicEntry {
    param: String,
    key: String,
}

#[derive(Debug, Default)]
struct RouteNode {
    dirs: HashMap<String, RouteNode>,
    dynamic_dir: Option<DynamicEntry>,
    /// Template files keyed by file stem
    files: HashMap<String, PathBuf>,
    dynamic_file: Option<DynamicEntry>,
}

impl RouteNode {
    fn scan(dir: &Path) -> Result<Self, MockError> {
        let mut entries: Vec<(String, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                Some((name, entry.path()))
            })
            .collect();
        // Stable order keeps ambiguity errors reproducible.
        entries.sort();

        let mut node = RouteNode::default();
        for (name, path) in entries {
            // Follow symlinks like a plain existence check would.
            let metadata = std::fs::metadata(&path)?;
            if metadata.is_dir() {
                if let Some(param) = dynamic_param(&name) {
                    claim_dynamic(&mut node.dynamic_dir, dir, param, &name)?;
                }
                node.dirs.insert(name, RouteNode::scan(&path)?);
            } else if metadata.is_file() {
                let Some(stem) = name.strip_suffix(".json").filter(|s| !s.is_empty()) else {
                    continue;
                };
                if let Some(param) = dynamic_param(stem) {
                    claim_dynamic(&mut node.dynamic_file, dir, param, stem)?;
                }
                node.files.insert(stem.to_string(), path);
            }
        }
        Ok(node)
    }

    fn file_count(&self) -> usize {
        self.files.len() + self.dirs.values().map(RouteNode::file_count).sum::<usize>()
    }
}

fn claim_dynamic(
    slot: &mut Option<DynamicEntry>,
    dir: &Path,
    param: &str,
    key: &str,
) -> Result<(), MockError> {
    if let Some(existing) = slot {
        return Err(MockError::AmbiguousRoute {
            dir: dir.to_path_buf(),
            first: existing.key.clone(),
            second: key.to_string(),
        });
    }
    *slot = Some(DynamicEntry {
        param: param.to_string(),
        key: key.to_string(),
    });
    Ok(())
}

/// Extract the parameter name from `_name` or `{name}`.
fn dynamic_param(name: &str) -> Option<&str> {
    if let Some(inner) = name.strip_prefix('{').and_then(|n| n.strip_suffix('}')) {
        return (!inner.is_empty()).then_some(inner);
    }
    name.strip_prefix('_').filter(|inner| !inner.is_empty())
}

/// Immutable route trie built from a resources directory.
#[derive(Debug)]
pub struct RouteTable {
    root: PathBuf,
    tree: RouteNode,
}

impl RouteTable {
    /// Walk `root` and build the trie.
    ///
    /// Fails when a directory contains two dynamic directories or two
    /// dynamic files, since either would make resolution order-dependent.
    pub fn build(root: &Path) -> Result<Self, MockError> {
        let tree = RouteNode::scan(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            tree,
        })
    }

    /// Root directory this table was built from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of template files in the table.
    pub fn len(&self) -> usize {
        self.tree.file_count()
    }

    /// Whether the table holds no template files.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a request path to a template file.
    ///
    /// Literal entries win over dynamic ones at every level. A path with no
    /// segments never resolves.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let (last, parents) = segments.split_last()?;

        let mut params = HashMap::new();
        let mut node = &self.tree;
        for segment in parents {
            if let Some(child) = node.dirs.get(*segment) {
                node = child;
                continue;
            }
            let dynamic = node.dynamic_dir.as_ref()?;
            params.insert(dynamic.param.clone(), segment.to_string());
            node = node.dirs.get(&dynamic.key)?;
        }

        if let Some(file) = node.files.get(*last) {
            return Some(RouteMatch {
                file: file.clone(),
                params,
            });
        }

        let dynamic = node.dynamic_file.as_ref()?;
        params.insert(dynamic.param.clone(), last.to_string());
        let file = node.files.get(&dynamic.key)?.clone();
        Some(RouteMatch { file, params })
    }
}

/// Shared, reloadable route table.
pub struct RouteRegistry {
    root: PathBuf,
    current: ArcSwap<RouteTable>,
}

impl RouteRegistry {
    /// Build the initial table from `root`.
    pub fn load(root: &Path) -> Result<Self, MockError> {
        let table = RouteTable::build(root)?;
        info!(root = %root.display(), routes = table.len(), "Route table loaded");
        Ok(Self {
            root: root.to_path_buf(),
            current: ArcSwap::from_pointee(table),
        })
    }

    /// Rebuild the table from disk.
    ///
    /// On failure the previous table stays active.
    pub fn reload(&self) -> Result<usize, MockError> {
        let table = RouteTable::build(&self.root)?;
        let routes = table.len();
        self.current.store(Arc::new(table));
        info!(root = %self.root.display(), routes, "Route table reloaded");
        Ok(routes)
    }

    /// Root directory of the route table.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot of the active table.
    pub fn table(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Resolve against the active table.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let found = self.current.load().resolve(path);
        if found.is_none() {
            debug!(path = %path, "No matched route");
        }
        found
    }
}
