//! Ownership groups and the oracle that supplies them.
//!
//! The engine never walks a directory tree itself. The oracle resolves each
//! changed file to its nearest governing directory; the engine only keeps a
//! flat, de-duplicated list of those groups.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::actor::Actor;
use crate::error::OwnersError;

/// External ownership resolution.
pub trait OwnersOracle {
    /// Approvers for `path`, including those inherited from ancestors.
    fn approvers(&self, path: &str) -> Result<BTreeSet<Actor>, OwnersError>;

    /// Approvers registered directly on the directory governing `path`.
    fn leaf_approvers(&self, path: &str) -> Result<BTreeSet<Actor>, OwnersError>;

    /// The nearest directory with ownership data that governs `path`.
    fn find_owner_group_for_file(&self, path: &str) -> Result<String, OwnersError>;

    /// True if the directory opts out of inheriting ancestor approvers.
    fn has_no_parent_fallback(&self, path: &str) -> Result<bool, OwnersError>;
}

/// Approvers for one governing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnersGroup {
    /// Directory path relative to the repository root; empty for the root.
    pub directory: String,
    pub approvers: BTreeSet<Actor>,
    pub leaf_approvers: BTreeSet<Actor>,
    pub has_parent_fallback: bool,
}

impl OwnersGroup {
    /// Returns true if `actor` may approve this group.
    pub fn is_eligible(&self, actor: &Actor) -> bool {
        self.leaf_approvers.contains(actor)
            || (self.has_parent_fallback && self.approvers.contains(actor))
    }

    /// Everyone who may approve this group, in login order.
    pub fn eligible(&self) -> BTreeSet<&Actor> {
        let mut eligible: BTreeSet<&Actor> = self.leaf_approvers.iter().collect();
        if self.has_parent_fallback {
            eligible.extend(self.approvers.iter());
        }
        eligible
    }

    /// Path of the OWNERS file for this group.
    pub fn owners_file(&self) -> String {
        if self.directory.is_empty() {
            "OWNERS".to_string()
        } else {
            format!("{}/OWNERS", self.directory)
        }
    }
}

/// Resolve changed files to their governing groups, one group per directory.
pub fn owners_groups<O: OwnersOracle + ?Sized>(
    oracle: &O,
    files: &[String],
) -> Result<Vec<OwnersGroup>, OwnersError> {
    let mut directories = BTreeSet::new();
    for file in files {
        directories.insert(oracle.find_owner_group_for_file(file)?);
    }

    directories
        .into_iter()
        .map(|directory| {
            Ok(OwnersGroup {
                approvers: oracle.approvers(&directory)?,
                leaf_approvers: oracle.leaf_approvers(&directory)?,
                has_parent_fallback: !oracle.has_no_parent_fallback(&directory)?,
                directory,
            })
        })
        .collect()
}

/// One registered directory in a [`StaticOwners`] map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnersEntry {
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub no_parent_owners: bool,
}

/// An oracle backed by a fixed directory map.
///
/// Keys are directory paths relative to the repository root (`""` for the
/// root). A file belongs to the nearest registered ancestor directory.
#[derive(Debug, Clone, Default)]
pub struct StaticOwners {
    entries: BTreeMap<String, OwnersEntry>,
}

fn normalize_dir(dir: &str) -> String {
    dir.trim_matches('/').to_string()
}

/// `a/b/c.go` -> `a/b`, `a/b` -> `a`, `a` -> ``.
fn parent_dir(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map_or("", |idx| &path[..idx]))
}

impl StaticOwners {
    pub fn new(entries: BTreeMap<String, OwnersEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(dir, entry)| (normalize_dir(&dir), entry))
                .collect(),
        }
    }

    /// Register approvers for a directory, builder style.
    pub fn with_dir(mut self, dir: &str, approvers: &[&str], no_parent_owners: bool) -> Self {
        self.entries.insert(
            normalize_dir(dir),
            OwnersEntry {
                approvers: approvers.iter().map(|a| a.to_string()).collect(),
                no_parent_owners,
            },
        );
        self
    }

    pub fn from_json(json: &str) -> Result<Self, OwnersError> {
        let entries: BTreeMap<String, OwnersEntry> =
            serde_json::from_str(json).map_err(|e| OwnersError::Invalid {
                message: e.to_string(),
            })?;
        Ok(Self::new(entries))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, OwnersError> {
        let json = std::fs::read_to_string(path).map_err(|e| OwnersError::Invalid {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    fn entry_approvers(&self, dir: &str) -> BTreeSet<Actor> {
        self.entries
            .get(dir)
            .map(|e| e.approvers.iter().map(|a| Actor::from(a.as_str())).collect())
            .unwrap_or_default()
    }
}

impl OwnersOracle for StaticOwners {
    fn approvers(&self, path: &str) -> Result<BTreeSet<Actor>, OwnersError> {
        let mut approvers = BTreeSet::new();
        let mut current = Some(normalize_dir(path));
        while let Some(dir) = current {
            if let Some(entry) = self.entries.get(&dir) {
                approvers.extend(self.entry_approvers(&dir));
                if entry.no_parent_owners {
                    break;
                }
            }
            current = parent_dir(&dir).map(str::to_string);
        }
        Ok(approvers)
    }

    fn leaf_approvers(&self, path: &str) -> Result<BTreeSet<Actor>, OwnersError> {
        Ok(self.entry_approvers(&normalize_dir(path)))
    }

    fn find_owner_group_for_file(&self, path: &str) -> Result<String, OwnersError> {
        let mut current = parent_dir(path.trim_matches('/'));
        while let Some(dir) = current {
            if self.entries.contains_key(dir) {
                return Ok(dir.to_string());
            }
            current = parent_dir(dir);
        }
        Ok(String::new())
    }

    fn has_no_parent_fallback(&self, path: &str) -> Result<bool, OwnersError> {
        Ok(self
            .entries
            .get(&normalize_dir(path))
            .is_some_and(|e| e.no_parent_owners))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn owners() -> StaticOwners {
        StaticOwners::default()
            .with_dir("", &["root"], false)
            .with_dir("a", &["alice"], false)
            .with_dir("a/deep", &["dana"], false)
            .with_dir("b", &["bob"], true)
            .with_dir("c", &["cjwagner"], false)
    }

    fn names(set: &BTreeSet<Actor>) -> Vec<String> {
        set.iter().map(Actor::normalized).collect()
    }

    #[test]
    fn test_find_nearest_directory() {
        let o = owners();
        assert_eq!(o.find_owner_group_for_file("a/deep/x/y.go").unwrap(), "a/deep");
        assert_eq!(o.find_owner_group_for_file("a/z.go").unwrap(), "a");
        assert_eq!(o.find_owner_group_for_file("README.md").unwrap(), "");
        assert_eq!(o.find_owner_group_for_file("unknown/file.go").unwrap(), "");
    }

    #[test]
    fn test_approvers_inherit_until_no_parent() {
        let o = owners();
        assert_eq!(names(&o.approvers("a/deep").unwrap()), vec!["alice", "dana", "root"]);
        assert_eq!(names(&o.approvers("b").unwrap()), vec!["bob"]);
        assert_eq!(names(&o.leaf_approvers("a/deep").unwrap()), vec!["dana"]);
        assert!(o.has_no_parent_fallback("b").unwrap());
        assert!(!o.has_no_parent_fallback("a").unwrap());
    }

    #[test]
    fn test_groups_deduplicate_by_directory() {
        let files = vec![
            "a/one.go".to_string(),
            "a/two.go".to_string(),
            "b/three.go".to_string(),
        ];
        let groups = owners_groups(&owners(), &files).unwrap();
        let dirs: Vec<&str> = groups.iter().map(|g| g.directory.as_str()).collect();
        assert_eq!(dirs, vec!["a", "b"]);
        assert!(groups[0].has_parent_fallback);
        assert!(!groups[1].has_parent_fallback);
    }

    #[test]
    fn test_group_eligibility() {
        let groups = owners_groups(&owners(), &["a/deep/f.go".to_string()]).unwrap();
        let group = &groups[0];
        assert!(group.is_eligible(&Actor::from("DANA")));
        assert!(group.is_eligible(&Actor::from("root")));
        assert!(!group.is_eligible(&Actor::from("bob")));
        assert_eq!(group.owners_file(), "a/deep/OWNERS");
    }

    #[test]
    fn test_root_group_owners_file() {
        let groups = owners_groups(&owners(), &["README.md".to_string()]).unwrap();
        assert_eq!(groups[0].owners_file(), "OWNERS");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "/c/": {{ "approvers": ["cjwagner"] }}, "d": {{ "approvers": ["dan"], "no_parent_owners": true }} }}"#
        )
        .unwrap();

        let o = StaticOwners::from_json_file(file.path()).unwrap();
        assert_eq!(o.find_owner_group_for_file("c/c.go").unwrap(), "c");
        assert!(o.has_no_parent_fallback("d").unwrap());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            StaticOwners::from_json("not json"),
            Err(OwnersError::Invalid { .. })
        ));
    }
}
