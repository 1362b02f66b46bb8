//! core type-safe wrappers around git primitives for the storage layer.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Declares a typed wrapper around a git object id.
///
/// Keeping one newtype per object kind makes sure we don't accidentally pass
/// a feature ID where a commit ID is expected. The inner Oid is only
/// accessible within the crate.
macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) Oid);

        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            /// raw Oid (for internal use only)
            pub(crate) fn raw(&self) -> Oid {
                self.0
            }

            /// parse the id from a 40 character hex string
            pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
                Oid::from_str(hex).map(Self)
            }

            /// short form of the id
            pub fn short(&self) -> String {
                self.0.to_string()[..7].to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex = String::deserialize(deserializer)?;
                Self::from_hex(&hex).map_err(serde::de::Error::custom)
            }
        }
    };
}

object_id!(
    /// Commit identifier
    CommitId
);

object_id!(
    /// Tree (snapshot or layer) identifier
    TreeId
);

object_id!(
    /// Identifier of a stored feature blob
    FeatureId
);

object_id!(
    /// Identifier of a stored feature type blob
    FeatureTypeId
);

/// Characters git refuses inside ref names.
const FORBIDDEN_REF_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\', ' '];

fn validate_ref_name(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 255 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name.contains("..")
        || name.contains("//")
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.starts_with('-')
    {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c.is_control() || FORBIDDEN_REF_CHARS.contains(&c) {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    if name == "HEAD" || name == "WORK_HEAD" || name == "STAGE_HEAD" {
        return Err(InvalidNameError::Reserved(name.to_string()));
    }
    Ok(())
}

/// A validated branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    /// the default branch of a new repository
    pub const MASTER: &'static str = "master";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// the default branch
    pub fn master() -> Self {
        Self(Self::MASTER.to_string())
    }

    /// get the full ref path (e.g., "refs/heads/master")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// get the short name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName(String);

impl TagName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_ref_path(&self) -> String {
        format!("refs/tags/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated `/`-delimited path to a tree or feature inside a snapshot.
///
/// Leading segments name trees ("layers"), the last one names either a
/// nested tree or a feature. Segments starting with `.` are reserved for
/// metadata entries such as the feature type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(String);

impl NodePath {
    /// maximum length of a single segment
    const MAX_SEGMENT: usize = 255;

    pub fn new(path: impl Into<String>) -> Result<Self, InvalidNameError> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    fn validate(path: &str) -> Result<(), InvalidNameError> {
        if path.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        for segment in path.split('/') {
            if segment.is_empty() {
                return Err(InvalidNameError::InvalidPath(path.to_string()));
            }
            if segment.len() > Self::MAX_SEGMENT {
                return Err(InvalidNameError::TooLong(segment.len()));
            }
            if segment.starts_with('.') {
                return Err(InvalidNameError::Reserved(segment.to_string()));
            }
            if let Some((i, c)) = segment.char_indices().find(|(_, c)| c.is_control() || *c == '\\') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// path segments, outermost first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// the last segment
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// the enclosing tree path, `None` for top-level entries
    pub fn parent(&self) -> Option<NodePath> {
        self.0.rsplit_once('/').map(|(parent, _)| NodePath(parent.to_string()))
    }

    /// append a child segment
    pub fn join(&self, child: &str) -> Result<NodePath, InvalidNameError> {
        NodePath::new(format!("{}/{}", self.0, child))
    }

    /// true if `self` equals `prefix` or lies underneath it
    pub fn is_within(&self, prefix: &NodePath) -> bool {
        is_within(&self.0, &prefix.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// string form of [`NodePath::is_within`]
pub(crate) fn is_within(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'/')
}

/// join a tree prefix and an entry name
pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// convert to a git2::Signature stamped with the current time
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }

    /// convert to a git2::Signature with an explicit time
    pub(crate) fn to_git2_signature_at(&self, time: &git2::Time) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::new(&self.name, &self.email, time)
    }
}

/// error type for invalid names (branches, tags, paths)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

/// the kind of change a path went through between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl ChangeType {
    /// the change seen from the other side
    pub fn inverse(self) -> Self {
        match self {
            ChangeType::Added => ChangeType::Removed,
            ChangeType::Removed => ChangeType::Added,
            ChangeType::Modified => ChangeType::Modified,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeType::Added => "ADDED",
            ChangeType::Modified => "MODIFIED",
            ChangeType::Removed => "REMOVED",
        };
        f.write_str(label)
    }
}

/// how far `reset` rewinds the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// move the branch only
    Soft,
    /// move the branch and reset the index
    Mixed,
    /// move the branch and reset index and working tree
    #[default]
    Hard,
}
