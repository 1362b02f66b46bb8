//! GeoGig - versioned geospatial feature storage on top of Git
//!
//! Features (attribute maps with geometries) live in layer trees inside a
//! Git object database. Every snapshot is a tree, every change a commit, and
//! the usual branching, merging and rebasing work on feature paths.
//!
//! # Example
//!
//! ```no_run
//! use geogig::{Feature, Geometry, Repository};
//!
//! let repo = Repository::init("./parks").unwrap();
//! repo.set_config("user.name", "Ada").unwrap();
//! repo.set_config("user.email", "ada@example.com").unwrap();
//!
//! let park = Feature::new()
//!     .with("name", "Central")
//!     .with("the_geom", Geometry::from_wkt("POINT (1 2)").unwrap());
//! repo.insert_feature("parks/1", park).unwrap();
//! repo.add_and_commit("add a park").unwrap();
//! ```

pub mod blame;
pub mod diff;
pub mod merge;
pub mod repo;
pub mod storage;

pub use blame::BlameEntry;
pub use diff::{AttributeChange, DiffEntry, TreeStats};
pub use merge::{ConflictEntry, FeatureVersion, Resolution, Side};
pub use repo::{
    LogOptions, MergeOptions, MergeOutcome, PullOutcome, RebaseOutcome, RepoError, RepoResult, Repository,
    RepositoryConfig, ResetMode, HEAD, STAGE_HEAD, WORK_HEAD,
};
pub use storage::{
    AttributeType, BranchName, ChangeType, CommitId, CommitInfo, Feature, FeatureId, FeatureType, Geometry,
    HeadState, Node, TagInfo, Value,
};
