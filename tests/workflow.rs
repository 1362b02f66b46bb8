//! End-to-end workflows on a small `parks` repository.
//!
//! master: c1 (parks/1-3) -> c2 (parks/4) -> c3 (parks/5) -> c4 (parks/5 area)
//! conflicted: c3 -> parks/5 area changed differently
//! unconflicted: c3 -> parks/1 area changed

use chrono::DateTime;
use geogig::{
    AttributeType, ChangeType, CommitInfo, Feature, Geometry, LogOptions, MergeOptions, MergeOutcome, RebaseOutcome,
    RepoError, Repository, ResetMode, Resolution, Value, STAGE_HEAD, WORK_HEAD,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn park(id: i64, area: f64) -> Feature {
    let x = id as f64 * 10.0;
    let wkt = format!("POLYGON (({x} 0, {} 0, {} 10, {x} 10, {x} 0))", x + 5.0, x + 5.0);
    Feature::new()
        .with("the_geom", Geometry::from_wkt(&wkt).unwrap())
        .with("name", format!("park {}", id))
        .with("parkid", id)
        .with("area", area)
        .with("perimeter", 30.0)
        .with("open", true)
        .with("owner", "city")
        .with(
            "established",
            Value::Date(DateTime::parse_from_rfc3339("2001-05-04T00:00:00+00:00").unwrap()),
        )
}

struct Fixture {
    _dir: TempDir,
    repo: Repository,
    commits: Vec<CommitInfo>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.set_config("user.name", "volaya").unwrap();
        repo.set_config("user.email", "volaya@boundlessgeo.com").unwrap();

        let mut commits = Vec::new();
        for id in 1..=3 {
            repo.insert_feature(&format!("parks/{}", id), park(id, 100.0)).unwrap();
        }
        commits.push(repo.add_and_commit("message_0").unwrap());
        repo.insert_feature("parks/4", park(4, 100.0)).unwrap();
        commits.push(repo.add_and_commit("message_1").unwrap());
        repo.insert_feature("parks/5", park(5, 100.0)).unwrap();
        commits.push(repo.add_and_commit("message_2").unwrap());
        repo.insert_feature("parks/5", park(5, 150.0)).unwrap();
        commits.push(repo.add_and_commit("message_3").unwrap());

        let c3 = commits[2].id.to_string();
        repo.create_branch("conflicted", &c3, true).unwrap();
        repo.insert_feature("parks/5", park(5, 200.0)).unwrap();
        repo.add_and_commit("conflicting change").unwrap();

        repo.checkout("master", false).unwrap();
        repo.create_branch("unconflicted", &c3, true).unwrap();
        repo.insert_feature("parks/1", park(1, 75.0)).unwrap();
        repo.add_and_commit("independent change").unwrap();

        repo.checkout("master", false).unwrap();
        Self {
            _dir: dir,
            repo,
            commits,
        }
    }

    fn c(&self, n: usize) -> geogig::CommitId {
        self.commits[n - 1].id
    }
}

#[test]
fn test_history_of_fixture() {
    let fx = Fixture::new();
    let log = fx.repo.log("HEAD", None).unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0].id, fx.c(4));
    assert_eq!(log[3].id, fx.c(1));
    assert_eq!(fx.repo.resolve("HEAD~1").unwrap(), log[1].id);
    assert_eq!(fx.repo.resolve("HEAD^").unwrap(), log[1].id);
    assert_eq!(fx.repo.log("conflicted", None).unwrap().len(), 4);

    let path_log = fx.repo.log_with("HEAD", LogOptions::default().path("parks/5")).unwrap();
    assert_eq!(path_log.len(), 2);
}

#[test]
fn test_empty_repository_has_no_log() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    assert!(repo.log("HEAD", None).unwrap().is_empty());
    assert!(repo.resolve("HEAD").is_err());
    assert!(matches!(Repository::init(dir.path()), Err(RepoError::Storage(_))));
    assert!(Repository::open(dir.path()).is_ok());
}

#[test]
fn test_diff_between_revisions() {
    let fx = Fixture::new();
    let diff = fx.repo.diff("HEAD", "HEAD~3", None).unwrap();
    assert_eq!(diff.len(), 2);
    assert!(diff.iter().all(|e| e.change == ChangeType::Removed));
    assert_eq!(fx.repo.diff("HEAD", "HEAD~3", Some("parks/5")).unwrap().len(), 1);

    let reverse = fx.repo.diff("HEAD~3", "HEAD", None).unwrap();
    let inverted: Vec<_> = diff.iter().map(|e| e.inverse()).collect();
    assert_eq!(reverse, inverted);
    assert!(fx.repo.diff("HEAD", "HEAD", None).unwrap().is_empty());

    let changes = fx.repo.feature_diff("HEAD~1", "HEAD", "parks/5").unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes["area"].old, Some(Value::Float(100.0)));
    assert_eq!(changes["area"].new, Some(Value::Float(150.0)));
}

#[test]
fn test_blame_and_versions() {
    let fx = Fixture::new();
    let blame = fx.repo.blame("parks/5").unwrap();
    assert_eq!(blame.len(), 8);
    assert_eq!(blame["area"].commit, fx.c(4));
    assert_eq!(blame["name"].commit, fx.c(3));
    assert_eq!(blame["area"].author, "volaya");

    let versions = fx.repo.versions("parks/5").unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].1.get("area"), Some(&Value::Float(150.0)));
    assert_eq!(versions[1].1.get("area"), Some(&Value::Float(100.0)));
}

#[test]
fn test_layer_metadata() {
    let fx = Fixture::new();
    assert_eq!(fx.repo.count("HEAD", Some("parks")).unwrap(), 5);
    assert_eq!(fx.repo.count("HEAD~3", Some("parks")).unwrap(), 3);

    let feature_type = fx.repo.feature_type("HEAD", "parks").unwrap();
    assert_eq!(feature_type.len(), 8);
    assert_eq!(feature_type.get("the_geom"), Some(AttributeType::Polygon));
    assert_eq!(feature_type.get("parkid"), Some(AttributeType::Integer));

    let feature = fx.repo.feature("HEAD", "parks/1").unwrap();
    assert_eq!(feature, park(1, 100.0));
}

#[test]
fn test_merge_with_conflict_resolved_ours() {
    let fx = Fixture::new();
    let theirs = fx.repo.resolve("conflicted").unwrap();

    let err = fx.repo.merge("conflicted", MergeOptions::default()).unwrap_err();
    let conflicts = err.conflicts().to_vec();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.path, "parks/5");
    assert_eq!(conflict.ancestor.commit, Some(fx.c(3)));
    assert_eq!(conflict.ours.commit, Some(fx.c(4)));
    assert_eq!(conflict.theirs.commit, Some(theirs));
    assert_eq!(fx.repo.conflicts().unwrap(), conflicts);

    fx.repo.resolve_conflict("parks/5", Resolution::Ours).unwrap();
    let merge = fx.repo.commit("merged").unwrap();
    assert_eq!(merge.parent_ids, vec![fx.c(4), theirs]);
    assert!(fx.repo.conflicts().unwrap().is_empty());

    // full ancestry: c1..c4, the conflicting commit and the merge
    assert_eq!(fx.repo.log("HEAD", None).unwrap().len(), 6);
    // first parents only: the merge and c4..c1
    let mainline = fx.repo.log_with("HEAD", LogOptions::default().first_parent(true)).unwrap();
    assert_eq!(mainline.len(), 5);
    assert_eq!(mainline[0].id, merge.id);
    assert_eq!(mainline[1].id, fx.c(4));
    assert_eq!(fx.repo.feature("HEAD", "parks/5").unwrap().get("area"), Some(&Value::Float(150.0)));
}

#[test]
fn test_merge_without_conflicts() {
    let fx = Fixture::new();
    let outcome = fx.repo.merge("unconflicted", MergeOptions::default()).unwrap();
    let MergeOutcome::Merged(commit) = outcome else {
        panic!("expected a merge commit, got {:?}", outcome);
    };
    assert_eq!(commit.parent_ids.len(), 2);
    assert_eq!(fx.repo.feature("HEAD", "parks/1").unwrap().get("area"), Some(&Value::Float(75.0)));
    assert_eq!(fx.repo.feature("HEAD", "parks/5").unwrap().get("area"), Some(&Value::Float(150.0)));
}

#[test]
fn test_merge_no_commit_stages() {
    let fx = Fixture::new();
    let outcome = fx
        .repo
        .merge("unconflicted", MergeOptions::default().no_commit(true))
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Staged { applied: 1 });
    assert_eq!(fx.repo.resolve("HEAD").unwrap(), fx.c(4));

    let staged = fx.repo.staged().unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].path, "parks/1");
    assert!(!fx.repo.is_merging().unwrap());
}

#[test]
fn test_rebase_pause_continue_and_abort() {
    let fx = Fixture::new();
    fx.repo.checkout("conflicted", false).unwrap();
    let tip = fx.repo.resolve("HEAD").unwrap();

    assert!(fx.repo.rebase("master").unwrap_err().is_conflict());
    assert!(fx.repo.is_rebasing().unwrap());
    assert_eq!(fx.repo.resolve("HEAD").unwrap(), fx.c(4));

    fx.repo.abort().unwrap();
    assert_eq!(fx.repo.resolve("HEAD").unwrap(), tip);
    assert!(!fx.repo.is_detached().unwrap());

    fx.repo.rebase("master").unwrap_err();
    fx.repo.resolve_conflict("parks/5", Resolution::Theirs).unwrap();
    let outcome = fx.repo.continue_().unwrap();
    assert!(matches!(outcome, RebaseOutcome::Rebased { replayed: 1, .. }));

    let log = fx.repo.log("conflicted", None).unwrap();
    assert_eq!(log.len(), 5);
    assert_eq!(log[0].message, "conflicting change");
    assert_eq!(log[1].id, fx.c(4));
    assert_eq!(fx.repo.feature("HEAD", "parks/5").unwrap().get("area"), Some(&Value::Float(200.0)));
}

#[test]
fn test_cherry_pick() {
    let fx = Fixture::new();
    let picked = fx.repo.cherry_pick("unconflicted").unwrap();
    assert_eq!(picked.message, "independent change");
    assert_eq!(picked.parent_ids, vec![fx.c(4)]);

    let err = fx.repo.cherry_pick("conflicted").unwrap_err();
    assert!(err.is_conflict());
    assert!(fx.repo.conflicts().unwrap().is_empty());
    assert!(!fx.repo.is_merging().unwrap());
    assert_eq!(fx.repo.resolve("HEAD").unwrap(), picked.id);
}

#[test]
fn test_reset_hard_and_mixed() {
    let fx = Fixture::new();
    fx.repo.reset("HEAD~2", ResetMode::Hard).unwrap();
    assert_eq!(fx.repo.resolve("HEAD").unwrap(), fx.c(2));
    assert_eq!(fx.repo.count(WORK_HEAD, None).unwrap(), 4);
    assert!(fx.repo.not_in_database().unwrap().is_empty());

    fx.repo.reset(&fx.c(4).to_string(), ResetMode::Mixed).unwrap();
    assert_eq!(fx.repo.count(STAGE_HEAD, None).unwrap(), 5);
    assert_eq!(fx.repo.count(WORK_HEAD, None).unwrap(), 4);
    assert_eq!(fx.repo.unstaged().unwrap().len(), 1);
}

#[test]
fn test_branches_tags_and_config() {
    let fx = Fixture::new();
    let names: Vec<_> = fx
        .repo
        .branches()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect();
    assert_eq!(names, vec!["conflicted", "master", "unconflicted"]);

    fx.repo.create_tag("v1", "HEAD~1", "first release").unwrap();
    let tags = fx.repo.tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].commit, fx.c(3));
    assert_eq!(tags[0].message, "first release");
    assert_eq!(fx.repo.resolve("v1").unwrap(), fx.c(3));

    assert!(matches!(fx.repo.delete_branch("master"), Err(RepoError::BranchCheckedOut(_))));
    fx.repo.delete_branch("unconflicted").unwrap();
    assert!(fx.repo.delete_branch("unconflicted").unwrap_err().is_not_found());

    assert_eq!(fx.repo.get_config("user.name").unwrap().as_deref(), Some("volaya"));
    assert_eq!(fx.repo.get_config("core.nothing").unwrap(), None);
}

#[test]
fn test_point_in_time_lookup() {
    let fx = Fixture::new();
    let now = chrono::Utc::now() + chrono::Duration::seconds(5);
    assert_eq!(fx.repo.commit_at(now).unwrap().commit_time, fx.commits[3].commit_time);
    assert!(fx.repo.created_at().unwrap() <= chrono::Utc::now());
}

#[test]
fn test_remote_round_trip() {
    let fx = Fixture::new();
    let dir = TempDir::new().unwrap();
    let url = fx.repo.path().to_string_lossy().into_owned();
    let clone = Repository::clone_from(&url, dir.path()).unwrap();
    clone.set_config("user.name", "other").unwrap();
    clone.set_config("user.email", "other@example.com").unwrap();
    assert_eq!(clone.log("HEAD", None).unwrap().len(), 4);

    clone.insert_feature("parks/6", park(6, 10.0)).unwrap();
    clone.add_and_commit("from the clone").unwrap();
    assert_eq!(clone.synced(None).unwrap(), (1, 0));
    clone.push("origin", None).unwrap();
    assert_eq!(clone.synced(None).unwrap(), (0, 0));
    assert_eq!(fx.repo.log("master", None).unwrap().len(), 5);
}
