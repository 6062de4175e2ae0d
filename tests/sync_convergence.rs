use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use taskreplica::{LocalServer, Operation, Operations, Replica, Server, Status};
use tempfile::TempDir;
use uuid::Uuid;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn update_at(uuid: Uuid, property: &str, value: &str, timestamp: DateTime<Utc>) -> Operations {
    let mut ops = Operations::new_with_undo_point();
    ops.push(Operation::Update {
        uuid,
        property: property.into(),
        timestamp,
        old_value: None,
        value: Some(value.into()),
    });
    ops
}

/// Two replicas sharing task `T`, already synced through a local server.
struct World {
    _dir: TempDir,
    server_dir: std::path::PathBuf,
    r1: Replica,
    r2: Replica,
    t: Uuid,
}

fn world() -> World {
    init_logging();
    let dir = TempDir::new().unwrap();
    let server_dir = dir.path().join("server");
    let mut r1 = Replica::open_in_memory();
    let mut r2 = Replica::open_in_memory();
    let t = r1.new_task(Status::Pending, "shared").unwrap().uuid();
    r1.sync_to_local(&server_dir, false).unwrap();
    r2.sync_to_local(&server_dir, false).unwrap();
    World {
        _dir: dir,
        server_dir,
        r1,
        r2,
        t,
    }
}

impl World {
    fn observer(&self) -> Replica {
        let mut r3 = Replica::open_in_memory();
        r3.sync_to_local(&self.server_dir, false).unwrap();
        r3
    }
}

#[test]
fn created_task_reaches_second_replica() {
    let mut w = world();
    assert_eq!(
        w.r2.task_data(w.t).unwrap(),
        w.r1.task_data(w.t).unwrap(),
        "both replicas see identical properties"
    );
    assert_eq!(w.r2.working_set().unwrap().by_uuid(w.t), Some(1));
    assert_eq!(w.r1.num_local_operations().unwrap(), 0);
}

fn different_properties(r1_first: bool) {
    let mut w = world();
    let now = Utc::now();
    w.r1.commit_operations(update_at(w.t, "priority", "H", now))
        .unwrap();
    w.r2.commit_operations(update_at(w.t, "project", "home", now))
        .unwrap();
    if r1_first {
        w.r1.sync_to_local(&w.server_dir, false).unwrap();
        w.r2.sync_to_local(&w.server_dir, false).unwrap();
    } else {
        w.r2.sync_to_local(&w.server_dir, false).unwrap();
        w.r1.sync_to_local(&w.server_dir, false).unwrap();
    }
    let mut r3 = w.observer();
    let task = r3.task(w.t).unwrap().unwrap();
    assert_eq!(task.get_value("priority"), Some("H"));
    assert_eq!(task.get_value("project"), Some("home"));
}

#[test]
fn different_properties_merge_r1_first() {
    different_properties(true);
}

#[test]
fn different_properties_merge_r2_first() {
    different_properties(false);
}

fn same_property(earlier_first: bool) {
    let mut w = world();
    let t0 = Utc::now();
    w.r1.commit_operations(update_at(w.t, "description", "from r1", t0))
        .unwrap();
    w.r2.commit_operations(update_at(
        w.t,
        "description",
        "from r2",
        t0 + Duration::seconds(10),
    ))
    .unwrap();
    if earlier_first {
        w.r1.sync_to_local(&w.server_dir, false).unwrap();
        w.r2.sync_to_local(&w.server_dir, false).unwrap();
    } else {
        w.r2.sync_to_local(&w.server_dir, false).unwrap();
        w.r1.sync_to_local(&w.server_dir, false).unwrap();
    }
    // one more round so both have seen everything
    w.r1.sync_to_local(&w.server_dir, false).unwrap();
    w.r2.sync_to_local(&w.server_dir, false).unwrap();

    let mut r3 = w.observer();
    for rep in [&mut w.r1, &mut w.r2, &mut r3] {
        let task = rep.task(w.t).unwrap().unwrap();
        assert_eq!(task.description(), "from r2");
    }
}

#[test]
fn same_property_later_timestamp_wins_earlier_synced_first() {
    same_property(true);
}

#[test]
fn same_property_later_timestamp_wins_later_synced_first() {
    same_property(false);
}

#[test]
fn concurrent_create_of_same_uuid_converges() {
    let mut w = world();
    let u = Uuid::new_v4();
    for (rep, desc) in [(&mut w.r1, "one"), (&mut w.r2, "two")] {
        let mut ops = Operations::new();
        let mut task = rep.create_task(u, &mut ops).unwrap();
        task.set_description(desc, &mut ops).unwrap();
        rep.commit_operations(ops).unwrap();
    }
    w.r1.sync_to_local(&w.server_dir, false).unwrap();
    w.r2.sync_to_local(&w.server_dir, false).unwrap();
    w.r1.sync_to_local(&w.server_dir, false).unwrap();
    assert_eq!(
        w.r1.task_data(u).unwrap(),
        w.r2.task_data(u).unwrap()
    );
}

#[test]
fn delete_wins_over_concurrent_update() {
    let mut w = world();
    assert!(w.r1.delete_task(w.t).unwrap());
    w.r1.sync_to_local(&w.server_dir, false).unwrap();
    w.r2.commit_operations(update_at(w.t, "priority", "L", Utc::now()))
        .unwrap();
    w.r2.sync_to_local(&w.server_dir, false).unwrap();
    assert!(w.r2.task(w.t).unwrap().is_none());
    assert!(w.r2.working_set().unwrap().by_uuid(w.t).is_none());
    assert!(w.observer().task(w.t).unwrap().is_none());
}

#[test]
fn synced_changes_cannot_be_undone() {
    let mut w = world();
    assert_eq!(w.r1.num_undo_points().unwrap(), 0);
    assert!(!w.r1.undo().unwrap());
    assert!(w.r1.task(w.t).unwrap().is_some());
}

#[test]
fn snapshot_bootstraps_new_replica() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut server = LocalServer::new(dir.path(), 5).unwrap();
    let mut r1 = Replica::open_in_memory();
    for n in 0..4 {
        r1.new_task(Status::Pending, &format!("task {n}")).unwrap();
    }
    r1.sync(&mut server, false).unwrap();
    assert!(server.get_snapshot().unwrap().is_some());

    let mut r2 = Replica::open_in_memory();
    r2.sync(&mut server, false).unwrap();
    assert_eq!(r2.all_task_data().unwrap(), r1.all_task_data().unwrap());
    assert_eq!(r2.working_set().unwrap().len(), 4);
}

#[test]
fn sync_to_unreachable_remote_is_a_sync_error() {
    init_logging();
    let mut rep = Replica::open_in_memory();
    rep.new_task(Status::Pending, "offline").unwrap();
    let err = rep
        .sync_to_remote("http://127.0.0.1:9", Uuid::new_v4(), "secret", false)
        .unwrap_err();
    assert_eq!(err.kind(), taskreplica::ErrorKind::Sync);
    // local state is untouched
    assert_eq!(rep.num_local_operations().unwrap(), 6);
}
