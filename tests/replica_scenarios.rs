use taskreplica::validate::parse_uuid;
use taskreplica::{AccessMode, ErrorKind, Operation, Operations, Replica, Status, Tag};
use tempfile::TempDir;
use uuid::Uuid;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn set(uuid: Uuid, property: &str, value: Option<&str>) -> Operation {
    Operation::Update {
        uuid,
        property: property.into(),
        timestamp: chrono::Utc::now(),
        old_value: None,
        value: value.map(Into::into),
    }
}

#[test]
fn buy_milk_then_undo() {
    init_logging();
    let mut rep = Replica::open_in_memory();
    let uuid = parse_uuid("11111111-1111-1111-1111-111111111111").unwrap();

    let mut ops = Operations::new();
    let mut task = rep.create_task(uuid, &mut ops).unwrap();
    task.set_description("Buy milk", &mut ops).unwrap();
    task.set_status(Status::Pending, &mut ops).unwrap();
    rep.commit_operations(ops).unwrap();

    assert_eq!(rep.task_uuids().unwrap(), vec![uuid]);
    let task = rep.task(uuid).unwrap().unwrap();
    assert_eq!(task.get_value("description"), Some("Buy milk"));

    assert!(rep.undo().unwrap());
    assert!(rep.task(uuid).unwrap().is_none());
}

#[test]
fn open_on_disk_without_create_fails() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x");
    let err = Replica::open_on_disk(&path, false, AccessMode::ReadWrite)
        .err()
        .expect("opening a missing path should fail");
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!path.exists());
}

#[test]
fn malformed_uuid_cites_format() {
    let err = parse_uuid("1111-not-a-uuid").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(
        err.to_string().contains("xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"),
        "{err}"
    );
}

#[test]
fn undo_point_scoping() {
    init_logging();
    let mut rep = Replica::open_in_memory();
    let a = Uuid::new_v4();
    let ops: Operations = vec![
        Operation::Create { uuid: a },
        Operation::UndoPoint,
        set(a, "x", Some("1")),
        set(a, "y", Some("2")),
    ]
    .into();
    rep.commit_operations(ops).unwrap();

    let preview = rep.undo_operations().unwrap();
    assert_eq!(preview.len(), 3);
    assert!(preview[0].is_undo_point());

    assert!(rep.undo().unwrap());
    let task = rep.task(a).unwrap().expect("A is still created");
    assert_eq!(task.get_value("x"), None);
    assert_eq!(task.get_value("y"), None);

    assert!(rep.undo().unwrap());
    assert!(rep.task(a).unwrap().is_none());

    assert!(!rep.undo().unwrap());
}

#[test]
fn failed_batch_leaves_no_trace() {
    init_logging();
    let mut rep = Replica::open_in_memory();
    let a = Uuid::new_v4();
    rep.commit_operations(vec![Operation::Create { uuid: a }].into())
        .unwrap();
    let before = rep.all_task_data().unwrap();
    let local_before = rep.num_local_operations().unwrap();
    let undo_before = rep.undo_operations().unwrap();

    let err = rep
        .commit_operations(
            vec![
                Operation::UndoPoint,
                set(a, "description", Some("changed")),
                set(Uuid::new_v4(), "description", Some("missing")),
            ]
            .into(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(rep.all_task_data().unwrap(), before);
    assert_eq!(rep.num_local_operations().unwrap(), local_before);
    assert_eq!(rep.undo_operations().unwrap(), undo_before);
    assert_eq!(rep.num_undo_points().unwrap(), 0);
}

#[test]
fn status_deleted_is_not_removal() {
    let mut rep = Replica::open_in_memory();
    let mut task = rep.new_task(Status::Pending, "tidy up").unwrap();
    let mut ops = Operations::new_with_undo_point();
    task.set_status(Status::Deleted, &mut ops).unwrap();
    rep.commit_operations(ops).unwrap();

    let stored = rep.task(task.uuid()).unwrap().unwrap();
    assert!(stored.is_deleted());
    assert!(rep.delete_task(task.uuid()).unwrap());
    assert!(rep.task(task.uuid()).unwrap().is_none());
}

#[test]
fn task_history_survives_undo() {
    let mut rep = Replica::open_in_memory();
    let task = rep.new_task(Status::Pending, "history").unwrap();
    let created = rep.task_operations(task.uuid()).unwrap().len();
    assert!(rep.undo().unwrap());
    // the reversal is itself recorded
    assert!(rep.task_operations(task.uuid()).unwrap().len() > created);
}

#[test]
fn tags_annotations_and_udas_persist() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let uuid = {
        let mut rep = Replica::open_on_disk(dir.path(), true, AccessMode::ReadWrite).unwrap();
        let mut task = rep.new_task(Status::Pending, "pack").unwrap();
        let mut ops = Operations::new_with_undo_point();
        task.add_tag(&"travel".parse::<Tag>().unwrap(), &mut ops)
            .unwrap();
        task.add_annotation(
            taskreplica::Annotation {
                entry: chrono::Utc::now(),
                description: "passport!".into(),
            },
            &mut ops,
        )
        .unwrap();
        task.set_uda("trip", "city", "Lisbon", &mut ops).unwrap();
        rep.commit_operations(ops).unwrap();
        task.uuid()
    };

    let mut rep = Replica::open_on_disk(dir.path(), false, AccessMode::ReadWrite).unwrap();
    let task = rep.task(uuid).unwrap().unwrap();
    let deps = rep.dependency_map(false).unwrap();
    assert!(task.has_tag(&"travel".parse::<Tag>().unwrap(), &deps));
    assert!(task.has_tag(&"PENDING".parse::<Tag>().unwrap(), &deps));
    assert_eq!(task.annotations()[0].description, "passport!");
    assert_eq!(task.get_uda("trip", "city"), Some("Lisbon"));

    // the undo log is durable too
    assert_eq!(rep.num_undo_points().unwrap(), 2);
    assert!(rep.undo().unwrap());
    let task = rep.task(uuid).unwrap().unwrap();
    assert_eq!(task.get_uda("trip", "city"), None);
    assert_eq!(task.description(), "pack");
}

#[test]
fn two_handles_on_one_directory() {
    let dir = TempDir::new().unwrap();
    let mut writer = Replica::open_on_disk(dir.path(), true, AccessMode::ReadWrite).unwrap();
    let mut reader = Replica::open_on_disk(dir.path(), false, AccessMode::ReadWrite).unwrap();
    let task = writer.new_task(Status::Pending, "shared").unwrap();
    assert_eq!(
        reader.task(task.uuid()).unwrap().map(|t| t.description().to_string()),
        Some("shared".to_string())
    );
    assert_eq!(reader.working_set().unwrap().by_uuid(task.uuid()), Some(1));
}

#[test]
fn working_set_resolves_through_replica() {
    let mut rep = Replica::open_in_memory();
    let first = rep.new_task(Status::Pending, "first").unwrap();
    let second = rep.new_task(Status::Pending, "second").unwrap();
    let ws = rep.working_set().unwrap();
    assert_eq!(ws.largest_index(), 2);
    let uuid = ws.by_index(2).unwrap();
    assert_eq!(uuid, second.uuid());
    assert_eq!(rep.task(uuid).unwrap().unwrap().description(), "second");
    assert_eq!(ws.by_uuid(first.uuid()), Some(1));
}
