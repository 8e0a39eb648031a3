//! Integration tests for rebuild-on-resize.

use alopex_strata::column::{
    rebuild_path, ColumnFile, ColumnKind, ColumnValues, ResizeManager, SyncMode,
};
use proptest::prelude::*;
use tempfile::TempDir;

#[test]
fn test_overflow_scenario() {
    // initial_col_size = 4, col_size_increase_step = 2
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("close.col");
    let manager = ResizeManager::new(2).unwrap();
    let mut file = ColumnFile::create(&path, ColumnKind::Float64, 4, SyncMode::Fsync).unwrap();

    file.append(&ColumnValues::from(vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    assert_eq!(file.capacity(), 4);

    let extra = ColumnValues::from(vec![5.0]);
    let event = manager
        .ensure_room(&mut file, extra.len() as u64)
        .unwrap()
        .expect("overflow must rebuild");
    file.append(&extra).unwrap();

    assert_eq!(event.old_capacity, 4);
    assert_eq!(event.new_capacity, 6);
    assert_eq!(file.length(), 5);
    assert_eq!(file.capacity(), 6);
    assert_eq!(
        file.read(0..5).unwrap(),
        ColumnValues::from(vec![1.0, 2.0, 3.0, 4.0, 5.0])
    );
    assert!(!rebuild_path(&path).exists());

    drop(file);
    let reopened = ColumnFile::open(&path, SyncMode::Fsync).unwrap();
    assert_eq!(reopened.capacity(), 6);
    assert_eq!(reopened.length(), 5);
}

#[test]
fn test_multi_step_growth_is_linear() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("volume.col");
    let manager = ResizeManager::new(3).unwrap();
    let mut file = ColumnFile::create(&path, ColumnKind::Int64, 2, SyncMode::None).unwrap();

    let mut capacities = Vec::new();
    for i in 0..10i64 {
        if let Some(event) = manager.ensure_room(&mut file, 1).unwrap() {
            assert_eq!(event.new_capacity - event.old_capacity, 3);
            assert_eq!(event.triggering_write_size, 1);
            capacities.push(event.new_capacity);
        }
        file.append(&ColumnValues::from(vec![i])).unwrap();
    }

    assert_eq!(capacities, vec![5, 8, 11]);
    assert_eq!(
        file.read_all().unwrap(),
        ColumnValues::from((0..10i64).collect::<Vec<_>>())
    );
}

#[test]
fn test_large_write_grows_in_one_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("open.col");
    let manager = ResizeManager::new(4).unwrap();
    let mut file = ColumnFile::create(&path, ColumnKind::Float32, 4, SyncMode::None).unwrap();
    file.append(&ColumnValues::from(vec![0.5f32; 3])).unwrap();

    let event = manager.ensure_room(&mut file, 10).unwrap().unwrap();
    // 13 slots needed: 4 + ceil(9 / 4) * 4 = 16
    assert_eq!(event.new_capacity, 16);
    assert_eq!(event.triggering_write_size, 9);
    assert!(manager.ensure_room(&mut file, 10).unwrap().is_none());
}

#[test]
fn test_byte_columns_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("symbols.col");
    let manager = ResizeManager::new(1).unwrap();
    let mut file = ColumnFile::create(&path, ColumnKind::Bytes(4), 1, SyncMode::None).unwrap();

    let first = ColumnValues::Bytes {
        width: 4,
        data: b"AAPL".to_vec(),
    };
    file.append(&first).unwrap();
    manager.ensure_room(&mut file, 1).unwrap();
    file.append(&ColumnValues::Bytes {
        width: 4,
        data: b"MSFT".to_vec(),
    })
    .unwrap();

    assert_eq!(
        file.read_all().unwrap(),
        ColumnValues::Bytes {
            width: 4,
            data: b"AAPLMSFT".to_vec()
        }
    );
}

proptest! {
    /// A rebuild preserves [0, L) and the following append lands at [L, L + M).
    #[test]
    fn test_rebuild_preserves_prefix_proptest(
        initial in 1u64..16,
        step in 1u64..8,
        existing in prop::collection::vec(-1000.0f64..1000.0, 0..16),
        incoming in prop::collection::vec(-1000.0f64..1000.0, 1..24),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("prop.col");
        let manager = ResizeManager::new(step).unwrap();
        let capacity = initial.max(existing.len() as u64).max(1);
        let mut file = ColumnFile::create(&path, ColumnKind::Float64, capacity, SyncMode::None).unwrap();
        file.append(&ColumnValues::from(existing.clone())).unwrap();
        let before = file.capacity();

        let event = manager.ensure_room(&mut file, incoming.len() as u64).unwrap();
        let needed = existing.len() as u64 + incoming.len() as u64;
        match event {
            Some(event) => {
                prop_assert!(event.new_capacity >= needed);
                prop_assert!(event.new_capacity > event.old_capacity);
                prop_assert_eq!((event.new_capacity - before) % step, 0);
                prop_assert!(event.new_capacity - step < needed);
            }
            None => prop_assert!(before >= needed),
        }

        file.append(&ColumnValues::from(incoming.clone())).unwrap();
        let len = existing.len() as u64;
        prop_assert_eq!(file.read(0..len).unwrap(), ColumnValues::from(existing));
        prop_assert_eq!(
            file.read(len..file.length()).unwrap(),
            ColumnValues::from(incoming)
        );
    }
}
