use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use throttle_cache::{from_file, Config, Error, Op, Throttle};

use crate::utils::{load, read_settings, settings_factory, setup, store, tempdir, Settings};

#[test]
fn test_reload_on_change() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let throttle = Throttle::builder(settings_factory()).capacity(4).build();
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));

    store(&path, &Settings::new("second", 2));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("second", 2));
}

#[test]
fn test_replace_persists() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let throttle = Throttle::builder(settings_factory()).build();
    throttle.get(&path).unwrap();
    throttle.replace(&path, Settings::new("replaced", 3)).unwrap();

    assert_eq!(load(&path), Settings::new("replaced", 3));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("replaced", 3));

    // a fresh cache sees the persisted value
    let other = Throttle::builder(settings_factory()).build();
    assert_eq!(other.get(&path).unwrap(), Settings::new("replaced", 3));
}

#[test]
fn test_missing_file_is_retried() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("later.json");

    let throttle = Throttle::builder(settings_factory()).build();
    let err = throttle.get(&path).unwrap_err();
    assert!(matches!(err, Error::Load { .. }), "{err:?}");
    assert!(throttle.contains(&path));

    store(&path, &Settings::new("late", 0));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("late", 0));
}

#[test]
fn test_deleted_file_evicts() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let throttle = Throttle::builder(settings_factory()).build();
    throttle.get(&path).unwrap();

    fs::remove_file(&path).unwrap();
    let err = throttle.get(&path).unwrap_err();
    assert_eq!(err.op(), Some(Op::Update));
    assert!(matches!(err.root(), Error::Io(_)), "{err:?}");
    assert!(!throttle.contains(&path));
}

#[test]
fn test_malformed_update_evicts() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let throttle = Throttle::builder(settings_factory()).build();
    throttle.get(&path).unwrap();

    fs::write(&path, "{ not json").unwrap();
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1, 0)).unwrap();

    let err = throttle.get(&path).unwrap_err();
    assert_eq!(err.op(), Some(Op::Reload));
    assert!(matches!(err.root(), Error::Unmarshal(_)), "{err:?}");
    assert!(throttle.is_empty());
}

#[test]
fn test_least_recently_used_file_is_evicted() {
    setup();
    let dir = tempdir();
    let paths: Vec<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|name| dir.path().join(format!("{name}.json")))
        .collect();
    for (retries, path) in paths.iter().enumerate() {
        store(path, &Settings::new("file", retries as u32));
    }

    let throttle = Throttle::builder(settings_factory()).capacity(2).build();
    for path in &paths {
        throttle.get(path).unwrap();
    }

    assert_eq!(throttle.keys(), [paths[2].clone(), paths[1].clone()]);
    assert!(!throttle.contains(&paths[0]));
}

#[test]
fn test_replace_unknown_file() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");

    let throttle = Throttle::builder(settings_factory()).build();
    let err = throttle
        .replace(&path, Settings::new("nobody", 0))
        .unwrap_err();
    assert_eq!(err.op(), Some(Op::Replace));
    assert!(!path.exists());
}

#[test]
fn test_configured_poll_interval() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let config = Config::from_reader("file:\n  poll_interval: 1h\n".as_bytes()).unwrap();
    let factory = from_file::<Settings>(Arc::new(read_settings), None, config.file.poll_interval);
    let throttle = Throttle::builder(factory).config(config.throttle).build();

    // the first check is allowed, later ones within the hour are skipped
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));
    store(&path, &Settings::new("second", 2));
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));
}
