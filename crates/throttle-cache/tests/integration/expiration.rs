use std::time::Duration;

use throttle_cache::{Config, Throttle};

use crate::utils::{settings_factory, setup, store, tempdir, Settings};

fn config(yaml: &str) -> Config {
    Config::from_reader(yaml.as_bytes()).unwrap()
}

#[tokio::test]
async fn test_configured_expiration() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let config = config(
        r#"
        sweeper:
          interval: 10ms
          expiry: 100ms
          punctual: true
        throttle:
          capacity: 8
        "#,
    );
    let throttle = Throttle::builder(settings_factory())
        .config(config.throttle)
        .sweeper(config.sweeper.build().unwrap())
        .build();
    assert_eq!(throttle.capacity(), 8);

    throttle.get(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(throttle.contains(&path));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!throttle.contains(&path));

    // the next access loads the file again
    assert_eq!(throttle.get(&path).unwrap(), Settings::new("first", 1));
}

#[tokio::test]
async fn test_shared_sweeper_stop() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let sweeper = config("sweeper:\n  expiry: 1h\n").sweeper.build().unwrap();
    let first = Throttle::builder(settings_factory())
        .sweeper(sweeper.clone())
        .build();
    let second = Throttle::builder(settings_factory())
        .sweeper(sweeper.clone())
        .build();

    first.get(&path).unwrap();
    second.get(&path).unwrap();

    sweeper.stop();
    assert!(sweeper.is_stopped());
    assert!(first.is_empty());
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_disabled_expiration() {
    setup();
    let dir = tempdir();
    let path = dir.path().join("settings.json");
    store(&path, &Settings::new("first", 1));

    let config = config("sweeper:\n  enabled: false\n  expiry: 1ms\n");
    let throttle = Throttle::builder(settings_factory())
        .sweeper(config.sweeper.build().unwrap())
        .build();

    throttle.get(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(throttle.sweep(), 0);
    assert!(throttle.contains(&path));
}
