//! Tests for the init function

use autoloop_config::Config;
use tempfile::TempDir;

#[tokio::test]
async fn test_init_writes_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("autoloop.json");

    let config = autoloop_config::init(&path, false).await.unwrap();

    assert!(path.exists());
    assert_eq!(config.run.max_cycles, 30);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"max_cycles\": 30"));
    assert!(raw.contains("GEMINI_API_KEY"));
}

#[tokio::test]
async fn test_init_keeps_existing_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("autoloop.json");

    let mut existing = Config::default();
    existing.run.max_cycles = 4;
    existing.save_to(&path).await.unwrap();

    let config = autoloop_config::init(&path, false).await.unwrap();
    assert_eq!(config.run.max_cycles, 4);
}

#[tokio::test]
async fn test_init_force_overwrites() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("autoloop.json");

    let mut existing = Config::default();
    existing.run.max_cycles = 4;
    existing.save_to(&path).await.unwrap();

    let config = autoloop_config::init(&path, true).await.unwrap();
    assert_eq!(config.run.max_cycles, 30);

    let reloaded = Config::load_from(&path).await.unwrap();
    assert_eq!(reloaded.run.max_cycles, 30);
}
