use anyhow::Result;
use coinflow_core::config::Config;
use coinflow_core::types::{DEFAULT_DUST, DEFAULT_MAX_FEE};
use coinflow_core::{Network, TxExecutionSpeed};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

// Helper function to create a temporary directory and config file for testing
fn setup_test_config() -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");

    let config_content = r#"
        [network]
        name = "bitcoin"

        [fees]
        max_fee = 20000
        dust = 546
        fallback_rate = 12
        default_speed = "fast"

        [polling]
        interval_secs = 10
        max_attempts = 30

        [backend]
        esplora_url = "http://localhost:3002/"
        timeout_secs = 5
        max_retries = 2

        [logging]
        level = "debug"
    "#;
    fs::write(&config_path, config_content).expect("Failed to write test config");

    (temp_dir, config_path)
}

#[test]
fn test_load_config() -> Result<()> {
    let (_temp_dir, config_path) = setup_test_config();
    let config = Config::load(&config_path)?;

    assert_eq!(config.bitcoin_network()?, Network::Bitcoin);
    assert_eq!(config.fees.default_speed, TxExecutionSpeed::Fast);

    let policy = config.fee_policy();
    assert_eq!(policy.max_fee, 20_000);
    assert_eq!(policy.dust, 546);
    assert_eq!(policy.fallback_rate, 12);

    let poll = config.poll_config();
    assert_eq!(poll.interval, Duration::from_secs(10));
    assert_eq!(poll.max_attempts, 30);

    assert_eq!(config.esplora_url()?, "http://localhost:3002");
    assert_eq!(config.backend.max_retries, 2);
    Ok(())
}

#[test]
fn test_defaults_for_missing_sections() -> Result<()> {
    let config = Config::from_toml_str("")?;

    assert_eq!(config.bitcoin_network()?, Network::Testnet);
    assert_eq!(config.fees.max_fee, DEFAULT_MAX_FEE);
    assert_eq!(config.fees.dust, DEFAULT_DUST);
    assert_eq!(config.polling.max_attempts, 60);
    assert_eq!(config.esplora_url()?, "https://blockstream.info/testnet/api");
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.network.name = "bitcoin".to_string();
    config.fees.max_fee = 15_000;
    config.save(&path)?;

    let reloaded = Config::load(&path)?;
    assert_eq!(reloaded.bitcoin_network()?, Network::Bitcoin);
    assert_eq!(reloaded.fees.max_fee, 15_000);
    assert_eq!(reloaded.esplora_url()?, "https://blockstream.info/api");
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[network]\nname = \"regtest\"",
        "[fees]\nmax_fee = 500\ndust = 600",
        "[polling]\ninterval_secs = 0",
        "[polling]\nmax_attempts = 0",
        "[backend]\ntimeout_secs = 0",
        "[fees]\nmax_fee = \"lots\"",
    ];
    for case in cases {
        assert!(Config::from_toml_str(case).is_err(), "accepted: {}", case);
    }
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    assert!(Config::load(&temp_dir.path().join("absent.toml")).is_err());
}

#[test]
fn test_logging_level_follows_config() -> Result<()> {
    let debug = Config::from_toml_str("[logging]\nlevel = \"debug\"")?;
    debug.init_logging()?;
    assert_eq!(log::max_level(), log::LevelFilter::Debug);

    // A second configuration only changes the level of the installed logger
    let warn = Config::from_toml_str("[logging]\nlevel = \"warn\"")?;
    warn.init_logging()?;
    assert_eq!(log::max_level(), log::LevelFilter::Warn);
    Ok(())
}
