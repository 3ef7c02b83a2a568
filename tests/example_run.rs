//! Integration tests for the `example run` command.
use fleet_effects::cli::RunOpts;
use fleet_effects::cli::example::handle_example_run_command;
use fleet_effects::settings::Settings;
use tempfile::tempdir;

/// An integration test for the `example run` command.
#[test]
fn test_handle_example_run_command() {
    unsafe { std::env::set_var("FLEET_EFFECTS_LOG_LEVEL", "off") };

    let tempdir = tempdir().unwrap();
    let opts = RunOpts {
        output_dir: Some(tempdir.path().to_path_buf()),
        ..RunOpts::default()
    };
    handle_example_run_command("simple", &opts, Some(Settings::default())).unwrap();
    assert!(tempdir.path().join("metadata.toml").is_file());

    assert!(handle_example_run_command("missing", &opts, Some(Settings::default())).is_err());
}
