// Segments opened from configuration files
use shmseg_core::error::ErrorKind;
use shmseg_core::{BackendKind, SegmentConfig, SharedSegment, ShmsegConfig};

#[test]
fn test_file_backend_segment_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let toml_str = format!(
        r#"
        [segments.telemetry]
        name = "telemetry"
        size = 512
        backend = "file"
        base_dir = "{}"
        "#,
        dir.path().display().to_string().replace('\\', "\\\\")
    );

    let config = ShmsegConfig::from_toml(&toml_str).unwrap();
    let entry = config.get_segment("telemetry").unwrap();
    assert_eq!(entry.backend, BackendKind::File);

    let mut host = SharedSegment::from_config(entry).unwrap();
    let client = SharedSegment::from_config(&entry.as_client()).unwrap();

    host.write("battery=97").unwrap();
    assert_eq!(client.read().unwrap(), "battery=97");
    assert!(dir.path().join("local").join("telemetry").exists());

    drop(client);
    drop(host);
    assert!(!dir.path().join("local").join("telemetry").exists());
}

#[test]
fn test_invalid_config_is_rejected_before_backend() {
    let err = SharedSegment::from_config(&SegmentConfig::new("empty", 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_client_config_without_host_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SegmentConfig::new("nobody_home", 64).as_client();
    config.backend = BackendKind::File;
    config.base_dir = Some(dir.path().to_path_buf());

    let err = SharedSegment::from_config(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_search_paths_prefer_working_directory() {
    let paths = ShmsegConfig::get_search_paths();
    assert_eq!(paths[0], std::path::PathBuf::from("shmseg.toml"));
    assert!(paths.iter().any(|p| p.ends_with("shmseg/config.toml")));
    assert!(paths.iter().all(|p| {
        let name = p.file_name().unwrap().to_string_lossy();
        name.starts_with("shmseg.") || name.starts_with("config.")
    }));
}

#[test]
fn test_find_and_load_from_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("shmseg.toml"),
        "[segments.pose]\nname = \"pose\"\nsize = 96\n",
    )
    .unwrap();

    // The only test in this binary that depends on the working directory
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let loaded = ShmsegConfig::find_and_load();
    std::env::set_current_dir(previous).unwrap();

    let config = loaded.unwrap();
    let pose = config.get_segment("pose").unwrap();
    assert_eq!(pose.name, "pose");
    assert_eq!(pose.size, 96);
    assert!(pose.host);
}
