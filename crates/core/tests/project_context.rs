use fireball_core::db::{
    load_project_config, save_project_config, BinaryRecord, ProjectConfig, ProjectContext, ProjectLayout,
};
use fireball_core::model::Arch;

#[test]
fn layout_places_metadata_under_dot_fireball() {
    let layout = ProjectLayout::new("/tmp/proj");
    assert!(layout.meta_dir.ends_with(".fireball"));
    assert!(layout.project_config_path.ends_with(".fireball/project.json"));
    assert_eq!(layout.db_path_relative_string(), format!(".fireball{}project.db", std::path::MAIN_SEPARATOR));
    assert!(layout.run_output_path("server", 7).ends_with("outputs/server/run-7.c"));
    assert!(layout.binary_output_root("lib/x86:64").ends_with("outputs/lib_x86_64"));
}

#[test]
fn project_context_loads_config_and_db() {
    let temp = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(temp.path());

    let mut config = ProjectConfig::new("CtxProject", layout.db_path_relative_string());
    config.default_arch = Some("arm64".into());
    config.decompile.max_instructions = Some(500);
    save_project_config(&layout, &config).expect("save config");

    let ctx = ProjectContext::from_root(temp.path()).expect("context");
    assert_eq!(ctx.config.name, "CtxProject");
    assert_eq!(ctx.config.default_arch(), Some(Arch::Arm64));
    assert_eq!(ctx.config.decompile.max_instructions, Some(500));
    assert!(ctx.db_path.is_file());
    ctx.db.list_binaries().expect("list binaries");

    assert_eq!(ctx.binary_path("bin/a"), temp.path().join("bin/a"));
    assert_eq!(ctx.binary_path("/opt/a"), std::path::PathBuf::from("/opt/a"));

    let err = ctx.binary("ghost").unwrap_err();
    assert!(err.to_string().contains("not registered"), "{err}");
    ctx.db.insert_binary(&BinaryRecord::new("real", "bin/real")).expect("insert");
    assert_eq!(ctx.binary("real").expect("registered").path, "bin/real");
}

#[test]
fn older_configs_without_decompile_options_still_load() {
    let temp = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(temp.path());
    std::fs::create_dir_all(&layout.meta_dir).unwrap();
    std::fs::write(
        &layout.project_config_path,
        r#"{"name":"Old","description":null,"config_version":"0.1.0","db":{"path":".fireball/project.db"}}"#,
    )
    .unwrap();

    let config = load_project_config(&layout).expect("load config");
    assert_eq!(config.default_arch(), None);
    assert_eq!(config.decompile.max_instructions, None);
}

#[test]
fn missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    assert!(ProjectContext::from_root(temp.path()).is_err());
}
