use assert_cmd::Command;

pub fn moobot_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("moobot").expect("moobot test binary should build")
    }
}

/// Write a stub-provider config into a fresh state directory and return the
/// tempdir guard. Tests point `MOOBOT_STATE_DIR` at it.
pub fn stub_state_dir() -> tempfile::TempDir {
    let tmp = tempfile::TempDir::new().expect("temp state dir");
    std::fs::write(
        tmp.path().join("config.json"),
        r#"{
            "llm": { "models": [{ "provider": "stub", "model": "stub",
                                   "capabilities": ["chat", "embed"] }] },
            "skills": { "enabled": ["memory", "cron", "edit_file", "read_file"] }
        }"#,
    )
    .expect("write config");
    tmp
}
