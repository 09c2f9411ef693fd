use std::path::PathBuf;

const STATE_DIR: &str = "PINGGUARD_STATE_DIR";

const DEFAULT_STATE_DIR: &str = "./pingguard-state";

pub fn get_state_dir() -> PathBuf {
    let dir_from_env = std::env::var(STATE_DIR);
    dir_from_env.map_or(PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from)
}

const DEBUG: &str = "PINGGUARD_DEBUG";

pub fn get_debug() -> bool {
    let debug_from_env = std::env::var(DEBUG);
    debug_from_env.is_ok_and(|value| matches!(value.as_str(), "1" | "true" | "yes"))
}
