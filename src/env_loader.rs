use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DotenvLoadOutcome {
    LoadedDefault,
    LoadedFallback(PathBuf),
    Missing,
}

fn fallback_dotenv_path(state_dir: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = state_dir {
        return Some(dir.join(".env"));
    }
    Some(home?.join(".waypoint/.env"))
}

pub fn load_dotenv() -> DotenvLoadOutcome {
    if dotenvy::dotenv().is_ok() {
        return DotenvLoadOutcome::LoadedDefault;
    }

    let state_dir = env::var_os("WAYPOINT_STATE_DIR")
        .map(PathBuf::from)
        .or_else(|| env::var_os("WAYPOINT_HOME").map(|home| PathBuf::from(home).join(".waypoint")));
    let Some(path) = fallback_dotenv_path(state_dir, env::current_dir().ok()) else {
        return DotenvLoadOutcome::Missing;
    };
    if path.is_file() && dotenvy::from_path(&path).is_ok() {
        return DotenvLoadOutcome::LoadedFallback(path);
    }

    DotenvLoadOutcome::Missing
}
