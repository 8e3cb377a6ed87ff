//! Locating the config file and the precompiled shader directory

use std::path::{Path, PathBuf};

/// Env var naming the config file
pub const CONFIG_ENV: &str = "SHADER_RUNNER_CONFIG";

/// Env var overriding the shader directory
pub const SHADER_DIRECTORY_ENV: &str = "SHADER_RUNNER_SHADER_DIRECTORY";

const SYSTEM_CONFIG: &str = "/etc/shader_runner/config.toml";
const LOCAL_CONFIG: &str = "config.toml";

/// Where the config path came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Named on the command line or through the env; must load
    Explicit(PathBuf),
    /// Found in a default location
    Discovered(PathBuf),
    /// Nothing found; built-in defaults apply
    Defaults,
}

/// Pick the config file: CLI argument, then env, then the first existing default
pub fn resolve_config(
    cli: Option<&str>,
    env: Option<String>,
    exists: impl Fn(&Path) -> bool,
) -> ConfigLocation {
    if let Some(path) = cli {
        return ConfigLocation::Explicit(PathBuf::from(path));
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return ConfigLocation::Explicit(PathBuf::from(path));
    }

    [SYSTEM_CONFIG, LOCAL_CONFIG]
        .iter()
        .map(PathBuf::from)
        .find(|p| exists(p))
        .map_or(ConfigLocation::Defaults, ConfigLocation::Discovered)
}

/// Pick the precompiled shader directory
///
/// Order: env override, configured directory, then the first existing of
/// `<exe dir>/shaders`, `<exe dir>/../share/shader_runner/shaders`, `./shaders`.
/// Falls back to `./shaders` even when it does not exist.
pub fn resolve_shaders_dir(
    env: Option<String>,
    configured: Option<&Path>,
    exe_dir: Option<&Path>,
    exists: impl Fn(&Path) -> bool,
) -> PathBuf {
    if let Some(dir) = env.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }

    let mut candidates = Vec::new();
    if let Some(exe_dir) = exe_dir {
        candidates.push(exe_dir.join("shaders"));
        candidates.push(exe_dir.join("..").join("share").join("shader_runner").join("shaders"));
    }
    candidates.push(PathBuf::from("shaders"));

    candidates
        .into_iter()
        .find(|p| exists(p))
        .unwrap_or_else(|| PathBuf::from("shaders"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_argument_wins() {
        let location = resolve_config(Some("a.toml"), Some("b.toml".to_string()), |_| true);
        assert_eq!(location, ConfigLocation::Explicit(PathBuf::from("a.toml")));
    }

    #[test]
    fn test_env_before_defaults() {
        let location = resolve_config(None, Some("b.toml".to_string()), |_| true);
        assert_eq!(location, ConfigLocation::Explicit(PathBuf::from("b.toml")));
    }

    #[test]
    fn test_first_existing_default() {
        let location = resolve_config(None, None, |p| p == Path::new(LOCAL_CONFIG));
        assert_eq!(location, ConfigLocation::Discovered(PathBuf::from(LOCAL_CONFIG)));

        let location = resolve_config(None, None, |_| true);
        assert_eq!(location, ConfigLocation::Discovered(PathBuf::from(SYSTEM_CONFIG)));

        assert_eq!(resolve_config(None, Some(String::new()), |_| false), ConfigLocation::Defaults);
    }

    #[test]
    fn test_shader_dir_order() {
        let exe = Path::new("/opt/runner/bin");

        let dir = resolve_shaders_dir(Some("/env".to_string()), Some(Path::new("/cfg")), Some(exe), |_| true);
        assert_eq!(dir, PathBuf::from("/env"));

        let dir = resolve_shaders_dir(None, Some(Path::new("/cfg")), Some(exe), |_| true);
        assert_eq!(dir, PathBuf::from("/cfg"));

        let dir = resolve_shaders_dir(None, None, Some(exe), |_| true);
        assert_eq!(dir, exe.join("shaders"));

        let share = exe.join("..").join("share").join("shader_runner").join("shaders");
        let dir = resolve_shaders_dir(None, None, Some(exe), |p| p == share);
        assert_eq!(dir, share);
    }

    #[test]
    fn test_shader_dir_falls_back_to_cwd() {
        let dir = resolve_shaders_dir(None, None, None, |_| false);
        assert_eq!(dir, PathBuf::from("shaders"));
    }
}
