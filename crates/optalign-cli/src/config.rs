//! Persisted CLI settings – reads/writes `~/.optalign/config.toml`.

use optalign_engine::{ScanConfig, ScanMode};
use optalign_hal::sim::GaussianField;
use optalign_types::Position;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters of the simulated stage the CLI scans against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Signal amplitude above the floor (A).
    pub amplitude: f64,
    /// Gaussian width (mm).
    pub sigma: f64,
    /// Floor reading far from the peak (A).
    pub baseline: f64,
    /// Delay after every move, 0 to disable.
    pub settle_ms: u64,
    pub peak: Position,
    /// Where the scan starts.
    pub start: Position,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let field = GaussianField::default();
        Self {
            amplitude: field.amplitude,
            sigma: field.sigma,
            baseline: field.baseline,
            settle_ms: 0,
            peak: field.peak,
            start: Position::origin(),
        }
    }
}

impl SimulatorConfig {
    pub fn field(&self) -> GaussianField {
        GaussianField::new(self.peak, self.amplitude, self.sigma).with_baseline(self.baseline)
    }

    pub fn settle(&self) -> Option<Duration> {
        (self.settle_ms > 0).then(|| Duration::from_millis(self.settle_ms))
    }
}

/// Persisted user configuration stored in `~/.optalign/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Recorded in every exported report.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Where to write the JSON report after each scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

fn default_device_id() -> String {
    "sim-stage".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            export_path: None,
            scan: ScanConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Return the path to `~/.optalign/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".optalign").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<AppConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: AppConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

fn parse_mode(raw: &str) -> Option<ScanMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "adaptive" => Some(ScanMode::Adaptive),
        "phased" => Some(ScanMode::Phased),
        _ => None,
    }
}

/// Apply `OPTALIGN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `OPTALIGN_MODE` | `scan.mode` (`adaptive` or `phased`) |
/// | `OPTALIGN_SETTLE_MS` | `simulator.settle_ms` |
/// | `OPTALIGN_EXPORT_PATH` | `export_path` |
pub fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("OPTALIGN_MODE")
        && let Some(mode) = parse_mode(&v)
    {
        cfg.scan.mode = mode;
    }
    if let Ok(v) = std::env::var("OPTALIGN_SETTLE_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.simulator.settle_ms = ms;
    }
    if let Ok(v) = std::env::var("OPTALIGN_EXPORT_PATH")
        && !v.is_empty()
    {
        cfg.export_path = Some(PathBuf::from(v));
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &AppConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optalign_types::{Axis, DirectionConstraint};
    use std::sync::Mutex;

    // Env-var tests share process state.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn config_path_points_to_optalign_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".optalign"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_customised_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = AppConfig::default();
        cfg.device_id = "bench-7".to_string();
        cfg.scan = ScanConfig::adaptive();
        cfg.scan.set_axis_direction(Axis::X, DirectionConstraint::Positive);
        cfg.simulator.peak = Position::new(0.001, 0.0, -0.002);
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "device_id = \"rig\"\n\n[scan]\nmode = \"adaptive\"\n\n[simulator]\nsettle_ms = 5\n",
        )
        .unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.device_id, "rig");
        assert_eq!(loaded.scan.mode, ScanMode::Adaptive);
        assert_eq!(loaded.scan.max_passes, ScanConfig::default().max_passes);
        assert_eq!(loaded.simulator.settle(), Some(Duration::from_millis(5)));
        assert_eq!(loaded.simulator.peak, SimulatorConfig::default().peak);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "scan = 3\n[[").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&AppConfig::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn simulator_config_builds_matching_field() {
        let sim = SimulatorConfig::default();
        assert_eq!(sim.field(), GaussianField::default());
        assert_eq!(sim.settle(), None);
    }

    #[test]
    fn env_overrides_apply() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("OPTALIGN_MODE", "Adaptive");
            std::env::set_var("OPTALIGN_SETTLE_MS", "12");
            std::env::set_var("OPTALIGN_EXPORT_PATH", "/tmp/scan.json");
        }
        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("OPTALIGN_MODE");
            std::env::remove_var("OPTALIGN_SETTLE_MS");
            std::env::remove_var("OPTALIGN_EXPORT_PATH");
        }
        assert_eq!(cfg.scan.mode, ScanMode::Adaptive);
        assert_eq!(cfg.simulator.settle_ms, 12);
        assert_eq!(cfg.export_path, Some(PathBuf::from("/tmp/scan.json")));
    }

    #[test]
    fn env_overrides_ignore_invalid_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("OPTALIGN_MODE", "spiral");
            std::env::set_var("OPTALIGN_SETTLE_MS", "soon");
        }
        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("OPTALIGN_MODE");
            std::env::remove_var("OPTALIGN_SETTLE_MS");
        }
        assert_eq!(cfg, AppConfig::default());
    }
}
