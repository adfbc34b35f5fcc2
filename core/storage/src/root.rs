//! Storage root resolution.
//!
//! The active root is chosen at startup, before any password is known,
//! by asking an ordered list of strategies and taking the first match:
//!
//! 1. [`PortableMarker`]: a marker file next to the executable (or next
//!    to its application bundle) makes that directory the root.
//! 2. [`ConfiguredLocation`]: a custom location recorded in the config file.
//! 3. [`PlatformDefault`]: the platform application-data directory.
//!
//! A strategy that applies but points at an unusable directory reports
//! `LocationUnavailable`; the resolver records it as a warning and falls
//! through to the next strategy.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use keepvault_common::{Error, Result};

/// Marker file name enabling portable mode.
pub const PORTABLE_MARKER: &str = "portable.marker";

/// Application directory name under the platform data directory.
pub const DEFAULT_APP_NAME: &str = "keepvault";

const PROBE_FILENAME: &str = ".keepvault-probe";

/// Which strategy produced the active root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    /// Directory beside the executable.
    Portable,
    /// Custom location from the config file.
    Configured,
    /// Platform application-data directory.
    Default,
}

/// A storage-root candidate source.
pub trait RootStrategy: Send + Sync {
    /// Which source this strategy represents.
    fn source(&self) -> RootSource;

    /// Produce a root if this strategy applies.
    ///
    /// # Returns
    /// - `Ok(None)` if the strategy does not apply
    ///
    /// # Errors
    /// - `LocationUnavailable` if it applies but the directory is unusable
    fn resolve(&self) -> Result<Option<PathBuf>>;
}

/// Outcome of root resolution.
#[derive(Debug, Clone)]
pub struct ResolvedRoot {
    pub path: PathBuf,
    pub source: RootSource,
    /// Skipped candidates, for display by the host.
    pub warnings: Vec<String>,
}

/// Ordered list of root strategies.
#[derive(Default)]
pub struct RootResolver {
    strategies: Vec<Box<dyn RootStrategy>>,
}

impl RootResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy with lower priority than those already added.
    pub fn with_strategy(mut self, strategy: impl RootStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Portable marker, then config override, then `default_dir`.
    pub fn standard(exe_path: impl Into<PathBuf>, default_dir: impl Into<PathBuf>) -> Self {
        let default_dir = default_dir.into();
        Self::new()
            .with_strategy(PortableMarker::new(exe_path))
            .with_strategy(ConfiguredLocation::new(ConfigStore::in_dir(&default_dir)))
            .with_strategy(PlatformDefault::new(default_dir))
    }

    /// Standard resolver for the running executable and platform data directory.
    pub fn for_current_process(app_name: &str) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::standard(exe, default_data_dir(app_name)?))
    }

    /// Evaluate strategies in order until one matches.
    ///
    /// # Errors
    /// - `LocationUnavailable` if no strategy yields a usable root
    /// - Any non-location error raised by a strategy
    pub fn resolve(&self) -> Result<ResolvedRoot> {
        let mut warnings = Vec::new();

        for strategy in &self.strategies {
            match strategy.resolve() {
                Ok(Some(path)) => {
                    info!(path = %path.display(), source = ?strategy.source(), "Resolved storage root");
                    return Ok(ResolvedRoot {
                        path,
                        source: strategy.source(),
                        warnings,
                    });
                }
                Ok(None) => {
                    debug!(source = ?strategy.source(), "Root strategy not applicable");
                }
                Err(Error::LocationUnavailable(reason)) => {
                    warn!(source = ?strategy.source(), %reason, "Storage location unavailable, falling back");
                    warnings.push(reason);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::LocationUnavailable(
            "no usable storage location".to_string(),
        ))
    }
}

/// Platform application-data directory for `app_name`.
pub fn default_data_dir(app_name: &str) -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(app_name))
        .ok_or_else(|| {
            Error::LocationUnavailable("platform data directory not available".to_string())
        })
}

/// Check that `dir` exists, is a directory and accepts new files.
///
/// # Errors
/// - `LocationUnavailable` describing the first failed check
pub fn ensure_writable_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(Error::LocationUnavailable(format!(
            "{} does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(Error::LocationUnavailable(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let probe = dir.join(PROBE_FILENAME);
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| {
            Error::LocationUnavailable(format!("{} is not writable: {}", dir.display(), e))
        })
}

/// Directory next to the running executable, when it carries the marker.
pub struct PortableMarker {
    exe_path: PathBuf,
    marker: String,
}

impl PortableMarker {
    pub fn new(exe_path: impl Into<PathBuf>) -> Self {
        Self {
            exe_path: exe_path.into(),
            marker: PORTABLE_MARKER.to_string(),
        }
    }

    /// Use a different marker file name.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Directories checked for the marker, in order.
    ///
    /// For an executable nested as `X.app/Contents/MacOS/exe`, the directory
    /// holding `X.app` is checked after the executable's own directory.
    fn candidates(&self) -> Vec<PathBuf> {
        let Some(exe_dir) = self.exe_path.parent() else {
            return Vec::new();
        };

        let mut candidates = vec![exe_dir.to_path_buf()];
        if let Some(bundle_parent) = bundle_parent(exe_dir) {
            candidates.push(bundle_parent);
        }
        candidates
    }
}

impl RootStrategy for PortableMarker {
    fn source(&self) -> RootSource {
        RootSource::Portable
    }

    fn resolve(&self) -> Result<Option<PathBuf>> {
        for dir in self.candidates() {
            if dir.join(&self.marker).is_file() {
                ensure_writable_dir(&dir)?;
                return Ok(Some(dir));
            }
        }
        Ok(None)
    }
}

/// `.../Name.app/Contents/MacOS` -> `...`
fn bundle_parent(exe_dir: &Path) -> Option<PathBuf> {
    let contents = exe_dir.parent()?;
    let bundle = contents.parent()?;

    let is_macos = exe_dir.file_name()? == "MacOS";
    let is_contents = contents.file_name()? == "Contents";
    let is_bundle = bundle.extension()? == "app";

    if is_macos && is_contents && is_bundle {
        bundle.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

/// Custom root recorded in the config file.
pub struct ConfiguredLocation {
    store: ConfigStore,
}

impl ConfiguredLocation {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }
}

impl RootStrategy for ConfiguredLocation {
    fn source(&self) -> RootSource {
        RootSource::Configured
    }

    fn resolve(&self) -> Result<Option<PathBuf>> {
        // Any problem with the config file only disqualifies this strategy.
        let location = self.store.custom_data_location().map_err(|e| {
            Error::LocationUnavailable(format!(
                "unreadable config {}: {}",
                self.store.path().display(),
                e
            ))
        })?;

        match location {
            Some(dir) => {
                ensure_writable_dir(&dir)?;
                Ok(Some(dir))
            }
            None => Ok(None),
        }
    }
}

/// Platform application-data directory, created on demand.
pub struct PlatformDefault {
    dir: PathBuf,
}

impl PlatformDefault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default directory for `app_name` under the platform data directory.
    pub fn for_app(app_name: &str) -> Result<Self> {
        Ok(Self::new(default_data_dir(app_name)?))
    }
}

impl RootStrategy for PlatformDefault {
    fn source(&self) -> RootSource {
        RootSource::Default
    }

    fn resolve(&self) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::LocationUnavailable(format!("{}: {}", self.dir.display(), e))
        })?;
        Ok(Some(self.dir.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        exe: PathBuf,
        default_dir: PathBuf,
        custom_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let app_dir = temp.path().join("app");
        let default_dir = temp.path().join("appdata");
        let custom_dir = temp.path().join("usb");
        fs::create_dir_all(&app_dir).unwrap();
        fs::create_dir_all(&custom_dir).unwrap();

        Fixture {
            exe: app_dir.join("keepvault"),
            default_dir,
            custom_dir,
            _temp: temp,
        }
    }

    #[test]
    fn test_default_when_nothing_else_applies() {
        let f = fixture();
        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();

        assert_eq!(resolved.source, RootSource::Default);
        assert_eq!(resolved.path, f.default_dir);
        assert!(f.default_dir.is_dir());
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_configured_location_beats_default() {
        let f = fixture();
        ConfigStore::in_dir(&f.default_dir)
            .set_custom_data_location(Some(f.custom_dir.clone()))
            .unwrap();

        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();
        assert_eq!(resolved.source, RootSource::Configured);
        assert_eq!(resolved.path, f.custom_dir);
    }

    #[test]
    fn test_portable_marker_beats_everything() {
        let f = fixture();
        ConfigStore::in_dir(&f.default_dir)
            .set_custom_data_location(Some(f.custom_dir.clone()))
            .unwrap();
        let exe_dir = f.exe.parent().unwrap().to_path_buf();
        fs::write(exe_dir.join(PORTABLE_MARKER), b"").unwrap();

        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();
        assert_eq!(resolved.source, RootSource::Portable);
        assert_eq!(resolved.path, exe_dir);
    }

    #[test]
    fn test_portable_marker_beside_app_bundle() {
        let temp = TempDir::new().unwrap();
        let macos_dir = temp.path().join("KeepVault.app").join("Contents").join("MacOS");
        fs::create_dir_all(&macos_dir).unwrap();
        fs::write(temp.path().join(PORTABLE_MARKER), b"").unwrap();

        let strategy = PortableMarker::new(macos_dir.join("keepvault"));
        assert_eq!(strategy.resolve().unwrap(), Some(temp.path().to_path_buf()));
    }

    #[test]
    fn test_missing_configured_location_falls_back_with_warning() {
        let f = fixture();
        let gone = f.custom_dir.join("unplugged");
        ConfigStore::in_dir(&f.default_dir)
            .set_custom_data_location(Some(gone))
            .unwrap();

        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();
        assert_eq!(resolved.source, RootSource::Default);
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].contains("unplugged"));
    }

    #[test]
    fn test_unreadable_config_falls_back_with_warning() {
        let f = fixture();
        let store = ConfigStore::in_dir(&f.default_dir);
        // A directory in place of the file makes reading it an I/O error.
        fs::create_dir_all(store.path()).unwrap();

        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();
        assert_eq!(resolved.source, RootSource::Default);
        assert_eq!(resolved.path, f.default_dir);
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].contains("unreadable config"));
    }

    #[test]
    fn test_malformed_config_falls_back_with_warning() {
        let f = fixture();
        let store = ConfigStore::in_dir(&f.default_dir);
        fs::create_dir_all(&f.default_dir).unwrap();
        fs::write(store.path(), b"{not json").unwrap();

        let resolved = RootResolver::standard(&f.exe, &f.default_dir).resolve().unwrap();
        assert_eq!(resolved.source, RootSource::Default);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn test_custom_strategy_order() {
        struct Fixed(PathBuf);
        impl RootStrategy for Fixed {
            fn source(&self) -> RootSource {
                RootSource::Configured
            }
            fn resolve(&self) -> Result<Option<PathBuf>> {
                Ok(Some(self.0.clone()))
            }
        }

        let resolver = RootResolver::new()
            .with_strategy(Fixed(PathBuf::from("/first")))
            .with_strategy(Fixed(PathBuf::from("/second")));
        assert_eq!(resolver.resolve().unwrap().path, PathBuf::from("/first"));
    }

    #[test]
    fn test_empty_resolver_is_unavailable() {
        assert!(matches!(
            RootResolver::new().resolve(),
            Err(Error::LocationUnavailable(_))
        ));
    }

    #[test]
    fn test_ensure_writable_dir_rejects_files() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, b"").unwrap();

        assert!(matches!(
            ensure_writable_dir(&file),
            Err(Error::LocationUnavailable(_))
        ));
        assert!(ensure_writable_dir(temp.path()).is_ok());
    }
}
