//! Package and dependency metadata
//!
//! Describes installable packages and the constraints they place on each
//! other, including the version-range evaluator used by the resolver.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Channel tags that mark a version as not stable
const PRERELEASE_TAGS: [&str; 6] = ["alpha", "beta", "dev", "rc", "preview", "nightly"];

/// Parse a version string leniently
///
/// Accepts a leading `v` and zero-fills missing minor/patch components, so
/// `"1.2"` parses as `1.2.0`.
///
/// ```
/// use sdk::manifest::parse_version;
/// assert_eq!(parse_version("v1.2").unwrap().to_string(), "1.2.0");
/// assert!(parse_version("not-a-version").is_none());
/// ```
pub fn parse_version(input: &str) -> Option<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    // Split off prerelease/build suffix before padding the numeric core
    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);
    Version::parse(&padded).ok()
}

/// Whether a version string denotes a prerelease / non-stable channel build
pub fn is_prerelease(version: &str) -> bool {
    if let Some(parsed) = parse_version(version) {
        if !parsed.pre.is_empty() {
            return true;
        }
    }
    let lower = version.to_ascii_lowercase();
    PRERELEASE_TAGS.iter().any(|tag| lower.contains(tag))
}

/// Compare two version strings, falling back to lexical order if unparseable
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Identifier of the platform this process runs on
pub fn current_platform() -> &'static str {
    std::env::consts::OS
}

/// Identifier of the CPU architecture this process runs on
pub fn current_architecture() -> &'static str {
    std::env::consts::ARCH
}

/// Kind of dependency relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    #[default]
    Required,
    Optional,
    Development,
    Runtime,
    Build,
    Peer,
}

impl DependencyType {
    /// Whether an unsatisfied constraint of this type fails resolution
    pub fn is_mandatory(self) -> bool {
        matches!(self, Self::Required | Self::Runtime | Self::Peer)
    }

    /// Development and build constraints only matter when building from source
    pub fn is_build_time(self) -> bool {
        matches!(self, Self::Development | Self::Build)
    }
}

/// A single relational clause of a version range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
}

fn split_clause(clause: &str) -> (Comparator, &str) {
    let clause = clause.trim();
    for (prefix, op) in [
        (">=", Comparator::Ge),
        ("<=", Comparator::Le),
        (">", Comparator::Gt),
        ("<", Comparator::Lt),
        ("=", Comparator::Eq),
    ] {
        if let Some(rest) = clause.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    (Comparator::Eq, clause)
}

/// A named requirement on another package
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConstraint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
    #[serde(rename = "type", default)]
    pub dep_type: DependencyType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
}

impl DependencyConstraint {
    /// Required constraint with no version restriction
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.version_range = Some(range.into());
        self
    }

    pub fn with_type(mut self, dep_type: DependencyType) -> Self {
        self.dep_type = dep_type;
        self
    }

    pub fn with_platforms(mut self, platforms: &[&str]) -> Self {
        self.platforms = platforms.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_architectures(mut self, architectures: &[&str]) -> Self {
        self.architectures = architectures.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Parse the shorthand `name`, `name@1.2.0` or `name>=1.0,<2.0`
    ///
    /// ```
    /// use sdk::manifest::DependencyConstraint;
    /// let c = DependencyConstraint::parse("storage>=1.0,<2.0").unwrap();
    /// assert_eq!(c.name, "storage");
    /// assert!(c.is_compatible("1.4.0"));
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some((name, version)) = text.split_once('@') {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            return Some(Self::new(name).with_version(version.trim()));
        }
        match text.find(['>', '<', '=']) {
            Some(0) => None,
            Some(idx) => {
                let (name, range) = text.split_at(idx);
                Some(Self::new(name.trim()).with_range(range.trim()))
            }
            None => Some(Self::new(text)),
        }
    }

    fn range_clauses(&self) -> Vec<(Comparator, &str)> {
        self.version_range
            .as_deref()
            .map(|range| {
                range
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(split_clause)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_range(&self) -> bool {
        self.version_range
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    fn has_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    /// Whether `target` satisfies this constraint
    ///
    /// ```
    /// use sdk::manifest::DependencyConstraint;
    /// let c = DependencyConstraint::new("b").with_range(">=1.0.0,<2.0.0");
    /// assert!(c.is_compatible("1.9.9"));
    /// assert!(!c.is_compatible("2.0.0"));
    /// ```
    pub fn is_compatible(&self, target: &str) -> bool {
        if !self.has_range() {
            return match self.version.as_deref() {
                Some(v) if !v.trim().is_empty() => match (parse_version(v), parse_version(target)) {
                    (Some(want), Some(have)) => want == have,
                    _ => v.trim() == target.trim(),
                },
                _ => true,
            };
        }

        let Some(target) = parse_version(target) else {
            return false;
        };
        self.range_clauses().into_iter().all(|(op, raw)| {
            let Some(bound) = parse_version(raw) else {
                return false;
            };
            match op {
                Comparator::Ge => target >= bound,
                Comparator::Le => target <= bound,
                Comparator::Gt => target > bound,
                Comparator::Lt => target < bound,
                Comparator::Eq => target == bound,
            }
        })
    }

    /// Tightest lower bound implied by the constraint
    pub fn min_version(&self) -> Option<Version> {
        if !self.has_range() {
            return self.version.as_deref().and_then(parse_version);
        }
        self.range_clauses()
            .into_iter()
            .filter(|(op, _)| matches!(op, Comparator::Ge | Comparator::Gt | Comparator::Eq))
            .filter_map(|(_, raw)| parse_version(raw))
            .max()
    }

    /// Tightest upper bound implied by the constraint
    pub fn max_version(&self) -> Option<Version> {
        if !self.has_range() {
            return self.version.as_deref().and_then(parse_version);
        }
        self.range_clauses()
            .into_iter()
            .filter(|(op, _)| matches!(op, Comparator::Le | Comparator::Lt | Comparator::Eq))
            .filter_map(|(_, raw)| parse_version(raw))
            .min()
    }

    /// Empty list means every platform
    pub fn is_platform_compatible(&self) -> bool {
        self.is_platform_compatible_with(current_platform())
    }

    pub fn is_platform_compatible_with(&self, platform: &str) -> bool {
        list_accepts(&self.platforms, platform)
    }

    pub fn is_architecture_compatible(&self) -> bool {
        self.is_architecture_compatible_with(current_architecture())
    }

    pub fn is_architecture_compatible_with(&self, architecture: &str) -> bool {
        list_accepts(&self.architectures, architecture)
    }

    /// Human-readable requirement, e.g. `>=1.0` or `=1.2.0` or `*`
    pub fn requirement(&self) -> String {
        if self.has_range() {
            self.version_range.clone().unwrap_or_default()
        } else if self.has_version() {
            format!("={}", self.version.as_deref().unwrap_or_default())
        } else {
            "*".to_string()
        }
    }
}

fn list_accepts(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}

/// Installation state of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PackageState {
    #[default]
    NotInstalled,
    Downloading,
    Installing,
    Installed,
    UpdateAvailable,
    Failed,
    Corrupted,
    Incompatible,
}

/// An installable unit
///
/// Equality is defined by `(id, version)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPackage {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<DependencyConstraint>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub state: PackageState,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl PluginPackage {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyConstraint) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_publish_date(mut self, date: DateTime<Utc>) -> Self {
        self.publish_date = Some(date);
        self
    }

    pub fn with_platforms(mut self, platforms: &[&str]) -> Self {
        self.platforms = platforms.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_architectures(mut self, architectures: &[&str]) -> Self {
        self.architectures = architectures.iter().map(|a| a.to_string()).collect();
        self
    }

    /// `id@version`, used in logs and conflict reports
    pub fn key(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn parsed_version(&self) -> Option<Version> {
        parse_version(&self.version)
    }

    pub fn is_prerelease(&self) -> bool {
        is_prerelease(&self.version)
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        list_accepts(&self.platforms, platform)
    }

    pub fn supports_architecture(&self, architecture: &str) -> bool {
        list_accepts(&self.architectures, architecture)
    }

    /// Installed packages must carry an install path
    pub fn is_installed(&self) -> bool {
        self.state == PackageState::Installed && self.install_path.is_some()
    }
}

impl PartialEq for PluginPackage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for PluginPackage {}

impl Hash for PluginPackage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.version.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_constraint_is_always_compatible() {
        let c = DependencyConstraint::new("core");
        assert!(c.is_compatible("0.0.1"));
        assert!(c.is_compatible("garbage"));
        assert_eq!(c.requirement(), "*");
    }

    #[test]
    fn test_exact_version_without_range() {
        let c = DependencyConstraint::new("core").with_version("1.2.0");
        assert!(c.is_compatible("1.2.0"));
        assert!(c.is_compatible("1.2"));
        assert!(!c.is_compatible("1.2.1"));
    }

    #[test]
    fn test_range_is_conjunction() {
        let c = DependencyConstraint::new("core").with_range(">=1.0.0,<2.0.0");
        assert!(c.is_compatible("1.0.0"));
        assert!(c.is_compatible("1.9.9"));
        assert!(!c.is_compatible("0.9.9"));
        assert!(!c.is_compatible("2.0.0"));
    }

    #[test]
    fn test_strict_and_equal_clauses() {
        let c = DependencyConstraint::new("core").with_range(">1.0, <=1.5");
        assert!(!c.is_compatible("1.0.0"));
        assert!(c.is_compatible("1.0.1"));
        assert!(c.is_compatible("1.5.0"));
        assert!(!c.is_compatible("1.5.1"));

        let eq = DependencyConstraint::new("core").with_range("=2.1.0");
        assert!(eq.is_compatible("2.1.0"));
        assert!(!eq.is_compatible("2.1.1"));
    }

    #[test]
    fn test_unparseable_target_is_incompatible() {
        let c = DependencyConstraint::new("core").with_range(">=1.0");
        assert!(!c.is_compatible("latest"));
    }

    #[test]
    fn test_min_max_versions() {
        let c = DependencyConstraint::new("core").with_range(">=1.0.0,>1.2.0,<3.0.0,<=2.5.0");
        assert_eq!(c.min_version().unwrap().to_string(), "1.2.0");
        assert_eq!(c.max_version().unwrap().to_string(), "2.5.0");

        let exact = DependencyConstraint::new("core").with_version("4.1");
        assert_eq!(exact.min_version().unwrap().to_string(), "4.1.0");
        assert_eq!(exact.max_version().unwrap().to_string(), "4.1.0");

        let open = DependencyConstraint::new("core").with_range(">=1.0");
        assert!(open.max_version().is_none());
    }

    #[test]
    fn test_platform_compatibility() {
        let any = DependencyConstraint::new("core");
        assert!(any.is_platform_compatible());

        let linux_only = DependencyConstraint::new("core").with_platforms(&["Linux"]);
        assert!(linux_only.is_platform_compatible_with("linux"));
        assert!(!linux_only.is_platform_compatible_with("windows"));

        let arm = DependencyConstraint::new("core").with_architectures(&["aarch64"]);
        assert!(arm.is_architecture_compatible_with("AARCH64"));
        assert!(!arm.is_architecture_compatible_with("x86_64"));
    }

    #[test]
    fn test_parse_shorthand() {
        let plain = DependencyConstraint::parse("logger").unwrap();
        assert_eq!(plain.name, "logger");
        assert!(plain.version_range.is_none());

        let pinned = DependencyConstraint::parse("logger@1.4.2").unwrap();
        assert_eq!(pinned.version.as_deref(), Some("1.4.2"));

        let ranged = DependencyConstraint::parse("logger>=1.0,<2.0").unwrap();
        assert_eq!(ranged.version_range.as_deref(), Some(">=1.0,<2.0"));

        assert!(DependencyConstraint::parse(">=1.0").is_none());
        assert!(DependencyConstraint::parse("  ").is_none());
    }

    #[test]
    fn test_prerelease_detection() {
        assert!(is_prerelease("2.0.0-beta.1"));
        assert!(is_prerelease("2.0.0-rc1"));
        assert!(is_prerelease("nightly-2024"));
        assert!(!is_prerelease("2.0.0"));
    }

    #[test]
    fn test_package_equality_by_id_and_version() {
        let a = PluginPackage::new("net", "1.0.0").with_platforms(&["linux"]);
        let b = PluginPackage::new("net", "1.0.0");
        let c = PluginPackage::new("net", "1.0.1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_dependency_type_serialization() {
        let c = DependencyConstraint::new("core")
            .with_range(">=1.0")
            .with_type(DependencyType::Optional);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "optional");
        assert_eq!(json["versionRange"], ">=1.0");
    }
}
