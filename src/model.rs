//! Core data model for the remediation engine.
//!
//! Everything here is plain data: built by discovery/scan collaborators,
//! consumed read-only by the resolver and coordinator, and serializable so
//! the actions-file writer and reporters can persist or render it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Builds the canonical identity string shared by [`Dependency`],
/// [`PackageVersion`] and [`Override`]: `manager|name@version`.
///
/// The same logical package/version installed in several locations shares one
/// id; identity is **not** unique per physical instance.
pub fn package_id(package_manager: &str, normalized_name: &str, version: &str) -> String {
    format!("{}|{}@{}", package_manager, normalized_name, version)
}

/// One physical on-disk installation of a library version.
///
/// Created during manifest/tree discovery and read-only afterward; the only
/// thing that ever changes is the artifact the `disk_path` points at, when a
/// fixer rewrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    /// Ecosystem identifier, e.g. "npm", "maven", "golang", "rpm"
    pub package_manager: String,

    /// Display name as it appears in the manifest
    pub name: String,

    /// Canonical name (lowercased/normalized per ecosystem rules)
    pub normalized_name: String,

    /// Installed version string
    pub version: String,

    /// Absolute path of the installed artifact (file or directory)
    pub disk_path: PathBuf,

    /// Id of the parent dependency; `None` means a direct dependency
    pub parent_id: Option<String>,

    /// Declared only in a dev/test scope
    pub dev: bool,

    /// Installed but not declared by any manifest
    pub extraneous: bool,

    /// The on-disk location is a symbolic link
    pub is_link: bool,

    /// Bundled inside another artifact (shaded jar and friends)
    pub is_shaded: bool,

    /// Target architecture, OS-package ecosystems only
    pub arch: Option<String>,
}

impl Dependency {
    /// `manager|normalized_name@version`, shared across physical instances.
    pub fn id(&self) -> String {
        package_id(&self.package_manager, &self.normalized_name, &self.version)
    }

    /// Whether this instance sits at the top of the dependency tree.
    pub fn is_direct(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Id → every physical instance sharing that id. Built once per scan by the
/// discovery collaborator; this crate never mutates it.
pub type DependencyMap = HashMap<String, Vec<Dependency>>;

/// The set of ids actually installed, as the resolver consumes it.
pub fn local_ids(deps: &DependencyMap) -> std::collections::HashSet<String> {
    deps.keys().cloned().collect()
}

/// A single vulnerability as reported by the remote service.
///
/// Carried through for reporting; this engine never interprets severity or
/// affected ranges; that is the remote service's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Advisory identifier, e.g. "CVE-2023-1234"
    pub id: String,

    /// Severity label as reported ("Critical", "High", ...)
    pub severity: String,

    /// Short human-readable summary
    pub summary: String,
}

/// A remote-service record of one library+version: its open and
/// already-sealed vulnerabilities, and the replacement it recommends.
///
/// `recommended_version == None` means no fix is currently available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersion {
    /// Ecosystem identifier
    pub package_manager: String,

    /// Display name of the library
    pub library: String,

    /// Canonical name, matching [`Dependency::normalized_name`]
    pub normalized_name: String,

    /// The origin version this record describes
    pub version: String,

    /// Vulnerabilities still open against this version
    pub open_vulnerabilities: Vec<Vulnerability>,

    /// Vulnerabilities already sealed by the recommended replacement
    pub sealed_vulnerabilities: Vec<Vulnerability>,

    /// Version string of the recommended replacement, if any
    pub recommended_version: Option<String>,
}

impl PackageVersion {
    /// Identity of the origin library+version.
    pub fn id(&self) -> String {
        package_id(&self.package_manager, &self.normalized_name, &self.version)
    }

    /// Identity of the proposed replacement, `None` when no fix exists.
    pub fn recommended_id(&self) -> Option<String> {
        self.recommended_version
            .as_deref()
            .map(|v| package_id(&self.package_manager, &self.normalized_name, v))
    }
}

/// A `(library, from_version) -> to_version` rule, sourced from the actions
/// file, the remote configuration, or synthesized from a scan recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// Ecosystem identifier
    pub package_manager: String,

    /// Display name of the library
    pub library: String,

    /// Canonical name
    pub normalized_name: String,

    /// Origin (vulnerable) version
    pub from_version: String,

    /// Replacement (sealed) version
    pub to_version: String,
}

impl Override {
    /// Identity of the origin version.
    pub fn from_id(&self) -> String {
        package_id(&self.package_manager, &self.normalized_name, &self.from_version)
    }

    /// Identity of the replacement version.
    pub fn to_id(&self) -> String {
        package_id(&self.package_manager, &self.normalized_name, &self.to_version)
    }
}

/// Opaque patched-package bytes handed into a fixer, produced by the
/// artifact-download collaborator. The engine never inspects the format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPayload {
    /// Raw package bytes (tarball, jar, rpm, ...)
    pub data: Vec<u8>,

    /// File name the artifact should carry on disk
    pub file_name: String,
}

/// One resolved unit of fix work: the vulnerable version, the chosen
/// replacement, every disk location currently holding the vulnerable
/// version, and (after application) the subset actually patched.
///
/// Lives for a single run; persistence of "what was patched" belongs to the
/// ecosystem's own on-disk markers, not to this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// The installed vulnerable version
    pub vulnerable: PackageVersion,

    /// The replacement to install in its place
    pub replacement: PackageVersion,

    /// Every physical instance of the vulnerable version
    pub locations: Vec<Dependency>,

    /// Paths actually patched by the coordinator (subset of `locations` when
    /// duplicates were no-ops)
    pub fixed_paths: Vec<PathBuf>,
}

impl DependencyDescriptor {
    /// Identity of the vulnerable origin, used as the `FixMap` key.
    pub fn id(&self) -> String {
        self.vulnerable.id()
    }
}

/// Origin id → resolved fix work for that id.
pub type FixMap = HashMap<String, DependencyDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dependency() -> Dependency {
        Dependency {
            package_manager: "npm".to_string(),
            name: "Lodash".to_string(),
            normalized_name: "lodash".to_string(),
            version: "1.2.3".to_string(),
            disk_path: PathBuf::from("/project/node_modules/lodash"),
            parent_id: None,
            dev: false,
            extraneous: false,
            is_link: false,
            is_shaded: false,
            arch: None,
        }
    }

    #[test]
    fn test_dependency_id_uses_normalized_name() {
        let dep = sample_dependency();
        assert_eq!(dep.id(), "npm|lodash@1.2.3");
        assert!(dep.is_direct());
    }

    #[test]
    fn test_override_ids() {
        let ov = Override {
            package_manager: "npm".to_string(),
            library: "lodash".to_string(),
            normalized_name: "lodash".to_string(),
            from_version: "1.2.3".to_string(),
            to_version: "1.2.3-sp1".to_string(),
        };
        assert_eq!(ov.from_id(), "npm|lodash@1.2.3");
        assert_eq!(ov.to_id(), "npm|lodash@1.2.3-sp1");
    }

    #[test]
    fn test_recommended_id_absent_when_no_fix() {
        let pv = PackageVersion {
            package_manager: "maven".to_string(),
            library: "log4j-core".to_string(),
            normalized_name: "org.apache.logging.log4j:log4j-core".to_string(),
            version: "2.14.1".to_string(),
            open_vulnerabilities: vec![],
            sealed_vulnerabilities: vec![],
            recommended_version: None,
        };
        assert!(pv.recommended_id().is_none());
        assert_eq!(pv.id(), "maven|org.apache.logging.log4j:log4j-core@2.14.1");
    }

    #[test]
    fn test_local_ids_collects_map_keys() {
        let mut map = DependencyMap::new();
        let dep = sample_dependency();
        map.insert(dep.id(), vec![dep]);
        let ids = local_ids(&map);
        assert!(ids.contains("npm|lodash@1.2.3"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_override_serialization_round_trip() {
        let ov = Override {
            package_manager: "npm".to_string(),
            library: "lodash".to_string(),
            normalized_name: "lodash".to_string(),
            from_version: "1.2.3".to_string(),
            to_version: "1.2.3-sp1".to_string(),
        };
        let json = serde_json::to_string(&ov).unwrap();
        let back: Override = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ov);
    }
}
