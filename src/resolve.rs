//! Override resolution: merging the actions file, the remote configuration
//! and a fresh scan into one authoritative override per installed dependency.
//!
//! Everything in this module is a pure, total function over well-formed
//! inputs. Malformed identities are a precondition violation owned by the
//! producers of [`Dependency`]/[`PackageVersion`], never handled here.

use crate::model::{
    Dependency, DependencyDescriptor, DependencyMap, FixMap, Override, PackageVersion,
};
use std::collections::{HashMap, HashSet};

/// Produces the authoritative override set to enforce and to persist.
///
/// Inputs:
/// - `local_ids`: every dependency id actually present on disk
/// - `remote_packages`: fresh scan results from the remote service
/// - `existing_overrides`: previously recorded overrides, keyed by origin id
///
/// Per distinct origin id:
/// 1. A recorded override survives only while its origin id **or** its
///    replacement id is still installed; anything else is pruned and never
///    re-emitted.
/// 2. An installed origin keeps its recorded override as baseline when one
///    exists; otherwise a baseline is synthesized from the matching remote
///    entry (first sighting of a vulnerability).
/// 3. When only the replacement is installed (fix already applied), the
///    recorded origin and replacement carry over as the baseline.
/// 4. Either way, if the remote results contain an entry for the baseline's
///    **replacement** id with its own recommendation, the replacement is
///    bumped to it. This is how `sp1 -> sp2` follow-up patches propagate
///    without re-deriving the original vulnerable version.
///
/// The result is unordered; callers sort by id before persisting or applying
/// when they need determinism. Exactly one override is emitted per surviving
/// origin id.
pub fn resolve_overrides(
    local_ids: &HashSet<String>,
    remote_packages: &[PackageVersion],
    existing_overrides: &HashMap<String, Override>,
) -> HashMap<String, Override> {
    let remote_by_id: HashMap<String, &PackageVersion> =
        remote_packages.iter().map(|pv| (pv.id(), pv)).collect();

    let mut resolved: HashMap<String, Override> = HashMap::new();

    for (origin_id, existing) in existing_overrides {
        let origin_installed = local_ids.contains(origin_id);
        let fix_installed = local_ids.contains(&existing.to_id());
        if !origin_installed && !fix_installed {
            // The dependency left the project entirely.
            continue;
        }
        let mut survivor = existing.clone();
        apply_newer_recommendation(&mut survivor, &remote_by_id);
        resolved.insert(origin_id.clone(), survivor);
    }

    // Previously unseen vulnerabilities: remote entries with no recorded
    // override whose origin version is installed.
    for pv in remote_packages {
        let origin_id = pv.id();
        if resolved.contains_key(&origin_id) || existing_overrides.contains_key(&origin_id) {
            continue;
        }
        if !local_ids.contains(&origin_id) {
            continue;
        }
        let Some(recommended) = pv.recommended_version.as_deref() else {
            // No fix currently available.
            continue;
        };
        let mut fresh = Override {
            package_manager: pv.package_manager.clone(),
            library: pv.library.clone(),
            normalized_name: pv.normalized_name.clone(),
            from_version: pv.version.clone(),
            to_version: recommended.to_string(),
        };
        apply_newer_recommendation(&mut fresh, &remote_by_id);
        resolved.insert(origin_id, fresh);
    }

    resolved
}

/// Bumps the override's replacement when the scan reports that the currently
/// chosen replacement is itself vulnerable and has a newer patch.
fn apply_newer_recommendation(
    target: &mut Override,
    remote_by_id: &HashMap<String, &PackageVersion>,
) {
    if let Some(pv) = remote_by_id.get(&target.to_id()) {
        if let Some(newer) = pv.recommended_version.as_deref() {
            target.to_version = newer.to_string();
        }
    }
}

/// Combines the locally pinned actions-file set with the remotely approved
/// configuration. Both are keyed by origin id; on a conflict the locally
/// pinned rule wins.
pub fn merge_override_sources(
    local_actions: &HashMap<String, Override>,
    remote_config: &HashMap<String, Override>,
) -> HashMap<String, Override> {
    let mut merged = remote_config.clone();
    for (origin_id, rule) in local_actions {
        merged.insert(origin_id.clone(), rule.clone());
    }
    merged
}

/// Joins resolved overrides back to physical locations and remote scan
/// records, producing the unit-of-work map the coordinator consumes.
///
/// Overrides whose origin id has no installed locations (the fix is already
/// applied everywhere) produce no fix work. When the remote page did not
/// carry a record for the origin or the replacement, a minimal
/// [`PackageVersion`] is synthesized from the override fields.
pub fn build_fix_map(
    resolved: &HashMap<String, Override>,
    deps: &DependencyMap,
    remote_packages: &[PackageVersion],
) -> FixMap {
    let remote_by_id: HashMap<String, &PackageVersion> =
        remote_packages.iter().map(|pv| (pv.id(), pv)).collect();

    let mut fix_map = FixMap::new();
    for (origin_id, rule) in resolved {
        let locations: Vec<Dependency> = match deps.get(origin_id) {
            Some(instances) if !instances.is_empty() => instances.clone(),
            _ => continue,
        };
        let vulnerable = remote_by_id
            .get(origin_id)
            .map(|pv| (*pv).clone())
            .unwrap_or_else(|| synthesize_version(rule, &rule.from_version));
        let replacement = remote_by_id
            .get(&rule.to_id())
            .map(|pv| (*pv).clone())
            .unwrap_or_else(|| synthesize_version(rule, &rule.to_version));

        fix_map.insert(
            origin_id.clone(),
            DependencyDescriptor {
                vulnerable,
                replacement,
                locations,
                fixed_paths: Vec::new(),
            },
        );
    }
    fix_map
}

fn synthesize_version(rule: &Override, version: &str) -> PackageVersion {
    PackageVersion {
        package_manager: rule.package_manager.clone(),
        library: rule.library.clone(),
        normalized_name: rule.normalized_name.clone(),
        version: version.to_string(),
        open_vulnerabilities: Vec::new(),
        sealed_vulnerabilities: Vec::new(),
        recommended_version: None,
    }
}
