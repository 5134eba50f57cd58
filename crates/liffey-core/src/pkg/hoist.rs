//! Dependency hoisting.
//!
//! Multiply-referenced `name@version` pairs are lifted to the top level
//! when the root does not already hold a different version of the same
//! name. Hoisted pairs are pruned from every subtree that referenced
//! exactly that version; conflicting versions stay nested. The tree is
//! mutated in place.

use super::resolve::ResolvedPackage;
use std::collections::BTreeMap;

/// Hoist shared dependencies in a resolved top-level list.
#[must_use]
pub fn hoist_dependencies(top_level: Vec<ResolvedPackage>) -> Vec<ResolvedPackage> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut catalog: BTreeMap<String, ResolvedPackage> = BTreeMap::new();
    for pkg in &top_level {
        collect(pkg, &mut counts, &mut catalog);
    }

    let mut hoisted = top_level;
    let mut root_versions: BTreeMap<String, String> = hoisted
        .iter()
        .map(|p| (p.name.clone(), p.version.clone()))
        .collect();

    for (key, count) in &counts {
        if *count <= 1 {
            continue;
        }
        let candidate = &catalog[key];
        let (name, version) = (candidate.name.clone(), candidate.version.clone());

        match root_versions.get(&name) {
            None => {
                root_versions.insert(name.clone(), version.clone());
                let promoted = candidate.clone();
                hoisted.push(promoted);
                for pkg in &mut hoisted {
                    prune(pkg, &name, &version);
                }
            }
            Some(existing) if *existing == version => {
                // Already at the root; just collapse the duplicates.
                for pkg in &mut hoisted {
                    prune(pkg, &name, &version);
                }
            }
            // A different version owns the root slot; duplicates stay
            // nested.
            Some(_) => {}
        }
    }

    hoisted
}

fn collect(
    pkg: &ResolvedPackage,
    counts: &mut BTreeMap<String, usize>,
    catalog: &mut BTreeMap<String, ResolvedPackage>,
) {
    let key = format!("{}@{}", pkg.name, pkg.version);
    *counts.entry(key.clone()).or_insert(0) += 1;
    catalog.entry(key).or_insert_with(|| pkg.clone());

    for child in pkg.resolved_deps.values() {
        collect(child, counts, catalog);
    }
}

/// Remove every nested occurrence of exactly `name@version`.
fn prune(pkg: &mut ResolvedPackage, name: &str, version: &str) {
    pkg.resolved_deps
        .retain(|_, dep| !(dep.name == name && dep.version == version));
    for dep in pkg.resolved_deps.values_mut() {
        prune(dep, name, version);
    }
}
