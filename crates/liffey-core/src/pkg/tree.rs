//! Resolved dependency tree rendering.

use super::resolve::ResolvedPackage;

/// Render a resolved top-level list as a box-drawing tree.
#[must_use]
pub fn render_dep_tree(deps: &[ResolvedPackage]) -> String {
    let refs: Vec<&ResolvedPackage> = deps.iter().collect();
    let mut out = String::new();
    render_level(&refs, "", &mut out);
    out
}

fn render_level(deps: &[&ResolvedPackage], prefix: &str, out: &mut String) {
    for (i, dep) in deps.iter().enumerate() {
        let last = i == deps.len() - 1;
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&dep.name);
        out.push('@');
        out.push_str(&dep.version);
        out.push('\n');

        let children: Vec<&ResolvedPackage> = dep.resolved_deps.values().collect();
        if !children.is_empty() {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            render_level(&children, &child_prefix, out);
        }
    }
}
