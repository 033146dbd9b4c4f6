//! Route-path normalisation and cross-package conflict detection.
//!
//! A route is joined from its package's `base_path` and its own `path`,
//! then reduced to a skeleton where every `:param` segment becomes `*` so
//! `/users/:id` and `/users/:name` are recognised as the same route for
//! uniqueness purposes, matching ordinary path-router semantics.

use std::collections::HashMap;

use hangar_core::{FunctionPackage, HangarError, RouteMethod};

/// One fully-resolved route: its absolute path, the package that owns it,
/// and the relative handler file to invoke.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub method: RouteMethod,
    pub full_path: String,
    pub package: String,
    pub handler_file: String,
}

/// Joins a package's base path with a route's own path, collapsing the
/// double slash that would otherwise appear when both are non-trivial.
pub fn join_path(base: &str, route_path: &str) -> String {
    let base = base.trim_end_matches('/');
    let route_path = route_path.trim_start_matches('/');
    if base.is_empty() {
        format!("/{route_path}")
    } else {
        format!("{base}/{route_path}")
    }
}

/// Replaces every `:param` segment with `*` so two routes that would
/// collide at dispatch time compare equal.
pub fn skeleton(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with(':') {
                "*"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves every route of every package and reports every
/// `(method, path-skeleton)` collision found, not just the first — a
/// redeploy that fixes one conflict but introduces another should not have
/// to be discovered one failure at a time.
pub fn resolve_and_check(packages: &[FunctionPackage]) -> Result<Vec<ResolvedRoute>, Vec<HangarError>> {
    let mut resolved = Vec::new();
    let mut seen: HashMap<(RouteMethod, String), String> = HashMap::new();
    let mut conflicts = Vec::new();

    for package in packages {
        for route in &package.routes {
            let full_path = join_path(&package.base_path, &route.path);
            let key_skeleton = skeleton(&full_path);
            let handler_file = route
                .handler_file
                .clone()
                .unwrap_or_else(|| package.default_handler_file.clone());

            for method in &route.methods {
                let key = (*method, key_skeleton.clone());
                if let Some(existing_owner) = seen.get(&key) {
                    if existing_owner != &package.name {
                        conflicts.push(HangarError::RouteConflict {
                            method: method.as_str().to_string(),
                            path_skeleton: key_skeleton.clone(),
                            first: existing_owner.clone(),
                            second: package.name.clone(),
                        });
                        continue;
                    }
                }
                seen.insert(key, package.name.clone());
                resolved.push(ResolvedRoute {
                    method: *method,
                    full_path: full_path.clone(),
                    package: package.name.clone(),
                    handler_file: handler_file.clone(),
                });
            }
        }
    }

    if conflicts.is_empty() {
        Ok(resolved)
    } else {
        Err(conflicts)
    }
}
