//! Hierarchical role inheritance with pattern roles.
//!
//! The role graph is a directed graph of named nodes. `has_link` walks
//! it breadth-first, bounded by the configured maximum hierarchy level
//! and a per-query visited set, so cyclic graphs terminate.
//!
//! When a [`PatternMatcher`] is installed, role names it recognises as
//! patterns become *pattern roles*: a role whose name satisfies a
//! pattern receives a derived edge to it, so the role inherits whatever
//! the pattern inherits. Derived edges are regenerated whenever the
//! matcher changes and are invisible to [`RoleManager::range`].
//!
//! Queries never leave debris behind: roles materialised purely to
//! answer `has_link` / `get_roles` / `get_users` are deleted again
//! before the call returns.

mod role;

use crate::functions::key_match;
use crate::MATCH_CACHE_CAPACITY;
use dashmap::DashMap;
use lru::LruCache;
use role::Role;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Default bound for `has_link` reachability searches
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Decides whether a role name is a pattern and matches names against it
pub trait PatternMatcher: Send + Sync {
    /// True if `s` should be treated as a pattern rather than a literal
    fn is_pattern(&self, s: &str) -> bool;

    /// True if `s` satisfies `pattern`
    fn matches(&self, s: &str, pattern: &str) -> bool;
}

/// Pattern matching with the `keyMatch` star rules: any name containing
/// `*` is a pattern, and `book_group_*` matches `book_group_1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMatchPattern;

impl PatternMatcher for KeyMatchPattern {
    fn is_pattern(&self, s: &str) -> bool {
        s.contains('*')
    }

    fn matches(&self, s: &str, pattern: &str) -> bool {
        key_match(s, pattern)
    }
}

/// Role-link store behind the `g`-function family
pub trait RoleManager: Send + Sync {
    /// Install the inheritance link `a` → `b`; returns false if it
    /// already existed. `domain` is carried for callers that need it
    /// but is informational in the default implementation.
    fn add_link(&self, a: &str, b: &str, domain: Option<&str>) -> bool;

    /// Remove the inheritance link `a` → `b`; returns false if absent
    fn delete_link(&self, a: &str, b: &str, domain: Option<&str>) -> bool;

    /// True if `a` reaches `b` through the graph, or `a == b`
    fn has_link(&self, a: &str, b: &str, domain: Option<&str>) -> bool;

    /// Names a role directly inherits (explicit and derived)
    fn get_roles(&self, name: &str, domain: Option<&str>) -> Vec<String>;

    /// Names of roles holding an edge to `name`
    fn get_users(&self, name: &str, domain: Option<&str>) -> Vec<String>;

    /// Domains attached to a user; empty in the default implementation
    fn get_domains(&self, name: &str) -> Vec<String>;

    /// Install a pattern matcher and rebuild the graph under it
    fn set_matcher(&self, matcher: Arc<dyn PatternMatcher>);

    /// Drop all roles, edges and cached match results
    fn clear(&self);

    /// Visit every explicit link; stop when the visitor returns false
    fn range(&self, visitor: &mut dyn FnMut(&str, &str) -> bool);
}

/// Default in-memory [`RoleManager`]
pub struct DefaultRoleManager {
    all_roles: DashMap<String, Arc<Role>>,
    pattern_roles: DashMap<String, ()>,
    max_hierarchy_level: usize,
    matcher: RwLock<Option<Arc<dyn PatternMatcher>>>,
    match_cache: Mutex<LruCache<(String, String), bool>>,
}

impl std::fmt::Debug for DefaultRoleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRoleManager")
            .field("roles", &self.all_roles.len())
            .field("patterns", &self.pattern_roles.len())
            .field("max_hierarchy_level", &self.max_hierarchy_level)
            .finish()
    }
}

impl Default for DefaultRoleManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HIERARCHY_LEVEL)
    }
}

/// Removes roles that were materialised only to answer the current
/// query, so read paths leave the graph unchanged.
struct EphemeralGuard<'a> {
    manager: &'a DefaultRoleManager,
    names: Vec<String>,
}

impl<'a> EphemeralGuard<'a> {
    fn new(manager: &'a DefaultRoleManager) -> Self {
        Self {
            manager,
            names: Vec::new(),
        }
    }

    fn track(&mut self, created: bool, name: &str) {
        if created {
            self.names.push(name.to_string());
        }
    }
}

impl Drop for EphemeralGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            self.manager.remove_role(name);
        }
    }
}

impl DefaultRoleManager {
    /// Create a manager whose reachability searches visit at most
    /// `max_hierarchy_level` frontier expansions.
    #[must_use]
    pub fn new(max_hierarchy_level: usize) -> Self {
        Self {
            all_roles: DashMap::new(),
            pattern_roles: DashMap::new(),
            max_hierarchy_level,
            matcher: RwLock::new(None),
            match_cache: Mutex::new(LruCache::new(cache_capacity())),
        }
    }

    fn current_matcher(&self) -> Option<Arc<dyn PatternMatcher>> {
        self.matcher.read().ok().and_then(|m| m.clone())
    }

    /// Memoised pattern match
    fn cached_match(&self, matcher: &dyn PatternMatcher, s: &str, pattern: &str) -> bool {
        let key = (s.to_string(), pattern.to_string());
        if let Ok(mut cache) = self.match_cache.lock() {
            if let Some(&hit) = cache.get(&key) {
                return hit;
            }
        }
        let matched = matcher.matches(s, pattern);
        if let Ok(mut cache) = self.match_cache.lock() {
            cache.put(key, matched);
        }
        matched
    }

    /// Load or create a role; the flag reports creation. Creation under
    /// an installed matcher derives pattern edges in both directions.
    fn get_role(&self, name: &str) -> (Arc<Role>, bool) {
        if let Some(existing) = self.all_roles.get(name) {
            return (Arc::clone(&existing), false);
        }

        let role = Arc::new(Role::new(name));
        self.all_roles.insert(name.to_string(), Arc::clone(&role));

        if let Some(matcher) = self.current_matcher() {
            if matcher.is_pattern(name) {
                self.pattern_roles.insert(name.to_string(), ());
                // Every existing role satisfying the new pattern starts
                // inheriting through it.
                let names: Vec<String> = self
                    .all_roles
                    .iter()
                    .map(|entry| entry.key().clone())
                    .collect();
                for other in names {
                    if other != name && self.cached_match(matcher.as_ref(), &other, name) {
                        if let Some(other_role) = self.all_roles.get(&other) {
                            other_role.derived.insert(name.to_string(), ());
                            role.users.insert(other.clone(), ());
                        }
                    }
                }
            } else {
                let patterns: Vec<String> = self
                    .pattern_roles
                    .iter()
                    .map(|entry| entry.key().clone())
                    .collect();
                for pattern in patterns {
                    if pattern != name && self.cached_match(matcher.as_ref(), name, &pattern) {
                        role.derived.insert(pattern.clone(), ());
                        if let Some(pattern_role) = self.all_roles.get(&pattern) {
                            pattern_role.users.insert(name.to_string(), ());
                        }
                    }
                }
            }
        }

        (role, true)
    }

    /// Delete a role and detach every edge referencing it
    fn remove_role(&self, name: &str) {
        if let Some((_, role)) = self.all_roles.remove(name) {
            let users: Vec<String> = role.users.iter().map(|e| e.key().clone()).collect();
            for user in users {
                if let Some(user_role) = self.all_roles.get(&user) {
                    user_role.explicit.remove(name);
                    user_role.derived.remove(name);
                }
            }
            for target in role.inherits() {
                if let Some(target_role) = self.all_roles.get(&target) {
                    target_role.users.remove(name);
                }
            }
        }
        self.pattern_roles.remove(name);
    }

    /// Snapshot explicit links, wipe the graph and re-add them, letting
    /// role creation re-derive pattern edges under the current matcher.
    fn rebuild(&self) {
        let mut links: Vec<(String, String)> = Vec::new();
        self.range_links(&mut |a, b| {
            links.push((a.to_string(), b.to_string()));
            true
        });
        debug!(links = links.len(), "rebuilding role graph");
        self.reset();
        for (a, b) in links {
            self.add_link(&a, &b, None);
        }
    }

    fn reset(&self) {
        self.all_roles.clear();
        self.pattern_roles.clear();
        if let Ok(mut cache) = self.match_cache.lock() {
            cache.clear();
        }
    }

    fn range_links(&self, visitor: &mut dyn FnMut(&str, &str) -> bool) {
        let names: Vec<String> = self.all_roles.iter().map(|e| e.key().clone()).collect();
        'outer: for name in names {
            let Some(role) = self.all_roles.get(&name) else {
                continue;
            };
            let targets: Vec<String> = role.explicit.iter().map(|e| e.key().clone()).collect();
            drop(role);
            for target in targets {
                if !visitor(&name, &target) {
                    break 'outer;
                }
            }
        }
    }
}

impl RoleManager for DefaultRoleManager {
    fn add_link(&self, a: &str, b: &str, _domain: Option<&str>) -> bool {
        let (user, _) = self.get_role(a);
        let (role, _) = self.get_role(b);
        let added = user.explicit.insert(b.to_string(), ()).is_none();
        role.users.insert(a.to_string(), ());
        added
    }

    fn delete_link(&self, a: &str, b: &str, _domain: Option<&str>) -> bool {
        let (user, _) = self.get_role(a);
        let (role, _) = self.get_role(b);
        let removed = user.explicit.remove(b).is_some();
        if !user.derived.contains_key(b) {
            role.users.remove(a);
        }
        removed
    }

    fn has_link(&self, a: &str, b: &str, _domain: Option<&str>) -> bool {
        if a == b {
            return true;
        }
        let matcher = self.current_matcher();
        if let Some(m) = &matcher {
            if self.cached_match(m.as_ref(), a, b) {
                return true;
            }
        }

        let mut guard = EphemeralGuard::new(self);
        let (user, created) = self.get_role(a);
        guard.track(created, a);
        let (_, created) = self.get_role(b);
        guard.track(created, b);

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(a.to_string());
        let mut frontier = vec![user];

        // Each frontier inspection consumes one unit of the level
        // budget, the starting role included, so a target is reachable
        // only within `max_hierarchy_level - 1` links.
        for _ in 0..self.max_hierarchy_level {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for role in &frontier {
                if role.name() == b {
                    return true;
                }
                if let Some(m) = &matcher {
                    if self.cached_match(m.as_ref(), role.name(), b) {
                        return true;
                    }
                }
                for target in role.inherits() {
                    if visited.insert(target.clone()) {
                        if let Some(target_role) = self.all_roles.get(&target) {
                            next.push(Arc::clone(&target_role));
                        }
                    }
                }
            }
            frontier = next;
        }

        false
    }

    fn get_roles(&self, name: &str, _domain: Option<&str>) -> Vec<String> {
        let mut guard = EphemeralGuard::new(self);
        let (role, created) = self.get_role(name);
        guard.track(created, name);
        role.inherits()
    }

    fn get_users(&self, name: &str, _domain: Option<&str>) -> Vec<String> {
        let mut guard = EphemeralGuard::new(self);
        let (role, created) = self.get_role(name);
        guard.track(created, name);
        role.users.iter().map(|e| e.key().clone()).collect()
    }

    fn get_domains(&self, _name: &str) -> Vec<String> {
        Vec::new()
    }

    fn set_matcher(&self, matcher: Arc<dyn PatternMatcher>) {
        if let Ok(mut slot) = self.matcher.write() {
            *slot = Some(matcher);
        }
        self.rebuild();
    }

    fn clear(&self) {
        self.reset();
    }

    fn range(&self, visitor: &mut dyn FnMut(&str, &str) -> bool) {
        self.range_links(visitor);
    }
}

fn cache_capacity() -> NonZeroUsize {
    NonZeroUsize::new(MATCH_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
}
