//! Role manager integration tests through the public API

use core_enforce::{DefaultRoleManager, KeyMatchPattern, PatternMatcher, RoleManager};
use std::sync::Arc;

#[test]
fn test_has_link_reflexive_for_any_name() {
    let rm = DefaultRoleManager::default();
    assert!(rm.has_link("anything", "anything", None));
    assert!(rm.has_link("", "", None));
}

#[test]
fn test_chained_inheritance() {
    let rm = DefaultRoleManager::default();
    rm.add_link("alice", "editor", None);
    rm.add_link("editor", "viewer", None);

    assert!(rm.has_link("alice", "viewer", None));
    assert!(!rm.has_link("viewer", "alice", None));
    assert_eq!(rm.get_roles("alice", None), vec!["editor".to_string()]);
    assert_eq!(rm.get_users("viewer", None), vec!["editor".to_string()]);
}

#[test]
fn test_queries_are_side_effect_free() {
    let rm = DefaultRoleManager::default();
    rm.add_link("alice", "admin", None);

    // Queries about unknown names must not grow the graph.
    assert!(!rm.has_link("nobody", "admin", None));
    assert!(rm.get_roles("nobody", None).is_empty());
    assert!(rm.get_users("nobody", None).is_empty());

    let mut links = Vec::new();
    rm.range(&mut |a, b| {
        links.push((a.to_string(), b.to_string()));
        true
    });
    assert_eq!(links, vec![("alice".to_string(), "admin".to_string())]);
}

#[test]
fn test_pattern_roles_with_key_match() {
    let rm = DefaultRoleManager::default();
    rm.set_matcher(Arc::new(KeyMatchPattern));

    rm.add_link("book_group_1", "reader", None);
    rm.add_link("book_group_2", "reader", None);
    assert!(rm.has_link("book_group_1", "reader", None));

    // No pattern role exists yet, so an unseen concrete name has no
    // route to reader.
    assert!(!rm.has_link("book_group_3", "reader", None));

    // Once the pattern itself is linked, every matching name inherits.
    rm.add_link("book_group_*", "reader", None);
    assert!(rm.has_link("book_group_3", "reader", None));
}

#[test]
fn test_target_side_pattern_match() {
    let rm = DefaultRoleManager::default();
    rm.set_matcher(Arc::new(KeyMatchPattern));
    // The target is itself a pattern the name satisfies.
    assert!(rm.has_link("book_group_1", "book_group_*", None));
}

#[test]
fn test_custom_pattern_matcher() {
    struct SuffixMatcher;

    impl PatternMatcher for SuffixMatcher {
        fn is_pattern(&self, s: &str) -> bool {
            s.starts_with('~')
        }

        fn matches(&self, s: &str, pattern: &str) -> bool {
            match pattern.strip_prefix('~') {
                Some(suffix) => s.ends_with(suffix),
                None => s == pattern,
            }
        }
    }

    let rm = DefaultRoleManager::default();
    rm.set_matcher(Arc::new(SuffixMatcher));
    rm.add_link("~_admins", "root", None);

    assert!(rm.has_link("db_admins", "root", None));
    assert!(rm.has_link("net_admins", "root", None));
    assert!(!rm.has_link("viewers", "root", None));
}

#[test]
fn test_clear_and_rebuild() {
    let rm = DefaultRoleManager::default();
    rm.add_link("a", "b", None);
    rm.clear();
    assert!(!rm.has_link("a", "b", None));

    rm.add_link("a", "b", None);
    assert!(rm.has_link("a", "b", None));
}

#[test]
fn test_domain_argument_is_informational() {
    let rm = DefaultRoleManager::default();
    rm.add_link("alice", "admin", Some("domain1"));
    // The default manager does not segregate by domain.
    assert!(rm.has_link("alice", "admin", Some("domain2")));
    assert!(rm.has_link("alice", "admin", None));
    assert!(rm.get_domains("alice").is_empty());
}

#[test]
fn test_deep_hierarchy_respects_default_bound() {
    let rm = DefaultRoleManager::default();
    for i in 0..12 {
        rm.add_link(&format!("r{i}"), &format!("r{}", i + 1), None);
    }
    // The default bound of 10 inspects frontiers r0 through r9.
    assert!(rm.has_link("r0", "r9", None));
    assert!(!rm.has_link("r0", "r10", None));
    assert!(!rm.has_link("r0", "r12", None));
}
