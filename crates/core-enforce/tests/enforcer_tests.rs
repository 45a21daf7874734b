//! End-to-end enforcement tests over hand-built models

use core_enforce::{
    model, EnforceContext, EnforceError, Enforcer, KeyMatchPattern, Model, RoleManager, Value,
};
use std::sync::Arc;

fn strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| (*t).to_string()).collect()
}

fn request(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn acl_model() -> Model {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && r.obj == p.obj && r.act == p.act",
    )
    .unwrap();
    m
}

fn rbac_model() -> Model {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act").unwrap();
    m.add_def(model::ROLE_SECTION, "g", "_, _").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act",
    )
    .unwrap();
    m
}

#[test]
fn acl_allow_and_deny() {
    let mut e = Enforcer::new(acl_model(), None);
    e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap();

    assert!(e.enforce(&request(&["alice", "data1", "read"])).unwrap());
    assert!(!e.enforce(&request(&["alice", "data1", "write"])).unwrap());
    assert!(!e.enforce(&request(&["bob", "data1", "read"])).unwrap());
}

#[test]
fn rbac_inheritance_and_revocation() {
    let mut e = Enforcer::new(rbac_model(), None);
    e.add_rule(&strings(&["p", "admin", "data", "read"])).unwrap();
    e.add_rule(&strings(&["g", "alice", "admin"])).unwrap();

    assert!(e.enforce(&request(&["alice", "data", "read"])).unwrap());
    assert!(e.enforce(&request(&["admin", "data", "read"])).unwrap());

    e.remove_rule(&strings(&["g", "alice", "admin"])).unwrap();
    assert!(!e.enforce(&request(&["alice", "data", "read"])).unwrap());
}

#[test]
fn deny_override_wins_over_allow() {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act, eft").unwrap();
    m.add_def(
        model::EFFECT_SECTION,
        "e",
        "some(where (p_eft == allow)) && !some(where (p_eft == deny))",
    )
    .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && r.obj == p.obj && r.act == p.act",
    )
    .unwrap();

    let mut e = Enforcer::new(m, None);
    e.add_rule(&strings(&["p", "alice", "data", "read", "allow"])).unwrap();
    e.add_rule(&strings(&["p", "alice", "data", "read", "deny"])).unwrap();

    assert!(!e.enforce(&request(&["alice", "data", "read"])).unwrap());
}

#[test]
fn omitted_eft_column_defaults_to_allow() {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act, eft").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && r.obj == p.obj && r.act == p.act",
    )
    .unwrap();

    let mut e = Enforcer::new(m, None);
    // Three tokens against a four-column definition: eft omitted.
    e.add_rule(&strings(&["p", "alice", "data", "read"])).unwrap();
    assert!(e.enforce(&request(&["alice", "data", "read"])).unwrap());
}

#[test]
fn filter_returns_matches_and_grows_monotonically() {
    let mut e = Enforcer::new(acl_model(), None);
    e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap();

    let req = request(&["alice", "data1", "read"]);
    assert_eq!(e.filter(&req).unwrap().len(), 1);

    // Unrelated rules never shrink the match set for the same request.
    e.add_rule(&strings(&["p", "bob", "data2", "write"])).unwrap();
    assert_eq!(e.filter(&req).unwrap().len(), 1);

    let rules = e.filter(&req).unwrap();
    assert_eq!(rules, vec![strings(&["p", "alice", "data1", "read"])]);
}

#[test]
fn filter_with_inline_matcher() {
    let mut e = Enforcer::new(acl_model(), None);
    e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap();
    e.add_rule(&strings(&["p", "alice", "data2", "write"])).unwrap();
    e.add_rule(&strings(&["p", "bob", "data1", "read"])).unwrap();

    let ctx = EnforceContext::new()
        .matcher_expr("p.sub == \"alice\"")
        .unwrap();
    let rules = e.filter_with(&ctx, &[]).unwrap();
    assert_eq!(rules.len(), 2);
}

#[test]
fn context_selects_alternate_matcher() {
    let mut m = acl_model();
    m.add_def(model::MATCHER_SECTION, "m2", "r.sub == p.sub").unwrap();

    let mut e = Enforcer::new(m, None);
    e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap();

    // The relaxed matcher ignores object and action.
    let ctx = EnforceContext::new().matcher("m2");
    assert!(e
        .enforce_with(&ctx, &request(&["alice", "x", "y"]))
        .unwrap());
    assert!(!e.enforce(&request(&["alice", "x", "y"])).unwrap());
}

#[test]
fn unknown_matcher_key_is_misconfigured() {
    let e = Enforcer::new(acl_model(), None);
    let ctx = EnforceContext::new().matcher("m9");
    let err = e
        .enforce_with(&ctx, &request(&["alice", "data1", "read"]))
        .unwrap_err();
    assert!(matches!(err, EnforceError::MatcherMisconfigured(_)));
}

#[test]
fn wrong_request_arity_is_rejected() {
    let e = Enforcer::new(acl_model(), None);
    let err = e.enforce(&request(&["alice", "data1"])).unwrap_err();
    assert!(matches!(err, EnforceError::ModelShape(_)));
}

#[test]
fn key_match2_matcher_with_captured_paths() {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && keyMatch2(r.obj, p.obj) && r.act == p.act",
    )
    .unwrap();

    let mut e = Enforcer::new(m, None);
    e.add_rule(&strings(&["p", "alice", "/data/:id", "read"])).unwrap();

    assert!(e.enforce(&request(&["alice", "/data/1", "read"])).unwrap());
    assert!(!e
        .enforce(&request(&["alice", "/data/1/meta", "read"]))
        .unwrap());
}

#[test]
fn attribute_request_values() {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, act").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && r.obj.price < 30 && r.act == p.act",
    )
    .unwrap();

    let mut e = Enforcer::new(m, None);
    e.add_rule(&strings(&["p", "alice", "buy"])).unwrap();

    let mut cheap = std::collections::BTreeMap::new();
    cheap.insert("price".to_string(), Value::from(28));
    let allowed = e
        .enforce(&[Value::from("alice"), Value::from(cheap), Value::from("buy")])
        .unwrap();
    assert!(allowed);

    let mut pricey = std::collections::BTreeMap::new();
    pricey.insert("price".to_string(), Value::from(99));
    let allowed = e
        .enforce(&[Value::from("alice"), Value::from(pricey), Value::from("buy")])
        .unwrap();
    assert!(!allowed);
}

#[test]
fn pattern_role_manager_through_enforcement() {
    let mut e = Enforcer::new(rbac_model(), None);
    e.set_role_manager(
        "g",
        Arc::new({
            let rm = core_enforce::DefaultRoleManager::default();
            rm.set_matcher(Arc::new(KeyMatchPattern));
            rm
        }),
    )
    .unwrap();

    e.add_rule(&strings(&["p", "reader", "book", "read"])).unwrap();
    e.add_rule(&strings(&["g", "book_group_*", "reader"])).unwrap();

    // Any subject matching the pattern inherits reader.
    assert!(e.enforce(&request(&["book_group_1", "book", "read"])).unwrap());
    assert!(e.enforce(&request(&["book_group_42", "book", "read"])).unwrap());
    assert!(!e.enforce(&request(&["other_group", "book", "read"])).unwrap());
}

#[test]
fn batch_add_and_remove() {
    let mut e = Enforcer::new(acl_model(), None);
    e.add_rules(vec![
        strings(&["p", "alice", "data1", "read"]),
        strings(&["p", "bob", "data2", "write"]),
    ])
    .unwrap();

    assert!(e.enforce(&request(&["alice", "data1", "read"])).unwrap());
    assert!(e.enforce(&request(&["bob", "data2", "write"])).unwrap());

    e.remove_rules(vec![
        strings(&["p", "alice", "data1", "read"]),
        strings(&["p", "bob", "data2", "write"]),
    ])
    .unwrap();
    assert!(!e.enforce(&request(&["alice", "data1", "read"])).unwrap());
}

#[test]
fn duplicate_rule_reports_false() {
    let mut e = Enforcer::new(acl_model(), None);
    assert!(e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap());
    assert!(!e.add_rule(&strings(&["p", "alice", "data1", "read"])).unwrap());
    assert!(e.remove_rule(&strings(&["p", "alice", "data1", "read"])).unwrap());
    assert!(!e.remove_rule(&strings(&["p", "alice", "data1", "read"])).unwrap());
}

#[test]
fn save_without_adapter_is_not_supported() {
    let e = Enforcer::new(acl_model(), None);
    assert!(matches!(
        e.save_policy(),
        Err(EnforceError::NotSupported)
    ));
}

#[test]
fn per_enforcer_functions_override_builtins() {
    let mut m = Model::new();
    m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
    m.add_def(model::POLICY_SECTION, "p", "sub, obj, act").unwrap();
    m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))")
        .unwrap();
    m.add_def(
        model::MATCHER_SECTION,
        "m",
        "r.sub == p.sub && keyMatch(r.obj, p.obj) && r.act == p.act",
    )
    .unwrap();

    let mut e = Enforcer::new(m, None);
    e.add_rule(&strings(&["p", "alice", "data*", "read"])).unwrap();
    assert!(e.enforce(&request(&["alice", "data1", "read"])).unwrap());

    // Shadow keyMatch with one that never matches.
    e.functions_mut().set(
        "keyMatch",
        Arc::new(|_: &[Value]| Ok(Value::Bool(false))),
    );
    assert!(!e.enforce(&request(&["alice", "data1", "read"])).unwrap());
}
