//! Named function registry for matcher expressions.
//!
//! Functions live in two layers: a process-wide registry populated with
//! [`register_global`], and a per-enforcer [`FunctionMap`] overlay that
//! wins on name collision. The overlay starts out with the built-in
//! matching functions (`keyMatch` family, `regexMatch`, `globMatch`,
//! `ipMatch`, `domainMatch`).

use crate::error::{EnforceError, Result};
use crate::expr::{FunctionResolver, Value};
use crate::pathmatch::PathPattern;
use globset::Glob;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, RwLock};

/// A callable mounted into matcher expressions
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

static GLOBAL_FUNCTIONS: Lazy<RwLock<HashMap<String, Function>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a function in the process-wide registry.
///
/// Per-enforcer maps shadow global names; use this for functions every
/// enforcer in the process should see.
pub fn register_global(name: impl Into<String>, function: Function) {
    if let Ok(mut map) = GLOBAL_FUNCTIONS.write() {
        map.insert(name.into(), function);
    }
}

fn global_lookup(name: &str) -> Option<Function> {
    GLOBAL_FUNCTIONS
        .read()
        .ok()
        .and_then(|map| map.get(name).map(Arc::clone))
}

/// Per-enforcer function registry
#[derive(Clone, Default)]
pub struct FunctionMap {
    fns: HashMap<String, Function>,
}

impl FunctionMap {
    /// Create an empty map (no built-ins)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map preloaded with the built-in matching functions
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut map = Self::new();
        map.set("keyMatch", Arc::new(fn_key_match));
        map.set("keyMatch2", Arc::new(fn_key_match2));
        map.set("keyMatch3", Arc::new(fn_key_match3));
        map.set("keyMatch4", Arc::new(fn_key_match4));
        map.set("keyMatch5", Arc::new(fn_key_match5));
        map.set("regexMatch", Arc::new(fn_regex_match));
        map.set("globMatch", Arc::new(fn_glob_match));
        map.set("ipMatch", Arc::new(fn_ip_match));
        map.set("domainMatch", Arc::new(fn_domain_match));
        map
    }

    /// Register or replace a function
    pub fn set(&mut self, name: impl Into<String>, function: Function) {
        self.fns.insert(name.into(), function);
    }

    /// Remove a function; returns true if it was present
    pub fn remove(&mut self, name: &str) -> bool {
        self.fns.remove(name).is_some()
    }

    /// Look up a function in this map only
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Function> {
        self.fns.get(name).map(Arc::clone)
    }
}

impl std::fmt::Debug for FunctionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMap")
            .field("names", &self.fns.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionResolver for FunctionMap {
    fn lookup(&self, name: &str) -> Option<Function> {
        self.get(name).or_else(|| global_lookup(name))
    }
}

fn two_strings<'a>(name: &str, args: &'a [Value]) -> Result<(&'a str, &'a str)> {
    match (args.first(), args.get(1), args.len()) {
        (Some(Value::Str(a)), Some(Value::Str(b)), 2) => Ok((a, b)),
        _ => Err(EnforceError::expr(format!(
            "{name} expects two string arguments"
        ))),
    }
}

/// `keyMatch(key1, key2)`: `key2` may end in `*`, which matches any
/// suffix of `key1` (`/foo/*` matches `/foo/bar/baz`).
fn fn_key_match(args: &[Value]) -> Result<Value> {
    let (key1, key2) = two_strings("keyMatch", args)?;
    Ok(Value::Bool(key_match(key1, key2)))
}

pub(crate) fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => {
            if key1.len() > i {
                key1.get(..i) == key2.get(..i)
            } else {
                key1 == &key2[..i]
            }
        }
    }
}

/// `keyMatch2(key1, key2)`: URL path matching with `:param` keys and
/// `*` wildcards (`/foo/:name` matches `/foo/bar`).
fn fn_key_match2(args: &[Value]) -> Result<Value> {
    let (key1, key2) = two_strings("keyMatch2", args)?;
    let pattern = PathPattern::compile(key2)?;
    Ok(Value::Bool(pattern.matches(key1)))
}

/// `keyMatch3(key1, key2)`: like `keyMatch2` with `{param}` keys
/// (`/foo/{name}` matches `/foo/bar`).
fn fn_key_match3(args: &[Value]) -> Result<Value> {
    let (key1, key2) = two_strings("keyMatch3", args)?;
    let pattern = PathPattern::builder(key2).prefix("{").suffix("}").compile()?;
    Ok(Value::Bool(pattern.matches(key1)))
}

/// `keyMatch4(key1, key2)`: `{param}` keys where repeated occurrences
/// of the same key must capture equal values
/// (`/{id}/use/{id}` matches `/1/use/1` but not `/1/use/2`).
fn fn_key_match4(args: &[Value]) -> Result<Value> {
    let (key1, key2) = two_strings("keyMatch4", args)?;
    let pattern = PathPattern::builder(key2)
        .prefix("{")
        .suffix("}")
        .equal_check(true)
        .compile()?;
    Ok(Value::Bool(pattern.matches(key1)))
}

/// `keyMatch5(key1, key2)`: `{param}` keys; a query string in `key1`
/// is ignored (`/foo/bar?status=1` matches `/foo/{name}`).
fn fn_key_match5(args: &[Value]) -> Result<Value> {
    let (key1, key2) = two_strings("keyMatch5", args)?;
    let path = key1.split('?').next().unwrap_or(key1);
    let pattern = PathPattern::builder(key2).prefix("{").suffix("}").compile()?;
    Ok(Value::Bool(pattern.matches(path)))
}

/// `regexMatch(value, pattern)`
fn fn_regex_match(args: &[Value]) -> Result<Value> {
    let (value, pattern) = two_strings("regexMatch", args)?;
    let re = Regex::new(pattern)
        .map_err(|e| EnforceError::expr(format!("regexMatch: invalid pattern: {e}")))?;
    Ok(Value::Bool(re.is_match(value)))
}

/// `globMatch(value, pattern)`: shell-style globbing
fn fn_glob_match(args: &[Value]) -> Result<Value> {
    let (value, pattern) = two_strings("globMatch", args)?;
    let glob = Glob::new(pattern)
        .map_err(|e| EnforceError::expr(format!("globMatch: invalid pattern: {e}")))?;
    Ok(Value::Bool(glob.compile_matcher().is_match(value)))
}

/// `ipMatch(ip, cidr)`: `cidr` is an address or an address with prefix
/// length (`192.168.2.0/24`).
fn fn_ip_match(args: &[Value]) -> Result<Value> {
    let (ip1, ip2) = two_strings("ipMatch", args)?;
    Ok(Value::Bool(ip_match(ip1, ip2)?))
}

pub(crate) fn ip_match(ip1: &str, ip2: &str) -> Result<bool> {
    let addr: IpAddr = ip1
        .parse()
        .map_err(|_| EnforceError::expr(format!("ipMatch: invalid address `{ip1}`")))?;

    let (network, prefix) = match ip2.split_once('/') {
        None => {
            let other: IpAddr = ip2
                .parse()
                .map_err(|_| EnforceError::expr(format!("ipMatch: invalid address `{ip2}`")))?;
            return Ok(addr == other);
        }
        Some((network, prefix)) => {
            let network: IpAddr = network.parse().map_err(|_| {
                EnforceError::expr(format!("ipMatch: invalid network `{ip2}`"))
            })?;
            let prefix: u8 = prefix.parse().map_err(|_| {
                EnforceError::expr(format!("ipMatch: invalid prefix `{ip2}`"))
            })?;
            (network, prefix)
        }
    };

    match (addr, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => Ok(v4_in_subnet(ip, net, prefix)),
        (IpAddr::V6(ip), IpAddr::V6(net)) => Ok(v6_in_subnet(ip, net, prefix)),
        _ => Ok(false),
    }
}

fn v4_in_subnet(ip: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 32 {
        return false;
    }
    let mask = !0u32 << (32 - u32::from(prefix));
    u32::from(ip) & mask == u32::from(net) & mask
}

fn v6_in_subnet(ip: Ipv6Addr, net: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 128 {
        return false;
    }
    let ip_bits = u128::from_be_bytes(ip.octets());
    let net_bits = u128::from_be_bytes(net.octets());
    let mask = !0u128 << (128 - u32::from(prefix));
    ip_bits & mask == net_bits & mask
}

/// `domainMatch(domain, pattern)`: `*.example.com` matches any
/// subdomain of `example.com`, not the bare domain itself.
fn fn_domain_match(args: &[Value]) -> Result<Value> {
    let (domain, pattern) = two_strings("domainMatch", args)?;
    Ok(Value::Bool(domain_match(domain, pattern)))
}

pub(crate) fn domain_match(domain: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => domain.ends_with(suffix) && domain.len() > suffix.len(),
        None => domain == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(map: &FunctionMap, name: &str, a: &str, b: &str) -> bool {
        let func = map.get(name).unwrap();
        (*func)(&[Value::from(a), Value::from(b)])
            .unwrap()
            .as_bool()
            .unwrap()
    }

    #[test]
    fn key_match_star_suffix() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "keyMatch", "/foo/bar", "/foo/*"));
        assert!(call(&map, "keyMatch", "/foo/bar/baz", "/foo/*"));
        assert!(call(&map, "keyMatch", "/foo", "/foo"));
        assert!(!call(&map, "keyMatch", "/bar/foo", "/foo/*"));
    }

    #[test]
    fn key_match2_params() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "keyMatch2", "/foo/bar", "/foo/:name"));
        assert!(!call(&map, "keyMatch2", "/foo/bar/baz", "/foo/:name"));
        assert!(call(&map, "keyMatch2", "/a/b/c", "/*"));
    }

    #[test]
    fn key_match3_braced_params() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "keyMatch3", "/foo/bar", "/foo/{name}"));
        assert!(!call(&map, "keyMatch3", "/foo/bar/baz", "/foo/{name}"));
    }

    #[test]
    fn key_match4_repeated_keys_must_agree() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "keyMatch4", "/1/use/1", "/{id}/use/{id}"));
        assert!(!call(&map, "keyMatch4", "/1/use/2", "/{id}/use/{id}"));
    }

    #[test]
    fn key_match5_ignores_query() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "keyMatch5", "/foo/bar?status=1", "/foo/{name}"));
        assert!(call(&map, "keyMatch5", "/foo/bar", "/foo/{name}"));
        assert!(!call(&map, "keyMatch5", "/foo/bar/baz?x=1", "/foo/{name}"));
    }

    #[test]
    fn regex_match() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "regexMatch", "/topic/create", "/topic/create.*"));
        assert!(!call(&map, "regexMatch", "/topic/delete", "^/topic/create"));
    }

    #[test]
    fn glob_match() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "globMatch", "/data/file.txt", "/data/*.txt"));
        assert!(!call(&map, "globMatch", "/data/file.pdf", "/data/*.txt"));
    }

    #[test]
    fn ip_match_cidr() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "ipMatch", "192.168.2.123", "192.168.2.0/24"));
        assert!(!call(&map, "ipMatch", "192.168.3.1", "192.168.2.0/24"));
        assert!(call(&map, "ipMatch", "10.0.0.1", "10.0.0.1"));
        assert!(call(&map, "ipMatch", "::1", "::1/128"));
    }

    #[test]
    fn ip_match_invalid_address_is_error() {
        let map = FunctionMap::with_builtins();
        let func = map.get("ipMatch").unwrap();
        assert!((*func)(&[Value::from("not-an-ip"), Value::from("10.0.0.0/8")]).is_err());
    }

    #[test]
    fn domain_match_wildcard() {
        let map = FunctionMap::with_builtins();
        assert!(call(&map, "domainMatch", "sub.example.com", "*.example.com"));
        assert!(!call(&map, "domainMatch", "example.com", "*.example.com"));
        assert!(call(&map, "domainMatch", "example.com", "example.com"));
    }

    #[test]
    fn overlay_shadows_global() {
        register_global(
            "shadowed",
            Arc::new(|_: &[Value]| Ok(Value::Bool(false))),
        );
        let mut map = FunctionMap::new();
        assert!(!map
            .lookup("shadowed")
            .map(|f| (*f)(&[]).unwrap().as_bool().unwrap())
            .unwrap_or(true));

        map.set("shadowed", Arc::new(|_: &[Value]| Ok(Value::Bool(true))));
        assert!(map
            .lookup("shadowed")
            .map(|f| (*f)(&[]).unwrap().as_bool().unwrap())
            .unwrap_or(false));
    }
}
