//! Route table: `(method, path pattern)` to function, built once and read-only
//! afterwards.
//!
//! Patterns are API Gateway resource paths. A segment is a literal, a named
//! parameter `{id}`, or, as the last segment only, a greedy `{proxy+}` that
//! binds the rest of the path. When several patterns match a request the most
//! specific wins: at the first segment where they differ a literal beats a
//! parameter, which beats a greedy segment.

use sam_local_shared::{FunctionDescriptor, RouteError, ANY_METHOD};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Param(String),
    Greedy(String),
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Param(_) => 1,
            Segment::Greedy(_) => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Strips one trailing slash, keeping the root path.
pub fn normalize_path(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some("") | None => {
            if path.is_empty() {
                "/"
            } else {
                path
            }
        }
        Some(trimmed) => trimmed,
    }
}

fn split(path: &str) -> Vec<&str> {
    let path = normalize_path(path);
    if path == "/" {
        return Vec::new();
    }
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

impl PathPattern {
    pub fn parse(path: &str) -> Result<Self, String> {
        let trimmed = path.trim();
        if !trimmed.starts_with('/') {
            return Err("path must start with '/'".to_string());
        }

        let parts = split(trimmed);
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err("empty path segment".to_string());
            }

            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => match inner.strip_suffix('+') {
                    Some(name) => {
                        if i + 1 != parts.len() {
                            return Err(format!("greedy segment {{{}+}} must be last", name));
                        }
                        Segment::Greedy(valid_name(name)?)
                    }
                    None => Segment::Param(valid_name(inner)?),
                },
                None if part.contains(['{', '}']) => {
                    return Err(format!("malformed segment {}", part));
                }
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: normalize_path(trimmed).to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) | Segment::Greedy(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The pattern with parameter names erased; two patterns with the same
    /// shape match exactly the same paths.
    fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(text) => shape.push_str(text),
                Segment::Param(_) => shape.push_str("{}"),
                Segment::Greedy(_) => shape.push_str("{+}"),
            }
        }
        shape
    }

    fn specificity(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            match a.rank().cmp(&b.rank()) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // A longer pattern is more specific than its prefix
        other.segments.len().cmp(&self.segments.len())
    }

    /// Path parameters bound by matching `parts`, if the pattern matches.
    fn bind(&self, parts: &[&str]) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => {
                    if parts.get(i) != Some(&text.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), value.to_string());
                }
                Segment::Greedy(name) => {
                    let rest = parts.get(i..).filter(|rest| !rest.is_empty())?;
                    params.insert(name.clone(), rest.join("/"));
                    return Some(params);
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn valid_name(name: &str) -> Result<String, String> {
    if name.is_empty() || name.contains(['{', '}', '+']) {
        return Err(format!("invalid parameter name '{}'", name));
    }
    Ok(name.to_string())
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Upper-cased method token, or [`ANY_METHOD`].
    pub method: String,
    pub pattern: PathPattern,
    pub function: Arc<FunctionDescriptor>,
}

#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub path_parameters: BTreeMap<String, String>,
}

/// No route accepted the request.
///
/// `allowed_methods` is non-empty when the path is routed but not for the
/// requested method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoMatch {
    pub allowed_methods: Vec<String>,
}

/// Why a function contributes no routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NoEvents,
    Route(RouteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub function: String,
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            RejectReason::NoEvents => write!(f, "{} declares no API event sources", self.function),
            RejectReason::Route(e) => write!(f, "{}", e),
        }
    }
}

/// One mounted path of one function, for startup diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSummary {
    pub function: String,
    pub handler: String,
    pub runtime: String,
    pub path: String,
    pub methods: Vec<String>,
}

impl MountSummary {
    pub fn methods_label(&self) -> String {
        format!("[{}]", self.methods.join(" "))
    }
}

struct PatternGroup {
    pattern: PathPattern,
    /// method → entry index
    methods: BTreeMap<String, usize>,
}

pub struct RouteTable {
    entries: Vec<RouteEntry>,
    /// Sorted most specific first.
    groups: Vec<PatternGroup>,
}

struct Candidate {
    function: Arc<FunctionDescriptor>,
    routes: Vec<(String, PathPattern)>,
}

impl RouteTable {
    /// Builds the table, failing on the first conflict or invalid path.
    ///
    /// Functions without event sources contribute nothing and are not an
    /// error here.
    pub fn build(functions: &[Arc<FunctionDescriptor>]) -> Result<Self, RouteError> {
        let (table, rejections) = Self::build_lenient(functions);
        match rejections.into_iter().find_map(|r| match r.reason {
            RejectReason::Route(e) => Some(e),
            RejectReason::NoEvents => None,
        }) {
            Some(e) => Err(e),
            None => Ok(table),
        }
    }

    /// Builds the table from every function that can be routed, reporting
    /// the rest.
    ///
    /// Every function involved in a conflict is left out: neither side of a
    /// colliding pair is installed.
    pub fn build_lenient(functions: &[Arc<FunctionDescriptor>]) -> (Self, Vec<Rejection>) {
        let mut rejections = Vec::new();
        let mut candidates = Vec::new();

        for function in functions {
            if function.events.is_empty() {
                rejections.push(Rejection {
                    function: function.name.clone(),
                    reason: RejectReason::NoEvents,
                });
                continue;
            }

            let parsed: Result<Vec<_>, _> = function
                .events
                .iter()
                .map(|event| {
                    PathPattern::parse(&event.path)
                        .map(|pattern| (event.normalized_method(), pattern))
                        .map_err(|reason| RouteError::InvalidPattern {
                            function: function.name.clone(),
                            path: event.path.clone(),
                            reason,
                        })
                })
                .collect();

            match parsed {
                Ok(routes) => candidates.push(Candidate {
                    function: function.clone(),
                    routes: dedupe_routes(&function.name, routes),
                }),
                Err(e) => rejections.push(Rejection {
                    function: function.name.clone(),
                    reason: RejectReason::Route(e),
                }),
            }
        }

        let conflicts = find_conflicts(&candidates);
        let mut table = RouteTable {
            entries: Vec::new(),
            groups: Vec::new(),
        };

        for candidate in candidates {
            if let Some(conflict) = conflicts.get(&candidate.function.name) {
                rejections.push(Rejection {
                    function: candidate.function.name.clone(),
                    reason: RejectReason::Route(conflict.clone()),
                });
                continue;
            }
            for (method, pattern) in candidate.routes {
                table.insert(RouteEntry {
                    method,
                    pattern,
                    function: candidate.function.clone(),
                });
            }
        }

        // Stable: equally specific groups keep declaration order
        table.groups.sort_by(|a, b| a.pattern.specificity(&b.pattern));
        (table, rejections)
    }

    fn insert(&mut self, entry: RouteEntry) {
        let index = self.entries.len();
        let shape = entry.pattern.shape();
        match self.groups.iter_mut().find(|g| g.pattern.shape() == shape) {
            Some(group) => {
                group.methods.insert(entry.method.clone(), index);
            }
            None => {
                let mut methods = BTreeMap::new();
                methods.insert(entry.method.clone(), index);
                self.groups.push(PatternGroup {
                    pattern: entry.pattern.clone(),
                    methods,
                });
            }
        }
        self.entries.push(entry);
    }

    /// Finds the route for a request.
    ///
    /// Patterns are tried most specific first; the first one that matches the
    /// path and accepts the method (exactly, or through `ANY`) wins.
    pub fn match_route(&self, method: &str, path: &str) -> Result<RouteMatch<'_>, NoMatch> {
        let method = method.trim().to_ascii_uppercase();
        let parts = split(path);
        let mut allowed = BTreeSet::new();

        for group in &self.groups {
            if group.pattern.bind(&parts).is_none() {
                continue;
            }

            let index = group
                .methods
                .get(&method)
                .or_else(|| group.methods.get(ANY_METHOD));
            match index {
                Some(&index) => {
                    let entry = &self.entries[index];
                    let path_parameters = entry.pattern.bind(&parts).unwrap_or_default();
                    return Ok(RouteMatch {
                        entry,
                        path_parameters,
                    });
                }
                None => allowed.extend(group.methods.keys().cloned()),
            }
        }

        Err(NoMatch {
            allowed_methods: allowed.into_iter().collect(),
        })
    }

    /// Installed routes in declaration order.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One summary per (function, path), in declaration order.
    pub fn mounts(&self) -> Vec<MountSummary> {
        let mut mounts: Vec<MountSummary> = Vec::new();
        for entry in &self.entries {
            let existing = mounts
                .iter_mut()
                .find(|m| m.function == entry.function.name && m.path == entry.pattern.as_str());
            match existing {
                Some(mount) => mount.methods.push(entry.method.clone()),
                None => mounts.push(MountSummary {
                    function: entry.function.name.clone(),
                    handler: entry.function.handler.clone(),
                    runtime: entry.function.runtime.clone(),
                    path: entry.pattern.as_str().to_string(),
                    methods: vec![entry.method.clone()],
                }),
            }
        }
        mounts
    }
}

/// Drops a function's repeated declarations of one route, keeping the first.
fn dedupe_routes(function: &str, routes: Vec<(String, PathPattern)>) -> Vec<(String, PathPattern)> {
    let mut seen: HashMap<(String, String), String> = HashMap::new();
    let mut unique = Vec::with_capacity(routes.len());

    for (method, pattern) in routes {
        match seen.get(&(method.clone(), pattern.shape())) {
            Some(kept) if kept == pattern.as_str() => {
                debug!("{} declares {} {} more than once", function, method, kept)
            }
            Some(kept) => warn!(
                "{} declares {} {} and {} {}; keeping {}",
                function,
                method,
                kept,
                method,
                pattern.as_str(),
                kept
            ),
            None => {
                seen.insert((method.clone(), pattern.shape()), pattern.as_str().to_string());
                unique.push((method, pattern));
            }
        }
    }
    unique
}

/// Maps each conflicting function to the first conflict it is part of.
fn find_conflicts(candidates: &[Candidate]) -> HashMap<String, RouteError> {
    let mut owners: HashMap<(String, String), (&str, &PathPattern)> = HashMap::new();
    let mut conflicts = HashMap::new();

    for candidate in candidates {
        let name = candidate.function.name.as_str();
        for (method, pattern) in &candidate.routes {
            let key = (method.clone(), pattern.shape());
            match owners.get(&key) {
                Some(&(first, first_pattern)) => {
                    let error = RouteError::Conflict {
                        method: method.clone(),
                        path: first_pattern.as_str().to_string(),
                        first: first.to_string(),
                        second: name.to_string(),
                    };
                    conflicts.entry(first.to_string()).or_insert_with(|| error.clone());
                    conflicts.entry(name.to_string()).or_insert(error);
                }
                None => {
                    owners.insert(key, (name, pattern));
                }
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, routes: &[(&str, &str)]) -> Arc<FunctionDescriptor> {
        let mut descriptor = FunctionDescriptor::new(name, "nodejs6.10", "index.handler");
        for (method, path) in routes {
            descriptor = descriptor.with_event(*method, *path);
        }
        Arc::new(descriptor)
    }

    fn matched<'a>(table: &'a RouteTable, method: &str, path: &str) -> &'a str {
        &table.match_route(method, path).unwrap().entry.function.name
    }

    #[test]
    fn test_parse_patterns() {
        let pattern = PathPattern::parse("/users/{id}/files/{proxy+}/").unwrap();
        assert_eq!(pattern.as_str(), "/users/{id}/files/{proxy+}");
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["id", "proxy"]);
        assert_eq!(PathPattern::parse("/").unwrap().as_str(), "/");

        assert!(PathPattern::parse("users").is_err());
        assert!(PathPattern::parse("/a//b").is_err());
        assert!(PathPattern::parse("/{proxy+}/tail").is_err());
        assert!(PathPattern::parse("/a{b}").is_err());
        assert!(PathPattern::parse("/{}").is_err());
    }

    #[test]
    fn test_literal_beats_param_beats_greedy() {
        let table = RouteTable::build(&[
            function("Greedy", &[("GET", "/a/{proxy+}")]),
            function("Param", &[("GET", "/a/{id}")]),
            function("Literal", &[("GET", "/a/fixed")]),
        ])
        .unwrap();

        assert_eq!(matched(&table, "GET", "/a/fixed"), "Literal");
        assert_eq!(matched(&table, "GET", "/a/other"), "Param");
        assert_eq!(matched(&table, "GET", "/a/other/deeper"), "Greedy");

        let greedy = table.match_route("GET", "/a/x/y/z").unwrap();
        assert_eq!(greedy.path_parameters["proxy"], "x/y/z");
    }

    #[test]
    fn test_trailing_slash_and_method_case() {
        let table = RouteTable::build(&[function("Hello", &[("get", "/hello")])]).unwrap();

        assert_eq!(matched(&table, "GET", "/hello/"), "Hello");
        assert_eq!(matched(&table, "Get", "/hello"), "Hello");
        assert!(table.match_route("GET", "/Hello").is_err());
    }

    #[test]
    fn test_any_method_and_specific_method_precedence() {
        let table = RouteTable::build(&[
            function("Catchall", &[("any", "/items")]),
            function("Creator", &[("POST", "/items")]),
        ])
        .unwrap();

        assert_eq!(matched(&table, "POST", "/items"), "Creator");
        assert_eq!(matched(&table, "DELETE", "/items"), "Catchall");
    }

    #[test]
    fn test_method_mismatch_reports_allowed_methods() {
        let table =
            RouteTable::build(&[function("Hello", &[("GET", "/hello"), ("PUT", "/hello")])])
                .unwrap();

        let no_match = table.match_route("POST", "/hello").unwrap_err();
        assert_eq!(no_match.allowed_methods, vec!["GET".to_string(), "PUT".to_string()]);

        let unrouted = table.match_route("GET", "/nowhere").unwrap_err();
        assert!(unrouted.allowed_methods.is_empty());
    }

    #[test]
    fn test_less_specific_pattern_serves_other_methods() {
        let table = RouteTable::build(&[
            function("Fixed", &[("POST", "/a/fixed")]),
            function("ById", &[("GET", "/a/{id}")]),
        ])
        .unwrap();

        assert_eq!(matched(&table, "GET", "/a/fixed"), "ById");
        assert_eq!(matched(&table, "POST", "/a/fixed"), "Fixed");
    }

    #[test]
    fn test_conflict_identifies_both_functions() {
        let err = RouteTable::build(&[
            function("First", &[("GET", "/users/{id}")]),
            function("Second", &[("GET", "/users/{name}")]),
        ])
        .err()
        .unwrap();

        assert_eq!(
            err,
            RouteError::Conflict {
                method: "GET".to_string(),
                path: "/users/{id}".to_string(),
                first: "First".to_string(),
                second: "Second".to_string(),
            }
        );
    }

    #[test]
    fn test_repeated_route_in_one_function_is_not_a_conflict() {
        let functions = vec![
            function("Hello", &[("GET", "/hello"), ("get", "/hello/"), ("POST", "/hello")]),
            function("Users", &[("GET", "/users/{id}"), ("GET", "/users/{name}")]),
        ];

        let (table, rejections) = RouteTable::build_lenient(&functions);

        assert!(rejections.is_empty());
        assert_eq!(table.len(), 3);
        assert_eq!(matched(&table, "GET", "/hello"), "Hello");

        let users = table.match_route("GET", "/users/7").unwrap();
        assert_eq!(users.path_parameters.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_lenient_build_skips_every_conflicting_function() {
        let (table, rejections) = RouteTable::build_lenient(&[
            function("First", &[("GET", "/dup")]),
            function("Second", &[("get", "/dup/")]),
            function("Quiet", &[]),
            function("Broken", &[("GET", "/a/{proxy+}/b")]),
            function("Fine", &[("GET", "/fine")]),
        ]);

        assert_eq!(table.len(), 1);
        assert_eq!(matched(&table, "GET", "/fine"), "Fine");
        assert!(table.match_route("GET", "/dup").is_err());

        let rejected: Vec<_> = rejections.iter().map(|r| r.function.as_str()).collect();
        assert_eq!(rejected.len(), 4);
        for name in ["First", "Second", "Quiet", "Broken"] {
            assert!(rejected.contains(&name), "{} not rejected", name);
        }
        assert!(rejections
            .iter()
            .any(|r| r.function == "Quiet" && r.reason == RejectReason::NoEvents));
    }

    #[test]
    fn test_no_events_is_not_a_strict_error() {
        let table = RouteTable::build(&[
            function("Quiet", &[]),
            function("Hello", &[("GET", "/hello")]),
        ])
        .unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_mounts_group_methods_per_path() {
        let table = RouteTable::build(&[
            function("Hello", &[("GET", "/hello"), ("POST", "/hello"), ("GET", "/hi")]),
            function("Root", &[("ANY", "/")]),
        ])
        .unwrap();

        let mounts = table.mounts();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].path, "/hello");
        assert_eq!(mounts[0].methods_label(), "[GET POST]");
        assert_eq!(mounts[2].function, "Root");
        assert_eq!(matched(&table, "PATCH", "/"), "Root");
    }

    #[test]
    fn test_disjoint_routes_all_resolve() {
        let functions: Vec<_> = (0..50)
            .map(|i| {
                let path = format!("/r{}/{{id}}", i);
                function(&format!("Fn{}", i), &[("GET", path.as_str())])
            })
            .collect();
        let table = RouteTable::build(&functions).unwrap();

        for i in 0..50 {
            let m = table.match_route("GET", &format!("/r{}/7", i)).unwrap();
            assert_eq!(m.entry.function.name, format!("Fn{}", i));
            assert_eq!(m.path_parameters["id"], "7");
        }
        assert!(table.match_route("GET", "/r50/7").is_err());
        assert!(table.match_route("GET", "/r1").is_err());
    }
}
