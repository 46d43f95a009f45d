//! Route matching logic.
//!
//! Matches incoming method + path pairs against route definitions and
//! extracts path variables.

use crate::config::RouteDefinition;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Name bound to the remainder of the path by a trailing `*`.
pub const CATCH_ALL: &str = "*";

/// Result of matching a request against the route table.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    /// The matched route
    pub route: &'a RouteDefinition,
    /// Path variables bound by the pattern
    pub vars: HashMap<String, String>,
}

/// A compiled path pattern such as `/users/{id}` or `/files/{name:[a-z]+}/*`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(String),
    Constrained(String, Regex),
    CatchAll,
}

impl Segment {
    /// Precedence when several patterns match the same path.
    fn weight(&self) -> u8 {
        match self {
            Segment::Literal(_) => 3,
            Segment::Constrained(..) => 2,
            Segment::Var(_) => 1,
            Segment::CatchAll => 0,
        }
    }
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let raw: Vec<&str> = pattern.strip_prefix('/').unwrap_or(pattern).split('/').collect();
        let last = raw.len() - 1;

        let mut segments = Vec::with_capacity(raw.len());
        for (i, part) in raw.into_iter().enumerate() {
            let segment = if part == "*" && i == last {
                Segment::CatchAll
            } else if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                match inner.split_once(':') {
                    Some((name, expr)) => {
                        Segment::Constrained(name.to_string(), Regex::new(&format!("^(?:{})$", expr))?)
                    }
                    None => Segment::Var(inner.to_string()),
                }
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// Match a request path, returning bound variables on success.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut remaining = path.strip_prefix('/').unwrap_or(path);

        for (i, segment) in self.segments.iter().enumerate() {
            let (part, rest) = match remaining.split_once('/') {
                Some((part, rest)) => (part, Some(rest)),
                None => (remaining, None),
            };

            match segment {
                Segment::Literal(lit) => {
                    if part != lit {
                        return None;
                    }
                }
                Segment::Var(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
                Segment::Constrained(name, regex) => {
                    if part.is_empty() || !regex.is_match(part) {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
                Segment::CatchAll => {
                    params.insert(CATCH_ALL.to_string(), remaining.to_string());
                    return Some(params);
                }
            }

            let is_last = i == self.segments.len() - 1;
            match (rest, is_last) {
                (Some(rest), false) => remaining = rest,
                (None, true) => return Some(params),
                // Path and pattern disagree on segment count
                _ => return None,
            }
        }

        None
    }

    fn specificity(&self) -> impl Iterator<Item = u8> + '_ {
        self.segments.iter().map(Segment::weight)
    }
}

/// Immutable table of compiled routes.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<(PathPattern, RouteDefinition)>,
}

impl RouteTable {
    /// Compile route definitions into a table.
    pub fn new(routes: Vec<RouteDefinition>) -> Result<Self, regex::Error> {
        let routes = routes
            .into_iter()
            .map(|route| Ok((PathPattern::parse(&route.path)?, route)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the most specific route for a request.
    ///
    /// Methods compare exactly. When several patterns match, the one with the
    /// more specific segment wins at the first position they differ; ties go to
    /// the route declared first.
    pub fn find_match(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let mut best: Option<(&PathPattern, RouteMatch<'_>)> = None;

        for (pattern, route) in &self.routes {
            if route.method != method {
                continue;
            }
            let Some(vars) = pattern.matches(path) else {
                continue;
            };

            let better = match &best {
                None => true,
                Some((current, _)) => pattern.specificity().cmp(current.specificity()) == Ordering::Greater,
            };
            if better {
                best = Some((pattern, RouteMatch { route, vars }));
            }
        }

        best.map(|(_, m)| m)
    }
}
