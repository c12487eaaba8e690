//! # Route Table
//!
//! Routes form a tree through their `parent` id. A request matches the most
//! specific route pattern; the result is that route plus all of its ancestors,
//! root first, so every loader in the chain can contribute data.
//!
//! Patterns are absolute paths made of static segments, `:param` segments and
//! an optional trailing `*` splat (captured as the `*` param).
//!
//! The table is read on every request and written only when routes are
//! (re)registered, so it lives behind an [`ArcSwap`].

use crate::data::DataFunction;
use arc_swap::ArcSwap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Path parameters, in pattern order.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Name under which a splat segment is captured.
pub const SPLAT_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(Arc<str>),
    Splat,
}

fn parse_pattern(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "*" {
                Segment::Splat
            } else if let Some(name) = s.strip_prefix(':') {
                Segment::Param(Arc::from(name))
            } else {
                Segment::Static(s.to_string())
            }
        })
        .collect()
}

/// One route: an id, a pattern, and its data functions.
#[derive(Clone)]
pub struct RouteModule {
    pub id: String,
    pub path: String,
    pub parent: Option<String>,
    pub loader: Option<Arc<dyn DataFunction>>,
    pub action: Option<Arc<dyn DataFunction>>,
    segments: Vec<Segment>,
}

impl RouteModule {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            segments: parse_pattern(&path),
            path,
            parent: None,
            loader: None,
            action: None,
        }
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn loader(mut self, loader: impl DataFunction + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    #[must_use]
    pub fn action(mut self, action: impl DataFunction + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    /// Match `path` against this route's pattern. Returns the captured params
    /// and a specificity score (higher wins).
    fn match_path(&self, path: &str) -> Option<(ParamVec, u32)> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = ParamVec::new();
        let mut score = 0u32;
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Splat => {
                    params.push((Arc::from(SPLAT_PARAM), parts.get(i..)?.join("/")));
                    return Some((params, score + 1));
                }
                Segment::Static(s) => {
                    if parts.get(i)? != s {
                        return None;
                    }
                    score += 10;
                }
                Segment::Param(name) => {
                    params.push((Arc::clone(name), (*parts.get(i)?).to_string()));
                    score += 5;
                }
            }
        }
        (parts.len() == self.segments.len()).then_some((params, score + 2))
    }
}

impl fmt::Debug for RouteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteModule")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("parent", &self.parent)
            .field("has_loader", &self.loader.is_some())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// A matched route chain.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Root first, matched route last.
    pub chain: Vec<Arc<RouteModule>>,
    pub params: ParamVec,
}

impl RouteMatch {
    /// The route the path actually matched.
    #[must_use]
    pub fn leaf(&self) -> Option<&Arc<RouteModule>> {
        self.chain.last()
    }

    #[must_use]
    pub fn find(&self, route_id: &str) -> Option<&Arc<RouteModule>> {
        self.chain.iter().find(|r| r.id == route_id)
    }

    #[inline]
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Registered routes, swappable while requests are being served.
#[derive(Default)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<RouteModule>>>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route, replacing any route with the same id.
    pub fn add(&self, route: RouteModule) {
        let route = Arc::new(route);
        let id = route.id.clone();
        let mut replaced = false;
        self.routes.rcu(|current| {
            let mut next: Vec<Arc<RouteModule>> = current.as_ref().clone();
            replaced = false;
            if let Some(slot) = next.iter_mut().find(|r| r.id == route.id) {
                *slot = Arc::clone(&route);
                replaced = true;
            } else {
                next.push(Arc::clone(&route));
            }
            next
        });
        if replaced {
            warn!(route_id = %id, path = %route.path, "Replacing existing route");
        } else {
            info!(
                route_id = %id,
                path = %route.path,
                parent = route.parent.as_deref().unwrap_or("-"),
                "Route registered"
            );
        }
    }

    /// Swap in a whole new set of routes at once.
    pub fn replace_all(&self, routes: Vec<RouteModule>) {
        let count = routes.len();
        self.routes
            .store(Arc::new(routes.into_iter().map(Arc::new).collect()));
        info!(route_count = count, "Route table replaced");
    }

    pub fn remove(&self, id: &str) -> bool {
        let before = self.len();
        self.routes.rcu(|current| {
            current
                .iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        before != self.len()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<RouteModule>> {
        self.routes.load().iter().find(|r| r.id == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `id` and its ancestors, root first. A missing parent ends the chain;
    /// a cycle is cut at the first repeated id.
    #[must_use]
    pub fn chain(&self, id: &str) -> Vec<Arc<RouteModule>> {
        let routes = self.routes.load();
        let mut chain: Vec<Arc<RouteModule>> = Vec::new();
        let mut next = Some(id.to_string());
        while let Some(current) = next.take() {
            if chain.iter().any(|r| r.id == current) {
                warn!(route_id = %current, "Route parent cycle");
                break;
            }
            let Some(route) = routes.iter().find(|r| r.id == current) else {
                break;
            };
            next = route.parent.clone();
            chain.push(Arc::clone(route));
        }
        chain.reverse();
        chain
    }

    /// Most specific route whose pattern matches `path`.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or("/");
        let routes = self.routes.load();
        let (leaf, params, _) = routes
            .iter()
            .filter_map(|r| r.match_path(path).map(|(p, s)| (r, p, s)))
            .max_by_key(|(_, _, score)| *score)?;
        let chain = self.chain(&leaf.id);
        debug!(
            path = %path,
            route_id = %leaf.id,
            depth = chain.len(),
            "Route matched"
        );
        Some(RouteMatch { chain, params })
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes.load().iter()).finish()
    }
}
