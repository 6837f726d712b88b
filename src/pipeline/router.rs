//! Route table with `find(method, path)` returning a match, 404 or 405 with allowed methods.

use crate::error::ConfigError;
use crate::model::ModelRegistry;
use crate::pipeline::{Action, ActionMetadata, Handler};
use crate::schema::CompiledSchema;
use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Static(s.to_string()),
        })
        .collect()
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub struct Route {
    pub metadata: ActionMetadata,
    pub model: Option<String>,
    pub handler: Arc<dyn Handler>,
    pub parameters: Option<CompiledSchema>,
    pub returns: Option<CompiledSchema>,
    segments: Vec<Segment>,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.metadata.verb
    }

    pub fn pattern(&self) -> &str {
        &self.metadata.path
    }

    fn matches(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(s) if s == part => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }

    fn static_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(_)))
            .count()
    }
}

pub enum RouteMatch {
    Found {
        route: Arc<Route>,
        params: HashMap<String, String>,
    },
    NotFound,
    MethodNotAllowed {
        allowed: Vec<Method>,
    },
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Compile every action's parameter and return schemas. Failures abort startup.
    pub fn compile(actions: Vec<Action>, registry: &ModelRegistry) -> Result<Self, ConfigError> {
        let mut routes = Vec::with_capacity(actions.len());
        for action in actions {
            let validator = registry.validator();
            let parameters = action
                .metadata
                .parameters
                .as_ref()
                .map(|s| validator.compile(s))
                .transpose()?;
            let returns = action
                .metadata
                .returns
                .as_ref()
                .map(|s| validator.compile(s))
                .transpose()?;
            if let Some(model) = &action.model {
                if registry.get(model).is_none() {
                    return Err(ConfigError::MissingReference {
                        kind: "model",
                        id: model.clone(),
                    });
                }
            }
            tracing::debug!(method = %action.metadata.verb, path = %action.metadata.path, "route registered");
            routes.push(Arc::new(Route {
                segments: parse_pattern(&action.metadata.path),
                metadata: action.metadata,
                model: action.model,
                handler: action.handler,
                parameters,
                returns,
            }));
        }
        Ok(RouteTable { routes })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Best match for `method` at `path`: the candidate with the most static segments,
    /// earliest registered on ties. Allowed methods are only collected on a verb mismatch.
    pub fn find(&self, method: &Method, path: &str) -> RouteMatch {
        let parts: Vec<&str> = split_path(path).collect();
        let mut best: Option<(&Arc<Route>, HashMap<String, String>)> = None;
        let mut path_matched = false;
        for route in &self.routes {
            let Some(params) = route.matches(&parts) else { continue };
            path_matched = true;
            if route.method() != method {
                continue;
            }
            let better = match &best {
                Some((current, _)) => route.static_segments() > current.static_segments(),
                None => true,
            };
            if better {
                best = Some((route, params));
            }
        }
        match best {
            Some((route, params)) => RouteMatch::Found {
                route: route.clone(),
                params,
            },
            None if path_matched => RouteMatch::MethodNotAllowed {
                allowed: self.allowed(&parts),
            },
            None => RouteMatch::NotFound,
        }
    }

    fn allowed(&self, parts: &[&str]) -> Vec<Method> {
        let mut allowed: Vec<Method> = Vec::new();
        for route in &self.routes {
            if route.matches(parts).is_some() && !allowed.contains(route.method()) {
                allowed.push(route.method().clone());
            }
        }
        allowed
    }
}
