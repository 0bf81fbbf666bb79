//! [`RouteTable`] — one dialect's validated detection rules.

use std::collections::BTreeMap;

use stratus_types::Dialect;

use crate::action::Action;
use crate::envelope::{Method, RequestEnvelope};
use crate::error::TableError;
use crate::template::{PathParams, PathTemplate};

/// Wire protocol an operation arrived in; selects response and error shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireProtocol {
    /// REST with XML bodies (S3).
    RestXml,
    /// JSON body with the operation in `x-amz-target`.
    Json,
    /// Form body with `Action=` (AWS Query: EC2, SQS).
    Query,
    /// REST with JSON bodies (GCP, Oracle).
    RestJson,
}

/// Extra condition on the query string for a route to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryGuard {
    /// The parameter is present.
    Present(&'static str),
    /// The parameter has exactly this value.
    Equals(&'static str, &'static str),
}

impl QueryGuard {
    fn admits(&self, envelope: &RequestEnvelope) -> bool {
        match self {
            Self::Present(name) => envelope.has_query(name),
            Self::Equals(name, value) => envelope.query_param(name) == Some(value),
        }
    }
}

/// One `(method, template)` rule.
#[derive(Debug, Clone)]
pub struct Route {
    /// Method the route answers.
    pub method: Method,
    /// Path pattern.
    pub template: PathTemplate,
    /// Optional query condition; guarded routes are tried first.
    pub guard: Option<QueryGuard>,
    /// Resolved action.
    pub action: Action,
}

/// Outcome of matching the path strategy.
pub(crate) enum PathMatch<'a> {
    Found(&'a Route, PathParams),
    /// Some template matched, but no route for this method.
    MethodMismatch,
    None,
}

/// Detection rules for one dialect.
#[derive(Debug, Clone)]
pub struct RouteTable {
    dialect: Dialect,
    path_protocol: WireProtocol,
    routes: Vec<Route>,
    targets: BTreeMap<String, Action>,
    body_actions: BTreeMap<String, Action>,
}

impl RouteTable {
    /// Start building a table for `dialect` whose path routes speak
    /// `path_protocol`.
    pub fn builder(dialect: Dialect, path_protocol: WireProtocol) -> RouteTableBuilder {
        RouteTableBuilder {
            dialect,
            path_protocol,
            routes: Vec::new(),
            targets: Vec::new(),
            body_actions: Vec::new(),
        }
    }

    /// Dialect the table belongs to.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Protocol of operations matched by path.
    pub fn path_protocol(&self) -> WireProtocol {
        self.path_protocol
    }

    /// All path routes, in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Whether any header targets are registered.
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Whether any body actions are registered.
    pub fn has_body_actions(&self) -> bool {
        !self.body_actions.is_empty()
    }

    /// Action registered for a full `x-amz-target` value.
    pub fn target(&self, target: &str) -> Option<Action> {
        self.targets.get(target).copied()
    }

    /// Action registered for a body `Action` name.
    pub fn body_action(&self, name: &str) -> Option<Action> {
        self.body_actions.get(name).copied()
    }

    /// Every action reachable through this table.
    pub fn actions(&self) -> Vec<Action> {
        let mut all: Vec<Action> = self
            .routes
            .iter()
            .map(|r| r.action)
            .chain(self.targets.values().copied())
            .chain(self.body_actions.values().copied())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    pub(crate) fn match_path(&self, envelope: &RequestEnvelope) -> PathMatch<'_> {
        let path = envelope.path();
        let mut path_seen = false;
        for guarded in [true, false] {
            for route in self.routes.iter().filter(|r| r.guard.is_some() == guarded) {
                let Some(params) = route.template.matches(path) else {
                    continue;
                };
                path_seen = true;
                if route.method != envelope.method() {
                    continue;
                }
                if route.guard.is_none_or(|g| g.admits(envelope)) {
                    return PathMatch::Found(route, params);
                }
            }
        }
        if path_seen {
            PathMatch::MethodMismatch
        } else {
            PathMatch::None
        }
    }
}

/// Builder for a [`RouteTable`]; [`build`](Self::build) validates it.
pub struct RouteTableBuilder {
    dialect: Dialect,
    path_protocol: WireProtocol,
    routes: Vec<(Method, &'static str, Option<QueryGuard>, Action)>,
    targets: Vec<(String, Action)>,
    body_actions: Vec<(String, Action)>,
}

impl RouteTableBuilder {
    /// Add a path route.
    pub fn route(mut self, method: Method, template: &'static str, action: Action) -> Self {
        self.routes.push((method, template, None, action));
        self
    }

    /// Add a path route that only applies when `guard` holds.
    pub fn route_when(
        mut self,
        method: Method,
        template: &'static str,
        guard: QueryGuard,
        action: Action,
    ) -> Self {
        self.routes.push((method, template, Some(guard), action));
        self
    }

    /// Register a full `x-amz-target` value.
    pub fn target(mut self, target: impl Into<String>, action: Action) -> Self {
        self.targets.push((target.into(), action));
        self
    }

    /// Register a body `Action` name.
    pub fn body_action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.body_actions.push((name.into(), action));
        self
    }

    /// Parse every template and reject ambiguity.
    ///
    /// Two routes conflict when they share a method, their templates can
    /// match the same path, and their query guards are identical (both
    /// absent counts as identical).
    pub fn build(self) -> Result<RouteTable, TableError> {
        let mut routes: Vec<Route> = Vec::with_capacity(self.routes.len());
        for (method, template, guard, action) in self.routes {
            let template = PathTemplate::parse(template)?;
            if let Some(existing) = routes.iter().find(|r| {
                r.method == method && r.guard == guard && r.template.overlaps(&template)
            }) {
                return Err(TableError::Ambiguous {
                    method,
                    first: existing.template.to_string(),
                    second: template.to_string(),
                });
            }
            routes.push(Route {
                method,
                template,
                guard,
                action,
            });
        }

        let mut targets = BTreeMap::new();
        for (name, action) in self.targets {
            if targets.insert(name.clone(), action).is_some() {
                return Err(TableError::DuplicateTarget(name));
            }
        }

        let mut body_actions = BTreeMap::new();
        for (name, action) in self.body_actions {
            if body_actions.insert(name.clone(), action).is_some() {
                return Err(TableError::DuplicateBodyAction(name));
            }
        }

        Ok(RouteTable {
            dialect: self.dialect,
            path_protocol: self.path_protocol,
            routes,
            targets,
            body_actions,
        })
    }
}
