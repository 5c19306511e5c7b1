//! Route files.
//!
//! Declarative YAML route tables with static responses, for suites that keep
//! their stubs next to fixtures instead of in code.

use crate::matcher::{RouteKey, UrlPattern};
use crate::request::Method;
use crate::response::PartialResponse;
use crate::routes::{Methods, RouteTable};
use crate::scope::{LogSettings, Scope};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// A route file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RouteFile {
    /// Routes in match order
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,

    /// Scope settings
    #[serde(default)]
    pub settings: StubSettings,
}

impl RouteFile {
    /// Load a route file from YAML.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let file: Self = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    /// Validate the route file.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| anyhow::anyhow!("Route {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Build the in-memory route table.
    pub fn to_route_table(&self) -> anyhow::Result<RouteTable> {
        let mut table = RouteTable::new();
        for route in &self.routes {
            table = route.add_to(table)?;
        }
        Ok(table)
    }

    /// Build a scope carrying this file's routes and settings.
    pub fn to_scope(&self) -> anyhow::Result<Scope> {
        let scope = Scope::new(self.to_route_table()?, self.settings.isolation).with_logging(
            LogSettings {
                log_matches: self.settings.log_matches,
                log_unmatched: self.settings.log_unmatched,
            },
        );
        Ok(scope)
    }
}

/// A single route.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDefinition {
    /// URL matching
    pub address: AddressMatcher,

    /// Exact query parameters; values of any scalar type are stringified
    #[serde(default, deserialize_with = "stringified_params")]
    pub query: Option<BTreeMap<String, String>>,

    /// Per-method responses, in declaration order
    #[serde(default, deserialize_with = "ordered_methods")]
    pub methods: Option<Vec<(Method, PartialResponse)>>,

    /// Response for every method
    #[serde(default)]
    pub response: Option<PartialResponse>,

    /// Expected call counts
    #[serde(default)]
    pub times: Option<TimesDefinition>,
}

impl RouteDefinition {
    /// Validate the route definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.address.validate()?;

        match (&self.methods, &self.response) {
            (Some(_), Some(_)) => anyhow::bail!("Route cannot have both `methods` and `response`"),
            (None, None) => anyhow::bail!("Route needs either `methods` or `response`"),
            (None, Some(response)) => {
                validate_status(response)?;
                if self.times.is_some() {
                    anyhow::bail!("`times` requires `methods`");
                }
            }
            (Some(methods), None) => {
                for (_, response) in methods {
                    validate_status(response)?;
                }
                if let Some(TimesDefinition::PerMethod(per_method)) = &self.times {
                    for method in per_method.keys() {
                        if !methods.iter().any(|(m, _)| m == method) {
                            anyhow::bail!("`times` names undeclared method: {}", method);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn route_key(&self) -> anyhow::Result<RouteKey> {
        let key = match &self.address {
            AddressMatcher::Exact { value } => RouteKey::Literal(value.clone()),
            AddressMatcher::Regex { pattern } => RouteKey::Pattern(
                UrlPattern::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex: {}", e))?,
            ),
        };

        Ok(match &self.query {
            Some(params) => params
                .iter()
                .fold(key, |key, (k, v)| key.query_param(k.clone(), v)),
            None => key,
        })
    }

    fn add_to(&self, table: RouteTable) -> anyhow::Result<RouteTable> {
        let key = self.route_key()?;

        if let Some(response) = &self.response {
            return Ok(table.route(key, response.clone()));
        }

        let mut methods = Methods::new();
        for (method, response) in self.methods.iter().flatten() {
            methods = methods.on(*method, response.clone());
        }
        match &self.times {
            Some(TimesDefinition::Shared(n)) => methods = methods.times(*n),
            Some(TimesDefinition::PerMethod(per_method)) => {
                for (method, n) in per_method {
                    methods = methods.times_for(*method, *n);
                }
            }
            None => {}
        }
        Ok(table.route(key, methods))
    }
}

fn validate_status(response: &PartialResponse) -> anyhow::Result<()> {
    if let Some(status) = response.status {
        if !(100..=599).contains(&status) {
            anyhow::bail!("Invalid status code: {}", status);
        }
    }
    Ok(())
}

/// Address matching configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressMatcher {
    /// Literal URL, insensitive to default port/scheme, trailing slash and query order
    Exact { value: String },
    /// Regex that must match the whole URL
    Regex { pattern: String },
}

impl AddressMatcher {
    /// Validate the address matcher.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let AddressMatcher::Regex { pattern } = self {
            UrlPattern::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex: {}", e))?;
        }
        Ok(())
    }
}

/// `times: 2` or `times: { get: 1, post: 2 }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "serde_yaml::Value")]
pub enum TimesDefinition {
    Shared(u64),
    PerMethod(HashMap<Method, u64>),
}

impl TryFrom<serde_yaml::Value> for TimesDefinition {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::Number(n) => n
                .as_u64()
                .map(TimesDefinition::Shared)
                .ok_or_else(|| format!("`times` must be a non-negative integer, got {}", n)),
            mapping @ serde_yaml::Value::Mapping(_) => serde_yaml::from_value(mapping)
                .map(TimesDefinition::PerMethod)
                .map_err(|e| format!("`times` must map HTTP methods to call counts: {}", e)),
            other => Err(format!(
                "`times` must be an integer or a map of method to count, got {}",
                scalar_to_string(other)
            )),
        }
    }
}

/// Scope settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubSettings {
    /// Fail unmatched requests instead of passing them through
    #[serde(default)]
    pub isolation: bool,

    /// Log all matched routes
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for StubSettings {
    fn default() -> Self {
        Self {
            isolation: false,
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn stringified_params<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|params| {
        params
            .into_iter()
            .map(|(k, v)| (k, scalar_to_string(v)))
            .collect()
    }))
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s,
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn ordered_methods<'de, D>(deserializer: D) -> Result<Option<Vec<(Method, PartialResponse)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct MethodsVisitor;

    impl<'de> Visitor<'de> for MethodsVisitor {
        type Value = Vec<(Method, PartialResponse)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of HTTP methods to responses")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut methods = Vec::new();
            while let Some((method, response)) = map.next_entry::<Method, PartialResponse>()? {
                methods.push((method, response));
            }
            Ok(methods)
        }
    }

    deserializer.deserialize_map(MethodsVisitor).map(Some)
}
