use async_trait::async_trait;
use casbin::{CoreApi, DefaultModel, Enforcer, FileAdapter, MemoryAdapter, MgmtApi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{context::RequestContext, error::GateError, gate::Stage};

#[derive(Debug, Error)]
#[error("policy engine error: {0}")]
pub struct PolicyError(pub String);

impl From<casbin::Error> for PolicyError {
    fn from(err: casbin::Error) -> Self {
        PolicyError(err.to_string())
    }
}

/// PolicyEnforcer
///
/// External policy capability. Pattern matching and precedence are the engine's
/// business; the gate only consumes the boolean.
#[async_trait]
pub trait PolicyEnforcer: Send + Sync {
    async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool, PolicyError>;
}

/// A `p` line: subject (user or role) may perform `action` on paths matching `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

/// A `g` line: `user` inherits every rule of `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRule {
    pub user: String,
    pub role: String,
}

/// casbin_model
///
/// RBAC model over (subject, path, method). Paths use `keyMatch2` (`/menus/:id`),
/// methods use `regexMatch` so one rule can cover `(GET)|(POST)`. The `root` subject
/// passes every check.
pub fn casbin_model(root: &str) -> String {
    format!(
        r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && regexMatch(r.act, p.act) || r.sub == "{root}"
"#
    )
}

/// CasbinEnforcer
///
/// Casbin-backed policy store. The enforcer sits behind a `RwLock` so administrative
/// policy edits can happen while requests are evaluated.
#[derive(Clone)]
pub struct CasbinEnforcer {
    inner: Arc<RwLock<Enforcer>>,
}

impl CasbinEnforcer {
    /// Builds an enforcer seeded with in-memory rules.
    pub async fn with_rules(
        root: &str,
        policies: &[PolicyRule],
        groupings: &[GroupingRule],
    ) -> Result<Self, PolicyError> {
        let model = DefaultModel::from_str(&casbin_model(root)).await?;
        let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;

        for rule in policies {
            enforcer
                .add_policy(vec![
                    rule.subject.clone(),
                    rule.object.clone(),
                    rule.action.clone(),
                ])
                .await?;
        }
        for rule in groupings {
            enforcer
                .add_grouping_policy(vec![rule.user.clone(), rule.role.clone()])
                .await?;
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(enforcer)),
        })
    }

    /// Builds an enforcer from a casbin CSV policy file (`p, ...` / `g, ...` lines).
    pub async fn from_file(root: &str, policy_path: &str) -> Result<Self, PolicyError> {
        let model = DefaultModel::from_str(&casbin_model(root)).await?;
        let enforcer = Enforcer::new(model, FileAdapter::new(policy_path.to_string())).await?;
        Ok(Self {
            inner: Arc::new(RwLock::new(enforcer)),
        })
    }

    /// Handle for administrative policy mutation.
    pub fn handle(&self) -> Arc<RwLock<Enforcer>> {
        self.inner.clone()
    }
}

#[async_trait]
impl PolicyEnforcer for CasbinEnforcer {
    async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool, PolicyError> {
        let enforcer = self.inner.read().await;
        Ok(enforcer.enforce((subject, object, action))?)
    }
}

/// PolicyAuthorizer
///
/// Turns the enforcer's answer into gate outcomes: engine failure is a 500 with the
/// cause kept for the log, `false` is `NoResourcePermission`.
#[derive(Clone)]
pub struct PolicyAuthorizer {
    enforcer: Arc<dyn PolicyEnforcer>,
}

impl PolicyAuthorizer {
    pub fn new(enforcer: Arc<dyn PolicyEnforcer>) -> Self {
        Self { enforcer }
    }

    pub async fn check(&self, subject: &str, path: &str, method: &str) -> Result<bool, GateError> {
        self.enforcer
            .enforce(subject, path, method)
            .await
            .map_err(|e| GateError::PolicyEvaluationFailure(e.to_string()))
    }
}

pub struct AuthorizeStage {
    pub authorizer: PolicyAuthorizer,
}

#[async_trait]
impl Stage for AuthorizeStage {
    fn name(&self) -> &'static str {
        "authorize"
    }

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        let allowed = self
            .authorizer
            .check(cx.subject.as_str(), &cx.path, cx.method.as_str())
            .await?;

        if allowed {
            Ok(())
        } else {
            tracing::debug!(subject = %cx.subject, path = %cx.path, method = %cx.method, "policy denied");
            Err(GateError::NoResourcePermission)
        }
    }
}
