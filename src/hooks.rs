//! Hook registry and executor: pre-receive/update/post-receive/post-update hooks, run either
//! as in-process functions or as signed webhook dispatches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ring::hmac;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::errors::GitError;

/// Point in the receive-pack state machine a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    PreReceive,
    Update,
    PostReceive,
    PostUpdate,
}

/// Outcome of running one hook.
#[derive(Debug, Clone, Serialize)]
pub struct HookResult {
    pub hook_id: String,
    pub accepted: bool,
    pub message: Option<String>,
}

/// A single ref-update command as seen by a hook.
#[derive(Debug, Clone, Serialize)]
pub struct HookCommand {
    pub ref_name: String,
    pub old_sha: String,
    pub new_sha: String,
}

/// Everything a hook needs to decide or observe; serialized verbatim into webhook payloads.
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub repository: String,
    pub commands: Vec<HookCommand>,
    pub env: HashMap<String, String>,
}

/// In-process hook handler. Returning `Err` rejects the push with the wrapped message.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn run(&self, ctx: &HookContext) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct WebhookSpec {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub secret: Option<String>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(200), backoff: 2.0 }
    }
}

pub enum HookKind {
    Function(Arc<dyn HookHandler>),
    Webhook(WebhookSpec),
}

pub struct Hook {
    pub id: String,
    pub point: HookPoint,
    pub priority: i32,
    pub timeout: Duration,
    pub enabled: bool,
    pub kind: HookKind,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    hook: &'a str,
    timestamp: String,
    repository: &'a str,
    commands: &'a [HookCommand],
    #[serde(rename = "ref")]
    ref_name: Option<&'a str>,
    env: &'a HashMap<String, String>,
}

/// Ordered collection of hooks for one repository; registration order breaks priority ties.
pub struct HookRegistry {
    hooks: Vec<Hook>,
    client: reqwest::Client,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new(), client: reqwest::Client::new() }
    }

    pub fn register(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    fn ordered(&self, point: HookPoint) -> Vec<&Hook> {
        let mut matching: Vec<&Hook> =
            self.hooks.iter().filter(|h| h.enabled && h.point == point).collect();
        matching.sort_by_key(|h| h.priority);
        matching
    }

    /// Pre-receive hooks run sequentially; the first rejection short-circuits the rest.
    pub async fn run_pre_receive(&self, ctx: &HookContext) -> Result<Vec<HookResult>, GitError> {
        let mut results = Vec::new();
        for hook in self.ordered(HookPoint::PreReceive) {
            let result = self.run_one(hook, ctx, None).await;
            let rejected = !result.accepted;
            results.push(result);
            if rejected {
                let last = results.last().unwrap();
                return Err(GitError::HookRejected(
                    last.hook_id.clone(),
                    last.message.clone().unwrap_or_default(),
                ));
            }
        }
        Ok(results)
    }

    /// Update hooks run sequentially, once per ref, in registration/priority order.
    pub async fn run_update(
        &self,
        ctx: &HookContext,
        command: &HookCommand,
    ) -> Result<Vec<HookResult>, GitError> {
        let single_ctx = HookContext {
            repository: ctx.repository.clone(),
            commands: vec![command.clone()],
            env: ctx.env.clone(),
        };
        let mut results = Vec::new();
        for hook in self.ordered(HookPoint::Update) {
            let result = self.run_one(hook, &single_ctx, Some(&command.ref_name)).await;
            let rejected = !result.accepted;
            results.push(result);
            if rejected {
                let last = results.last().unwrap();
                return Err(GitError::HookRejected(
                    last.hook_id.clone(),
                    last.message.clone().unwrap_or_default(),
                ));
            }
        }
        Ok(results)
    }

    /// Post-receive/post-update hooks are notifications: they run in parallel and their
    /// individual failures are reported but never block the push (already committed).
    pub async fn run_post_receive(&self, ctx: &HookContext) -> Vec<HookResult> {
        self.run_parallel(HookPoint::PostReceive, ctx, None).await
    }

    pub async fn run_post_update(&self, ctx: &HookContext, ref_name: &str) -> Vec<HookResult> {
        self.run_parallel(HookPoint::PostUpdate, ctx, Some(ref_name)).await
    }

    async fn run_parallel(
        &self,
        point: HookPoint,
        ctx: &HookContext,
        ref_name: Option<&str>,
    ) -> Vec<HookResult> {
        let hooks = self.ordered(point);
        let futures = hooks.into_iter().map(|hook| self.run_one(hook, ctx, ref_name));
        futures::future::join_all(futures).await
    }

    async fn run_one(&self, hook: &Hook, ctx: &HookContext, ref_name: Option<&str>) -> HookResult {
        let outcome = timeout(hook.timeout, self.dispatch(hook, ctx, ref_name)).await;
        match outcome {
            Ok(Ok(())) => HookResult { hook_id: hook.id.clone(), accepted: true, message: None },
            Ok(Err(message)) => {
                HookResult { hook_id: hook.id.clone(), accepted: false, message: Some(message) }
            }
            Err(_) => HookResult {
                hook_id: hook.id.clone(),
                accepted: false,
                message: Some(format!("hook `{}` timed out after {:?}", hook.id, hook.timeout)),
            },
        }
    }

    async fn dispatch(
        &self,
        hook: &Hook,
        ctx: &HookContext,
        ref_name: Option<&str>,
    ) -> Result<(), String> {
        match &hook.kind {
            HookKind::Function(handler) => handler.run(ctx).await,
            HookKind::Webhook(spec) => self.dispatch_webhook(hook, spec, ctx, ref_name).await,
        }
    }

    async fn dispatch_webhook(
        &self,
        hook: &Hook,
        spec: &WebhookSpec,
        ctx: &HookContext,
        ref_name: Option<&str>,
    ) -> Result<(), String> {
        let client = self.client.clone();
        let payload = WebhookPayload {
            hook: &hook.id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            repository: &ctx.repository,
            commands: &ctx.commands,
            ref_name,
            env: &ctx.env,
        };
        let body = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;

        let retry = spec.retry.unwrap_or_default();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = client
                .request(
                    spec.method.parse().unwrap_or(reqwest::Method::POST),
                    spec.url.as_str(),
                )
                .header("Content-Type", "application/json")
                .header("X-Hook-Point", point_header(hook.point));
            for (key, value) in &spec.headers {
                request = request.header(key, value);
            }
            if let Some(secret) = &spec.secret {
                let signature = sign(secret, &body);
                request = request.header("X-Webhook-Signature", format!("sha256={signature}"));
            }

            let result = request.body(body.clone()).send().await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_client_error() => {
                    return Err(format!("webhook returned {}", response.status()));
                }
                Ok(response) => {
                    if attempt >= retry.max_attempts {
                        return Err(format!("webhook returned {}", response.status()));
                    }
                }
                Err(e) => {
                    if attempt >= retry.max_attempts {
                        return Err(e.to_string());
                    }
                }
            }
            let delay = retry.base_delay.mul_f64(retry.backoff.powi(attempt as i32 - 1));
            tokio::time::sleep(delay).await;
        }
    }
}

fn point_header(point: HookPoint) -> &'static str {
    match point {
        HookPoint::PreReceive => "pre-receive",
        HookPoint::Update => "update",
        HookPoint::PostReceive => "post-receive",
        HookPoint::PostUpdate => "post-update",
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body);
    hex::encode(tag.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> HookContext {
        HookContext {
            repository: "acme/widgets".to_string(),
            commands: vec![HookCommand {
                ref_name: "refs/heads/main".to_string(),
                old_sha: "0".repeat(40),
                new_sha: "1".repeat(40),
            }],
            env: HashMap::new(),
        }
    }

    struct Rejecting;
    #[async_trait]
    impl HookHandler for Rejecting {
        async fn run(&self, _ctx: &HookContext) -> Result<(), String> {
            Err("denied by policy".to_string())
        }
    }

    struct Accepting;
    #[async_trait]
    impl HookHandler for Accepting {
        async fn run(&self, _ctx: &HookContext) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pre_receive_short_circuits_on_first_rejection() {
        let mut registry = HookRegistry::new();
        registry.register(Hook {
            id: "reject".to_string(),
            point: HookPoint::PreReceive,
            priority: 0,
            timeout: Duration::from_secs(1),
            enabled: true,
            kind: HookKind::Function(Arc::new(Rejecting)),
        });
        registry.register(Hook {
            id: "never-runs".to_string(),
            point: HookPoint::PreReceive,
            priority: 1,
            timeout: Duration::from_secs(1),
            enabled: true,
            kind: HookKind::Function(Arc::new(Accepting)),
        });
        let err = registry.run_pre_receive(&ctx()).await.unwrap_err();
        assert!(matches!(err, GitError::HookRejected(_, _)));
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped() {
        let mut registry = HookRegistry::new();
        registry.register(Hook {
            id: "off".to_string(),
            point: HookPoint::PreReceive,
            priority: 0,
            timeout: Duration::from_secs(1),
            enabled: false,
            kind: HookKind::Function(Arc::new(Rejecting)),
        });
        assert!(registry.run_pre_receive(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn hook_timeout_is_reported_as_rejection() {
        struct Slow;
        #[async_trait]
        impl HookHandler for Slow {
            async fn run(&self, _ctx: &HookContext) -> Result<(), String> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }
        let mut registry = HookRegistry::new();
        registry.register(Hook {
            id: "slow".to_string(),
            point: HookPoint::PreReceive,
            priority: 0,
            timeout: Duration::from_millis(5),
            enabled: true,
            kind: HookKind::Function(Arc::new(Slow)),
        });
        let err = registry.run_pre_receive(&ctx()).await.unwrap_err();
        assert!(matches!(err, GitError::HookRejected(_, _)));
    }

    #[tokio::test]
    async fn webhook_dispatch_posts_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("X-Webhook-Signature"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut registry = HookRegistry::new();
        registry.register(Hook {
            id: "notify".to_string(),
            point: HookPoint::PostReceive,
            priority: 0,
            timeout: Duration::from_secs(2),
            enabled: true,
            kind: HookKind::Webhook(WebhookSpec {
                url: format!("{}/hook", server.uri()),
                method: "POST".to_string(),
                headers: vec![],
                secret: Some("s3cret".to_string()),
                retry: None,
            }),
        });
        let results = registry.run_post_receive(&ctx()).await;
        assert!(results[0].accepted);
    }

    #[tokio::test]
    async fn webhook_does_not_retry_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let mut registry = HookRegistry::new();
        registry.register(Hook {
            id: "notify".to_string(),
            point: HookPoint::PostReceive,
            priority: 0,
            timeout: Duration::from_secs(2),
            enabled: true,
            kind: HookKind::Webhook(WebhookSpec {
                url: format!("{}/hook", server.uri()),
                method: "POST".to_string(),
                headers: vec![],
                secret: None,
                retry: Some(RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), backoff: 2.0 }),
            }),
        });
        let results = registry.run_post_receive(&ctx()).await;
        assert!(!results[0].accepted);
    }
}
