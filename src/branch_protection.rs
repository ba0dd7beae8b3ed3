//! Glob-matched branch protection rules evaluated against each ref-update command before it is
//! allowed to apply.

use serde::{Deserialize, Serialize};

/// A single branch protection rule: a glob pattern plus the constraints it enforces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BranchProtectionRule {
    pub pattern: String,
    #[serde(default)]
    pub block_force_push: bool,
    #[serde(default)]
    pub block_deletion: bool,
    #[serde(default)]
    pub lock_branch: bool,
    #[serde(default)]
    pub require_linear_history: bool,
    #[serde(default)]
    pub required_reviews: u32,
    #[serde(default)]
    pub require_signed_commits: bool,
    #[serde(default)]
    pub required_status_checks: Vec<String>,
    #[serde(default)]
    pub require_up_to_date: bool,
    #[serde(default)]
    pub require_conversation_resolution: bool,
    #[serde(default)]
    pub bypass_admins: bool,
    #[serde(default)]
    pub bypass_users: Vec<String>,
    #[serde(default)]
    pub bypass_teams: Vec<String>,
    #[serde(default)]
    pub custom_message: Option<String>,
}

/// The update kind a command represents, as needed to evaluate force-push/deletion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    FastForwardUpdate,
    NonFastForwardUpdate,
    Delete,
}

/// Facts about the pushing actor and the current state of checks, gathered by the caller before
/// invoking [`evaluate`].
#[derive(Debug, Clone, Default)]
pub struct PushContext {
    pub is_admin: bool,
    pub user: String,
    pub teams: Vec<String>,
    pub reviews_satisfied: bool,
    pub commits_signed: bool,
    pub status_checks_passed: bool,
    pub up_to_date: bool,
    pub conversations_resolved: bool,
}

/// Outcome of evaluating one ref name against a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected(String),
}

/// Select the matching rule with the highest specificity score, or `None` if no rule matches.
pub fn select_rule<'a>(rules: &'a [BranchProtectionRule], ref_name: &str) -> Option<&'a BranchProtectionRule> {
    rules
        .iter()
        .filter(|rule| glob_match(&rule.pattern, ref_name))
        .max_by_key(|rule| specificity(&rule.pattern, ref_name))
}

/// Score a pattern's specificity against a concrete ref name: exact match wins outright,
/// otherwise longer patterns score higher and wildcards are penalized (`**` more than `*`).
fn specificity(pattern: &str, ref_name: &str) -> i64 {
    if pattern == ref_name {
        return i64::MAX;
    }
    let double_star_weight = pattern.matches("**").count() as i64;
    let single_star_weight =
        (pattern.matches('*').count() as i64) - 2 * double_star_weight + pattern.matches('?').count() as i64;
    pattern.len() as i64 * 10 - (double_star_weight * 100 + single_star_weight * 10)
}

/// Evaluate a ref-update command against the selected rule (or the configured default, which may
/// be `None` meaning "no protection").
///
/// Evaluation order: bypass -> lock -> deletion -> force-push -> reviews -> linear history ->
/// signed commits -> status checks -> up-to-date -> conversations. First failure wins.
pub fn evaluate(
    rule: Option<&BranchProtectionRule>,
    kind: CommandKind,
    ctx: &PushContext,
) -> Verdict {
    let Some(rule) = rule else {
        return Verdict::Allowed;
    };

    let bypassed = (rule.bypass_admins && ctx.is_admin)
        || rule.bypass_users.iter().any(|u| u == &ctx.user)
        || rule.bypass_teams.iter().any(|t| ctx.teams.contains(t));
    if bypassed {
        return Verdict::Allowed;
    }

    let reject = |default_reason: &str| {
        Verdict::Rejected(
            rule.custom_message
                .clone()
                .unwrap_or_else(|| default_reason.to_string()),
        )
    };

    if rule.lock_branch {
        return reject("Branch is locked");
    }

    if kind == CommandKind::Delete && rule.block_deletion {
        return reject("Deletion is not allowed");
    }

    if kind == CommandKind::NonFastForwardUpdate && rule.block_force_push {
        return reject("Force push is not allowed");
    }

    if rule.required_reviews > 0 && !ctx.reviews_satisfied {
        return reject("Required reviews are missing");
    }

    if rule.require_linear_history && kind == CommandKind::NonFastForwardUpdate {
        return reject("Linear history is required");
    }

    if rule.require_signed_commits && !ctx.commits_signed {
        return reject("Signed commits are required");
    }

    if !rule.required_status_checks.is_empty() && !ctx.status_checks_passed {
        return reject("Required status checks have not passed");
    }

    if rule.require_up_to_date && !ctx.up_to_date {
        return reject("Branch must be up to date before merging");
    }

    if rule.require_conversation_resolution && !ctx.conversations_resolved {
        return reject("Unresolved conversations must be resolved");
    }

    Verdict::Allowed
}

/// Glob match supporting `*` (within a path segment), `**` (across segments), and `?` (single
/// char), matched against `/`-separated ref names.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat_segments: Vec<&str> = pattern.split('/').collect();
    let text_segments: Vec<&str> = text.split('/').collect();
    match_segments(&pat_segments, &text_segments)
}

fn match_segments(pattern: &[&str], text: &[&str]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=text.len()).any(|i| match_segments(&pattern[1..], &text[i..]))
        }
        Some(seg) => {
            if text.is_empty() {
                return false;
            }
            segment_match(seg, text[0]) && match_segments(&pattern[1..], &text[1..])
        }
    }
}

fn segment_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    segment_match_rec(&p, &t)
}

fn segment_match_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            (0..=text.len()).any(|i| segment_match_rec(&pattern[1..], &text[i..]))
        }
        Some('?') => !text.is_empty() && segment_match_rec(&pattern[1..], &text[1..]),
        Some(c) => !text.is_empty() && text[0] == *c && segment_match_rec(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> BranchProtectionRule {
        BranchProtectionRule {
            pattern: pattern.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn glob_matches_star_and_double_star() {
        assert!(glob_match("refs/heads/*", "refs/heads/main"));
        assert!(!glob_match("refs/heads/*", "refs/heads/release/1.0"));
        assert!(glob_match("refs/heads/**", "refs/heads/release/1.0"));
        assert!(glob_match("refs/heads/rel?ase", "refs/heads/release"));
    }

    #[test]
    fn exact_match_outranks_glob() {
        let rules = vec![rule("refs/heads/*"), rule("refs/heads/main")];
        let selected = select_rule(&rules, "refs/heads/main").unwrap();
        assert_eq!(selected.pattern, "refs/heads/main");
    }

    #[test]
    fn force_push_blocked_on_main() {
        let mut r = rule("refs/heads/main");
        r.block_force_push = true;
        let ctx = PushContext::default();
        let verdict = evaluate(Some(&r), CommandKind::NonFastForwardUpdate, &ctx);
        assert!(matches!(verdict, Verdict::Rejected(msg) if msg.contains("Force push is not allowed")));
    }

    #[test]
    fn admin_bypass_allows_locked_branch() {
        let mut r = rule("refs/heads/main");
        r.lock_branch = true;
        r.bypass_admins = true;
        let ctx = PushContext {
            is_admin: true,
            ..Default::default()
        };
        assert_eq!(
            evaluate(Some(&r), CommandKind::FastForwardUpdate, &ctx),
            Verdict::Allowed
        );
    }

    #[test]
    fn no_matching_rule_is_allowed() {
        let rules = vec![rule("refs/heads/release/*")];
        assert!(select_rule(&rules, "refs/heads/main").is_none());
        assert_eq!(evaluate(None, CommandKind::Create, &PushContext::default()), Verdict::Allowed);
    }
}
