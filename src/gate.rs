//! Visibility gate
//!
//! Decides once per page load whether the overlay may run. Checks run in a fixed
//! order and the first rule that decides wins. Unmatched domains and branches are
//! allowed; anything that goes wrong during evaluation denies.

use serde::Serialize;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, error, info};

use crate::config::GatingConfig;
use crate::constants::{dev, pattern, pms};
use crate::context::ExecutionContext;
use crate::matcher::{PatternError, RuleMatcher, has_wildcard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GatingReason {
    DisabledGlobally,
    DomainDenied,
    UrlPatternMismatch,
    BranchDenied,
    /// Internal failure during evaluation, mapped to a denial
    EvaluationFailed,
    Allowed,
}

impl fmt::Display for GatingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GatingReason::DisabledGlobally => "disabled globally",
            GatingReason::DomainDenied => "domain denied",
            GatingReason::UrlPatternMismatch => "url pattern mismatch",
            GatingReason::BranchDenied => "branch denied",
            GatingReason::EvaluationFailed => "evaluation failed",
            GatingReason::Allowed => "allowed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatingDecision {
    pub allowed: bool,
    pub reason: GatingReason,
}

impl GatingDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: GatingReason::Allowed }
    }

    fn deny(reason: GatingReason) -> Self {
        Self { allowed: false, reason }
    }
}

pub struct VisibilityGate<'a> {
    config: &'a GatingConfig,
    context: &'a ExecutionContext,
    matcher: RuleMatcher,
}

impl<'a> VisibilityGate<'a> {
    pub fn new(config: &'a GatingConfig, context: &'a ExecutionContext) -> Self {
        Self {
            config,
            context,
            matcher: RuleMatcher::new(),
        }
    }

    /// Run the gating pipeline. Never panics and never returns an error.
    pub fn evaluate(&self) -> GatingDecision {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_checks()));
        let decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                error!(error = %e, "Visibility check failed, denying");
                GatingDecision::deny(GatingReason::EvaluationFailed)
            }
            Err(_) => {
                error!("Visibility check panicked, denying");
                GatingDecision::deny(GatingReason::EvaluationFailed)
            }
        };

        info!(
            host = %self.context.hostname,
            path = %self.context.path,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Visibility decision"
        );
        decision
    }

    fn run_checks(&self) -> Result<GatingDecision, PatternError> {
        if !self.config.enabled {
            return Ok(GatingDecision::deny(GatingReason::DisabledGlobally));
        }

        if self.is_development() {
            debug!(host = %self.context.hostname, "Development host, skipping checks");
            return Ok(GatingDecision::allow());
        }

        if !self.check_domain()? {
            return Ok(GatingDecision::deny(GatingReason::DomainDenied));
        }

        if !self.check_url_pattern()? {
            return Ok(GatingDecision::deny(GatingReason::UrlPatternMismatch));
        }

        if self.is_pms_environment() && self.config.pms.enabled && !self.check_branch()? {
            return Ok(GatingDecision::deny(GatingReason::BranchDenied));
        }

        Ok(GatingDecision::allow())
    }

    fn is_development(&self) -> bool {
        let host = self.context.hostname.as_str();
        dev::HOSTS.contains(&host)
            || host.ends_with(dev::LOCAL_SUFFIX)
            || self.context.port.as_deref() == Some(dev::PORT)
    }

    fn is_pms_environment(&self) -> bool {
        !self.config.pms.domain.is_empty() && self.context.hostname == self.config.pms.domain
    }

    fn check_domain(&self) -> Result<bool, PatternError> {
        let host = self.context.hostname.as_str();

        for range in &self.config.ip_ranges {
            if self.matcher.try_matches_prefix(host, range)? {
                debug!(host = %host, range = %range, "Host inside allowed ip range");
                return Ok(true);
            }
        }

        let domains = &self.config.domains;
        if domains.is_empty() {
            return Ok(true);
        }

        if let Some(allowed) = domains.get(host) {
            return Ok(allowed);
        }

        // Suffix match, declaration order
        for (domain, allowed) in domains.iter() {
            if host.len() > domain.len()
                && host.ends_with(domain)
                && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            {
                return Ok(allowed);
            }
        }

        Ok(true)
    }

    fn check_url_pattern(&self) -> Result<bool, PatternError> {
        let patterns = &self.config.url_patterns;
        if patterns.is_empty() {
            return Ok(true);
        }

        for p in patterns {
            if p == pattern::MATCH_ALL || self.matcher.try_matches(&self.context.path, p)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_branch(&self) -> Result<bool, PatternError> {
        let Some(branch) = extract_branch(&self.context.path) else {
            debug!(path = %self.context.path, "No branch in path, allowing");
            return Ok(true);
        };

        let branches = &self.config.pms.branches;
        if branches.is_empty() {
            return Ok(true);
        }

        if let Some(allowed) = branches.get(&branch) {
            debug!(branch = %branch, allowed, "Exact branch rule");
            return Ok(allowed);
        }

        for (p, allowed) in branches.iter() {
            if has_wildcard(p) && self.matcher.try_matches(&branch, p)? {
                debug!(branch = %branch, pattern = %p, allowed, "Wildcard branch rule");
                return Ok(allowed);
            }
        }

        Ok(true)
    }
}

/// Extract the branch from `/<group>/<project>/files/<branch>/...`, URL-decoded.
///
/// The first `files` segment preceded by two non-empty segments and followed by
/// a non-empty one is used. A branch with a malformed escape yields `None`.
pub fn extract_branch(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').collect();
    for i in 3..segments.len() {
        if segments[i] != pms::FILES_SEGMENT {
            continue;
        }
        let (group, project) = (segments[i - 2], segments[i - 1]);
        let Some(raw) = segments.get(i + 1).filter(|s| !s.is_empty()) else {
            continue;
        };
        if group.is_empty() || project.is_empty() {
            continue;
        }
        if has_malformed_escape(raw) {
            debug!(segment = %raw, "Branch segment has a malformed escape");
            return None;
        }
        return match urlencoding::decode(raw) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(e) => {
                debug!(segment = %raw, error = %e, "Branch segment is not valid UTF-8");
                None
            }
        };
    }
    None
}

/// `%` not followed by two hex digits
fn has_malformed_escape(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !matches!(
                bytes.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PmsConfig, RuleTable};

    fn config() -> GatingConfig {
        GatingConfig {
            url_patterns: Vec::new(),
            ..GatingConfig::default()
        }
    }

    fn ctx(host: &str, path: &str) -> ExecutionContext {
        ExecutionContext::new(host, path, None)
    }

    fn decide(config: &GatingConfig, context: &ExecutionContext) -> GatingDecision {
        VisibilityGate::new(config, context).evaluate()
    }

    fn pms_config(branches: RuleTable) -> GatingConfig {
        GatingConfig {
            pms: PmsConfig {
                enabled: true,
                domain: "pms.example.com".to_string(),
                branches,
            },
            ..config()
        }
    }

    #[test]
    fn test_disabled_globally_wins() {
        let mut c = config();
        c.enabled = false;
        c.domains.insert("localhost", true);
        let d = decide(&c, &ExecutionContext::new("localhost", "/", Some("8080")));
        assert_eq!(d, GatingDecision { allowed: false, reason: GatingReason::DisabledGlobally });
    }

    #[test]
    fn test_development_bypass() {
        let mut c = config();
        c.domains.insert("localhost", false);
        c.domains.insert("foo.local", false);
        c.domains.insert("any.com", false);
        c.url_patterns = vec!["/never".to_string()];

        for host in ["localhost", "127.0.0.1", "foo.local"] {
            let d = decide(&c, &ctx(host, "/page"));
            assert_eq!(d.reason, GatingReason::Allowed, "host {host}");
        }
        let d = decide(&c, &ExecutionContext::new("any.com", "/page", Some("8080")));
        assert!(d.allowed);
    }

    #[test]
    fn test_local_must_be_a_suffix() {
        let mut c = config();
        c.domains.insert("foo.local.example.com", false);
        let d = decide(&c, &ctx("foo.local.example.com", "/"));
        assert_eq!(d.reason, GatingReason::DomainDenied);
    }

    #[test]
    fn test_domain_exact_and_suffix() {
        let mut c = config();
        c.domains.insert("a.com", false);

        assert_eq!(decide(&c, &ctx("a.com", "/")).reason, GatingReason::DomainDenied);
        assert_eq!(decide(&c, &ctx("sub.a.com", "/")).reason, GatingReason::DomainDenied);
        assert!(decide(&c, &ctx("other.com", "/")).allowed);
        // Not a label boundary
        assert!(decide(&c, &ctx("xa.com", "/")).allowed);
    }

    #[test]
    fn test_exact_domain_beats_suffix() {
        let mut c = config();
        c.domains.insert("a.com", false);
        c.domains.insert("ok.a.com", true);
        assert!(decide(&c, &ctx("ok.a.com", "/")).allowed);
        assert!(!decide(&c, &ctx("deep.ok.a.com", "/")).allowed);
    }

    #[test]
    fn test_domain_suffix_first_declared_wins() {
        let mut c = config();
        c.domains.insert("b.a.com", true);
        c.domains.insert("a.com", false);
        assert!(decide(&c, &ctx("c.b.a.com", "/")).allowed);
    }

    #[test]
    fn test_ip_range_allows_before_domains() {
        let mut c = config();
        c.ip_ranges = vec!["192.168.".to_string()];
        c.domains.insert("192.168.0.5", false);
        assert!(decide(&c, &ctx("192.168.0.5", "/")).allowed);
        assert!(decide(&c, &ctx("10.0.0.1", "/")).allowed);
    }

    #[test]
    fn test_url_patterns() {
        let mut c = config();
        c.url_patterns = vec!["/qa/*".to_string(), "/review.html".to_string()];
        assert!(decide(&c, &ctx("x.com", "/qa/page")).allowed);
        assert!(decide(&c, &ctx("x.com", "/review.html")).allowed);
        assert_eq!(
            decide(&c, &ctx("x.com", "/prod/page")).reason,
            GatingReason::UrlPatternMismatch
        );

        c.url_patterns.push("*".to_string());
        assert!(decide(&c, &ctx("x.com", "/prod/page")).allowed);
    }

    #[test]
    fn test_empty_url_patterns_allow_all() {
        let c = config();
        assert!(decide(&c, &ctx("x.com", "/anything")).allowed);
    }

    #[test]
    fn test_extract_branch() {
        assert_eq!(
            extract_branch("/group/project/files/feature%2Fx/index.html"),
            Some("feature/x".to_string())
        );
        assert_eq!(extract_branch("/g/p/files/develop"), Some("develop".to_string()));
        assert_eq!(extract_branch("/g/p/files/"), None);
        assert_eq!(extract_branch("/files/develop/x"), None);
        assert_eq!(extract_branch("/g/p/other/develop"), None);
        assert_eq!(extract_branch("/g/p/files/%FF/x"), None);
    }

    #[test]
    fn test_extract_branch_malformed_escape_is_no_branch() {
        assert_eq!(extract_branch("/g/p/files/%ZZ/x"), None);
        assert_eq!(extract_branch("/g/p/files/release%2/x"), None);
        assert_eq!(extract_branch("/g/p/files/100%/x"), None);

        // No branch means branch rules do not apply
        let branches: RuleTable = [("*", false)].into_iter().collect();
        let page = ctx("pms.example.com", "/g/p/files/%ZZ/index.html");
        assert!(decide(&pms_config(branches), &page).allowed);
    }

    #[test]
    fn test_extract_branch_skips_files_segment_without_branch() {
        assert_eq!(extract_branch("/g/p/files//x/y/files/b"), Some("b".to_string()));
        assert_eq!(extract_branch("/files/x/g/p/files/main/a"), Some("main".to_string()));
    }

    #[test]
    fn test_branch_wildcard_and_default() {
        let branches: RuleTable = [("release/*", true), ("master", false)].into_iter().collect();
        let c = pms_config(branches);

        let release = ctx("pms.example.com", "/g/p/files/release%2Fv2/index.html");
        assert!(decide(&c, &release).allowed);

        let hotfix = ctx("pms.example.com", "/g/p/files/hotfix%2F1/index.html");
        assert!(decide(&c, &hotfix).allowed);

        let master = ctx("pms.example.com", "/g/p/files/master/index.html");
        assert_eq!(decide(&c, &master).reason, GatingReason::BranchDenied);
    }

    #[test]
    fn test_branch_exact_beats_wildcard() {
        let branches: RuleTable =
            [("feature/*", false), ("feature/keep", true)].into_iter().collect();
        let c = pms_config(branches);
        assert!(decide(&c, &ctx("pms.example.com", "/g/p/files/feature%2Fkeep/a")).allowed);
        assert!(!decide(&c, &ctx("pms.example.com", "/g/p/files/feature%2Fdrop/a")).allowed);
    }

    #[test]
    fn test_branch_first_wildcard_wins() {
        let branches: RuleTable = [("rel*", false), ("release/*", true)].into_iter().collect();
        let c = pms_config(branches);
        let d = decide(&c, &ctx("pms.example.com", "/g/p/files/release%2Fv2/a"));
        assert_eq!(d.reason, GatingReason::BranchDenied);
    }

    #[test]
    fn test_branch_check_only_on_pms_host() {
        let branches: RuleTable = [("master", false)].into_iter().collect();
        let c = pms_config(branches.clone());
        assert!(decide(&c, &ctx("other.example.com", "/g/p/files/master/a")).allowed);

        let mut disabled = pms_config(branches);
        disabled.pms.enabled = false;
        assert!(decide(&disabled, &ctx("pms.example.com", "/g/p/files/master/a")).allowed);
    }

    #[test]
    fn test_pattern_error_denies() {
        let mut c = config();
        c.url_patterns = vec!["x".repeat(pattern::MAX_LEN + 1)];
        let d = decide(&c, &ctx("x.com", "/"));
        assert_eq!(d, GatingDecision { allowed: false, reason: GatingReason::EvaluationFailed });
    }
}
