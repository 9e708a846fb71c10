//! Interception rules, mock endpoints, and the dispatch decision.
//!
//! Matching is deliberately dumb and deterministic: first match in
//! declaration order wins, and a mock with a matching url+method shadows
//! every rule. The decision itself is a pure function so it can be tested
//! without a browser.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wildmatch::WildMatch;

/// Where in the exchange a pause happens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptStage {
    Request,
    Response,
}

impl InterceptStage {
    /// Value for CDP `Fetch.RequestPattern.requestStage`.
    pub fn cdp_stage(&self) -> &'static str {
        match self {
            InterceptStage::Request => "Request",
            InterceptStage::Response => "Response",
        }
    }
}

/// Glob match over a URL. CDP's own `urlPattern` treats `*` as "anything",
/// so `**` collapses to `*` before matching.
pub fn glob_match(pattern: &str, url: &str) -> bool {
    let mut collapsed = pattern.to_string();
    while collapsed.contains("**") {
        collapsed = collapsed.replace("**", "*");
    }
    WildMatch::new(&collapsed).matches(url)
}

/// Header edits applied to a forwarded request or response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HeaderPatch {
    #[serde(default)]
    pub add: Vec<(String, String)>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl HeaderPatch {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply to a header list, case-insensitively on names. Added headers
    /// override existing ones of the same name.
    pub fn apply(&self, headers: &mut Vec<(String, String)>) {
        headers.retain(|(name, _)| {
            !self.remove.iter().any(|r| r.eq_ignore_ascii_case(name))
                && !self.add.iter().any(|(a, _)| a.eq_ignore_ascii_case(name))
        });
        headers.extend(self.add.iter().cloned());
    }
}

/// Payload of a `modify` action.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Modification {
    #[serde(default)]
    pub headers: HeaderPatch,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_replacements: Vec<(String, String)>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RuleAction {
    Observe,
    Modify(Modification),
    Fail { reason: String },
    Delay { ms: u64 },
    Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterceptRule {
    pub id: String,
    pub pattern: String,
    pub stage: InterceptStage,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub action: RuleAction,
}

impl InterceptRule {
    pub fn new(pattern: &str, stage: InterceptStage, action: RuleAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pattern: pattern.to_string(),
            stage,
            method: None,
            resource_type: None,
            action,
        }
    }

    pub fn matches(
        &self,
        url: &str,
        method: &str,
        resource_type: Option<&str>,
        stage: InterceptStage,
    ) -> bool {
        if self.stage != stage {
            return false;
        }
        if let Some(want) = &self.method {
            if want != "*" && !want.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(want) = &self.resource_type {
            let got = resource_type.unwrap_or("");
            if !want.eq_ignore_ascii_case(got) {
                return false;
            }
        }
        glob_match(&self.pattern, url)
    }
}

/// A rule that fulfills matching requests locally, never touching the
/// network. Lives in its own table because it shadows every rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MockEndpoint {
    pub id: String,
    pub url_pattern: String,
    #[serde(default)]
    pub method: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub calls: u64,
}

impl MockEndpoint {
    pub fn matches(&self, url: &str, method: &str) -> bool {
        if let Some(want) = &self.method {
            if want != "*" && !want.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        glob_match(&self.url_pattern, url)
    }
}

/// A paused exchange as the decision sees it.
#[derive(Clone, Copy, Debug)]
pub struct PauseView<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub resource_type: Option<&'a str>,
    pub stage: InterceptStage,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Serve the mock at this index; nothing goes upstream.
    Mock(usize),
    /// Apply the rule at this index.
    Rule(usize),
    /// Nothing matched (or an observe rule did) and the context
    /// auto-continues.
    AutoContinue,
    /// Leave the request parked for the caller; the watchdog drains it if
    /// nobody does.
    Park,
}

/// Mocks shadow rules; rules are first-match-wins in declaration order;
/// observe falls through to the context's auto-continue policy.
pub fn decide(
    rules: &[InterceptRule],
    mocks: &[MockEndpoint],
    view: PauseView<'_>,
    auto_continue: bool,
) -> Decision {
    if view.stage == InterceptStage::Request {
        if let Some(idx) = mocks.iter().position(|m| m.matches(view.url, view.method)) {
            return Decision::Mock(idx);
        }
    }

    let matched = rules
        .iter()
        .position(|r| r.matches(view.url, view.method, view.resource_type, view.stage));

    match matched {
        Some(idx) if !matches!(rules[idx].action, RuleAction::Observe) => Decision::Rule(idx),
        _ if auto_continue => Decision::AutoContinue,
        _ => Decision::Park,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pause(url: &str, stage: InterceptStage) -> PauseView<'_> {
        PauseView {
            url,
            method: "GET",
            resource_type: Some("xhr"),
            stage,
        }
    }

    fn mock(pattern: &str) -> MockEndpoint {
        MockEndpoint {
            id: "m".into(),
            url_pattern: pattern.into(),
            method: None,
            status: 200,
            headers: vec![],
            body: "{}".into(),
            latency_ms: 0,
            calls: 0,
        }
    }

    #[test]
    fn double_star_globs_cross_path_segments() {
        assert!(glob_match("**/api/**", "https://example.com/api/users"));
        assert!(glob_match("*api.example.com/users*", "https://api.example.com/users?id=1"));
        assert!(!glob_match("**/api/**", "https://example.com/assets/app.js"));
    }

    #[test]
    fn mock_shadows_a_matching_modify_rule() {
        let rules = vec![InterceptRule::new(
            "*api*",
            InterceptStage::Request,
            RuleAction::Modify(Modification::default()),
        )];
        let mocks = vec![mock("*api*")];
        let decision = decide(
            &rules,
            &mocks,
            pause("https://api.example.com/users", InterceptStage::Request),
            true,
        );
        assert_eq!(decision, Decision::Mock(0));
    }

    #[test]
    fn mocks_do_not_apply_at_the_response_stage() {
        let mocks = vec![mock("*")];
        let decision = decide(
            &[],
            &mocks,
            pause("https://example.com/", InterceptStage::Response),
            false,
        );
        assert_eq!(decision, Decision::Park);
    }

    #[test]
    fn first_matching_rule_wins_in_declaration_order() {
        let rules = vec![
            InterceptRule::new("*users*", InterceptStage::Request, RuleAction::Block),
            InterceptRule::new(
                "*users*",
                InterceptStage::Request,
                RuleAction::Fail {
                    reason: "Aborted".into(),
                },
            ),
        ];
        let decision = decide(
            &rules,
            &[],
            pause("https://x.test/users", InterceptStage::Request),
            true,
        );
        assert_eq!(decision, Decision::Rule(0));
    }

    #[test]
    fn observe_rules_defer_to_the_auto_continue_policy() {
        let rules = vec![InterceptRule::new(
            "*",
            InterceptStage::Request,
            RuleAction::Observe,
        )];
        let view = pause("https://x.test/", InterceptStage::Request);
        assert_eq!(decide(&rules, &[], view, true), Decision::AutoContinue);
        assert_eq!(decide(&rules, &[], view, false), Decision::Park);
    }

    #[test]
    fn method_and_resource_filters_narrow_a_rule() {
        let mut rule = InterceptRule::new("*", InterceptStage::Request, RuleAction::Block);
        rule.method = Some("POST".into());
        assert!(!rule.matches("https://x.test", "GET", None, InterceptStage::Request));
        assert!(rule.matches("https://x.test", "post", None, InterceptStage::Request));

        rule.method = None;
        rule.resource_type = Some("document".into());
        assert!(!rule.matches("https://x.test", "GET", Some("xhr"), InterceptStage::Request));
        assert!(rule.matches("https://x.test", "GET", Some("Document"), InterceptStage::Request));
    }

    #[test]
    fn header_patch_overrides_and_removes_case_insensitively() {
        let mut headers = vec![
            ("Cookie".to_string(), "auth=1".to_string()),
            ("X-Drop".to_string(), "yes".to_string()),
            ("x-test".to_string(), "old".to_string()),
        ];
        let patch = HeaderPatch {
            add: vec![("X-Test".to_string(), "1".to_string())],
            remove: vec!["x-drop".to_string()],
        };
        patch.apply(&mut headers);
        assert!(headers.iter().any(|(n, v)| n == "Cookie" && v == "auth=1"));
        assert!(headers.iter().any(|(n, v)| n == "X-Test" && v == "1"));
        assert!(!headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("x-drop")));
        assert_eq!(
            headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("x-test"))
                .count(),
            1
        );
    }
}
