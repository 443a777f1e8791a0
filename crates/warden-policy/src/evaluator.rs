//! Ordered, first-match-wins policy evaluator.
//!
//! [`PolicyEvaluator`] compiles a [`Policy`] once (rule regexes and tool
//! globs, content hash) and then evaluates prompt contexts without any I/O
//! or mutable state. Evaluation walks rules in declared order and stops at
//! the first rule whose every present criterion matches.

use regex::Regex;
use serde::Serialize;

use warden_types::{
    canonical_hash, Action, AutonomyMode, Confidence, Decision, DecisionReason, MatchedRule,
    Policy, PolicyRule, PromptEvent, PromptType, RiskAssessment, RiskCategory, WardenError,
};

use crate::risk::RiskClassifier;

/// Everything the evaluator looks at for one prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    pub prompt_text: String,
    pub prompt_type: PromptType,
    pub confidence: Confidence,
    pub tool_id: String,
    pub repo: String,
    pub session_tag: String,
    pub environment: String,
}

impl PromptContext {
    pub fn new(prompt_text: impl Into<String>, prompt_type: PromptType, confidence: Confidence) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            prompt_type,
            confidence,
            tool_id: String::new(),
            repo: String::new(),
            session_tag: String::new(),
            environment: String::new(),
        }
    }

    pub fn from_event(event: &PromptEvent) -> Self {
        Self {
            prompt_text: event.excerpt.clone(),
            prompt_type: event.prompt_type,
            confidence: event.confidence,
            tool_id: event.tool.clone(),
            repo: event.repo.clone(),
            session_tag: event.session_label.clone(),
            environment: event.environment.clone(),
        }
    }

    pub fn tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = tool_id.into();
        self
    }

    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    pub fn session_tag(mut self, tag: impl Into<String>) -> Self {
        self.session_tag = tag.into();
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

/// Line-by-line account of an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explanation {
    pub lines: Vec<String>,
}

impl Explanation {
    /// Number of lines reporting a rule match. Always 0 or 1.
    pub fn match_count(&self) -> usize {
        self.lines.iter().filter(|l| l.contains(": MATCH")).count()
    }
}

impl std::fmt::Display for Explanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PolicyRule,
    tool: Option<Regex>,
    command: Option<Regex>,
}

/// Compiled, immutable policy evaluator.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    policy: Policy,
    policy_hash: String,
    rules: Vec<CompiledRule>,
    risk: RiskClassifier,
}

impl PolicyEvaluator {
    /// Compile a policy. Invalid tool globs or command regexes are rejected
    /// here rather than silently never matching.
    pub fn new(policy: Policy) -> Result<Self, WardenError> {
        let policy_hash = policy_hash(&policy)?;
        let mut rules = Vec::with_capacity(policy.rules.len());
        for rule in &policy.rules {
            let tool = match rule.criteria.tool.as_deref() {
                None | Some("") | Some("*") => None,
                Some(glob) => Some(glob_to_regex(glob).map_err(|e| {
                    WardenError::PolicyError(format!("rule '{}': invalid tool glob: {e}", rule.name))
                })?),
            };
            let command = match rule.criteria.command_pattern.as_deref() {
                None | Some("") => None,
                Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                    WardenError::PolicyError(format!(
                        "rule '{}': invalid command pattern: {e}",
                        rule.name
                    ))
                })?),
            };
            rules.push(CompiledRule {
                rule: rule.clone(),
                tool,
                command,
            });
        }

        tracing::debug!(
            policy = %policy.name,
            rules = rules.len(),
            policy_hash = %policy_hash,
            "policy compiled"
        );

        Ok(Self {
            policy,
            policy_hash,
            rules,
            risk: RiskClassifier::new(),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// SHA-256 of the canonical policy encoding.
    pub fn policy_hash(&self) -> &str {
        &self.policy_hash
    }

    pub fn autonomy(&self) -> AutonomyMode {
        self.policy.autonomy
    }

    /// Evaluate a prompt context into a decision.
    pub fn evaluate(&self, ctx: &PromptContext) -> Decision {
        self.walk(ctx, None)
    }

    /// Evaluate and return a trace of which rules were considered.
    pub fn explain(&self, ctx: &PromptContext) -> (Decision, Explanation) {
        let mut lines = Vec::new();
        let decision = self.walk(ctx, Some(&mut lines));
        (decision, Explanation { lines })
    }

    /// Build a `require_human` decision without walking any rules.
    ///
    /// Used when the engine is paused or autonomy is off: hashes and risk
    /// are still recorded so the trace entry is comparable to evaluated ones.
    pub fn forced_human(&self, ctx: &PromptContext, reason: DecisionReason) -> Decision {
        Decision {
            matched_rule: None,
            action: Action::RequireHuman,
            reason,
            policy_hash: self.policy_hash.clone(),
            autonomy: self.policy.autonomy,
            idempotency_key: self.idempotency_key(ctx),
            risk: self.risk.classify(ctx),
        }
    }

    fn idempotency_key(&self, ctx: &PromptContext) -> String {
        #[derive(Serialize)]
        struct KeyInput<'a> {
            policy_hash: &'a str,
            context: &'a PromptContext,
        }
        canonical_hash(&KeyInput {
            policy_hash: &self.policy_hash,
            context: ctx,
        })
        .unwrap_or_else(|_| warden_types::sha256_hex(format!("{}{ctx:?}", self.policy_hash)))
    }

    fn walk(&self, ctx: &PromptContext, mut explain: Option<&mut Vec<String>>) -> Decision {
        let mut note = |line: String| {
            if let Some(lines) = explain.as_deref_mut() {
                lines.push(line);
            }
        };

        note(format!(
            "policy '{}' hash={} autonomy={} rules={}",
            self.policy.name,
            &self.policy_hash[..12.min(self.policy_hash.len())],
            self.policy.autonomy,
            self.rules.len()
        ));

        let mut matched: Option<(usize, &CompiledRule)> = None;
        for (index, compiled) in self.rules.iter().enumerate() {
            match compiled.mismatch(ctx) {
                Some(criterion) => note(format!(
                    "rule[{index}] {}: no match ({criterion})",
                    compiled.rule.name
                )),
                None => {
                    note(format!(
                        "rule[{index}] {}: MATCH -> {}",
                        compiled.rule.name, compiled.rule.action
                    ));
                    let remaining = self.rules.len() - index - 1;
                    note(format!("remaining {remaining} rule(s) not evaluated"));
                    matched = Some((index, compiled));
                    break;
                }
            }
        }

        let risk = self.risk.classify(ctx);

        let (matched_rule, action, reason) = match matched {
            Some((index, compiled)) => {
                let matched_rule = Some(MatchedRule {
                    index,
                    name: compiled.rule.name.clone(),
                });
                if ctx.confidence < self.policy.confidence_floor {
                    let action = Action::from(self.policy.defaults.low_confidence.clone());
                    note(format!(
                        "confidence {} below floor {} -> default low_confidence: {action}",
                        ctx.confidence, self.policy.confidence_floor
                    ));
                    (matched_rule, action, DecisionReason::LowConfidenceDefault)
                } else {
                    (
                        matched_rule,
                        compiled.rule.action.clone(),
                        DecisionReason::RuleMatch,
                    )
                }
            }
            None => {
                let action = Action::from(self.policy.defaults.no_match.clone());
                note(format!("no rule matched -> default no_match: {action}"));
                (None, action, DecisionReason::NoMatchDefault)
            }
        };

        let (action, reason) = self.gate_autonomy(action, reason, &risk);

        note(format!(
            "result: {action} reason={reason} risk={}({})",
            risk.category, risk.score
        ));

        Decision {
            matched_rule,
            action,
            reason,
            policy_hash: self.policy_hash.clone(),
            autonomy: self.policy.autonomy,
            idempotency_key: self.idempotency_key(ctx),
            risk,
        }
    }

    /// Apply the autonomy mode to a resolved action.
    fn gate_autonomy(
        &self,
        action: Action,
        reason: DecisionReason,
        risk: &RiskAssessment,
    ) -> (Action, DecisionReason) {
        match self.policy.autonomy {
            AutonomyMode::Off => (Action::RequireHuman, DecisionReason::AutonomyOff),
            AutonomyMode::Assist
                if action.is_auto_execution() && risk.category > RiskCategory::Low =>
            {
                (Action::RequireHuman, DecisionReason::AssistRequiresHuman)
            }
            AutonomyMode::Full
                if action.is_auto_execution() && risk.category == RiskCategory::Critical =>
            {
                (Action::RequireHuman, DecisionReason::RiskEscalation)
            }
            _ => (action, reason),
        }
    }
}

impl CompiledRule {
    /// The first criterion that fails, or `None` when the rule matches.
    fn mismatch(&self, ctx: &PromptContext) -> Option<&'static str> {
        let criteria = &self.rule.criteria;

        if !criteria.prompt_types.is_empty() && !criteria.prompt_types.contains(&ctx.prompt_type) {
            return Some("prompt_type");
        }
        if let Some(floor) = criteria.min_confidence {
            if ctx.confidence < floor {
                return Some("confidence");
            }
        }
        if let Some(re) = &self.tool {
            if !re.is_match(&ctx.tool_id) {
                return Some("tool");
            }
        }
        if let Some(repo) = non_empty(&criteria.repo) {
            if ctx.repo != repo {
                return Some("repo");
            }
        }
        if let Some(tag) = non_empty(&criteria.session_tag) {
            if ctx.session_tag.is_empty() || ctx.session_tag != tag {
                return Some("session_tag");
            }
        }
        if let Some(env) = non_empty(&criteria.environment) {
            if ctx.environment != env {
                return Some("environment");
            }
        }
        if let Some(re) = &self.command {
            if !re.is_match(&ctx.prompt_text) {
                return Some("command_pattern");
            }
        }
        None
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Translate a `*`/`?` glob into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// SHA-256 over the canonical JSON encoding of a policy.
pub fn policy_hash(policy: &Policy) -> Result<String, WardenError> {
    canonical_hash(policy)
}

/// One-shot evaluation: compile `policy` and evaluate `ctx`.
pub fn evaluate(policy: &Policy, ctx: &PromptContext) -> Result<Decision, WardenError> {
    Ok(PolicyEvaluator::new(policy.clone())?.evaluate(ctx))
}
