//! `warden policy`: validate, list, show, and explain policies.

use std::path::Path;

use anyhow::{Context, Result};

use warden_policy::builtin::{builtin_policy, get_builtin_policy, list_builtin_policies};
use warden_policy::{PolicyEvaluator, PromptContext};
use warden_types::{Confidence, Policy, PromptType, WardenConfig};

use crate::commands::config::parse_name;

/// Load from `--file`, else `--builtin`, else the configured policy path.
pub fn load_policy(
    config: &WardenConfig,
    file: Option<&Path>,
    builtin: Option<&str>,
) -> Result<Policy> {
    if let Some(path) = file {
        return Policy::load(path).with_context(|| format!("invalid policy {}", path.display()));
    }
    if let Some(name) = builtin {
        return builtin_policy(name).with_context(|| format!("invalid builtin policy {name}"));
    }
    Policy::load(&config.policy_path)
        .with_context(|| format!("invalid policy {}", config.policy_path.display()))
}

/// Parse, validate, and compile a policy.
pub fn check(config: &WardenConfig, file: Option<&Path>, builtin: Option<&str>) -> Result<()> {
    let policy = load_policy(config, file, builtin)?;
    let evaluator = PolicyEvaluator::new(policy).context("policy failed to compile")?;
    let policy = evaluator.policy();
    println!("Policy '{}' is valid.", policy.name);
    println!("  Autonomy:         {}", policy.autonomy);
    println!("  Confidence floor: {}", policy.confidence_floor);
    println!("  Rules:            {}", policy.rules.len());
    for (index, rule) in policy.rules.iter().enumerate() {
        println!("    [{index}] {} -> {}", rule.name, rule.action);
    }
    println!("  Hash:             {}", evaluator.policy_hash());
    Ok(())
}

pub fn list() {
    for name in list_builtin_policies() {
        println!("{name}");
    }
}

pub fn show(name: &str) -> Result<()> {
    let text = get_builtin_policy(name).with_context(|| {
        format!(
            "unknown builtin policy '{name}'; available: {}",
            list_builtin_policies().join(", ")
        )
    })?;
    print!("{}", text.trim_start());
    Ok(())
}

/// A prompt described on the command line.
#[derive(Debug, Clone, Default)]
pub struct PromptArgs {
    pub text: String,
    pub prompt_type: String,
    pub confidence: String,
    pub tool: Option<String>,
    pub repo: Option<String>,
    pub session_tag: Option<String>,
    pub environment: Option<String>,
}

impl PromptArgs {
    pub fn context(&self) -> Result<PromptContext> {
        let prompt_type: PromptType = parse_name(&self.prompt_type, "prompt type")?;
        let confidence: Confidence = parse_name(&self.confidence, "confidence")?;
        let mut ctx = PromptContext::new(&self.text, prompt_type, confidence);
        if let Some(tool) = &self.tool {
            ctx = ctx.tool(tool);
        }
        if let Some(repo) = &self.repo {
            ctx = ctx.repo(repo);
        }
        if let Some(tag) = &self.session_tag {
            ctx = ctx.session_tag(tag);
        }
        if let Some(env) = &self.environment {
            ctx = ctx.environment(env);
        }
        Ok(ctx)
    }
}

/// Explain which rule a prompt would hit, without acting on it.
pub fn explain(
    config: &WardenConfig,
    file: Option<&Path>,
    builtin: Option<&str>,
    prompt: &PromptArgs,
    json: bool,
) -> Result<()> {
    let evaluator = PolicyEvaluator::new(load_policy(config, file, builtin)?)?;
    let (decision, explanation) = evaluator.explain(&prompt.context()?);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "decision": decision,
                "explanation": explanation.lines,
            }))?
        );
    } else {
        print!("{explanation}");
    }
    Ok(())
}
