use app_utils::enforcer_from_files;
use colored::*;
use core_enforce::Value;
use std::path::Path;

fn request_values(request: &[String]) -> Vec<Value> {
    request.iter().map(|v| Value::from(v.as_str())).collect()
}

pub fn run(model_path: &Path, rule_path: &Path, request: &[String]) -> anyhow::Result<()> {
    let enforcer = enforcer_from_files(model_path, Some(rule_path))?;
    let allowed = enforcer.enforce(&request_values(request))?;

    if allowed {
        println!("{}", "ALLOW".green().bold());
    } else {
        println!("{}", "DENY".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

pub fn filter(model_path: &Path, rule_path: &Path, request: &[String]) -> anyhow::Result<()> {
    let enforcer = enforcer_from_files(model_path, Some(rule_path))?;
    let rules = enforcer.filter(&request_values(request))?;

    if rules.is_empty() {
        println!("{}", "no matching rules".dimmed());
        return Ok(());
    }
    for rule in rules {
        println!("{}", rule.join(", "));
    }
    Ok(())
}
