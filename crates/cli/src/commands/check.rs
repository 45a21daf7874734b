use app_utils::load_model;
use colored::*;
use std::path::Path;

pub fn run(model_path: &Path) -> anyhow::Result<()> {
    println!("{} {}", "Checking model:".bold(), model_path.display());

    let model = load_model(model_path)
        .map_err(|e| anyhow::anyhow!("Failed to load model: {}", e))?;

    for key in ["r", "r2"] {
        if let Some(def) = model.request_def(key) {
            println!(
                "  {} request {}: {}",
                "✓".green(),
                def.key(),
                def.attrs().join(", ")
            );
        }
    }
    for key in ["p", "p2"] {
        if let Some(section) = model.policy(key) {
            println!(
                "  {} policy {}: {}",
                "✓".green(),
                section.def().key(),
                section.def().attrs().join(", ")
            );
        }
    }
    for key in ["g", "g2"] {
        if let Some(section) = model.role(key) {
            println!(
                "  {} roles {}: {} columns",
                "✓".green(),
                section.def().key(),
                section.def().arity()
            );
        }
    }
    for key in ["e", "e2"] {
        if let Some(def) = model.effect(key) {
            println!("  {} effect {}: {}", "✓".green(), def.key(), def.expr());
        }
    }
    for key in ["m", "m2"] {
        if let Some(def) = model.matcher(key) {
            println!(
                "  {} matcher {} selects policy `{}`",
                "✓".green(),
                def.key(),
                def.policy_key()
            );
        }
    }

    let mut warnings = 0;
    if model.matcher("m").is_none() {
        println!("  {} no default matcher `m`", "⚠".yellow());
        warnings += 1;
    }
    if model.effect("e").is_none() {
        println!("  {} no default effect `e`", "⚠".yellow());
        warnings += 1;
    }

    println!();
    if warnings == 0 {
        println!("{} Model is valid!", "✓".green().bold());
    } else {
        println!(
            "{} Model is valid with {} warning(s)",
            "⚠".yellow().bold(),
            warnings
        );
    }

    Ok(())
}
