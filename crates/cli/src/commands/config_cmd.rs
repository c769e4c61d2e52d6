//! `lorekeep config`: Configuration management commands.

use crate::inputs::CliResult;
use lorekeep_config::AppConfig;

pub async fn validate() -> CliResult<()> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if config.budget.hard_limit < 2000 {
                warnings.push("budget.hard_limit below 2000 leaves little room for facts");
            }
            if config.generation.parse_retries == 0 {
                warnings.push("generation.parse_retries = 0: one malformed reply fails the run");
            }
            if config.guards.high_impact.is_empty() {
                warnings.push("guards.high_impact is empty: the limiter guard checks nothing");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            let registry = config.registry();
            println!();
            println!("   Budget:    {} chars, up to {} chunks", config.budget.hard_limit, config.budget.max_chunks);
            println!("   Storage:   {} ({})", config.storage.backend, config.storage_path().display());
            println!("   Versions:  {} → {}", registry.versions.field, registry.versions.canonical.join(" < "));
            println!("   Bounds:    {} rule(s)", registry.bounds.rules.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> CliResult<()> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn default() -> CliResult<()> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn path() -> CliResult<()> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use lorekeep_config::AppConfig;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".lorekeep"));
    }

    #[test]
    fn default_toml_round_trips() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.budget.hard_limit, 8000);
    }
}
