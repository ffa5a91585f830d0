use tether_domain::config::{Config, ConfigSeverity};

/// Validate the config, printing any issues.  Returns `false` when at least
/// one error-severity issue was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Render the resolved config (with all defaults filled in) as TOML.
pub fn render(config: &Config) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default(), "tether.toml"));
    }

    #[test]
    fn zero_grace_period_fails_validation() {
        let mut config = Config::default();
        config.session.grace_period_ms = 0;
        assert!(!validate(&config, "tether.toml"));
    }

    #[test]
    fn render_includes_every_section() {
        let out = render(&Config::default()).unwrap();
        for section in ["[server]", "[session]", "[client]", "[observability]"] {
            assert!(out.contains(section), "missing {section}");
        }
    }
}
