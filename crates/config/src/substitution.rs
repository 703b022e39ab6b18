use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use tracing::{debug, warn};

const ENV_PLACEHOLDER: &str = r"\$\{(\w+)\}|\$(\w+)";

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
///
/// Unset variables keep their placeholder so the validator can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(ENV_PLACEHOLDER).context("invalid placeholder pattern")?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &regex::Captures<'_>| {
        let var_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match env::var(var_name) {
            Ok(value) => {
                debug!(var = var_name, "Substituting environment variable");
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(?missing_vars, "Environment variables left unresolved");
    }

    Ok(result.into_owned())
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    Regex::new(ENV_PLACEHOLDER)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_set_variable() {
        env::set_var("MATCHD_TEST_REDIS_HOST", "10.0.0.7");
        let out = substitute_env_vars("host: ${MATCHD_TEST_REDIS_HOST}").unwrap();
        assert_eq!(out, "host: 10.0.0.7");
    }

    #[test]
    fn test_keeps_unset_placeholder() {
        let out = substitute_env_vars("host: ${MATCHD_TEST_DEFINITELY_UNSET}").unwrap();
        assert_eq!(out, "host: ${MATCHD_TEST_DEFINITELY_UNSET}");
        assert!(has_unresolved_env_vars(&out));
        assert!(!has_unresolved_env_vars("host: localhost"));
    }
}
