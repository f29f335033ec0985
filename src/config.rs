use std::time::Duration;

use crate::analysis::ScorePolicy;
use crate::evaluation::EvaluatorSettings;

#[derive(Clone, Debug)]
pub struct Config {
    /// `None` runs against the in-process store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub analysis_api_url: String,
    pub analysis_timeout: Duration,
    /// Extra slack on top of `analysis_timeout` before an `evaluating`
    /// submission counts as stale.
    pub stale_margin: Duration,
    pub score_policy: ScorePolicy,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, Box<dyn std::error::Error + Send + Sync>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = var("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let analysis_api_url = var("ANALYSIS_API_URL")
            .or_else(|| var("ML_API_URL"))
            .unwrap_or_else(|| "http://localhost:8000".to_string());

        let analysis_timeout = Duration::from_secs(
            var("ANALYSIS_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );
        let stale_margin = Duration::from_secs(
            var("STALE_MARGIN_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        let score_policy = match var("SCORE_POLICY") {
            Some(v) => v.parse::<ScorePolicy>()?,
            None => ScorePolicy::default(),
        };

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = var("PORT").and_then(|v| v.parse().ok()).unwrap_or(5000);

        Ok(Self {
            database_url,
            database_max_connections,
            analysis_api_url,
            analysis_timeout,
            stale_margin,
            score_policy,
            host,
            port,
        })
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            stale_after: self.analysis_timeout + self.stale_margin,
            score_policy: self.score_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.analysis_api_url, "http://localhost:8000");
        assert_eq!(config.analysis_timeout, Duration::from_secs(30));
        assert_eq!(config.score_policy, ScorePolicy::PassThrough);
        assert_eq!(config.port, 5000);
        assert_eq!(
            config.evaluator_settings().stale_after,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://eval@localhost/eval"),
            ("ML_API_URL", "http://ml:9000"),
            ("ANALYSIS_TIMEOUT_SECS", "10"),
            ("STALE_MARGIN_SECS", "5"),
            ("SCORE_POLICY", "clamp"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://eval@localhost/eval"));
        assert_eq!(config.analysis_api_url, "http://ml:9000");
        assert_eq!(config.score_policy, ScorePolicy::Clamp);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.evaluator_settings().stale_after,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "http"), ("ANALYSIS_TIMEOUT_SECS", "-1")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.analysis_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_score_policy_is_an_error() {
        assert!(config_from(&[("SCORE_POLICY", "round")]).is_err());
    }
}
