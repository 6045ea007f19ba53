use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

/// Validate cross-field constraints serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    if config.orchestrator.max_concurrent_items == 0 {
        return invalid("orchestrator.max_concurrent_items must be at least 1");
    }
    if config.orchestrator.max_concurrent_generations == 0 {
        return invalid("orchestrator.max_concurrent_generations must be at least 1");
    }
    if config.orchestrator.min_score > 100 {
        return invalid("orchestrator.min_score must be within 0-100");
    }

    if config.pacing.min_delay_ms > config.pacing.max_delay_ms {
        return invalid(format!(
            "pacing.min_delay_ms ({}) exceeds pacing.max_delay_ms ({})",
            config.pacing.min_delay_ms, config.pacing.max_delay_ms
        ));
    }

    if config.pricing.min_price > config.pricing.max_price {
        return invalid(format!(
            "pricing.min_price ({}) exceeds pricing.max_price ({})",
            config.pricing.min_price, config.pricing.max_price
        ));
    }

    let tolerance = config.generation.tolerance;
    if !(tolerance > 0.0 && tolerance < 1.0) {
        return invalid(format!("generation.tolerance ({}) must be within (0, 1)", tolerance));
    }

    let threshold = config.originality.threshold;
    if !(0.0..=100.0).contains(&threshold) {
        return invalid(format!("originality.threshold ({}) must be within 0-100", threshold));
    }
    if config.originality.max_checks == 0 {
        return invalid("originality.max_checks must be at least 1");
    }
    if config.originality.excerpt_min_chars > config.originality.excerpt_max_chars {
        return invalid("originality.excerpt_min_chars exceeds originality.excerpt_max_chars");
    }

    if config.scheduler.daily_rollup_hour > 23 {
        return invalid("scheduler.daily_rollup_hour must be within 0-23");
    }

    if let Some(ref site) = config.site {
        if site.base_url.trim().is_empty() {
            return invalid("site.base_url cannot be empty");
        }
    }

    if config.reasoning.provider.requires_api_key() && config.reasoning.api_key.is_none() {
        return invalid(format!(
            "reasoning.api_key is required for provider {:?}",
            config.reasoning.provider
        ));
    }

    Ok(())
}
