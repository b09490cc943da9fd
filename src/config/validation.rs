use crate::config::types::{
    Config, CrawlerConfig, HttpConfig, OutputConfig, SplitConfig, StoreConfig, WriterConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_http_config(&config.http)?;
    validate_writer_config(&config.writer)?;
    validate_split_config(&config.split)?;
    validate_store_config(&config.store)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 64 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation("page_size must be >= 1".to_string()));
    }

    if config.empty_threshold < 1 || config.stagnation_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "empty_threshold and stagnation_threshold must be >= 1, got {} and {}",
            config.empty_threshold, config.stagnation_threshold
        )));
    }

    if config.max_offset < config.page_size {
        return Err(ConfigError::Validation(format!(
            "max_offset ({}) must be at least one page ({})",
            config.max_offset, config.page_size
        )));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_writer_config(config: &WriterConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    if config.commit_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "commit_interval_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the split facet lists
fn validate_split_config(config: &SplitConfig) -> Result<(), ConfigError> {
    if config.sales_channels.is_empty() {
        return Err(ConfigError::Validation(
            "sales_channels must name at least the primary channel".to_string(),
        ));
    }

    if config.tokens.iter().any(|t| t.trim().is_empty()) || config.tokens.is_empty() {
        return Err(ConfigError::Validation(
            "tokens must be a non-empty list of non-blank tokens".to_string(),
        ));
    }

    validate_price_ranges(&config.price_ranges)
}

/// Price buckets must be non-empty, each `low < high`, and ascending without overlap
fn validate_price_ranges(ranges: &[[u64; 2]]) -> Result<(), ConfigError> {
    if ranges.is_empty() {
        return Err(ConfigError::Validation(
            "price_ranges cannot be empty".to_string(),
        ));
    }

    let mut previous_high: Option<u64> = None;
    for [low, high] in ranges {
        if low >= high {
            return Err(ConfigError::Validation(format!(
                "price range [{}, {}] is inverted or empty",
                low, high
            )));
        }

        if let Some(prev) = previous_high {
            if *low < prev {
                return Err(ConfigError::Validation(format!(
                    "price range [{}, {}] overlaps or precedes the previous range ending at {}",
                    low, high, prev
                )));
            }
        }
        previous_high = Some(*high);
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.code.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store code cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' must use http or https",
            config.base_url
        )));
    }

    if config.tree_depth < 1 {
        return Err(ConfigError::Validation(
            "tree_depth must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
