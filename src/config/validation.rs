use crate::config::types::{
    ClassifyConfig, Config, CrawlerConfig, ExtractConfig, FrontierConfig, FrontierMode,
    IdentityConfig, SeedConfig, SigningConfig, TargetConfig,
};
use crate::signing::mixin_key;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_seed_config(&config.seed, &config.target, config.frontier.mode)?;
    validate_target_config(&config.target, config.signing.as_ref())?;
    validate_classify_config(&config.classify)?;
    validate_extract_config(&config.extract)?;
    validate_identity_config(&config.identity)?;
    if let Some(signing) = &config.signing {
        validate_signing_config(signing)?;
    }
    validate_frontier_config(&config.frontier)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates worker pool configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1024 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1024, got {}",
            config.concurrency
        )));
    }

    if config.worker_count() < 1 {
        return Err(ConfigError::Validation(
            "workers must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_ms ({}) cannot exceed max_backoff_ms ({})",
            config.backoff_ms, config.max_backoff_ms
        )));
    }

    if config.sink_buffer < 1 {
        return Err(ConfigError::Validation(
            "sink_buffer must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates seed sources
///
/// A shared-mode consumer may run without seeds; every other run needs at
/// least one source.
fn validate_seed_config(
    seed: &SeedConfig,
    target: &TargetConfig,
    mode: FrontierMode,
) -> Result<(), ConfigError> {
    let has_seeds = !seed.urls.is_empty() || seed.range.is_some() || seed.pages.is_some();
    if !has_seeds && mode == FrontierMode::Local {
        return Err(ConfigError::Validation(
            "[seed] must define urls, range or pages".to_string(),
        ));
    }

    if let Some(range) = &seed.range {
        if range.start > range.end {
            return Err(ConfigError::Validation(format!(
                "seed range start ({}) is greater than end ({})",
                range.start, range.end
            )));
        }

        if target.url_template.is_none() {
            return Err(ConfigError::Validation(
                "an ID range needs [target] url-template".to_string(),
            ));
        }
    }

    if let Some(pages) = &seed.pages {
        if !pages.template.contains("{}") {
            return Err(ConfigError::Validation(format!(
                "page template '{}' must contain '{{}}'",
                pages.template
            )));
        }
        if pages.count < 1 {
            return Err(ConfigError::Validation(
                "page count must be >= 1".to_string(),
            ));
        }
        if pages.first.checked_add(pages.count).is_none() {
            return Err(ConfigError::Validation(format!(
                "{} pages from {} run past the largest page number",
                pages.count, pages.first
            )));
        }
        validate_http_url(&pages.template.replace("{}", "1"), "page template")?;
    }

    for url in &seed.urls {
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "seed entries cannot be empty".to_string(),
            ));
        }
        if url.contains("://") {
            validate_http_url(url, "seed URL")?;
        } else if target.url_template.is_none() {
            return Err(ConfigError::Validation(format!(
                "seed '{}' is not a URL and [target] url-template is unset",
                url
            )));
        }
    }

    Ok(())
}

/// Validates request construction settings
fn validate_target_config(
    config: &TargetConfig,
    signing: Option<&SigningConfig>,
) -> Result<(), ConfigError> {
    if let Some(template) = &config.url_template {
        validate_http_url(&template.replace("{}", "0"), "url-template")?;

        if !template.contains("{}") && config.id_param.is_none() {
            return Err(ConfigError::Validation(format!(
                "url-template '{}' has no '{{}}' placeholder, so id-param must be set",
                template
            )));
        }
    }

    if let Some(param) = &config.id_param {
        if param.is_empty() {
            return Err(ConfigError::Validation(
                "id-param cannot be empty".to_string(),
            ));
        }
    }

    if config.sign && signing.is_none() {
        return Err(ConfigError::Validation(
            "[target] sign = true requires a [signing] section".to_string(),
        ));
    }

    Ok(())
}

fn validate_classify_config(config: &ClassifyConfig) -> Result<(), ConfigError> {
    if let Some(pointer) = &config.code_pointer {
        validate_json_pointer(pointer, "code-pointer")?;
    }
    Ok(())
}

fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    let pointers = [
        (&config.record_pointer, "record-pointer"),
        (&config.discover_pointer, "discover-pointer"),
        (&config.discover_item_pointer, "discover-item-pointer"),
        (&config.next_pointer, "next-pointer"),
    ];
    for (pointer, name) in pointers {
        if let Some(pointer) = pointer {
            validate_json_pointer(pointer, name)?;
        }
    }

    if config.discover_item_pointer.is_some() && config.discover_pointer.is_none() {
        return Err(ConfigError::Validation(
            "discover-item-pointer requires discover-pointer".to_string(),
        ));
    }

    for (template, name) in [
        (&config.discover_template, "discover-template"),
        (&config.next_template, "next-template"),
    ] {
        if let Some(template) = template {
            if !template.contains("{}") {
                return Err(ConfigError::Validation(format!(
                    "{} '{}' must contain '{{}}'",
                    name, template
                )));
            }
        }
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents cannot contain empty entries".to_string(),
        ));
    }

    for proxy in &config.proxies {
        if crate::identity::is_direct(proxy) {
            continue;
        }
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::Validation(format!(
                "Proxy '{}' must use http, https, socks5 or socks5h",
                proxy
            )));
        }
    }

    Ok(())
}

fn validate_signing_config(config: &SigningConfig) -> Result<(), ConfigError> {
    match (&config.img_key, &config.sub_key, &config.nav_url) {
        (Some(img_key), Some(sub_key), _) => {
            mixin_key(img_key, sub_key)
                .map_err(|e| ConfigError::Validation(format!("Invalid signing keys: {}", e)))?;
        }
        (None, None, Some(nav_url)) => validate_http_url(nav_url, "nav-url")?,
        (None, None, None) => {
            return Err(ConfigError::Validation(
                "[signing] needs img-key and sub-key, or nav-url".to_string(),
            ));
        }
        _ => {
            return Err(ConfigError::Validation(
                "img-key and sub-key must be set together".to_string(),
            ));
        }
    }

    if config.auth_failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "auth-failure-threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    if config.mode == FrontierMode::Shared {
        let url = Url::parse(&config.redis_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid redis-url '{}': {}", config.redis_url, e))
        })?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(ConfigError::Validation(format!(
                "redis-url '{}' must use the redis:// or rediss:// scheme",
                config.redis_url
            )));
        }
    }

    if config.queue_key.is_empty() || config.seen_key.is_empty() {
        return Err(ConfigError::Validation(
            "queue-key and seen-key cannot be empty".to_string(),
        ));
    }

    if config.queue_key == config.seen_key {
        return Err(ConfigError::Validation(
            "queue-key and seen-key must differ".to_string(),
        ));
    }

    if config.idle_poll_secs < 1 {
        return Err(ConfigError::Validation(
            "idle-poll-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &crate::config::types::OutputConfig) -> Result<(), ConfigError> {
    if config.records_path.is_empty() {
        return Err(ConfigError::Validation(
            "records_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(raw: &str, what: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            what, raw
        )));
    }

    Ok(())
}

fn validate_json_pointer(pointer: &str, what: &str) -> Result<(), ConfigError> {
    if !pointer.is_empty() && !pointer.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must be a JSON pointer starting with '/'",
            what, pointer
        )));
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    // Check if it's a wildcard pattern
    if let Some(domain) = pattern.strip_prefix("*.") {
        validate_domain_string(domain)?;
    } else {
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // Must contain at least one dot (e.g., example.com, not just "example")
    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{IdRange, OutputConfig, PageSeed};

    fn base_config() -> Config {
        Config {
            crawler: CrawlerConfig::default(),
            seed: SeedConfig {
                urls: vec!["https://example.com/".to_string()],
                ..Default::default()
            },
            target: TargetConfig::default(),
            classify: ClassifyConfig::default(),
            extract: ExtractConfig::default(),
            identity: IdentityConfig::default(),
            signing: None,
            frontier: FrontierConfig::default(),
            output: OutputConfig {
                records_path: "./records.jsonl".to_string(),
            },
        }
    }

    #[test]
    fn test_base_config_is_valid() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("sub.example.com").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern("example").is_err());
        assert!(validate_domain_pattern(".example.com").is_err());
        assert!(validate_domain_pattern("example.com.").is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = base_config();
        config.crawler.concurrency = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.crawler.concurrency = 2048;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backoff_cannot_exceed_cap() {
        let mut config = base_config();
        config.crawler.backoff_ms = 5_000;
        config.crawler.max_backoff_ms = 1_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_local_run_needs_seeds() {
        let mut config = base_config();
        config.seed = SeedConfig::default();
        assert!(validate(&config).is_err());

        // A shared-mode consumer drains what others push
        config.frontier.mode = FrontierMode::Shared;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_range_requires_template_and_order() {
        let mut config = base_config();
        config.seed.range = Some(IdRange { start: 1, end: 5 });
        assert!(validate(&config).is_err());

        config.target.url_template = Some("https://api.example.com/view?aid={}".to_string());
        assert!(validate(&config).is_ok());

        config.seed.range = Some(IdRange { start: 5, end: 1 });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_pages_template_needs_placeholder() {
        let mut config = base_config();
        config.seed.pages = Some(PageSeed {
            template: "https://example.com/list".to_string(),
            first: 1,
            count: 3,
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_pages_must_not_overflow() {
        let mut config = base_config();
        config.seed.pages = Some(PageSeed {
            template: "https://example.com/list?page={}".to_string(),
            first: u64::MAX,
            count: 2,
        });
        assert!(validate(&config).is_err());

        config.seed.pages = Some(PageSeed {
            template: "https://example.com/list?page={}".to_string(),
            first: u64::MAX - 2,
            count: 2,
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_range_up_to_u64_max_is_valid() {
        let mut config = base_config();
        config.target.url_template = Some("https://api.example.com/view?aid={}".to_string());
        config.seed.range = Some(IdRange {
            start: u64::MAX - 10,
            end: u64::MAX,
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_sign_requires_signing_section() {
        let mut config = base_config();
        config.target.sign = true;
        assert!(validate(&config).is_err());

        config.signing = Some(SigningConfig {
            img_key: Some("ab".repeat(16)),
            sub_key: Some("cd".repeat(16)),
            ..Default::default()
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_signing_rejects_short_or_partial_keys() {
        let mut config = base_config();
        config.signing = Some(SigningConfig {
            img_key: Some("abc".to_string()),
            sub_key: Some("def".to_string()),
            ..Default::default()
        });
        assert!(validate(&config).is_err());

        config.signing = Some(SigningConfig {
            img_key: Some("ab".repeat(16)),
            ..Default::default()
        });
        assert!(validate(&config).is_err());

        config.signing = Some(SigningConfig::default());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_proxy_schemes() {
        let mut config = base_config();
        config.identity.proxies = vec![
            "direct".to_string(),
            "socks5://127.0.0.1:1080".to_string(),
        ];
        assert!(validate(&config).is_ok());

        config.identity.proxies = vec!["ftp://127.0.0.1:21".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_json_pointers_must_be_rooted() {
        let mut config = base_config();
        config.extract.discover_pointer = Some("data/list".to_string());
        assert!(validate(&config).is_err());

        config.extract.discover_pointer = Some("/data/list".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_shared_frontier_needs_redis_url() {
        let mut config = base_config();
        config.frontier.mode = FrontierMode::Shared;
        config.frontier.redis_url = "http://127.0.0.1:6379".to_string();
        assert!(validate(&config).is_err());
    }
}
