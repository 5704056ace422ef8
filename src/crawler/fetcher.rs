//! HTTP fetcher implementation
//!
//! This module turns a target into a request and the response into a
//! [`FetchOutcome`]:
//! - Building one HTTP client per proxy endpoint
//! - Resolving the request URL from the target and the `[target]` settings
//! - Attaching the request signature when required
//! - Classifying transport errors and responses

use crate::config::TargetConfig;
use crate::crawler::outcome::{Classifier, FetchOutcome};
use crate::frontier::Target;
use crate::identity::Identity;
use crate::signing::{canonical_query, SigningKeyPair};
use crate::TrawlError;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

/// Fetches one target with a given identity
///
/// Implementations never fail: every problem is folded into a
/// [`FetchOutcome`]. The caller bounds the call with its own timeout.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        target: &Target,
        identity: &Identity,
        keys: Option<&SigningKeyPair>,
    ) -> FetchOutcome;

    /// Returns true if requests must carry a signature
    fn requires_signing(&self) -> bool {
        false
    }
}

/// Builds an HTTP client for one proxy endpoint
///
/// The user agent is set per request, so the client carries none.
///
/// # Arguments
///
/// * `proxy` - Proxy URL, or `None` for a direct connection
/// * `timeout` - Whole-request timeout
pub fn build_http_client(proxy: Option<&str>, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .tcp_keepalive(Duration::from_secs(60))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// [`Fetcher`] backed by `reqwest`
pub struct HttpFetcher {
    clients: HashMap<Option<String>, Client>,
    target: TargetConfig,
    classifier: Classifier,
}

impl HttpFetcher {
    /// Creates a fetcher with one client per proxy endpoint
    ///
    /// # Arguments
    ///
    /// * `target` - How targets map to request URLs
    /// * `classifier` - Response classification rules
    /// * `proxies` - Every endpoint the rotator can hand out
    /// * `timeout` - Per-request timeout
    pub fn new(
        target: &TargetConfig,
        classifier: Classifier,
        proxies: &[Option<String>],
        timeout: Duration,
    ) -> Result<Self, TrawlError> {
        let mut clients = HashMap::new();
        for proxy in proxies {
            let client = build_http_client(proxy.as_deref(), timeout).map_err(|e| {
                TrawlError::FatalConfiguration(format!(
                    "cannot build HTTP client for proxy {:?}: {}",
                    proxy, e
                ))
            })?;
            clients.insert(proxy.clone(), client);
        }

        if clients.is_empty() {
            clients.insert(None, build_http_client(None, timeout)?);
        }

        Ok(Self {
            clients,
            target: target.clone(),
            classifier,
        })
    }

    /// Resolves the URL requested for `target`
    ///
    /// Absolute URL targets are used as-is; anything else is substituted into
    /// `url-template`. The id parameter, static parameters and (when signing)
    /// `wts`/`w_rid` are merged into the query.
    pub fn request_url(
        &self,
        target: &Target,
        keys: Option<&SigningKeyPair>,
        now: i64,
    ) -> Result<Url, FetchOutcome> {
        let raw = if target.is_url() {
            target.as_str().to_string()
        } else {
            match &self.target.url_template {
                Some(template) => template.replace("{}", target.as_str()),
                None => {
                    return Err(FetchOutcome::TransientError(format!(
                        "no url-template for target {}",
                        target
                    )))
                }
            }
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| FetchOutcome::TransientError(format!("invalid URL '{}': {}", raw, e)))?;

        let mut params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        params.extend(self.target.params.clone());
        if let Some(param) = &self.target.id_param {
            if !target.is_url() {
                params.insert(param.clone(), target.as_str().to_string());
            }
        }

        if self.target.sign {
            let keys = keys.ok_or_else(|| {
                FetchOutcome::FatalAuthError("no signing keys available".to_string())
            })?;
            let signed = keys
                .sign(&params, now)
                .map_err(|e| FetchOutcome::FatalAuthError(e.to_string()))?;
            url.set_query(Some(&canonical_query(&signed.params)));
        } else if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(&params);
        }

        Ok(url)
    }
}

/// Describes a transport error the way it is logged
fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_redirect() {
        "too many redirects".to_string()
    } else {
        e.to_string()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        target: &Target,
        identity: &Identity,
        keys: Option<&SigningKeyPair>,
    ) -> FetchOutcome {
        let url = match self.request_url(target, keys, chrono::Utc::now().timestamp()) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };

        let client = match self
            .clients
            .get(&identity.proxy)
            .or_else(|| self.clients.get(&None))
        {
            Some(client) => client,
            None => {
                return FetchOutcome::TransientError(format!(
                    "no client for proxy {:?}",
                    identity.proxy
                ))
            }
        };

        let response = match client
            .get(url.clone())
            .header(USER_AGENT, identity.user_agent.as_str())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return FetchOutcome::TransientError(describe_error(&e)),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        match response.text().await {
            Ok(body) => self.classifier.classify(status, &final_url, body),
            Err(e) => FetchOutcome::TransientError(describe_error(&e)),
        }
    }

    fn requires_signing(&self) -> bool {
        self.target.sign
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifyConfig;
    use crate::signing::sign;

    fn fetcher(target: TargetConfig) -> HttpFetcher {
        HttpFetcher::new(
            &target,
            Classifier::from_config(&ClassifyConfig::default()),
            &[None],
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        assert!(build_http_client(None, Duration::from_secs(1)).is_ok());
        assert!(build_http_client(Some("socks5://127.0.0.1:1080"), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_url_targets_are_used_verbatim() {
        let fetcher = fetcher(TargetConfig::default());
        let url = fetcher
            .request_url(&Target::new("https://example.com/a?b=1"), None, 0)
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/a?b=1");
    }

    #[test]
    fn test_id_targets_fill_template() {
        let fetcher = fetcher(TargetConfig {
            url_template: Some("https://api.example.com/item/{}".to_string()),
            ..Default::default()
        });
        let url = fetcher.request_url(&Target::from_id(42), None, 0).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/item/42");
    }

    #[test]
    fn test_id_param_and_static_params() {
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), "1".to_string());
        let fetcher = fetcher(TargetConfig {
            url_template: Some("https://api.example.com/view".to_string()),
            id_param: Some("aid".to_string()),
            params,
            sign: false,
        });

        let url = fetcher.request_url(&Target::from_id(7), None, 0).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/view?aid=7&type=1");
    }

    #[test]
    fn test_signed_url_carries_valid_signature() {
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), "1".to_string());
        let fetcher = fetcher(TargetConfig {
            url_template: Some("https://api.example.com/reply".to_string()),
            id_param: Some("oid".to_string()),
            params: params.clone(),
            sign: true,
        });
        let keys = SigningKeyPair::new("ab".repeat(16), "cd".repeat(16));

        let url = fetcher
            .request_url(&Target::from_id(1), Some(&keys), 1_000_000_000)
            .unwrap();

        let sent: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(sent["w_rid"], "b994d48d973f7434b1ce4507114bf050");
        assert_eq!(sent["wts"], "1000000000");

        params.insert("oid".to_string(), "1".to_string());
        let expected = sign(&params, &keys.img_key, &keys.sub_key, 1_000_000_000).unwrap();
        assert_eq!(sent, expected.params);
    }

    #[test]
    fn test_signing_without_keys_is_auth_error() {
        let fetcher = fetcher(TargetConfig {
            url_template: Some("https://api.example.com/view".to_string()),
            id_param: Some("aid".to_string()),
            sign: true,
            ..Default::default()
        });

        let result = fetcher.request_url(&Target::from_id(1), None, 0);
        assert!(matches!(result, Err(FetchOutcome::FatalAuthError(_))));
        assert!(fetcher.requires_signing());
    }

    #[test]
    fn test_non_url_target_without_template_is_transient() {
        let fetcher = fetcher(TargetConfig::default());
        let result = fetcher.request_url(&Target::from_id(1), None, 0);
        assert!(matches!(result, Err(FetchOutcome::TransientError(_))));
    }
}
