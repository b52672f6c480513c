use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::config::{AchConfig, AdminEnvConfig, DEFAULT_USER_AGENT};

/// Client for the stack's administrative endpoints, authenticated with
/// HTTP basic auth (`user:password` in `admin_auth`).
pub struct AdminClient {
    client: Client,
    admin_url: String,
    username: String,
    password: Option<String>,
}

impl AdminClient {
    pub fn new(config: &AdminEnvConfig) -> Result<Self> {
        // Admin endpoints are served with a self-signed certificate.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.admin_url.starts_with("https"))
            .build()
            .context("failed to build admin HTTP client")?;
        let (username, password) = match config.admin_auth.split_once(':') {
            Some((user, password)) => (user.to_string(), Some(password.to_string())),
            None => (config.admin_auth.clone(), None),
        };
        Ok(Self {
            client,
            admin_url: config.admin_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    pub fn for_domain(config: &AchConfig, domain: &str) -> Result<Self> {
        let (_, admin) = config.admin_for_domain(domain)?;
        Self::new(admin)
    }

    /// Creates a CLI token for `domain` scoped to `doctypes`.
    pub fn create_token(&self, domain: &str, doctypes: &[String]) -> Result<String> {
        if doctypes.is_empty() {
            bail!("token creation requires at least one doctype");
        }
        let url = token_url(&self.admin_url, domain, doctypes)?;
        let response = self.send(self.client.post(url))?;
        let token = response
            .text()
            .context("failed to read token response body")?;
        let token = token.trim().to_string();
        if token.is_empty() {
            bail!("admin endpoint returned an empty token for {domain}");
        }
        Ok(token)
    }

    pub fn enable_debug(&self, domain: &str) -> Result<()> {
        let url = self.route(&format!("/instances/{domain}/debug"))?;
        self.send(self.client.post(url))?;
        Ok(())
    }

    pub fn disable_debug(&self, domain: &str) -> Result<()> {
        let url = self.route(&format!("/instances/{domain}/debug"))?;
        self.send(self.client.delete(url))?;
        Ok(())
    }

    fn route(&self, route: &str) -> Result<Url> {
        Url::parse(&format!("{}{route}", self.admin_url))
            .with_context(|| format!("invalid admin URL: {}{route}", self.admin_url))
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .basic_auth(&self.username, self.password.as_deref())
            .header("User-Agent", DEFAULT_USER_AGENT)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send()
            .context("failed to call admin endpoint")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("admin request failed with HTTP {status}: {}", body.trim());
        }
        Ok(response)
    }
}

fn token_url(admin_url: &str, domain: &str, doctypes: &[String]) -> Result<Url> {
    let mut url = Url::parse(&format!("{admin_url}/instances/token"))
        .with_context(|| format!("invalid admin URL: {admin_url}"))?;
    url.query_pairs_mut()
        .append_pair("Domain", domain)
        .append_pair("Audience", "cli")
        .append_pair("Scope", &doctypes.join(" "));
    Ok(url)
}
