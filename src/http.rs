use crate::config::{HttpConfig, SERVICE_VERSION};
use reqwest::Client;

/// Shared outbound client; cheap to clone into every component.
pub fn build_client(config: &HttpConfig) -> Client {
    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(format!(
            "ChatbayAnalyzer/{SERVICE_VERSION} (+https://chatbay-analyzer.onrender.com)"
        ))
        .build()
        .unwrap_or_else(|_| Client::new())
}
