use std::time::Duration;

use log::warn;
use reqwest::{Client, StatusCode};

use super::DnsProviderError;

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("dns01-issuer/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            warn!("[dns-http] failed to build client: {err}");
            Client::new()
        })
}

pub fn status_error(provider: &str, status: StatusCode, body: Option<String>) -> DnsProviderError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return DnsProviderError::Unauthorized {
            provider: provider.to_string(),
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return DnsProviderError::RateLimited {
            provider: provider.to_string(),
        };
    }
    let message = match body {
        Some(body) if !body.trim().is_empty() => body,
        _ => status.to_string(),
    };
    DnsProviderError::Api {
        provider: provider.to_string(),
        message,
    }
}

pub fn transport_error(provider: &str, err: reqwest::Error) -> DnsProviderError {
    DnsProviderError::Transport {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}
