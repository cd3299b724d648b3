use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time;

use super::{
    super::error::{LookupError, LookupResult},
    EndpointResolver,
    models::{EndpointLookupRequest, EndpointLookupResponse},
};

/// Public JSON-RPC endpoint of the feed provider.
pub const DEFAULT_LOOKUP_URL: &str = "https://api.stromno.com/v1/api/public/rpc";

/// [`EndpointResolver`] calling the feed provider's `getWidget` JSON-RPC method.
#[derive(Debug, Clone)]
pub struct RpcEndpointResolver {
    url: String,
    client: Client,
}

impl RpcEndpointResolver {
    pub const DEFAULT_TIMEOUT: time::Duration = time::Duration::from_secs(10);

    pub fn new() -> LookupResult<Self> {
        Self::with_url(DEFAULT_LOOKUP_URL, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_url(url: impl Into<String>, timeout: time::Duration) -> LookupResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LookupError::HttpClient)?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl EndpointResolver for RpcEndpointResolver {
    async fn resolve_endpoint(&self, feed_id: &str) -> LookupResult<String> {
        let request = EndpointLookupRequest::new(feed_id);

        let response = self
            .client
            .post(self.url.as_str())
            .json(&request)
            .send()
            .await
            .map_err(LookupError::Request)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LookupError::UnexpectedStatus(status));
        }

        let body = response
            .json::<EndpointLookupResponse>()
            .await
            .map_err(LookupError::DecodeResponse)?;

        body.into_endpoint().map_err(LookupError::Rpc)
    }
}
