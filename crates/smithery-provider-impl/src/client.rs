use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Proxy};
use wreq_util::Emulation;

use smithery_common::GlobalConfig;
use smithery_provider_core::{
    Headers, ProxyError, ProxyResult, UpstreamBody, UpstreamHttpRequest, UpstreamHttpResponse,
};

/// Performs upstream IO. Non-2xx responses are returned as buffered bodies;
/// classifying them is the provider's job.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = ProxyResult<UpstreamHttpResponse>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Bounds the wait for response headers and every idle gap between reads.
    pub timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global.proxy.clone(),
            timeout: Duration::from_secs(global.timeout_secs),
            ..Self::default()
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Browser-emulating client: Chrome TLS and HTTP/2 fingerprint.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

fn build_client(config: &UpstreamClientConfig) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .emulation(Emulation::Chrome131)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.timeout);

    if let Some(proxy) = config
        .proxy
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = ProxyResult<UpstreamHttpResponse>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self.client.post(&req.url);
            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }
            builder = builder.body(req.body);

            let timeout = self.config.timeout;
            let resp = tokio::time::timeout(timeout, builder.send())
                .await
                .map_err(|_| ProxyError::UpstreamTimeout {
                    secs: timeout.as_secs(),
                })?
                .map_err(|err| map_wreq_error(err, timeout))?;
            convert_response(resp, timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    idle_timeout: Duration,
) -> ProxyResult<UpstreamHttpResponse> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    if !(200..300).contains(&status) {
        let body = tokio::time::timeout(idle_timeout, resp.bytes())
            .await
            .map_err(|_| ProxyError::UpstreamTimeout {
                secs: idle_timeout.as_secs(),
            })?
            .map_err(|err| map_wreq_error(err, idle_timeout))?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, ProxyError>>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = tx.closed() => break,
                next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            };
            let item = match next {
                Ok(Some(Ok(chunk))) => Ok(chunk),
                Ok(Some(Err(err))) => Err(map_wreq_error(err, idle_timeout)),
                Ok(None) => break,
                Err(_) => Err(ProxyError::UpstreamTimeout {
                    secs: idle_timeout.as_secs(),
                }),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|s| (k.as_str().to_string(), s.to_string()))
        })
        .collect()
}

fn map_wreq_error(err: wreq::Error, timeout: Duration) -> ProxyError {
    if err.is_timeout() {
        return ProxyError::UpstreamTimeout {
            secs: timeout.as_secs(),
        };
    }
    ProxyError::UpstreamTransport(err.to_string())
}
