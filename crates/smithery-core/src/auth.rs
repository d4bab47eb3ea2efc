use http::HeaderMap;

use smithery_provider_core::ProxyError;

/// Single shared client key. With no key configured every request passes.
#[derive(Clone, Default)]
pub struct MasterKeyAuth {
    key: Option<String>,
}

impl MasterKeyAuth {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|key| !key.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), ProxyError> {
        let Some(expected) = self.key.as_deref() else {
            return Ok(());
        };
        match extract_api_key(headers) {
            Some(presented) if constant_time_eq(presented.as_bytes(), expected.as_bytes()) => {
                Ok(())
            }
            _ => Err(ProxyError::Unauthorized),
        }
    }
}

impl std::fmt::Debug for MasterKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let auth = header_value(headers, "authorization");
    if let Some(auth) = auth {
        let auth = auth.trim();
        let (scheme, token) = auth.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") {
            let token = token.trim();
            return (!token.is_empty()).then(|| token.to_string());
        }
        return None;
    }
    header_value(headers, "x-api-key").map(|value| value.trim().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
