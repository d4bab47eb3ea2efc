use smithery_provider_core::{Credential, Headers, header_set};

const ORIGIN: &str = "https://smithery.ai";
const REFERER: &str = "https://smithery.ai/playground";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const SEC_CH_UA: &str = r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#;

/// Headers of a playground tab calling its own chat endpoint.
pub fn browser_headers(credential: &Credential) -> Headers {
    let mut headers = Headers::new();
    header_set(&mut headers, "Accept", "*/*");
    header_set(&mut headers, "Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8");
    header_set(&mut headers, "Content-Type", "application/json");
    header_set(&mut headers, "Origin", ORIGIN);
    header_set(&mut headers, "Referer", REFERER);
    header_set(&mut headers, "User-Agent", USER_AGENT);
    header_set(&mut headers, "priority", "u=1, i");
    header_set(&mut headers, "sec-ch-ua", SEC_CH_UA);
    header_set(&mut headers, "sec-ch-ua-mobile", "?0");
    header_set(&mut headers, "sec-ch-ua-platform", "\"Windows\"");
    header_set(&mut headers, "sec-fetch-dest", "empty");
    header_set(&mut headers, "sec-fetch-mode", "cors");
    header_set(&mut headers, "sec-fetch-site", "same-origin");
    header_set(&mut headers, "Cookie", credential.cookie());
    headers
}
