mod pool;

pub use pool::CredentialPool;

use serde::Serialize;
use serde_json::Value as JsonValue;
use smithery_common::CredentialConfig;

const DEFAULT_TOKEN_TYPE: &str = "bearer";
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// One upstream playground session.
///
/// Immutable once built; the pool swaps whole lists instead of editing
/// entries. The session cookie is derived once at construction.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub name: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: i64,
    pub user: JsonValue,
    pub masked_email: Option<String>,
    cookie: String,
}

#[derive(Serialize)]
struct AuthTokenCookie<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
    token_type: &'a str,
    expires_in: i64,
    expires_at: i64,
    user: &'a JsonValue,
}

impl Credential {
    /// `index` is zero-based and only used for the default label.
    pub fn from_config(index: usize, config: CredentialConfig, project_ref: &str) -> Self {
        let name = config
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("token-{}", index + 1));
        let token_type = config
            .token_type
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        let expires_in = config.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let masked_email = config
            .user
            .get("email")
            .and_then(JsonValue::as_str)
            .and_then(mask_email);

        let value = AuthTokenCookie {
            access_token: &config.access_token,
            refresh_token: &config.refresh_token,
            token_type: &token_type,
            expires_in,
            expires_at: config.expires_at,
            user: &config.user,
        };
        // Serializing borrowed strings and a `Value` cannot fail.
        let json = serde_json::to_string(&value).unwrap_or_default();
        let cookie = format!("sb-{project_ref}-auth-token={}", escape_non_ascii(&json));

        Self {
            name,
            access_token: config.access_token,
            refresh_token: config.refresh_token,
            token_type,
            expires_in,
            expires_at: config.expires_at,
            user: config.user,
            masked_email,
            cookie,
        }
    }

    /// The `Cookie` header value sent on every upstream call.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("masked_email", &self.masked_email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// `alice@example.com` -> `al**ce@example.com`. Short local parts are padded
/// with `x` so the shape stays fixed.
pub fn mask_email(email: &str) -> Option<String> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    let chars: Vec<char> = local.chars().collect();
    let prefix: String = chars.iter().take(2).collect();
    let suffix: String = if chars.len() >= 2 {
        chars[chars.len() - 2..].iter().collect()
    } else {
        chars.iter().collect()
    };
    Some(format!("{:x<2}**{:x<2}@{domain}", prefix, suffix))
}

/// Header values must be ASCII; non-ASCII characters in the user blob are
/// written as JSON `\u` escapes (UTF-16, surrogate pairs above the BMP).
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in ch.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{unit:04x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(user: JsonValue) -> CredentialConfig {
        CredentialConfig {
            name: None,
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: None,
            expires_in: None,
            expires_at: 1_900_000_000,
            user,
        }
    }

    #[test]
    fn cookie_is_compact_json_with_defaults() {
        let credential = Credential::from_config(
            0,
            config(serde_json::json!({"id": "u1"})),
            "spjawbfpwezjfmicopsl",
        );
        assert_eq!(
            credential.cookie(),
            "sb-spjawbfpwezjfmicopsl-auth-token=\
             {\"access_token\":\"at\",\"refresh_token\":\"rt\",\"token_type\":\"bearer\",\
             \"expires_in\":3600,\"expires_at\":1900000000,\"user\":{\"id\":\"u1\"}}"
        );
        assert_eq!(credential.name, "token-1");
    }

    #[test]
    fn cookie_escapes_non_ascii() {
        let credential =
            Credential::from_config(2, config(serde_json::json!({"name": "é😀"})), "ref");
        assert!(credential.cookie().is_ascii());
        assert!(credential.cookie().contains("\\u00e9\\ud83d\\ude00"));
        assert_eq!(credential.name, "token-3");
    }

    #[test]
    fn masks_emails() {
        assert_eq!(mask_email("alice@example.com").as_deref(), Some("al**ce@example.com"));
        assert_eq!(mask_email("ab@x.io").as_deref(), Some("ab**ab@x.io"));
        assert_eq!(mask_email("a@x.io").as_deref(), Some("ax**ax@x.io"));
        assert_eq!(mask_email("no-at-sign"), None);
        assert_eq!(mask_email("@x.io"), None);
    }

    #[test]
    fn masked_email_comes_from_user_blob() {
        let credential = Credential::from_config(
            0,
            config(serde_json::json!({"email": "someone@example.com"})),
            "ref",
        );
        assert_eq!(credential.masked_email.as_deref(), Some("so**ne@example.com"));
        assert!(!format!("{credential:?}").contains("at\""));
    }
}
