//! OAuth 1.0a request signing for the streaming endpoint.
//!
//! The stream endpoint requires user-context OAuth 1.0a with HMAC-SHA1. Every
//! connection attempt is signed with a fresh nonce and timestamp, so a request
//! is never replayed across retries.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use url::Url;

use crate::config::Credentials;
use crate::error::SigningError;

type HmacSha1 = Hmac<Sha1>;

/// Percent-encodes a string per RFC 3986.
///
/// Only the unreserved characters `A-Z a-z 0-9 - . _ ~` are left as is, which is
/// exactly the encoding OAuth 1.0a requires for signature base strings.
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Builds the base string URL: scheme, host, non-default port and path, no query.
pub fn base_string_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

/// Signs requests with a set of OAuth 1.0a credentials.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: Credentials,
}

impl OAuthSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Builds the `Authorization` header value for a request.
    ///
    /// # Parameters
    ///
    /// - `method`: HTTP method, e.g. `POST`
    /// - `url`: Request URL (any query string is ignored for the base string URL)
    /// - `params`: Form body parameters, which are part of the signature
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: A header value of the form `OAuth oauth_consumer_key="...", ...`
    /// - `Err(SigningError)`: If the HMAC could not be keyed
    pub fn authorization_header(
        &self,
        method: &str,
        url: &Url,
        params: &BTreeMap<String, String>,
    ) -> Result<String, SigningError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, params, &generate_nonce(), &timestamp)
    }

    /// Same as [`authorization_header`](Self::authorization_header) with a fixed nonce and timestamp.
    pub fn authorization_header_with(
        &self,
        method: &str,
        url: &Url,
        params: &BTreeMap<String, String>,
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, SigningError> {
        let mut oauth_params = self.protocol_params(nonce, timestamp);
        let signature = self.signature(method, url, params, &oauth_params)?;
        oauth_params.push(("oauth_signature".to_string(), signature));

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {}", header))
    }

    fn protocol_params(&self, nonce: &str, timestamp: &str) -> Vec<(String, String)> {
        vec![
            (
                "oauth_consumer_key".to_string(),
                self.credentials.consumer_key.clone(),
            ),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                "HMAC-SHA1".to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_token".to_string(), self.credentials.access_token.clone()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ]
    }

    fn signature(
        &self,
        method: &str,
        url: &Url,
        params: &BTreeMap<String, String>,
        oauth_params: &[(String, String)],
    ) -> Result<String, SigningError> {
        // Sort on the encoded pairs, then join
        let mut encoded: Vec<(String, String)> = oauth_params
            .iter()
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .chain(
                params
                    .iter()
                    .map(|(k, v)| (percent_encode(k), percent_encode(v))),
            )
            .chain(
                url.query_pairs()
                    .map(|(k, v)| (percent_encode(&k), percent_encode(&v))),
            )
            .collect();
        encoded.sort();

        let param_string = encoded
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method.to_ascii_uppercase(),
            percent_encode(&base_string_url(url)),
            percent_encode(&param_string)
        );

        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(&self.credentials.access_secret)
        );

        hmac_sha1(&signing_key, &base_string)
    }
}

/// Encodes form parameters as an `application/x-www-form-urlencoded` body
/// using the same encoding the signature was computed with.
pub fn encode_form_body(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Generates a random 32 hex character nonce.
fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Computes HMAC-SHA1 and returns the base64-encoded digest.
fn hmac_sha1(key: &str, data: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_credentials() -> Credentials {
        Credentials {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".into(),
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".into(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".into(),
            access_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".into(),
        }
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("hello world"), "hello%20world");
        assert_eq!(percent_encode("a,b"), "a%2Cb");
        assert_eq!(percent_encode("-1.00"), "-1.00");
        assert_eq!(percent_encode("~tilde_"), "~tilde_");
        assert_eq!(percent_encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
    }

    #[test]
    fn test_reference_signature() {
        // Published example from the Twitter developer documentation
        let signer = OAuthSigner::new(reference_credentials());
        let url = Url::parse("https://api.twitter.com/1.1/statuses/update.json?include_entities=true")
            .unwrap();
        let mut params = BTreeMap::new();
        params.insert(
            "status".to_string(),
            "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
        );

        let header = signer.authorization_header_with(
            "POST",
            &url,
            &params,
            "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
            "1318622958",
        )
        .unwrap();

        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
    }

    #[test]
    fn test_fresh_nonce_per_signature() {
        let signer = OAuthSigner::new(reference_credentials());
        let url = Url::parse("https://stream.twitter.com/1.1/statuses/filter.json").unwrap();
        let params = BTreeMap::new();

        let first = signer.authorization_header("POST", &url, &params).unwrap();
        let second = signer.authorization_header("POST", &url, &params).unwrap();
        assert_ne!(first, second);
        assert!(first.contains("oauth_timestamp="));
        assert!(first.contains("oauth_version=\"1.0\""));
    }

    #[test]
    fn test_base_string_url() {
        let url = Url::parse("HTTPS://Stream.Twitter.com/1.1/statuses/filter.json?x=1").unwrap();
        assert_eq!(
            base_string_url(&url),
            "https://stream.twitter.com/1.1/statuses/filter.json"
        );
        let url = Url::parse("http://localhost:8080/stream").unwrap();
        assert_eq!(base_string_url(&url), "http://localhost:8080/stream");
    }

    #[test]
    fn test_encode_form_body() {
        let mut params = BTreeMap::new();
        params.insert("track".to_string(), "rust,tokio".to_string());
        params.insert("locations".to_string(), "-1.00,-1.00,1.00,1.00".to_string());
        assert_eq!(
            encode_form_body(&params),
            "locations=-1.00%2C-1.00%2C1.00%2C1.00&track=rust%2Ctokio"
        );
    }

    #[test]
    fn test_generate_nonce() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hmac_sha1_accepts_any_key_length() {
        // RFC 2202 test case 2
        assert_eq!(
            hmac_sha1("Jefe", "what do ya want for nothing?").unwrap(),
            "7/zfauXrL6LSdBbV8YTfnCWafHk="
        );
        assert!(hmac_sha1("", "data").is_ok());
        assert!(hmac_sha1(&"k".repeat(200), "data").is_ok());
    }
}
