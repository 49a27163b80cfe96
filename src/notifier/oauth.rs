//! OAuth 1.0a request signing (HMAC-SHA1), as required by the Twitter API.
//!
//! Only the `oauth_*` parameters and the URL query are signed. JSON request
//! bodies are not part of the signature base string.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, distr::Alphanumeric};
use sha1::Sha1;
use url::Url;

use crate::config::Credentials;
use crate::error::Error;

/// Everything but the RFC 3986 unreserved characters.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const NONCE_LEN: usize = 32;

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Builds the `Authorization` header value for a request to `url`.
///
/// # Errors
///
/// [`Error::Config`] if the signing key is rejected.
pub fn authorization_header(
    method: &str,
    url: &Url,
    credentials: &Credentials,
) -> Result<String, Error> {
    let nonce: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    authorization_header_with(method, url, credentials, &nonce, &timestamp)
}

fn authorization_header_with(
    method: &str,
    url: &Url,
    credentials: &Credentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String, Error> {
    let oauth_params = [
        ("oauth_consumer_key", credentials.consumer_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", credentials.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut params: Vec<(&str, &str)> = oauth_params.to_vec();
    params.extend(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let signature = signature(
        method,
        url,
        &params,
        &credentials.consumer_secret,
        &credentials.access_token_secret,
    )?;

    let fields = oauth_params
        .iter()
        .copied()
        .chain(std::iter::once(("oauth_signature", signature.as_str())))
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!("OAuth {fields}"))
}

fn signature(
    method: &str,
    url: &Url,
    params: &[(&str, &str)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, Error> {
    let mut encoded: Vec<(String, String)> =
        params.iter().map(|(k, v)| (encode(k), encode(v))).collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = url.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);

    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url.as_str()),
        encode(&param_string)
    );
    let signing_key = format!("{}&{}", encode(consumer_secret), encode(token_secret));

    let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
        .map_err(|e| Error::Config(format!("invalid OAuth signing key: {e}")))?;
    mac.update(base_string.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference request from Twitter's "Creating a signature" guide.
    const CONSUMER_KEY: &str = "xvz1evFS4wEEPTGEFPHBog";
    const CONSUMER_SECRET: &str = "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw";
    const TOKEN: &str = "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb";
    const TOKEN_SECRET: &str = "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE";
    const NONCE: &str = "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg";
    const TIMESTAMP: &str = "1318622958";

    fn credentials() -> Credentials {
        Credentials {
            consumer_key: CONSUMER_KEY.to_string(),
            consumer_secret: CONSUMER_SECRET.to_string(),
            access_token: TOKEN.to_string(),
            access_token_secret: TOKEN_SECRET.to_string(),
        }
    }

    #[test]
    fn test_signature_matches_reference() {
        let url = Url::parse("https://api.twitter.com/1.1/statuses/update.json").unwrap();
        let params = [
            ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
            ("include_entities", "true"),
            ("oauth_consumer_key", CONSUMER_KEY),
            ("oauth_nonce", NONCE),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", TIMESTAMP),
            ("oauth_token", TOKEN),
            ("oauth_version", "1.0"),
        ];

        let signature = signature("POST", &url, &params, CONSUMER_SECRET, TOKEN_SECRET).unwrap();

        assert_eq!(signature, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
    }

    #[test]
    fn test_encode_keeps_unreserved_only() {
        assert_eq!(encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
        assert_eq!(encode("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(encode("☃"), "%E2%98%83");
    }

    #[test]
    fn test_header_lists_oauth_fields() {
        let url = Url::parse("https://api.twitter.com/2/tweets").unwrap();
        let header =
            authorization_header_with("POST", &url, &credentials(), NONCE, TIMESTAMP).unwrap();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains(&format!("oauth_consumer_key=\"{CONSUMER_KEY}\"")));
        assert!(header.contains(&format!("oauth_nonce=\"{NONCE}\"")));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(header.contains(&format!("oauth_timestamp=\"{TIMESTAMP}\"")));
        assert!(header.contains("oauth_version=\"1.0\""));
        assert!(header.contains("oauth_signature=\""));
        assert!(!header.contains(CONSUMER_SECRET));
        assert!(!header.contains(TOKEN_SECRET));
    }

    #[test]
    fn test_header_signature_depends_on_query() {
        let plain = Url::parse("https://api.twitter.com/2/tweets").unwrap();
        let with_query = Url::parse("https://api.twitter.com/2/tweets?dry_run=true").unwrap();

        let a = authorization_header_with("POST", &plain, &credentials(), NONCE, TIMESTAMP).unwrap();
        let b =
            authorization_header_with("POST", &with_query, &credentials(), NONCE, TIMESTAMP)
                .unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_fresh_nonce_per_header() {
        let url = Url::parse("https://api.twitter.com/2/tweets").unwrap();
        let a = authorization_header("POST", &url, &credentials()).unwrap();
        let b = authorization_header("POST", &url, &credentials()).unwrap();
        assert_ne!(a, b);
    }
}
