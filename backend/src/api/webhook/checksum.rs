use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

/// GitHub style, `sha256=<hex>`.
const HUB_SIGNATURE: &str = "x-hub-signature-256";
/// Gitea style, bare hex.
const GITEA_SIGNATURE: &str = "x-gitea-signature";

pub fn verify(
    headers: &HeaderMap,
    body: String,
    secret: &SecretString,
) -> Result<VerifiedBody, &'static str> {
    let expected_signature = signature(headers)?;
    let expected_signature =
        hex::decode(expected_signature).map_err(|_| "Failed to parse sha256 signature")?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| "Failed to hash payload")?;

    mac.update(body.as_bytes());

    mac.verify_slice(expected_signature.as_slice())
        .map_err(|_| "Failed to verify sha256 checksum")?;

    Ok(VerifiedBody { body })
}

fn signature(headers: &HeaderMap) -> Result<&str, &'static str> {
    if let Some(value) = headers.get(HUB_SIGNATURE) {
        let value = value
            .to_str()
            .map_err(|_| "Failed to parse x-hub-signature-256 header")?;
        return value.strip_prefix("sha256=").ok_or("Malformed sha256 header");
    }

    headers
        .get(GITEA_SIGNATURE)
        .ok_or("Missing header x-hub-signature-256")?
        .to_str()
        .map_err(|_| "Failed to parse x-gitea-signature header")
}

/// A request body that passed signature checks, or was accepted because no
/// webhook secret is configured.
#[derive(PartialEq, Eq, Debug)]
pub struct VerifiedBody {
    body: String,
}

impl VerifiedBody {
    pub fn unsigned(body: String) -> VerifiedBody {
        VerifiedBody { body }
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }
}

#[cfg(test)]
impl VerifiedBody {
    pub fn from_static(str: &'static str) -> VerifiedBody {
        VerifiedBody {
            body: str.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::{HeaderMap, HeaderValue};
    use secrecy::SecretString;

    const SIGNATURE: &str = "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";

    fn secret() -> SecretString {
        SecretString::new("It's a Secret to Everybody".to_owned())
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn verify_should_accept_hub_signature() {
        let body = "Hello, World!".to_owned();
        let headers = headers("X-Hub-Signature-256", &format!("sha256={SIGNATURE}"));

        assert_eq!(
            verify(&headers, body.clone(), &secret()),
            Ok(VerifiedBody { body })
        );
    }

    #[test]
    fn verify_should_accept_gitea_signature() {
        let body = "Hello, World!".to_owned();
        let headers = headers("X-Gitea-Signature", SIGNATURE);

        assert_eq!(
            verify(&headers, body.clone(), &secret()),
            Ok(VerifiedBody { body })
        );
    }

    #[test]
    fn verify_should_return_err_if_header_is_missing() {
        let body = "Hello, World!".to_owned();

        assert_eq!(
            verify(&HeaderMap::new(), body, &secret()),
            Err("Missing header x-hub-signature-256")
        );
    }

    #[test]
    fn verify_should_return_err_if_checksum_differs() {
        let body = "Hello, World!".to_owned();
        let headers = headers(
            "X-Hub-Signature-256",
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e16",
        );

        assert_eq!(
            verify(&headers, body, &secret()),
            Err("Failed to verify sha256 checksum")
        );
    }

    #[test]
    fn verify_should_return_err_if_header_is_malformed() {
        let body = "Hello, World!".to_owned();
        let headers = headers("X-Hub-Signature-256", SIGNATURE);

        assert_eq!(
            verify(&headers, body, &secret()),
            Err("Malformed sha256 header")
        );
    }

    #[test]
    fn verify_should_return_err_if_sha_is_no_hex_string() {
        let body = "Hello, World!".to_owned();
        let headers = headers("X-Hub-Signature-256", "sha256=wxyz");

        assert_eq!(
            verify(&headers, body, &secret()),
            Err("Failed to parse sha256 signature")
        );
    }

    #[test]
    fn verify_should_return_err_if_header_is_wrongly_encoded() {
        let body = "Hello, World!".to_owned();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Hub-Signature-256",
            HeaderValue::from_bytes("héllò".as_bytes()).unwrap(),
        );

        assert_eq!(
            verify(&headers, body, &secret()),
            Err("Failed to parse x-hub-signature-256 header")
        );
    }
}
