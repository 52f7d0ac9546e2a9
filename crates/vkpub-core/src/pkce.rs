//! OAuth2 authorization-code + PKCE helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{errors::Error, Result};

const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const STATE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const VERIFIER_LEN: usize = 128;
pub const STATE_LEN: usize = 16;

pub const AUTHORIZE_ENDPOINT: &str = "https://id.vk.com/authorize";

fn random_string<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate_code_verifier<R: Rng + ?Sized>(rng: &mut R) -> String {
    random_string(rng, VERIFIER_ALPHABET, VERIFIER_LEN)
}

pub fn generate_state<R: Rng + ?Sized>(rng: &mut R) -> String {
    random_string(rng, STATE_ALPHABET, STATE_LEN)
}

/// `base64url(SHA-256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Everything needed to start one authorization attempt.
#[derive(Clone, Debug)]
pub struct PkceRequest {
    pub verifier: String,
    pub state: String,
    pub url: String,
}

impl PkceRequest {
    pub fn new(client_id: &str, redirect_uri: &str, scope: &str) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let verifier = generate_code_verifier(&mut rng);
        let state = generate_state(&mut rng);
        let url = authorization_url(
            client_id,
            redirect_uri,
            &state,
            &code_challenge(&verifier),
            scope,
        )?;
        Ok(Self {
            verifier,
            state,
            url,
        })
    }
}

pub fn authorization_url(
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
    scope: &str,
) -> Result<String> {
    let url = Url::parse_with_params(
        AUTHORIZE_ENDPOINT,
        &[
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("scope", scope),
        ],
    )
    .map_err(|e| Error::Config(format!("invalid authorize url: {e}")))?;
    Ok(url.into())
}

/// Query parameters carried by the redirect the operator pastes back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub device_id: Option<String>,
    pub state: Option<String>,
}

pub fn parse_redirect(raw: &str) -> Result<RedirectParams> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::InvalidInput(format!("not a valid URL: {e}")))?;

    let mut out = RedirectParams::default();
    for (k, v) in url.query_pairs() {
        let v = Some(v.into_owned()).filter(|s| !s.is_empty());
        match k.as_ref() {
            "code" => out.code = v,
            "device_id" => out.device_id = v,
            "state" => out.state = v,
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn verifier_has_expected_length_and_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        let v = generate_code_verifier(&mut rng);
        assert_eq!(v.len(), VERIFIER_LEN);
        assert!(v.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)));
    }

    #[test]
    fn challenge_is_deterministic_43_chars() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let v = generate_code_verifier(&mut rng);
            let a = code_challenge(&v);
            assert_eq!(a, code_challenge(&v));
            assert_eq!(a.len(), 43);
            assert!(!a.contains('='));
            assert!(!a.contains('+') && !a.contains('/'));
        }
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn authorization_url_carries_all_params() {
        let url = authorization_url(
            "123",
            "https://oauth.vk.com/blank.html",
            "st",
            "ch",
            "wall,video,offline",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "https://oauth.vk.com/blank.html".into())));
        assert!(pairs.contains(&("scope".into(), "wall,video,offline".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }

    #[test]
    fn redirect_extracts_code_device_and_state() {
        let p = parse_redirect(
            "https://oauth.vk.com/blank.html?code=abc&state=xyz&device_id=dev-1&type=code_v2",
        )
        .unwrap();
        assert_eq!(p.code.as_deref(), Some("abc"));
        assert_eq!(p.device_id.as_deref(), Some("dev-1"));
        assert_eq!(p.state.as_deref(), Some("xyz"));
    }

    #[test]
    fn redirect_without_code_is_parsed_as_none() {
        let p = parse_redirect("https://oauth.vk.com/blank.html?error=denied").unwrap();
        assert_eq!(p.code, None);
        assert!(parse_redirect("not a url").is_err());
    }
}
