use base64::Engine as _;
use serde_json::Value;

/// Decode the payload JSON ("claims") from a JWT.
///
/// Signature-agnostic on purpose: the id_token arrives over TLS from the
/// token endpoint we just authenticated against, so only the payload segment
/// is base64url-decoded and parsed.
pub(crate) fn decode_jwt_claims(jwt: &str) -> Option<Value> {
    let payload_b64 = jwt.split('.').nth(1)?;

    // Most JWTs are base64url without padding, but some toolchains include it.
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(payload_b64))
        .ok()?;

    serde_json::from_slice(&bytes).ok()
}

/// The `email` claim from an OpenID Connect id_token, if present.
pub(crate) fn email_from_id_token(id_token: &str) -> Option<String> {
    decode_jwt_claims(id_token)?
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
