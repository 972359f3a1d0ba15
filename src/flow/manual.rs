use crate::error::OauthError;
use url::Url;

/// Code and (optional) state recovered from operator-pasted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastedRedirect {
    pub code: String,
    pub state: Option<String>,
}

/// Interpret whatever the operator pasted after the consent screen: a full
/// redirect URL, a bare `code=...&state=...` query string, or just the
/// authorization code.
pub fn resolve_pasted_input(input: &str) -> Result<PastedRedirect, OauthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(flow_err("EMPTY_INPUT", "Nothing was pasted"));
    }

    if let Ok(url) = Url::parse(input) {
        return from_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    }

    if input.contains('=') {
        return from_pairs(
            url::form_urlencoded::parse(input.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }

    // A bare authorization code; the caller falls back to the generated
    // state.
    Ok(PastedRedirect {
        code: input.to_string(),
        state: None,
    })
}

fn from_pairs(pairs: impl Iterator<Item = (String, String)>) -> Result<PastedRedirect, OauthError> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in pairs {
        match key.as_str() {
            "code" => code = non_empty(value),
            "state" => state = non_empty(value),
            "error" => error = non_empty(value),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(flow_err(
            "PROVIDER_ERROR",
            &format!("Authorization failed upstream: {error}"),
        ));
    }
    let Some(code) = code else {
        return Err(flow_err(
            "MISSING_CODE",
            "The pasted input carries no authorization code",
        ));
    };
    Ok(PastedRedirect { code, state })
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn flow_err(code: &str, message: &str) -> OauthError {
    OauthError::Flow {
        code: code.to_string(),
        message: message.to_string(),
        details: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_redirect_url_yields_code_and_state() {
        let pasted =
            resolve_pasted_input("http://localhost:8188/?code=ABC&state=XYZ&scope=email").unwrap();
        assert_eq!(pasted.code, "ABC");
        assert_eq!(pasted.state.as_deref(), Some("XYZ"));
    }

    #[test]
    fn bare_query_string_is_accepted() {
        let pasted = resolve_pasted_input("code=ABC&state=XYZ").unwrap();
        assert_eq!(pasted.code, "ABC");
        assert_eq!(pasted.state.as_deref(), Some("XYZ"));
    }

    #[test]
    fn bare_code_has_no_state() {
        let pasted = resolve_pasted_input("  4/0AbCdEf  ").unwrap();
        assert_eq!(pasted.code, "4/0AbCdEf");
        assert_eq!(pasted.state, None);
    }

    #[test]
    fn provider_errors_and_empty_input_are_rejected() {
        assert!(resolve_pasted_input("").is_err());
        assert!(resolve_pasted_input("http://localhost:8188/?error=access_denied").is_err());
        assert!(resolve_pasted_input("state=XYZ").is_err());
    }
}
