//! User-Agent string for manifest requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/federator";

/// Default User-Agent for remote entry manifest requests.
#[must_use]
pub(crate) fn default_manifest_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("federator/{version} (module-federation-shell; +{PROJECT_UA_URL})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_user_agent_format() {
        let ua = default_manifest_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("federator/")
                .and_then(|s| s.split(' ').next())
                .unwrap(),
            "UA must contain crate version"
        );
    }
}
