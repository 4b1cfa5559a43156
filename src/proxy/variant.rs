use crate::constants;
use crate::modules::auth::oauth::{OauthCredentials, ANTIGRAVITY_SCOPES, GEMINI_CLI_SCOPES};

/// The two upstream Code Assist flavours. They differ by host, OAuth
/// client, User-Agent and project-id requirements; everything else in the
/// pipeline is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Antigravity,
    GeminiCli,
}

impl Variant {
    pub fn label(&self) -> &'static str {
        match self {
            Variant::Antigravity => "antigravity",
            Variant::GeminiCli => "gemini-cli",
        }
    }

    pub fn base_urls(&self) -> &'static [&'static str] {
        match self {
            Variant::Antigravity => &constants::ANTIGRAVITY_BASE_URLS,
            Variant::GeminiCli => &constants::GEMINI_CLI_BASE_URLS,
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            Variant::Antigravity => constants::ANTIGRAVITY_USER_AGENT.as_str(),
            Variant::GeminiCli => constants::GEMINI_CLI_USER_AGENT.as_str(),
        }
    }

    pub fn oauth_credentials(&self) -> OauthCredentials {
        match self {
            Variant::Antigravity => OauthCredentials {
                client_id: constants::ANTIGRAVITY_OAUTH_CLIENT_ID,
                client_secret: constants::ANTIGRAVITY_OAUTH_CLIENT_SECRET,
                scopes: ANTIGRAVITY_SCOPES,
            },
            Variant::GeminiCli => OauthCredentials {
                client_id: constants::GEMINI_CLI_OAUTH_CLIENT_ID,
                client_secret: constants::GEMINI_CLI_OAUTH_CLIENT_SECRET,
                scopes: GEMINI_CLI_SCOPES,
            },
        }
    }

    pub fn accounts_file(&self) -> &'static str {
        match self {
            Variant::Antigravity => "accounts.json",
            Variant::GeminiCli => "geminicli_accounts.json",
        }
    }

    /// Antigravity refuses chat calls without a project id; the CLI variant
    /// only needs one for `v1internal:*` calls, which is every call this
    /// proxy makes, but an account without one can still be dispensed.
    pub fn requires_project_id(&self) -> bool {
        matches!(self, Variant::Antigravity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_diverge_where_it_matters() {
        assert_ne!(
            Variant::Antigravity.oauth_credentials().client_id,
            Variant::GeminiCli.oauth_credentials().client_id
        );
        assert_ne!(
            Variant::Antigravity.accounts_file(),
            Variant::GeminiCli.accounts_file()
        );
        assert!(Variant::Antigravity.requires_project_id());
        assert!(!Variant::GeminiCli.requires_project_id());
        assert!(Variant::Antigravity.base_urls()[0].contains("daily-cloudcode-pa"));
        assert!(Variant::GeminiCli.base_urls()[0].contains("cloudcode-pa.googleapis.com"));
    }
}
