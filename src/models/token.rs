use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a cached access token is considered stale.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Cached access token minted from an account's refresh token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub expires_in: i64,
    pub expiry_timestamp: i64,
    #[serde(default)]
    pub token_type: String,
}

impl TokenData {
    pub fn new(access_token: String, expires_in: i64, token_type: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            access_token,
            expires_in,
            expiry_timestamp: now + expires_in,
            token_type,
        }
    }

    /// A token needs refreshing when `expiry_timestamp - now < 300`.
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expiry_timestamp - now < TOKEN_REFRESH_MARGIN_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fresh_token_does_not_need_refresh() {
        let token = TokenData::new("ya29.test".to_string(), 3600, "Bearer".to_string());
        let now = chrono::Utc::now().timestamp();
        assert!(!token.needs_refresh(now));
    }

    #[test]
    fn test_token_near_expiry_needs_refresh() {
        let token = TokenData::new("ya29.test".to_string(), 200, "Bearer".to_string());
        let now = chrono::Utc::now().timestamp();
        assert!(token.needs_refresh(now));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_token_refresh_decision(
            now in 0i64..=2_000_000_000i64,
            gap in -3600i64..=7200i64,
        ) {
            let token = TokenData {
                access_token: "at".to_string(),
                expires_in: gap,
                expiry_timestamp: now.saturating_add(gap),
                token_type: String::new(),
            };
            prop_assert_eq!(token.needs_refresh(now), gap < TOKEN_REFRESH_MARGIN_SECS);
        }
    }
}
