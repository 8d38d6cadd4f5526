//! Connection settings for the target Confluence server, assembled once at
//! process start and passed by value into the client. Core logic never reads
//! the environment on its own.

pub const ENV_ADDRESS: &str = "CONFLUENCE_ADDR";
pub const ENV_USER: &str = "CONFLUENCE_USER";
pub const ENV_PASSWORD: &str = "CONFLUENCE_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfluenceConfig {
    pub base_address: String,
    pub username: String,
    pub password: String,
}

impl ConfluenceConfig {
    /// REST endpoint root derived from the server base address. Accepts both
    /// a bare server address and one that already ends in `rest/api`.
    pub fn rest_base(&self) -> String {
        let trimmed = self.base_address.trim_end_matches('/');
        if trimmed.ends_with("/rest/api") {
            format!("{trimmed}/")
        } else {
            format!("{trimmed}/rest/api/")
        }
    }
}
