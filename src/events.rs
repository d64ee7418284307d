//! Events the client raises towards the hosting application.

use std::sync::Arc;

/// Login entry point the application is routed to when the session cannot be recovered
pub const LOGIN_ROUTE: &str = "/login";

/// Irrecoverable auth failure: credentials were purged, the user must log in again
#[derive(Debug, Clone)]
pub struct SessionExpired {
    pub route: &'static str,
    pub reason: String,
}

/// Callback the hosting application installs to handle the redirect
pub type SessionExpiredHook = Arc<dyn Fn(&SessionExpired) + Send + Sync>;
