//! Graph API OAuth endpoints and grant types

/// Token endpoint for app tokens and long-lived token exchange
pub const TOKEN_ENDPOINT: &str = "https://graph.facebook.com/oauth/access_token";

/// Grant type exchanging a short-lived user token for a long-lived one
pub const GRANT_EXCHANGE: &str = "fb_exchange_token";

/// Grant type issuing an app access token from the app id and secret
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
