pub mod gateway_auth;
pub mod identity;
pub mod request_id;
pub mod secret_policy;
