mod account_auth;

pub use account_auth::*;
