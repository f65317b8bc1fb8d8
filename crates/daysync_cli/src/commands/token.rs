//! Token command implementation.

use daysync_server::{AuthConfig, TokenValidator};

/// Mints a bearer token for `user` and prints it.
pub fn run(user: &str, secret: &str) -> Result<(), Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("auth secret must not be empty".into());
    }
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    let token = validator.create_token(user)?;
    println!("{token}");
    Ok(())
}
