//! Token command implementation.

use chatsync_server::{AuthConfig, CallerId, TokenValidator};

/// Runs the token command.
pub fn run(secret: &str, caller: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let caller = match caller {
        Some(raw) => raw.parse::<CallerId>()?,
        None => CallerId::random(),
    };
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    let token = validator.create_token(caller)?;

    println!("Caller: {caller}");
    println!("Token:  {token}");
    Ok(())
}
