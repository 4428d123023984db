use crate::http::{Error, Result};
use anyhow::Context;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash};
use serde_json::{Map, Value};

/// Credentials posted to the login route. Both are optional so a missing one can be reported
/// with a friendly message instead of a deserialization error.
#[derive(serde::Deserialize, Default)]
#[serde(default)]
pub struct LoginUser {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Replace a plaintext `password` field with its Argon2 hash, if there is one.
pub async fn hash_password_field(fields: &mut Map<String, Value>) -> Result<()> {
    let password = match fields.get("password") {
        Some(Value::String(password)) => password.clone(),
        _ => return Ok(()),
    };

    let hash = hash_password(password).await?;
    fields.insert("password".to_string(), Value::String(hash));
    Ok(())
}

pub async fn hash_password(password: String) -> Result<String> {
    // Argon2 hashing is designed to be computationally intensive,
    // so we need to do this on a blocking thread.
    tokio::task::spawn_blocking(move || -> Result<String> {
        let salt = SaltString::generate(rand::thread_rng());
        Ok(PasswordHash::generate(Argon2::default(), password, &salt)
            .map_err(|e| anyhow::anyhow!("failed to generate password hash: {}", e))?
            .to_string())
    })
    .await
    .context("panic in generating password hash")?
}

/// `Ok(())` if `password` matches `password_hash`, "Invalid credentials" if it doesn't.
pub async fn verify_password(password: String, password_hash: String) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let hash = PasswordHash::new(&password_hash)
            .map_err(|e| anyhow::anyhow!("invalid password hash: {}", e))?;

        hash.verify_password(&[&Argon2::default()], password)
            .map_err(|e| match e {
                argon2::password_hash::Error::Password => Error::unauthorized("Invalid credentials"),
                _ => anyhow::anyhow!("failed to verify password hash: {}", e).into(),
            })
    })
    .await
    .context("panic in verifying password hash")?
}
