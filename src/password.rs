//! Reading the shared secret from the controlling terminal.

use zeroize::Zeroizing;

use crate::error::GatherError;

/// Prompts `Password: ` on the terminal and reads the answer without echo.
///
/// An empty answer is [`GatherError::EmptySecret`].
pub fn prompt_secret() -> Result<Zeroizing<String>, GatherError> {
    let secret = rpassword::prompt_password("Password: ").map_err(GatherError::PasswordInput)?;
    non_empty(Zeroizing::new(secret))
}

fn non_empty(secret: Zeroizing<String>) -> Result<Zeroizing<String>, GatherError> {
    if secret.is_empty() {
        return Err(GatherError::EmptySecret);
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::non_empty;
    use crate::error::GatherError;
    use zeroize::Zeroizing;

    #[test]
    fn empty_answer_is_rejected() {
        let err = non_empty(Zeroizing::new(String::new())).expect_err("empty secret");
        assert!(matches!(err, GatherError::EmptySecret));
    }

    #[test]
    fn answer_is_kept_as_typed() {
        let secret = non_empty(Zeroizing::new(" hunter2".to_string())).expect("secret");
        assert_eq!(secret.as_str(), " hunter2");
    }
}
