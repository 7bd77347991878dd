use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::ApiError;

pub const MIN_NAME_LEN: usize = 3;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Trim and lowercase an email, rejecting anything that is not shaped like
/// `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(ApiError::Validation("Please provide a valid email".into()))
    }
}

pub fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().chars().count() < MIN_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "Name must be at least {} characters",
            MIN_NAME_LEN
        )));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ApiError::Validation(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
        return Err(ApiError::Validation(
            "Username may only contain letters, digits, '_', '.' and '-'".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Canonical invitation code form: uppercase, with the dash restored when a
/// six-character code was typed without it (`abc123` -> `ABC-123`).
pub fn normalize_invitation_code(raw: &str) -> String {
    let code = raw.trim().to_uppercase();
    if code.len() == 6 && code.is_ascii() && !code.contains('-') {
        format!("{}-{}", &code[..3], &code[3..])
    } else {
        code
    }
}

/// Three uppercase letters, a dash and three digits, e.g. `QZR-042`.
pub fn generate_invitation_code() -> String {
    let mut rng = rand::rng();
    let letters: String = (0..3).map(|_| char::from(rng.random_range(b'A'..=b'Z'))).collect();
    let digits: String = (0..3).map(|_| char::from(rng.random_range(b'0'..=b'9'))).collect();
    format!("{}-{}", letters, digits)
}

/// Username for an auto-provisioned visitor account.
pub fn generate_visitor_username() -> String {
    format!("visitor_{}", random_alphanumeric(8).to_lowercase())
}

pub fn generate_password() -> String {
    random_alphanumeric(12)
}

fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  V@X.com ").unwrap(), "v@x.com");
        assert!(normalize_email("nope").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("a b@x.com").is_err());
    }

    #[test]
    fn dashless_codes_gain_a_dash() {
        assert_eq!(normalize_invitation_code("abc123"), "ABC-123");
        assert_eq!(normalize_invitation_code("ABC-123"), "ABC-123");
        assert_eq!(normalize_invitation_code(" deadbeefcafe "), "DEADBEEFCAFE");
    }

    #[test]
    fn generated_codes_have_the_expected_shape() {
        for _ in 0..50 {
            let code = generate_invitation_code();
            let (letters, digits) = code.split_once('-').unwrap();
            assert!(letters.len() == 3 && letters.chars().all(|c| c.is_ascii_uppercase()));
            assert!(digits.len() == 3 && digits.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn visitor_credentials_pass_validation() {
        let username = generate_visitor_username();
        assert!(username.starts_with("visitor_"));
        assert_eq!(username.len(), 16);
        validate_username(&username).unwrap();
        validate_password(&generate_password()).unwrap();
    }

    #[test]
    fn lengths_are_enforced() {
        assert!(validate_name("Al").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
