//! Input checks applied before contacting the backend

use regex::Regex;
use std::sync::OnceLock;

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static REGISTRATION_EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

const PASSWORD_SPECIALS: &str = "!@#$%^&*";

/// Loose `local@domain.tld` shape, used for password resets
pub fn is_valid_email(email: &str) -> bool {
    let regex = EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
    regex.is_match(email)
}

/// Stricter form required when creating an account
pub fn is_valid_registration_email(email: &str) -> bool {
    let regex = REGISTRATION_EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
    });
    regex.is_match(email)
}

/// At least 8 characters from letters, digits and `!@#$%^&*`, with one
/// uppercase letter and one special character
pub fn is_strong_password(password: &str) -> bool {
    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));

    allowed
        && password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}
