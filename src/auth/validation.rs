use crate::core::{PeekoError, Result};
use lazy_static::lazy_static;
use regex::Regex;

const USERNAME_MAX_LEN: usize = 24;
const EMAIL_MAX_LEN: usize = 320;
const PASSWORD_MIN_LEN: usize = 6;
const PASSWORD_MAX_LEN: usize = 300;

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_ ]+$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

fn invalid(message: &str) -> Result<()> {
    Err(PeekoError::Validation(message.to_string()))
}

fn verdict(failure: Option<&str>) -> Result<()> {
    failure.map_or(Ok(()), invalid)
}

fn padded(value: &str) -> bool {
    value.starts_with(' ') || value.ends_with(' ')
}

// Each rule below overrides the ones before it, so the last failing rule
// names the error.

fn username_failure(username: &str) -> Option<&'static str> {
    if username.is_empty() {
        return Some("Username is required");
    }
    let mut failure = None;
    if username.chars().count() > USERNAME_MAX_LEN {
        failure = Some("Username maximum length is 24 characters");
    }
    if padded(username) {
        failure = Some("Username cannot start or end with spaces");
    }
    if !USERNAME_RE.is_match(username) {
        failure = Some("Username can only include letters, numbers, underscores, and spaces");
    }
    failure
}

fn email_failure(email: &str) -> Option<&'static str> {
    if email.is_empty() {
        return Some("Please enter your email");
    }
    let mut failure = None;
    if !EMAIL_RE.is_match(email) {
        failure = Some("Please enter a valid email address");
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        failure = Some("Email address maximum length is 320 characters");
    }
    failure
}

fn password_failure(password: &str) -> Option<&'static str> {
    if password.is_empty() {
        return Some("Please enter a password");
    }
    let mut failure = None;
    let len = password.chars().count();
    if len < PASSWORD_MIN_LEN {
        failure = Some("Password minimum length is 6 characters");
    }
    if len > PASSWORD_MAX_LEN {
        failure = Some("Password maximum length is 300 characters");
    }
    if padded(password) {
        failure = Some("Password cannot start with or end with a space");
    }
    failure
}

pub fn validate_username(username: &str) -> Result<()> {
    verdict(username_failure(username))
}

pub fn validate_email(email: &str) -> Result<()> {
    verdict(email_failure(email))
}

pub fn validate_password(password: &str) -> Result<()> {
    verdict(password_failure(password))
}

/// Check all registration fields in order: username, email, password.
/// When several fail, the password's message beats the email's, which beats
/// the username's.
pub fn validate_registration(username: &str, email: &str, password: &str) -> Result<()> {
    verdict(
        password_failure(password)
            .or_else(|| email_failure(email))
            .or_else(|| username_failure(username)),
    )
}
