use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LEN: usize = 32;

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").unwrap());
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9- ]").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,32}$").unwrap());
static FILE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

pub fn sanitize(input: &str) -> String {
    let s = UNDERSCORES.replace_all(input, " ");
    let s = UNSAFE_CHARS.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}

/// Sanitized, deduplicated, order kept.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, AppError> {
    let mut normalized: Vec<String> = Vec::new();

    for tag in tags {
        let tag = sanitize(tag);
        if tag.is_empty() || normalized.contains(&tag) {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(AppError::validation(format!(
                "tags must be at most {MAX_TAG_LEN} characters"
            )));
        }
        normalized.push(tag);
    }

    if normalized.len() > MAX_TAGS {
        return Err(AppError::validation(format!(
            "at most {MAX_TAGS} tags allowed"
        )));
    }

    Ok(normalized)
}

/// Trimmed value whose length in characters lies in `min..=max`.
pub fn require_len(field: &str, value: &str, min: usize, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    let len = value.chars().count();

    if len < min || len > max {
        return Err(AppError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }

    Ok(value.to_string())
}

pub fn optional_len(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => require_len(field, value, 1, max).map(Some),
    }
}

pub fn validate_trl(trl: Option<u8>) -> Result<Option<u8>, AppError> {
    match trl {
        Some(level) if !(1..=9).contains(&level) => {
            Err(AppError::validation("trl must be between 1 and 9"))
        }
        other => Ok(other),
    }
}

pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();

    if email.len() > 254 || !EMAIL.is_match(&email) {
        return Err(AppError::validation("invalid email address"));
    }

    Ok(email)
}

pub fn validate_username(username: &str) -> Result<String, AppError> {
    let username = username.trim();

    if !USERNAME.is_match(username) {
        return Err(AppError::validation(
            "username must be 3-32 letters, digits, '_' or '-'",
        ));
    }

    Ok(username.to_string())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !(8..=128).contains(&len) || !has_letter || !has_digit {
        return Err(AppError::validation(
            "password must be 8-128 characters with at least one letter and one digit",
        ));
    }

    Ok(())
}

/// ISO 4217 style: three ASCII letters, upper-cased. Defaults to USD.
pub fn normalize_currency(currency: Option<&str>) -> Result<String, AppError> {
    let currency = currency.unwrap_or("USD").trim().to_ascii_uppercase();

    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::validation("currency must be a 3-letter code"));
    }

    Ok(currency)
}

/// Safe object-key segment from a client supplied file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned = FILE_NAME_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');

    let truncated: String = cleaned.chars().take(128).collect();
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(sanitize("hello_world"), "hello world");
        assert_eq!(sanitize("Rust-lang"), "rust-lang");
        assert_eq!(sanitize("clean-this_text!"), "clean-this text");
    }

    #[test]
    fn test_leading_trailing_spaces() {
        assert_eq!(sanitize("   hello   "), "hello");
        assert_eq!(sanitize("  multiple   spaces  "), "multiple spaces");
    }

    #[test]
    fn test_special_characters() {
        assert_eq!(sanitize("!@#$%^&*()"), "");
        assert_eq!(sanitize("abc123!@#"), "abc123");
    }

    #[test]
    fn test_tags() {
        let tags = vec![
            "Thermal_Imaging".to_string(),
            "thermal imaging".to_string(),
            "  ".to_string(),
            "EW".to_string(),
        ];
        assert_eq!(
            normalize_tags(&tags).unwrap(),
            vec!["thermal imaging".to_string(), "ew".to_string()]
        );

        let too_many: Vec<String> = (0..11).map(|i| format!("tag{i}")).collect();
        assert!(normalize_tags(&too_many).is_err());

        let too_long = vec!["x".repeat(MAX_TAG_LEN + 1)];
        assert!(normalize_tags(&too_long).is_err());
    }

    #[test]
    fn test_lengths() {
        assert_eq!(require_len("title", "  Quiet rotor  ", 5, 200).unwrap(), "Quiet rotor");
        assert!(require_len("title", "abc", 5, 200).is_err());
        assert!(require_len("title", &"a".repeat(201), 5, 200).is_err());
        assert_eq!(optional_len("bio", Some("   "), 10).unwrap(), None);
        assert!(optional_len("bio", Some("way too long"), 5).is_err());
    }

    #[test]
    fn test_trl() {
        assert_eq!(validate_trl(None).unwrap(), None);
        assert_eq!(validate_trl(Some(9)).unwrap(), Some(9));
        assert!(validate_trl(Some(0)).is_err());
        assert!(validate_trl(Some(10)).is_err());
    }

    #[test]
    fn test_accounts() {
        assert_eq!(normalize_email(" Ops@Unit.MIL ").unwrap(), "ops@unit.mil");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("drone pilot").is_err());
        assert_eq!(validate_username("drone_pilot-1").unwrap(), "drone_pilot-1");
        assert!(validate_password("short1").is_err());
        assert!(validate_password("longenoughbutnodigits").is_err());
        assert!(validate_password("hover4ever").is_ok());
    }

    #[test]
    fn test_currency() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some("eur")).unwrap(), "EUR");
        assert!(normalize_currency(Some("dollars")).is_err());
        assert!(normalize_currency(Some("U1D")).is_err());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\flight log (1).csv"), "flight_log__1_.csv");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("///"), "file");
    }
}
