use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::DeliveryError;
use crate::platform::Payload;

/// Kindle addresses all live under this domain
pub const KINDLE_DOMAIN_SUFFIX: &str = "@kindle.com";

/// Document types a Kindle accepts. Built once, read-only afterwards.
pub static SUPPORTED_MIME_TYPES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "application/pdf",
        "application/epub+zip",
        "application/vnd.amazon.ebook",
        "application/x-mobipocket-ebook",
    ])
});

static DISPLAY_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>]*<([^<>]+)>$").expect("valid display-name pattern"));

static BARE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@<>()\[\],;:]+@[^\s@<>()\[\],;:]+\.[^\s@<>()\[\],;:]+$")
        .expect("valid address pattern")
});

#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("Invalid email address")]
    Invalid,
    #[error("Email address is not a Kindle email address")]
    NotKindle,
}

/// Check the declared type and size of a payload before anything is downloaded.
pub fn validate_payload(payload: &Payload, max_size: u64) -> Result<(), DeliveryError> {
    let supported = payload
        .mime_type
        .as_deref()
        .is_some_and(|mime| SUPPORTED_MIME_TYPES.contains(mime));
    if !supported {
        return Err(DeliveryError::UnsupportedType(payload.mime_type.clone()));
    }

    if payload.declared_size > max_size {
        return Err(DeliveryError::TooLarge {
            size: payload.declared_size,
            max: max_size,
        });
    }

    Ok(())
}

/// Parse `user@kindle.com` or `Name <user@kindle.com>` into the bare address.
pub fn parse_kindle_address(input: &str) -> Result<String, AddressError> {
    let input = input.trim();
    let address = match DISPLAY_ADDRESS.captures(input) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim(),
        None => input,
    };

    if !BARE_ADDRESS.is_match(address) {
        return Err(AddressError::Invalid);
    }

    if !address.to_ascii_lowercase().ends_with(KINDLE_DOMAIN_SUFFIX) {
        return Err(AddressError::NotKindle);
    }

    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 20 * 1024 * 1024;

    fn payload(mime: Option<&str>, size: u64) -> Payload {
        Payload {
            file_id: "f".to_string(),
            mime_type: mime.map(str::to_string),
            declared_size: size,
            file_name: "book".to_string(),
        }
    }

    #[test]
    fn test_all_supported_types_pass() {
        for mime in SUPPORTED_MIME_TYPES.iter() {
            assert!(validate_payload(&payload(Some(*mime), 1024), MAX).is_ok(), "{mime}");
        }
        assert_eq!(SUPPORTED_MIME_TYPES.len(), 4);
    }

    #[test]
    fn test_unsupported_or_missing_type_rejected() {
        assert!(matches!(
            validate_payload(&payload(Some("image/png"), 10), MAX),
            Err(DeliveryError::UnsupportedType(_))
        ));
        assert!(matches!(
            validate_payload(&payload(None, 10), MAX),
            Err(DeliveryError::UnsupportedType(None))
        ));
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        assert!(validate_payload(&payload(Some("application/pdf"), MAX), MAX).is_ok());
        assert!(matches!(
            validate_payload(&payload(Some("application/pdf"), MAX + 1), MAX),
            Err(DeliveryError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_type_checked_before_size() {
        assert!(matches!(
            validate_payload(&payload(Some("video/mp4"), MAX * 4), MAX),
            Err(DeliveryError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_parse_bare_and_display_addresses() {
        assert_eq!(
            parse_kindle_address("reader@kindle.com").unwrap(),
            "reader@kindle.com"
        );
        assert_eq!(
            parse_kindle_address("  Ada Reader <ada_1@Kindle.com> ").unwrap(),
            "ada_1@Kindle.com"
        );
    }

    #[test]
    fn test_parse_rejects_non_kindle_and_garbage() {
        assert_eq!(
            parse_kindle_address("reader@gmail.com"),
            Err(AddressError::NotKindle)
        );
        assert_eq!(
            parse_kindle_address("reader@kindle.com.evil.org"),
            Err(AddressError::NotKindle)
        );
        assert_eq!(parse_kindle_address("not an address"), Err(AddressError::Invalid));
        assert_eq!(parse_kindle_address("@kindle.com"), Err(AddressError::Invalid));
        assert_eq!(parse_kindle_address(""), Err(AddressError::Invalid));
    }
}
