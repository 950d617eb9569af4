//! Phone number and address helpers.

use lazy_static::lazy_static;
use regex::Regex;

/// Server part of user addresses on the messaging network.
pub const USER_ADDRESS_SUFFIX: &str = "@s.whatsapp.net";

lazy_static! {
    static ref NON_DIGITS: Regex = Regex::new(r"[^0-9]").unwrap();
    static ref RECIPIENT_SEPARATORS: Regex = Regex::new(r"[\n,]+").unwrap();
}

/// Normalize a user-entered phone number into international digits.
///
/// All non-digit characters are dropped and a leading trunk `0` is replaced
/// by `country_code`. Returns `None` when no digits remain.
///
/// # Example
/// ```
/// use linkhub_core::normalize_number;
///
/// assert_eq!(normalize_number("0812-3456", "62").as_deref(), Some("628123456"));
/// assert_eq!(normalize_number("+62 812", "62").as_deref(), Some("62812"));
/// assert_eq!(normalize_number("n/a", "62"), None);
/// ```
pub fn normalize_number(raw: &str, country_code: &str) -> Option<String> {
    let digits = NON_DIGITS.replace_all(raw, "");
    if digits.is_empty() {
        return None;
    }
    match digits.strip_prefix('0') {
        Some(rest) => Some(format!("{country_code}{rest}")),
        None => Some(digits.into_owned()),
    }
}

/// Build the network address for normalized digits.
pub fn to_address(digits: &str) -> String {
    format!("{digits}{USER_ADDRESS_SUFFIX}")
}

/// Split a free-form recipient list on newlines and commas.
pub fn split_recipients(input: &str) -> Vec<String> {
    RECIPIENT_SEPARATORS
        .split(input)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep only the digits of a phone number (pairing requests take bare digits).
pub fn digits_only(raw: &str) -> String {
    NON_DIGITS.replace_all(raw, "").into_owned()
}

/// Group a pairing code in blocks of four joined with `-`.
pub fn format_pairing_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Extract the phone number from an engine-reported user id.
///
/// `"620000:12@s.whatsapp.net"` and `"620000@x"` both yield `"620000"`.
pub fn user_number(user_id: &str) -> &str {
    let user = user_id.split('@').next().unwrap_or(user_id);
    user.split(':').next().unwrap_or(user)
}
