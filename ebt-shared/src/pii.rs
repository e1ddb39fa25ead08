use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

// 13+ contiguous digits, or the 4-4-4-n grouped form printed on cards.
static CARD_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{13,}|\d{4}(?:[ -]\d{4}){2}[ -]\d{1,7}").expect("static card number pattern")
});

// `key: value` / `key=value` / `"key":"value"` pairs whose key names card data.
static CARD_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(card[_-]?number|number|pan|cvv2?|cvc2?|security[_-]?code|expiry(?:[_-]?(?:date|month|year))?|expiration[_-]?date|encrypted[_-]?card)("?\s*[:=]\s*)("[^"]*"|[^\s",;&}\]]+)"#,
    )
    .expect("static card field pattern")
});

/// Field names (lowercased, separators stripped) whose values are always redacted.
const CARD_FIELDS: &[&str] = &[
    "number",
    "cardnumber",
    "pan",
    "cvv",
    "cvv2",
    "cvc",
    "cvc2",
    "securitycode",
    "expiry",
    "expirydate",
    "expirationdate",
    "expirymonth",
    "expiryyear",
    "encryptedcard",
];

/// Returns true when a field name looks like it carries card data.
pub fn is_card_field(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect();
    CARD_FIELDS.contains(&normalized.as_str())
}

/// Scrubs free text: values of card-named fields, then any run of 13+ digits.
pub fn redact_text(input: &str) -> String {
    let pairs = CARD_PAIR.replace_all(input, |caps: &regex::Captures| {
        let value = if caps[3].starts_with('"') {
            format!("\"{}\"", REDACTED)
        } else {
            REDACTED.to_string()
        };
        format!("{}{}{}", &caps[1], &caps[2], value)
    });
    CARD_NUMBER.replace_all(&pairs, REDACTED).into_owned()
}

/// Deep-copies a JSON value, blanking card fields and scrubbing card numbers in strings.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_card_field(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

/// Last four digits of a card number, ignoring separators.
pub fn last_four(card_number: &str) -> String {
    let digits: Vec<char> = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(4);
    digits[start..].iter().collect()
}
