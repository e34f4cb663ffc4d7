//! Pure regex scanners used by [`super::SafetyFilter`]. Each detector takes
//! text and returns every match span it finds; the filter decides what to
//! do with them.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: String,
    pub span: (usize, usize),
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+?\d{1,2}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap()
});

static NATIONAL_ID_RE: Lazy<Regex> = Lazy::new(|| {
    // US SSN-shaped: NNN-NN-NNNN.
    Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()
});

static CREDIT_CARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap()
});

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\b").unwrap()
});

static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:sk-[A-Za-z0-9]{20,}|AKIA[0-9A-Z]{16}|ghp_[A-Za-z0-9]{36})\b").unwrap()
});

fn luhn_valid(digits: &str) -> bool {
    let digits: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut d = *d;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

pub fn scan_kind(kind: &str, text: &str) -> Vec<Finding> {
    match kind {
        "email" => scan_regex(&EMAIL_RE, "email", text),
        "phone" => scan_regex(&PHONE_RE, "phone", text),
        "national_id" => scan_regex(&NATIONAL_ID_RE, "national_id", text),
        "credit_card" => CREDIT_CARD_RE
            .find_iter(text)
            .filter(|m| luhn_valid(m.as_str()))
            .map(|m| Finding { kind: "credit_card".to_string(), span: (m.start(), m.end()) })
            .collect(),
        "ip_address" => scan_regex(&IP_RE, "ip_address", text),
        "api_key" => scan_regex(&API_KEY_RE, "api_key", text),
        _ => Vec::new(),
    }
}

fn scan_regex(re: &Regex, kind: &str, text: &str) -> Vec<Finding> {
    re.find_iter(text)
        .map(|m| Finding { kind: kind.to_string(), span: (m.start(), m.end()) })
        .collect()
}
