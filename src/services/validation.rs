//! Field-level validation of uploaded publisher rows

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::types::{PublisherCsvRow, ValidationError, ValidationResult};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Validate one row. All problems are collected; this never fails.
pub fn validate_publisher_row(row: &PublisherCsvRow, row_number: usize) -> ValidationResult {
    let mut errors = Vec::new();
    let mut push = |field: &str, message: &str| {
        errors.push(ValidationError {
            row: row_number,
            field: field.to_string(),
            message: message.to_string(),
        });
    };

    if row.publisher_name.trim().is_empty() {
        push("publisherName", "Publisher name is required");
    }

    let email = row.email.trim();
    if email.is_empty() {
        push("email", "Email is required");
    } else if !is_valid_email(email) {
        push("email", "Invalid email format");
    }

    let site_link = row.site_link.trim();
    if site_link.is_empty() {
        push("siteLink", "Site link is required");
    } else if parse_site_url(site_link).is_none() {
        push("siteLink", "Invalid URL format");
    }

    let network_code = row.network_code.trim();
    if network_code.is_empty() {
        push("networkCode", "Network code is required");
    } else if !is_valid_network_code(network_code) {
        push("networkCode", "Network code must be numeric");
    }

    let revenue_share = row.revenue_share.trim();
    if revenue_share.is_empty() {
        push("revenueShare", "Revenue share is required");
    } else if parse_revenue_share(revenue_share).is_none() {
        push("revenueShare", "Revenue share must be between 0 and 100");
    }

    ValidationResult::from_errors(errors)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_network_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_digit())
}

/// Parse a revenue share percentage within `[0, 100]`.
pub fn parse_revenue_share(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|share| (0.0..=100.0).contains(share))
}

fn has_http_scheme(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Parse a site link, assuming `https://` when no scheme is given.
pub fn parse_site_url(value: &str) -> Option<Url> {
    let value = value.trim();
    let candidate = if has_http_scheme(value) {
        value.to_string()
    } else {
        format!("https://{}", value)
    };
    Url::parse(&candidate).ok().filter(|url| url.host_str().is_some())
}

/// Domain of a site link without scheme or leading `www.`. Never fails.
pub fn extract_domain(site_link: &str) -> String {
    if let Some(host) = parse_site_url(site_link).as_ref().and_then(Url::host_str) {
        return host.strip_prefix("www.").unwrap_or(host).to_string();
    }

    let mut rest = site_link.trim();
    for prefix in ["https://", "http://"] {
        if rest
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            rest = &rest[prefix.len()..];
            break;
        }
    }
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.split('/').next().unwrap_or_default().to_string()
}
