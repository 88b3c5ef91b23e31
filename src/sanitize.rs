//! Payload sanitization — injection stripping and sensitive-data masking
//!
//! Inbound payloads get known injection patterns stripped before any
//! processing. Outbound payloads are scanned by a `SensitiveDataScanner`
//! collaborator and masked per category when the viewer lacks clearance.

use crate::context::ClearanceLevel;
use crate::error::{Result, SecurityError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of sensitive data a scanner can find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveCategory {
    CreditCard,
    NationalId,
    Email,
    Phone,
    ApiKey,
}

impl SensitiveCategory {
    /// Minimum clearance required to view this category unmasked
    pub fn required_clearance(&self) -> ClearanceLevel {
        match self {
            Self::Email | Self::Phone => ClearanceLevel::Internal,
            Self::CreditCard | Self::NationalId => ClearanceLevel::Confidential,
            Self::ApiKey => ClearanceLevel::Restricted,
        }
    }
}

/// One sensitive-data hit inside a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: SensitiveCategory,
    /// JSON pointer to the string value containing the match
    pub location: String,
    pub confidence: f64,
}

/// Collaborator boundary for sensitive-data detection and masking
pub trait SensitiveDataScanner: Send + Sync {
    /// Scan a payload and report every sensitive hit
    fn scan(&self, payload: &Value) -> Result<Vec<Finding>>;

    /// Return a copy of the payload with the given findings masked
    fn mask(&self, payload: &Value, findings: &[Finding]) -> Result<Value>;
}

/// Regex-backed default scanner
pub struct RegexScanner {
    rules: Vec<(SensitiveCategory, Regex, f64)>,
}

impl RegexScanner {
    pub fn new() -> Result<Self> {
        let patterns: [(SensitiveCategory, &str, f64); 5] = [
            (
                SensitiveCategory::CreditCard,
                r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                0.9,
            ),
            (SensitiveCategory::NationalId, r"\b\d{3}-\d{2}-\d{4}\b", 0.9),
            (
                SensitiveCategory::Email,
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                0.95,
            ),
            (
                SensitiveCategory::Phone,
                r"\b\d{3}[-.]\d{3}[-.]\d{4}\b",
                0.7,
            ),
            (SensitiveCategory::ApiKey, r"\b[A-Za-z0-9_-]{40,}\b", 0.6),
        ];

        let mut rules = Vec::with_capacity(patterns.len());
        for (category, pattern, confidence) in patterns {
            let regex = Regex::new(pattern)
                .map_err(|e| SecurityError::Config(format!("scanner pattern: {}", e)))?;
            rules.push((category, regex, confidence));
        }
        Ok(Self { rules })
    }

    fn mask_text(category: SensitiveCategory, text: &str) -> String {
        match category {
            SensitiveCategory::NationalId => "***-**-****".to_string(),
            SensitiveCategory::Phone => "***-***-****".to_string(),
            SensitiveCategory::Email => match text.find('@') {
                Some(at) => format!("****{}", &text[at..]),
                None => "[MASKED]".to_string(),
            },
            SensitiveCategory::CreditCard => {
                let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() >= 4 {
                    format!("****-****-****-{}", &digits[digits.len() - 4..])
                } else {
                    "****-****-****-****".to_string()
                }
            }
            SensitiveCategory::ApiKey => "[MASKED]".to_string(),
        }
    }
}

impl SensitiveDataScanner for RegexScanner {
    fn scan(&self, payload: &Value) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        walk_strings(payload, String::new(), &mut |pointer, text| {
            for (category, regex, confidence) in &self.rules {
                if regex.is_match(text) {
                    findings.push(Finding {
                        category: *category,
                        location: pointer.to_string(),
                        confidence: *confidence,
                    });
                }
            }
        });
        Ok(findings)
    }

    fn mask(&self, payload: &Value, findings: &[Finding]) -> Result<Value> {
        let mut masked = payload.clone();
        for finding in findings {
            let slot = masked
                .pointer_mut(&finding.location)
                .ok_or_else(|| SecurityError::NotFound(format!("payload path {}", finding.location)))?;
            if let Value::String(text) = slot {
                for (category, regex, _) in &self.rules {
                    if *category != finding.category {
                        continue;
                    }
                    let replaced = regex
                        .replace_all(text, |caps: &regex::Captures<'_>| {
                            Self::mask_text(finding.category, &caps[0])
                        })
                        .into_owned();
                    *text = replaced;
                }
            }
        }
        Ok(masked)
    }
}

/// Strips known injection patterns from inbound payload strings
pub struct InjectionFilter {
    patterns: Vec<Regex>,
}

impl InjectionFilter {
    pub fn new() -> Result<Self> {
        let sources = [
            // script/markup injection
            r"(?i)<\s*script[^>]*>.*?<\s*/\s*script\s*>",
            r"(?i)javascript\s*:",
            r"(?i)on(load|error|click|mouseover)\s*=",
            // SQL injection staples
            r"(?i)('|%27)\s*(or|and)\s+[\w'%]+\s*=\s*[\w'%]+",
            r"(?i);\s*(drop|delete|truncate|update|insert)\s",
            r"(?i)union\s+select\s",
            // shell metacharacters in command position
            r"[;&|]\s*(rm|curl|wget|nc|bash|sh)\b",
            // path traversal
            r"\.\./(\.\./)*",
        ];
        let mut patterns = Vec::with_capacity(sources.len());
        for source in sources {
            let regex = Regex::new(source)
                .map_err(|e| SecurityError::Config(format!("injection pattern: {}", e)))?;
            patterns.push(regex);
        }
        Ok(Self { patterns })
    }

    /// Strip injection patterns from one string, returning the cleaned
    /// text and how many pattern hits were removed
    pub fn strip(&self, text: &str) -> (String, usize) {
        let mut cleaned = text.to_string();
        let mut stripped = 0;
        for regex in &self.patterns {
            let hits = regex.find_iter(&cleaned).count();
            if hits > 0 {
                stripped += hits;
                cleaned = regex.replace_all(&cleaned, "").into_owned();
            }
        }
        (cleaned, stripped)
    }

    /// Strip injection patterns from every string in a payload in place,
    /// returning the total number of hits removed
    pub fn sanitize_value(&self, payload: &mut Value) -> usize {
        match payload {
            Value::String(text) => {
                let (cleaned, stripped) = self.strip(text);
                if stripped > 0 {
                    *text = cleaned;
                }
                stripped
            }
            Value::Array(items) => items.iter_mut().map(|v| self.sanitize_value(v)).sum(),
            Value::Object(map) => map.values_mut().map(|v| self.sanitize_value(v)).sum(),
            _ => 0,
        }
    }
}

fn walk_strings(value: &Value, pointer: String, visit: &mut impl FnMut(&str, &str)) {
    match value {
        Value::String(text) => visit(&pointer, text),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_strings(item, format!("{}/{}", pointer, i), visit);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                // '~' and '/' escape per the JSON pointer rules
                let escaped = key.replace('~', "~0").replace('/', "~1");
                walk_strings(item, format!("{}/{}", pointer, escaped), visit);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_finds_credit_card() {
        let scanner = RegexScanner::new().unwrap();
        let payload = json!({"note": "card 4111-1111-1111-1111 on file"});
        let findings = scanner.scan(&payload).unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, SensitiveCategory::CreditCard);
        assert_eq!(findings[0].location, "/note");
    }

    #[test]
    fn test_scan_nested_payload() {
        let scanner = RegexScanner::new().unwrap();
        let payload = json!({
            "user": {"email": "alice@example.com"},
            "contacts": ["555-123-4567"]
        });
        let findings = scanner.scan(&payload).unwrap();

        let locations: Vec<&str> = findings.iter().map(|f| f.location.as_str()).collect();
        assert!(locations.contains(&"/user/email"));
        assert!(locations.contains(&"/contacts/0"));
    }

    #[test]
    fn test_mask_preserves_structure() {
        let scanner = RegexScanner::new().unwrap();
        let payload = json!({"email": "alice@example.com", "age": 30});
        let findings = scanner.scan(&payload).unwrap();
        let masked = scanner.mask(&payload, &findings).unwrap();

        assert_eq!(masked["email"], "****@example.com");
        assert_eq!(masked["age"], 30);
        // Original untouched
        assert_eq!(payload["email"], "alice@example.com");
    }

    #[test]
    fn test_mask_credit_card_keeps_last_four() {
        let scanner = RegexScanner::new().unwrap();
        let payload = json!({"card": "4111-1111-1111-1234"});
        let findings = scanner.scan(&payload).unwrap();
        let masked = scanner.mask(&payload, &findings).unwrap();

        assert_eq!(masked["card"], "****-****-****-1234");
    }

    #[test]
    fn test_category_clearance_ordering() {
        assert!(
            SensitiveCategory::ApiKey.required_clearance()
                > SensitiveCategory::CreditCard.required_clearance()
        );
        assert!(
            SensitiveCategory::CreditCard.required_clearance()
                > SensitiveCategory::Email.required_clearance()
        );
    }

    #[test]
    fn test_strip_script_tag() {
        let filter = InjectionFilter::new().unwrap();
        let (cleaned, stripped) = filter.strip("hello <script>alert(1)</script> world");
        assert_eq!(stripped, 1);
        assert!(!cleaned.contains("script"));
        assert!(cleaned.contains("hello"));
        assert!(cleaned.contains("world"));
    }

    #[test]
    fn test_strip_sql_injection() {
        let filter = InjectionFilter::new().unwrap();
        let (_, stripped) = filter.strip("name' OR 1=1");
        assert!(stripped > 0);

        let (_, stripped) = filter.strip("x; DROP TABLE users");
        assert!(stripped > 0);
    }

    #[test]
    fn test_strip_path_traversal() {
        let filter = InjectionFilter::new().unwrap();
        let (cleaned, stripped) = filter.strip("../../etc/passwd");
        assert!(stripped > 0);
        assert!(!cleaned.contains("../"));
    }

    #[test]
    fn test_clean_text_untouched() {
        let filter = InjectionFilter::new().unwrap();
        let (cleaned, stripped) = filter.strip("a perfectly ordinary sentence");
        assert_eq!(stripped, 0);
        assert_eq!(cleaned, "a perfectly ordinary sentence");
    }

    #[test]
    fn test_sanitize_value_walks_nested() {
        let filter = InjectionFilter::new().unwrap();
        let mut payload = json!({
            "comment": "<script>x</script>ok",
            "tags": ["javascript:void(0)", "safe"],
            "count": 3
        });
        let stripped = filter.sanitize_value(&mut payload);

        assert!(stripped >= 2);
        assert_eq!(payload["comment"], "ok");
        assert_eq!(payload["tags"][1], "safe");
        assert_eq!(payload["count"], 3);
    }
}
