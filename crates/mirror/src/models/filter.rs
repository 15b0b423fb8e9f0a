//! Filter grammar for email queries
//!
//! Every field is optional; an absent field applies no constraint. Boolean
//! fields are tri-state: `Some(true)` / `Some(false)` / `None` are three
//! distinct queries — absent is never conflated with false.

use serde::{Deserialize, Serialize};

/// A filter expression over the emails mirror
///
/// All conditions AND together; the comma-list fields (`sender_email`,
/// `sender_domain`, `label_ids`) OR their own entries internally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailFilter {
    /// Case-insensitive substring over from_name and from_email
    pub sender: Option<String>,
    /// Comma list of exact addresses (case-insensitive), OR'd
    pub sender_email: Option<String>,
    /// Comma list of domains matched against the `@domain` suffix, OR'd
    pub sender_domain: Option<String>,
    /// Exact category label id
    pub category: Option<String>,
    /// Inclusive lower bound on internal_date (ms)
    pub date_from: Option<i64>,
    /// Inclusive upper bound on internal_date (ms)
    pub date_to: Option<i64>,
    /// Inclusive lower bound on size_bytes
    pub size_min: Option<i64>,
    /// Inclusive upper bound on size_bytes
    pub size_max: Option<i64>,
    pub is_unread: Option<bool>,
    pub is_starred: Option<bool>,
    pub has_attachments: Option<bool>,
    pub is_trash: Option<bool>,
    pub is_spam: Option<bool>,
    pub is_important: Option<bool>,
    /// labels contains SENT
    pub is_sent: Option<bool>,
    /// labels does not contain INBOX, and not trash, and not spam
    pub is_archived: Option<bool>,
    /// Comma list of label ids; a row matches if it carries any of them
    pub label_ids: Option<String>,
    /// Subject search with the OR/AND grammar of [`SearchExpr`]
    pub search: Option<String>,
}

impl EmailFilter {
    /// Filter that matches every row
    pub fn any() -> Self {
        Self::default()
    }

    /// Split a comma-list field into trimmed, non-empty entries
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// A parsed subject search expression
///
/// The grammar is deliberately tiny: the query splits on a case-insensitive
/// ` OR ` first; if that produced multiple tokens they are OR'd. Otherwise
/// it splits on ` AND ` and ANDs. Otherwise it is a single substring. There
/// is no nesting; a query mixing both operators is treated as an OR query.
/// Surrounding single or double quotes are stripped from each token.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchExpr {
    /// Any token matches
    Or(Vec<String>),
    /// Every token must match
    And(Vec<String>),
}

impl SearchExpr {
    /// Parse a raw search string; returns None for blank input
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let or_tokens = split_operator(raw, "or");
        if or_tokens.len() > 1 {
            return Some(SearchExpr::Or(clean_tokens(or_tokens)));
        }

        let and_tokens = split_operator(raw, "and");
        if and_tokens.len() > 1 {
            return Some(SearchExpr::And(clean_tokens(and_tokens)));
        }

        Some(SearchExpr::Or(clean_tokens(vec![raw.to_string()])))
    }

    /// Whether a subject matches this expression, case-insensitively
    pub fn matches(&self, subject: &str) -> bool {
        let subject = subject.to_lowercase();
        match self {
            SearchExpr::Or(tokens) => tokens
                .iter()
                .any(|t| subject.contains(&t.to_lowercase())),
            SearchExpr::And(tokens) => tokens
                .iter()
                .all(|t| subject.contains(&t.to_lowercase())),
        }
    }
}

/// Split on a whitespace-delimited operator word, case-insensitively
fn split_operator(raw: &str, op: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = Vec::new();
    for word in raw.split_whitespace() {
        if word.eq_ignore_ascii_case(op) {
            if !current.is_empty() {
                tokens.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(word);
        }
    }
    if !current.is_empty() {
        tokens.push(current.join(" "));
    }
    tokens
}

/// Strip surrounding quotes and drop empty tokens
fn clean_tokens(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|t| {
            let t = t.trim();
            let t = t.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(t);
            let t = t
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(t);
            t.to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_term() {
        let expr = SearchExpr::parse("invoice").unwrap();
        assert_eq!(expr, SearchExpr::Or(vec!["invoice".to_string()]));
        assert!(expr.matches("Your Invoice is ready"));
        assert!(!expr.matches("Order shipped"));
    }

    #[test]
    fn test_or_split_case_insensitive() {
        let expr = SearchExpr::parse("verification or otp").unwrap();
        assert_eq!(
            expr,
            SearchExpr::Or(vec!["verification".to_string(), "otp".to_string()])
        );

        let subjects = [
            "Your OTP is 123",
            "Order shipped",
            "verification required",
            "Re: invoice",
        ];
        let matched: Vec<_> = subjects.iter().filter(|s| expr.matches(s)).collect();
        assert_eq!(matched, vec![&"Your OTP is 123", &"verification required"]);
    }

    #[test]
    fn test_and_split() {
        let expr = SearchExpr::parse("order AND shipped").unwrap();
        assert_eq!(
            expr,
            SearchExpr::And(vec!["order".to_string(), "shipped".to_string()])
        );
        assert!(expr.matches("Your order has shipped"));
        assert!(!expr.matches("Your order is pending"));
    }

    #[test]
    fn test_multi_word_tokens() {
        let expr = SearchExpr::parse("account statement OR payment due").unwrap();
        assert_eq!(
            expr,
            SearchExpr::Or(vec![
                "account statement".to_string(),
                "payment due".to_string()
            ])
        );
    }

    #[test]
    fn test_quotes_stripped() {
        let expr = SearchExpr::parse("\"exact phrase\" OR 'other'").unwrap();
        assert_eq!(
            expr,
            SearchExpr::Or(vec!["exact phrase".to_string(), "other".to_string()])
        );
    }

    #[test]
    fn test_mixed_operators_treated_as_or() {
        // OR wins when both operators appear
        let expr = SearchExpr::parse("a AND b OR c").unwrap();
        assert_eq!(
            expr,
            SearchExpr::Or(vec!["a AND b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_blank_is_none() {
        assert_eq!(SearchExpr::parse("   "), None);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            EmailFilter::split_list("a@x.com, b@y.com ,"),
            vec!["a@x.com".to_string(), "b@y.com".to_string()]
        );
    }

    #[test]
    fn test_filter_default_is_unconstrained() {
        let filter = EmailFilter::any();
        assert!(filter.sender.is_none());
        assert!(filter.is_unread.is_none());
    }

    #[test]
    fn test_filter_serde_round_trip() {
        let json = r#"{"sender_email":"x@y.z","is_unread":true}"#;
        let filter: EmailFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.sender_email.as_deref(), Some("x@y.z"));
        assert_eq!(filter.is_unread, Some(true));
        assert_eq!(filter.is_starred, None);
    }
}
