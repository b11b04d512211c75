//! Referral tracking
//!
//! Session-scoped, last-touch attribution. Click credit is deduplicated per
//! code within the session so a reload loop cannot inflate click counts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Query-string key carrying the referral code on inbound links.
pub const REF_PARAM: &str = "ref";

#[derive(Clone, Debug, Serialize)]
pub struct ReferralAttribution {
    pub code: String,
    pub captured_at: DateTime<Utc>,
}

/// Outcome of observing an inbound link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    pub code: String,
    /// True only the first time this code is seen in the session; the
    /// caller should credit one click to the affiliate iff set.
    pub creditable: bool,
}

#[derive(Debug, Default)]
pub struct ReferralTracker {
    attribution: Option<ReferralAttribution>,
    seen: HashSet<String>,
}

impl ReferralTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the referral parameter from inbound link query params. A tagged
    /// visit overwrites any prior attribution; an untagged visit is a no-op.
    pub fn capture_from_link(&mut self, params: &HashMap<String, String>) -> Option<Capture> {
        let code = params.get(REF_PARAM)?.trim();
        if code.is_empty() {
            return None;
        }
        self.attribution = Some(ReferralAttribution {
            code: code.to_string(),
            captured_at: Utc::now(),
        });
        let creditable = self.seen.insert(code.to_string());
        Some(Capture {
            code: code.to_string(),
            creditable,
        })
    }

    pub fn active(&self) -> Option<&ReferralAttribution> {
        self.attribution.as_ref()
    }

    /// Clears the attribution. Called once a checkout has settled the
    /// commission it funded, or to discard a code that resolved to nobody.
    pub fn consume(&mut self) -> Option<ReferralAttribution> {
        self.attribution.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_capture_stores_code() {
        let mut t = ReferralTracker::new();
        let cap = t.capture_from_link(&params(&[("ref", "MARIA10")])).unwrap();
        assert_eq!(cap.code, "MARIA10");
        assert!(cap.creditable);
        assert_eq!(t.active().unwrap().code, "MARIA10");
    }

    #[test]
    fn test_untagged_link_is_noop() {
        let mut t = ReferralTracker::new();
        t.capture_from_link(&params(&[("ref", "MARIA10")]));
        assert!(t.capture_from_link(&params(&[("utm_source", "ig")])).is_none());
        assert!(t.capture_from_link(&params(&[("ref", "  ")])).is_none());
        assert_eq!(t.active().unwrap().code, "MARIA10");
    }

    #[test]
    fn test_last_touch_overwrites() {
        let mut t = ReferralTracker::new();
        t.capture_from_link(&params(&[("ref", "MARIA10")]));
        t.capture_from_link(&params(&[("ref", "JOAO20")]));
        assert_eq!(t.active().unwrap().code, "JOAO20");
    }

    #[test]
    fn test_repeat_visits_credit_one_click() {
        let mut t = ReferralTracker::new();
        assert!(t.capture_from_link(&params(&[("ref", "MARIA10")])).unwrap().creditable);
        assert!(!t.capture_from_link(&params(&[("ref", "MARIA10")])).unwrap().creditable);
        // a different code is its own first sighting
        assert!(t.capture_from_link(&params(&[("ref", "JOAO20")])).unwrap().creditable);
        assert!(!t.capture_from_link(&params(&[("ref", "MARIA10")])).unwrap().creditable);
    }

    #[test]
    fn test_consume_clears_exactly_once() {
        let mut t = ReferralTracker::new();
        t.capture_from_link(&params(&[("ref", "MARIA10")]));
        assert_eq!(t.consume().unwrap().code, "MARIA10");
        assert!(t.active().is_none());
        assert!(t.consume().is_none());
    }
}
