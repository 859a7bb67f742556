//! Ordered URL classification rules.
//!
//! The first matching rule wins, so more specific patterns must come before
//! the catch-all. Adding a provider means adding one entry here.

use std::sync::LazyLock;

use regex::Regex;

use crate::SourceKind;

/// Cloud providers whose public shares we can exchange for a direct href.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    YandexDisk,
}

impl CloudProvider {
    pub fn name(&self) -> &'static str {
        match self {
            CloudProvider::YandexDisk => "yandex-disk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleOutcome {
    Direct,
    CloudPublic(CloudProvider),
    NeedsExtractor,
}

struct Rule {
    regex: &'static LazyLock<Regex>,
    outcome: RuleOutcome,
}

static DIRECT_MEDIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(mp4|mov|mkv|webm|avi)(\?|$)").unwrap());

static YANDEX_PUBLIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:(?:www\.)?disk\.yandex\.[a-z]+|yadi\.sk)/").unwrap()
});

// Mail.ru public shares need an authenticated session for direct downloads,
// so they go straight to the extractor instead of a scraping attempt.
static MAILRU_PUBLIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://cloud\.mail\.ru/public/").unwrap());

static RULES: &[Rule] = &[
    Rule {
        regex: &DIRECT_MEDIA,
        outcome: RuleOutcome::Direct,
    },
    Rule {
        regex: &YANDEX_PUBLIC,
        outcome: RuleOutcome::CloudPublic(CloudProvider::YandexDisk),
    },
    Rule {
        regex: &MAILRU_PUBLIC,
        outcome: RuleOutcome::NeedsExtractor,
    },
];

pub(crate) fn match_rule(url: &str) -> RuleOutcome {
    for rule in RULES {
        if rule.regex.is_match(url) {
            return rule.outcome;
        }
    }
    RuleOutcome::NeedsExtractor
}

/// Classify a URL without resolving it.
pub fn classify(url: &str) -> SourceKind {
    match match_rule(url) {
        RuleOutcome::Direct => SourceKind::Direct,
        RuleOutcome::CloudPublic(_) => SourceKind::CloudPublic,
        RuleOutcome::NeedsExtractor => SourceKind::NeedsExtractor,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://host.example/video.mp4", SourceKind::Direct)]
    #[case("https://host.example/video.MKV?token=x", SourceKind::Direct)]
    #[case("https://host.example/clip.webm", SourceKind::Direct)]
    #[case("https://disk.yandex.ru/d/AbCdEf123", SourceKind::CloudPublic)]
    #[case("https://disk.yandex.com/i/XyZ", SourceKind::CloudPublic)]
    #[case("https://yadi.sk/i/AbCdEf123", SourceKind::CloudPublic)]
    #[case("https://cloud.mail.ru/public/XXX/YYYYYYYY", SourceKind::NeedsExtractor)]
    #[case("https://videos.example/watch?v=dQw4w9WgXcQ", SourceKind::NeedsExtractor)]
    #[case("https://host.example/page.html", SourceKind::NeedsExtractor)]
    fn classifies_by_first_matching_rule(#[case] url: &str, #[case] expected: SourceKind) {
        assert_eq!(classify(url), expected);
    }

    #[test]
    fn direct_extension_wins_over_cloud_domain() {
        // A share link that happens to end in a media extension is still a
        // direct link as far as fetching is concerned.
        assert_eq!(
            classify("https://disk.yandex.ru/files/video.mp4"),
            SourceKind::Direct
        );
    }
}
