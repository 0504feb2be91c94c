//! Rule-based scoring: invoice match confidence and caption quality.
//!
//! Invoice confidence combines vendor, amount and date similarity at
//! 0.45 / 0.40 / 0.15 weight. Caption quality combines language, brand,
//! length and engagement at 0.35 / 0.30 / 0.15 / 0.20.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::state::{Brand, DecisionType, Language, QualityBreakdown};

/// Auto-match threshold.
pub const AUTO_MATCH_THRESHOLD: f64 = 0.90;
/// Human-review threshold.
pub const HUMAN_REVIEW_THRESHOLD: f64 = 0.70;
/// Auto-publish threshold for captions.
pub const AUTO_PUBLISH_THRESHOLD: f64 = 0.85;
/// Minimum quality to keep a caption at all.
pub const QUALITY_FLOOR: f64 = 0.70;
/// Similarity above which a caption counts as a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 0.90;

const NL_KEYWORDS: &[&str] = &[
    "nieuw", "voor", "jouw", "binnen", "naar", "stijl", "jij", "vandaag",
];
const FR_KEYWORDS: &[&str] = &[
    "nouveau",
    "nouvelle",
    "pour",
    "votre",
    "dans",
    "élégance",
    "style",
    "à",
];
const CALL_TO_ACTION_WORDS: &[&str] = &[
    "shop",
    "ontdek",
    "bekijk",
    "bestel",
    "découvrez",
    "profitez",
    "commandez",
    "nu",
    "maintenant",
];

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Vendor similarity: 1.0 exact case-insensitive, 0.7 substring either
/// direction, 0.5 when at least half the smaller token set overlaps.
#[must_use]
pub fn vendor_similarity(a: &str, b: &str) -> f64 {
    let a_norm = a.trim().to_lowercase();
    let b_norm = b.trim().to_lowercase();
    if a_norm.is_empty() || b_norm.is_empty() {
        return 0.0;
    }
    if a_norm == b_norm {
        return 1.0;
    }
    if a_norm.contains(&b_norm) || b_norm.contains(&a_norm) {
        return 0.7;
    }
    let a_tokens: HashSet<String> = tokens(&a_norm).into_iter().collect();
    let b_tokens: HashSet<String> = tokens(&b_norm).into_iter().collect();
    let smaller = a_tokens.len().min(b_tokens.len());
    if smaller == 0 {
        return 0.0;
    }
    let overlap = a_tokens.intersection(&b_tokens).count();
    if overlap * 2 >= smaller {
        if overlap == 0 {
            return 0.0;
        }
        return 0.5;
    }
    0.0
}

/// Amount similarity: 1.0 within 0.5% relative difference, linear falloff
/// to 0 at 15%.
#[must_use]
pub fn amount_similarity(a: f64, b: f64) -> f64 {
    let max = a.abs().max(b.abs());
    if max == 0.0 {
        return if a == b { 1.0 } else { 0.0 };
    }
    let relative = (a - b).abs() / max;
    if relative <= 0.005 {
        1.0
    } else if relative >= 0.15 {
        0.0
    } else {
        1.0 - (relative - 0.005) / (0.15 - 0.005)
    }
}

/// Date similarity banded by day distance.
#[must_use]
pub fn date_similarity(a: NaiveDate, b: NaiveDate) -> f64 {
    let days = (a - b).num_days().abs();
    match days {
        0 => 1.0,
        1 => 0.8,
        2..=7 => 0.5,
        8..=30 => 0.2,
        _ => 0.0,
    }
}

/// Weighted match confidence.
#[must_use]
pub fn match_confidence(vendor: f64, amount: f64, date: f64) -> f64 {
    0.45 * vendor + 0.40 * amount + 0.15 * date
}

/// Decision band for a confidence value.
#[must_use]
pub fn decide(confidence: f64) -> DecisionType {
    if confidence >= AUTO_MATCH_THRESHOLD {
        DecisionType::AutoMatch
    } else if confidence >= HUMAN_REVIEW_THRESHOLD {
        DecisionType::HumanReview
    } else {
        DecisionType::NoMatch
    }
}

fn language_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Nl => NL_KEYWORDS,
        Language::Fr => FR_KEYWORDS,
    }
}

/// 1.0 with at least two target-language keyword matches, else 0.
#[must_use]
pub fn language_score(caption: &str, language: Language) -> f64 {
    let caption_tokens: HashSet<String> = tokens(caption).into_iter().collect();
    let matches = language_keywords(language)
        .iter()
        .filter(|k| caption_tokens.contains(&k.to_string()))
        .count();
    if matches >= 2 {
        1.0
    } else {
        0.0
    }
}

/// 1.0 when the declared capitalization appears verbatim, 0.7 for a
/// case-insensitive appearance, else 0.
#[must_use]
pub fn brand_score(caption: &str, brand: Brand) -> f64 {
    if caption.contains(brand.display_name()) {
        1.0
    } else if caption.to_lowercase().contains(brand.key()) {
        0.7
    } else {
        0.0
    }
}

/// Length bands over character count.
#[must_use]
pub fn length_score(caption: &str) -> f64 {
    let chars = caption.chars().count();
    match chars {
        50..=150 => 1.0,
        30..=49 | 151..=200 => 0.7,
        _ => 0.3,
    }
}

fn is_emoji(c: char) -> bool {
    let cp = c as u32;
    (0x1F000..=0x1FAFF).contains(&cp) || (0x2600..=0x27BF).contains(&cp)
}

/// Count emoji code points in a caption.
#[must_use]
pub fn emoji_count(caption: &str) -> usize {
    caption.chars().filter(|c| is_emoji(*c)).count()
}

/// Engagement: +0.5 for at least two emoji, +0.3 for a call-to-action word,
/// +0.2 for a hashtag, clamped to 1.0.
#[must_use]
pub fn engagement_score(caption: &str) -> f64 {
    let mut score: f64 = 0.0;
    if emoji_count(caption) >= 2 {
        score += 0.5;
    }
    let caption_tokens: HashSet<String> = tokens(caption).into_iter().collect();
    if CALL_TO_ACTION_WORDS
        .iter()
        .any(|w| caption_tokens.contains(&w.to_string()))
    {
        score += 0.3;
    }
    if caption.contains('#') {
        score += 0.2;
    }
    score.min(1.0)
}

/// Token-set Jaccard overlap between two captions, the text-level signal
/// behind duplicate detection once the candidate caption exists.
#[must_use]
pub fn caption_overlap(a: &str, b: &str) -> f64 {
    let a_tokens: HashSet<String> = tokens(a).into_iter().collect();
    let b_tokens: HashSet<String> = tokens(b).into_iter().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    intersection as f64 / union as f64
}

/// Full caption quality breakdown.
#[must_use]
pub fn caption_quality(caption: &str, brand: Brand, language: Language) -> QualityBreakdown {
    let language_s = language_score(caption, language);
    let brand_s = brand_score(caption, brand);
    let length_s = length_score(caption);
    let engagement_s = engagement_score(caption);
    QualityBreakdown {
        language: language_s,
        brand: brand_s,
        length: length_s,
        engagement: engagement_s,
        total: 0.35 * language_s + 0.30 * brand_s + 0.15 * length_s + 0.20 * engagement_s,
    }
}
