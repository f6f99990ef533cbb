//! 描述文本相似度: 归一化后的词集合 Jaccard

use std::collections::BTreeSet;

/// 不参与比较的常见填充词
const FILLER_WORDS: &[&str] = &[
    "and", "for", "the", "of", "with", "per", "to", "in", "on", "by", "ea", "pcs", "unit",
    "units",
];

/// 将描述拆成小写的字母数字词集合, 丢弃单字符和填充词
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !FILLER_WORDS.contains(&t.as_str()))
        .collect()
}

#[inline]
fn count_to_f64(count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        count as f64
    }
}

/// Jaccard similarity: |A ∩ B| / |A ∪ B|
///
/// 两个集合都为空时返回 0.0, 避免空描述之间互相匹配
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        count_to_f64(intersection) / count_to_f64(union)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn similarity(a: &str, b: &str) -> f64 {
        jaccard(&tokenize(a), &tokenize(b))
    }

    #[test]
    fn tokenize_normalizes_case_and_punctuation() {
        let tokens = tokenize("Hex Bolt, M8x40 - Zinc (per EA)");
        let expected: BTreeSet<String> = ["hex", "bolt", "m8x40", "zinc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn identical_descriptions_score_one() {
        assert!((similarity("Copy paper A4", "copy PAPER a4") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_overlap() {
        // {copy, paper, a4} vs {copy, paper, a3}: 2 / 4
        let sim = similarity("copy paper A4", "copy paper A3");
        assert!((sim - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_descriptions_do_not_match() {
        assert_eq!(similarity("", "-"), 0.0);
    }
}
