//! 読み上げテキスト変換パイプライン
//!
//! 変換は固定順序で適用する：
//! 生テキスト → 置換ルール → 絵文字読み仮名 → 絵文字・不可視マーク除去 →
//! 残存ショートコード除去 → 空白圧縮。順序には意味がある（置換で意図的に
//! ショートコードへ展開し、後段で除去させる使い方ができる）。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::chat::{Comment, STICKER_SENTINEL};

use super::policy::{ReactionPolicy, Replacement};

fn shortcode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":[A-Za-z0-9_+\-]+:").unwrap())
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// 絵文字・記号類のコードポイントか
fn is_pictographic(c: char) -> bool {
    matches!(u32::from(c),
        0x1F000..=0x1FAFF   // 絵文字本体（麻雀牌〜拡張絵文字）
        | 0x2600..=0x27BF   // その他の記号・装飾記号
        | 0x2B00..=0x2BFF   // 矢印・星など
        | 0x203C | 0x2049   // ‼ ⁉
        | 0x20E3            // 囲みキーキャップ
        | 0xE0000..=0xE007F // タグ文字
    )
}

/// ゼロ幅・異体字セレクタなどの不可視マークか
fn is_invisible_mark(c: char) -> bool {
    matches!(u32::from(c),
        0xFE00..=0xFE0F     // 異体字セレクタ
        | 0x200B..=0x200D   // ゼロ幅スペース/非接合子/接合子
        | 0x2060 | 0xFEFF
    )
}

/// 肌色修飾子か
fn is_skin_tone(c: char) -> bool {
    matches!(u32::from(c), 0x1F3FB..=0x1F3FF)
}

/// 置換ルールを登録順に適用する（各ルールは単独で全文置換）
pub fn apply_replacements(text: &str, rules: &[Replacement]) -> String {
    let mut result = text.to_string();
    for rule in rules {
        if rule.from.is_empty() {
            continue;
        }
        result = result.replace(&rule.from, &rule.to);
    }
    result
}

/// 絵文字ショートコードを読み仮名に置換する
///
/// キーはショートコード表記そのもの（例: `:_わこ:`）。HashMapの列挙順に
/// 依存しないよう、キーの辞書順で適用する。
pub fn apply_emoji_readings(text: &str, readings: &HashMap<String, String>) -> String {
    if readings.is_empty() {
        return text.to_string();
    }
    let mut keys: Vec<&String> = readings.keys().collect();
    keys.sort();

    let mut result = text.to_string();
    for key in keys {
        if key.is_empty() {
            continue;
        }
        result = result.replace(key.as_str(), &readings[key]);
    }
    result
}

/// 絵文字と不可視マークを除去する
pub fn strip_pictographs(text: &str) -> String {
    text.chars()
        .filter(|&c| !is_pictographic(c) && !is_invisible_mark(c))
        .collect()
}

/// 残った `:shortcode:` 形式のトークンを除去する
pub fn strip_shortcodes(text: &str) -> String {
    shortcode_regex().replace_all(text, "").to_string()
}

/// 連続空白を1つにまとめ、前後をトリムする
pub fn collapse_whitespace(text: &str) -> String {
    whitespace_regex().replace_all(text, " ").trim().to_string()
}

/// キーワード照合用の正規化（不可視マークと肌色修飾子を除去）
pub fn normalize_for_match(text: &str) -> String {
    text.chars()
        .filter(|&c| !is_invisible_mark(c) && !is_skin_tone(c))
        .collect()
}

/// NGワード判定（大小区別の部分一致、最初の一致で打ち切り）
pub fn contains_ng_word(text: &str, ng_words: &[String]) -> bool {
    ng_words
        .iter()
        .any(|w| !w.is_empty() && text.contains(w.as_str()))
}

/// トリガーキーワード判定
///
/// まず素の部分一致、だめなら正規化して照合する（絵文字の異体字
/// セレクタや肌色修飾子の揺れを許容するため）。
pub fn contains_trigger(text: &str, keywords: &[String]) -> bool {
    if keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str())) {
        return true;
    }
    let normalized = normalize_for_match(text);
    keywords.iter().any(|k| {
        if k.is_empty() {
            return false;
        }
        let nk = normalize_for_match(k);
        !nk.is_empty() && normalized.contains(&nk)
    })
}

/// コメントから読み上げテキストを組み立てる
pub fn spoken_text(comment: &Comment, policy: &ReactionPolicy) -> String {
    let raw = comment.raw_text();
    let replaced = apply_replacements(&raw, &policy.replacements);
    let with_readings = apply_emoji_readings(&replaced, &policy.emoji_readings);
    let stripped = strip_shortcodes(&strip_pictographs(&with_readings));
    collapse_whitespace(&stripped)
}

/// LLM応答から読み上げテキストを組み立てる（読み仮名置換は行わない）
pub fn spoken_reply(reply: &str, policy: &ReactionPolicy) -> String {
    let replaced = apply_replacements(reply, &policy.replacements);
    let stripped = strip_shortcodes(&strip_pictographs(&replaced));
    collapse_whitespace(&stripped)
}

/// 合成する価値のあるテキストか（空・スタンプのみは読み上げない）
pub fn is_speakable(text: &str) -> bool {
    !text.is_empty() && text != STICKER_SENTINEL
}
