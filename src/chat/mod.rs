//! チャットデータモデル
//!
//! ワーカープロセスが正規化したコメント（チャット/スーパーチャット/スタンプ）を
//! 表す共通型。ワイヤ表現（JSONL・SQLite）と同じフィールド名を使う。

pub mod protocol;
pub mod store;

use serde::{Deserialize, Serialize};

/// スタンプのみのコメントを表す読み上げ用センチネル
pub const STICKER_SENTINEL: &str = "（スタンプ）";

/// コメント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    /// 通常チャット
    #[default]
    Text,
    /// スーパーチャット
    SuperChat,
    /// スーパーステッカー
    SuperSticker,
    /// メンバーシップ
    Membership,
    /// メンバーシップギフト
    Gift,
    /// 不明な種別（前方互換のため保持）
    #[serde(other)]
    Unknown,
}

/// コメント本文の構造化セグメント
///
/// `text` はプレーンテキスト、`emoji` はカスタム絵文字のショートコード、
/// `sticker` はスタンプ画像URL。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentPart {
    /// カスタム絵文字（emojiはショートコード表記）
    Emoji {
        emoji: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// スーパーステッカー等のスタンプ
    Sticker { sticker: String },
    /// プレーンテキスト
    Text { text: String },
}

/// 正規化済みのライブチャットコメント
///
/// ワーカープロセスが生成し、一度保存された後は不変。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Comment {
    /// ソース側で割り当てられた一意ID
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    /// ソースイベント時刻（ミリ秒、概ね単調だが厳密ではない）
    #[serde(default)]
    pub timestamp_ms: i64,
    /// 表示用タイムスタンプ文字列
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub author: String,
    /// プレーンテキスト本文（partsがあればそちらが優先）
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: CommentKind,
    /// スーパーチャット金額（最小単位）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_text: Option<String>,
    /// 投稿者アイコンURL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// 構造化セグメント（textより情報が多い）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<CommentPart>,
}

impl Comment {
    /// 構造化セグメントから生テキストを組み立てる
    ///
    /// partsが空の場合はtextフィールドをそのまま返す。
    /// 絵文字セグメントはショートコード表記のまま寄与し、
    /// スタンプはセンチネル文字列になる。
    pub fn raw_text(&self) -> String {
        if self.parts.is_empty() {
            return self.text.clone();
        }

        let mut out = String::new();
        for part in &self.parts {
            match part {
                CommentPart::Text { text } => out.push_str(text),
                CommentPart::Emoji { emoji, .. } => out.push_str(emoji),
                CommentPart::Sticker { .. } => out.push_str(STICKER_SENTINEL),
            }
        }
        out
    }
}
