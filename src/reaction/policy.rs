//! リアクションポリシー
//!
//! コメントごとに参照されるミュータブルな判定設定。タスクはロックを
//! await越しに持たず、キュー投入時と実行直前の2回スナップショットを取る。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 読み上げテキストの置換ルール（登録順に全文置換）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// リアクション判定・変換の設定スナップショット
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionPolicy {
    /// 読み上げ対象から除外する投稿者
    #[serde(default)]
    pub blocked_authors: HashSet<String>,
    /// 表示名の別名（プロンプト内で使用）
    #[serde(default)]
    pub author_aliases: HashMap<String, String>,
    /// 含まれていたら読み上げないNGワード（大小区別の部分一致）
    #[serde(default)]
    pub ng_words: Vec<String>,
    /// 読み上げ前の置換ルール（順序が意味を持つ）
    #[serde(default)]
    pub replacements: Vec<Replacement>,
    /// 絵文字ショートコードの読み仮名
    #[serde(default)]
    pub emoji_readings: HashMap<String, String>,
    /// LLM応答を発火させるキーワード
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    /// コメント読み上げ用の話者ID
    #[serde(default)]
    pub tts_speaker: Option<i32>,
    /// LLM応答読み上げ用の話者ID
    #[serde(default)]
    pub llm_speaker: Option<i32>,
    /// 音声エンジンへの疎通が取れているか（実行時に更新）
    #[serde(default)]
    pub speech_enabled: bool,
    /// OpenAI APIキー
    #[serde(default)]
    pub api_key: Option<String>,
    /// LLMに渡す性格/口調の指定
    #[serde(default)]
    pub persona: String,
}

impl ReactionPolicy {
    /// 別名があればそれを、なければ元の投稿者名を返す
    pub fn display_name<'a>(&'a self, author: &'a str) -> &'a str {
        self.author_aliases
            .get(author)
            .map(String::as_str)
            .unwrap_or(author)
    }

    /// LLM応答に必要な設定が揃っているか
    pub fn llm_ready(&self) -> bool {
        self.llm_speaker.is_some()
            && self
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }
}

/// ポリシーの共有ハンドル
///
/// 設定画面などの外部からの更新と、スケジューラからのスナップショット取得を仲介する。
#[derive(Clone, Default)]
pub struct PolicyHandle {
    inner: Arc<parking_lot::RwLock<ReactionPolicy>>,
}

impl PolicyHandle {
    pub fn new(policy: ReactionPolicy) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(policy)),
        }
    }

    /// 現在のポリシーのスナップショットを取る
    pub fn snapshot(&self) -> ReactionPolicy {
        self.inner.read().clone()
    }

    /// ポリシーを更新する
    pub fn update(&self, f: impl FnOnce(&mut ReactionPolicy)) {
        let mut policy = self.inner.write();
        f(&mut policy);
    }

    /// 音声エンジンの疎通状態を反映する
    pub fn set_speech_enabled(&self, enabled: bool) {
        let mut policy = self.inner.write();
        if policy.speech_enabled != enabled {
            tracing::info!("🔊 読み上げ{}", if enabled { "有効化" } else { "無効化" });
            policy.speech_enabled = enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_alias() {
        let mut policy = ReactionPolicy::default();
        policy
            .author_aliases
            .insert("@bob".to_string(), "ボブ".to_string());
        assert_eq!(policy.display_name("@bob"), "ボブ");
        assert_eq!(policy.display_name("@alice"), "@alice");
    }

    #[test]
    fn test_llm_ready() {
        let mut policy = ReactionPolicy::default();
        assert!(!policy.llm_ready());

        policy.api_key = Some("sk-test".to_string());
        assert!(!policy.llm_ready());

        policy.llm_speaker = Some(3);
        assert!(policy.llm_ready());

        policy.api_key = Some("   ".to_string());
        assert!(!policy.llm_ready());
    }

    #[test]
    fn test_handle_snapshot_is_isolated() {
        let handle = PolicyHandle::default();
        let before = handle.snapshot();

        handle.update(|p| p.ng_words.push("spam".to_string()));

        // 取得済みスナップショットは変化しない
        assert!(before.ng_words.is_empty());
        assert_eq!(handle.snapshot().ng_words, vec!["spam"]);
    }

    #[test]
    fn test_set_speech_enabled() {
        let handle = PolicyHandle::default();
        assert!(!handle.snapshot().speech_enabled);
        handle.set_speech_enabled(true);
        assert!(handle.snapshot().speech_enabled);
    }
}
