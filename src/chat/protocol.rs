//! ワーカープロセスとの行区切りJSONプロトコル
//!
//! ワーカーのstdoutは1行につき1個のJSONオブジェクト。`type`フィールドで
//! 判別する。stdinには停止コマンドとしてリテラル行 `stop` を送る。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Comment;

/// stdin経由の停止コマンド
pub const STOP_COMMAND: &str = "stop";

/// プロトコルパースエラー
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSONパースエラー: {0}")]
    Json(#[from] serde_json::Error),
}

/// ワーカーからの1行メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// コメント保存先のDBパス通知（起動後の最初の1行）
    DbPath {
        #[serde(rename = "dbPath")]
        db_path: String,
    },
    /// 受信したコメント1件
    Comment { comment: Comment },
    /// ワーカー側で発生したエラー（致命的とは限らない）
    Error { message: String },
    /// 停止完了（最後のstdout行）
    Stopped,
}

impl WorkerMessage {
    /// 1行をパースする。空行はNoneを返す。
    pub fn parse_line(line: &str) -> Result<Option<Self>, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }

    /// 改行なしの1行にエンコードする
    pub fn to_line(&self) -> String {
        // Comment/Stringのシリアライズは失敗しない
        serde_json::to_string(self).expect("WorkerMessage serialization")
    }
}
