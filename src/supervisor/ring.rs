//! 直近コメントのリングバッファ
//!
//! UIのキャッチアップ表示用に最新N件だけを保持する。満杯時は最古を捨てる。

use std::collections::VecDeque;

use crate::chat::Comment;

/// 固定容量のリングバッファ
#[derive(Debug)]
pub struct RingBuffer {
    items: VecDeque<Comment>,
    capacity: usize,
}

impl RingBuffer {
    /// 指定容量で作成（容量0は1に切り上げ）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 末尾に追加。満杯なら最古を捨てる。
    pub fn push(&mut self, comment: Comment) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(comment);
    }

    /// 最新limit件を古い順で返す（limitは[1, capacity]にクランプ）
    pub fn recent(&self, limit: usize) -> Vec<Comment> {
        let lim = limit.clamp(1, self.capacity).min(self.items.len());
        self.items
            .iter()
            .skip(self.items.len() - lim)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
