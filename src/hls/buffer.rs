use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::hls::types::MediaPlaylist;

/// 缓冲状态快照, 由预取调度器在每次变更后发布
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BufferState {
    /// 已完整缓存的分片序号
    pub ready_sequences: BTreeSet<u64>,
    /// 每个序号已就绪的部分分片数
    pub ready_part_counts: BTreeMap<u64, usize>,
    /// 已就绪时长(秒), 包括分片和部分分片
    pub prefetch_depth_secs: f64,
    /// 仅由部分分片构成的就绪时长(秒)
    pub part_depth_secs: f64,
    /// 已播放到的最高序号, 只增不减
    pub played_through: Option<u64>,
}

impl BufferState {
    /// Everything at or behind the playhead counts as ready so consumed
    /// segments never reappear as pending.
    pub fn is_ready(&self, sequence: u64) -> bool {
        if let Some(played) = self.played_through {
            if sequence <= played {
                return true;
            }
        }
        self.ready_sequences.contains(&sequence)
    }

    pub fn ready_part_count(&self, sequence: u64) -> usize {
        self.ready_part_counts.get(&sequence).copied().unwrap_or(0)
    }

    pub fn ready_segment_count(&self) -> usize {
        self.ready_sequences.len()
    }

    pub fn ready_part_total(&self) -> usize {
        self.ready_part_counts.values().sum()
    }

    /// A state where every segment and part of `playlist` is ready.
    pub fn fully_buffered(playlist: &MediaPlaylist) -> Self {
        let mut state = Self::default();
        for segment in &playlist.segments {
            state.ready_sequences.insert(segment.sequence);
            if !segment.parts.is_empty() {
                state
                    .ready_part_counts
                    .insert(segment.sequence, segment.parts.len());
            }
            state.prefetch_depth_secs += segment.duration;
        }
        state
    }
}
