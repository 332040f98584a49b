//! The host's per-frame pipeline stages

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered frame stages. Values match the host's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FrameStage {
    FrameStart = 0,
    NetUpdateStart = 1,
    NetUpdatePostDataUpdateStart = 2,
    /// Network state fully applied; the snapshot is refreshed here
    NetUpdatePostDataUpdateEnd = 3,
    NetUpdateEnd = 4,
    RenderStart = 5,
    RenderEnd = 6,
}

impl FrameStage {
    pub const ALL: [FrameStage; 7] = [
        FrameStage::FrameStart,
        FrameStage::NetUpdateStart,
        FrameStage::NetUpdatePostDataUpdateStart,
        FrameStage::NetUpdatePostDataUpdateEnd,
        FrameStage::NetUpdateEnd,
        FrameStage::RenderStart,
        FrameStage::RenderEnd,
    ];

    /// Successor in the cycle; `RenderEnd` wraps to `FrameStart`
    pub fn next(self) -> FrameStage {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }

    pub fn from_index(value: u8) -> Option<FrameStage> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether the snapshot is refreshed on entering this stage
    pub fn refreshes_snapshot(self) -> bool {
        self == FrameStage::NetUpdatePostDataUpdateEnd
    }
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::FrameStart => "FRAME_START",
            FrameStage::NetUpdateStart => "FRAME_NET_UPDATE_START",
            FrameStage::NetUpdatePostDataUpdateStart => "FRAME_NET_UPDATE_POSTDATAUPDATE_START",
            FrameStage::NetUpdatePostDataUpdateEnd => "FRAME_NET_UPDATE_POSTDATAUPDATE_END",
            FrameStage::NetUpdateEnd => "FRAME_NET_UPDATE_END",
            FrameStage::RenderStart => "FRAME_RENDER_START",
            FrameStage::RenderEnd => "FRAME_RENDER_END",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_cycle() {
        let mut stage = FrameStage::FrameStart;
        for expected in FrameStage::ALL.iter().skip(1) {
            stage = stage.next();
            assert_eq!(stage, *expected);
        }
        assert_eq!(stage.next(), FrameStage::FrameStart);
    }

    #[test]
    fn numeric_values_match_host() {
        assert_eq!(FrameStage::from_index(3), Some(FrameStage::NetUpdatePostDataUpdateEnd));
        assert_eq!(FrameStage::RenderEnd as u8, 6);
        assert_eq!(FrameStage::from_index(7), None);
    }
}
