//! Compression levels and the filter cascades they select.
//!
//! The level is stored in the container header and fixes, for the whole
//! stream, which neural-network filter stages run after the fixed first- and
//! second-stage predictors, and how many blocks a frame holds by default.
//!
//! | Level       | Id   | NN stages (order, shift)       | Blocks per frame |
//! |-------------|------|--------------------------------|------------------|
//! | `Fast`      | 1000 | none                           | 73 728           |
//! | `Normal`    | 2000 | (16, 11)                       | 73 728           |
//! | `High`      | 3000 | (64, 11)                       | 73 728           |
//! | `ExtraHigh` | 4000 | (32, 10), (256, 13)            | 294 912          |
//! | `Insane`    | 5000 | (16, 11), (256, 13), (1024, 15) | 1 179 648       |

use std::fmt;

use crate::utils::errors::FormatError;

/// Blocks per frame for the levels that do not scale it.
pub const BASE_BLOCKS_PER_FRAME: u32 = 73_728;

/// Parameters of one neural-network filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NnStage {
    /// Number of past inputs the stage predicts from.
    pub order: usize,
    /// Right shift applied to the dot product.
    pub shift: u32,
}

const fn nn(order: usize, shift: u32) -> NnStage {
    NnStage { order, shift }
}

const FAST_STAGES: &[NnStage] = &[];
const NORMAL_STAGES: &[NnStage] = &[nn(16, 11)];
const HIGH_STAGES: &[NnStage] = &[nn(64, 11)];
const EXTRA_HIGH_STAGES: &[NnStage] = &[nn(32, 10), nn(256, 13)];
const INSANE_STAGES: &[NnStage] = &[nn(16, 11), nn(256, 13), nn(1024, 15)];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CompressionLevel {
    Fast,
    #[default]
    Normal,
    High,
    ExtraHigh,
    Insane,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 5] = [
        CompressionLevel::Fast,
        CompressionLevel::Normal,
        CompressionLevel::High,
        CompressionLevel::ExtraHigh,
        CompressionLevel::Insane,
    ];

    /// Identifier written to the container header.
    pub const fn id(self) -> u16 {
        match self {
            CompressionLevel::Fast => 1000,
            CompressionLevel::Normal => 2000,
            CompressionLevel::High => 3000,
            CompressionLevel::ExtraHigh => 4000,
            CompressionLevel::Insane => 5000,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, FormatError> {
        Self::ALL
            .into_iter()
            .find(|level| level.id() == id)
            .ok_or(FormatError::UnknownCompressionLevel(id))
    }

    /// NN filter stages in the order they are applied while encoding.
    pub const fn nn_stages(self) -> &'static [NnStage] {
        match self {
            CompressionLevel::Fast => FAST_STAGES,
            CompressionLevel::Normal => NORMAL_STAGES,
            CompressionLevel::High => HIGH_STAGES,
            CompressionLevel::ExtraHigh => EXTRA_HIGH_STAGES,
            CompressionLevel::Insane => INSANE_STAGES,
        }
    }

    pub const fn default_blocks_per_frame(self) -> u32 {
        match self {
            CompressionLevel::ExtraHigh => BASE_BLOCKS_PER_FRAME * 4,
            CompressionLevel::Insane => BASE_BLOCKS_PER_FRAME * 16,
            _ => BASE_BLOCKS_PER_FRAME,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionLevel::Fast => "fast",
            CompressionLevel::Normal => "normal",
            CompressionLevel::High => "high",
            CompressionLevel::ExtraHigh => "extra high",
            CompressionLevel::Insane => "insane",
        };
        write!(f, "{name} ({})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for level in CompressionLevel::ALL {
            assert_eq!(CompressionLevel::from_id(level.id()).unwrap(), level);
        }
        assert_eq!(
            CompressionLevel::from_id(1500),
            Err(FormatError::UnknownCompressionLevel(1500))
        );
    }

    #[test]
    fn cascades_grow_with_level() {
        assert!(CompressionLevel::Fast.nn_stages().is_empty());
        assert_eq!(CompressionLevel::Normal.nn_stages(), &[nn(16, 11)]);
        assert_eq!(CompressionLevel::Insane.nn_stages().len(), 3);

        for level in CompressionLevel::ALL {
            let orders: Vec<usize> = level.nn_stages().iter().map(|s| s.order).collect();
            assert!(orders.windows(2).all(|w| w[0] < w[1]), "{level}");
        }
    }

    #[test]
    fn frame_length_scales() {
        assert_eq!(CompressionLevel::High.default_blocks_per_frame(), 73_728);
        assert_eq!(CompressionLevel::ExtraHigh.default_blocks_per_frame(), 294_912);
        assert_eq!(CompressionLevel::Insane.default_blocks_per_frame(), 1_179_648);
    }
}
