//! Facade configuration.

use thiserror::Error;

/// How levels hold and merge shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutPolicy {
    /// Levels accumulate up to `scale_factor` shards, merged down in bulk.
    #[default]
    Tiering,
    /// One shard per level, merged down on overflow.
    Leveling,
    /// Bentley–Saxe binary decomposition; forces `scale_factor == 2`.
    BentleySaxe,
}

/// How `erase` removes records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Insert a cancelling tombstone record.
    #[default]
    Tombstone,
    /// Tag the live record in place; serial scheduler only.
    Tagging,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("buffer low watermark {low} must be in 1..={high}")]
    WatermarkInversion { low: usize, high: usize },
    #[error("scale factor {0} must be at least 2")]
    ScaleFactorTooSmall(usize),
    #[error("Bentley-Saxe layout requires scale factor 2, got {0}")]
    BsmScaleFactor(usize),
    #[error("tagged deletion requires the serial scheduler")]
    TaggingRequiresSerial,
}

#[derive(Debug, Clone)]
pub struct ExtensionOptions {
    /// Buffer fill level that triggers a flush.
    pub buffer_low_watermark: usize,
    /// Buffer capacity; appends fail above it until the flush completes.
    pub buffer_high_watermark: usize,
    /// Growth rate of level capacities.
    pub scale_factor: usize,
    /// Per-level tombstone proportion tolerated before compaction.
    pub max_delete_proportion: f64,
    /// Reserved for memory-aware reconstruction planning; not consulted
    /// yet.
    pub memory_budget: usize,
    /// Worker threads available to a pooled scheduler.
    pub thread_cnt: usize,
    pub layout: LayoutPolicy,
    pub delete_policy: DeletePolicy,
}

impl Default for ExtensionOptions {
    fn default() -> Self {
        Self {
            buffer_low_watermark: 4 * 1024,
            buffer_high_watermark: 8 * 1024,
            scale_factor: 6,
            max_delete_proportion: 1.0,
            memory_budget: 0,
            thread_cnt: 16,
            layout: LayoutPolicy::default(),
            delete_policy: DeletePolicy::default(),
        }
    }
}

impl ExtensionOptions {
    pub(crate) fn validate(&self, serial_scheduler: bool) -> Result<(), OptionsError> {
        if self.buffer_low_watermark == 0 || self.buffer_low_watermark > self.buffer_high_watermark
        {
            return Err(OptionsError::WatermarkInversion {
                low: self.buffer_low_watermark,
                high: self.buffer_high_watermark,
            });
        }
        if self.scale_factor < 2 {
            return Err(OptionsError::ScaleFactorTooSmall(self.scale_factor));
        }
        if self.layout == LayoutPolicy::BentleySaxe && self.scale_factor != 2 {
            return Err(OptionsError::BsmScaleFactor(self.scale_factor));
        }
        if self.delete_policy == DeletePolicy::Tagging && !serial_scheduler {
            return Err(OptionsError::TaggingRequiresSerial);
        }
        Ok(())
    }
}
