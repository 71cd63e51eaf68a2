//! Joint training loss across all stages

use burn::prelude::*;

use crate::config::stage_key;
use crate::context::Context;
use crate::diagnostics::{LiveTensors, MemoryDiagnostics};
use crate::error::CascadeError;
use crate::resize::{needs_resize, resize_to};
use crate::router::training_context;
use crate::stage::{LossOutput, StageModel, LOSS_KEY};

/// Sums the independently computed losses of every stage
pub struct LossAggregator<'a, B: Backend> {
    stages: &'a [Box<dyn StageModel<B>>],
    diagnostics: &'a dyn MemoryDiagnostics,
}

impl<'a, B: Backend> LossAggregator<'a, B> {
    pub fn new(
        stages: &'a [Box<dyn StageModel<B>>],
        diagnostics: &'a dyn MemoryDiagnostics,
    ) -> Self {
        Self {
            stages,
            diagnostics,
        }
    }

    /// Computes the cascade loss on a full-resolution batch
    ///
    /// Each stage sees the batch resized to its own input size, and
    /// super-resolution stages get conditioning derived from the original
    /// batch. The returned output holds the total under `loss` and each
    /// stage's contribution under `cascade_layer_<n>/loss`.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        context: &Context<B>,
    ) -> Result<LossOutput<B>, CascadeError> {
        let mut output = LossOutput::empty();
        let mut total: Option<Tensor<B, 1>> = None;

        for (i, stage) in self.stages.iter().enumerate() {
            let index = i + 1;
            let config = stage.config();

            let context_for_layer = training_context(config, context, &images);
            let resized = needs_resize(&images, config.image_size());
            let images_for_layer = resize_to(images.clone(), config.image_size());
            tracing::debug!(
                stage = index,
                resized,
                dims = ?images_for_layer.dims(),
                "Computing stage loss"
            );

            let result = stage
                .loss(images_for_layer.clone(), context_for_layer.clone())
                .and_then(LossOutput::into_loss);

            let loss = match result {
                Ok(loss) => loss,
                Err(source) => {
                    if source.is_out_of_memory() {
                        let mut live = LiveTensors::new();
                        live.track("images", &images)
                            .track("images_for_layer", &images_for_layer)
                            .track_context(&context_for_layer);
                        if let Some(total) = &total {
                            live.track("running_loss", total);
                        }
                        self.diagnostics.report_live_tensors(index, live.reports());
                    }
                    return Err(CascadeError::Stage {
                        stage: index,
                        source,
                    });
                }
            };

            output = output.with_entry(format!("{}/{LOSS_KEY}", stage_key(index)), loss.clone());
            total = Some(match total {
                Some(total) => total + loss,
                None => loss,
            });
        }

        let total = total.ok_or(CascadeError::EmptyCascade)?;
        Ok(output.with_entry(LOSS_KEY, total))
    }
}
