//! Per-stage context routing
//!
//! Every stage receives its own copy of the caller's context. Super-resolution
//! stages additionally get a low-resolution image under their declared
//! conditioning key: during training it is derived from the original input
//! batch, during sampling it is the previous stage's output as produced.

use burn::prelude::*;

use crate::config::StageConfig;
use crate::context::Context;
use crate::resize::resize_to;

/// Context for a stage's loss computation
///
/// `images` must be the original, full-resolution batch, never a copy already
/// resized for another stage.
pub fn training_context<B: Backend>(
    stage: &StageConfig,
    base: &Context<B>,
    images: &Tensor<B, 4>,
) -> Context<B> {
    let mut context = base.clone();

    if let Some(sr) = stage.conditioning() {
        let low_res = resize_to(images.clone(), sr.low_resolution_size);
        tracing::debug!(
            key = %sr.conditioning_key,
            size = sr.low_resolution_size,
            "Derived low-resolution conditioning"
        );
        context.insert(sr.conditioning_key.clone(), low_res);
    }

    context
}

/// Context for a stage's sampling call
///
/// The previous stage's output is injected unresized; nothing is injected
/// for the first stage or for stages without a conditioning key.
pub fn sampling_context<B: Backend>(
    stage: &StageConfig,
    base: Option<&Context<B>>,
    previous: Option<&Tensor<B, 4>>,
) -> Context<B> {
    let mut context = base.cloned().unwrap_or_default();

    match (stage.conditioning(), previous) {
        (Some(sr), Some(previous)) => {
            tracing::debug!(
                key = %sr.conditioning_key,
                dims = ?previous.dims(),
                "Routing previous stage output"
            );
            context.insert(sr.conditioning_key.clone(), previous.clone());
        }
        (None, Some(_)) => {
            tracing::debug!("Stage has no conditioning key; previous output not routed");
        }
        _ => {}
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn sr_stage() -> StageConfig {
        StageConfig::new(256).with_super_resolution("low_res", 64)
    }

    #[test]
    fn test_training_context_downsamples_original() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 256, 256], &device);
        let base = Context::new().with("prompt", "a castle");

        let context = training_context(&sr_stage(), &base, &images);

        let low_res = context.image("low_res").unwrap();
        assert_eq!(low_res.dims(), [2, 3, 64, 64]);
        assert!(context.contains_key("prompt"));
        assert!(!base.contains_key("low_res"));
    }

    #[test]
    fn test_training_context_passthrough_without_sr() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
        let base = Context::new().with("prompt", "a castle");

        let context = training_context(&StageConfig::new(64), &base, &images);
        assert_eq!(context.keys(), vec!["prompt"]);
    }

    #[test]
    fn test_sampling_context_routes_previous_output_unresized() {
        let device = Default::default();
        let previous = Tensor::<TestBackend, 4>::ones([4, 3, 32, 32], &device);

        // Declared low-res size differs from the previous output; no resize happens
        let context = sampling_context(&sr_stage(), None, Some(&previous));
        let routed = context.image("low_res").unwrap();
        assert_eq!(routed.dims(), [4, 3, 32, 32]);
        assert!(routed.clone().equal(previous).all().into_scalar());
    }

    #[test]
    fn test_sampling_context_first_stage() {
        let base = Context::<TestBackend>::new().with("prompt", "a castle");

        let context = sampling_context(&StageConfig::new(64), Some(&base), None);
        assert_eq!(context.keys(), vec!["prompt"]);

        let context = sampling_context::<TestBackend>(&StageConfig::new(64), None, None);
        assert!(context.is_empty());
    }

    #[test]
    fn test_sampling_context_ignores_previous_without_sr() {
        let device = Default::default();
        let previous = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);

        let context = sampling_context(&StageConfig::new(64), None, Some(&previous));
        assert!(context.is_empty());
    }
}
