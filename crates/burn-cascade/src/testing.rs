//! Mock stages for unit tests

use std::cell::RefCell;
use std::rc::Rc;

use burn::prelude::*;
use burn_ndarray::NdArray;

use crate::config::StageConfig;
use crate::context::Context;
use crate::stage::{LossOutput, StageError, StageModel, StageSample, StageSampleRequest};

pub(crate) type TestBackend = NdArray<f32>;

/// What a mock stage saw on one call
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub stage_id: f32,
    pub image_dims: Option<[usize; 4]>,
    pub context_keys: Vec<String>,
    /// Conditioning image found under the stage's conditioning key
    pub conditioning: Option<Tensor<TestBackend, 4>>,
    pub num_samples: Option<usize>,
}

pub(crate) type CallLog = Rc<RefCell<Vec<Observation>>>;

/// Stage returning `id` as its loss and batches filled with `id` as samples
pub(crate) struct MockStage {
    config: StageConfig,
    id: f32,
    oom: bool,
    log: CallLog,
}

impl MockStage {
    pub fn new(config: StageConfig, id: f32) -> Self {
        Self {
            config,
            id,
            oom: false,
            log: CallLog::default(),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn out_of_memory(mut self) -> Self {
        self.oom = true;
        self
    }

    fn observe(
        &self,
        image_dims: Option<[usize; 4]>,
        context: &Context<TestBackend>,
        num_samples: Option<usize>,
    ) {
        let conditioning = self
            .config
            .conditioning()
            .and_then(|sr| context.image(&sr.conditioning_key).cloned());
        self.log.borrow_mut().push(Observation {
            stage_id: self.id,
            image_dims,
            context_keys: context.keys().into_iter().map(String::from).collect(),
            conditioning,
            num_samples,
        });
    }
}

impl StageModel<TestBackend> for MockStage {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn loss(
        &self,
        images: Tensor<TestBackend, 4>,
        mut context: Context<TestBackend>,
    ) -> Result<LossOutput<TestBackend>, StageError> {
        self.observe(Some(images.dims()), &context, None);
        // Stages own their context copy; mutations must stay local
        context.insert("scratch", format!("stage {}", self.id));
        if self.oom {
            return Err(StageError::OutOfMemory("mock allocation failed".into()));
        }
        Ok(LossOutput::new(Tensor::from_floats([self.id], &images.device())))
    }

    fn sample(
        &self,
        mut request: StageSampleRequest<TestBackend>,
    ) -> Result<StageSample<TestBackend>, StageError> {
        self.observe(None, &request.context, Some(request.num_samples));
        request.context.insert("scratch", format!("stage {}", self.id));
        let size = self.config.image_size();
        let images = Tensor::<TestBackend, 4>::ones(
            [request.num_samples, self.config.data.num_channels, size, size],
            &Default::default(),
        ) * self.id;
        Ok(StageSample::new(images))
    }

    fn num_params(&self) -> usize {
        1000 * self.config.image_size()
    }
}
