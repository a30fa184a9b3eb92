pub mod models;
pub mod replicate;
pub mod training;

use crate::audit::CallArg;
use crate::errors::StudioResult;
use serde_json::Value;
use std::collections::BTreeMap;

pub use models::{InterrogateMode, PromptTarget, ReplicateModel};
pub use replicate::ReplicateProcessor;
pub use training::package_training_images;

/// Hosted inference operations used by the studio.
pub trait MachineLearningProcessor {
    /// Run a model to completion and return its raw output.
    fn predict_model_output(
        &self,
        model: &ReplicateModel,
        inputs: BTreeMap<String, CallArg>,
    ) -> StudioResult<Value>;

    /// Inpaint `input_image` under `mask`; returns the first output image.
    fn inpainting(
        &self,
        input_image: &str,
        mask: &str,
        prompt: &str,
        negative_prompt: &str,
    ) -> StudioResult<Value>;

    fn remove_background(&self, input_image: &str) -> StudioResult<Value>;

    /// Describe an image as a text prompt in the style of `target`.
    fn prompt_clip_interrogator(
        &self,
        input_image: &str,
        target: PromptTarget,
        mode: InterrogateMode,
    ) -> StudioResult<Value>;
}
