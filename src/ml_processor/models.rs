use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A hosted model, `owner/name` plus an optional pinned version.
///
/// An unpinned model resolves to its latest version at call time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateModel {
    pub name: String,
    pub version: Option<String>,
}

impl ReplicateModel {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn latest(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, Some(version.into()))
    }

    /// Parse `owner/name` or `owner/name:version`.
    pub fn parse(spec: &str) -> Option<Self> {
        let (name, version) = match spec.split_once(':') {
            Some((name, version)) if !version.is_empty() => (name, Some(version.to_string())),
            Some(_) => return None,
            None => (spec, None),
        };

        let (owner, model) = name.split_once('/')?;
        if owner.is_empty() || model.is_empty() || model.contains('/') {
            return None;
        }
        Some(Self::new(name, version))
    }

    pub fn owner(&self) -> &str {
        self.name.split_once('/').map(|(o, _)| o).unwrap_or(&self.name)
    }

    pub fn model(&self) -> &str {
        self.name.split_once('/').map(|(_, m)| m).unwrap_or(&self.name)
    }
}

impl fmt::Display for ReplicateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Image model whose prompt style the CLIP interrogator should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTarget {
    StableDiffusion15,
    StableDiffusion2,
}

impl PromptTarget {
    /// CLIP backbone the interrogator uses for this target.
    pub fn clip_model_name(&self) -> &'static str {
        match self {
            PromptTarget::StableDiffusion15 => "ViT-L-14/openai",
            PromptTarget::StableDiffusion2 => "ViT-H-14/laion2b_s32b_b79k",
        }
    }
}

impl FromStr for PromptTarget {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().replace(['-', '_', '.'], " ").as_str() {
            "sd15" | "sd 1 5" | "stable diffusion 1 5" => Ok(PromptTarget::StableDiffusion15),
            "sd2" | "sd 2" | "stable diffusion 2" => Ok(PromptTarget::StableDiffusion2),
            other => Err(format!("unknown prompt target '{other}'")),
        }
    }
}

/// Interrogation quality setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterrogateMode {
    Best,
    Fast,
}

impl InterrogateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterrogateMode::Best => "best",
            InterrogateMode::Fast => "fast",
        }
    }
}

impl FromStr for InterrogateMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "best" => Ok(InterrogateMode::Best),
            "fast" => Ok(InterrogateMode::Fast),
            other => Err(format!("unknown interrogate mode '{other}'")),
        }
    }
}

/// Models used by the studio pages.
pub mod known {
    use super::ReplicateModel;

    pub fn andreas_sd_inpainting() -> ReplicateModel {
        ReplicateModel::latest("andreasjansson/stable-diffusion-inpainting")
    }

    pub fn pollination_modnet() -> ReplicateModel {
        ReplicateModel::latest("pollinations/modnet")
    }

    pub fn clip_interrogator() -> ReplicateModel {
        ReplicateModel::latest("pharmapsychotic/clip-interrogator")
    }
}
