//! Blocking client for the Replicate hosted model API.
//!
//! Each call is a single attempt: create the prediction, poll until it reaches
//! a terminal status or the configured wait runs out, then hand the measured
//! elapsed time to the application logger.

use super::models::{known, InterrogateMode, PromptTarget, ReplicateModel};
use super::training::{TrainingInput, TrainingRequest};
use super::MachineLearningProcessor;
use crate::app_logger::LogRouter;
use crate::audit::{CallArg, LogKind};
use crate::config_loader::ReplicateConfig;
use crate::errors::{StudioError, StudioResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const INPAINTING_STEPS: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

impl From<String> for PredictionStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "starting" => PredictionStatus::Starting,
            "processing" => PredictionStatus::Processing,
            "succeeded" => PredictionStatus::Succeeded,
            "failed" => PredictionStatus::Failed,
            "canceled" => PredictionStatus::Canceled,
            _ => PredictionStatus::Unknown,
        }
    }
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
            PredictionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ModelVersion {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    latest_version: Option<ModelVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingUpload {
    pub upload_url: String,
    pub serving_url: String,
}

pub struct ReplicateProcessor {
    client: Client,
    config: ReplicateConfig,
    logger: Arc<LogRouter>,
}

impl ReplicateProcessor {
    pub fn new(config: ReplicateConfig, logger: Arc<LogRouter>) -> StudioResult<Self> {
        if config.api_token.trim().is_empty() {
            return Err(StudioError::validation(
                "replicate.api_token",
                "an API token is required",
            ));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| StudioError::network("building http client", e))?;

        Ok(Self {
            client,
            config,
            logger,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Token {}", self.config.api_token))
    }

    /// Pinned version, or the model's latest version.
    pub fn resolve_version(&self, model: &ReplicateModel) -> StudioResult<String> {
        if let Some(version) = &model.version {
            return Ok(version.clone());
        }

        let url = format!("{}/models/{}", self.config.api_base_url, model.name);
        let info: ModelInfo = self
            .authorized(self.client.get(&url))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| StudioError::network("fetching model", e))?;

        info.latest_version
            .map(|v| v.id)
            .ok_or_else(|| StudioError::validation("model", format!("{} has no published version", model.name)))
    }

    fn create_prediction(&self, version: &str, input: Value) -> StudioResult<Prediction> {
        let url = format!("{}/predictions", self.config.api_base_url);
        self.authorized(self.client.post(&url))
            .json(&json!({ "version": version, "input": input }))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| StudioError::network("creating prediction", e))
    }

    fn fetch_prediction(&self, id: &str) -> StudioResult<Prediction> {
        let url = format!("{}/predictions/{}", self.config.api_base_url, id);
        self.authorized(self.client.get(&url))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| StudioError::network("polling prediction", e))
    }

    fn wait_for(&self, mut prediction: Prediction, started: Instant) -> StudioResult<Prediction> {
        let max_wait = Duration::from_secs(self.config.max_wait_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        while !prediction.status.is_terminal() {
            if started.elapsed() >= max_wait {
                return Err(StudioError::prediction(
                    prediction.id,
                    prediction.status.as_str(),
                    format!("no result after {}s", max_wait.as_secs()),
                ));
            }
            thread::sleep(interval);
            prediction = self.fetch_prediction(&prediction.id)?;
            debug!(id = %prediction.id, status = prediction.status.as_str(), "polled prediction");
        }

        Ok(prediction)
    }

    /// Request a URL for training data and upload the zip to it.
    pub fn upload_training_data(&self, zip_path: &Path) -> StudioResult<TrainingUpload> {
        let url = format!("{}/upload/data.zip", self.config.dreambooth_base_url);
        let upload: TrainingUpload = self
            .authorized(self.client.post(&url))
            .header(CONTENT_TYPE, "application/zip")
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| StudioError::network("requesting upload url", e))?;

        let bytes = std::fs::read(zip_path).map_err(|e| StudioError::io("reading training zip", e))?;
        self.authorized(self.client.put(&upload.upload_url))
            .header(CONTENT_TYPE, "application/zip")
            .body(bytes)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StudioError::network("uploading training zip", e))?;

        info!(serving_url = %upload.serving_url, "training data uploaded");
        Ok(upload)
    }

    /// Start a dreambooth fine-tuning job and return the service response.
    pub fn dreambooth_training(
        &self,
        training_file_url: &str,
        instance_prompt: &str,
        class_prompt: &str,
        max_train_steps: u32,
        model_name: &str,
    ) -> StudioResult<Value> {
        let request = training_request(
            &self.config,
            training_file_url,
            instance_prompt,
            class_prompt,
            max_train_steps,
            model_name,
        );

        let url = format!("{}/trainings", self.config.dreambooth_base_url);
        let response: Value = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| StudioError::network("starting training", e))?;

        self.report(LogKind::Info, format!("training started for model {}", request.model));
        Ok(response)
    }

    /// Send a plain log entry. A logger failure must not replace the
    /// outcome of a call that already happened, so it is only warned about.
    fn report(&self, kind: LogKind, message: String) {
        if let Err(e) = self.logger.emit(kind, message, None) {
            warn!(kind = kind.as_str(), error = %e, "application log write failed");
        }
    }
}

impl MachineLearningProcessor for ReplicateProcessor {
    fn predict_model_output(
        &self,
        model: &ReplicateModel,
        inputs: BTreeMap<String, CallArg>,
    ) -> StudioResult<Value> {
        let version = self.resolve_version(model)?;
        let input = encode_inputs(&inputs)?;

        let started = Instant::now();
        let created = self.create_prediction(&version, input)?;
        let outcome = self.wait_for(created, started);
        let elapsed = started.elapsed();

        // Once the prediction exists the call has happened, whether or not polling finished.
        if let Err(e) = self
            .logger
            .log_model_inference(&model.name, &version, elapsed, &inputs)
        {
            warn!(model = %model.name, error = %e, "inference audit failed");
        }

        let finished = match outcome {
            Ok(finished) => finished,
            Err(e) => {
                self.report(LogKind::Error, format!("prediction for {} did not finish: {}", model.name, e));
                return Err(e);
            }
        };

        match finished.status {
            PredictionStatus::Succeeded => Ok(finished.output),
            status => {
                let detail = finished
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error detail".to_string());
                self.report(
                    LogKind::Error,
                    format!("prediction {} for {} {}: {}", finished.id, model.name, status.as_str(), detail),
                );
                Err(StudioError::prediction(finished.id, status.as_str(), detail))
            }
        }
    }

    fn inpainting(
        &self,
        input_image: &str,
        mask: &str,
        prompt: &str,
        negative_prompt: &str,
    ) -> StudioResult<Value> {
        let mut inputs = BTreeMap::new();
        inputs.insert("mask".to_string(), image_arg(mask));
        inputs.insert("image".to_string(), image_arg(input_image));
        inputs.insert("prompt".to_string(), CallArg::from(prompt));
        inputs.insert("invert_mask".to_string(), CallArg::Bool(true));
        inputs.insert("negative_prompt".to_string(), CallArg::from(negative_prompt));
        inputs.insert("num_inference_steps".to_string(), CallArg::Int(INPAINTING_STEPS));

        let output = self.predict_model_output(&known::andreas_sd_inpainting(), inputs)?;
        first_output(output)
    }

    fn remove_background(&self, input_image: &str) -> StudioResult<Value> {
        let mut inputs = BTreeMap::new();
        inputs.insert("image".to_string(), image_arg(input_image));
        self.predict_model_output(&known::pollination_modnet(), inputs)
    }

    fn prompt_clip_interrogator(
        &self,
        input_image: &str,
        target: PromptTarget,
        mode: InterrogateMode,
    ) -> StudioResult<Value> {
        let mut inputs = BTreeMap::new();
        inputs.insert("image".to_string(), image_arg(input_image));
        inputs.insert("clip_model_name".to_string(), CallArg::from(target.clip_model_name()));
        inputs.insert("mode".to_string(), CallArg::from(mode.as_str()));
        self.predict_model_output(&known::clip_interrogator(), inputs)
    }
}

pub fn training_request(
    config: &ReplicateConfig,
    training_file_url: &str,
    instance_prompt: &str,
    class_prompt: &str,
    max_train_steps: u32,
    model_name: &str,
) -> TrainingRequest {
    TrainingRequest {
        input: TrainingInput {
            instance_prompt: instance_prompt.to_string(),
            class_prompt: class_prompt.to_string(),
            instance_data: training_file_url.to_string(),
            max_train_steps,
        },
        model: format!("{}/{}", config.trainer_owner, model_name),
        trainer_version: config.trainer_version.clone(),
        webhook_completed: config.webhook_completed.clone(),
    }
}

/// Remote URLs pass through as strings; anything else is a local file to upload.
pub fn image_arg(location: &str) -> CallArg {
    if location.starts_with("http") {
        CallArg::from(location)
    } else {
        CallArg::File(location.into())
    }
}

/// Request JSON for the model inputs. Files and buffers become data URIs.
pub fn encode_inputs(inputs: &BTreeMap<String, CallArg>) -> StudioResult<Value> {
    let mut encoded = Map::new();
    for (key, value) in inputs {
        encoded.insert(key.clone(), encode_input(key, value)?);
    }
    Ok(Value::Object(encoded))
}

fn encode_input(key: &str, value: &CallArg) -> StudioResult<Value> {
    match value {
        CallArg::Null => Ok(Value::Null),
        CallArg::File(path) => {
            let bytes = std::fs::read(path).map_err(|e| StudioError::io(format!("reading input '{key}'"), e))?;
            Ok(Value::String(data_uri(mime_for(path), &bytes)))
        }
        CallArg::Bytes(bytes) => Ok(Value::String(data_uri("application/octet-stream", bytes))),
        CallArg::Handle(desc) => Err(StudioError::validation(
            key,
            format!("cannot send live handle '{desc}' to a hosted model"),
        )),
        CallArg::Float(f) if !f.is_finite() => {
            Err(StudioError::validation(key, "non-finite number"))
        }
        CallArg::List(items) => items
            .iter()
            .map(|item| encode_input(key, item))
            .collect::<StudioResult<Vec<_>>>()
            .map(Value::Array),
        CallArg::Map(entries) => encode_inputs(entries),
        scalar => Ok(scalar.to_json().unwrap_or(Value::Null)),
    }
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// First element of a list output; other outputs are returned unchanged.
pub fn first_output(output: Value) -> StudioResult<Value> {
    match output {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| StudioError::validation("output", "model returned an empty list")),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::MemoryAuditSink;
    use crate::log_sink::{CaptureBuffer, ConsoleChannel};
    use crate::settings::StaticSettings;
    use crate::tests::test_utils::BrokenChannel;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use tempfile::tempdir;

    /// Answer one request per canned body, in order, on a local port.
    fn serve_json(bodies: Vec<Value>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for body in bodies {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                drain_request(&mut stream);
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn drain_request(stream: &mut TcpStream) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body);
    }

    fn processor(base_url: String, router: LogRouter) -> ReplicateProcessor {
        let config = ReplicateConfig {
            api_token: "r8_test".to_string(),
            api_base_url: base_url.clone(),
            dreambooth_base_url: base_url,
            poll_interval_ms: 10,
            max_wait_secs: 0,
            ..ReplicateConfig::default()
        };
        ReplicateProcessor::new(config, Arc::new(router)).unwrap()
    }

    fn router(sink: &MemoryAuditSink, broken: bool) -> LogRouter {
        let mut builder = LogRouter::builder()
            .console(ConsoleChannel::with_writer("app_logger", Box::new(CaptureBuffer::new()), false))
            .audit_sink(Arc::new(sink.clone()));
        if broken {
            builder = builder.channel(Box::new(BrokenChannel));
        }
        builder.build(&StaticSettings::empty()).unwrap()
    }

    fn prompt_inputs() -> BTreeMap<String, CallArg> {
        let mut inputs = BTreeMap::new();
        inputs.insert("prompt".to_string(), CallArg::from("a red fox"));
        inputs
    }

    #[test]
    fn test_unfinished_prediction_is_still_audited() {
        let base = serve_json(vec![json!({"id": "p1", "status": "starting"})]);
        let sink = MemoryAuditSink::new();
        let replicate = processor(base, router(&sink, false));

        let result = replicate.predict_model_output(&ReplicateModel::pinned("owner/model", "v1"), prompt_inputs());

        match result {
            Err(StudioError::Prediction { id, status, .. }) => {
                assert_eq!(id, "p1");
                assert_eq!(status, "starting");
            }
            other => panic!("expected prediction error, got {other:?}"),
        }
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model_name, "owner/model");
        assert_eq!(records[0].model_version, "v1");
        assert_eq!(records[0].input_params_json().unwrap(), json!({"prompt": "a red fox"}));
    }

    #[test]
    fn test_failed_prediction_error_survives_broken_log_channel() {
        let base = serve_json(vec![json!({"id": "p2", "status": "failed", "error": "out of memory"})]);
        let sink = MemoryAuditSink::new();
        let replicate = processor(base, router(&sink, true));

        let result = replicate.predict_model_output(&ReplicateModel::pinned("owner/model", "v1"), prompt_inputs());

        assert!(matches!(result, Err(StudioError::Prediction { ref status, .. }) if status == "failed"));
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_succeeded_prediction_returns_output() {
        let base = serve_json(vec![json!({"id": "p3", "status": "succeeded", "output": ["https://out/x.png"]})]);
        let sink = MemoryAuditSink::new();
        let replicate = processor(base, router(&sink, true));

        let output = replicate
            .predict_model_output(&ReplicateModel::pinned("owner/model", "v1"), prompt_inputs())
            .unwrap();

        assert_eq!(output, json!(["https://out/x.png"]));
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_training_response_survives_broken_log_channel() {
        let body = json!({"id": "t1", "status": "starting"});
        let base = serve_json(vec![body.clone()]);
        let replicate = processor(base, router(&MemoryAuditSink::new(), true));

        let response = replicate
            .dreambooth_training("https://x/data.zip", "sks", "person", 2000, "mymodel")
            .unwrap();

        assert_eq!(response, body);
    }

    #[test]
    fn test_clip_interrogator_resolves_latest_and_sends_clip_model() {
        let base = serve_json(vec![
            json!({"latest_version": {"id": "clip-v9"}}),
            json!({"id": "p4", "status": "succeeded", "output": "a fox in the snow"}),
        ]);
        let sink = MemoryAuditSink::new();
        let replicate = processor(base, router(&sink, false));

        let prompt = replicate
            .prompt_clip_interrogator(
                "https://cdn/fox.png",
                PromptTarget::StableDiffusion2,
                InterrogateMode::Fast,
            )
            .unwrap();

        assert_eq!(prompt, json!("a fox in the snow"));
        let records = sink.records();
        assert_eq!(records[0].model_name, "pharmapsychotic/clip-interrogator");
        assert_eq!(records[0].model_version, "clip-v9");
        assert_eq!(
            records[0].input_params_json().unwrap(),
            json!({
                "clip_model_name": "ViT-H-14/laion2b_s32b_b79k",
                "image": "https://cdn/fox.png",
                "mode": "fast"
            })
        );
    }

    #[test]
    fn test_image_arg_distinguishes_urls() {
        assert_eq!(image_arg("https://cdn/x.png"), CallArg::Str("https://cdn/x.png".into()));
        assert_eq!(image_arg("frames/1.png"), CallArg::File("frames/1.png".into()));
    }

    #[test]
    fn test_local_files_become_data_uris() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, b"abc").unwrap();

        let mut inputs = BTreeMap::new();
        inputs.insert("image".to_string(), CallArg::File(path));
        inputs.insert("steps".to_string(), CallArg::Int(25));

        let encoded = encode_inputs(&inputs).unwrap();
        assert_eq!(encoded["image"], json!("data:image/png;base64,YWJj"));
        assert_eq!(encoded["steps"], json!(25));
    }

    #[test]
    fn test_live_handles_cannot_be_sent() {
        let mut inputs = BTreeMap::new();
        inputs.insert("socket".to_string(), CallArg::Handle("tcp".into()));
        assert!(matches!(
            encode_inputs(&inputs),
            Err(StudioError::Validation { .. })
        ));
    }

    #[test]
    fn test_first_output() {
        assert_eq!(first_output(json!(["a", "b"])).unwrap(), json!("a"));
        assert_eq!(first_output(json!("only")).unwrap(), json!("only"));
        assert!(first_output(json!([])).is_err());
    }

    #[test]
    fn test_training_request_shape() {
        let config = ReplicateConfig::default();
        let request = training_request(&config, "https://x/data.zip", "sks", "person", 2000, "mymodel");
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], json!("peter942/mymodel"));
        assert_eq!(body["input"]["instance_data"], json!("https://x/data.zip"));
        assert_eq!(body["input"]["max_train_steps"], json!(2000));
        assert_eq!(body["webhook_completed"], json!(config.webhook_completed));
    }

    #[test]
    fn test_prediction_status_parsing() {
        let p: Prediction = serde_json::from_value(json!({
            "id": "p1", "status": "succeeded", "output": ["u"]
        }))
        .unwrap();
        assert!(p.status.is_terminal());

        let p: Prediction = serde_json::from_value(json!({"id": "p2", "status": "queued"})).unwrap();
        assert_eq!(p.status, PredictionStatus::Unknown);
        assert!(p.output.is_null());
    }
}
