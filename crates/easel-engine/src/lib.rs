use std::fs::{self, OpenOptions};
use std::io::{self, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use easel_contracts::artifact::GeneratedArtifact;
use easel_contracts::error::{EaselError, Result};
use easel_contracts::events::EventWriter;
use easel_contracts::request::{
    Background, EditForm, GenerateForm, ImageQuality, ImageRequest, ImageSize, Moderation,
    SourceImage, MAX_OUTPUT_COUNT, MAX_SOURCE_IMAGES,
};
use easel_contracts::status::{ActionOutcome, StatusResult};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";

const GENERATED_PREFIX: &str = "generated";
const EDITED_PREFIX: &str = "edited";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSPORT_RETRIES: usize = 1;
const RETRY_BACKOFF: Duration = Duration::from_millis(1200);

/// Connection settings for the hosted image service, resolved once at
/// process start and passed into the service constructor.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl ServiceConfig {
    /// Reads the credential and endpoint overrides from the environment.
    /// A missing or blank `OPENAI_API_KEY` fails here, at startup, rather
    /// than on the first request.
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("OPENAI_API_KEY")
            .ok_or_else(|| EaselError::service("OPENAI_API_KEY not set"))?;
        let api_base = non_empty_env("OPENAI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model =
            non_empty_env("EASEL_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        Ok(Self {
            api_key,
            api_base,
            model,
            timeout: REQUEST_TIMEOUT,
        })
    }
}

/// Boundary to the hosted image service.
///
/// Implementations perform one round trip and hand back the raw base64
/// payloads; decoding and persistence happen in the studio.
pub trait ImageService: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageRequest) -> Result<Vec<String>>;
    fn edit(&self, request: &ImageRequest) -> Result<Vec<String>>;
}

/// Offline stand-in for the hosted service. Paints solid-color artifacts
/// keyed off the prompt so the whole pipeline runs without a credential
/// or network access.
pub struct DryrunService;

impl DryrunService {
    fn render_batch(&self, request: &ImageRequest) -> Result<Vec<String>> {
        (0..request.n.max(1))
            .map(|idx| self.render(request, idx))
            .collect()
    }

    fn render(&self, request: &ImageRequest, idx: u32) -> Result<String> {
        let (width, height) = request
            .size
            .map(ImageSize::dimensions)
            .unwrap_or((1024, 1024));
        let (r, g, b) = color_from_prompt(&request.prompt, idx);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let bytes = encode_png(&DynamicImage::ImageRgb8(image))?;
        Ok(BASE64.encode(bytes))
    }
}

impl ImageService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageRequest) -> Result<Vec<String>> {
        self.render_batch(request)
    }

    fn edit(&self, request: &ImageRequest) -> Result<Vec<String>> {
        self.render_batch(request)
    }
}

/// Client for OpenAI-compatible `/images/generations` and `/images/edits`
/// endpoints.
pub struct OpenAiImageService {
    config: ServiceConfig,
    http: HttpClient,
}

impl OpenAiImageService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn post_json_with_retries(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        for attempt in 0..=TRANSPORT_RETRIES {
            let response = self
                .http
                .post(endpoint)
                .bearer_auth(&self.config.api_key)
                .timeout(self.config.timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return response_json_or_error(ok),
                Err(raw) => {
                    if !is_retryable_transport_error(&raw) || attempt >= TRANSPORT_RETRIES {
                        return Err(EaselError::service(format!(
                            "request failed ({endpoint}): {raw}"
                        )));
                    }
                    thread::sleep(RETRY_BACKOFF);
                }
            }
        }

        unreachable!("transport retry loop should always return a response or error")
    }

    fn edit_form(&self, request: &ImageRequest) -> Result<MultipartForm> {
        let mut form = MultipartForm::new()
            .text("model", self.config.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", request.n.to_string());
        if let Some(size) = request.size {
            form = form.text("size", size.as_str());
        }
        if let Some(quality) = request.quality {
            form = form.text("quality", quality.as_str());
        }
        if let Some(background) = request.background {
            form = form.text("background", background.as_str());
        }
        if let Some(moderation) = request.moderation {
            form = form.text("moderation", moderation.as_str());
        }

        for source in &request.source_images {
            let mut part =
                MultipartPart::bytes(source.bytes.clone()).file_name(source.file_name.clone());
            if let Some(mime) = mime_for_path(Path::new(&source.file_name)) {
                part = part.mime_str(mime).map_err(|err| {
                    EaselError::service(format!(
                        "invalid mime '{mime}' for {}: {err}",
                        source.file_name
                    ))
                })?;
            }
            form = form.part("image[]", part);
        }

        if let Some(mask) = &request.mask {
            let part = MultipartPart::bytes(mask.clone())
                .file_name("mask.png")
                .mime_str("image/png")
                .map_err(|err| EaselError::service(format!("invalid mask mime: {err}")))?;
            form = form.part("mask", part);
        }

        Ok(form)
    }
}

impl ImageService for OpenAiImageService {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, request: &ImageRequest) -> Result<Vec<String>> {
        let endpoint = format!("{}/images/generations", self.config.api_base);
        let body = serde_json::to_value(request)
            .map_err(|err| EaselError::service(format!("could not encode request body: {err}")))?;
        let mut payload = map_object(body);
        payload.insert(
            "model".to_string(),
            Value::String(self.config.model.clone()),
        );

        let response_payload = self.post_json_with_retries(&endpoint, &Value::Object(payload))?;
        extract_payloads(&response_payload)
    }

    fn edit(&self, request: &ImageRequest) -> Result<Vec<String>> {
        let endpoint = format!("{}/images/edits", self.config.api_base);
        for attempt in 0..=TRANSPORT_RETRIES {
            // multipart bodies cannot be reused, so every attempt rebuilds
            // the form from the request
            let form = self.edit_form(request)?;
            let response = self
                .http
                .post(&endpoint)
                .bearer_auth(&self.config.api_key)
                .timeout(self.config.timeout)
                .multipart(form)
                .send();

            match response {
                Ok(ok) => return extract_payloads(&response_json_or_error(ok)?),
                Err(raw) => {
                    if !is_retryable_transport_error(&raw) || attempt >= TRANSPORT_RETRIES {
                        return Err(EaselError::service(format!(
                            "request failed ({endpoint}): {raw}"
                        )));
                    }
                    thread::sleep(RETRY_BACKOFF);
                }
            }
        }

        unreachable!("transport retry loop should always return a response or error")
    }
}

fn extract_payloads(response_payload: &Value) -> Result<Vec<String>> {
    let rows = response_payload
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();

    for row in rows {
        let Some(b64) = row.get("b64_json").and_then(Value::as_str) else {
            return Err(EaselError::service(
                "response data row is missing a b64_json payload",
            ));
        };
        out.push(b64.to_string());
    }

    if out.is_empty() {
        return Err(EaselError::service("image service returned no images"));
    }
    Ok(out)
}

/// Decodes a standard-alphabet base64 payload into raw bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload.trim().as_bytes())
        .map_err(|err| EaselError::decode(format!("invalid base64 payload: {err}")))
}

pub fn to_bitmap(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|err| EaselError::decode(format!("unreadable image data: {err}")))
}

pub fn encode_png(bitmap: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bitmap
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|err| EaselError::decode(format!("PNG encode failed: {err}")))?;
    Ok(bytes)
}

/// Converts an arbitrary mask image into the alpha form the edit endpoint
/// expects: white areas stay fully opaque (editable), black areas fully
/// transparent (untouched). Masks that already carry an alpha channel are
/// re-encoded to PNG with their pixels unchanged.
pub fn normalize_mask(bytes: &[u8]) -> Result<Vec<u8>> {
    let bitmap = to_bitmap(bytes)?;
    if bitmap.color().has_alpha() {
        return encode_png(&bitmap);
    }

    let gray = bitmap.to_luma8();
    let mut mask = RgbaImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let level = pixel[0];
        mask.put_pixel(x, y, Rgba([level, level, level, level]));
    }
    encode_png(&DynamicImage::ImageRgba8(mask))
}

/// Writes artifacts into a single append-only output directory.
pub struct ArtifactStore {
    root: PathBuf,
}

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 100;

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Saves one artifact as `{prefix}_{YYYYMMDD_HHMMSS}.png`. A name
    /// already taken in the same second gets a `_NN` counter suffix
    /// instead of being overwritten.
    pub fn save(&self, bytes: &[u8], prefix: &str) -> Result<PathBuf> {
        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        self.save_with_stamp(bytes, prefix, &stamp)
    }

    fn save_with_stamp(&self, bytes: &[u8], prefix: &str, stamp: &str) -> Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 0 {
                format!("{prefix}_{stamp}.png")
            } else {
                format!("{prefix}_{stamp}_{attempt:02}.png")
            };
            let path = self.root.join(file_name);
            // create_new keeps the existence check and the create atomic
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(EaselError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free artifact name for prefix '{prefix}' at {stamp}"),
        )))
    }
}

/// Builds the request for the text-to-image action.
pub fn build_generation_request(form: &GenerateForm) -> Result<ImageRequest> {
    if form.prompt.trim().is_empty() {
        return Err(EaselError::validation("Please enter a prompt."));
    }
    Ok(ImageRequest {
        prompt: form.prompt.clone(),
        n: 1,
        size: ImageSize::parse_opt(&form.size)?,
        quality: ImageQuality::parse_opt(&form.quality)?,
        background: Background::parse_opt(&form.background)?,
        moderation: Some(Moderation::Low),
        source_images: Vec::new(),
        mask: None,
    })
}

/// Builds the request for the edit action. Every validation failure,
/// including unreadable files, happens here before any network call.
pub fn build_edit_request(form: &EditForm) -> Result<ImageRequest> {
    if form.images.is_empty() {
        return Err(EaselError::validation("Please upload at least one image."));
    }
    if form.prompt.trim().is_empty() {
        return Err(EaselError::validation("Please enter an edit prompt."));
    }
    if form.images.len() > MAX_SOURCE_IMAGES {
        return Err(EaselError::validation(format!(
            "Too many files uploaded. Maximum is {MAX_SOURCE_IMAGES} images."
        )));
    }
    if form.count < 1 || form.count > MAX_OUTPUT_COUNT {
        return Err(EaselError::validation(format!(
            "Number of images must be between 1 and {MAX_OUTPUT_COUNT}."
        )));
    }

    let mut source_images = Vec::with_capacity(form.images.len());
    for path in &form.images {
        source_images.push(SourceImage {
            file_name: file_name_of(path),
            bytes: read_file(path)?,
        });
    }

    let mask = match &form.mask {
        Some(path) => Some(normalize_mask(&read_file(path)?)?),
        None => None,
    };

    Ok(ImageRequest {
        prompt: form.prompt.clone(),
        n: form.count,
        size: ImageSize::parse_opt(&form.size)?,
        quality: ImageQuality::parse_opt(&form.quality)?,
        background: Background::parse_opt(&form.background)?,
        moderation: None,
        source_images,
        mask,
    })
}

/// Runs one user action end to end: validate, call the image service,
/// decode and persist each returned payload, and fold everything into an
/// outcome the caller can always display.
pub struct Studio {
    service: Box<dyn ImageService>,
    store: ArtifactStore,
    events: EventWriter,
}

impl Studio {
    pub fn new(
        service: Box<dyn ImageService>,
        store: ArtifactStore,
        events: EventWriter,
    ) -> Result<Self> {
        events.emit(
            "session_started",
            map_object(json!({
                "output_dir": store.root().display().to_string(),
                "service": service.name(),
            })),
        )?;
        Ok(Self {
            service,
            store,
            events,
        })
    }

    pub fn generate(&self, form: &GenerateForm) -> ActionOutcome {
        match self.run_generate(form) {
            Ok(outcome) => outcome,
            Err(err) => self.fail("generate", &err),
        }
    }

    pub fn edit(&self, form: &EditForm) -> ActionOutcome {
        match self.run_edit(form) {
            Ok(outcome) => outcome,
            Err(err) => self.fail("edit", &err),
        }
    }

    fn run_generate(&self, form: &GenerateForm) -> Result<ActionOutcome> {
        self.events.emit(
            "action_started",
            map_object(json!({
                "action": "generate",
                "prompt": form.prompt,
            })),
        )?;
        let request = Arc::new(build_generation_request(form)?);
        self.emit_request_built("generate", &request)?;

        let payloads = self.service.generate(&request)?;
        let payload = payloads
            .first()
            .ok_or_else(|| EaselError::service("image service returned no images"))?;
        let (artifact, path) =
            self.persist_payload("generate", payload, GENERATED_PREFIX, &request)?;

        let message = format!(
            "✅ Image generated successfully! Saved to: {}",
            path.display()
        );
        self.emit_completed("generate", 1, 0, &[path.clone()])?;
        Ok(ActionOutcome {
            artifacts: vec![artifact],
            status: StatusResult::success(message, vec![path]),
        })
    }

    fn run_edit(&self, form: &EditForm) -> Result<ActionOutcome> {
        self.events.emit(
            "action_started",
            map_object(json!({
                "action": "edit",
                "prompt": form.prompt,
                "images": form.images.len(),
            })),
        )?;
        let request = Arc::new(build_edit_request(form)?);
        self.emit_request_built("edit", &request)?;

        let payloads = self.service.edit(&request)?;
        let expected = payloads.len();
        let mut artifacts = Vec::new();
        let mut saved = Vec::new();
        let mut failures: Vec<EaselError> = Vec::new();
        for (idx, payload) in payloads.iter().enumerate() {
            let prefix = if expected == 1 {
                EDITED_PREFIX.to_string()
            } else {
                format!("{}_{}", EDITED_PREFIX, idx + 1)
            };
            // one bad payload must not discard the variants that already
            // landed on disk
            match self.persist_payload("edit", payload, &prefix, &request) {
                Ok((artifact, path)) => {
                    artifacts.push(artifact);
                    saved.push(path);
                }
                Err(err) => failures.push(err),
            }
        }

        if saved.is_empty() {
            return Err(failures
                .into_iter()
                .next()
                .unwrap_or_else(|| EaselError::service("image service returned no images")));
        }

        let joined = join_paths(&saved);
        let message = if !failures.is_empty() {
            format!(
                "⚠️ {} of {} images edited successfully! Saved to: {} ({} failed: {})",
                saved.len(),
                expected,
                joined,
                failures.len(),
                failures[0]
            )
        } else if saved.len() == 1 {
            format!("✅ Image edited successfully! Saved to: {joined}")
        } else {
            format!(
                "✅ {} images edited successfully! Saved to: {}",
                saved.len(),
                joined
            )
        };
        self.emit_completed("edit", saved.len(), failures.len(), &saved)?;
        Ok(ActionOutcome {
            artifacts,
            status: StatusResult::success(message, saved),
        })
    }

    fn persist_payload(
        &self,
        action: &str,
        payload: &str,
        prefix: &str,
        request: &Arc<ImageRequest>,
    ) -> Result<(GeneratedArtifact, PathBuf)> {
        let bytes = decode_base64(payload)?;
        // the payload must decode as a displayable bitmap before anything
        // lands on disk
        to_bitmap(&bytes)?;
        let artifact = GeneratedArtifact::new(bytes, Arc::clone(request));
        let path = self.store.save(&artifact.bytes, prefix)?;
        self.events.emit(
            "artifact_saved",
            map_object(json!({
                "action": action,
                "path": path.display().to_string(),
                "bytes": artifact.bytes.len(),
            })),
        )?;
        Ok((artifact, path))
    }

    fn emit_request_built(&self, action: &str, request: &ImageRequest) -> Result<()> {
        self.events.emit(
            "request_built",
            map_object(json!({
                "action": action,
                "n": request.n,
                "size": request.size.map(ImageSize::as_str),
                "quality": request.quality.map(ImageQuality::as_str),
                "background": request.background.map(Background::as_str),
                "moderation": request.moderation.map(Moderation::as_str),
                "source_images": request.source_images.len(),
                "mask": request.mask.is_some(),
            })),
        )?;
        Ok(())
    }

    fn emit_completed(
        &self,
        action: &str,
        saved: usize,
        failed: usize,
        paths: &[PathBuf],
    ) -> Result<()> {
        self.events.emit(
            "action_completed",
            map_object(json!({
                "action": action,
                "saved": saved,
                "failed": failed,
                "paths": paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>(),
            })),
        )?;
        Ok(())
    }

    fn fail(&self, action: &str, err: &EaselError) -> ActionOutcome {
        let message = match err {
            EaselError::Validation(text) => text.clone(),
            other if action == "generate" => format!("❌ Error generating image: {other}"),
            other => format!("❌ Error editing image: {other}"),
        };
        // the failure path still returns a printable outcome even when the
        // event log itself cannot be written
        let _ = self.events.emit(
            "action_failed",
            map_object(json!({
                "action": action,
                "error_kind": err.kind(),
                "error": err.to_string(),
            })),
        );
        ActionOutcome::failed(message)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| EaselError::service(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(EaselError::service(format!(
            "image service returned {code}: {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|_| {
        EaselError::service(format!(
            "image service returned invalid JSON: {}",
            truncate_text(&body, 512)
        ))
    })
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| {
        EaselError::Io(io::Error::new(
            err.kind(),
            format!("failed reading {}: {err}", path.display()),
        ))
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image.png")
        .to_string()
}

fn color_from_prompt(prompt: &str, idx: u32) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
