//! services/twin_data/src/llm.rs
//!
//! Prompt assembly and reply parsing for the two model-backed features:
//! structuring a book chapter into sub-topics, and describing an image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use twin_data_core::chapters::estimate_tokens;
use twin_data_core::domain::{ChapterExtraction, ChapterText, ImageAnalysis};
use twin_data_core::ports::{require, BlobStorage, ChatCompletionService, PortError, PortResult};

/// How long the temporary URL used to fetch an image for analysis stays valid.
const IMAGE_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Removes a surrounding Markdown code fence (with or without a language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parses the JSON object in a model reply. Prose around the object is ignored.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> PortResult<T> {
    let text = strip_code_fences(reply);
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(first) => match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&text[start..=end])
                .map_err(|e| PortError::Permanent(format!("model reply is not the expected JSON: {}", e))),
            _ => Err(PortError::Permanent(format!("model reply is not JSON: {}", first))),
        },
    }
}

//=========================================================================================
// Chapter Content Extraction
//=========================================================================================

const CHAPTER_SYSTEM_PROMPT: &str = "Eres un editor experto que organiza capítulos de libros en subtemas. \
Respondes únicamente con JSON válido, sin comentarios ni texto adicional.";

fn chapter_prompt(chapter: &ChapterText) -> String {
    format!(
        r#"Analiza el siguiente capítulo y divídelo en subtemas coherentes.

CAPÍTULO: {title}
PÁGINAS: {from} a {to}

REGLAS:
1. Conserva el texto original de cada subtema en "TextoCompleto"; no lo resumas ni lo traduzcas.
2. Cada fragmento del capítulo pertenece a exactamente un subtema, en el orden original.
3. "PaginaDe" y "PaginaA" son las páginas donde empieza y termina el subtema, usando los marcadores "--- Página N ---".
4. "Resumen" es un resumen del capítulo completo en 3 a 5 oraciones.
5. Responde SOLO con un objeto JSON con esta forma exacta:
{{
  "Titulo": "título del capítulo",
  "Resumen": "resumen del capítulo",
  "Subtemas": [
    {{ "Titulo": "título del subtema", "PaginaDe": 1, "PaginaA": 2, "TextoCompleto": "texto", "TotalTokens": 0 }}
  ]
}}

TEXTO DEL CAPÍTULO:
{text}"#,
        title = chapter.title,
        from = chapter.page_from,
        to = chapter.page_to,
        text = chapter.full_text
    )
}

/// Asks the chat model to split a chapter into sub-topics.
#[derive(Clone)]
pub struct ChapterContentExtractor {
    chat: Arc<dyn ChatCompletionService>,
}

impl ChapterContentExtractor {
    /// Creates a new `ChapterContentExtractor`.
    pub fn new(chat: Arc<dyn ChatCompletionService>) -> Self {
        Self { chat }
    }

    pub async fn extract(&self, chapter: &ChapterText) -> PortResult<ChapterExtraction> {
        require("chapter text", &chapter.full_text)?;

        let reply = self.chat.complete(CHAPTER_SYSTEM_PROMPT, &chapter_prompt(chapter)).await.map_err(|e| {
            error!(chapter = %chapter.title, error = %e, "Chapter extraction call failed");
            e
        })?;

        let mut extraction: ChapterExtraction = parse_json_reply(&reply).map_err(|e| {
            warn!(chapter = %chapter.title, error = %e, "Chapter extraction reply could not be parsed");
            e
        })?;

        if extraction.titulo.trim().is_empty() {
            extraction.titulo = chapter.title.clone();
        }
        // The model's own counts are not trusted.
        for subtema in &mut extraction.subtemas {
            subtema.total_tokens = estimate_tokens(&subtema.texto_completo);
        }
        info!(chapter = %chapter.title, subtemas = extraction.subtemas.len(), "Chapter structured");
        Ok(extraction)
    }
}

//=========================================================================================
// Image Analysis
//=========================================================================================

const IMAGE_SYSTEM_PROMPT: &str = "You are a meticulous visual analyst. You describe images for a personal \
digital twin archive and always answer with a single valid JSON object and nothing else.";

fn image_prompt(context: Option<&str>) -> String {
    let context = context
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("\nContext provided by the owner: {}\n", c))
        .unwrap_or_default();
    format!(
        r#"Analyze the attached image.
{context}
Return ONLY a JSON object with these fields:
{{
  "description": "two or three sentences describing the image",
  "detectedText": "any legible text in the image, or null",
  "objects": ["main objects"],
  "peopleCount": 0,
  "tags": ["short keywords"],
  "setting": "where the image seems to be taken, or null",
  "htmlReport": "a short HTML report (<div> with <h3> and <p>) summarizing the analysis"
}}"#
    )
}

fn guess_mime(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

fn map_download_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() || e.is_connect() {
        PortError::Transient(format!("image download failed: {}", e))
    } else {
        PortError::Permanent(format!("image download failed: {}", e))
    }
}

/// Sends an image to the vision model and parses its description.
#[derive(Clone)]
pub struct ImageAnalyzer {
    chat: Arc<dyn ChatCompletionService>,
    blobs: Arc<dyn BlobStorage>,
    http: reqwest::Client,
    download_timeout: Duration,
}

impl ImageAnalyzer {
    /// Creates a new `ImageAnalyzer`.
    pub fn new(
        chat: Arc<dyn ChatCompletionService>,
        blobs: Arc<dyn BlobStorage>,
        http: reqwest::Client,
        download_timeout: Duration,
    ) -> Self {
        Self { chat, blobs, http, download_timeout }
    }

    /// Analyzes an image held in memory. It is sent inline as a base64 data URL.
    pub async fn analyze_bytes(&self, bytes: &[u8], mime: &str, context: Option<&str>) -> PortResult<ImageAnalysis> {
        if bytes.is_empty() {
            return Err(PortError::InvalidInput("image is empty".to_string()));
        }
        if !mime.starts_with("image/") {
            return Err(PortError::InvalidInput(format!("'{}' is not an image type", mime)));
        }

        let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
        let reply = self
            .chat
            .complete_with_image(IMAGE_SYSTEM_PROMPT, &image_prompt(context), &data_url)
            .await
            .map_err(|e| {
                error!(mime = %mime, size = bytes.len(), error = %e, "Image analysis call failed");
                e
            })?;

        let analysis: ImageAnalysis = parse_json_reply(&reply).map_err(|e| {
            warn!(error = %e, "Image analysis reply could not be parsed");
            e
        })?;
        info!(size = bytes.len(), tags = analysis.tags.len(), "Image analyzed");
        Ok(analysis)
    }

    /// Downloads a stored image through a temporary URL and analyzes it.
    pub async fn analyze_blob(&self, container: &str, path: &str, context: Option<&str>) -> PortResult<ImageAnalysis> {
        require("container", container)?;
        require("path", path)?;
        let url = self.blobs.download_url(container, path, IMAGE_URL_TTL).await?;

        let response = self
            .http
            .get(&url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(map_download_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("image download returned {}", status);
            return Err(match status {
                StatusCode::NOT_FOUND => PortError::NotFound(message),
                s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => PortError::Transient(message),
                _ => PortError::Permanent(message),
            });
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| guess_mime(path).to_string());
        let bytes = response.bytes().await.map_err(map_download_error)?;

        self.analyze_bytes(&bytes, &mime, context).await
    }
}
