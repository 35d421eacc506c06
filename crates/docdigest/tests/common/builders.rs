//! Builders for test fixtures.

#![allow(dead_code)]

use lopdf::{dictionary, Object, Stream};
use serde_json::{json, Map, Value};

use docdigest::config::{load_config_from_str, Config};

/// Builds small PDFs page by page. Image pages carry no text layer, which
/// forces the OCR fallback.
#[derive(Default)]
pub struct PdfBuilder {
    pages: Vec<Option<String>>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_page(mut self, text: &str) -> Self {
        self.pages.push(Some(text.to_string()));
        self
    }

    pub fn image_page(mut self) -> Self {
        self.pages.push(None);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for page in &self.pages {
            let content = match page {
                Some(text) => format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text),
                None => String::new(),
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("failed to serialize fixture PDF");
        bytes
    }
}

/// Builds configuration JSON, emitting only the keys that were set so the
/// loader's defaults are exercised for everything else.
pub struct ConfigBuilder {
    root: Map<String, Value>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut root = Map::new();
        root.insert("version".to_string(), json!("1.0"));
        root.insert("output_directory".to_string(), json!("/tmp/docdigest-output"));
        Self { root }
    }

    pub fn version(self, version: &str) -> Self {
        self.set("version", json!(version))
    }

    pub fn output_directory(self, path: &str) -> Self {
        self.set("output_directory", json!(path))
    }

    pub fn database_path(self, path: &str) -> Self {
        self.set("database_path", json!(path))
    }

    pub fn worker_count(self, count: usize) -> Self {
        self.set("worker_count", json!(count))
    }

    pub fn queue(self, max_attempts: u32, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        self.set(
            "queue",
            json!({
                "max_attempts": max_attempts,
                "backoff_base_ms": backoff_base_ms,
                "backoff_max_ms": backoff_max_ms,
            }),
        )
    }

    pub fn max_chunk_chars(self, chars: usize) -> Self {
        self.set("chunking", json!({ "max_chunk_chars": chars }))
    }

    pub fn api_key_env(self, name: &str) -> Self {
        self.set("summarization", json!({ "api_key_env": name }))
    }

    /// Escape hatch for keys without a dedicated setter.
    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.root.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&Value::Object(self.root.clone()))
            .expect("config JSON serializes")
    }

    pub fn build(&self) -> Config {
        load_config_from_str(&self.to_json()).expect("builder produced an invalid config")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
