use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::secrets::expand_home;
use crate::summarize::SummarizerSettings;

const FALLBACK_CHUNK_CHARS: NonZeroUsize = match NonZeroUsize::new(4000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

pub struct PipelineConfig {
    pub output_directory: PathBuf,
    pub ocr_languages: Vec<String>,
    pub ocr_dpi: u32,
    pub min_text_chars: usize,
    pub max_chunk_chars: NonZeroUsize,
    pub summarizer: SummarizerSettings,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let summarization = &config.summarization;
        Self {
            output_directory: PathBuf::from(expand_home(&config.output_directory)),
            ocr_languages: config.ocr.languages.clone(),
            ocr_dpi: config.ocr.dpi,
            min_text_chars: config.ocr.min_text_chars,
            max_chunk_chars: NonZeroUsize::new(config.chunking.max_chunk_chars)
                .unwrap_or(FALLBACK_CHUNK_CHARS),
            summarizer: SummarizerSettings {
                timeout: Duration::from_secs(summarization.timeout_secs),
                max_attempts: summarization.max_attempts,
                backoff_base: Duration::from_millis(summarization.backoff_base_ms),
                concurrency: NonZeroUsize::new(summarization.concurrency)
                    .unwrap_or(NonZeroUsize::MIN),
            },
        }
    }
}
