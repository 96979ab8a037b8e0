//! # OCR Instance Manager Module
//!
//! Thread-safe pool of in-process Tesseract instances for the `leptess`
//! backend. Instances are keyed by language, layout mode and model type so
//! concurrent evaluation workers with identical hints share one engine.

use std::collections::HashMap;
use std::sync::Arc;

use leptess::LepTess;
use parking_lot::Mutex;
use tracing::info;

use crate::ocr_config::{ModelType, PageSegMode};

/// Manages a pool of Tesseract OCR instances keyed by extraction hints.
///
/// Instances are created once per hint key and reused. Each one sits behind
/// its own mutex since Tesseract is not re-entrant; workers sharing hints
/// serialize on it.
pub struct OcrInstanceManager {
    instances: Mutex<HashMap<String, Arc<Mutex<LepTess>>>>,
}

impl OcrInstanceManager {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create an OCR instance for the given hints
    ///
    /// # Errors
    ///
    /// Returns error if Tesseract instance creation fails (e.g., invalid language codes)
    pub fn get_instance(
        &self,
        languages: &str,
        psm_mode: PageSegMode,
        model_type: ModelType,
    ) -> anyhow::Result<Arc<Mutex<LepTess>>> {
        let key = format!(
            "{}:{}:{}",
            languages,
            psm_mode.as_str(),
            model_type.tessdata_dir()
        );

        if let Some(instance) = self.instances.lock().get(&key) {
            return Ok(Arc::clone(instance));
        }

        info!(
            languages = %languages,
            psm = %psm_mode.as_str(),
            model = %model_type.tessdata_dir(),
            "Creating new OCR instance"
        );

        let tessdata_path = Self::get_tessdata_path(model_type);

        let mut tess = LepTess::new(tessdata_path.as_deref(), languages)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Tesseract OCR instance: {}", e))?;

        tess.set_variable(leptess::Variable::TesseditPagesegMode, psm_mode.as_str())
            .map_err(|e| anyhow::anyhow!("Failed to set PSM mode: {}", e))?;

        let instance = Arc::new(Mutex::new(tess));

        // Another worker may have raced us here; keep whichever landed first
        let mut instances = self.instances.lock();
        let stored = instances.entry(key).or_insert_with(|| Arc::clone(&instance));
        Ok(Arc::clone(stored))
    }

    /// Get the tessdata path for the specified model type
    ///
    /// Falls back to the engine default when no model-specific directory exists.
    fn get_tessdata_path(model_type: ModelType) -> Option<String> {
        let possible_paths = match model_type {
            ModelType::Fast => [
                "/usr/share/tesseract-ocr/5/tessdata_fast",
                "/usr/share/tesseract-ocr/4.00/tessdata_fast",
                "/usr/share/tessdata_fast",
                "/usr/local/share/tessdata_fast",
            ],
            ModelType::Best => [
                "/usr/share/tesseract-ocr/5/tessdata_best",
                "/usr/share/tesseract-ocr/4.00/tessdata_best",
                "/usr/share/tessdata_best",
                "/usr/local/share/tessdata_best",
            ],
        };

        possible_paths
            .into_iter()
            .find(|path| std::path::Path::new(path).exists())
            .map(|path| {
                info!("Using tessdata path: {}", path);
                path.to_string()
            })
    }

    /// Get the number of cached instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for OcrInstanceManager {
    fn default() -> Self {
        Self::new()
    }
}
