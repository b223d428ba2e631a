//! Prompt template loading.
//!
//! Templates are plain UTF-8 files read once per path and cached for the
//! life of the loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Config;
use crate::error::{RagError, Result};

#[derive(Debug, Default)]
pub struct PromptLoader {
    dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<str>>>,
}

impl PromptLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Read `name` relative to the prompt directory, trimmed. Later calls
    /// for the same path return the cached text without touching disk.
    pub fn load(&self, name: &str) -> Result<Arc<str>> {
        let path = self.dir.join(name);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(text) = cache.get(&path) {
            return Ok(text.clone());
        }

        let text: Arc<str> = read_template(&path)?.into();
        cache.insert(path, text.clone());
        Ok(text)
    }

    /// Load the system and user templates named in `config`.
    pub fn load_pair(&self, config: &Config) -> Result<(Arc<str>, Arc<str>)> {
        Ok((
            self.load(&config.system_prompt_file)?,
            self.load(&config.user_prompt_file)?,
        ))
    }

    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn read_template(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(RagError::NotFound {
            kind: "prompt file",
            path: path.to_path_buf(),
        });
    }
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}
