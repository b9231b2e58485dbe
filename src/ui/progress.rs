use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Named progress bars sharing one terminal region.
pub struct ProgressManager {
    mp: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_bar(
        &self,
        id: &str,
        total: u64,
        template: &str,
        message: &str,
    ) -> Result<(), String> {
        let mut bars = self.bars.lock().map_err(|e| format!("lock error: {e}"))?;
        if bars.contains_key(id) {
            return Err(format!("progress bar '{id}' already exists"));
        }

        let pb = self.mp.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap()
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        pb.set_message(message.to_string());

        bars.insert(id.to_string(), pb);
        Ok(())
    }

    pub fn inc(&self, id: &str, value: u64) -> Result<(), String> {
        let bars = self.bars.lock().map_err(|e| format!("lock error: {e}"))?;
        if let Some(pb) = bars.get(id) {
            pb.inc(value);
            Ok(())
        } else {
            Err(format!("progress bar '{id}' not found"))
        }
    }

    pub fn set_position(&self, id: &str, pos: u64) -> Result<(), String> {
        let bars = self.bars.lock().map_err(|e| format!("lock error: {e}"))?;
        if let Some(pb) = bars.get(id) {
            pb.set_position(pos);
            Ok(())
        } else {
            Err(format!("progress bar '{id}' not found"))
        }
    }

    pub fn finish_all(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, pb) in bars.drain() {
                pb.finish();
            }
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub mod templates {
    pub const PLAYBACK: &str =
        "SEND [{bar:30.green}] {percent}% ({pos}/{len} samples) {msg}";
    pub const RECORDING: &str =
        "RECV [{bar:30.blue}] {percent}% ({pos}/{len} samples) {msg}";
}
