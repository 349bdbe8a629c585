//! Headless page for the host process.

use mylore_client::Page;

/// Logs prompts and reloads instead of showing them.
pub struct LogPage;

impl Page for LogPage {
    fn show_update_prompt(&self, tag: &str) {
        tracing::info!(version = tag, "new worker version waiting; send skip_waiting to activate");
    }

    fn reload(&self) {
        tracing::info!("controller changed, page reload requested");
    }
}
