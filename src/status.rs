use std::sync::{Arc, Mutex};

/// Progress text sink handed to a crawl by its host.
pub type StatusFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink that only forwards to the log.
pub fn log_status() -> StatusFn {
    Arc::new(|message: &str| tracing::info!(target: "site_mirror::status", "{}", message))
}

/// Sink that keeps every message, e.g. for a job record.
pub fn collect_status(messages: Arc<Mutex<Vec<String>>>) -> StatusFn {
    Arc::new(move |message: &str| {
        tracing::info!(target: "site_mirror::status", "{}", message);
        if let Ok(mut messages) = messages.lock() {
            messages.push(message.to_owned());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_status_keeps_order() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let status = collect_status(messages.clone());

        status("Login");
        status("Download: a.html");

        let messages = messages.lock().unwrap();
        assert_eq!(*messages, vec!["Login".to_owned(), "Download: a.html".to_owned()]);
    }
}
