use std::sync::{Mutex, PoisonError};

/// Where navigation side effects land: a browser history, a test recorder,
/// or an HTTP redirect builder.
pub trait Navigator: Send + Sync {
    /// Add a history entry.
    fn push(&self, url: &str);
    /// Replace the current history entry; used for redirects.
    fn replace(&self, url: &str);
    fn current(&self) -> Option<String>;
}

/// History stack kept in memory.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(url: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![url.into()]),
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for MemoryNavigator {
    fn push(&self, url: &str) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
    }

    fn replace(&self, url: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.pop();
        history.push(url.to_string());
    }

    fn current(&self) -> Option<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_overwrites_top_entry() {
        let nav = MemoryNavigator::starting_at("/visa/start");
        nav.push("/visa/review");
        nav.replace("/visa/appointment");

        assert_eq!(nav.history(), vec!["/visa/start", "/visa/appointment"]);
        assert_eq!(nav.current().as_deref(), Some("/visa/appointment"));
    }
}
