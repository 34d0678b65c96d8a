/// Lets exactly one item through. Whoever owns the gate is expected to tear down everything
/// upstream once [`on_item`](FirstValueGate::on_item) has forwarded something; later items are
/// dropped regardless.
#[derive(Debug, Default)]
pub struct FirstValueGate {
    passed: bool,
}

impl FirstValueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `item` if nothing has passed yet. A `Some` return means the gate just closed.
    pub fn on_item<T>(&mut self, item: T) -> Option<T> {
        if self.passed {
            tracing::trace!("First-value gate already closed, dropping item");
            return None;
        }
        self.passed = true;
        Some(item)
    }

    pub fn is_open(&self) -> bool {
        !self.passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;

    #[test]
    fn test_first_item_passes_and_closes() {
        let mut gate = FirstValueGate::new();
        assert!(gate.is_open());

        assert_eq!(gate.on_item::<Result<&str, FetchError>>(Ok("a")), Some(Ok("a")));
        assert!(!gate.is_open());
        assert_eq!(gate.on_item::<Result<&str, FetchError>>(Ok("b")), None);
    }

    #[test]
    fn test_failure_counts_as_the_item() {
        let mut gate = FirstValueGate::new();
        let failed: Result<&str, FetchError> = Err(FetchError::NotFound("7".to_string()));

        assert_eq!(gate.on_item(failed.clone()), Some(failed));
        assert_eq!(gate.on_item::<Result<&str, FetchError>>(Ok("late")), None);
    }
}
