use crate::error::{PipelineError, Result};
use crate::models::Resource;

/// Screens submitted material before anything is persisted or generated.
pub trait ContentScreen: Send + Sync {
    fn screen(&self, resources: &[Resource]) -> Result<()>;
}

/// Rejects resources whose text contains any configured term (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct BlocklistScreen {
    terms: Vec<String>,
}

impl BlocklistScreen {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl ContentScreen for BlocklistScreen {
    fn screen(&self, resources: &[Resource]) -> Result<()> {
        if self.terms.is_empty() {
            return Ok(());
        }
        for r in resources {
            let Some(text) = r.content.as_deref() else {
                continue;
            };
            let lowered = text.to_lowercase();
            if let Some(term) = self.terms.iter().find(|t| lowered.contains(t.as_str())) {
                tracing::warn!(order_index = r.order_index, "resource rejected by content screen");
                return Err(PipelineError::ContentSafety(format!(
                    "resource {} contains disallowed content ({term})",
                    r.order_index
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blocklist_allows_everything() {
        let screen = BlocklistScreen::default();
        assert!(screen.screen(&[Resource::text("anything", 0)]).is_ok());
    }

    #[test]
    fn matches_case_insensitively() {
        let screen = BlocklistScreen::new(["Forbidden", " "]);
        let err = screen
            .screen(&[Resource::text("fine", 0), Resource::text("this is FORBIDDEN text", 1)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::ContentSafety(ref m) if m.contains("resource 1")));
    }
}
