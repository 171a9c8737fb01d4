use crate::model::{DocumentKind, SignatureTarget};

/// Produce the signed artifact for a fully signed target and return an opaque
/// reference to it.
pub trait Renderer: Send + Sync {
    fn render(&self, kind: DocumentKind, target: SignatureTarget) -> eyre::Result<String>;
}

/// Name artifacts after their target under a storage prefix; the document
/// service picks them up from there.
pub struct StorageRenderer {
    prefix: String,
}

impl StorageRenderer {
    pub fn new(prefix: impl Into<String>) -> StorageRenderer {
        StorageRenderer {
            prefix: prefix.into(),
        }
    }
}

impl Renderer for StorageRenderer {
    fn render(&self, kind: DocumentKind, target: SignatureTarget) -> eyre::Result<String> {
        Ok(format!(
            "{}/{}/{}-{}.pdf",
            self.prefix.trim_end_matches('/'),
            kind.as_str(),
            target.target_type().as_str(),
            target.id()
        ))
    }
}

#[test]
fn test_storage_renderer() {
    use crate::model::PositionId;
    let renderer = StorageRenderer::new("documents/");
    let target = SignatureTarget::Position(PositionId(12));
    assert_eq!(
        renderer
            .render(target.document_kind(), target)
            .unwrap(),
        "documents/commitment-term/position-12.pdf"
    );
}
