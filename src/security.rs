use sha2::{Digest, Sha256};

/// Derive a document-scoped key from the input path and, when available,
/// the raw content bytes.
///
/// `SHA-256(path || 0x7C || content)`; the separator keeps path and content
/// from running together. Returns the full 32-byte digest; callers may
/// truncate.
pub fn derive_document_key(input_path: &str, content: Option<&[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input_path.as_bytes());
    if let Some(bytes) = content {
        hasher.update(b"|");
        hasher.update(bytes);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_changes_with_content() {
        let k1 = derive_document_key("/path/to/doc.pdf", Some(b"abc"));
        let k2 = derive_document_key("/path/to/doc.pdf", Some(b"abcd"));
        assert_ne!(k1, k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn test_key_changes_with_path() {
        let k1 = derive_document_key("/a.txt", Some(b"same"));
        let k2 = derive_document_key("/b.txt", Some(b"same"));
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_key_without_content_is_stable() {
        let k1 = derive_document_key("/a.txt", None);
        let k2 = derive_document_key("/a.txt", None);
        assert_eq!(k1, k2);
    }
}
