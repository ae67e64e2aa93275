//! Document loading
//!
//! PDF extraction goes through `lopdf` page by page; everything else is
//! treated as text with a lossy UTF-8 fallback for odd encodings.

use std::path::Path;

use rag_engine_core::Metadata;

use crate::IngestError;

/// File extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".txt", ".md", ".py", ".js", ".ts", ".tsx", ".jsx", ".json", ".yaml", ".yml",
    ".toml", ".csv", ".html", ".css", ".rs", ".go", ".java", ".c", ".cpp", ".h",
];

const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".jsx", ".json", ".yaml", ".yml", ".toml", ".css", ".rs",
    ".go", ".java", ".c", ".cpp", ".h", ".html",
];

/// A loaded document, optionally split into pages.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub filename: String,
    pub file_type: String,
    pub text: String,
    pub metadata: Metadata,
    /// Per-page texts when the format has pages (PDF); empty otherwise.
    pub pages: Vec<String>,
}

/// Whether `filename` has a supported extension.
pub fn is_supported(filename: &str) -> bool {
    extension(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

/// Load a document from disk by extension.
pub fn load_document(path: &Path) -> Result<LoadedDocument, IngestError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = extension(&filename)
        .ok_or_else(|| IngestError::Unsupported("(no extension)".to_string()))?;

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(IngestError::Unsupported(ext));
    }

    if ext == ".pdf" {
        load_pdf(path, filename)
    } else {
        load_text(path, filename, &ext)
    }
}

fn load_pdf(path: &Path, filename: String) -> Result<LoadedDocument, IngestError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestError::Pdf(e.to_string()))?;

    let mut pages: Vec<String> = Vec::new();
    for (page_number, _) in doc.get_pages() {
        let text = doc
            .extract_text(&[page_number])
            .map_err(|e| IngestError::Pdf(format!("page {}: {}", page_number, e)))?;
        let cleaned = clean_text(&text);
        if !cleaned.is_empty() {
            pages.push(cleaned);
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("page_count".to_string(), serde_json::json!(pages.len()));
    metadata.insert(
        "source".to_string(),
        serde_json::json!(path.to_string_lossy()),
    );

    Ok(LoadedDocument {
        filename,
        file_type: "pdf".to_string(),
        text: pages.join("\n\n"),
        metadata,
        pages,
    })
}

fn load_text(path: &Path, filename: String, ext: &str) -> Result<LoadedDocument, IngestError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let file_type = if CODE_EXTENSIONS.contains(&ext) {
        "code"
    } else {
        "text"
    };

    let mut metadata = Metadata::new();
    metadata.insert(
        "source".to_string(),
        serde_json::json!(path.to_string_lossy()),
    );
    metadata.insert(
        "language".to_string(),
        serde_json::json!(ext.trim_start_matches('.')),
    );

    Ok(LoadedDocument {
        filename,
        file_type: file_type.to_string(),
        text,
        metadata,
        pages: Vec::new(),
    })
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn supported_extensions_are_recognized() {
        assert!(is_supported("notes.md"));
        assert!(is_supported("Report.PDF"));
        assert!(is_supported("main.rs"));
        assert!(!is_supported("archive.zip"));
        assert!(!is_supported("no_extension"));
    }

    #[test]
    fn text_files_load_with_language_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.md");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# Title\n\nSome markdown body.").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.file_type, "text");
        assert_eq!(doc.filename, "sample.md");
        assert!(doc.text.contains("Some markdown body."));
        assert_eq!(doc.metadata["language"], serde_json::json!("md"));
        assert!(doc.pages.is_empty());
    }

    #[test]
    fn code_files_are_typed_as_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        std::fs::write(&path, "fn main() {}").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.file_type, "code");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.exe");
        std::fs::write(&path, b"MZ").unwrap();

        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, IngestError::Unsupported(_)));
    }

    #[test]
    fn invalid_utf8_falls_back_to_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.txt");
        std::fs::write(&path, [b'h', b'i', 0xFF, b'!']).unwrap();

        let doc = load_document(&path).unwrap();
        assert!(doc.text.starts_with("hi"));
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a \n\n b\t c  "), "a b c");
    }
}
