//! `CodeSource`/`CodeWord` records and their mapping to index documents.

use std::path::Path;

use chrono::{DateTime, Utc};
use tantivy::TantivyDocument;
use tantivy::schema::Value;
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};
use crate::schema::{CodeSchema, HintSchema};

/// Convert an instant to the tick integer stored in the index.
pub fn to_ticks(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

/// Parse a tick integer back into an instant.
pub fn from_ticks(ticks: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ticks).unwrap_or(DateTime::UNIX_EPOCH)
}

/// One indexed file.
#[derive(Debug, Clone)]
pub struct CodeSource {
    /// Stable 128-bit identifier, assigned on first index and never reused.
    /// `None` until the mapper generates one.
    pub code_pk: Option<Uuid>,
    pub file_name: String,
    pub file_extension: String,
    /// Absolute canonical path.
    pub file_path: String,
    pub content: String,
    pub index_date: DateTime<Utc>,
    pub last_write_time_utc: DateTime<Utc>,
    /// Free-form metadata; this implementation stores the detected language.
    pub info: String,
}

impl CodeSource {
    /// Read a file from disk into a source record with a canonical path.
    pub fn from_file(path: &Path) -> IndexResult<Self> {
        let canonical = dunce::canonicalize(path)?;
        let content = std::fs::read_to_string(&canonical)?;
        let metadata = std::fs::metadata(&canonical)?;
        let last_write: DateTime<Utc> = metadata.modified()?.into();

        let file_name = canonical
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let file_extension = canonical
            .extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let info = crate::lang::detect_language(&file_extension).to_string();

        Ok(Self {
            code_pk: None,
            file_name,
            file_extension,
            file_path: canonical.to_string_lossy().to_string(),
            content,
            index_date: Utc::now(),
            last_write_time_utc: last_write,
            info,
        })
    }

    /// Re-derive the name fields after the path changed (rename).
    pub fn set_path(&mut self, new_path: String) {
        let path = Path::new(&new_path);
        self.file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        self.file_extension = path
            .extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        self.file_path = new_path;
    }
}

/// One distinct hint word. `word` is the case-sensitive uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeWord {
    pub word: String,
    pub word_lower: String,
}

impl CodeWord {
    pub fn new(word: &str) -> Self {
        Self {
            word: word.to_string(),
            word_lower: word.to_lowercase(),
        }
    }
}

/// Maps sources and hint words to tantivy documents and back.
#[derive(Debug, Clone)]
pub struct DocumentMapper {
    code: CodeSchema,
    hint: HintSchema,
}

impl DocumentMapper {
    pub fn new(code: CodeSchema, hint: HintSchema) -> Self {
        Self { code, hint }
    }

    pub fn code_schema(&self) -> &CodeSchema {
        &self.code
    }

    pub fn hint_schema(&self) -> &HintSchema {
        &self.hint
    }

    /// Build the code-index document for a source, generating the `CodePK`
    /// when the source does not carry one yet. Returns the pk actually used.
    pub fn code_document(&self, source: &CodeSource) -> (TantivyDocument, Uuid) {
        let pk = source.code_pk.unwrap_or_else(Uuid::new_v4);
        let fields = &self.code;

        let mut doc = TantivyDocument::new();
        doc.add_text(fields.code_pk, pk.simple().to_string());

        doc.add_text(fields.file_name, &source.file_name);
        doc.add_text(fields.file_name_raw, &source.file_name);

        doc.add_text(fields.file_extension, &source.file_extension);
        doc.add_text(fields.file_extension_raw, &source.file_extension);

        doc.add_text(fields.file_path, &source.file_path);
        doc.add_text(fields.file_path_raw, &source.file_path);

        doc.add_text(fields.content, &source.content);

        doc.add_text(fields.index_date, to_ticks(source.index_date).to_string());
        doc.add_text(
            fields.last_write_time_utc,
            to_ticks(source.last_write_time_utc).to_string(),
        );

        doc.add_text(fields.info, &source.info);
        doc.add_text(fields.info_raw, &source.info);

        (doc, pk)
    }

    /// Reconstruct a source from a stored code document.
    ///
    /// The raw `$$_` twins are index-only, so every stored attribute reads
    /// from its tokenized field.
    pub fn code_source(&self, doc: &TantivyDocument) -> IndexResult<CodeSource> {
        let fields = &self.code;
        let text = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let file_path = text(fields.file_path)
            .ok_or_else(|| IndexError::MalformedDocument("FilePath".into()))?;
        let code_pk = text(fields.code_pk)
            .and_then(|pk| Uuid::parse_str(&pk).ok())
            .ok_or_else(|| IndexError::MalformedDocument(file_path.clone()))?;

        let ticks = |field| {
            text(field)
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(from_ticks)
        };

        Ok(CodeSource {
            code_pk: Some(code_pk),
            file_name: text(fields.file_name).unwrap_or_default(),
            file_extension: text(fields.file_extension).unwrap_or_default(),
            file_path,
            content: text(fields.content).unwrap_or_default(),
            index_date: ticks(fields.index_date).unwrap_or(DateTime::UNIX_EPOCH),
            last_write_time_utc: ticks(fields.last_write_time_utc)
                .unwrap_or(DateTime::UNIX_EPOCH),
            info: text(fields.info).unwrap_or_default(),
        })
    }

    pub fn hint_document(&self, word: &CodeWord) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.hint.word, &word.word);
        doc.add_text(self.hint.word_lower, &word.word_lower);
        doc
    }

    pub fn hint_word(&self, doc: &TantivyDocument) -> Option<String> {
        doc.get_first(self.hint.word)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CodeSchema, HintSchema};

    fn mapper() -> DocumentMapper {
        DocumentMapper::new(CodeSchema::build(), HintSchema::build())
    }

    fn sample_source() -> CodeSource {
        CodeSource {
            code_pk: None,
            file_name: "lib.rs".into(),
            file_extension: "rs".into(),
            file_path: "/repo/src/lib.rs".into(),
            content: "pub fn answer() -> u32 { 42 }".into(),
            index_date: Utc::now(),
            last_write_time_utc: Utc::now(),
            info: "rust".into(),
        }
    }

    #[test]
    fn pk_is_generated_when_absent_and_kept_when_present() {
        let mapper = mapper();

        let (_, generated) = mapper.code_document(&sample_source());
        let mut source = sample_source();
        source.code_pk = Some(generated);
        let (_, kept) = mapper.code_document(&source);
        assert_eq!(generated, kept);
    }

    #[test]
    fn code_document_round_trips() {
        let mapper = mapper();
        let source = sample_source();
        let (doc, pk) = mapper.code_document(&source);

        let restored = mapper.code_source(&doc).unwrap();
        assert_eq!(restored.code_pk, Some(pk));
        assert_eq!(restored.file_path, source.file_path);
        assert_eq!(restored.file_name, source.file_name);
        assert_eq!(restored.content, source.content);
        // Instants survive at tick precision.
        assert_eq!(
            to_ticks(restored.last_write_time_utc),
            to_ticks(source.last_write_time_utc)
        );
    }

    #[test]
    fn set_path_rederives_name_and_extension() {
        let mut source = sample_source();
        source.set_path("/repo/src/renamed.toml".into());
        assert_eq!(source.file_name, "renamed.toml");
        assert_eq!(source.file_extension, "toml");
    }

    #[test]
    fn hint_document_round_trips() {
        let mapper = mapper();
        let word = CodeWord::new("ReadFile");
        assert_eq!(word.word_lower, "readfile");

        let doc = mapper.hint_document(&word);
        assert_eq!(mapper.hint_word(&doc).as_deref(), Some("ReadFile"));
    }

    #[test]
    fn from_file_reads_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.rs");
        std::fs::write(&path, "fn hello() {}").unwrap();

        let source = CodeSource::from_file(&path).unwrap();
        assert!(source.code_pk.is_none());
        assert_eq!(source.file_name, "hello.rs");
        assert_eq!(source.file_extension, "rs");
        assert_eq!(source.info, "rust");
        assert_eq!(source.content, "fn hello() {}");
        assert!(Path::new(&source.file_path).is_absolute());
    }
}
