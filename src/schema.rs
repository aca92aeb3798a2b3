//! Index schemas for the code and hint indexes.
//!
//! Every non-content string field is written twice: tokenized under its
//! attribute name (searchable by text) and untokenized under the same name
//! with the `$$_` suffix (searchable by exact term or prefix). `CodePK` is
//! untokenized only; `Content` is tokenized and stored; timestamps are
//! stored as integer-string raw fields.

use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions,
};

use crate::analyzer::CODE_TOKENIZER;

/// Literal suffix of the untokenized companion of a text field.
pub const RAW_SUFFIX: &str = "$$_";

fn code_text_stored() -> TextOptions {
    TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(CODE_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored()
}

#[derive(Debug, Clone)]
pub struct CodeSchema {
    pub code_pk: Field,
    pub file_name: Field,
    pub file_name_raw: Field,
    pub file_extension: Field,
    pub file_extension_raw: Field,
    pub file_path: Field,
    pub file_path_raw: Field,
    pub content: Field,
    pub index_date: Field,
    pub last_write_time_utc: Field,
    pub info: Field,
    pub info_raw: Field,
    schema: Schema,
}

impl CodeSchema {
    pub fn build() -> Self {
        let mut builder = Schema::builder();

        let code_pk = builder.add_text_field("CodePK", STRING | STORED);

        let file_name = builder.add_text_field("FileName", code_text_stored());
        let file_name_raw =
            builder.add_text_field(&format!("FileName{RAW_SUFFIX}"), STRING);

        let file_extension = builder.add_text_field("FileExtension", code_text_stored());
        let file_extension_raw =
            builder.add_text_field(&format!("FileExtension{RAW_SUFFIX}"), STRING);

        let file_path = builder.add_text_field("FilePath", code_text_stored());
        let file_path_raw =
            builder.add_text_field(&format!("FilePath{RAW_SUFFIX}"), STRING);

        let content = builder.add_text_field("Content", code_text_stored());

        let index_date = builder.add_text_field("IndexDate", STRING | STORED);
        let last_write_time_utc =
            builder.add_text_field("LastWriteTimeUtc", STRING | STORED);

        let info = builder.add_text_field("Info", code_text_stored());
        let info_raw = builder.add_text_field(&format!("Info{RAW_SUFFIX}"), STRING);

        let schema = builder.build();

        Self {
            code_pk,
            file_name,
            file_name_raw,
            file_extension,
            file_extension_raw,
            file_path,
            file_path_raw,
            content,
            index_date,
            last_write_time_utc,
            info,
            info_raw,
            schema,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Default fields for free-text queries against the code index.
    pub fn text_fields(&self) -> Vec<Field> {
        vec![self.content, self.file_name, self.file_path]
    }
}

#[derive(Debug, Clone)]
pub struct HintSchema {
    /// Original-case word; the uniqueness key of the hint index.
    pub word: Field,
    /// Lower-cased copy for case-insensitive lookup.
    pub word_lower: Field,
    schema: Schema,
}

impl HintSchema {
    pub fn build() -> Self {
        let mut builder = Schema::builder();

        let word = builder.add_text_field("Word", STRING | STORED);
        let word_lower = builder.add_text_field("WordLower", STRING);

        let schema = builder.build();

        Self {
            word,
            word_lower,
            schema,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_schema_has_raw_twins() {
        let schema = CodeSchema::build();
        let inner = schema.schema();
        assert!(inner.get_field("FileName").is_ok());
        assert!(inner.get_field("FileName$$_").is_ok());
        assert!(inner.get_field("FilePath$$_").is_ok());
        assert!(inner.get_field("CodePK").is_ok());
        // CodePK is raw-only: no tokenized twin exists for it.
        assert!(inner.get_field("CodePK$$_").is_err());
    }

    #[test]
    fn hint_schema_fields() {
        let schema = HintSchema::build();
        assert!(schema.schema().get_field("Word").is_ok());
        assert!(schema.schema().get_field("WordLower").is_ok());
    }
}
