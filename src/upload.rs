//! Upload gate.
//!
//! Validates an incoming file against count, type and size constraints
//! before any extraction or network work happens. Type checks run on the
//! multipart part headers, and the size cap is enforced while the body is
//! being streamed, so a rejected upload is never fully buffered.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use thiserror::Error;

use crate::config::UploadConfig;
use crate::models::{extension_of, UploadedDocument};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file received. Send a PDF in the \"{field}\" field of a multipart/form-data request.")]
    NoFile { field: String },

    #[error("File must be sent in the \"{field}\" form field.")]
    UnexpectedField { field: String },

    #[error("Only one file may be uploaded per request.")]
    TooManyFiles,

    #[error("Unsupported file type \"{0}\". Only PDF files are accepted.")]
    UnsupportedMimeType(String),

    #[error("Unsupported extension \"{0}\". Only .pdf files are accepted.")]
    UnsupportedExtension(String),

    #[error("File too large. Maximum size is {max_mb} MB.")]
    TooLarge { max_mb: u64 },

    #[error("The uploaded file is empty.")]
    Empty,

    #[error("Malformed upload request: {0}")]
    Malformed(String),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::NoFile { .. }
            | UploadError::UnexpectedField { .. }
            | UploadError::TooManyFiles
            | UploadError::Malformed(_) => StatusCode::BAD_REQUEST,
            UploadError::UnsupportedMimeType(_) | UploadError::UnsupportedExtension(_) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Empty => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Validation rules for a single-file upload.
#[derive(Debug, Clone)]
pub struct UploadGate {
    max_file_bytes: u64,
    field_name: String,
    allowed_mime_type: String,
    allowed_extension: String,
}

impl UploadGate {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            field_name: config.field_name.clone(),
            allowed_mime_type: config.allowed_mime_type.to_ascii_lowercase(),
            allowed_extension: config.allowed_extension.to_ascii_lowercase(),
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Type checks that only need the part headers.
    pub fn check_headers(&self, file_name: &str, mime_type: &str) -> Result<(), UploadError> {
        if !mime_type.eq_ignore_ascii_case(&self.allowed_mime_type) {
            return Err(UploadError::UnsupportedMimeType(mime_type.to_string()));
        }
        let ext = extension_of(file_name);
        if ext != self.allowed_extension {
            return Err(UploadError::UnsupportedExtension(ext));
        }
        Ok(())
    }

    pub fn check_size(&self, size: u64) -> Result<(), UploadError> {
        if size > self.max_file_bytes {
            return Err(self.too_large());
        }
        Ok(())
    }

    /// Full validation of a document that is already in memory (CLI path).
    pub fn validate(&self, doc: &UploadedDocument) -> Result<(), UploadError> {
        self.check_headers(&doc.original_name, &doc.declared_mime_type)?;
        self.check_size(doc.size_bytes)?;
        if doc.size_bytes == 0 {
            return Err(UploadError::Empty);
        }
        Ok(())
    }

    /// Reads exactly one file from a multipart body.
    ///
    /// Non-file form fields are skipped. A second file part is a count
    /// violation regardless of its field name.
    pub async fn receive(&self, multipart: &mut Multipart) -> Result<UploadedDocument, UploadError> {
        let mut received: Option<UploadedDocument> = None;

        loop {
            let mut field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return Err(self.map_multipart_error(e)),
            };

            let file_name = match field.file_name() {
                Some(name) => name.to_string(),
                None => continue,
            };

            if received.is_some() {
                return Err(UploadError::TooManyFiles);
            }
            if field.name() != Some(self.field_name.as_str()) {
                return Err(UploadError::UnexpectedField {
                    field: self.field_name.clone(),
                });
            }

            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            self.check_headers(&file_name, &mime_type)?;

            let mut bytes: Vec<u8> = Vec::new();
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        self.check_size((bytes.len() + chunk.len()) as u64)?;
                        bytes.extend_from_slice(&chunk);
                    }
                    Ok(None) => break,
                    Err(e) => return Err(self.map_multipart_error(e)),
                }
            }

            received = Some(UploadedDocument::new(file_name, mime_type, bytes));
        }

        let doc = received.ok_or_else(|| UploadError::NoFile {
            field: self.field_name.clone(),
        })?;
        if doc.size_bytes == 0 {
            return Err(UploadError::Empty);
        }
        Ok(doc)
    }

    fn too_large(&self) -> UploadError {
        UploadError::TooLarge {
            max_mb: self.max_file_bytes.div_ceil(MIB),
        }
    }

    fn map_multipart_error(&self, err: MultipartError) -> UploadError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            self.too_large()
        } else {
            UploadError::Malformed(err.body_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> UploadGate {
        UploadGate::new(&UploadConfig::default())
    }

    #[test]
    fn accepts_pdf_headers_case_insensitively() {
        gate()
            .check_headers("Lease.PDF", "application/pdf")
            .unwrap();
        gate()
            .check_headers("lease.pdf", "Application/PDF")
            .unwrap();
    }

    #[test]
    fn rejects_wrong_mime_type_first() {
        let err = gate().check_headers("notes.txt", "text/plain").unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedMimeType(ref m) if m == "text/plain"));
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn rejects_wrong_extension() {
        let err = gate()
            .check_headers("contract.docx", "application/pdf")
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedExtension(ref e) if e == ".docx"));
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn rejects_oversized_file() {
        let g = gate();
        g.check_size(20 * 1024 * 1024).unwrap();
        let err = g.check_size(20 * 1024 * 1024 + 1).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "File too large. Maximum size is 20 MB.");
    }

    #[test]
    fn rejects_empty_document() {
        let doc = UploadedDocument::new("x.pdf", "application/pdf", Vec::new());
        let err = gate().validate(&doc).unwrap_err();
        assert!(matches!(err, UploadError::Empty));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn validate_accepts_small_pdf() {
        let doc = UploadedDocument::new("x.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        gate().validate(&doc).unwrap();
    }

    #[test]
    fn count_and_field_errors_are_bad_requests() {
        assert_eq!(UploadError::TooManyFiles.status(), StatusCode::BAD_REQUEST);
        let err = UploadError::UnexpectedField {
            field: "file".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "File must be sent in the \"file\" form field.");
    }
}
