//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{
    dictionary, Document, EncryptionState, EncryptionVersion, Object, Permissions, Stream,
    StringFormat,
};
use verilex::analysis::{AnalysisService, UpstreamError};
use verilex::config::Config;

/// Builds a PDF with one page per entry; `None` is a page with no text.
pub fn make_pdf(pages: &[Option<&str>]) -> Vec<u8> {
    to_bytes(build_doc(pages))
}

/// A contract that only opens with the user password `secret`.
pub fn encrypted_pdf() -> Vec<u8> {
    let mut doc = build_doc(&[Some(CONTRACT_TEXT)]);
    let file_id = Object::String(b"verilex-fixture-id".to_vec(), StringFormat::Literal);
    doc.trailer
        .set("ID", Object::Array(vec![file_id.clone(), file_id]));
    let state = EncryptionState::try_from(EncryptionVersion::V2 {
        document: &doc,
        owner_password: "owner",
        user_password: "secret",
        key_length: 128,
        permissions: Permissions::all(),
    })
    .unwrap();
    doc.encrypt(&state).unwrap();
    to_bytes(doc)
}

fn to_bytes(mut doc: Document) -> Vec<u8> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn build_doc(pages: &[Option<&str>]) -> Document {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let content = match page {
            Some(text) => format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text),
            None => String::new(),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

pub const CONTRACT_TEXT: &str =
    "This Services Agreement is entered into by Acme Corp and Client Ltd for monthly consulting.";

pub fn contract_pdf() -> Vec<u8> {
    make_pdf(&[Some(CONTRACT_TEXT), Some("Client shall pay all invoices within thirty days.")])
}

pub fn well_formed_reply() -> String {
    serde_json::json!({
        "summary": "A services agreement between Acme Corp and Client Ltd.",
        "key_obligations": ["Client shall pay invoices within thirty days."],
        "risky_clauses": [
            { "clause": "Unlimited liability", "risk_level": "HIGH", "reason": "No cap on damages." }
        ],
        "missing_clauses": ["Termination for convenience"],
        "suggestions": ["It may be worth clarifying the payment schedule."]
    })
    .to_string()
}

/// In-process analysis backend with a fixed reply.
pub struct ScriptedService {
    reply: Result<String, (Option<u16>, String)>,
    delay: Duration,
    calls: AtomicUsize,
    last_message: Mutex<Option<String>>,
}

impl ScriptedService {
    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        Self::build(Ok(reply.into()), Duration::ZERO)
    }

    pub fn failing(status: Option<u16>, message: &str) -> Arc<Self> {
        Self::build(Err((status, message.to_string())), Duration::ZERO)
    }

    pub fn stalling(delay: Duration) -> Arc<Self> {
        Self::build(Ok(well_formed_reply()), delay)
    }

    fn build(reply: Result<String, (Option<u16>, String)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
            last_message: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisService for ScriptedService {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _instructions: &str,
        user_message: &str,
    ) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_message.lock().unwrap() = Some(user_message.to_string());
        tokio::time::sleep(self.delay).await;
        self.reply
            .clone()
            .map_err(|(status, message)| UpstreamError::new(status, message))
    }
}

/// Defaults with short timeouts and an in-memory history.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.history.backend = "memory".to_string();
    config.history.capacity = 5;
    config.analysis.timeout_secs = 1;
    config.extraction.timeout_secs = 10;
    config
}
