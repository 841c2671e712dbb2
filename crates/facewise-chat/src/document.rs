use chrono::NaiveDateTime;
use facewise_core::store::TIMESTAMP_FORMAT;
use facewise_core::FaceSummary;
use serde::Serialize;

/// Text projection of one registered face, as fed to the embedder and the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub id: i64,
    pub name: String,
    pub timestamp: String,
}

impl Document {
    pub fn registered_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.metadata.timestamp, TIMESTAMP_FORMAT).ok()
    }

    /// Lowercased name segment of the content (`name: <x>,`), if present.
    pub(crate) fn name_segment(&self) -> Option<String> {
        let lowered = self.content.to_lowercase();
        let (_, rest) = lowered.split_once("name:")?;
        Some(rest.split(',').next().unwrap_or_default().trim().to_string())
    }
}

impl From<&FaceSummary> for Document {
    fn from(face: &FaceSummary) -> Self {
        Self {
            content: format!(
                "Name: {}, Registered at: {}, ID: {}",
                face.name, face.timestamp, face.id
            ),
            metadata: DocumentMetadata {
                id: face.id,
                name: face.name.clone(),
                timestamp: face.timestamp.clone(),
            },
        }
    }
}

/// The document with the latest registration time. Unparseable timestamps
/// sort before every valid one; ties go to the later document.
pub fn most_recent(documents: &[Document]) -> Option<&Document> {
    documents.iter().max_by_key(|doc| doc.registered_at())
}

#[cfg(test)]
pub(crate) fn doc(id: i64, name: &str, timestamp: &str) -> Document {
    Document::from(&FaceSummary {
        id,
        name: name.to_string(),
        timestamp: timestamp.to_string(),
    })
}
