use serde::{Deserialize, Serialize};

/// One entry of a resolved chapter list.
///
/// `id` is the resumability key; `index` is the zero-based position in the
/// canonical ordering and the sort key for assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDescriptor {
    pub id: String,
    pub title: String,
    pub url: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterResult {
    pub title: String,
    pub content: String,
}

/// Row of the failure report. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub url: String,
}

impl From<&ChapterDescriptor> for FailureRecord {
    fn from(chapter: &ChapterDescriptor) -> Self {
        Self {
            index: chapter.index + 1,
            id: chapter.id.clone(),
            title: chapter.title.clone(),
            url: chapter.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMeta {
    pub name: String,
    pub author: String,
    pub description: String,
}
